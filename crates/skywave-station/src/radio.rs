//! Radio interface boundary.
//!
//! The station consumes a byte-free, sample-level radio: it pushes
//! baseband samples out and registers a callback for captured samples.
//! Real drivers (sound card, SDR) live outside the core; the loopback
//! pair here exists for tests and the bench mode of the binary.

use std::sync::{Arc, Mutex};

use crate::error::StationError;

/// Non-blocking capture callback registered by the station.
pub type RxCallback = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Transform applied to samples crossing a simulated channel.
pub type ChannelFn = Arc<dyn Fn(&[f32]) -> Vec<f32> + Send + Sync>;

/// Health snapshot of a radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioStatus {
    /// Whether the hardware (or peer) is attached.
    pub connected: bool,
    /// Whether the transmitter is currently keyed.
    pub ptt: bool,
    /// Driver-level error count.
    pub errors: u64,
}

/// The radio boundary the station drives.
///
/// `transmit` blocks until the samples are drained (PTT released);
/// the receive callback must never block.
pub trait RadioInterface: Send + Sync {
    /// Key the transmitter and play out samples.
    fn transmit(&self, samples: &[f32]) -> Result<(), StationError>;

    /// Register the capture callback and start receiving.
    fn start_receive(&self, callback: RxCallback) -> Result<(), StationError>;

    /// Stop receiving.
    fn stop_receive(&self);

    /// Health snapshot.
    fn status(&self) -> RadioStatus;
}

struct LoopbackShared {
    callback: Mutex<Option<RxCallback>>,
    channel: Option<ChannelFn>,
}

/// One end of an in-memory back-to-back radio link.
///
/// Transmitting on one end delivers the samples (through the optional
/// channel transform) to the peer's capture callback, synchronously:
/// "blocks until drained" degenerates to a function call.
pub struct LoopbackRadio {
    peer: Arc<LoopbackShared>,
    local: Arc<LoopbackShared>,
}

impl LoopbackRadio {
    /// A perfect, noiseless pair.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_channel(None)
    }

    /// A pair whose transmissions pass through `channel` in both
    /// directions (AWGN, fading, whatever the test needs).
    #[must_use]
    pub fn pair_with_channel(channel: Option<ChannelFn>) -> (Self, Self) {
        let a = Arc::new(LoopbackShared {
            callback: Mutex::new(None),
            channel: channel.clone(),
        });
        let b = Arc::new(LoopbackShared { callback: Mutex::new(None), channel });
        (
            Self { peer: Arc::clone(&b), local: Arc::clone(&a) },
            Self { peer: a, local: b },
        )
    }
}

impl RadioInterface for LoopbackRadio {
    fn transmit(&self, samples: &[f32]) -> Result<(), StationError> {
        let delivered: Vec<f32> = match &self.peer.channel {
            Some(channel) => channel(samples),
            None => samples.to_vec(),
        };
        let callback = {
            let guard = self
                .peer
                .callback
                .lock()
                .map_err(|_| StationError::Radio("loopback poisoned".to_string()))?;
            guard.clone()
        };
        if let Some(callback) = callback {
            callback(&delivered);
        }
        Ok(())
    }

    fn start_receive(&self, callback: RxCallback) -> Result<(), StationError> {
        let mut guard = self
            .local
            .callback
            .lock()
            .map_err(|_| StationError::Radio("loopback poisoned".to_string()))?;
        *guard = Some(callback);
        Ok(())
    }

    fn stop_receive(&self) {
        if let Ok(mut guard) = self.local.callback.lock() {
            *guard = None;
        }
    }

    fn status(&self) -> RadioStatus {
        RadioStatus { connected: true, ptt: false, errors: 0 }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn loopback_delivers_to_peer() {
        let (a, b) = LoopbackRadio::pair();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        b.start_receive(Arc::new(move |samples: &[f32]| {
            seen.fetch_add(samples.len(), Ordering::SeqCst);
        }))
        .unwrap();

        a.transmit(&[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // Not delivered back to ourselves.
        a.transmit(&[0.5]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn channel_transform_applies() {
        let attenuate: ChannelFn =
            Arc::new(|samples: &[f32]| samples.iter().map(|s| s * 0.5).collect());
        let (a, b) = LoopbackRadio::pair_with_channel(Some(attenuate));

        let captured: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        b.start_receive(Arc::new(move |samples: &[f32]| {
            if let Ok(mut guard) = sink.lock() {
                guard.extend_from_slice(samples);
            }
        }))
        .unwrap();

        a.transmit(&[1.0, -1.0]).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![0.5, -0.5]);
    }

    #[test]
    fn stop_receive_disconnects() {
        let (a, b) = LoopbackRadio::pair();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        b.start_receive(Arc::new(move |samples: &[f32]| {
            seen.fetch_add(samples.len(), Ordering::SeqCst);
        }))
        .unwrap();
        b.stop_receive();

        a.transmit(&[0.1]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
