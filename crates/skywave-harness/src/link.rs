//! Back-to-back modem link through a simulated channel.

use skywave_modem::{Modem, Modulation, ReceiveError};

use crate::channel::AwgnChannel;

/// Two modems wired through an optional noisy channel.
pub struct AudioLink {
    channel: Option<AwgnChannel>,
}

impl AudioLink {
    /// A perfect link.
    #[must_use]
    pub fn clean() -> Self {
        Self { channel: None }
    }

    /// A link with AWGN at the given SNR.
    #[must_use]
    pub fn noisy(snr_db: f32, seed: u64) -> Self {
        Self { channel: Some(AwgnChannel::new(snr_db, seed)) }
    }

    /// Carry one frame from `tx` to `rx` at the transmitter's current
    /// modulation.
    pub fn transfer(
        &mut self,
        tx: &mut Modem,
        rx: &mut Modem,
        bytes: &[u8],
    ) -> Result<Vec<u8>, ReceiveError> {
        let modulation = tx.status().modulation;
        self.transfer_with(tx, rx, bytes, modulation)
    }

    /// Carry one frame at an explicit modulation.
    pub fn transfer_with(
        &mut self,
        tx: &mut Modem,
        rx: &mut Modem,
        bytes: &[u8],
        modulation: Modulation,
    ) -> Result<Vec<u8>, ReceiveError> {
        let audio = tx
            .transmit_with(bytes, modulation)
            .map_err(|_| ReceiveError::Truncated)?;
        let on_air = match &mut self.channel {
            Some(channel) => channel.apply(&audio),
            None => audio,
        };
        rx.receive(&on_air)
    }
}
