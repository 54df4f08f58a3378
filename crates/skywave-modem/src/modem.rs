//! The adaptive modem: octets in, audio samples out, and back.
//!
//! Frame structure on the air:
//!
//! ```text
//! [preamble: 32 BPSK] [marker: 16 BPSK] [PHY header: 96 BPSK] [payload]
//! ```
//!
//! The PHY header is 4 bytes sent three times and bit-majority voted:
//! payload modulation id, interleaved length (u16 LE), and interleaver
//! padding. It always rides BPSK so a receiver can read it before knowing
//! the payload modulation. The payload is Reed-Solomon coded, interleaved,
//! then mapped onto the selected constellation.
//!
//! Unrecoverable frames are dropped and counted; the modem never retries.

use num_complex::Complex;

use crate::{
    adaptive::{AdaptiveSelector, DEFAULT_HYSTERESIS_DB, DEFAULT_SNR_ALPHA},
    constellation::{Modulation, bytes_to_symbols, symbol_count, symbols_to_bytes},
    error::{ModemError, ReceiveError},
    interleave::{InterleaverParams, deinterleave, interleave},
    rs::{RsParams, decode_stream, encode_stream},
    waveform::{TRAINING_SYMBOLS, Waveform, WaveformConfig, training_sequence},
};

/// PHY header: 4 bytes, repeated this many times for bit-majority voting.
const PHY_HEADER_COPIES: usize = 3;
const PHY_HEADER_BYTES: usize = 4;
const PHY_HEADER_SYMBOLS: usize = PHY_HEADER_BYTES * PHY_HEADER_COPIES * 8;

/// Full modem configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModemConfig {
    /// Waveform parameters (rates, carrier, shaping).
    pub waveform: WaveformConfig,
    /// Reed-Solomon dimensions.
    pub rs: RsParams,
    /// Interleaver structure.
    pub interleaver: InterleaverParams,
    /// Whether reception drives modulation selection.
    pub adaptive: bool,
    /// Exponential-average weight for SNR samples.
    pub snr_alpha: f32,
    /// Hysteresis margin for modulation switches, in dB.
    pub hysteresis_db: f32,
    /// Modulation in force before any reception.
    pub initial_modulation: Modulation,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            waveform: WaveformConfig::default(),
            rs: RsParams::default(),
            interleaver: InterleaverParams::default(),
            adaptive: true,
            snr_alpha: DEFAULT_SNR_ALPHA,
            hysteresis_db: DEFAULT_HYSTERESIS_DB,
            initial_modulation: Modulation::Bpsk,
        }
    }
}

/// Snapshot of the modem's link state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModemStatus {
    /// Modulation currently selected for transmit.
    pub modulation: Modulation,
    /// Net data rate at that modulation, bits per second after coding.
    pub data_rate_bps: f32,
    /// Smoothed SNR estimate in dB. `None` before the first reception.
    pub snr_db: Option<f32>,
}

/// Frame and error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemCounters {
    /// Frames successfully transmitted.
    pub frames_sent: u64,
    /// Frames successfully received.
    pub frames_received: u64,
    /// Captures with no usable sync.
    pub sync_losses: u64,
    /// Frames lost to unrecoverable FEC blocks.
    pub fec_failures: u64,
    /// Bytes repaired by the FEC across all received frames.
    pub fec_corrected_bytes: u64,
    /// Captures shorter than their PHY header claimed.
    pub truncated: u64,
}

/// The adaptive modem.
#[derive(Debug)]
pub struct Modem {
    config: ModemConfig,
    waveform: Waveform,
    selector: AdaptiveSelector,
    counters: ModemCounters,
}

impl Modem {
    /// Build a modem, validating every sub-configuration.
    pub fn new(config: ModemConfig) -> Result<Self, ModemError> {
        config.rs.validate().map_err(ModemError::InvalidConfig)?;
        config.interleaver.validate().map_err(ModemError::InvalidConfig)?;
        let waveform = Waveform::new(config.waveform)?;
        let selector =
            AdaptiveSelector::new(config.initial_modulation, config.snr_alpha, config.hysteresis_db);
        Ok(Self { config, waveform, selector, counters: ModemCounters::default() })
    }

    /// Current link status.
    #[must_use]
    pub fn status(&self) -> ModemStatus {
        let modulation = self.selector.current();
        ModemStatus {
            modulation,
            data_rate_bps: self.config.waveform.symbol_rate
                * modulation.bits_per_symbol() as f32
                * self.config.rs.rate(),
            snr_db: self.selector.snr_db(),
        }
    }

    /// Frame and error counters.
    #[must_use]
    pub fn counters(&self) -> ModemCounters {
        self.counters
    }

    /// Pin the transmit modulation.
    pub fn set_modulation(&mut self, modulation: Modulation) {
        self.selector.set_modulation(modulation);
    }

    /// Convert a byte frame to audio samples at the current modulation.
    pub fn transmit(&mut self, bytes: &[u8]) -> Result<Vec<f32>, ModemError> {
        let audio = self.transmit_with(bytes, self.selector.current())?;
        Ok(audio)
    }

    /// Convert a byte frame to audio samples at an explicit modulation.
    pub fn transmit_with(
        &mut self,
        bytes: &[u8],
        modulation: Modulation,
    ) -> Result<Vec<f32>, ModemError> {
        let coded = encode_stream(bytes, self.config.rs);
        let (interleaved, pad) = interleave(&coded, self.config.interleaver);

        if interleaved.len() > u16::MAX as usize {
            return Err(ModemError::FrameTooLarge {
                size: interleaved.len(),
                max: u16::MAX as usize,
            });
        }
        let n = interleaved.len() as u16;

        let phy = [modulation.id(), n.to_le_bytes()[0], n.to_le_bytes()[1], pad as u8];
        let mut header_bytes = Vec::with_capacity(PHY_HEADER_BYTES * PHY_HEADER_COPIES);
        for _ in 0..PHY_HEADER_COPIES {
            header_bytes.extend_from_slice(&phy);
        }

        let mut symbols: Vec<Complex<f32>> = Vec::new();
        symbols.extend(training_sequence().iter().map(|&t| Complex::new(t, 0.0)));
        symbols.extend(
            bytes_to_symbols(&header_bytes, Modulation::Bpsk)
                .iter()
                .map(|&v| Modulation::Bpsk.point(v)),
        );
        symbols
            .extend(bytes_to_symbols(&interleaved, modulation).iter().map(|&v| modulation.point(v)));

        self.counters.frames_sent += 1;
        Ok(self.waveform.modulate(&symbols))
    }

    /// Demodulate a capture back into the transmitted bytes.
    pub fn receive(&mut self, samples: &[f32]) -> Result<Vec<u8>, ReceiveError> {
        let stream = self.waveform.synchronize(samples).inspect_err(|_| {
            self.counters.sync_losses += 1;
        })?;

        // PHY header: BPSK, bit-majority over three copies.
        let mut header_values = Vec::with_capacity(PHY_HEADER_SYMBOLS);
        for k in 0..PHY_HEADER_SYMBOLS {
            let Some(sym) = stream.symbol(TRAINING_SYMBOLS + k) else {
                self.counters.truncated += 1;
                return Err(ReceiveError::Truncated);
            };
            header_values.push(Modulation::Bpsk.slice(sym).0);
        }
        let header_bytes = symbols_to_bytes(
            &header_values,
            Modulation::Bpsk,
            PHY_HEADER_BYTES * PHY_HEADER_COPIES,
        );
        let mut phy = [0u8; PHY_HEADER_BYTES];
        for i in 0..PHY_HEADER_BYTES {
            let a = header_bytes[i];
            let b = header_bytes[PHY_HEADER_BYTES + i];
            let c = header_bytes[2 * PHY_HEADER_BYTES + i];
            phy[i] = (a & b) | (a & c) | (b & c);
        }

        let Some(modulation) = Modulation::from_id(phy[0]) else {
            self.counters.sync_losses += 1;
            return Err(ReceiveError::SyncLost);
        };
        let n = u16::from_le_bytes([phy[1], phy[2]]) as usize;
        let pad = phy[3] as usize;
        if pad >= self.config.interleaver.branches.max(1) || pad > n {
            self.counters.sync_losses += 1;
            return Err(ReceiveError::SyncLost);
        }

        let payload_symbols = symbol_count(n, modulation);
        let first_payload = TRAINING_SYMBOLS + PHY_HEADER_SYMBOLS;
        if payload_symbols > 0 && stream.symbol(first_payload + payload_symbols - 1).is_none() {
            self.counters.truncated += 1;
            return Err(ReceiveError::Truncated);
        }

        let mut values = Vec::with_capacity(payload_symbols);
        let mut err_power = 0.0f64;
        let mut sig_power = 0.0f64;
        for k in 0..payload_symbols {
            let Some(sym) = stream.symbol(first_payload + k) else {
                self.counters.truncated += 1;
                return Err(ReceiveError::Truncated);
            };
            let (value, dist) = modulation.slice(sym);
            values.push(value);
            err_power += f64::from(dist);
            sig_power += f64::from(modulation.point(value).norm_sqr());
        }

        if payload_symbols > 0 {
            let snr_db = if err_power > 1e-12 {
                (10.0 * (sig_power / err_power).log10()) as f32
            } else {
                50.0
            };
            if self.config.adaptive {
                self.selector.observe(snr_db);
            } else {
                self.selector.record(snr_db);
            }
        }

        let interleaved = symbols_to_bytes(&values, modulation, n);
        let coded = deinterleave(&interleaved, self.config.interleaver, pad);

        let Some((data, corrected)) = decode_stream(&coded, self.config.rs) else {
            self.counters.fec_failures += 1;
            return Err(ReceiveError::FecUnrecoverable);
        };

        self.counters.frames_received += 1;
        self.counters.fec_corrected_bytes += corrected as u64;
        Ok(data)
    }
}
