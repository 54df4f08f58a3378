//! Baseband waveform synthesis and recovery.
//!
//! The carrier is a single audio tone; symbols are root-raised-cosine
//! shaped so the occupied bandwidth stays inside a voice channel at the
//! configured symbol rate. Synchronization is data-aided: a known 32-symbol
//! alternating preamble plus a 16-bit frame-start marker give the receiver
//! timing, phase, and amplitude in one correlation pass, with no feedback
//! loops to converge.

use num_complex::Complex;

use crate::error::{ModemError, ReceiveError};

/// Training symbols before the marker: +1 -1 +1 -1 ...
pub const PREAMBLE_SYMBOLS: usize = 32;

/// Frame-start marker transmitted as 16 BPSK symbols after the preamble.
pub const SYNC_WORD: u16 = 0xB24D;

/// Total data-aided training length in symbols.
pub const TRAINING_SYMBOLS: usize = PREAMBLE_SYMBOLS + 16;

/// Marker bit errors tolerated before declaring sync lost.
const SYNC_WORD_MAX_ERRORS: u32 = 2;

/// Minimum normalized correlation for a sync declaration.
const CORRELATION_THRESHOLD: f32 = 0.5;

/// Waveform parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformConfig {
    /// Audio sample rate in Hz.
    pub sample_rate: f32,
    /// Symbol rate in baud. Must divide the sample rate evenly.
    pub symbol_rate: f32,
    /// Carrier tone frequency in Hz.
    pub carrier_hz: f32,
    /// Root-raised-cosine rolloff factor.
    pub rolloff: f32,
    /// Filter span in symbols (each side of center combined).
    pub span_symbols: usize,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        // 2000 baud with 0.35 rolloff occupies 2.7 kHz centred on the
        // 1500 Hz tone, inside a standard voice channel.
        Self {
            sample_rate: 48_000.0,
            symbol_rate: 2_000.0,
            carrier_hz: 1_500.0,
            rolloff: 0.35,
            span_symbols: 8,
        }
    }
}

/// The known ±1 training sequence: preamble then marker bits.
#[must_use]
pub fn training_sequence() -> Vec<f32> {
    let mut train = Vec::with_capacity(TRAINING_SYMBOLS);
    for k in 0..PREAMBLE_SYMBOLS {
        train.push(if k % 2 == 0 { 1.0 } else { -1.0 });
    }
    for bit in 0..16 {
        let set = (SYNC_WORD >> (15 - bit)) & 1 == 1;
        // BPSK: bit 0 maps to +1, bit 1 to -1.
        train.push(if set { -1.0 } else { 1.0 });
    }
    train
}

/// Pulse shaping, mixing, and data-aided synchronization.
#[derive(Debug, Clone)]
pub struct Waveform {
    config: WaveformConfig,
    taps: Vec<f32>,
    sps: usize,
}

impl Waveform {
    /// Build the waveform processor, validating the configuration.
    pub fn new(config: WaveformConfig) -> Result<Self, ModemError> {
        if config.sample_rate <= 0.0 || config.symbol_rate <= 0.0 {
            return Err(ModemError::InvalidConfig("rates must be positive".to_string()));
        }
        let sps_f = config.sample_rate / config.symbol_rate;
        let sps = sps_f.round() as usize;
        if sps < 2 || (sps_f - sps as f32).abs() > 1e-6 {
            return Err(ModemError::InvalidConfig(format!(
                "symbol rate {} must divide sample rate {} evenly",
                config.symbol_rate, config.sample_rate
            )));
        }
        if !(0.0..1.0).contains(&config.rolloff) {
            return Err(ModemError::InvalidConfig(format!("rolloff {} outside [0,1)", config.rolloff)));
        }
        if config.span_symbols == 0 {
            return Err(ModemError::InvalidConfig("filter span must be non-zero".to_string()));
        }
        let occupied = config.symbol_rate * (1.0 + config.rolloff);
        if config.carrier_hz - occupied / 2.0 <= 0.0
            || config.carrier_hz + occupied / 2.0 >= config.sample_rate / 2.0
        {
            return Err(ModemError::InvalidConfig(format!(
                "carrier {} Hz does not fit the occupied band",
                config.carrier_hz
            )));
        }

        let taps = rrc_taps(sps, config.span_symbols, config.rolloff);
        Ok(Self { config, taps, sps })
    }

    /// Samples per symbol.
    #[must_use]
    pub fn samples_per_symbol(&self) -> usize {
        self.sps
    }

    /// The configuration in force.
    #[must_use]
    pub fn config(&self) -> &WaveformConfig {
        &self.config
    }

    /// Shape a symbol sequence and upconvert to real audio samples.
    #[must_use]
    pub fn modulate(&self, symbols: &[Complex<f32>]) -> Vec<f32> {
        if symbols.is_empty() {
            return Vec::new();
        }

        let n_out = (symbols.len() - 1) * self.sps + self.taps.len();
        let mut baseband = vec![Complex::new(0.0, 0.0); n_out];
        for (k, &sym) in symbols.iter().enumerate() {
            let offset = k * self.sps;
            for (t, &tap) in self.taps.iter().enumerate() {
                baseband[offset + t] += sym * tap;
            }
        }

        let w = std::f32::consts::TAU * self.config.carrier_hz / self.config.sample_rate;
        let mut out: Vec<f32> = baseband
            .iter()
            .enumerate()
            .map(|(n, c)| (c * Complex::from_polar(1.0, w * n as f32)).re)
            .collect();

        // Keep the audio inside +/-1 regardless of constellation.
        let peak = out.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        if peak > 0.0 {
            let scale = 0.7 / peak;
            for v in &mut out {
                *v *= scale;
            }
        }
        out
    }

    /// Downconvert and matched-filter a capture, then locate the training
    /// sequence. Returns an equalized symbol view into the capture.
    pub fn synchronize(&self, samples: &[f32]) -> Result<SymbolStream, ReceiveError> {
        let span = (TRAINING_SYMBOLS - 1) * self.sps + 1;
        if samples.len() < span {
            return Err(ReceiveError::SyncLost);
        }

        let w = std::f32::consts::TAU * self.config.carrier_hz / self.config.sample_rate;
        let mixed: Vec<Complex<f32>> = samples
            .iter()
            .enumerate()
            .map(|(n, &v)| Complex::from_polar(v, -w * n as f32))
            .collect();

        let filtered = convolve(&mixed, &self.taps);

        let train = training_sequence();
        let mut best_offset = 0usize;
        let mut best_metric = 0.0f32;
        let mut best_corr = Complex::new(0.0, 0.0);

        let limit = filtered.len() - span;
        for offset in 0..=limit {
            let mut corr = Complex::new(0.0, 0.0);
            let mut energy = 0.0f32;
            for (k, &t) in train.iter().enumerate() {
                let s = filtered[offset + k * self.sps];
                corr += s * t;
                energy += s.norm_sqr();
            }
            if energy <= f32::EPSILON {
                continue;
            }
            let metric = corr.norm_sqr() / (energy * train.len() as f32);
            if metric > best_metric {
                best_metric = metric;
                best_offset = offset;
                best_corr = corr;
            }
        }

        if best_metric < CORRELATION_THRESHOLD {
            return Err(ReceiveError::SyncLost);
        }

        let gain = best_corr / train.len() as f32;
        if gain.norm_sqr() <= f32::EPSILON {
            return Err(ReceiveError::SyncLost);
        }

        let stream = SymbolStream { filtered, start: best_offset, sps: self.sps, gain };

        // Verify the frame-start marker survived.
        let mut errors = 0u32;
        for (k, &t) in train.iter().enumerate().skip(PREAMBLE_SYMBOLS) {
            let Some(sym) = stream.symbol(k) else {
                return Err(ReceiveError::SyncLost);
            };
            let hard = if sym.re >= 0.0 { 1.0 } else { -1.0 };
            if (hard - t).abs() > f32::EPSILON {
                errors += 1;
            }
        }
        if errors > SYNC_WORD_MAX_ERRORS {
            return Err(ReceiveError::SyncLost);
        }

        Ok(stream)
    }
}

/// Equalized symbol view of a synchronized capture.
#[derive(Debug)]
pub struct SymbolStream {
    filtered: Vec<Complex<f32>>,
    start: usize,
    sps: usize,
    gain: Complex<f32>,
}

impl SymbolStream {
    /// Equalized symbol `k` (0 is the first preamble symbol), or `None`
    /// past the end of the capture.
    #[must_use]
    pub fn symbol(&self, k: usize) -> Option<Complex<f32>> {
        let index = self.start + k * self.sps;
        self.filtered.get(index).map(|s| s / self.gain)
    }

    /// Number of whole symbols available from the sync point.
    #[must_use]
    pub fn available_symbols(&self) -> usize {
        (self.filtered.len() - self.start - 1) / self.sps + 1
    }
}

/// Root-raised-cosine taps, unit energy.
fn rrc_taps(sps: usize, span: usize, rolloff: f32) -> Vec<f32> {
    let n = span * sps + 1;
    let mid = (n - 1) as f32 / 2.0;
    let mut taps = Vec::with_capacity(n);

    for i in 0..n {
        let t = (i as f32 - mid) / sps as f32;
        taps.push(rrc_impulse(t, rolloff));
    }

    let energy: f32 = taps.iter().map(|&h| h * h).sum();
    let norm = energy.sqrt();
    for h in &mut taps {
        *h /= norm;
    }
    taps
}

fn rrc_impulse(t: f32, beta: f32) -> f32 {
    use std::f32::consts::PI;

    if t.abs() < 1e-6 {
        return 1.0 - beta + 4.0 * beta / PI;
    }

    if beta > 0.0 {
        let singular = 1.0 / (4.0 * beta);
        if (t.abs() - singular).abs() < 1e-4 {
            let a = (1.0 + 2.0 / PI) * (PI / (4.0 * beta)).sin();
            let b = (1.0 - 2.0 / PI) * (PI / (4.0 * beta)).cos();
            return beta / std::f32::consts::SQRT_2 * (a + b);
        }
    }

    let num = (PI * t * (1.0 - beta)).sin() + 4.0 * beta * t * (PI * t * (1.0 + beta)).cos();
    let den = PI * t * (1.0 - (4.0 * beta * t).powi(2));
    num / den
}

fn convolve(signal: &[Complex<f32>], taps: &[f32]) -> Vec<Complex<f32>> {
    let n = signal.len() + taps.len() - 1;
    let mut out = vec![Complex::new(0.0, 0.0); n];
    for (i, &s) in signal.iter().enumerate() {
        for (j, &h) in taps.iter().enumerate() {
            out[i + j] += s * h;
        }
    }
    out
}
