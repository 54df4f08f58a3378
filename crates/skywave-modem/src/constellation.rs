//! Modulation constellations and bit mapping.
//!
//! All constellations are Gray-mapped and normalized to unit average
//! power, so the slicer and the SNR estimator work from one scale. Bits
//! pack MSB-first; the final symbol of a frame is zero-padded.

use num_complex::Complex;

/// Supported modulations, lowest to highest spectral efficiency.
///
/// Declaration order is the upgrade order; `Ord` is used by the adaptive
/// selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modulation {
    /// 1 bit/symbol, workable near 0 dB
    Bpsk,
    /// 2 bits/symbol
    Qpsk,
    /// 3 bits/symbol
    Psk8,
    /// 4 bits/symbol
    Qam16,
}

const SQRT1_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

// 1/sqrt(10): 16-QAM normalization for unit average power.
const QAM_SCALE: f32 = 0.316_227_77;

/// Gray sequence for 3 bits: adjacent 8-PSK phases differ in one bit.
const PSK8_GRAY: [u8; 8] = [0, 1, 3, 2, 6, 7, 5, 4];

/// Per-axis Gray mapping for 16-QAM: 2 bits select one of 4 levels.
const QAM_LEVELS: [f32; 4] = [-3.0, -1.0, 1.0, 3.0];
const QAM_GRAY: [u8; 4] = [0b00, 0b01, 0b11, 0b10];

impl Modulation {
    /// All modulations, upgrade order.
    pub const ALL: [Self; 4] = [Self::Bpsk, Self::Qpsk, Self::Psk8, Self::Qam16];

    /// Bits carried per symbol.
    #[must_use]
    pub fn bits_per_symbol(self) -> usize {
        match self {
            Self::Bpsk => 1,
            Self::Qpsk => 2,
            Self::Psk8 => 3,
            Self::Qam16 => 4,
        }
    }

    /// Minimum SNR (dB) at which this modulation is selected.
    #[must_use]
    pub fn required_snr_db(self) -> f32 {
        match self {
            Self::Bpsk => 0.0,
            Self::Qpsk => 3.0,
            Self::Psk8 => 8.0,
            Self::Qam16 => 12.0,
        }
    }

    /// Wire identifier carried in the PHY header.
    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::Bpsk => 0,
            Self::Qpsk => 1,
            Self::Psk8 => 2,
            Self::Qam16 => 3,
        }
    }

    /// Decode a wire identifier.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Bpsk),
            1 => Some(Self::Qpsk),
            2 => Some(Self::Psk8),
            3 => Some(Self::Qam16),
            _ => None,
        }
    }

    /// Constellation point for a symbol value (`0..2^bits`).
    #[must_use]
    pub fn point(self, value: u8) -> Complex<f32> {
        match self {
            Self::Bpsk => {
                if value == 0 {
                    Complex::new(1.0, 0.0)
                } else {
                    Complex::new(-1.0, 0.0)
                }
            },
            Self::Qpsk => {
                let re = if value & 0b10 == 0 { SQRT1_2 } else { -SQRT1_2 };
                let im = if value & 0b01 == 0 { SQRT1_2 } else { -SQRT1_2 };
                Complex::new(re, im)
            },
            Self::Psk8 => {
                let phase_index = PSK8_GRAY
                    .iter()
                    .position(|&g| g == value)
                    .unwrap_or(0);
                let angle = std::f32::consts::TAU * phase_index as f32 / 8.0;
                Complex::new(angle.cos(), angle.sin())
            },
            Self::Qam16 => {
                let i_bits = (value >> 2) & 0b11;
                let q_bits = value & 0b11;
                let level = |bits: u8| {
                    let idx = QAM_GRAY.iter().position(|&g| g == bits).unwrap_or(0);
                    QAM_LEVELS[idx]
                };
                Complex::new(level(i_bits) * QAM_SCALE, level(q_bits) * QAM_SCALE)
            },
        }
    }

    /// Nearest-point decision. Returns the symbol value and the squared
    /// error vector magnitude feeding the SNR estimator.
    #[must_use]
    pub fn slice(self, sample: Complex<f32>) -> (u8, f32) {
        let count = 1u8 << self.bits_per_symbol();
        let mut best = 0u8;
        let mut best_dist = f32::INFINITY;
        for value in 0..count {
            let dist = (sample - self.point(value)).norm_sqr();
            if dist < best_dist {
                best_dist = dist;
                best = value;
            }
        }
        (best, best_dist)
    }
}

/// Map bytes onto symbol values, MSB first, zero-padding the final group.
#[must_use]
pub fn bytes_to_symbols(bytes: &[u8], modulation: Modulation) -> Vec<u8> {
    let bps = modulation.bits_per_symbol();
    let total_bits = bytes.len() * 8;
    let symbol_count = total_bits.div_ceil(bps);

    let bit_at = |index: usize| -> u8 {
        if index >= total_bits {
            return 0;
        }
        (bytes[index / 8] >> (7 - index % 8)) & 1
    };

    (0..symbol_count)
        .map(|s| {
            let mut value = 0u8;
            for b in 0..bps {
                value = (value << 1) | bit_at(s * bps + b);
            }
            value
        })
        .collect()
}

/// Symbol count needed to carry `byte_len` bytes.
#[must_use]
pub fn symbol_count(byte_len: usize, modulation: Modulation) -> usize {
    (byte_len * 8).div_ceil(modulation.bits_per_symbol())
}

/// Reverse of [`bytes_to_symbols`]: unpack symbol values into `byte_len`
/// bytes, discarding the pad bits.
#[must_use]
pub fn symbols_to_bytes(symbols: &[u8], modulation: Modulation, byte_len: usize) -> Vec<u8> {
    let bps = modulation.bits_per_symbol();
    let mut bytes = vec![0u8; byte_len];
    let total_bits = byte_len * 8;

    let mut bit_index = 0usize;
    'outer: for &value in symbols {
        for b in 0..bps {
            if bit_index >= total_bits {
                break 'outer;
            }
            let bit = (value >> (bps - 1 - b)) & 1;
            bytes[bit_index / 8] |= bit << (7 - bit_index % 8);
            bit_index += 1;
        }
    }
    bytes
}
