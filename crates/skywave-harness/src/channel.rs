//! Simulated radio channels.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Additive white Gaussian noise at a fixed SNR relative to the mean
/// power of each frame.
pub struct AwgnChannel {
    snr_db: f32,
    rng: ChaCha8Rng,
}

impl AwgnChannel {
    /// Channel at `snr_db`, deterministic per `seed`.
    #[must_use]
    pub fn new(snr_db: f32, seed: u64) -> Self {
        Self { snr_db, rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// The configured SNR.
    #[must_use]
    pub fn snr_db(&self) -> f32 {
        self.snr_db
    }

    /// Pass one frame of samples through the channel.
    pub fn apply(&mut self, samples: &[f32]) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }
        let power: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let sigma = (power / 10f32.powf(self.snr_db / 10.0)).sqrt();
        let Ok(noise) = Normal::new(0.0f32, sigma.max(f32::MIN_POSITIVE)) else {
            return samples.to_vec();
        };
        samples.iter().map(|&s| s + noise.sample(&mut self.rng)).collect()
    }
}

/// A flat fade: a stretch of samples crushed to zero.
pub fn fade(samples: &[f32], start: usize, len: usize) -> Vec<f32> {
    let mut out = samples.to_vec();
    let end = (start + len).min(out.len());
    let clamped_start = start.min(out.len());
    for sample in &mut out[clamped_start..end] {
        *sample = 0.0;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_scales_with_snr() {
        let tone: Vec<f32> =
            (0..4800).map(|n| (std::f32::consts::TAU * n as f32 / 32.0).sin()).collect();

        let error_power = |snr_db: f32| {
            let mut channel = AwgnChannel::new(snr_db, 5);
            let noisy = channel.apply(&tone);
            noisy.iter().zip(&tone).map(|(a, b)| (a - b).powi(2)).sum::<f32>() / tone.len() as f32
        };

        assert!(error_power(5.0) > error_power(20.0) * 10.0);
    }

    #[test]
    fn deterministic_per_seed() {
        let tone = vec![0.5f32; 256];
        let a = AwgnChannel::new(10.0, 7).apply(&tone);
        let b = AwgnChannel::new(10.0, 7).apply(&tone);
        assert_eq!(a, b);
    }

    #[test]
    fn fade_zeros_the_window() {
        let samples = vec![1.0f32; 100];
        let faded = fade(&samples, 10, 20);
        assert!(faded[10..30].iter().all(|&s| s == 0.0));
        assert!(faded[..10].iter().all(|&s| s == 1.0));
        assert!(faded[30..].iter().all(|&s| s == 1.0));
    }
}
