//! SNR tracking and hysteretic modulation selection.
//!
//! The receiver measures SNR from symbol decision margins (error vector
//! magnitude against the sliced constellation point) and keeps an
//! exponential average. Selection picks the highest modulation whose
//! required SNR is cleared with margin; an upgrade needs the full
//! hysteresis margin while a downgrade happens as soon as the current
//! mode's requirement is lost, so a constant channel can never flap.

use crate::constellation::Modulation;

/// Default exponential-average weight for new SNR samples.
pub const DEFAULT_SNR_ALPHA: f32 = 0.25;

/// Default hysteresis margin in dB.
pub const DEFAULT_HYSTERESIS_DB: f32 = 1.0;

/// Adaptive modulation selector.
#[derive(Debug, Clone)]
pub struct AdaptiveSelector {
    current: Modulation,
    snr_db: Option<f32>,
    alpha: f32,
    hysteresis_db: f32,
}

impl Default for AdaptiveSelector {
    fn default() -> Self {
        Self::new(Modulation::Bpsk, DEFAULT_SNR_ALPHA, DEFAULT_HYSTERESIS_DB)
    }
}

impl AdaptiveSelector {
    /// Create a selector starting at `initial`.
    #[must_use]
    pub fn new(initial: Modulation, alpha: f32, hysteresis_db: f32) -> Self {
        Self { current: initial, snr_db: None, alpha, hysteresis_db }
    }

    /// Currently selected modulation.
    #[must_use]
    pub fn current(&self) -> Modulation {
        self.current
    }

    /// Smoothed SNR estimate in dB. `None` before the first observation.
    #[must_use]
    pub fn snr_db(&self) -> Option<f32> {
        self.snr_db
    }

    /// Force a modulation, e.g. from an operator override.
    pub fn set_modulation(&mut self, modulation: Modulation) {
        self.current = modulation;
    }

    /// Fold one SNR measurement into the exponential average without
    /// reselecting. Used when the operator has pinned the modulation.
    pub fn record(&mut self, snr_db: f32) -> f32 {
        let smoothed = match self.snr_db {
            None => snr_db,
            Some(prev) => prev + self.alpha * (snr_db - prev),
        };
        self.snr_db = Some(smoothed);
        smoothed
    }

    /// Fold in one SNR measurement and reselect. Returns the selection in
    /// force afterwards.
    pub fn observe(&mut self, snr_db: f32) -> Modulation {
        let smoothed = self.record(snr_db);

        if smoothed < self.current.required_snr_db() {
            // The channel no longer supports the current mode: drop to the
            // highest mode it does support, without margin.
            self.current = Self::preferred(smoothed);
        } else {
            // Upgrade only with the hysteresis margin cleared.
            for candidate in Modulation::ALL.into_iter().rev() {
                if candidate <= self.current {
                    break;
                }
                if smoothed >= candidate.required_snr_db() + self.hysteresis_db {
                    self.current = candidate;
                    break;
                }
            }
        }

        self.current
    }

    /// Highest modulation whose requirement `snr_db` meets, no margin.
    #[must_use]
    pub fn preferred(snr_db: f32) -> Modulation {
        let mut choice = Modulation::Bpsk;
        for candidate in Modulation::ALL {
            if snr_db >= candidate.required_snr_db() {
                choice = candidate;
            }
        }
        choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_match_selection_table() {
        assert_eq!(AdaptiveSelector::preferred(-5.0), Modulation::Bpsk);
        assert_eq!(AdaptiveSelector::preferred(2.9), Modulation::Bpsk);
        assert_eq!(AdaptiveSelector::preferred(3.0), Modulation::Qpsk);
        assert_eq!(AdaptiveSelector::preferred(7.9), Modulation::Qpsk);
        assert_eq!(AdaptiveSelector::preferred(8.0), Modulation::Psk8);
        assert_eq!(AdaptiveSelector::preferred(11.9), Modulation::Psk8);
        assert_eq!(AdaptiveSelector::preferred(12.0), Modulation::Qam16);
    }

    #[test]
    fn converges_and_holds_at_constant_snr() {
        let mut selector = AdaptiveSelector::default();
        let mut selections = Vec::new();
        for _ in 0..50 {
            selections.push(selector.observe(9.5));
        }
        // Converged to 8-PSK (9.5 >= 8 + 1) and never left it.
        assert_eq!(*selections.last().unwrap(), Modulation::Psk8);
        let settled: Vec<_> =
            selections.iter().skip(10).collect();
        assert!(settled.iter().all(|&&m| m == Modulation::Psk8));
    }

    #[test]
    fn upgrade_requires_margin() {
        let mut selector = AdaptiveSelector::default();
        // 8.5 dB clears 8-PSK's requirement but not the 1 dB margin.
        for _ in 0..50 {
            selector.observe(8.5);
        }
        assert_eq!(selector.current(), Modulation::Qpsk);
    }

    #[test]
    fn downgrade_needs_no_margin() {
        let mut selector = AdaptiveSelector::new(Modulation::Qam16, 1.0, 1.0);
        selector.observe(9.0);
        assert_eq!(selector.current(), Modulation::Psk8);
    }

    #[test]
    fn no_oscillation_near_threshold() {
        // Alternate just above and below an upgrade point: the selector
        // may upgrade once but must not toggle back and forth.
        let mut selector = AdaptiveSelector::new(Modulation::Qpsk, 0.5, 1.0);
        let mut changes = 0;
        let mut last = selector.current();
        for i in 0..100 {
            let snr = if i % 2 == 0 { 8.4 } else { 8.6 };
            let m = selector.observe(snr);
            if m != last {
                changes += 1;
                last = m;
            }
        }
        assert!(changes <= 1, "selector flapped {changes} times");
    }

    #[test]
    fn climbs_as_channel_improves() {
        let mut selector = AdaptiveSelector::new(Modulation::Bpsk, 1.0, 1.0);
        assert_eq!(selector.observe(2.0), Modulation::Bpsk);
        assert_eq!(selector.observe(5.0), Modulation::Qpsk);
        assert_eq!(selector.observe(10.0), Modulation::Psk8);
        assert_eq!(selector.observe(20.0), Modulation::Qam16);
    }
}
