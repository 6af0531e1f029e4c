//! Streaming mean / mean-linear-deviation estimator with a derived reliability score.
//!
//! Reconstructable from its four accumulators plus a sample count, which is the form persisted
//! in a cfg-string (see `config.rs`).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormaliserState {
    pub mean: f64,
    pub mld: f64,
    pub reliable_pct: f64,
    pub acc_value: f64,
    pub acc_mld: f64,
    pub acc_reliable: f64,
    pub sample_count: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Normaliser {
    state: NormaliserState,
}

impl Normaliser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstruct a normaliser from its four accumulators and sample count, re-deriving the
    /// cached `mean`/`mld`/`reliable_pct` outputs.
    pub fn from_accumulators(acc_value: f64, acc_mld: f64, acc_reliable: f64, n: u64) -> Self {
        let mut state = NormaliserState {
            acc_value,
            acc_mld,
            acc_reliable,
            sample_count: n,
            ..Default::default()
        };
        if n >= 1 {
            state.mean = acc_value / n as f64;
        }
        if n >= 2 {
            state.mld = acc_mld / n as f64;
            state.reliable_pct = (acc_reliable / n as f64).clamp(0.0, 100.0);
        }
        Self { state }
    }

    pub fn state(&self) -> NormaliserState {
        self.state
    }

    pub fn mean(&self) -> f64 {
        self.state.mean
    }

    pub fn mld(&self) -> f64 {
        self.state.mld
    }

    pub fn reliable_pct(&self) -> f64 {
        self.state.reliable_pct
    }

    pub fn sample_count(&self) -> u64 {
        self.state.sample_count
    }

    pub fn add_sample(&mut self, value: f64) {
        let n = self.state.sample_count;

        if n >= 1 {
            let old_mean = self.state.acc_value / n as f64;
            let n_total = n + 1;
            let new_mean = (self.state.acc_value + value) / n_total as f64;
            self.state.acc_mld += (new_mean - value).abs();

            let mld = self.state.acc_mld / n_total as f64;
            let reliable_pct = if mld == 0.0 {
                100.0
            } else if (old_mean - new_mean).abs() > mld {
                0.0
            } else {
                (100.5 - (old_mean - new_mean).abs() / mld * 100.0).clamp(0.0, 100.0)
            };
            self.state.acc_reliable += reliable_pct;
            self.state.mean = new_mean;
            self.state.mld = mld;
            self.state.reliable_pct = (self.state.acc_reliable / n_total as f64).clamp(0.0, 100.0);
        }

        self.state.acc_value += value;
        self.state.sample_count = n + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn converges_on_constant_stream() {
        let mut n = Normaliser::new();
        for _ in 0..10 {
            n.add_sample(10.0);
        }
        assert_abs_diff_eq!(n.mean(), 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(n.mld(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(n.reliable_pct(), 90.0, epsilon = 1e-9);

        for _ in 10..200 {
            n.add_sample(10.0);
        }
        assert_abs_diff_eq!(n.reliable_pct(), 99.5, epsilon = 0.01);
    }

    #[test]
    fn reliable_pct_after_two_samples_is_fifty() {
        let mut n = Normaliser::new();
        n.add_sample(10.0);
        n.add_sample(10.0);
        assert_abs_diff_eq!(n.reliable_pct(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn seeded_reconstruction_matches_continuous_replay() {
        let mut reference = Normaliser::new();
        let history = [1.0, 2.0, 3.0];
        let rest = [4.0, 5.0, 6.0];
        for v in history.iter().chain(rest.iter()) {
            reference.add_sample(*v);
        }

        let mut warmed = Normaliser::new();
        for v in history.iter() {
            warmed.add_sample(*v);
        }
        let seeded_state = warmed.state();
        let mut seeded = Normaliser::from_accumulators(
            seeded_state.acc_value,
            seeded_state.acc_mld,
            seeded_state.acc_reliable,
            seeded_state.sample_count,
        );
        for v in rest.iter() {
            seeded.add_sample(*v);
        }

        assert_abs_diff_eq!(seeded.mean(), reference.mean(), epsilon = 1e-8);
        assert_abs_diff_eq!(seeded.mld(), reference.mld(), epsilon = 1e-8);
        assert_abs_diff_eq!(seeded.reliable_pct(), reference.reliable_pct(), epsilon = 1e-8);
    }

    #[test]
    fn single_sample_leaves_mld_zero_and_no_reliability() {
        let mut n = Normaliser::new();
        n.add_sample(5.0);
        assert_eq!(n.mean(), 0.0); // mean only publishes once a second sample arrives
        assert_eq!(n.sample_count(), 1);
    }
}
