//! Two-window closed-form solve of the affine sensor model `real = scale * (raw - bias)`.

use crate::geo::is_epsilon;

#[derive(Clone, Copy, Debug, Default)]
pub struct CalibratorState {
    sum_ref_prev: f64,
    sum_raw_prev: f64,
    count_prev: u64,
    sum_ref_now: f64,
    sum_raw_now: f64,
    count_now: u64,
    bias: f64,
    scale: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct Calibrator {
    state: CalibratorState,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            state: CalibratorState {
                bias: f64::NAN,
                scale: f64::NAN,
                ..Default::default()
            },
        }
    }

    pub fn bias(&self) -> f64 {
        self.state.bias
    }

    pub fn scale(&self) -> f64 {
        self.state.scale
    }

    pub fn add_ref(&mut self, r: f64) {
        self.state.sum_ref_now += r;
    }

    pub fn add_raw(&mut self, q: f64) {
        self.state.sum_raw_now += q;
        self.state.count_now += 1;
    }

    /// Revert the "now" window back to the last accepted "prev" snapshot, discarding whatever
    /// has accumulated since. Used when a later validation step rejects the current window.
    pub fn clean_last_step(&mut self) {
        self.state.sum_ref_now = self.state.sum_ref_prev;
        self.state.sum_raw_now = self.state.sum_raw_prev;
        self.state.count_now = self.state.count_prev;
    }

    /// Solve for `bias`/`scale` from the two windows. Leaves both at `NaN` if either
    /// determinant is singular.
    pub fn recalculate(&mut self) {
        if self.state.count_prev == 0 {
            self.promote_now_to_prev();
            return;
        }

        let n_prev = self.state.count_prev as f64;
        let n_now = self.state.count_now as f64;

        let d1 = n_prev * self.state.sum_ref_now - n_now * self.state.sum_ref_prev;
        if is_epsilon(d1) {
            self.state.bias = f64::NAN;
            self.state.scale = f64::NAN;
            return;
        }

        let bias = (self.state.sum_ref_now * self.state.sum_raw_prev
            - self.state.sum_raw_now * self.state.sum_ref_prev)
            / d1;

        let d2 = self.state.sum_raw_now - bias * n_now;
        if is_epsilon(d2) {
            self.state.bias = f64::NAN;
            self.state.scale = f64::NAN;
            return;
        }

        self.state.bias = bias;
        self.state.scale = self.state.sum_ref_now / d2;
        self.promote_now_to_prev();
    }

    fn promote_now_to_prev(&mut self) {
        self.state.sum_ref_prev = self.state.sum_ref_now;
        self.state.sum_raw_prev = self.state.sum_raw_now;
        self.state.count_prev = self.state.count_now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // raw = bias + ref/scale, i.e. ref = scale * (raw - bias)
    fn feed_window(cal: &mut Calibrator, bias: f64, scale: f64, refs: &[f64]) {
        for r in refs {
            cal.add_ref(*r);
            cal.add_raw(bias + r / scale);
        }
        cal.recalculate();
    }

    #[test]
    fn learns_bias_and_scale_from_two_windows() {
        let mut cal = Calibrator::new();
        feed_window(&mut cal, 11.0, 0.1, &[1.0]);
        assert!(cal.bias().is_nan()); // first window only seeds "prev"

        feed_window(&mut cal, 11.0, 0.1, &[2.0]);
        assert_abs_diff_eq!(cal.bias(), 11.0, epsilon = 1e-6);
        assert_abs_diff_eq!(cal.scale(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn clean_last_step_discards_rejected_window() {
        let mut cal = Calibrator::new();
        feed_window(&mut cal, 11.0, 0.1, &[1.0]);
        feed_window(&mut cal, 11.0, 0.1, &[2.0]);
        assert!(cal.bias().is_finite());

        // A disturbed window gets rejected by the caller and cleaned.
        cal.add_ref(3.0);
        cal.add_raw(999.0);
        cal.clean_last_step();
        cal.recalculate();
        // Recalculating against the cleaned (duplicate) window is a singular system: prev ==
        // now, so d1 == 0.
        assert!(cal.bias().is_nan());
    }

    #[test]
    fn singular_system_yields_nan() {
        let mut cal = Calibrator::new();
        // Two identical windows make d1 exactly zero.
        feed_window(&mut cal, 5.0, 0.2, &[1.0]);
        feed_window(&mut cal, 5.0, 0.2, &[1.0]);
        assert!(cal.bias().is_nan());
        assert!(cal.scale().is_nan());
    }
}
