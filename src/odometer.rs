//! Wheel-tick odometer self-calibrating adjuster.
//!
//! Reference-domain quantity: speed, taken directly from the absolute source. Raw-domain
//! quantity: tick rate, derived from consecutive tick counts with wraparound handling.

use crate::calibrator::Calibrator;
use crate::normaliser::Normaliser;
use crate::sensor::{
    is_accuracy_ok, is_in_range, is_interval_ok, predict_value, BasicMeasurement, SensorAdjuster,
};

pub const MAX_TICKS: f64 = 65_535.0;

pub struct OdometerConfig {
    pub ref_interval_s: f64,
    pub ref_hysteresis_s: f64,
    pub ref_min_mps: f64,
    pub ref_max_mps: f64,
    pub ref_accuracy_ratio: f64,
    pub raw_interval_s: f64,
    pub raw_hysteresis_s: f64,
    pub raw_min: f64,
    pub raw_max: f64,
}

impl Default for OdometerConfig {
    fn default() -> Self {
        Self {
            ref_interval_s: 1.0,
            ref_hysteresis_s: 0.3,
            ref_min_mps: 0.0,
            ref_max_mps: 60.0,
            ref_accuracy_ratio: 2.0,
            raw_interval_s: 0.1,
            raw_hysteresis_s: 0.05,
            raw_min: 0.0,
            raw_max: MAX_TICKS,
        }
    }
}

pub struct Odometer {
    cfg: OdometerConfig,
    calibrator: Calibrator,
    bias_norm: Normaliser,
    scale_norm: Normaliser,

    last_ref_ts: Option<f64>,
    pending_ref: Option<(f64, f64)>, // (ts, speed) awaiting a bracketing rate pair

    tick_prev: Option<(f64, f64)>, // (ts, ticks), for wraparound delta

    rate_prev: Option<(f64, f64)>, // (ts, tick rate)
    rate_curr: Option<(f64, f64)>,

    out_ts: f64,
    out: BasicMeasurement,
}

impl Odometer {
    pub fn new(cfg: OdometerConfig) -> Self {
        Self {
            cfg,
            calibrator: Calibrator::new(),
            bias_norm: Normaliser::new(),
            scale_norm: Normaliser::new(),
            last_ref_ts: None,
            pending_ref: None,
            tick_prev: None,
            rate_prev: None,
            rate_curr: None,
            out_ts: 0.0,
            out: BasicMeasurement::invalid(),
        }
    }

    /// Builds an odometer seeded with previously-persisted scale/bias normalisers (see
    /// `config.rs`) instead of starting calibration from scratch.
    pub fn from_seed(cfg: OdometerConfig, scale_norm: Normaliser, bias_norm: Normaliser) -> Self {
        Self {
            scale_norm,
            bias_norm,
            ..Self::new(cfg)
        }
    }

    /// Returns `(scale, bias)` normalisers for persistence.
    pub fn normalisers(&self) -> (Normaliser, Normaliser) {
        (self.scale_norm, self.bias_norm)
    }

    /// `(bias, scale, reliable_pct, accuracy)` for status queries.
    pub fn calibration_summary(&self) -> (f64, f64, f64, f64) {
        (
            self.bias_norm.mean(),
            self.scale_norm.mean(),
            self.bias_norm.reliable_pct(),
            self.out.accuracy,
        )
    }

    /// Checks whether the pending reference speed falls inside the tick-rate bracket that was
    /// just extended by a new raw arrival, and if so feeds the matched pair to the calibrator.
    fn try_pair(&mut self) {
        let Some((ref_ts, ref_speed)) = self.pending_ref else {
            return;
        };
        let (t_l, v_l) = match self.rate_prev {
            Some(p) => p,
            None => return,
        };
        let (t_r, v_r) = match self.rate_curr {
            Some(p) => p,
            None => return,
        };
        if !(t_l..=t_r).contains(&ref_ts) {
            return;
        }

        let raw_at_ref = predict_value(ref_ts, t_l, v_l, t_r, v_r);
        self.calibrator.add_ref(ref_speed);
        self.calibrator.add_raw(raw_at_ref);
        self.calibrator.recalculate();

        let bias = self.calibrator.bias();
        let scale = self.calibrator.scale();
        if bias.is_finite() {
            self.bias_norm.add_sample(bias);
        }
        if scale.is_finite() {
            self.scale_norm.add_sample(scale);
        }
        self.refresh_output(ref_ts, v_r);
        self.pending_ref = None;
    }

    fn refresh_output(&mut self, ts: f64, ticks_per_second: f64) {
        let scale_mean = self.scale_norm.mean();
        let bias_mean = self.bias_norm.mean();
        let value = scale_mean * (ticks_per_second - bias_mean);
        let accuracy = self.bias_norm.mld() * (scale_mean.abs() + self.scale_norm.mld());
        self.out_ts = ts;
        self.out = if accuracy > 0.0 && accuracy.is_finite() {
            BasicMeasurement::new(value, accuracy)
        } else {
            BasicMeasurement::invalid()
        };
    }
}

impl SensorAdjuster for Odometer {
    fn add_ref(&mut self, ts: f64, speed_mps: f64, accuracy: f64) -> bool {
        if !is_in_range(speed_mps, self.cfg.ref_min_mps, self.cfg.ref_max_mps) {
            self.last_ref_ts = None;
            self.pending_ref = None;
            return false;
        }

        if let Some(prev_ts) = self.last_ref_ts {
            let dt = ts - prev_ts;
            if !is_interval_ok(dt, self.cfg.ref_interval_s, self.cfg.ref_hysteresis_s) {
                self.last_ref_ts = Some(ts);
                self.pending_ref = None;
                self.calibrator.clean_last_step();
                return false;
            }
        }
        self.last_ref_ts = Some(ts);

        if !is_accuracy_ok(speed_mps, accuracy, self.cfg.ref_accuracy_ratio) {
            return true;
        }

        // The bracketing raw sample hasn't arrived yet in realistic streaming order; stash this
        // reference and let the next add_raw() pair it once its bracket covers ref_ts.
        self.pending_ref = Some((ts, speed_mps));
        true
    }

    fn add_raw(&mut self, ts: f64, ticks: f64, valid: bool) -> bool {
        if !valid || !is_in_range(ticks, self.cfg.raw_min, self.cfg.raw_max) {
            self.tick_prev = None;
            self.rate_prev = None;
            self.rate_curr = None;
            return false;
        }

        let Some((prev_ts, prev_ticks)) = self.tick_prev else {
            self.tick_prev = Some((ts, ticks));
            return true;
        };

        let dt = ts - prev_ts;
        if !is_interval_ok(dt, self.cfg.raw_interval_s, self.cfg.raw_hysteresis_s) {
            self.tick_prev = Some((ts, ticks));
            self.rate_prev = None;
            self.rate_curr = None;
            self.calibrator.clean_last_step();
            return false;
        }

        let tick_delta = if ticks < prev_ticks {
            ticks + MAX_TICKS + 1.0 - prev_ticks
        } else {
            ticks - prev_ticks
        };
        let rate = tick_delta / dt;

        self.tick_prev = Some((ts, ticks));
        self.rate_prev = self.rate_curr;
        self.rate_curr = Some((ts, rate));
        self.try_pair();
        true
    }

    fn get_sensor(&self) -> (f64, BasicMeasurement) {
        (self.out_ts, self.out)
    }

    fn calibrated_to(&self) -> f64 {
        self.bias_norm.reliable_pct()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_wraparound_produces_positive_rate() {
        let mut odo = Odometer::new(OdometerConfig::default());
        odo.add_raw(0.0, MAX_TICKS - 5.0, true);
        let accepted = odo.add_raw(0.1, 4.0, true);
        assert!(accepted);
    }

    #[test]
    fn rejects_negative_speed_reference() {
        let mut odo = Odometer::new(OdometerConfig::default());
        assert!(!odo.add_ref(0.0, -1.0, 0.1));
    }

    #[test]
    fn raw_gate_resets_on_bad_interval() {
        let mut odo = Odometer::new(OdometerConfig::default());
        assert!(odo.add_raw(0.0, 10.0, true));
        // Way outside interval+hysteresis (default raw_interval=0.1s).
        assert!(!odo.add_raw(5.0, 20.0, true));
    }

    /// Feeds one second of tick raw samples at `speed` m/s, then the bracketing ref speed sample
    /// that closes the window, mirroring the raw-arrival-triggered pairing flow. Returns the
    /// cumulative tick count reached at the end of the epoch.
    fn feed_epoch(odo: &mut Odometer, t_start: f64, ticks_start: f64, speed: f64) -> f64 {
        let mut t = t_start;
        let mut ticks = ticks_start;
        for _ in 0..9 {
            t += 0.1;
            ticks += speed * 0.1;
            odo.add_raw(t, ticks, true);
        }
        let t_end = t_start + 1.0;
        odo.add_ref(t_end, speed, 0.1);
        ticks += speed * 0.1;
        odo.add_raw(t_end, ticks, true);
        ticks
    }

    #[test]
    fn distinct_constant_speed_epochs_calibrate_identity() {
        // tick rate == real speed (scale=1, bias=0) across epochs of different constant speeds:
        // two successive windows each solve bias=0/scale=1 exactly, and a normaliser reports 50%
        // reliability on its second identical sample (see normaliser.rs's own tests).
        let mut odo = Odometer::new(OdometerConfig::default());
        odo.add_raw(0.0, 0.0, true);

        let ticks = feed_epoch(&mut odo, 0.0, 0.0, 5.0);
        let ticks = feed_epoch(&mut odo, 1.0, ticks, 10.0);
        feed_epoch(&mut odo, 2.0, ticks, 15.0);

        let (bias, scale, reliable_pct, _accuracy) = odo.calibration_summary();
        assert!(bias.abs() < 1e-6, "bias={bias}");
        assert!((scale - 1.0).abs() < 1e-6, "scale={scale}");
        assert!((reliable_pct - 50.0).abs() < 1e-6, "reliable_pct={reliable_pct}");
        assert!((odo.calibrated_to() - 50.0).abs() < 1e-6);
    }
}
