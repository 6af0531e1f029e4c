//! Gyroscope self-calibrating adjuster.
//!
//! Reference-domain quantity: angular velocity derived from two heading samples
//! (`signed_angle(prev, new) / dt`). Raw-domain quantity: the raw gyro reading, linearly
//! interpolated to the reference's timestamp.

use crate::calibrator::Calibrator;
use crate::geo::signed_angle;
use crate::normaliser::Normaliser;
use crate::sensor::{is_accuracy_ok, is_in_range, is_interval_ok, predict_value, BasicMeasurement, SensorAdjuster};

pub struct GyroConfig {
    pub ref_interval_s: f64,
    pub ref_hysteresis_s: f64,
    pub ref_min_deg: f64,
    pub ref_max_deg: f64,
    pub ref_accuracy_ratio: f64,
    pub raw_interval_s: f64,
    pub raw_hysteresis_s: f64,
    pub raw_min: f64,
    pub raw_max: f64,
}

impl Default for GyroConfig {
    fn default() -> Self {
        Self {
            ref_interval_s: 1.0,
            ref_hysteresis_s: 0.3,
            ref_min_deg: 0.0,
            ref_max_deg: 360.0,
            ref_accuracy_ratio: 2.0,
            raw_interval_s: 0.1,
            raw_hysteresis_s: 0.05,
            raw_min: -500.0,
            raw_max: 500.0,
        }
    }
}

pub struct Gyroscope {
    cfg: GyroConfig,
    calibrator: Calibrator,
    bias_norm: Normaliser,
    scale_norm: Normaliser,

    last_ref_ts: Option<f64>,
    last_ref_heading: f64,
    pending_ref: Option<(f64, f64)>, // (ts, rate) awaiting a bracketing raw pair

    raw_prev: Option<(f64, f64)>, // (ts, value)
    raw_curr: Option<(f64, f64)>,

    out_ts: f64,
    out: BasicMeasurement,
}

impl Gyroscope {
    pub fn new(cfg: GyroConfig) -> Self {
        Self {
            cfg,
            calibrator: Calibrator::new(),
            bias_norm: Normaliser::new(),
            scale_norm: Normaliser::new(),
            last_ref_ts: None,
            last_ref_heading: 0.0,
            pending_ref: None,
            raw_prev: None,
            raw_curr: None,
            out_ts: 0.0,
            out: BasicMeasurement::invalid(),
        }
    }

    /// Builds a gyroscope seeded with previously-persisted scale/bias normalisers (see
    /// `config.rs`) instead of starting calibration from scratch.
    pub fn from_seed(cfg: GyroConfig, scale_norm: Normaliser, bias_norm: Normaliser) -> Self {
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

    /// Checks whether the pending reference sample falls inside the raw bracket that was just
    /// extended by a new raw arrival, and if so feeds the matched pair to the calibrator.
    fn try_pair(&mut self) {
        let Some((ref_ts, ref_rate)) = self.pending_ref else {
            return;
        };
        let (t_l, v_l) = match self.raw_prev {
            Some(p) => p,
            None => return,
        };
        let (t_r, v_r) = match self.raw_curr {
            Some(p) => p,
            None => return,
        };
        if !(t_l..=t_r).contains(&ref_ts) {
            return;
        }

        let raw_at_ref = predict_value(ref_ts, t_l, v_l, t_r, v_r);
        self.calibrator.add_ref(ref_rate);
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

    fn refresh_output(&mut self, ts: f64, raw: f64) {
        let scale_mean = self.scale_norm.mean();
        let bias_mean = self.bias_norm.mean();
        let value = scale_mean * (raw - bias_mean);
        let accuracy = self.bias_norm.mld() * (scale_mean.abs() + self.scale_norm.mld());
        self.out_ts = ts;
        self.out = if accuracy > 0.0 && accuracy.is_finite() {
            BasicMeasurement::new(value, accuracy)
        } else {
            BasicMeasurement::invalid()
        };
    }
}

impl SensorAdjuster for Gyroscope {
    fn add_ref(&mut self, ts: f64, heading_deg: f64, accuracy: f64) -> bool {
        if !is_in_range(heading_deg, self.cfg.ref_min_deg, self.cfg.ref_max_deg) {
            self.last_ref_ts = None;
            self.pending_ref = None;
            return false;
        }

        let Some(prev_ts) = self.last_ref_ts else {
            self.last_ref_ts = Some(ts);
            self.last_ref_heading = heading_deg;
            return true;
        };

        let dt = ts - prev_ts;
        if !is_interval_ok(dt, self.cfg.ref_interval_s, self.cfg.ref_hysteresis_s) {
            self.last_ref_ts = Some(ts);
            self.last_ref_heading = heading_deg;
            self.pending_ref = None;
            self.calibrator.clean_last_step();
            return false;
        }

        let rate = signed_angle(self.last_ref_heading, heading_deg) / dt;
        self.last_ref_ts = Some(ts);
        self.last_ref_heading = heading_deg;

        if !is_accuracy_ok(rate, accuracy, self.cfg.ref_accuracy_ratio) {
            return true;
        }

        // The bracketing raw sample hasn't arrived yet in realistic streaming order; stash this
        // reference and let the next add_raw() pair it once its bracket covers ref_ts.
        self.pending_ref = Some((ts, rate));
        true
    }

    fn add_raw(&mut self, ts: f64, value: f64, valid: bool) -> bool {
        if !valid || !is_in_range(value, self.cfg.raw_min, self.cfg.raw_max) {
            self.raw_prev = None;
            self.raw_curr = None;
            return false;
        }

        if let Some((prev_ts, _)) = self.raw_curr {
            let dt = ts - prev_ts;
            if !is_interval_ok(dt, self.cfg.raw_interval_s, self.cfg.raw_hysteresis_s) {
                self.raw_prev = None;
                self.raw_curr = Some((ts, value));
                self.calibrator.clean_last_step();
                return false;
            }
        }

        self.raw_prev = self.raw_curr;
        self.raw_curr = Some((ts, value));
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
