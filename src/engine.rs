//! Owns one instance of each component and routes measurements between them.
//!
//! One `Engine` per host-owned handle; there is no process-wide registry (see DESIGN.md for why
//! that departs from the reference implementation).

use crate::config::{self, AdjusterCfg};
use crate::filter::PositionFilter;
use crate::fusion::{FusionCore, State};
use crate::geo;
use crate::gyro::{GyroConfig, Gyroscope};
use crate::odometer::{Odometer, OdometerConfig};
use crate::sensor::{BasicMeasurement, Position, SensorAdjuster, TypeId};

pub struct EngineConfig {
    pub calibration_threshold: f64,
    pub position_filter_speed_limit_m_s: f64,
}

/// Snapshot of a sensor adjuster's calibration, as reported by `receive_gyro_status` /
/// `receive_odo_status`.
#[derive(Clone, Copy, Debug)]
pub struct AdjusterStatus {
    pub bias: f64,
    pub scale: f64,
    pub reliable_pct: f64,
    pub accuracy: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calibration_threshold: config::DEFAULT_RELIABLE_LIMIT,
            position_filter_speed_limit_m_s: 0.5,
        }
    }
}

pub struct Engine {
    cfg: EngineConfig,
    fusion: FusionCore,
    gyro: Gyroscope,
    odo: Odometer,
    position_filter: PositionFilter,
    last_merged_position: Option<Position>,
    total_distance_m: f64,
}

impl Engine {
    /// Starts a new engine instance seeded from an initial position/heading and an optional
    /// persisted cfg string (`<gyro-record>;<odo-record>`). A malformed or absent cfg string
    /// falls back to default-seeded adjusters.
    pub fn start(
        initial_position: Position,
        initial_heading_deg: f64,
        cfg_string: &str,
        engine_cfg: EngineConfig,
    ) -> Self {
        let records = config::split(cfg_string);
        let gyro_cfg = records.first().map(|r| config::parse(r)).unwrap_or_default();
        let odo_cfg = records.get(1).map(|r| config::parse(r)).unwrap_or_default();

        log::debug!(
            "engine starting: gyro type={} odo type={}",
            gyro_cfg.type_id.as_u32(),
            odo_cfg.type_id.as_u32()
        );

        Self {
            fusion: FusionCore::new(State::new(0.0, initial_position, initial_heading_deg, 1.0)),
            gyro: seeded_gyro(gyro_cfg),
            odo: seeded_odometer(odo_cfg),
            position_filter: PositionFilter::new(engine_cfg.position_filter_speed_limit_m_s),
            last_merged_position: None,
            total_distance_m: 0.0,
            cfg: engine_cfg,
        }
    }

    /// Serializes both adjusters' calibration state back into a persistable cfg string.
    pub fn stop(&self) -> String {
        let (gyro_scale, gyro_bias) = self.gyro.normalisers();
        let (odo_scale, odo_bias) = self.odo.normalisers();

        let gyro_record = config::serialize(&AdjusterCfg {
            type_id: TypeId::GyroZ,
            scale: gyro_scale,
            bias: gyro_bias,
            reliable_limit: self.cfg.calibration_threshold,
        });
        let odo_record = config::serialize(&AdjusterCfg {
            type_id: TypeId::OdometerAxis,
            scale: odo_scale,
            bias: odo_bias,
            reliable_limit: self.cfg.calibration_threshold,
        });
        config::join(&[gyro_record, odo_record])
    }

    /// No-op placeholder kept for call-compatibility with the host contract: every `send_*`
    /// call already resolves fusion immediately, so there is nothing left to flush here.
    pub fn calculate(&self) {
        log::trace!("calculate() called; engine resolves fusion eagerly on every send_*");
    }

    pub fn send_coordinates(&mut self, ts: f64, position: Position) -> bool {
        match self.position_filter.add_position(ts, position) {
            Some(accepted) => {
                if !self.fusion.add_position(ts, accepted) {
                    return false;
                }
                if let Some(prev) = self.last_merged_position {
                    self.total_distance_m += geo::to_distance_precise(&prev, &accepted);
                }
                self.last_merged_position = Some(accepted);
                true
            }
            None => {
                log::debug!("position at ts={ts} rejected by position-speed filter");
                false
            }
        }
    }

    pub fn send_heading(&mut self, ts: f64, heading_deg: f64, accuracy_deg: f64) -> bool {
        let accepted_fusion = self
            .fusion
            .add_heading(ts, BasicMeasurement::new(heading_deg, accuracy_deg));
        self.gyro.add_ref(ts, heading_deg, accuracy_deg);
        self.route_gyro_output();
        accepted_fusion
    }

    pub fn send_speed(&mut self, ts: f64, speed_m_s: f64, accuracy_m_s: f64) -> bool {
        let accepted_fusion = self
            .fusion
            .add_speed(ts, BasicMeasurement::new(speed_m_s, accuracy_m_s));
        self.odo.add_ref(ts, speed_m_s, accuracy_m_s);
        self.route_odo_output();
        accepted_fusion
    }

    pub fn send_gyro(&mut self, ts: f64, raw: f64) -> bool {
        let accepted = self.gyro.add_raw(ts, raw, true);
        self.route_gyro_output();
        accepted
    }

    pub fn send_odo(&mut self, ts: f64, raw_ticks: f64) -> bool {
        let accepted = self.odo.add_raw(ts, raw_ticks, true);
        self.route_odo_output();
        accepted
    }

    fn route_gyro_output(&mut self) {
        if self.gyro.calibrated_to() < self.cfg.calibration_threshold {
            return;
        }
        let (ts, measurement) = self.gyro.get_sensor();
        if measurement.is_valid() {
            self.fusion.add_angular_speed(ts, measurement);
        }
    }

    fn route_odo_output(&mut self) {
        if self.odo.calibrated_to() < self.cfg.calibration_threshold {
            return;
        }
        let (ts, measurement) = self.odo.get_sensor();
        if measurement.is_valid() {
            self.fusion.add_speed(ts, measurement);
        }
    }

    pub fn receive_position(&self) -> Option<State> {
        let state = self.fusion.state();
        if state.position.is_valid() {
            Some(state)
        } else {
            None
        }
    }

    /// Cumulative distance merged into the fused position so far, in meters, paired with the
    /// current fused position's horizontal accuracy.
    pub fn receive_distance(&self) -> (f64, f64) {
        (self.total_distance_m, self.fusion.state().position.horizontal_accuracy_m)
    }

    pub fn receive_gyro_status(&self) -> AdjusterStatus {
        let (bias, scale, reliable_pct, accuracy) = self.gyro.calibration_summary();
        AdjusterStatus { bias, scale, reliable_pct, accuracy }
    }

    pub fn receive_odo_status(&self) -> AdjusterStatus {
        let (bias, scale, reliable_pct, accuracy) = self.odo.calibration_summary();
        AdjusterStatus { bias, scale, reliable_pct, accuracy }
    }
}

fn seeded_gyro(cfg: AdjusterCfg) -> Gyroscope {
    Gyroscope::from_seed(GyroConfig::default(), cfg.scale, cfg.bias)
}

fn seeded_odometer(cfg: AdjusterCfg) -> Odometer {
    Odometer::from_seed(OdometerConfig::default(), cfg.scale, cfg.bias)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lat: f64, lon: f64) -> Position {
        Position {
            latitude_deg: lat,
            longitude_deg: lon,
            horizontal_accuracy_m: 5.0,
        }
    }

    #[test]
    fn starts_with_no_cfg_and_reports_invalid_calibration() {
        let engine = Engine::start(pos(50.0, 10.0), 90.0, "", EngineConfig::default());
        assert_eq!(engine.receive_gyro_status().reliable_pct, 0.0);
    }

    #[test]
    fn stop_then_start_round_trips_calibration_state() {
        let mut engine = Engine::start(pos(50.0, 10.0), 90.0, "", EngineConfig::default());
        for i in 0..5 {
            let ts = i as f64;
            engine.send_heading(ts, 90.0 + i as f64, 0.1);
            engine.send_gyro(ts, 1.0);
        }
        let cfg_string = engine.stop();

        let restarted = Engine::start(pos(50.0, 10.0), 90.0, &cfg_string, EngineConfig::default());
        let pct_before = engine.receive_gyro_status().reliable_pct;
        let pct_after = restarted.receive_gyro_status().reliable_pct;
        assert!((pct_before - pct_after).abs() < 1.0);
    }

    #[test]
    fn position_behind_speed_filter_reaches_fusion_when_fast_enough() {
        let mut engine = Engine::start(pos(50.0, 10.0), 90.0, "", EngineConfig::default());
        assert!(engine.send_coordinates(1.0, pos(50.0, 10.0)));
        assert!(engine.send_coordinates(2.0, pos(50.01, 10.0)));
    }

    #[test]
    fn distance_accumulates_across_accepted_positions() {
        let mut engine = Engine::start(pos(50.0, 10.0), 90.0, "", EngineConfig::default());
        engine.send_coordinates(1.0, pos(50.0, 10.0));
        engine.send_coordinates(2.0, pos(50.01, 10.0));
        let (distance_m, _) = engine.receive_distance();
        assert!(distance_m > 1000.0); // ~0.01 deg of latitude is roughly 1.1 km
    }
}
