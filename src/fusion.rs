//! Single-timestamp, accuracy-weighted state estimator.
//!
//! `FusionCore` holds one `State` and advances it by dead reckoning whenever a new measurement
//! arrives, merging the measurement in with a reciprocal-accuracy weighted average.

use crate::geo;
use crate::sensor::{BasicMeasurement, Position};

#[derive(Clone, Copy, Debug)]
pub struct State {
    pub timestamp_s: f64,
    pub position: Position,
    pub heading: BasicMeasurement,
    pub speed: BasicMeasurement,
    pub angular_speed: BasicMeasurement,
}

impl State {
    pub fn new(timestamp_s: f64, position: Position, heading_deg: f64, heading_accuracy: f64) -> Self {
        Self {
            timestamp_s,
            position,
            heading: BasicMeasurement::new(heading_deg, heading_accuracy),
            speed: BasicMeasurement::invalid(),
            angular_speed: BasicMeasurement::invalid(),
        }
    }
}

/// Reciprocal-accuracy weighted scalar merge (Kalman's scalar form read with accuracies as
/// standard deviations). Returns the unmodified other input if one side is invalid.
pub fn merge_scalar(a: BasicMeasurement, b: BasicMeasurement) -> BasicMeasurement {
    if !a.is_valid() {
        return b;
    }
    if !b.is_valid() {
        return a;
    }
    let k = a.accuracy + b.accuracy;
    if geo::is_epsilon(k) {
        return a;
    }
    let value = (a.value * (k - a.accuracy) + b.value * (k - b.accuracy)) / k;
    let accuracy = (a.accuracy * (k - a.accuracy) + b.accuracy * (k - b.accuracy)) / k;
    BasicMeasurement::new(value, accuracy)
}

/// Merge two headings modulo 360, unwrapping across the antimeridian-like 0/360 seam before
/// applying the scalar merge.
pub fn merge_heading(a: BasicMeasurement, b: BasicMeasurement) -> BasicMeasurement {
    if !a.is_valid() {
        return BasicMeasurement::new(geo::normalise_deg(b.value), b.accuracy);
    }
    if !b.is_valid() {
        return BasicMeasurement::new(geo::normalise_deg(a.value), a.accuracy);
    }

    let mut a2 = a;
    let mut b2 = b;
    if a2.value - b2.value > 180.0 {
        b2.value += 360.0;
    } else if a2.value - b2.value < -180.0 {
        a2.value += 360.0;
    }

    let merged = merge_scalar(a2, b2);
    BasicMeasurement::new(geo::normalise_deg(merged.value), merged.accuracy)
}

/// Merge two longitudes (in degrees) that may straddle the antimeridian, using the same
/// seam-unwrapping rule as heading.
fn merge_longitude(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    let (mut a_val, a_acc) = a;
    let (mut b_val, b_acc) = b;
    if a_val - b_val > 180.0 {
        b_val += 360.0;
    } else if a_val - b_val < -180.0 {
        a_val += 360.0;
    }
    let merged = merge_scalar(
        BasicMeasurement::new(a_val, a_acc),
        BasicMeasurement::new(b_val, b_acc),
    );
    let wrapped = ((merged.value + 540.0) % 360.0) - 180.0;
    (wrapped, merged.accuracy)
}

pub fn merge_position(a: Position, b: Position) -> Position {
    if !a.is_valid() {
        return b;
    }
    if !b.is_valid() {
        return a;
    }

    let lat = merge_scalar(
        BasicMeasurement::new(a.latitude_deg, a.horizontal_accuracy_m),
        BasicMeasurement::new(b.latitude_deg, b.horizontal_accuracy_m),
    );
    let (lon_value, lon_acc) = merge_longitude(
        (a.longitude_deg, a.horizontal_accuracy_m),
        (b.longitude_deg, b.horizontal_accuracy_m),
    );

    Position {
        latitude_deg: lat.value,
        longitude_deg: lon_value,
        horizontal_accuracy_m: (lat.accuracy + lon_acc) / 2.0,
    }
}

pub struct FusionCore {
    state: State,
}

impl FusionCore {
    pub fn new(initial: State) -> Self {
        Self { state: initial }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Advance `self.state` to `target_ts`, in place, without merging any measurement.
    fn predict_to(&mut self, target_ts: f64) {
        let s = self.state;
        let dt = target_ts - s.timestamp_s;
        if dt <= 0.0 {
            return;
        }

        let heading = predict_heading(s.heading, s.angular_speed, dt);
        let position = predict_position(s.position, s.heading, s.speed, s.angular_speed, dt);
        let speed = inflate(s.speed, dt);
        let angular_speed = inflate(s.angular_speed, dt);

        self.state = State {
            timestamp_s: target_ts,
            position,
            heading,
            speed,
            angular_speed,
        };
    }

    pub fn add_position(&mut self, ts: f64, pos: Position) -> bool {
        if ts <= self.state.timestamp_s || !pos.is_valid() {
            return false;
        }
        let prev = self.state;
        let dt = ts - prev.timestamp_s;
        self.predict_to(ts);
        self.state.position = merge_position(self.state.position, pos);

        if prev.position.is_valid() && dt > 0.0 {
            let implied_speed = geo::to_distance_precise(&prev.position, &pos) / dt;
            let implied_accuracy = (prev.position.horizontal_accuracy_m + pos.horizontal_accuracy_m) / dt;
            let implied = BasicMeasurement::new(implied_speed, implied_accuracy);
            self.state.speed = merge_scalar(self.state.speed, implied);
        }
        true
    }

    pub fn add_heading(&mut self, ts: f64, heading: BasicMeasurement) -> bool {
        if ts <= self.state.timestamp_s || !heading.is_valid() {
            return false;
        }
        let prev = self.state;
        let dt = ts - prev.timestamp_s;
        self.predict_to(ts);
        self.state.heading = merge_heading(self.state.heading, heading);

        if prev.heading.is_valid() && dt > 0.0 {
            let implied_rate = geo::signed_angle(prev.heading.value, heading.value) / dt;
            let implied_accuracy = (prev.heading.accuracy + heading.accuracy) / dt;
            let implied = BasicMeasurement::new(implied_rate, implied_accuracy);
            self.state.angular_speed = merge_scalar(self.state.angular_speed, implied);
        }
        true
    }

    pub fn add_speed(&mut self, ts: f64, speed: BasicMeasurement) -> bool {
        if ts <= self.state.timestamp_s || !speed.is_valid() {
            return false;
        }
        self.predict_to(ts);
        self.state.speed = merge_scalar(self.state.speed, speed);
        true
    }

    pub fn add_angular_speed(&mut self, ts: f64, angular_speed: BasicMeasurement) -> bool {
        if ts <= self.state.timestamp_s || !angular_speed.is_valid() {
            return false;
        }
        self.predict_to(ts);
        self.state.angular_speed = merge_scalar(self.state.angular_speed, angular_speed);
        true
    }
}

fn inflate(m: BasicMeasurement, dt: f64) -> BasicMeasurement {
    if !m.is_valid() {
        return m;
    }
    BasicMeasurement::new(m.value, m.accuracy + dt.max(0.0))
}

fn predict_heading(heading: BasicMeasurement, angular_speed: BasicMeasurement, dt: f64) -> BasicMeasurement {
    if !heading.is_valid() {
        return heading;
    }
    if !angular_speed.is_valid() {
        return BasicMeasurement::new(heading.value, heading.accuracy + dt);
    }
    let value = geo::to_heading_from_rate(heading.value, dt, angular_speed.value);
    let accuracy = heading.accuracy + angular_speed.accuracy * dt;
    BasicMeasurement::new(value, accuracy)
}

fn predict_position(
    position: Position,
    heading: BasicMeasurement,
    speed: BasicMeasurement,
    angular_speed: BasicMeasurement,
    dt: f64,
) -> Position {
    if !position.is_valid() || !speed.is_valid() || !heading.is_valid() {
        return position;
    }

    let distance = speed.value * dt;
    let half_turn_deg = angular_speed.value * dt / 2.0;
    let (chord, chord_heading) = if angular_speed.is_valid()
        && half_turn_deg.abs() > geo::EPSILON
        && half_turn_deg.abs() < 90.0
    {
        let half_turn_rad = geo::to_radians(half_turn_deg.abs());
        let chord_len = distance * half_turn_rad.sin() / half_turn_rad;
        let chord_hdg = geo::to_heading_from_rate(heading.value, dt / 2.0, angular_speed.value);
        (chord_len, chord_hdg)
    } else {
        (distance, heading.value)
    };

    let predicted = geo::to_position(&position, chord, chord_heading);
    let heading_acc_rad = geo::to_radians(heading.accuracy + angular_speed.accuracy.max(0.0) * dt);
    let cos_term = heading_acc_rad.cos();
    let accuracy = if cos_term.abs() > 1e-6 {
        (position.horizontal_accuracy_m + speed.accuracy * dt) / cos_term
    } else {
        return Position {
            latitude_deg: predicted.latitude_deg,
            longitude_deg: predicted.longitude_deg,
            horizontal_accuracy_m: f64::NAN,
        };
    };

    Position {
        latitude_deg: predicted.latitude_deg,
        longitude_deg: predicted.longitude_deg,
        horizontal_accuracy_m: accuracy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pos(lat: f64, lon: f64, acc: f64) -> Position {
        Position {
            latitude_deg: lat,
            longitude_deg: lon,
            horizontal_accuracy_m: acc,
        }
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let mut core = FusionCore::new(State::new(10.0, pos(50.0, 10.0, 1.0), 90.0, 0.1));
        assert!(!core.add_position(9.0, pos(51.0, 11.0, 1.0)));
        assert_eq!(core.state().timestamp_s, 10.0);
    }

    #[test]
    fn heading_merge_across_seam() {
        let a = BasicMeasurement::new(355.0, 0.2);
        let b = BasicMeasurement::new(10.0, 0.1);
        let merged = merge_heading(a, b);
        assert_abs_diff_eq!(merged.value, 5.0, epsilon = 0.5);
    }

    #[test]
    fn position_merge_across_antimeridian() {
        let a = pos(1.0, 179.0, 5.0);
        let b = pos(1.0, -179.0, 5.0);
        let merged = merge_position(a, b);
        assert_abs_diff_eq!(merged.longitude_deg, -180.0, epsilon = 0.5);
    }

    #[test]
    fn gyro_circle_returns_near_start() {
        let start = pos(50.0, 10.0, 0.1);
        let mut core = FusionCore::new(State::new(0.0, start, 90.0, 0.1));
        core.add_speed(0.0001, BasicMeasurement::new(10.0, 0.1));
        core.add_angular_speed(0.0001, BasicMeasurement::new(18.0, 0.1));

        for t in 1..=20 {
            core.add_speed(t as f64, BasicMeasurement::new(10.0, 0.1));
            core.add_angular_speed(t as f64, BasicMeasurement::new(18.0, 0.1));
        }

        let final_state = core.state();
        assert_abs_diff_eq!(final_state.position.latitude_deg, start.latitude_deg, epsilon = 1e-3);
        assert_abs_diff_eq!(final_state.heading.value, 90.0, epsilon = 1.0);
    }

    #[test]
    fn scalar_merge_weights_smaller_accuracy_more() {
        let a = BasicMeasurement::new(0.0, 1.0);
        let b = BasicMeasurement::new(10.0, 9.0);
        let merged = merge_scalar(a, b);
        assert!(merged.value < 5.0); // a has smaller accuracy -> pulls the merge toward it
    }
}
