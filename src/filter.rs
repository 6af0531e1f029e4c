//! Position-speed filter: rejects GNSS jitter below a minimum implied speed before a position
//! reaches the fusion core.

use crate::geo;
use crate::sensor::Position;

pub struct PositionFilter {
    speed_limit_m_s: f64,
    last: Option<(f64, Position)>,
}

impl PositionFilter {
    pub fn new(speed_limit_m_s: f64) -> Self {
        Self {
            speed_limit_m_s,
            last: None,
        }
    }

    /// Returns `Some(position)` when the position should be forwarded to the fusion core.
    ///
    /// Note: on a rejected position, the filter's internal timestamp is still advanced to `ts`
    /// (only the stored position is left unchanged). This mirrors a quirk in the reference
    /// implementation rather than fixing it — see DESIGN.md.
    pub fn add_position(&mut self, ts: f64, pos: Position) -> Option<Position> {
        if !pos.is_valid() || ts <= 0.0 {
            return None;
        }

        let Some((last_ts, last_pos)) = self.last else {
            self.last = Some((ts, pos));
            return Some(pos);
        };

        if ts <= last_ts {
            return None;
        }

        let dt = ts - last_ts;
        let implied_speed = geo::to_distance(&last_pos, &pos) / dt;

        if implied_speed > self.speed_limit_m_s {
            self.last = Some((ts, pos));
            Some(pos)
        } else {
            self.last = Some((ts, last_pos));
            None
        }
    }
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
    fn first_position_always_accepted() {
        let mut filter = PositionFilter::new(1.0);
        assert!(filter.add_position(1.0, pos(50.0, 10.0)).is_some());
    }

    #[test]
    fn rejects_but_advances_timestamp() {
        let mut filter = PositionFilter::new(50.0);
        filter.add_position(1.0, pos(50.0, 10.0));

        // A tiny move over 1 second implies a speed far below the limit; rejected, but the
        // internal timestamp still advances to 2.0.
        let rejected = filter.add_position(2.0, pos(50.00001, 10.0));
        assert!(rejected.is_none());

        // ~40m move. Against the advanced timestamp (dt=0.5s) that's 80 m/s - over the limit,
        // so it is accepted; against the true 1.5s gap since the last *accepted* position it
        // would be ~27 m/s and would have been rejected. The quirk is load-bearing here.
        let accepted = filter.add_position(2.5, pos(50.000_359, 10.0));
        assert!(accepted.is_some());
    }

    #[test]
    fn fast_motion_is_accepted() {
        let mut filter = PositionFilter::new(1.0);
        filter.add_position(1.0, pos(50.0, 10.0));
        let accepted = filter.add_position(2.0, pos(50.001, 10.0));
        assert!(accepted.is_some());
    }
}
