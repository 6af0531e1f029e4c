//! Great-circle math on a spherical Earth model.
//!
//! Every function here is pure and stateless; the fusion core and sensor adjusters call into
//! this module rather than duplicating trigonometry.

use crate::sensor::Position;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const PI: f64 = std::f64::consts::PI;
pub const EPSILON: f64 = 0.0000000001;

/// True for values within `EPSILON` of zero; guards determinant-style divisions.
pub fn is_epsilon(value: f64) -> bool {
    value.abs() < EPSILON
}

pub fn to_radians(deg: f64) -> f64 {
    deg * PI / 180.0
}

pub fn to_degrees(rad: f64) -> f64 {
    rad * 180.0 / PI
}

/// Normalise an angle in degrees into `[0, 360)`.
pub fn normalise_deg(deg: f64) -> f64 {
    let wrapped = deg % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Fast equirectangular approximation, accurate to ~1m over short (<=10km) legs.
pub fn to_distance(a: &Position, b: &Position) -> f64 {
    let lat1 = to_radians(a.latitude_deg);
    let lat2 = to_radians(b.latitude_deg);
    let x = to_radians(b.longitude_deg - a.longitude_deg) * ((lat1 + lat2) / 2.0).cos();
    let y = lat2 - lat1;
    EARTH_RADIUS_M * (x * x + y * y).sqrt()
}

/// Haversine great-circle distance, accurate over long legs.
pub fn to_distance_precise(a: &Position, b: &Position) -> f64 {
    let lat1 = to_radians(a.latitude_deg);
    let lat2 = to_radians(b.latitude_deg);
    let dlat = lat2 - lat1;
    let dlon = to_radians(b.longitude_deg - a.longitude_deg);

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// True-north bearing from `a` to `b`, degrees in `[0, 360)`.
pub fn to_heading(a: &Position, b: &Position) -> f64 {
    let lat1 = to_radians(a.latitude_deg);
    let lat2 = to_radians(b.latitude_deg);
    let dlon = to_radians(b.longitude_deg - a.longitude_deg);

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    normalise_deg(to_degrees(y.atan2(x)))
}

/// Heading after turning at angular rate `omega_deg_s` (positive = left turn) for `dt` seconds.
pub fn to_heading_from_rate(start_deg: f64, dt: f64, omega_deg_s: f64) -> f64 {
    normalise_deg(start_deg - omega_deg_s * dt)
}

/// Shortest signed angle `b - a`, in `(-180, 180]`, positive meaning a left (counter-clockwise)
/// turn from `a` to `b`.
pub fn signed_angle(a_deg: f64, b_deg: f64) -> f64 {
    let mut diff = (b_deg - a_deg) % 360.0;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff <= -180.0 {
        diff += 360.0;
    }
    diff
}

/// Destination point given a start, a great-circle distance in meters, and a true-north bearing.
/// Returns `start` unchanged when `distance_m == 0` to avoid needless trigonometric drift.
pub fn to_position(start: &Position, distance_m: f64, heading_deg: f64) -> Position {
    if distance_m == 0.0 {
        return start.clone();
    }

    let ang_dist = distance_m / EARTH_RADIUS_M;
    let bearing = to_radians(heading_deg);
    let lat1 = to_radians(start.latitude_deg);
    let lon1 = to_radians(start.longitude_deg);

    let lat2 = (lat1.sin() * ang_dist.cos() + lat1.cos() * ang_dist.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * ang_dist.sin() * lat1.cos())
            .atan2(ang_dist.cos() - lat1.sin() * lat2.sin());

    let lon2_deg = to_degrees(lon2);
    let lon_wrapped = ((lon2_deg + 540.0) % 360.0) - 180.0;

    Position {
        latitude_deg: to_degrees(lat2),
        longitude_deg: lon_wrapped,
        horizontal_accuracy_m: start.horizontal_accuracy_m,
    }
}

/// Rotate a 2D vector by `theta_deg` (counter-clockwise, standard math convention).
pub fn transform_2d(x: f64, y: f64, theta_deg: f64) -> (f64, f64) {
    let theta = to_radians(theta_deg);
    let (s, c) = theta.sin_cos();
    (x * c - y * s, x * s + y * c)
}

/// Sequential XY, YZ, ZX rotation by the three given angles (degrees). Included for
/// completeness; the fusion core itself only ever rotates in the horizontal plane.
pub fn transform_3d(
    x: f64,
    y: f64,
    z: f64,
    theta_xy_deg: f64,
    theta_yz_deg: f64,
    theta_zx_deg: f64,
) -> (f64, f64, f64) {
    let (x1, y1) = transform_2d(x, y, theta_xy_deg);
    let (y2, z1) = transform_2d(y1, z, theta_yz_deg);
    let (z2, x2) = transform_2d(z1, x1, theta_zx_deg);
    (x2, y2, z2)
}
