//! Dead-reckoning position engine: fuses an intermittent absolute reference (coordinates,
//! heading, speed) with high-rate relative sensors (rate gyroscope, wheel-tick odometer) into a
//! continuously-updated position/heading/speed estimate, self-calibrating each relative sensor
//! against the absolute reference as it goes.

pub mod calibrator;
pub mod config;
pub mod engine;
pub mod filter;
pub mod fusion;
pub mod geo;
pub mod gyro;
pub mod normaliser;
pub mod odometer;
pub mod sensor;

pub use engine::{AdjusterStatus, Engine, EngineConfig};
pub use fusion::State;
pub use sensor::{BasicMeasurement, Position, SensorAdjuster, TypeId};
