//! Drives an `Engine` over a recorded JSON Lines measurement trace and reports how well the
//! fused position tracks the GNSS fixes in the log.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;
use dead_reckoning_engine::{Engine, EngineConfig, Position};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a .jsonl[.gz] trace of `Reading` records
    #[arg(long)]
    log: PathBuf,

    /// Position-speed filter gate, in meters/second
    #[arg(long, default_value = "0.5")]
    position_speed_limit: f64,

    /// Calibration confidence (0-100) a sensor adjuster must reach before its output is fused
    #[arg(long, default_value = "99.5")]
    calibration_threshold: f64,

    /// Persisted cfg string from a previous run, round-tripped through --dump-cfg
    #[arg(long, default_value = "")]
    cfg: String,
}

#[derive(Deserialize)]
struct Gps {
    timestamp: f64,
    latitude: f64,
    longitude: f64,
    accuracy: f64,
}

#[derive(Deserialize)]
struct Heading {
    timestamp: f64,
    degrees: f64,
    accuracy: f64,
}

#[derive(Deserialize)]
struct Speed {
    timestamp: f64,
    meters_per_second: f64,
    accuracy: f64,
}

#[derive(Deserialize)]
struct Gyro {
    timestamp: f64,
    raw: f64,
}

#[derive(Deserialize)]
struct Odometer {
    timestamp: f64,
    ticks: f64,
}

#[derive(Deserialize)]
struct Reading {
    gps: Option<Gps>,
    heading: Option<Heading>,
    speed: Option<Speed>,
    gyro: Option<Gyro>,
    odometer: Option<Odometer>,
}

fn open_reader(path: &PathBuf) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn load_log(path: &PathBuf) -> anyhow::Result<Vec<Reading>> {
    let reader = open_reader(path)?;
    let mut readings = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        readings.push(serde_json::from_str(&line)?);
    }
    Ok(readings)
}

fn rmse_pairs(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::INFINITY;
    }
    let sum_sq: f64 = pairs.iter().map(|(a, b)| (a - b).powi(2)).sum();
    (sum_sq / pairs.len() as f64).sqrt()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let readings = load_log(&args.log)?;

    let first_gps = readings
        .iter()
        .find_map(|r| r.gps.as_ref())
        .ok_or_else(|| anyhow::anyhow!("log has no gps readings to seed an initial position"))?;
    let first_heading = readings
        .iter()
        .find_map(|r| r.heading.as_ref())
        .map(|h| h.degrees)
        .unwrap_or(0.0);

    let mut engine = Engine::start(
        Position {
            latitude_deg: first_gps.latitude,
            longitude_deg: first_gps.longitude,
            horizontal_accuracy_m: first_gps.accuracy,
        },
        first_heading,
        &args.cfg,
        EngineConfig {
            calibration_threshold: args.calibration_threshold,
            position_filter_speed_limit_m_s: args.position_speed_limit,
        },
    );

    let mut lat_pairs = Vec::new();
    let mut lon_pairs = Vec::new();

    for r in &readings {
        if let Some(h) = &r.heading {
            engine.send_heading(h.timestamp, h.degrees, h.accuracy);
        }
        if let Some(s) = &r.speed {
            engine.send_speed(s.timestamp, s.meters_per_second, s.accuracy);
        }
        if let Some(g) = &r.gyro {
            engine.send_gyro(g.timestamp, g.raw);
        }
        if let Some(o) = &r.odometer {
            engine.send_odo(o.timestamp, o.ticks);
        }
        if let Some(gps) = &r.gps {
            let accepted = engine.send_coordinates(
                gps.timestamp,
                Position {
                    latitude_deg: gps.latitude,
                    longitude_deg: gps.longitude,
                    horizontal_accuracy_m: gps.accuracy,
                },
            );
            if accepted {
                if let Some(state) = engine.receive_position() {
                    lat_pairs.push((state.position.latitude_deg, gps.latitude));
                    lon_pairs.push((state.position.longitude_deg, gps.longitude));
                }
            }
        }
    }

    let cfg_string = engine.stop();
    let gyro_status = engine.receive_gyro_status();
    let odo_status = engine.receive_odo_status();
    let (distance_m, distance_acc_m) = engine.receive_distance();

    let out = json!({
        "log": args.log.display().to_string(),
        "readings": readings.len(),
        "lat_rmse_deg": rmse_pairs(&lat_pairs),
        "lon_rmse_deg": rmse_pairs(&lon_pairs),
        "gyro_calibration_pct": gyro_status.reliable_pct,
        "odo_calibration_pct": odo_status.reliable_pct,
        "distance_m": distance_m,
        "distance_accuracy_m": distance_acc_m,
        "cfg": cfg_string,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);

    Ok(())
}
