//! Cfg-string persistence format for an adjuster's calibration state.
//!
//! `CFGSENSOR,<type_id>,<scale 4 fields>,<bias 4 fields>,<reliable_limit>,XX`
//!
//! Scale/bias fields are the Normaliser's four accumulators in the order
//! `(acc_value, acc_mld, acc_reliable, sample_count)`, with fixed decimal precisions:
//! 8 decimals for the two accumulated values, 1 decimal for the accumulated reliability, 0
//! decimals for the sample count. `reliable_limit` carries 1 decimal.

use crate::normaliser::Normaliser;
use crate::sensor::TypeId;

const MARKER: &str = "CFGSENSOR";
const FIELD_COUNT: usize = 12;
pub const DEFAULT_RELIABLE_LIMIT: f64 = 99.5;

#[derive(Clone, Copy, Debug)]
pub struct AdjusterCfg {
    pub type_id: TypeId,
    pub scale: Normaliser,
    pub bias: Normaliser,
    pub reliable_limit: f64,
}

impl Default for AdjusterCfg {
    fn default() -> Self {
        Self {
            type_id: TypeId::Unknown,
            scale: Normaliser::new(),
            bias: Normaliser::new(),
            reliable_limit: DEFAULT_RELIABLE_LIMIT,
        }
    }
}

pub fn serialize(cfg: &AdjusterCfg) -> String {
    let scale = cfg.scale.state();
    let bias = cfg.bias.state();
    format!(
        "{marker},{type_id},{s_val:.8},{s_mld:.8},{s_rel:.1},{s_n:.0},{b_val:.8},{b_mld:.8},{b_rel:.1},{b_n:.0},{limit:.1},XX",
        marker = MARKER,
        type_id = cfg.type_id.as_u32(),
        s_val = scale.acc_value,
        s_mld = scale.acc_mld,
        s_rel = scale.acc_reliable,
        s_n = scale.sample_count as f64,
        b_val = bias.acc_value,
        b_mld = bias.acc_mld,
        b_rel = bias.acc_reliable,
        b_n = bias.sample_count as f64,
        limit = cfg.reliable_limit,
    )
}

/// Parses a single adjuster record. On any malformed input (wrong marker, wrong field count, or
/// an unparseable number) this falls back to a default-seeded adjuster rather than erroring.
pub fn parse(cfg_string: &str) -> AdjusterCfg {
    parse_checked(cfg_string).unwrap_or_else(|| {
        log::warn!("malformed cfg string, falling back to default adjuster: {cfg_string:?}");
        AdjusterCfg::default()
    })
}

fn parse_checked(cfg_string: &str) -> Option<AdjusterCfg> {
    let fields: Vec<&str> = cfg_string.trim().split(',').collect();
    if fields.len() != FIELD_COUNT || fields[0] != MARKER {
        return None;
    }

    let type_id = TypeId::from_u32(fields[1].parse().ok()?);
    let scale = Normaliser::from_accumulators(
        fields[2].parse().ok()?,
        fields[3].parse().ok()?,
        fields[4].parse().ok()?,
        fields[5].parse::<f64>().ok()? as u64,
    );
    let bias = Normaliser::from_accumulators(
        fields[6].parse().ok()?,
        fields[7].parse().ok()?,
        fields[8].parse().ok()?,
        fields[9].parse::<f64>().ok()? as u64,
    );
    let reliable_limit: f64 = fields[10].parse().ok()?;

    Some(AdjusterCfg {
        type_id,
        scale,
        bias,
        reliable_limit,
    })
}

/// Joins two adjuster records (gyro, odometer) with `;` — the full engine-level persisted cfg.
pub fn join(records: &[String]) -> String {
    records.join(";")
}

pub fn split(cfg: &str) -> Vec<&str> {
    cfg.split(';').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_default() {
        let cfg = AdjusterCfg::default();
        let serialized = serialize(&cfg);
        let parsed = parse(&serialized);
        assert_eq!(parsed.type_id.as_u32(), cfg.type_id.as_u32());
        assert_eq!(parsed.reliable_limit, cfg.reliable_limit);
    }

    #[test]
    fn round_trips_after_samples() {
        let mut cfg = AdjusterCfg {
            type_id: TypeId::GyroZ,
            ..AdjusterCfg::default()
        };
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            cfg.bias.add_sample(v);
        }
        let serialized = serialize(&cfg);
        let parsed = parse(&serialized);
        assert!((parsed.bias.mean() - cfg.bias.mean()).abs() < 1e-7);
        assert!((parsed.bias.reliable_pct() - cfg.bias.reliable_pct()).abs() < 0.1);
    }

    #[test]
    fn malformed_input_falls_back_to_default() {
        let parsed = parse("not,a,valid,cfg,string");
        assert_eq!(parsed.type_id.as_u32(), TypeId::Unknown.as_u32());
        assert_eq!(parsed.reliable_limit, DEFAULT_RELIABLE_LIMIT);
    }

    #[test]
    fn wrong_marker_falls_back_to_default() {
        let fake = serialize(&AdjusterCfg::default()).replacen(MARKER, "WRONGMARKER", 1);
        let parsed = parse(&fake);
        assert_eq!(parsed.reliable_limit, DEFAULT_RELIABLE_LIMIT);
    }
}
