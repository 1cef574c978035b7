use std::{collections::BTreeMap, fmt, str::FromStr};

use super::period::{Month, Period};

/// Zone value used when a sheet row carries no zone.
pub const UNKNOWN_ZONE: &str = "Unknown";

/// Position of a meter in the supply hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeterLevel {
    /// Main bulk supply meter.
    L1,
    /// Zone bulk meter fed by L1.
    L2,
    /// Individual consumption meter (villa, apartment, common area).
    L3,
    /// Direct connection, fed from L1 or from a zone bulk meter.
    DC,
    /// Level cell was blank or unrecognised. Such meters contribute to no sum.
    Unclassified,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognised meter level '{0}'")]
pub struct MeterLevelParseError(pub String);

impl FromStr for MeterLevel {
    type Err = MeterLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L1" => Ok(MeterLevel::L1),
            "L2" => Ok(MeterLevel::L2),
            "L3" => Ok(MeterLevel::L3),
            "DC" => Ok(MeterLevel::DC),
            _ => Err(MeterLevelParseError(s.trim().to_string())),
        }
    }
}

impl fmt::Display for MeterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeterLevel::L1 => "L1",
            MeterLevel::L2 => "L2",
            MeterLevel::L3 => "L3",
            MeterLevel::DC => "DC",
            MeterLevel::Unclassified => "Unclassified",
        };
        f.write_str(s)
    }
}

/// One physical or logical meter for one reporting year.
///
/// `readings` only holds months whose column was present in the source row.
/// A column that was present but empty or malformed is stored as 0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterRecord {
    pub name: String,
    pub account_number: String,
    pub level: MeterLevel,
    pub zone: String,
    pub meter_type: String,
    pub parent: Option<String>,
    pub year: i32,
    pub readings: BTreeMap<Month, f64>,
}

impl MeterRecord {
    /// Volume at `period`, 0 when the period is outside this record's year or absent.
    pub fn reading(&self, period: Period) -> f64 {
        if period.year != self.year {
            return 0.0;
        }
        self.readings.get(&period.month).copied().unwrap_or(0.0)
    }

    pub fn has_reading(&self, period: Period) -> bool {
        period.year == self.year && self.readings.contains_key(&period.month)
    }

    pub fn is(&self, level: MeterLevel) -> bool {
        self.level == level
    }

    /// `true` for L3 and DC meters, the terminal consumption points.
    pub fn is_consumer(&self) -> bool {
        matches!(self.level, MeterLevel::L3 | MeterLevel::DC)
    }

    /// `true` when the zone takes part in zone-level aggregation.
    pub fn has_reportable_zone(&self) -> bool {
        is_reportable_zone(&self.zone)
    }
}

/// Zones excluded from zone-level aggregation: empty, `Unknown`, and any
/// spelling of `Direct Connection`.
pub fn is_reportable_zone(zone: &str) -> bool {
    let zone = zone.trim();
    !zone.is_empty()
        && zone != UNKNOWN_ZONE
        && !zone.to_ascii_lowercase().contains("direct connection")
}
