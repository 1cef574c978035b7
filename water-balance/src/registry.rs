//! Meter registry: turns loosely shaped sheet/database rows into typed
//! [`MeterRecord`]s for one reporting year.
//!
//! Header matching ignores case, spacing and punctuation, so `Level `,
//! `Label`, `Acct #` and `acctNum` all resolve. Bad reading cells never fail
//! the load; they are logged, counted and stored as 0.

use std::collections::{BTreeMap, HashMap};

use water_client::domain::{
    MeterLevel, MeterRecord, Month, Period, PeriodParseError, RawCell, RawRow, UNKNOWN_ZONE,
};

const NAME_HEADERS: &[&str] = &["meterlabel", "metername", "meter"];
const ACCOUNT_HEADERS: &[&str] = &["acct", "acctnum", "accountnumber", "account"];
const LEVEL_HEADERS: &[&str] = &["label", "level"];
const ZONE_HEADERS: &[&str] = &["zone"];
const TYPE_HEADERS: &[&str] = &["type", "metertype"];
const PARENT_HEADERS: &[&str] = &["parentmeter", "parentmeterlabel", "parentlabel", "parent"];

const UNKNOWN: &str = "Unknown";

/// Counters collected while normalizing one batch of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct NormalizeStats {
    pub rows_seen: usize,
    pub rows_dropped: usize,
    pub malformed_readings: usize,
    pub unclassified_levels: usize,
}

/// Lowercase and keep only ASCII alphanumerics: `"Acct #"` -> `"acct"`.
pub fn canonical_header(header: &str) -> String {
    header
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Normalize raw rows for `year`, discarding the stats.
pub fn normalize(rows: &[RawRow], year: i32) -> Vec<MeterRecord> {
    normalize_with_stats(rows, year).0
}

pub fn normalize_with_stats(rows: &[RawRow], year: i32) -> (Vec<MeterRecord>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        stats.rows_seen += 1;
        match normalize_row(row, year, &mut stats) {
            Some(record) => records.push(record),
            None => stats.rows_dropped += 1,
        }
    }

    metrics::counter!("water_registry_rows_total").increment(stats.rows_seen as u64);
    metrics::counter!("water_registry_rows_dropped_total").increment(stats.rows_dropped as u64);
    metrics::counter!("water_registry_malformed_readings_total").increment(stats.malformed_readings as u64);

    tracing::info!(
        year,
        rows_seen = stats.rows_seen,
        meters = records.len(),
        rows_dropped = stats.rows_dropped,
        malformed_readings = stats.malformed_readings,
        "meter registry normalized"
    );

    (records, stats)
}

fn normalize_row(row: &RawRow, year: i32, stats: &mut NormalizeStats) -> Option<MeterRecord> {
    let cells: HashMap<String, &RawCell> = row
        .iter()
        .map(|(header, cell)| (canonical_header(header), cell))
        .collect();

    let text = |aliases: &[&str]| -> Option<String> {
        aliases
            .iter()
            .find_map(|alias| cells.get(*alias).and_then(|cell| cell.as_text()))
    };

    let Some(name) = text(NAME_HEADERS).filter(|n| n != UNKNOWN) else {
        tracing::debug!("dropping row without a meter name");
        return None;
    };

    let level = match text(LEVEL_HEADERS) {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(meter = %name, error = %e, "meter level not recognised");
            stats.unclassified_levels += 1;
            MeterLevel::Unclassified
        }),
        None => {
            stats.unclassified_levels += 1;
            MeterLevel::Unclassified
        }
    };

    let mut readings = BTreeMap::new();
    for month in Month::ALL {
        let short = format!("{}{:02}", month.abbrev().to_ascii_lowercase(), year.rem_euclid(100));
        let long = format!("{}{}", month.abbrev().to_ascii_lowercase(), year);
        if let Some(cell) = cells.get(&short).or_else(|| cells.get(&long)) {
            let column = Period::new(year, month).key();
            readings.insert(month, coerce_reading(cell, &name, &column, stats));
        }
    }

    Some(MeterRecord {
        account_number: text(ACCOUNT_HEADERS).unwrap_or_else(|| UNKNOWN.to_string()),
        zone: text(ZONE_HEADERS).unwrap_or_else(|| UNKNOWN_ZONE.to_string()),
        meter_type: text(TYPE_HEADERS).unwrap_or_else(|| UNKNOWN.to_string()),
        parent: text(PARENT_HEADERS),
        name,
        level,
        year,
        readings,
    })
}

/// Coerce one reading cell to a non-negative volume. Empty cells are 0
/// without complaint; anything unusable is 0 with a warning.
fn coerce_reading(cell: &RawCell, meter: &str, column: &str, stats: &mut NormalizeStats) -> f64 {
    let parsed = match cell {
        RawCell::Empty => return 0.0,
        RawCell::Number(n) => Some(*n),
        RawCell::Text(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                return 0.0;
            }
            cleaned.parse::<f64>().ok()
        }
    };

    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
            stats.malformed_readings += 1;
            tracing::warn!(meter, column, value = ?cell, "malformed reading coerced to 0");
            0.0
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PeriodLookupError {
    #[error("invalid period: {0}")]
    Invalid(#[from] PeriodParseError),
    #[error("period {period} is outside the loaded year {year}")]
    OutsideYear { period: Period, year: i32 },
    #[error("registry for {0} has no readings")]
    NoReadings(i32),
}

/// The registry of meters loaded for one year. Replaced wholesale when the
/// year changes; never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct MeterRegistry {
    pub year: i32,
    pub records: Vec<MeterRecord>,
    pub stats: NormalizeStats,
}

impl MeterRegistry {
    pub fn from_raw_rows(rows: &[RawRow], year: i32) -> Self {
        let (records, stats) = normalize_with_stats(rows, year);

        let l1_count = records.iter().filter(|r| r.is(MeterLevel::L1)).count();
        match l1_count {
            0 => tracing::warn!(year, "no L1 meter in registry; supply will be treated as 0"),
            1 => {}
            n => tracing::warn!(year, l1_meters = n, "more than one L1 meter; the first is used"),
        }

        Self { year, records, stats }
    }

    pub fn available_periods(&self) -> Vec<Period> {
        available_periods(&self.records, self.year)
    }

    /// Most recent month with any populated column.
    pub fn latest_period(&self) -> Option<Period> {
        self.available_periods().last().copied()
    }

    /// Parse a requested period key, or fall back to the latest month with
    /// readings. Periods from another year are rejected.
    pub fn resolve_period(&self, requested: Option<&str>) -> Result<Period, PeriodLookupError> {
        match requested {
            Some(raw) => {
                let period: Period = raw.parse()?;
                if period.year != self.year {
                    return Err(PeriodLookupError::OutsideYear {
                        period,
                        year: self.year,
                    });
                }
                Ok(period)
            }
            None => self.latest_period().ok_or(PeriodLookupError::NoReadings(self.year)),
        }
    }
}

/// Months of `year` for which at least one record carries a reading column,
/// in calendar order.
pub fn available_periods(records: &[MeterRecord], year: i32) -> Vec<Period> {
    Period::months_of(year)
        .filter(|p| records.iter().any(|r| r.has_reading(*p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet_row() -> RawRow {
        RawRow::new()
            .with("Meter Label", " Z3-42 (Villa) ")
            .with("Acct #", "4300002")
            .with("Level ", "L3")
            .with("Zone", "Zone_03_(A)")
            .with("Type", "Residential (Villa)")
            .with("Parent Meter", "ZONE 3A (BULK ZONE 3A)")
            .with("Jan-25", 32.0)
            .with("Feb-25", "46")
            .with("Mar-25", "")
    }

    #[test]
    fn canonical_header_strips_case_and_punctuation() {
        assert_eq!(canonical_header("Acct #"), "acct");
        assert_eq!(canonical_header("Level "), "level");
        assert_eq!(canonical_header("parentMeterLabel"), "parentmeterlabel");
        assert_eq!(canonical_header("Mar-25"), "mar25");
    }

    #[test]
    fn normalize_trims_fields_and_coerces_readings() {
        let records = normalize(&[sheet_row()], 2025);
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.name, "Z3-42 (Villa)");
        assert_eq!(r.account_number, "4300002");
        assert_eq!(r.level, MeterLevel::L3);
        assert_eq!(r.parent.as_deref(), Some("ZONE 3A (BULK ZONE 3A)"));
        assert_eq!(r.reading(Period::new(2025, Month::Jan)), 32.0);
        assert_eq!(r.reading(Period::new(2025, Month::Feb)), 46.0);
        assert_eq!(r.reading(Period::new(2025, Month::Mar)), 0.0);
        assert!(r.has_reading(Period::new(2025, Month::Mar)));
        assert!(!r.has_reading(Period::new(2025, Month::Apr)));
    }

    #[test]
    fn normalize_accepts_camel_case_headers() {
        let row = RawRow::new()
            .with("meterLabel", "Hotel Main Building")
            .with("acctNum", "4300334")
            .with("Label", "DC")
            .with("parentMeterLabel", "Main Bulk (NAMA)")
            .with("jan_25", 18048.0);

        let records = normalize(&[row], 2025);
        assert_eq!(records[0].level, MeterLevel::DC);
        assert_eq!(records[0].account_number, "4300334");
        assert_eq!(records[0].zone, UNKNOWN_ZONE);
        assert_eq!(records[0].meter_type, UNKNOWN);
        assert_eq!(records[0].reading(Period::new(2025, Month::Jan)), 18048.0);
    }

    #[test]
    fn rows_without_a_meter_name_are_dropped() {
        let rows = vec![
            RawRow::new().with("Acct #", "1").with("Level", "L3"),
            RawRow::new().with("Meter Label", "   ").with("Level", "L3"),
            sheet_row(),
        ];
        let (records, stats) = normalize_with_stats(&rows, 2025);
        assert_eq!(records.len(), 1);
        assert_eq!(stats.rows_seen, 3);
        assert_eq!(stats.rows_dropped, 2);
    }

    #[test]
    fn malformed_cells_degrade_to_zero_and_are_counted() {
        let row = sheet_row()
            .with("Jan-25", "n/a")
            .with("Feb-25", -5.0)
            .with("Apr-25", "1,234");
        let (records, stats) = normalize_with_stats(&[row], 2025);
        let r = &records[0];
        assert_eq!(r.reading(Period::new(2025, Month::Jan)), 0.0);
        assert_eq!(r.reading(Period::new(2025, Month::Feb)), 0.0);
        assert_eq!(r.reading(Period::new(2025, Month::Apr)), 1234.0);
        assert_eq!(stats.malformed_readings, 2);
    }

    #[test]
    fn unknown_level_is_kept_as_unclassified() {
        let row = sheet_row().with("Level ", "L9");
        let (records, stats) = normalize_with_stats(&[row], 2025);
        assert_eq!(records[0].level, MeterLevel::Unclassified);
        assert_eq!(stats.unclassified_levels, 1);
    }

    #[test]
    fn columns_for_other_years_are_ignored() {
        let row = sheet_row().with("Jan-24", 999.0);
        let records = normalize(&[row], 2025);
        assert_eq!(records[0].readings.len(), 3);
    }

    #[test]
    fn available_periods_follow_populated_columns() {
        let registry = MeterRegistry::from_raw_rows(&[sheet_row()], 2025);
        let keys: Vec<String> = registry.available_periods().iter().map(Period::key).collect();
        assert_eq!(keys, vec!["Jan-25", "Feb-25", "Mar-25"]);
        assert_eq!(registry.latest_period(), Some(Period::new(2025, Month::Mar)));
    }

    #[test]
    fn resolve_period_defaults_to_latest_and_rejects_other_years() {
        let registry = MeterRegistry::from_raw_rows(&[sheet_row()], 2025);

        assert_eq!(registry.resolve_period(None).unwrap(), Period::new(2025, Month::Mar));
        assert_eq!(registry.resolve_period(Some("Feb-25")).unwrap(), Period::new(2025, Month::Feb));

        let err = registry.resolve_period(Some("Feb-24")).unwrap_err();
        assert!(matches!(err, PeriodLookupError::OutsideYear { year: 2025, .. }));
        assert!(err.to_string().contains("2025"));

        assert!(matches!(
            registry.resolve_period(Some("Smarch-25")),
            Err(PeriodLookupError::Invalid(_))
        ));
        assert!(matches!(
            MeterRegistry::default().resolve_period(None),
            Err(PeriodLookupError::NoReadings(0))
        ));
    }
}
