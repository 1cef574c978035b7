//! Multi-level water balance for one period.
//!
//! Volumes flow L1 (main bulk) -> L2 (zone bulk, plus DC meters fed straight
//! from L1) -> L3 (individual meters, plus every DC meter). Stage losses are
//! the differences between adjacent levels. Losses are signed: a negative
//! loss means downstream meters read more than upstream supplied, and is
//! reported as a gain rather than clamped.

use std::fmt;

use serde::{Deserialize, Serialize};
use water_client::domain::{MeterLevel, MeterRecord, Period};

use crate::hierarchy;

/// Where an excluded account is dropped from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionScope {
    /// Dropped from every zone's L3 sum.
    Global,
    /// Dropped from this zone's L3 sum only.
    Zone(String),
}

/// An account whose readings are left out of consumption sums.
///
/// Every rule removes the account from the global L3 total and from the
/// type and zone consumption breakdowns. `scope` only decides which zone
/// balances it is also removed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub account_number: String,
    #[serde(default = "default_scope")]
    pub scope: ExclusionScope,
}

fn default_scope() -> ExclusionScope {
    ExclusionScope::Global
}

impl ExclusionRule {
    pub fn global(account_number: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            scope: ExclusionScope::Global,
        }
    }

    pub fn zone(account_number: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            scope: ExclusionScope::Zone(zone.into()),
        }
    }

    fn matches(&self, record: &MeterRecord) -> bool {
        self.account_number.trim() == record.account_number
    }

    fn applies_in_zone(&self, zone: &str) -> bool {
        match &self.scope {
            ExclusionScope::Global => true,
            ExclusionScope::Zone(z) => z.trim() == zone.trim(),
        }
    }
}

/// `true` when any rule names this record's account.
pub fn is_excluded(record: &MeterRecord, exclusions: &[ExclusionRule]) -> bool {
    exclusions.iter().any(|rule| rule.matches(record))
}

fn is_excluded_in_zone(record: &MeterRecord, zone: &str, exclusions: &[ExclusionRule]) -> bool {
    exclusions
        .iter()
        .any(|rule| rule.matches(record) && rule.applies_in_zone(zone))
}

/// Loss percentage relative to `base`, 0 when there is nothing upstream.
pub fn loss_pct(loss: f64, base: f64) -> f64 {
    if base > 0.0 {
        loss / base * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossStatus {
    #[serde(rename = "High Loss")]
    HighLoss,
    #[serde(rename = "Medium Loss")]
    MediumLoss,
    Good,
    Gain,
    /// The percentage was not a number.
    Unknown,
}

impl fmt::Display for LossStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LossStatus::HighLoss => "High Loss",
            LossStatus::MediumLoss => "Medium Loss",
            LossStatus::Good => "Good",
            LossStatus::Gain => "Gain",
            LossStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Percentage bands used to classify a loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossThresholds {
    /// Above this is "High Loss".
    #[serde(default = "default_high_loss_pct")]
    pub high_loss_pct: f64,
    /// Above this (and up to `high_loss_pct`) is "Medium Loss".
    #[serde(default = "default_medium_loss_pct")]
    pub medium_loss_pct: f64,
}

fn default_high_loss_pct() -> f64 {
    20.0
}

fn default_medium_loss_pct() -> f64 {
    10.0
}

impl Default for LossThresholds {
    fn default() -> Self {
        Self {
            high_loss_pct: default_high_loss_pct(),
            medium_loss_pct: default_medium_loss_pct(),
        }
    }
}

impl LossThresholds {
    pub fn classify(&self, pct: f64) -> LossStatus {
        if pct.is_nan() {
            LossStatus::Unknown
        } else if pct > self.high_loss_pct {
            LossStatus::HighLoss
        } else if pct > self.medium_loss_pct {
            LossStatus::MediumLoss
        } else if pct >= 0.0 {
            LossStatus::Good
        } else {
            LossStatus::Gain
        }
    }
}

/// Internal balance of one zone: its bulk meter(s) against its L3 meters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneAggregate {
    pub zone: String,
    pub l2_bulk_reading: f64,
    pub l3_sum: f64,
    pub internal_loss: f64,
    pub internal_loss_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeConsumption {
    pub meter_type: String,
    pub volume: f64,
}

/// How the totals were assembled; surfaced so data problems are visible.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileDiagnostics {
    pub l1_found: bool,
    pub l2_count: usize,
    pub dc_from_l1_count: usize,
    pub l3_count: usize,
    pub dc_count: usize,
    pub excluded_l3_volume: f64,
    pub unresolved_parent_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub period: Period,
    pub total_l1_supply: f64,
    pub total_l2_volume: f64,
    pub total_l3_volume: f64,
    pub stage1_loss: f64,
    pub stage1_loss_pct: f64,
    pub stage2_loss: f64,
    pub stage2_loss_pct: f64,
    pub total_loss: f64,
    pub total_loss_pct: f64,
    /// One entry per reportable zone, first-seen order.
    pub zones: Vec<ZoneAggregate>,
    /// L3 + DC volume per meter type, first-seen order.
    pub consumption_by_type: Vec<TypeConsumption>,
    pub diagnostics: ReconcileDiagnostics,
}

impl ReconciliationResult {
    pub fn zone(&self, zone: &str) -> Option<&ZoneAggregate> {
        self.zones.iter().find(|z| z.zone == zone)
    }
}

fn sum_at<'a>(meters: impl IntoIterator<Item = &'a MeterRecord>, period: Period) -> f64 {
    meters.into_iter().map(|m| m.reading(period)).sum()
}

/// Reconcile the registry at `period`. Pure: the same inputs always give the
/// same result, and missing meters only ever contribute 0.
pub fn reconcile(records: &[MeterRecord], period: Period, exclusions: &[ExclusionRule]) -> ReconciliationResult {
    metrics::counter!("water_reconcile_runs_total").increment(1);

    let l1 = hierarchy::l1(records);
    let total_l1_supply = l1.map(|m| m.reading(period)).unwrap_or(0.0);

    let l2_meters = hierarchy::l2(records);
    let dc_from_l1 = l1
        .map(|main| hierarchy::dc_children_of(&main.name, records))
        .unwrap_or_default();
    let total_l2_volume = sum_at(l2_meters.iter().copied(), period) + sum_at(dc_from_l1.iter().copied(), period);

    let l3_meters = hierarchy::by_level(records, MeterLevel::L3);
    let dc_meters = hierarchy::by_level(records, MeterLevel::DC);
    // An excluded account comes off the L3 component whatever its level; the
    // DC component below is always summed in full.
    let excluded_l3_volume = sum_at(records.iter().filter(|m| is_excluded(m, exclusions)), period);
    let l3_sum = sum_at(l3_meters.iter().copied(), period);
    let total_l3_volume = (l3_sum - excluded_l3_volume) + sum_at(dc_meters.iter().copied(), period);

    let stage1_loss = total_l1_supply - total_l2_volume;
    let stage2_loss = total_l2_volume - total_l3_volume;
    // Summing the stages keeps total == stage1 + stage2 exact.
    let total_loss = stage1_loss + stage2_loss;

    let zones = hierarchy::zones_of(records)
        .into_iter()
        .map(|zone| zone_aggregate(records, &l2_meters, &zone, period, exclusions))
        .collect();

    let diagnostics = ReconcileDiagnostics {
        l1_found: l1.is_some(),
        l2_count: l2_meters.len(),
        dc_from_l1_count: dc_from_l1.len(),
        l3_count: l3_meters.len(),
        dc_count: dc_meters.len(),
        excluded_l3_volume,
        unresolved_parent_count: hierarchy::unresolved_parents(records).len(),
    };

    let result = ReconciliationResult {
        period,
        total_l1_supply,
        total_l2_volume,
        total_l3_volume,
        stage1_loss,
        stage1_loss_pct: loss_pct(stage1_loss, total_l1_supply),
        stage2_loss,
        stage2_loss_pct: loss_pct(stage2_loss, total_l2_volume),
        total_loss,
        total_loss_pct: loss_pct(total_loss, total_l1_supply),
        zones,
        consumption_by_type: consumption_by_type(records, period, exclusions),
        diagnostics,
    };

    tracing::debug!(
        period = %period,
        l1 = result.total_l1_supply,
        l2 = result.total_l2_volume,
        l3 = result.total_l3_volume,
        total_loss_pct = result.total_loss_pct,
        "reconciled period"
    );

    result
}

fn zone_aggregate(
    records: &[MeterRecord],
    l2_meters: &[&MeterRecord],
    zone: &str,
    period: Period,
    exclusions: &[ExclusionRule],
) -> ZoneAggregate {
    let l2_bulk_reading = sum_at(l2_meters.iter().copied().filter(|m| m.zone == zone), period);
    let l3_sum = sum_at(
        records
            .iter()
            .filter(|m| m.is(MeterLevel::L3) && m.zone == zone)
            .filter(|m| !is_excluded_in_zone(m, zone, exclusions)),
        period,
    );
    let internal_loss = l2_bulk_reading - l3_sum;

    ZoneAggregate {
        zone: zone.to_string(),
        l2_bulk_reading,
        l3_sum,
        internal_loss,
        internal_loss_pct: loss_pct(internal_loss, l2_bulk_reading),
    }
}

/// L3 + DC volume grouped by meter type. Excluded accounts contribute 0 but
/// their type still appears.
pub fn consumption_by_type(records: &[MeterRecord], period: Period, exclusions: &[ExclusionRule]) -> Vec<TypeConsumption> {
    let mut out: Vec<TypeConsumption> = Vec::new();
    for meter in records.iter().filter(|m| m.is_consumer()) {
        let volume = if is_excluded(meter, exclusions) {
            0.0
        } else {
            meter.reading(period)
        };
        match out.iter_mut().find(|t| t.meter_type == meter.meter_type) {
            Some(entry) => entry.volume += volume,
            None => out.push(TypeConsumption {
                meter_type: meter.meter_type.clone(),
                volume,
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use water_client::domain::Month;

    const PERIOD: Period = Period {
        year: 2025,
        month: Month::Mar,
    };

    fn meter(
        name: &str,
        acct: &str,
        level: MeterLevel,
        zone: &str,
        meter_type: &str,
        parent: &str,
        volume: f64,
    ) -> MeterRecord {
        MeterRecord {
            name: name.to_string(),
            account_number: acct.to_string(),
            level,
            zone: zone.to_string(),
            meter_type: meter_type.to_string(),
            parent: Some(parent.to_string()),
            year: 2025,
            readings: BTreeMap::from([(Month::Mar, volume)]),
        }
    }

    /// L1 = 1000, L2 = 600 + 300, L3 = 500 + 350.
    fn scenario_a() -> Vec<MeterRecord> {
        vec![
            meter("Main Bulk", "C1", MeterLevel::L1, "Main Bulk", "Main BULK", "NAMA", 1000.0),
            meter("Zone A Bulk", "Z1", MeterLevel::L2, "Zone_01", "Zone Bulk", "Main Bulk", 600.0),
            meter("Zone B Bulk", "Z2", MeterLevel::L2, "Zone_02", "Zone Bulk", "Main Bulk", 300.0),
            meter("A-1", "1001", MeterLevel::L3, "Zone_01", "Residential (Villa)", "Zone A Bulk", 500.0),
            meter("B-1", "2001", MeterLevel::L3, "Zone_02", "Retail", "Zone B Bulk", 350.0),
        ]
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn scenario_a_stage_losses() {
        let r = reconcile(&scenario_a(), PERIOD, &[]);
        assert_eq!(r.total_l1_supply, 1000.0);
        assert_eq!(r.total_l2_volume, 900.0);
        assert_eq!(r.total_l3_volume, 850.0);
        assert_eq!(r.stage1_loss, 100.0);
        assert!(approx(r.stage1_loss_pct, 10.0));
        assert_eq!(r.stage2_loss, 50.0);
        assert!(approx(r.stage2_loss_pct, 50.0 / 900.0 * 100.0));
        assert_eq!(r.total_loss, 150.0);
        assert!(approx(r.total_loss_pct, 15.0));
    }

    #[test]
    fn scenario_b_zero_supply_gives_zero_percentages() {
        let mut records = scenario_a();
        records[0].readings.insert(Month::Mar, 0.0);
        let r = reconcile(&records, PERIOD, &[]);
        assert_eq!(r.stage1_loss_pct, 0.0);
        assert_eq!(r.total_loss_pct, 0.0);
        assert!(r.stage1_loss < 0.0);
        assert!(!r.total_loss_pct.is_nan());

        let empty = reconcile(&[], PERIOD, &[]);
        assert_eq!(empty.total_l1_supply, 0.0);
        assert_eq!(empty.stage1_loss_pct, 0.0);
        assert_eq!(empty.stage2_loss_pct, 0.0);
        assert_eq!(empty.total_loss_pct, 0.0);
        assert!(!empty.diagnostics.l1_found);
        assert!(empty.zones.is_empty());
    }

    #[test]
    fn scenario_c_zone_gain_after_exclusion() {
        let records = vec![
            meter("Main Bulk", "C1", MeterLevel::L1, "Main Bulk", "Main BULK", "NAMA", 2000.0),
            meter("ZONE 3A", "4300343", MeterLevel::L2, "Zone_03_(A)", "Zone Bulk", "Main Bulk", 500.0),
            meter("Z3-1", "4300010", MeterLevel::L3, "Zone_03_(A)", "Residential (Villa)", "ZONE 3A", 300.0),
            meter("Z3-2", "4300011", MeterLevel::L3, "Zone_03_(A)", "Residential (Villa)", "ZONE 3A", 220.0),
            meter("Z3-74(3)", "4300322", MeterLevel::L3, "Zone_03_(A)", "Residential (Apart)", "ZONE 3A", 40.0),
        ];
        let exclusions = vec![ExclusionRule::zone("4300322", "Zone_03_(A)")];

        let r = reconcile(&records, PERIOD, &exclusions);
        let zone = r.zone("Zone_03_(A)").expect("zone 3A");
        assert_eq!(zone.l2_bulk_reading, 500.0);
        assert_eq!(zone.l3_sum, 520.0);
        assert_eq!(zone.internal_loss, -20.0);
        assert!(approx(zone.internal_loss_pct, -4.0));
        assert_eq!(LossThresholds::default().classify(zone.internal_loss_pct), LossStatus::Gain);
    }

    #[test]
    fn scenario_d_dc_meters_by_parent() {
        let mut records = scenario_a();
        records.push(meter("Hotel", "4300334", MeterLevel::DC, "Direct Connection ", "Retail", "Main Bulk", 70.0));
        records.push(meter("Zone A Irrigation", "1002", MeterLevel::DC, "Zone_01", "Irrigation Services", "Zone A Bulk", 30.0));

        let r = reconcile(&records, PERIOD, &[]);
        assert_eq!(r.total_l2_volume, 900.0 + 70.0);
        assert_eq!(r.total_l3_volume, 850.0 + 70.0 + 30.0);
        assert_eq!(r.diagnostics.dc_from_l1_count, 1);
        assert_eq!(r.diagnostics.dc_count, 2);
    }

    #[test]
    fn exclusion_reduces_l3_by_exactly_the_account_reading() {
        let records = scenario_a();
        let base = reconcile(&records, PERIOD, &[]);
        let excluded = reconcile(&records, PERIOD, &[ExclusionRule::global("1001")]);

        assert_eq!(base.total_l3_volume - excluded.total_l3_volume, 500.0);
        assert_eq!(base.total_l2_volume, excluded.total_l2_volume);
        assert_eq!(
            base.zone("Zone_01").unwrap().l3_sum - excluded.zone("Zone_01").unwrap().l3_sum,
            500.0
        );
        assert_eq!(excluded.diagnostics.excluded_l3_volume, 500.0);
    }

    #[test]
    fn zone_scoped_exclusion_only_touches_its_zone_balance() {
        let records = scenario_a();
        let r = reconcile(&records, PERIOD, &[ExclusionRule::zone("1001", "Zone_02")]);
        assert_eq!(r.zone("Zone_01").unwrap().l3_sum, 500.0);
        assert_eq!(r.total_l3_volume, 350.0);
    }

    #[test]
    fn excluding_a_dc_account_reduces_l3_total_by_its_reading() {
        let mut records = scenario_a();
        records.push(meter("Hotel", "4300334", MeterLevel::DC, "Direct Connection ", "Retail", "Main Bulk", 70.0));
        let base = reconcile(&records, PERIOD, &[]);
        let r = reconcile(&records, PERIOD, &[ExclusionRule::global("4300334")]);

        assert_eq!(base.total_l3_volume - r.total_l3_volume, 70.0);
        assert_eq!(r.total_l3_volume, 850.0);
        assert_eq!(r.total_l2_volume, base.total_l2_volume);
        assert_eq!(r.diagnostics.excluded_l3_volume, 70.0);
        assert_eq!(r.diagnostics.dc_count, 1);

        let retail = r.consumption_by_type.iter().find(|t| t.meter_type == "Retail").unwrap();
        assert_eq!(retail.volume, 350.0);
    }

    #[test]
    fn zone_without_bulk_meter_has_zero_loss_pct() {
        let mut records = scenario_a();
        records.push(meter("Orphan-1", "9001", MeterLevel::L3, "Zone_09", "Residential (Villa)", "Zone 9 Bulk", 40.0));
        let r = reconcile(&records, PERIOD, &[]);

        let zone = r.zone("Zone_09").expect("zone 9");
        assert_eq!(zone.l2_bulk_reading, 0.0);
        assert_eq!(zone.internal_loss, -40.0);
        assert_eq!(zone.internal_loss_pct, 0.0);
        assert!(!zone.internal_loss_pct.is_nan());
        assert_eq!(LossThresholds::default().classify(zone.internal_loss_pct), LossStatus::Good);

        let main = r.zone("Main Bulk").expect("main bulk zone");
        assert_eq!(main.l2_bulk_reading, 0.0);
        assert_eq!(main.internal_loss_pct, 0.0);
    }

    #[test]
    fn total_loss_is_sum_of_stages() {
        let mut records = scenario_a();
        records[0].readings.insert(Month::Mar, 1000.1);
        records[1].readings.insert(Month::Mar, 600.7);
        records[3].readings.insert(Month::Mar, 499.3);
        let r = reconcile(&records, PERIOD, &[]);
        assert_eq!(r.total_loss, r.stage1_loss + r.stage2_loss);
    }

    #[test]
    fn negative_losses_are_preserved() {
        let mut records = scenario_a();
        records[3].readings.insert(Month::Mar, 800.0);
        let r = reconcile(&records, PERIOD, &[]);
        assert_eq!(r.stage2_loss, 900.0 - 1150.0);
        assert!(r.stage2_loss_pct < 0.0);
        assert_eq!(LossThresholds::default().classify(r.stage2_loss_pct), LossStatus::Gain);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let records = scenario_a();
        let exclusions = vec![ExclusionRule::global("2001")];
        assert_eq!(
            reconcile(&records, PERIOD, &exclusions),
            reconcile(&records, PERIOD, &exclusions)
        );
    }

    #[test]
    fn consumption_by_type_zeroes_excluded_accounts() {
        let records = scenario_a();
        let by_type = consumption_by_type(&records, PERIOD, &[ExclusionRule::zone("2001", "Zone_01")]);
        assert_eq!(
            by_type,
            vec![
                TypeConsumption {
                    meter_type: "Residential (Villa)".to_string(),
                    volume: 500.0
                },
                TypeConsumption {
                    meter_type: "Retail".to_string(),
                    volume: 0.0
                },
            ]
        );
    }

    #[test]
    fn classify_boundaries() {
        let t = LossThresholds::default();
        assert_eq!(t.classify(20.01), LossStatus::HighLoss);
        assert_eq!(t.classify(20.0), LossStatus::MediumLoss);
        assert_eq!(t.classify(10.01), LossStatus::MediumLoss);
        assert_eq!(t.classify(10.0), LossStatus::Good);
        assert_eq!(t.classify(0.0), LossStatus::Good);
        assert_eq!(t.classify(-0.5), LossStatus::Gain);
        assert_eq!(t.classify(f64::NAN), LossStatus::Unknown);

        let strict = LossThresholds {
            high_loss_pct: 8.0,
            medium_loss_pct: 3.0,
        };
        assert_eq!(strict.classify(9.0), LossStatus::HighLoss);
        assert_eq!(strict.classify(5.0), LossStatus::MediumLoss);
    }
}
