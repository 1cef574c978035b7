//! Reporting projections over a reconciliation: rankings, trends and
//! breakdowns handed to chart and table renderers.

use std::cmp::Ordering;

use serde::Serialize;
use water_client::domain::{MeterLevel, MeterRecord, Period};

use crate::{
    reconcile::{self, ExclusionRule, LossStatus, LossThresholds, ReconciliationResult, TypeConsumption},
    registry,
};

/// Short label for charts: `Zone_03_(A)` -> `03 A`, `Zone_FM` -> `FM`.
pub fn zone_display_name(zone: &str) -> String {
    let trimmed = zone.trim();
    let stripped = trimmed.strip_prefix("Zone_").unwrap_or(trimmed);
    stripped
        .replace(['_', '(', ')'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneLoss {
    pub zone: String,
    pub display_name: String,
    pub loss_pct: f64,
}

/// Zones ranked by internal loss percentage, highest first. Ties keep the
/// order zones appear in the result.
pub fn top_losing_zones(result: &ReconciliationResult, n: usize) -> Vec<ZoneLoss> {
    let mut zones: Vec<ZoneLoss> = result
        .zones
        .iter()
        .filter(|z| !z.internal_loss_pct.is_nan())
        .map(|z| ZoneLoss {
            zone: z.zone.clone(),
            display_name: zone_display_name(&z.zone),
            loss_pct: z.internal_loss_pct,
        })
        .collect();
    zones.sort_by(|a, b| descending(a.loss_pct, b.loss_pct));
    zones.truncate(n);
    zones
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub period: Period,
    pub stage1_loss: f64,
    pub stage2_loss: f64,
    pub total_loss: f64,
    pub stage1_loss_pct: f64,
    pub stage2_loss_pct: f64,
    pub total_loss_pct: f64,
}

/// Loss trend across the year: one reconciliation per available month, in
/// calendar order.
pub fn trend(records: &[MeterRecord], year: i32, exclusions: &[ExclusionRule]) -> Vec<TrendPoint> {
    registry::available_periods(records, year)
        .into_iter()
        .map(|period| {
            let r = reconcile::reconcile(records, period, exclusions);
            TrendPoint {
                period,
                stage1_loss: r.stage1_loss,
                stage2_loss: r.stage2_loss,
                total_loss: r.total_loss,
                stage1_loss_pct: r.stage1_loss_pct,
                stage2_loss_pct: r.stage2_loss_pct,
                total_loss_pct: r.total_loss_pct,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneConsumption {
    pub zone: String,
    pub display_name: String,
    pub value: f64,
}

/// L3 + DC consumption per reportable zone, optionally limited to one meter
/// type. Excluded accounts count as 0; zones that end up at 0 are dropped.
pub fn consumption_by_zone(
    records: &[MeterRecord],
    period: Period,
    type_filter: Option<&str>,
    exclusions: &[ExclusionRule],
) -> Vec<ZoneConsumption> {
    let mut out: Vec<ZoneConsumption> = Vec::new();

    let consumers = records
        .iter()
        .filter(|m| m.is_consumer() && m.has_reportable_zone())
        .filter(|m| type_filter.map_or(true, |t| m.meter_type == t));

    for meter in consumers {
        let value = if reconcile::is_excluded(meter, exclusions) {
            0.0
        } else {
            meter.reading(period)
        };
        match out.iter_mut().find(|z| z.zone == meter.zone) {
            Some(entry) => entry.value += value,
            None => out.push(ZoneConsumption {
                zone: meter.zone.clone(),
                display_name: zone_display_name(&meter.zone),
                value,
            }),
        }
    }

    out.retain(|z| z.value > 0.0);
    out.sort_by(|a, b| descending(a.value, b.value));
    out
}

/// Type breakdown of a result, largest first.
pub fn consumption_by_type_sorted(result: &ReconciliationResult) -> Vec<TypeConsumption> {
    let mut types = result.consumption_by_type.clone();
    types.sort_by(|a, b| descending(a.volume, b.volume));
    types
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReading {
    pub name: String,
    pub account_number: String,
    pub meter_type: String,
    pub volume: f64,
}

/// The L3 meters of one zone with their reading at `period`, largest first.
pub fn zone_meters(records: &[MeterRecord], zone: &str, period: Period) -> Vec<MeterReading> {
    let mut meters: Vec<MeterReading> = records
        .iter()
        .filter(|m| m.is(MeterLevel::L3) && m.zone == zone)
        .map(|m| MeterReading {
            name: m.name.clone(),
            account_number: m.account_number.clone(),
            meter_type: m.meter_type.clone(),
            volume: m.reading(period),
        })
        .collect();
    meters.sort_by(|a, b| descending(a.volume, b.volume));
    meters
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub loss: f64,
    pub loss_pct: f64,
    pub status: LossStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneReport {
    pub zone: String,
    pub display_name: String,
    pub l2_bulk_reading: f64,
    pub l3_sum: f64,
    pub internal_loss: f64,
    pub internal_loss_pct: f64,
    pub status: LossStatus,
}

/// Everything a dashboard needs for one period, ready to serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceReport {
    pub period: Period,
    pub total_l1_supply: f64,
    pub total_l2_volume: f64,
    pub total_l3_volume: f64,
    pub stage1: StageReport,
    pub stage2: StageReport,
    pub total: StageReport,
    pub zones: Vec<ZoneReport>,
    pub top_losing_zones: Vec<ZoneLoss>,
    pub consumption_by_type: Vec<TypeConsumption>,
    pub consumption_by_zone: Vec<ZoneConsumption>,
    pub diagnostics: reconcile::ReconcileDiagnostics,
}

/// Settings that shape a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    pub exclusions: Vec<ExclusionRule>,
    pub thresholds: LossThresholds,
    pub top_zones: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            exclusions: Vec::new(),
            thresholds: LossThresholds::default(),
            top_zones: 5,
        }
    }
}

impl BalanceReport {
    pub fn build(records: &[MeterRecord], period: Period, settings: &ReportSettings) -> Self {
        let result = reconcile::reconcile(records, period, &settings.exclusions);
        let t = &settings.thresholds;
        let stage = |loss: f64, loss_pct: f64| StageReport {
            loss,
            loss_pct,
            status: t.classify(loss_pct),
        };

        BalanceReport {
            period,
            total_l1_supply: result.total_l1_supply,
            total_l2_volume: result.total_l2_volume,
            total_l3_volume: result.total_l3_volume,
            stage1: stage(result.stage1_loss, result.stage1_loss_pct),
            stage2: stage(result.stage2_loss, result.stage2_loss_pct),
            total: stage(result.total_loss, result.total_loss_pct),
            zones: result
                .zones
                .iter()
                .map(|z| ZoneReport {
                    zone: z.zone.clone(),
                    display_name: zone_display_name(&z.zone),
                    l2_bulk_reading: z.l2_bulk_reading,
                    l3_sum: z.l3_sum,
                    internal_loss: z.internal_loss,
                    internal_loss_pct: z.internal_loss_pct,
                    status: t.classify(z.internal_loss_pct),
                })
                .collect(),
            top_losing_zones: top_losing_zones(&result, settings.top_zones),
            consumption_by_type: consumption_by_type_sorted(&result),
            consumption_by_zone: consumption_by_zone(records, period, None, &settings.exclusions),
            diagnostics: result.diagnostics,
        }
    }
}
