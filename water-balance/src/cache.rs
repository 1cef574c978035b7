//! Memoized balance reports keyed by content fingerprints.
//!
//! The key covers the registry contents, the period and the report settings,
//! so a changed registry or exclusion list can never hit a stale entry.

use std::{collections::HashMap, sync::Arc};

use water_client::domain::{MeterRecord, Period};

use crate::{
    reconcile::ExclusionScope,
    report::{BalanceReport, ReportSettings},
};

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_str(hasher: &mut blake3::Hasher, s: &Option<String>) {
    match s {
        Some(v) => {
            hasher.update(&[1]);
            hash_str(hasher, v);
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

fn hash_f64(hasher: &mut blake3::Hasher, v: f64) {
    hasher.update(&v.to_bits().to_le_bytes());
}

/// Content fingerprint of a normalized registry. Record order matters since
/// it decides zone order and tie-breaks.
pub fn fingerprint_records(records: &[MeterRecord]) -> blake3::Hash {
    let mut h = blake3::Hasher::new();
    h.update(&(records.len() as u64).to_le_bytes());
    for r in records {
        hash_str(&mut h, &r.name);
        hash_str(&mut h, &r.account_number);
        hash_str(&mut h, &r.level.to_string());
        hash_str(&mut h, &r.zone);
        hash_str(&mut h, &r.meter_type);
        hash_opt_str(&mut h, &r.parent);
        h.update(&r.year.to_le_bytes());
        h.update(&(r.readings.len() as u32).to_le_bytes());
        for (month, volume) in &r.readings {
            h.update(&[*month as u8]);
            hash_f64(&mut h, *volume);
        }
    }
    h.finalize()
}

pub fn fingerprint_settings(settings: &ReportSettings) -> blake3::Hash {
    let mut h = blake3::Hasher::new();
    h.update(&(settings.exclusions.len() as u32).to_le_bytes());
    for rule in &settings.exclusions {
        hash_str(&mut h, &rule.account_number);
        match &rule.scope {
            ExclusionScope::Global => {
                h.update(&[0]);
            }
            ExclusionScope::Zone(zone) => {
                h.update(&[1]);
                hash_str(&mut h, zone);
            }
        }
    }
    hash_f64(&mut h, settings.thresholds.high_loss_pct);
    hash_f64(&mut h, settings.thresholds.medium_loss_pct);
    h.update(&(settings.top_zones as u64).to_le_bytes());
    h.finalize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    registry: blake3::Hash,
    period: Period,
    settings: blake3::Hash,
}

/// Bounded report cache. When full it is cleared rather than evicting
/// piecemeal; entries are cheap to rebuild.
#[derive(Debug)]
pub struct ReconcileCache {
    entries: HashMap<CacheKey, Arc<BalanceReport>>,
    max_entries: usize,
}

impl ReconcileCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Return the cached report for this key, building it on a miss.
    pub fn get_or_build(
        &mut self,
        registry_fingerprint: blake3::Hash,
        records: &[MeterRecord],
        period: Period,
        settings: &ReportSettings,
    ) -> Arc<BalanceReport> {
        let key = CacheKey {
            registry: registry_fingerprint,
            period,
            settings: fingerprint_settings(settings),
        };

        if let Some(hit) = self.entries.get(&key) {
            metrics::counter!("water_reconcile_cache_hits_total").increment(1);
            return Arc::clone(hit);
        }

        if self.entries.len() >= self.max_entries {
            tracing::debug!(entries = self.entries.len(), "reconcile cache full, clearing");
            self.entries.clear();
        }

        let report = Arc::new(BalanceReport::build(records, period, settings));
        self.entries.insert(key, Arc::clone(&report));
        report
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ReconcileCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ExclusionRule;
    use std::collections::BTreeMap;
    use water_client::domain::{MeterLevel, Month};

    const MAR: Period = Period {
        year: 2025,
        month: Month::Mar,
    };

    fn records(l3_volume: f64) -> Vec<MeterRecord> {
        let meter = |name: &str, level, volume| MeterRecord {
            name: name.to_string(),
            account_number: format!("acct-{name}"),
            level,
            zone: "Zone_05".to_string(),
            meter_type: "Residential (Villa)".to_string(),
            parent: None,
            year: 2025,
            readings: BTreeMap::from([(Month::Mar, volume)]),
        };
        vec![
            meter("Main", MeterLevel::L1, 1000.0),
            meter("Z5 Bulk", MeterLevel::L2, 900.0),
            meter("Z5-1", MeterLevel::L3, l3_volume),
        ]
    }

    #[test]
    fn fingerprint_tracks_readings() {
        assert_eq!(fingerprint_records(&records(800.0)), fingerprint_records(&records(800.0)));
        assert_ne!(fingerprint_records(&records(800.0)), fingerprint_records(&records(801.0)));
    }

    #[test]
    fn repeated_lookup_hits_the_same_report() {
        let mut cache = ReconcileCache::default();
        let recs = records(800.0);
        let fp = fingerprint_records(&recs);
        let settings = ReportSettings::default();

        let first = cache.get_or_build(fp, &recs, MAR, &settings);
        let second = cache.get_or_build(fp, &recs, MAR, &settings);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn changed_registry_or_exclusions_miss() {
        let mut cache = ReconcileCache::default();
        let settings = ReportSettings::default();

        let before = records(800.0);
        let after = records(700.0);
        let a = cache.get_or_build(fingerprint_records(&before), &before, MAR, &settings);
        let b = cache.get_or_build(fingerprint_records(&after), &after, MAR, &settings);
        assert_eq!(a.total_l3_volume, 800.0);
        assert_eq!(b.total_l3_volume, 700.0);

        let excluding = ReportSettings {
            exclusions: vec![ExclusionRule::global("acct-Z5-1")],
            ..ReportSettings::default()
        };
        let c = cache.get_or_build(fingerprint_records(&after), &after, MAR, &excluding);
        assert_eq!(c.total_l3_volume, 0.0);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn full_cache_is_cleared_before_insert() {
        let mut cache = ReconcileCache::new(1);
        let recs = records(800.0);
        let fp = fingerprint_records(&recs);
        let settings = ReportSettings::default();

        cache.get_or_build(fp, &recs, MAR, &settings);
        cache.get_or_build(fp, &recs, Period::new(2025, Month::Feb), &settings);
        assert_eq!(cache.len(), 1);
    }
}
