//! Hierarchy resolution over a normalized registry: level partitions, direct
//! connections per parent, reportable zones and the supply tree.

use std::collections::HashSet;

use serde::Serialize;
use water_client::domain::{MeterLevel, MeterRecord};

/// The main bulk supply meter. When a sheet carries more than one L1 the first
/// wins; the registry reports missing or extra L1s once when it is loaded.
pub fn l1(records: &[MeterRecord]) -> Option<&MeterRecord> {
    let first = records.iter().find(|r| r.is(MeterLevel::L1));
    if first.is_none() {
        tracing::debug!("no L1 meter; supply treated as 0");
    }
    first
}

pub fn l2(records: &[MeterRecord]) -> Vec<&MeterRecord> {
    by_level(records, MeterLevel::L2)
}

pub fn by_level(records: &[MeterRecord], level: MeterLevel) -> Vec<&MeterRecord> {
    records.iter().filter(|r| r.is(level)).collect()
}

/// DC meters whose parent name is exactly `parent_name`.
pub fn dc_children_of<'a>(parent_name: &str, records: &'a [MeterRecord]) -> Vec<&'a MeterRecord> {
    records
        .iter()
        .filter(|r| r.is(MeterLevel::DC) && r.parent.as_deref() == Some(parent_name))
        .collect()
}

/// Distinct reportable zones in first-seen order.
pub fn zones_of(records: &[MeterRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| r.has_reportable_zone())
        .filter(|r| seen.insert(r.zone.as_str()))
        .map(|r| r.zone.clone())
        .collect()
}

fn same_meter_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Records whose parent names no meter in the registry. Names are compared
/// trimmed and case-insensitively. The L1's own upstream (e.g. the utility
/// feed) is not a registry meter and is never reported.
pub fn unresolved_parents(records: &[MeterRecord]) -> Vec<&MeterRecord> {
    records
        .iter()
        .filter(|r| !r.is(MeterLevel::L1))
        .filter(|r| match r.parent.as_deref() {
            Some(parent) => !records.iter().any(|p| same_meter_name(&p.name, parent)),
            None => false,
        })
        .collect()
}

/// A node of the supply tree rooted at the L1 meter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkNode {
    pub name: String,
    pub account_number: String,
    pub level: MeterLevel,
    pub zone: String,
    pub meter_type: String,
    pub children: Vec<NetworkNode>,
}

impl NetworkNode {
    /// Number of meters below this node.
    pub fn descendant_count(&self) -> usize {
        self.children.iter().map(|c| 1 + c.descendant_count()).sum()
    }

    pub fn find(&self, name: &str) -> Option<&NetworkNode> {
        if same_meter_name(&self.name, name) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

/// Build the supply tree below the L1 meter. Each meter is placed once; a
/// parent chain that loops back is cut where it revisits a meter.
pub fn network_tree(records: &[MeterRecord]) -> Option<NetworkNode> {
    let root = records.iter().position(|r| r.is(MeterLevel::L1))?;
    let mut placed = vec![false; records.len()];
    placed[root] = true;
    Some(build_node(records, root, &mut placed))
}

fn build_node(records: &[MeterRecord], idx: usize, placed: &mut [bool]) -> NetworkNode {
    let meter = &records[idx];

    let child_idxs: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(i, r)| {
            !placed[*i]
                && r.parent
                    .as_deref()
                    .is_some_and(|p| same_meter_name(p, &meter.name))
        })
        .map(|(i, _)| i)
        .collect();

    for &i in &child_idxs {
        placed[i] = true;
    }

    NetworkNode {
        name: meter.name.clone(),
        account_number: meter.account_number.clone(),
        level: meter.level,
        zone: meter.zone.clone(),
        meter_type: meter.meter_type.clone(),
        children: child_idxs
            .into_iter()
            .map(|i| build_node(records, i, placed))
            .collect(),
    }
}
