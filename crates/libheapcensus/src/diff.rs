//! Reconciles a fresh set of censuses against a persisted snapshot.

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::census::{Census, CensusRow};
use crate::errors::CensusResult;
use crate::snapshot;

pub const DIFF_TITLE: &str = "Snapshot Differences";

/// Per-type deltas of `current` over `previous`.
///
/// A type missing on one side counts as zero there. Types keep the order
/// they first appear in, current side first.
pub fn diff_rows(current: &[CensusRow], previous: &[CensusRow]) -> Vec<CensusRow> {
    let mut order: Vec<&str> = Vec::new();
    let mut deltas: HashMap<&str, (i64, i64)> = HashMap::new();
    for (rows, sign) in [(current, 1), (previous, -1)] {
        for row in rows {
            let entry = deltas.entry(row.type_name()).or_insert_with(|| {
                order.push(row.type_name());
                (0, 0)
            });
            entry.0 += sign * row.count();
            entry.1 += sign * row.bytes();
        }
    }
    order
        .into_iter()
        .map(|name| {
            let (count, bytes) = deltas[name];
            CensusRow::basic(name, count, bytes)
        })
        .collect()
}

/// One diff census per current/prior pair sharing a target id.
///
/// When no id is shared at all, the first current census is compared with
/// the first prior one under target id 0.
pub fn snapshot_diff(current: &[Census], previous: &[Census]) -> Vec<Census> {
    let mut differences: Vec<Census> = current
        .iter()
        .flat_map(|cur| {
            previous
                .iter()
                .filter(move |prev| prev.target_id() == cur.target_id())
                .map(move |prev| {
                    Census::new(
                        cur.target_id(),
                        format!("{DIFF_TITLE} for {}", cur.target_id()),
                        diff_rows(cur.rows(), prev.rows()),
                    )
                })
        })
        .collect();

    if differences.is_empty() {
        if let (Some(cur), Some(prev)) = (current.first(), previous.first()) {
            info!(
                "no common pids with snapshot, comparing pid {} against pid {}",
                cur.target_id(),
                prev.target_id()
            );
            differences.push(Census::new(0, DIFF_TITLE, diff_rows(cur.rows(), prev.rows())));
        } else {
            warn!("nothing to compare against the snapshot");
        }
    }
    differences
}

/// Diff `current` against the snapshot stored at `path`.
pub fn diff_against_file(current: &[Census], path: &Path) -> CensusResult<Vec<Census>> {
    let previous = snapshot::read_snapshot(path)?;
    Ok(snapshot_diff(current, &previous))
}
