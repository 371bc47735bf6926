//! Verdict ledger

use crate::config::Aggregation;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One monitor's observation of one node for one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Downtime in checks
    pub downtime: u64,
    pub latency: u64,
}

/// Aggregated `(downtime, latency)` for one epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictStats {
    pub downtime: u64,
    pub latency: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictLedger {
    verdicts: BTreeMap<NodeId, Vec<Verdict>>,
}

impl VerdictLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, node: NodeId, verdict: Verdict) {
        self.verdicts.entry(node).or_default().push(verdict);
    }

    pub fn metrics_len(&self, node: NodeId) -> usize {
        self.verdicts.get(&node).map(|v| v.len()).unwrap_or(0)
    }

    pub fn verdicts(&self, node: NodeId) -> &[Verdict] {
        self.verdicts.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Collapse and CLEAR the node's verdicts. `(0, 0)` when there are none.
    ///
    /// The second call without new verdicts always returns `(0, 0)`.
    pub fn aggregate(&mut self, node: NodeId, rule: Aggregation) -> VerdictStats {
        let Some(batch) = self.verdicts.remove(&node) else {
            return VerdictStats::default();
        };
        if batch.is_empty() {
            return VerdictStats::default();
        }

        match rule {
            Aggregation::Mean => VerdictStats {
                downtime: mean(batch.iter().map(|v| v.downtime)),
                latency: mean(batch.iter().map(|v| v.latency)),
            },
            Aggregation::Median => VerdictStats {
                downtime: median(batch.iter().map(|v| v.downtime).collect()),
                latency: median(batch.iter().map(|v| v.latency).collect()),
            },
        }
    }

    pub fn remove_all(&mut self, node: NodeId) {
        self.verdicts.remove(&node);
    }
}

fn mean(values: impl ExactSizeIterator<Item = u64>) -> u64 {
    let n = values.len() as u128;
    let sum: u128 = values.map(|v| v as u128).sum();
    (sum / n) as u64
}

fn median(mut values: Vec<u64>) -> u64 {
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        ((values[mid - 1] as u128 + values[mid] as u128) / 2) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(node: NodeId, pairs: &[(u64, u64)]) -> VerdictLedger {
        let mut ledger = VerdictLedger::new();
        for (downtime, latency) in pairs {
            ledger.record(
                node,
                Verdict {
                    downtime: *downtime,
                    latency: *latency,
                },
            );
        }
        ledger
    }

    #[test]
    fn test_record_and_len() {
        let ledger = ledger_with(1, &[(200, 300), (500, 200), (300, 400)]);
        assert_eq!(ledger.metrics_len(1), 3);
        assert_eq!(ledger.verdicts(1)[0], Verdict { downtime: 200, latency: 300 });
        assert_eq!(ledger.metrics_len(2), 0);
    }

    #[test]
    fn test_mean_aggregation_clears() {
        let mut ledger = ledger_with(1, &[(10, 0), (10, 50), (100, 40)]);
        let stats = ledger.aggregate(1, Aggregation::Mean);
        assert_eq!(stats, VerdictStats { downtime: 40, latency: 30 });
        assert_eq!(ledger.metrics_len(1), 0);
        assert_eq!(ledger.aggregate(1, Aggregation::Mean), VerdictStats::default());
    }

    #[test]
    fn test_median_aggregation() {
        let mut ledger = ledger_with(1, &[(10, 0), (10, 50), (100, 40)]);
        let stats = ledger.aggregate(1, Aggregation::Median);
        assert_eq!(stats, VerdictStats { downtime: 10, latency: 40 });

        let mut even = ledger_with(2, &[(1, 10), (3, 30), (5, 20), (7, 40)]);
        let stats = even.aggregate(2, Aggregation::Median);
        assert_eq!(stats, VerdictStats { downtime: 4, latency: 25 });
    }

    #[test]
    fn test_mean_does_not_overflow() {
        let mut ledger = ledger_with(1, &[(u64::MAX, u64::MAX), (u64::MAX, u64::MAX)]);
        let stats = ledger.aggregate(1, Aggregation::Mean);
        assert_eq!(stats.downtime, u64::MAX);
    }

    #[test]
    fn test_remove_all() {
        let mut ledger = ledger_with(1, &[(1, 1), (2, 2)]);
        ledger.remove_all(1);
        assert_eq!(ledger.metrics_len(1), 0);
    }
}
