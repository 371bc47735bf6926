//! Peer monitoring
//!
//! Every active node is watched by a pseudorandom group of other active
//! nodes. Forming a group issues one [`CheckedRecord`] per member; a member
//! may report a verdict only while its record is open.
//!
//! # Per-node phases
//!
//! ```text
//! (none) ──add──▶ Monitored ◀──upgrade──┐
//!                     │  └──────────────┘
//!                     └──delete──▶ Removed ──add──▶ Monitored
//! ```
//!
//! A superseded group never receives verdicts: upgrading removes every
//! record it issued, and each record carries the generation that issued it.
//! An upgrade selects the new group before it drops anything, so a failed
//! upgrade leaves the old group in place.
//!
//! Accepting a verdict also sweeps the monitor's records of superseded
//! generations. Records issued here never outlive their group; the sweep
//! covers state restored from a snapshot written by another build.
//!
//! # Check times
//!
//! ```text
//! due_i = now + draw(SHA3(entropy ‖ "check-time" ‖ monitored), i) mod (reward − delta)
//! ```

pub mod checked;
pub mod verdicts;

pub use checked::{CheckedRecord, PACKED_LEN};
pub use verdicts::{Verdict, VerdictLedger, VerdictStats};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::registry::NodeRegistry;
use crate::selector::{derive_seed, draw, select_group};
use crate::types::{Hash, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

const GROUP_PURPOSE: &[u8] = b"monitor";
const CHECK_TIME_PURPOSE: &[u8] = b"check-time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorPhase {
    Monitored,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorGroup {
    pub monitored: NodeId,
    /// Selection order
    pub members: Vec<NodeId>,
    pub formed_at: Timestamp,
    pub generation: u64,
}

struct GroupDraft {
    members: Vec<NodeId>,
    ip: Ipv4Addr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorService {
    groups: BTreeMap<NodeId, MonitorGroup>,
    /// monitor → pending records, issue order
    checked: BTreeMap<NodeId, Vec<CheckedRecord>>,
    phases: BTreeMap<NodeId, MonitorPhase>,
    generations: BTreeMap<NodeId, u64>,
    last_verdict_at: BTreeMap<NodeId, Timestamp>,
}

impl MonitorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Form the first group for `monitored`. Returns the members.
    pub fn add_monitor(
        &mut self,
        monitored: NodeId,
        registry: &NodeRegistry,
        entropy: &Hash,
        now: Timestamp,
        config: &ManagerConfig,
    ) -> Result<Vec<NodeId>> {
        if self.groups.contains_key(&monitored) {
            return Err(ManagerError::invalid(format!(
                "node {} is already monitored",
                monitored
            )));
        }
        let draft = Self::draft_group(monitored, registry, entropy, config)?;
        let members = self.install(monitored, draft, entropy, now, config);
        info!("Monitor group for node {} formed: {:?}", monitored, members);
        Ok(members)
    }

    /// Replace the group of `monitored` and drop every record the old one issued.
    pub fn upgrade_monitor(
        &mut self,
        monitored: NodeId,
        registry: &NodeRegistry,
        entropy: &Hash,
        now: Timestamp,
        config: &ManagerConfig,
    ) -> Result<Vec<NodeId>> {
        let old_members = self
            .groups
            .get(&monitored)
            .ok_or_else(|| ManagerError::not_found(format!("monitor group of node {}", monitored)))?
            .members
            .clone();
        let draft = Self::draft_group(monitored, registry, entropy, config)?;

        for member in &old_members {
            self.drop_records(*member, monitored);
        }
        let members = self.install(monitored, draft, entropy, now, config);
        info!(
            "Monitor group for node {} upgraded to generation {}",
            monitored,
            self.generations.get(&monitored).copied().unwrap_or(0)
        );
        Ok(members)
    }

    /// Select the members of a new group. Touches no state.
    fn draft_group(
        monitored: NodeId,
        registry: &NodeRegistry,
        entropy: &Hash,
        config: &ManagerConfig,
    ) -> Result<GroupDraft> {
        let node = registry.require(monitored)?;
        if !node.is_active() {
            return Err(ManagerError::invalid(format!(
                "node {} is {}, cannot be monitored",
                monitored, node.status
            )));
        }

        let population: Vec<NodeId> = registry
            .active_ids()
            .into_iter()
            .filter(|id| *id != monitored)
            .collect();
        let group_seed = derive_seed(entropy, GROUP_PURPOSE, monitored);
        Ok(GroupDraft {
            members: select_group(&group_seed, &population, config.monitors_per_group),
            ip: node.endpoint.ip,
        })
    }

    fn install(
        &mut self,
        monitored: NodeId,
        draft: GroupDraft,
        entropy: &Hash,
        now: Timestamp,
        config: &ManagerConfig,
    ) -> Vec<NodeId> {
        let generation = {
            let counter = self.generations.entry(monitored).or_insert(0);
            *counter += 1;
            *counter
        };

        let time_seed = derive_seed(entropy, CHECK_TIME_PURPOSE, monitored);
        let window = config.check_window().max(1);
        for (i, member) in draft.members.iter().enumerate() {
            let due = now.saturating_add(draw(&time_seed, i as u64) % window);
            let record = CheckedRecord {
                monitor: *member,
                monitored,
                due,
                expires: due.saturating_add(config.verdict_ttl),
                ip: draft.ip,
                generation,
            };
            let pending = self.checked.entry(*member).or_default();
            pending.retain(|r| r.monitored != monitored);
            pending.push(record);
        }

        self.groups.insert(
            monitored,
            MonitorGroup {
                monitored,
                members: draft.members.clone(),
                formed_at: now,
                generation,
            },
        );
        self.phases.insert(monitored, MonitorPhase::Monitored);
        draft.members
    }

    /// Accept a verdict from `monitor` about `monitored`.
    pub fn submit_verdict(
        &mut self,
        monitor: NodeId,
        monitored: NodeId,
        verdict: Verdict,
        now: Timestamp,
        ledger: &mut VerdictLedger,
    ) -> Result<()> {
        let record = self
            .checked
            .get(&monitor)
            .and_then(|pending| pending.iter().find(|r| r.monitored == monitored))
            .copied()
            .ok_or_else(|| {
                ManagerError::unauthorized(format!(
                    "node {} has no pending check of node {}",
                    monitor, monitored
                ))
            })?;

        if !self.is_current(&record) {
            return Err(ManagerError::unauthorized(format!(
                "check of node {} by node {} belongs to a superseded group",
                monitored, monitor
            )));
        }
        if now < record.due {
            return Err(ManagerError::too_early(format!(
                "check of node {} is due at {}",
                monitored, record.due
            )));
        }
        if now >= record.expires {
            return Err(ManagerError::unauthorized(format!(
                "check of node {} expired at {}",
                monitored, record.expires
            )));
        }

        let current: Vec<(NodeId, u64)> = self
            .groups
            .values()
            .map(|g| (g.monitored, g.generation))
            .collect();
        if let Some(pending) = self.checked.get_mut(&monitor) {
            pending.retain(|r| {
                r.monitored != monitored
                    && current.contains(&(r.monitored, r.generation))
            });
            if pending.is_empty() {
                self.checked.remove(&monitor);
            }
        }

        ledger.record(monitored, verdict);
        self.last_verdict_at.insert(monitored, now);
        debug!(
            "Verdict on node {} from node {}: downtime {} latency {}",
            monitored, monitor, verdict.downtime, verdict.latency
        );
        Ok(())
    }

    /// Drop the group of `monitored`, its outstanding checks, and its own
    /// pending checks as a monitor.
    pub fn delete_monitor(&mut self, monitored: NodeId) -> Result<()> {
        let group = self.groups.remove(&monitored);
        let was_monitor = self.checked.remove(&monitored).is_some();
        if group.is_none() && !was_monitor {
            return Err(ManagerError::not_found(format!(
                "monitor state of node {}",
                monitored
            )));
        }

        if let Some(group) = &group {
            for member in &group.members {
                self.drop_records(*member, monitored);
            }
        }
        for other in self.groups.values_mut() {
            other.members.retain(|m| *m != monitored);
        }

        self.phases.insert(monitored, MonitorPhase::Removed);
        info!("Monitor state of node {} deleted", monitored);
        Ok(())
    }

    fn drop_records(&mut self, monitor: NodeId, monitored: NodeId) {
        if let Some(pending) = self.checked.get_mut(&monitor) {
            pending.retain(|r| r.monitored != monitored);
            if pending.is_empty() {
                self.checked.remove(&monitor);
            }
        }
    }

    fn is_current(&self, record: &CheckedRecord) -> bool {
        self.groups
            .get(&record.monitored)
            .map(|g| g.generation == record.generation && g.members.contains(&record.monitor))
            .unwrap_or(false)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn group(&self, monitored: NodeId) -> Option<&MonitorGroup> {
        self.groups.get(&monitored)
    }

    pub fn phase(&self, monitored: NodeId) -> Option<MonitorPhase> {
        self.phases.get(&monitored).copied()
    }

    /// Pending records of `monitor`, issue order
    pub fn checked_records(&self, monitor: NodeId) -> &[CheckedRecord] {
        self.checked.get(&monitor).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn checked_array(&self, monitor: NodeId) -> Vec<[u8; PACKED_LEN]> {
        self.checked_records(monitor)
            .iter()
            .map(|r| r.packed())
            .collect()
    }

    /// Every pending record that names `node` as monitor or monitored
    pub fn records_involving(&self, node: NodeId) -> Vec<CheckedRecord> {
        self.checked
            .values()
            .flatten()
            .filter(|r| r.monitor == node || r.monitored == node)
            .copied()
            .collect()
    }

    pub fn last_verdict_at(&self, monitored: NodeId) -> Option<Timestamp> {
        self.last_verdict_at.get(&monitored).copied()
    }
}
