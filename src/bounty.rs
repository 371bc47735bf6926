//! Epoch bounty
//!
//! ```text
//! normal     = (emission − emitted) / remaining_epochs / active_nodes
//! lateness   = max(0, now − (last_reward + reward + delta)) / check_time
//! effective  = downtime + lateness
//! bounty     = normal − normal × effective / window      if effective > allowed
//! bounty     = bounty × allowable / latency              if latency > allowable
//! ```
//!
//! Every step saturates at zero. A node can claim once per reward period.

use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::monitor::VerdictStats;
use crate::registry::NodeRegistry;
use crate::types::{Amount, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BountyEngine {
    emitted: Amount,
    last_bounty_at: BTreeMap<NodeId, Timestamp>,
}

impl BountyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Amount {
        self.emitted
    }

    pub fn last_bounty_at(&self, node: NodeId) -> Option<Timestamp> {
        self.last_bounty_at.get(&node).copied()
    }

    /// Base per-node reward for the current epoch
    pub fn calculate_normal_bounty(
        &self,
        config: &ManagerConfig,
        active_nodes: u64,
        now: Timestamp,
    ) -> Amount {
        let end = config.emission.end();
        let from = now.max(config.emission.start);
        if from >= end {
            return 0;
        }
        let remaining = config.emission.total.saturating_sub(self.emitted);
        let epochs = (end - from).div_ceil(config.reward_period).max(1);
        remaining / epochs as Amount / active_nodes.max(1) as Amount
    }

    /// Bounty earned by `node` for the epoch ending at `now`. Moves the
    /// node's reward date to `now`.
    pub fn compute_bounty(
        &mut self,
        registry: &mut NodeRegistry,
        node: NodeId,
        stats: VerdictStats,
        normal: Amount,
        now: Timestamp,
        config: &ManagerConfig,
    ) -> Result<Amount> {
        let entry = registry.require(node)?;
        if !entry.is_active() {
            return Err(ManagerError::invalid(format!(
                "node {} is {}, no bounty",
                node, entry.status
            )));
        }
        let last_reward = entry.last_reward_date;
        if now < entry.next_reward_date(config.reward_period) {
            return Err(ManagerError::too_early(format!(
                "node {} can claim at {}",
                node,
                entry.next_reward_date(config.reward_period)
            )));
        }

        let bounty = bounty_after_penalties(normal, stats, last_reward, now, config);
        registry.set_last_reward_date(node, now)?;
        Ok(bounty)
    }

    /// Book a credited bounty against the emission.
    pub fn record_payout(&mut self, node: NodeId, amount: Amount, now: Timestamp) -> Result<()> {
        self.emitted = self
            .emitted
            .checked_add(amount)
            .ok_or(ManagerError::Overflow("emitted bounty"))?;
        self.last_bounty_at.insert(node, now);
        info!("Bounty {} paid to node {}", amount, node);
        Ok(())
    }
}

/// Apply downtime, lateness and latency penalties to `normal`.
pub fn bounty_after_penalties(
    normal: Amount,
    stats: VerdictStats,
    last_reward: Timestamp,
    now: Timestamp,
    config: &ManagerConfig,
) -> Amount {
    let last_chance = last_reward
        .saturating_add(config.reward_period)
        .saturating_add(config.delta_period);
    let lateness = now.saturating_sub(last_chance) / config.check_time;
    let effective = stats.downtime.saturating_add(lateness);

    let mut bounty = normal;
    if effective > config.normal_allowed_downtime() {
        let window = config.normal_window_in_checks().max(1);
        bounty = if effective >= window {
            0
        } else {
            normal - scale_down(normal, effective, window)
        };
    }

    if bounty > 0 && stats.latency > config.allowable_latency {
        bounty = scale_down(bounty, config.allowable_latency, stats.latency);
    }
    bounty
}

/// `⌊value × num / den⌋` for `num < den` without a wide intermediate
fn scale_down(value: Amount, num: u64, den: u64) -> Amount {
    let (num, den) = (num as Amount, den as Amount);
    value / den * num + value % den * num / den
}
