//! Dynamic pricing
//!
//! The network price follows load towards an optimum, one step per elapsed
//! cooldown period:
//!
//! ```text
//! load   = 100 × Σ capacity/partOfNode / (capacity × active_nodes)
//! delta  = speed × price × |load − optimal| / 1e6
//! price' = price ∓ delta × ⌊(now − last) / cooldown⌋
//! ```
//!
//! A decrease that would go below zero is rejected with `Overflow` before
//! the floor is applied. A decrease that lands between zero and the floor
//! is clamped to the floor.

use crate::config::PricingConfig;
use crate::error::{ManagerError, Result};
use crate::registry::NodeRegistry;
use crate::slots::SlotAllocator;
use crate::types::{Amount, NodeStatus, Timestamp, PRICE_PRECISION};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingEngine {
    price: Amount,
    last_updated: Timestamp,
    total_nodes: u64,
}

impl PricingEngine {
    pub fn new(config: &PricingConfig, now: Timestamp) -> Self {
        Self {
            price: config.initial_price,
            last_updated: now,
            total_nodes: 0,
        }
    }

    /// Snapshot the active node count without touching the price.
    pub fn init_nodes(&mut self, active: u64) {
        self.total_nodes = active;
    }

    pub fn price(&self) -> Amount {
        self.price
    }

    pub fn last_updated(&self) -> Timestamp {
        self.last_updated
    }

    pub fn total_nodes(&self) -> u64 {
        self.total_nodes
    }

    /// Share of active capacity occupied by schains on non-left nodes, percent.
    pub fn load_percentage(registry: &NodeRegistry, slots: &SlotAllocator, capacity: u64) -> u64 {
        let active = registry.active_count();
        if active == 0 || capacity == 0 {
            return 0;
        }
        let occupied = slots.total_occupancy(capacity, |node| {
            registry
                .status(node)
                .map(|s| s != NodeStatus::Left)
                .unwrap_or(false)
        });
        ((occupied as u128 * 100) / (capacity as u128 * active as u128)) as u64
    }

    /// Move the price one step per elapsed cooldown period.
    pub fn adjust_price(
        &mut self,
        config: &PricingConfig,
        active: u64,
        load: u64,
        now: Timestamp,
    ) -> Result<Amount> {
        let until = self.last_updated.saturating_add(config.cooldown_secs);
        if now <= until {
            return Err(ManagerError::Cooldown { until });
        }
        if self.total_nodes == active {
            return Err(ManagerError::NoChange(format!(
                "active node count still {}",
                active
            )));
        }
        let periods = ((now - self.last_updated) / config.cooldown_secs) as Amount;
        let optimal = config.optimal_load_percentage;
        let previous = self.price;

        let price = if load < optimal {
            let total = step(config, previous, optimal - load)?
                .checked_mul(periods)
                .ok_or(ManagerError::Overflow("price change"))?;
            previous
                .checked_sub(total)
                .ok_or(ManagerError::Overflow("price decrease"))?
                .max(config.min_price)
        } else if load > optimal {
            let total = step(config, previous, load - optimal)?
                .checked_mul(periods)
                .ok_or(ManagerError::Overflow("price change"))?;
            previous
                .checked_add(total)
                .ok_or(ManagerError::Overflow("price increase"))?
        } else {
            previous
        };

        self.price = price;
        self.total_nodes = active;
        self.last_updated = now;

        info!(
            "Price adjusted {} -> {} (load {}%, {} nodes, {} periods)",
            previous, self.price, load, active, periods
        );
        Ok(self.price)
    }
}

fn step(config: &PricingConfig, price: Amount, distance: u64) -> Result<Amount> {
    config
        .adjustment_speed
        .checked_mul(price)
        .and_then(|v| v.checked_mul(distance as Amount))
        .map(|v| v / PRICE_PRECISION)
        .ok_or(ManagerError::Overflow("price change"))
}
