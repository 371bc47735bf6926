//! Manager configuration
//!
//! Loaded from a JSON file. Missing fields fall back to the protocol
//! defaults in [`crate::types`].

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a batch of verdicts collapses into one `(downtime, latency)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub initial_price: Amount,
    pub min_price: Amount,
    pub adjustment_speed: Amount,
    pub optimal_load_percentage: u64,
    pub cooldown_secs: u64,
    /// Divisor applied to the yearly schain price
    pub price_divisor: Amount,
    pub test_schain_price: Amount,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            initial_price: INITIAL_PRICE,
            min_price: MIN_PRICE,
            adjustment_speed: ADJUSTMENT_SPEED,
            optimal_load_percentage: OPTIMAL_LOAD_PERCENTAGE,
            cooldown_secs: PRICE_COOLDOWN_SECS,
            price_divisor: 1,
            test_schain_price: TEST_SCHAIN_PRICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionConfig {
    pub total: Amount,
    pub start: Timestamp,
    pub duration: u64,
}

impl Default for EmissionConfig {
    fn default() -> Self {
        Self {
            total: TOTAL_EMISSION,
            start: 0,
            duration: EMISSION_DURATION,
        }
    }
}

impl EmissionConfig {
    pub fn end(&self) -> Timestamp {
        self.start.saturating_add(self.duration)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub node_capacity: u64,
    pub monitors_per_group: usize,
    pub reward_period: u64,
    pub delta_period: u64,
    pub check_time: u64,
    pub allowable_latency: u64,
    /// Seconds a checked record stays open after its due time
    pub verdict_ttl: u64,
    pub aggregation: Aggregation,
    pub pricing: PricingConfig,
    pub emission: EmissionConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            node_capacity: NODE_CAPACITY,
            monitors_per_group: MONITORS_PER_GROUP,
            reward_period: REWARD_PERIOD,
            delta_period: DELTA_PERIOD,
            check_time: CHECK_TIME,
            allowable_latency: ALLOWABLE_LATENCY,
            verdict_ttl: REWARD_PERIOD,
            aggregation: Aggregation::Mean,
            pricing: PricingConfig::default(),
            emission: EmissionConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ManagerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.check_time == 0 {
            return fail("check_time must be positive");
        }
        if self.reward_period == 0 {
            return fail("reward_period must be positive");
        }
        if self.delta_period >= self.reward_period {
            return fail("delta_period must be shorter than reward_period");
        }
        if self.check_time > self.reward_period - self.delta_period {
            return fail("check_time longer than the reward window");
        }
        if self.node_capacity == 0 || !self.node_capacity.is_power_of_two() {
            return fail("node_capacity must be a power of two");
        }
        if self.monitors_per_group == 0 {
            return fail("monitors_per_group must be positive");
        }
        if self.verdict_ttl == 0 {
            return fail("verdict_ttl must be positive");
        }
        if self.pricing.min_price > self.pricing.initial_price {
            return fail("min_price above initial_price");
        }
        if self.pricing.cooldown_secs == 0 {
            return fail("pricing cooldown must be positive");
        }
        if self.pricing.price_divisor == 0 {
            return fail("price_divisor must be positive");
        }
        Ok(())
    }

    /// Checks that fit in one reward window
    pub fn normal_window_in_checks(&self) -> u64 {
        (self.reward_period - self.delta_period) / self.check_time
    }

    /// Checks of downtime tolerated before the bounty is cut
    pub fn normal_allowed_downtime(&self) -> u64 {
        self.normal_window_in_checks() / DOWNTIME_TOLERANCE_DIVISOR
    }

    /// Range of the randomized check offset inside an epoch
    pub fn check_window(&self) -> u64 {
        self.reward_period - self.delta_period
    }
}
