// Schain Manager — Core Types and Constants
// Copyright (c) 2024-2026 Alejandro Montana
// Distributed under the MIT software license.

//! Identifiers, lifecycle states and protocol constants shared by every
//! component.
//!
//! # Units
//!
//! | Quantity  | Type        | Unit                              |
//! |-----------|-------------|-----------------------------------|
//! | time      | `Timestamp` | seconds, supplied by the caller   |
//! | price     | `Amount`    | token base units per node-year    |
//! | capacity  | `u64`       | capacity units (node = 128)       |
//! | latency   | `u64`       | as reported by monitors           |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// SHA3-256 output
pub type Hash = [u8; 32];

/// Account address (owner of nodes and schains)
pub type Address = [u8; 20];

/// Node index in the registry. Assigned sequentially, never reused.
pub type NodeId = u64;

/// SHA3-256 of the schain name
pub type SchainId = Hash;

/// Seconds on the externally supplied monotonic clock
pub type Timestamp = u64;

/// Token amount in base units
pub type Amount = u128;

// =============================================================================
// CAPACITY
// =============================================================================

/// Capacity of one node in capacity units.
/// A schain with `part_of_node = p` consumes `NODE_CAPACITY / p` on each of its nodes.
pub const NODE_CAPACITY: u64 = 128;

// =============================================================================
// MONITORING
// =============================================================================

/// Monitors per group. Smaller populations yield the whole population.
pub const MONITORS_PER_GROUP: usize = 24;

/// Epoch length (seconds between bounty claims).
pub const REWARD_PERIOD: u64 = 3600;

/// Grace window after the reward period before lateness is charged.
pub const DELTA_PERIOD: u64 = 300;

/// Length of one monitoring check. Downtime is reported in checks.
pub const CHECK_TIME: u64 = 300;

/// Latency above this scales the bounty down proportionally.
pub const ALLOWABLE_LATENCY: u64 = 150_000;

/// `normal_window_in_checks / DOWNTIME_TOLERANCE_DIVISOR` checks of downtime are free.
pub const DOWNTIME_TOLERANCE_DIVISOR: u64 = 30;

// =============================================================================
// PRICING
// =============================================================================

pub const INITIAL_PRICE: Amount = 5_000_000;
pub const MIN_PRICE: Amount = 1_000_000;
pub const ADJUSTMENT_SPEED: Amount = 1000;
pub const OPTIMAL_LOAD_PERCENTAGE: u64 = 80;
pub const PRICE_COOLDOWN_SECS: u64 = 60;

/// Fixed-point denominator of the price delta formula.
pub const PRICE_PRECISION: Amount = 1_000_000;

// =============================================================================
// EMISSION
// =============================================================================

pub const SECONDS_PER_YEAR: u64 = 31_622_400;

/// Default emission: 1e9 tokens with 18 decimals over three years.
pub const TOTAL_EMISSION: Amount = 1_000_000_000 * 1_000_000_000_000_000_000;
pub const EMISSION_DURATION: u64 = 3 * SECONDS_PER_YEAR;

/// Flat price of a test schain (partOfNode = 0).
pub const TEST_SCHAIN_PRICE: Amount = 1_000_000_000_000_000_000;

// =============================================================================
// NODE LIFECYCLE
// =============================================================================

/// Node status.
///
/// ```text
/// Active ──▶ Leaving ──▶ Left
///   ▲ │         ▲
///   │ ▼         │
/// InMaintenance ┘
/// ```
///
/// Left is terminal. The node is kept as a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Leaving,
    Left,
    InMaintenance,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Leaving => "leaving",
            NodeStatus::Left => "left",
            NodeStatus::InMaintenance => "in-maintenance",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network endpoints of a node. `(ip, port)` is unique across the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub public_ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn key(&self) -> (Ipv4Addr, u16) {
        (self.ip, self.port)
    }
}

// =============================================================================
// SCHAIN TYPES
// =============================================================================

/// Schain size classes. Numeric codes match the on-wire request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchainType {
    /// 1/128 of a node on 16 nodes
    Small,
    /// 1/8 of a node on 16 nodes
    Medium,
    /// whole node on 16 nodes
    Large,
    /// no capacity on 2 nodes
    Test,
    /// 1/4 of a node on 4 nodes
    MediumTest,
}

impl SchainType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SchainType::Small),
            2 => Some(SchainType::Medium),
            3 => Some(SchainType::Large),
            4 => Some(SchainType::Test),
            5 => Some(SchainType::MediumTest),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            SchainType::Small => 1,
            SchainType::Medium => 2,
            SchainType::Large => 3,
            SchainType::Test => 4,
            SchainType::MediumTest => 5,
        }
    }

    /// Reciprocal of the node fraction consumed. 0 = consumes nothing.
    pub fn part_of_node(&self) -> u8 {
        match self {
            SchainType::Small => 128,
            SchainType::Medium => 8,
            SchainType::Large => 1,
            SchainType::Test => 0,
            SchainType::MediumTest => 4,
        }
    }

    pub fn number_of_nodes(&self) -> usize {
        match self {
            SchainType::Small | SchainType::Medium | SchainType::Large => 16,
            SchainType::Test => 2,
            SchainType::MediumTest => 4,
        }
    }
}

/// Capacity consumed on one node by a schain with the given part.
#[inline]
pub fn capacity_share(capacity: u64, part_of_node: u8) -> u64 {
    if part_of_node == 0 {
        0
    } else {
        capacity / part_of_node as u64
    }
}

/// Short hex form for logs
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schain_type_codes_roundtrip() {
        for code in 1..=5u8 {
            let t = SchainType::from_code(code).unwrap();
            assert_eq!(t.code(), code);
        }
        assert!(SchainType::from_code(0).is_none());
        assert!(SchainType::from_code(6).is_none());
    }

    #[test]
    fn test_capacity_share() {
        assert_eq!(capacity_share(NODE_CAPACITY, 1), 128);
        assert_eq!(capacity_share(NODE_CAPACITY, 2), 64);
        assert_eq!(capacity_share(NODE_CAPACITY, 128), 1);
        assert_eq!(capacity_share(NODE_CAPACITY, 0), 0);
    }

    #[test]
    fn test_parts_are_powers_of_two() {
        for code in 1..=5u8 {
            let part = SchainType::from_code(code).unwrap().part_of_node();
            assert!(part == 0 || part.is_power_of_two());
        }
    }
}
