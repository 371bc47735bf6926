pub mod bounty;
pub mod collab;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod pricing;
pub mod registry;
pub mod schains;
pub mod selector;
pub mod slots;
pub mod types;

pub use bounty::{bounty_after_penalties, BountyEngine};
pub use collab::{AccessControl, Custody, Directory, InMemoryCustody, OwnerAccess, Resolver};
pub use config::{Aggregation, ConfigError, ManagerConfig, PricingConfig};
pub use crypto::{name_hash, sha3};
pub use db::{Storage, StorageError};
pub use error::{ErrorKind, ManagerError, Result};
pub use manager::{Ledger, SchainManager, VerdictReport, SCHAINS_TREASURY};
pub use monitor::{MonitorPhase, MonitorService, Verdict, VerdictLedger, VerdictStats};
pub use pricing::PricingEngine;
pub use registry::{Node, NodeParams, NodeRegistry};
pub use schains::{schain_price, Schain, SchainRegistry};
pub use selector::{ChaChaSeed, HashChainSeed, SeedSource};
pub use slots::{SlotAllocator, SlotRef};
pub use types::*;
