// Schain Manager — Coordinator
// Copyright (c) 2024-2026 Alejandro Montana
// Distributed under the MIT software license.

//! Coordinator
//!
//! Owns the world state ([`Ledger`]) and serializes every public operation
//! against it. Each operation runs on a draft copy of the ledger and is
//! committed only if every step succeeds, so a failure leaves no trace.
//! Custody calls are issued last, after all ledger steps have succeeded.

use crate::bounty::BountyEngine;
use crate::collab::{AccessControl, Custody, Resolver};
use crate::config::{ConfigError, ManagerConfig};
use crate::crypto::hash_to_u64;
use crate::error::{ErrorKind, ManagerError, Result};
use crate::monitor::{MonitorService, Verdict, VerdictLedger};
use crate::pricing::PricingEngine;
use crate::registry::{NodeParams, NodeRegistry};
use crate::schains::{schain_price, SchainRegistry};
use crate::selector::{derive_seed, select_group, SeedSource};
use crate::slots::SlotAllocator;
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Name under which the schain treasury is resolved
pub const SCHAINS_TREASURY: &str = "SchainsTreasury";

const SCHAIN_PURPOSE: &[u8] = b"schain";
const ROTATION_PURPOSE: &[u8] = b"rotation";

/// Complete world state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub nodes: NodeRegistry,
    pub slots: SlotAllocator,
    pub schains: SchainRegistry,
    pub monitors: MonitorService,
    pub verdicts: VerdictLedger,
    pub pricing: PricingEngine,
    pub bounty: BountyEngine,
    /// Seed chain state, advanced by every committed draw
    pub entropy: Hash,
}

impl Ledger {
    pub fn new(config: &ManagerConfig, genesis: Hash, now: Timestamp) -> Self {
        Self {
            nodes: NodeRegistry::new(),
            slots: SlotAllocator::new(),
            schains: SchainRegistry::new(),
            monitors: MonitorService::new(),
            verdicts: VerdictLedger::new(),
            pricing: PricingEngine::new(&config.pricing, now),
            bounty: BountyEngine::new(),
            entropy: genesis,
        }
    }

    /// Advance the seed chain and return the new entropy.
    fn draw_entropy(&mut self, seeds: &dyn SeedSource, now: Timestamp) -> Hash {
        self.entropy = seeds.next(&self.entropy, now);
        self.entropy
    }

    /// Move every schain off `node` where a replacement exists.
    /// Returns the number of schains moved.
    fn rotate_out(
        &mut self,
        node: NodeId,
        entropy: &Hash,
        capacity: u64,
    ) -> Result<usize> {
        let mut moved = 0;
        for id in self.slots.live_schains(node) {
            let Some(schain) = self.schains.get(&id) else {
                continue;
            };
            let share = capacity_share(capacity, schain.part_of_node);
            let eligible: Vec<NodeId> = self
                .nodes
                .active_ids()
                .into_iter()
                .filter(|n| !schain.nodes.contains(n))
                .filter(|n| self.slots.free_capacity(*n, capacity) >= share)
                .collect();

            let seed = derive_seed(entropy, ROTATION_PURPOSE, hash_to_u64(&id) ^ node);
            let Some(replacement) = select_group(&seed, &eligible, 1).first().copied() else {
                warn!(
                    "No replacement for node {} in schain {}",
                    node,
                    short_hex(&id)
                );
                continue;
            };
            self.schains
                .replace_node(&id, node, replacement, &mut self.slots)?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Move leaving nodes without live slots to Left.
    fn complete_exits(&mut self, candidates: &[NodeId], now: Timestamp) -> Result<()> {
        for node in candidates {
            if self.nodes.status(*node) == Some(NodeStatus::Leaving)
                && self.slots.live_count(*node) == 0
            {
                self.nodes.set_left(*node, now)?;
            }
        }
        Ok(())
    }

    fn remove_schain(&mut self, id: &SchainId, capacity: u64, now: Timestamp) -> Result<()> {
        let removed = self.schains.remove_schain(id, &mut self.slots, capacity)?;
        self.complete_exits(&removed.nodes, now)
    }
}

/// One entry of a monitor's report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictReport {
    pub to_node: NodeId,
    pub downtime: u64,
    pub latency: u64,
}

impl VerdictReport {
    fn verdict(&self) -> Verdict {
        Verdict {
            downtime: self.downtime,
            latency: self.latency,
        }
    }
}

pub struct SchainManager<C: Custody> {
    config: ManagerConfig,
    ledger: Ledger,
    custody: C,
    resolver: Box<dyn Resolver>,
    access: Box<dyn AccessControl>,
    seeds: Box<dyn SeedSource>,
}

impl<C: Custody> SchainManager<C> {
    pub fn new(
        config: ManagerConfig,
        custody: C,
        resolver: Box<dyn Resolver>,
        access: Box<dyn AccessControl>,
        seeds: Box<dyn SeedSource>,
        now: Timestamp,
    ) -> std::result::Result<Self, ConfigError> {
        let ledger = Ledger::new(&config, seeds.genesis(), now);
        Self::with_ledger(config, ledger, custody, resolver, access, seeds)
    }

    /// Resume from a stored ledger.
    pub fn with_ledger(
        config: ManagerConfig,
        ledger: Ledger,
        custody: C,
        resolver: Box<dyn Resolver>,
        access: Box<dyn AccessControl>,
        seeds: Box<dyn SeedSource>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            custody,
            resolver,
            access,
            seeds,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    fn commit<T>(&mut self, op: &str, draft: Ledger, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.ledger = draft;
                Ok(value)
            }
            Err(e) => {
                debug!("{} rejected: {}", op, e);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Register a node and form its monitor group.
    pub fn create_node(
        &mut self,
        caller: &Address,
        params: NodeParams,
        now: Timestamp,
    ) -> Result<NodeId> {
        let mut draft = self.ledger.clone();
        let config = &self.config;
        let seeds = self.seeds.as_ref();

        let result = (|| -> Result<NodeId> {
            if *caller != params.owner {
                return Err(ManagerError::unauthorized("caller must own the node it registers"));
            }
            let id = draft.nodes.register(params, now)?;
            let entropy = draft.draw_entropy(seeds, now);
            draft
                .monitors
                .add_monitor(id, &draft.nodes, &entropy, now, config)?;
            Ok(id)
        })();
        self.commit("create_node", draft, result)
    }

    /// Start (or finish) leaving. Schains hosted by the node move to
    /// replacement nodes; the node is Left once it hosts none. Returns the
    /// resulting status.
    pub fn node_exit(&mut self, caller: &Address, node: NodeId, now: Timestamp) -> Result<NodeStatus> {
        let mut draft = self.ledger.clone();
        let access = &self.access;
        let seeds = self.seeds.as_ref();
        let capacity = self.config.node_capacity;

        let result = (|| -> Result<NodeStatus> {
            access.require_owner_of_node(caller, draft.nodes.require(node)?)?;
            draft.nodes.set_leaving(node)?;
            forget_monitor(&mut draft.monitors, node)?;
            draft.verdicts.remove_all(node);
            if draft.slots.live_count(node) > 0 {
                let entropy = draft.draw_entropy(seeds, now);
                let moved = draft.rotate_out(node, &entropy, capacity)?;
                debug!("Node {} handed over {} schains", node, moved);
            }
            draft.complete_exits(&[node], now)?;
            let status = draft.nodes.require(node)?.status;
            info!("Node {} exit: {}", node, status);
            Ok(status)
        })();
        self.commit("node_exit", draft, result)
    }

    pub fn set_node_in_maintenance(&mut self, caller: &Address, node: NodeId) -> Result<()> {
        let mut draft = self.ledger.clone();
        let access = &self.access;

        let result = (|| -> Result<()> {
            access.require_owner_of_node(caller, draft.nodes.require(node)?)?;
            draft.nodes.set_in_maintenance(node)?;
            forget_monitor(&mut draft.monitors, node)
        })();
        self.commit("set_node_in_maintenance", draft, result)
    }

    pub fn remove_node_from_maintenance(
        &mut self,
        caller: &Address,
        node: NodeId,
        now: Timestamp,
    ) -> Result<()> {
        let mut draft = self.ledger.clone();
        let access = &self.access;
        let config = &self.config;
        let seeds = self.seeds.as_ref();

        let result = (|| -> Result<()> {
            access.require_owner_of_node(caller, draft.nodes.require(node)?)?;
            draft.nodes.remove_from_maintenance(node)?;
            let entropy = draft.draw_entropy(seeds, now);
            draft
                .monitors
                .add_monitor(node, &draft.nodes, &entropy, now, config)?;
            Ok(())
        })();
        self.commit("remove_node_from_maintenance", draft, result)
    }

    // =========================================================================
    // Schains
    // =========================================================================

    /// Pay for and place a schain. `type_code` is 1..=5.
    pub fn create_schain(
        &mut self,
        caller: &Address,
        name: &str,
        type_code: u8,
        lifetime: u64,
        deposit: Amount,
        now: Timestamp,
    ) -> Result<SchainId> {
        let mut draft = self.ledger.clone();
        let config = &self.config;
        let resolver = &self.resolver;
        let seeds = self.seeds.as_ref();
        let custody = &mut self.custody;

        let result = (|| -> Result<SchainId> {
            let schain_type = SchainType::from_code(type_code)
                .ok_or_else(|| ManagerError::invalid(format!("unknown schain type {}", type_code)))?;
            let price = schain_price(&config.pricing, draft.pricing.price(), schain_type, lifetime)?;
            if deposit < price {
                return Err(ManagerError::invalid(format!(
                    "deposit {} below price {}",
                    deposit, price
                )));
            }
            let treasury = resolver
                .resolve(SCHAINS_TREASURY)
                .ok_or_else(|| ManagerError::not_found(SCHAINS_TREASURY))?;

            let id = draft
                .schains
                .initialize_schain(name, *caller, lifetime, deposit, now)?;
            draft.schains.set_schain_index(&id)?;

            let part = schain_type.part_of_node();
            let share = capacity_share(config.node_capacity, part);
            let eligible: Vec<NodeId> = draft
                .nodes
                .active_ids()
                .into_iter()
                .filter(|n| draft.slots.free_capacity(*n, config.node_capacity) >= share)
                .collect();
            let needed = schain_type.number_of_nodes();
            if eligible.len() < needed {
                return Err(ManagerError::invalid(format!(
                    "{} eligible nodes, schain needs {}",
                    eligible.len(),
                    needed
                )));
            }

            let entropy = draft.draw_entropy(seeds, now);
            let seed = derive_seed(&entropy, SCHAIN_PURPOSE, hash_to_u64(&id));
            let group = select_group(&seed, &eligible, needed);
            draft
                .schains
                .create_group(&id, &group, part, &mut draft.slots, config.node_capacity)?;

            custody.debit(caller, deposit)?;
            if let Err(e) = custody.credit(&treasury, deposit) {
                if let Err(refund) = custody.credit(caller, deposit) {
                    warn!("Refund of {} failed: {}", deposit, refund);
                }
                return Err(e);
            }

            info!(
                "Schain {} created on {} nodes (part {}, deposit {})",
                name,
                group.len(),
                part,
                deposit
            );
            Ok(id)
        })();
        self.commit("create_schain", draft, result)
    }

    /// Owner deletes its schain.
    pub fn delete_schain(&mut self, caller: &Address, name: &str, now: Timestamp) -> Result<()> {
        let mut draft = self.ledger.clone();
        let capacity = self.config.node_capacity;

        let result = (|| -> Result<()> {
            let id = draft
                .schains
                .by_name(name)
                .map(|s| s.id)
                .ok_or_else(|| ManagerError::not_found(format!("schain {}", name)))?;
            if !draft.schains.is_owner(caller, &id) {
                return Err(ManagerError::unauthorized(format!(
                    "caller does not own schain {}",
                    name
                )));
            }
            draft.remove_schain(&id, capacity, now)
        })();
        self.commit("delete_schain", draft, result)
    }

    /// Admin deletes any schain.
    pub fn delete_schain_by_root(&mut self, caller: &Address, name: &str, now: Timestamp) -> Result<()> {
        let mut draft = self.ledger.clone();
        let capacity = self.config.node_capacity;
        let access = &self.access;

        let result = (|| -> Result<()> {
            access.require_admin(caller)?;
            let id = draft
                .schains
                .by_name(name)
                .map(|s| s.id)
                .ok_or_else(|| ManagerError::not_found(format!("schain {}", name)))?;
            draft.remove_schain(&id, capacity, now)
        })();
        self.commit("delete_schain_by_root", draft, result)
    }

    /// Remove every schain whose lifetime has passed. Returns the removed ids.
    pub fn remove_expired_schains(&mut self, now: Timestamp) -> Result<Vec<SchainId>> {
        let mut draft = self.ledger.clone();
        let capacity = self.config.node_capacity;

        let result = (|| -> Result<Vec<SchainId>> {
            let expired = draft.schains.expired(now);
            for id in &expired {
                draft.remove_schain(id, capacity, now)?;
            }
            Ok(expired)
        })();
        self.commit("remove_expired_schains", draft, result)
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    pub fn send_verdict(
        &mut self,
        caller: &Address,
        monitor: NodeId,
        report: VerdictReport,
        now: Timestamp,
    ) -> Result<()> {
        self.send_verdicts(caller, monitor, &[report], now)
    }

    /// Submit a batch. Either every verdict is accepted or none is.
    pub fn send_verdicts(
        &mut self,
        caller: &Address,
        monitor: NodeId,
        reports: &[VerdictReport],
        now: Timestamp,
    ) -> Result<()> {
        let mut draft = self.ledger.clone();
        let access = &self.access;

        let result = (|| -> Result<()> {
            access.require_node_operator(caller, draft.nodes.require(monitor)?)?;
            for report in reports {
                draft.monitors.submit_verdict(
                    monitor,
                    report.to_node,
                    report.verdict(),
                    now,
                    &mut draft.verdicts,
                )?;
            }
            Ok(())
        })();
        self.commit("send_verdicts", draft, result)
    }

    // =========================================================================
    // Bounty
    // =========================================================================

    /// Aggregate the epoch's verdicts, pay the owner and re-form the group.
    pub fn get_bounty(&mut self, caller: &Address, node: NodeId, now: Timestamp) -> Result<Amount> {
        let mut draft = self.ledger.clone();
        let config = &self.config;
        let access = &self.access;
        let seeds = self.seeds.as_ref();
        let custody = &mut self.custody;

        let result = (|| -> Result<Amount> {
            let owner = {
                let entry = draft.nodes.require(node)?;
                access.require_owner_of_node(caller, entry)?;
                entry.owner
            };

            let normal = draft
                .bounty
                .calculate_normal_bounty(config, draft.nodes.active_count(), now);
            let stats = draft.verdicts.aggregate(node, config.aggregation);
            let amount = draft
                .bounty
                .compute_bounty(&mut draft.nodes, node, stats, normal, now, config)?;
            draft.bounty.record_payout(node, amount, now)?;
            let entropy = draft.draw_entropy(seeds, now);

            match draft
                .monitors
                .upgrade_monitor(node, &draft.nodes, &entropy, now, config)
            {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    draft
                        .monitors
                        .add_monitor(node, &draft.nodes, &entropy, now, config)?;
                }
                other => {
                    other?;
                }
            }

            if amount > 0 {
                custody.credit(&owner, amount)?;
            }
            Ok(amount)
        })();
        self.commit("get_bounty", draft, result)
    }

    pub fn calculate_normal_bounty(&self, now: Timestamp) -> Amount {
        self.ledger.bounty.calculate_normal_bounty(
            &self.config,
            self.ledger.nodes.active_count(),
            now,
        )
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    /// Snapshot the active node count for the next price adjustment.
    pub fn init_nodes(&mut self, caller: &Address) -> Result<u64> {
        self.access.require_admin(caller)?;
        let active = self.ledger.nodes.active_count();
        self.ledger.pricing.init_nodes(active);
        Ok(active)
    }

    pub fn adjust_price(&mut self, now: Timestamp) -> Result<Amount> {
        let mut draft = self.ledger.clone();
        let load = self.load_percentage();
        let active = draft.nodes.active_count();
        let result = draft
            .pricing
            .adjust_price(&self.config.pricing, active, load, now);
        self.commit("adjust_price", draft, result)
    }

    pub fn load_percentage(&self) -> u64 {
        PricingEngine::load_percentage(
            &self.ledger.nodes,
            &self.ledger.slots,
            self.config.node_capacity,
        )
    }

    pub fn price(&self) -> Amount {
        self.ledger.pricing.price()
    }

    /// Deposit currently required for a schain of `type_code`
    pub fn schain_price(&self, type_code: u8, lifetime: u64) -> Result<Amount> {
        let schain_type = SchainType::from_code(type_code)
            .ok_or_else(|| ManagerError::invalid(format!("unknown schain type {}", type_code)))?;
        schain_price(&self.config.pricing, self.price(), schain_type, lifetime)
    }
}

/// Drop monitor state of a node that stopped being active.
fn forget_monitor(monitors: &mut MonitorService, node: NodeId) -> Result<()> {
    match monitors.delete_monitor(node) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
