//! Schain registry
//!
//! Tracks schain metadata, owner lists and node groups. Slot placement goes
//! through [`SlotAllocator`] so the hole discipline stays in one place.

use crate::config::PricingConfig;
use crate::crypto::name_hash;
use crate::error::{ManagerError, Result};
use crate::slots::{SlotAllocator, SlotRef};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schain {
    pub id: SchainId,
    pub name: String,
    pub owner: Address,
    /// Reciprocal of the node fraction consumed. 0 = none.
    pub part_of_node: u8,
    pub lifetime: u64,
    pub start_date: Timestamp,
    pub deposit: Amount,
    /// Position in the owner's schain list
    pub index_in_owner_list: usize,
    pub nodes: Vec<NodeId>,
}

impl Schain {
    pub fn expires_at(&self) -> Timestamp {
        self.start_date.saturating_add(self.lifetime)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchainRegistry {
    schains: BTreeMap<SchainId, Schain>,
    /// Creation order
    order: Vec<SchainId>,
    by_owner: BTreeMap<Address, Vec<SchainId>>,
    /// Σ nodes × capacity / partOfNode over all groups
    sum_of_schains_resources: u64,
}

impl SchainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize_schain(
        &mut self,
        name: &str,
        owner: Address,
        lifetime: u64,
        deposit: Amount,
        now: Timestamp,
    ) -> Result<SchainId> {
        if name.is_empty() {
            return Err(ManagerError::invalid("schain name is empty"));
        }
        if !self.is_name_available(name) {
            return Err(ManagerError::invalid(format!("schain name {} is taken", name)));
        }

        let id = name_hash(name);
        self.schains.insert(
            id,
            Schain {
                id,
                name: name.to_string(),
                owner,
                part_of_node: 0,
                lifetime,
                start_date: now,
                deposit,
                index_in_owner_list: 0,
                nodes: Vec::new(),
            },
        );
        self.order.push(id);
        Ok(id)
    }

    /// Append the schain to its owner's list.
    pub fn set_schain_index(&mut self, id: &SchainId) -> Result<usize> {
        let schain = self.schain_mut(id)?;
        let owner = schain.owner;
        let list = self.by_owner.entry(owner).or_default();
        if list.contains(id) {
            return Err(ManagerError::invalid("schain already indexed for owner"));
        }
        list.push(*id);
        let index = list.len() - 1;
        self.schain_mut(id)?.index_in_owner_list = index;
        Ok(index)
    }

    /// Place the schain on `nodes`, one slot each.
    pub fn create_group(
        &mut self,
        id: &SchainId,
        nodes: &[NodeId],
        part_of_node: u8,
        slots: &mut SlotAllocator,
        capacity: u64,
    ) -> Result<()> {
        let schain = self.schain_mut(id)?;
        if !schain.nodes.is_empty() {
            return Err(ManagerError::invalid("schain group already exists"));
        }
        schain.part_of_node = part_of_node;
        schain.nodes = nodes.to_vec();

        let slot = SlotRef {
            schain: *id,
            part_of_node,
        };
        for node in nodes {
            slots.assign(*node, slot);
        }

        let share = capacity_share(capacity, part_of_node);
        self.sum_of_schains_resources = (nodes.len() as u64)
            .checked_mul(share)
            .and_then(|r| self.sum_of_schains_resources.checked_add(r))
            .ok_or(ManagerError::Overflow("schain resources"))?;
        Ok(())
    }

    pub fn change_lifetime(&mut self, id: &SchainId, lifetime: u64, deposit: Amount) -> Result<()> {
        let schain = self.schain_mut(id)?;
        schain.lifetime = schain
            .lifetime
            .checked_add(lifetime)
            .ok_or(ManagerError::Overflow("schain lifetime"))?;
        schain.deposit = schain
            .deposit
            .checked_add(deposit)
            .ok_or(ManagerError::Overflow("schain deposit"))?;
        Ok(())
    }

    /// Move the schain's slot from `old` to `new`, keeping the group position.
    pub fn replace_node(
        &mut self,
        id: &SchainId,
        old: NodeId,
        new: NodeId,
        slots: &mut SlotAllocator,
    ) -> Result<()> {
        let schain = self.schain_mut(id)?;
        if schain.nodes.contains(&new) {
            return Err(ManagerError::invalid(format!(
                "node {} already hosts schain {}",
                new, schain.name
            )));
        }
        let at = schain
            .nodes
            .iter()
            .position(|n| *n == old)
            .ok_or_else(|| {
                ManagerError::not_found(format!("node {} in group of {}", old, schain.name))
            })?;

        slots.release_schain(old, id)?;
        slots.assign(
            new,
            SlotRef {
                schain: *id,
                part_of_node: schain.part_of_node,
            },
        );
        schain.nodes[at] = new;
        info!("Schain {} moved from node {} to node {}", schain.name, old, new);
        Ok(())
    }

    /// Drop the schain, release its slots and compact the owner list.
    pub fn remove_schain(
        &mut self,
        id: &SchainId,
        slots: &mut SlotAllocator,
        capacity: u64,
    ) -> Result<Schain> {
        let schain = self
            .schains
            .remove(id)
            .ok_or_else(|| ManagerError::not_found(format!("schain {}", short_hex(id))))?;

        for node in &schain.nodes {
            slots.release_schain(*node, id)?;
        }

        let share = capacity_share(capacity, schain.part_of_node);
        self.sum_of_schains_resources = self
            .sum_of_schains_resources
            .saturating_sub(share * schain.nodes.len() as u64);
        self.order.retain(|s| s != id);

        if let Some(list) = self.by_owner.get_mut(&schain.owner) {
            list.retain(|s| s != id);
            for (index, other) in list.iter().enumerate() {
                if let Some(entry) = self.schains.get_mut(other) {
                    entry.index_in_owner_list = index;
                }
            }
            if list.is_empty() {
                self.by_owner.remove(&schain.owner);
            }
        }

        info!("Schain {} removed", schain.name);
        Ok(schain)
    }

    fn schain_mut(&mut self, id: &SchainId) -> Result<&mut Schain> {
        self.schains
            .get_mut(id)
            .ok_or_else(|| ManagerError::not_found(format!("schain {}", short_hex(id))))
    }

    pub fn get(&self, id: &SchainId) -> Option<&Schain> {
        self.schains.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Schain> {
        self.schains.get(&name_hash(name))
    }

    pub fn is_name_available(&self, name: &str) -> bool {
        !self.schains.contains_key(&name_hash(name))
    }

    /// True once `now` is past `start + lifetime`
    pub fn is_time_expired(&self, id: &SchainId, now: Timestamp) -> Result<bool> {
        self.get(id)
            .map(|s| s.expires_at() < now)
            .ok_or_else(|| ManagerError::not_found(format!("schain {}", short_hex(id))))
    }

    pub fn is_owner(&self, owner: &Address, id: &SchainId) -> bool {
        self.get(id).map(|s| s.owner == *owner).unwrap_or(false)
    }

    pub fn expired(&self, now: Timestamp) -> Vec<SchainId> {
        self.order
            .iter()
            .filter(|id| self.get(id).map(|s| s.expires_at() < now).unwrap_or(false))
            .copied()
            .collect()
    }

    pub fn schain_ids(&self) -> &[SchainId] {
        &self.order
    }

    pub fn schain_ids_of_owner(&self, owner: &Address) -> &[SchainId] {
        self.by_owner.get(owner).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn nodes_in_group(&self, id: &SchainId) -> &[NodeId] {
        self.get(id).map(|s| s.nodes.as_slice()).unwrap_or(&[])
    }

    pub fn sum_of_schains_resources(&self) -> u64 {
        self.sum_of_schains_resources
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Deposit required for a schain of `schain_type` living `lifetime` seconds
///
/// ```text
/// price × nodes × lifetime / (SECONDS_PER_YEAR × partOfNode × divisor)
/// ```
///
/// Test schains (partOfNode = 0) cost a flat `test_schain_price`.
pub fn schain_price(
    pricing: &PricingConfig,
    price: Amount,
    schain_type: SchainType,
    lifetime: u64,
) -> Result<Amount> {
    let part = schain_type.part_of_node() as Amount;
    if part == 0 {
        return Ok(pricing.test_schain_price);
    }
    let up = price
        .checked_mul(schain_type.number_of_nodes() as Amount)
        .and_then(|v| v.checked_mul(lifetime as Amount))
        .ok_or(ManagerError::Overflow("schain price"))?;
    let down = (SECONDS_PER_YEAR as Amount)
        .checked_mul(part)
        .and_then(|v| v.checked_mul(pricing.price_divisor))
        .ok_or(ManagerError::Overflow("schain price"))?;
    Ok(up / down)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const HOLDER: Address = [7; 20];

    fn registry_with_test_schain() -> (SchainRegistry, SchainId) {
        let mut reg = SchainRegistry::new();
        let id = reg.initialize_schain("TestSchain", HOLDER, 5, 5, 100).unwrap();
        (reg, id)
    }

    #[test]
    fn test_initialize_schain() {
        let (reg, id) = registry_with_test_schain();
        let schain = reg.get(&id).unwrap();
        assert_eq!(schain.name, "TestSchain");
        assert_eq!(schain.owner, HOLDER);
        assert_eq!(schain.lifetime, 5);
        assert_eq!(schain.deposit, 5);
        assert_eq!(reg.schain_ids(), &[id]);
    }

    #[test]
    fn test_name_availability() {
        let (mut reg, _) = registry_with_test_schain();
        assert!(!reg.is_name_available("TestSchain"));
        assert!(reg.is_name_available("D2WroteThisTest"));
        let err = reg.initialize_schain("TestSchain", HOLDER, 1, 1, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_set_schain_index() {
        let (mut reg, id) = registry_with_test_schain();
        assert_eq!(reg.set_schain_index(&id).unwrap(), 0);
        assert_eq!(reg.get(&id).unwrap().index_in_owner_list, 0);
        assert_eq!(reg.schain_ids_of_owner(&HOLDER), &[id]);
        assert!(reg.schain_ids_of_owner(&[1; 20]).is_empty());
    }

    #[test]
    fn test_create_group_accounts_resources() {
        let (mut reg, id) = registry_with_test_schain();
        let mut slots = SlotAllocator::new();
        reg.create_group(&id, &[0], 2, &mut slots, NODE_CAPACITY).unwrap();
        assert_eq!(reg.get(&id).unwrap().part_of_node, 2);
        assert_eq!(reg.sum_of_schains_resources(), 64);
        assert_eq!(reg.nodes_in_group(&id), &[0]);
        assert_eq!(slots.live_schains(0), vec![id]);
    }

    #[test]
    fn test_change_lifetime() {
        let (mut reg, id) = registry_with_test_schain();
        reg.change_lifetime(&id, 7, 8).unwrap();
        let schain = reg.get(&id).unwrap();
        assert_eq!(schain.lifetime, 12);
        assert_eq!(schain.deposit, 13);
    }

    #[test]
    fn test_is_time_expired() {
        let (reg, id) = registry_with_test_schain();
        assert!(!reg.is_time_expired(&id, 105).unwrap());
        assert!(reg.is_time_expired(&id, 106).unwrap());
        assert_eq!(reg.expired(106), vec![id]);
        assert!(reg.is_time_expired(&[0; 32], 0).is_err());
    }

    #[test]
    fn test_is_owner() {
        let (reg, id) = registry_with_test_schain();
        assert!(reg.is_owner(&HOLDER, &id));
        assert!(!reg.is_owner(&[1; 20], &id));
    }

    #[test]
    fn test_remove_schain_releases_slots_and_compacts_owner_list() {
        let mut reg = SchainRegistry::new();
        let mut slots = SlotAllocator::new();
        let a = reg.initialize_schain("a", HOLDER, 10, 0, 0).unwrap();
        let b = reg.initialize_schain("b", HOLDER, 10, 0, 0).unwrap();
        reg.set_schain_index(&a).unwrap();
        reg.set_schain_index(&b).unwrap();
        reg.create_group(&a, &[0, 1], 4, &mut slots, NODE_CAPACITY).unwrap();
        reg.create_group(&b, &[0], 4, &mut slots, NODE_CAPACITY).unwrap();
        assert_eq!(reg.sum_of_schains_resources(), 96);

        reg.remove_schain(&a, &mut slots, NODE_CAPACITY).unwrap();
        assert!(reg.get(&a).is_none());
        assert_eq!(reg.get(&b).unwrap().index_in_owner_list, 0);
        assert_eq!(reg.schain_ids_of_owner(&HOLDER), &[b]);
        assert_eq!(reg.sum_of_schains_resources(), 32);
        assert_eq!(slots.holes(0), &[0]);
        assert_eq!(slots.live_count(1), 0);

        let err = reg.remove_schain(&a, &mut slots, NODE_CAPACITY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_replace_node_reuses_hole() {
        let mut reg = SchainRegistry::new();
        let mut slots = SlotAllocator::new();
        let a = reg.initialize_schain("a", HOLDER, 10, 0, 0).unwrap();
        let b = reg.initialize_schain("b", HOLDER, 10, 0, 0).unwrap();
        let c = reg.initialize_schain("c", HOLDER, 10, 0, 0).unwrap();
        reg.create_group(&a, &[0, 1], 4, &mut slots, NODE_CAPACITY).unwrap();
        reg.create_group(&b, &[2], 4, &mut slots, NODE_CAPACITY).unwrap();
        reg.create_group(&c, &[2], 4, &mut slots, NODE_CAPACITY).unwrap();
        reg.remove_schain(&b, &mut slots, NODE_CAPACITY).unwrap();
        assert_eq!(slots.holes(2), &[0]);

        reg.replace_node(&a, 0, 2, &mut slots).unwrap();
        assert_eq!(reg.nodes_in_group(&a), &[2, 1]);
        assert_eq!(slots.schain_ids_for_node(2), vec![a, c]);
        assert!(slots.holes(2).is_empty());
        assert_eq!(slots.live_count(0), 0);
        assert_eq!(reg.sum_of_schains_resources(), 96);

        let err = reg.replace_node(&a, 1, 2, &mut slots).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = reg.replace_node(&a, 0, 3, &mut slots).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_schain_price() {
        let pricing = PricingConfig::default();
        let year = SECONDS_PER_YEAR;
        let price = 5_000_000;
        assert_eq!(
            schain_price(&pricing, price, SchainType::Large, year).unwrap(),
            price * 16
        );
        assert_eq!(
            schain_price(&pricing, price, SchainType::Medium, year).unwrap(),
            price * 16 / 8
        );
        assert_eq!(
            schain_price(&pricing, price, SchainType::Test, 5).unwrap(),
            pricing.test_schain_price
        );
        assert_eq!(
            schain_price(&pricing, Amount::MAX, SchainType::Large, year).unwrap_err().kind(),
            ErrorKind::Overflow
        );
    }
}
