//! Slot allocator
//!
//! Each node owns an index-based arena of schain references. Released
//! positions become holes and are reused smallest-first, so live entries
//! never shift and the arena only grows when no hole is free.
//!
//! ```text
//! assign A, B     slots = [A, B]      holes = []
//! release 0       slots = [_, B]      holes = [0]
//! assign C        slots = [C, B]      holes = []
//! ```
//!
//! Nothing outside this module touches the hole list.

use crate::error::{ManagerError, Result};
use crate::types::{capacity_share, NodeId, SchainId, short_hex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Live schain reference held by a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    pub schain: SchainId,
    pub part_of_node: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTable {
    slots: Vec<Option<SlotRef>>,
    /// Free positions, ascending
    holes: Vec<usize>,
}

impl SlotTable {
    fn assign(&mut self, slot: SlotRef) -> usize {
        if self.holes.is_empty() {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        } else {
            let position = self.holes.remove(0);
            self.slots[position] = Some(slot);
            position
        }
    }

    fn release(&mut self, position: usize) -> Option<SlotRef> {
        let slot = self.slots.get_mut(position)?.take()?;
        let at = self.holes.partition_point(|&h| h < position);
        self.holes.insert(at, position);
        Some(slot)
    }

    pub fn slots(&self) -> &[Option<SlotRef>] {
        &self.slots
    }

    pub fn holes(&self) -> &[usize] {
        &self.holes
    }

    pub fn live(&self) -> impl Iterator<Item = &SlotRef> {
        self.slots.iter().flatten()
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.holes.len()
    }

    pub fn position_of(&self, schain: &SchainId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.map(|r| r.schain == *schain).unwrap_or(false))
    }

    pub fn occupied_capacity(&self, capacity: u64) -> u64 {
        self.live()
            .map(|s| capacity_share(capacity, s.part_of_node))
            .sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotAllocator {
    tables: BTreeMap<NodeId, SlotTable>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `slot` in the node's lowest hole, or append. Returns the position.
    pub fn assign(&mut self, node: NodeId, slot: SlotRef) -> usize {
        let position = self.tables.entry(node).or_default().assign(slot);
        debug!(
            "Slot {} on node {} assigned to schain {}",
            position,
            node,
            short_hex(&slot.schain)
        );
        position
    }

    /// Empty a slot. Fails on an empty or out-of-range position.
    pub fn release(&mut self, node: NodeId, position: usize) -> Result<SlotRef> {
        let slot = self
            .tables
            .get_mut(&node)
            .and_then(|t| t.release(position))
            .ok_or_else(|| {
                ManagerError::invalid(format!("slot {} on node {} is empty", position, node))
            })?;
        debug!("Slot {} on node {} released", position, node);
        Ok(slot)
    }

    /// Release the slot holding `schain` on `node`.
    pub fn release_schain(&mut self, node: NodeId, schain: &SchainId) -> Result<usize> {
        let position = self
            .table(node)
            .and_then(|t| t.position_of(schain))
            .ok_or_else(|| {
                ManagerError::not_found(format!(
                    "schain {} on node {}",
                    short_hex(schain),
                    node
                ))
            })?;
        self.release(node, position)?;
        Ok(position)
    }

    pub fn table(&self, node: NodeId) -> Option<&SlotTable> {
        self.tables.get(&node)
    }

    pub fn slots(&self, node: NodeId) -> &[Option<SlotRef>] {
        self.table(node).map(|t| t.slots()).unwrap_or(&[])
    }

    pub fn holes(&self, node: NodeId) -> &[usize] {
        self.table(node).map(|t| t.holes()).unwrap_or(&[])
    }

    pub fn live_count(&self, node: NodeId) -> usize {
        self.table(node).map(|t| t.live_count()).unwrap_or(0)
    }

    pub fn contains(&self, node: NodeId, schain: &SchainId) -> bool {
        self.table(node)
            .map(|t| t.position_of(schain).is_some())
            .unwrap_or(false)
    }

    pub fn occupied_capacity(&self, node: NodeId, capacity: u64) -> u64 {
        self.table(node)
            .map(|t| t.occupied_capacity(capacity))
            .unwrap_or(0)
    }

    pub fn free_capacity(&self, node: NodeId, capacity: u64) -> u64 {
        capacity.saturating_sub(self.occupied_capacity(node, capacity))
    }

    /// Σ capacity/partOfNode over live slots of nodes accepted by `include`
    pub fn total_occupancy(&self, capacity: u64, include: impl Fn(NodeId) -> bool) -> u64 {
        self.tables
            .iter()
            .filter(|(node, _)| include(**node))
            .map(|(_, t)| t.occupied_capacity(capacity))
            .sum()
    }

    /// Slot contents of `node` by position. Holes read as the zero id.
    pub fn schain_ids_for_node(&self, node: NodeId) -> Vec<SchainId> {
        self.slots(node)
            .iter()
            .map(|s| s.map(|r| r.schain).unwrap_or([0u8; 32]))
            .collect()
    }

    /// Live schains hosted on `node`, slot order
    pub fn live_schains(&self, node: NodeId) -> Vec<SchainId> {
        self.table(node)
            .map(|t| t.live().map(|s| s.schain).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn slot(tag: u8, part: u8) -> SlotRef {
        SlotRef {
            schain: [tag; 32],
            part_of_node: part,
        }
    }

    fn tags(alloc: &SlotAllocator, node: NodeId) -> Vec<Option<u8>> {
        alloc
            .slots(node)
            .iter()
            .map(|s| s.map(|r| r.schain[0]))
            .collect()
    }

    #[test]
    fn test_hole_reuse() {
        let mut alloc = SlotAllocator::new();
        alloc.assign(0, slot(b'A', 4));
        alloc.assign(0, slot(b'B', 4));
        alloc.release(0, 0).unwrap();
        assert_eq!(tags(&alloc, 0), vec![None, Some(b'B')]);
        assert_eq!(alloc.assign(0, slot(b'C', 4)), 0);
        assert_eq!(tags(&alloc, 0), vec![Some(b'C'), Some(b'B')]);
    }

    #[test]
    fn test_holes_consumed_ascending() {
        let mut alloc = SlotAllocator::new();
        alloc.assign(0, slot(b'A', 4));
        alloc.assign(0, slot(b'B', 4));
        alloc.release(0, 1).unwrap();
        alloc.release(0, 0).unwrap();
        assert_eq!(alloc.holes(0), &[0, 1]);
        assert_eq!(alloc.assign(0, slot(b'D', 4)), 0);
        assert_eq!(alloc.assign(0, slot(b'E', 4)), 1);
        assert_eq!(tags(&alloc, 0), vec![Some(b'D'), Some(b'E')]);
        assert!(alloc.holes(0).is_empty());
    }

    #[test]
    fn test_release_empty_or_out_of_range() {
        let mut alloc = SlotAllocator::new();
        assert_eq!(alloc.release(0, 0).unwrap_err().kind(), ErrorKind::InvalidState);
        alloc.assign(0, slot(b'A', 4));
        alloc.release(0, 0).unwrap();
        assert_eq!(alloc.release(0, 0).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(alloc.release(0, 5).unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_occupancy_accounting() {
        let mut alloc = SlotAllocator::new();
        alloc.assign(0, slot(1, 2));
        alloc.assign(0, slot(2, 4));
        alloc.assign(1, slot(1, 2));
        alloc.assign(1, slot(3, 0));
        assert_eq!(alloc.occupied_capacity(0, 128), 96);
        assert_eq!(alloc.free_capacity(0, 128), 32);
        assert_eq!(alloc.occupied_capacity(1, 128), 64);
        assert_eq!(alloc.total_occupancy(128, |_| true), 160);
        assert_eq!(alloc.total_occupancy(128, |n| n != 1), 96);
        assert_eq!(alloc.live_count(1), 2);
    }

    #[test]
    fn test_release_schain() {
        let mut alloc = SlotAllocator::new();
        alloc.assign(3, slot(1, 8));
        alloc.assign(3, slot(2, 8));
        assert_eq!(alloc.release_schain(3, &[2; 32]).unwrap(), 1);
        assert!(!alloc.contains(3, &[2; 32]));
        assert!(alloc.contains(3, &[1; 32]));
        assert_eq!(
            alloc.release_schain(3, &[2; 32]).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(alloc.schain_ids_for_node(3), vec![[1; 32], [0; 32]]);
        assert_eq!(alloc.live_schains(3), vec![[1; 32]]);
    }
}
