//! Node registry
//!
//! Authoritative directory of nodes and their lifecycle. Nodes are never
//! removed: a node that has left stays as a tombstone so historical lookups
//! and reserved endpoints survive.

use crate::crypto::name_hash;
use crate::error::{ManagerError, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::info;

/// Registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeParams {
    pub name: String,
    pub owner: Address,
    pub ip: Ipv4Addr,
    pub public_ip: Ipv4Addr,
    pub port: u16,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub owner: Address,
    pub endpoint: Endpoint,
    pub public_key: Vec<u8>,
    pub status: NodeStatus,
    pub start_date: Timestamp,
    /// Set when the node reaches Left
    pub finish_date: Option<Timestamp>,
    pub last_reward_date: Timestamp,
}

impl Node {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    pub fn next_reward_date(&self, reward_period: u64) -> Timestamp {
        self.last_reward_date.saturating_add(reward_period)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    /// SHA3(name) → id
    names: BTreeMap<Hash, NodeId>,
    /// (ip, port) → id, tombstones included
    endpoints: BTreeMap<(Ipv4Addr, u16), NodeId>,
    by_owner: BTreeMap<Address, Vec<NodeId>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Fails with InvalidState on a taken name or endpoint.
    pub fn register(&mut self, params: NodeParams, now: Timestamp) -> Result<NodeId> {
        let name_key = name_hash(&params.name);
        if self.names.contains_key(&name_key) {
            return Err(ManagerError::invalid(format!("node name {} is taken", params.name)));
        }

        let endpoint = Endpoint {
            ip: params.ip,
            public_ip: params.public_ip,
            port: params.port,
        };
        if self.endpoints.contains_key(&endpoint.key()) {
            return Err(ManagerError::invalid(format!(
                "endpoint {}:{} is taken",
                params.ip, params.port
            )));
        }

        let id = self.nodes.len() as NodeId;
        self.names.insert(name_key, id);
        self.endpoints.insert(endpoint.key(), id);
        self.by_owner.entry(params.owner).or_default().push(id);
        self.nodes.push(Node {
            id,
            name: params.name,
            owner: params.owner,
            endpoint,
            public_key: params.public_key,
            status: NodeStatus::Active,
            start_date: now,
            finish_date: None,
            last_reward_date: now,
        });

        info!("Node {} registered at {}:{}", id, endpoint.ip, endpoint.port);
        Ok(id)
    }

    /// Begin exit. Returns false if the node was already leaving.
    pub fn set_leaving(&mut self, id: NodeId) -> Result<bool> {
        let node = self.node_mut(id)?;
        match node.status {
            NodeStatus::Leaving => Ok(false),
            NodeStatus::Left => Err(ManagerError::invalid(format!("node {} already left", id))),
            NodeStatus::Active | NodeStatus::InMaintenance => {
                node.status = NodeStatus::Leaving;
                info!("Node {} is leaving", id);
                Ok(true)
            }
        }
    }

    /// Complete exit. Only a leaving node can be marked Left.
    pub fn set_left(&mut self, id: NodeId, now: Timestamp) -> Result<()> {
        let node = self.node_mut(id)?;
        match node.status {
            NodeStatus::Leaving => {
                node.status = NodeStatus::Left;
                node.finish_date = Some(now);
                info!("Node {} left", id);
                Ok(())
            }
            NodeStatus::Left => Err(ManagerError::invalid(format!("node {} already left", id))),
            other => Err(ManagerError::invalid(format!(
                "node {} is {}, not leaving",
                id, other
            ))),
        }
    }

    pub fn set_in_maintenance(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.status != NodeStatus::Active {
            return Err(ManagerError::invalid(format!(
                "node {} is {}, not active",
                id, node.status
            )));
        }
        node.status = NodeStatus::InMaintenance;
        info!("Node {} entered maintenance", id);
        Ok(())
    }

    pub fn remove_from_maintenance(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.status != NodeStatus::InMaintenance {
            return Err(ManagerError::invalid(format!(
                "node {} is not in maintenance",
                id
            )));
        }
        node.status = NodeStatus::Active;
        info!("Node {} back from maintenance", id);
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    pub fn require(&self, id: NodeId) -> Result<&Node> {
        self.get(id)
            .ok_or_else(|| ManagerError::not_found(format!("node {}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id as usize)
            .ok_or_else(|| ManagerError::not_found(format!("node {}", id)))
    }

    pub fn by_name(&self, name: &str) -> Option<&Node> {
        self.names
            .get(&name_hash(name))
            .and_then(|id| self.get(*id))
    }

    pub fn is_name_available(&self, name: &str) -> bool {
        !self.names.contains_key(&name_hash(name))
    }

    pub fn nodes_of_owner(&self, owner: &Address) -> &[NodeId] {
        self.by_owner.get(owner).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.get(id).map(|n| n.status)
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.get(id).map(|n| n.is_active()).unwrap_or(false)
    }

    pub fn is_left(&self, id: NodeId) -> bool {
        self.status(id) == Some(NodeStatus::Left)
    }

    pub fn active_count(&self) -> u64 {
        self.nodes.iter().filter(|n| n.is_active()).count() as u64
    }

    /// Active node ids, ascending
    pub fn active_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_active())
            .map(|n| n.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // =========================================================================
    // Reward dates
    // =========================================================================

    pub fn is_time_for_reward(&self, id: NodeId, now: Timestamp, reward_period: u64) -> bool {
        self.get(id)
            .map(|n| n.next_reward_date(reward_period) <= now)
            .unwrap_or(false)
    }

    pub(crate) fn set_last_reward_date(&mut self, id: NodeId, now: Timestamp) -> Result<()> {
        self.node_mut(id)?.last_reward_date = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn params(i: u8) -> NodeParams {
        NodeParams {
            name: format!("node-{}", i),
            owner: [i; 20],
            ip: Ipv4Addr::new(10, 0, 0, i),
            public_ip: Ipv4Addr::new(10, 0, 0, i),
            port: 8545,
            public_key: vec![i; 64],
        }
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut reg = NodeRegistry::new();
        assert_eq!(reg.register(params(1), 100).unwrap(), 0);
        assert_eq!(reg.register(params(2), 100).unwrap(), 1);
        assert_eq!(reg.active_count(), 2);
        assert_eq!(reg.active_ids(), vec![0, 1]);
        assert_eq!(reg.by_name("node-2").unwrap().id, 1);
        assert_eq!(reg.get(0).unwrap().last_reward_date, 100);
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let mut reg = NodeRegistry::new();
        reg.register(params(1), 0).unwrap();
        let mut dup = params(1);
        dup.name = "other".into();
        let err = reg.register(dup, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = NodeRegistry::new();
        reg.register(params(1), 0).unwrap();
        let mut dup = params(2);
        dup.name = "node-1".into();
        assert_eq!(reg.register(dup, 0).unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_lifecycle_is_monotonic() {
        let mut reg = NodeRegistry::new();
        let id = reg.register(params(1), 0).unwrap();

        assert_eq!(reg.set_left(id, 5).unwrap_err().kind(), ErrorKind::InvalidState);
        assert!(reg.set_leaving(id).unwrap());
        assert!(!reg.set_leaving(id).unwrap());
        assert!(!reg.is_active(id));
        reg.set_left(id, 10).unwrap();
        assert_eq!(reg.get(id).unwrap().finish_date, Some(10));

        assert_eq!(reg.set_left(id, 11).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(reg.set_leaving(id).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn test_left_node_keeps_endpoint_reserved() {
        let mut reg = NodeRegistry::new();
        let id = reg.register(params(1), 0).unwrap();
        reg.set_leaving(id).unwrap();
        reg.set_left(id, 1).unwrap();

        let mut again = params(1);
        again.name = "fresh".into();
        assert_eq!(reg.register(again, 2).unwrap_err().kind(), ErrorKind::InvalidState);
        assert!(reg.get(id).is_some());
    }

    #[test]
    fn test_maintenance() {
        let mut reg = NodeRegistry::new();
        let id = reg.register(params(1), 0).unwrap();
        reg.set_in_maintenance(id).unwrap();
        assert!(!reg.is_active(id));
        assert!(reg.active_ids().is_empty());
        assert_eq!(reg.set_in_maintenance(id).unwrap_err().kind(), ErrorKind::InvalidState);
        reg.remove_from_maintenance(id).unwrap();
        assert!(reg.is_active(id));
        assert_eq!(
            reg.remove_from_maintenance(id).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn test_unknown_node() {
        let mut reg = NodeRegistry::new();
        assert_eq!(reg.set_leaving(7).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!reg.is_active(7));
    }

    #[test]
    fn test_reward_dates() {
        let mut reg = NodeRegistry::new();
        let id = reg.register(params(1), 1000).unwrap();
        assert!(!reg.is_time_for_reward(id, 4599, 3600));
        assert!(reg.is_time_for_reward(id, 4600, 3600));
        reg.set_last_reward_date(id, 4600).unwrap();
        assert_eq!(reg.get(id).unwrap().next_reward_date(3600), 8200);
    }

    #[test]
    fn test_nodes_of_owner() {
        let mut reg = NodeRegistry::new();
        let mut p = params(2);
        p.owner = [1; 20];
        reg.register(params(1), 0).unwrap();
        reg.register(p, 0).unwrap();
        assert_eq!(reg.nodes_of_owner(&[1; 20]), &[0, 1]);
        assert!(reg.nodes_of_owner(&[9; 20]).is_empty());
    }
}
