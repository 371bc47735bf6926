//! External collaborators
//!
//! Identity lookup, token custody and access control live outside the core.
//! The coordinator only sees these traits. In-memory implementations back
//! the simulation binary and the tests.

use crate::crypto::name_hash;
use crate::error::{ManagerError, Result};
use crate::registry::Node;
use crate::types::{Address, Amount, Hash};
use std::collections::BTreeMap;

// =============================================================================
// IDENTITY
// =============================================================================

pub trait Resolver: Send {
    fn resolve(&self, name: &str) -> Option<Address>;
}

/// Name directory keyed by SHA3(name)
#[derive(Debug, Clone, Default)]
pub struct Directory {
    entries: BTreeMap<Hash, Address>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, address: Address) {
        self.entries.insert(name_hash(name), address);
    }

    pub fn with(mut self, name: &str, address: Address) -> Self {
        self.register(name, address);
        self
    }
}

impl Resolver for Directory {
    fn resolve(&self, name: &str) -> Option<Address> {
        self.entries.get(&name_hash(name)).copied()
    }
}

// =============================================================================
// CUSTODY
// =============================================================================

pub trait Custody: Send {
    fn credit(&mut self, account: &Address, amount: Amount) -> Result<()>;
    fn debit(&mut self, account: &Address, amount: Amount) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCustody {
    balances: BTreeMap<Address, Amount>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }
}

impl Custody for InMemoryCustody {
    fn credit(&mut self, account: &Address, amount: Amount) -> Result<()> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(ManagerError::Overflow("balance"))?;
        Ok(())
    }

    fn debit(&mut self, account: &Address, amount: Amount) -> Result<()> {
        let balance = self.balance(account);
        if balance < amount {
            return Err(ManagerError::invalid(format!(
                "balance {} below {}",
                balance, amount
            )));
        }
        self.balances.insert(*account, balance - amount);
        Ok(())
    }
}

// =============================================================================
// ACCESS CONTROL
// =============================================================================

pub trait AccessControl: Send {
    fn require_admin(&self, caller: &Address) -> Result<()>;

    /// Node owner or admin
    fn require_owner_of_node(&self, caller: &Address, node: &Node) -> Result<()>;

    /// The account operating `node`
    fn require_node_operator(&self, caller: &Address, node: &Node) -> Result<()>;
}

/// Owner-equals-operator policy with a single admin
#[derive(Debug, Clone)]
pub struct OwnerAccess {
    admin: Address,
}

impl OwnerAccess {
    pub fn new(admin: Address) -> Self {
        Self { admin }
    }
}

impl AccessControl for OwnerAccess {
    fn require_admin(&self, caller: &Address) -> Result<()> {
        if *caller != self.admin {
            return Err(ManagerError::unauthorized("caller is not admin"));
        }
        Ok(())
    }

    fn require_owner_of_node(&self, caller: &Address, node: &Node) -> Result<()> {
        if *caller == node.owner || *caller == self.admin {
            return Ok(());
        }
        Err(ManagerError::unauthorized(format!(
            "caller does not own node {}",
            node.id
        )))
    }

    fn require_node_operator(&self, caller: &Address, node: &Node) -> Result<()> {
        if *caller != node.owner {
            return Err(ManagerError::unauthorized(format!(
                "caller does not operate node {}",
                node.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Endpoint, NodeStatus};
    use std::net::Ipv4Addr;

    fn node(owner: Address) -> Node {
        Node {
            id: 3,
            name: "n".into(),
            owner,
            endpoint: Endpoint {
                ip: Ipv4Addr::LOCALHOST,
                public_ip: Ipv4Addr::LOCALHOST,
                port: 1,
            },
            public_key: vec![],
            status: NodeStatus::Active,
            start_date: 0,
            finish_date: None,
            last_reward_date: 0,
        }
    }

    #[test]
    fn test_directory_resolves_by_name() {
        let dir = Directory::new().with("SchainsTreasury", [9; 20]);
        assert_eq!(dir.resolve("SchainsTreasury"), Some([9; 20]));
        assert_eq!(dir.resolve("Missing"), None);
    }

    #[test]
    fn test_custody_balances() {
        let mut custody = InMemoryCustody::new();
        custody.credit(&[1; 20], 100).unwrap();
        custody.debit(&[1; 20], 40).unwrap();
        assert_eq!(custody.balance(&[1; 20]), 60);
        let err = custody.debit(&[1; 20], 61).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(custody.balance(&[1; 20]), 60);
        custody.credit(&[1; 20], Amount::MAX).unwrap_err();
    }

    #[test]
    fn test_owner_access() {
        let access = OwnerAccess::new([0; 20]);
        let n = node([1; 20]);
        access.require_owner_of_node(&[1; 20], &n).unwrap();
        access.require_owner_of_node(&[0; 20], &n).unwrap();
        assert_eq!(
            access.require_owner_of_node(&[2; 20], &n).unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        access.require_node_operator(&[1; 20], &n).unwrap();
        assert!(access.require_node_operator(&[0; 20], &n).is_err());
        access.require_admin(&[0; 20]).unwrap();
        assert!(access.require_admin(&[1; 20]).is_err());
    }
}
