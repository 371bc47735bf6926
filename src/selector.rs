//! Random group selection
//!
//! Picks a collision-free subset of the active population from a seed the
//! selected nodes cannot influence.
//!
//! # Algorithm
//!
//! ```text
//! seed    = SHA3-256(entropy ‖ purpose ‖ subject)
//! draw_i  = BE64(SHA3-256(seed ‖ BE64(i))) mod |population|
//! ```
//!
//! Draws are taken for `i = 0, 1, 2, ...` and a draw that hits an index
//! already picked is rejected. Selection order is preserved, so callers see
//! a shuffled group. When the draw budget (`64 × k`) runs out the remaining
//! slots are filled with the lowest unpicked indices, which keeps the
//! function total and still deterministic.
//!
//! Populations smaller than `k` yield every member exactly once.
//!
//! # Entropy
//!
//! The entropy comes from an injected [`SeedSource`]. `HashChainSeed` chains
//! SHA3 over the supplied clock and is fully reproducible. `ChaChaSeed` draws
//! from a seeded ChaCha20 stream.

use crate::crypto::{hash_to_u64, sha3, sha3_concat};
use crate::types::{Hash, NodeId, Timestamp};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Rejection-sampling budget per requested member
const DRAWS_PER_MEMBER: u64 = 64;

/// Seed for one selection: `SHA3(entropy ‖ purpose ‖ BE64(subject))`
pub fn derive_seed(entropy: &Hash, purpose: &[u8], subject: u64) -> Hash {
    let mut buf = Vec::with_capacity(32 + purpose.len() + 8);
    buf.extend_from_slice(entropy);
    buf.extend_from_slice(purpose);
    buf.extend_from_slice(&subject.to_be_bytes());
    sha3(&buf)
}

/// The `attempt`-th pseudorandom draw of a seed
pub fn draw(seed: &Hash, attempt: u64) -> u64 {
    hash_to_u64(&sha3_concat(seed, &attempt.to_be_bytes()))
}

/// Select `min(k, population.len())` distinct members in draw order.
pub fn select_group(seed: &Hash, population: &[NodeId], k: usize) -> Vec<NodeId> {
    let n = population.len();
    let want = k.min(n);
    if want == 0 {
        return Vec::new();
    }

    let mut picked = vec![false; n];
    let mut group = Vec::with_capacity(want);
    let budget = (want as u64).saturating_mul(DRAWS_PER_MEMBER);

    let mut attempt = 0u64;
    while group.len() < want && attempt < budget {
        let index = (draw(seed, attempt) % n as u64) as usize;
        attempt += 1;
        if picked[index] {
            continue;
        }
        picked[index] = true;
        group.push(population[index]);
    }

    for (index, taken) in picked.iter().enumerate() {
        if group.len() == want {
            break;
        }
        if !taken {
            group.push(population[index]);
        }
    }

    group
}

// =============================================================================
// SEED SOURCES
// =============================================================================

/// Hard-to-predict ledger value consumed by group formation.
///
/// Sources are stateless: the chain state lives in the ledger and is
/// advanced only when the operation that consumed it commits.
pub trait SeedSource: Send {
    /// Chain state of a fresh ledger
    fn genesis(&self) -> Hash;

    /// Entropy following `state` at time `now`
    fn next(&self, state: &Hash, now: Timestamp) -> Hash;
}

/// `state' = SHA3(state ‖ BE64(now))`
#[derive(Debug, Clone)]
pub struct HashChainSeed {
    genesis: Hash,
}

impl HashChainSeed {
    pub fn new(genesis: &[u8]) -> Self {
        Self {
            genesis: sha3(genesis),
        }
    }
}

impl SeedSource for HashChainSeed {
    fn genesis(&self) -> Hash {
        self.genesis
    }

    fn next(&self, state: &Hash, now: Timestamp) -> Hash {
        sha3_concat(state, &now.to_be_bytes())
    }
}

/// ChaCha20 stream keyed by `SHA3(key ‖ state)`
#[derive(Debug, Clone)]
pub struct ChaChaSeed {
    key: Hash,
}

impl ChaChaSeed {
    pub fn from_seed(seed: u64) -> Self {
        let mut key = [0u8; 32];
        ChaCha20Rng::seed_from_u64(seed).fill_bytes(&mut key);
        Self { key }
    }
}

impl SeedSource for ChaChaSeed {
    fn genesis(&self) -> Hash {
        sha3(&self.key)
    }

    fn next(&self, state: &Hash, now: Timestamp) -> Hash {
        let mut rng = ChaCha20Rng::from_seed(sha3_concat(&self.key, state));
        let mut out = [0u8; 32];
        rng.fill_bytes(&mut out);
        sha3_concat(&out, &now.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn population(n: u64) -> Vec<NodeId> {
        (0..n).collect()
    }

    #[test]
    fn test_exact_size_and_distinct() {
        let seed = sha3(b"seed");
        let group = select_group(&seed, &population(100), 24);
        assert_eq!(group.len(), 24);
        let unique: HashSet<_> = group.iter().collect();
        assert_eq!(unique.len(), 24);
    }

    #[test]
    fn test_small_population_returns_all() {
        let seed = sha3(b"seed");
        let mut group = select_group(&seed, &population(5), 24);
        assert_eq!(group.len(), 5);
        group.sort();
        assert_eq!(group, population(5));
    }

    #[test]
    fn test_empty_inputs() {
        let seed = sha3(b"seed");
        assert!(select_group(&seed, &[], 24).is_empty());
        assert!(select_group(&seed, &population(10), 0).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let seed = sha3(b"determinism");
        let pop = population(50);
        assert_eq!(select_group(&seed, &pop, 16), select_group(&seed, &pop, 16));
    }

    #[test]
    fn test_order_is_not_sorted() {
        // Sorted output for 20 of 1000 across 32 seeds would be astronomically unlikely
        let pop = population(1000);
        let shuffled = (0..32u64).any(|i| {
            let group = select_group(&sha3(&i.to_be_bytes()), &pop, 20);
            group.windows(2).any(|w| w[0] > w[1])
        });
        assert!(shuffled);
    }

    #[test]
    fn test_derive_seed_separates_purpose_and_subject() {
        let e = sha3(b"entropy");
        assert_ne!(derive_seed(&e, b"monitor", 1), derive_seed(&e, b"schain", 1));
        assert_ne!(derive_seed(&e, b"monitor", 1), derive_seed(&e, b"monitor", 2));
        assert_eq!(derive_seed(&e, b"monitor", 1), derive_seed(&e, b"monitor", 1));
    }

    #[test]
    fn test_hash_chain_seed_reproducible() {
        let a = HashChainSeed::new(b"genesis");
        let b = HashChainSeed::new(b"genesis");
        assert_eq!(a.genesis(), b.genesis());
        let first = a.next(&a.genesis(), 10);
        assert_eq!(first, b.next(&b.genesis(), 10));
        assert_ne!(first, a.next(&first, 10));
    }

    #[test]
    fn test_chacha_seed_reproducible() {
        let a = ChaChaSeed::from_seed(7);
        let b = ChaChaSeed::from_seed(7);
        assert_eq!(a.next(&a.genesis(), 1), b.next(&b.genesis(), 1));
        let other = ChaChaSeed::from_seed(8);
        assert_ne!(a.next(&a.genesis(), 2), other.next(&other.genesis(), 2));
    }

    #[test]
    fn test_next_is_pure() {
        let source = ChaChaSeed::from_seed(3);
        let state = source.genesis();
        assert_eq!(source.next(&state, 5), source.next(&state, 5));
    }
}
