use crate::types::{Hash, SchainId};
use sha3::{Digest, Sha3_256};

pub fn sha3(data: &[u8]) -> Hash {
    Sha3_256::digest(data).into()
}

pub fn sha3_concat(a: &[u8], b: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Identifier of a named entity (schain, node name, directory entry)
pub fn name_hash(name: &str) -> SchainId {
    sha3(name.as_bytes())
}

/// Leading 8 bytes of a hash as a big-endian integer
pub fn hash_to_u64(hash: &Hash) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(buf)
}
