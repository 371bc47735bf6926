//! Pending check commitments
//!
//! Reporting tools receive each record in a fixed 32-byte form:
//!
//! ```text
//! [0..14)   monitored node index   big-endian
//! [14..28)  due timestamp          big-endian
//! [28..32)  target IPv4 octets
//! ```

use crate::error::{ManagerError, Result};
use crate::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

pub const PACKED_LEN: usize = 32;
const FIELD_LEN: usize = 14;

/// "monitor will check monitored at due"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckedRecord {
    pub monitor: NodeId,
    pub monitored: NodeId,
    pub due: Timestamp,
    /// Verdicts are accepted in `[due, expires)`
    pub expires: Timestamp,
    pub ip: Ipv4Addr,
    /// Group generation that issued the record
    pub generation: u64,
}

impl CheckedRecord {
    pub fn packed(&self) -> [u8; PACKED_LEN] {
        let mut out = [0u8; PACKED_LEN];
        out[FIELD_LEN - 8..FIELD_LEN].copy_from_slice(&self.monitored.to_be_bytes());
        out[2 * FIELD_LEN - 8..2 * FIELD_LEN].copy_from_slice(&self.due.to_be_bytes());
        out[2 * FIELD_LEN..].copy_from_slice(&self.ip.octets());
        out
    }

    pub fn is_open(&self, now: Timestamp) -> bool {
        now >= self.due && now < self.expires
    }
}

/// Decode the packed form into `(monitored, due, ip)`.
pub fn unpack(bytes: &[u8; PACKED_LEN]) -> Result<(NodeId, Timestamp, Ipv4Addr)> {
    let monitored = read_field(&bytes[..FIELD_LEN])?;
    let due = read_field(&bytes[FIELD_LEN..2 * FIELD_LEN])?;
    let ip = Ipv4Addr::new(bytes[28], bytes[29], bytes[30], bytes[31]);
    Ok((monitored, due, ip))
}

fn read_field(field: &[u8]) -> Result<u64> {
    let (high, low) = field.split_at(FIELD_LEN - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(ManagerError::invalid("packed field exceeds 64 bits"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Ok(u64::from_be_bytes(buf))
}
