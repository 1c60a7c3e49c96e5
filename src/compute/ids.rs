//! Deterministic unit and network names.
//!
//! Hash-and-truncate: 12 hex chars of SHA-256(userId). Collisions are
//! possible at scale; the names are internal and per-tenant cardinality is one.

use sha2::{Digest, Sha256};

const ID_HEX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitIds {
    pub unit_name: String,
    pub network_name: String,
}

impl UnitIds {
    pub fn derive(user_id: &str) -> Self {
        let digest = hex::encode(Sha256::digest(user_id.as_bytes()));
        let short = &digest[..ID_HEX_LEN];
        Self {
            unit_name: format!("relay-unit-{short}"),
            network_name: format!("relay-net-{short}"),
        }
    }
}
