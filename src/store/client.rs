//! Persistent client refs (§3 "Ownership", §4.1 recovery protocol).
//!
//! A ref is a random 16-byte token minted once per queue and kept for that
//! queue's lifetime, surviving restarts. The store uses the set of refs it
//! persisted against the set of refs the queues currently claim to decide
//! whether its own index snapshot can be trusted (a "clean" shutdown) or
//! whether it must fall back to a full segment scan.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ClientRef(pub [u8; 16]);

impl ClientRef {
    pub fn new() -> Self {
        ClientRef(*uuid::Uuid::new_v4().as_bytes())
    }
}

impl Default for ClientRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
