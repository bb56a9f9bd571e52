//! The wire-independent message type the whole engine operates on (§3).

use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// Per-queue monotonically increasing identifier, assigned at publish.
pub type SeqId = u64;

/// Content hash identifying a message payload inside the shared message store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// Hashes `payload` and `properties` together into a 16-byte content hash.
    ///
    /// Two publishes with identical payload and properties collapse onto the
    /// same guid, which is exactly the dedup the shared message store relies on.
    pub fn of(payload: &[u8], properties: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(payload);
        hasher.update(properties);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Guid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Immutable message record (§3). Payload and properties are `Arc<[u8]>` so
/// that requeue and transaction rollback can cheaply clone a message without
/// re-copying its bytes.
#[derive(Clone, Debug)]
pub struct Message {
    pub guid: Guid,
    pub payload: Arc<[u8]>,
    pub is_persistent: bool,
    pub properties: Arc<[u8]>,
}

impl Message {
    pub fn new(payload: impl Into<Arc<[u8]>>, properties: impl Into<Arc<[u8]>>, is_persistent: bool) -> Self {
        let payload = payload.into();
        let properties = properties.into();
        let guid = Guid::of(&payload, &properties);
        Self {
            guid,
            payload,
            is_persistent,
            properties,
        }
    }

    /// Frames payload and properties together for the shared store, which
    /// only knows about opaque bytes keyed by guid.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.payload.len() + self.properties.len());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.properties);
        buf
    }

    pub fn decode(guid: Guid, is_persistent: bool, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::Corrupt("message framing truncated"));
        }
        let payload_len = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes")) as usize;
        let rest = &bytes[4..];
        if payload_len > rest.len() {
            return Err(Error::Corrupt("message framing length out of bounds"));
        }
        let payload: Arc<[u8]> = rest[..payload_len].into();
        let properties: Arc<[u8]> = rest[payload_len..].into();
        Ok(Self {
            guid,
            payload,
            is_persistent,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_shares_guid() {
        let a = Message::new(b"hello".to_vec(), b"".to_vec(), false);
        let b = Message::new(b"hello".to_vec(), b"".to_vec(), false);
        assert_eq!(a.guid, b.guid);
    }

    #[test]
    fn different_content_differs() {
        let a = Message::new(b"hello".to_vec(), b"".to_vec(), false);
        let b = Message::new(b"world".to_vec(), b"".to_vec(), false);
        assert_ne!(a.guid, b.guid);
    }

    #[test]
    fn encode_decode_round_trip() {
        let msg = Message::new(b"payload".to_vec(), b"headers".to_vec(), true);
        let bytes = msg.encode();
        let decoded = Message::decode(msg.guid, msg.is_persistent, &bytes).expect("decode");
        assert_eq!(&*decoded.payload, &*msg.payload);
        assert_eq!(&*decoded.properties, &*msg.properties);
    }
}
