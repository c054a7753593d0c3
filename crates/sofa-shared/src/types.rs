use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{ADDRESS_SIZE, TX_HASH_SIZE};
use crate::error::ValidationError;

/// Messaging identity of a remote user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::Empty("peer id"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::Empty("group id"));
        }
        Ok(Self(id))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation key. Group-ness is carried by the tag, never inferred from
/// the shape of the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub enum ThreadId {
    Peer(PeerId),
    Group(GroupId),
}

impl ThreadId {
    const PEER_PREFIX: &'static str = "peer:";
    const GROUP_PREFIX: &'static str = "group:";

    pub fn peer(id: &PeerId) -> Self {
        Self::Peer(id.clone())
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    /// The peer behind a one-to-one thread.
    pub fn as_peer(&self) -> Option<&PeerId> {
        match self {
            Self::Peer(peer) => Some(peer),
            Self::Group(_) => None,
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(id) => write!(f, "{}{}", Self::PEER_PREFIX, id),
            Self::Group(id) => write!(f, "{}{}", Self::GROUP_PREFIX, id),
        }
    }
}

impl FromStr for ThreadId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(Self::PEER_PREFIX) {
            return PeerId::new(rest).map(Self::Peer);
        }
        if let Some(rest) = s.strip_prefix(Self::GROUP_PREFIX) {
            return GroupId::new(rest).map(Self::Group);
        }
        Err(ValidationError::InvalidThreadId(s.to_string()))
    }
}

impl TryFrom<String> for ThreadId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ThreadId> for String {
    fn from(id: ThreadId) -> Self {
        id.to_string()
    }
}

/// Wallet address: `0x` followed by 40 lowercase hex digits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let normalized = parse_prefixed_hex(s, ADDRESS_SIZE)
            .ok_or_else(|| ValidationError::InvalidAddress(s.to_string()))?;
        Ok(Self(normalized))
    }

    pub fn from_bytes(bytes: &[u8; ADDRESS_SIZE]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..10]
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction hash: `0x` followed by 64 lowercase hex digits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let normalized = parse_prefixed_hex(s, TX_HASH_SIZE)
            .ok_or_else(|| ValidationError::InvalidTxHash(s.to_string()))?;
        Ok(Self(normalized))
    }

    pub fn from_bytes(bytes: &[u8; TX_HASH_SIZE]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..10]
    }
}

impl TryFrom<String> for TxHash {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(h: TxHash) -> Self {
        h.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable local key of a chat message.
///
/// Random by default. Payment-derived messages use their transaction hash so
/// that every later update lands on the same record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&TxHash> for MessageId {
    fn from(hash: &TxHash) -> Self {
        Self(hash.as_str().to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_prefixed_hex(s: &str, len: usize) -> Option<String> {
    let digits = s.trim().strip_prefix("0x").or_else(|| s.trim().strip_prefix("0X"))?;
    if digits.len() != len * 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", digits.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_tagged_roundtrip() {
        let peer = ThreadId::Peer(PeerId::new("alice").unwrap());
        let group = ThreadId::Group(GroupId::new("0123456789abcdef0123").unwrap());

        assert_eq!(peer.to_string(), "peer:alice");
        assert_eq!("peer:alice".parse::<ThreadId>().unwrap(), peer);
        assert_eq!(
            "group:0123456789abcdef0123".parse::<ThreadId>().unwrap(),
            group
        );
        assert!(group.is_group());
        assert!(!peer.is_group());
    }

    #[test]
    fn test_thread_id_requires_tag() {
        // A long id without a tag is not silently treated as a group.
        assert!("0123456789abcdef0123456789abcdef".parse::<ThreadId>().is_err());
        assert!("peer:".parse::<ThreadId>().is_err());
    }

    #[test]
    fn test_address_normalized() {
        let addr = Address::parse("0xABCDEF0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(addr.short(), "0xabcdef01");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(Address::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_message_id_from_hash() {
        let hash = TxHash::from_bytes(&[7u8; 32]);
        assert_eq!(MessageId::from(&hash).as_str(), hash.as_str());
    }

    #[test]
    fn test_serde_uses_string_form() {
        let thread = ThreadId::Peer(PeerId::new("bob").unwrap());
        let json = serde_json::to_string(&thread).unwrap();
        assert_eq!(json, "\"peer:bob\"");
        let back: ThreadId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, thread);
    }
}
