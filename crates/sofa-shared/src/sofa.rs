//! Typed bodies carried inside SOFA envelopes.
//!
//! Field names follow the wire format (camelCase JSON). Amounts are integer
//! minor units, written on the wire as `0x`-prefixed hex strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{self, Kind};
use crate::error::{ParseError, ValidationError};
use crate::types::{Address, TxHash};

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sofa {
    Message(Message),
    Command(Command),
    PaymentRequest(PaymentRequest),
    Payment(Payment),
    Init(Init),
    InitRequest(InitRequest),
    Timestamp(Timestamp),
    LocalStatus(LocalStatus),
    /// Anything whose header is not recognised, kept verbatim.
    Unknown(String),
}

impl Sofa {
    pub fn kind(&self) -> Kind {
        match self {
            Sofa::Message(_) => Kind::PlainText,
            Sofa::Command(_) => Kind::Command,
            Sofa::PaymentRequest(_) => Kind::PaymentRequest,
            Sofa::Payment(_) => Kind::Payment,
            Sofa::Init(_) => Kind::Init,
            Sofa::InitRequest(_) => Kind::InitRequest,
            Sofa::Timestamp(_) => Kind::Timestamp,
            Sofa::LocalStatus(_) => Kind::LocalStatusMessage,
            Sofa::Unknown(_) => Kind::Unknown,
        }
    }

    pub fn encode(&self) -> Result<String, ValidationError> {
        envelope::encode(self)
    }

    pub fn decode(wire: &str) -> Result<Self, ParseError> {
        envelope::decode(wire)
    }

    pub fn text(body: impl Into<String>) -> Self {
        Sofa::Message(Message::new(body))
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub body: String,
    /// Content hashes of files shipped alongside the text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<Control>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_keyboard: Option<bool>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachments: Vec::new(),
            controls: Vec::new(),
            show_keyboard: None,
        }
    }
}

/// A button offered by the sender; pressing it answers with a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    #[serde(rename = "type")]
    pub control_type: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Unconfirmed,
    Confirmed,
    Failed,
}

/// Direction of a payment relative to the local wallet. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
    NotRelevant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(with = "hex_value")]
    pub value: u128,
    pub from_address: Address,
    pub to_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    #[serde(default)]
    pub status: PaymentStatus,
    /// Display-only fiat equivalent. Never transmitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_price: Option<String>,
}

impl Payment {
    pub fn new(value: u128, from_address: Address, to_address: Address) -> Self {
        Self {
            value,
            from_address,
            to_address,
            tx_hash: None,
            status: PaymentStatus::Unconfirmed,
            local_price: None,
        }
    }

    pub fn direction(&self, wallet: &Address) -> Direction {
        if &self.from_address == wallet {
            Direction::Outgoing
        } else if &self.to_address == wallet {
            Direction::Incoming
        } else {
            Direction::NotRelevant
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Accepted => "accepted",
            RequestState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    #[serde(with = "hex_value")]
    pub value: u128,
    pub destination_address: Address,
    /// Free-form memo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub state: RequestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_price: Option<String>,
}

impl PaymentRequest {
    pub fn new(value: u128, destination_address: Address, memo: Option<String>) -> Self {
        Self {
            value,
            destination_address,
            body: memo,
            state: RequestState::Pending,
            local_price: None,
        }
    }

    /// Move a pending request to a terminal state. Terminal states are final.
    pub fn transition(&mut self, next: RequestState) -> Result<(), ValidationError> {
        if self.state.is_terminal() {
            return Err(ValidationError::RequestClosed(self.state.as_str().to_string()));
        }
        if !next.is_terminal() {
            return Err(ValidationError::RequestClosed(
                "pending; only accepted or rejected may follow".to_string(),
            ));
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Protocol control
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Init {
    pub payment_address: Address,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    crate::constants::DEFAULT_LANGUAGE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub values: Vec<String>,
}

impl Default for InitRequest {
    fn default() -> Self {
        Self {
            values: crate::constants::INIT_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Local only
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStatus {
    pub body: String,
}

/// `0x`-prefixed hex on the wire. Plain decimal is accepted when reading.
pub mod hex_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{value:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<u128, String> {
        let raw = raw.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some("") => return Err("empty hex value".to_string()),
            Some(digits) => u128::from_str_radix(digits, 16),
            None => raw.parse::<u128>(),
        };
        parsed.map_err(|e| format!("invalid value {raw:?}: {e}"))
    }
}
