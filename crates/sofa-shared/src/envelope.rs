//! SOFA envelope codec.
//!
//! Every message travels as `<TAG><JSON object>`, e.g.
//! `SOFA::Payment:{"value":"0x10",...}`. The tag alone decides the kind;
//! only the first balanced JSON object after it is parsed, so trailing
//! bytes and unknown fields are ignored. Unrecognised tags decode to
//! [`Kind::Unknown`] without an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ParseError, ValidationError};
use crate::sofa::Sofa;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    PlainText,
    Command,
    PaymentRequest,
    Payment,
    Init,
    InitRequest,
    Timestamp,
    LocalStatusMessage,
    Unknown,
}

/// Tag table. Order does not matter: every tag ends in `:` so no tag is a
/// prefix of another.
const TAGS: [(&str, Kind); 8] = [
    (TAG_MESSAGE, Kind::PlainText),
    (TAG_COMMAND, Kind::Command),
    (TAG_PAYMENT_REQUEST, Kind::PaymentRequest),
    (TAG_PAYMENT, Kind::Payment),
    (TAG_INIT, Kind::Init),
    (TAG_INIT_REQUEST, Kind::InitRequest),
    (TAG_TIMESTAMP, Kind::Timestamp),
    (TAG_LOCAL_STATUS, Kind::LocalStatusMessage),
];

impl Kind {
    /// Fixed header for this kind. `Unknown` has none.
    pub fn tag(self) -> Option<&'static str> {
        TAGS.iter().find(|(_, k)| *k == self).map(|(tag, _)| *tag)
    }

    /// Kinds that are stored but never handed to the transport.
    pub fn is_local(self) -> bool {
        matches!(self, Kind::Timestamp | Kind::LocalStatusMessage)
    }

    /// Kinds that never become visible chat messages.
    pub fn is_control(self) -> bool {
        matches!(self, Kind::Init | Kind::InitRequest)
    }

    fn from_wire(wire: &str) -> Option<(Kind, &'static str)> {
        TAGS.iter()
            .find(|(tag, _)| wire.starts_with(tag))
            .map(|(tag, kind)| (*kind, *tag))
    }
}

/// A wire string split into header and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: Kind,
    pub header: String,
    pub body: String,
}

impl Envelope {
    /// Classify a wire string by its header. Never fails.
    pub fn split(wire: &str) -> Self {
        let trimmed = wire.trim_start();
        match Kind::from_wire(trimmed) {
            Some((kind, tag)) => Self {
                kind,
                header: tag.to_string(),
                body: trimmed[tag.len()..].to_string(),
            },
            None => Self {
                kind: Kind::Unknown,
                header: String::new(),
                body: wire.to_string(),
            },
        }
    }

    /// Decode the typed body behind the header.
    pub fn parse(&self) -> Result<Sofa, ParseError> {
        let kind = self.kind;
        let sofa = match kind {
            Kind::PlainText => Sofa::Message(parse_body(kind, &self.body)?),
            Kind::Command => Sofa::Command(parse_body(kind, &self.body)?),
            Kind::PaymentRequest => Sofa::PaymentRequest(parse_body(kind, &self.body)?),
            Kind::Payment => Sofa::Payment(parse_body(kind, &self.body)?),
            Kind::Init => Sofa::Init(parse_body(kind, &self.body)?),
            Kind::InitRequest => Sofa::InitRequest(parse_body(kind, &self.body)?),
            Kind::Timestamp => Sofa::Timestamp(parse_body(kind, &self.body)?),
            Kind::LocalStatusMessage => Sofa::LocalStatus(parse_body(kind, &self.body)?),
            Kind::Unknown => Sofa::Unknown(self.body.clone()),
        };
        Ok(sofa)
    }

    /// Produce the string actually handed to the transport: local-only
    /// fields removed, local-only kinds refused.
    pub fn for_transport(wire: &str) -> Result<String, ValidationError> {
        let envelope = Self::split(wire);
        if envelope.kind == Kind::Unknown || envelope.kind.is_local() {
            return Err(ValidationError::NotTransmittable(envelope.kind));
        }

        let json = object_slice(&envelope.body)
            .map_err(|e| ValidationError::Serialization(e.to_string()))?;
        let mut value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ValidationError::Serialization(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            object.remove(LOCAL_PRICE_KEY);
        }
        let body = serde_json::to_string(&value)
            .map_err(|e| ValidationError::Serialization(e.to_string()))?;

        Ok(format!("{}{}", envelope.header, body))
    }
}

/// Prefix the kind's header to the serialized body.
pub fn encode(sofa: &Sofa) -> Result<String, ValidationError> {
    let body = match sofa {
        Sofa::Message(b) => serde_json::to_string(b),
        Sofa::Command(b) => serde_json::to_string(b),
        Sofa::PaymentRequest(b) => serde_json::to_string(b),
        Sofa::Payment(b) => serde_json::to_string(b),
        Sofa::Init(b) => serde_json::to_string(b),
        Sofa::InitRequest(b) => serde_json::to_string(b),
        Sofa::Timestamp(b) => serde_json::to_string(b),
        Sofa::LocalStatus(b) => serde_json::to_string(b),
        Sofa::Unknown(_) => return Err(ValidationError::NotTransmittable(Kind::Unknown)),
    }
    .map_err(|e| ValidationError::Serialization(e.to_string()))?;

    let tag = sofa
        .kind()
        .tag()
        .ok_or(ValidationError::NotTransmittable(Kind::Unknown))?;
    Ok(format!("{tag}{body}"))
}

pub fn decode(wire: &str) -> Result<Sofa, ParseError> {
    Envelope::split(wire).parse()
}

fn parse_body<T: DeserializeOwned>(kind: Kind, body: &str) -> Result<T, ParseError> {
    let json = object_slice(body).map_err(|e| e.with_kind(kind))?;
    serde_json::from_str(json).map_err(|e| ParseError::MalformedBody {
        kind,
        reason: e.to_string(),
    })
}

enum SliceError {
    Missing,
    Unterminated,
}

impl SliceError {
    fn with_kind(self, kind: Kind) -> ParseError {
        match self {
            SliceError::Missing => ParseError::MissingBody { kind },
            SliceError::Unterminated => ParseError::UnterminatedBody { kind },
        }
    }
}

impl std::fmt::Display for SliceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SliceError::Missing => f.write_str("no JSON object in body"),
            SliceError::Unterminated => f.write_str("unterminated JSON object in body"),
        }
    }
}

/// The first `{` and its matching `}`; braces inside strings do not count.
fn object_slice(body: &str) -> Result<&str, SliceError> {
    let start = body.find('{').ok_or(SliceError::Missing)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&body[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Err(SliceError::Unterminated)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::sofa::*;
    use crate::types::{Address, TxHash};

    fn addr(byte: u8) -> Address {
        Address::from_bytes(&[byte; 20])
    }

    fn samples() -> Vec<Sofa> {
        let mut payment = Payment::new(15, addr(1), addr(2));
        payment.tx_hash = Some(TxHash::from_bytes(&[9u8; 32]));
        vec![
            Sofa::text("hello {not a brace}"),
            Sofa::Command(Command {
                body: "Yes".into(),
                value: Some("yes".into()),
            }),
            Sofa::PaymentRequest(PaymentRequest::new(20, addr(3), Some("lunch".into()))),
            Sofa::Payment(payment),
            Sofa::Init(Init {
                payment_address: addr(4),
                language: "fr".into(),
            }),
            Sofa::InitRequest(InitRequest::default()),
            Sofa::Timestamp(Timestamp {
                timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            }),
            Sofa::LocalStatus(LocalStatus {
                body: "added to group".into(),
            }),
        ]
    }

    #[test]
    fn test_every_tagged_kind_roundtrips() {
        for sofa in samples() {
            let wire = encode(&sofa).unwrap();
            assert!(wire.starts_with(sofa.kind().tag().unwrap()));
            assert_eq!(decode(&wire).unwrap(), sofa);
        }
    }

    #[test]
    fn test_kind_recovered_from_header_alone() {
        // A Payment header with a PaymentRequest-looking body is still a Payment.
        let envelope = Envelope::split("SOFA::Payment:{\"destinationAddress\":\"x\"}");
        assert_eq!(envelope.kind, Kind::Payment);
        assert_eq!(Envelope::split("SOFA::PaymentRequest:{}").kind, Kind::PaymentRequest);
        assert_eq!(Envelope::split("SOFA::InitRequest:{}").kind, Kind::InitRequest);
        assert_eq!(Envelope::split("SOFA::Init:{}").kind, Kind::Init);
    }

    #[test]
    fn test_garbage_decodes_to_unknown() {
        for garbage in ["", "hello", "SOFA::", "SOFA::Bogus:{}", "{\"body\":1}", "💸"] {
            match decode(garbage) {
                Ok(Sofa::Unknown(raw)) => assert_eq!(raw, garbage),
                other => panic!("expected Unknown for {garbage:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_matched_kind_with_bad_body_is_parse_error() {
        assert_eq!(
            decode("SOFA::Message:"),
            Err(ParseError::MissingBody {
                kind: Kind::PlainText
            })
        );
        assert_eq!(
            decode("SOFA::Message:{\"body\":\"x\""),
            Err(ParseError::UnterminatedBody {
                kind: Kind::PlainText
            })
        );
        assert!(matches!(
            decode("SOFA::Payment:{\"value\":\"nope\"}"),
            Err(ParseError::MalformedBody {
                kind: Kind::Payment,
                ..
            })
        ));
    }

    #[test]
    fn test_only_first_object_is_parsed() {
        let wire = "SOFA::Message:{\"body\":\"a}b\",\"extra\":{\"x\":1}} trailing {junk";
        assert_eq!(decode(wire).unwrap(), Sofa::text("a}b"));
    }

    #[test]
    fn test_transport_strips_local_price() {
        let mut payment = Payment::new(1, addr(1), addr(2));
        payment.local_price = Some("$1.00".into());
        let wire = encode(&Sofa::Payment(payment.clone())).unwrap();
        assert!(wire.contains(LOCAL_PRICE_KEY));

        let outbound = Envelope::for_transport(&wire).unwrap();
        assert!(!outbound.contains(LOCAL_PRICE_KEY));
        assert!(outbound.starts_with(TAG_PAYMENT));

        payment.local_price = None;
        assert_eq!(decode(&outbound).unwrap(), Sofa::Payment(payment));
    }

    #[test]
    fn test_local_kinds_are_never_transmitted() {
        let wire = encode(&Sofa::LocalStatus(LocalStatus { body: "x".into() })).unwrap();
        assert_eq!(
            Envelope::for_transport(&wire),
            Err(ValidationError::NotTransmittable(Kind::LocalStatusMessage))
        );
        assert!(Envelope::for_transport("garbage").is_err());
        assert!(encode(&Sofa::Unknown("x".into())).is_err());
    }

    #[test]
    fn test_decode_is_pure() {
        let wire = encode(&Sofa::text("same")).unwrap();
        assert_eq!(decode(&wire), decode(&wire));
    }
}
