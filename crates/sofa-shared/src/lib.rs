//! Types shared by every SOFA crate: identifiers, the envelope codec and its
//! typed bodies, the wallet, raw transactions and session crypto.

pub mod constants;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod sofa;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use envelope::{Envelope, Kind};
pub use error::{CryptoError, ParseError, SigningError, ValidationError};
pub use sofa::Sofa;
pub use types::{Address, GroupId, MessageId, PeerId, ThreadId, TxHash};
pub use wallet::Wallet;
