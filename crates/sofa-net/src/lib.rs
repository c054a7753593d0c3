// Collaborator seams of the SOFA core: the blockchain RPC client and the
// secure message transport, plus in-process implementations of both.

pub mod chain;
pub mod error;
pub mod loopback;
pub mod memory_chain;
pub mod transport;

pub use chain::{ChainClient, ObservedTransaction, TxReceipt, TxStatus};
pub use error::{ChainError, TransportError};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use memory_chain::MemoryChain;
pub use transport::{InboundPayload, SecureTransport};
