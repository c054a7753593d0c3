/// Namespace of every header that travels over the secure transport.
pub const WIRE_NAMESPACE: &str = "SOFA::";

/// Namespace of headers that only ever live in the local store.
pub const LOCAL_NAMESPACE: &str = "LOCAL::";

pub const TAG_MESSAGE: &str = "SOFA::Message:";
pub const TAG_COMMAND: &str = "SOFA::Command:";
pub const TAG_PAYMENT_REQUEST: &str = "SOFA::PaymentRequest:";
pub const TAG_PAYMENT: &str = "SOFA::Payment:";
pub const TAG_INIT: &str = "SOFA::Init:";
pub const TAG_INIT_REQUEST: &str = "SOFA::InitRequest:";
pub const TAG_TIMESTAMP: &str = "LOCAL::Timestamp:";
pub const TAG_LOCAL_STATUS: &str = "LOCAL::Status:";

/// Key under which a cached fiat price rides along inside a body.
/// Stripped before anything is handed to the transport.
pub const LOCAL_PRICE_KEY: &str = "localPrice";

/// Bytes of the blake3(pubkey) digest that make up a wallet address.
pub const ADDRESS_SIZE: usize = 20;

/// Transaction hash size in bytes.
pub const TX_HASH_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SESSION_KEY: &str = "sofa-session-key-v1";
pub const KDF_CONTEXT_TX_HASH: &str = "sofa-tx-hash-v1";

/// Fields requested from a peer by an InitRequest.
pub const INIT_FIELDS: [&str; 2] = ["paymentAddress", "language"];

/// Language reported in Init responses when none is configured.
pub const DEFAULT_LANGUAGE: &str = "en";
