//! Secure message transport seam.

use async_trait::async_trait;

use sofa_shared::{GroupId, PeerId, ThreadId};

use crate::error::TransportError;

/// A decrypted envelope delivered to the local peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPayload {
    pub sender: PeerId,
    /// Set when the envelope was addressed to a group thread.
    pub group: Option<GroupId>,
    pub payload: String,
}

impl InboundPayload {
    /// Thread the envelope belongs to on the receiving side.
    pub fn thread(&self) -> ThreadId {
        match &self.group {
            Some(group) => ThreadId::Group(group.clone()),
            None => ThreadId::peer(&self.sender),
        }
    }
}

/// Session-based encrypted channel. Implementations own key agreement and
/// group fan-out; callers hand over an already-encoded envelope string.
#[async_trait]
pub trait SecureTransport: Send + Sync {
    /// Identity of the local peer on this transport.
    fn local_peer(&self) -> &PeerId;

    /// Encrypt and deliver `payload` to every member of `thread`.
    ///
    /// Returns once the transport has accepted the payload.
    async fn send(&self, thread: &ThreadId, payload: &str) -> Result<(), TransportError>;
}
