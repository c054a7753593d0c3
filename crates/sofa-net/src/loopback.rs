//! In-process [`SecureTransport`] connecting peers through a shared hub.
//!
//! Every frame is sealed with a per-pair session key before it enters the
//! hub and opened by a task owned by the receiving endpoint, so payloads
//! never cross the hub in clear text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use sofa_shared::crypto::{decrypt, derive_session_key, encrypt};
use sofa_shared::{GroupId, PeerId, ThreadId};

use crate::error::TransportError;
use crate::transport::{InboundPayload, SecureTransport};

const INBOX_CAPACITY: usize = 256;

struct Sealed {
    sender: PeerId,
    group: Option<GroupId>,
    ciphertext: Vec<u8>,
}

struct Endpoint {
    frames: mpsc::Sender<Sealed>,
    online: bool,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<PeerId, Endpoint>,
    groups: HashMap<GroupId, Vec<PeerId>>,
}

#[derive(Clone)]
pub struct LoopbackHub {
    secret: [u8; 32],
    state: Arc<Mutex<HubState>>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            secret,
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    /// Register `peer` and return its transport and inbox. Connecting the
    /// same peer again replaces the previous endpoint.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, peer: PeerId) -> (LoopbackTransport, mpsc::Receiver<InboundPayload>) {
        let (frames_tx, mut frames_rx) = mpsc::channel::<Sealed>(INBOX_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);

        if let Ok(mut state) = self.state.lock() {
            state.endpoints.insert(
                peer.clone(),
                Endpoint {
                    frames: frames_tx,
                    online: true,
                },
            );
        }

        let secret = self.secret;
        let local = peer.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                let key = derive_session_key(&secret, local.as_str(), frame.sender.as_str());
                let payload = match decrypt(&key, &frame.ciphertext).map(String::from_utf8) {
                    Ok(Ok(payload)) => payload,
                    _ => {
                        warn!(peer = %local, sender = %frame.sender, "Dropping undecryptable frame");
                        continue;
                    }
                };
                let inbound = InboundPayload {
                    sender: frame.sender,
                    group: frame.group,
                    payload,
                };
                if inbox_tx.send(inbound).await.is_err() {
                    debug!(peer = %local, "Inbox closed, stopping endpoint");
                    break;
                }
            }
        });

        (
            LoopbackTransport {
                local: peer,
                hub: self.clone(),
            },
            inbox_rx,
        )
    }

    /// Take a peer off the network without dropping its endpoint.
    pub fn set_online(&self, peer: &PeerId, online: bool) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(endpoint) = state.endpoints.get_mut(peer) {
                endpoint.online = online;
            }
        }
    }

    pub fn join_group(&self, group: &GroupId, peer: &PeerId) {
        if let Ok(mut state) = self.state.lock() {
            let members = state.groups.entry(group.clone()).or_default();
            if !members.contains(peer) {
                members.push(peer.clone());
            }
        }
    }

    fn deliver(&self, sender: &PeerId, thread: &ThreadId, payload: &str) -> Result<(), TransportError> {
        let state = self
            .state
            .lock()
            .map_err(|_| TransportError::Session("hub state poisoned".to_string()))?;

        let online = |peer: &PeerId| state.endpoints.get(peer).map(|e| e.online);
        if online(sender) != Some(true) {
            return Err(TransportError::Unreachable(sender.to_string()));
        }

        let (recipients, group) = match thread {
            ThreadId::Peer(peer) => (vec![peer.clone()], None),
            ThreadId::Group(group) => {
                let members = state
                    .groups
                    .get(group)
                    .ok_or_else(|| TransportError::UnknownPeer(thread.to_string()))?;
                let others = members.iter().filter(|m| *m != sender).cloned().collect();
                (others, Some(group.clone()))
            }
        };

        for recipient in &recipients {
            match online(recipient) {
                None => return Err(TransportError::UnknownPeer(recipient.to_string())),
                Some(false) => return Err(TransportError::Unreachable(recipient.to_string())),
                Some(true) => {}
            }
        }

        for recipient in &recipients {
            let key = derive_session_key(&self.secret, sender.as_str(), recipient.as_str());
            let ciphertext = encrypt(&key, payload.as_bytes())
                .map_err(|e| TransportError::Session(e.to_string()))?;
            let frame = Sealed {
                sender: sender.clone(),
                group: group.clone(),
                ciphertext,
            };
            let endpoint = state
                .endpoints
                .get(recipient)
                .ok_or_else(|| TransportError::UnknownPeer(recipient.to_string()))?;
            match endpoint.frames.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    return Err(TransportError::Unreachable(recipient.to_string()));
                }
            }
        }
        Ok(())
    }
}

pub struct LoopbackTransport {
    local: PeerId,
    hub: LoopbackHub,
}

#[async_trait]
impl SecureTransport for LoopbackTransport {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    async fn send(&self, thread: &ThreadId, payload: &str) -> Result<(), TransportError> {
        self.hub.deliver(&self.local, thread, payload)?;
        debug!(from = %self.local, thread = %thread, "Delivered frame");
        Ok(())
    }
}
