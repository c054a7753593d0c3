//! # sofa-client
//!
//! Transaction-and-delivery core of the SOFA messenger: signs and submits
//! payments, tracks them to confirmation, and delivers typed envelopes to
//! peers while keeping the local conversation store consistent.
//!
//! Construct a [`SofaClient`] with a [`ChainClient`](sofa_net::ChainClient)
//! and a [`SecureTransport`](sofa_net::SecureTransport), then unlock the
//! wallet. Everything else is driven by method calls and observed through
//! the store's change feeds.

pub mod builder;
pub mod claims;
pub mod client;
pub mod config;
pub mod context;
pub mod events;
pub mod inbound;
pub mod incoming;
pub mod outgoing;
pub mod queue;
pub mod readiness;
pub mod signer;
pub mod updates;

mod error;

#[cfg(test)]
mod tests;

use tracing_subscriber::{fmt, EnvFilter};

pub use builder::{PaymentTask, TaskOrigin};
pub use client::SofaClient;
pub use config::ClientConfig;
pub use context::Context;
pub use error::{ClientError, Result};
pub use events::{ExternalOutcome, ExternalPaymentEvent};
pub use queue::{DeliveryMode, DeliveryQueue, DeliveryTask};
pub use updates::ReconcileReport;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sofa_client=debug,sofa_store=info,sofa_net=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
