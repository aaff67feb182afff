//! Request/response services between a [`Responder`] and its [`Requester`]s.
//!
//! A responder binds handlers to service names and answers requests from one
//! bounded queue. A requester polls until the service is reachable, sends a
//! request and awaits the matching [`PendingCall`]. Requests travel through a
//! [`Transport`]: the in-process [`Context`] or a [`tcp::TcpLink`].

mod config;
mod context;
mod error;
mod pending;
mod requester;
mod responder;
mod service;
pub mod tcp;
mod transport;

#[cfg(test)]
mod testing;

pub use config::*;
pub use context::Context;
pub use error::Error;
pub use pending::*;
pub use requester::Requester;
pub use responder::*;
pub use service::Service;
pub use transport::{Envelope, Reply, Transport};

/// Completes on Ctrl-C.
///
/// If the handler cannot be installed the error is logged and the future
/// never completes.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Installing the interrupt handler failed with: '{}'.", e);
        std::future::pending::<()>().await;
    }
}
