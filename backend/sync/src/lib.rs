//! Documentation of a shared pantry tracker.
//!
//!
//!
//! # General Infrastructure
//! - Every client talks straight to the document store, there is no backend service of our own
//! - A group key (6 chars, `[0-9A-Z]`) scopes every read and write, anyone holding the key is a member
//! - The key is kept in local storage so a restart resumes the same group
//! - Items and recipes live in two sub-collections per group
//!
//!
//!
//! # Flow
//!
//! - User action goes through [`mutations::Mutations`], which validates and writes to the [`gateway::Gateway`]
//! - The gateway's change stream fires for every client watching that group
//! - [`live::LiveSync`] replaces the matching list in the [`live::PantryView`]
//! - Front-ends re-render from the view, filtered through [`search`]
//! - Switching groups tears the subscriptions down and rebuilds them against the new key
//!
//!
//!
//! # Notes
//!
//! ## Consistency
//! The store is the only source of truth. Writes never patch the local lists, the subscription round-trips them.
//! Concurrent writers get last-write-wins per document, which is what the store gives us and is acceptable for a
//! shared shopping list.
//!
//! ## Group keys
//! 36^6 is roughly 2.2 billion keys. Creating a group claims the key's marker only if it is absent and draws
//! again when it is taken, so two clients never end up sharing a fresh group.
//!
//!
//!
//! # Setup
//!
//! Point the client at Redis.
//! ```sh
//! export PANTRY_REDIS_URL=redis://127.0.0.1:6379
//! ```
//!
//! Or as a secret.
//! ```sh
//! echo "redis://:password@redis:6379" > /run/secrets/PANTRY_REDIS_URL
//! ```
//!
//! Logs.
//! ```sh
//! RUST_LOG=pantry=debug pantry-tracker watch
//! ```
use tokio::signal::{self, ctrl_c};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod live;
pub mod memory;
pub mod mutations;
pub mod search;
pub mod session;

pub use config::Config;
pub use error::{GatewayError, PantryError};
pub use gateway::{Gateway, Subscription};
pub use live::{PantryView, SyncState};
pub use session::{Session, SessionContext};

pub fn init_tracing() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
