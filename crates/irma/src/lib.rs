//! IRMA server library.
//!
//! Wires the protocol engine to its collaborators: the trust store and
//! issuer keys named in the configuration, the Ed25519 proof oracle, the
//! HTTP surface and the background session sweep.

pub mod config;
pub mod error;
pub mod http;

pub use config::{HttpConfig, RootConfig, SessionsConfig};
pub use error::{RootError, RootResult};
pub use http::{build_router, ApiError, AppState};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use irma_core::{
    Ed25519Issuer, Ed25519Verifier, InMemoryTrustStore, IssuerIdentifier, PublicKey, TrustStore,
};
use irma_server::{Collaborators, Server};

/// Initialized server with the configuration it was built from.
pub struct RootState {
    pub config: RootConfig,
    pub server: Arc<Server>,
}

/// Load the trust store and issuer keys and build the engine.
///
/// Every issuer key must have its public half in the trust store, otherwise
/// credentials issued with it could never be verified.
pub fn initialize_root(config: RootConfig) -> RootResult<RootState> {
    config.validate()?;

    info!(
        trust_store = %config.trust_store_path.display(),
        url = %config.normalized_url(),
        "initializing irma server"
    );

    let store = InMemoryTrustStore::load(&config.trust_store_path)?;
    let issuer = match &config.issuer_keys_path {
        Some(dir) => Ed25519Issuer::load_dir(dir)?,
        None => {
            debug!("no issuer keys configured; issuance sessions will be rejected");
            Ed25519Issuer::new()
        }
    };
    check_issuer_keys(&store, &issuer)?;

    let collaborators = Collaborators {
        trust_store: Arc::new(store),
        verifier: Arc::new(Ed25519Verifier),
        issuer: Arc::new(issuer),
    };
    let server = Arc::new(Server::new(config.server_config(), collaborators));

    Ok(RootState { config, server })
}

fn check_issuer_keys(store: &InMemoryTrustStore, issuer: &Ed25519Issuer) -> RootResult<()> {
    for id in issuer.issuers() {
        let Some(own) = issuer.public_key(id) else {
            continue;
        };
        match store.public_key(id, own.counter)? {
            Some(published) if published.key == own.key => {}
            Some(_) => {
                return Err(RootError::Config(format!(
                    "issuer key for {} (counter {}) does not match the trust store",
                    id, own.counter
                )))
            }
            None => {
                return Err(RootError::Config(format!(
                    "trust store has no public key for {} (counter {})",
                    id, own.counter
                )))
            }
        }
    }
    Ok(())
}

/// Create a signing key for `issuer` in `dir` and return its public key,
/// ready to be added to the trust store.
pub fn generate_issuer_key(
    dir: &Path,
    issuer: IssuerIdentifier,
    counter: u32,
) -> RootResult<(PathBuf, PublicKey)> {
    let path = dir.join(format!("{}.json", issuer));
    if path.exists() {
        return Err(RootError::Config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let mut keys = Ed25519Issuer::new();
    let file = keys.generate(issuer.clone(), counter);
    let public_key = keys
        .public_key(&issuer)
        .ok_or_else(|| RootError::Internal(format!("generated key for {issuer} missing")))?;

    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;
    info!(issuer = %issuer, counter, path = %path.display(), "issuer key generated");
    Ok((path, public_key))
}

/// Run the idle sweep every `period` until the runtime shuts down.
pub fn spawn_sweeper(server: Arc<Server>, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = server.sweep() {
                warn!(error = %e, "session sweep failed");
            }
        }
    })
}
