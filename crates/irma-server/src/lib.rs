pub mod error;
pub mod events;
pub mod issuance;
pub mod registry;
pub mod router;
pub mod session;
pub mod verify;

#[cfg(test)]
mod fixtures;

pub use error::*;
pub use events::*;
pub use registry::{SessionRegistry, SweepReport};
pub use router::{parse_path, Method, ProtocolResponse, Verb, MAX_VERSION_HEADER, MIN_VERSION_HEADER};
pub use session::*;

use chrono::{Duration, Utc};
use std::sync::Arc;

use irma_core::{ProtocolVersion, Qr, SessionRequest};

use crate::issuance::validate_issuance_request;
use crate::router::ProtocolRouter;

/// Protocol versions spoken when nothing else is configured.
pub const DEFAULT_VERSIONS: VersionRange = VersionRange {
    min: ProtocolVersion::new(2, 0),
    max: ProtocolVersion::new(2, 4),
};

/// Engine settings. Built by the embedding binary; the engine reads no
/// files or environment itself.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public URL the wallet reaches the protocol endpoints on.
    pub url: String,
    pub session_timeout: Duration,
    pub result_retention: Duration,
    pub versions: VersionRange,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            session_timeout: Duration::minutes(5),
            result_retention: Duration::minutes(5),
            versions: DEFAULT_VERSIONS,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Requestor and wallet entry points over one session registry.
pub struct Server {
    config: ServerConfig,
    registry: SessionRegistry,
    collaborators: Collaborators,
}

impl Server {
    pub fn new(mut config: ServerConfig, collaborators: Collaborators) -> Self {
        if config.url.is_empty() {
            tracing::warn!("no public url configured; wallets will not be able to connect");
        } else if !config.url.ends_with('/') {
            config.url.push('/');
        }
        Self {
            config,
            registry: SessionRegistry::new(),
            collaborators,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Validate and register a session request.
    pub fn start_session(&self, mut request: SessionRequest) -> ServerResult<(Qr, String)> {
        let now = Utc::now();
        let store = self.collaborators.trust_store.as_ref();
        if let Some(disjunction) = request
            .disjunctions()
            .iter()
            .find(|d| !d.matches_store(store))
        {
            return Err(ServerError::InvalidRequest(format!(
                "disjunction '{}' references unknown attributes",
                disjunction.label
            )));
        }
        if let SessionRequest::Issuing(issuance) = &mut request {
            validate_issuance_request(issuance, store, self.collaborators.issuer.as_ref(), now)?;
        }

        let base = request.base_mut();
        if base.nonce.is_none() {
            base.nonce = Some(hex::encode(rand::random::<[u8; 32]>()));
        }
        if base.context.is_none() {
            base.context = Some(hex::encode(rand::random::<[u8; 16]>()));
        }

        let action = request.action();
        let attributes = purged_attributes(&request);
        if tracing::enabled!(tracing::Level::TRACE) {
            if let Ok(json) = serde_json::to_string(&request) {
                tracing::trace!(request = %json, "session request");
            }
        }

        let session = self.registry.create(request, now)?;
        let token = session.token().to_string();
        tracing::info!(action = %action, token = %token, "session started");
        tracing::debug!(token = %token, attributes = ?attributes, "session request");

        let qr = Qr {
            u: format!("{}{}", self.config.url, token),
            irmaqr: action,
        };
        Ok((qr, token))
    }

    fn session(&self, token: &str) -> ServerResult<Arc<Session>> {
        self.registry.get(token)?.ok_or_else(|| {
            tracing::warn!(token = %token, "unknown session");
            ServerError::SessionUnknown(token.to_string())
        })
    }

    /// Current result, readable any number of times.
    pub fn session_result(&self, token: &str) -> ServerResult<SessionResult> {
        Ok(self.session(token)?.lock()?.result().clone())
    }

    pub fn session_request(&self, token: &str) -> ServerResult<SessionRequest> {
        Ok(self.session(token)?.lock()?.request().clone())
    }

    pub fn cancel_session(&self, token: &str) -> ServerResult<()> {
        let session = self.session(token)?;
        let mut state = session.lock()?;
        state.handle_delete(Utc::now())?;
        tracing::info!(token = %token, "session cancelled by requestor");
        Ok(())
    }

    /// Status updates for a live session. Fails right away for unknown or
    /// finished sessions.
    pub fn subscribe_status(&self, token: &str) -> ServerResult<StatusReceiver> {
        let session = self.session(token)?;
        let state = session.lock()?;
        state.subscribe()
    }

    pub fn handle_protocol_message(
        &self,
        path: &str,
        method: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> ProtocolResponse {
        ProtocolRouter {
            registry: &self.registry,
            collaborators: &self.collaborators,
            versions: &self.config.versions,
        }
        .handle(path, method, headers, body)
    }

    /// One pass of the idle sweep at the current time.
    pub fn sweep(&self) -> ServerResult<SweepReport> {
        self.registry.sweep(
            Utc::now(),
            self.config.session_timeout,
            self.config.result_retention,
        )
    }
}

/// Attribute identifiers a request mentions, without any values.
fn purged_attributes(request: &SessionRequest) -> Vec<String> {
    let mut ids: Vec<String> = request
        .disjunctions()
        .iter()
        .flat_map(|d| d.attributes.iter().map(|a| a.to_string()))
        .collect();
    if let SessionRequest::Issuing(issuance) = request {
        for credential in &issuance.credentials {
            ids.extend(
                credential
                    .attributes
                    .keys()
                    .map(|name| format!("{}.{}", credential.credential, name)),
            );
        }
    }
    ids
}
