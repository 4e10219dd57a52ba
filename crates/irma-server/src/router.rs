//! Wallet-facing protocol router.
//!
//! Maps `(method, "<token>[/<verb>]")` onto session handlers. The session
//! lock is held from dispatch until the exactly-once result check, so the
//! first response that observes a finished session carries its result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use irma_core::{Action, Disclosure, IssueCommitmentMessage, ProtocolVersion, SignedMessage};

use crate::error::{ServerError, ServerResult};
use crate::events::StatusReceiver;
use crate::registry::SessionRegistry;
use crate::session::{Collaborators, SessionResult, SessionState, VersionRange};

pub const MIN_VERSION_HEADER: &str = "X-IRMA-MinProtocolVersion";
pub const MAX_VERSION_HEADER: &str = "X-IRMA-MaxProtocolVersion";

// ---------------------------------------------------------------------------
// Path and method parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Bare token: fetch the request or cancel.
    Request,
    Commitments,
    Proofs,
    Status,
    StatusEvents,
}

impl Verb {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "" => Some(Verb::Request),
            "commitments" => Some(Verb::Commitments),
            "proofs" => Some(Verb::Proofs),
            "status" => Some(Verb::Status),
            "statusevents" => Some(Verb::StatusEvents),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Request => "request",
            Verb::Commitments => "commitments",
            Verb::Proofs => "proofs",
            Verb::Status => "status",
            Verb::StatusEvents => "statusevents",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        if method.eq_ignore_ascii_case("GET") {
            Method::Get
        } else if method.eq_ignore_ascii_case("POST") {
            Method::Post
        } else if method.eq_ignore_ascii_case("DELETE") {
            Method::Delete
        } else {
            Method::Other
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Other => "OTHER",
        };
        f.write_str(s)
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `<token>[/<verb>]` into its parts. One leading and one trailing
/// slash are tolerated.
pub fn parse_path(path: &str) -> ServerResult<(String, Verb)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let invalid = || ServerError::Unsupported(format!("invalid path: {path}"));

    let (token, verb) = match trimmed.split_once('/') {
        Some((token, verb)) => (token, verb),
        None => (trimmed, ""),
    };
    if !is_token(token) {
        return Err(invalid());
    }
    let verb = Verb::from_segment(verb).ok_or_else(invalid)?;
    Ok((token.to_string(), verb))
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Versions arrive as JSON `{"major":2,"minor":4}`; a bare `2.4` is accepted too.
fn version_header(headers: &[(String, String)], name: &str) -> ServerResult<ProtocolVersion> {
    let raw = header(headers, name)
        .ok_or_else(|| ServerError::MalformedInput(format!("missing header {name}")))?;
    serde_json::from_str::<ProtocolVersion>(raw)
        .or_else(|_| raw.trim().parse())
        .map_err(|_| ServerError::MalformedInput(format!("invalid {name}: {raw}")))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Router output. `events` is set for a status subscription; the transport
/// streams it in whatever framing it uses.
#[derive(Debug)]
pub struct ProtocolResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
    pub result: Option<SessionResult>,
    pub events: Option<StatusReceiver>,
}

impl ProtocolResponse {
    fn ok(body: Option<serde_json::Value>) -> Self {
        Self {
            status: 200,
            body,
            result: None,
            events: None,
        }
    }

    pub fn error(err: &ServerError) -> Self {
        Self {
            status: err.status(),
            body: serde_json::to_value(err.to_remote()).ok(),
            result: None,
            events: None,
        }
    }
}

enum Reply {
    Json(serde_json::Value),
    Empty,
    Events(StatusReceiver),
}

fn json<T: Serialize>(value: &T) -> ServerResult<Reply> {
    serde_json::to_value(value)
        .map(Reply::Json)
        .map_err(|e| ServerError::Internal(format!("response encoding failed: {e}")))
}

// ---------------------------------------------------------------------------
// ProtocolRouter
// ---------------------------------------------------------------------------

pub struct ProtocolRouter<'a> {
    pub registry: &'a SessionRegistry,
    pub collaborators: &'a Collaborators,
    pub versions: &'a VersionRange,
}

impl ProtocolRouter<'_> {
    pub fn handle(
        &self,
        path: &str,
        method: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> ProtocolResponse {
        tracing::debug!(method = %method, path = %path, "routing protocol message");
        if !body.is_empty() {
            tracing::trace!(body = %String::from_utf8_lossy(body), "protocol message body");
        }

        let (token, verb) = match parse_path(path) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path = %path, "malformed protocol path");
                return ProtocolResponse::error(&e);
            }
        };

        let session = match self.registry.get(&token) {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!(token = %token, "session not found");
                return ProtocolResponse::error(&ServerError::SessionUnknown(token));
            }
            Err(e) => return ProtocolResponse::error(&e),
        };
        let mut state = match session.lock() {
            Ok(state) => state,
            Err(e) => return ProtocolResponse::error(&e),
        };

        let now = Utc::now();
        let method = Method::parse(method);
        let outcome = self.dispatch(
            &mut state,
            session.action(),
            method,
            verb,
            headers,
            body,
            now,
        );
        let mut response = match outcome {
            Ok(reply) => {
                state.touch(now);
                match reply {
                    Reply::Json(value) => ProtocolResponse::ok(Some(value)),
                    Reply::Empty => ProtocolResponse::ok(None),
                    Reply::Events(rx) => ProtocolResponse {
                        events: Some(rx),
                        ..ProtocolResponse::ok(None)
                    },
                }
            }
            Err(e) => {
                tracing::debug!(token = %token, error = %e, "protocol message rejected");
                ProtocolResponse::error(&e)
            }
        };

        if let Some(result) = state.take_result() {
            tracing::info!(
                token = %token,
                status = %result.status,
                proof_status = ?result.proof_status,
                "session done"
            );
            response.result = Some(result);
        }
        response
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        state: &mut SessionState,
        action: Action,
        method: Method,
        verb: Verb,
        headers: &[(String, String)],
        body: &[u8],
        now: DateTime<Utc>,
    ) -> ServerResult<Reply> {
        match (method, verb, action) {
            (Method::Get, Verb::Request, _) => {
                let min = version_header(headers, MIN_VERSION_HEADER)?;
                let max = version_header(headers, MAX_VERSION_HEADER)?;
                json(&state.handle_get_request(min, max, self.versions)?)
            }
            (Method::Delete, Verb::Request, _) => {
                state.handle_delete(now)?;
                Ok(Reply::Empty)
            }
            (Method::Get, Verb::Status, _) => json(&state.handle_get_status()),
            (Method::Get, Verb::StatusEvents, _) => Ok(Reply::Events(state.subscribe()?)),
            (Method::Post, Verb::Commitments, Action::Issuing) => {
                let message: IssueCommitmentMessage = serde_json::from_slice(body)?;
                json(&state.handle_post_commitments(&message, self.collaborators, now)?)
            }
            (Method::Post, Verb::Proofs, Action::Disclosing) => {
                let disclosure: Disclosure = serde_json::from_slice(body)?;
                json(&state.handle_post_disclosure(&disclosure, self.collaborators, now)?)
            }
            (Method::Post, Verb::Proofs, Action::Signing) => {
                let signature: SignedMessage = serde_json::from_slice(body)?;
                json(&state.handle_post_signature(signature, self.collaborators, now)?)
            }
            _ => Err(ServerError::InvalidRequest(format!(
                "{method} {verb} not allowed in a {action} session"
            ))),
        }
    }
}
