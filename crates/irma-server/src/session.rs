//! Per-session state machine.
//!
//! All transition handlers live on `SessionState` and are reached through
//! `Session::lock`, so every verb on one session runs under that session's
//! mutex. Terminal states are never left.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use irma_core::{
    Action, CredentialIssuer, DisclosedAttribute, Disclosure, IssueCommitmentMessage,
    IssueSignatureMessage, ProofStatus, ProofVerifier, ProtocolVersion, SessionRequest,
    SignedMessage, TrustStore,
};

use crate::error::{RemoteError, ServerError, ServerResult};
use crate::events::{EventNotifier, StatusReceiver};
use crate::issuance::issue_credentials;
use crate::verify::{verify_disclosure, Verification};

/// Upper bound on a requested client timeout.
const MAX_CLIENT_TIMEOUT_SECS: i64 = 60 * 60 * 24 * 365;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Connected,
    Done,
    Cancelled,
    Timeout,
}

impl SessionStatus {
    /// Done, cancelled or timed out.
    pub fn finished(self) -> bool {
        matches!(
            self,
            SessionStatus::Done | SessionStatus::Cancelled | SessionStatus::Timeout
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Created => "CREATED",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Done => "DONE",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// SessionResult
// ---------------------------------------------------------------------------

/// What the requestor learns about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub token: String,
    pub status: SessionStatus,
    #[serde(rename = "type")]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_status: Option<ProofStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disclosed: Vec<DisclosedAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

// ---------------------------------------------------------------------------
// Collaborators and version range
// ---------------------------------------------------------------------------

/// External services the handlers consult.
#[derive(Clone)]
pub struct Collaborators {
    pub trust_store: Arc<dyn TrustStore>,
    pub verifier: Arc<dyn ProofVerifier>,
    pub issuer: Arc<dyn CredentialIssuer>,
}

/// Inclusive range of protocol versions the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: ProtocolVersion,
    pub max: ProtocolVersion,
}

impl VersionRange {
    /// Highest version both sides support.
    pub fn negotiate(
        &self,
        client_min: ProtocolVersion,
        client_max: ProtocolVersion,
    ) -> ServerResult<ProtocolVersion> {
        if client_min > client_max || client_max < self.min || client_min > self.max {
            return Err(ServerError::VersionNotSupported(format!(
                "server supports {} to {}, client {} to {}",
                self.min, self.max, client_min, client_max
            )));
        }
        Ok(client_max.min(self.max))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    token: String,
    action: Action,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(token: String, request: SessionRequest, now: DateTime<Utc>) -> Self {
        let action = request.action();
        let state = SessionState {
            status: SessionStatus::Created,
            result: SessionResult {
                token: token.clone(),
                status: SessionStatus::Created,
                action,
                proof_status: None,
                disclosed: Vec::new(),
                signature: None,
                error: None,
            },
            request,
            version: None,
            returned: false,
            created: now,
            last_active: now,
            finished_at: None,
            events: EventNotifier::new(SessionStatus::Created),
        };
        Self {
            token,
            action,
            state: Mutex::new(state),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn lock(&self) -> ServerResult<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|e| ServerError::Internal(format!("session lock poisoned: {e}")))
    }
}

pub struct SessionState {
    status: SessionStatus,
    request: SessionRequest,
    result: SessionResult,
    version: Option<ProtocolVersion>,
    returned: bool,
    created: DateTime<Utc>,
    last_active: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    events: EventNotifier,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn request(&self) -> &SessionRequest {
        &self.request
    }

    pub fn result(&self) -> &SessionResult {
        &self.result
    }

    /// Negotiated protocol version, once connected.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    /// When the session reached a terminal status.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = now;
    }

    fn transition(&mut self, to: SessionStatus) {
        if self.status.finished() {
            tracing::warn!(token = %self.result.token, from = %self.status, to = %to, "refusing to leave terminal state");
            return;
        }
        tracing::debug!(token = %self.result.token, from = %self.status, to = %to, "session transition");
        self.status = to;
        self.result.status = to;
        self.events.publish(to);
    }

    /// Enter a terminal status, starting the retention clock.
    fn finish(&mut self, to: SessionStatus, now: DateTime<Utc>) {
        self.transition(to);
        if self.status.finished() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
    }

    fn expect_connected(&self, action: Action) -> ServerResult<()> {
        if self.request.action() != action {
            return Err(ServerError::InvalidRequest(format!(
                "not supported in a {} session",
                self.request.action()
            )));
        }
        if self.status != SessionStatus::Connected {
            return Err(ServerError::InvalidRequest(format!(
                "session is {}, expected CONNECTED",
                self.status
            )));
        }
        Ok(())
    }

    fn complete(&mut self, verification: Verification, now: DateTime<Utc>) {
        self.result.proof_status = Some(verification.status);
        self.result.disclosed = verification.disclosed;
        self.finish(SessionStatus::Done, now);
    }

    /// Version negotiation plus request retrieval. A failed negotiation
    /// leaves the session in CREATED so the wallet can retry.
    pub fn handle_get_request(
        &mut self,
        client_min: ProtocolVersion,
        client_max: ProtocolVersion,
        supported: &VersionRange,
    ) -> ServerResult<SessionRequest> {
        if self.status != SessionStatus::Created {
            return Err(ServerError::InvalidRequest(format!(
                "session is {}, request already retrieved",
                self.status
            )));
        }
        let version = supported.negotiate(client_min, client_max)?;
        self.version = Some(version);
        self.transition(SessionStatus::Connected);
        tracing::info!(token = %self.result.token, version = %version, "wallet connected");
        Ok(self.request.clone())
    }

    pub fn handle_get_status(&self) -> SessionStatus {
        self.status
    }

    pub fn handle_delete(&mut self, now: DateTime<Utc>) -> ServerResult<()> {
        if self.status.finished() {
            return Err(ServerError::InvalidRequest(format!(
                "session already {}",
                self.status
            )));
        }
        self.finish(SessionStatus::Cancelled, now);
        Ok(())
    }

    pub fn handle_post_disclosure(
        &mut self,
        disclosure: &Disclosure,
        collaborators: &Collaborators,
        now: DateTime<Utc>,
    ) -> ServerResult<ProofStatus> {
        self.expect_connected(Action::Disclosing)?;
        let binding = self.request.binding();
        let mut disjunctions = self.request.disjunctions().to_vec();
        let verification = verify_disclosure(
            &disclosure.proofs,
            &mut disjunctions,
            &binding,
            collaborators.trust_store.as_ref(),
            collaborators.verifier.as_ref(),
            now,
        )?;
        let status = verification.status;
        self.request.disjunctions_mut().clone_from_slice(&disjunctions);
        self.complete(verification, now);
        Ok(status)
    }

    pub fn handle_post_signature(
        &mut self,
        signature: SignedMessage,
        collaborators: &Collaborators,
        now: DateTime<Utc>,
    ) -> ServerResult<ProofStatus> {
        self.expect_connected(Action::Signing)?;
        let binding = self.request.binding();
        let verification = if binding.message.as_deref() != Some(signature.message.as_str()) {
            Verification {
                status: ProofStatus::UnmatchedRequest,
                disclosed: Vec::new(),
            }
        } else {
            let mut disjunctions = self.request.disjunctions().to_vec();
            let verification = verify_disclosure(
                &signature.proofs,
                &mut disjunctions,
                &binding,
                collaborators.trust_store.as_ref(),
                collaborators.verifier.as_ref(),
                now,
            )?;
            self.request.disjunctions_mut().clone_from_slice(&disjunctions);
            verification
        };
        let status = verification.status;
        self.result.signature = Some(signature);
        self.complete(verification, now);
        Ok(status)
    }

    /// Verify the accompanying disclosure and, if it holds, issue the
    /// requested credentials. Nothing is issued for a failed disclosure.
    pub fn handle_post_commitments(
        &mut self,
        message: &IssueCommitmentMessage,
        collaborators: &Collaborators,
        now: DateTime<Utc>,
    ) -> ServerResult<Vec<IssueSignatureMessage>> {
        self.expect_connected(Action::Issuing)?;
        let SessionRequest::Issuing(request) = &self.request else {
            return Err(ServerError::Internal("issuing session without issuance request".into()));
        };
        if message.commitments.len() != request.credentials.len() {
            return Err(ServerError::MalformedInput(format!(
                "expected {} commitments, got {}",
                request.credentials.len(),
                message.commitments.len()
            )));
        }

        let binding = self.request.binding();
        let mut disjunctions = request.disclose.clone();
        let verification = verify_disclosure(
            &message.proofs,
            &mut disjunctions,
            &binding,
            collaborators.trust_store.as_ref(),
            collaborators.verifier.as_ref(),
            now,
        )?;
        if verification.status != ProofStatus::Valid {
            self.request.disjunctions_mut().clone_from_slice(&disjunctions);
            self.complete(verification, now);
            return Ok(Vec::new());
        }

        let signatures = issue_credentials(
            request,
            &message.commitments,
            &binding,
            collaborators.trust_store.as_ref(),
            collaborators.issuer.as_ref(),
            now,
        )?;
        self.request.disjunctions_mut().clone_from_slice(&disjunctions);
        self.complete(verification, now);
        Ok(signatures)
    }

    /// The full result the first time a finished session is observed,
    /// `None` on every later call.
    pub fn take_result(&mut self) -> Option<SessionResult> {
        if self.status.finished() && !self.returned {
            self.returned = true;
            return Some(self.result.clone());
        }
        None
    }

    /// Register a status subscriber. Finished sessions have nothing left to
    /// report.
    pub fn subscribe(&self) -> ServerResult<StatusReceiver> {
        if self.status.finished() {
            return Err(ServerError::InvalidRequest(format!(
                "can't subscribe to finished session {}",
                self.result.token
            )));
        }
        Ok(self.events.subscribe())
    }

    /// Idle limit for this session: the request's client timeout while the
    /// wallet has not connected yet, otherwise `default`.
    pub fn idle_timeout(&self, default: Duration) -> Duration {
        match (self.status, self.request.base().client_timeout) {
            (SessionStatus::Created, Some(secs)) => Duration::seconds(
                i64::try_from(secs)
                    .unwrap_or(i64::MAX)
                    .min(MAX_CLIENT_TIMEOUT_SECS),
            ),
            _ => default,
        }
    }

    /// Move an idle unfinished session to TIMEOUT. Returns whether it did.
    pub fn expire_if_idle(&mut self, now: DateTime<Utc>, default: Duration) -> bool {
        if self.status.finished() || now - self.last_active <= self.idle_timeout(default) {
            return false;
        }
        tracing::info!(token = %self.result.token, status = %self.status, "session timed out");
        self.finish(SessionStatus::Timeout, now);
        true
    }

    /// Finished longer than `retention` ago. Activity after termination
    /// does not extend the window.
    pub fn removable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|finished| now - finished > retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use irma_core::{AttributeDisjunction, ProofBinding};

    const RANGE: VersionRange = VersionRange {
        min: ProtocolVersion::new(2, 3),
        max: ProtocolVersion::new(2, 4),
    };

    fn v(major: u32, minor: u32) -> ProtocolVersion {
        ProtocolVersion::new(major, minor)
    }

    fn session(request: SessionRequest) -> Session {
        Session::new("token".into(), request, Utc::now())
    }

    fn connected(request: SessionRequest) -> Session {
        let s = session(request);
        s.lock()
            .unwrap()
            .handle_get_request(v(2, 0), v(2, 4), &RANGE)
            .unwrap();
        s
    }

    fn binding() -> ProofBinding {
        ProofBinding {
            nonce: "nonce".into(),
            context: "context".into(),
            message: None,
        }
    }

    fn id_request() -> SessionRequest {
        disclosure_request(vec![AttributeDisjunction::new("ID", vec![student_id()])])
    }

    #[test]
    fn test_negotiate_picks_highest_common() {
        assert_eq!(RANGE.negotiate(v(2, 0), v(2, 4)).unwrap(), v(2, 4));
        assert_eq!(RANGE.negotiate(v(2, 0), v(2, 3)).unwrap(), v(2, 3));
        assert_eq!(RANGE.negotiate(v(2, 4), v(3, 0)).unwrap(), v(2, 4));
        assert!(RANGE.negotiate(v(2, 0), v(2, 2)).is_err());
        assert!(RANGE.negotiate(v(2, 5), v(3, 0)).is_err());
        assert!(RANGE.negotiate(v(2, 4), v(2, 3)).is_err());
    }

    #[test]
    fn test_get_request_connects() {
        let s = session(id_request());
        let mut state = s.lock().unwrap();
        let request = state.handle_get_request(v(2, 0), v(2, 4), &RANGE).unwrap();
        assert_eq!(request.action(), Action::Disclosing);
        assert_eq!(state.status(), SessionStatus::Connected);
        assert_eq!(state.version(), Some(v(2, 4)));

        let again = state.handle_get_request(v(2, 0), v(2, 4), &RANGE);
        assert!(matches!(again, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn test_failed_negotiation_stays_created() {
        let s = session(id_request());
        let mut state = s.lock().unwrap();
        let err = state
            .handle_get_request(v(1, 0), v(1, 1), &RANGE)
            .unwrap_err();
        assert!(matches!(err, ServerError::VersionNotSupported(_)));
        assert_eq!(state.status(), SessionStatus::Created);
        assert!(state.version().is_none());

        state.handle_get_request(v(2, 0), v(2, 4), &RANGE).unwrap();
        assert_eq!(state.status(), SessionStatus::Connected);
    }

    #[test]
    fn test_valid_disclosure_completes() {
        let f = fixture();
        let s = connected(id_request());
        let proof = prove(&f, valid_metadata(), &[(2, "456")], &binding());
        let mut state = s.lock().unwrap();
        let status = state
            .handle_post_disclosure(&Disclosure { proofs: vec![proof] }, &f.collaborators, Utc::now())
            .unwrap();
        assert_eq!(status, ProofStatus::Valid);
        assert_eq!(state.status(), SessionStatus::Done);
        assert_eq!(state.result().proof_status, Some(ProofStatus::Valid));
        assert_eq!(state.request().disjunctions()[0].selected(), Some(&student_id()));
    }

    #[test]
    fn test_invalid_proof_still_completes() {
        let f = fixture();
        let s = connected(id_request());
        let mut proof = prove(&f, valid_metadata(), &[(2, "456")], &binding());
        proof.proof = "00".into();
        let mut state = s.lock().unwrap();
        let status = state
            .handle_post_disclosure(&Disclosure { proofs: vec![proof] }, &f.collaborators, Utc::now())
            .unwrap();
        assert_eq!(status, ProofStatus::Invalid);
        assert_eq!(state.status(), SessionStatus::Done);
    }

    #[test]
    fn test_wrong_action_leaves_state() {
        let f = fixture();
        let s = connected(id_request());
        let mut state = s.lock().unwrap();
        let message = IssueCommitmentMessage {
            proofs: vec![],
            commitments: vec!["c".into()],
            nonce2: "n2".into(),
        };
        let err = state
            .handle_post_commitments(&message, &f.collaborators, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
        assert_eq!(state.status(), SessionStatus::Connected);
    }

    #[test]
    fn test_post_before_connect_is_rejected() {
        let f = fixture();
        let s = session(id_request());
        let mut state = s.lock().unwrap();
        let err = state
            .handle_post_disclosure(&Disclosure { proofs: vec![] }, &f.collaborators, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
        assert_eq!(state.status(), SessionStatus::Created);
    }

    #[test]
    fn test_signature_message_mismatch() {
        let f = fixture();
        let s = connected(signature_request("I owe you"));
        let mut state = s.lock().unwrap();
        let signed = SignedMessage {
            message: "I owe you nothing".into(),
            proofs: vec![],
        };
        let status = state
            .handle_post_signature(signed, &f.collaborators, Utc::now())
            .unwrap();
        assert_eq!(status, ProofStatus::UnmatchedRequest);
        assert_eq!(state.status(), SessionStatus::Done);
        assert!(state.result().signature.is_some());
    }

    #[test]
    fn test_valid_signature() {
        let f = fixture();
        let s = connected(signature_request("I owe you"));
        let mut state = s.lock().unwrap();
        let binding = state.request().binding();
        let proof = prove(&f, valid_metadata(), &[(2, "456")], &binding);
        let signed = SignedMessage {
            message: "I owe you".into(),
            proofs: vec![proof],
        };
        let status = state
            .handle_post_signature(signed, &f.collaborators, Utc::now())
            .unwrap();
        assert_eq!(status, ProofStatus::Valid);
    }

    #[test]
    fn test_issuance_flow() {
        let f = fixture();
        let mut request = issuance_request();
        if let SessionRequest::Issuing(r) = &mut request {
            crate::issuance::validate_issuance_request(
                r,
                f.collaborators.trust_store.as_ref(),
                f.collaborators.issuer.as_ref(),
                Utc::now(),
            )
            .unwrap();
        }
        let s = connected(request);
        let mut state = s.lock().unwrap();

        let short = IssueCommitmentMessage {
            proofs: vec![],
            commitments: vec![],
            nonce2: "n2".into(),
        };
        let err = state
            .handle_post_commitments(&short, &f.collaborators, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ServerError::MalformedInput(_)));
        assert_eq!(state.status(), SessionStatus::Connected);

        let message = IssueCommitmentMessage {
            proofs: vec![],
            commitments: vec!["commitment".into()],
            nonce2: "n2".into(),
        };
        let signatures = state
            .handle_post_commitments(&message, &f.collaborators, Utc::now())
            .unwrap();
        assert_eq!(signatures.len(), 1);
        assert_eq!(state.status(), SessionStatus::Done);
        assert_eq!(state.result().proof_status, Some(ProofStatus::Valid));
    }

    #[test]
    fn test_delete_and_terminal_monotonic() {
        let s = session(id_request());
        let mut state = s.lock().unwrap();
        state.handle_delete(Utc::now()).unwrap();
        assert_eq!(state.status(), SessionStatus::Cancelled);

        assert!(state.handle_delete(Utc::now()).is_err());
        assert!(state
            .handle_get_request(v(2, 0), v(2, 4), &RANGE)
            .is_err());
        assert!(!state.expire_if_idle(Utc::now() + Duration::hours(1), Duration::minutes(5)));
        assert_eq!(state.status(), SessionStatus::Cancelled);
    }

    #[test]
    fn test_take_result_exactly_once() {
        let s = session(id_request());
        let mut state = s.lock().unwrap();
        assert!(state.take_result().is_none());
        state.handle_delete(Utc::now()).unwrap();
        let first = state.take_result().unwrap();
        assert_eq!(first.status, SessionStatus::Cancelled);
        for _ in 0..5 {
            assert!(state.take_result().is_none());
        }
    }

    #[tokio::test]
    async fn test_delete_wakes_subscriber() {
        let s = session(id_request());
        let mut rx = s.lock().unwrap().subscribe().unwrap();
        s.lock().unwrap().handle_delete(Utc::now()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionStatus::Cancelled);
        assert!(s.lock().unwrap().subscribe().is_err());
    }

    #[test]
    fn test_idle_timeout_and_retention() {
        let start = Utc::now();
        let s = Session::new("t".into(), id_request(), start);
        let mut state = s.lock().unwrap();
        let timeout = Duration::minutes(5);

        assert!(!state.expire_if_idle(start + Duration::minutes(1), timeout));
        let later = start + Duration::minutes(6);
        assert!(state.expire_if_idle(later, timeout));
        assert_eq!(state.status(), SessionStatus::Timeout);

        assert!(!state.removable(later + Duration::minutes(1), timeout));
        assert!(state.removable(later + Duration::minutes(6), timeout));
    }

    #[test]
    fn test_retention_counts_from_termination() {
        let start = Utc::now();
        let s = Session::new("t".into(), id_request(), start);
        let mut state = s.lock().unwrap();
        let retention = Duration::minutes(5);

        state.handle_delete(start).unwrap();
        assert_eq!(state.finished_at(), Some(start));
        for minutes in 1..=5 {
            state.touch(start + Duration::minutes(minutes));
            assert_eq!(state.handle_get_status(), SessionStatus::Cancelled);
        }
        assert!(state.removable(start + Duration::minutes(6), retention));
    }

    #[test]
    fn test_client_timeout_applies_while_created() {
        let mut request = id_request();
        request.base_mut().client_timeout = Some(30);
        let s = session(request);
        let mut state = s.lock().unwrap();
        assert_eq!(state.idle_timeout(Duration::minutes(5)), Duration::seconds(30));

        state.handle_get_request(v(2, 0), v(2, 4), &RANGE).unwrap();
        assert_eq!(state.idle_timeout(Duration::minutes(5)), Duration::minutes(5));
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Connected).unwrap(),
            "\"CONNECTED\""
        );
        assert!(SessionStatus::Timeout.finished());
        assert!(!SessionStatus::Created.finished());
    }
}
