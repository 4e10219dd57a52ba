//! Token to session map with periodic eviction.
//!
//! The map lock only guards insert, lookup and removal. Sessions are always
//! processed after it has been released.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use irma_core::SessionRequest;

use crate::error::{ServerError, ServerResult};
use crate::session::Session;

/// Length of session tokens.
pub const TOKEN_LENGTH: usize = 20;

fn new_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    pub removed: usize,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> ServerResult<MutexGuard<'_, HashMap<String, Arc<Session>>>> {
        self.sessions
            .lock()
            .map_err(|e| ServerError::Internal(format!("session registry lock poisoned: {e}")))
    }

    /// Register a new session under a fresh token.
    pub fn create(&self, request: SessionRequest, now: DateTime<Utc>) -> ServerResult<Arc<Session>> {
        let mut sessions = self.map()?;
        let mut token = new_token();
        while sessions.contains_key(&token) {
            token = new_token();
        }
        let session = Arc::new(Session::new(token.clone(), request, now));
        sessions.insert(token, session.clone());
        Ok(session)
    }

    pub fn get(&self, token: &str) -> ServerResult<Option<Arc<Session>>> {
        Ok(self.map()?.get(token).cloned())
    }

    pub fn remove(&self, token: &str) -> ServerResult<Option<Arc<Session>>> {
        Ok(self.map()?.remove(token))
    }

    pub fn len(&self) -> ServerResult<usize> {
        Ok(self.map()?.len())
    }

    pub fn is_empty(&self) -> ServerResult<bool> {
        Ok(self.map()?.is_empty())
    }

    /// Time out idle sessions and drop finished ones older than `retention`.
    ///
    /// A session timed out in this pass is kept for `retention` so its
    /// result can still be fetched.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
        retention: Duration,
    ) -> ServerResult<SweepReport> {
        let snapshot: Vec<Arc<Session>> = self.map()?.values().cloned().collect();

        let mut report = SweepReport::default();
        let mut expired = Vec::new();
        for session in snapshot {
            let mut state = session.lock()?;
            if state.expire_if_idle(now, timeout) {
                report.timed_out += 1;
            } else if state.removable(now, retention) {
                expired.push(session.token().to_string());
            }
        }

        if !expired.is_empty() {
            let mut sessions = self.map()?;
            for token in &expired {
                if sessions.remove(token).is_some() {
                    tracing::debug!(token = %token, "session removed");
                    report.removed += 1;
                }
            }
        }

        if report != SweepReport::default() {
            tracing::debug!(
                timed_out = report.timed_out,
                removed = report.removed,
                "session sweep"
            );
        }
        Ok(report)
    }
}
