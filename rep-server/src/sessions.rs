//! The session registry.
//!
//! Sessions are keyed by id and individually locked: decapsulation checks
//! expiry, authenticates, enforces msg-id monotonicity, and advances the
//! stored id in one critical section, so two concurrent requests on the same
//! session can never both be accepted with the same id. Expired sessions are
//! swept lazily — on lookup and on creation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use rep_sdk::channel::KEY_LEN;
use rep_sdk::envelope::{AssociatedData, Envelope};

use crate::errors::RepError;

/// A live session's server-side record.
#[derive(Debug, Clone)]
pub struct Session {
    pub organization: String,
    pub username: String,
    pub derived_key: [u8; KEY_LEN],
    /// Last msg id used on this session (request or response leg).
    pub msg_id: u64,
    pub expires_at: DateTime<Utc>,
    /// Roles assumed in this session, in assumption order.
    pub roles: Vec<String>,
}

/// Everything a handler needs after decapsulation. The msg id for the
/// response leg is already reserved.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: u64,
    pub organization: String,
    pub username: String,
    pub derived_key: [u8; KEY_LEN],
    pub reply_msg_id: u64,
    pub roles: Vec<String>,
}

impl SessionContext {
    /// Wrap a response payload for this session.
    pub fn encapsulate(&self, payload: &Value) -> Result<Envelope, RepError> {
        Ok(Envelope::seal(
            &self.derived_key,
            AssociatedData {
                msg_id: self.reply_msg_id,
                session_id: self.session_id,
            },
            payload,
        )?)
    }
}

pub struct SessionRegistry {
    ttl: Duration,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new(ttl: std::time::Duration) -> Self {
        SessionRegistry {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session established by the handshake. Returns its id.
    pub fn create(&self, organization: &str, username: &str, derived_key: [u8; KEY_LEN]) -> u64 {
        self.sweep_expired();
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            organization: organization.to_string(),
            username: username.to_string(),
            derived_key,
            msg_id: 0,
            expires_at: Utc::now() + self.ttl,
            roles: Vec::new(),
        };
        self.sessions
            .lock()
            .insert(session_id, Arc::new(Mutex::new(session)));
        tracing::info!(session_id, organization, username, "session created");
        session_id
    }

    /// Unwrap an incoming envelope.
    ///
    /// Check order is fixed: unknown session, then expiry, then AEAD
    /// authentication, then replay. Only after all pass is the stored msg id
    /// advanced (to the request's id plus one, reserving the response leg).
    pub fn decapsulate(&self, envelope: &Envelope) -> Result<(Value, SessionContext), RepError> {
        let session_id = envelope.associated_data.session_id;
        let slot = self
            .sessions
            .lock()
            .get(&session_id)
            .cloned()
            .ok_or(RepError::SessionUnknown(session_id))?;

        let mut session = slot.lock();

        if Utc::now() > session.expires_at {
            drop(session);
            self.sessions.lock().remove(&session_id);
            tracing::debug!(session_id, "expired session dropped");
            return Err(RepError::SessionExpired(session_id));
        }

        let plaintext = envelope.open(&session.derived_key)?;

        let msg_id = envelope.associated_data.msg_id;
        if msg_id <= session.msg_id {
            tracing::warn!(session_id, msg_id, last = session.msg_id, "replay rejected");
            return Err(RepError::Replay {
                got: msg_id,
                last: session.msg_id,
            });
        }
        session.msg_id = msg_id + 1;

        let ctx = SessionContext {
            session_id,
            organization: session.organization.clone(),
            username: session.username.clone(),
            derived_key: session.derived_key,
            reply_msg_id: session.msg_id,
            roles: session.roles.clone(),
        };
        Ok((plaintext, ctx))
    }

    /// Run `f` under the session's lock (role assumption and the like).
    pub fn with_session<T>(
        &self,
        session_id: u64,
        f: impl FnOnce(&mut Session) -> Result<T, RepError>,
    ) -> Result<T, RepError> {
        let slot = self
            .sessions
            .lock()
            .get(&session_id)
            .cloned()
            .ok_or(RepError::SessionUnknown(session_id))?;
        let mut session = slot.lock();
        f(&mut session)
    }

    /// Drop every session past its expiration.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, slot| slot.lock().expires_at >= now);
        let swept = before - sessions.len();
        if swept > 0 {
            tracing::debug!(swept, "expired sessions swept");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    #[cfg(test)]
    fn force_expire(&self, session_id: u64) {
        if let Some(slot) = self.sessions.lock().get(&session_id) {
            slot.lock().expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}
