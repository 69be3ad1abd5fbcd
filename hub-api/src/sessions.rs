//! In-process session store.
//!
//! Sessions are keyed by opaque id; messages are an ordered log per session.
//! The store owns session records; everything else refers to sessions by id.
//! Appends are strictly ordered by `created_at` and bump `updated_at`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hub_core::{
    Content, Role, Session, SessionError, SessionKind, SessionStatus, StoredMessage,
};
use uuid::Uuid;

/// A session with its message log.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session: Session,
    pub messages: Vec<StoredMessage>,
}

/// Process-scope session store.
pub struct SessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Mint a new session with a fresh opaque id. The caller's external
    /// correlation id, if any, is stored against the session.
    pub fn create(
        &self,
        kind: SessionKind,
        project_id: Option<String>,
        external_id: Option<String>,
    ) -> Session {
        let mut session = Session::new(Uuid::new_v4().to_string(), kind, project_id);
        session.external_id = external_id;
        self.sessions.insert(
            session.id.clone(),
            SessionRecord {
                session: session.clone(),
                messages: Vec::new(),
            },
        );
        tracing::debug!(session_id = %session.id, kind = %session.kind, "Session created");
        session
    }

    pub fn get(&self, id: &str) -> Result<SessionRecord, SessionError> {
        self.sessions
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// Resolve a session for a completion: it must exist and be active.
    pub fn resolve_active(&self, id: &str) -> Result<Session, SessionError> {
        let record = self.get(id)?;
        if record.session.status != SessionStatus::Active {
            return Err(SessionError::Closed {
                id: id.to_string(),
                status: record.session.status.as_str().to_string(),
            });
        }
        Ok(record.session)
    }

    /// Append a message to the session's ordered log, bumping `updated_at`.
    pub fn append_message(
        &self,
        id: &str,
        role: Role,
        content: Content,
    ) -> Result<(), SessionError> {
        let mut record = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        let now = Utc::now();
        record.messages.push(StoredMessage {
            role,
            content,
            created_at: now,
        });
        record.session.updated_at = now;
        Ok(())
    }

    /// Message log for a session, in append order.
    pub fn messages(&self, id: &str) -> Result<Vec<StoredMessage>, SessionError> {
        Ok(self.get(id)?.messages)
    }

    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> =
            self.sessions.iter().map(|r| r.session.clone()).collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Active sessions of one kind idle since before `cutoff`. Used by the
    /// reaper sweep.
    pub fn stale_active(&self, kind: SessionKind, cutoff: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|r| {
                r.session.kind == kind
                    && r.session.status == SessionStatus::Active
                    && r.session.updated_at < cutoff
            })
            .map(|r| r.session.id.clone())
            .collect()
    }

    /// Transition a session to completed. The reaper is the only caller.
    pub fn mark_completed(&self, id: &str) -> Result<(), SessionError> {
        let mut record = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        record.session.status = SessionStatus::Completed;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .finish()
    }
}
