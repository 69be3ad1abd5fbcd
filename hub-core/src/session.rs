//! Session entity types.

use crate::{Content, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SESSION KIND
// ============================================================================

/// Kind of session, governing its idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Completion,
    Chat,
    Roundtable,
    ImageGeneration,
    Agent,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Chat => "chat",
            Self::Roundtable => "roundtable",
            Self::ImageGeneration => "image_generation",
            Self::Agent => "agent",
        }
    }

    /// All kinds, in reaper sweep order.
    pub fn all() -> [SessionKind; 5] {
        [
            Self::Completion,
            Self::Chat,
            Self::Roundtable,
            Self::ImageGeneration,
            Self::Agent,
        ]
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SESSION STATUS
// ============================================================================

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// A conversation session. Mutated only by appending messages (which bumps
/// `updated_at`); the reaper owns the active -> completed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier
    pub id: String,
    pub project_id: Option<String>,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Agent that owns this session, if any
    pub agent_slug: Option<String>,
    /// External correlation id supplied by the caller, if any
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh active session.
    pub fn new(id: impl Into<String>, kind: SessionKind, project_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id,
            kind,
            status: SessionStatus::Active,
            agent_slug: None,
            external_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A message persisted against a session, ordered by `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: Content,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_active() {
        let session = Session::new("s-1", SessionKind::Chat, None);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.created_at, session.updated_at);
    }

    #[test]
    fn test_kind_serialization() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&SessionKind::ImageGeneration)?;
        assert_eq!(json, "\"image_generation\"");
        let kind: SessionKind = serde_json::from_str("\"roundtable\"")?;
        assert_eq!(kind, SessionKind::Roundtable);
        Ok(())
    }
}
