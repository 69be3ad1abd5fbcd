//! Client access control: allow/deny, quotas, kill switches.
//!
//! Clients are process-scope records with per-minute request and token
//! quotas tracked over a sliding window. Suspension is the kill switch: the
//! suspension reason is surfaced verbatim so SDKs can enter dormant mode.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hub_core::AccessError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const QUOTA_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// CLIENT
// ============================================================================

/// Administrative status of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Suspended,
    Disabled,
}

/// A registered API client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub display_name: String,
    pub status: ClientStatus,
    /// Requests per minute, None = unlimited.
    pub rate_limit_rpm: Option<u32>,
    /// Tokens per minute, None = unlimited.
    pub rate_limit_tpm: Option<u32>,
    /// Projects this client may touch, None = all.
    pub allowed_projects: Option<Vec<String>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspension_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            status: ClientStatus::Active,
            rate_limit_rpm: None,
            rate_limit_tpm: None,
            allowed_projects: None,
            suspended_at: None,
            suspension_reason: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// USAGE WINDOW
// ============================================================================

/// Sliding-window usage counters for one client.
#[derive(Debug, Default)]
struct UsageWindow {
    /// (when, tokens) per admitted request within the window.
    events: VecDeque<(Instant, u32)>,
}

impl UsageWindow {
    fn prune(&mut self, now: Instant) {
        while let Some((when, _)) = self.events.front() {
            if now.duration_since(*when) > QUOTA_WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn requests(&self) -> u32 {
        self.events.len() as u32
    }

    fn tokens(&self) -> u32 {
        self.events.iter().map(|(_, t)| t).sum()
    }
}

// ============================================================================
// CLIENT REGISTRY
// ============================================================================

/// Process-scope client registry with quota accounting.
pub struct ClientRegistry {
    clients: DashMap<String, Client>,
    usage: Mutex<std::collections::HashMap<String, UsageWindow>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            usage: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn upsert(&self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn get(&self, client_id: &str) -> Option<Client> {
        self.clients.get(client_id).map(|c| c.clone())
    }

    pub fn list(&self) -> Vec<Client> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.clone()).collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    /// Flip the kill switch for a client.
    pub fn suspend(&self, client_id: &str, reason: impl Into<String>) -> Option<Client> {
        self.clients.get_mut(client_id).map(|mut c| {
            c.status = ClientStatus::Suspended;
            c.suspended_at = Some(Utc::now());
            c.suspension_reason = Some(reason.into());
            c.clone()
        })
    }

    pub fn reinstate(&self, client_id: &str) -> Option<Client> {
        self.clients.get_mut(client_id).map(|mut c| {
            c.status = ClientStatus::Active;
            c.suspended_at = None;
            c.suspension_reason = None;
            c.clone()
        })
    }

    /// Gate a request: status, project allowlist, then quotas. Admitted
    /// requests are charged `estimated_tokens` against the token window.
    pub fn check(
        &self,
        client_id: &str,
        project_id: Option<&str>,
        estimated_tokens: u32,
    ) -> Result<(), AccessError> {
        let client = self
            .clients
            .get(client_id)
            .ok_or_else(|| AccessError::UnknownClient {
                client_id: client_id.to_string(),
            })?;

        match client.status {
            ClientStatus::Active => {}
            ClientStatus::Suspended => {
                return Err(AccessError::Suspended {
                    client_id: client_id.to_string(),
                    reason: client
                        .suspension_reason
                        .clone()
                        .unwrap_or_else(|| "Client suspended".to_string()),
                });
            }
            ClientStatus::Disabled => {
                return Err(AccessError::Disabled {
                    client_id: client_id.to_string(),
                });
            }
        }

        if let (Some(project), Some(allowed)) = (project_id, &client.allowed_projects) {
            if !allowed.iter().any(|p| p == project) {
                return Err(AccessError::ProjectNotAllowed {
                    client_id: client_id.to_string(),
                    project_id: project.to_string(),
                });
            }
        }

        let now = Instant::now();
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let window = usage.entry(client_id.to_string()).or_default();
        window.prune(now);

        if let Some(rpm) = client.rate_limit_rpm {
            if window.requests() >= rpm {
                return Err(AccessError::QuotaExceeded {
                    client_id: client_id.to_string(),
                    limit: rpm,
                    unit: "requests".to_string(),
                });
            }
        }
        if let Some(tpm) = client.rate_limit_tpm {
            if window.tokens().saturating_add(estimated_tokens) > tpm {
                return Err(AccessError::QuotaExceeded {
                    client_id: client_id.to_string(),
                    limit: tpm,
                    unit: "tokens".to_string(),
                });
            }
        }

        window.events.push_back((now, estimated_tokens));
        Ok(())
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.clients.len())
            .finish()
    }
}
