//! Session Reaper Background Task
//!
//! Periodic sweep that transitions sessions from active to completed once
//! they have been idle longer than their kind's timeout. The reaper is the
//! only writer of the active -> completed transition; normal completion
//! paths never set it.

use crate::events::{EventBus, HubEvent};
use crate::sessions::SessionStore;
use chrono::{Duration as ChronoDuration, Utc};
use hub_core::{SessionKind, SessionTimeouts};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the session reaper.
#[derive(Debug, Clone)]
pub struct SessionReaperConfig {
    /// How often to sweep (default: 5 minutes)
    pub sweep_interval: Duration,

    /// Idle timeout per session kind
    pub timeouts: SessionTimeouts,
}

impl Default for SessionReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            timeouts: SessionTimeouts::default(),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for reaper activity.
#[derive(Debug, Default)]
pub struct SessionReaperMetrics {
    /// Total sessions transitioned to completed since startup
    pub sessions_reaped: AtomicU64,

    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,
}

impl SessionReaperMetrics {
    pub fn reaped(&self) -> u64 {
        self.sessions_reaped.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.sweep_cycles.load(Ordering::Relaxed)
    }
}

// ============================================================================
// REAPER
// ============================================================================

/// Handle for a running reaper task.
pub struct SessionReaperHandle {
    pub metrics: Arc<SessionReaperMetrics>,
    shutdown: watch::Sender<bool>,
}

impl SessionReaperHandle {
    /// Signal the reaper to stop after its current cycle.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Run one sweep: batch-complete every stale active session, per kind.
/// Returns the number of sessions transitioned.
pub fn sweep_stale_sessions(
    sessions: &SessionStore,
    timeouts: &SessionTimeouts,
    events: &EventBus,
) -> u64 {
    let now = Utc::now();
    let mut total: u64 = 0;

    for kind in SessionKind::all() {
        let timeout = timeouts.for_kind(kind);
        let cutoff = now
            - ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::minutes(30));
        let stale = sessions.stale_active(kind, cutoff);
        if stale.is_empty() {
            continue;
        }

        let mut completed = 0u64;
        for id in &stale {
            if sessions.mark_completed(id).is_ok() {
                completed += 1;
                events.publish(HubEvent::SessionCompleted {
                    session_id: id.clone(),
                    kind,
                });
            }
        }
        tracing::info!(
            kind = %kind,
            count = completed,
            idle_timeout_secs = timeout.as_secs(),
            "Auto-completed stale sessions"
        );
        total += completed;
    }

    if total == 0 {
        tracing::debug!("Session sweep: no stale sessions found");
    }
    total
}

/// Spawn the reaper task. It sweeps every `sweep_interval` until the handle
/// signals shutdown.
pub fn spawn_session_reaper(
    config: SessionReaperConfig,
    sessions: Arc<SessionStore>,
    events: Arc<EventBus>,
) -> SessionReaperHandle {
    let metrics = Arc::new(SessionReaperMetrics::default());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task_metrics = metrics.clone();

    tokio::spawn(async move {
        let mut ticker = interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh boot does not
        // sweep before anything could go stale.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = sweep_stale_sessions(&sessions, &config.timeouts, &events);
                    task_metrics.sessions_reaped.fetch_add(reaped, Ordering::Relaxed);
                    task_metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Session reaper shutting down");
                        break;
                    }
                }
            }
        }
    });

    SessionReaperHandle {
        metrics,
        shutdown: shutdown_tx,
    }
}
