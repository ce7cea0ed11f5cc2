//! Registry of active sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use preceptor_core::context::ContextLog;
use preceptor_core::error::{PreceptorError, Result};
use preceptor_core::types::ChannelRole;
use preceptor_providers::{SessionArchive, SessionRecord};
use preceptor_rtc::{ChannelCredentials, TokenIssuer};

use crate::pipeline::{TurnEngine, TurnInput, TurnReply};

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Ended,
}

/// All state for one session. Shared via `Arc`; a pipeline run that
/// outlives its registry entry completes against the orphaned handle.
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    pub channel_name: String,
    pub created_at: DateTime<Utc>,
    pub credentials: ChannelCredentials,
    pub state: RwLock<SessionState>,
    /// Conversation history. The lock doubles as the single-flight slot:
    /// holding it is the admission to run a turn.
    pub context: Mutex<ContextLog>,
    /// Mirror of the context length, readable without the flight lock.
    pub turn_count: AtomicUsize,
    /// Epoch milliseconds of the last admitted turn or session start.
    pub last_activity: AtomicU64,
}

/// Returned by [`SessionRegistry::start`].
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub session_id: String,
    pub channel_name: String,
    pub credentials: ChannelCredentials,
}

/// One row of [`SessionRegistry::list_active`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub channel_name: String,
    pub created_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// Owns every active session and the collaborators a turn needs.
///
/// The registry is the single process-wide instance behind the API layer;
/// nothing else holds session state.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    issuer: TokenIssuer,
    engine: TurnEngine,
    archive: Arc<dyn SessionArchive>,
    max_context_turns: usize,
    session_kind: String,
    turns_processed: AtomicU64,
}

fn epoch_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

impl SessionRegistry {
    pub fn new(
        issuer: TokenIssuer,
        engine: TurnEngine,
        archive: Arc<dyn SessionArchive>,
        max_context_turns: usize,
        session_kind: impl Into<String>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            issuer,
            engine,
            archive,
            max_context_turns,
            session_kind: session_kind.into(),
            turns_processed: AtomicU64::new(0),
        }
    }

    /// Create a session, issue its channel credentials, and activate it.
    ///
    /// The archive write happens off the critical path; a failing archive
    /// never blocks activation.
    pub async fn start(
        &self,
        user_id: &str,
        channel_name: Option<String>,
    ) -> Result<StartedSession> {
        let session_id = Uuid::new_v4().to_string();
        let channel_name = channel_name
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| format!("tutor_{}_{}", user_id, &session_id[..8]));

        let credentials = self
            .issuer
            .issue(&channel_name, user_id, ChannelRole::Publisher)?;
        let created_at = Utc::now();

        let handle = Arc::new(SessionHandle {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            channel_name: channel_name.clone(),
            created_at,
            credentials: credentials.clone(),
            state: RwLock::new(SessionState::Created),
            context: Mutex::new(ContextLog::new(self.max_context_turns)),
            turn_count: AtomicUsize::new(0),
            last_activity: AtomicU64::new(epoch_millis()),
        });

        *handle.state.write().await = SessionState::Active;
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), handle);

        let archive = Arc::clone(&self.archive);
        let record = SessionRecord {
            id: session_id.clone(),
            user_id: user_id.to_string(),
            session_kind: self.session_kind.clone(),
            created_at,
        };
        tokio::spawn(async move {
            if let Err(e) = archive.create_session(&record).await {
                warn!(session_id = %record.id, error = %e, "session archive write failed");
            }
        });

        info!(session_id = %session_id, user_id = %user_id, channel = %channel_name, "started session");

        Ok(StartedSession {
            session_id,
            channel_name,
            credentials,
        })
    }

    /// Run one turn against an active session.
    ///
    /// Turns are single-flight per session: a call arriving while another
    /// is mid-pipeline is rejected with [`PreceptorError::SessionBusy`]
    /// rather than queued, so context ordering can never interleave.
    pub async fn process_turn(&self, session_id: &str, input: TurnInput) -> Result<TurnReply> {
        let handle = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| PreceptorError::SessionNotFound(session_id.to_string()))?;

        let mut context = handle
            .context
            .try_lock()
            .map_err(|_| PreceptorError::SessionBusy(session_id.to_string()))?;

        if *handle.state.read().await != SessionState::Active {
            return Err(PreceptorError::SessionNotFound(session_id.to_string()));
        }

        handle.last_activity.store(epoch_millis(), Ordering::SeqCst);
        let reply = self.engine.run(handle.as_ref(), &mut context, input).await;
        handle.last_activity.store(epoch_millis(), Ordering::SeqCst);
        self.turns_processed.fetch_add(1, Ordering::SeqCst);

        Ok(reply)
    }

    /// Remove a session. Returns `false` when the id is unknown.
    ///
    /// A pipeline run in flight at this moment keeps its own handle and
    /// completes; its writes land in the removed handle and stay invisible.
    pub async fn end(&self, session_id: &str) -> bool {
        let Some(handle) = self.sessions.write().await.remove(session_id) else {
            warn!(session_id = %session_id, "end requested for unknown session");
            return false;
        };

        *handle.state.write().await = SessionState::Ended;

        let archive = Arc::clone(&self.archive);
        let id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = archive.mark_session_ended(&id).await {
                warn!(session_id = %id, error = %e, "session archive update failed");
            }
        });

        info!(session_id = %session_id, user_id = %handle.user_id, "ended session");
        true
    }

    /// Active sessions, oldest first, optionally filtered to one user.
    pub async fn list_active(&self, user_id: Option<&str>) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<SessionSummary> = sessions
            .values()
            .filter(|h| user_id.map_or(true, |u| h.user_id == u))
            .map(|h| SessionSummary {
                session_id: h.session_id.clone(),
                channel_name: h.channel_name.clone(),
                created_at: h.created_at,
                turn_count: h.turn_count.load(Ordering::SeqCst),
            })
            .collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn turns_processed(&self) -> u64 {
        self.turns_processed.load(Ordering::SeqCst)
    }

    /// Remove sessions idle longer than `idle_timeout`. Returns how many
    /// were removed.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let cutoff = epoch_millis().saturating_sub(idle_timeout.as_millis() as u64);
        let stale: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, h)| h.last_activity.load(Ordering::SeqCst) < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = 0;
        for session_id in stale {
            warn!(session_id = %session_id, "removing idle session");
            if self.end(&session_id).await {
                removed += 1;
            }
        }
        removed
    }

    /// Periodically sweep idle sessions. The task exits on its own once
    /// the registry is dropped.
    pub fn spawn_idle_sweep(
        self: &Arc<Self>,
        idle_timeout: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep_idle(idle_timeout).await;
            }
        })
    }
}
