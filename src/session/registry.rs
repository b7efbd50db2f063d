//! Session registry
//!
//! Process-local map from call id to live session, instantiated once at
//! startup and injected into request handlers. A call has at most one
//! session; deregistration is the last step of teardown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{info, warn};

use super::{SessionControl, SessionState};
use crate::error::{EngineError, EngineResult};

/// Rolling average latencies over the session's turns
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyAverages {
    pub stt_ms: Option<u64>,
    pub llm_ms: Option<u64>,
    pub tts_ms: Option<u64>,
}

/// Snapshot of a live session, kept current by its actor
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub call_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub message_count: usize,
    pub average_latency: LatencyAverages,
}

/// Management-side handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub call_id: String,
    control: mpsc::Sender<SessionControl>,
    info: Arc<std::sync::RwLock<SessionInfo>>,
    ended: watch::Receiver<bool>,
}

impl SessionHandle {
    pub(crate) fn new(
        call_id: String,
        control: mpsc::Sender<SessionControl>,
        info: Arc<std::sync::RwLock<SessionInfo>>,
        ended: watch::Receiver<bool>,
    ) -> Self {
        Self {
            call_id,
            control,
            info,
            ended,
        }
    }

    /// Sender used by the transport to feed frames into the actor queue
    pub fn sender(&self) -> mpsc::Sender<SessionControl> {
        self.control.clone()
    }

    /// Ask the session to end with the given reason
    pub async fn request_end(&self, reason: &str) {
        let _ = self
            .control
            .send(SessionControl::End {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Current snapshot
    pub fn info(&self) -> SessionInfo {
        self.info
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Wait (bounded) for the session actor to finish teardown
    pub async fn wait_ended(&self, timeout: Duration) -> bool {
        let mut ended = self.ended.clone();
        if *ended.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, async {
            while ended.changed().await.is_ok() {
                if *ended.borrow() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }
}

/// Process-wide registry of live sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a session. Exactly one session may exist per call.
    pub async fn register(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&handle.call_id) {
            return Err(EngineError::Conflict(format!(
                "call {} already has a live session",
                handle.call_id
            )));
        }
        sessions.insert(handle.call_id.clone(), handle);
        Ok(())
    }

    pub async fn deregister(&self, call_id: &str) {
        self.sessions.write().await.remove(call_id);
    }

    pub async fn lookup(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(call_id).cloned()
    }

    /// Snapshot of all live sessions
    pub async fn iterate(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// End every live session with reason "server-shutdown" and wait
    /// (bounded) for teardown to finish.
    pub async fn shutdown_all(&self) {
        let handles = self.iterate().await;
        if handles.is_empty() {
            return;
        }
        info!("Shutting down {} live session(s)", handles.len());
        for handle in &handles {
            handle.request_end("server-shutdown").await;
        }
        for handle in &handles {
            if !handle.wait_ended(Duration::from_secs(5)).await {
                warn!("Session {} did not end within shutdown grace", handle.call_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(call_id: &str) -> (SessionHandle, watch::Sender<bool>) {
        let (control, _rx) = mpsc::channel(8);
        let (ended_tx, ended_rx) = watch::channel(false);
        let info = Arc::new(std::sync::RwLock::new(SessionInfo {
            call_id: call_id.to_string(),
            state: SessionState::Idle,
            started_at: Utc::now(),
            message_count: 0,
            average_latency: LatencyAverages::default(),
        }));
        (
            SessionHandle::new(call_id.to_string(), control, info, ended_rx),
            ended_tx,
        )
    }

    #[tokio::test]
    async fn test_register_lookup_deregister() {
        let registry = SessionRegistry::new();
        let (h, _ended) = handle("call_1");
        registry.register(h).await.unwrap();
        assert!(registry.lookup("call_1").await.is_some());
        assert_eq!(registry.len().await, 1);

        registry.deregister("call_1").await;
        assert!(registry.lookup("call_1").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let registry = SessionRegistry::new();
        let (a, _ea) = handle("call_1");
        let (b, _eb) = handle("call_1");
        registry.register(a).await.unwrap();
        assert!(matches!(
            registry.register(b).await,
            Err(EngineError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_ended() {
        let (h, ended_tx) = handle("call_1");
        ended_tx.send(true).unwrap();
        assert!(h.wait_ended(Duration::from_millis(50)).await);
    }
}
