//! Push delivery of debug events to the well-known local listener.
//!
//! A listener that refused a connection is remembered for a cooldown window
//! so a dead listener costs one failed dial per window, not one per event.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::task::TaskTracker;

use super::event::DebugEvent;

/// Per-request ceiling; pushes are detached so this never delays a caller.
const PUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a single push did not land. Always discarded by the bus.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("listener marked unreachable, cooling down")]
    CoolingDown,

    #[error("listener unreachable: {0}")]
    Unreachable(String),

    #[error("listener rejected event: HTTP {0}")]
    Rejected(u16),
}

pub struct PushDelivery {
    http: reqwest::Client,
    endpoint: String,
    cooldown: Duration,
    unreachable_at: Mutex<Option<Instant>>,
    in_flight: TaskTracker,
}

impl PushDelivery {
    pub fn new(endpoint: impl Into<String>, cooldown: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
            cooldown,
            unreachable_at: Mutex::new(None),
            in_flight: TaskTracker::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// True while a recent connection failure is still inside the cooldown.
    pub fn in_cooldown(&self) -> bool {
        let mut guard = self.unreachable_at.lock().unwrap_or_else(|e| e.into_inner());
        match *guard {
            Some(at) if at.elapsed() < self.cooldown => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    fn mark_unreachable(&self) {
        *self.unreachable_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// POST one event to the listener.
    pub async fn deliver(&self, event: &DebugEvent) -> Result<(), PushError> {
        if self.in_cooldown() {
            return Err(PushError::CoolingDown);
        }

        let response = self
            .http
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    self.mark_unreachable();
                }
                PushError::Unreachable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(PushError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    /// Fire-and-forget delivery on the current runtime. Outside a runtime the
    /// event is dropped.
    pub fn dispatch(self: &Arc<Self>, event: DebugEvent) {
        if self.in_cooldown() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let this = Arc::clone(self);
        self.in_flight.spawn_on(
            async move {
                if let Err(e) = this.deliver(&event).await {
                    tracing::trace!(endpoint = %this.endpoint, error = %e, "debug push dropped");
                }
            },
            &handle,
        );
    }

    /// Pushes dispatched but not yet finished.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait up to `limit` for dispatched pushes to finish. Called before the
    /// process exits so the last events are not lost with the runtime.
    pub async fn flush(&self, limit: Duration) {
        self.in_flight.close();
        if tokio::time::timeout(limit, self.in_flight.wait()).await.is_err() {
            tracing::debug!(pending = self.pending(), "debug pushes still pending at shutdown");
        }
        self.in_flight.reopen();
    }
}
