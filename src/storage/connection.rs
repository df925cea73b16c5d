//! Resilient shared connection to the document store
//!
//! One [`ConnectionManager`] is built at startup and shared by every
//! repository. It connects lazily, retries with a linear backoff, and tracks
//! health signals without dropping a working handle on transient failures.
//!
//! ```text
//! Disconnected --ensure--> Connecting --ok--> Connected <--healthy-- Degraded
//!       ^                      |                  |                     ^
//!       |                      +--exhausted-------+--N health failures--+
//!       +-------------------- close / connection lost ------------------+
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{SharedStore, StoreError, StoreResult};
use crate::metrics;
use crate::utils::retry::{with_retry_if, RetryPolicy};

/// Opens new store handles
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Target description for logs (never includes credentials)
    fn describe(&self) -> String;

    /// Open one handle; a single attempt, no retries
    async fn connect(&self) -> StoreResult<SharedStore>;
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but recent health checks failed; the handle is kept
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }

    /// Whether a usable handle exists in this state
    pub fn has_handle(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnect and health policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Connect attempts per `ensure_connection` call
    pub max_attempts: u32,
    /// Retry `n` waits `n × base_delay`
    pub base_delay: Duration,
    /// Consecutive failed health checks before Connected becomes Degraded
    pub max_health_failures: u32,
    /// Heartbeat ping period
    pub heartbeat_interval: Duration,
}

impl ConnectionPolicy {
    /// Connect retry budget and schedule
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_attempts, self.base_delay)
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_health_failures: 3,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

struct Inner {
    state: ConnectionState,
    handle: Option<SharedStore>,
    health_failures: u32,
}

/// Shared, lazily connected store handle
pub struct ConnectionManager {
    connector: Arc<dyn StoreConnector>,
    policy: ConnectionPolicy,
    inner: RwLock<Inner>,
    /// Serializes connect attempts; waiters re-check state once they get it
    connect_lock: tokio::sync::Mutex<()>,
    shut_down: AtomicBool,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn StoreConnector>, policy: ConnectionPolicy) -> Self {
        Self {
            connector,
            policy,
            inner: RwLock::new(Inner {
                state: ConnectionState::Disconnected,
                handle: None,
                health_failures: 0,
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.read().state
    }

    /// Return the shared handle, connecting first if there is none.
    ///
    /// Safe to call concurrently: only one connect sequence runs at a time and
    /// callers queued behind it reuse its result. Exhausting the retry budget
    /// yields [`StoreError::CannotConnect`].
    pub async fn ensure_connection(&self) -> StoreResult<SharedStore> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }
        self.connect().await
    }

    /// Establish the shared connection (no-op when one already exists)
    pub async fn connect(&self) -> StoreResult<SharedStore> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StoreError::NotConnected);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(handle) = self.current() {
            debug!("Connection established by a concurrent caller");
            return Ok(handle);
        }

        self.transition(ConnectionState::Connecting);
        info!(target = %self.connector.describe(), "Connecting to document store");

        let retry = self.policy.retry();
        let mut attempts_made = 0;
        let result = with_retry_if(
            retry.max_attempts,
            retry.backoff_fn(),
            |attempt| {
                attempts_made = attempt;
                self.attempt_connect(attempt)
            },
            StoreError::is_recoverable,
        )
        .await;

        match result {
            Ok(handle) => {
                {
                    let mut inner = self.write();
                    inner.handle = Some(Arc::clone(&handle));
                    inner.health_failures = 0;
                }
                self.transition(ConnectionState::Connected);
                info!(
                    backend = handle.name(),
                    attempts = attempts_made,
                    "Connected to document store"
                );
                Ok(handle)
            }
            Err(e) => {
                self.transition(ConnectionState::Disconnected);
                error!(attempts = attempts_made, error = %e, "Cannot connect to document store");
                Err(StoreError::CannotConnect {
                    attempts: attempts_made,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn attempt_connect(&self, attempt: u32) -> StoreResult<SharedStore> {
        let stale = self.write().handle.take();
        if let Some(stale) = stale {
            debug!(attempt, "Closing stale store handle before reconnecting");
            stale.close().await;
        }

        debug!(attempt, max_attempts = self.policy.max_attempts, "Connect attempt");
        self.connector.connect().await
    }

    /// Feed one health observation into the state machine
    pub fn record_health(&self, healthy: bool) {
        let next = {
            let mut inner = self.write();
            if healthy {
                inner.health_failures = 0;
                (inner.state == ConnectionState::Degraded).then_some(ConnectionState::Connected)
            } else {
                inner.health_failures += 1;
                (inner.state == ConnectionState::Connected
                    && inner.health_failures >= self.policy.max_health_failures)
                    .then_some(ConnectionState::Degraded)
            }
        };

        if let Some(state) = next {
            self.transition(state);
        }
    }

    /// Ping the current handle and record the outcome
    pub async fn health_check(&self) -> ConnectionState {
        let Some(handle) = self.current() else {
            return self.state();
        };

        match handle.ping().await {
            Ok(()) => self.record_health(true),
            Err(e) => {
                warn!(error = %e, "Store health check failed");
                self.record_health(false);
            }
        }
        self.state()
    }

    /// Drop the handle after a fatal connection loss; the next call reconnects
    pub fn mark_lost(&self, reason: &str) {
        let dropped = {
            let mut inner = self.write();
            inner.health_failures = 0;
            inner.handle.take()
        };
        if dropped.is_some() {
            warn!(reason, "Store connection lost");
        }
        self.transition(ConnectionState::Disconnected);
    }

    /// Pass an operation result through, dropping the handle if the link broke
    pub fn observe<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(StoreError::Connection(reason)) = &result {
            self.mark_lost(reason);
        }
        result
    }

    /// Shutdown hook: close the handle and refuse further connects
    pub async fn close(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let handle = self.write().handle.take();
        if let Some(handle) = handle {
            handle.close().await;
        }
        self.transition(ConnectionState::Disconnected);
        info!("Document store connection closed");
    }

    /// Periodically ping the store until [`close`](Self::close) is called
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.policy.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            while !manager.shut_down.load(Ordering::SeqCst) {
                ticker.tick().await;
                let state = manager.health_check().await;
                debug!(state = %state, "Store heartbeat");
            }
        })
    }

    fn current(&self) -> Option<SharedStore> {
        let inner = self.read();
        if inner.state.has_handle() {
            inner.handle.clone()
        } else {
            None
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = {
            let mut inner = self.write();
            std::mem::replace(&mut inner.state, next)
        };

        if previous != next {
            info!(from = %previous, to = %next, "Store connection state changed");
            metrics::set_connection_state(next);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
