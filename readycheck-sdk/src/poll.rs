//! The background poll loop.
//!
//! One run goes `Starting → Polling ⇄ Reconnecting → Stopped`. The loop holds
//! the [`ApiClient`] exclusively for the whole run, so nothing else touches the
//! session while it is polling. The session is closed on every exit path: by
//! [`PollLoop::run`] on a normal exit and by the guard's `Drop` when the task
//! is aborted or panics.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedMutexGuard, watch};

use crate::api::{
    ApiClient, GAMEFLOW_PHASE_ENDPOINT, Method, READY_CHECK_ACCEPT_ENDPOINT, READY_CHECK_ENDPOINT,
};
use crate::error::AccepterError;
use crate::lockfile::CredentialSource;
use crate::monitor::{Event, Monitor};
use crate::phase::{Action, GamePhase, ReadyCheck, classify_response};

/// Why a poll run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// A match is in progress. Connection details are kept for the next start.
    MatchStarted,
    /// The controller asked the loop to stop.
    StopRequested,
    /// The loop was cancelled after ignoring a stop request for too long.
    Aborted,
    /// Preconditions for polling were not met.
    StartFailed(String),
    /// The client went away and could not be found again.
    ReconnectFailed(String),
    /// Unrecoverable error inside the loop.
    Failed(String),
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopExit::MatchStarted => f.write_str("Match in progress, auto-accept paused"),
            LoopExit::StopRequested => f.write_str("Auto-accept stopped"),
            LoopExit::Aborted => f.write_str("Auto-accept stopped (forced)"),
            LoopExit::StartFailed(reason) => write!(f, "Auto-accept couldn't start: {reason}"),
            LoopExit::ReconnectFailed(reason) => write!(f, "Lost the client: {reason}"),
            LoopExit::Failed(reason) => write!(f, "Auto-accept stopped after an error: {reason}"),
        }
    }
}

/// Exclusive access to the API client for one run. Closes the session when
/// dropped, however the run ends.
pub(crate) struct SessionGuard(OwnedMutexGuard<ApiClient>);

impl Deref for SessionGuard {
    type Target = ApiClient;

    fn deref(&self) -> &ApiClient {
        &self.0
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut ApiClient {
        &mut self.0
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub(crate) struct PollLoop {
    api: SessionGuard,
    source: Arc<dyn CredentialSource>,
    monitor: Arc<Monitor>,
    stop: watch::Receiver<bool>,
    interval: Duration,
    /// An accept went through for the ready check currently on screen.
    accepted_current: bool,
    /// Reconnected, and no request has succeeded since.
    reconnect_pending: bool,
}

impl PollLoop {
    pub(crate) fn new(
        api: OwnedMutexGuard<ApiClient>,
        source: Arc<dyn CredentialSource>,
        monitor: Arc<Monitor>,
        stop: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            api: SessionGuard(api),
            source,
            monitor,
            stop,
            interval,
            accepted_current: false,
            reconnect_pending: false,
        }
    }

    /// Run until stopped, a match starts, or the client is lost.
    pub(crate) async fn run(mut self) -> LoopExit {
        let exit = self.drive().await;
        self.api.close();
        tracing::info!(%exit, "Poll loop finished");
        self.monitor.set_status(exit.to_string());
        self.monitor.emit(Event::LoopStopped { exit: exit.clone() });
        exit
    }

    async fn drive(&mut self) -> LoopExit {
        if !self.api.is_connected() {
            return LoopExit::StartFailed("not connected to the client".to_string());
        }
        if let Err(e) = self.api.ensure_session() {
            return LoopExit::StartFailed(e.to_string());
        }
        self.monitor.set_status("Auto-accept running");

        loop {
            if self.stop_requested() {
                return LoopExit::StopRequested;
            }

            if !self.api.is_connected() {
                if let Err(reason) = self.reconnect() {
                    return LoopExit::ReconnectFailed(reason);
                }
            }

            match self.tick().await {
                Ok(Some(exit)) => return exit,
                Ok(None) => {}
                Err(e) => return LoopExit::Failed(e.to_string()),
            }

            if self.stop_requested() || self.sleep().await {
                return LoopExit::StopRequested;
            }
        }
    }

    /// One poll. `Ok(Some(_))` ends the run; `Err` is unrecoverable.
    async fn tick(&mut self) -> Result<Option<LoopExit>, AccepterError> {
        // Rebuilds a session dropped after an unexpected error.
        self.api.ensure_session()?;

        let body = match self.api.request(Method::GET, GAMEFLOW_PHASE_ENDPOINT, None).await {
            Ok(resp) => {
                self.reconnect_pending = false;
                resp.body
            }
            Err(e) => {
                self.absorb(&e);
                return Ok(None);
            }
        };

        let (phase, action) = classify_response(&body);
        if self.monitor.set_phase(phase) {
            tracing::debug!(%phase, "Gameflow phase changed");
            match phase {
                GamePhase::Lobby => {
                    self.monitor.set_status("Waiting in lobby");
                }
                GamePhase::Matchmaking => {
                    self.monitor.set_status("Searching for a match");
                }
                _ => {}
            }
        }
        if phase != GamePhase::ReadyCheck {
            self.accepted_current = false;
        }

        match action {
            Action::Wait => Ok(None),
            Action::CheckReady => {
                if self.stop_requested() {
                    return Ok(Some(LoopExit::StopRequested));
                }
                self.check_ready().await;
                Ok(None)
            }
            Action::StopLoop => Ok(Some(LoopExit::MatchStarted)),
        }
    }

    async fn check_ready(&mut self) {
        if self.accepted_current {
            return;
        }

        let detail = match self.api.request(Method::GET, READY_CHECK_ENDPOINT, None).await {
            Ok(resp) => ReadyCheck::from_value(&resp.body),
            Err(e) => {
                self.absorb(&e);
                return;
            }
        };
        if !detail.is_pending() || self.stop_requested() {
            return;
        }

        self.monitor.set_status("Match found, accepting...");
        match self.api.request(Method::POST, READY_CHECK_ACCEPT_ENDPOINT, None).await {
            Ok(resp) if resp.is_success() => {
                self.accepted_current = true;
                self.monitor.record_accept();
                self.monitor.set_status("Match accepted");
            }
            Ok(resp) => {
                tracing::warn!(status = resp.status, "Accept rejected, retrying next tick");
                self.monitor
                    .set_status(format!("Accept rejected ({}), retrying", resp.status));
            }
            Err(e) => self.absorb(&e),
        }
    }

    /// A failed request means no data this tick. A refused connection means
    /// the client exited, so drop to `Disconnected` and let the next tick
    /// reconnect.
    fn absorb(&mut self, e: &AccepterError) {
        if e.is_connection_lost() {
            self.api.mark_disconnected("client stopped listening");
        }
    }

    fn reconnect(&mut self) -> Result<(), String> {
        if self.reconnect_pending {
            return Err("client unreachable after reconnecting".to_string());
        }
        self.monitor.set_status("Connection lost, reconnecting...");

        let Some(info) = self.source.discover() else {
            return Err("client credentials unavailable".to_string());
        };
        self.api.connect(info);
        self.api.ensure_session().map_err(|e| e.to_string())?;
        self.reconnect_pending = true;
        tracing::info!("Reconnected to the client");
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep one interval. Returns true if a stop arrived meanwhile.
    async fn sleep(&mut self) -> bool {
        let interval = self.interval;
        let changed = tokio::select! {
            _ = tokio::time::sleep(interval) => return false,
            changed = self.stop.changed() => changed,
        };
        // Err means the controller is gone, which also means stop.
        changed.is_err() || self.stop_requested()
    }
}
