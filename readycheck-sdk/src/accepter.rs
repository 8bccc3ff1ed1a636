//! Start/stop control for the poll loop.
//!
//! [`AutoAccepter`] is the single entry point for front-ends. `toggle()` is
//! safe to call repeatedly (e.g. from a button) and never leaves more than one
//! poll task alive. Stopping is cooperative first; a loop that hasn't exited
//! after the grace period is aborted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::api::ApiClient;
use crate::error::AccepterError;
use crate::lockfile::CredentialSource;
use crate::monitor::{ConnectionState, Event, Monitor, Status};
use crate::poll::{LoopExit, PollLoop};

/// Timing for the accepter.
#[derive(Debug, Clone)]
pub struct AccepterConfig {
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Upper bound on a single API request.
    pub request_timeout: Duration,
    /// How long `toggle()` waits for a cooperative stop before aborting.
    pub stop_grace: Duration,
}

impl Default for AccepterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(7),
        }
    }
}

/// Lifecycle of the poll task as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopRunState {
    Idle,
    Running,
    StopRequested,
    Stopping,
}

struct PollTask {
    handle: JoinHandle<LoopExit>,
    stop_tx: watch::Sender<bool>,
}

/// Invariant: `task` is `Some` exactly when `state` is `Running`. While
/// stopping, the handle is held by a [`StopGuard`] instead.
struct RunSlot {
    state: LoopRunState,
    task: Option<PollTask>,
}

/// Owns the poll task's handle while a stop is in progress. If the stop is
/// dropped before the task is joined, the task is aborted and the run state
/// goes back to `Idle`.
struct StopGuard<'a> {
    accepter: &'a AutoAccepter,
    handle: JoinHandle<LoopExit>,
    armed: bool,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.handle.is_finished() {
            tracing::warn!("Stop interrupted before the poll loop exited, aborting it");
            self.handle.abort();
            self.accepter.report_aborted();
        }
        self.accepter.set_run_state(LoopRunState::Idle);
    }
}

pub struct AutoAccepter {
    config: AccepterConfig,
    api: Arc<tokio::sync::Mutex<ApiClient>>,
    source: Arc<dyn CredentialSource>,
    monitor: Arc<Monitor>,
    slot: Mutex<RunSlot>,
    /// Serializes start/stop so concurrent toggles can't race.
    control: tokio::sync::Mutex<()>,
}

impl AutoAccepter {
    pub fn new(source: Arc<dyn CredentialSource>, config: AccepterConfig) -> Self {
        let monitor = Arc::new(Monitor::new());
        let api = ApiClient::new(config.request_timeout, Arc::clone(&monitor));
        Self {
            config,
            api: Arc::new(tokio::sync::Mutex::new(api)),
            source,
            monitor,
            slot: Mutex::new(RunSlot {
                state: LoopRunState::Idle,
                task: None,
            }),
            control: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AccepterConfig {
        &self.config
    }

    /// Shared API client. Locked by the poll task for the duration of a run.
    pub fn api(&self) -> Arc<tokio::sync::Mutex<ApiClient>> {
        Arc::clone(&self.api)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.monitor.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.connection() == ConnectionState::Connected
    }

    pub fn is_running(&self) -> bool {
        self.run_state() != LoopRunState::Idle
    }

    /// Current run state. A loop that ended on its own reads as `Idle`.
    pub fn run_state(&self) -> LoopRunState {
        let slot = self.slot.lock();
        match (&slot.state, &slot.task) {
            (LoopRunState::Running, Some(task)) if task.handle.is_finished() => LoopRunState::Idle,
            (state, _) => *state,
        }
    }

    pub fn status_message(&self) -> String {
        self.monitor.status_message()
    }

    pub fn status(&self) -> Status {
        self.monitor.snapshot(self.is_running())
    }

    /// Start the loop if idle, stop it if running.
    ///
    /// Returns the state the call settled in: `Running` or `Idle`, never an
    /// intermediate state.
    pub async fn toggle(&self) -> Result<LoopRunState, AccepterError> {
        let _control = self.control.lock().await;
        self.reap_finished().await;

        let state = self.slot.lock().state;
        match state {
            LoopRunState::Idle => self.start_locked().await,
            _ => Ok(self.stop_locked().await),
        }
    }

    /// Start the loop unless it is already running.
    pub async fn start(&self) -> Result<LoopRunState, AccepterError> {
        let _control = self.control.lock().await;
        self.reap_finished().await;

        if self.slot.lock().state == LoopRunState::Idle {
            self.start_locked().await
        } else {
            Ok(LoopRunState::Running)
        }
    }

    /// Stop the loop if it is running.
    pub async fn stop(&self) -> LoopRunState {
        let _control = self.control.lock().await;
        self.reap_finished().await;

        if self.slot.lock().state == LoopRunState::Idle {
            LoopRunState::Idle
        } else {
            self.stop_locked().await
        }
    }

    /// Stop any run and release the session. Connection details are kept.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.api.lock().await.close();
    }

    async fn start_locked(&self) -> Result<LoopRunState, AccepterError> {
        // Idle, so no poll task holds the client.
        let mut api = Arc::clone(&self.api).lock_owned().await;
        if !api.is_connected() {
            match self.source.discover() {
                Some(info) => {
                    api.connect(info);
                }
                None => {
                    self.monitor
                        .set_status("Not connected: start the game client and try again");
                    return Err(AccepterError::CredentialUnavailable(
                        "lockfile not found or unreadable".to_string(),
                    ));
                }
            }
        }
        if !api.is_connected() {
            return Err(AccepterError::ConnectionUnestablished);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let poll = PollLoop::new(
            api,
            Arc::clone(&self.source),
            Arc::clone(&self.monitor),
            stop_rx,
            self.config.poll_interval,
        );

        self.monitor.emit(Event::LoopStarted);
        let handle = tokio::spawn(poll.run());
        {
            let mut slot = self.slot.lock();
            slot.state = LoopRunState::Running;
            slot.task = Some(PollTask { handle, stop_tx });
        }
        tracing::info!(interval = ?self.config.poll_interval, "Auto-accept started");
        Ok(LoopRunState::Running)
    }

    async fn stop_locked(&self) -> LoopRunState {
        let task = {
            let mut slot = self.slot.lock();
            slot.state = LoopRunState::StopRequested;
            slot.task.take()
        };

        let Some(PollTask { handle, stop_tx }) = task else {
            tracing::warn!("Run state was active without a poll task, resetting");
            match self.api.try_lock() {
                Ok(mut api) => api.close(),
                Err(_) => tracing::warn!("API client still held elsewhere, session not released"),
            }
            self.set_run_state(LoopRunState::Idle);
            self.monitor.set_status("Auto-accept reset");
            return LoopRunState::Idle;
        };

        // From here on the handle lives in the guard, so a caller that drops
        // this future still aborts the task and settles the run state.
        let mut stopping = StopGuard {
            accepter: self,
            handle,
            armed: true,
        };

        let _ = stop_tx.send(true);
        self.set_run_state(LoopRunState::Stopping);

        match tokio::time::timeout(self.config.stop_grace, &mut stopping.handle).await {
            Ok(Ok(exit)) => tracing::debug!(%exit, "Poll loop stopped cooperatively"),
            Ok(Err(e)) => self.report_join_error(e),
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.config.stop_grace.as_millis() as u64,
                    "Poll loop ignored stop request, aborting"
                );
                stopping.handle.abort();
                match (&mut stopping.handle).await {
                    Ok(exit) => tracing::debug!(%exit, "Poll loop finished before abort"),
                    Err(e) if e.is_cancelled() => self.report_aborted(),
                    Err(e) => self.report_join_error(e),
                }
            }
        }

        stopping.armed = false;
        self.set_run_state(LoopRunState::Idle);
        LoopRunState::Idle
    }

    /// Collect a loop that already ended on its own (match started, client
    /// lost) so the next toggle starts instead of stopping.
    async fn reap_finished(&self) {
        let finished = {
            let mut slot = self.slot.lock();
            let done = slot.state == LoopRunState::Running
                && slot.task.as_ref().is_some_and(|t| t.handle.is_finished());
            if done {
                slot.state = LoopRunState::Idle;
                slot.task.take()
            } else {
                None
            }
        };
        if let Some(task) = finished {
            match task.handle.await {
                Ok(exit) => tracing::debug!(%exit, "Reaped finished poll loop"),
                Err(e) => self.report_join_error(e),
            }
        }
    }

    fn report_aborted(&self) {
        self.monitor.set_status(LoopExit::Aborted.to_string());
        self.monitor.emit(Event::LoopStopped {
            exit: LoopExit::Aborted,
        });
    }

    fn report_join_error(&self, e: JoinError) {
        tracing::error!(error = %e, "Poll task failed");
        let exit = LoopExit::Failed(e.to_string());
        self.monitor.set_status(exit.to_string());
        self.monitor.emit(Event::LoopStopped { exit });
    }

    fn set_run_state(&self, state: LoopRunState) {
        self.slot.lock().state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::ConnectionInfo;

    fn unavailable() -> Option<ConnectionInfo> {
        None
    }

    #[test]
    fn default_timings() {
        let config = AccepterConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.stop_grace, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn start_without_client_stays_idle() {
        let accepter = AutoAccepter::new(Arc::new(unavailable), AccepterConfig::default());
        let err = accepter.toggle().await.unwrap_err();
        assert!(matches!(err, AccepterError::CredentialUnavailable(_)));
        assert_eq!(accepter.run_state(), LoopRunState::Idle);
        assert!(!accepter.is_connected());
        assert!(accepter.status_message().starts_with("Not connected"));
    }

    #[tokio::test]
    async fn running_without_task_recovers_to_idle() {
        let accepter = AutoAccepter::new(Arc::new(unavailable), AccepterConfig::default());
        accepter.set_run_state(LoopRunState::Running);
        assert_eq!(accepter.toggle().await.unwrap(), LoopRunState::Idle);
        assert_eq!(accepter.run_state(), LoopRunState::Idle);
    }

    #[tokio::test]
    async fn reset_with_busy_client_still_goes_idle() {
        let accepter = AutoAccepter::new(Arc::new(unavailable), AccepterConfig::default());
        let api = accepter.api();
        let _held = api.lock().await;
        accepter.set_run_state(LoopRunState::Running);
        assert_eq!(accepter.toggle().await.unwrap(), LoopRunState::Idle);
        assert_eq!(accepter.status_message(), "Auto-accept reset");
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let accepter = AutoAccepter::new(Arc::new(unavailable), AccepterConfig::default());
        assert_eq!(accepter.stop().await, LoopRunState::Idle);
        accepter.shutdown().await;
        assert!(!accepter.is_running());
    }
}
