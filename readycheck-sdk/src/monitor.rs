//! Status board and event stream shared between the accepter and front-ends.
//!
//! Front-ends either poll [`Monitor::snapshot`] or subscribe to [`Event`]s.
//! Locks here are synchronous and never held across an `.await`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::phase::GamePhase;
use crate::poll::LoopExit;

/// Whether connection details are loaded. Gates every network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Events emitted for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connection details loaded from the lockfile.
    Connected,
    /// Connection details dropped.
    Disconnected { reason: String },
    /// The observed game-flow phase changed.
    PhaseChanged { phase: GamePhase },
    /// An accept call went through for the current ready check.
    ReadyCheckAccepted,
    /// A poll run was launched.
    LoopStarted,
    /// A poll run ended.
    LoopStopped { exit: LoopExit },
}

/// Point-in-time view for front-ends.
#[derive(Debug, Clone)]
pub struct Status {
    pub connection: ConnectionState,
    pub running: bool,
    pub phase: GamePhase,
    pub message: String,
    pub updated_at: DateTime<Utc>,
    pub accepted_total: u64,
    pub last_accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Board {
    connection: ConnectionState,
    phase: GamePhase,
    message: String,
    updated_at: DateTime<Utc>,
    accepted_total: u64,
    last_accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Monitor {
    board: RwLock<Board>,
    events: broadcast::Sender<Event>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            board: RwLock::new(Board {
                connection: ConnectionState::Disconnected,
                phase: GamePhase::Unknown,
                message: "Idle".to_string(),
                updated_at: Utc::now(),
                accepted_total: 0,
                last_accepted_at: None,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Replace the status message. Most recent write wins. Returns true when
    /// the text changed; only changes are logged.
    pub fn set_status(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut board = self.board.write();
        board.updated_at = Utc::now();
        if board.message == message {
            return false;
        }
        tracing::info!(status = %message);
        board.message = message;
        true
    }

    pub fn status_message(&self) -> String {
        self.board.read().message.clone()
    }

    pub fn connection(&self) -> ConnectionState {
        self.board.read().connection
    }

    pub fn phase(&self) -> GamePhase {
        self.board.read().phase
    }

    pub(crate) fn set_connection(&self, state: ConnectionState, reason: Option<&str>) {
        let previous = std::mem::replace(&mut self.board.write().connection, state);
        if previous == state {
            return;
        }
        match state {
            ConnectionState::Connected => self.emit(Event::Connected),
            ConnectionState::Disconnected => self.emit(Event::Disconnected {
                reason: reason.unwrap_or("closed").to_string(),
            }),
        }
    }

    /// Record the latest phase; returns true when it changed.
    pub(crate) fn set_phase(&self, phase: GamePhase) -> bool {
        let previous = std::mem::replace(&mut self.board.write().phase, phase);
        if previous != phase {
            self.emit(Event::PhaseChanged { phase });
            true
        } else {
            false
        }
    }

    pub(crate) fn record_accept(&self) {
        {
            let mut board = self.board.write();
            board.accepted_total += 1;
            board.last_accepted_at = Some(Utc::now());
        }
        self.emit(Event::ReadyCheckAccepted);
    }

    pub(crate) fn emit(&self, event: Event) {
        // No receivers is fine: front-ends may only poll.
        let _ = self.events.send(event);
    }

    pub(crate) fn snapshot(&self, running: bool) -> Status {
        let board = self.board.read();
        Status {
            connection: board.connection,
            running,
            phase: board.phase,
            message: board.message.clone(),
            updated_at: board.updated_at,
            accepted_total: board.accepted_total,
            last_accepted_at: board.last_accepted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_status_wins() {
        let monitor = Monitor::new();
        monitor.set_status("first");
        monitor.set_status("second");
        assert_eq!(monitor.status_message(), "second");
    }

    #[test]
    fn repeated_status_is_not_a_change() {
        let monitor = Monitor::new();
        assert!(monitor.set_status("Request failed"));
        let first = monitor.snapshot(false).updated_at;
        assert!(!monitor.set_status("Request failed"));
        assert!(monitor.snapshot(false).updated_at >= first);
        assert!(monitor.set_status("Waiting in lobby"));
        assert_eq!(monitor.status_message(), "Waiting in lobby");
    }

    #[test]
    fn connection_events_only_on_change() {
        let monitor = Monitor::new();
        let mut rx = monitor.subscribe();
        monitor.set_connection(ConnectionState::Connected, None);
        monitor.set_connection(ConnectionState::Connected, None);
        monitor.set_connection(ConnectionState::Disconnected, Some("gone"));

        assert_eq!(rx.try_recv().unwrap(), Event::Connected);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Disconnected { reason: "gone".to_string() }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn accepts_are_counted() {
        let monitor = Monitor::new();
        monitor.record_accept();
        monitor.record_accept();
        let status = monitor.snapshot(false);
        assert_eq!(status.accepted_total, 2);
        assert!(status.last_accepted_at.is_some());
    }

    #[test]
    fn phase_change_detection() {
        let monitor = Monitor::new();
        assert!(monitor.set_phase(GamePhase::Lobby));
        assert!(!monitor.set_phase(GamePhase::Lobby));
        assert!(monitor.set_phase(GamePhase::Matchmaking));
        assert_eq!(monitor.phase(), GamePhase::Matchmaking);
    }
}
