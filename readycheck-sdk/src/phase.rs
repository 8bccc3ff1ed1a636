//! Game-flow phase classification.

use serde::Deserialize;

/// High-level client state reported by `/lol-gameflow/v1/gameflow-phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamePhase {
    /// No usable value (request failed, empty or non-string body).
    Unknown,
    None,
    Lobby,
    Matchmaking,
    ReadyCheck,
    InProgress,
    /// Any phase the accepter doesn't care about (ChampSelect, EndOfGame, ...).
    Other,
}

impl GamePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            GamePhase::Unknown => "Unknown",
            GamePhase::None => "None",
            GamePhase::Lobby => "Lobby",
            GamePhase::Matchmaking => "Matchmaking",
            GamePhase::ReadyCheck => "ReadyCheck",
            GamePhase::InProgress => "InProgress",
            GamePhase::Other => "Other",
        }
    }
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the poll loop should do after observing a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Wait,
    /// Fetch the ready-check detail and accept it if still pending.
    CheckReady,
    /// A match is running; end the current run.
    StopLoop,
}

/// Map a raw game-flow value to a phase and the action it calls for.
pub fn classify(raw: Option<&str>) -> (GamePhase, Action) {
    match raw {
        None | Some("") => (GamePhase::Unknown, Action::Wait),
        Some("None") => (GamePhase::None, Action::Wait),
        Some("Lobby") => (GamePhase::Lobby, Action::Wait),
        Some("Matchmaking") => (GamePhase::Matchmaking, Action::Wait),
        Some("ReadyCheck") => (GamePhase::ReadyCheck, Action::CheckReady),
        Some("InProgress") => (GamePhase::InProgress, Action::StopLoop),
        Some(_) => (GamePhase::Other, Action::Wait),
    }
}

/// Classify a decoded gameflow response. The endpoint returns a bare JSON
/// string; anything else counts as no data.
pub fn classify_response(body: &serde_json::Value) -> (GamePhase, Action) {
    classify(body.as_str())
}

/// Body of `GET /lol-matchmaking/v1/ready-check`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyCheck {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub player_response: Option<String>,
}

impl ReadyCheck {
    /// Parse a ready-check body; anything unparseable reads as "no ready check".
    pub fn from_value(body: &serde_json::Value) -> Self {
        serde_json::from_value(body.clone()).unwrap_or_default()
    }

    /// The confirmation window is open and waiting for responses.
    pub fn is_pending(&self) -> bool {
        self.state == "InProgress"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_phases() {
        assert_eq!(classify(Some("None")), (GamePhase::None, Action::Wait));
        assert_eq!(classify(Some("Lobby")), (GamePhase::Lobby, Action::Wait));
        assert_eq!(classify(Some("Matchmaking")), (GamePhase::Matchmaking, Action::Wait));
        assert_eq!(classify(Some("ReadyCheck")), (GamePhase::ReadyCheck, Action::CheckReady));
        assert_eq!(classify(Some("InProgress")), (GamePhase::InProgress, Action::StopLoop));
    }

    #[test]
    fn missing_values_are_unknown() {
        assert_eq!(classify(None), (GamePhase::Unknown, Action::Wait));
        assert_eq!(classify(Some("")), (GamePhase::Unknown, Action::Wait));
    }

    #[test]
    fn everything_else_is_other() {
        for raw in ["ChampSelect", "EndOfGame", "readycheck", "Lobby ", "WaitingForStats"] {
            assert_eq!(classify(Some(raw)), (GamePhase::Other, Action::Wait), "{raw}");
        }
    }

    #[test]
    fn non_string_bodies_are_unknown() {
        assert_eq!(classify_response(&json!("ReadyCheck")).0, GamePhase::ReadyCheck);
        assert_eq!(classify_response(&json!(null)).0, GamePhase::Unknown);
        assert_eq!(
            classify_response(&json!({"errorCode": "RPC_ERROR"})).0,
            GamePhase::Unknown
        );
    }

    #[test]
    fn ready_check_body() {
        let rc = ReadyCheck::from_value(&json!({
            "state": "InProgress",
            "playerResponse": "None",
            "timer": 3.0
        }));
        assert!(rc.is_pending());
        assert_eq!(rc.player_response.as_deref(), Some("None"));

        let rc = ReadyCheck::from_value(&json!({"state": "EveryoneReady"}));
        assert!(!rc.is_pending());

        let rc = ReadyCheck::from_value(&json!({"httpStatus": 404, "message": "Not attached"}));
        assert!(!rc.is_pending());
    }
}
