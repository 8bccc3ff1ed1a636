//! Authenticated HTTP access to the client's local API.
//!
//! The API listens on loopback with a self-signed certificate and expects
//! Basic auth as `riot:<secret>`. One `reqwest::Client` (the session) is kept
//! per connection and reused across poll ticks; it is created lazily by
//! [`ApiClient::ensure_session`] so an `ApiClient` can exist before the game
//! client does.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};

pub use reqwest::Method;

use crate::error::{AccepterError, TransportKind};
use crate::lockfile::ConnectionInfo;
use crate::monitor::{ConnectionState, Monitor};

/// Basic-auth user for the local API.
pub const API_USERNAME: &str = "riot";

pub const GAMEFLOW_PHASE_ENDPOINT: &str = "/lol-gameflow/v1/gameflow-phase";
pub const READY_CHECK_ENDPOINT: &str = "/lol-matchmaking/v1/ready-check";
pub const READY_CHECK_ACCEPT_ENDPOINT: &str = "/lol-matchmaking/v1/ready-check/accept";

/// Status code and decoded body of a completed request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Empty or non-JSON bodies decode to `Null`.
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An open session bound to the connection info it was built from.
struct Session {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

pub struct ApiClient {
    info: Option<ConnectionInfo>,
    state: ConnectionState,
    session: Option<Session>,
    request_timeout: Duration,
    monitor: Arc<Monitor>,
}

impl ApiClient {
    pub fn new(request_timeout: Duration, monitor: Arc<Monitor>) -> Self {
        Self {
            info: None,
            state: ConnectionState::Disconnected,
            session: None,
            request_timeout,
            monitor,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Adopt new connection details. Any open session is closed first; the
    /// replacement is built on the next [`ensure_session`](Self::ensure_session).
    pub fn connect(&mut self, info: ConnectionInfo) -> ConnectionState {
        self.close();
        tracing::debug!(url = %info.base_url(), "Connection details loaded");
        self.info = Some(info);
        self.set_state(ConnectionState::Connected, None);
        self.state
    }

    /// Drop to `Disconnected`, closing the session. The last connection info
    /// is kept for diagnostics but no longer used.
    pub fn mark_disconnected(&mut self, reason: &str) {
        self.close();
        self.set_state(ConnectionState::Disconnected, Some(reason));
    }

    /// Make sure a session is open, creating one if needed.
    pub fn ensure_session(&mut self) -> Result<(), AccepterError> {
        if self.session.is_some() {
            return Ok(());
        }
        let info = match (&self.info, self.state) {
            (Some(info), ConnectionState::Connected) => info,
            _ => {
                self.monitor
                    .set_status("Can't open a session: not connected to the client");
                return Err(AccepterError::ConnectionUnestablished);
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            // Self-signed certificate on loopback.
            .danger_accept_invalid_certs(true)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| {
                let err = AccepterError::SessionUnavailable(e.to_string());
                self.monitor.set_status(format!("Can't open a session: {e}"));
                err
            })?;

        tracing::debug!(url = %info.base_url(), "Session opened");
        self.session = Some(Session {
            http,
            base_url: info.base_url(),
            secret: info.secret.clone(),
        });
        Ok(())
    }

    /// Issue one request. Requires an open session.
    ///
    /// Transport failures are recorded as status and returned; they leave the
    /// connection state alone. Unclassified failures also close the session so
    /// the next [`ensure_session`](Self::ensure_session) rebuilds it.
    pub async fn request(
        &mut self,
        method: Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse, AccepterError> {
        if self.state != ConnectionState::Connected {
            return Err(AccepterError::ConnectionUnestablished);
        }
        let Some(session) = &self.session else {
            return Err(AccepterError::SessionUnavailable(
                "no open session".to_string(),
            ));
        };

        let url = format!("{}{endpoint}", session.base_url);
        let mut req = session
            .http
            .request(method.clone(), &url)
            .basic_auth(API_USERNAME, Some(&session.secret));
        if let Some(body) = body {
            req = req.json(body);
        }

        let result = match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                resp.bytes().await.map(|bytes| ApiResponse {
                    status,
                    body: decode_body(&bytes),
                })
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(resp) => {
                tracing::trace!(%method, endpoint, status = resp.status, "Request done");
                Ok(resp)
            }
            Err(e) => Err(self.classify_failure(&method, endpoint, e)),
        }
    }

    /// Release the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("Session closed");
        }
    }

    fn classify_failure(&mut self, method: &Method, endpoint: &str, e: reqwest::Error) -> AccepterError {
        let kind = if e.is_timeout() {
            Some(TransportKind::Timeout)
        } else if e.is_connect() {
            Some(TransportKind::Connect)
        } else if e.is_request() || e.is_body() || e.is_decode() || e.is_status() {
            Some(TransportKind::Other)
        } else {
            None
        };

        match kind {
            Some(kind) => {
                let err = AccepterError::Transport {
                    method: method.to_string(),
                    endpoint: endpoint.to_string(),
                    kind,
                    message: e.to_string(),
                };
                tracing::debug!(error = %err, "Request failed");
                self.monitor.set_status(format!("Request failed: {method} {endpoint} ({kind})"));
                err
            }
            None => {
                tracing::error!(error = %e, %method, endpoint, "Unexpected request error, dropping session");
                self.close();
                self.monitor.set_status(format!("Unexpected error: {e}"));
                AccepterError::Unexpected(e.to_string())
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState, reason: Option<&str>) {
        self.state = state;
        self.monitor.set_connection(state, reason);
    }
}

impl Drop for ApiClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode_body(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::Protocol;

    fn client() -> ApiClient {
        ApiClient::new(Duration::from_secs(5), Arc::new(Monitor::new()))
    }

    #[test]
    fn session_requires_connection() {
        let mut api = client();
        assert_eq!(api.ensure_session(), Err(AccepterError::ConnectionUnestablished));
        assert!(!api.has_session());
    }

    #[test]
    fn session_is_lazy_and_reused() {
        let mut api = client();
        assert_eq!(
            api.connect(ConnectionInfo::new(51111, Protocol::Https, "abc")),
            ConnectionState::Connected
        );
        assert!(!api.has_session());
        api.ensure_session().unwrap();
        assert!(api.has_session());
        api.ensure_session().unwrap();
        assert!(api.has_session());
    }

    #[test]
    fn reconnect_drops_old_session() {
        let mut api = client();
        api.connect(ConnectionInfo::new(1, Protocol::Https, "a"));
        api.ensure_session().unwrap();
        api.connect(ConnectionInfo::new(2, Protocol::Https, "b"));
        assert!(!api.has_session());
        assert_eq!(api.connection_info().map(|i| i.port), Some(2));
    }

    #[test]
    fn close_is_idempotent() {
        let mut api = client();
        api.connect(ConnectionInfo::new(1, Protocol::Http, "a"));
        api.ensure_session().unwrap();
        api.close();
        api.close();
        assert!(!api.has_session());
        assert!(api.is_connected());
    }

    #[test]
    fn mark_disconnected_closes_session() {
        let mut api = client();
        api.connect(ConnectionInfo::new(1, Protocol::Http, "a"));
        api.ensure_session().unwrap();
        api.mark_disconnected("client exited");
        assert!(!api.has_session());
        assert_eq!(api.state(), ConnectionState::Disconnected);
        assert!(api.ensure_session().is_err());
    }

    #[tokio::test]
    async fn request_without_session_fails() {
        let mut api = client();
        api.connect(ConnectionInfo::new(1, Protocol::Http, "a"));
        let err = api
            .request(Method::GET, GAMEFLOW_PHASE_ENDPOINT, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccepterError::SessionUnavailable(_)));
    }

    #[tokio::test]
    async fn unexpected_error_drops_session_only() {
        let mut api = client();
        let mut info = ConnectionInfo::new(1, Protocol::Http, "a");
        info.host = "not a host".to_string();
        api.connect(info);
        api.ensure_session().unwrap();

        let err = api
            .request(Method::GET, GAMEFLOW_PHASE_ENDPOINT, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccepterError::Unexpected(_)));
        assert!(!err.is_connection_lost());
        assert!(!api.has_session());
        assert!(api.is_connected());
        assert!(api.monitor.status_message().starts_with("Unexpected error"));

        api.ensure_session().unwrap();
        assert!(api.has_session());
    }

    #[test]
    fn bodies_decode_leniently() {
        assert_eq!(decode_body(b""), serde_json::Value::Null);
        assert_eq!(decode_body(b"\"Lobby\""), serde_json::json!("Lobby"));
        assert_eq!(decode_body(b"<html>"), serde_json::Value::Null);
    }
}
