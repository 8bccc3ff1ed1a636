//! Client lockfile discovery.
//!
//! The game client writes a lockfile when it starts:
//!
//! ```text
//! LeagueClient:17968:51308:mQr8OsqYuL-CP3DVr1msrQ:https
//! ```
//!
//! Fields are process name, process id, API port, shared secret and protocol.
//! The file is rewritten on every client launch, so connection details are
//! re-read on every (re)connect attempt rather than cached.

use std::path::{Path, PathBuf};

use crate::error::LockfileError;

/// Where the client keeps its lockfile on a default install.
pub const DEFAULT_LOCKFILE_PATH: &str = r"D:\Riot Games\League of Legends\lockfile";

/// The local API always binds to loopback.
pub const LOCAL_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = LockfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(LockfileError::InvalidProtocol(other.to_string())),
        }
    }
}

/// Parameters needed to reach the local API.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub secret: String,
}

impl ConnectionInfo {
    pub fn new(port: u16, protocol: Protocol, secret: impl Into<String>) -> Self {
        Self {
            host: LOCAL_HOST.to_string(),
            port,
            protocol,
            secret: secret.into(),
        }
    }

    /// `protocol://host:port`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol.as_str(), self.host, self.port)
    }
}

// The secret stays out of logs.
impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A fully parsed lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lockfile {
    pub process_name: String,
    pub process_id: u32,
    pub port: u16,
    pub password: String,
    pub protocol: Protocol,
}

impl From<Lockfile> for ConnectionInfo {
    fn from(lock: Lockfile) -> Self {
        ConnectionInfo::new(lock.port, lock.protocol, lock.password)
    }
}

/// Parse lockfile contents. Surrounding whitespace is ignored.
pub fn parse_lockfile(content: &str) -> Result<Lockfile, LockfileError> {
    let parts: Vec<&str> = content.trim().split(':').collect();
    let [name, pid, port, password, protocol] = parts.as_slice() else {
        return Err(LockfileError::FieldCount(parts.len()));
    };

    let process_id = pid
        .parse::<u32>()
        .map_err(|_| LockfileError::InvalidPid(pid.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| LockfileError::InvalidPort(port.to_string()))?;

    Ok(Lockfile {
        process_name: name.to_string(),
        process_id,
        port,
        password: password.to_string(),
        protocol: protocol.parse()?,
    })
}

/// Supplies connection parameters, or `None` when the client is unavailable.
///
/// Must be cheap to call repeatedly and must never panic on a missing client.
pub trait CredentialSource: Send + Sync {
    fn discover(&self) -> Option<ConnectionInfo>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<ConnectionInfo> + Send + Sync,
{
    fn discover(&self) -> Option<ConnectionInfo> {
        self()
    }
}

/// Reads connection details from the lockfile on disk.
#[derive(Debug, Clone)]
pub struct LockfileSource {
    path: PathBuf,
}

impl LockfileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the lockfile, keeping the failure reason.
    pub fn read(&self) -> Result<Lockfile, String> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("can't read {}: {e}", self.path.display()))?;
        parse_lockfile(&content).map_err(|e| format!("bad lockfile {}: {e}", self.path.display()))
    }
}

impl Default for LockfileSource {
    fn default() -> Self {
        Self::new(DEFAULT_LOCKFILE_PATH)
    }
}

impl CredentialSource for LockfileSource {
    fn discover(&self) -> Option<ConnectionInfo> {
        match self.read() {
            Ok(lock) => {
                tracing::debug!(
                    process = %lock.process_name,
                    pid = lock.process_id,
                    port = lock.port,
                    "Lockfile found"
                );
                Some(lock.into())
            }
            Err(reason) => {
                tracing::debug!(%reason, "Lockfile unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_five_fields() {
        let lock = parse_lockfile("LeagueClient:1234:51111:abc123:https").unwrap();
        assert_eq!(lock.process_name, "LeagueClient");
        assert_eq!(lock.process_id, 1234);
        assert_eq!(lock.port, 51111);
        assert_eq!(lock.password, "abc123");
        assert_eq!(lock.protocol, Protocol::Https);

        let info = ConnectionInfo::from(lock);
        assert_eq!(info.base_url(), "https://127.0.0.1:51111");
        assert_eq!(info.secret, "abc123");
    }

    #[test]
    fn trailing_newline_is_ignored() {
        let lock = parse_lockfile("LeagueClient:1:2999:s3cret:http\r\n").unwrap();
        assert_eq!(lock.protocol, Protocol::Http);
        assert_eq!(lock.port, 2999);
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert_eq!(
            parse_lockfile("LeagueClient:1234:51111:abc123"),
            Err(LockfileError::FieldCount(4))
        );
        assert_eq!(
            parse_lockfile("LeagueClient:1234:51111:abc123:https:extra"),
            Err(LockfileError::FieldCount(6))
        );
        assert_eq!(parse_lockfile(""), Err(LockfileError::FieldCount(1)));
    }

    #[test]
    fn non_numeric_fields_are_rejected() {
        assert!(matches!(
            parse_lockfile("LeagueClient:abc:51111:s:https"),
            Err(LockfileError::InvalidPid(_))
        ));
        assert!(matches!(
            parse_lockfile("LeagueClient:1:99999:s:https"),
            Err(LockfileError::InvalidPort(_))
        ));
        assert!(matches!(
            parse_lockfile("LeagueClient:1:51111:s:wss"),
            Err(LockfileError::InvalidProtocol(_))
        ));
    }

    #[test]
    fn debug_hides_secret() {
        let info = ConnectionInfo::new(1, Protocol::Https, "hunter2");
        let dbg = format!("{info:?}");
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let source = LockfileSource::new("/definitely/not/here/lockfile");
        assert!(source.discover().is_none());
    }

    #[test]
    fn closures_are_sources() {
        let source = || Some(ConnectionInfo::new(8080, Protocol::Http, "x"));
        let info = CredentialSource::discover(&source).unwrap();
        assert_eq!(info.port, 8080);
    }
}
