//! Session configuration and connect-string parsing.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Port used when a connect-string host omits one.
pub const DEFAULT_PORT: u16 = 2181;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings needed to open a session.
///
/// Derives `Serialize`/`Deserialize` so it can sit inside an application's
/// own config file. Missing fields take their [`Default`] values; the
/// connect string has no usable default and must always be supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Comma-separated `host:port` list, optionally followed by a chroot,
    /// e.g. `"10.0.0.1:2181,10.0.0.2:2181/app/a"`.
    pub connect_string: String,

    /// Requested session timeout in milliseconds. The server may
    /// negotiate a different value.
    pub session_timeout_ms: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_string: String::new(),
            session_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Checks every field and returns the parsed connect string.
    ///
    /// # Errors
    /// - [`ConfigError::BlankConnectString`]: empty or whitespace only
    /// - [`ConfigError::NonPositiveTimeout`]: timeout `<= 0`
    /// - [`ConfigError::InvalidConnectString`]: malformed hosts or chroot
    pub fn validate(&self) -> Result<ConnectString, ConfigError> {
        if self.connect_string.trim().is_empty() {
            return Err(ConfigError::BlankConnectString);
        }
        if self.session_timeout_ms <= 0 {
            return Err(ConfigError::NonPositiveTimeout(self.session_timeout_ms));
        }
        self.connect_string.parse()
    }

    /// The requested timeout as a `Duration` (zero if not positive).
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.session_timeout_ms).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// ConnectString
// ---------------------------------------------------------------------------

/// A parsed connect string: the server endpoints and an optional chroot.
///
/// With a chroot of `/app/a`, the session sends `/foo` to the server as
/// `/app/a/foo`, and paths coming back are stripped of the prefix again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
    hosts: Vec<String>,
    chroot: Option<String>,
}

impl ConnectString {
    /// Endpoints as `host:port`, in the order they were written.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// The namespace root, if one was given (never `/`).
    pub fn chroot(&self) -> Option<&str> {
        self.chroot.as_deref()
    }
}

impl FromStr for ConnectString {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::BlankConnectString);
        }

        let (host_part, chroot) = match s.find('/') {
            Some(i) => (&s[..i], parse_chroot(&s[i..])?),
            None => (s, None),
        };

        let hosts = host_part
            .split(',')
            .map(parse_host)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { hosts, chroot })
    }
}

impl fmt::Display for ConnectString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hosts.join(","))?;
        if let Some(chroot) = &self.chroot {
            write!(f, "{chroot}")?;
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConnectString(msg.into())
}

fn parse_chroot(chroot: &str) -> Result<Option<String>, ConfigError> {
    if chroot == "/" {
        return Ok(None);
    }
    crate::path::check(chroot, false)
        .map_err(|reason| invalid(format!("chroot {chroot:?}: {reason}")))?;
    Ok(Some(chroot.to_string()))
}

fn parse_host(entry: &str) -> Result<String, ConfigError> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(invalid("empty host entry"));
    }

    // Bracketed IPv6 literal: "[::1]" or "[::1]:2181".
    if let Some(rest) = entry.strip_prefix('[') {
        let (addr, after) = rest
            .split_once(']')
            .ok_or_else(|| invalid(format!("unterminated '[' in {entry:?}")))?;
        let port = match after {
            "" => DEFAULT_PORT,
            p => parse_port(p.strip_prefix(':').unwrap_or(p), entry)?,
        };
        return Ok(format!("[{addr}]:{port}"));
    }

    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => (host, parse_port(port, entry)?),
        None => (entry, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(invalid(format!("missing host in {entry:?}")));
    }
    Ok(format!("{host}:{port}"))
}

fn parse_port(port: &str, entry: &str) -> Result<u16, ConfigError> {
    port.parse()
        .map_err(|_| invalid(format!("invalid port in {entry:?}")))
}
