//! Resolved endpoint types.

use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Serializer};

/// Where the local API can be reached.
///
/// Exactly one variant is active for a given configuration, and it never
/// changes once resolved. Switching transports means resolving again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// A Unix domain socket spoken to with hand-framed HTTP/1.1.
    UnixSocket { path: PathBuf },
    /// A TCP listener on the loopback interface.
    Loopback { host: String, port: u16 },
    /// An arbitrary base URL; request paths are appended to it.
    BaseUrl { url: String },
}

impl Endpoint {
    pub fn unix_socket(path: impl Into<PathBuf>) -> Self {
        Endpoint::UnixSocket { path: path.into() }
    }

    pub fn loopback(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Loopback {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(url: impl Into<String>) -> Self {
        Endpoint::BaseUrl { url: url.into() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::UnixSocket { path } => write!(f, "unix:{}", path.display()),
            Endpoint::Loopback { host, port } => write!(f, "http://{host}:{port}"),
            Endpoint::BaseUrl { url } => f.write_str(url),
        }
    }
}

/// Opaque token presented to the daemon as the password of a Basic auth header.
///
/// The token never appears in `Debug` output or serialized results.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Serialize for Credential {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("<redacted>")
    }
}

/// Which resolution tier produced a [`DiscoveryResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    UrlOverride,
    SocketOverride,
    LoopbackOverride,
    WellKnownSocket,
    SameUserProof,
    Fallback,
}

/// Output of the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub endpoint: Endpoint,
    pub credential: Option<Credential>,
    pub capability_version: u32,
    pub source: Source,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_is_redacted() {
        let credential = Credential::new("hunter2");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
        assert_eq!(
            serde_json::to_string(&credential).unwrap(),
            r#""<redacted>""#
        );
        assert_eq!(credential.token(), "hunter2");
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(
            Endpoint::unix_socket("/run/tailscale/tailscaled.sock").to_string(),
            "unix:/run/tailscale/tailscaled.sock"
        );
        assert_eq!(
            Endpoint::loopback("127.0.0.1", 41112).to_string(),
            "http://127.0.0.1:41112"
        );
    }

    #[test]
    fn endpoint_serializes_with_kind_tag() {
        let json = serde_json::to_value(Endpoint::loopback("127.0.0.1", 8080)).unwrap();
        assert_eq!(json["kind"], "loopback");
        assert_eq!(json["port"], 8080);
    }
}
