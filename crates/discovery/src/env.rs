//! Environment variables consulted during discovery.

use std::collections::HashMap;
use std::path::PathBuf;

/// Base URL override. Always wins when set.
pub const URL_VAR: &str = "TAILSCALE_LOCALAPI_URL";
/// Unix socket path override.
pub const SOCKET_VAR: &str = "TAILSCALE_LOCALAPI_SOCKET";
/// Loopback host override; only used together with [`PORT_VAR`].
pub const HOST_VAR: &str = "TAILSCALE_LOCALAPI_HOST";
/// Loopback port override.
pub const PORT_VAR: &str = "TAILSCALE_LOCALAPI_PORT";
/// Credential override.
pub const TOKEN_VAR: &str = "TAILSCALE_LOCALAPI_TOKEN";
/// Capability version override.
pub const CAPVER_VAR: &str = "TAILSCALE_LOCALAPI_CAPVER";
/// Log every discovery decision at `info` instead of `debug`.
pub const DEBUG_VAR: &str = "TAILSCALE_LOCALAPI_DEBUG";
/// Explicit same-user proof file.
pub const PROOF_FILE_VAR: &str = "TAILSCALE_SAMEUSER_PROOF";
/// Restrict the proof directory scan to a single directory.
pub const PROOF_DIR_VAR: &str = "TAILSCALE_SAMEUSER_DIR";
/// Skip the `lsof` process probe.
pub const DISABLE_LSOF_VAR: &str = "TAILSCALE_DISABLE_LSOF";

/// A snapshot of environment variables.
///
/// Resolution works on a snapshot rather than on the live process environment
/// so that it stays deterministic and can be driven from tests.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Set a variable, returning the updated snapshot.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Look up a variable. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// Interpret a variable as a boolean flag.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(parse_bool)
    }

    /// Parse a variable, logging and discarding values that do not parse.
    pub fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(variable = key, value = raw, "ignoring unparseable value");
                None
            }
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
