//! Endpoint resolution.
//!
//! Tiers are tried in a fixed order and the first one that produces an
//! endpoint wins; tiers are never combined. The token and capability
//! version overrides apply on top of whichever tier wins.
//!
//! 1. [`URL_VAR`](crate::env::URL_VAR)
//! 2. [`SOCKET_VAR`](crate::env::SOCKET_VAR)
//! 3. [`HOST_VAR`](crate::env::HOST_VAR) / [`PORT_VAR`](crate::env::PORT_VAR)
//! 4. the first existing path in [`WELL_KNOWN_SOCKETS`]
//! 5. same-user proof discovery, only when explicitly allowed
//! 6. [`FALLBACK_SOCKET`], whether or not it exists
//!
//! Changing this order breaks existing setups.

use std::path::{Path, PathBuf};

use crate::endpoint::{Credential, DiscoveryResult, Endpoint, Source};
use crate::env::{self, Environment};
use crate::platform::{self, PlatformProbe, ProofSearch};

/// Capability version advertised when none is configured.
pub const DEFAULT_CAPABILITY_VERSION: u32 = 115;

/// Socket used when nothing else matched.
pub const FALLBACK_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";

/// Host used for loopback endpoints when only a port is known.
pub const DEFAULT_LOOPBACK_HOST: &str = "127.0.0.1";

/// Well-known socket locations, most specific first, each with the default
/// credential to use when it is selected.
pub const WELL_KNOWN_SOCKETS: &[(&str, Option<&str>)] = &[
    // tailscaled built from source on macOS
    ("/var/run/tailscaled.socket", None),
    ("/var/run/tailscale/tailscaled.sock", None),
    ("/run/tailscale/tailscaled.sock", None),
];

/// A socket path to probe, with the credential that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketCandidate {
    pub path: PathBuf,
    pub credential: Option<Credential>,
}

impl SocketCandidate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// The [`WELL_KNOWN_SOCKETS`] table as candidates.
pub fn well_known_sockets() -> Vec<SocketCandidate> {
    WELL_KNOWN_SOCKETS
        .iter()
        .map(|(path, credential)| SocketCandidate {
            path: PathBuf::from(path),
            credential: credential.map(Credential::new),
        })
        .collect()
}

type FileCheck<'a> = Box<dyn Fn(&Path) -> bool + 'a>;

/// Resolves an environment snapshot into a [`DiscoveryResult`].
///
/// The filesystem check and platform probe are injectable so resolution can
/// be exercised without touching the real system.
pub struct Resolver<'a> {
    environment: &'a Environment,
    exists: FileCheck<'a>,
    probe: Box<dyn PlatformProbe + 'a>,
    candidates: Vec<SocketCandidate>,
    allow_sensitive_discovery: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(environment: &'a Environment) -> Self {
        Self {
            environment,
            exists: Box::new(|path: &Path| path.exists()),
            probe: platform::default_probe(),
            candidates: well_known_sockets(),
            allow_sensitive_discovery: false,
        }
    }

    /// Replace the filesystem existence check used for socket candidates.
    pub fn file_check(mut self, exists: impl Fn(&Path) -> bool + 'a) -> Self {
        self.exists = Box::new(exists);
        self
    }

    /// Replace the platform probe used for proof discovery.
    pub fn probe(mut self, probe: impl PlatformProbe + 'a) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Replace the ordered list of socket candidates.
    pub fn candidates(mut self, candidates: Vec<SocketCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Enable same-user proof discovery.
    ///
    /// Off by default: probing another process may make the OS ask the user
    /// for permission.
    pub fn allow_sensitive_discovery(mut self, allow: bool) -> Self {
        self.allow_sensitive_discovery = allow;
        self
    }

    /// Run the resolution tiers. Never fails.
    pub fn resolve(&self) -> DiscoveryResult {
        let verbose = self.environment.flag(env::DEBUG_VAR);
        let (endpoint, tier_credential, source) = self.select(verbose);

        let credential = self
            .environment
            .get(env::TOKEN_VAR)
            .map(Credential::new)
            .or(tier_credential);
        let capability_version = self
            .environment
            .parsed(env::CAPVER_VAR)
            .unwrap_or(DEFAULT_CAPABILITY_VERSION);

        step!(
            verbose,
            %endpoint,
            ?source,
            authenticated = credential.is_some(),
            capability_version,
            "resolved local API endpoint"
        );

        DiscoveryResult {
            endpoint,
            credential,
            capability_version,
            source,
        }
    }

    fn select(&self, verbose: bool) -> (Endpoint, Option<Credential>, Source) {
        let environment = self.environment;

        if let Some(url) = environment.get(env::URL_VAR) {
            step!(verbose, url, "using base URL override");
            return (Endpoint::base_url(url), None, Source::UrlOverride);
        }

        if let Some(path) = environment.path(env::SOCKET_VAR) {
            step!(verbose, path = %path.display(), "using socket override");
            return (Endpoint::UnixSocket { path }, None, Source::SocketOverride);
        }

        if let Some(endpoint) = self.loopback_override(verbose) {
            return (endpoint, None, Source::LoopbackOverride);
        }

        for candidate in &self.candidates {
            if (self.exists)(&candidate.path) {
                step!(verbose, path = %candidate.path.display(), "found well-known socket");
                return (
                    Endpoint::unix_socket(&candidate.path),
                    candidate.credential.clone(),
                    Source::WellKnownSocket,
                );
            }
            step!(verbose, path = %candidate.path.display(), "socket candidate missing");
        }

        if self.allow_sensitive_discovery {
            let search = ProofSearch::from_env(environment);
            if let Some(proof) = platform::find_proof(self.probe.as_ref(), &search) {
                return (
                    Endpoint::loopback(DEFAULT_LOOPBACK_HOST, proof.port),
                    Some(Credential::new(proof.token)),
                    Source::SameUserProof,
                );
            }
            step!(verbose, "no same-user proof found");
        } else {
            step!(verbose, "same-user proof discovery not allowed");
        }

        step!(verbose, path = FALLBACK_SOCKET, "falling back to default socket");
        (
            Endpoint::unix_socket(FALLBACK_SOCKET),
            None,
            Source::Fallback,
        )
    }

    fn loopback_override(&self, verbose: bool) -> Option<Endpoint> {
        let environment = self.environment;
        let host = environment.get(env::HOST_VAR);

        if environment.get(env::PORT_VAR).is_none() {
            if let Some(host) = host {
                tracing::warn!(host, "loopback host override ignored without a port");
            }
            return None;
        }

        let port: u16 = environment.parsed(env::PORT_VAR)?;
        let host = host.unwrap_or(DEFAULT_LOOPBACK_HOST);
        step!(verbose, host, port, "using loopback override");
        Some(Endpoint::loopback(host, port))
    }
}

/// Resolve with the platform's default probe.
pub fn resolve(
    environment: &Environment,
    exists: impl Fn(&Path) -> bool,
    allow_sensitive_discovery: bool,
) -> DiscoveryResult {
    Resolver::new(environment)
        .file_check(exists)
        .allow_sensitive_discovery(allow_sensitive_discovery)
        .resolve()
}
