//! Local API endpoint discovery.
//!
//! Works out how to reach `tailscaled`'s local API, and with which
//! credential, from environment variables and read-only filesystem probes.
//!
//! ```no_run
//! use discovery::{Environment, resolve};
//!
//! let env = Environment::from_process();
//! let result = resolve(&env, |path| path.exists(), false);
//! println!("{}", result.endpoint);
//! ```
//!
//! Resolution never fails: when nothing else matches, the default socket
//! path is returned and connection errors surface later in the transport.

/// Log a discovery step at `info` when verbose discovery logging is on,
/// `debug` otherwise.
macro_rules! step {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

mod endpoint;
pub mod env;
pub mod platform;
mod resolver;

pub use endpoint::{Credential, DiscoveryResult, Endpoint, Source};
pub use env::Environment;
pub use resolver::{
    DEFAULT_CAPABILITY_VERSION, DEFAULT_LOOPBACK_HOST, FALLBACK_SOCKET, Resolver, SocketCandidate,
    WELL_KNOWN_SOCKETS, resolve, well_known_sockets,
};
