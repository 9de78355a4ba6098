//! The public entry point: [`Configuration`] plus the [`Transport`] seam.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use discovery::{Credential, DEFAULT_CAPABILITY_VERSION, DiscoveryResult, Endpoint, Environment};

use crate::error::TransportError;
use crate::http::CAPABILITY_HEADER;
use crate::http_client::HttpTransport;
use crate::request::{Request, Response};
use crate::socket::UnixSocketTransport;
use crate::stream::EventStream;

/// Sends requests to the local API.
///
/// Higher layers call through this trait and own everything above it: JSON
/// decoding, status handling and retries. Implementations never interpret
/// response bodies.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send one request and return the complete response.
    async fn send(
        &self,
        request: &Request,
        config: &Configuration,
    ) -> Result<Response, TransportError>;

    /// Send a request whose response is a long-lived stream of event lines.
    async fn send_streaming(
        &self,
        request: &Request,
        config: &Configuration,
    ) -> Result<EventStream, TransportError>;
}

/// Dispatches on the configured endpoint: Unix sockets go through
/// [`UnixSocketTransport`], everything else through [`HttpTransport`].
///
/// Every request is sent with the capability header and, when a credential
/// is configured, a Basic `Authorization` header.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
    unix: UnixSocketTransport,
    http: HttpTransport,
}

impl DefaultTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `http` for loopback and base-URL endpoints.
    pub fn with_http(http: HttpTransport) -> Self {
        Self {
            unix: UnixSocketTransport,
            http,
        }
    }
}

/// Copy `request` and add the headers every local API call carries.
pub fn enrich(request: &Request, config: &Configuration) -> Request {
    let mut request = request.clone();
    request.set_header(CAPABILITY_HEADER, config.capability_version().to_string());
    if let Some(credential) = config.credential() {
        request.set_header("Authorization", basic_auth(credential));
    }
    request
}

/// `Basic` authorization value for `credential`, with an empty user name.
pub fn basic_auth(credential: &Credential) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{}", credential.token())))
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn send(
        &self,
        request: &Request,
        config: &Configuration,
    ) -> Result<Response, TransportError> {
        let request = enrich(request, config);
        match config.endpoint() {
            Endpoint::UnixSocket { path } => {
                self.unix
                    .send(path, &request, config.capability_version())
                    .await
            }
            endpoint @ (Endpoint::Loopback { .. } | Endpoint::BaseUrl { .. }) => {
                self.http.send(endpoint, &request).await
            }
        }
    }

    async fn send_streaming(
        &self,
        request: &Request,
        config: &Configuration,
    ) -> Result<EventStream, TransportError> {
        let request = enrich(request, config);
        match config.endpoint() {
            Endpoint::UnixSocket { path } => {
                self.unix
                    .send_streaming(path, &request, config.capability_version())
                    .await
            }
            endpoint @ (Endpoint::Loopback { .. } | Endpoint::BaseUrl { .. }) => {
                self.http.send_streaming(endpoint, &request).await
            }
        }
    }
}

/// Everything needed to talk to the local API.
///
/// Immutable once built, and cheap to clone: the transport is shared.
/// Concurrent calls on the same configuration are independent.
///
/// ```no_run
/// # async fn run() -> Result<(), transport::TransportError> {
/// use transport::{Configuration, Request};
///
/// let config = Configuration::discover();
/// let status = config.send(&Request::get("/localapi/v0/status")).await?;
/// println!("{}", String::from_utf8_lossy(status.body()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Configuration {
    endpoint: Endpoint,
    credential: Option<Credential>,
    capability_version: u32,
    transport: Arc<dyn Transport>,
}

impl Configuration {
    /// A configuration for `endpoint` with no credential, the default
    /// capability version and [`DefaultTransport`].
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            credential: None,
            capability_version: DEFAULT_CAPABILITY_VERSION,
            transport: Arc::new(DefaultTransport::default()),
        }
    }

    /// Build from a resolver result.
    pub fn from_discovery(result: DiscoveryResult) -> Self {
        Self {
            credential: result.credential,
            capability_version: result.capability_version,
            ..Self::new(result.endpoint)
        }
    }

    /// Resolve from the process environment, without sensitive discovery.
    pub fn discover() -> Self {
        let environment = Environment::from_process();
        Self::from_discovery(discovery::resolve(&environment, |path| path.exists(), false))
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_capability_version(mut self, capability_version: u32) -> Self {
        self.capability_version = capability_version;
        self
    }

    /// Replace the transport, for example with a test double.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn capability_version(&self) -> u32 {
        self.capability_version
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send `request` through the configured transport.
    pub async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        self.transport.send(request, self).await
    }

    /// Open an event stream through the configured transport.
    pub async fn send_streaming(&self, request: &Request) -> Result<EventStream, TransportError> {
        self.transport.send_streaming(request, self).await
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential)
            .field("capability_version", &self.capability_version)
            .field("transport", &self.transport)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery::Source;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recording {
        seen: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(
            &self,
            request: &Request,
            config: &Configuration,
        ) -> Result<Response, TransportError> {
            self.seen.lock().unwrap().push(enrich(request, config));
            Ok(Response::new(204, Default::default(), Default::default()))
        }

        async fn send_streaming(
            &self,
            _request: &Request,
            _config: &Configuration,
        ) -> Result<EventStream, TransportError> {
            Err(TransportError::Unimplemented("streaming in tests"))
        }
    }

    #[test]
    fn basic_auth_has_empty_user() {
        // base64(":secret")
        assert_eq!(basic_auth(&Credential::new("secret")), "Basic OnNlY3JldA==");
    }

    #[test]
    fn enrich_adds_headers_without_touching_the_original() {
        let config = Configuration::new(Endpoint::unix_socket("/tmp/x.sock"))
            .with_credential(Credential::new("secret"))
            .with_capability_version(42);
        let original = Request::get("/localapi/v0/status").header("X-Trace", "1");

        let enriched = enrich(&original, &config);

        assert_eq!(enriched.headers().get("Tailscale-Cap").map(String::as_str), Some("42"));
        assert_eq!(
            enriched.headers().get("Authorization").map(String::as_str),
            Some("Basic OnNlY3JldA==")
        );
        assert_eq!(enriched.headers().get("X-Trace").map(String::as_str), Some("1"));
        assert!(!original.headers().contains_key("Authorization"));
    }

    #[test]
    fn no_credential_no_authorization() {
        let config = Configuration::new(Endpoint::loopback("127.0.0.1", 1));
        let enriched = enrich(&Request::get("/"), &config);
        assert!(!enriched.headers().contains_key("Authorization"));
    }

    #[test]
    fn from_discovery_keeps_everything() {
        let config = Configuration::from_discovery(DiscoveryResult {
            endpoint: Endpoint::loopback("127.0.0.1", 41112),
            credential: Some(Credential::new("tok")),
            capability_version: 7,
            source: Source::SameUserProof,
        });

        assert_eq!(config.endpoint(), &Endpoint::loopback("127.0.0.1", 41112));
        assert_eq!(config.credential().map(Credential::token), Some("tok"));
        assert_eq!(config.capability_version(), 7);
        assert!(!format!("{config:?}").contains("\"tok\""));
    }

    #[tokio::test]
    async fn configuration_calls_through_its_transport() {
        let recording = Arc::new(Recording::default());
        let config = Configuration::new(Endpoint::unix_socket("/nonexistent"))
            .with_transport(recording.clone());

        let response = config.send(&Request::get("/localapi/v0/prefs")).await.unwrap();
        assert_eq!(response.status(), 204);

        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path(), "/localapi/v0/prefs");
        assert!(seen[0].headers().contains_key("Tailscale-Cap"));

        drop(seen);
        assert!(matches!(
            config.send_streaming(&Request::get("/x")).await,
            Err(TransportError::Unimplemented(_))
        ));
    }
}
