//! HTTP over TCP, for loopback and base-URL endpoints.
//!
//! These endpoints speak ordinary HTTP, so requests go through `reqwest`
//! instead of hand framing.

use discovery::Endpoint;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use url::Url;

use crate::codec::EventStreamCodec;
use crate::error::TransportError;
use crate::request::{Headers, Method, Request, Response};
use crate::stream::EventStream;

/// Transport for [`Endpoint::Loopback`] and [`Endpoint::BaseUrl`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client, for example one with timeouts.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send one request and collect the whole response.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidEndpoint`] if no URL can be built
    /// - [`TransportError::NetworkFailure`] for any client-side failure
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> Result<Response, TransportError> {
        let response = self.execute(endpoint, request).await?;

        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::network(endpoint, e))?;

        tracing::debug!(status, body_len = body.len(), "received HTTP response");
        Ok(Response::new(status, headers, body))
    }

    /// Send a request and stream the response body line by line.
    ///
    /// # Errors
    ///
    /// As for [`HttpTransport::send`], plus
    /// [`TransportError::MalformedResponse`] if the status is not 200.
    pub async fn send_streaming(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> Result<EventStream, TransportError> {
        let response = self.execute(endpoint, request).await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(TransportError::malformed(format!(
                "unexpected status {status} for streaming request"
            )));
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(EventStream::spawn(
            StreamReader::new(Box::pin(body)),
            EventStreamCodec::body_only(),
            endpoint.to_string(),
        ))
    }

    async fn execute(
        &self,
        endpoint: &Endpoint,
        request: &Request,
    ) -> Result<reqwest::Response, TransportError> {
        let url = url_for(endpoint, request)?;
        tracing::debug!(%url, method = %request.method(), "sending HTTP request");

        let mut builder = self.client.request(reqwest_method(request.method()), url);
        if !request
            .headers()
            .keys()
            .any(|name| name.eq_ignore_ascii_case("accept"))
        {
            builder = builder.header("Accept", "application/json");
        }
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        builder
            .send()
            .await
            .map_err(|e| TransportError::network(endpoint, e))
    }
}

/// Build the full URL for `request` against `endpoint`.
///
/// The request path is appended to the endpoint's own path, so a base URL of
/// `http://host/prefix` and a path of `/localapi/v0/status` produce
/// `http://host/prefix/localapi/v0/status`. A query on the base URL is kept
/// and the request's parameters are appended after it; a fragment is dropped.
///
/// # Errors
///
/// Returns [`TransportError::InvalidEndpoint`] for socket endpoints and for
/// anything that does not parse as a URL.
pub fn url_for(endpoint: &Endpoint, request: &Request) -> Result<Url, TransportError> {
    let base = match endpoint {
        Endpoint::Loopback { host, port } if host.contains(':') && !host.starts_with('[') => {
            format!("http://[{host}]:{port}")
        }
        Endpoint::Loopback { host, port } => format!("http://{host}:{port}"),
        Endpoint::BaseUrl { url } => url.clone(),
        Endpoint::UnixSocket { path } => {
            return Err(TransportError::InvalidEndpoint(format!(
                "socket {} has no URL",
                path.display()
            )));
        }
    };

    let mut url =
        Url::parse(&base).map_err(|e| TransportError::InvalidEndpoint(format!("{base}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(TransportError::InvalidEndpoint(format!(
            "{base}: not a hierarchical URL"
        )));
    }

    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        request.path().trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_fragment(None);

    if !request.query_params().is_empty() {
        url.query_pairs_mut()
            .extend_pairs(request.query_params().iter().map(|(k, v)| (k, v)));
    }
    Ok(url)
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn collect_headers(response: &reqwest::Response) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
        match value.to_str() {
            Ok(value) => headers.insert(name.as_str(), value),
            Err(_) => tracing::debug!(header = %name, "skipping non-text header value"),
        }
    }
    headers
}
