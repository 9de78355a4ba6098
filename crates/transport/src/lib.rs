//! Local API transport.
//!
//! Sends HTTP requests to `tailscaled`'s local API over whichever endpoint
//! [`discovery`] resolved: a Unix domain socket, a loopback TCP port or an
//! arbitrary base URL.
//!
//! # Architecture
//!
//! - [`Configuration`] holds the endpoint, credential and capability version,
//!   and is the value every call goes through
//! - [`Transport`] is the seam higher layers depend on; [`DefaultTransport`]
//!   dispatches on the endpoint variant
//! - [`UnixSocketTransport`] frames HTTP/1.1 by hand over the socket
//! - [`HttpTransport`] uses `reqwest` for TCP endpoints
//! - [`EventStreamCodec`] and [`EventStream`] turn long-lived responses into
//!   a stream of event lines
//!
//! # Usage
//!
//! ```ignore
//! use futures::StreamExt;
//! use transport::{Configuration, Request};
//!
//! let config = Configuration::discover();
//!
//! let prefs = config.send(&Request::get("/localapi/v0/prefs")).await?;
//!
//! let mut bus = config
//!     .send_streaming(&Request::get("/localapi/v0/watch-ipn-bus"))
//!     .await?;
//! while let Some(event) = bus.next().await {
//!     handle(event?);
//! }
//! ```
//!
//! # Scope
//!
//! This crate only moves bytes. Response bodies are never decoded, and
//! nothing is retried: every failure is returned to the caller.

pub mod chunked;
mod codec;
mod error;
mod facade;
pub mod http;
mod http_client;
mod request;
mod socket;
mod stream;

pub mod testing;

pub use codec::{EventStreamCodec, Frame};
pub use discovery::{Credential, Endpoint};
pub use error::{BoxError, CodecError, TransportError};
pub use facade::{Configuration, DefaultTransport, Transport, basic_auth, enrich};
pub use http::{CAPABILITY_HEADER, ConnectionMode, HOST_PLACEHOLDER, encode_request, parse_response};
pub use http_client::{HttpTransport, url_for};
pub use request::{Headers, Method, Request, Response};
pub use socket::{UnixSocketTransport, exchange, open_stream};
pub use stream::EventStream;
