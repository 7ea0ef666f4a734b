//! Capability surface the hosting HTTP runtime exposes per request.
//!
//! The engine drives everything through this facade: the parsed request, the
//! response channel, the abort token, and a set of optional features that
//! each runtime may or may not provide. The feature methods default to
//! "absent" so minimal runtimes implement only what they have.

use crate::body::InboundBody;
use crate::error::ErrorFeature;
use async_trait::async_trait;
use hyper::{HeaderMap, Method, StatusCode, Version};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// A raw byte channel with both directions, as obtained from a protocol
/// upgrade.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// Owned tunnel stream handed over after a 101 exchange.
pub type UpgradedIo = Box<dyn Duplex>;

/// Outcome of asking the runtime to lift its request body size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySizeLimit {
    /// The runtime exposes no size cap.
    Unsupported,
    /// The cap is lifted for the rest of the request.
    Disabled,
    /// Body reads already began; the cap can no longer change.
    ReadOnly,
}

/// Per-request facade over the inbound HTTP runtime.
#[async_trait]
pub trait InboundContext: Send {
    // ---- request ----

    fn method(&self) -> &Method;
    fn version(&self) -> Version;
    fn scheme(&self) -> &str;
    /// Host (and optional port) the client addressed.
    fn authority(&self) -> Option<&str>;
    /// Mount point stripped by the host before routing, if any.
    fn path_base(&self) -> &str {
        ""
    }
    fn path(&self) -> &str;
    /// Query string without the leading `?`.
    fn query(&self) -> Option<&str>;
    /// Request headers in insertion order, multi-value aware.
    fn headers(&self) -> &HeaderMap;
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
    /// Hand over the request body stream. The stream stays bound to the
    /// request lifetime owned by the runtime.
    fn take_body(&mut self) -> Option<InboundBody>;

    // ---- response ----

    fn status(&self) -> StatusCode;
    fn set_status(&mut self, status: StatusCode);
    /// Reason phrases only survive on HTTP/1.x transports; the default drops
    /// them.
    fn set_reason_phrase(&mut self, reason: &str) {
        let _ = reason;
    }
    fn response_headers_mut(&mut self) -> &mut HeaderMap;
    /// Sink the response body is written into.
    fn response_body_mut(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin);
    /// Writable trailer bag, when the transport supports trailers and the
    /// response is still open for them.
    fn response_trailers_mut(&mut self) -> Option<&mut HeaderMap> {
        None
    }
    /// Whether status and headers already went out on the wire.
    fn response_has_started(&self) -> bool;
    /// Drop the status and headers of a response that has not started.
    fn clear_response(&mut self);
    /// Flush headers, body, and trailers out to the client.
    async fn complete_response(&mut self) -> io::Result<()>;

    // ---- abort ----

    /// Token the runtime cancels when the client goes away.
    fn abort_token(&self) -> CancellationToken;
    /// Transport-layer termination, used when reset is unavailable.
    fn abort(&mut self);

    // ---- failure reporting ----

    /// Record the exchange failure for inbound middleware to observe.
    fn set_error(&mut self, error: ErrorFeature);

    // ---- optional features ----

    /// Whether the transport can switch protocols on this request. Some
    /// runtimes report every HTTP/1.1 request as upgradable, so this probe
    /// alone never decides the upgrade path.
    fn is_upgradable(&self) -> bool {
        false
    }
    /// Take over the connection after the 101 headers were sent.
    async fn upgrade(&mut self) -> io::Result<UpgradedIo> {
        Err(io::Error::other("protocol upgrades not supported"))
    }
    /// Definitive request body presence answer, when the runtime has one.
    fn can_have_body(&self) -> Option<bool> {
        None
    }
    /// HTTP/2-layer error signal. Returns false when unsupported.
    fn reset(&mut self, error_code: u32) -> bool {
        let _ = error_code;
        false
    }
    /// Lift the minimum request body data rate for streaming requests.
    fn disable_request_body_min_rate(&mut self) {}
    /// Lift the request body size cap for streaming requests.
    fn disable_request_body_size_limit(&mut self) -> BodySizeLimit {
        BodySizeLimit::Unsupported
    }
}
