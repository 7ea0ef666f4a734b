//! Outbound request/response types and the destination client interface.

use crate::body::StreamCopyBody;
use crate::context::UpgradedIo;
use crate::forwarder::DEFAULT_TIMEOUT;
use async_trait::async_trait;
use hyper::{HeaderMap, Method, StatusCode, Uri, Version};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// How strictly the outbound client must honor the requested HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionPolicy {
    /// Use the requested version, negotiating downward when needed.
    #[default]
    RequestVersionOrLower,
    /// Use the requested version, negotiating upward when possible.
    RequestVersionOrHigher,
    /// Use exactly the requested version.
    RequestVersionExact,
}

/// Per-call tuning for a proxied exchange.
///
/// Deserializable so a host's configuration layer can carry it; unset fields
/// fall back to the engine defaults (100 s timeout, HTTP/2, version-or-lower).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForwardOptions {
    /// Cap on the time from send start to response headers, in whole seconds
    /// when deserialized.
    #[serde(rename = "timeout_secs", deserialize_with = "timeout_from_secs")]
    pub timeout: Option<Duration>,
    /// Preferred outbound HTTP version, as `"1.0"`, `"1.1"`, `"2"` or `"3"`.
    #[serde(deserialize_with = "version_from_str")]
    pub version: Option<Version>,
    pub version_policy: Option<VersionPolicy>,
}

impl ForwardOptions {
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn effective_version(&self) -> Version {
        self.version.unwrap_or(Version::HTTP_2)
    }

    pub fn effective_version_policy(&self) -> VersionPolicy {
        self.version_policy.unwrap_or_default()
    }
}

fn timeout_from_secs<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<u64>::deserialize(deserializer)?;
    Ok(secs.map(Duration::from_secs))
}

fn version_from_str<'de, D>(deserializer: D) -> Result<Option<Version>, D::Error>
where
    D: Deserializer<'de>,
{
    let version = Option::<String>::deserialize(deserializer)?;
    match version.as_deref() {
        None => Ok(None),
        Some("1.0") => Ok(Some(Version::HTTP_10)),
        Some("1.1") => Ok(Some(Version::HTTP_11)),
        Some("2") | Some("2.0") => Ok(Some(Version::HTTP_2)),
        Some("3") | Some("3.0") => Ok(Some(Version::HTTP_3)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unknown HTTP version '{other}'"
        ))),
    }
}

/// Outbound request under construction and in flight.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    /// Filled with the destination-joined URI when no request hook supplies
    /// one.
    pub uri: Option<Uri>,
    pub version: Version,
    pub version_policy: VersionPolicy,
    pub headers: HeaderMap,
    pub body: Option<StreamCopyBody>,
}

/// Response body stream from the destination; trailers become available once
/// the stream hits EOF.
pub trait ResponseStream: AsyncRead + Send + Unpin {
    fn trailers(&mut self) -> Option<HeaderMap> {
        None
    }
}

impl ResponseStream for tokio::io::Empty {}
impl ResponseStream for tokio::io::DuplexStream {}

/// Response received from the destination.
pub struct OutboundResponse {
    pub status: StatusCode,
    pub version: Version,
    /// HTTP/1.x reason phrase when the transport surfaces one.
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Box<dyn ResponseStream>>,
    /// Raw tunnel stream accompanying a 101 response.
    pub upgrade: Option<UpgradedIo>,
}

impl OutboundResponse {
    pub fn new(status: StatusCode) -> Self {
        OutboundResponse {
            status,
            version: Version::HTTP_11,
            reason: None,
            headers: HeaderMap::new(),
            body: None,
            upgrade: None,
        }
    }
}

impl fmt::Debug for OutboundResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("body", &self.body.is_some())
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// Destination-side HTTP client handle.
///
/// `send` pulls the request body producer while the response headers are in
/// flight; dropping the returned future cancels the send. Clients that
/// collect whole responses before returning them break streaming and are
/// rejected by the engine up front.
#[async_trait]
pub trait OutboundClient: Send + Sync {
    async fn send(
        &self,
        request: OutboundRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<OutboundResponse>;

    /// Whether this client buffers entire responses.
    fn buffers_responses(&self) -> bool {
        false
    }
}
