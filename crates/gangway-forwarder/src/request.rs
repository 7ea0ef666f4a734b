//! Outbound request construction.
//!
//! Builds the method, version, URI, headers, and body producer for the
//! outbound request from the inbound context and the destination prefix,
//! then lets the request transform hook have the last word.

use crate::body::{ProducerHandle, StreamCopyBody};
use crate::context::{BodySizeLimit, InboundContext};
use crate::headers;
use crate::outbound::{ForwardOptions, OutboundRequest, VersionPolicy};
use crate::telemetry::Telemetry;
use crate::transforms::Transforms;
use anyhow::Context as _;
use hyper::http::uri::{Authority, Scheme};
use hyper::{header, Method, Uri, Version};
use std::sync::Arc;
use tracing::warn;

/// Shortest possible absolute destination prefix (`http://a`).
const MIN_PREFIX_LENGTH: usize = 8;

/// Validated destination prefix parts the outbound URI is derived from.
#[derive(Debug, Clone)]
pub(crate) struct DestinationPrefix {
    scheme: Scheme,
    authority: Authority,
    /// Prefix path with any trailing slash removed, ready for joining.
    base_path: String,
}

pub(crate) fn parse_destination_prefix(prefix: &str) -> Option<DestinationPrefix> {
    if prefix.len() < MIN_PREFIX_LENGTH {
        return None;
    }
    let uri: Uri = prefix.parse().ok()?;
    let scheme = uri.scheme()?.clone();
    let authority = uri.authority()?.clone();
    let base_path = uri.path().trim_end_matches('/').to_string();
    Some(DestinationPrefix {
        scheme,
        authority,
        base_path,
    })
}

/// Join the destination prefix with the inbound path and query.
pub(crate) fn destination_uri(
    prefix: &DestinationPrefix,
    path: &str,
    query: Option<&str>,
) -> anyhow::Result<Uri> {
    let mut path_and_query =
        String::with_capacity(prefix.base_path.len() + path.len() + query.map_or(0, |q| q.len() + 1));
    path_and_query.push_str(&prefix.base_path);
    path_and_query.push_str(path);
    if path_and_query.is_empty() {
        path_and_query.push('/');
    }
    if let Some(query) = query {
        if !query.is_empty() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }
    }
    Uri::builder()
        .scheme(prefix.scheme.clone())
        .authority(prefix.authority.clone())
        .path_and_query(path_and_query)
        .build()
        .context("joining the destination prefix with the request path")
}

/// Whether this request should take the upgrade path. The feature probe alone
/// is insufficient because some runtimes mark every request as upgradable, so
/// the `Upgrade` header has to name a protocol we tunnel.
pub(crate) fn is_upgrade_request(inbound: &dyn InboundContext) -> bool {
    if !inbound.is_upgradable() {
        return false;
    }
    inbound
        .headers()
        .get_all(header::UPGRADE)
        .iter()
        .any(|value| {
            let value = value.as_bytes();
            value.eq_ignore_ascii_case(b"websocket")
                || (value.len() >= 5 && value[..5].eq_ignore_ascii_case(b"spdy/"))
        })
}

/// Decide whether the outbound request carries a body. Ordered rules, first
/// match wins.
pub(crate) fn request_has_body(inbound: &dyn InboundContext) -> bool {
    if let Some(answer) = inbound.can_have_body() {
        return answer;
    }

    let headers = inbound.headers();
    let mut transfer_encoding = headers.get_all(header::TRANSFER_ENCODING).iter();
    if let (Some(value), None) = (transfer_encoding.next(), transfer_encoding.next()) {
        if value.as_bytes().eq_ignore_ascii_case(b"chunked") {
            return true;
        }
    }
    if let Some(value) = headers.get(header::CONTENT_LENGTH) {
        return value
            .to_str()
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .is_some_and(|length| length > 0);
    }
    // HTTP/1.x requests without framing headers have no body. HTTP/2 and
    // later can stream one for any method that semantically takes a body.
    if inbound.version() < Version::HTTP_2 {
        return false;
    }
    let method = inbound.method();
    !(*method == Method::GET
        || *method == Method::HEAD
        || *method == Method::DELETE
        || *method == Method::CONNECT
        || *method == Method::TRACE)
}

pub(crate) struct BuiltRequest {
    pub request: OutboundRequest,
    pub body_handle: Option<ProducerHandle>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn build_outbound_request(
    inbound: &mut dyn InboundContext,
    prefix: &DestinationPrefix,
    destination_prefix: &str,
    transforms: &Transforms,
    options: &ForwardOptions,
    is_streaming: bool,
    telemetry: &Arc<dyn Telemetry>,
) -> anyhow::Result<BuiltRequest> {
    let upgrade = is_upgrade_request(inbound);
    let (version, version_policy) = if upgrade {
        // Tunnels only exist on HTTP/1.1.
        (Version::HTTP_11, VersionPolicy::RequestVersionOrLower)
    } else {
        (
            options.effective_version(),
            options.effective_version_policy(),
        )
    };

    let mut request = OutboundRequest {
        method: inbound.method().clone(),
        uri: None,
        version,
        version_policy,
        headers: hyper::HeaderMap::new(),
        body: None,
    };

    let mut body_handle = None;
    if request_has_body(inbound) {
        let source = inbound
            .take_body()
            .context("the inbound runtime did not hand over the request body stream")?;
        let body = StreamCopyBody::new(
            source,
            is_streaming,
            inbound.abort_token(),
            Arc::clone(telemetry),
        );
        body_handle = Some(body.handle());
        request.body = Some(body);

        if is_streaming {
            inbound.disable_request_body_min_rate();
            if inbound.disable_request_body_size_limit() == BodySizeLimit::ReadOnly {
                warn!("request body size limit is read-only; proceeding with the limit in place");
            }
        }
    }

    if transforms.copy_request_headers {
        headers::copy_request_headers(inbound.headers(), &mut request.headers);
    }

    let default_uri = destination_uri(prefix, inbound.path(), inbound.query())?;
    if let Some(hook) = &transforms.on_request {
        hook(&*inbound, &mut request, destination_prefix).await;
    }
    if request.uri.is_none() {
        request.uri = Some(default_uri);
    }

    Ok(BuiltRequest {
        request,
        body_handle,
    })
}
