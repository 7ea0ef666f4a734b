//! Orchestration of a single proxied exchange.
//!
//! [`Forwarder::forward`] drives the whole exchange: building the outbound
//! request, racing the send against timeout and client abort, copying the
//! response back, handling protocol upgrades, and mapping every failure mode
//! to a status code or a reset. Errors never unwind out of `forward`; the
//! only panics are caller contract violations.

use crate::body::ProducerHandle;
use crate::context::InboundContext;
use crate::copier::{self, StreamCopyResult};
use crate::error::{ErrorFeature, ForwardError, SharedIoError};
use crate::outbound::{ForwardOptions, OutboundClient};
use crate::request::{self, BuiltRequest};
use crate::telemetry::{ForwardStage, Telemetry, TracingTelemetry};
use crate::transforms::Transforms;
use crate::upgrade;
use hyper::{header, StatusCode, Version};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default cap on the time from send start to response headers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// HTTP/2 reset codes understood by inbound runtimes.
const RESET_CANCEL: u32 = 2;
const RESET_INTERNAL_ERROR: u32 = 8;

/// Drives proxied exchanges end to end.
pub struct Forwarder {
    telemetry: Arc<dyn Telemetry>,
}

impl Default for Forwarder {
    fn default() -> Self {
        Forwarder::new()
    }
}

impl Forwarder {
    /// A forwarder reporting telemetry through `tracing`.
    pub fn new() -> Self {
        Forwarder {
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn with_telemetry(telemetry: Arc<dyn Telemetry>) -> Self {
        Forwarder { telemetry }
    }

    /// Proxy one request/response exchange to `destination_prefix`.
    ///
    /// Runtime failures are classified as a [`ForwardError`], recorded on the
    /// inbound context, and translated into a status code (response not yet
    /// started) or a reset/abort (response underway). The returned value is
    /// [`ForwardError::None`] when the exchange completed.
    ///
    /// # Panics
    ///
    /// Panics when the caller passes a buffering outbound client or a
    /// destination prefix that is not an absolute http(s) URI.
    pub async fn forward(
        &self,
        inbound: &mut dyn InboundContext,
        destination_prefix: &str,
        client: &dyn OutboundClient,
        transforms: &Transforms,
        options: &ForwardOptions,
    ) -> ForwardError {
        assert!(
            !client.buffers_responses(),
            "outbound client must stream responses; a buffering client breaks body forwarding"
        );
        let prefix = match request::parse_destination_prefix(destination_prefix) {
            Some(prefix) => prefix,
            None => panic!("destination prefix '{destination_prefix}' is not an absolute http(s) URI"),
        };

        self.telemetry.forward_start(destination_prefix);
        let error = self
            .forward_inner(inbound, &prefix, destination_prefix, client, transforms, options)
            .await;
        self.telemetry.forward_stop(inbound.status().as_u16());
        error
    }

    #[allow(clippy::too_many_arguments)]
    async fn forward_inner(
        &self,
        inbound: &mut dyn InboundContext,
        prefix: &request::DestinationPrefix,
        destination_prefix: &str,
        client: &dyn OutboundClient,
        transforms: &Transforms,
        options: &ForwardOptions,
    ) -> ForwardError {
        let abort = inbound.abort_token();
        let is_streaming = is_streaming_request(inbound);

        let built = match request::build_outbound_request(
            inbound,
            prefix,
            destination_prefix,
            transforms,
            options,
            is_streaming,
            &self.telemetry,
        )
        .await
        {
            Ok(built) => built,
            Err(err) => return self.fail(inbound, ForwardError::Request, Some(err)),
        };
        let BuiltRequest {
            request,
            body_handle,
        } = built;

        // The timeout only runs while the send is in flight; the abort token
        // keeps watching for the whole exchange.
        self.telemetry.stage(ForwardStage::SendStart);
        let send = client.send(request, abort.child_token());
        tokio::pin!(send);
        let mut response = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                return self.fail(inbound, ForwardError::RequestCanceled, None);
            }
            outcome = tokio::time::timeout(options.effective_timeout(), &mut send) => {
                match outcome {
                    Err(_elapsed) => return self.fail(inbound, ForwardError::RequestTimedOut, None),
                    Ok(Ok(response)) => response,
                    Ok(Err(err)) => {
                        return self.request_failure(inbound, body_handle.as_ref(), err);
                    }
                }
            }
        };
        self.telemetry.stage(ForwardStage::SendStop);

        if let Some(handle) = &body_handle {
            assert!(
                handle.started(),
                "outbound client returned without consuming the request body producer"
            );
        }

        if inbound.version() == Version::HTTP_2 && response.version != Version::HTTP_2 {
            debug!(
                "destination downgraded an HTTP/2 exchange to {:?}",
                response.version
            );
        }

        // Status line and headers go out first, then the hook can adjust.
        inbound.set_status(response.status);
        if let Some(reason) = response.reason.as_deref() {
            inbound.set_reason_phrase(reason);
        }
        if transforms.copy_response_headers {
            crate::headers::copy_response_headers(&response.headers, inbound.response_headers_mut());
        }
        if let Some(hook) = &transforms.on_response {
            hook(&mut *inbound, &mut response).await;
        }

        if response.status == StatusCode::SWITCHING_PROTOCOLS {
            let outbound_io = response
                .upgrade
                .take()
                .expect("a 101 response must carry the upgraded tunnel stream");
            return match upgrade::run_tunnel(inbound, outbound_io, self.telemetry.as_ref()).await {
                None => ForwardError::None,
                Some((error, cause)) => {
                    inbound.set_error(ErrorFeature {
                        error,
                        cause: cause.map(Arc::new),
                    });
                    self.telemetry.forward_failed(error);
                    // The 101 already went out; a status rewrite is impossible.
                    reset_or_abort(inbound, error);
                    error
                }
            };
        }

        let mut body = response.body.take();
        let copy_result = match body.as_mut() {
            Some(stream) => {
                copier::copy(
                    false,
                    stream,
                    inbound.response_body_mut(),
                    false,
                    None,
                    &abort,
                )
                .await
            }
            None => StreamCopyResult::Success,
        };
        if !copy_result.is_success() {
            return self.response_body_failure(inbound, body_handle.as_ref(), copy_result);
        }

        if inbound.response_trailers_mut().is_some() {
            if transforms.copy_response_trailers {
                if let Some(trailers) = body.as_mut().and_then(|stream| stream.trailers()) {
                    if let Some(dest) = inbound.response_trailers_mut() {
                        crate::headers::copy_response_headers(&trailers, dest);
                    }
                }
            }
            if let Some(hook) = &transforms.on_response_trailers {
                hook(&mut *inbound, &mut response).await;
            }
        }

        if is_streaming {
            if let Err(err) = inbound.complete_response().await {
                debug!("completing the streaming response failed: {}", err);
            }
        }

        // The request body may legitimately still be copying, and may fail
        // after the response was already delivered; that is reported without
        // touching the status code.
        if let Some(handle) = &body_handle {
            let result = handle.consumption().wait().await;
            if let Some((error, cause)) = request_body_error(&result) {
                inbound.set_error(ErrorFeature {
                    error,
                    cause: cause.map(|shared| Arc::new(anyhow::Error::new(shared))),
                });
                self.telemetry.forward_failed(error);
                return error;
            }
        }

        ForwardError::None
    }

    /// Report a failure and pick the recovery: a status code when the
    /// response has not started, a reset/abort when it has.
    fn fail(
        &self,
        inbound: &mut dyn InboundContext,
        error: ForwardError,
        cause: Option<anyhow::Error>,
    ) -> ForwardError {
        inbound.set_error(ErrorFeature {
            error,
            cause: cause.map(Arc::new),
        });
        self.telemetry.forward_failed(error);
        if inbound.response_has_started() {
            reset_or_abort(inbound, error);
        } else {
            inbound.clear_response();
            inbound.set_status(error.status_code());
        }
        error
    }

    /// The send failed. A request body failure that already landed in the
    /// consumption slot is the root cause; the send failure is secondary.
    fn request_failure(
        &self,
        inbound: &mut dyn InboundContext,
        handle: Option<&ProducerHandle>,
        send_error: anyhow::Error,
    ) -> ForwardError {
        if let Some(result) = handle.and_then(|handle| handle.consumption().peek()) {
            if let Some((error, body_cause)) = request_body_error(&result) {
                let mut errors = Vec::new();
                if let Some(shared) = body_cause {
                    errors.push(anyhow::Error::new(shared));
                }
                errors.push(send_error);
                let cause = anyhow::Error::new(crate::error::AggregateError::new(errors));
                return self.fail(inbound, error, Some(cause));
            }
        }
        self.fail(inbound, ForwardError::Request, Some(send_error))
    }

    /// The response body copy failed. A completed request body failure wins
    /// as root cause; otherwise the copy outcome maps by failing side.
    fn response_body_failure(
        &self,
        inbound: &mut dyn InboundContext,
        handle: Option<&ProducerHandle>,
        result: StreamCopyResult,
    ) -> ForwardError {
        if let Some(body_result) = handle.and_then(|handle| handle.consumption().peek()) {
            if let Some((error, cause)) = request_body_error(&body_result) {
                return self.fail(
                    inbound,
                    error,
                    cause.map(|shared| anyhow::Error::new(shared)),
                );
            }
        }
        let error = match &result {
            StreamCopyResult::InputError(_) => ForwardError::ResponseBodyDestination,
            StreamCopyResult::OutputError(_) => ForwardError::ResponseBodyClient,
            StreamCopyResult::Canceled => ForwardError::ResponseBodyCanceled,
            StreamCopyResult::Success => ForwardError::None,
        };
        self.fail(
            inbound,
            error,
            result.error().map(|shared| anyhow::Error::new(shared)),
        )
    }
}

/// Map a request body copy outcome to its error classification.
fn request_body_error(result: &StreamCopyResult) -> Option<(ForwardError, Option<SharedIoError>)> {
    match result {
        StreamCopyResult::Success => None,
        StreamCopyResult::InputError(_) => {
            Some((ForwardError::RequestBodyClient, result.error()))
        }
        StreamCopyResult::OutputError(_) => {
            Some((ForwardError::RequestBodyDestination, result.error()))
        }
        StreamCopyResult::Canceled => Some((ForwardError::RequestBodyCanceled, None)),
    }
}

/// Signal failure on a response that already started: prefer an HTTP/2 reset,
/// fall back to a transport abort.
pub(crate) fn reset_or_abort(inbound: &mut dyn InboundContext, error: ForwardError) {
    let code = if error.is_cancellation() {
        RESET_CANCEL
    } else {
        RESET_INTERNAL_ERROR
    };
    if !inbound.reset(code) {
        inbound.abort();
    }
}

/// Streaming requests need low-latency full-duplex treatment; the heuristic
/// is HTTP/2 with a gRPC content type.
pub(crate) fn is_streaming_request(inbound: &dyn InboundContext) -> bool {
    if inbound.version() != Version::HTTP_2 {
        return false;
    }
    let Some(content_type) = inbound.headers().get(header::CONTENT_TYPE) else {
        return false;
    };
    let bytes = content_type.as_bytes();
    bytes.len() >= 16 && bytes[..16].eq_ignore_ascii_case(b"application/grpc")
}
