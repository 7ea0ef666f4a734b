//! Failure taxonomy for proxied exchanges.
//!
//! The forwarder never unwinds out of a proxied exchange: every failure mode
//! is classified as a [`ForwardError`], translated into a status code (when
//! the response has not started) or a reset/abort (when it has), and surfaced
//! to inbound middleware through the [`ErrorFeature`].

use hyper::StatusCode;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Classifies how a proxied exchange failed, by cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, thiserror::Error)]
pub enum ForwardError {
    /// The exchange completed without a proxy-level failure.
    #[default]
    #[error("no error")]
    None,
    /// Sending the request to the destination failed before a response arrived.
    #[error("sending the request to the destination failed")]
    Request,
    /// The destination did not produce response headers within the timeout.
    #[error("sending the request to the destination timed out")]
    RequestTimedOut,
    /// The inbound client aborted while the request was being sent.
    #[error("the client canceled the request during send")]
    RequestCanceled,
    /// The request body copy was canceled by the inbound abort.
    #[error("the request body copy was canceled")]
    RequestBodyCanceled,
    /// Reading the request body from the inbound client failed.
    #[error("reading the request body from the client failed")]
    RequestBodyClient,
    /// Writing the request body to the destination failed.
    #[error("writing the request body to the destination failed")]
    RequestBodyDestination,
    /// The response body copy was canceled by the inbound abort.
    #[error("the response body copy was canceled")]
    ResponseBodyCanceled,
    /// Writing the response body to the inbound client failed.
    #[error("writing the response body to the client failed")]
    ResponseBodyClient,
    /// Reading the response body from the destination failed.
    #[error("reading the response body from the destination failed")]
    ResponseBodyDestination,
    /// The request direction of an upgraded tunnel was canceled.
    #[error("the tunnel request direction was canceled")]
    UpgradeRequestCanceled,
    /// Reading the request direction of an upgraded tunnel failed.
    #[error("reading tunnel bytes from the client failed")]
    UpgradeRequestClient,
    /// Writing the request direction of an upgraded tunnel failed.
    #[error("writing tunnel bytes to the destination failed")]
    UpgradeRequestDestination,
    /// The response direction of an upgraded tunnel was canceled.
    #[error("the tunnel response direction was canceled")]
    UpgradeResponseCanceled,
    /// Writing the response direction of an upgraded tunnel failed.
    #[error("writing tunnel bytes to the client failed")]
    UpgradeResponseClient,
    /// Reading the response direction of an upgraded tunnel failed.
    #[error("reading tunnel bytes from the destination failed")]
    UpgradeResponseDestination,
    /// No destination was available. Reported by the routing layer, never by
    /// the forwarder itself.
    #[error("no destination is available for the request")]
    NoAvailableDestinations,
}

impl ForwardError {
    /// Status code reported when the failure occurs before the response has
    /// started.
    pub fn status_code(self) -> StatusCode {
        match self {
            ForwardError::None => StatusCode::OK,
            ForwardError::RequestTimedOut => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::RequestBodyClient => StatusCode::BAD_REQUEST,
            ForwardError::NoAvailableDestinations => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Whether the failure stems from cancellation rather than an I/O fault.
    /// Selects the reset code used when the response already started.
    pub(crate) fn is_cancellation(self) -> bool {
        matches!(
            self,
            ForwardError::RequestCanceled
                | ForwardError::RequestBodyCanceled
                | ForwardError::ResponseBodyCanceled
                | ForwardError::UpgradeRequestCanceled
                | ForwardError::UpgradeResponseCanceled
        )
    }
}

/// Per-request failure record surfaced to inbound middleware.
#[derive(Debug, Clone)]
pub struct ErrorFeature {
    pub error: ForwardError,
    pub cause: Option<Arc<anyhow::Error>>,
}

/// An I/O error that must be reported through more than one channel, e.g.
/// both to the outbound client and to the consumption slot.
#[derive(Debug, Clone)]
pub struct SharedIoError(pub Arc<io::Error>);

impl fmt::Display for SharedIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for SharedIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Several failures with one root cause, reported together. Produced when a
/// request body failure and the send failure it triggered are paired up.
#[derive(Debug)]
pub struct AggregateError(Vec<anyhow::Error>);

impl AggregateError {
    pub fn new(errors: Vec<anyhow::Error>) -> Self {
        AggregateError(errors)
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.0
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failures: ", self.0.len())?;
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
