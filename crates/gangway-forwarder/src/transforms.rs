//! Rewrite hooks applied to an exchange at fixed points.
//!
//! A `Transforms` value is produced by the host (configuration layer, DSL
//! builder, hand-written code) and consumed here. Hooks may mutate the passed
//! request/response objects freely; an absent hook means "skip". The engine
//! still derives a default outbound URI when no request hook supplies one.

use crate::context::InboundContext;
use crate::outbound::{OutboundRequest, OutboundResponse};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Future type returned by transform hooks.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Hook invoked after request headers are copied, before the send. Receives
/// the destination prefix the engine was called with.
pub type RequestHook = Box<
    dyn for<'a, 'b> Fn(
            &'a (dyn InboundContext + 'b),
            &'a mut OutboundRequest,
            &'a str,
        ) -> HookFuture<'a>
        + Send
        + Sync,
>;

/// Hook invoked on the response path with mutable access to the inbound
/// context, so it can rewrite what is about to be sent back.
pub type ResponseHook = Box<
    dyn for<'a, 'b> Fn(&'a mut (dyn InboundContext + 'b), &'a mut OutboundResponse) -> HookFuture<'a>
        + Send
        + Sync,
>;

/// The transform pipeline for one exchange.
pub struct Transforms {
    /// Copy inbound request headers onto the outbound request before
    /// `on_request` runs.
    pub copy_request_headers: bool,
    pub on_request: Option<RequestHook>,
    /// Copy destination response headers onto the inbound response before
    /// `on_response` runs.
    pub copy_response_headers: bool,
    pub on_response: Option<ResponseHook>,
    /// Copy destination response trailers onto the inbound trailer bag.
    pub copy_response_trailers: bool,
    pub on_response_trailers: Option<ResponseHook>,
}

impl Default for Transforms {
    /// Copies headers and trailers verbatim, with no hooks.
    fn default() -> Self {
        Transforms {
            copy_request_headers: true,
            on_request: None,
            copy_response_headers: true,
            on_response: None,
            copy_response_trailers: true,
            on_response_trailers: None,
        }
    }
}

impl fmt::Debug for Transforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transforms")
            .field("copy_request_headers", &self.copy_request_headers)
            .field("on_request", &self.on_request.is_some())
            .field("copy_response_headers", &self.copy_response_headers)
            .field("on_response", &self.on_response.is_some())
            .field("copy_response_trailers", &self.copy_response_trailers)
            .field("on_response_trailers", &self.on_response_trailers.is_some())
            .finish()
    }
}
