//! Proxy engine core for an HTTP reverse proxy.
//!
//! Given a fully-routed inbound request, a destination prefix, and an
//! outbound client handle, [`Forwarder`] drives the end-to-end exchange:
//! outbound request construction, the concurrent body copies, HTTP/1.1
//! protocol upgrades, the error-to-status mapping, and lifecycle telemetry.
//!
//! # Module Structure
//!
//! - `forwarder` - the exchange orchestrator
//! - `copier` / `body` - byte pumps and the request body producer
//! - `headers` - request/response header copying
//! - `transforms` - rewrite hooks applied at fixed points
//! - `context` / `outbound` - interfaces to the hosting runtime and client
//! - `client` - pooled hyper-backed outbound client
//! - `telemetry` - lifecycle events
//! - `error` - the failure taxonomy

pub mod body;
pub mod client;
pub mod context;
pub mod copier;
pub mod error;
pub mod forwarder;
pub mod headers;
pub mod outbound;
pub mod telemetry;
pub mod transforms;

// Internal building blocks of the orchestrator.
mod request;
mod upgrade;

pub use body::{ConsumptionTask, InboundBody, ProducerHandle, StreamCopyBody};
pub use context::{BodySizeLimit, Duplex, InboundContext, UpgradedIo};
pub use copier::StreamCopyResult;
pub use error::{AggregateError, ErrorFeature, ForwardError, SharedIoError};
pub use forwarder::{Forwarder, DEFAULT_TIMEOUT};
pub use outbound::{
    ForwardOptions, OutboundClient, OutboundRequest, OutboundResponse, ResponseStream,
    VersionPolicy,
};
pub use telemetry::{ForwardStage, Telemetry, TracingTelemetry};
pub use transforms::{HookFuture, RequestHook, ResponseHook, Transforms};
