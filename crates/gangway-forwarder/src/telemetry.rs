//! Lifecycle telemetry for proxied exchanges.
//!
//! One `forward_start`/`forward_stop` pair brackets every exchange. Stage
//! events and at most one `forward_failed` land in between, in the order the
//! engine reaches them.

use crate::error::ForwardError;
use tracing::debug;

/// Named lifecycle stages inside a single proxied exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStage {
    /// The outbound request is about to be handed to the client.
    SendStart,
    /// The outbound client produced response headers.
    SendStop,
    /// The request body producer is about to move its first byte.
    RequestBodyTransferStart,
    /// A 101 response switched the exchange into tunnel mode.
    ResponseUpgrade,
}

/// Sink for per-exchange lifecycle events.
pub trait Telemetry: Send + Sync {
    fn forward_start(&self, destination_prefix: &str);
    fn stage(&self, stage: ForwardStage);
    fn forward_failed(&self, error: ForwardError);
    fn forward_stop(&self, status_code: u16);
}

/// Default sink that writes events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn forward_start(&self, destination_prefix: &str) {
        debug!("Forwarding to {}", destination_prefix);
    }

    fn stage(&self, stage: ForwardStage) {
        debug!("Forward stage: {:?}", stage);
    }

    fn forward_failed(&self, error: ForwardError) {
        debug!("Forward failed: {}", error);
    }

    fn forward_stop(&self, status_code: u16) {
        debug!("Forward stopped with status {}", status_code);
    }
}
