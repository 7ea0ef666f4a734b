//! Bidirectional tunnel driver for 101 responses.
//!
//! After the destination answers 101 Switching Protocols, the exchange
//! degenerates into two raw byte pipes sharing a linked cancellation token.
//! The driver awaits whichever direction finishes first; a failure there
//! cancels the other direction, which is then drained for cleanup. Keeping
//! the directions as separate tasks is what lets the error mapping stay
//! asymmetric (client vs destination per direction).

use crate::context::{InboundContext, UpgradedIo};
use crate::copier::{self, StreamCopyResult};
use crate::error::ForwardError;
use crate::telemetry::{ForwardStage, Telemetry};
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TunnelDirection {
    /// Client bytes flowing to the destination.
    Request,
    /// Destination bytes flowing back to the client.
    Response,
}

/// Tunnel failure with the error to report and its cause, when one exists.
pub(crate) type TunnelFailure = (ForwardError, Option<anyhow::Error>);

fn classify(direction: TunnelDirection, result: &StreamCopyResult) -> Option<TunnelFailure> {
    let error = match (direction, result) {
        (_, StreamCopyResult::Success) => return None,
        (TunnelDirection::Request, StreamCopyResult::InputError(_)) => {
            ForwardError::UpgradeRequestClient
        }
        (TunnelDirection::Request, StreamCopyResult::OutputError(_)) => {
            ForwardError::UpgradeRequestDestination
        }
        (TunnelDirection::Request, StreamCopyResult::Canceled) => {
            ForwardError::UpgradeRequestCanceled
        }
        (TunnelDirection::Response, StreamCopyResult::InputError(_)) => {
            ForwardError::UpgradeResponseDestination
        }
        (TunnelDirection::Response, StreamCopyResult::OutputError(_)) => {
            ForwardError::UpgradeResponseClient
        }
        (TunnelDirection::Response, StreamCopyResult::Canceled) => {
            ForwardError::UpgradeResponseCanceled
        }
    };
    Some((error, result.error().map(anyhow::Error::new)))
}

/// Run the tunnel until both directions terminate. Returns the first failure
/// to report, or `None` for a clean shutdown.
pub(crate) async fn run_tunnel(
    inbound: &mut dyn InboundContext,
    outbound: UpgradedIo,
    telemetry: &dyn Telemetry,
) -> Option<TunnelFailure> {
    telemetry.stage(ForwardStage::ResponseUpgrade);

    let inbound_io = match inbound.upgrade().await {
        Ok(io) => io,
        Err(err) => {
            // The 101 headers are already on the wire.
            return Some((ForwardError::UpgradeResponseClient, Some(err.into())));
        }
    };

    let cancel = inbound.abort_token().child_token();
    let (mut client_read, mut client_write) = tokio::io::split(inbound_io);
    let (mut destination_read, mut destination_write) = tokio::io::split(outbound);

    let request_cancel = cancel.clone();
    let mut request_task = tokio::spawn(async move {
        let result = copier::copy(
            true,
            &mut client_read,
            &mut destination_write,
            false,
            None,
            &request_cancel,
        )
        .await;
        let _ = destination_write.shutdown().await;
        result
    });

    let response_cancel = cancel.clone();
    let mut response_task = tokio::spawn(async move {
        let result = copier::copy(
            false,
            &mut destination_read,
            &mut client_write,
            false,
            None,
            &response_cancel,
        )
        .await;
        let _ = client_write.shutdown().await;
        result
    });

    let (first_direction, first) = tokio::select! {
        result = &mut request_task => (TunnelDirection::Request, result),
        result = &mut response_task => (TunnelDirection::Response, result),
    };
    let first = first.unwrap_or(StreamCopyResult::Canceled);

    if let Some(failure) = classify(first_direction, &first) {
        // Tear down the surviving direction, then drain it.
        cancel.cancel();
        let _ = match first_direction {
            TunnelDirection::Request => response_task.await,
            TunnelDirection::Response => request_task.await,
        };
        return Some(failure);
    }

    debug!("tunnel {:?} direction finished cleanly", first_direction);
    let second_direction = match first_direction {
        TunnelDirection::Request => TunnelDirection::Response,
        TunnelDirection::Response => TunnelDirection::Request,
    };
    let second = match second_direction {
        TunnelDirection::Request => request_task.await,
        TunnelDirection::Response => response_task.await,
    }
    .unwrap_or(StreamCopyResult::Canceled);

    classify(second_direction, &second)
}
