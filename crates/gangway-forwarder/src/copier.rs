//! Byte pump between two streams with outcome classification.
//!
//! A copy moves bytes forward-only through a fixed working buffer until EOF
//! on the source. The terminal outcome records *which side* failed, which is
//! what the engine's error mapping keys on.

use crate::error::SharedIoError;
use crate::telemetry::{ForwardStage, Telemetry};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Working buffer size for a single copy direction.
pub(crate) const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Terminal outcome of a stream copy.
///
/// Error payloads are shared so the same outcome can be published to the
/// consumption slot and reported to the outbound client.
#[derive(Debug, Clone)]
pub enum StreamCopyResult {
    Success,
    /// Reading from the source failed.
    InputError(Arc<io::Error>),
    /// Writing to the sink failed.
    OutputError(Arc<io::Error>),
    Canceled,
}

impl StreamCopyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StreamCopyResult::Success)
    }

    /// The underlying I/O error, when one exists.
    pub fn error(&self) -> Option<SharedIoError> {
        match self {
            StreamCopyResult::InputError(err) | StreamCopyResult::OutputError(err) => {
                Some(SharedIoError(Arc::clone(err)))
            }
            StreamCopyResult::Success | StreamCopyResult::Canceled => None,
        }
    }
}

/// Pump `source` into `sink` until EOF, classifying which side failed.
///
/// `is_request` marks request-direction copies for telemetry: the transfer
/// stage fires before the first read. With `auto_flush` the sink is flushed
/// after every successful write, which low-latency streaming protocols need
/// because the write side may buffer indefinitely otherwise.
pub async fn copy<R, W>(
    is_request: bool,
    source: &mut R,
    sink: &mut W,
    auto_flush: bool,
    telemetry: Option<&dyn Telemetry>,
    cancel: &CancellationToken,
) -> StreamCopyResult
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    if is_request {
        if let Some(telemetry) = telemetry {
            telemetry.stage(ForwardStage::RequestBodyTransferStart);
        }
    }

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamCopyResult::Canceled,
            read = source.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => return StreamCopyResult::Success,
            Ok(n) => n,
            Err(err) => return StreamCopyResult::InputError(Arc::new(err)),
        };

        let write = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamCopyResult::Canceled,
            write = async {
                sink.write_all(&buf[..n]).await?;
                if auto_flush {
                    sink.flush().await?;
                }
                Ok::<_, io::Error>(())
            } => write,
        };
        if let Err(err) = write {
            return StreamCopyResult::OutputError(Arc::new(err));
        }
    }
}
