//! Outbound request body producer bridging the inbound body stream.
//!
//! The producer is handed to the outbound client inside the request and is
//! pulled exactly once while the send is in flight. Its terminal result is
//! published through a one-shot slot so the engine can pick a root cause when
//! the send and the body copy fail together.

use crate::copier::{self, StreamCopyResult};
use crate::telemetry::Telemetry;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Inbound request body stream as handed over by the hosting runtime.
pub type InboundBody = Box<dyn AsyncRead + Send + Unpin>;

/// One-shot handle to a body copy's terminal result.
///
/// The producer completes it exactly once. The engine may peek at it while
/// diagnosing a peer failure and awaits it after the response side is done.
#[derive(Debug, Clone)]
pub struct ConsumptionTask {
    inner: Arc<ConsumptionState>,
}

#[derive(Debug)]
struct ConsumptionState {
    slot: Mutex<Option<StreamCopyResult>>,
    notify: Notify,
}

impl ConsumptionTask {
    fn new() -> Self {
        ConsumptionTask {
            inner: Arc::new(ConsumptionState {
                slot: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    fn complete(&self, result: StreamCopyResult) {
        {
            let mut slot = self.inner.slot.lock();
            if slot.is_none() {
                *slot = Some(result);
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// The terminal result, if the copy already finished.
    pub fn peek(&self) -> Option<StreamCopyResult> {
        self.inner.slot.lock().clone()
    }

    /// Wait for the copy to finish.
    pub async fn wait(&self) -> StreamCopyResult {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.peek() {
                return result;
            }
            notified.await;
        }
    }
}

/// Engine-side view of a producer that has been handed to the client.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    started: Arc<AtomicBool>,
    consumption: ConsumptionTask,
}

impl ProducerHandle {
    /// Whether the outbound client has begun pulling the body.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn consumption(&self) -> &ConsumptionTask {
        &self.consumption
    }
}

/// Single-use outbound request body.
///
/// The outbound client pulls it exactly once via [`write_to`], which runs the
/// copier from the inbound body into the client's sink and publishes the
/// terminal result. No length is ever promised; transfers are chunked.
/// Streams that look like gRPC get a flush after every write.
///
/// [`write_to`]: StreamCopyBody::write_to
pub struct StreamCopyBody {
    source: InboundBody,
    auto_flush: bool,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
    consumption: ConsumptionTask,
    telemetry: Arc<dyn Telemetry>,
}

impl StreamCopyBody {
    pub fn new(
        source: InboundBody,
        auto_flush: bool,
        cancel: CancellationToken,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        StreamCopyBody {
            source,
            auto_flush,
            cancel,
            started: Arc::new(AtomicBool::new(false)),
            consumption: ConsumptionTask::new(),
            telemetry,
        }
    }

    /// Handle the engine keeps after the producer moves into the request.
    pub fn handle(&self) -> ProducerHandle {
        ProducerHandle {
            started: Arc::clone(&self.started),
            consumption: self.consumption.clone(),
        }
    }

    /// Chunked transfer; no length is exposed.
    pub fn content_length(&self) -> Option<u64> {
        None
    }

    /// Pull the body into `sink`. Consuming a producer twice is a defect in
    /// the outbound client and fails immediately.
    pub async fn write_to(&mut self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> io::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(io::Error::other("request body was already consumed"));
        }

        let result = copier::copy(
            true,
            &mut self.source,
            sink,
            self.auto_flush,
            Some(self.telemetry.as_ref()),
            &self.cancel,
        )
        .await;
        self.consumption.complete(result.clone());

        match result {
            StreamCopyResult::Success => Ok(()),
            StreamCopyResult::InputError(err) => Err(io::Error::new(
                err.kind(),
                format!("reading the request body failed: {err}"),
            )),
            StreamCopyResult::OutputError(err) => Err(io::Error::new(
                err.kind(),
                format!("writing the request body failed: {err}"),
            )),
            StreamCopyResult::Canceled => Err(io::Error::other("request body copy canceled")),
        }
    }
}

impl fmt::Debug for StreamCopyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCopyBody")
            .field("auto_flush", &self.auto_flush)
            .field("started", &self.started.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
