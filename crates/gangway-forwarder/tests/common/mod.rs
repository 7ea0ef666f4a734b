//! Test doubles for the forwarder: an in-memory inbound context, scripted
//! outbound clients, and a recording telemetry sink.

#![allow(dead_code)]

use async_trait::async_trait;
use gangway_forwarder::{
    ErrorFeature, ForwardError, ForwardStage, InboundBody, InboundContext, OutboundClient,
    OutboundRequest, OutboundResponse, ResponseStream, Telemetry, UpgradedIo,
};
use hyper::{HeaderMap, Method, StatusCode, Version};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Response body sink that remembers what was written and when writing began.
#[derive(Clone, Default)]
pub struct TrackingWriter {
    buf: Arc<Mutex<Vec<u8>>>,
    started: Arc<AtomicBool>,
    fail_writes: bool,
}

impl TrackingWriter {
    pub fn new() -> Self {
        TrackingWriter::default()
    }

    pub fn failing() -> Self {
        TrackingWriter {
            fail_writes: true,
            ..TrackingWriter::default()
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl AsyncWrite for TrackingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client connection lost",
            )));
        }
        self.started.store(true, Ordering::Release);
        self.buf.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Scriptable `InboundContext` with every field poke-able from tests.
pub struct TestInbound {
    pub method: Method,
    pub version: Version,
    pub scheme: String,
    pub authority: Option<String>,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<InboundBody>,
    pub abort: CancellationToken,
    pub upgradable: bool,
    pub upgrade_io: Option<UpgradedIo>,
    pub can_have_body: Option<bool>,
    pub status: StatusCode,
    pub reason: Option<String>,
    pub response_headers: HeaderMap,
    pub trailers: Option<HeaderMap>,
    pub writer: TrackingWriter,
    pub reset_supported: bool,
    pub reset_codes: Vec<u32>,
    pub aborted: bool,
    pub error: Option<ErrorFeature>,
    pub cleared: bool,
    pub completed: bool,
}

impl TestInbound {
    pub fn new(method: Method, path: &str) -> Self {
        TestInbound {
            method,
            version: Version::HTTP_2,
            scheme: "http".to_string(),
            authority: Some("example.com:3456".to_string()),
            path: path.to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: None,
            abort: CancellationToken::new(),
            upgradable: false,
            upgrade_io: None,
            can_have_body: None,
            status: StatusCode::OK,
            reason: None,
            response_headers: HeaderMap::new(),
            trailers: None,
            writer: TrackingWriter::new(),
            reset_supported: false,
            reset_codes: Vec::new(),
            aborted: false,
            error: None,
            cleared: false,
            completed: false,
        }
    }

    pub fn get(path: &str) -> Self {
        TestInbound::new(Method::GET, path)
    }

    pub fn error_kind(&self) -> Option<ForwardError> {
        self.error.as_ref().map(|feature| feature.error)
    }
}

#[async_trait]
impl InboundContext for TestInbound {
    fn method(&self) -> &Method {
        &self.method
    }

    fn version(&self) -> Version {
        self.version
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn take_body(&mut self) -> Option<InboundBody> {
        self.body.take()
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_reason_phrase(&mut self, reason: &str) {
        self.reason = Some(reason.to_string());
    }

    fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    fn response_body_mut(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.writer
    }

    fn response_trailers_mut(&mut self) -> Option<&mut HeaderMap> {
        self.trailers.as_mut()
    }

    fn response_has_started(&self) -> bool {
        self.writer.has_started()
    }

    fn clear_response(&mut self) {
        self.cleared = true;
        self.status = StatusCode::OK;
        self.reason = None;
        self.response_headers.clear();
    }

    async fn complete_response(&mut self) -> io::Result<()> {
        self.completed = true;
        Ok(())
    }

    fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    fn abort(&mut self) {
        self.aborted = true;
    }

    fn set_error(&mut self, error: ErrorFeature) {
        self.error = Some(error);
    }

    fn is_upgradable(&self) -> bool {
        self.upgradable
    }

    async fn upgrade(&mut self) -> io::Result<UpgradedIo> {
        self.upgrade_io
            .take()
            .ok_or_else(|| io::Error::other("upgrade unavailable"))
    }

    fn can_have_body(&self) -> Option<bool> {
        self.can_have_body
    }

    fn reset(&mut self, error_code: u32) -> bool {
        if self.reset_supported {
            self.reset_codes.push(error_code);
            true
        } else {
            false
        }
    }
}

/// Telemetry sink that records events in order.
#[derive(Clone, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Start(String),
    Stage(ForwardStage),
    Failed(ForwardError),
    Stop(u16),
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingTelemetry::default())
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<ForwardStage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::Stage(stage) => Some(stage),
                _ => None,
            })
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn forward_start(&self, destination_prefix: &str) {
        self.events
            .lock()
            .unwrap()
            .push(TelemetryEvent::Start(destination_prefix.to_string()));
    }

    fn stage(&self, stage: ForwardStage) {
        self.events.lock().unwrap().push(TelemetryEvent::Stage(stage));
    }

    fn forward_failed(&self, error: ForwardError) {
        self.events.lock().unwrap().push(TelemetryEvent::Failed(error));
    }

    fn forward_stop(&self, status_code: u16) {
        self.events
            .lock()
            .unwrap()
            .push(TelemetryEvent::Stop(status_code));
    }
}

/// Request body stream from a byte literal.
pub fn request_body(bytes: &[u8]) -> InboundBody {
    Box::new(std::io::Cursor::new(bytes.to_vec()))
}

/// Response body stream from a byte literal.
pub async fn response_body(bytes: &[u8]) -> Box<dyn ResponseStream> {
    let (mut tx, rx) = tokio::io::duplex(bytes.len().max(64));
    tx.write_all(bytes).await.unwrap();
    drop(tx);
    Box::new(rx)
}

/// Request body stream that fails on the first read.
pub struct ErrorReader;

impl AsyncRead for ErrorReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "request body stream broke",
        )))
    }
}

/// Response stream that yields one byte, then fails.
pub struct OneByteThenError {
    sent: bool,
}

impl OneByteThenError {
    pub fn new() -> Self {
        OneByteThenError { sent: false }
    }
}

impl AsyncRead for OneByteThenError {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.sent {
            this.sent = true;
            buf.put_slice(b"a");
            return Poll::Ready(Ok(()));
        }
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "destination stream broke",
        )))
    }
}

impl ResponseStream for OneByteThenError {}

/// Buffered response stream that also carries trailers.
pub struct TrailingStream {
    data: std::io::Cursor<Vec<u8>>,
    trailers: Option<HeaderMap>,
}

impl TrailingStream {
    pub fn new(bytes: &[u8], trailers: HeaderMap) -> Self {
        TrailingStream {
            data: std::io::Cursor::new(bytes.to_vec()),
            trailers: Some(trailers),
        }
    }
}

impl AsyncRead for TrailingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().data).poll_read(cx, buf)
    }
}

impl ResponseStream for TrailingStream {
    fn trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.take()
    }
}

/// What a scripted client observed about the outbound request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: HeaderMap,
    /// Collected request body, for clients that pull it inline.
    pub body: Option<Vec<u8>>,
    pub had_body: bool,
}

/// How a [`TestClient`] treats the request body producer.
pub enum BodyMode {
    /// Pull the body to completion before producing the response.
    Inline,
    /// Drain the body on a background task while the response flows.
    Concurrent,
    /// Leave the producer untouched (for requests without a body).
    Ignore,
}

/// Outbound client scripted with a single prepared response.
pub struct TestClient {
    response: Mutex<Option<OutboundResponse>>,
    body_mode: BodyMode,
    seen: Arc<Mutex<Option<SeenRequest>>>,
}

impl TestClient {
    pub fn new(response: OutboundResponse, body_mode: BodyMode) -> Self {
        TestClient {
            response: Mutex::new(Some(response)),
            body_mode,
            seen: Arc::new(Mutex::new(None)),
        }
    }

    pub fn seen(&self) -> SeenRequest {
        self.seen
            .lock()
            .unwrap()
            .clone()
            .expect("client never saw a request")
    }
}

#[async_trait]
impl OutboundClient for TestClient {
    async fn send(
        &self,
        mut request: OutboundRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<OutboundResponse> {
        let had_body = request.body.is_some();
        let mut body_bytes = None;

        match self.body_mode {
            BodyMode::Inline => {
                if let Some(mut producer) = request.body.take() {
                    let mut sink = TrackingWriter::new();
                    producer
                        .write_to(&mut sink)
                        .await
                        .map_err(|err| anyhow::Error::new(err).context("request body pull failed"))?;
                    body_bytes = Some(sink.bytes());
                }
            }
            BodyMode::Concurrent => {
                if let Some(mut producer) = request.body.take() {
                    let handle = producer.handle();
                    tokio::spawn(async move {
                        let mut sink = TrackingWriter::new();
                        let _ = producer.write_to(&mut sink).await;
                    });
                    // The engine requires the pull to have begun before send
                    // returns.
                    while !handle.started() {
                        tokio::task::yield_now().await;
                    }
                }
            }
            BodyMode::Ignore => {}
        }

        *self.seen.lock().unwrap() = Some(SeenRequest {
            method: request.method.clone(),
            uri: request
                .uri
                .as_ref()
                .map(|uri| uri.to_string())
                .unwrap_or_default(),
            version: request.version,
            headers: request.headers.clone(),
            body: body_bytes,
            had_body,
        });

        self.response
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("no response prepared"))
    }
}

/// Client whose send always fails without producing a response.
pub struct FailingClient;

#[async_trait]
impl OutboundClient for FailingClient {
    async fn send(
        &self,
        _request: OutboundRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<OutboundResponse> {
        anyhow::bail!("unable to connect to the destination")
    }
}

/// Client that never completes until canceled.
pub struct StallClient;

#[async_trait]
impl OutboundClient for StallClient {
    async fn send(
        &self,
        _request: OutboundRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<OutboundResponse> {
        cancel.cancelled().await;
        anyhow::bail!("send canceled")
    }
}

/// Misbehaving client that buffers entire responses.
pub struct BufferingClient;

#[async_trait]
impl OutboundClient for BufferingClient {
    async fn send(
        &self,
        _request: OutboundRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<OutboundResponse> {
        anyhow::bail!("buffered send must never run")
    }

    fn buffers_responses(&self) -> bool {
        true
    }
}
