//! Pooled outbound client backed by hyper's legacy connection pool.
//!
//! This is the ready-to-use [`OutboundClient`] for hosts that do not bring
//! their own: an HTTPS-capable connector with native roots, connection
//! keep-alive, and per-host idle limits. Requests stream their body producer
//! through an in-memory pipe so the copy runs concurrently with response
//! reception, and 101 responses surface the upgraded connection.

use crate::body::StreamCopyBody;
use crate::context::UpgradedIo;
use crate::copier::COPY_BUFFER_SIZE;
use crate::outbound::{
    OutboundClient, OutboundRequest, OutboundResponse, ResponseStream, VersionPolicy,
};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{HeaderMap, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Connection pool settings for the default outbound client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub connect_timeout_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_idle_per_host: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            connect_timeout_secs: 5,
            keepalive_timeout_secs: 60,
            idle_timeout_secs: 90,
            max_idle_per_host: 32,
        }
    }
}

/// Request body handed to the connection.
type OutboundBody = BoxBody<Bytes, io::Error>;

type LegacyClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, OutboundBody>;

/// `OutboundClient` with pooling and HTTPS support.
pub struct PooledClient {
    inner: LegacyClient,
}

impl PooledClient {
    pub fn new(settings: &PoolSettings) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_keepalive(Some(Duration::from_secs(settings.keepalive_timeout_secs)));
        connector.set_connect_timeout(Some(Duration::from_secs(settings.connect_timeout_secs)));
        connector.enforce_http(false); // Allow both HTTP and HTTPS

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("Failed to load native root certificates")
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .build(https);

        info!(
            "Outbound pool configured: max_idle={}, idle_timeout={}s, keepalive={}s",
            settings.max_idle_per_host, settings.idle_timeout_secs, settings.keepalive_timeout_secs
        );

        PooledClient { inner }
    }
}

#[async_trait]
impl OutboundClient for PooledClient {
    async fn send(
        &self,
        request: OutboundRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<OutboundResponse> {
        let uri = request
            .uri
            .clone()
            .ok_or_else(|| anyhow::anyhow!("outbound request has no URI"))?;

        let body = match request.body {
            Some(producer) => piped_body(producer),
            None => empty_body(),
        };

        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        if request.version_policy == VersionPolicy::RequestVersionExact {
            builder = builder.version(request.version);
        }
        let mut outbound = builder.body(body)?;
        *outbound.headers_mut() = request.headers;

        let sending = self.inner.request(outbound);
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("outbound send canceled"),
            response = sending => response?,
        };

        let status = response.status();
        let version = response.version();
        let headers = std::mem::take(response.headers_mut());

        let upgrade: Option<UpgradedIo> = if status == StatusCode::SWITCHING_PROTOCOLS {
            let upgraded = hyper::upgrade::on(&mut response).await?;
            Some(Box::new(TokioIo::new(upgraded)))
        } else {
            None
        };

        let body: Option<Box<dyn ResponseStream>> = if upgrade.is_some() {
            None
        } else {
            Some(Box::new(IncomingStream::spawn(response.into_body())))
        };

        Ok(OutboundResponse {
            status,
            version,
            reason: None,
            headers,
            body,
            upgrade,
        })
    }
}

fn empty_body() -> OutboundBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Bridge a body producer into the connection: the producer writes into an
/// in-memory pipe, and the read side streams out as body frames. Pull
/// failures surface through the producer's consumption slot; dropping the
/// write side signals end of stream.
fn piped_body(mut producer: StreamCopyBody) -> OutboundBody {
    let (mut tx, rx) = tokio::io::duplex(COPY_BUFFER_SIZE);
    tokio::spawn(async move {
        let _ = producer.write_to(&mut tx).await;
    });
    let frames = ReaderStream::new(rx).map(|chunk| chunk.map(Frame::data));
    StreamBody::new(frames).boxed()
}

/// Adapts `hyper::body::Incoming` to the engine's response stream interface.
///
/// A frame pump drains the body into a bounded channel, data frames become
/// the byte stream, and a trailer frame is parked for pickup after EOF.
struct IncomingStream {
    reader: StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>,
    trailers: Arc<Mutex<Option<HeaderMap>>>,
}

impl IncomingStream {
    fn spawn(mut body: Incoming) -> Self {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
        let trailers = Arc::new(Mutex::new(None));
        let parked = Arc::clone(&trailers);
        tokio::spawn(async move {
            while let Some(frame) = body.frame().await {
                match frame {
                    Ok(frame) => match frame.into_data() {
                        Ok(data) => {
                            if tx.send(Ok(data)).await.is_err() {
                                return;
                            }
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                *parked.lock() = Some(trailers);
                            }
                        }
                    },
                    Err(err) => {
                        let _ = tx.send(Err(io::Error::other(err))).await;
                        return;
                    }
                }
            }
        });
        IncomingStream {
            reader: StreamReader::new(ReceiverStream::new(rx)),
            trailers,
        }
    }
}

impl AsyncRead for IncomingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl ResponseStream for IncomingStream {
    fn trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.lock().take()
    }
}
