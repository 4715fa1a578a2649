//! The connection layer: framing, serialized send, receive loop, and
//! lifecycle events over one transport.
//!
//! A [`Connection`] is a cheap-clone handle. All writes funnel through a
//! FIFO-fair async mutex so frames are never interleaved on the wire and
//! never reordered relative to their submission order. Exactly one receive
//! loop runs per connection; it classifies incoming fragments and fans them
//! out to the registered event subscribers.

use crate::cancel::CancellationToken;
use crate::config::{Encoding, RpcConfig};
use crate::error::{Result, RpcError};
use crate::events::{HandlerList, SubscriptionId};
use crate::transport::{CloseStatus, FrameKind, Transport};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One complete received message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub is_text: bool,
}

impl Frame {
    /// The frame payload as text, when it is a valid UTF-8 text frame.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text {
            std::str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }
}

/// Why and how a connection was closed.
#[derive(Debug, Clone)]
pub struct CloseInfo {
    pub status: CloseStatus,
    pub reason: String,
}

struct Inner {
    id: u64,
    transport: Arc<dyn Transport>,
    config: RpcConfig,
    cookies: HashMap<String, String>,
    /// FIFO send queue: lock acquisition order is submission order.
    send_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    listening: AtomicBool,
    close_info: Mutex<Option<CloseInfo>>,
    on_open: HandlerList<()>,
    on_receive: HandlerList<Frame>,
    on_close: HandlerList<CloseInfo>,
    on_error: HandlerList<Arc<RpcError>>,
}

/// A full-duplex RPC connection over one transport.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a connection over an established transport.
    pub fn new(transport: Arc<dyn Transport>, config: RpcConfig) -> Self {
        Self::with_cookies(transport, config, HashMap::new())
    }

    /// Create a connection carrying handshake-level cookies.
    pub fn with_cookies(
        transport: Arc<dyn Transport>,
        config: RpcConfig,
        cookies: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                transport,
                config,
                cookies,
                send_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                close_info: Mutex::new(None),
                on_open: HandlerList::default(),
                on_receive: HandlerList::default(),
                on_close: HandlerList::default(),
                on_error: HandlerList::default(),
            }),
        }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Handshake cookies delivered by the transport adapter.
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.inner.cookies
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Whether the connection can still send and receive.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && self.inner.transport.is_open()
    }

    /// How the connection was closed, once it has been.
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.inner
            .close_info
            .lock()
            .expect("close info lock poisoned")
            .clone()
    }

    // Event subscription

    pub fn on_open<F, Fut>(&self, f: F) -> SubscriptionId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner
            .on_open
            .add(Arc::new(move |()| Box::pin(f()) as BoxFuture<'static, _>))
    }

    pub fn on_receive<F, Fut>(&self, f: F) -> SubscriptionId
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner
            .on_receive
            .add(Arc::new(move |frame| Box::pin(f(frame)) as BoxFuture<'static, _>))
    }

    pub fn on_close<F, Fut>(&self, f: F) -> SubscriptionId
    where
        F: Fn(CloseInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner
            .on_close
            .add(Arc::new(move |info| Box::pin(f(info)) as BoxFuture<'static, _>))
    }

    pub fn on_error<F, Fut>(&self, f: F) -> SubscriptionId
    where
        F: Fn(Arc<RpcError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner
            .on_error
            .add(Arc::new(move |err| Box::pin(f(err)) as BoxFuture<'static, _>))
    }

    pub fn remove_receive(&self, id: SubscriptionId) {
        self.inner.on_receive.remove(id);
    }

    pub fn remove_close(&self, id: SubscriptionId) {
        self.inner.on_close.remove(id);
    }

    // Sending

    /// Send a text frame. Returns `false` without error when the connection
    /// is not open; an oversized frame closes the connection instead of
    /// being sent.
    pub async fn send_text(&self, text: &str) -> Result<bool> {
        self.send_raw(Bytes::copy_from_slice(text.as_bytes()), true)
            .await
    }

    /// Send a raw frame (used by the relay path to forward verbatim).
    pub async fn send_raw(&self, data: Bytes, is_text: bool) -> Result<bool> {
        if !self.is_open() {
            return Ok(false);
        }
        let limit = self.inner.config.get_max_message_size();
        if data.len() >= limit {
            let err = RpcError::MessageTooBig {
                size: data.len(),
                limit,
            };
            let reason = err.to_string();
            self.report_error(err).await;
            self.close(CloseStatus::MessageTooBig, &reason).await;
            return Ok(false);
        }

        let send_result = {
            let _guard = self.inner.send_lock.lock().await;
            if !self.is_open() {
                return Ok(false);
            }
            self.inner.transport.send(data, is_text).await
        };

        match send_result {
            Ok(()) => Ok(true),
            Err(err) => {
                self.report_error(err).await;
                self.close(CloseStatus::InternalError, "send failed").await;
                Ok(false)
            }
        }
    }

    /// Close the connection. Idempotent: the close event fires exactly once,
    /// after which every subscriber list is cleared.
    pub async fn close(&self, status: CloseStatus, reason: &str) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(connection = self.inner.id, code = status.code(), reason, "closing connection");

        if let Err(err) = self.inner.transport.close(status, reason).await {
            // Handshake failures are reported, never re-thrown.
            self.report_error(err).await;
        }

        let info = CloseInfo {
            status,
            reason: reason.to_string(),
        };
        *self
            .inner
            .close_info
            .lock()
            .expect("close info lock poisoned") = Some(info.clone());

        for handler in self.inner.on_close.snapshot() {
            if let Err(err) = handler(info.clone()).await {
                self.report_error(err).await;
            }
        }

        // Break subscriber reference cycles and stop further dispatch.
        self.inner.on_open.clear();
        self.inner.on_receive.clear();
        self.inner.on_close.clear();
        self.inner.on_error.clear();
    }

    /// Route an error to the error subscribers.
    pub(crate) async fn report_error(&self, err: RpcError) {
        let err = Arc::new(err);
        for handler in self.inner.on_error.snapshot() {
            if let Err(inner) = handler(Arc::clone(&err)).await {
                warn!(connection = self.inner.id, error = %inner, "error subscriber failed");
            }
        }
    }

    async fn emit_open(&self) {
        for handler in self.inner.on_open.snapshot() {
            if let Err(err) = handler(()).await {
                self.report_error(err).await;
            }
        }
    }

    async fn emit_receive(&self, frame: Frame) {
        for handler in self.inner.on_receive.snapshot() {
            if let Err(err) = handler(frame.clone()).await {
                self.report_error(err).await;
            }
        }
    }

    /// Run the receive loop until the connection closes or the token fires.
    ///
    /// Raises the open event once, then dispatches each complete message to
    /// the receive subscribers. At most one loop may run per connection.
    pub async fn listen_receive(&self, token: CancellationToken) -> Result<()> {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return Err(RpcError::config(
                "a receive loop is already running for this connection",
            ));
        }

        self.emit_open().await;
        let limit = self.inner.config.get_max_message_size();

        while self.is_open() {
            let mut buffer = BytesMut::new();
            let mut kind: Option<FrameKind> = None;

            // Accumulate fragments up to the message boundary.
            let complete = loop {
                let fragment = tokio::select! {
                    _ = token.cancelled() => {
                        self.close(CloseStatus::Normal, "cancelled").await;
                        return Ok(());
                    }
                    received = self.inner.transport.receive() => match received {
                        Ok(fragment) => fragment,
                        Err(err) => {
                            self.report_error(err).await;
                            self.close(CloseStatus::InternalError, "receive failed").await;
                            return Ok(());
                        }
                    }
                };

                if fragment.kind == FrameKind::Close {
                    self.close(CloseStatus::Normal, "").await;
                    return Ok(());
                }

                kind.get_or_insert(fragment.kind);
                buffer.extend_from_slice(&fragment.data);
                if buffer.len() >= limit {
                    let err = RpcError::MessageTooBig {
                        size: buffer.len(),
                        limit,
                    };
                    let reason = err.to_string();
                    self.report_error(err).await;
                    self.close(CloseStatus::MessageTooBig, &reason).await;
                    return Ok(());
                }
                if fragment.fin {
                    break buffer.freeze();
                }
            };

            match kind {
                Some(FrameKind::Binary) => {
                    // No binary RPC support; report, keep the connection up.
                    self.report_error(RpcError::BinaryNotSupported).await;
                }
                Some(FrameKind::Text) => match self.check_encoding(&complete) {
                    Ok(()) => {
                        self.emit_receive(Frame {
                            data: complete,
                            is_text: true,
                        })
                        .await;
                    }
                    Err(err) => self.report_error(err).await,
                },
                // Close frames return from the inner loop above.
                Some(FrameKind::Close) | None => {}
            }

            if token.is_cancelled() {
                self.close(CloseStatus::Normal, "cancelled").await;
                return Ok(());
            }
        }

        Ok(())
    }

    fn check_encoding(&self, data: &Bytes) -> Result<()> {
        match self.inner.config.get_encoding() {
            Encoding::Utf8 => std::str::from_utf8(data).map(|_| ()).map_err(|e| {
                RpcError::InvalidEncoding {
                    message: e.to_string(),
                }
            }),
            Encoding::Ascii => {
                if data.is_ascii() {
                    Ok(())
                } else {
                    Err(RpcError::InvalidEncoding {
                        message: "frame contains non-ASCII bytes".into(),
                    })
                }
            }
        }
    }
}
