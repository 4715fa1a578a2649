//! Transport adapter contract.
//!
//! The runtime never touches sockets directly. A [`Transport`] delivers
//! message fragments upward and accepts whole frames for sending; accept and
//! connect handshakes, TLS, and the HTTP upgrade live outside this crate.
//!
//! [`MemoryTransport`] provides an in-process pair for tests and for wiring
//! two endpoints inside one process.

use crate::error::{Result, RpcError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Close status codes, matching the WebSocket close codes the protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// Normal closure (1000).
    Normal,
    /// Policy violation: idle timeout, relay misconfiguration (1008).
    PolicyViolation,
    /// Frame exceeded the maximum message size (1009).
    MessageTooBig,
    /// Unhandled transport exception (1011).
    InternalError,
}

impl CloseStatus {
    /// The numeric wire code.
    pub fn code(self) -> u16 {
        match self {
            CloseStatus::Normal => 1000,
            CloseStatus::PolicyViolation => 1008,
            CloseStatus::MessageTooBig => 1009,
            CloseStatus::InternalError => 1011,
        }
    }
}

/// Kind of a received fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Close,
}

/// One transport-level fragment. A logical message may span several
/// fragments; `fin` marks the message boundary.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub data: Bytes,
    pub kind: FrameKind,
    pub fin: bool,
}

impl Fragment {
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            kind: FrameKind::Text,
            fin: true,
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            kind: FrameKind::Binary,
            fin: true,
        }
    }

    pub fn close() -> Self {
        Self {
            data: Bytes::new(),
            kind: FrameKind::Close,
            fin: true,
        }
    }
}

/// The physical socket contract the connection layer builds on.
///
/// Implementations serialize their own I/O; `send` and `receive` may be
/// called from different tasks but only one receive loop runs per transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the underlying socket is open for traffic.
    fn is_open(&self) -> bool;

    /// Send one complete frame.
    async fn send(&self, data: Bytes, is_text: bool) -> Result<()>;

    /// Receive the next fragment. Blocks until data, a close frame, or a
    /// transport fault arrives.
    async fn receive(&self) -> Result<Fragment>;

    /// Perform the close handshake. Idempotence is handled by the caller.
    async fn close(&self, status: CloseStatus, reason: &str) -> Result<()>;
}

/// In-memory transport pair connected by channels.
///
/// Frames sent on one side arrive on the other. Used by the test suites and
/// for relaying between in-process endpoints.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Fragment>,
    rx: Mutex<mpsc::UnboundedReceiver<Fragment>>,
    local_closed: Arc<AtomicBool>,
    peer_closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a connected pair of transports.
    pub fn pair() -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_closed = Arc::new(AtomicBool::new(false));
        let b_closed = Arc::new(AtomicBool::new(false));

        let a = Arc::new(MemoryTransport {
            tx: a_tx,
            rx: Mutex::new(a_rx),
            local_closed: Arc::clone(&a_closed),
            peer_closed: Arc::clone(&b_closed),
        });
        let b = Arc::new(MemoryTransport {
            tx: b_tx,
            rx: Mutex::new(b_rx),
            local_closed: b_closed,
            peer_closed: a_closed,
        });
        (a, b)
    }

    /// Push a raw fragment to the peer, bypassing the whole-frame `send`.
    /// Lets tests exercise fragmented and malformed traffic.
    pub fn send_fragment(&self, fragment: Fragment) -> Result<()> {
        self.tx
            .send(fragment)
            .map_err(|_| RpcError::ConnectionClosed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_open(&self) -> bool {
        !self.local_closed.load(Ordering::SeqCst) && !self.peer_closed.load(Ordering::SeqCst)
    }

    async fn send(&self, data: Bytes, is_text: bool) -> Result<()> {
        if !self.is_open() {
            return Err(RpcError::ConnectionClosed);
        }
        let fragment = if is_text {
            Fragment::text(data)
        } else {
            Fragment::binary(data)
        };
        self.tx
            .send(fragment)
            .map_err(|_| RpcError::ConnectionClosed)
    }

    async fn receive(&self) -> Result<Fragment> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(fragment) => Ok(fragment),
            // Peer dropped without a close handshake.
            None => Ok(Fragment::close()),
        }
    }

    async fn close(&self, _status: CloseStatus, _reason: &str) -> Result<()> {
        if self.local_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Deliver the close frame to the peer; ignore a peer that is gone.
        let _ = self.tx.send(Fragment::close());
        Ok(())
    }
}
