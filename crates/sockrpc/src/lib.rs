//! Bidirectional JSON-RPC over a single full-duplex message transport.
//!
//! Both endpoints of a connection can expose services and call the peer's
//! services concurrently over the same socket. The crate is split along the
//! protocol's layers:
//!
//! - [`transport`]: the socket contract ([`Transport`]) plus an in-process
//!   pair for tests and relaying.
//! - [`connection`]: framing, serialized sends, the receive loop, and
//!   lifecycle events.
//! - [`message`]: the JSON request/response envelopes.
//! - [`service`] and [`invoker`]: registration-time method tables, local
//!   dispatch, and call correlation toward the peer.
//! - [`binder`]: wiring engines onto connections, the process-wide
//!   [`Directory`], relaying, and fan-out.
//! - [`client`] / [`server`]: connection drivers for either end.
//!
//! # Example
//!
//! ```no_run
//! use sockrpc::{
//!     bind_local, bind_remote, Connection, Directory, MethodTableBuilder, RemoteContract,
//!     RpcConfig, RpcService,
//! };
//! use std::sync::Arc;
//!
//! struct Calculator;
//!
//! impl RpcService for Calculator {
//!     const NAME: &'static str = "ICalculator";
//!
//!     fn register(methods: &mut MethodTableBuilder<Self>) {
//!         methods.method("Add", |_svc, (a, b): (i64, i64)| async move { Ok(a + b) });
//!     }
//! }
//!
//! struct CalculatorProxy;
//!
//! impl RemoteContract for CalculatorProxy {
//!     const NAME: &'static str = "ICalculator";
//! }
//!
//! # async fn example(connection: Connection) -> sockrpc::Result<()> {
//! let directory = Directory::new();
//! bind_local(&connection, &directory, Arc::new(Calculator))?;
//! let proxy = bind_remote::<CalculatorProxy>(&connection, &directory)?;
//! let sum: i64 = proxy.call("Add").arg(2).arg(3).invoke().await?;
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod cancel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod invoker;
pub mod message;
pub mod server;
pub mod service;
pub mod transport;
pub mod watchdog;

pub use binder::{
    bind_duplex, bind_local, bind_relay, bind_remote, call_all, call_all_for, notify_all,
    CallBuilder, Directory, LocalBinder, RemoteBinder,
};
pub use cancel::CancellationToken;
pub use client::{run_client, Connector, ReconnectPolicy};
pub use config::{Encoding, ProtocolConfig, RpcConfig};
pub use connection::{CloseInfo, Connection, Frame};
pub use error::{Result, RpcError};
pub use events::SubscriptionId;
pub use invoker::{LocalInvoker, RemoteContract, RemoteInvoker};
pub use message::{Request, Response, NIL_CALL_ID};
pub use server::{run_server, Acceptor};
pub use service::{FromArgs, MethodTable, MethodTableBuilder, RpcService};
pub use transport::{CloseStatus, Fragment, FrameKind, MemoryTransport, Transport};
pub use watchdog::bind_idle_timeout;
