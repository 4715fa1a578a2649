//! Server-side accept loop.

use crate::cancel::CancellationToken;
use crate::config::RpcConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::transport::{CloseStatus, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Produces one established transport per accepted peer, together with the
/// handshake cookies the listener extracted.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self) -> Result<(Arc<dyn Transport>, HashMap<String, String>)>;
}

/// Accept peers until cancelled, running each connection on its own task.
///
/// `setup` runs once per accepted connection, before its receive loop, and
/// is where the caller binds services, proxies, relays, or watchdogs. A
/// setup failure closes that one connection; an accept failure stops the
/// server. Cancellation closes every live connection and waits for the
/// per-connection tasks to finish.
pub async fn run_server<A, F>(
    acceptor: &A,
    config: RpcConfig,
    token: CancellationToken,
    setup: F,
) -> Result<()>
where
    A: Acceptor,
    F: Fn(&Connection) -> Result<()> + Send + Sync,
{
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    let outcome = loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            accepted = acceptor.accept() => accepted,
        };
        let (transport, cookies) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "accept failed, stopping server");
                break Err(err);
            }
        };

        let connection = Connection::with_cookies(transport, config.clone(), cookies);
        info!(connection = connection.id(), "peer connected");
        if let Err(err) = setup(&connection) {
            connection.report_error(err).await;
            connection
                .close(CloseStatus::InternalError, "connection setup failed")
                .await;
            continue;
        }

        let token = token.clone();
        tasks.spawn(async move { connection.listen_receive(token).await });

        // Reap finished connections so the set does not grow unbounded.
        while let Some(finished) = tasks.try_join_next() {
            if let Err(err) = finished {
                error!(error = %err, "connection task panicked");
            }
        }
    };

    // Each receive loop observes the cancelled token (or the accept error has
    // already ended new traffic); wait for them to wind down.
    while let Some(finished) = tasks.join_next().await {
        if let Err(err) = finished {
            error!(error = %err, "connection task panicked");
        }
    }
    outcome
}
