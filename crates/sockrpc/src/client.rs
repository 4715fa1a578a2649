//! Client-side connection driver with reconnect support.

use crate::cancel::CancellationToken;
use crate::config::{ProtocolConfig, RpcConfig};
use crate::connection::Connection;
use crate::error::{Result, RpcError};
use crate::transport::{CloseStatus, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Establishes one transport per attempt. Implementations own the dial,
/// handshake, and TLS details.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>>;
}

/// When and how fast the client re-dials.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Re-dial after a failed connect attempt or an abnormal close.
    pub reconnect_on_error: bool,
    /// Re-dial after any close, normal or abnormal, and after failed connect
    /// attempts.
    pub reconnect_on_close: bool,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_on_error: false,
            reconnect_on_close: false,
            retry_delay: ProtocolConfig::DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Dial, bind, and run a client connection until it ends for a reason the
/// policy does not cover.
///
/// `setup` runs once per established connection, before any traffic, and is
/// where the caller binds its services and proxies. Returns `Ok` after a
/// normal close (or cancellation), the terminal error otherwise.
pub async fn run_client<C, F>(
    connector: &C,
    config: RpcConfig,
    policy: ReconnectPolicy,
    token: CancellationToken,
    setup: F,
) -> Result<()>
where
    C: Connector,
    F: Fn(&Connection) -> Result<()> + Send + Sync,
{
    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        let transport = match connector.connect().await {
            Ok(transport) => transport,
            Err(err)
                if err.is_retryable()
                    && (policy.reconnect_on_error || policy.reconnect_on_close) =>
            {
                warn!(error = %err, "connect failed, retrying");
                if !wait_retry(&token, policy.retry_delay).await {
                    return Ok(());
                }
                continue;
            }
            Err(err) => return Err(err),
        };

        let connection = Connection::new(transport, config.clone());
        info!(connection = connection.id(), "connected");
        if let Err(err) = setup(&connection) {
            connection
                .close(CloseStatus::InternalError, "connection setup failed")
                .await;
            return Err(err);
        }
        connection.listen_receive(token.clone()).await?;

        if token.is_cancelled() {
            return Ok(());
        }

        let graceful = matches!(
            connection.close_info(),
            Some(info) if info.status == CloseStatus::Normal
        );
        // reconnect_on_close covers every close; reconnect_on_error only the
        // abnormal ones.
        let retry = (!graceful && policy.reconnect_on_error) || policy.reconnect_on_close;
        if !retry {
            return if graceful {
                Ok(())
            } else {
                Err(RpcError::ConnectionClosed)
            };
        }

        info!(graceful, "connection ended, reconnecting");
        if !wait_retry(&token, policy.retry_delay).await {
            return Ok(());
        }
    }
}

/// Sleep out the retry delay; `false` means cancellation interrupted it.
async fn wait_retry(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
