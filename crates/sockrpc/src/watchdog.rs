//! Idle-timeout watchdog.

use crate::cancel::CancellationToken;
use crate::connection::Connection;
use crate::transport::CloseStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Close `connection` with a policy violation when no complete message
/// arrives for `timeout`.
///
/// The countdown restarts on every received message; a closed connection
/// stops the watchdog. Returns a token that cancels the watchdog early
/// without touching the connection.
pub fn bind_idle_timeout(connection: &Connection, timeout: Duration) -> CancellationToken {
    let activity = Arc::new(Notify::new());
    let token = CancellationToken::new();

    {
        let activity = Arc::clone(&activity);
        connection.on_receive(move |_| {
            activity.notify_one();
            async { Ok(()) }
        });
    }
    {
        let token = token.clone();
        connection.on_close(move |_| {
            token.cancel();
            async { Ok(()) }
        });
    }

    let conn = connection.clone();
    let watchdog_token = token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = watchdog_token.cancelled() => return,
                _ = activity.notified() => continue,
                _ = tokio::time::sleep(timeout) => {
                    debug!(connection = conn.id(), ?timeout, "idle timeout elapsed");
                    conn.close(
                        CloseStatus::PolicyViolation,
                        &format!("Closed due to inactivity of {} seconds", timeout.as_secs()),
                    )
                    .await;
                    return;
                }
            }
        }
    });

    token
}
