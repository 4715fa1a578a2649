//! Relay binder: verbatim frame forwarding between exactly two connections.

use crate::connection::Connection;
use crate::error::{Result, RpcError};
use crate::transport::CloseStatus;
use tracing::debug;

/// Splice `front` onto exactly one target connection.
///
/// Every complete message received on one side is re-sent on the other,
/// byte for byte; the relay never decodes the payload, so each side keeps
/// its own size limit. Anything other than exactly one target is a policy
/// violation that closes `front`.
///
/// When either side closes, the other side's forwarding subscription is
/// removed and that side is closed too, so a half-open splice cannot linger.
pub async fn bind_relay(front: &Connection, targets: &[Connection]) -> Result<()> {
    if targets.len() != 1 {
        let count = targets.len();
        front
            .report_error(RpcError::RelayTargets { count })
            .await;
        front
            .close(
                CloseStatus::PolicyViolation,
                &RpcError::RelayTargets { count }.to_string(),
            )
            .await;
        return Err(RpcError::RelayTargets { count });
    }
    let back = targets[0].clone();
    debug!(front = front.id(), back = back.id(), "splicing relay");

    let forward = {
        let back = back.clone();
        front.on_receive(move |frame| {
            let back = back.clone();
            async move {
                back.send_raw(frame.data, frame.is_text).await?;
                Ok(())
            }
        })
    };
    let backward = {
        let front = front.clone();
        back.on_receive(move |frame| {
            let front = front.clone();
            async move {
                front.send_raw(frame.data, frame.is_text).await?;
                Ok(())
            }
        })
    };

    {
        let back = back.clone();
        front.on_close(move |_| {
            let back = back.clone();
            async move {
                back.remove_receive(backward);
                back.close(CloseStatus::Normal, "relay peer closed").await;
                Ok(())
            }
        });
    }
    {
        let front = front.clone();
        back.on_close(move |_| {
            let front = front.clone();
            async move {
                front.remove_receive(forward);
                front.close(CloseStatus::Normal, "relay peer closed").await;
                Ok(())
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::RpcConfig;
    use crate::transport::{MemoryTransport, Transport};
    use std::sync::{Arc, Mutex};

    fn connection(config: RpcConfig) -> (Connection, Connection) {
        let (a, b) = MemoryTransport::pair();
        (
            Connection::new(a as Arc<dyn Transport>, config.clone()),
            Connection::new(b as Arc<dyn Transport>, config),
        )
    }

    fn collect_text(conn: &Connection) -> Arc<Mutex<Vec<String>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        conn.on_receive(move |frame| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(frame.as_text().unwrap().to_string());
                Ok(())
            }
        });
        received
    }

    fn listen(conn: &Connection) -> tokio::task::JoinHandle<Result<()>> {
        let conn = conn.clone();
        tokio::spawn(async move { conn.listen_receive(CancellationToken::new()).await })
    }

    #[tokio::test]
    async fn test_frames_are_forwarded_both_ways() {
        // client <-> front_wire | splice | back_wire <-> upstream
        let (client, front_wire) = connection(RpcConfig::default());
        let (back_wire, upstream) = connection(RpcConfig::default());

        bind_relay(&front_wire, std::slice::from_ref(&back_wire))
            .await
            .unwrap();

        let upstream_seen = collect_text(&upstream);
        let client_seen = collect_text(&client);

        let l1 = listen(&front_wire);
        let l2 = listen(&back_wire);
        let l3 = listen(&upstream);
        let l4 = listen(&client);

        client.send_text("ping").await.unwrap();
        upstream.send_text("pong").await.unwrap();

        loop {
            let done = !upstream_seen.lock().unwrap().is_empty()
                && !client_seen.lock().unwrap().is_empty();
            if done {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*upstream_seen.lock().unwrap(), vec!["ping"]);
        assert_eq!(*client_seen.lock().unwrap(), vec!["pong"]);

        client.close(CloseStatus::Normal, "").await;
        for l in [l1, l2, l3, l4] {
            l.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_zero_targets_is_a_policy_violation() {
        let (front, _peer) = connection(RpcConfig::default());
        let err = bind_relay(&front, &[]).await.unwrap_err();
        assert!(matches!(err, RpcError::RelayTargets { count: 0 }));
        assert!(!front.is_open());
        assert_eq!(
            front.close_info().unwrap().status,
            CloseStatus::PolicyViolation
        );
    }

    #[tokio::test]
    async fn test_multiple_targets_is_a_policy_violation() {
        let (front, _peer) = connection(RpcConfig::default());
        let (t1, _p1) = connection(RpcConfig::default());
        let (t2, _p2) = connection(RpcConfig::default());

        let err = bind_relay(&front, &[t1, t2]).await.unwrap_err();
        assert!(matches!(err, RpcError::RelayTargets { count: 2 }));
        assert!(!front.is_open());
    }

    #[tokio::test]
    async fn test_peer_close_tears_down_both_sides() {
        let (front, _client) = connection(RpcConfig::default());
        let (back, _upstream) = connection(RpcConfig::default());
        bind_relay(&front, std::slice::from_ref(&back)).await.unwrap();

        front.close(CloseStatus::Normal, "").await;
        assert!(!back.is_open());
    }
}
