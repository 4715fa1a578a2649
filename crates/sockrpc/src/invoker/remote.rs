//! Remote invocation engine: correlates outgoing requests with incoming
//! responses through per-call ids and a pending-call table.

use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use crate::message::{Request, Response};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// A peer-side contract a connection can call into.
///
/// The implementing type is a marker: its method names are fixed by the
/// call sites, and `NAME` identifies the contract in the process-wide
/// directory.
pub trait RemoteContract: Send + Sync + 'static {
    /// Contract name, used for directory lookups and logging.
    const NAME: &'static str;
}

/// Sink for encoded requests, usually a connection's text sender. Returns
/// `false` when the channel is no longer open.
pub(crate) type RequestSink =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Issues calls toward the peer and resolves their responses.
///
/// Every in-flight call parks a oneshot sender in the pending table under the
/// key `"<method>-<callId>"`. The receive path removes the entry before
/// completing it, so a duplicate or late response finds nothing to resolve.
pub struct RemoteInvoker<C: RemoteContract> {
    sink: RequestSink,
    pending: DashMap<String, oneshot::Sender<Response>>,
    call_timeout: Option<Duration>,
    _contract: PhantomData<fn() -> C>,
}

impl<C: RemoteContract> RemoteInvoker<C> {
    pub(crate) fn new(sink: RequestSink, config: &RpcConfig) -> Self {
        Self {
            sink,
            pending: DashMap::new(),
            call_timeout: config.get_call_timeout(),
            _contract: PhantomData,
        }
    }

    /// Call `method` with pre-encoded arguments and decode the result.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, arguments: Vec<Value>) -> Result<R> {
        let response = self.call_raw(method, arguments).await?;
        Ok(serde_json::from_value(
            response.return_value.unwrap_or(Value::Null),
        )?)
    }

    /// Call a method with no meaningful return value. The peer still answers
    /// with its completion sentinel, which is discarded here.
    pub async fn notify(&self, method: &str, arguments: Vec<Value>) -> Result<()> {
        self.call_raw(method, arguments).await?;
        Ok(())
    }

    async fn call_raw(&self, method: &str, arguments: Vec<Value>) -> Result<Response> {
        let call_id = Uuid::new_v4().to_string();
        let key = pending_key(method, &call_id);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        let request = Request {
            function_name: method.to_string(),
            call_id,
            arguments,
        };
        debug!(contract = C::NAME, method, call_id = %request.call_id, "issuing call");

        let sent = match (self.sink)(request).await {
            Ok(sent) => sent,
            Err(err) => {
                self.pending.remove(&key);
                return Err(err);
            }
        };
        if !sent {
            self.pending.remove(&key);
            return Err(RpcError::ConnectionClosed);
        }

        let response = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.remove(&key);
                    return Err(RpcError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        // A dropped sender means the pending table was torn down underneath us.
        let response = response.map_err(|_| RpcError::ConnectionClosed)?;

        if let Some(error) = response.error {
            return Err(RpcError::Remote(error));
        }
        Ok(response)
    }

    /// Route an incoming response to its waiting call.
    ///
    /// Returns `true` when a pending call consumed it; `false` means the
    /// response belongs to another invoker (or nobody) and should be offered
    /// elsewhere.
    pub fn receive(&self, response: Response) -> bool {
        let key = pending_key(&response.function_name, &response.call_id);
        let Some((_, tx)) = self.pending.remove(&key) else {
            return false;
        };
        if tx.send(response).is_err() {
            // The caller gave up (timeout or cancellation) between removal
            // and delivery; the call already has its outcome.
            warn!(contract = C::NAME, key, "response arrived for an abandoned call");
        }
        true
    }

    /// Fail every in-flight call with `ConnectionClosed`. Called when the
    /// underlying connection goes away.
    pub fn abort_all(&self) {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            // Dropping the sender wakes the waiter with a recv error, which
            // call_raw maps to ConnectionClosed.
            self.pending.remove(&key);
        }
    }

    /// Number of calls still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn pending_key(method: &str, call_id: &str) -> String {
    format!("{method}-{call_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Echo;

    impl RemoteContract for Echo {
        const NAME: &'static str = "IEcho";
    }

    /// Sink that records requests and lets the test answer them manually.
    fn capturing_sink(log: Arc<Mutex<Vec<Request>>>) -> RequestSink {
        Arc::new(move |request| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(request);
                Ok(true)
            })
        })
    }

    fn closed_sink() -> RequestSink {
        Arc::new(|_| Box::pin(async { Ok(false) }))
    }

    fn response_for(request: &Request, value: Value) -> Response {
        Response {
            function_name: request.function_name.clone(),
            call_id: request.call_id.clone(),
            return_value: Some(value),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_call_resolves_with_matching_response() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = Arc::new(RemoteInvoker::<Echo>::new(
            capturing_sink(Arc::clone(&log)),
            &RpcConfig::default(),
        ));

        let call = tokio::spawn({
            let invoker = Arc::clone(&invoker);
            async move { invoker.call::<i32>("Echo", vec![json!(7)]).await }
        });

        // Wait for the request to hit the sink, then answer it.
        let request = loop {
            if let Some(request) = log.lock().unwrap().first().cloned() {
                break request;
            }
            tokio::task::yield_now().await;
        };
        assert!(invoker.receive(response_for(&request, json!(7))));

        assert_eq!(call.await.unwrap().unwrap(), 7);
        assert_eq!(invoker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = Arc::new(RemoteInvoker::<Echo>::new(
            capturing_sink(Arc::clone(&log)),
            &RpcConfig::default(),
        ));

        let call = tokio::spawn({
            let invoker = Arc::clone(&invoker);
            async move { invoker.call::<i32>("Echo", vec![]).await }
        });

        let request = loop {
            if let Some(request) = log.lock().unwrap().first().cloned() {
                break request;
            }
            tokio::task::yield_now().await;
        };
        invoker.receive(Response {
            function_name: request.function_name,
            call_id: request.call_id,
            return_value: None,
            error: Some("x".into()),
        });

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Remote(message) if message == "x"));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_refused() {
        let invoker =
            RemoteInvoker::<Echo>::new(closed_sink(), &RpcConfig::default());
        let stray = Response {
            function_name: "Echo".into(),
            call_id: "no-such-call".into(),
            return_value: Some(json!(1)),
            error: None,
        };
        assert!(!invoker.receive(stray));
    }

    #[tokio::test]
    async fn test_closed_sink_fails_fast() {
        let invoker = RemoteInvoker::<Echo>::new(closed_sink(), &RpcConfig::default());
        let err = invoker.call::<i32>("Echo", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
        assert_eq!(invoker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = RpcConfig::default().call_timeout(Duration::from_secs(1));
        let invoker = Arc::new(RemoteInvoker::<Echo>::new(capturing_sink(log), &config));

        let err = invoker.call::<i32>("Echo", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert_eq!(invoker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abort_all_fails_in_flight_calls() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = Arc::new(RemoteInvoker::<Echo>::new(
            capturing_sink(Arc::clone(&log)),
            &RpcConfig::default(),
        ));

        let call = tokio::spawn({
            let invoker = Arc::clone(&invoker);
            async move { invoker.call::<i32>("Echo", vec![]).await }
        });

        loop {
            if invoker.pending_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        invoker.abort_all();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_response_resolves_at_most_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = Arc::new(RemoteInvoker::<Echo>::new(
            capturing_sink(Arc::clone(&log)),
            &RpcConfig::default(),
        ));

        let call = tokio::spawn({
            let invoker = Arc::clone(&invoker);
            async move { invoker.call::<i32>("Echo", vec![]).await }
        });

        let request = loop {
            if let Some(request) = log.lock().unwrap().first().cloned() {
                break request;
            }
            tokio::task::yield_now().await;
        };
        let first = response_for(&request, json!(1));
        let second = response_for(&request, json!(2));
        assert!(invoker.receive(first));
        assert!(!invoker.receive(second));

        assert_eq!(call.await.unwrap().unwrap(), 1);
    }
}
