//! Fan-out calls across every connection bound to a contract.

use crate::binder::Directory;
use crate::error::Result;
use crate::invoker::RemoteContract;
use crate::service::RpcService;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Invoke `method` on every bound `C` peer, discarding return values.
///
/// All calls are issued concurrently; the first failure is propagated after
/// every call has settled.
pub async fn notify_all<C: RemoteContract>(
    directory: &Directory,
    method: &str,
    arguments: Vec<Value>,
) -> Result<()> {
    let binders = directory.remotes::<C>();
    debug!(contract = C::NAME, method, peers = binders.len(), "fan-out notify");

    let calls = binders
        .iter()
        .map(|binder| binder.notify(method, arguments.clone()));
    join_all(calls).await.into_iter().collect()
}

/// Invoke `method` on every bound `C` peer and collect the results of the
/// calls that completed. Failed or timed-out peers are skipped.
pub async fn call_all<C: RemoteContract, R: DeserializeOwned>(
    directory: &Directory,
    method: &str,
    arguments: Vec<Value>,
) -> Vec<R> {
    collect::<C, R>(directory.remotes::<C>(), method, arguments).await
}

/// Like [`call_all`], restricted to connections that serve `service` locally.
pub async fn call_all_for<C: RemoteContract, S: RpcService, R: DeserializeOwned>(
    directory: &Directory,
    service: &Arc<S>,
    method: &str,
    arguments: Vec<Value>,
) -> Vec<R> {
    collect::<C, R>(directory.remotes_for::<C, S>(service), method, arguments).await
}

async fn collect<C: RemoteContract, R: DeserializeOwned>(
    binders: Vec<Arc<crate::binder::RemoteBinder<C>>>,
    method: &str,
    arguments: Vec<Value>,
) -> Vec<R> {
    let calls = binders
        .iter()
        .map(|binder| binder.invoke::<R>(method, arguments.clone()));
    join_all(calls)
        .await
        .into_iter()
        .filter_map(|outcome| outcome.ok())
        .collect()
}
