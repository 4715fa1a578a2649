//! Remote binder: a typed proxy toward a contract served by the peer.

use crate::binder::Directory;
use crate::connection::Connection;
use crate::error::{Result, RpcError};
use crate::invoker::remote::RequestSink;
use crate::invoker::{RemoteContract, RemoteInvoker};
use crate::message::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// A contract `C` callable over one connection.
pub struct RemoteBinder<C: RemoteContract> {
    connection: Connection,
    invoker: Arc<RemoteInvoker<C>>,
}

impl<C: RemoteContract> RemoteBinder<C> {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Start building a call to `method`.
    pub fn call(&self, method: impl Into<String>) -> CallBuilder<C> {
        CallBuilder {
            invoker: Arc::clone(&self.invoker),
            method: method.into(),
            arguments: Vec::new(),
            deferred: None,
        }
    }

    /// Call with pre-encoded arguments and decode the result.
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<R> {
        self.invoker.call(method, arguments).await
    }

    /// Call a method whose return value is irrelevant.
    pub async fn notify(&self, method: &str, arguments: Vec<Value>) -> Result<()> {
        self.invoker.notify(method, arguments).await
    }

    /// Calls still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.invoker.pending_count()
    }
}

/// Accumulates arguments for one remote call.
///
/// Serialization failures are deferred so `arg` can chain; the first one
/// surfaces when the call is issued.
pub struct CallBuilder<C: RemoteContract> {
    invoker: Arc<RemoteInvoker<C>>,
    method: String,
    arguments: Vec<Value>,
    deferred: Option<RpcError>,
}

impl<C: RemoteContract> CallBuilder<C> {
    pub fn arg<T: Serialize>(mut self, value: T) -> Self {
        if self.deferred.is_none() {
            match serde_json::to_value(value) {
                Ok(value) => self.arguments.push(value),
                Err(err) => self.deferred = Some(err.into()),
            }
        }
        self
    }

    /// Issue the call and decode its return value.
    pub async fn invoke<R: DeserializeOwned>(self) -> Result<R> {
        if let Some(err) = self.deferred {
            return Err(err);
        }
        self.invoker.call(&self.method, self.arguments).await
    }

    /// Issue the call, discarding the completion sentinel.
    pub async fn notify(self) -> Result<()> {
        if let Some(err) = self.deferred {
            return Err(err);
        }
        self.invoker.notify(&self.method, self.arguments).await
    }
}

/// Bind contract `C` toward the peer of `connection`.
///
/// Incoming response frames are routed to the in-flight calls they answer;
/// unmatched responses are ignored so other binders can claim them. When the
/// connection closes, every in-flight call fails with `ConnectionClosed` and
/// the binding leaves the directory.
pub fn bind_remote<C: RemoteContract>(
    connection: &Connection,
    directory: &Directory,
) -> Result<Arc<RemoteBinder<C>>> {
    let sink: RequestSink = {
        let conn = connection.clone();
        Arc::new(move |request| {
            let conn = conn.clone();
            Box::pin(async move { conn.send_text(&request.to_json()?).await })
        })
    };
    let invoker = Arc::new(RemoteInvoker::<C>::new(sink, connection.config()));

    let binder = Arc::new(RemoteBinder {
        connection: connection.clone(),
        invoker: Arc::clone(&invoker),
    });
    directory.register_remote::<C>(
        connection.id(),
        Arc::clone(&binder) as Arc<dyn Any + Send + Sync>,
    )?;

    let router = Arc::clone(&invoker);
    connection.on_receive(move |frame| {
        let router = Arc::clone(&router);
        async move {
            let Some(text) = frame.as_text() else {
                return Ok(());
            };
            let response = Response::from_json(text)?;
            if !response.is_empty() {
                router.receive(response);
            }
            Ok(())
        }
    });

    let dir = directory.clone();
    let id = connection.id();
    let aborter = Arc::clone(&invoker);
    connection.on_close(move |_| {
        let dir = dir.clone();
        let aborter = Arc::clone(&aborter);
        async move {
            aborter.abort_all();
            dir.deregister_connection(id);
            Ok(())
        }
    });

    Ok(binder)
}
