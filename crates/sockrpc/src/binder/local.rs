//! Local binder: serves an object's methods to the peer.

use crate::binder::Directory;
use crate::connection::Connection;
use crate::error::Result;
use crate::invoker::LocalInvoker;
use crate::message::Request;
use crate::service::RpcService;
use std::sync::Arc;

/// A service bound to one connection.
pub struct LocalBinder<S: RpcService> {
    connection: Connection,
    invoker: Arc<LocalInvoker<S>>,
}

impl<S: RpcService> LocalBinder<S> {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn service(&self) -> &Arc<S> {
        self.invoker.service()
    }
}

/// Serve `service` on `connection` and register the binding.
///
/// Incoming request frames that target this service are dispatched and
/// answered; frames belonging to other binders on the same connection are
/// left alone. The binding is dropped from the directory when the connection
/// closes.
pub fn bind_local<S: RpcService>(
    connection: &Connection,
    directory: &Directory,
    service: Arc<S>,
) -> Result<LocalBinder<S>> {
    let invoker = Arc::new(LocalInvoker::new(Arc::clone(&service))?);
    directory.register_local(connection.id(), Arc::clone(&service))?;

    let conn = connection.clone();
    let dispatcher = Arc::clone(&invoker);
    connection.on_receive(move |frame| {
        let conn = conn.clone();
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let Some(text) = frame.as_text() else {
                return Ok(());
            };
            let request = Request::from_json(text)?;
            if request.is_empty() || !dispatcher.accepts(&request.function_name) {
                return Ok(());
            }
            let response = dispatcher.invoke(&request).await;
            conn.send_text(&response.to_json()?).await?;
            Ok(())
        }
    });

    let dir = directory.clone();
    let id = connection.id();
    connection.on_close(move |_| {
        let dir = dir.clone();
        async move {
            dir.deregister_connection(id);
            Ok(())
        }
    });

    Ok(LocalBinder {
        connection: connection.clone(),
        invoker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::RpcConfig;
    use crate::message::Response;
    use crate::service::MethodTableBuilder;
    use crate::transport::{CloseStatus, MemoryTransport, Transport};
    use serde_json::json;

    struct Calculator;

    impl RpcService for Calculator {
        const NAME: &'static str = "ICalculator";

        fn register(methods: &mut MethodTableBuilder<Self>) {
            methods.method("Add", |_svc, (a, b): (i32, i32)| async move { Ok(a + b) });
        }
    }

    #[tokio::test]
    async fn test_bound_service_answers_requests() {
        let (a, b) = MemoryTransport::pair();
        let server = Connection::new(a as Arc<dyn Transport>, RpcConfig::default());
        let client = Connection::new(b as Arc<dyn Transport>, RpcConfig::default());
        let directory = Directory::new();

        bind_local(&server, &directory, Arc::new(Calculator)).unwrap();
        let listener = {
            let server = server.clone();
            tokio::spawn(async move { server.listen_receive(CancellationToken::new()).await })
        };

        let answers = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&answers);
        client.on_receive(move |frame| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock()
                    .unwrap()
                    .push(Response::from_json(frame.as_text().unwrap())?);
                Ok(())
            }
        });
        let client_listener = {
            let client = client.clone();
            tokio::spawn(async move { client.listen_receive(CancellationToken::new()).await })
        };

        let request = Request {
            function_name: "Add".into(),
            call_id: "c1".into(),
            arguments: vec![json!(2), json!(3)],
        };
        client.send_text(&request.to_json().unwrap()).await.unwrap();

        let response = loop {
            if let Some(response) = answers.lock().unwrap().first().cloned() {
                break response;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(response.return_value, Some(json!(5)));
        assert_eq!(response.call_id, "c1");

        client.close(CloseStatus::Normal, "").await;
        server.close(CloseStatus::Normal, "").await;
        listener.await.unwrap().unwrap();
        client_listener.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_deregisters_binding() {
        let (a, _b) = MemoryTransport::pair();
        let server = Connection::new(a as Arc<dyn Transport>, RpcConfig::default());
        let directory = Directory::new();

        bind_local(&server, &directory, Arc::new(Calculator)).unwrap();
        assert_eq!(directory.connection_count(), 1);

        server.close(CloseStatus::Normal, "").await;
        assert_eq!(directory.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_binding_rejected() {
        let (a, _b) = MemoryTransport::pair();
        let server = Connection::new(a as Arc<dyn Transport>, RpcConfig::default());
        let directory = Directory::new();

        bind_local(&server, &directory, Arc::new(Calculator)).unwrap();
        assert!(bind_local(&server, &directory, Arc::new(Calculator)).is_err());
    }
}
