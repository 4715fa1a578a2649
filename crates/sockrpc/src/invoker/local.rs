//! Local invocation engine: dispatches an incoming request to a bound
//! service method and captures every failure into the response envelope.

use crate::error::{Result, RpcError};
use crate::message::{Request, Response};
use crate::service::{MethodTable, RpcService};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Dispatches requests against one bound service instance.
pub struct LocalInvoker<S: RpcService> {
    service: Arc<S>,
    table: Arc<MethodTable<S>>,
}

impl<S: RpcService> LocalInvoker<S> {
    /// Bind a service instance. Table construction errors (duplicate method
    /// names) surface here, synchronously.
    pub fn new(service: Arc<S>) -> Result<Self> {
        Ok(Self {
            service,
            table: MethodTable::<S>::for_service()?,
        })
    }

    /// The bound service instance.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Whether a request should be dispatched here.
    ///
    /// A request qualified with this service's interface name is always
    /// accepted (a missing method then yields an error response). An
    /// unqualified request is accepted only when the method exists, so other
    /// services bound to the same connection get their turn.
    pub fn accepts(&self, function_name: &str) -> bool {
        match function_name.split_once('.') {
            Some((interface, _)) => interface == S::NAME,
            None => self.table.contains(function_name),
        }
    }

    /// Dispatch one request.
    ///
    /// Never fails: unknown names, arity mismatches, argument conversion
    /// failures and handler errors all end up in the response's error string
    /// so the peer learns what went wrong while this side stays up.
    pub async fn invoke(&self, request: &Request) -> Response {
        debug!(method = %request.function_name, call_id = %request.call_id, "dispatching request");

        let result = self.dispatch(request).await;
        let (return_value, error) = match result {
            // Void methods report the `true` completion sentinel so the peer
            // can distinguish "completed" from "no response".
            Ok(None) => (Some(Value::Bool(true)), None),
            Ok(value) => (value, None),
            Err(err) => (None, Some(err.to_string())),
        };

        Response {
            function_name: request.function_name.clone(),
            call_id: request.call_id.clone(),
            return_value,
            error,
        }
    }

    async fn dispatch(&self, request: &Request) -> Result<Option<Value>> {
        let name = self.resolve_name(&request.function_name)?;

        let Some((arity, invoke)) = self.table.get(name) else {
            return Err(RpcError::MethodNotFound {
                name: name.to_string(),
            });
        };
        if request.arguments.len() != arity {
            return Err(RpcError::ArityMismatch {
                name: name.to_string(),
                expected: arity,
                actual: request.arguments.len(),
            });
        }

        invoke(Arc::clone(&self.service), request.arguments.clone()).await
    }

    /// Strip an optional `Interface.` qualifier, verifying it names this
    /// service's contract.
    fn resolve_name<'a>(&self, function_name: &'a str) -> Result<&'a str> {
        match function_name.split_once('.') {
            Some((interface, method)) if interface == S::NAME => Ok(method),
            Some(_) => Err(RpcError::MethodNotFound {
                name: function_name.to_string(),
            }),
            None => Ok(function_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MethodTableBuilder;
    use serde_json::json;

    struct Calculator;

    impl RpcService for Calculator {
        const NAME: &'static str = "ICalculator";

        fn register(methods: &mut MethodTableBuilder<Self>) {
            methods
                .method("Add", |_svc, (a, b): (i32, i32)| async move { Ok(a + b) })
                .method("Fail", |_svc, ()| async {
                    Err::<i32, _>(RpcError::Handler("x".into()))
                })
                .one_way("Noop", |_svc, ()| async { Ok(()) });
        }
    }

    fn request(name: &str, args: Vec<Value>) -> Request {
        Request {
            function_name: name.into(),
            call_id: "cid-1".into(),
            arguments: args,
        }
    }

    async fn invoker() -> LocalInvoker<Calculator> {
        LocalInvoker::new(Arc::new(Calculator)).unwrap()
    }

    #[tokio::test]
    async fn test_add_returns_value() {
        let response = invoker().await.invoke(&request("Add", vec![json!(2), json!(3)])).await;
        assert_eq!(response.return_value, Some(json!(5)));
        assert_eq!(response.error, None);
        assert_eq!(response.call_id, "cid-1");
    }

    #[tokio::test]
    async fn test_qualified_name_dispatches() {
        let response = invoker()
            .await
            .invoke(&request("ICalculator.Add", vec![json!(1), json!(1)]))
            .await;
        assert_eq!(response.return_value, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_wrong_qualifier_is_an_error_response() {
        let response = invoker()
            .await
            .invoke(&request("IOther.Add", vec![json!(1), json!(1)]))
            .await;
        assert!(response.error.is_some());
        assert_eq!(response.return_value, None);
    }

    #[tokio::test]
    async fn test_unknown_method_is_captured() {
        let response = invoker().await.invoke(&request("Mul", vec![])).await;
        assert!(response
            .error
            .as_deref()
            .unwrap()
            .contains("does not contain the provided method name"));
    }

    #[tokio::test]
    async fn test_arity_mismatch_is_captured() {
        let response = invoker().await.invoke(&request("Add", vec![json!(1)])).await;
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_string() {
        let response = invoker().await.invoke(&request("Fail", vec![])).await;
        assert_eq!(response.error.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_void_method_yields_true_sentinel() {
        let response = invoker().await.invoke(&request("Noop", vec![])).await;
        assert_eq!(response.return_value, Some(json!(true)));
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn test_accepts_routes_by_qualifier_and_table() {
        let invoker = invoker().await;
        assert!(invoker.accepts("Add"));
        assert!(invoker.accepts("ICalculator.Add"));
        assert!(invoker.accepts("ICalculator.Missing"));
        assert!(!invoker.accepts("IOther.Add"));
        assert!(!invoker.accepts("Mul"));
    }

    #[tokio::test]
    async fn test_argument_conversion_failure_is_captured() {
        let response = invoker()
            .await
            .invoke(&request("Add", vec![json!("a"), json!("b")]))
            .await;
        assert!(response.error.is_some());
    }
}
