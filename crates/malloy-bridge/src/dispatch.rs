//! Method-name to handler dispatch table
//!
//! Incoming worker requests are routed through an explicit table rather than
//! ad-hoc callbacks on the connection. Handlers may be registered and removed
//! while connections are live; a lookup always sees a consistent table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Outcome of a handled request
pub type HandlerResult = std::result::Result<Value, JsonRpcError>;

/// Handles one JSON-RPC method
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, params: Option<Value>) -> HandlerResult;
}

type BoxedHandlerFuture = BoxFuture<'static, HandlerResult>;

/// Adapts an async closure into a [`RequestHandler`]
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(Option<Value>) -> BoxedHandlerFuture + Send + Sync + 'static,
{
    async fn handle(&self, params: Option<Value>) -> HandlerResult {
        (self.f)(params).await
    }
}

/// Routes requests to registered handlers
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn RequestHandler>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for `method`
    pub fn register(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let method = method.into();
        debug!(method = %method, "Registering request handler");
        self.handlers.write().insert(method, handler);
    }

    /// Register an async closure as the handler for `method`
    pub fn register_fn<F, Fut>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = FnHandler {
            f: move |params| -> BoxedHandlerFuture { f(params).boxed() },
        };
        self.register(method, Arc::new(handler));
    }

    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.write().remove(method).is_some()
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Run the handler for `request` and build its response
    pub async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let handler = self.handlers.read().get(&request.method).cloned();

        match handler {
            Some(handler) => match handler.handle(request.params).await {
                Ok(result) => JsonRpcResponse::success(request.id, result),
                Err(error) => JsonRpcResponse::error(request.id, error),
            },
            None => {
                debug!(method = %request.method, "No handler registered");
                JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::method_not_found(&request.method),
                )
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{error_codes, RequestId};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, params: Option<Value>) -> HandlerResult {
            Ok(params.unwrap_or(Value::Null))
        }
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(RequestId::Number(42), method, params)
    }

    #[tokio::test]
    async fn test_dispatch_to_trait_handler() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("echo", Arc::new(Echo));

        let response = dispatcher.dispatch(request("echo", Some(json!([1, 2])))).await;
        assert_eq!(response.id, RequestId::Number(42));
        assert_eq!(response.into_result().unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_dispatch_to_closure() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_fn("fail", |_params| async {
            Err(JsonRpcError::internal_error("nope"))
        });

        let response = dispatcher.dispatch(request("fail", None)).await;
        let error = response.into_result().unwrap_err();
        assert_eq!(error.code, error_codes::INTERNAL_ERROR);
        assert_eq!(error.message, "nope");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dispatcher = Dispatcher::new();
        let response = dispatcher.dispatch(request("malloy/unknown", None)).await;
        let error = response.into_result().unwrap_err();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
        assert!(error.message.contains("malloy/unknown"));
    }

    #[tokio::test]
    async fn test_unregister() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("echo", Arc::new(Echo));
        assert!(dispatcher.has_method("echo"));
        assert!(dispatcher.unregister("echo"));
        assert!(!dispatcher.unregister("echo"));

        let response = dispatcher.dispatch(request("echo", None)).await;
        assert!(response.error.is_some());
    }

    #[test]
    fn test_methods_sorted() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("b", Arc::new(Echo));
        dispatcher.register("a", Arc::new(Echo));
        let clone = dispatcher.clone();
        assert_eq!(clone.methods(), vec!["a".to_string(), "b".to_string()]);
    }
}
