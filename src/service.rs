//! Tower integration.

use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use crate::runtime::HttpRuntime;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower_service::Service;

/// `tower::Service<Request>` that delegates to [`HttpRuntime::execute`].
///
/// Always ready: admission control happens inside the runtime, per client.
#[derive(Debug, Clone)]
pub struct RuntimeService {
    runtime: HttpRuntime,
}

impl RuntimeService {
    pub fn new(runtime: HttpRuntime) -> Self {
        Self { runtime }
    }
}

impl Service<Request> for RuntimeService {
    type Response = Response;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Response, HttpError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let runtime = self.runtime.clone();
        Box::pin(async move { runtime.execute(request).await })
    }
}
