//! Transport collaborator seam.
//!
//! The engine never opens sockets itself. It hands a fully prepared [`TransportRequest`] to an
//! opaque [`Transport`] handle, built by a [`TransportFactory`] once per [`HandleKey`] and
//! cached by the [`HandleCache`](crate::handle_cache::HandleCache).

use crate::config::TlsMaterial;
use crate::error::{HttpError, TransportError};
use crate::handle_cache::HandleKey;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One attempt as seen by the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: url::Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub connect_timeout: Duration,
    /// Bound for the whole attempt, enforced by the transport.
    pub total_timeout: Duration,
    pub follow_redirects: bool,
    pub tls: Option<TlsMaterial>,
}

/// Raw result of one attempt.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Opaque client handle that performs HTTP exchanges.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Builds transport handles for a connection fingerprint.
pub trait TransportFactory: Send + Sync {
    fn build(&self, key: &HandleKey) -> Result<Arc<dyn Transport>, HttpError>;
}

impl<F> TransportFactory for F
where
    F: Fn(&HandleKey) -> Result<Arc<dyn Transport>, HttpError> + Send + Sync,
{
    fn build(&self, key: &HandleKey) -> Result<Arc<dyn Transport>, HttpError> {
        self(key)
    }
}

/// Factory that hands out one shared transport for every fingerprint.
#[derive(Clone)]
pub struct SharedTransport {
    transport: Arc<dyn Transport>,
}

impl SharedTransport {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self { transport: Arc::new(transport) }
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTransport").finish_non_exhaustive()
    }
}

impl TransportFactory for SharedTransport {
    fn build(&self, _key: &HandleKey) -> Result<Arc<dyn Transport>, HttpError> {
        Ok(Arc::clone(&self.transport))
    }
}

/// Transport that fails every attempt; the default until a real factory is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredTransport;

#[async_trait]
impl Transport for UnconfiguredTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        Err(TransportError::Network(format!("no transport configured for {}", request.url)))
    }
}
