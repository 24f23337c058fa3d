//! Final response of a logical call.

use crate::error::HttpError;
use bytes::Bytes;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Status, headers, and fully buffered body of the terminal attempt.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    retries: u32,
    elapsed: Duration,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body, retries: 0, elapsed: Duration::ZERO }
    }

    pub(crate) fn with_call_stats(mut self, retries: u32, elapsed: Duration) -> Self {
        self.retries = retries;
        self.elapsed = elapsed;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Retries performed before this response was produced.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Wall time of the whole logical call, retry sleeps included.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Body as UTF-8.
    pub fn text(&self) -> Result<String, HttpError> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| HttpError::Serialization(format!("response body is not UTF-8: {e}")))
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
