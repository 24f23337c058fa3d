//! Logical outbound request and its per-call overrides.

use crate::config::CallOverrides;
use crate::error::HttpError;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::Serialize;
use std::time::Duration;

/// A logical call: one request, possibly several transport attempts.
///
/// Builder methods never panic. An invalid header or body is remembered and surfaced as
/// `INVALID_ARGUMENT` / `SERIALIZATION_ERROR` when the request is executed.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    client: Option<String>,
    idempotency_key: Option<String>,
    overrides: CallOverrides,
    deferred: Option<HttpError>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            client: None,
            idempotency_key: None,
            overrides: CallOverrides::default(),
            deferred: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Set a header, replacing any previous value under the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| HttpError::InvalidArgument(format!("invalid header name '{name}'")))
            .and_then(|n| {
                HeaderValue::from_str(value)
                    .map(|v| (n, v))
                    .map_err(|_| HttpError::InvalidArgument(format!("invalid value for header '{name}'")))
            });
        match parsed {
            Ok((n, v)) => {
                self.headers.insert(n, v);
            }
            Err(e) => self.defer(e),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set `Content-Type: application/json`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(buf) => {
                self.body = Some(Bytes::from(buf));
                self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Err(e) => self.defer(e.into()),
        }
        self
    }

    /// Execute under the named client's configuration and runtime state.
    pub fn client(mut self, name: impl Into<String>) -> Self {
        self.client = Some(name.into());
        self
    }

    /// Value for the resolved idempotency header, unless the header is already set.
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Replace all per-call overrides.
    pub fn overrides(mut self, overrides: CallOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.overrides.max_retries = Some(retries);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.overrides = std::mem::take(&mut self.overrides).read_timeout(timeout);
        self
    }

    pub fn fail_on_non_2xx(mut self, fail: bool) -> Self {
        self.overrides.fail_on_non_2xx = Some(fail);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client.as_deref()
    }

    pub fn idempotency_key_value(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn call_overrides(&self) -> &CallOverrides {
        &self.overrides
    }

    /// Stamp a client name unless the request already names one.
    pub(crate) fn with_default_client(mut self, name: &str) -> Self {
        if self.client.is_none() {
            self.client = Some(name.to_string());
        }
        self
    }

    /// First builder error, if any.
    pub(crate) fn take_deferred(&mut self) -> Option<HttpError> {
        self.deferred.take()
    }

    fn defer(&mut self, err: HttpError) {
        if self.deferred.is_none() {
            self.deferred = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn builder_sets_fields() {
        let req = Request::post("/orders")
            .header("x-trace", "abc")
            .client("billing")
            .idempotency_key("k-1")
            .max_retries(4);
        assert_eq!(*req.method(), Method::POST);
        assert_eq!(req.url(), "/orders");
        assert_eq!(req.headers().get("x-trace").unwrap(), "abc");
        assert_eq!(req.client_name(), Some("billing"));
        assert_eq!(req.idempotency_key_value(), Some("k-1"));
        assert_eq!(req.call_overrides().max_retries, Some(4));
    }

    #[test]
    fn invalid_header_is_deferred() {
        let mut req = Request::get("/x").header("bad name", "v").header("also bad", "v");
        let err = req.take_deferred().expect("deferred error");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("bad name"));
        assert!(req.take_deferred().is_none());
    }

    #[test]
    fn json_body_sets_content_type() {
        let req = Request::post("/x").json(&serde_json::json!({"a": 1}));
        assert_eq!(req.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(req.body_bytes().unwrap().as_ref(), br#"{"a":1}"#);
    }

    #[test]
    fn default_client_does_not_override_explicit() {
        let req = Request::get("/x").client("a").with_default_client("b");
        assert_eq!(req.client_name(), Some("a"));
        let req = Request::get("/x").with_default_client("b");
        assert_eq!(req.client_name(), Some("b"));
    }
}
