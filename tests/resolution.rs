mod common;

use common::{quiet_global, url, Harness, ScriptedTransport};
use ninelives_http::{CallOverrides, ClientConfig, ErrorCode, Request, ResilienceOverrides};
use std::time::Duration;

fn layered() -> Harness {
    let global = quiet_global()
        .max_retries(5)
        .connect_timeout(Duration::from_secs(2))
        .read_timeout(Duration::ZERO)
        .user_agent("global-agent/1.0")
        .default_header("x-team", "platform")
        .default_header("x-layer", "global")
        .build()
        .unwrap();
    let h = Harness::new(ScriptedTransport::new(), global);
    let client = ClientConfig::builder()
        .base_url("https://billing.test/api/")
        .bearer_token("s3cret")
        .user_agent("billing/2.0")
        .default_header("x-layer", "client")
        .call(CallOverrides::new().max_retries(3).fail_on_non_2xx(false))
        .resilience(ResilienceOverrides::new().rate_limit(50.0, 5))
        .build()
        .unwrap();
    h.runtime.register_client("billing", client).unwrap();
    h
}

#[tokio::test]
async fn request_beats_client_beats_global() {
    let h = layered();

    let global_only = h.runtime.resolve_policy(&Request::get(url("/"))).unwrap();
    assert_eq!(global_only.client, "default");
    assert_eq!(global_only.max_retries, 5);
    assert!(global_only.fail_on_non_2xx);
    assert!(global_only.rate_limit.is_none());

    let client = h.runtime.resolve_policy(&Request::get("/").client("billing")).unwrap();
    assert_eq!(client.max_retries, 3);
    assert!(!client.fail_on_non_2xx);
    assert_eq!(client.connect_timeout, Duration::from_secs(2));
    assert_eq!(client.rate_limit.map(|r| r.burst), Some(5));

    let request = h.runtime.resolve_policy(&Request::get("/").client("billing").max_retries(1)).unwrap();
    assert_eq!(request.max_retries, 1);
    assert!(!request.fail_on_non_2xx);
}

#[tokio::test]
async fn zero_read_timeout_disables_it() {
    let h = layered();
    let policy = h.runtime.resolve_policy(&Request::get(url("/"))).unwrap();
    assert_eq!(policy.read_timeout, None);

    let policy = h.runtime.resolve_policy(&Request::get(url("/")).read_timeout(Duration::from_millis(300))).unwrap();
    assert_eq!(policy.read_timeout, Some(Duration::from_millis(300)));
}

#[tokio::test]
async fn unknown_client_cannot_resolve() {
    let h = layered();
    let err = h.runtime.resolve_policy(&Request::get("/").client("payroll")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigError);
}

#[tokio::test]
async fn client_identity_reaches_the_wire() {
    let h = layered();

    h.runtime.execute(Request::get("/invoices?page=2").client("billing")).await.unwrap();

    let sent = h.transport.requests();
    let req = &sent[0];
    assert_eq!(req.url.as_str(), "https://billing.test/api/invoices?page=2");
    assert_eq!(req.headers["authorization"], "Bearer s3cret");
    assert!(req.headers["authorization"].is_sensitive());
    assert_eq!(req.headers["user-agent"], "billing/2.0");
    assert_eq!(req.headers["x-team"], "platform");
    assert_eq!(req.headers["x-layer"], "client");
    assert_eq!(req.connect_timeout, Duration::from_secs(2));
}

#[tokio::test]
async fn request_headers_win_over_configured_ones() {
    let h = layered();

    let request = Request::get("/").client("billing").header("x-layer", "request").header("user-agent", "demo/0.1");
    h.runtime.execute(request).await.unwrap();

    let req = &h.transport.requests()[0];
    assert_eq!(req.headers["x-layer"], "request");
    assert_eq!(req.headers["user-agent"], "demo/0.1");
}

#[tokio::test]
async fn client_scope_stamps_its_name() {
    let h = layered();
    let billing = h.runtime.client("billing");
    assert_eq!(billing.name(), "billing");

    billing.execute(Request::get("/ping")).await.unwrap();
    let err = billing.execute(Request::get("/ping").client("ghost")).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConfigError);
    assert_eq!(h.transport.requests()[0].url.as_str(), "https://billing.test/api/ping");
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn absolute_url_bypasses_base() {
    let h = layered();
    h.runtime.execute(Request::get("https://elsewhere.test/x").client("billing")).await.unwrap();
    let req = &h.transport.requests()[0];
    assert_eq!(req.url.as_str(), "https://elsewhere.test/x");
    assert_eq!(req.headers["authorization"], "Bearer s3cret");
}
