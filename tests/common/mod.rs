#![allow(dead_code)]

use async_trait::async_trait;
use http::HeaderMap;
use ninelives_http::transport::{TransportRequest, TransportResponse};
use ninelives_http::{
    GlobalConfig, HandleKey, HttpError, HttpRuntime, ManualClock, MemorySink, RecordingSleeper, Transport,
    TransportError,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One scripted transport reaction.
pub enum Step {
    Respond(TransportResponse),
    Fail(TransportError),
    /// Never completes.
    Hang,
    /// Waits for the notify, then answers with the status.
    Gate(Arc<Notify>, u16),
}

/// In-memory transport that plays back a script, then answers 200.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16) -> Self {
        self.push(Step::Respond(TransportResponse::new(status, "")))
    }

    pub fn respond_with(self, response: TransportResponse) -> Self {
        self.push(Step::Respond(response))
    }

    pub fn respond_with_header(self, status: u16, name: &'static str, value: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        self.respond_with(TransportResponse::new(status, "").with_headers(headers))
    }

    pub fn fail(self, err: TransportError) -> Self {
        self.push(Step::Fail(err))
    }

    pub fn hang(self) -> Self {
        self.push(Step::Hang)
    }

    pub fn gate(self, notify: Arc<Notify>, status: u16) -> Self {
        self.push(Step::Gate(notify, status))
    }

    pub fn push(self, step: Step) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    /// Transport invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        let step = self.steps.lock().pop_front();
        match step {
            None => Ok(TransportResponse::new(200, "ok")),
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => futures::future::pending().await,
            Some(Step::Gate(notify, status)) => {
                notify.notified().await;
                Ok(TransportResponse::new(status, ""))
            }
        }
    }
}

/// Factory that hands out the scripted transport and counts builds.
#[derive(Clone)]
pub struct CountingFactory {
    pub transport: ScriptedTransport,
    pub builds: Arc<AtomicUsize>,
    pub keys: Arc<Mutex<Vec<HandleKey>>>,
}

impl CountingFactory {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self { transport, builds: Arc::default(), keys: Arc::default() }
    }
}

impl ninelives_http::TransportFactory for CountingFactory {
    fn build(&self, key: &HandleKey) -> Result<Arc<dyn Transport>, HttpError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().push(key.clone());
        Ok(Arc::new(self.transport.clone()))
    }
}

/// Runtime wired to deterministic test collaborators.
pub struct Harness {
    pub runtime: HttpRuntime,
    pub transport: ScriptedTransport,
    pub factory: CountingFactory,
    pub clock: ManualClock,
    pub sleeper: RecordingSleeper,
    pub sink: MemorySink,
}

impl Harness {
    pub fn new(transport: ScriptedTransport, global: GlobalConfig) -> Self {
        let factory = CountingFactory::new(transport.clone());
        let clock = ManualClock::new();
        let sleeper = RecordingSleeper::new();
        let sink = MemorySink::new();
        let runtime = HttpRuntime::builder()
            .transport(factory.clone())
            .clock(clock.clone())
            .sleeper(sleeper.clone())
            .telemetry(sink.clone())
            .build();
        runtime.init(global).expect("valid global config");
        Self { runtime, transport, factory, clock, sleeper, sink }
    }

    /// Harness with jitter off so delays are exact.
    pub fn with_script(transport: ScriptedTransport) -> Self {
        Self::new(transport, quiet_global().build().unwrap())
    }
}

/// Global builder with deterministic retry timing.
pub fn quiet_global() -> ninelives_http::config::GlobalConfigBuilder {
    GlobalConfig::builder()
        .retry_jitter(false)
        .retry_backoff(Duration::from_millis(100), Duration::from_millis(1_000))
}

pub fn url(path: &str) -> String {
    format!("https://upstream.test{path}")
}
