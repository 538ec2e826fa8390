#![allow(dead_code)] // each test binary uses a subset of these helpers

use async_trait::async_trait;
use bytes::Bytes;
use metarouter::{
    Analytics, Collaborators, HttpTransport, InitOptions, MemoryKeyValueStore, Response,
    StaticContextProvider, TransportError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request the stub transport saw, with the body already parsed.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: serde_json::Value,
}

/// Scripted transport: replies are popped front-to-back; once the script is
/// exhausted every request gets a bare 200.
#[derive(Debug, Default)]
pub struct StubTransport {
    script: Mutex<VecDeque<Result<Response, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_status(&self, status: u16) {
        self.push_response(Response::status_only(status));
    }

    pub fn push_response(&self, response: Response) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The `batch` array of the nth recorded request.
    pub fn batch_at(&self, index: usize) -> Vec<serde_json::Value> {
        let requests = self.requests.lock().unwrap();
        requests[index].body["batch"].as_array().cloned().unwrap_or_default()
    }

    /// Event names (`event` field) of the nth recorded batch.
    pub fn batch_event_names(&self, index: usize) -> Vec<String> {
        self.batch_at(index)
            .iter()
            .filter_map(|event| event["event"].as_str().map(str::to_string))
            .collect()
    }

    pub fn batch_message_ids(&self, index: usize) -> Vec<String> {
        self.batch_at(index)
            .iter()
            .filter_map(|event| event["messageId"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn post_json(
        &self,
        url: &str,
        body: Bytes,
        _timeout: Duration,
    ) -> Result<Response, TransportError> {
        let parsed = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        self.requests
            .lock()
            .unwrap()
            .push(RecordedRequest { url: url.to_string(), body: parsed });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Response::status_only(200)))
    }
}

/// Collaborators wired to the stub transport and fresh in-memory stores.
pub fn stub_collaborators(transport: &Arc<StubTransport>) -> Collaborators {
    Collaborators {
        transport: Arc::clone(transport) as Arc<dyn HttpTransport>,
        key_value_store: Arc::new(MemoryKeyValueStore::new()),
        context_provider: Arc::new(StaticContextProvider::default()),
    }
}

pub fn options() -> InitOptions {
    InitOptions::new("wk", "https://h")
}

/// An initialised façade talking to the given stub.
pub async fn ready_analytics(transport: &Arc<StubTransport>) -> Analytics {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let analytics = Analytics::new();
    analytics
        .initialize_with(options(), stub_collaborators(transport))
        .await
        .expect("options are valid");
    analytics
}

/// Poll until `condition` holds or `timeout_ms` elapses; panics on timeout.
pub async fn wait_for(description: &str, timeout_ms: u64, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out after {timeout_ms} ms waiting for: {description}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
