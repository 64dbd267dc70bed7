//! In-memory historian speaking the request shapes the SDK uses.
//!
//! Covers stream values, update markers, the OMF endpoint, and an asset
//! hierarchy with configurable visibility lag. Every request is recorded and
//! faults can be injected per matching request.

mod elements;
mod omf;
mod streams;

use crate::{Method, SdkError, SdkResult, Transport, TransportRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Fails the `nth` request (1-based) matching method, path, and optional header.
#[derive(Clone, Debug)]
pub struct MockFault {
    pub method: Method,
    pub path: String,
    pub header: Option<(String, String)>,
    pub nth: usize,
    pub error: SdkError,
    pub repeat: bool,
    seen: usize,
}

impl MockFault {
    pub fn new(method: Method, path: impl Into<String>, nth: usize, error: SdkError) -> Self {
        Self {
            method,
            path: path.into(),
            header: None,
            nth: nth.max(1),
            error,
            repeat: false,
            seen: 0,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.header = Some((name.to_string(), value.to_string()));
        self
    }

    /// Keep failing every matching request from the `nth` onwards.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    fn matches(&self, request: &TransportRequest) -> bool {
        if self.method != request.method || self.path != request.path {
            return false;
        }
        match &self.header {
            Some((name, value)) => request.header_value(name) == Some(value.as_str()),
            None => true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MockStream {
    pub name: String,
    pub values: Vec<Value>,
}

#[derive(Clone, Debug)]
pub(crate) struct MockRegistration {
    pub streams: Vec<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct MockMarker {
    pub registration: String,
    pub positions: BTreeMap<String, usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct MockElement {
    pub web_id: String,
    pub parent: String,
    pub name: String,
    pub description: Option<String>,
    pub path: String,
    pub hidden_lookups: u32,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MockState {
    next_id: u64,
    pub streams: BTreeMap<String, MockStream>,
    pub registrations: BTreeMap<String, MockRegistration>,
    pub markers: BTreeMap<String, MockMarker>,
    pub omf_types: BTreeMap<String, Value>,
    pub omf_containers: BTreeMap<String, Value>,
    pub omf_assets: Vec<Value>,
    pub databases: BTreeMap<String, String>,
    pub elements: BTreeMap<String, MockElement>,
    pub visibility_lag: u32,
    pub allow_duplicate_siblings: bool,
    requests: Vec<TransportRequest>,
    faults: Vec<MockFault>,
}

impl MockState {
    pub(crate) fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:05}", self.next_id)
    }

    fn take_fault(&mut self, request: &TransportRequest) -> Option<SdkError> {
        for fault in &mut self.faults {
            if !fault.matches(request) {
                continue;
            }
            fault.seen += 1;
            if fault.seen == fault.nth || (fault.repeat && fault.seen > fault.nth) {
                return Some(fault.error.clone());
            }
        }
        None
    }

    fn dispatch(&mut self, request: &TransportRequest) -> SdkResult<Value> {
        let segments: Vec<&str> = request
            .path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, ["streams", "updates", marker]) => self.retrieve_stream_updates(marker),
            (Method::Post, ["streams", web_id, "updates"]) => self.register_stream(web_id),
            (Method::Get, ["streams", web_id, "value"]) => self.current_value(web_id),
            (Method::Put, ["streams", web_id, "value"]) => {
                self.write_values(web_id, single_body(request)?)
            }
            (Method::Get, ["streams", web_id, "recorded" | "interpolated" | "plot"]) => {
                self.recorded_values(web_id)
            }
            (Method::Post, ["streams", web_id, "recorded"]) => {
                self.write_values(web_id, array_body(request)?)
            }
            (Method::Get, ["streams", web_id, "summary"]) => {
                self.stream(web_id)?;
                Ok(serde_json::json!({ "Items": [] }))
            }
            (Method::Post, ["streamsets", "updates"]) => {
                self.register_stream_set(&request.query_values("webId"))
            }
            (Method::Get, ["streamsets", "updates"]) => {
                let marker = request.query_value("marker").ok_or_else(|| {
                    SdkError::InvalidArgument("marker query parameter is required".to_string())
                })?;
                self.retrieve_stream_set_updates(marker)
            }
            (Method::Get, ["streamsets", "value"]) => {
                self.stream_set_values(&request.query_values("webId"))
            }
            (Method::Put, ["streamsets", "value"]) => self.write_stream_set(array_body(request)?),
            (Method::Get, ["streamsets", "recorded" | "interpolated" | "plot" | "summaries"]) => {
                let summaries = segments[1] == "summaries";
                self.stream_set_series(&request.query_values("webId"), summaries)
            }
            (Method::Post, ["omf"]) => self.handle_omf(request),
            (Method::Get, ["assetdatabases", parent, "elements"])
            | (Method::Get, ["elements", parent, "elements"]) => {
                self.list_children(parent, request.query_value("nameFilter"))
            }
            (Method::Post, ["assetdatabases", parent, "elements"])
            | (Method::Post, ["elements", parent, "elements"]) => {
                self.create_child(parent, request.body.as_ref())
            }
            (Method::Get, ["elements", web_id]) => self.element(web_id),
            _ => Err(SdkError::not_found("route", request.path.clone())),
        }
    }
}

fn single_body(request: &TransportRequest) -> SdkResult<Vec<Value>> {
    match &request.body {
        Some(body @ Value::Object(_)) => Ok(vec![body.clone()]),
        _ => Err(SdkError::InvalidArgument(
            "request body must be a JSON object".to_string(),
        )),
    }
}

fn array_body(request: &TransportRequest) -> SdkResult<Vec<Value>> {
    match &request.body {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(SdkError::InvalidArgument(
            "request body must be a JSON array".to_string(),
        )),
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockHistorian {
    inner: Arc<Mutex<MockState>>,
}

impl MockHistorian {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SdkResult<std::sync::MutexGuard<'_, MockState>> {
        self.inner
            .lock()
            .map_err(|_| SdkError::InvalidState("mock historian mutex poisoned".to_string()))
    }

    fn with_state<R>(&self, apply: impl FnOnce(&mut MockState) -> R) -> R {
        match self.inner.lock() {
            Ok(mut state) => apply(&mut state),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }

    pub fn add_stream(&self, web_id: &str, name: &str) {
        self.with_state(|state| {
            state.streams.entry(web_id.to_string()).or_insert(MockStream {
                name: name.to_string(),
                values: Vec::new(),
            });
        });
    }

    /// Simulates a write by another producer, outside the SDK.
    pub fn push_value(&self, web_id: &str, timestamp: &str, value: Value) {
        self.with_state(|state| {
            let stream = state.streams.entry(web_id.to_string()).or_default();
            stream.values.push(streams::normalize_value(serde_json::json!({
                "Timestamp": timestamp,
                "Value": value,
            })));
        });
    }

    pub fn stream_values(&self, web_id: &str) -> Vec<Value> {
        self.with_state(|state| {
            state
                .streams
                .get(web_id)
                .map(|stream| stream.values.clone())
                .unwrap_or_default()
        })
    }

    pub fn add_database(&self, web_id: &str, path: &str) {
        self.with_state(|state| {
            state
                .databases
                .insert(web_id.to_string(), path.to_string());
        });
    }

    /// Inserts an already visible element and returns its web id.
    pub fn insert_element(&self, parent: &str, name: &str) -> String {
        self.with_state(|state| state.insert_element(parent, name, None, 0))
    }

    /// Number of child listings a newly created element stays invisible for.
    pub fn set_visibility_lag(&self, lookups: u32) {
        self.with_state(|state| state.visibility_lag = lookups);
    }

    pub fn allow_duplicate_siblings(&self, allow: bool) {
        self.with_state(|state| state.allow_duplicate_siblings = allow);
    }

    pub fn children_named(&self, parent: &str, name: &str) -> Vec<String> {
        self.with_state(|state| {
            state
                .elements
                .values()
                .filter(|element| element.parent == parent && element.name == name)
                .map(|element| element.web_id.clone())
                .collect()
        })
    }

    pub fn omf_type(&self, type_id: &str) -> Option<Value> {
        self.with_state(|state| state.omf_types.get(type_id).cloned())
    }

    pub fn omf_container(&self, container_id: &str) -> Option<Value> {
        self.with_state(|state| state.omf_containers.get(container_id).cloned())
    }

    pub fn omf_assets(&self) -> Vec<Value> {
        self.with_state(|state| state.omf_assets.clone())
    }

    pub fn inject_fault(&self, fault: MockFault) {
        self.with_state(|state| state.faults.push(fault));
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.with_state(|state| state.requests.clone())
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method && request.path == path)
            .collect()
    }
}

#[async_trait]
impl Transport for MockHistorian {
    async fn request(&self, request: TransportRequest) -> SdkResult<Value> {
        let mut state = self.lock()?;
        state.requests.push(request.clone());
        if let Some(error) = state.take_fault(&request) {
            return Err(error);
        }
        state.dispatch(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_route_expected_not_found() {
        let mock = MockHistorian::new();
        let error = mock
            .request(TransportRequest::get("tables/abc"))
            .await
            .expect_err("unknown route should fail");
        assert!(matches!(error, SdkError::NotFound { resource: "route", .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fault_hits_only_the_nth_matching_request() {
        let mock = MockHistorian::new();
        mock.add_stream("s1", "sine1");
        mock.inject_fault(MockFault::new(
            Method::Post,
            "streams/s1/recorded",
            2,
            SdkError::transport("boom"),
        ));

        let write = || {
            TransportRequest::post("streams/s1/recorded")
                .body(json!([{ "Timestamp": "2024-01-01T00:00:00Z", "Value": 1 }]))
        };
        mock.request(write()).await.expect("first write succeeds");
        mock.request(write()).await.expect_err("second write fails");
        mock.request(write()).await.expect("third write succeeds");

        assert_eq!(mock.stream_values("s1").len(), 2);
        assert_eq!(mock.requests_to(Method::Post, "streams/s1/recorded").len(), 3);
    }
}
