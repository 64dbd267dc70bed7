use futures::StreamExt;
use futures::stream::{self, BoxStream};
use piweb_client::{SdkError, SdkResult, Transport, TransportRequest, encode_path_segment};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cursor::{CursorStore, Marker, SubscriptionId};
use crate::types::{StreamSelection, UpdateBatch, UpdateRecord, decode};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Retrieval hints forwarded to the service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedOptions {
    pub selected_fields: Option<String>,
    pub desired_units: Option<String>,
}

pub type RecordFilter = Arc<dyn Fn(&UpdateRecord) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct PollOptions {
    pub interval: Duration,
    /// Yield batches that came back empty (or were filtered down to nothing).
    pub emit_empty: bool,
    /// Keeps only matching records. The marker still advances past the rest.
    pub predicate: Option<RecordFilter>,
    pub feed: FeedOptions,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            emit_empty: false,
            predicate: None,
            feed: FeedOptions::default(),
        }
    }
}

impl PollOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn emit_empty(mut self, emit_empty: bool) -> Self {
        self.emit_empty = emit_empty;
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&UpdateRecord) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_feed_options(mut self, feed: FeedOptions) -> Self {
        self.feed = feed;
        self
    }
}

/// Marker-based incremental reads over one stream or a stream set.
///
/// The cursor store only moves after a complete response has been decoded,
/// so a failed or dropped retrieval leaves the previous marker valid.
#[derive(Clone, Debug)]
pub struct ChangeFeedClient<T> {
    transport: T,
    cursors: CursorStore,
}

impl<T: Transport> ChangeFeedClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_store(transport, CursorStore::new())
    }

    pub fn with_store(transport: T, cursors: CursorStore) -> Self {
        Self { transport, cursors }
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Opens a subscription starting now and returns its first marker.
    pub async fn register(
        &self,
        selection: StreamSelection,
        selected_fields: Option<&str>,
    ) -> SdkResult<Marker> {
        selection.validate()?;
        let response = match &selection {
            StreamSelection::Single(web_id) => {
                let request = TransportRequest::post(format!(
                    "streams/{}/updates",
                    encode_path_segment(web_id)
                ))
                .query_opt("selectedFields", selected_fields);
                let response = self
                    .transport
                    .request(request)
                    .await
                    .map_err(|error| stream_not_found(error, web_id))?;
                check_registration(&response, web_id)?;
                response
            }
            StreamSelection::Set(web_ids) => {
                let request = TransportRequest::post("streamsets/updates")
                    .query_all("webId", web_ids)
                    .query_opt("selectedFields", selected_fields);
                let response = self.transport.request(request).await?;
                if let Some(items) = response.get("Items").and_then(Value::as_array) {
                    for item in items {
                        let source = item.get("Source").and_then(Value::as_str).unwrap_or("");
                        check_registration(item, source)?;
                    }
                }
                response
            }
        };

        let marker = latest_marker(&response)?;
        let subscription = self.cursors.open(selection, marker.clone())?;
        info!(subscription = %subscription, marker = %marker, "registered for updates");
        Ok(marker)
    }

    /// Adopts a marker persisted by an earlier process as the head of a new
    /// subscription. Updates already delivered before the crash may be
    /// delivered again.
    pub fn resume(&self, selection: StreamSelection, marker: Marker) -> SdkResult<SubscriptionId> {
        selection.validate()?;
        let subscription = self.cursors.open(selection, marker.clone())?;
        info!(subscription = %subscription, marker = %marker, "resumed subscription");
        Ok(subscription)
    }

    /// One round trip: everything recorded since `marker` plus the next marker.
    pub async fn retrieve(&self, marker: &Marker, options: &FeedOptions) -> SdkResult<UpdateBatch> {
        let (subscription, selection) = self.cursors.lookup(marker)?;
        let request = match &selection {
            StreamSelection::Single(_) => TransportRequest::get(format!(
                "streams/updates/{}",
                encode_path_segment(marker.as_str())
            )),
            StreamSelection::Set(_) => {
                TransportRequest::get("streamsets/updates").query("marker", marker.as_str())
            }
        }
        .query_opt("selectedFields", options.selected_fields.as_deref())
        .query_opt("desiredUnits", options.desired_units.as_deref());

        let response = self
            .transport
            .request(request)
            .await
            .map_err(|error| retrieve_error(error, marker))?;
        let (records, next) = parse_updates(&selection, response)?;
        self.cursors.advance(subscription, marker, next.clone())?;
        debug!(
            subscription = %subscription,
            records = records.len(),
            marker = %next,
            "retrieved updates"
        );
        Ok(UpdateBatch {
            records,
            marker: next,
        })
    }

    pub fn subscription(&self, marker: &Marker) -> SdkResult<SubscriptionId> {
        self.cursors.lookup(marker).map(|(subscription, _)| subscription)
    }

    /// Current head of a subscription, for callers persisting progress.
    pub fn cursor(&self, subscription: SubscriptionId) -> SdkResult<Option<Marker>> {
        self.cursors.head(subscription)
    }

    pub fn close(&self, subscription: SubscriptionId) -> SdkResult<Option<Marker>> {
        self.cursors.close(subscription)
    }
}

impl<T: Transport + Clone + 'static> ChangeFeedClient<T> {
    /// Retrieves immediately, then once per interval. The stream ends after
    /// yielding the first error; the subscription head still holds the last
    /// marker that was fully applied.
    pub fn poll(
        &self,
        marker: Marker,
        options: PollOptions,
    ) -> BoxStream<'static, SdkResult<UpdateBatch>> {
        let state = PollState {
            client: self.clone(),
            marker,
            options,
            started: false,
            finished: false,
        };
        stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            loop {
                if state.started {
                    tokio::time::sleep(state.options.interval).await;
                }
                state.started = true;
                match state.client.retrieve(&state.marker, &state.options.feed).await {
                    Ok(mut batch) => {
                        state.marker = batch.marker.clone();
                        if let Some(predicate) = &state.options.predicate {
                            batch.records.retain(|record| predicate.as_ref()(record));
                        }
                        if batch.is_empty() && !state.options.emit_empty {
                            continue;
                        }
                        return Some((Ok(batch), state));
                    }
                    Err(error) => {
                        state.finished = true;
                        return Some((Err(error), state));
                    }
                }
            }
        })
        .boxed()
    }
}

struct PollState<T> {
    client: ChangeFeedClient<T>,
    marker: Marker,
    options: PollOptions,
    started: bool,
    finished: bool,
}

fn stream_not_found(error: SdkError, web_id: &str) -> SdkError {
    match error {
        SdkError::NotFound { .. } => SdkError::not_found("stream", web_id),
        other => other,
    }
}

fn retrieve_error(error: SdkError, marker: &Marker) -> SdkError {
    match error {
        SdkError::NotFound { .. } => SdkError::not_found("marker", marker.as_str()),
        SdkError::TransportFailure { status, message } => SdkError::TransportFailure {
            status,
            message: format!("retrieving updates after marker {marker}: {message}"),
        },
        other => other,
    }
}

fn check_registration(item: &Value, web_id: &str) -> SdkResult<()> {
    match item.get("Status").and_then(Value::as_str) {
        None | Some("Succeeded") => Ok(()),
        Some(_) => Err(SdkError::not_found("stream", web_id)),
    }
}

fn latest_marker(response: &Value) -> SdkResult<Marker> {
    let marker = response
        .get("LatestMarker")
        .and_then(Value::as_str)
        .ok_or_else(|| SdkError::transport("update response is missing LatestMarker"))?;
    Marker::new(marker)
}

fn parse_updates(
    selection: &StreamSelection,
    response: Value,
) -> SdkResult<(Vec<UpdateRecord>, Marker)> {
    if let Some(status) = response.get("Status").and_then(Value::as_str) {
        if status != "Succeeded" {
            return Err(SdkError::InvalidState(format!(
                "service rejected the marker with status {status}: {}",
                response.get("Exception").cloned().unwrap_or(Value::Null)
            )));
        }
    }
    let next = latest_marker(&response)?;

    let mut records = Vec::new();
    match selection {
        StreamSelection::Single(web_id) => {
            let source = response
                .get("Source")
                .and_then(Value::as_str)
                .unwrap_or(web_id.as_str());
            collect_events(&response, source, &mut records)?;
        }
        StreamSelection::Set(_) => {
            let items = response
                .get("Items")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for item in items {
                let source = item
                    .get("Source")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SdkError::transport("update item is missing Source"))?;
                collect_events(item, source, &mut records)?;
            }
        }
    }
    Ok((records, next))
}

fn collect_events(
    container: &Value,
    source: &str,
    records: &mut Vec<UpdateRecord>,
) -> SdkResult<()> {
    let events = container
        .get("Events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for event in events {
        let mut event = event.clone();
        if let Value::Object(fields) = &mut event {
            fields
                .entry("Source")
                .or_insert_with(|| Value::String(source.to_string()));
        }
        records.push(decode(event, "update event")?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_updates_keeps_per_stream_order_in_sets() {
        let response = json!({
            "Items": [
                { "Source": "a", "Events": [
                    { "Timestamp": "t1", "Value": 1 },
                    { "Timestamp": "t2", "Value": 2 },
                ]},
                { "Source": "b", "Events": [{ "Timestamp": "t1", "Value": 10 }] },
            ],
            "LatestMarker": "m2",
        });
        let (records, marker) =
            parse_updates(&StreamSelection::set(["a", "b"]), response).expect("parse");

        assert_eq!(marker.as_str(), "m2");
        let seen: Vec<(&str, &str)> = records
            .iter()
            .map(|record| (record.source.as_str(), record.value.timestamp.as_str()))
            .collect();
        assert_eq!(seen, vec![("a", "t1"), ("a", "t2"), ("b", "t1")]);
    }

    #[test]
    fn parse_updates_without_marker_is_a_transport_failure() {
        let error = parse_updates(&StreamSelection::single("a"), json!({ "Events": [] }))
            .expect_err("missing marker");
        assert!(matches!(error, SdkError::TransportFailure { .. }));
    }

    #[test]
    fn parse_updates_failed_status_is_invalid_state() {
        let error = parse_updates(
            &StreamSelection::single("a"),
            json!({
                "Status": "Failed",
                "LatestMarker": "m",
                "Exception": { "Errors": ["expired"] }
            }),
        )
        .expect_err("failed status");
        assert!(matches!(error, SdkError::InvalidState(_)));
    }

    #[test]
    fn retrieve_error_names_the_marker() {
        let marker = Marker::new("m-17").expect("marker");
        assert_eq!(
            retrieve_error(SdkError::not_found("route", "streams/updates/m-17"), &marker),
            SdkError::not_found("marker", "m-17")
        );
        let failure = retrieve_error(SdkError::transport("connection reset"), &marker);
        assert!(failure.is_retryable());
        assert_eq!(
            failure.to_string(),
            "transport failure: retrieving updates after marker m-17: connection reset"
        );
    }

    #[test]
    fn poll_options_defaults() {
        let options = PollOptions::default();
        assert_eq!(options.interval, DEFAULT_POLL_INTERVAL);
        assert!(!options.emit_empty);
        assert!(options.predicate.is_none());
    }
}
