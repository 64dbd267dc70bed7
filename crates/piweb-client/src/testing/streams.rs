use super::{MockMarker, MockRegistration, MockState, MockStream};
use crate::{SdkError, SdkResult};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub(crate) fn normalize_value(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.entry("Good").or_insert(Value::Bool(true));
        for flag in ["Questionable", "Substituted", "Annotated"] {
            map.entry(flag).or_insert(Value::Bool(false));
        }
    }
    value
}

impl MockState {
    pub(crate) fn stream(&self, web_id: &str) -> SdkResult<&MockStream> {
        self.streams
            .get(web_id)
            .ok_or_else(|| SdkError::not_found("stream", web_id))
    }

    pub(crate) fn current_value(&self, web_id: &str) -> SdkResult<Value> {
        let stream = self.stream(web_id)?;
        Ok(stream.values.last().cloned().unwrap_or(Value::Null))
    }

    pub(crate) fn recorded_values(&self, web_id: &str) -> SdkResult<Value> {
        let stream = self.stream(web_id)?;
        Ok(json!({ "Items": stream.values }))
    }

    pub(crate) fn write_values(&mut self, web_id: &str, values: Vec<Value>) -> SdkResult<Value> {
        let stream = self
            .streams
            .get_mut(web_id)
            .ok_or_else(|| SdkError::not_found("stream", web_id))?;
        stream
            .values
            .extend(values.into_iter().map(normalize_value));
        Ok(Value::Null)
    }

    pub(crate) fn write_stream_set(&mut self, updates: Vec<Value>) -> SdkResult<Value> {
        for update in &updates {
            let web_id = update
                .get("WebId")
                .and_then(Value::as_str)
                .ok_or_else(|| SdkError::InvalidArgument("update is missing WebId".to_string()))?;
            self.stream(web_id)?;
        }
        for update in updates {
            let web_id = update
                .get("WebId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let value = update.get("Value").cloned().unwrap_or(Value::Null);
            self.write_values(&web_id, vec![value])?;
        }
        Ok(Value::Null)
    }

    pub(crate) fn stream_set_values(&self, web_ids: &[&str]) -> SdkResult<Value> {
        let mut items = Vec::with_capacity(web_ids.len());
        for web_id in web_ids {
            let stream = self.stream(web_id)?;
            items.push(json!({
                "WebId": web_id,
                "Name": stream.name,
                "Value": stream.values.last().cloned().unwrap_or(Value::Null),
            }));
        }
        Ok(json!({ "Items": items }))
    }

    pub(crate) fn stream_set_series(&self, web_ids: &[&str], summaries: bool) -> SdkResult<Value> {
        let mut items = Vec::with_capacity(web_ids.len());
        for web_id in web_ids {
            let stream = self.stream(web_id)?;
            let values = if summaries {
                Vec::new()
            } else {
                stream.values.clone()
            };
            items.push(json!({ "WebId": web_id, "Name": stream.name, "Items": values }));
        }
        Ok(json!({ "Items": items }))
    }

    fn positions(&self, web_ids: &[String]) -> BTreeMap<String, usize> {
        web_ids
            .iter()
            .map(|web_id| {
                let len = self
                    .streams
                    .get(web_id)
                    .map(|stream| stream.values.len())
                    .unwrap_or(0);
                (web_id.clone(), len)
            })
            .collect()
    }

    fn open_registration(&mut self, streams: Vec<String>) -> String {
        let registration = self.allocate_id("reg");
        let positions = self.positions(&streams);
        let marker = self.allocate_id(&format!("{registration}-mk"));
        self.registrations
            .insert(registration.clone(), MockRegistration { streams });
        self.markers.insert(
            marker.clone(),
            MockMarker {
                registration,
                positions,
            },
        );
        marker
    }

    pub(crate) fn register_stream(&mut self, web_id: &str) -> SdkResult<Value> {
        self.stream(web_id)?;
        let marker = self.open_registration(vec![web_id.to_string()]);
        Ok(json!({
            "Source": web_id,
            "Status": "Succeeded",
            "LatestMarker": marker,
        }))
    }

    pub(crate) fn register_stream_set(&mut self, web_ids: &[&str]) -> SdkResult<Value> {
        let mut items = Vec::with_capacity(web_ids.len());
        let mut registered = Vec::new();
        for web_id in web_ids {
            if self.streams.contains_key(*web_id) {
                registered.push(web_id.to_string());
                items.push(json!({ "Source": web_id, "Status": "Succeeded" }));
            } else {
                items.push(json!({
                    "Source": web_id,
                    "Status": "Failed",
                    "Exception": { "Errors": [format!("stream {web_id} not found")] },
                }));
            }
        }
        let marker = self.open_registration(registered);
        Ok(json!({ "Items": items, "LatestMarker": marker }))
    }

    /// Events after the marker's positions plus the marker that covers them.
    /// An unchanged position set hands back the same marker.
    fn collect_updates(&mut self, marker: &str) -> SdkResult<(Vec<(String, Vec<Value>)>, String)> {
        let state = self
            .markers
            .get(marker)
            .cloned()
            .ok_or_else(|| SdkError::not_found("marker", marker))?;
        let registration = self
            .registrations
            .get(&state.registration)
            .cloned()
            .ok_or_else(|| SdkError::not_found("registration", state.registration.clone()))?;

        let mut updates = Vec::with_capacity(registration.streams.len());
        for web_id in &registration.streams {
            let from = state.positions.get(web_id).copied().unwrap_or(0);
            let events: Vec<Value> = self
                .streams
                .get(web_id)
                .map(|stream| stream.values.iter().skip(from).cloned().collect())
                .unwrap_or_default();
            updates.push((web_id.clone(), events));
        }

        let positions = self.positions(&registration.streams);
        if positions == state.positions {
            return Ok((updates, marker.to_string()));
        }
        let next = self.allocate_id(&format!("{}-mk", state.registration));
        self.markers.insert(
            next.clone(),
            MockMarker {
                registration: state.registration,
                positions,
            },
        );
        Ok((updates, next))
    }

    pub(crate) fn retrieve_stream_updates(&mut self, marker: &str) -> SdkResult<Value> {
        let (mut updates, next) = self.collect_updates(marker)?;
        let (source, events) = updates.pop().unwrap_or_default();
        Ok(json!({
            "Source": source,
            "Status": "Succeeded",
            "Events": events.into_iter().map(with_action).collect::<Vec<_>>(),
            "LatestMarker": next,
        }))
    }

    pub(crate) fn retrieve_stream_set_updates(&mut self, marker: &str) -> SdkResult<Value> {
        let (updates, next) = self.collect_updates(marker)?;
        let items: Vec<Value> = updates
            .into_iter()
            .map(|(source, events)| {
                json!({
                    "Source": source,
                    "Events": events.into_iter().map(with_action).collect::<Vec<_>>(),
                })
            })
            .collect();
        Ok(json!({ "Items": items, "LatestMarker": next }))
    }
}

fn with_action(mut event: Value) -> Value {
    if let Value::Object(map) = &mut event {
        map.entry("Action").or_insert(json!("Add"));
    }
    event
}
