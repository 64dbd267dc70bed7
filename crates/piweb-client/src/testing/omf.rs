use super::{MockState, MockStream};
use crate::{SdkError, SdkResult, TransportRequest};
use serde_json::{Value, json};

impl MockState {
    pub(crate) fn handle_omf(&mut self, request: &TransportRequest) -> SdkResult<Value> {
        let action = request.header_value("action").unwrap_or("create");
        if action != "create" {
            return Err(SdkError::InvalidArgument(format!(
                "unsupported omf action '{action}'"
            )));
        }
        let messages = match &request.body {
            Some(Value::Array(messages)) => messages.clone(),
            _ => {
                return Err(SdkError::InvalidArgument(
                    "omf body must be a JSON array".to_string(),
                ));
            }
        };

        match request.header_value("messagetype") {
            Some("type") => self.omf_types_message(messages),
            Some("container") => self.omf_containers_message(messages),
            Some("data") => self.omf_data_message(messages),
            Some(other) => Err(SdkError::InvalidArgument(format!(
                "unknown omf messagetype '{other}'"
            ))),
            None => Err(SdkError::InvalidArgument(
                "missing messagetype header".to_string(),
            )),
        }
    }

    fn omf_types_message(&mut self, types: Vec<Value>) -> SdkResult<Value> {
        for definition in &types {
            let id = required_str(definition, "id")?;
            if let Some(existing) = self.omf_types.get(id) {
                if existing != definition {
                    return Err(SdkError::Conflict(format!(
                        "type '{id}' already exists with a different definition"
                    )));
                }
            }
        }
        for definition in types {
            let id = required_str(&definition, "id")?.to_string();
            self.omf_types.insert(id, definition);
        }
        Ok(Value::Null)
    }

    fn omf_containers_message(&mut self, containers: Vec<Value>) -> SdkResult<Value> {
        for container in &containers {
            let id = required_str(container, "id")?;
            let type_id = required_str(container, "typeid")?;
            if !self.omf_types.contains_key(type_id) {
                return Err(SdkError::InvalidArgument(format!(
                    "container '{id}' references unknown type '{type_id}'"
                )));
            }
            if let Some(existing) = self.omf_containers.get(id) {
                if existing != container {
                    return Err(SdkError::Conflict(format!(
                        "container '{id}' already exists with a different definition"
                    )));
                }
            }
        }
        for container in containers {
            let id = required_str(&container, "id")?.to_string();
            let name = container
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id.as_str())
                .to_string();
            self.streams.entry(id.clone()).or_insert(MockStream {
                name,
                values: Vec::new(),
            });
            self.omf_containers.insert(id, container);
        }
        Ok(Value::Null)
    }

    fn omf_data_message(&mut self, items: Vec<Value>) -> SdkResult<Value> {
        for item in &items {
            if let Some(container_id) = item.get("containerid").and_then(Value::as_str) {
                if !self.omf_containers.contains_key(container_id) {
                    return Err(SdkError::InvalidArgument(format!(
                        "data references unknown container '{container_id}'"
                    )));
                }
            } else if let Some(type_id) = item.get("typeid").and_then(Value::as_str) {
                if !self.omf_types.contains_key(type_id) {
                    return Err(SdkError::InvalidArgument(format!(
                        "data references unknown type '{type_id}'"
                    )));
                }
            } else {
                return Err(SdkError::InvalidArgument(
                    "data message needs containerid or typeid".to_string(),
                ));
            }
        }

        for item in items {
            let values = item
                .get("values")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if let Some(container_id) = item.get("containerid").and_then(Value::as_str) {
                let index = self.container_index_property(container_id);
                let events: Vec<Value> = values
                    .into_iter()
                    .map(|value| omf_value_to_event(value, index.as_deref()))
                    .collect();
                self.write_values(container_id, events)?;
            } else if let Some(type_id) = item.get("typeid").and_then(Value::as_str) {
                for value in values {
                    self.omf_assets
                        .push(json!({ "typeid": type_id, "value": value }));
                }
            }
        }
        Ok(Value::Null)
    }

    fn container_index_property(&self, container_id: &str) -> Option<String> {
        let type_id = self
            .omf_containers
            .get(container_id)?
            .get("typeid")?
            .as_str()?;
        let properties = self.omf_types.get(type_id)?.get("properties")?.as_object()?;
        properties
            .iter()
            .find(|(_, property)| property.get("isindex").and_then(Value::as_bool) == Some(true))
            .map(|(name, _)| name.clone())
    }
}

fn required_str<'a>(value: &'a Value, key: &str) -> SdkResult<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SdkError::InvalidArgument(format!("omf message is missing '{key}'")))
}

fn omf_value_to_event(value: Value, index: Option<&str>) -> Value {
    let Value::Object(mut fields) = value else {
        return json!({ "Timestamp": Value::Null, "Value": value });
    };
    let timestamp = index
        .and_then(|name| fields.remove(name))
        .unwrap_or(Value::Null);
    let payload = if fields.len() == 1 {
        fields.into_iter().next().map(|(_, value)| value).unwrap_or(Value::Null)
    } else {
        Value::Object(fields)
    };
    super::streams::normalize_value(json!({ "Timestamp": timestamp, "Value": payload }))
}
