use piweb_client::{SdkError, SdkResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cursor::Marker;

/// One recorded value as the service reports it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimedValue {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units_abbreviation: Option<String>,
    #[serde(default = "default_good")]
    pub good: bool,
    #[serde(default)]
    pub questionable: bool,
    #[serde(default)]
    pub substituted: bool,
    #[serde(default)]
    pub annotated: bool,
}

fn default_good() -> bool {
    true
}

/// A value observed through the change feed, tagged with its stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateRecord {
    pub source: String,
    #[serde(flatten)]
    pub value: TimedValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Records gathered by one retrieval together with the marker covering them.
///
/// Records of the same stream keep the order the service reported them in;
/// there is no ordering across streams.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateBatch {
    pub records: Vec<UpdateRecord>,
    pub marker: Marker,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// What a subscription covers: one stream or a fixed set sharing a marker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StreamSelection {
    Single(String),
    Set(Vec<String>),
}

impl StreamSelection {
    pub fn single(web_id: impl Into<String>) -> Self {
        Self::Single(web_id.into())
    }

    pub fn set<I, S>(web_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(web_ids.into_iter().map(Into::into).collect())
    }

    pub fn web_ids(&self) -> Vec<&str> {
        match self {
            Self::Single(web_id) => vec![web_id.as_str()],
            Self::Set(web_ids) => web_ids.iter().map(String::as_str).collect(),
        }
    }

    pub fn validate(&self) -> SdkResult<()> {
        match self {
            Self::Single(web_id) => validate_web_id(web_id),
            Self::Set(web_ids) => {
                if web_ids.is_empty() {
                    return Err(SdkError::InvalidArgument(
                        "stream set must contain at least one stream".to_string(),
                    ));
                }
                for (index, web_id) in web_ids.iter().enumerate() {
                    validate_web_id(web_id)?;
                    if web_ids[..index].contains(web_id) {
                        return Err(SdkError::InvalidArgument(format!(
                            "stream {web_id} appears more than once in the set"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

pub(crate) fn validate_web_id(web_id: &str) -> SdkResult<()> {
    if web_id.trim().is_empty() {
        return Err(SdkError::InvalidArgument(
            "stream web id must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> SdkResult<T> {
    serde_json::from_value(value)
        .map_err(|err| SdkError::transport(format!("malformed {what} response: {err}")))
}

/// Pulls the `Items` array out of a listing response.
pub(crate) fn decode_items<T: DeserializeOwned>(
    mut response: Value,
    what: &str,
) -> SdkResult<Vec<T>> {
    match response.get_mut("Items").map(Value::take) {
        Some(items) => decode(items, what),
        None => Err(SdkError::transport(format!(
            "malformed {what} response: missing Items"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timed_value_missing_flags_take_service_defaults() {
        let value: TimedValue =
            decode(json!({ "Timestamp": "2024-01-01T00:00:00Z", "Value": 3.5 }), "value")
                .expect("value should decode");
        assert!(value.good);
        assert!(!value.questionable);
        assert_eq!(value.value, json!(3.5));
    }

    #[test]
    fn update_record_flattens_value_fields() {
        let record: UpdateRecord = decode(
            json!({
                "Source": "s1",
                "Timestamp": "2024-01-01T00:00:00Z",
                "Value": 1,
                "Action": "Add",
            }),
            "update",
        )
        .expect("record should decode");
        assert_eq!(record.source, "s1");
        assert_eq!(record.value.value, json!(1));
        assert_eq!(record.action.as_deref(), Some("Add"));
    }

    #[test]
    fn selection_validation_rejects_empty_and_duplicate_sets() {
        assert!(matches!(
            StreamSelection::set(Vec::<String>::new()).validate(),
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(matches!(
            StreamSelection::set(["a", "b", "a"]).validate(),
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(matches!(
            StreamSelection::single("  ").validate(),
            Err(SdkError::InvalidArgument(_))
        ));
        StreamSelection::set(["a", "b"])
            .validate()
            .expect("distinct ids are valid");
    }
}
