//! Wire formatting for time parameters.
//!
//! Strings are forwarded untouched so protocol keywords (`*`, `*-1d`, `Today`)
//! and relative expressions reach the service as written. Structured
//! timestamps are rendered as ISO 8601 with an explicit offset.

use crate::{SdkError, SdkResult};
use chrono::{DateTime, FixedOffset, Local, LocalResult, NaiveDateTime, SecondsFormat, TimeZone};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TimeValue {
    /// No time constraint; the parameter is omitted from the request.
    #[default]
    Unbounded,
    Literal(String),
    Zoned(DateTime<FixedOffset>),
    /// Wall-clock time without a zone, interpreted in the caller's local zone.
    Local(NaiveDateTime),
}

impl TimeValue {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// Accepts the loosely typed time values found in JSON payloads.
    pub fn from_json(value: &Value) -> SdkResult<Self> {
        match value {
            Value::Null => Ok(Self::Unbounded),
            Value::String(text) => Ok(Self::Literal(text.clone())),
            other => Err(SdkError::InvalidArgument(format!(
                "time value must be a string, timestamp, or null, got {}",
                json_kind(other)
            ))),
        }
    }
}

impl From<&str> for TimeValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for TimeValue {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<NaiveDateTime> for TimeValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::Local(value)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for TimeValue {
    fn from(value: DateTime<Tz>) -> Self {
        Self::Zoned(value.fixed_offset())
    }
}

impl<T: Into<TimeValue>> From<Option<T>> for TimeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Renders a time value for the wire; `None` means "omit the parameter".
pub fn encode(value: &TimeValue) -> SdkResult<Option<String>> {
    match value {
        TimeValue::Unbounded => Ok(None),
        TimeValue::Literal(text) => Ok(Some(text.clone())),
        TimeValue::Zoned(timestamp) => Ok(Some(format_timestamp(timestamp))),
        TimeValue::Local(naive) => {
            let resolved = match Local.from_local_datetime(naive) {
                LocalResult::Single(timestamp) => timestamp,
                // Repeated wall-clock hour: take the first occurrence.
                LocalResult::Ambiguous(earliest, _) => earliest,
                LocalResult::None => {
                    return Err(SdkError::InvalidArgument(format!(
                        "local time {naive} does not exist in the local time zone"
                    )));
                }
            };
            Ok(Some(format_timestamp(&resolved.fixed_offset())))
        }
    }
}

pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    #[test]
    fn encode_literal_passes_through_unmodified() {
        for literal in ["*", "*-1d", "Today", "not even a time", ""] {
            assert_eq!(
                encode(&TimeValue::from(literal)).expect("literal should encode"),
                Some(literal.to_string())
            );
        }
    }

    #[test]
    fn encode_unbounded_expected_none() {
        assert_eq!(encode(&TimeValue::Unbounded).expect("encode"), None);
        assert_eq!(
            encode(&TimeValue::from(None::<&str>)).expect("encode"),
            None
        );
    }

    #[test]
    fn encode_zoned_preserves_explicit_offset() {
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).expect("valid offset");
        let timestamp = offset
            .with_ymd_and_hms(2024, 3, 1, 12, 30, 15)
            .single()
            .expect("valid timestamp");

        let encoded = encode(&TimeValue::from(timestamp))
            .expect("encode")
            .expect("present");
        assert_eq!(encoded, "2024-03-01T12:30:15+05:30");
    }

    #[test]
    fn encode_utc_uses_numeric_offset_and_round_trips() {
        let timestamp = Utc
            .with_ymd_and_hms(2023, 11, 5, 1, 2, 3)
            .single()
            .expect("valid timestamp")
            + chrono::Duration::microseconds(250_000);

        let encoded = encode(&TimeValue::from(timestamp))
            .expect("encode")
            .expect("present");
        assert_eq!(encoded, "2023-11-05T01:02:03.250+00:00");
        let parsed = DateTime::parse_from_rfc3339(&encoded).expect("reference parser");
        assert_eq!(parsed, timestamp);
    }

    #[test]
    fn encode_local_carries_local_offset() {
        let naive = NaiveDate::from_ymd_opt(2024, 6, 15)
            .and_then(|date| date.and_hms_opt(8, 0, 0))
            .expect("valid naive time");

        let encoded = encode(&TimeValue::from(naive))
            .expect("encode")
            .expect("present");
        let parsed = DateTime::parse_from_rfc3339(&encoded).expect("reference parser");
        assert_eq!(parsed.naive_local(), naive);
        let expected = Local
            .from_local_datetime(&naive)
            .earliest()
            .expect("local time exists");
        assert_eq!(parsed.offset(), expected.offset());
    }

    #[test]
    fn from_json_rejects_other_kinds_naming_them() {
        assert_eq!(
            TimeValue::from_json(&json!("*-8h")).expect("string"),
            TimeValue::Literal("*-8h".to_string())
        );
        assert_eq!(
            TimeValue::from_json(&Value::Null).expect("null"),
            TimeValue::Unbounded
        );
        let error = TimeValue::from_json(&json!(1700000000)).expect_err("number rejected");
        assert!(
            matches!(error, SdkError::InvalidArgument(ref message) if message.contains("number"))
        );
    }
}
