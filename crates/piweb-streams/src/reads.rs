//! Point, range, and summary reads plus value writes for single streams and
//! stream sets.

use piweb_client::time::encode;
use piweb_client::{
    SdkError, SdkResult, TimeValue, Transport, TransportRequest, encode_path_segment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{TimedValue, decode, decode_items, validate_web_id};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueQuery {
    pub time: TimeValue,
    pub selected_fields: Option<String>,
    pub desired_units: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordedQuery {
    pub start_time: TimeValue,
    pub end_time: TimeValue,
    pub boundary_type: Option<String>,
    pub max_count: Option<u32>,
    pub include_filtered_values: bool,
    pub filter_expression: Option<String>,
    pub selected_fields: Option<String>,
    pub time_zone: Option<String>,
    pub desired_units: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterpolatedQuery {
    pub start_time: TimeValue,
    pub end_time: TimeValue,
    pub interval: Option<String>,
    pub sync_time: TimeValue,
    pub sync_time_boundary_type: Option<String>,
    pub include_filtered_values: bool,
    pub filter_expression: Option<String>,
    pub selected_fields: Option<String>,
    pub time_zone: Option<String>,
    pub desired_units: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlotQuery {
    pub start_time: TimeValue,
    pub end_time: TimeValue,
    pub intervals: Option<u32>,
    pub selected_fields: Option<String>,
    pub time_zone: Option<String>,
    pub desired_units: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryQuery {
    pub start_time: TimeValue,
    pub end_time: TimeValue,
    /// Repeated once per entry (`Average`, `Maximum`, `Count`, ...).
    pub summary_types: Vec<String>,
    pub summary_duration: Option<String>,
    pub calculation_basis: Option<String>,
    pub time_type: Option<String>,
    pub filter_expression: Option<String>,
    pub selected_fields: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferOption {
    DoNotBuffer,
    BufferIfPossible,
    Buffer,
}

impl BufferOption {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DoNotBuffer => "DoNotBuffer",
            Self::BufferIfPossible => "BufferIfPossible",
            Self::Buffer => "Buffer",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOption {
    Replace,
    Insert,
    NoReplace,
    ReplaceOnly,
    InsertNoCompression,
    Remove,
}

impl UpdateOption {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "Replace",
            Self::Insert => "Insert",
            Self::NoReplace => "NoReplace",
            Self::ReplaceOnly => "ReplaceOnly",
            Self::InsertNoCompression => "InsertNoCompression",
            Self::Remove => "Remove",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub buffer_option: Option<BufferOption>,
    pub update_option: Option<UpdateOption>,
}

/// A value to write, with the time it applies to.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueWrite {
    pub timestamp: TimeValue,
    pub value: Value,
}

impl ValueWrite {
    pub fn new(timestamp: impl Into<TimeValue>, value: Value) -> Self {
        Self {
            timestamp: timestamp.into(),
            value,
        }
    }

    fn to_json(&self) -> SdkResult<Value> {
        let mut body = json!({ "Value": self.value });
        if let Some(timestamp) = encode(&self.timestamp)? {
            body["Timestamp"] = Value::String(timestamp);
        }
        Ok(body)
    }
}

/// One entry of a stream-set write.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamWrite {
    pub web_id: String,
    pub value: ValueWrite,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryValue {
    #[serde(rename = "Type")]
    pub summary_type: String,
    pub value: TimedValue,
}

/// Per-stream result of a stream-set read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamItems<T> {
    pub web_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamValue {
    pub web_id: String,
    #[serde(default)]
    pub name: String,
    pub value: TimedValue,
}

fn time_param(
    request: TransportRequest,
    key: &str,
    value: &TimeValue,
) -> SdkResult<TransportRequest> {
    Ok(request.query_opt(key, encode(value)?))
}

fn common_params(
    request: TransportRequest,
    selected_fields: &Option<String>,
    time_zone: &Option<String>,
    desired_units: &Option<String>,
) -> TransportRequest {
    request
        .query_opt("selectedFields", selected_fields.as_deref())
        .query_opt("timeZone", time_zone.as_deref())
        .query_opt("desiredUnits", desired_units.as_deref())
}

fn value_params(request: TransportRequest, query: &ValueQuery) -> SdkResult<TransportRequest> {
    Ok(time_param(request, "time", &query.time)?
        .query_opt("selectedFields", query.selected_fields.as_deref())
        .query_opt("desiredUnits", query.desired_units.as_deref()))
}

fn recorded_params(
    request: TransportRequest,
    query: &RecordedQuery,
) -> SdkResult<TransportRequest> {
    let request = time_param(request, "startTime", &query.start_time)?;
    let request = time_param(request, "endTime", &query.end_time)?
        .query("includeFilteredValues", query.include_filtered_values)
        .query_opt("boundaryType", query.boundary_type.as_deref())
        .query_opt("maxCount", query.max_count)
        .query_opt("filterExpression", query.filter_expression.as_deref());
    Ok(common_params(
        request,
        &query.selected_fields,
        &query.time_zone,
        &query.desired_units,
    ))
}

fn interpolated_params(
    request: TransportRequest,
    query: &InterpolatedQuery,
) -> SdkResult<TransportRequest> {
    let request = time_param(request, "startTime", &query.start_time)?;
    let request = time_param(request, "endTime", &query.end_time)?
        .query("includeFilteredValues", query.include_filtered_values)
        .query_opt("interval", query.interval.as_deref())
        .query_opt("filterExpression", query.filter_expression.as_deref());
    let request = time_param(request, "syncTime", &query.sync_time)?
        .query_opt("syncTimeBoundaryType", query.sync_time_boundary_type.as_deref());
    Ok(common_params(
        request,
        &query.selected_fields,
        &query.time_zone,
        &query.desired_units,
    ))
}

fn plot_params(request: TransportRequest, query: &PlotQuery) -> SdkResult<TransportRequest> {
    let request = time_param(request, "startTime", &query.start_time)?;
    let request =
        time_param(request, "endTime", &query.end_time)?.query_opt("intervals", query.intervals);
    Ok(common_params(
        request,
        &query.selected_fields,
        &query.time_zone,
        &query.desired_units,
    ))
}

fn summary_params(request: TransportRequest, query: &SummaryQuery) -> SdkResult<TransportRequest> {
    let request = time_param(request, "startTime", &query.start_time)?;
    let request = time_param(request, "endTime", &query.end_time)?
        .query_all("summaryType", &query.summary_types)
        .query_opt("summaryDuration", query.summary_duration.as_deref())
        .query_opt("calculationBasis", query.calculation_basis.as_deref())
        .query_opt("timeType", query.time_type.as_deref())
        .query_opt("filterExpression", query.filter_expression.as_deref());
    Ok(common_params(request, &query.selected_fields, &query.time_zone, &None))
}

fn write_params(request: TransportRequest, options: WriteOptions) -> TransportRequest {
    request
        .query_opt("bufferOption", options.buffer_option.map(BufferOption::as_str))
        .query_opt("updateOption", options.update_option.map(UpdateOption::as_str))
}

fn stream_path(web_id: &str, leaf: &str) -> SdkResult<String> {
    validate_web_id(web_id)?;
    Ok(format!("streams/{}/{leaf}", encode_path_segment(web_id)))
}

fn ensure_web_ids(web_ids: &[String]) -> SdkResult<()> {
    if web_ids.is_empty() {
        return Err(SdkError::InvalidArgument(
            "stream set read needs at least one web id".to_string(),
        ));
    }
    web_ids.iter().try_for_each(|web_id| validate_web_id(web_id))
}

#[derive(Clone, Debug)]
pub struct StreamClient<T> {
    transport: T,
}

impl<T: Transport> StreamClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn get_value(&self, web_id: &str, query: &ValueQuery) -> SdkResult<TimedValue> {
        let request = value_params(TransportRequest::get(stream_path(web_id, "value")?), query)?;
        decode(self.transport.request(request).await?, "stream value")
    }

    pub async fn get_recorded(
        &self,
        web_id: &str,
        query: &RecordedQuery,
    ) -> SdkResult<Vec<TimedValue>> {
        let request =
            recorded_params(TransportRequest::get(stream_path(web_id, "recorded")?), query)?;
        decode_items(self.transport.request(request).await?, "recorded values")
    }

    pub async fn get_interpolated(
        &self,
        web_id: &str,
        query: &InterpolatedQuery,
    ) -> SdkResult<Vec<TimedValue>> {
        let request = interpolated_params(
            TransportRequest::get(stream_path(web_id, "interpolated")?),
            query,
        )?;
        decode_items(self.transport.request(request).await?, "interpolated values")
    }

    pub async fn get_plot(&self, web_id: &str, query: &PlotQuery) -> SdkResult<Vec<TimedValue>> {
        let request = plot_params(TransportRequest::get(stream_path(web_id, "plot")?), query)?;
        decode_items(self.transport.request(request).await?, "plot values")
    }

    pub async fn get_summary(
        &self,
        web_id: &str,
        query: &SummaryQuery,
    ) -> SdkResult<Vec<SummaryValue>> {
        let request =
            summary_params(TransportRequest::get(stream_path(web_id, "summary")?), query)?;
        decode_items(self.transport.request(request).await?, "summary values")
    }

    pub async fn update_value(
        &self,
        web_id: &str,
        value: &ValueWrite,
        options: WriteOptions,
    ) -> SdkResult<()> {
        let request = write_params(TransportRequest::put(stream_path(web_id, "value")?), options)
            .body(value.to_json()?);
        self.transport.request(request).await?;
        Ok(())
    }

    pub async fn update_values(
        &self,
        web_id: &str,
        values: &[ValueWrite],
        options: WriteOptions,
    ) -> SdkResult<()> {
        let body = values
            .iter()
            .map(ValueWrite::to_json)
            .collect::<SdkResult<Vec<_>>>()?;
        let request =
            write_params(TransportRequest::post(stream_path(web_id, "recorded")?), options)
                .body(Value::Array(body));
        self.transport.request(request).await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct StreamSetClient<T> {
    transport: T,
}

impl<T: Transport> StreamSetClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    fn set_request(web_ids: &[String], leaf: &str) -> SdkResult<TransportRequest> {
        ensure_web_ids(web_ids)?;
        Ok(TransportRequest::get(format!("streamsets/{leaf}")).query_all("webId", web_ids))
    }

    pub async fn get_values(
        &self,
        web_ids: &[String],
        query: &ValueQuery,
    ) -> SdkResult<Vec<StreamValue>> {
        let request = value_params(Self::set_request(web_ids, "value")?, query)?;
        decode_items(self.transport.request(request).await?, "stream set values")
    }

    pub async fn get_recorded(
        &self,
        web_ids: &[String],
        query: &RecordedQuery,
    ) -> SdkResult<Vec<StreamItems<TimedValue>>> {
        let request = recorded_params(Self::set_request(web_ids, "recorded")?, query)?;
        decode_items(self.transport.request(request).await?, "stream set recorded values")
    }

    pub async fn get_interpolated(
        &self,
        web_ids: &[String],
        query: &InterpolatedQuery,
    ) -> SdkResult<Vec<StreamItems<TimedValue>>> {
        let request = interpolated_params(Self::set_request(web_ids, "interpolated")?, query)?;
        decode_items(self.transport.request(request).await?, "stream set interpolated values")
    }

    pub async fn get_plot(
        &self,
        web_ids: &[String],
        query: &PlotQuery,
    ) -> SdkResult<Vec<StreamItems<TimedValue>>> {
        let request = plot_params(Self::set_request(web_ids, "plot")?, query)?;
        decode_items(self.transport.request(request).await?, "stream set plot values")
    }

    pub async fn get_summaries(
        &self,
        web_ids: &[String],
        query: &SummaryQuery,
    ) -> SdkResult<Vec<StreamItems<SummaryValue>>> {
        let request = summary_params(Self::set_request(web_ids, "summaries")?, query)?;
        decode_items(self.transport.request(request).await?, "stream set summaries")
    }

    /// Writes one value per entry in a single request.
    pub async fn update_values(&self, writes: &[StreamWrite]) -> SdkResult<()> {
        if writes.is_empty() {
            return Err(SdkError::InvalidArgument(
                "stream set write needs at least one value".to_string(),
            ));
        }
        let mut body = Vec::with_capacity(writes.len());
        for write in writes {
            validate_web_id(&write.web_id)?;
            body.push(json!({ "WebId": write.web_id, "Value": write.value.to_json()? }));
        }
        let request = TransportRequest::put("streamsets/value").body(Value::Array(body));
        self.transport.request(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn recorded_params_omit_unset_values_but_always_send_filter_flag() {
        let request = recorded_params(TransportRequest::get("streams/a/recorded"), &RecordedQuery {
            start_time: "*-1d".into(),
            max_count: Some(100),
            ..RecordedQuery::default()
        })
        .expect("params");

        assert_eq!(request.query_value("startTime"), Some("*-1d"));
        assert_eq!(request.query_value("endTime"), None);
        assert_eq!(request.query_value("includeFilteredValues"), Some("false"));
        assert_eq!(request.query_value("maxCount"), Some("100"));
        assert_eq!(request.query_value("boundaryType"), None);
    }

    #[test]
    fn interpolated_params_encode_structured_sync_time() {
        let offset = FixedOffset::east_opt(2 * 3600).expect("offset");
        let sync = offset
            .with_ymd_and_hms(2024, 3, 1, 6, 0, 0)
            .single()
            .expect("timestamp");
        let request = interpolated_params(
            TransportRequest::get("streams/a/interpolated"),
            &InterpolatedQuery {
                interval: Some("1h".to_string()),
                sync_time: sync.into(),
                ..InterpolatedQuery::default()
            },
        )
        .expect("params");

        assert_eq!(request.query_value("syncTime"), Some("2024-03-01T06:00:00+02:00"));
        assert_eq!(request.query_value("interval"), Some("1h"));
    }

    #[test]
    fn summary_params_repeat_summary_type() {
        let request = summary_params(TransportRequest::get("streams/a/summary"), &SummaryQuery {
            summary_types: vec!["Average".to_string(), "Maximum".to_string()],
            ..SummaryQuery::default()
        })
        .expect("params");
        assert_eq!(request.query_values("summaryType"), vec!["Average", "Maximum"]);
    }

    #[test]
    fn write_params_map_options_to_service_names() {
        let request = write_params(TransportRequest::put("streams/a/value"), WriteOptions {
            buffer_option: Some(BufferOption::BufferIfPossible),
            update_option: Some(UpdateOption::NoReplace),
        });
        assert_eq!(request.query_value("bufferOption"), Some("BufferIfPossible"));
        assert_eq!(request.query_value("updateOption"), Some("NoReplace"));
    }

    #[test]
    fn stream_path_rejects_blank_web_id() {
        assert!(matches!(stream_path(" ", "value"), Err(SdkError::InvalidArgument(_))));
    }
}
