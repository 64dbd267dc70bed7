use chrono::{FixedOffset, TimeZone};
use piweb_client::{Method, MockHistorian, SdkError};
use piweb_streams::{
    BufferOption, RecordedQuery, StreamClient, StreamSetClient, StreamWrite, SummaryQuery,
    UpdateOption, ValueQuery, ValueWrite, WriteOptions,
};
use serde_json::json;

fn historian() -> MockHistorian {
    let mock = MockHistorian::new();
    mock.add_stream("a", "sinusoid");
    mock.add_stream("b", "cdt158");
    mock
}

#[tokio::test(flavor = "current_thread")]
async fn update_values_then_get_recorded_returns_written_values() {
    let mock = historian();
    let streams = StreamClient::new(mock.clone());
    let utc = FixedOffset::east_opt(0).expect("offset");
    let writes: Vec<ValueWrite> = (0..3)
        .map(|minute| {
            let timestamp = utc
                .with_ymd_and_hms(2024, 5, 1, 12, minute, 0)
                .single()
                .expect("timestamp");
            ValueWrite::new(timestamp, json!(minute * 10))
        })
        .collect();

    streams
        .update_values("a", &writes, WriteOptions::default())
        .await
        .expect("write should succeed");
    let recorded = streams
        .get_recorded(
            "a",
            &RecordedQuery {
                start_time: "*-1d".into(),
                end_time: "*".into(),
                ..RecordedQuery::default()
            },
        )
        .await
        .expect("read should succeed");

    let timestamps: Vec<_> = recorded.iter().map(|value| value.timestamp.as_str()).collect();
    assert_eq!(
        timestamps,
        vec![
            "2024-05-01T12:00:00+00:00",
            "2024-05-01T12:01:00+00:00",
            "2024-05-01T12:02:00+00:00",
        ]
    );
    assert!(recorded.iter().all(|value| value.good));

    let request = &mock.requests_to(Method::Get, "streams/a/recorded")[0];
    assert_eq!(request.query_value("startTime"), Some("*-1d"));
    assert_eq!(request.query_value("endTime"), Some("*"));
}

#[tokio::test(flavor = "current_thread")]
async fn update_value_forwards_write_options_and_get_value_reads_it_back() {
    let mock = historian();
    let streams = StreamClient::new(mock.clone());
    streams
        .update_value(
            "a",
            &ValueWrite::new("2024-05-01T00:00:00Z", json!(42.5)),
            WriteOptions {
                buffer_option: Some(BufferOption::Buffer),
                update_option: Some(UpdateOption::Replace),
            },
        )
        .await
        .expect("write should succeed");

    let request = &mock.requests_to(Method::Put, "streams/a/value")[0];
    assert_eq!(request.query_value("bufferOption"), Some("Buffer"));
    assert_eq!(request.query_value("updateOption"), Some("Replace"));

    let current = streams
        .get_value("a", &ValueQuery::default())
        .await
        .expect("read should succeed");
    assert_eq!(current.value, json!(42.5));
    assert_eq!(current.timestamp, "2024-05-01T00:00:00Z");
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_stream_read_expected_not_found() {
    let streams = StreamClient::new(historian());
    let error = streams
        .get_recorded("missing", &RecordedQuery::default())
        .await
        .expect_err("unknown stream");
    assert!(matches!(error, SdkError::NotFound { .. }));
}

#[tokio::test(flavor = "current_thread")]
async fn stream_set_write_and_read_cover_every_stream() {
    let mock = historian();
    let sets = StreamSetClient::new(mock.clone());
    sets.update_values(&[
        StreamWrite {
            web_id: "a".to_string(),
            value: ValueWrite::new("2024-05-01T00:00:00Z", json!(1)),
        },
        StreamWrite {
            web_id: "b".to_string(),
            value: ValueWrite::new("2024-05-01T00:00:00Z", json!(2)),
        },
    ])
    .await
    .expect("set write should succeed");

    let web_ids = vec!["a".to_string(), "b".to_string()];
    let current = sets
        .get_values(&web_ids, &ValueQuery::default())
        .await
        .expect("set read should succeed");
    let pairs: Vec<_> = current
        .iter()
        .map(|item| (item.web_id.as_str(), item.value.value.clone()))
        .collect();
    assert_eq!(pairs, vec![("a", json!(1)), ("b", json!(2))]);
    assert_eq!(current[1].name, "cdt158");

    let request = &mock.requests_to(Method::Get, "streamsets/value")[0];
    assert_eq!(request.query_values("webId"), vec!["a", "b"]);

    let recorded = sets
        .get_recorded(&web_ids, &RecordedQuery::default())
        .await
        .expect("set recorded should succeed");
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].items.len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn stream_set_summaries_send_repeated_summary_types() {
    let mock = historian();
    let sets = StreamSetClient::new(mock.clone());
    let summaries = sets
        .get_summaries(
            &["a".to_string()],
            &SummaryQuery {
                summary_types: vec!["Average".to_string(), "Count".to_string()],
                summary_duration: Some("1h".to_string()),
                ..SummaryQuery::default()
            },
        )
        .await
        .expect("summaries should succeed");
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].items.is_empty());

    let request = &mock.requests_to(Method::Get, "streamsets/summaries")[0];
    assert_eq!(request.query_values("summaryType"), vec!["Average", "Count"]);
    assert_eq!(request.query_value("summaryDuration"), Some("1h"));
}

#[tokio::test(flavor = "current_thread")]
async fn empty_stream_set_expected_invalid_argument() {
    let sets = StreamSetClient::new(historian());
    let error = sets
        .get_values(&[], &ValueQuery::default())
        .await
        .expect_err("empty set");
    assert!(matches!(error, SdkError::InvalidArgument(_)));
    let error = sets.update_values(&[]).await.expect_err("empty write");
    assert!(matches!(error, SdkError::InvalidArgument(_)));
}
