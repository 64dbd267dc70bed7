use chrono::DateTime;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use piweb_client::{ClientConfig, MockHistorian, ReqwestTransport, Transport};
use piweb_omf::{
    Anchor, BatchIngestionPipeline, ContainerReport, ContainerState, ElementDefinition,
    HierarchyResolver, IngestionConfig, OmfConfig, OmfContainer, OmfProperty, OmfRegistry, OmfType,
    ParentAnchor, PropertyType, ValueRecord, VisibilityRetry,
};
use piweb_streams::{
    ChangeFeedClient, Marker, PollOptions, RecordedQuery, StreamClient, StreamSelection,
    UpdateBatch,
};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const MOCK_DATABASE_PATH: &str = "\\\\mock\\Database";

#[derive(Parser, Debug)]
#[command(name = "piweb-cli")]
#[command(about = "Command-line access to a PI Web API historian")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Ingest(IngestArgs),
    Tail(TailArgs),
    Recorded(RecordedArgs),
    EnsurePath(EnsurePathArgs),
}

#[derive(clap::Args, Debug)]
struct IngestArgs {
    /// JSON array of objects with a `timestamp` and one or more value fields.
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    container: String,
    #[arg(long)]
    type_id: Option<String>,
    #[arg(long)]
    data_server: Option<String>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long, value_enum, default_value_t = Backend::Http)]
    backend: Backend,
}

#[derive(clap::Args, Debug)]
struct TailArgs {
    #[arg(long = "stream", required = true)]
    streams: Vec<String>,
    /// Resume from a previously printed marker instead of registering.
    #[arg(long)]
    marker: Option<String>,
    #[arg(long)]
    max_batches: Option<usize>,
    #[arg(long, default_value_t = 5000)]
    interval_ms: u64,
    #[arg(long, action = ArgAction::SetTrue)]
    emit_empty: bool,
    #[arg(long, value_enum, default_value_t = Backend::Http)]
    backend: Backend,
}

#[derive(clap::Args, Debug)]
struct RecordedArgs {
    #[arg(long)]
    stream: String,
    #[arg(long)]
    start_time: Option<String>,
    #[arg(long)]
    end_time: Option<String>,
    #[arg(long)]
    max_count: Option<u32>,
    #[arg(long, value_enum, default_value_t = Backend::Http)]
    backend: Backend,
}

#[derive(clap::Args, Debug)]
struct EnsurePathArgs {
    #[arg(long)]
    database: String,
    /// Element names separated by `/` or `\`.
    #[arg(long)]
    path: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, value_enum, default_value_t = Backend::Http)]
    backend: Backend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Http,
    Mock,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Ingest(args) => ingest_command(args).await,
        Commands::Tail(args) => tail_command(args).await,
        Commands::Recorded(args) => recorded_command(args).await,
        Commands::EnsurePath(args) => ensure_path_command(args).await,
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn ingest_command(args: IngestArgs) -> Result<ExitCode, String> {
    let rows = load_rows(&args.file)?;
    let records = rows_to_records(&rows)?;
    let properties = infer_properties(&rows)?;

    let type_id = args
        .type_id
        .clone()
        .unwrap_or_else(|| format!("{}.type", args.container));
    let omf_config = match &args.data_server {
        Some(web_id) => OmfConfig::for_data_server(web_id.clone()),
        None => OmfConfig::default(),
    };
    let ingestion = match args.batch_size {
        Some(size) => IngestionConfig::with_batch_size(size),
        None => IngestionConfig::default(),
    };

    let transport = build_transport(args.backend)?;
    let registry = OmfRegistry::new(transport, omf_config);
    registry
        .declare_type(&OmfType::dynamic(type_id.clone(), "timestamp", properties))
        .await
        .map_err(|error| error.to_string())?;
    registry
        .declare_container(&OmfContainer::new(args.container.clone(), type_id))
        .await
        .map_err(|error| error.to_string())?;

    let pipeline = BatchIngestionPipeline::new(registry, ingestion);
    let report = pipeline
        .send(&args.container, &records)
        .await
        .map_err(|error| error.to_string())?;

    print_json(&report_json(&report))?;
    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn tail_command(args: TailArgs) -> Result<ExitCode, String> {
    let selection = match args.streams.as_slice() {
        [single] => StreamSelection::single(single.clone()),
        many => StreamSelection::set(many.iter().cloned()),
    };

    let mock = (args.backend == Backend::Mock).then(MockHistorian::new);
    let transport: Arc<dyn Transport> = match &mock {
        Some(mock) => {
            for web_id in selection.web_ids() {
                mock.add_stream(web_id, web_id);
            }
            Arc::new(mock.clone())
        }
        None => build_transport(args.backend)?,
    };

    let feed = ChangeFeedClient::new(transport);
    let marker = match &args.marker {
        Some(raw) => {
            let marker = Marker::new(raw.clone()).map_err(|error| error.to_string())?;
            feed.resume(selection.clone(), marker.clone())
                .map_err(|error| error.to_string())?;
            marker
        }
        None => feed
            .register(selection.clone(), None)
            .await
            .map_err(|error| error.to_string())?,
    };
    debug!(marker = %marker, "tailing from marker");
    println!("{}", json!({ "marker": marker.as_str() }));

    if let Some(mock) = &mock {
        seed_mock_values(mock, &selection);
    }

    let options = PollOptions::every(Duration::from_millis(args.interval_ms))
        .emit_empty(args.emit_empty);
    let updates = feed.poll(marker, options);
    let mut updates = match args.max_batches {
        Some(limit) => updates.take(limit).boxed(),
        None => updates,
    };
    while let Some(batch) = updates.next().await {
        let batch = batch.map_err(|error| error.to_string())?;
        print_json(&batch_json(&batch))?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn recorded_command(args: RecordedArgs) -> Result<ExitCode, String> {
    let transport: Arc<dyn Transport> = match args.backend {
        Backend::Mock => {
            let mock = MockHistorian::new();
            mock.add_stream(&args.stream, &args.stream);
            seed_mock_values(&mock, &StreamSelection::single(args.stream.clone()));
            Arc::new(mock)
        }
        Backend::Http => build_transport(args.backend)?,
    };

    let query = RecordedQuery {
        start_time: args.start_time.into(),
        end_time: args.end_time.into(),
        max_count: args.max_count,
        ..RecordedQuery::default()
    };
    let values = StreamClient::new(transport)
        .get_recorded(&args.stream, &query)
        .await
        .map_err(|error| error.to_string())?;
    for value in values {
        let line = serde_json::to_string(&value).map_err(|error| error.to_string())?;
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn ensure_path_command(args: EnsurePathArgs) -> Result<ExitCode, String> {
    let names: Vec<&str> = args
        .path
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();
    if names.is_empty() {
        return Err("--path must name at least one element".to_string());
    }

    let (transport, retry): (Arc<dyn Transport>, VisibilityRetry) = match args.backend {
        Backend::Mock => {
            let mock = MockHistorian::new();
            mock.add_database(&args.database, MOCK_DATABASE_PATH);
            (Arc::new(mock), VisibilityRetry::immediate(5))
        }
        Backend::Http => (build_transport(args.backend)?, VisibilityRetry::default()),
    };

    let definition = args
        .description
        .as_deref()
        .map(ElementDefinition::described)
        .unwrap_or_default();
    let segments: Vec<(&str, ElementDefinition)> = names
        .iter()
        .map(|name| (*name, definition.clone()))
        .collect();
    let anchors = HierarchyResolver::with_retry(transport, retry)
        .ensure_path(&ParentAnchor::Database(args.database.clone()), &segments)
        .await
        .map_err(|error| error.to_string())?;
    for anchor in &anchors {
        print_json(&anchor_json(anchor))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn build_transport(backend: Backend) -> Result<Arc<dyn Transport>, String> {
    match backend {
        Backend::Http => {
            let config = ClientConfig::from_env();
            debug!(base_url = %config.base_url, "using http backend");
            let transport = ReqwestTransport::new(&config).map_err(|error| error.to_string())?;
            Ok(Arc::new(transport))
        }
        Backend::Mock => Ok(Arc::new(MockHistorian::new())),
    }
}

/// Writes a short ramp into every selected stream of the mock backend.
fn seed_mock_values(mock: &MockHistorian, selection: &StreamSelection) {
    for web_id in selection.web_ids() {
        for step in 0..3 {
            mock.push_value(
                web_id,
                &format!("2024-01-01T00:00:0{step}Z"),
                json!(step as f64 * 0.5),
            );
        }
    }
}

fn load_rows(path: &Path) -> Result<Vec<Map<String, Value>>, String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("failed reading records file '{}': {e}", path.display()))?;
    let parsed: Value = serde_json::from_str(&source)
        .map_err(|e| format!("records file '{}' is not valid JSON: {e}", path.display()))?;
    let Value::Array(items) = parsed else {
        return Err("records file must contain a JSON array".to_string());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(row) => Ok(row),
            _ => Err(format!("record {index} is not a JSON object")),
        })
        .collect()
}

fn rows_to_records(rows: &[Map<String, Value>]) -> Result<Vec<ValueRecord>, String> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let raw = row
                .get("timestamp")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("record {index} has no string 'timestamp'"))?;
            let timestamp = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| format!("record {index} has invalid timestamp '{raw}': {e}"))?;
            let mut fields = row.clone();
            fields.remove("timestamp");
            Ok(ValueRecord::new(timestamp, fields))
        })
        .collect()
}

/// Property kinds taken from the first record that carries each field.
fn infer_properties(rows: &[Map<String, Value>]) -> Result<Vec<(String, OmfProperty)>, String> {
    let mut properties: Vec<(String, OmfProperty)> = Vec::new();
    for row in rows {
        for (field, value) in row {
            if field == "timestamp" || value.is_null() {
                continue;
            }
            if properties.iter().any(|(name, _)| name == field) {
                continue;
            }
            let kind = match value {
                Value::Bool(_) => PropertyType::Boolean,
                Value::Number(_) => PropertyType::Number,
                Value::String(_) => PropertyType::String,
                _ => return Err(format!("field '{field}' must be a scalar")),
            };
            properties.push((field.clone(), OmfProperty::new(kind)));
        }
    }
    if properties.is_empty() {
        return Err("records carry no value fields".to_string());
    }
    Ok(properties)
}

fn report_json(report: &ContainerReport) -> Value {
    let state = match &report.state {
        ContainerState::Pending => "pending",
        ContainerState::Sending(_) => "sending",
        ContainerState::Failed { .. } => "failed",
        ContainerState::Completed => "completed",
    };
    json!({
        "container": report.container_id,
        "state": state,
        "chunks": report.chunk_sizes,
        "delivered_chunks": report.delivered_chunks,
        "delivered_records": report.delivered_records,
        "failed_at_chunk": report.failed_at_chunk(),
        "error": report.error().map(ToString::to_string),
        "rejected": report
            .rejected
            .iter()
            .map(|rejection| {
                json!({ "index": rejection.index, "error": rejection.error.to_string() })
            })
            .collect::<Vec<_>>(),
        "resume_from": report.resume_from,
    })
}

fn batch_json(batch: &UpdateBatch) -> Value {
    json!({
        "marker": batch.marker.as_str(),
        "records": batch.records,
    })
}

fn anchor_json(anchor: &Anchor) -> Value {
    json!({
        "web_id": anchor.web_id,
        "name": anchor.name,
        "path": anchor.path,
    })
}

fn print_json(value: &Value) -> Result<(), String> {
    let line = serde_json::to_string(value).map_err(|error| error.to_string())?;
    println!("{line}");
    Ok(())
}
