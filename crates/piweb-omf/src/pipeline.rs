//! Chunked, order-preserving delivery of value records into containers.
//!
//! Each container moves through `Pending -> Sending(n) -> Completed`, or stops
//! at `Failed(n)` on the first chunk the service refuses. Later chunks of that
//! container are never attempted; `resume_from` names the first input record
//! to send again once the cause is fixed.

use chrono::{DateTime, FixedOffset};
use futures::StreamExt;
use futures::stream;
use piweb_client::{SdkError, SdkResult, Transport};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::config::{IngestionConfig, TimestampOrdering};
use crate::messages::MessageType;
use crate::registry::OmfRegistry;
use crate::types::{OmfTimeSeriesData, OmfType, ValueRecord, validate_values};

#[derive(Clone, Debug, PartialEq)]
pub enum ContainerState {
    Pending,
    Sending(usize),
    Failed { chunk: usize, cause: SdkError },
    Completed,
}

/// A record left out before sending; `index` points into the caller's input.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordRejection {
    pub index: usize,
    pub error: SdkError,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContainerReport {
    pub container_id: String,
    pub state: ContainerState,
    pub chunk_sizes: Vec<usize>,
    pub delivered_chunks: usize,
    pub delivered_records: usize,
    pub rejected: Vec<RecordRejection>,
    /// Input index of the first accepted record that was not delivered.
    pub resume_from: Option<usize>,
}

impl ContainerReport {
    fn pending(
        container_id: &str,
        chunk_sizes: Vec<usize>,
        rejected: Vec<RecordRejection>,
    ) -> Self {
        Self {
            container_id: container_id.to_string(),
            state: ContainerState::Pending,
            chunk_sizes,
            delivered_chunks: 0,
            delivered_records: 0,
            rejected,
            resume_from: None,
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.chunk_sizes.len()
    }

    pub fn failed_at_chunk(&self) -> Option<usize> {
        match &self.state {
            ContainerState::Failed { chunk, .. } => Some(*chunk),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SdkError> {
        match &self.state {
            ContainerState::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn last_delivered_chunk(&self) -> Option<usize> {
        self.delivered_chunks.checked_sub(1)
    }

    pub fn is_complete(&self) -> bool {
        self.state == ContainerState::Completed
    }

    /// The suffix of `records` to pass to a follow-up `send`.
    pub fn remaining<'a>(&self, records: &'a [ValueRecord]) -> &'a [ValueRecord] {
        match self.resume_from {
            Some(index) => records.get(index..).unwrap_or_default(),
            None => &[],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    pub containers: BTreeMap<String, SdkResult<ContainerReport>>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.containers.values().all(|result| {
            matches!(result, Ok(report) if report.is_complete() && report.rejected.is_empty())
        })
    }

    pub fn delivered_records(&self) -> usize {
        self.containers
            .values()
            .filter_map(|result| result.as_ref().ok())
            .map(|report| report.delivered_records)
            .sum()
    }
}

#[derive(Clone, Debug)]
pub struct BatchIngestionPipeline<T> {
    registry: OmfRegistry<T>,
    config: IngestionConfig,
}

impl<T: Transport> BatchIngestionPipeline<T> {
    pub fn new(registry: OmfRegistry<T>, config: IngestionConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Sends `records` to one declared container in chunks of at most
    /// `batch_size`. Only configuration errors and unknown containers fail
    /// the call; everything else is reported.
    pub async fn send(
        &self,
        container_id: &str,
        records: &[ValueRecord],
    ) -> SdkResult<ContainerReport> {
        self.config.validate()?;
        let definition = self.registry.container_type(container_id)?;
        let index_property = definition
            .index_property()
            .ok_or_else(|| {
                SdkError::InvalidState(format!("type {} has no index property", definition.id))
            })?
            .to_string();

        let (accepted, rejected) = screen_records(&definition, self.config.ordering, records);
        let chunks: Vec<&[usize]> = accepted.chunks(self.config.batch_size).collect();
        let mut report = ContainerReport::pending(
            container_id,
            chunks.iter().map(|chunk| chunk.len()).collect(),
            rejected,
        );
        if !report.rejected.is_empty() {
            warn!(
                container_id,
                rejected = report.rejected.len(),
                "records rejected before sending"
            );
        }

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            report.state = ContainerState::Sending(chunk_index);
            let data = OmfTimeSeriesData {
                container_id: container_id.to_string(),
                values: chunk
                    .iter()
                    .map(|&index| records[index].to_json(&index_property))
                    .collect(),
            };
            match self
                .registry
                .sender()
                .send(MessageType::Data, std::slice::from_ref(&data))
                .await
            {
                Ok(()) => {
                    report.delivered_chunks += 1;
                    report.delivered_records += chunk.len();
                    debug!(
                        container_id,
                        chunk = chunk_index,
                        records = chunk.len(),
                        "chunk delivered"
                    );
                }
                Err(cause) => {
                    warn!(
                        container_id,
                        chunk = chunk_index,
                        error = %cause,
                        "chunk failed; later chunks not sent"
                    );
                    report.resume_from = chunk.first().copied();
                    report.state = ContainerState::Failed {
                        chunk: chunk_index,
                        cause,
                    };
                    return Ok(report);
                }
            }
        }

        report.state = ContainerState::Completed;
        info!(
            container_id,
            chunks = report.delivered_chunks,
            records = report.delivered_records,
            "container ingestion complete"
        );
        Ok(report)
    }

    /// Runs `send` for several distinct containers, up to
    /// `max_concurrent_containers` at a time.
    pub async fn send_many(
        &self,
        batches: Vec<(String, Vec<ValueRecord>)>,
    ) -> SdkResult<BatchReport> {
        self.config.validate()?;
        {
            let mut seen = BTreeSet::new();
            for (container_id, _) in &batches {
                if !seen.insert(container_id.as_str()) {
                    return Err(SdkError::InvalidArgument(format!(
                        "container {container_id} appears more than once; \
                         writes to one container must be sequential"
                    )));
                }
            }
        }

        let containers = stream::iter(batches)
            .map(|(container_id, records)| async move {
                let result = self.send(&container_id, &records).await;
                (container_id, result)
            })
            .buffer_unordered(self.config.max_concurrent_containers)
            .collect::<BTreeMap<_, _>>()
            .await;
        Ok(BatchReport { containers })
    }
}

/// Splits input indices into accepted and rejected, keeping input order.
fn screen_records(
    definition: &OmfType,
    ordering: TimestampOrdering,
    records: &[ValueRecord],
) -> (Vec<usize>, Vec<RecordRejection>) {
    let index_property = definition.index_property().unwrap_or_default();
    let mut accepted = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    let mut previous: Option<DateTime<FixedOffset>> = None;

    for (index, record) in records.iter().enumerate() {
        let outcome = if record.fields.contains_key(index_property) {
            Err(SdkError::InvalidArgument(format!(
                "record {index} sets index property {index_property} as a field"
            )))
        } else {
            validate_values(definition, &record.fields, false)
                .and_then(|()| check_order(ordering, previous, record.timestamp, index))
        };
        match outcome {
            Ok(()) => {
                previous = Some(record.timestamp);
                accepted.push(index);
            }
            Err(error) => rejected.push(RecordRejection { index, error }),
        }
    }
    (accepted, rejected)
}

fn check_order(
    ordering: TimestampOrdering,
    previous: Option<DateTime<FixedOffset>>,
    current: DateTime<FixedOffset>,
    index: usize,
) -> SdkResult<()> {
    let Some(previous) = previous else {
        return Ok(());
    };
    let in_order = match ordering {
        TimestampOrdering::Unchecked => true,
        TimestampOrdering::NonDecreasing => current >= previous,
        TimestampOrdering::Strict => current > previous,
    };
    if in_order {
        return Ok(());
    }
    Err(SdkError::InvalidArgument(format!(
        "record {index} at {current} is out of order after {previous}"
    )))
}
