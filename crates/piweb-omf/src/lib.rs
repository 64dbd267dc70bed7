#![doc = r#"
OMF bulk ingestion: schema declaration, chunked data delivery, and the
asset-hierarchy anchors containers are bound to.

| Item | Service interaction |
| --- | --- |
| `OmfRegistry::declare_type` | `POST omf` (`messagetype: type`) |
| `OmfRegistry::declare_container` | `POST omf` (`messagetype: container`) |
| `OmfRegistry::declare_asset` | `POST omf` (`messagetype: data`, `typeid` entries) |
| `BatchIngestionPipeline::send` | `POST omf` (`messagetype: data`, one message per chunk) |
| `HierarchyResolver::ensure` | `GET`/`POST assetdatabases/{webId}/elements` or `elements/{webId}/elements` |

Implementation notes:
- Declarations are content-hashed (BLAKE3 over canonical JSON); re-declaring
  identical content sends nothing, different content is a `Conflict`.
- Chunks of one container go out strictly in order and stop at the first failure.
- OMF is write-only; read ingested values back through `piweb-streams`.
"#]

pub mod config;
pub mod hierarchy;
pub mod messages;
pub mod pipeline;
pub mod registry;
pub mod types;

pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_CONTAINERS, DEFAULT_OMF_VERSION, IngestionConfig,
    OmfConfig, TimestampOrdering, VisibilityRetry,
};
pub use hierarchy::{Anchor, ElementDefinition, HierarchyResolver, ParentAnchor};
pub use messages::{MessageType, OMF_PATH, OmfSender, content_hash, omf_request};
pub use pipeline::{
    BatchIngestionPipeline, BatchReport, ContainerReport, ContainerState, RecordRejection,
};
pub use registry::{Acknowledgement, OmfRegistry};
pub use types::{
    Classification, OmfAsset, OmfContainer, OmfProperty, OmfTimeSeriesData, OmfType,
    PropertyType, ValueRecord,
};
