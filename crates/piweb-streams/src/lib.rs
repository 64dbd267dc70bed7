#![doc = r#"
Incremental change feed and stream accessors.

Operation mapping:

| Method | Service route |
| --- | --- |
| `ChangeFeedClient::register` (single) | `POST streams/{webId}/updates` |
| `ChangeFeedClient::register` (set) | `POST streamsets/updates?webId=..` |
| `ChangeFeedClient::retrieve` (single) | `GET streams/updates/{marker}` |
| `ChangeFeedClient::retrieve` (set) | `GET streamsets/updates?marker=..` |
| `StreamClient::get_value` / `update_value` | `GET` / `PUT streams/{webId}/value` |
| `StreamClient::get_recorded` / `update_values` | `GET` / `POST streams/{webId}/recorded` |
| `StreamClient::get_interpolated`, `get_plot`, `get_summary` | `GET streams/{webId}/interpolated\|plot\|summary` |
| `StreamSetClient::*` | `streamsets/value\|recorded\|interpolated\|plot\|summaries` |

Implementation notes:
- Markers are opaque; the only state worth persisting is `ChangeFeedClient::cursor`.
- A marker older than its subscription head is rejected as stale rather than replayed.
- Delivery after `resume` is at-least-once; de-duplicate on (source, timestamp) if needed.
"#]

pub mod cursor;
pub mod feed;
pub mod reads;
pub mod types;

pub use cursor::{CursorSnapshot, CursorStore, Marker, SubscriptionId};
pub use feed::{ChangeFeedClient, DEFAULT_POLL_INTERVAL, FeedOptions, PollOptions, RecordFilter};
pub use reads::{
    BufferOption, InterpolatedQuery, PlotQuery, RecordedQuery, StreamClient, StreamItems,
    StreamSetClient, StreamValue, StreamWrite, SummaryQuery, SummaryValue, UpdateOption,
    ValueQuery, ValueWrite, WriteOptions,
};
pub use types::{StreamSelection, TimedValue, UpdateBatch, UpdateRecord};
