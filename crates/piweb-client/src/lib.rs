#![doc = r#"
Request plumbing shared by the historian SDK crates.

| Item | Purpose |
| --- | --- |
| `Transport` | `request(method, path, query, headers, body) -> JSON` primitive every SDK call goes through |
| `ReqwestTransport` | HTTPS implementation; accepts a caller-built `reqwest::Client` for auth and TLS |
| `time::encode` | Wire formatting for time parameters (literal pass-through, ISO 8601 with offset) |
| `SdkError` | Error taxonomy surfaced by every SDK operation |
| `testing::MockHistorian` | In-memory historian implementing `Transport` |

Notes:
- Paths are logical (`streams/{webId}/value`) and joined onto the configured base URL.
- Empty response bodies (`202`/`204`) surface as `Value::Null`.
"#]

pub mod errors;
pub mod testing;
pub mod time;
pub mod transport;

pub use errors::{SdkError, SdkResult, error_for_status};
pub use testing::{MockFault, MockHistorian};
pub use time::{TimeValue, encode as encode_time};
pub use transport::{
    ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, Method, ReqwestTransport, Transport,
    TransportRequest,
};

/// Percent-encodes a value used as a single path segment.
pub fn encode_path_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
