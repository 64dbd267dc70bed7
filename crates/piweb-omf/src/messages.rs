use piweb_client::{SdkError, SdkResult, Transport, TransportRequest};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::OmfConfig;

pub const OMF_PATH: &str = "omf";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Type,
    Container,
    Data,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Container => "container",
            Self::Data => "data",
        }
    }
}

/// Builds the POST for one OMF message carrying `body` (always a JSON array).
pub fn omf_request(config: &OmfConfig, kind: MessageType, body: Value) -> TransportRequest {
    TransportRequest::post(OMF_PATH)
        .query_opt("dataServerWebId", config.data_server_web_id.as_deref())
        .header("messagetype", kind.as_str())
        .header("action", "create")
        .header("messageformat", "JSON")
        .header("omfversion", config.omf_version.clone())
        .header("X-Requested-With", "XMLHttpRequest")
        .body(body)
}

/// Sends OMF messages over a transport.
#[derive(Clone, Debug)]
pub struct OmfSender<T> {
    transport: T,
    config: OmfConfig,
}

impl<T: Transport> OmfSender<T> {
    pub fn new(transport: T, config: OmfConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &OmfConfig {
        &self.config
    }

    pub async fn send<S: Serialize>(&self, kind: MessageType, items: &[S]) -> SdkResult<()> {
        let body = serde_json::to_value(items).map_err(|err| {
            SdkError::InvalidArgument(format!(
                "omf {} message is not serializable: {err}",
                kind.as_str()
            ))
        })?;
        debug!(messagetype = kind.as_str(), items = items.len(), "sending omf message");
        self.transport
            .request(omf_request(&self.config, kind, body))
            .await?;
        Ok(())
    }
}

/// Hex BLAKE3 digest of the canonical JSON form of `value`.
pub fn content_hash<S: Serialize>(value: &S) -> SdkResult<String> {
    let value = serde_json::to_value(value).map_err(|err| {
        SdkError::InvalidArgument(format!("declaration is not serializable: {err}"))
    })?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

// Keys are sorted here rather than relying on `Value::to_string`, whose key
// order follows insertion once any crate in the graph enables serde_json's
// `preserve_order` feature.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (position, key) in keys.into_iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(entry) = map.get(key) {
                    write_canonical(entry, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (position, item) in items.iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn omf_request_carries_protocol_headers() {
        let request = omf_request(
            &OmfConfig::for_data_server("F1DS-1"),
            MessageType::Container,
            json!([]),
        );
        assert_eq!(request.path, "omf");
        assert_eq!(request.query_value("dataServerWebId"), Some("F1DS-1"));
        assert_eq!(request.header_value("messagetype"), Some("container"));
        assert_eq!(request.header_value("action"), Some("create"));
        assert_eq!(request.header_value("messageformat"), Some("JSON"));
        assert_eq!(request.header_value("omfversion"), Some("1.2"));
        assert_eq!(request.header_value("x-requested-with"), Some("XMLHttpRequest"));
    }

    #[test]
    fn omf_request_without_data_server_omits_query() {
        let request = omf_request(&OmfConfig::default(), MessageType::Type, json!([]));
        assert!(request.query.is_empty());
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let left = json!({ "a": 1, "b": { "y": [1, 2], "x": "s" } });
        let right = json!({ "b": { "x": "s", "y": [1, 2] }, "a": 1 });
        assert_eq!(
            content_hash(&left).expect("hash"),
            content_hash(&right).expect("hash")
        );
        assert_ne!(
            content_hash(&left).expect("hash"),
            content_hash(&json!({ "a": 2 })).expect("hash")
        );
    }

    #[test]
    fn content_hash_ignores_field_declaration_order() {
        #[derive(Serialize)]
        struct Forward {
            id: &'static str,
            version: u32,
        }
        #[derive(Serialize)]
        struct Reversed {
            version: u32,
            id: &'static str,
        }
        let forward = Forward {
            id: "Temperature",
            version: 1,
        };
        let reversed = Reversed {
            version: 1,
            id: "Temperature",
        };
        assert_eq!(
            content_hash(&forward).expect("hash"),
            content_hash(&reversed).expect("hash")
        );
    }
}
