#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource not found: {resource} ({id})")]
    NotFound { resource: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport failure{}: {message}", status_suffix(.status))]
    TransportFailure {
        status: Option<u16>,
        message: String,
    },
}

pub type SdkResult<T> = Result<T, SdkError>;

impl SdkError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            status: None,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Advisory only: the SDK never retries on its own except while waiting
    /// for a created hierarchy node to become visible.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure { .. } | Self::Timeout(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransportFailure { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

/// Maps a non-success HTTP status and its body onto the SDK taxonomy. A 404
/// names the resource addressed by `path` rather than echoing the body.
pub fn error_for_status(status: u16, path: &str, body: String) -> SdkError {
    match status {
        404 => {
            let (resource, id) = addressed_resource(path);
            SdkError::NotFound { resource, id }
        }
        409 => SdkError::Conflict(body),
        400 | 422 => SdkError::InvalidArgument(body),
        _ => SdkError::TransportFailure {
            status: Some(status),
            message: body,
        },
    }
}

fn addressed_resource(path: &str) -> (&'static str, String) {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let (resource, id) = match segments.as_slice() {
        ["streams", "updates", marker, ..] => ("marker", *marker),
        ["streams", web_id, ..] => ("stream", *web_id),
        ["elements", web_id, ..] => ("element", *web_id),
        ["assetdatabases", web_id, ..] => ("database", *web_id),
        ["points", web_id, ..] => ("point", *web_id),
        _ => ("route", path),
    };
    let id = urlencoding::decode(id)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| id.to_string());
    (resource, id)
}
