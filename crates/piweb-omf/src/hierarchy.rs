//! Create-or-fetch of named asset elements under a database or element.
//!
//! Creation does not return the new element, and listings may lag behind a
//! create. The resolver re-lists with bounded backoff until the element shows
//! up or the attempts run out.

use piweb_client::{SdkError, SdkResult, Transport, TransportRequest, encode_path_segment};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::VisibilityRetry;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParentAnchor {
    Database(String),
    Element(String),
}

impl ParentAnchor {
    fn children_path(&self) -> String {
        match self {
            Self::Database(web_id) => {
                format!("assetdatabases/{}/elements", encode_path_segment(web_id))
            }
            Self::Element(web_id) => format!("elements/{}/elements", encode_path_segment(web_id)),
        }
    }

    pub fn web_id(&self) -> &str {
        match self {
            Self::Database(web_id) | Self::Element(web_id) => web_id,
        }
    }
}

/// Resolved identity of an element.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Anchor {
    pub web_id: String,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl Anchor {
    pub fn as_parent(&self) -> ParentAnchor {
        ParentAnchor::Element(self.web_id.clone())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementDefinition {
    pub description: Option<String>,
    pub template_name: Option<String>,
    pub category_names: Vec<String>,
}

impl ElementDefinition {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    fn to_body(&self, name: &str) -> Value {
        let mut body = Map::new();
        body.insert("Name".to_string(), Value::String(name.to_string()));
        if let Some(description) = &self.description {
            body.insert("Description".to_string(), Value::String(description.clone()));
        }
        if let Some(template) = &self.template_name {
            body.insert("TemplateName".to_string(), Value::String(template.clone()));
        }
        if !self.category_names.is_empty() {
            body.insert(
                "CategoryNames".to_string(),
                Value::Array(
                    self.category_names
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            );
        }
        Value::Object(body)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Listing {
    #[serde(default)]
    items: Vec<Anchor>,
}

#[derive(Clone, Debug)]
pub struct HierarchyResolver<T> {
    transport: T,
    retry: VisibilityRetry,
}

impl<T: Transport> HierarchyResolver<T> {
    pub fn new(transport: T) -> Self {
        Self::with_retry(transport, VisibilityRetry::default())
    }

    pub fn with_retry(transport: T, retry: VisibilityRetry) -> Self {
        Self { transport, retry }
    }

    /// Returns the child `name` of `parent`, creating it with `definition`
    /// when absent. Among several visible children with that name the one
    /// with the lexically smallest web id wins.
    pub async fn ensure(
        &self,
        parent: &ParentAnchor,
        name: &str,
        definition: &ElementDefinition,
    ) -> SdkResult<Anchor> {
        validate_name(name)?;
        if let Some(anchor) = self.lookup(parent, name).await? {
            return Ok(anchor);
        }

        let request = TransportRequest::post(parent.children_path()).body(definition.to_body(name));
        match self.transport.request(request).await {
            Ok(_) => info!(parent = parent.web_id(), name, "created element"),
            Err(SdkError::Conflict(message)) => {
                debug!(parent = parent.web_id(), name, %message, "element created concurrently");
            }
            Err(SdkError::NotFound { .. }) => {
                return Err(SdkError::not_found("parent", parent.web_id()));
            }
            Err(other) => return Err(other),
        }

        for attempt in 1..=self.retry.max_attempts {
            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(anchor) = self.lookup(parent, name).await? {
                return Ok(anchor);
            }
            debug!(parent = parent.web_id(), name, attempt, "element not visible yet");
        }
        Err(SdkError::Timeout(format!(
            "element {name} under {} not visible after {} lookups",
            parent.web_id(),
            self.retry.max_attempts
        )))
    }

    /// Ensures each segment in turn, each under the previous one.
    pub async fn ensure_path(
        &self,
        root: &ParentAnchor,
        segments: &[(&str, ElementDefinition)],
    ) -> SdkResult<Vec<Anchor>> {
        let mut anchors: Vec<Anchor> = Vec::with_capacity(segments.len());
        let mut parent = root.clone();
        for (name, definition) in segments {
            let anchor = self.ensure(&parent, name, definition).await?;
            parent = anchor.as_parent();
            anchors.push(anchor);
        }
        Ok(anchors)
    }

    async fn lookup(&self, parent: &ParentAnchor, name: &str) -> SdkResult<Option<Anchor>> {
        let request = TransportRequest::get(parent.children_path()).query("nameFilter", name);
        let response = self.transport.request(request).await.map_err(|error| match error {
            SdkError::NotFound { .. } => SdkError::not_found("parent", parent.web_id()),
            other => other,
        })?;
        let listing: Listing = serde_json::from_value(response)
            .map_err(|err| SdkError::transport(format!("malformed element listing: {err}")))?;
        let mut matches: Vec<Anchor> = listing
            .items
            .into_iter()
            .filter(|anchor| anchor.name.eq_ignore_ascii_case(name))
            .collect();
        matches.sort_by(|left, right| left.web_id.cmp(&right.web_id));
        if matches.len() > 1 {
            let candidates: Vec<&str> =
                matches.iter().map(|anchor| anchor.web_id.as_str()).collect();
            warn!(
                parent = parent.web_id(),
                name,
                candidates = ?candidates,
                "duplicate sibling elements; using the smallest web id"
            );
        }
        Ok(matches.into_iter().next())
    }
}

fn validate_name(name: &str) -> SdkResult<()> {
    if name.trim().is_empty() {
        return Err(SdkError::InvalidArgument(
            "element name must not be empty".to_string(),
        ));
    }
    if name.contains('\\') {
        return Err(SdkError::InvalidArgument(format!(
            "element name {name:?} must not contain a path separator"
        )));
    }
    Ok(())
}
