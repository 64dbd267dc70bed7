//! OMF declarations: types, containers, assets, and dynamic value records.

use chrono::{DateTime, FixedOffset};
use piweb_client::time::format_timestamp;
use piweb_client::{SdkError, SdkResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl PropertyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmfProperty {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub isindex: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OmfProperty {
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            format: None,
            isindex: false,
            name: None,
            description: None,
        }
    }

    pub fn described(kind: PropertyType, description: impl Into<String>) -> Self {
        Self::new(kind).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    fn index(mut self) -> Self {
        self.isindex = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Static,
    Dynamic,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmfType {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub classification: Classification,
    #[serde(rename = "type")]
    pub schema: PropertyType,
    pub properties: BTreeMap<String, OmfProperty>,
}

impl OmfType {
    /// Time-indexed type; `timestamp_property` becomes the date-time index.
    pub fn dynamic<I, K>(id: impl Into<String>, timestamp_property: &str, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, OmfProperty)>,
        K: Into<String>,
    {
        let mut properties: BTreeMap<String, OmfProperty> = properties
            .into_iter()
            .map(|(name, property)| (name.into(), property))
            .collect();
        properties.insert(
            timestamp_property.to_string(),
            OmfProperty::new(PropertyType::String)
                .with_format("date-time")
                .index(),
        );
        Self {
            id: id.into(),
            name: None,
            description: None,
            classification: Classification::Dynamic,
            schema: PropertyType::Object,
            properties,
        }
    }

    /// Type for assets, indexed by a string `name` property.
    pub fn static_type<I, K>(id: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, OmfProperty)>,
        K: Into<String>,
    {
        let mut properties: BTreeMap<String, OmfProperty> = properties
            .into_iter()
            .map(|(name, property)| (name.into(), property))
            .collect();
        properties.insert(
            "name".to_string(),
            OmfProperty::new(PropertyType::String).index(),
        );
        Self {
            id: id.into(),
            name: None,
            description: None,
            classification: Classification::Static,
            schema: PropertyType::Object,
            properties,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.classification == Classification::Dynamic
    }

    pub fn index_property(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, property)| property.isindex)
            .map(|(name, _)| name.as_str())
    }

    pub fn validate(&self) -> SdkResult<()> {
        require_id("type", &self.id)?;
        if self.schema != PropertyType::Object {
            return Err(SdkError::InvalidArgument(format!(
                "type {} must have schema type object",
                self.id
            )));
        }
        let indexes: Vec<(&String, &OmfProperty)> = self
            .properties
            .iter()
            .filter(|(_, property)| property.isindex)
            .collect();
        let [(index_name, index)] = indexes.as_slice() else {
            return Err(SdkError::InvalidArgument(format!(
                "type {} must declare exactly one index property, found {}",
                self.id,
                indexes.len()
            )));
        };
        if index.kind != PropertyType::String {
            return Err(SdkError::InvalidArgument(format!(
                "index property {index_name} of type {} must be a string",
                self.id
            )));
        }
        if self.is_dynamic() && index.format.as_deref() != Some("date-time") {
            return Err(SdkError::InvalidArgument(format!(
                "index property {index_name} of dynamic type {} must use format date-time",
                self.id
            )));
        }
        if let Some(blank) = self.properties.keys().find(|name| name.trim().is_empty()) {
            return Err(SdkError::InvalidArgument(format!(
                "type {} has a property with a blank name {blank:?}",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OmfContainer {
    pub id: String,
    #[serde(rename = "typeid")]
    pub type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl OmfContainer {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            name: None,
            description: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> SdkResult<()> {
        require_id("container", &self.id)?;
        require_id("type", &self.type_id)
    }
}

/// Instances of a static type sent as one data message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OmfAsset {
    #[serde(rename = "typeid")]
    pub type_id: String,
    pub values: Vec<Map<String, Value>>,
}

impl OmfAsset {
    pub fn new(type_id: impl Into<String>, values: Vec<Map<String, Value>>) -> Self {
        Self {
            type_id: type_id.into(),
            values,
        }
    }
}

/// One time-indexed record for a dynamic container. The timestamp is written
/// under the type's index property.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub fields: Map<String, Value>,
}

impl ValueRecord {
    pub fn new(timestamp: DateTime<FixedOffset>, fields: Map<String, Value>) -> Self {
        Self { timestamp, fields }
    }

    /// Single-field record, the common `{timestamp, value}` shape.
    pub fn single(timestamp: DateTime<FixedOffset>, field: &str, value: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(field.to_string(), value);
        Self { timestamp, fields }
    }

    pub fn to_json(&self, index_property: &str) -> Value {
        let mut object = self.fields.clone();
        object.insert(
            index_property.to_string(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        Value::Object(object)
    }
}

/// Data message payload for one container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OmfTimeSeriesData {
    #[serde(rename = "containerid")]
    pub container_id: String,
    pub values: Vec<Value>,
}

/// Checks instance values of a type against its declared properties.
pub fn validate_values(
    definition: &OmfType,
    values: &Map<String, Value>,
    require_all: bool,
) -> SdkResult<()> {
    for (field, value) in values {
        let Some(property) = definition.properties.get(field) else {
            return Err(SdkError::InvalidArgument(format!(
                "field {field} is not declared by type {}",
                definition.id
            )));
        };
        if value.is_null() && !require_all {
            continue;
        }
        if !property.kind.accepts(value) {
            return Err(SdkError::InvalidArgument(format!(
                "field {field} of type {} expects {}, got {value}",
                definition.id,
                property.kind.as_str()
            )));
        }
    }
    if require_all {
        if let Some(missing) = definition
            .properties
            .keys()
            .find(|name| !values.contains_key(*name))
        {
            return Err(SdkError::InvalidArgument(format!(
                "field {missing} of type {} is missing",
                definition.id
            )));
        }
    }
    Ok(())
}

fn require_id(what: &str, id: &str) -> SdkResult<()> {
    if id.trim().is_empty() {
        return Err(SdkError::InvalidArgument(format!("{what} id must not be empty")));
    }
    Ok(())
}
