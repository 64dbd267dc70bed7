//! Content-addressed declaration of OMF types, containers, and assets.
//!
//! A declaration is compared by content hash against what this registry has
//! already acknowledged. Identical content is acknowledged without a request;
//! different content under a known id is a conflict and is never sent.

use piweb_client::{SdkError, SdkResult, Transport};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::OmfConfig;
use crate::messages::{MessageType, OmfSender, content_hash};
use crate::types::{OmfAsset, OmfContainer, OmfType, validate_values};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Sent and accepted by the service.
    Declared,
    /// Identical to an earlier declaration; nothing was sent.
    AlreadyDeclared,
}

#[derive(Clone, Debug)]
struct Declared<T> {
    hash: String,
    definition: T,
}

#[derive(Debug, Default)]
struct RegistryState {
    types: BTreeMap<String, Declared<OmfType>>,
    containers: BTreeMap<String, Declared<OmfContainer>>,
}

#[derive(Clone, Debug)]
pub struct OmfRegistry<T> {
    sender: OmfSender<T>,
    state: Arc<Mutex<RegistryState>>,
}

enum Prior {
    New,
    Same,
    Different,
}

fn prior<D>(entries: &BTreeMap<String, Declared<D>>, id: &str, hash: &str) -> Prior {
    match entries.get(id) {
        None => Prior::New,
        Some(existing) if existing.hash == hash => Prior::Same,
        Some(_) => Prior::Different,
    }
}

impl<T: Transport> OmfRegistry<T> {
    pub fn new(transport: T, config: OmfConfig) -> Self {
        Self {
            sender: OmfSender::new(transport, config),
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    pub fn sender(&self) -> &OmfSender<T> {
        &self.sender
    }

    fn lock(&self) -> SdkResult<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| SdkError::InvalidState("omf registry mutex poisoned".to_string()))
    }

    pub async fn declare_type(&self, definition: &OmfType) -> SdkResult<Acknowledgement> {
        definition.validate()?;
        let hash = content_hash(definition)?;
        let existing = prior(&self.lock()?.types, &definition.id, &hash);
        match existing {
            Prior::Same => return Ok(Acknowledgement::AlreadyDeclared),
            Prior::Different => return Err(type_conflict(&definition.id)),
            Prior::New => {}
        }

        self.sender
            .send(MessageType::Type, std::slice::from_ref(definition))
            .await?;

        let mut state = self.lock()?;
        match prior(&state.types, &definition.id, &hash) {
            Prior::Different => return Err(type_conflict(&definition.id)),
            Prior::Same => return Ok(Acknowledgement::AlreadyDeclared),
            Prior::New => {}
        }
        state.types.insert(
            definition.id.clone(),
            Declared {
                hash,
                definition: definition.clone(),
            },
        );
        info!(
            type_id = %definition.id,
            classification = ?definition.classification,
            "declared omf type"
        );
        Ok(Acknowledgement::Declared)
    }

    pub async fn declare_container(&self, container: &OmfContainer) -> SdkResult<Acknowledgement> {
        container.validate()?;
        let hash = content_hash(container)?;
        {
            let state = self.lock()?;
            let declared_type = state
                .types
                .get(&container.type_id)
                .ok_or_else(|| SdkError::not_found("type", container.type_id.clone()))?;
            if !declared_type.definition.is_dynamic() {
                return Err(SdkError::InvalidArgument(format!(
                    "container {} needs a dynamic type, {} is static",
                    container.id, container.type_id
                )));
            }
            match prior(&state.containers, &container.id, &hash) {
                Prior::Same => return Ok(Acknowledgement::AlreadyDeclared),
                Prior::Different => return Err(container_conflict(&container.id)),
                Prior::New => {}
            }
        }

        self.sender
            .send(MessageType::Container, std::slice::from_ref(container))
            .await?;

        let mut state = self.lock()?;
        match prior(&state.containers, &container.id, &hash) {
            Prior::Different => return Err(container_conflict(&container.id)),
            Prior::Same => return Ok(Acknowledgement::AlreadyDeclared),
            Prior::New => {}
        }
        state.containers.insert(
            container.id.clone(),
            Declared {
                hash,
                definition: container.clone(),
            },
        );
        info!(container_id = %container.id, type_id = %container.type_id, "declared omf container");
        Ok(Acknowledgement::Declared)
    }

    /// Sends static instances after checking every value against the type.
    pub async fn declare_asset(&self, asset: &OmfAsset) -> SdkResult<Acknowledgement> {
        if asset.values.is_empty() {
            return Err(SdkError::InvalidArgument(format!(
                "asset of type {} has no values",
                asset.type_id
            )));
        }
        let definition = self
            .type_definition(&asset.type_id)?
            .ok_or_else(|| SdkError::not_found("type", asset.type_id.clone()))?;
        if definition.is_dynamic() {
            return Err(SdkError::InvalidArgument(format!(
                "assets need a static type, {} is dynamic",
                asset.type_id
            )));
        }
        for values in &asset.values {
            validate_values(&definition, values, true)?;
        }

        let message = serde_json::json!({ "typeid": asset.type_id, "values": asset.values });
        self.sender
            .send::<Value>(MessageType::Data, std::slice::from_ref(&message))
            .await?;
        debug!(type_id = %asset.type_id, instances = asset.values.len(), "declared omf asset");
        Ok(Acknowledgement::Declared)
    }

    pub fn type_definition(&self, type_id: &str) -> SdkResult<Option<OmfType>> {
        Ok(self
            .lock()?
            .types
            .get(type_id)
            .map(|declared| declared.definition.clone()))
    }

    pub fn container(&self, container_id: &str) -> SdkResult<Option<OmfContainer>> {
        Ok(self
            .lock()?
            .containers
            .get(container_id)
            .map(|declared| declared.definition.clone()))
    }

    /// Type of a declared container, as needed to serialize its records.
    pub fn container_type(&self, container_id: &str) -> SdkResult<OmfType> {
        let state = self.lock()?;
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| SdkError::not_found("container", container_id))?;
        state
            .types
            .get(&container.definition.type_id)
            .map(|declared| declared.definition.clone())
            .ok_or_else(|| SdkError::not_found("type", container.definition.type_id.clone()))
    }
}

fn type_conflict(id: &str) -> SdkError {
    SdkError::Conflict(format!(
        "type {id} is already declared with different content"
    ))
}

fn container_conflict(id: &str) -> SdkError {
    SdkError::Conflict(format!(
        "container {id} is already declared with different content"
    ))
}
