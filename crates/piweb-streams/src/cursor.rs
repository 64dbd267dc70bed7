//! Per-subscription marker bookkeeping.
//!
//! A subscription owns exactly one head marker. Markers it has moved past are
//! remembered for a while so a caller reusing one gets a stale-marker error
//! instead of a silent replay from an old position.

use piweb_client::{SdkError, SdkResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::StreamSelection;

const RETIRED_MARKER_HISTORY: usize = 32;

/// Opaque resumption token issued by the service. Never parsed or ordered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    pub fn new(value: impl Into<String>) -> SdkResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(SdkError::InvalidArgument(
                "marker must not be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Persistable view of one subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub subscription: SubscriptionId,
    pub selection: StreamSelection,
    pub marker: Marker,
}

#[derive(Clone, Debug)]
struct Cursor {
    selection: StreamSelection,
    head: Marker,
    retired: VecDeque<Marker>,
}

impl Cursor {
    fn knows(&self, marker: &Marker) -> bool {
        self.head == *marker || self.retired.contains(marker)
    }
}

#[derive(Debug, Default)]
struct CursorState {
    next_id: u64,
    cursors: BTreeMap<SubscriptionId, Cursor>,
}

/// Shared handle; clones see the same subscriptions.
#[derive(Clone, Debug, Default)]
pub struct CursorStore {
    inner: Arc<Mutex<CursorState>>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SdkResult<MutexGuard<'_, CursorState>> {
        self.inner
            .lock()
            .map_err(|_| SdkError::InvalidState("cursor store mutex poisoned".to_string()))
    }

    /// Starts tracking a subscription whose head is `marker`.
    pub fn open(&self, selection: StreamSelection, marker: Marker) -> SdkResult<SubscriptionId> {
        let mut state = self.lock()?;
        if let Some((id, _)) = state.cursors.iter().find(|(_, cursor)| cursor.knows(&marker)) {
            return Err(SdkError::InvalidState(format!(
                "marker {marker} is already tracked by {id}"
            )));
        }
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.cursors.insert(
            id,
            Cursor {
                selection,
                head: marker,
                retired: VecDeque::new(),
            },
        );
        Ok(id)
    }

    /// Resolves the subscription whose current head is `marker`.
    pub fn lookup(&self, marker: &Marker) -> SdkResult<(SubscriptionId, StreamSelection)> {
        let state = self.lock()?;
        for (id, cursor) in &state.cursors {
            if cursor.head == *marker {
                return Ok((*id, cursor.selection.clone()));
            }
            if cursor.retired.contains(marker) {
                return Err(SdkError::InvalidState(format!(
                    "stale marker {marker}: {id} has already advanced to {}",
                    cursor.head
                )));
            }
        }
        Err(SdkError::InvalidState(format!(
            "foreign marker {marker}: not issued to any open subscription; resume it first"
        )))
    }

    /// Moves the head from `expected` to `next`. Fails without touching state
    /// when another retrieval advanced the subscription in the meantime.
    pub fn advance(&self, id: SubscriptionId, expected: &Marker, next: Marker) -> SdkResult<()> {
        let mut state = self.lock()?;
        let cursor = state
            .cursors
            .get_mut(&id)
            .ok_or_else(|| SdkError::InvalidState(format!("{id} is closed")))?;
        if cursor.head != *expected {
            return Err(SdkError::InvalidState(format!(
                "{id} moved from {expected} to {} during retrieval",
                cursor.head
            )));
        }
        if next != cursor.head {
            let previous = std::mem::replace(&mut cursor.head, next);
            cursor.retired.push_back(previous);
            while cursor.retired.len() > RETIRED_MARKER_HISTORY {
                cursor.retired.pop_front();
            }
        }
        Ok(())
    }

    pub fn head(&self, id: SubscriptionId) -> SdkResult<Option<Marker>> {
        Ok(self.lock()?.cursors.get(&id).map(|cursor| cursor.head.clone()))
    }

    /// Ends a subscription and hands back its final marker.
    pub fn close(&self, id: SubscriptionId) -> SdkResult<Option<Marker>> {
        Ok(self.lock()?.cursors.remove(&id).map(|cursor| cursor.head))
    }

    pub fn snapshot(&self) -> SdkResult<Vec<CursorSnapshot>> {
        let state = self.lock()?;
        Ok(state
            .cursors
            .iter()
            .map(|(id, cursor)| CursorSnapshot {
                subscription: *id,
                selection: cursor.selection.clone(),
                marker: cursor.head.clone(),
            })
            .collect())
    }
}
