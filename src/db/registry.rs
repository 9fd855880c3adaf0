//! Process-wide database registry.
//!
//! Maps stable database identifiers to weak handles of live
//! databases, allowing cross-database references (entry links,
//! autofill resolution) without lifetime entanglement. Entries are
//! inserted at construction and removed at `release_data`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use log::debug;

use crate::types::DatabaseId;

use super::events::EventBus;

/// Shareable identity of a live database: its registry identifier and
/// event bus. Holding a handle does not keep the database alive.
pub struct DatabaseHandle {
    id: DatabaseId,
    events: EventBus,
}

impl DatabaseHandle {
    pub(super) fn new(id: DatabaseId, events: EventBus) -> Self {
        Self { id, events }
    }

    /// Registry identifier of the database.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.id
    }

    /// Event bus of the database, for subscribing across components.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

type RegistryMap = HashMap<DatabaseId, Weak<DatabaseHandle>>;

static REGISTRY: OnceLock<Mutex<RegistryMap>> = OnceLock::new();

fn registry() -> &'static Mutex<RegistryMap> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Inserts `handle` into the registry.
pub(super) fn register(handle: &Arc<DatabaseHandle>) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(handle.id(), Arc::downgrade(handle));
    debug!("registered database {}", handle.id());
}

/// Removes `id` from the registry.
pub(super) fn deregister(id: DatabaseId) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    debug!("deregistered database {id}");
}

/// Looks up the live database registered under `id`.
///
/// Returns `None` when no such database exists or it has released its
/// data. Dead entries encountered on the way are pruned.
#[must_use]
pub fn database_by_uuid(id: DatabaseId) -> Option<Arc<DatabaseHandle>> {
    let mut map = registry().lock().unwrap_or_else(PoisonError::into_inner);
    match map.get(&id).and_then(Weak::upgrade) {
        Some(handle) => Some(handle),
        None => {
            map.remove(&id);
            None
        }
    }
}
