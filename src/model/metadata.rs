//! Database metadata persisted inside the encrypted payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Icon index assigned to a freshly created recycle bin.
pub const RECYCLE_BIN_ICON: u32 = 43;

/// Metadata of one database: display fields, recycle-bin registration,
/// the key-change timestamp, and the generic custom-data map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Database display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// When the database key was last changed, UTC unix seconds.
    pub database_key_changed: Option<u64>,
    /// Whether soft deletion through the recycle bin is enabled.
    pub recycle_bin_enabled: bool,
    /// UUID of the recycle-bin group, once one exists.
    pub recycle_bin_uuid: Option<Uuid>,
    /// Generic custom data, persisted inside the encrypted payload.
    /// Distinct from the public custom data of the plaintext header.
    pub custom_data: BTreeMap<String, String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            database_key_changed: None,
            recycle_bin_enabled: true,
            recycle_bin_uuid: None,
            custom_data: BTreeMap::new(),
        }
    }
}

impl Metadata {
    /// Registers `uuid` as the recycle-bin group.
    pub fn set_recycle_bin(&mut self, uuid: Uuid) {
        self.recycle_bin_uuid = Some(uuid);
    }

    /// Returns the custom-data value stored under `key`.
    #[must_use]
    pub fn custom_data_value(&self, key: &str) -> Option<&str> {
        self.custom_data.get(key).map(String::as_str)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set_custom_data_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_data.insert(key.into(), value.into());
    }

    /// Removes the custom-data value stored under `key`.
    pub fn remove_custom_data_value(&mut self, key: &str) -> Option<String> {
        self.custom_data.remove(key)
    }

    /// Clears all fields back to defaults.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
