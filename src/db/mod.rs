//! The database aggregate root.
//!
//! A [`Database`] owns the credential tree, metadata, key material,
//! and the machinery around the on-disk container: the persistence
//! engine, the file-block sentinel, the file watcher, and the
//! debounced modification tracker. While a database is live it is the
//! unique entry in the process registry under its identifier.

pub mod data;
pub mod events;
pub mod persist;
pub mod registry;
pub mod sentinel;
pub mod watcher;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use log::debug;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{DatabaseResult, KeyError};
use crate::format::{PayloadDoc, FILE_VERSION_4, FILE_VERSION_MAX};
use crate::key::{CompositeKey, KdfParams, KeyMaterial};
use crate::model::{top_usernames, Entry, Group, Metadata, RECYCLE_BIN_ICON};
use crate::types::{
    now_unix, CipherId, CompressionAlgorithm, CustomDataValue, DatabaseId, DeletedObject,
    PublicCustomData, KEY_PUBLIC_COLOR, KEY_PUBLIC_ICON, KEY_PUBLIC_NAME, KEY_PUBLIC_UUID,
};

pub use data::DatabaseData;
pub use events::{DatabaseEvent, EventBus, ModifiedDebouncer, SubscriptionId, MODIFIED_DEBOUNCE};
pub use persist::{backup_database, restore_database, BackupPolicy, SaveAction};
pub use registry::{database_by_uuid, DatabaseHandle};
pub use sentinel::{FileBlockSentinel, SentinelVerdict};
pub use watcher::{FileWatcher, WATCH_BASE_INTERVAL, WATCH_BURST_INTERVAL};

/// Name given to a fresh root group.
const ROOT_GROUP_NAME: &str = "Passwords";
/// Name given to a lazily created recycle bin.
const RECYCLE_BIN_NAME: &str = "Recycle Bin";
/// How many usernames the common-usernames view retains.
const COMMON_USERNAMES_TOP_N: usize = 10;

/// An unlocked credential database and its persistence state machine.
pub struct Database {
    id: DatabaseId,
    data: DatabaseData,
    metadata: Metadata,
    root: Group,
    deleted_objects: Vec<DeletedObject>,

    common_usernames: Vec<String>,
    tag_list: Vec<String>,

    modified: bool,
    has_non_data_change: bool,
    emit_modified: bool,

    sentinel: FileBlockSentinel,
    events: EventBus,
    debouncer: ModifiedDebouncer,
    watcher: FileWatcher,
    save_mutex: Arc<Mutex<()>>,
    handle: Option<Arc<DatabaseHandle>>,
    is_temporary: bool,

    #[cfg(test)]
    pub(crate) fail_rename_for_tests: bool,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Creates an empty database: fresh identifier, empty root group,
    /// default metadata, registered in the process registry, clean.
    ///
    /// # Panics
    ///
    /// Panics if the system RNG is unavailable.
    #[must_use]
    pub fn new() -> Self {
        let events = EventBus::new();
        let debouncer = ModifiedDebouncer::new(events.clone());
        let id = DatabaseId::generate();
        let handle = Arc::new(DatabaseHandle::new(id, events.clone()));
        registry::register(&handle);

        Self {
            id,
            data: DatabaseData::new(),
            metadata: Metadata::default(),
            root: Group::new(ROOT_GROUP_NAME),
            deleted_objects: Vec::new(),
            common_usernames: Vec::new(),
            tag_list: Vec::new(),
            modified: false,
            has_non_data_change: false,
            emit_modified: true,
            sentinel: FileBlockSentinel::new(),
            events,
            debouncer,
            watcher: FileWatcher::new(),
            save_mutex: Arc::new(Mutex::new(())),
            handle: Some(handle),
            is_temporary: false,
            #[cfg(test)]
            fail_rename_for_tests: false,
        }
    }

    /// Creates a database bound to `path` without opening it.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let mut db = Self::new();
        db.data.file_path = Some(path.into());
        db
    }

    // =========================================================================
    // Identity and events
    // =========================================================================

    /// Registry identifier of this database.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.id
    }

    /// Event bus for subscribing to lifecycle notifications.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // =========================================================================
    // State access
    // =========================================================================

    pub(crate) fn data(&self) -> &DatabaseData {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut DatabaseData {
        &mut self.data
    }

    /// The bound file path, if any. May be unresolved or relative.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.data.file_path.as_deref()
    }

    /// The resolved path of the bound file, or `None` when the file
    /// does not exist or cannot be resolved.
    #[must_use]
    pub fn canonical_file_path(&self) -> Option<PathBuf> {
        self.data
            .file_path
            .as_ref()
            .and_then(|p| std::fs::canonicalize(p).ok())
    }

    /// Rebinds the database to `path`. Watching stops until the next
    /// open or save, and the ignore latch resets.
    pub fn set_file_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.data.file_path.as_ref() != Some(&path) {
            let old = self.data.file_path.replace(path.clone());
            self.watcher.stop();
            self.sentinel.set_ignore_until_saved(false);
            self.events.emit(&DatabaseEvent::FilePathChanged {
                old,
                new: Some(path),
            });
        }
    }

    /// Container format version.
    #[must_use]
    pub fn format_version(&self) -> u32 {
        self.data.format_version
    }

    /// Sets the container format version.
    pub fn set_format_version(&mut self, version: u32) {
        self.data.format_version = version;
    }

    /// Whether the minor version is newer than this crate writes.
    #[must_use]
    pub fn has_minor_version_mismatch(&self) -> bool {
        self.data.format_version > FILE_VERSION_MAX
    }

    /// Bulk cipher tag.
    #[must_use]
    pub fn cipher(&self) -> CipherId {
        self.data.cipher
    }

    /// Selects the bulk cipher for the next save.
    pub fn set_cipher(&mut self, cipher: CipherId) {
        debug_assert!(cipher.is_supported());
        self.data.cipher = cipher;
    }

    /// Payload compression.
    #[must_use]
    pub fn compression_algorithm(&self) -> CompressionAlgorithm {
        self.data.compression_algorithm
    }

    /// Selects the payload compression for the next save.
    pub fn set_compression_algorithm(&mut self, algorithm: CompressionAlgorithm) {
        self.data.compression_algorithm = algorithm;
    }

    /// Public custom data of the container header.
    #[must_use]
    pub fn public_custom_data(&self) -> &PublicCustomData {
        &self.data.public_custom_data
    }

    /// Mutable access to the public custom data.
    pub fn public_custom_data_mut(&mut self) -> &mut PublicCustomData {
        &mut self.data.public_custom_data
    }

    /// Replaces the public custom data wholesale.
    pub fn set_public_custom_data(&mut self, data: PublicCustomData) {
        self.data.public_custom_data = data;
    }

    /// Root group of the credential tree.
    #[must_use]
    pub fn root(&self) -> &Group {
        &self.root
    }

    /// Mutable access to the tree. Callers are responsible for
    /// [`Database::mark_as_modified`] after mutating.
    pub fn root_mut(&mut self) -> &mut Group {
        &mut self.root
    }

    /// Replaces the root group, returning the old one. Replacing the
    /// tree of a modified, initialized database discards its changes.
    pub fn set_root_group(&mut self, mut group: Group) -> Group {
        if self.is_initialized() && self.modified {
            self.events.emit(&DatabaseEvent::Discarded);
        }
        if group.uuid.is_nil() {
            group.uuid = Uuid::new_v4();
        }
        if group.name.is_empty() {
            group.name = ROOT_GROUP_NAME.to_string();
        }
        std::mem::replace(&mut self.root, group)
    }

    /// Database metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to the metadata. Callers are responsible for
    /// [`Database::mark_as_modified`] after mutating.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Generic custom data stored in the encrypted payload. Distinct
    /// from [`Database::public_custom_data`], which lives in the
    /// plaintext header.
    #[must_use]
    pub fn custom_data(&self) -> &BTreeMap<String, String> {
        &self.metadata.custom_data
    }

    /// Mutable access to the payload custom data. Callers are
    /// responsible for [`Database::mark_as_modified`] after mutating.
    pub fn custom_data_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.metadata.custom_data
    }

    /// Marks this database as a temporary scratch database.
    pub fn mark_as_temporary(&mut self) {
        self.is_temporary = true;
    }

    /// Whether this database is a temporary scratch database.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    // =========================================================================
    // Key lifecycle
    // =========================================================================

    /// The composite key, if one is set.
    #[must_use]
    pub fn key(&self) -> Option<&Arc<CompositeKey>> {
        self.data.key.as_ref()
    }

    /// The KDF descriptor.
    #[must_use]
    pub fn kdf(&self) -> &KdfParams {
        &self.data.kdf
    }

    /// Message of the last key failure, for UI display.
    #[must_use]
    pub fn key_error(&self) -> Option<&str> {
        self.data.key_error.as_deref()
    }

    /// Whether the database can be saved: a non-empty key is set and a
    /// root group exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.data.key.as_ref().is_some_and(|k| !k.is_empty())
    }

    /// Sets and transforms a new key with the default options:
    /// key-change time updated, transform seed kept, KDF run.
    ///
    /// # Errors
    ///
    /// See [`Database::set_key_with`].
    pub fn set_key(&mut self, key: Option<Arc<CompositeKey>>) -> DatabaseResult<()> {
        self.set_key_with(key, true, false, true)
    }

    /// Sets a new encryption key.
    ///
    /// Passing `None` zeroes all key-derived state. With
    /// `update_transform_salt` the KDF seed is randomized first. With
    /// `transform_key` the KDF runs; otherwise the previously cached
    /// transformed key is reused. The database is marked modified only
    /// if the transformed key actually changed.
    ///
    /// # Errors
    ///
    /// Returns a key error if the KDF fails; the message is also
    /// retained in [`Database::key_error`].
    pub fn set_key_with(
        &mut self,
        key: Option<Arc<CompositeKey>>,
        update_changed_time: bool,
        update_transform_salt: bool,
        transform_key: bool,
    ) -> DatabaseResult<()> {
        self.data.key_error = None;

        let Some(key) = key else {
            self.data.reset_keys();
            return Ok(());
        };

        if update_transform_salt {
            if let Err(e) = self.data.kdf.randomize_seed() {
                self.data.key_error = Some(e.to_string());
                return Err(e.into());
            }
            debug_assert!(!self.data.kdf.seed().is_empty());
        }

        let old_transformed = if self.data.key.as_ref().is_some_and(|k| !k.is_empty()) {
            self.data.transformed_key.clone()
        } else {
            KeyMaterial::empty()
        };

        let transformed = if transform_key {
            match key.transform(&self.data.kdf) {
                Ok(t) => t,
                Err(e) => {
                    self.data.key_error = Some(e.to_string());
                    return Err(e.into());
                }
            }
        } else {
            old_transformed.clone()
        };

        self.data.key = Some(key);
        if !transformed.is_empty() {
            self.data.transformed_key = transformed;
        }
        if update_changed_time {
            self.metadata.database_key_changed = Some(now_unix());
        }

        if old_transformed != self.data.transformed_key {
            self.mark_as_modified();
        }

        Ok(())
    }

    /// Sets the KDF descriptor and drops the format version to the
    /// minimum the new KDF requires.
    pub fn set_kdf(&mut self, kdf: KdfParams) {
        self.data.format_version = kdf.min_format_version();
        self.data.kdf = kdf;
    }

    /// Switches to a new KDF: randomizes its seed, transforms the
    /// current key under it, then swaps both in. Always marks the
    /// database modified.
    ///
    /// # Errors
    ///
    /// Returns a key error if the transform fails; nothing is swapped
    /// in that case.
    pub fn change_kdf(&mut self, mut kdf: KdfParams) -> DatabaseResult<()> {
        kdf.randomize_seed()?;

        let key = self
            .data
            .key
            .clone()
            .unwrap_or_else(|| Arc::new(CompositeKey::new()));
        let transformed = match key.transform(&kdf) {
            Ok(t) => t,
            Err(e) => {
                self.data.key_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        if self.data.key.is_none() {
            self.data.key = Some(key);
        }
        self.set_kdf(kdf);
        self.data.transformed_key = transformed;
        self.mark_as_modified();

        Ok(())
    }

    /// Stores `seed` as the master seed and presents it to the key's
    /// challenge-response factors. An empty response clears the
    /// challenge-response key; a non-empty one replaces it.
    ///
    /// # Errors
    ///
    /// Returns a key error if no key is set or a factor fails; the
    /// message is retained in [`Database::key_error`].
    pub fn challenge_master_seed(&mut self, seed: &[u8]) -> DatabaseResult<()> {
        self.data.key_error = None;

        let Some(key) = self.data.key.clone() else {
            self.data.key_error = Some(KeyError::MissingKey.to_string());
            return Err(KeyError::MissingKey.into());
        };

        self.data.master_seed = KeyMaterial::from_bytes(seed.to_vec());
        match key.challenge(seed) {
            Ok(response) => {
                if response.is_empty() {
                    // No challenge-response factor present.
                    self.data.challenge_response_key = KeyMaterial::empty();
                } else {
                    self.data.challenge_response_key = KeyMaterial::from_bytes(response);
                }
                Ok(())
            }
            Err(e) => {
                self.data.key_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Modification tracking
    // =========================================================================

    /// Whether data changed since the last save or open.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether a UI-only or derived-only change is pending.
    #[must_use]
    pub fn has_non_data_changes(&self) -> bool {
        self.has_non_data_change
    }

    /// Whether modification signaling is enabled.
    #[must_use]
    pub fn emit_modified_enabled(&self) -> bool {
        self.emit_modified
    }

    /// Enables or disables modification signaling. Disabling disarms a
    /// pending debounce timer; used around bulk mutations such as
    /// codec-driven loading.
    pub fn set_emit_modified(&mut self, enabled: bool) {
        if !enabled {
            self.debouncer.disarm();
        }
        self.emit_modified = enabled;
    }

    /// Records a data change. With signaling enabled, refreshes the
    /// tag list and arms the debounced `Modified` event.
    pub fn mark_as_modified(&mut self) {
        self.modified = true;
        if self.emit_modified {
            self.update_tag_list();
            // One event per burst of edits, not one per keystroke.
            self.debouncer.arm();
        }
    }

    /// Clears the modified state. Emits `Saved` exactly once per
    /// true-to-false transition.
    pub fn mark_as_clean(&mut self) {
        let was_modified = self.modified;
        self.modified = false;
        self.debouncer.disarm();
        self.has_non_data_change = false;
        if was_modified {
            self.events.emit(&DatabaseEvent::Saved);
        }
    }

    /// Records a change that does not require saving. Never arms the
    /// save timer and never sets the modified flag.
    pub fn mark_non_data_change(&mut self) {
        self.has_non_data_change = true;
        self.events.emit(&DatabaseEvent::NonDataChanged);
    }

    // =========================================================================
    // Sentinel
    // =========================================================================

    /// MD5 of the first block of the on-disk file as last observed, or
    /// `None` if unknown.
    #[must_use]
    pub fn file_block_hash(&self) -> Option<[u8; 16]> {
        self.sentinel.digest()
    }

    /// Whether the next same-path save skips the external-change
    /// check.
    #[must_use]
    pub fn ignore_file_changes_until_saved(&self) -> bool {
        self.sentinel.ignore_until_saved()
    }

    /// Sets the ignore latch and pauses or resumes the watcher to
    /// match. The latch auto-clears on the next successful save.
    pub fn set_ignore_file_changes_until_saved(&mut self, ignore: bool) {
        if self.sentinel.ignore_until_saved() != ignore {
            self.sentinel.set_ignore_until_saved(ignore);
            if ignore {
                self.watcher.pause();
            } else {
                self.watcher.resume();
            }
        }
    }

    // =========================================================================
    // Deleted objects
    // =========================================================================

    /// Tombstones recorded this session and loaded from the container.
    #[must_use]
    pub fn deleted_objects(&self) -> &[DeletedObject] {
        &self.deleted_objects
    }

    /// Whether a tombstone exists for `uuid`.
    #[must_use]
    pub fn contains_deleted_object(&self, uuid: Uuid) -> bool {
        self.deleted_objects.iter().any(|o| o.uuid == uuid)
    }

    /// Appends a tombstone for `uuid` stamped with the current time.
    /// Duplicates are skipped.
    pub fn add_deleted_object(&mut self, uuid: Uuid) {
        if !self.contains_deleted_object(uuid) {
            self.deleted_objects.push(DeletedObject::now(uuid));
        }
    }

    /// Replaces the tombstone list, used by merge flows.
    pub fn set_deleted_objects(&mut self, objects: Vec<DeletedObject>) {
        self.deleted_objects = objects;
    }

    // =========================================================================
    // Derived views
    // =========================================================================

    /// Most frequent usernames across non-recycled entries, refreshed
    /// on open and after each successful save.
    #[must_use]
    pub fn common_usernames(&self) -> &[String] {
        &self.common_usernames
    }

    /// Sorted unique tags across non-recycled entries, refreshed on
    /// open and on every modification.
    #[must_use]
    pub fn tag_list(&self) -> &[String] {
        &self.tag_list
    }

    /// Recomputes the common-usernames view.
    pub fn update_common_usernames(&mut self) {
        let ranked = {
            let recycled = self.recycled_entry_uuids();
            let entries: Vec<&Entry> = self
                .root
                .entries_recursive()
                .into_iter()
                .filter(|e| !recycled.contains(&e.uuid))
                .collect();
            top_usernames(&entries, COMMON_USERNAMES_TOP_N)
        };
        self.common_usernames = ranked;
    }

    /// Recomputes the tag-list view and publishes `TagListUpdated`.
    pub fn update_tag_list(&mut self) {
        let tags = {
            let recycled = self.recycled_entry_uuids();
            let mut set = BTreeSet::new();
            for entry in self.root.entries_recursive() {
                if !recycled.contains(&entry.uuid) {
                    set.extend(entry.tags.iter().cloned());
                }
            }
            set.into_iter().collect()
        };
        self.tag_list = tags;
        self.events.emit(&DatabaseEvent::TagListUpdated);
    }

    /// Removes `tag` from every non-recycled entry. Does not itself
    /// mark the database modified.
    pub fn remove_tag(&mut self, tag: &str) {
        let recycled = self.recycled_entry_uuids();
        for entry in self.root.entries_recursive_mut() {
            if !recycled.contains(&entry.uuid) {
                entry.remove_tag(tag);
            }
        }
    }

    fn recycled_entry_uuids(&self) -> HashSet<Uuid> {
        self.metadata
            .recycle_bin_uuid
            .and_then(|uuid| self.root.find_group(uuid))
            .map(|bin| bin.entries_recursive().iter().map(|e| e.uuid).collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Recycle bin
    // =========================================================================

    /// Creates the recycle-bin group under the root and registers it
    /// in the metadata. Returns its UUID.
    pub fn create_recycle_bin(&mut self) -> Uuid {
        let mut bin = Group::new(RECYCLE_BIN_NAME);
        bin.icon_id = RECYCLE_BIN_ICON;
        bin.searching_enabled = Some(false);
        bin.auto_type_enabled = Some(false);
        let uuid = bin.uuid;
        self.root.groups.push(bin);
        self.metadata.set_recycle_bin(uuid);
        uuid
    }

    fn ensure_recycle_bin(&mut self) -> Uuid {
        match self
            .metadata
            .recycle_bin_uuid
            .filter(|uuid| self.root.find_group(*uuid).is_some())
        {
            Some(uuid) => uuid,
            None => self.create_recycle_bin(),
        }
    }

    /// Whether the entry with `uuid` lives under the recycle bin.
    #[must_use]
    pub fn is_entry_recycled(&self, uuid: Uuid) -> bool {
        self.metadata
            .recycle_bin_uuid
            .and_then(|bin| self.root.find_group(bin))
            .is_some_and(|bin| bin.contains_entry(uuid))
    }

    /// Whether the group with `uuid` lives under the recycle bin.
    #[must_use]
    pub fn is_group_recycled(&self, uuid: Uuid) -> bool {
        self.metadata
            .recycle_bin_uuid
            .and_then(|bin| self.root.find_group(bin))
            .is_some_and(|bin| bin.contains_group(uuid))
    }

    /// Soft-deletes the entry with `uuid`: moved into the recycle bin
    /// when enabled, destroyed with a tombstone otherwise. Returns
    /// whether an entry was found.
    pub fn recycle_entry(&mut self, uuid: Uuid) -> bool {
        if self.metadata.recycle_bin_enabled {
            let bin = self.ensure_recycle_bin();
            let Some(entry) = self.root.take_entry(uuid) else {
                return false;
            };
            self.root
                .add_entry_to(bin, entry)
                .expect("the recycle bin was just ensured to exist");
        } else {
            let Some(entry) = self.root.take_entry(uuid) else {
                return false;
            };
            self.add_deleted_object(entry.uuid);
        }
        self.mark_as_modified();
        true
    }

    /// Soft-deletes the group with `uuid` and its subtree. The root
    /// and the bin itself cannot be recycled. Returns whether a group
    /// was moved or destroyed.
    pub fn recycle_group(&mut self, uuid: Uuid) -> bool {
        if uuid == self.root.uuid || self.metadata.recycle_bin_uuid == Some(uuid) {
            return false;
        }
        // A group containing the bin cannot be moved into it.
        if let Some(bin) = self.metadata.recycle_bin_uuid {
            if self
                .root
                .find_group(uuid)
                .is_some_and(|g| g.find_group(bin).is_some())
            {
                return false;
            }
        }

        if self.metadata.recycle_bin_enabled {
            let bin = self.ensure_recycle_bin();
            let Some(group) = self.root.take_group(uuid) else {
                return false;
            };
            self.root
                .add_group_to(bin, group)
                .expect("the recycle bin was just ensured to exist");
        } else {
            let Some(group) = self.root.take_group(uuid) else {
                return false;
            };
            let mut uuids = Vec::new();
            group.collect_uuids(&mut uuids);
            for uuid in uuids {
                self.add_deleted_object(uuid);
            }
        }
        self.mark_as_modified();
        true
    }

    /// Destroys the direct children of the recycle bin, recording
    /// tombstones for everything removed.
    pub fn empty_recycle_bin(&mut self) {
        if !self.metadata.recycle_bin_enabled {
            return;
        }
        let Some(bin_uuid) = self.metadata.recycle_bin_uuid else {
            return;
        };
        let Some(bin) = self.root.find_group_mut(bin_uuid) else {
            return;
        };

        let entries = std::mem::take(&mut bin.entries);
        let groups = std::mem::take(&mut bin.groups);
        if entries.is_empty() && groups.is_empty() {
            return;
        }

        for entry in &entries {
            self.add_deleted_object(entry.uuid);
        }
        for group in &groups {
            let mut uuids = Vec::new();
            group.collect_uuids(&mut uuids);
            for uuid in uuids {
                self.add_deleted_object(uuid);
            }
        }
        self.mark_as_modified();
    }

    // =========================================================================
    // Pre-unlock metadata
    // =========================================================================

    /// Stable public identifier of the container.
    ///
    /// For format versions before 4 this is synthesized from the file
    /// path (first 16 bytes of its SHA-256); from version 4 on it is
    /// stored in public custom data, created on demand.
    pub fn public_uuid(&mut self) -> Uuid {
        if self.data.format_version < FILE_VERSION_4 {
            let path = self
                .data
                .file_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let digest = Sha256::digest(path.as_bytes());
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&digest[..16]);
            return Uuid::from_bytes(bytes);
        }

        if !self.data.public_custom_data.contains(KEY_PUBLIC_UUID) {
            self.data.public_custom_data.set(
                KEY_PUBLIC_UUID,
                CustomDataValue::Bytes(Uuid::new_v4().into_bytes().to_vec()),
            );
            self.mark_as_modified();
        }

        self.data
            .public_custom_data
            .get_bytes(KEY_PUBLIC_UUID)
            .and_then(|b| Uuid::from_slice(b).ok())
            .unwrap_or_default()
    }

    /// Pre-unlock display name, if set.
    #[must_use]
    pub fn public_name(&self) -> Option<&str> {
        self.data.public_custom_data.get_string(KEY_PUBLIC_NAME)
    }

    /// Sets or (with an empty string) removes the pre-unlock name.
    pub fn set_public_name(&mut self, name: &str) {
        if name.is_empty() {
            self.data.public_custom_data.remove(KEY_PUBLIC_NAME);
        } else {
            self.data
                .public_custom_data
                .set(KEY_PUBLIC_NAME, CustomDataValue::String(name.to_string()));
        }
        self.mark_as_modified();
    }

    /// Pre-unlock display color, if set.
    #[must_use]
    pub fn public_color(&self) -> Option<&str> {
        self.data.public_custom_data.get_string(KEY_PUBLIC_COLOR)
    }

    /// Sets or (with an empty string) removes the pre-unlock color.
    pub fn set_public_color(&mut self, color: &str) {
        if color.is_empty() {
            self.data.public_custom_data.remove(KEY_PUBLIC_COLOR);
        } else {
            self.data
                .public_custom_data
                .set(KEY_PUBLIC_COLOR, CustomDataValue::String(color.to_string()));
        }
        self.mark_as_modified();
    }

    /// Pre-unlock icon index, or `None` when unset.
    #[must_use]
    pub fn public_icon(&self) -> Option<i64> {
        self.data.public_custom_data.get_integer(KEY_PUBLIC_ICON)
    }

    /// Sets or (with a negative index) removes the pre-unlock icon.
    pub fn set_public_icon(&mut self, icon: i64) {
        if icon < 0 {
            self.data.public_custom_data.remove(KEY_PUBLIC_ICON);
        } else {
            self.data
                .public_custom_data
                .set(KEY_PUBLIC_ICON, CustomDataValue::Integer(icon));
        }
        self.mark_as_modified();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Whether a save is currently in flight.
    #[must_use]
    pub fn is_saving(&self) -> bool {
        match self.save_mutex.try_lock() {
            Ok(guard) => {
                drop(guard);
                false
            }
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(guard)) => {
                drop(guard);
                false
            }
        }
    }

    /// Releases all heap-owned state: deregisters the identifier,
    /// resets data, metadata, tree, tombstones, derived views, and the
    /// sentinel, and stops the watcher. Emits `Discarded` first if
    /// unsaved changes exist. Runs under the save mutex so it cannot
    /// race an in-flight save.
    pub fn release_data(&mut self) {
        debug_assert!(!self.is_saving());
        let mutex = Arc::clone(&self.save_mutex);
        let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);

        if self.modified {
            self.events.emit(&DatabaseEvent::Discarded);
        }
        self.set_emit_modified(false);
        self.modified = false;
        self.has_non_data_change = false;

        if let Some(handle) = self.handle.take() {
            registry::deregister(handle.id());
        }

        self.data.clear();
        self.metadata.clear();
        self.root = Group::new(ROOT_GROUP_NAME);
        self.watcher.stop();

        self.deleted_objects.clear();
        self.common_usernames.clear();
        self.tag_list.clear();
        self.sentinel.clear();
        debug!("released data of database {}", self.id);
    }

    // =========================================================================
    // Codec support
    // =========================================================================

    pub(crate) fn payload_doc(&self) -> PayloadDoc {
        PayloadDoc {
            metadata: self.metadata.clone(),
            root: self.root.clone(),
            deleted_objects: self.deleted_objects.clone(),
        }
    }

    pub(crate) fn install_payload(&mut self, doc: PayloadDoc) {
        self.metadata = doc.metadata;
        self.root = doc.root;
        self.deleted_objects = doc.deleted_objects;
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.release_data();
    }
}
