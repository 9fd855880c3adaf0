//! Persistence engine: open, save, write strategies, backup/restore.
//!
//! The save path is a state machine over preconditions (no overlapping
//! save, initialized database, no foreign on-disk changes), a random
//! padding step, and one of three write strategies with different
//! atomicity/portability trade-offs. The blocking write always runs on
//! a worker thread while the caller waits for it; the save mutex is
//! held across the worker's entire execution.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::thread;

use log::{debug, warn};
use rand::Rng;
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};
use crate::format;
use crate::key::{CompositeKey, KeyMaterial};
use crate::stream::{hash_first_block, HashingSink};
use crate::types::{CustomDataValue, KEY_RANDOM_SLUG};

use super::events::DatabaseEvent;
use super::sentinel::SentinelVerdict;
use super::Database;

/// On-disk write strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveAction {
    /// Write to a sibling temp file and rename over the target.
    /// Preferred wherever the filesystem supports atomic replace.
    Atomic,
    /// Write to an independent temp file, then remove the target and
    /// rename the temp into place. Not atomic; works around
    /// cloud-sync mounts where atomic-rename helpers malfunction.
    TempFile,
    /// Truncate the target in place and write. For special mounts
    /// that require in-place writes.
    DirectWrite,
}

/// Whether and where to take a backup before writing.
///
/// The explicit off state replaces the source's null path; an empty
/// `Path` still attempts a backup against an empty destination, which
/// fails and is logged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackupPolicy {
    /// No backup is taken.
    #[default]
    Disabled,
    /// Backup to this path before writing.
    Path(PathBuf),
}

impl Database {
    // =========================================================================
    // Open
    // =========================================================================

    /// Opens the database from the bound file path.
    ///
    /// With `key == None` only the header is read.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NoFilePath`] when no path is bound,
    /// and otherwise everything [`Database::open_path`] returns.
    pub fn open(&mut self, key: Option<&Arc<CompositeKey>>) -> DatabaseResult<()> {
        let path = self.data.file_path.clone().ok_or(DatabaseError::NoFilePath)?;
        self.open_path(path, key)
    }

    /// Opens the database from `path`: decrypts and parses the
    /// container, binds the path, records the file-block hash, marks
    /// the database clean, and starts the external watcher.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for a missing file, an I/O error when
    /// the file cannot be read, a codec error for malformed containers
    /// or wrong credentials, and a key error if the KDF fails.
    pub fn open_path(
        &mut self,
        path: impl AsRef<Path>,
        key: Option<&Arc<CompositeKey>>,
    ) -> DatabaseResult<()> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(DatabaseError::FileNotFound { path });
        }

        // Read-only open; read-write trips over shared-drive locks.
        let bytes = fs::read(&path)
            .map_err(|e| DatabaseError::io(format!("opening file {}", path.display()), e))?;

        self.set_emit_modified(false);
        let result = self.load_bytes(&bytes, &path, key);
        self.set_emit_modified(true);
        result
    }

    fn load_bytes(
        &mut self,
        bytes: &[u8],
        path: &Path,
        key: Option<&Arc<CompositeKey>>,
    ) -> DatabaseResult<()> {
        // Record the first-block hash before parsing. Files shorter
        // than the block leave the sentinel empty.
        self.sentinel.clear();
        self.sentinel.set_digest(hash_first_block(bytes));

        format::read_container(&mut &bytes[..], key, self)?;

        self.set_file_path(path.to_path_buf());
        self.mark_as_clean();
        self.events.emit(&DatabaseEvent::Opened);
        self.update_common_usernames();
        self.update_tag_list();

        if let Some(canonical) = self.canonical_file_path() {
            let bus = self.events.clone();
            self.watcher.start(canonical, bus);
        }

        debug!("opened database from {}", path.display());
        Ok(())
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Saves the database to the bound file path.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NoFilePath`] when no path is bound,
    /// and otherwise everything [`Database::save_as`] returns.
    pub fn save(&mut self, action: SaveAction, backup: &BackupPolicy) -> DatabaseResult<()> {
        let path = self.data.file_path.clone().ok_or(DatabaseError::NoFilePath)?;
        self.save_as(path, action, backup)
    }

    /// Saves the database to `path`.
    ///
    /// Preconditions are checked in order: no save may be in flight,
    /// the database must be initialized, and a same-path save must not
    /// clobber foreign on-disk changes (unless the ignore latch is
    /// set). On success the path is rebound, the database marked
    /// clean, and the watcher restarted. On failure the database stays
    /// modified and the watcher stays stopped: the on-disk bytes no
    /// longer represent this database.
    ///
    /// # Errors
    ///
    /// `SaveInProgress`, `NotInitialized`, `UnmergedChanges` (with an
    /// asynchronous `FileChanged { external: true }` event), plus I/O,
    /// codec, and key errors from the write itself.
    pub fn save_as(
        &mut self,
        path: impl AsRef<Path>,
        action: SaveAction,
        backup: &BackupPolicy,
    ) -> DatabaseResult<()> {
        let path = path.as_ref().to_path_buf();

        // Disallow overlapping save operations.
        if self.is_saving() {
            return Err(DatabaseError::SaveInProgress);
        }

        // Never save an uninitialized database.
        if !self.is_initialized() {
            return Err(DatabaseError::NotInitialized);
        }

        // Refuse to overwrite external modifications unless allowed.
        if !self.sentinel.ignore_until_saved()
            && !self.sentinel.is_empty()
            && self.data.file_path.as_ref() == Some(&path)
            && self.sentinel.check_disk(&path)? == SentinelVerdict::Mismatch
        {
            let bus = self.events.clone();
            let _ = thread::Builder::new()
                .name("file-changed-notify".into())
                .spawn(move || bus.emit(&DatabaseEvent::FileChanged { external: true }));
            return Err(DatabaseError::UnmergedChanges);
        }

        self.watcher.stop();

        // Random padding defeats byte-identical-export deduplication
        // side channels on cloud-sync storage.
        let slug_len = rand::thread_rng().gen_range(64..=512);
        let slug = KeyMaterial::random(slug_len)?;
        self.data.public_custom_data.set(
            KEY_RANDOM_SLUG,
            CustomDataValue::String(hex::encode(slug.as_bytes())),
        );

        match self.locked_save(&path, action, backup) {
            Ok((real_path, is_new_file, was_hidden)) => {
                self.set_file_path(path);
                self.mark_as_clean();
                self.update_common_usernames();
                if is_new_file {
                    set_owner_only_permissions(&real_path);
                }
                restore_hidden_state(&real_path, was_hidden);
                self.sentinel.set_ignore_until_saved(false);

                let bus = self.events.clone();
                self.watcher.start(real_path, bus);
                Ok(())
            }
            Err(e) => {
                self.mark_as_modified();
                Err(e)
            }
        }
    }

    /// Resolves the target, then runs [`Database::perform_save`] on a
    /// worker thread under the save mutex.
    fn locked_save(
        &mut self,
        path: &Path,
        action: SaveAction,
        backup: &BackupPolicy,
    ) -> DatabaseResult<(PathBuf, bool, bool)> {
        // Prevent destructive operations while saving. Held until the
        // worker is done, released on every exit path.
        let mutex = Arc::clone(&self.save_mutex);
        let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);

        let real_path = if path.exists() {
            fs::canonicalize(path)
        } else {
            std::path::absolute(path)
        }
        .map_err(|e| DatabaseError::io(format!("resolving path {}", path.display()), e))?;

        let is_new_file = !real_path.exists();
        let was_hidden = file_hidden_state(&real_path);

        let this = &mut *self;
        let worker_path = real_path.clone();
        thread::scope(|scope| {
            scope
                .spawn(move || this.perform_save(&worker_path, action, backup))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })?;

        Ok((real_path, is_new_file, was_hidden))
    }

    fn perform_save(
        &mut self,
        path: &Path,
        action: SaveAction,
        backup: &BackupPolicy,
    ) -> DatabaseResult<()> {
        if let BackupPolicy::Path(backup_path) = backup {
            if let Err(e) = backup_database(path, backup_path) {
                warn!("database backup to {} failed: {e}", backup_path.display());
            }
        }

        match action {
            SaveAction::Atomic => self.save_atomic(path),
            SaveAction::TempFile => self.save_temp_file(path, backup),
            SaveAction::DirectWrite => self.save_direct(path),
        }
    }

    fn save_atomic(&mut self, path: &Path) -> DatabaseResult<()> {
        let temp = sibling_temp_path(path)?;
        let result = self.commit_atomic(path, &temp);
        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }

    fn commit_atomic(&mut self, path: &Path, temp: &Path) -> DatabaseResult<()> {
        let file =
            File::create(temp).map_err(|e| DatabaseError::io("creating save file", e))?;
        let mut sink = HashingSink::new(BufWriter::new(file));
        self.write_database(&mut sink)?;

        let (writer, digest) = sink.finish();
        let file = writer
            .into_inner()
            .map_err(|e| DatabaseError::io("flushing save file", e.into_error()))?;
        file.sync_all()
            .map_err(|e| DatabaseError::io("syncing save file", e))?;
        drop(file);

        // The replacement inherits the permissions of the original.
        if let Ok(meta) = fs::metadata(path) {
            let _ = fs::set_permissions(temp, meta.permissions());
        }

        fs::rename(temp, path)
            .map_err(|e| DatabaseError::io("renaming save file into place", e))?;
        fsync_parent_dir(path);

        self.sentinel.set_digest(digest);
        Ok(())
    }

    fn save_temp_file(&mut self, path: &Path, backup: &BackupPolicy) -> DatabaseResult<()> {
        let temp = tempfile::NamedTempFile::new()
            .map_err(|e| DatabaseError::io("creating temporary file", e))?;
        let mut sink = HashingSink::new(temp);
        self.write_database(&mut sink)?;

        let (temp, digest) = sink.finish();
        temp.as_file()
            .sync_all()
            .map_err(|e| DatabaseError::io("syncing temporary file", e))?;

        // Delete the original and move the temp file into place.
        let previous_permissions = fs::metadata(path).ok().map(|m| m.permissions());
        let _ = fs::remove_file(path);

        #[cfg(test)]
        {
            if self.fail_rename_for_tests {
                return self.fail_temp_rename(
                    temp,
                    path,
                    backup,
                    "simulated rename failure".into(),
                );
            }
        }

        match temp.persist(path) {
            Ok(file) => {
                if let Some(perms) = previous_permissions {
                    let _ = file.set_permissions(perms);
                }
                self.sentinel.set_digest(digest);
                Ok(())
            }
            Err(e) => {
                let message = e.error.to_string();
                self.fail_temp_rename(e.file, path, backup, message)
            }
        }
    }

    /// Rename into place failed: keep the staging file, attempt a
    /// restore from backup, and surface the staging path.
    fn fail_temp_rename(
        &mut self,
        temp: tempfile::NamedTempFile,
        path: &Path,
        backup: &BackupPolicy,
        message: String,
    ) -> DatabaseResult<()> {
        let temp_path = temp.into_temp_path();
        let staging_path = temp_path.to_path_buf();
        if let Err(e) = temp_path.keep() {
            warn!(
                "unable to keep staging file {}: {e}",
                staging_path.display()
            );
        }

        if let BackupPolicy::Path(backup_path) = backup {
            match restore_database(path, backup_path) {
                Ok(()) => debug!(
                    "restored {} from backup {}",
                    path.display(),
                    backup_path.display()
                ),
                Err(e) => warn!(
                    "restore from backup {} failed: {e}",
                    backup_path.display()
                ),
            }
        }

        Err(DatabaseError::RenameFailed {
            message,
            staging_path,
        })
    }

    fn save_direct(&mut self, path: &Path) -> DatabaseResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| DatabaseError::io("opening database file for writing", e))?;
        let mut sink = HashingSink::new(BufWriter::new(file));
        self.write_database(&mut sink)?;

        let (writer, digest) = sink.finish();
        let file = writer
            .into_inner()
            .map_err(|e| DatabaseError::io("flushing database file", e.into_error()))?;
        file.sync_all()
            .map_err(|e| DatabaseError::io("syncing database file", e))?;

        self.sentinel.set_digest(digest);
        Ok(())
    }

    /// Runs the codec with signaling suspended, then asserts it
    /// rotated the transformed key: the fresh master seed implies a
    /// fresh transformed key, so a stale one indicates a broken codec.
    fn write_database<W: Write>(&mut self, sink: &mut W) -> DatabaseResult<()> {
        debug_assert!(self.data.key.is_some());
        let old_transformed = self.data.transformed_key.clone();

        self.set_emit_modified(false);
        let result = format::write_container(sink, self);
        self.set_emit_modified(true);
        result?;

        let new_transformed = &self.data.transformed_key;
        if new_transformed.is_empty() || *new_transformed == old_transformed {
            return Err(DatabaseError::KeyNotRotated);
        }
        Ok(())
    }

    // =========================================================================
    // Extract and import
    // =========================================================================

    /// Exports the plaintext inner payload.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn extract(&self) -> DatabaseResult<Vec<u8>> {
        format::export_payload(self)
    }

    /// Reads a plaintext export into this database, replacing
    /// metadata, tree, and tombstones. Used for forensic and recovery
    /// flows; does not imply saving.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and a codec
    /// error if it is not a valid export.
    pub fn import(&mut self, export_path: impl AsRef<Path>) -> DatabaseResult<()> {
        let path = export_path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| DatabaseError::io(format!("opening file {}", path.display()), e))?;

        self.set_emit_modified(false);
        let result = format::import_payload(&bytes, self);
        self.set_emit_modified(true);
        result?;

        self.mark_as_modified();
        Ok(())
    }
}

// =============================================================================
// Backup / restore
// =============================================================================

/// Replaces any previous backup at `destination` with a copy of
/// `source`, creating missing parent directories and preserving the
/// source's permissions.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created or the copy
/// fails.
pub fn backup_database(source: &Path, destination: &Path) -> DatabaseResult<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| DatabaseError::io("creating backup directory", e))?;
        }
    }

    let permissions = fs::metadata(source).ok().map(|m| m.permissions());
    let _ = fs::remove_file(destination);
    fs::copy(source, destination).map_err(|e| DatabaseError::io("copying database backup", e))?;
    if let Some(permissions) = permissions {
        let _ = fs::set_permissions(destination, permissions);
    }
    Ok(())
}

/// Overwrites `target` from `backup`, preserving the target's previous
/// permissions. Only acts when the backup actually exists.
///
/// # Errors
///
/// Returns an I/O error if the backup is missing or the copy fails.
pub fn restore_database(target: &Path, backup: &Path) -> DatabaseResult<()> {
    if !backup.exists() {
        return Err(DatabaseError::io(
            "restoring database backup",
            io::Error::new(io::ErrorKind::NotFound, "backup file does not exist"),
        ));
    }

    let permissions = fs::metadata(target).ok().map(|m| m.permissions());
    let _ = fs::remove_file(target);
    fs::copy(backup, target)
        .map_err(|e| DatabaseError::io("restoring database backup", e))?;
    if let Some(permissions) = permissions {
        let _ = fs::set_permissions(target, permissions);
    }
    Ok(())
}

// =============================================================================
// Filesystem helpers
// =============================================================================

fn sibling_temp_path(path: &Path) -> DatabaseResult<PathBuf> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            DatabaseError::io(
                "resolving save location",
                io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"),
            )
        })?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("database");
    Ok(parent.join(format!(".{name}.tmp.{}", Uuid::new_v4())))
}

#[cfg(unix)]
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn fsync_parent_dir(_path: &Path) {}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("unable to restrict permissions of {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}

#[cfg(windows)]
fn file_hidden_state(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    fs::metadata(path)
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn file_hidden_state(_path: &Path) -> bool {
    false
}

#[cfg(windows)]
fn restore_hidden_state(path: &Path, was_hidden: bool) {
    if was_hidden {
        // std cannot set file attributes; attrib ships with Windows.
        let _ = std::process::Command::new("attrib")
            .arg("+h")
            .arg(path)
            .status();
    }
}

#[cfg(not(windows))]
fn restore_hidden_state(_path: &Path, _was_hidden: bool) {}
