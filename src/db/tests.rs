//! Persistence and lifecycle scenarios.

use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use super::*;
use crate::error::DatabaseError;
use crate::format::FILE_VERSION_3_1;
use crate::stream::{hash_first_block, FILE_BLOCK_HASH_SIZE};
use crate::types::{CIPHER_CHACHA20, KEY_RANDOM_SLUG};

fn light_kdf() -> KdfParams {
    KdfParams::Argon2id {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
        seed: vec![1; 32],
    }
}

fn test_db() -> Database {
    let mut db = Database::new();
    db.set_kdf(light_kdf());
    db
}

fn keyed_db(password: &str) -> Database {
    let mut db = test_db();
    db.set_key(Some(Arc::new(CompositeKey::from_password(password))))
        .unwrap();
    db
}

fn subscribe(db: &Database) -> mpsc::Receiver<DatabaseEvent> {
    let (tx, rx) = mpsc::channel();
    db.events().subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

fn wait_for(
    rx: &mpsc::Receiver<DatabaseEvent>,
    timeout: Duration,
    pred: impl Fn(&DatabaseEvent) -> bool,
) -> Option<DatabaseEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

fn add_entry(db: &mut Database, title: &str, username: &str) -> uuid::Uuid {
    let mut entry = Entry::new(title);
    entry.username = username.into();
    let uuid = entry.uuid;
    db.root_mut().entries.push(entry);
    db.mark_as_modified();
    uuid
}

// =============================================================================
// Save preconditions
// =============================================================================

#[test]
fn save_without_a_bound_path_is_refused() {
    let mut db = keyed_db("abc");
    let err = db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap_err();
    assert!(matches!(err, DatabaseError::NoFilePath));
    assert!(format!("{err}").contains("valid file"));
}

#[test]
fn save_of_an_uninitialized_database_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = test_db();
    db.set_file_path(dir.path().join("db.cvlt"));
    let err = db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap_err();
    assert!(matches!(err, DatabaseError::NotInitialized));
}

#[test]
fn concurrent_save_is_refused_without_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.cvlt");
    let mut db = keyed_db("abc");
    db.set_file_path(&path);

    let mutex = Arc::clone(&db.save_mutex);
    let guard = mutex.lock().unwrap();
    assert!(db.is_saving());

    let err = db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap_err();
    assert!(matches!(err, DatabaseError::SaveInProgress));
    assert!(!path.exists());

    drop(guard);
    assert!(!db.is_saving());
}

#[test]
fn open_of_a_missing_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = test_db();
    let err = db
        .open_path(dir.path().join("missing.cvlt"), None)
        .unwrap_err();
    assert!(matches!(err, DatabaseError::FileNotFound { .. }));
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn save_and_reopen_preserves_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.cvlt");
    let key = Arc::new(CompositeKey::from_password("abc"));

    let mut db = test_db();
    db.set_key(Some(Arc::clone(&key))).unwrap();
    let entry_uuid = add_entry(&mut db, "forum", "alice");
    let root_uuid = db.root().uuid;
    db.custom_data_mut()
        .insert("browser-settings".into(), "{}".into());
    db.mark_as_modified();

    db.set_file_path(&path);
    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();
    assert!(!db.is_modified());
    assert!(path.exists());

    // The sentinel reflects the exact bytes written.
    let on_disk = fs::read(&path).unwrap();
    assert!(on_disk.len() >= FILE_BLOCK_HASH_SIZE);
    assert_eq!(db.file_block_hash(), hash_first_block(&on_disk));

    let mut reopened = Database::new();
    reopened.open_path(&path, Some(&key)).unwrap();
    assert_eq!(reopened.root().uuid, root_uuid);
    assert!(reopened.root().contains_entry(entry_uuid));
    assert_eq!(
        reopened.metadata().custom_data_value("browser-settings"),
        Some("{}")
    );
    assert!(!reopened.is_modified());
    assert!(reopened.is_initialized());
    assert_eq!(reopened.common_usernames(), &["alice".to_string()]);
    assert!(reopened.watcher.is_running());
}

#[test]
fn wrong_key_cannot_open_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.cvlt");

    let mut db = keyed_db("correct");
    db.set_file_path(&path);
    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();

    let wrong = Arc::new(CompositeKey::from_password("wrong"));
    let err = Database::new().open_path(&path, Some(&wrong)).unwrap_err();
    assert!(format!("{err}").contains("invalid credentials"));
}

#[test]
fn header_only_open_exposes_public_data_without_a_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.cvlt");

    let mut db = keyed_db("abc");
    db.set_public_name("Family vault");
    db.set_file_path(&path);
    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();

    let mut peek = Database::new();
    peek.open_path(&path, None).unwrap();
    assert_eq!(peek.public_name(), Some("Family vault"));
    assert!(peek.public_custom_data().contains(KEY_RANDOM_SLUG));
    assert!(peek.key().is_none());
    assert!(!peek.is_initialized());
    assert!(peek.root().entries_recursive().is_empty());
    // Payload custom data stays sealed without a key.
    assert!(peek.custom_data().is_empty());
}

#[test]
fn every_cipher_and_compression_round_trips() {
    let combos = [
        (CIPHER_CHACHA20, CompressionAlgorithm::None),
        (CIPHER_CHACHA20, CompressionAlgorithm::Gzip),
        (crate::types::CIPHER_AES256, CompressionAlgorithm::None),
    ];
    for (cipher, compression) in combos {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cvlt");
        let key = Arc::new(CompositeKey::from_password("combo"));

        let mut db = test_db();
        db.set_key(Some(Arc::clone(&key))).unwrap();
        db.set_cipher(cipher);
        db.set_compression_algorithm(compression);
        add_entry(&mut db, "site", "user");
        db.set_file_path(&path);
        db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();

        let mut reopened = Database::new();
        reopened.open_path(&path, Some(&key)).unwrap();
        assert_eq!(reopened.cipher(), cipher);
        assert_eq!(reopened.compression_algorithm(), compression);
        assert_eq!(reopened.root().entries_recursive().len(), 1);
    }
}

#[test]
fn all_write_strategies_produce_readable_containers() {
    let key = Arc::new(CompositeKey::from_password("strategy"));
    for action in [
        SaveAction::Atomic,
        SaveAction::TempFile,
        SaveAction::DirectWrite,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cvlt");

        let mut db = test_db();
        db.set_key(Some(Arc::clone(&key))).unwrap();
        add_entry(&mut db, "site", "user");
        db.set_file_path(&path);
        db.save(action, &BackupPolicy::Disabled).unwrap();

        let on_disk = fs::read(&path).unwrap();
        assert_eq!(db.file_block_hash(), hash_first_block(&on_disk));

        let mut reopened = Database::new();
        reopened.open_path(&path, Some(&key)).unwrap();
        assert_eq!(reopened.root().entries_recursive().len(), 1);
    }
}

// =============================================================================
// Key rotation and randomized output
// =============================================================================

#[test]
fn transformed_key_rotates_on_every_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.cvlt");
    let mut db = keyed_db("rotate");
    db.set_file_path(&path);

    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();
    let first = db.data.transformed_key.clone();

    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();
    let second = db.data.transformed_key.clone();

    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn consecutive_saves_differ_in_the_first_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.cvlt");
    let mut db = keyed_db("differ");
    db.set_file_path(&path);

    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();
    let first = hash_first_block(&fs::read(&path).unwrap());

    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();
    let second = hash_first_block(&fs::read(&path).unwrap());

    assert!(first.is_some());
    assert_ne!(first, second);
}

#[test]
fn identical_key_without_transform_stays_clean() {
    let key = Arc::new(CompositeKey::from_password("abc"));
    let mut db = test_db();
    db.set_key(Some(Arc::clone(&key))).unwrap();
    db.mark_as_clean();

    db.set_key_with(Some(key), false, false, false).unwrap();
    assert!(!db.is_modified());
}

#[test]
fn change_kdf_swaps_key_version_and_marks_modified() {
    let mut db = keyed_db("abc");
    db.mark_as_clean();

    db.change_kdf(KdfParams::AesKdf {
        rounds: 64,
        seed: vec![2; 32],
    })
    .unwrap();

    assert!(db.is_modified());
    assert_eq!(db.format_version(), FILE_VERSION_3_1);
    // The installed transformed key matches a transform under the
    // installed (seed-randomized) descriptor.
    let expected = db.key().unwrap().transform(db.kdf()).unwrap();
    assert_eq!(db.data.transformed_key, expected);
    assert_ne!(db.kdf().seed(), &[2u8; 32][..]);
}

// =============================================================================
// External-change sentinel
// =============================================================================

fn saved_db(dir: &tempfile::TempDir) -> (Database, PathBuf) {
    let path = dir.path().join("db.cvlt");
    let mut db = keyed_db("sentinel");
    db.set_file_path(&path);
    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();
    (db, path)
}

#[test]
fn foreign_rewrite_blocks_the_next_save() {
    let dir = tempfile::tempdir().unwrap();
    let (mut db, path) = saved_db(&dir);
    let rx = subscribe(&db);

    fs::write(&path, vec![0xAB; 2 * FILE_BLOCK_HASH_SIZE]).unwrap();

    let err = db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap_err();
    assert!(matches!(err, DatabaseError::UnmergedChanges));
    assert!(format!("{err}").contains("unmerged changes"));

    let event = wait_for(&rx, Duration::from_secs(5), |e| {
        matches!(e, DatabaseEvent::FileChanged { external: true })
    });
    assert!(event.is_some());

    // The foreign bytes were not clobbered.
    assert_eq!(fs::read(&path).unwrap(), vec![0xAB; 2 * FILE_BLOCK_HASH_SIZE]);
}

#[test]
fn ignore_latch_allows_one_save_and_auto_clears() {
    let dir = tempfile::tempdir().unwrap();
    let (mut db, path) = saved_db(&dir);

    fs::write(&path, vec![0xCD; 2 * FILE_BLOCK_HASH_SIZE]).unwrap();

    db.set_ignore_file_changes_until_saved(true);
    assert!(db.ignore_file_changes_until_saved());

    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();
    assert!(!db.ignore_file_changes_until_saved());

    // The save rewrote the foreign bytes with a real container.
    let key = Arc::new(CompositeKey::from_password("sentinel"));
    Database::new().open_path(&path, Some(&key)).unwrap();
}

#[test]
fn save_to_a_different_path_skips_the_check() {
    let dir = tempfile::tempdir().unwrap();
    let (mut db, path) = saved_db(&dir);

    fs::write(&path, vec![0xEF; 2 * FILE_BLOCK_HASH_SIZE]).unwrap();

    let other = dir.path().join("copy.cvlt");
    db.save_as(&other, SaveAction::Atomic, &BackupPolicy::Disabled)
        .unwrap();
    assert_eq!(db.file_path(), Some(other.as_path()));
}

// =============================================================================
// Backup and restore
// =============================================================================

#[test]
fn save_takes_a_backup_of_the_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let (mut db, path) = saved_db(&dir);
    let first_bytes = fs::read(&path).unwrap();

    let backup_path = dir.path().join("backups").join("db.old.cvlt");
    add_entry(&mut db, "new", "entry");
    db.save(SaveAction::Atomic, &BackupPolicy::Path(backup_path.clone()))
        .unwrap();

    assert_eq!(fs::read(&backup_path).unwrap(), first_bytes);
    assert_ne!(fs::read(&path).unwrap(), first_bytes);
}

#[test]
fn failed_rename_restores_the_backup_and_names_the_staging_file() {
    let dir = tempfile::tempdir().unwrap();
    let (mut db, path) = saved_db(&dir);
    let first_bytes = fs::read(&path).unwrap();
    let backup_path = dir.path().join("db.old.cvlt");

    add_entry(&mut db, "doomed", "change");
    db.fail_rename_for_tests = true;
    let err = db
        .save(SaveAction::TempFile, &BackupPolicy::Path(backup_path.clone()))
        .unwrap_err();

    let DatabaseError::RenameFailed { staging_path, .. } = &err else {
        panic!("expected RenameFailed, got {err}");
    };
    assert!(format!("{err}").contains(&staging_path.display().to_string()));
    assert!(staging_path.exists());

    // Target equals the backup taken just before the write.
    assert_eq!(fs::read(&path).unwrap(), first_bytes);
    assert_eq!(fs::read(&backup_path).unwrap(), first_bytes);

    // Failure leaves the database dirty and the watcher stopped.
    assert!(db.is_modified());
    assert!(!db.watcher.is_running());

    fs::remove_file(staging_path).unwrap();
}

#[test]
fn empty_backup_destination_still_attempts_and_save_survives() {
    let dir = tempfile::tempdir().unwrap();
    let (mut db, _path) = saved_db(&dir);
    add_entry(&mut db, "more", "data");
    // The backup copy to "" fails and is logged; the save goes ahead.
    db.save(SaveAction::Atomic, &BackupPolicy::Path(PathBuf::new()))
        .unwrap();
}

#[test]
fn backup_and_restore_helpers_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.cvlt");
    let backup = dir.path().join("nested").join("backup.cvlt");
    fs::write(&source, b"original contents").unwrap();

    backup_database(&source, &backup).unwrap();
    assert_eq!(fs::read(&backup).unwrap(), b"original contents");

    fs::write(&source, b"clobbered").unwrap();
    restore_database(&source, &backup).unwrap();
    assert_eq!(fs::read(&source).unwrap(), b"original contents");

    let missing = dir.path().join("missing.cvlt");
    assert!(restore_database(&source, &missing).is_err());
}

// =============================================================================
// Modification tracking
// =============================================================================

#[test]
fn burst_of_edits_produces_one_modified_event() {
    let mut db = keyed_db("debounce");
    db.mark_as_clean();
    let rx = subscribe(&db);

    for i in 0..10 {
        add_entry(&mut db, &format!("entry-{i}"), "user");
    }

    let first = wait_for(&rx, Duration::from_secs(2), |e| {
        matches!(e, DatabaseEvent::Modified)
    });
    assert!(first.is_some());

    let second = wait_for(&rx, Duration::from_millis(400), |e| {
        matches!(e, DatabaseEvent::Modified)
    });
    assert!(second.is_none(), "debounce must coalesce the burst");
}

#[test]
fn non_data_change_never_arms_the_save_timer() {
    let mut db = keyed_db("nondata");
    db.mark_as_clean();
    let rx = subscribe(&db);

    db.mark_non_data_change();
    assert!(db.has_non_data_changes());
    assert!(!db.is_modified());

    let event = wait_for(&rx, Duration::from_millis(50), |e| {
        matches!(e, DatabaseEvent::NonDataChanged)
    });
    assert!(event.is_some());

    let modified = wait_for(&rx, Duration::from_millis(400), |e| {
        matches!(e, DatabaseEvent::Modified)
    });
    assert!(modified.is_none());
}

#[test]
fn saved_fires_exactly_once_per_clean_transition() {
    let mut db = keyed_db("saved-once");
    db.mark_as_clean();
    let rx = subscribe(&db);

    add_entry(&mut db, "x", "y");
    db.mark_as_clean();
    db.mark_as_clean();

    let first = wait_for(&rx, Duration::from_millis(200), |e| {
        matches!(e, DatabaseEvent::Saved)
    });
    assert!(first.is_some());
    let second = wait_for(&rx, Duration::from_millis(200), |e| {
        matches!(e, DatabaseEvent::Saved)
    });
    assert!(second.is_none());
}

#[test]
fn suspended_signaling_disarms_the_pending_timer() {
    let mut db = keyed_db("suspend");
    db.mark_as_clean();
    let rx = subscribe(&db);

    add_entry(&mut db, "x", "y");
    db.set_emit_modified(false);

    let modified = wait_for(&rx, Duration::from_millis(400), |e| {
        matches!(e, DatabaseEvent::Modified)
    });
    assert!(modified.is_none());
    assert!(db.is_modified());
    db.set_emit_modified(true);
}

// =============================================================================
// Lifecycle and registry
// =============================================================================

#[test]
fn registry_tracks_live_databases() {
    let db = Database::new();
    let id = db.id();
    assert_eq!(database_by_uuid(id).unwrap().id(), id);
    drop(db);
    assert!(database_by_uuid(id).is_none());
}

#[test]
fn release_data_deregisters_and_discards() {
    let mut db = keyed_db("release");
    add_entry(&mut db, "pending", "user");
    let id = db.id();
    let rx = subscribe(&db);

    db.release_data();

    assert!(database_by_uuid(id).is_none());
    assert!(!db.is_modified());
    assert!(db.file_path().is_none());
    assert!(db.key().is_none());
    assert!(db.file_block_hash().is_none());
    assert!(db.root().entries_recursive().is_empty());

    let discarded = wait_for(&rx, Duration::from_millis(200), |e| {
        matches!(e, DatabaseEvent::Discarded)
    });
    assert!(discarded.is_some());
}

#[test]
fn set_file_path_emits_and_resets_the_latch() {
    let mut db = test_db();
    db.set_ignore_file_changes_until_saved(true);
    let rx = subscribe(&db);

    db.set_file_path("/tmp/renamed.cvlt");
    assert!(!db.ignore_file_changes_until_saved());
    let event = wait_for(&rx, Duration::from_millis(200), |e| {
        matches!(e, DatabaseEvent::FilePathChanged { .. })
    });
    assert!(event.is_some());

    // Setting the same path again is a no-op.
    db.set_file_path("/tmp/renamed.cvlt");
    let repeat = wait_for(&rx, Duration::from_millis(100), |e| {
        matches!(e, DatabaseEvent::FilePathChanged { .. })
    });
    assert!(repeat.is_none());
}

// =============================================================================
// Derived views and recycle bin
// =============================================================================

#[test]
fn tag_list_and_common_usernames_skip_recycled_entries() {
    let mut db = keyed_db("views");
    let kept = add_entry(&mut db, "kept", "alice");
    let trashed = add_entry(&mut db, "trashed", "mallory");
    db.root_mut().find_entry_mut(kept).unwrap().add_tag("work");
    db.root_mut()
        .find_entry_mut(trashed)
        .unwrap()
        .add_tag("junk");

    assert!(db.recycle_entry(trashed));
    assert!(db.is_entry_recycled(trashed));
    assert!(!db.is_entry_recycled(kept));

    db.update_tag_list();
    db.update_common_usernames();
    assert_eq!(db.tag_list(), &["work".to_string()]);
    assert_eq!(db.common_usernames(), &["alice".to_string()]);
}

#[test]
fn recycling_with_the_bin_disabled_destroys_and_tombstones() {
    let mut db = keyed_db("nobin");
    db.metadata_mut().recycle_bin_enabled = false;
    let uuid = add_entry(&mut db, "gone", "user");

    assert!(db.recycle_entry(uuid));
    assert!(db.root().find_entry(uuid).is_none());
    assert!(db.contains_deleted_object(uuid));
    assert!(db.metadata().recycle_bin_uuid.is_none());
}

#[test]
fn empty_recycle_bin_destroys_children_transitively() {
    let mut db = keyed_db("emptybin");
    let entry = add_entry(&mut db, "trash me", "user");
    let mut sub = Group::new("Old stuff");
    let sub_entry = Entry::new("nested");
    let sub_entry_uuid = sub_entry.uuid;
    sub.entries.push(sub_entry);
    let sub_uuid = sub.uuid;
    db.root_mut().groups.push(sub);

    assert!(db.recycle_entry(entry));
    assert!(db.recycle_group(sub_uuid));
    assert!(db.is_group_recycled(sub_uuid));

    db.empty_recycle_bin();

    let bin = db.metadata().recycle_bin_uuid.unwrap();
    let bin_group = db.root().find_group(bin).unwrap();
    assert!(bin_group.entries.is_empty());
    assert!(bin_group.groups.is_empty());
    assert!(db.contains_deleted_object(entry));
    assert!(db.contains_deleted_object(sub_uuid));
    assert!(db.contains_deleted_object(sub_entry_uuid));
}

#[test]
fn root_and_bin_cannot_be_recycled() {
    let mut db = keyed_db("guards");
    let root_uuid = db.root().uuid;
    assert!(!db.recycle_group(root_uuid));

    let entry = add_entry(&mut db, "seed", "user");
    assert!(db.recycle_entry(entry));
    let bin = db.metadata().recycle_bin_uuid.unwrap();
    assert!(!db.recycle_group(bin));
}

#[test]
fn remove_tag_touches_only_live_entries() {
    let mut db = keyed_db("tags");
    let live = add_entry(&mut db, "live", "user");
    let dead = add_entry(&mut db, "dead", "user");
    db.root_mut().find_entry_mut(live).unwrap().add_tag("shared");
    db.root_mut().find_entry_mut(dead).unwrap().add_tag("shared");
    db.recycle_entry(dead);
    db.mark_as_clean();

    db.remove_tag("shared");
    assert!(db.root().find_entry(live).unwrap().tags.is_empty());
    assert!(!db.root().find_entry(dead).unwrap().tags.is_empty());
    // The per-entry mutation is what marks modified, not remove_tag.
    assert!(!db.is_modified());
}

#[test]
fn deleted_objects_deduplicate() {
    let mut db = test_db();
    let uuid = uuid::Uuid::new_v4();
    db.add_deleted_object(uuid);
    db.add_deleted_object(uuid);
    assert_eq!(db.deleted_objects().len(), 1);
    assert!(db.contains_deleted_object(uuid));
}

// =============================================================================
// Pre-unlock metadata
// =============================================================================

#[test]
fn public_uuid_is_synthesized_for_legacy_versions() {
    let mut db = test_db();
    db.set_format_version(FILE_VERSION_3_1);
    db.set_file_path("/tmp/stable-path.cvlt");
    db.mark_as_clean();

    let a = db.public_uuid();
    let b = db.public_uuid();
    assert_eq!(a, b);
    assert!(!db.public_custom_data().contains(crate::types::KEY_PUBLIC_UUID));
    assert!(!db.is_modified());
}

#[test]
fn public_uuid_is_created_on_demand_for_v4() {
    let mut db = test_db();
    db.mark_as_clean();

    let created = db.public_uuid();
    assert!(db.is_modified());
    assert_eq!(db.public_uuid(), created);
    assert!(db.public_custom_data().contains(crate::types::KEY_PUBLIC_UUID));
}

#[test]
fn public_fields_set_and_remove() {
    let mut db = test_db();
    db.set_public_name("Work");
    db.set_public_color("#ff0000");
    db.set_public_icon(7);
    assert_eq!(db.public_name(), Some("Work"));
    assert_eq!(db.public_color(), Some("#ff0000"));
    assert_eq!(db.public_icon(), Some(7));

    db.set_public_name("");
    db.set_public_color("");
    db.set_public_icon(-1);
    assert_eq!(db.public_name(), None);
    assert_eq!(db.public_color(), None);
    assert_eq!(db.public_icon(), None);
}

// =============================================================================
// Extract and import
// =============================================================================

#[test]
fn extract_and_import_round_trip_the_payload() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = keyed_db("export");
    let entry_uuid = add_entry(&mut db, "exported entry", "alice");

    let json = db.extract().unwrap();
    assert!(std::str::from_utf8(&json).unwrap().contains("exported entry"));

    let export_path = dir.path().join("export.json");
    fs::write(&export_path, &json).unwrap();

    let mut imported = test_db();
    imported.import(&export_path).unwrap();
    assert!(imported.root().contains_entry(entry_uuid));
    assert!(imported.is_modified());
}

// =============================================================================
// Challenge-response
// =============================================================================

struct FixedToken;

impl crate::key::ChallengeResponseFactor for FixedToken {
    fn challenge(&self, seed: &[u8]) -> Result<Vec<u8>, crate::error::KeyError> {
        Ok(seed.iter().map(|b| b ^ 0x5A).collect())
    }
}

struct BrokenToken;

impl crate::key::ChallengeResponseFactor for BrokenToken {
    fn challenge(&self, _seed: &[u8]) -> Result<Vec<u8>, crate::error::KeyError> {
        Err(crate::error::KeyError::Challenge("token unplugged".into()))
    }
}

#[test]
fn challenge_master_seed_stores_seed_and_response() {
    let mut key = CompositeKey::from_password("cr");
    key.add_challenge_factor(Arc::new(FixedToken));
    let mut db = test_db();
    db.set_key(Some(Arc::new(key))).unwrap();

    db.challenge_master_seed(&[7u8; 32]).unwrap();
    assert_eq!(db.data.master_seed.as_bytes(), &[7u8; 32]);
    assert_eq!(db.data.challenge_response_key.as_bytes(), &[0x5D; 32]);
}

#[test]
fn empty_challenge_response_clears_the_cr_key() {
    let mut db = keyed_db("nocr");
    db.data.challenge_response_key =
        crate::key::KeyMaterial::from_bytes(vec![1, 2, 3]);
    db.challenge_master_seed(&[9u8; 32]).unwrap();
    assert!(db.data.challenge_response_key.is_empty());
}

#[test]
fn failing_token_surfaces_a_key_error() {
    let mut key = CompositeKey::from_password("cr");
    key.add_challenge_factor(Arc::new(BrokenToken));
    let mut db = test_db();
    db.set_key(Some(Arc::new(key))).unwrap();

    let err = db.challenge_master_seed(&[1u8; 32]).unwrap_err();
    assert!(matches!(err, DatabaseError::Key(_)));
    assert!(db.key_error().unwrap().contains("token unplugged"));
}

#[test]
fn cr_backed_database_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cr.cvlt");

    let make_key = || {
        let mut key = CompositeKey::from_password("cr-disk");
        key.add_challenge_factor(Arc::new(FixedToken));
        Arc::new(key)
    };

    let mut db = test_db();
    db.set_key(Some(make_key())).unwrap();
    add_entry(&mut db, "token-protected", "user");
    db.set_file_path(&path);
    db.save(SaveAction::Atomic, &BackupPolicy::Disabled).unwrap();

    let mut reopened = Database::new();
    reopened.open_path(&path, Some(&make_key())).unwrap();
    assert_eq!(reopened.root().entries_recursive().len(), 1);
}
