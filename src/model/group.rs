//! The credential tree: groups and entries addressed by UUID.
//!
//! The tree is plainly owned: a group owns its child groups and
//! entries, and structural moves go through UUID-addressed take and
//! reattach operations instead of parent pointers. "Recycled" status
//! is derived from ancestry by the database layer, not stored on the
//! node.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::now_unix;

/// A single credential entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier.
    pub uuid: Uuid,
    /// Display title.
    pub title: String,
    /// Username.
    pub username: String,
    /// Secret. Protected-string handling is the codec's concern; the
    /// tree stores the plaintext of the unlocked database.
    pub password: String,
    /// Sorted, unique tags.
    pub tags: Vec<String>,
    /// Creation time, UTC unix seconds.
    pub creation_time: u64,
    /// Last modification time, UTC unix seconds.
    pub last_modified: u64,
}

impl Entry {
    /// Creates an entry with a fresh UUID.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_unix();
        Self {
            uuid: Uuid::new_v4(),
            title: title.into(),
            username: String::new(),
            password: String::new(),
            tags: Vec::new(),
            creation_time: now,
            last_modified: now,
        }
    }

    /// Adds `tag` if not already present, keeping the list sorted.
    /// Returns whether the list changed.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        match self.tags.binary_search_by(|t| t.as_str().cmp(tag)) {
            Ok(_) => false,
            Err(pos) => {
                self.tags.insert(pos, tag.to_string());
                self.last_modified = now_unix();
                true
            }
        }
    }

    /// Removes `tag` if present. Returns whether the list changed.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        match self.tags.binary_search_by(|t| t.as_str().cmp(tag)) {
            Ok(pos) => {
                self.tags.remove(pos);
                self.last_modified = now_unix();
                true
            }
            Err(_) => false,
        }
    }
}

/// A group node: named container of entries and child groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Icon index.
    pub icon_id: u32,
    /// Whether search includes this subtree; `None` inherits.
    pub searching_enabled: Option<bool>,
    /// Whether auto-type includes this subtree; `None` inherits.
    pub auto_type_enabled: Option<bool>,
    /// Child groups.
    pub groups: Vec<Group>,
    /// Entries directly in this group.
    pub entries: Vec<Entry>,
}

impl Group {
    /// Creates an empty group with a fresh UUID.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            icon_id: 0,
            searching_enabled: None,
            auto_type_enabled: None,
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// All entries of this subtree in depth-first order.
    #[must_use]
    pub fn entries_recursive(&self) -> Vec<&Entry> {
        let mut out = Vec::new();
        self.visit_entries(&mut out);
        out
    }

    fn visit_entries<'a>(&'a self, out: &mut Vec<&'a Entry>) {
        out.extend(self.entries.iter());
        for group in &self.groups {
            group.visit_entries(out);
        }
    }

    /// Mutable view of every entry of this subtree.
    pub fn entries_recursive_mut(&mut self) -> Vec<&mut Entry> {
        let mut out = Vec::new();
        self.visit_entries_mut(&mut out);
        out
    }

    fn visit_entries_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Entry>) {
        out.extend(self.entries.iter_mut());
        for group in &mut self.groups {
            group.visit_entries_mut(out);
        }
    }

    /// All groups of this subtree, including `self`, depth-first.
    #[must_use]
    pub fn groups_recursive(&self) -> Vec<&Group> {
        let mut out = vec![self];
        let mut index = 0;
        while index < out.len() {
            let children: Vec<&Group> = out[index].groups.iter().collect();
            out.extend(children);
            index += 1;
        }
        out
    }

    /// Finds the group with `uuid` in this subtree.
    #[must_use]
    pub fn find_group(&self, uuid: Uuid) -> Option<&Group> {
        if self.uuid == uuid {
            return Some(self);
        }
        self.groups.iter().find_map(|g| g.find_group(uuid))
    }

    /// Mutable lookup of the group with `uuid`.
    pub fn find_group_mut(&mut self, uuid: Uuid) -> Option<&mut Group> {
        if self.uuid == uuid {
            return Some(self);
        }
        self.groups.iter_mut().find_map(|g| g.find_group_mut(uuid))
    }

    /// Finds the entry with `uuid` in this subtree.
    #[must_use]
    pub fn find_entry(&self, uuid: Uuid) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.uuid == uuid)
            .or_else(|| self.groups.iter().find_map(|g| g.find_entry(uuid)))
    }

    /// Mutable lookup of the entry with `uuid`.
    pub fn find_entry_mut(&mut self, uuid: Uuid) -> Option<&mut Entry> {
        if let Some(pos) = self.entries.iter().position(|e| e.uuid == uuid) {
            return Some(&mut self.entries[pos]);
        }
        self.groups.iter_mut().find_map(|g| g.find_entry_mut(uuid))
    }

    /// Detaches the entry with `uuid` from wherever it lives in this
    /// subtree.
    pub fn take_entry(&mut self, uuid: Uuid) -> Option<Entry> {
        if let Some(pos) = self.entries.iter().position(|e| e.uuid == uuid) {
            return Some(self.entries.remove(pos));
        }
        self.groups.iter_mut().find_map(|g| g.take_entry(uuid))
    }

    /// Detaches the child group with `uuid`. `self` cannot be taken.
    pub fn take_group(&mut self, uuid: Uuid) -> Option<Group> {
        if let Some(pos) = self.groups.iter().position(|g| g.uuid == uuid) {
            return Some(self.groups.remove(pos));
        }
        self.groups.iter_mut().find_map(|g| g.take_group(uuid))
    }

    /// Attaches `entry` to the group with `group_uuid`. Returns the
    /// entry back if no such group exists.
    ///
    /// # Errors
    ///
    /// The unplaced entry is handed back as the error value.
    pub fn add_entry_to(&mut self, group_uuid: Uuid, entry: Entry) -> Result<(), Entry> {
        match self.find_group_mut(group_uuid) {
            Some(group) => {
                group.entries.push(entry);
                Ok(())
            }
            None => Err(entry),
        }
    }

    /// Attaches `group` under the group with `parent_uuid`. Returns
    /// the group back if no such parent exists.
    ///
    /// # Errors
    ///
    /// The unplaced group is handed back as the error value.
    pub fn add_group_to(&mut self, parent_uuid: Uuid, group: Group) -> Result<(), Group> {
        match self.find_group_mut(parent_uuid) {
            Some(parent) => {
                parent.groups.push(group);
                Ok(())
            }
            None => Err(group),
        }
    }

    /// Whether the subtree rooted here contains the entry with `uuid`.
    #[must_use]
    pub fn contains_entry(&self, uuid: Uuid) -> bool {
        self.find_entry(uuid).is_some()
    }

    /// Whether the subtree rooted here contains the group with `uuid`
    /// (excluding `self`).
    #[must_use]
    pub fn contains_group(&self, uuid: Uuid) -> bool {
        self.groups.iter().any(|g| g.find_group(uuid).is_some())
    }

    /// Collects the UUIDs of every group and entry in this subtree,
    /// including `self`.
    pub fn collect_uuids(&self, out: &mut Vec<Uuid>) {
        out.push(self.uuid);
        out.extend(self.entries.iter().map(|e| e.uuid));
        for group in &self.groups {
            group.collect_uuids(out);
        }
    }
}

/// The `top_n` most frequent usernames among `entries`, most frequent
/// first, ties broken lexically. Empty usernames are skipped.
#[must_use]
pub fn top_usernames(entries: &[&Entry], top_n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in entries {
        if !entry.username.is_empty() {
            *counts.entry(entry.username.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(name, _)| name.to_string())
        .collect()
}
