//! Group/entry tree and database metadata.

pub mod group;
pub mod metadata;

pub use group::{top_usernames, Entry, Group};
pub use metadata::{Metadata, RECYCLE_BIN_ICON};
