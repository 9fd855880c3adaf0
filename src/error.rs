//! Error types for database operations.
//!
//! All fallible entry points of the crate return [`DatabaseResult`].
//! Display strings are complete sentences suitable for surfacing
//! directly to a UI.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors produced by the key layer (KDF transforms and
/// challenge-response exchanges).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The KDF rejected its parameters or failed to derive a key.
    #[error("key transformation failed: {0}")]
    Transform(String),

    /// A challenge-response factor failed to answer the master seed.
    #[error("challenge-response failed: {0}")]
    Challenge(String),

    /// An operation that requires a key was invoked without one.
    #[error("no key has been set")]
    MissingKey,
}

/// Errors that can occur while opening, saving, or mutating a database.
#[derive(Debug)]
pub enum DatabaseError {
    /// Open or save was called before a file path was bound.
    NoFilePath,

    /// The file to open does not exist.
    FileNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// An I/O operation failed.
    Io {
        /// Context describing the operation.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The container codec rejected input or failed to produce output.
    Codec {
        /// Message from the codec, surfaced verbatim.
        message: String,
    },

    /// A KDF transform or challenge-response exchange failed.
    Key(KeyError),

    /// Save was called on a database lacking a key or root group.
    NotInitialized,

    /// A save was attempted while another save is in flight.
    SaveInProgress,

    /// The on-disk file block hash disagrees with the one observed at
    /// open; saving would clobber foreign modifications.
    UnmergedChanges,

    /// The first file block could not be read even though the file is
    /// large enough to contain it.
    BlockReadError,

    /// The temp-file strategy could not rename its staging file into
    /// place.
    RenameFailed {
        /// The rename error.
        message: String,
        /// Location of the surviving staging file.
        staging_path: PathBuf,
    },

    /// The transformed key did not rotate after a container write.
    /// Indicates a broken codec.
    KeyNotRotated,
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFilePath => {
                write!(f, "database does not point to a valid file")
            }
            Self::FileNotFound { path } => {
                write!(f, "file {} does not exist", path.display())
            }
            Self::Io { context, source } => write!(f, "I/O error during {context}: {source}"),
            Self::Codec { message } => write!(f, "error in database container: {message}"),
            Self::Key(err) => write!(f, "{err}"),
            Self::NotInitialized => {
                write!(f, "database has not been initialized")
            }
            Self::SaveInProgress => {
                write!(f, "database save is already in progress")
            }
            Self::UnmergedChanges => {
                write!(f, "database file has unmerged changes")
            }
            Self::BlockReadError => write!(f, "database file read error"),
            Self::RenameFailed { message, staging_path } => {
                write!(
                    f,
                    "{message}\nwritten database located at {}",
                    staging_path.display()
                )
            }
            Self::KeyNotRotated => {
                write!(
                    f,
                    "key not transformed after writing the database, \
                     this is a bug, please report it to the developers"
                )
            }
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Key(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KeyError> for DatabaseError {
    fn from(err: KeyError) -> Self {
        Self::Key(err)
    }
}

impl DatabaseError {
    /// Creates an I/O error with context.
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a codec error.
    pub fn codec<S: Into<String>>(message: S) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}
