//! Engine-wide error kinds.
//!
//! Subsystem modules own their local error enums (`WalError`,
//! `TableError`, `ManifestError`, ...) and fold into [`Error`] via
//! `#[from]` conversions. Two kinds are *fatal* to the engine:
//! [`Error::Corruption`] and [`Error::Invariant`] — once observed, the
//! engine stops accepting writes and open iterators drain with the
//! error. [`Error::Canceled`] is non-fatal; a canceled iterator may be
//! re-seeked.

use std::io;

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::manifest::ManifestError;
use crate::sstable::TableError;
use crate::wal::WalError;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested entity does not exist. Surfaced by the object
    /// provider; a `NotFound` for a file referenced by the current
    /// version is converted to [`Error::Corruption`] by callers.
    #[error("not found")]
    NotFound,

    /// On-disk data failed integrity validation. Fatal.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The cache could not admit the value. Never user-visible on the
    /// read/write path — callers proceed without caching.
    #[error("cache full")]
    CacheFull,

    /// The engine has been closed, or a prior fatal error latched it.
    #[error("engine closed: {0}")]
    Closed(String),

    /// The operation was canceled through its cancellation signal.
    #[error("operation canceled")]
    Canceled,

    /// Internal invariant violation (poisoned lock, impossible state).
    /// Fatal.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Error from the WAL subsystem.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error from the SSTable subsystem.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Error from the manifest subsystem.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Encoding / decoding error outside the subsystems above.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

impl Error {
    /// Whether this error latches the engine into the fatal state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::Invariant(_) | Error::Wal(_)
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
