//! Error types for driftkv operations
//!
//! All core failures are represented by the [`StoreError`] enum. Variants
//! carry enough context (paths, line numbers, checksums) to diagnose a
//! failure without re-reading the log.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for driftkv operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Unified error type for the store, WAL, and command dispatch
#[derive(Debug, Error)]
pub enum StoreError {
    /// File open/read/write/fsync failed
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// EXPIRE or TTL addressed a key that is not in the map
    #[error("key {key:?} does not exist")]
    KeyNotFound { key: String },

    /// TTL addressed a key whose expiry instant has passed
    #[error("key {key:?} has expired")]
    KeyExpired { key: String },

    /// Command dispatch received the wrong number of tokens
    #[error("{verb} takes {expected} argument(s), got {got}")]
    BadArity {
        verb: &'static str,
        expected: &'static str,
        got: usize,
    },

    /// A TTL literal failed to parse
    #[error("invalid duration {input:?}: {source}")]
    BadDuration {
        input: String,
        #[source]
        source: humantime::DurationError,
    },

    /// EXPIRE was given a zero duration
    #[error("expiry duration must be greater than zero")]
    ZeroTtl,

    /// Command dispatch received an unrecognized verb
    #[error("unknown command {verb:?}")]
    UnknownVerb { verb: String },

    /// A key failed the framing rules (empty, or embedded whitespace)
    #[error("invalid key: {reason}")]
    InvalidKey { reason: String },

    /// A value failed the framing rules (empty, or embedded whitespace)
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },

    /// Configuration failed validation
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A WAL line whose stored CRC does not match its payload.
    /// Recoverable during replay: the record is skipped.
    #[error("crc mismatch on wal line {line}: stored {expected:08x}, computed {actual:08x}")]
    CorruptRecord {
        line: u64,
        expected: u32,
        actual: u32,
    },

    /// A WAL line whose structure cannot be parsed at all.
    /// Fatal during replay: the log cannot be trusted past this point.
    #[error("unparseable wal line {line}: {reason}")]
    CorruptFormat { line: u64, reason: String },
}

impl StoreError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = StoreError::CorruptRecord {
            line: 7,
            expected: 0xdeadbeef,
            actual: 0x0badf00d,
        };
        let text = err.to_string();
        assert!(text.contains("line 7"));
        assert!(text.contains("deadbeef"));
        assert!(text.contains("0badf00d"));
    }

    #[test]
    fn io_helper_keeps_path() {
        let err = StoreError::io(
            "/tmp/store.wal",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/store.wal"));
    }
}
