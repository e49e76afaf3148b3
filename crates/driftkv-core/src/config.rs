//! Configuration for a driftkv store
//!
//! A plain struct with a `validate()` gate, checked once in `Store::open`.

use std::path::PathBuf;

/// Store configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the write-ahead log file. Created on first append.
    pub wal_path: PathBuf,
    /// Maximum key length in bytes
    pub max_key_len: usize,
    /// Maximum value length in bytes
    pub max_value_len: usize,
}

impl Config {
    /// Configuration rooted at the given WAL path, with default limits.
    pub fn at<P: Into<PathBuf>>(wal_path: P) -> Self {
        Self {
            wal_path: wal_path.into(),
            max_key_len: 512,
            max_value_len: 64 * 1024,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.wal_path.as_os_str().is_empty() {
            return Err("wal_path must not be empty".into());
        }
        if self.max_key_len == 0 || self.max_key_len > 4096 {
            return Err("max_key_len must be in [1, 4096]".into());
        }
        if self.max_value_len == 0 || self.max_value_len > 16 * 1024 * 1024 {
            return Err("max_value_len must be in [1, 16MB]".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::at("driftkv.wal")
    }
}
