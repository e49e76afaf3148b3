//! Write-ahead log
//!
//! The WAL provides durability through strict write ordering: a mutation's
//! record is appended, flushed, and fsynced before the caller may update the
//! in-memory map. If the append fails, the map is never touched.
//!
//! # Record format
//!
//! One textual record per line, `<payload>|<crc32>\n`:
//!
//! ```text
//! SET <name> <value>
//! SET <name> <value> <ttl>
//! DELETE <name>
//! EXPIRE <name> <ttl>
//! ```
//!
//! `<crc32>` is the lowercase hex CRC32 (IEEE) of the payload bytes before
//! the `|`; the trailing newline is not covered. Fields are whitespace-
//! separated single tokens, which is why keys and values may not contain
//! whitespace and `<ttl>` is a compact literal like `1h30m`.
//!
//! On replay, a record whose CRC does not match is reported as
//! [`StoreError::CorruptRecord`] and can be skipped; a line whose structure
//! cannot be parsed at all is [`StoreError::CorruptFormat`] and ends replay.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::store::Key;
use crate::ttl::{format_ttl, parse_ttl};

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Insert or overwrite a key. `ttl = None` means no expiry.
    Set {
        key: Key,
        value: String,
        ttl: Option<Duration>,
    },
    /// Remove a key.
    Delete { key: Key },
    /// Renew a key's expiry from the current instant.
    Expire { key: Key, ttl: Duration },
}

impl WalRecord {
    /// The checksummed payload portion of the record line.
    fn payload(&self) -> String {
        match self {
            WalRecord::Set {
                key,
                value,
                ttl: None,
            } => format!("SET {key} {value}"),
            WalRecord::Set {
                key,
                value,
                ttl: Some(ttl),
            } => format!("SET {key} {value} {}", format_ttl(*ttl)),
            WalRecord::Delete { key } => format!("DELETE {key}"),
            WalRecord::Expire { key, ttl } => format!("EXPIRE {key} {}", format_ttl(*ttl)),
        }
    }

    /// Serialize to the on-disk line, including checksum and newline.
    pub fn encode(&self) -> String {
        let payload = self.payload();
        let crc = crc32fast::hash(payload.as_bytes());
        format!("{payload}|{crc:08x}\n")
    }
}

/// Parse one WAL line. Returns `Ok(None)` for an empty line.
///
/// `line_no` is 1-based and only used for error context.
fn parse_line(line_no: u64, line: &str) -> StoreResult<Option<WalRecord>> {
    if line.is_empty() {
        return Ok(None);
    }

    let (payload, crc_hex) = line.rsplit_once('|').ok_or_else(|| StoreError::CorruptFormat {
        line: line_no,
        reason: "missing crc separator".to_string(),
    })?;

    let stored = u32::from_str_radix(crc_hex, 16).map_err(|_| StoreError::CorruptFormat {
        line: line_no,
        reason: format!("malformed crc field {crc_hex:?}"),
    })?;

    let computed = crc32fast::hash(payload.as_bytes());
    if stored != computed {
        return Err(StoreError::CorruptRecord {
            line: line_no,
            expected: stored,
            actual: computed,
        });
    }

    // CRC is good from here on: remaining failures mean the writer and the
    // reader disagree about the format itself, which is fatal.
    let tokens: Vec<&str> = payload.split_whitespace().collect();
    let bad_format = |reason: String| StoreError::CorruptFormat {
        line: line_no,
        reason,
    };
    let key_token = |token: &str| {
        Key::new(token).map_err(|e| StoreError::CorruptFormat {
            line: line_no,
            reason: e.to_string(),
        })
    };
    let ttl_token = |token: &str| {
        parse_ttl(token).map_err(|_| StoreError::CorruptFormat {
            line: line_no,
            reason: format!("bad ttl literal {token:?}"),
        })
    };

    let record = match tokens.as_slice() {
        [] => return Err(bad_format("missing verb".to_string())),
        ["SET", key, value] => WalRecord::Set {
            key: key_token(key)?,
            value: (*value).to_string(),
            ttl: None,
        },
        ["SET", key, value, ttl] => WalRecord::Set {
            key: key_token(key)?,
            value: (*value).to_string(),
            ttl: Some(ttl_token(ttl)?),
        },
        ["DELETE", key] => WalRecord::Delete {
            key: key_token(key)?,
        },
        ["EXPIRE", key, ttl] => WalRecord::Expire {
            key: key_token(key)?,
            ttl: ttl_token(ttl)?,
        },
        [verb @ ("SET" | "DELETE" | "EXPIRE"), rest @ ..] => {
            return Err(bad_format(format!(
                "{verb} record has {} field(s)",
                rest.len()
            )))
        }
        [verb, ..] => return Err(bad_format(format!("unknown verb {verb:?}"))),
    };

    Ok(Some(record))
}

/// Append-only log of mutations.
///
/// Appends are fully serialized: the mutex is held across the entire
/// open-write-fsync-close sequence, so records never interleave and the
/// on-disk order is the append order. The file is opened per append and
/// created lazily; it is never truncated.
pub struct Wal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Wal {
    /// Create a handle for the log at `path`. No I/O happens here.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one record.
    ///
    /// Returns only after the bytes are fsynced; the caller may then publish
    /// the mutation to the map. On error the map must be left untouched.
    pub fn append(&self, record: &WalRecord) -> StoreResult<()> {
        let line = record.encode();

        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))?;
        durable_sync(&file).map_err(|e| StoreError::io(&self.path, e))?;

        log::debug!("wal append: {}", line.trim_end());
        Ok(())
    }

    /// Lazily iterate the records in file order.
    ///
    /// Yields `Err(CorruptRecord)` for CRC-damaged lines (the iterator stays
    /// usable, so the caller can skip them) and `Err(CorruptFormat)` /
    /// `Err(Io)` for unrecoverable problems. A missing file yields an empty
    /// iterator.
    pub fn records(&self) -> StoreResult<Records> {
        let lines = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        Ok(Records {
            lines,
            path: self.path.clone(),
            line_no: 0,
        })
    }
}

/// Lazy record iterator returned by [`Wal::records`].
pub struct Records {
    lines: Option<io::Lines<BufReader<File>>>,
    path: PathBuf,
    line_no: u64,
}

impl Iterator for Records {
    type Item = StoreResult<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(StoreError::io(&self.path, e))),
            };
            self.line_no += 1;
            match parse_line(self.line_no, &line) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Ensure file data reaches persistent storage before returning.
///
/// Linux uses fdatasync (data but not metadata), macOS needs F_FULLFSYNC to
/// get past the drive's volatile write cache, Windows uses FlushFileBuffers.
/// Elsewhere we fall back to the stdlib's sync_data.
fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fdatasync operates on the valid open descriptor behind `file`.
        let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fcntl(F_FULLFSYNC) operates on the valid open descriptor behind `file`.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: FlushFileBuffers operates on the valid open handle behind `file`.
        let rc = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if rc != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_wal() -> (Wal, TempDir) {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path().join("test.wal"));
        (wal, dir)
    }

    fn set(key: &str, value: &str, ttl: Option<Duration>) -> WalRecord {
        WalRecord::Set {
            key: Key::new(key).unwrap(),
            value: value.to_string(),
            ttl,
        }
    }

    #[test]
    fn encode_matches_line_format() {
        let record = set("a", "1", None);
        let crc = crc32fast::hash(b"SET a 1");
        assert_eq!(record.encode(), format!("SET a 1|{crc:08x}\n"));

        let record = set("k", "v", Some(Duration::from_millis(250)));
        let crc = crc32fast::hash(b"SET k v 250ms");
        assert_eq!(record.encode(), format!("SET k v 250ms|{crc:08x}\n"));
    }

    #[test]
    fn append_then_read_back() {
        let (wal, _dir) = test_wal();
        let records = vec![
            set("a", "1", None),
            set("b", "2", Some(Duration::from_secs(90))),
            WalRecord::Delete {
                key: Key::new("a").unwrap(),
            },
            WalRecord::Expire {
                key: Key::new("b").unwrap(),
                ttl: Duration::from_secs(5400),
            },
        ];
        for r in &records {
            wal.append(r).unwrap();
        }

        let replayed: Vec<WalRecord> = wal.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(replayed, records);
    }

    #[test]
    fn missing_file_is_empty() {
        let (wal, _dir) = test_wal();
        assert_eq!(wal.records().unwrap().count(), 0);
    }

    #[test]
    fn empty_lines_skipped() {
        let (wal, _dir) = test_wal();
        wal.append(&set("a", "1", None)).unwrap();
        let mut content = std::fs::read_to_string(wal.path()).unwrap();
        content.push('\n');
        content.push('\n');
        content.push_str(&set("b", "2", None).encode());
        std::fs::write(wal.path(), content).unwrap();

        let replayed: Vec<WalRecord> = wal.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn crc_mismatch_is_recoverable() {
        let (wal, _dir) = test_wal();
        wal.append(&set("a", "1", None)).unwrap();
        wal.append(&set("b", "2", None)).unwrap();
        wal.append(&set("c", "3", None)).unwrap();

        // Damage the middle record's payload without touching its crc
        let content = std::fs::read_to_string(wal.path()).unwrap();
        let damaged: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, l)| {
                if i == 1 {
                    l.replacen("SET b 2", "SET b X", 1)
                } else {
                    l.to_string()
                }
            })
            .collect();
        std::fs::write(wal.path(), damaged.join("\n") + "\n").unwrap();

        let results: Vec<StoreResult<WalRecord>> = wal.records().unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(StoreError::CorruptRecord { line: 2, .. })
        ));
        // The iterator keeps going past the damaged line
        assert_eq!(results[2].as_ref().unwrap(), &set("c", "3", None));
    }

    #[test]
    fn missing_separator_is_fatal_format_error() {
        let (wal, _dir) = test_wal();
        std::fs::write(wal.path(), "SET a 1\n").unwrap();
        let results: Vec<StoreResult<WalRecord>> = wal.records().unwrap().collect();
        assert!(matches!(
            results[0],
            Err(StoreError::CorruptFormat { line: 1, .. })
        ));
    }

    #[test]
    fn unknown_verb_is_format_error() {
        let (wal, _dir) = test_wal();
        let payload = "MERGE a 1";
        let crc = crc32fast::hash(payload.as_bytes());
        std::fs::write(wal.path(), format!("{payload}|{crc:08x}\n")).unwrap();

        let results: Vec<StoreResult<WalRecord>> = wal.records().unwrap().collect();
        assert!(matches!(results[0], Err(StoreError::CorruptFormat { .. })));
    }

    #[test]
    fn wrong_field_count_is_format_error() {
        let (wal, _dir) = test_wal();
        let payload = "DELETE a b c";
        let crc = crc32fast::hash(payload.as_bytes());
        std::fs::write(wal.path(), format!("{payload}|{crc:08x}\n")).unwrap();

        let results: Vec<StoreResult<WalRecord>> = wal.records().unwrap().collect();
        assert!(matches!(results[0], Err(StoreError::CorruptFormat { .. })));
    }

    #[test]
    fn malformed_crc_hex_is_format_error() {
        let (wal, _dir) = test_wal();
        std::fs::write(wal.path(), "SET a 1|zzzz\n").unwrap();
        let results: Vec<StoreResult<WalRecord>> = wal.records().unwrap().collect();
        assert!(matches!(results[0], Err(StoreError::CorruptFormat { .. })));
    }

    #[test]
    fn appends_from_threads_stay_line_framed() {
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let wal = Arc::new(Wal::new(dir.path().join("threads.wal")));

        let mut handles = vec![];
        for t in 0..4 {
            let wal = Arc::clone(&wal);
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    wal.append(&WalRecord::Set {
                        key: Key::new(format!("k{t}-{i}")).unwrap(),
                        value: "v".to_string(),
                        ttl: None,
                    })
                    .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let replayed: Vec<WalRecord> = wal.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(replayed.len(), 40);
    }
}
