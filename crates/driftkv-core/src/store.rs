//! Core store: the canonical in-memory map.
//!
//! All public methods take `&self`. Reads (`get`, `exists`, `ttl`) run under
//! a shared lock; mutations (`set`, `delete`, `expire`) take the map's write
//! lock, append to the WAL while holding it, and only then update the map.
//! Holding the map lock across the append means the WAL's serial order equals
//! the map's mutation order, so replay reproduces the exact final state.
//!
//! Expiry is lazy: an entry past its `expires_at` stays in the map until it
//! is overwritten or deleted, but `get` reports it absent.

use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::ttl::{format_ttl, parse_ttl};
use crate::wal::{Wal, WalRecord};

/// A key in the store. Compared by name.
///
/// Names are non-empty and contain no whitespace; anything else cannot be
/// framed in the log's whitespace-tokenized line format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Validate and construct a key.
    pub fn new(name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(StoreError::InvalidKey {
                reason: "key must not be empty".to_string(),
            });
        }
        if name.contains(char::is_whitespace) {
            return Err(StoreError::InvalidKey {
                reason: format!("key {name:?} contains whitespace"),
            });
        }
        Ok(Key(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored value: payload plus optional expiry instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Value {
    pub data: String,
    /// `None` means the entry never expires.
    pub expires_at: Option<SystemTime>,
}

impl Value {
    /// Whether the entry is past its expiry at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => false,
        }
    }
}

/// Result of a TTL query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlReport {
    /// The instant the store answered at.
    pub now: SystemTime,
    /// Time left until expiry; `None` for entries that never expire.
    pub remaining: Option<Duration>,
    /// The expiry instant; `None` for entries that never expire.
    pub expires_at: Option<SystemTime>,
}

/// Outcome of a dispatched command, rendered by the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    SetOk { key: Key },
    Value { key: Key, value: Option<String> },
    Deleted { key: Key },
    ExpireSet { key: Key, ttl: Duration },
    Ttl { key: Key, report: TtlReport },
    Exists { key: Key, exists: bool },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::SetOk { key } => write!(f, "key {key} set"),
            Reply::Value { value: Some(v), .. } => f.write_str(v),
            Reply::Value { key, value: None } => write!(f, "key {key} not found"),
            Reply::Deleted { key } => write!(f, "key {key} deleted"),
            Reply::ExpireSet { key, ttl } => {
                write!(f, "key {key} expires in {}", format_ttl(*ttl))
            }
            Reply::Ttl { key, report } => {
                let now = humantime::format_rfc3339_seconds(report.now);
                match (report.remaining, report.expires_at) {
                    (Some(rem), Some(at)) => write!(
                        f,
                        "key {key}: now {now}, remaining {}, expires at {}",
                        format_ttl(rem),
                        humantime::format_rfc3339_seconds(at)
                    ),
                    _ => write!(f, "key {key}: no expiry"),
                }
            }
            Reply::Exists { key, exists } => write!(f, "key {key} exists: {exists}"),
        }
    }
}

/// Shared read lease on the map, handed to scans.
///
/// While a view is alive no mutation can proceed, which is what gives an
/// open scan its stable snapshot. Dropping the view releases the lock.
pub struct ReadView<'a> {
    guard: RwLockReadGuard<'a, HashMap<Key, Value>>,
}

impl ReadView<'_> {
    /// Keys that are present and non-expired at `now`, in map order.
    pub fn live_keys(&self, now: SystemTime) -> Vec<Key> {
        self.guard
            .iter()
            .filter(|(_, v)| !v.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.guard.get(key)
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

/// The store: RAM map + WAL.
pub struct Store {
    data: RwLock<HashMap<Key, Value>>,
    wal: Wal,
    config: Config,
}

impl Store {
    /// Open a store, replaying the WAL at `config.wal_path` if it exists.
    pub fn open(config: Config) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|reason| StoreError::Config { reason })?;

        let store = Self {
            data: RwLock::new(HashMap::new()),
            wal: Wal::new(config.wal_path.clone()),
            config,
        };

        let applied = store.replay()?;
        if applied > 0 {
            log::info!(
                "replayed {} record(s) from {}",
                applied,
                store.wal.path().display()
            );
        }
        Ok(store)
    }

    /// Path of the backing WAL file.
    pub fn wal_path(&self) -> &Path {
        self.wal.path()
    }

    /// Look up a key. Expired entries report as absent (but are not removed).
    pub fn get(&self, key: &Key) -> Option<String> {
        let now = SystemTime::now();
        let data = self.data.read();
        data.get(key)
            .filter(|v| !v.is_expired(now))
            .map(|v| v.data.clone())
    }

    /// Insert or overwrite a key.
    ///
    /// `ttl = None` (or zero) means no expiry; otherwise the entry expires at
    /// `now + ttl`. An overwrite replaces any previous expiry. The record is
    /// fsynced to the WAL before the map changes; on append failure the map
    /// is untouched.
    pub fn set(&self, key: Key, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_lengths(&key, value)?;
        if value.is_empty() {
            return Err(StoreError::InvalidValue {
                reason: "value must not be empty".to_string(),
            });
        }
        if value.contains(char::is_whitespace) {
            return Err(StoreError::InvalidValue {
                reason: format!("value {value:?} contains whitespace"),
            });
        }
        let ttl = ttl.filter(|d| !d.is_zero());

        let mut data = self.data.write();
        self.wal.append(&WalRecord::Set {
            key: key.clone(),
            value: value.to_string(),
            ttl,
        })?;
        data.insert(
            key,
            Value {
                data: value.to_string(),
                expires_at: ttl.map(|d| SystemTime::now() + d),
            },
        );
        Ok(())
    }

    /// Remove a key. Removing an absent key is not an error.
    pub fn delete(&self, key: &Key) -> StoreResult<()> {
        let mut data = self.data.write();
        self.wal.append(&WalRecord::Delete { key: key.clone() })?;
        data.remove(key);
        Ok(())
    }

    /// Renew a key's expiry to `now + ttl`.
    ///
    /// The key must be physically present (an expired-but-unremoved entry
    /// counts); otherwise `KeyNotFound` is returned and nothing is logged.
    pub fn expire(&self, key: &Key, ttl: Duration) -> StoreResult<()> {
        if ttl.is_zero() {
            return Err(StoreError::ZeroTtl);
        }

        let mut data = self.data.write();
        if !data.contains_key(key) {
            return Err(StoreError::KeyNotFound {
                key: key.as_str().to_string(),
            });
        }
        self.wal.append(&WalRecord::Expire {
            key: key.clone(),
            ttl,
        })?;
        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(SystemTime::now() + ttl);
        }
        Ok(())
    }

    /// Whether the key is physically present.
    ///
    /// Deliberately ignores expiry: an expired entry that has not been
    /// overwritten or deleted still reports `true` here even though `get`
    /// reports it absent.
    pub fn exists(&self, key: &Key) -> bool {
        let data = self.data.read();
        data.contains_key(key)
    }

    /// Report the key's expiry state.
    pub fn ttl(&self, key: &Key) -> StoreResult<TtlReport> {
        let now = SystemTime::now();
        let data = self.data.read();
        let entry = data.get(key).ok_or_else(|| StoreError::KeyNotFound {
            key: key.as_str().to_string(),
        })?;
        if entry.is_expired(now) {
            return Err(StoreError::KeyExpired {
                key: key.as_str().to_string(),
            });
        }
        Ok(TtlReport {
            now,
            remaining: entry
                .expires_at
                .map(|at| at.duration_since(now).unwrap_or(Duration::ZERO)),
            expires_at: entry.expires_at,
        })
    }

    /// Number of physical entries, including expired ones.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Acquire a shared read lease for a scan. See [`ReadView`].
    pub fn read_view(&self) -> ReadView<'_> {
        ReadView {
            guard: self.data.read(),
        }
    }

    /// Rebuild the map from the WAL without re-logging.
    ///
    /// Holds the write lock for the whole pass. CRC-damaged records are
    /// logged and skipped; a structurally unparseable line aborts with the
    /// map partially reconstructed. An EXPIRE for a missing key is a no-op
    /// here (the key may have been deleted later in the log's own history).
    ///
    /// SET records with a TTL expire at `replay_now + ttl`: the format
    /// carries a duration, not an absolute instant, so restarts refresh
    /// expiry clocks.
    ///
    /// Returns the number of records applied.
    pub fn replay(&self) -> StoreResult<usize> {
        let mut data = self.data.write();
        let mut applied = 0usize;

        for record in self.wal.records()? {
            match record {
                Ok(WalRecord::Set { key, value, ttl }) => {
                    data.insert(
                        key,
                        Value {
                            data: value,
                            expires_at: ttl.map(|d| SystemTime::now() + d),
                        },
                    );
                    applied += 1;
                }
                Ok(WalRecord::Delete { key }) => {
                    data.remove(&key);
                    applied += 1;
                }
                Ok(WalRecord::Expire { key, ttl }) => {
                    if let Some(entry) = data.get_mut(&key) {
                        entry.expires_at = Some(SystemTime::now() + ttl);
                    }
                    applied += 1;
                }
                Err(StoreError::CorruptRecord {
                    line,
                    expected,
                    actual,
                }) => {
                    log::warn!(
                        "skipping wal line {line}: stored crc {expected:08x}, computed {actual:08x}"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(applied)
    }

    /// Route a tokenized command to the operation it names.
    ///
    /// The first token is the verb, matched case-insensitively:
    /// SET, GET, DELETE, EXPIRE, TTL, EXISTS.
    pub fn process(&self, parts: &[&str]) -> StoreResult<Reply> {
        let Some(verb) = parts.first() else {
            return Err(StoreError::UnknownVerb {
                verb: String::new(),
            });
        };
        let args = &parts[1..];

        match verb.to_ascii_uppercase().as_str() {
            "SET" => {
                if args.len() < 2 || args.len() > 3 {
                    return Err(StoreError::BadArity {
                        verb: "SET",
                        expected: "2 or 3",
                        got: args.len(),
                    });
                }
                let key = Key::new(args[0])?;
                let ttl = if args.len() == 3 {
                    Some(parse_ttl(args[2])?)
                } else {
                    None
                };
                self.set(key.clone(), args[1], ttl)?;
                Ok(Reply::SetOk { key })
            }
            "GET" => {
                let key = Self::single_key("GET", args)?;
                let value = self.get(&key);
                Ok(Reply::Value { key, value })
            }
            "DELETE" => {
                let key = Self::single_key("DELETE", args)?;
                self.delete(&key)?;
                Ok(Reply::Deleted { key })
            }
            "EXPIRE" => {
                if args.len() != 2 {
                    return Err(StoreError::BadArity {
                        verb: "EXPIRE",
                        expected: "2",
                        got: args.len(),
                    });
                }
                let key = Key::new(args[0])?;
                let ttl = parse_ttl(args[1])?;
                self.expire(&key, ttl)?;
                Ok(Reply::ExpireSet { key, ttl })
            }
            "TTL" => {
                let key = Self::single_key("TTL", args)?;
                let report = self.ttl(&key)?;
                Ok(Reply::Ttl { key, report })
            }
            "EXISTS" => {
                let key = Self::single_key("EXISTS", args)?;
                let exists = self.exists(&key);
                Ok(Reply::Exists { key, exists })
            }
            _ => Err(StoreError::UnknownVerb {
                verb: verb.to_string(),
            }),
        }
    }

    fn single_key(verb: &'static str, args: &[&str]) -> StoreResult<Key> {
        if args.len() != 1 {
            return Err(StoreError::BadArity {
                verb,
                expected: "1",
                got: args.len(),
            });
        }
        Key::new(args[0])
    }

    fn check_lengths(&self, key: &Key, value: &str) -> StoreResult<()> {
        if key.as_str().len() > self.config.max_key_len {
            return Err(StoreError::InvalidKey {
                reason: format!(
                    "key is {} bytes, limit is {}",
                    key.as_str().len(),
                    self.config.max_key_len
                ),
            });
        }
        if value.len() > self.config.max_value_len {
            return Err(StoreError::InvalidValue {
                reason: format!(
                    "value is {} bytes, limit is {}",
                    value.len(),
                    self.config.max_value_len
                ),
            });
        }
        Ok(())
    }
}
