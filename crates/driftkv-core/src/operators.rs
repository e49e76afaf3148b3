//! Pull-based query operators.
//!
//! Each operator exposes `open`/`next`/`close` and holds at most one child;
//! a tree is evaluated by pulling rows from the root. `open` and `close`
//! propagate depth-first to children. Operators are single-use.
//!
//! [`KvScan`] is the only leaf: at `open` it takes the store's shared read
//! lease and snapshots the keys that are live at that instant. The lease is
//! held until `close`, so the snapshot cannot be invalidated mid-scan —
//! mutations wait for the scan to finish.

use std::time::SystemTime;

use crate::error::StoreResult;
use crate::store::{Key, ReadView, Store, Value};

/// One row of query output: a key and its value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Key,
    pub value: Value,
}

/// The operator contract.
///
/// `open` must be called exactly once before the first `next`; `close`
/// exactly once after the last (including after zero `next` calls). A child
/// error from `next` passes through verbatim and ends the stream; callers
/// must still `close`.
pub trait Operator {
    fn open(&mut self) -> StoreResult<()>;
    /// Produce the next row, or `Ok(None)` at end of stream.
    fn next(&mut self) -> StoreResult<Option<Row>>;
    fn close(&mut self) -> StoreResult<()>;
}

/// Leaf operator: scans the store's live keys.
///
/// Emission order is the map's iteration order and is not stable between
/// opens. Keys inserted after `open` are invisible; entries that expire
/// after `open` are still emitted.
pub struct KvScan<'a> {
    store: &'a Store,
    view: Option<ReadView<'a>>,
    keys: Vec<Key>,
    pos: usize,
}

impl<'a> KvScan<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            view: None,
            keys: Vec::new(),
            pos: 0,
        }
    }
}

impl Operator for KvScan<'_> {
    fn open(&mut self) -> StoreResult<()> {
        let view = self.store.read_view();
        self.keys = view.live_keys(SystemTime::now());
        self.view = Some(view);
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> StoreResult<Option<Row>> {
        let Some(view) = self.view.as_ref() else {
            return Ok(None);
        };
        while self.pos < self.keys.len() {
            let key = self.keys[self.pos].clone();
            self.pos += 1;
            // The lease held since open guarantees snapshot keys are still
            // present; the loop shape just avoids asserting it.
            if let Some(value) = view.get(&key) {
                return Ok(Some(Row {
                    key,
                    value: value.clone(),
                }));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.view = None;
        self.keys.clear();
        Ok(())
    }
}

/// Emits the child's rows that satisfy a predicate.
pub struct Filter<'a> {
    child: Box<dyn Operator + 'a>,
    pred: Box<dyn Fn(&Row) -> bool + 'a>,
}

impl<'a> Filter<'a> {
    pub fn new(child: Box<dyn Operator + 'a>, pred: impl Fn(&Row) -> bool + 'a) -> Self {
        Self {
            child,
            pred: Box::new(pred),
        }
    }
}

impl Operator for Filter<'_> {
    fn open(&mut self) -> StoreResult<()> {
        self.child.open()
    }

    fn next(&mut self) -> StoreResult<Option<Row>> {
        loop {
            match self.child.next()? {
                Some(row) if (self.pred)(&row) => return Ok(Some(row)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    fn close(&mut self) -> StoreResult<()> {
        self.child.close()
    }
}

/// Passes rows through, optionally blanking the value record.
///
/// In a keyed store projection only chooses between "keys only" and "whole
/// row"; a multi-column store would pick columns here.
pub struct Project<'a> {
    child: Box<dyn Operator + 'a>,
    keys_only: bool,
}

impl<'a> Project<'a> {
    pub fn new(child: Box<dyn Operator + 'a>, keys_only: bool) -> Self {
        Self { child, keys_only }
    }
}

impl Operator for Project<'_> {
    fn open(&mut self) -> StoreResult<()> {
        self.child.open()
    }

    fn next(&mut self) -> StoreResult<Option<Row>> {
        let row = self.child.next()?;
        if !self.keys_only {
            return Ok(row);
        }
        Ok(row.map(|row| Row {
            key: row.key,
            value: Value::default(),
        }))
    }

    fn close(&mut self) -> StoreResult<()> {
        self.child.close()
    }
}

/// Emits at most `max` rows from the child.
///
/// Once the quota is reached, `next` returns end-of-stream without pulling
/// the child again.
pub struct Limit<'a> {
    child: Box<dyn Operator + 'a>,
    max: usize,
    emitted: usize,
}

impl<'a> Limit<'a> {
    pub fn new(child: Box<dyn Operator + 'a>, max: usize) -> Self {
        Self {
            child,
            max,
            emitted: 0,
        }
    }
}

impl Operator for Limit<'_> {
    fn open(&mut self) -> StoreResult<()> {
        self.emitted = 0;
        self.child.open()
    }

    fn next(&mut self) -> StoreResult<Option<Row>> {
        if self.emitted >= self.max {
            return Ok(None);
        }
        let row = self.child.next()?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.child.close()
    }
}
