//! Embedded storage: a `sled` tree per table, with a single `tokio::sync::Mutex`
//! serializing all write transactions for the whole store. Reads go straight to
//! `sled`, which is lock-free internally, matching the "reads may proceed while a
//! writer is paused between transactions" requirement without sled exposing a
//! busy-timeout knob of its own.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

pub struct Db {
    inner: sled::Db,
    write_lock: Mutex<()>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        let inner = sled::open(path)?;
        Ok(Self {
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn temporary() -> Result<Self> {
        let inner = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn tree(&self, name: &str) -> Result<JsonTree> {
        Ok(JsonTree {
            tree: self.inner.open_tree(name)?,
        })
    }

    /// A raw `sled::Tree` for callers that need non-JSON values, such as a binary
    /// counter (see `TaskStore`'s insertion-sequence generator).
    pub fn raw_tree(&self, name: &str) -> Result<sled::Tree> {
        Ok(self.inner.open_tree(name)?)
    }

    /// Run a synchronous closure while holding the store-wide write lock, then flush.
    /// Every mutating operation in every component goes through this so that
    /// concurrent RPC handlers (or, for the agent/task sources, concurrent callers
    /// within the same process) never interleave a read-modify-write sequence.
    pub async fn with_write_lock<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _guard = self.write_lock.lock().await;
        let result = f()?;
        self.inner.flush()?;
        Ok(result)
    }
}

/// A sled tree that stores JSON-serialized rows keyed by string id.
#[derive(Clone)]
pub struct JsonTree {
    tree: sled::Tree,
}

impl JsonTree {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.tree.insert(key, bytes)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.tree.contains_key(key)?)
    }

    /// Deserialize every row in the tree. Order matches `sled`'s key order, which for
    /// this workspace's string keys is lexicographic, not insertion order; callers
    /// that need insertion order sort a secondary field (e.g. task id) explicitly.
    pub fn scan_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (_key, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
