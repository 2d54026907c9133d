//! User record storage
//!
//! The advisor only talks to `UserStore`. Backends must apply appends for a
//! user in call order and make them visible to the next `get`.

use crate::error::StoreError;
use crate::types::{ChatExchange, CreateOutcome, Judgment, UserRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage capability injected into the advisor
pub trait UserStore: Send + Sync {
    fn get(&self, identifier: &str) -> StoreResult<Option<UserRecord>>;

    /// Create a user; an existing identifier is left untouched
    fn create(&self, identifier: &str, contact: &str) -> StoreResult<CreateOutcome>;

    /// Returns `false` when the user does not exist
    fn append_judgment(&self, identifier: &str, judgment: &Judgment) -> StoreResult<bool>;

    /// Returns `false` when the user does not exist
    fn append_chat(&self, identifier: &str, exchange: &ChatExchange) -> StoreResult<bool>;

    fn exists(&self, identifier: &str) -> StoreResult<bool> {
        Ok(self.get(identifier)?.is_some())
    }
}

/// Which backend to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    #[default]
    Sqlite,
}

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Corrupt("store lock poisoned".to_string()))
}

/// In-process store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<BTreeMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryStore {
    fn get(&self, identifier: &str) -> StoreResult<Option<UserRecord>> {
        Ok(lock(&self.users)?.get(identifier).cloned())
    }

    fn create(&self, identifier: &str, contact: &str) -> StoreResult<CreateOutcome> {
        let mut users = lock(&self.users)?;
        if users.contains_key(identifier) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        users.insert(identifier.to_string(), UserRecord::new(identifier, contact));
        Ok(CreateOutcome::Created)
    }

    fn append_judgment(&self, identifier: &str, judgment: &Judgment) -> StoreResult<bool> {
        let mut users = lock(&self.users)?;
        match users.get_mut(identifier) {
            Some(user) => {
                user.judgments.push(judgment.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn append_chat(&self, identifier: &str, exchange: &ChatExchange) -> StoreResult<bool> {
        let mut users = lock(&self.users)?;
        match users.get_mut(identifier) {
            Some(user) => {
                user.chats.push(exchange.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Whole-file JSON store: `{identifier: record}`. Every mutation rewrites the
/// file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    users: Mutex<BTreeMap<String, UserRecord>>,
}

impl FileStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let users = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), users = users.len(), "file store opened");
        Ok(Self {
            path: path.to_path_buf(),
            users: Mutex::new(users),
        })
    }

    fn persist(&self, users: &BTreeMap<String, UserRecord>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(users)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `f` to a user and persist; `false` if the user is unknown.
    /// The in-memory map only changes once the file write succeeds.
    fn mutate(&self, identifier: &str, f: impl FnOnce(&mut UserRecord)) -> StoreResult<bool> {
        let mut users = lock(&self.users)?;
        let Some(current) = users.get(identifier) else {
            return Ok(false);
        };
        let mut updated = current.clone();
        f(&mut updated);
        let previous = users.insert(identifier.to_string(), updated);
        if let Err(e) = self.persist(&users) {
            if let Some(previous) = previous {
                users.insert(identifier.to_string(), previous);
            }
            return Err(e);
        }
        Ok(true)
    }
}

impl UserStore for FileStore {
    fn get(&self, identifier: &str) -> StoreResult<Option<UserRecord>> {
        Ok(lock(&self.users)?.get(identifier).cloned())
    }

    fn create(&self, identifier: &str, contact: &str) -> StoreResult<CreateOutcome> {
        let mut users = lock(&self.users)?;
        if users.contains_key(identifier) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        users.insert(identifier.to_string(), UserRecord::new(identifier, contact));
        if let Err(e) = self.persist(&users) {
            users.remove(identifier);
            return Err(e);
        }
        Ok(CreateOutcome::Created)
    }

    fn append_judgment(&self, identifier: &str, judgment: &Judgment) -> StoreResult<bool> {
        self.mutate(identifier, |user| user.judgments.push(judgment.clone()))
    }

    fn append_chat(&self, identifier: &str, exchange: &ChatExchange) -> StoreResult<bool> {
        self.mutate(identifier, |user| user.chats.push(exchange.clone()))
    }
}
