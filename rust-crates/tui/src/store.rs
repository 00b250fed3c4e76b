use crate::error::GameError;
use ethers::types::Address;
use game_abi::MovePair;
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc,
        Mutex,
    },
};
use tracing::{
    debug,
    warn,
};

const STARTED_KEY: &str = "rps-started";
const CACHE_TREE: &str = "rps-client";

/// Durable string storage for this device.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, GameError>;
    fn set(&self, key: &str, value: &str) -> Result<(), GameError>;
    fn remove(&self, key: &str) -> Result<(), GameError>;
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, GameError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), GameError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), GameError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Sled backed store. Every write is flushed before returning.
#[derive(Clone)]
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GameError> {
        let db = sled::open(path.as_ref()).map_err(storage_error)?;
        let tree = db.open_tree(CACHE_TREE).map_err(storage_error)?;
        Ok(Self { tree })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, GameError> {
        let Some(raw) = self.tree.get(key.as_bytes()).map_err(storage_error)? else {
            return Ok(None);
        };
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|err| GameError::Storage(format!("non utf-8 value at {key}: {err}")))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), GameError> {
        self.tree
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(storage_error)?;
        self.tree.flush().map_err(storage_error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), GameError> {
        self.tree.remove(key.as_bytes()).map_err(storage_error)?;
        self.tree.flush().map_err(storage_error)?;
        Ok(())
    }
}

fn storage_error(err: sled::Error) -> GameError {
    GameError::Storage(err.to_string())
}

pub fn pending_key(account: Address) -> String {
    format!("rps-pending-{account:#x}")
}

pub fn opponent_key(account: Address) -> String {
    format!("rps-opponent-{account:#x}")
}

/// Per-account move cache plus the device-wide "entered the game" flag.
pub struct GameCache<S> {
    store: S,
}

impl<S: KeyValueStore> GameCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pending(&self, account: Address) -> Option<MovePair> {
        self.read_pair(&pending_key(account))
    }

    pub fn opponent(&self, account: Address) -> Option<MovePair> {
        self.read_pair(&opponent_key(account))
    }

    pub fn set_pending(&self, account: Address, moves: MovePair) -> Result<(), GameError> {
        self.write_pair(&pending_key(account), moves)
    }

    pub fn set_opponent(&self, account: Address, moves: MovePair) -> Result<(), GameError> {
        self.write_pair(&opponent_key(account), moves)
    }

    /// Drops both cached pairs. Returns whether anything was cached.
    pub fn clear(&self, account: Address) -> Result<bool, GameError> {
        let mut had_entries = false;
        for key in [pending_key(account), opponent_key(account)] {
            if self.store.get(&key)?.is_some() {
                had_entries = true;
                self.store.remove(&key)?;
            }
        }
        Ok(had_entries)
    }

    pub fn started(&self) -> bool {
        match self.store.get(STARTED_KEY) {
            Ok(value) => value.as_deref() == Some("1"),
            Err(err) => {
                warn!(?err, "reading started flag failed");
                false
            }
        }
    }

    pub fn set_started(&self, started: bool) -> Result<(), GameError> {
        if started {
            self.store.set(STARTED_KEY, "1")
        } else {
            self.store.remove(STARTED_KEY)
        }
    }

    fn read_pair(&self, key: &str) -> Option<MovePair> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, ?err, "reading cached moves failed");
                return None;
            }
        };
        match serde_json::from_str::<MovePair>(&raw) {
            Ok(pair) => Some(pair),
            Err(err) => {
                debug!(key, %raw, %err, "ignoring unreadable cached moves");
                None
            }
        }
    }

    fn write_pair(&self, key: &str, moves: MovePair) -> Result<(), GameError> {
        let json = serde_json::to_string(&moves)
            .map_err(|err| GameError::Storage(err.to_string()))?;
        self.store.set(key, &json)
    }
}
