//! Identity cache backed by a persistent key-value store.
//!
//! `anonymousId` is minted on first use (lowercase v4 UUID) and survives
//! process restarts; every mutation writes through to the store. One logical
//! writer at a time; readers observe the latest completed write.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const ANONYMOUS_ID_KEY: &str = "metarouter:anonymous_id";
pub const USER_ID_KEY: &str = "metarouter:user_id";
pub const GROUP_ID_KEY: &str = "metarouter:group_id";
pub const ADVERTISING_ID_KEY: &str = "metarouter:advertising_id";

/// Host-provided persistent string store (platform preferences, a file,
/// a keychain). Clearing removes keys rather than writing empty values.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-process store. The production default on hosts that have not wired a
/// platform store yet; also what the tests use.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.lock().remove(key);
    }
}

/// Point-in-time identity attached to every enriched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub anonymous_id: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub advertising_id: Option<String>,
}

/// In-memory mirror of the four persisted identity fields.
#[derive(Debug)]
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
    cached: Mutex<Identity>,
}

impl IdentityStore {
    /// Load all four fields, minting and persisting a fresh `anonymousId`
    /// when none is stored.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let anonymous_id = match store.get(ANONYMOUS_ID_KEY) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                store.set(ANONYMOUS_ID_KEY, &id);
                tracing::debug!(anonymous_id = %id, "minted anonymous id");
                id
            }
        };
        let cached = Identity {
            anonymous_id,
            user_id: store.get(USER_ID_KEY),
            group_id: store.get(GROUP_ID_KEY),
            advertising_id: store.get(ADVERTISING_ID_KEY),
        };
        Self { store, cached: Mutex::new(cached) }
    }

    fn lock(&self) -> MutexGuard<'_, Identity> {
        self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Identity {
        self.lock().clone()
    }

    pub fn anonymous_id(&self) -> String {
        self.lock().anonymous_id.clone()
    }

    pub fn set_user_id(&self, user_id: &str) {
        let mut cached = self.lock();
        cached.user_id = Some(user_id.to_string());
        self.store.set(USER_ID_KEY, user_id);
    }

    pub fn set_group_id(&self, group_id: &str) {
        let mut cached = self.lock();
        cached.group_id = Some(group_id.to_string());
        self.store.set(GROUP_ID_KEY, group_id);
    }

    /// `None` removes the persisted value.
    pub fn set_advertising_id(&self, advertising_id: Option<&str>) {
        let mut cached = self.lock();
        match advertising_id {
            Some(id) => {
                cached.advertising_id = Some(id.to_string());
                self.store.set(ADVERTISING_ID_KEY, id);
            }
            None => {
                cached.advertising_id = None;
                self.store.remove(ADVERTISING_ID_KEY);
            }
        }
    }

    /// Drop the cache and remove all four keys. The next construction
    /// regenerates `anonymousId`.
    pub fn reset(&self) {
        let mut cached = self.lock();
        *cached = Identity {
            anonymous_id: String::new(),
            user_id: None,
            group_id: None,
            advertising_id: None,
        };
        for key in [ANONYMOUS_ID_KEY, USER_ID_KEY, GROUP_ID_KEY, ADVERTISING_ID_KEY] {
            self.store.remove(key);
        }
    }
}
