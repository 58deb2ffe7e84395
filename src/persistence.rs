use {
    crate::address_set::{Address, SubscriptionEntry},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, HashMap},
        fs,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex, PoisonError,
        },
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store is unavailable")]
    Unavailable,
}

/// Durable storage for the subscribed address set.
pub trait AddressStore: Send + Sync {
    /// Missing storage is an empty set, not an error.
    fn load(&self) -> Result<HashMap<Address, SubscriptionEntry>, PersistenceError>;

    fn save(&self, entries: &HashMap<Address, SubscriptionEntry>) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    currency: String,
}

/// Snapshot of the address set as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreSnapshot {
    addresses: BTreeMap<String, StoredEntry>,
    saved_at: i64,
}

/// Older stores only listed addresses.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoreFile {
    Snapshot(StoreSnapshot),
    Legacy(Vec<String>),
}

/// JSON file store, replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AddressStore for JsonFileStore {
    fn load(&self) -> Result<HashMap<Address, SubscriptionEntry>, PersistenceError> {
        if !self.path.exists() {
            log::info!("No existing address store found: {}", self.path.display());
            return Ok(HashMap::new());
        }

        let json = fs::read_to_string(&self.path)?;
        let stored: Vec<(String, String)> = match serde_json::from_str::<StoreFile>(&json)? {
            StoreFile::Snapshot(snapshot) => snapshot
                .addresses
                .into_iter()
                .map(|(address, entry)| (address, entry.currency))
                .collect(),
            StoreFile::Legacy(addresses) => {
                log::info!("Migrating legacy address list ({} entries)", addresses.len());
                addresses
                    .into_iter()
                    .map(|address| (address, crate::address_set::DEFAULT_CURRENCY.to_string()))
                    .collect()
            }
        };

        let mut entries = HashMap::with_capacity(stored.len());
        for (raw, currency) in stored {
            match Address::parse(&raw) {
                Ok(address) => {
                    entries.insert(address.clone(), SubscriptionEntry { address, currency });
                }
                Err(e) => log::warn!("Skipping stored address {}: {}", raw, e),
            }
        }
        Ok(entries)
    }

    fn save(&self, entries: &HashMap<Address, SubscriptionEntry>) -> Result<(), PersistenceError> {
        let snapshot = StoreSnapshot {
            addresses: entries
                .values()
                .map(|entry| {
                    (
                        entry.address.to_string(),
                        StoredEntry {
                            currency: entry.currency.clone(),
                        },
                    )
                })
                .collect(),
            saved_at: chrono::Utc::now().timestamp(),
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        log::debug!("Saved {} addresses to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// In-memory store, used where durability is not wanted (tests, dry runs).
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Address, SubscriptionEntry>>,
    fail_saves: Mutex<bool>,
    save_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn with_entries(entries: impl IntoIterator<Item = SubscriptionEntry>) -> Self {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|entry| (entry.address.clone(), entry))
                    .collect(),
            ),
            fail_saves: Mutex::new(false),
            save_attempts: AtomicUsize::new(0),
        }
    }

    /// Make subsequent saves fail with [`PersistenceError::Unavailable`].
    pub fn fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Last successfully saved contents.
    pub fn saved(&self) -> HashMap<Address, SubscriptionEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of `save` calls so far, failed ones included.
    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::Relaxed)
    }
}

impl AddressStore for MemoryStore {
    fn load(&self) -> Result<HashMap<Address, SubscriptionEntry>, PersistenceError> {
        Ok(self.saved())
    }

    fn save(&self, entries: &HashMap<Address, SubscriptionEntry>) -> Result<(), PersistenceError> {
        self.save_attempts.fetch_add(1, Ordering::Relaxed);
        if *self.fail_saves.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(PersistenceError::Unavailable);
        }
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = entries.clone();
        Ok(())
    }
}
