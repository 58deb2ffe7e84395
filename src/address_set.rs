//! Subscribed addresses and their per-address settings.
//!
//! The set is shared between the HTTP surface (writer), the feed supervisor
//! (reads the key set on every reconnect) and the dispatcher (reads on every
//! transaction). Writers are serialized; readers always see the latest
//! committed map. Any change to the key set bumps a generation counter on a
//! `watch` channel, which is how the supervisor learns it must reconnect.

use {
    crate::persistence::AddressStore,
    serde::{Deserialize, Serialize},
    std::{
        collections::HashMap,
        fmt,
        str::FromStr,
        sync::{Arc, Mutex, PoisonError, RwLock},
    },
    thiserror::Error,
    tokio::sync::watch,
};

/// Currency assigned to a subscription until the owner picks another one.
pub const DEFAULT_CURRENCY: &str = "USD";

const CASH_ADDR_PREFIX: &str = "bitcoincash";
const CASH_ADDR_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const MIN_PAYLOAD_LEN: usize = 42;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("unsupported address prefix: {0}")]
    UnsupportedPrefix(String),
    #[error("address mixes upper and lower case")]
    MixedCase,
    #[error("unsupported address type (expected a cash address starting with q or p)")]
    UnsupportedType,
    #[error("invalid character {0:?} in address")]
    InvalidCharacter(char),
    #[error("address payload too short ({0} characters)")]
    TooShort(usize),
}

/// A payment destination in canonical cash-address form
/// (`bitcoincash:` prefix, lower case).
///
/// Two spellings of the same address (with or without prefix, upper or lower
/// case) parse to equal values, so equality and hashing are safe to use for
/// set membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AddressError::Empty);
        }

        let payload = match input.split_once(':') {
            Some((prefix, payload)) => {
                if !prefix.eq_ignore_ascii_case(CASH_ADDR_PREFIX) {
                    return Err(AddressError::UnsupportedPrefix(prefix.to_string()));
                }
                payload
            }
            None => input,
        };

        let has_lower = payload.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = payload.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err(AddressError::MixedCase);
        }

        let payload = payload.to_ascii_lowercase();
        if !payload.starts_with('q') && !payload.starts_with('p') {
            return Err(AddressError::UnsupportedType);
        }
        if let Some(bad) = payload.chars().find(|c| !CASH_ADDR_CHARSET.contains(*c)) {
            return Err(AddressError::InvalidCharacter(bad));
        }
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(AddressError::TooShort(payload.len()));
        }

        Ok(Self(format!("{}:{}", CASH_ADDR_PREFIX, payload)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address without its network prefix, as the feed reports it.
    pub fn payload(&self) -> &str {
        &self.0[CASH_ADDR_PREFIX.len() + 1..]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub address: Address,
    pub currency: String,
}

impl SubscriptionEntry {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

/// Result of [`AddressSet::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Added,
    AlreadySubscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Unchanged,
    Updated,
    KeyAdded,
}

pub struct AddressSet {
    entries: RwLock<HashMap<Address, SubscriptionEntry>>,
    write_gate: Mutex<()>,
    store: Arc<dyn AddressStore>,
    generation: watch::Sender<u64>,
}

impl AddressSet {
    /// Load the set from `store`. An unreadable store yields an empty set.
    pub fn load(store: Arc<dyn AddressStore>) -> Self {
        let entries = match store.load() {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to load subscribed addresses, starting empty: {}", e);
                HashMap::new()
            }
        };
        log::info!("Loaded {} subscribed addresses", entries.len());

        let (generation, _) = watch::channel(0);
        Self {
            entries: RwLock::new(entries),
            write_gate: Mutex::new(()),
            store,
            generation,
        }
    }

    /// Append `address` with the default currency, or leave an existing
    /// subscription untouched.
    pub fn subscribe(&self, address: Address) -> Subscription {
        let change = self.mutate(|entries| {
            if entries.contains_key(&address) {
                return Change::Unchanged;
            }
            entries.insert(address.clone(), SubscriptionEntry::new(address));
            Change::KeyAdded
        });

        match change {
            Change::KeyAdded => Subscription::Added,
            _ => Subscription::AlreadySubscribed,
        }
    }

    /// Set the currency for `address`, subscribing it first if needed.
    /// Returns true when the address was not subscribed before.
    pub fn set_currency(&self, address: Address, currency: &str) -> bool {
        let change = self.mutate(|entries| match entries.get_mut(&address) {
            Some(entry) if entry.currency == currency => Change::Unchanged,
            Some(entry) => {
                entry.currency = currency.to_string();
                Change::Updated
            }
            None => {
                let mut entry = SubscriptionEntry::new(address.clone());
                entry.currency = currency.to_string();
                entries.insert(address, entry);
                Change::KeyAdded
            }
        });
        change == Change::KeyAdded
    }

    pub fn get(&self, address: &Address) -> Option<SubscriptionEntry> {
        self.read().get(address).cloned()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.read().contains_key(address)
    }

    /// Subscribed addresses, sorted.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Receiver that observes a new generation whenever an address is added.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Write the current set to the store.
    pub fn persist(&self) -> Result<(), crate::persistence::PersistenceError> {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.read().clone();
        self.store.save(&snapshot)
    }

    /// Apply `change` under the write gate. Anything other than
    /// [`Change::Unchanged`] is saved; a grown key set also signals watchers.
    fn mutate<F>(&self, change: F) -> Change
    where
        F: FnOnce(&mut HashMap<Address, SubscriptionEntry>) -> Change,
    {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let (outcome, snapshot) = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let outcome = change(&mut entries);
            if outcome == Change::Unchanged {
                return outcome;
            }
            (outcome, entries.clone())
        };

        if let Err(e) = self.store.save(&snapshot) {
            log::warn!("Failed to persist subscribed addresses: {}", e);
        }

        if outcome == Change::KeyAdded {
            self.generation.send_modify(|generation| *generation += 1);
        }
        outcome
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Address, SubscriptionEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}
