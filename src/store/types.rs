//! Core data structures persisted by the store.
//!
//! All structs carry a `#[serde(flatten)]` extras map so fields written by a
//! newer build survive a read-modify-write cycle on an older one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Catalog name of the pet every new account starts with.
pub const DEFAULT_PET: &str = "Pixel Pup";

/// Catalog entries that cannot be purchased with run time and require a
/// verified per-user unlock key carry this `unlock_type` value.
pub const UNLOCK_TYPE_KEY: &str = "key";

/// Persisted state for one user account, keyed by username in `users.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// SHA-256 hex digest of the password. Plaintext is never stored.
    pub password_hash: String,
    #[serde(default)]
    pub security_question: String,
    /// Compared literally during recovery; not hashed.
    #[serde(default)]
    pub security_answer: String,
    #[serde(default)]
    pub unlocked_pets: BTreeSet<String>,
    /// Spendable balance, in seconds. Never goes negative.
    #[serde(default)]
    pub total_run_time: u64,
    /// Seconds accumulated per unlocked pet while that pet was active.
    #[serde(default)]
    pub pet_run_time: BTreeMap<String, u64>,
    /// Consumable counts. An entry is removed when its count reaches zero.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inventory: BTreeMap<String, u64>,
    /// Transfer tokens this user has already redeemed. Append-only.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub used_transfer_keys: BTreeSet<String>,
    /// Named boolean/string preferences. Merged, not replaced, on update.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, Value>,
    /// Fields this build does not know about, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UserRecord {
    /// A fresh record as registration creates it: default pet unlocked,
    /// zero balance, zeroed per-pet counter.
    pub fn new(password_hash: String, security_question: String, security_answer: String) -> Self {
        UserRecord {
            password_hash,
            security_question,
            security_answer,
            unlocked_pets: BTreeSet::from([DEFAULT_PET.to_string()]),
            total_run_time: 0,
            pet_run_time: BTreeMap::from([(DEFAULT_PET.to_string(), 0)]),
            inventory: BTreeMap::new(),
            used_transfer_keys: BTreeSet::new(),
            settings: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// One purchasable or unlockable catalog item (pet or consumable), keyed by
/// display name in `pets.json` / `foods.json`. Read-mostly; loaded once at
/// startup and never mutated by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Cost in seconds of run time.
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub description: String,
    /// Opaque handle to presentation assets. Not interpreted here beyond
    /// the legacy-key migration's path matching.
    #[serde(default)]
    pub frames: String,
    /// `Some("key")` marks an entry gated behind an unlock key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_type: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CatalogEntry {
    pub fn requires_key(&self) -> bool {
        self.unlock_type.as_deref() == Some(UNLOCK_TYPE_KEY)
    }
}

/// A partial field-level update queued against a record and applied at the
/// next flush. Merging two patches keeps the most recent value per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_run_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pet_run_time: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_pets: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_transfer_keys: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BTreeMap<String, Value>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == UserPatch::default()
    }

    /// Fold `newer` into `self`, later values winning per field.
    pub fn merge(&mut self, newer: UserPatch) {
        if newer.total_run_time.is_some() {
            self.total_run_time = newer.total_run_time;
        }
        if newer.pet_run_time.is_some() {
            self.pet_run_time = newer.pet_run_time;
        }
        if newer.unlocked_pets.is_some() {
            self.unlocked_pets = newer.unlocked_pets;
        }
        if newer.inventory.is_some() {
            self.inventory = newer.inventory;
        }
        if newer.used_transfer_keys.is_some() {
            self.used_transfer_keys = newer.used_transfer_keys;
        }
        if newer.settings.is_some() {
            self.settings = newer.settings;
        }
    }

    /// Apply this patch onto a record. Settings merge key-wise so
    /// preferences written by other screens are not clobbered.
    pub fn apply(&self, record: &mut UserRecord) {
        if let Some(v) = self.total_run_time {
            record.total_run_time = v;
        }
        if let Some(ref v) = self.pet_run_time {
            record.pet_run_time = v.clone();
        }
        if let Some(ref v) = self.unlocked_pets {
            record.unlocked_pets = v.clone();
        }
        if let Some(ref v) = self.inventory {
            record.inventory = v.clone();
        }
        if let Some(ref v) = self.used_transfer_keys {
            record.used_transfer_keys = v.clone();
        }
        if let Some(ref v) = self.settings {
            for (k, val) in v {
                record.settings.insert(k.clone(), val.clone());
            }
        }
    }
}
