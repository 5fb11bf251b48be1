//! # Store - Durable User-State Layer
//!
//! Single source of truth for user records and the two read-only catalogs
//! (unlockable pets, purchasable consumables) while the process runs.
//!
//! ## Architecture
//!
//! ```text
//! data/
//! ├── users.json     ← user records, keyed by username
//! ├── pets.json      ← pet catalog
//! └── foods.json     ← consumable catalog
//! ```
//!
//! All three documents are held in memory behind one mutex. High-value
//! writes (`upsert_user`) persist synchronously; high-frequency writes go
//! through a pending-patch buffer that a background thread merges and
//! flushes once per second. Patches for the same user merge field-by-field,
//! later values winning. Shutdown stops the thread and performs one final
//! flush so no queued mutation is lost.
//!
//! Domain operations (debit/credit, inventory, pet unlocks, transfer-key
//! redemption) each hold the lock for their whole read-modify-enqueue
//! sequence, so concurrent callers cannot lose updates.
//!
//! Persistence failures never panic and never escape as anything other than
//! a [`PetError`] with `ErrorKind::Io`; the background loop logs and keeps
//! going. A failed immediate write leaves the in-memory mutation applied so
//! the caller may retry.

pub mod codec;
pub mod migration;
pub mod types;

use crate::errors::{PetError, Result};
use crate::logutil::escape_log;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

pub use types::{CatalogEntry, UserPatch, UserRecord, DEFAULT_PET};

/// Store construction parameters. The data directory is owned by exactly one
/// process at a time; there is no cross-process locking.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Cadence of the background merge-flush. One second in production;
    /// tests may stretch it and drive `flush()` by hand.
    pub flush_interval: Duration,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_dir: data_dir.into(),
            flush_interval: Duration::from_secs(1),
        }
    }

    fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    fn pets_path(&self) -> PathBuf {
        self.data_dir.join("pets.json")
    }

    fn foods_path(&self) -> PathBuf {
        self.data_dir.join("foods.json")
    }
}

/// Everything behind the lock: the record cache, both catalogs, and the
/// pending-patch buffer.
struct Shared {
    users: BTreeMap<String, UserRecord>,
    pets: BTreeMap<String, CatalogEntry>,
    foods: BTreeMap<String, CatalogEntry>,
    pending: BTreeMap<String, UserPatch>,
}

/// Concurrent cache store with asynchronous write-back.
pub struct Store {
    shared: Arc<Mutex<Shared>>,
    users_path: PathBuf,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Open (and if necessary initialize) the data directory, load all
    /// documents, repair legacy `pet_run_time` keys, and start the flush
    /// thread.
    pub fn open(config: StoreConfig) -> Result<Store> {
        fs::create_dir_all(&config.data_dir)?;

        let users_path = config.users_path();
        let pets_path = config.pets_path();
        let foods_path = config.foods_path();

        if !users_path.exists() {
            codec::write_json_atomic(&users_path, &BTreeMap::<String, UserRecord>::new())?;
        }
        if !pets_path.exists() {
            codec::write_json_atomic(&pets_path, &builtin_pet_catalog())?;
        }
        if !foods_path.exists() {
            codec::write_json_atomic(&foods_path, &builtin_food_catalog())?;
        }

        let mut users: BTreeMap<String, UserRecord> = codec::read_json_or(&users_path, BTreeMap::new());
        let pets: BTreeMap<String, CatalogEntry> = codec::read_json_or(&pets_path, BTreeMap::new());
        let foods: BTreeMap<String, CatalogEntry> = codec::read_json_or(&foods_path, BTreeMap::new());

        let repaired = migration::normalize_pet_run_time_keys(&mut users, &pets);
        if repaired > 0 {
            info!("pet_run_time migration repaired {} record(s)", repaired);
        }
        debug!(
            "store loaded: {} user(s), {} pet(s), {} food(s)",
            users.len(),
            pets.len(),
            foods.len()
        );

        let shared = Arc::new(Mutex::new(Shared {
            users,
            pets,
            foods,
            pending: BTreeMap::new(),
        }));

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let loop_shared = Arc::clone(&shared);
        let loop_path = users_path.clone();
        let interval = config.flush_interval;
        let writer = std::thread::Builder::new()
            .name("store-flush".into())
            .spawn(move || flush_loop(loop_shared, loop_path, interval, stop_rx))?;

        Ok(Store {
            shared,
            users_path,
            stop_tx: Mutex::new(Some(stop_tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch a user's record, or `None` if unregistered.
    pub fn get_user(&self, username: &str) -> Option<UserRecord> {
        self.lock().users.get(username).cloned()
    }

    /// Shallow copy of the pet catalog; mutating it does not touch the store.
    pub fn pet_catalog(&self) -> BTreeMap<String, CatalogEntry> {
        self.lock().pets.clone()
    }

    /// Shallow copy of the consumable catalog.
    pub fn food_catalog(&self) -> BTreeMap<String, CatalogEntry> {
        self.lock().foods.clone()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Replace a user's full record and persist immediately. Used for
    /// high-value paths (registration, password reset, backup import) where
    /// eventual consistency is unacceptable. On a persistence error the
    /// in-memory record is already updated; callers may retry.
    pub fn upsert_user(&self, username: &str, record: UserRecord) -> Result<()> {
        let mut shared = self.lock();
        shared.users.insert(username.to_string(), record);
        codec::write_json_atomic(&self.users_path, &shared.users)
    }

    /// Queue a field-level update for the next flush. No disk I/O and no
    /// cache mutation here; the patch takes effect when the flush merges it.
    pub fn enqueue_patch(&self, username: &str, patch: UserPatch) {
        if patch.is_empty() {
            return;
        }
        let mut shared = self.lock();
        shared
            .pending
            .entry(username.to_string())
            .or_default()
            .merge(patch);
    }

    /// Merge all pending patches into the cache and persist the users
    /// document once. No-op when nothing is queued.
    pub fn flush(&self) -> Result<()> {
        let mut shared = self.lock();
        flush_locked(&mut shared, &self.users_path)
    }

    /// Stop the flush thread and perform the mandatory final flush. Safe to
    /// call more than once; later calls just flush.
    pub fn stop(&self) -> Result<()> {
        let tx = self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        let handle = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            // The loop observes the stop signal within one tick, so this
            // join is bounded by the flush interval.
            if handle.join().is_err() {
                warn!("flush thread panicked before shutdown");
            }
        }
        self.flush()
    }

    // ------------------------------------------------------------------
    // Domain operations. Each holds the lock for the entire
    // read-modify-enqueue sequence.
    // ------------------------------------------------------------------

    /// Spend `seconds` of the user's run-time balance. Rejected without
    /// mutation when the balance is insufficient.
    pub fn debit_run_time(&self, username: &str, seconds: u64) -> Result<()> {
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        if record.total_run_time < seconds {
            return Err(PetError::InsufficientBalance);
        }
        record.total_run_time -= seconds;
        let patch = UserPatch {
            total_run_time: Some(record.total_run_time),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }

    /// Add `seconds` to the user's run-time balance. Zero is rejected.
    pub fn credit_run_time(&self, username: &str, seconds: u64) -> Result<()> {
        if seconds == 0 {
            return Err(PetError::InvalidAmount);
        }
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        record.total_run_time = record.total_run_time.saturating_add(seconds);
        let patch = UserPatch {
            total_run_time: Some(record.total_run_time),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }

    /// One accrual tick: +1 second to the total balance and to the active
    /// pet's counter. Returns (new total, new pet seconds) for UI display.
    pub fn tick_run_time(&self, username: &str, pet: &str) -> Result<(u64, u64)> {
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        record.total_run_time = record.total_run_time.saturating_add(1);
        let pet_seconds = {
            let counter = record.pet_run_time.entry(pet.to_string()).or_insert(0);
            *counter = counter.saturating_add(1);
            *counter
        };
        let patch = UserPatch {
            total_run_time: Some(record.total_run_time),
            pet_run_time: Some(record.pet_run_time.clone()),
            ..Default::default()
        };
        let totals = (record.total_run_time, pet_seconds);
        enqueue_locked(&mut shared, username, patch);
        Ok(totals)
    }

    /// Add `qty` of a consumable to the user's pantry.
    pub fn add_inventory(&self, username: &str, item: &str, qty: u64) -> Result<()> {
        if qty == 0 {
            return Err(PetError::InvalidAmount);
        }
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        *record.inventory.entry(item.to_string()).or_insert(0) += qty;
        let patch = UserPatch {
            inventory: Some(record.inventory.clone()),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }

    /// Consume `qty` of a pantry item. The entry disappears entirely when
    /// its count reaches zero.
    pub fn consume_inventory(&self, username: &str, item: &str, qty: u64) -> Result<()> {
        if qty == 0 {
            return Err(PetError::InvalidAmount);
        }
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        let held = record.inventory.get(item).copied().unwrap_or(0);
        if held < qty {
            return Err(PetError::InsufficientInventory(item.to_string()));
        }
        if held == qty {
            record.inventory.remove(item);
        } else {
            record.inventory.insert(item.to_string(), held - qty);
        }
        let patch = UserPatch {
            inventory: Some(record.inventory.clone()),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }

    /// Grant a pet: adds it to the unlocked set and seeds its run-time
    /// counter. Idempotent.
    pub fn unlock_pet(&self, username: &str, pet: &str) -> Result<()> {
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        record.unlocked_pets.insert(pet.to_string());
        record.pet_run_time.entry(pet.to_string()).or_insert(0);
        let patch = UserPatch {
            unlocked_pets: Some(record.unlocked_pets.clone()),
            pet_run_time: Some(record.pet_run_time.clone()),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }

    /// Merge preference keys into the user's settings. Keys not named in
    /// `settings` are left alone.
    pub fn update_settings(&self, username: &str, settings: BTreeMap<String, Value>) -> Result<()> {
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        for (k, v) in settings {
            record.settings.insert(k, v);
        }
        let patch = UserPatch {
            settings: Some(record.settings.clone()),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }

    /// Has this user already redeemed the given transfer key?
    pub fn is_transfer_key_used(&self, username: &str, key: &str) -> bool {
        self.lock()
            .users
            .get(username)
            .map(|r| r.used_transfer_keys.contains(key))
            .unwrap_or(false)
    }

    /// Record a transfer key as redeemed by this user.
    pub fn mark_transfer_key_used(&self, username: &str, key: &str) -> Result<()> {
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        record.used_transfer_keys.insert(key.to_string());
        let keys = record.used_transfer_keys.clone();
        let patch = UserPatch {
            used_transfer_keys: Some(keys),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }

    /// Atomic check-and-mark of a transfer key. Two concurrent redemptions
    /// of the same key cannot both succeed: the used-check and the mark
    /// happen under one lock acquisition. Callers credit the transferred
    /// seconds only after this returns `Ok`.
    pub fn redeem_transfer_key(&self, username: &str, key: &str) -> Result<()> {
        let mut shared = self.lock();
        let record = get_record_mut(&mut shared.users, username)?;
        if record.used_transfer_keys.contains(key) {
            return Err(PetError::KeyAlreadyUsed);
        }
        record.used_transfer_keys.insert(key.to_string());
        let keys = record.used_transfer_keys.clone();
        let patch = UserPatch {
            used_transfer_keys: Some(keys),
            ..Default::default()
        };
        enqueue_locked(&mut shared, username, patch);
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("final flush on shutdown failed: {}", e);
        }
    }
}

fn get_record_mut<'a>(
    users: &'a mut BTreeMap<String, UserRecord>,
    username: &str,
) -> Result<&'a mut UserRecord> {
    users
        .get_mut(username)
        .ok_or_else(|| PetError::UnknownUser(username.to_string()))
}

fn enqueue_locked(shared: &mut Shared, username: &str, patch: UserPatch) {
    shared
        .pending
        .entry(username.to_string())
        .or_default()
        .merge(patch);
}

fn flush_locked(shared: &mut Shared, users_path: &Path) -> Result<()> {
    if shared.pending.is_empty() {
        return Ok(());
    }
    let pending = std::mem::take(&mut shared.pending);
    for (username, patch) in pending {
        match shared.users.get_mut(&username) {
            Some(record) => patch.apply(record),
            // Raw enqueue_patch accepts any name; nothing to merge onto.
            None => warn!("dropping patch for unknown user {}", escape_log(&username)),
        }
    }
    codec::write_json_atomic(users_path, &shared.users)
}

/// Background loop: wake every `interval`, merge and persist pending
/// patches. Persistence errors are logged and swallowed so the loop only
/// ever terminates on the stop signal.
fn flush_loop(
    shared: Arc<Mutex<Shared>>,
    users_path: PathBuf,
    interval: Duration,
    stop_rx: mpsc::Receiver<()>,
) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = flush_locked(&mut guard, &users_path) {
                    warn!("periodic flush failed: {}", e);
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("flush loop stopped");
}

fn builtin_pet_catalog() -> BTreeMap<String, CatalogEntry> {
    BTreeMap::from([(
        DEFAULT_PET.to_string(),
        CatalogEntry {
            price: 0,
            description: "Starter companion: a loyal pixel puppy".into(),
            frames: "assets/pets/pixel_pup.json".into(),
            unlock_type: None,
            extra: BTreeMap::new(),
        },
    )])
}

fn builtin_food_catalog() -> BTreeMap<String, CatalogEntry> {
    BTreeMap::from([(
        "Carrot".to_string(),
        CatalogEntry {
            price: 120,
            description: "Basic feed: a crunchy sweet carrot".into(),
            frames: "assets/food/carrot.json".into(),
            unlock_type: None,
            extra: BTreeMap::new(),
        },
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> Store {
        let mut config = StoreConfig::new(dir);
        // Tests drive flush() by hand.
        config.flush_interval = Duration::from_secs(120);
        Store::open(config).unwrap()
    }

    fn seeded_user(store: &Store, name: &str) {
        store
            .upsert_user(name, UserRecord::new("h".into(), "q".into(), "a".into()))
            .unwrap();
    }

    #[test]
    fn open_seeds_documents_and_catalogs() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(dir.path().join("users.json").exists());
        assert!(dir.path().join("pets.json").exists());
        assert!(dir.path().join("foods.json").exists());
        assert!(store.pet_catalog().contains_key(DEFAULT_PET));
        assert!(store.food_catalog().contains_key("Carrot"));
    }

    #[test]
    fn patches_merge_per_field_until_flush() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "alice");

        store.enqueue_patch(
            "alice",
            UserPatch {
                total_run_time: Some(1),
                ..Default::default()
            },
        );
        store.enqueue_patch(
            "alice",
            UserPatch {
                total_run_time: Some(2),
                inventory: Some(BTreeMap::from([("Carrot".into(), 4)])),
                ..Default::default()
            },
        );

        // Raw patches do not touch the cache before flush.
        assert_eq!(store.get_user("alice").unwrap().total_run_time, 0);

        store.flush().unwrap();
        let alice = store.get_user("alice").unwrap();
        assert_eq!(alice.total_run_time, 2);
        assert_eq!(alice.inventory.get("Carrot"), Some(&4));
    }

    #[test]
    fn flush_with_empty_buffer_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        store.flush().unwrap();
    }

    #[test]
    fn debit_never_goes_negative() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "alice");
        store.credit_run_time("alice", 10).unwrap();

        let err = store.debit_run_time("alice", 11).unwrap_err();
        assert!(matches!(err, PetError::InsufficientBalance));
        assert_eq!(store.get_user("alice").unwrap().total_run_time, 10);

        store.debit_run_time("alice", 10).unwrap();
        assert_eq!(store.get_user("alice").unwrap().total_run_time, 0);
    }

    #[test]
    fn zero_credit_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "alice");
        let err = store.credit_run_time("alice", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn inventory_entry_is_removed_at_zero() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "alice");

        store.add_inventory("alice", "Carrot", 3).unwrap();
        store.consume_inventory("alice", "Carrot", 2).unwrap();
        assert_eq!(store.get_user("alice").unwrap().inventory.get("Carrot"), Some(&1));

        let err = store.consume_inventory("alice", "Carrot", 5).unwrap_err();
        assert!(matches!(err, PetError::InsufficientInventory(_)));

        store.consume_inventory("alice", "Carrot", 1).unwrap();
        assert!(!store.get_user("alice").unwrap().inventory.contains_key("Carrot"));
    }

    #[test]
    fn tick_accrues_total_and_pet_seconds() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "alice");

        assert_eq!(store.tick_run_time("alice", DEFAULT_PET).unwrap(), (1, 1));
        assert_eq!(store.tick_run_time("alice", DEFAULT_PET).unwrap(), (2, 2));
        store.flush().unwrap();
        let alice = store.get_user("alice").unwrap();
        assert_eq!(alice.total_run_time, 2);
        assert_eq!(alice.pet_run_time.get(DEFAULT_PET), Some(&2));
    }

    #[test]
    fn redeem_is_single_use() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "bob");

        assert!(!store.is_transfer_key_used("bob", "TR-x-y"));
        store.redeem_transfer_key("bob", "TR-x-y").unwrap();
        assert!(store.is_transfer_key_used("bob", "TR-x-y"));

        let err = store.redeem_transfer_key("bob", "TR-x-y").unwrap_err();
        assert!(matches!(err, PetError::KeyAlreadyUsed));
    }

    #[test]
    fn settings_merge_rather_than_replace() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "alice");

        store
            .update_settings("alice", BTreeMap::from([("warm_greetings".into(), json!(true))]))
            .unwrap();
        store
            .update_settings("alice", BTreeMap::from([("always_on_top".into(), json!(false))]))
            .unwrap();
        let settings = store.get_user("alice").unwrap().settings;
        assert_eq!(settings.get("warm_greetings"), Some(&json!(true)));
        assert_eq!(settings.get("always_on_top"), Some(&json!(false)));
    }

    #[test]
    fn stop_flushes_queued_patches() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            seeded_user(&store, "alice");
            store.credit_run_time("alice", 99).unwrap();
            store.stop().unwrap();
        }
        let store = open_store(dir.path());
        assert_eq!(store.get_user("alice").unwrap().total_run_time, 99);
    }

    #[test]
    fn unlock_pet_is_idempotent_and_seeds_counter() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        seeded_user(&store, "alice");
        store.unlock_pet("alice", "Gold Dragon").unwrap();
        store.unlock_pet("alice", "Gold Dragon").unwrap();
        let alice = store.get_user("alice").unwrap();
        assert!(alice.unlocked_pets.contains("Gold Dragon"));
        assert_eq!(alice.pet_run_time.get("Gold Dragon"), Some(&0));
    }

    #[test]
    fn operations_on_unknown_users_are_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(matches!(
            store.debit_run_time("ghost", 1),
            Err(PetError::UnknownUser(_))
        ));
        assert!(store.get_user("ghost").is_none());
    }
}
