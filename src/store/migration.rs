//! One-time repair of legacy `pet_run_time` keys.
//!
//! Early builds keyed `pet_run_time` by the pet's frames file path instead
//! of its catalog name. This migration resolves such keys against the pet
//! catalog's `frames` references (normalized path, path with `.json`
//! appended, or basename without extension), folds their accumulated
//! seconds into the catalog name, and drops the stale key. It is
//! best-effort and idempotent: keys that resolve to nothing are kept
//! untouched, and already-clean records pass through unchanged.

use crate::store::types::{CatalogEntry, UserRecord};
use log::info;
use std::collections::BTreeMap;

/// Lowercased, forward-slash form used for all path comparisons.
fn norm_path(s: &str) -> String {
    s.trim().replace('\\', "/").trim_start_matches("./").to_lowercase()
}

/// Final path component without its extension: `assets/pets/pixel_pup.json`
/// -> `pixel_pup`.
fn basename_no_ext(norm: &str) -> String {
    let base = norm.rsplit('/').next().unwrap_or(norm);
    base.split('.').next().unwrap_or(base).to_string()
}

/// Normalize every record's `pet_run_time` keys against the pet catalog.
/// Returns the number of records that were repaired.
pub fn normalize_pet_run_time_keys(
    users: &mut BTreeMap<String, UserRecord>,
    pets: &BTreeMap<String, CatalogEntry>,
) -> usize {
    let mut path_to_name: BTreeMap<String, String> = BTreeMap::new();
    let mut base_to_name: BTreeMap<String, String> = BTreeMap::new();
    for (name, entry) in pets {
        let p = norm_path(&entry.frames);
        if p.is_empty() {
            continue;
        }
        base_to_name.insert(basename_no_ext(&p), name.clone());
        path_to_name.insert(p, name.clone());
    }

    let mut repaired = 0usize;
    for (username, record) in users.iter_mut() {
        let mut changed = false;
        let mut fixed: BTreeMap<String, u64> = BTreeMap::new();
        for (key, seconds) in &record.pet_run_time {
            let resolved = if pets.contains_key(key) {
                None
            } else {
                let norm = norm_path(key);
                path_to_name
                    .get(&norm)
                    .or_else(|| {
                        if key.ends_with(".json") {
                            None
                        } else {
                            path_to_name.get(&format!("{norm}.json"))
                        }
                    })
                    .or_else(|| base_to_name.get(&basename_no_ext(&norm)))
                    .cloned()
            };
            match resolved {
                Some(name) => {
                    *fixed.entry(name.clone()).or_insert(0) += *seconds;
                    if name != *key {
                        changed = true;
                    }
                }
                None => {
                    *fixed.entry(key.clone()).or_insert(0) += *seconds;
                }
            }
        }
        if changed {
            info!(
                "repaired legacy pet_run_time keys for {}",
                crate::logutil::escape_log(username)
            );
            record.pet_run_time = fixed;
            repaired += 1;
        }
    }
    repaired
}
