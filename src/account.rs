//! Account lifecycle: registration, login, and password recovery.
//!
//! Passwords are stored as SHA-256 hex digests; the security answer is the
//! secondary recovery channel and is compared literally, never hashed. All
//! failures surface as `Validation`-kind errors with user-presentable
//! messages.

use crate::errors::{PetError, Result};
use crate::logutil::escape_log;
use crate::store::types::UserRecord;
use crate::store::Store;
use log::info;
use sha2::{Digest, Sha256};

/// Fixed-length digest of a password. Never stores or compares plaintext.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Account operations over a borrowed store.
pub struct AccountManager<'a> {
    store: &'a Store,
}

impl<'a> AccountManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        AccountManager { store }
    }

    /// Create a new account. The record starts with the default pet
    /// unlocked and is persisted immediately.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        confirm_password: &str,
        security_question: &str,
        security_answer: &str,
    ) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(PetError::Validation("username must not be empty".into()));
        }
        if self.store.get_user(username).is_some() {
            return Err(PetError::Validation("username already taken".into()));
        }
        if password.is_empty() || password != confirm_password {
            return Err(PetError::Validation("passwords are empty or do not match".into()));
        }
        if security_question.is_empty() || security_answer.is_empty() {
            return Err(PetError::Validation(
                "security question and answer must not be empty".into(),
            ));
        }

        let record = UserRecord::new(
            hash_password(password),
            security_question.to_string(),
            security_answer.to_string(),
        );
        self.store.upsert_user(username, record)?;
        info!("registered user {}", escape_log(username));
        Ok(())
    }

    /// Match username and password digest.
    pub fn login(&self, username: &str, password: &str) -> Result<()> {
        let username = username.trim();
        let record = self
            .store
            .get_user(username)
            .ok_or_else(|| PetError::Validation("user does not exist".into()))?;
        if record.password_hash != hash_password(password) {
            return Err(PetError::Validation("wrong password".into()));
        }
        Ok(())
    }

    /// The security question shown during recovery, or `None` for unknown
    /// users.
    pub fn security_question(&self, username: &str) -> Option<String> {
        self.store
            .get_user(username.trim())
            .map(|r| r.security_question)
    }

    /// Reset the password after a literal security-answer match. Persists
    /// immediately through the synchronous write path.
    pub fn recover_password(
        &self,
        username: &str,
        security_answer: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        let username = username.trim();
        let mut record = self
            .store
            .get_user(username)
            .ok_or_else(|| PetError::Validation("user does not exist".into()))?;
        if security_answer != record.security_answer {
            return Err(PetError::Validation("security answer is incorrect".into()));
        }
        if new_password.is_empty() || new_password != confirm_password {
            return Err(PetError::Validation("passwords are empty or do not match".into()));
        }
        record.password_hash = hash_password(new_password);
        self.store.upsert_user(username, record)?;
        info!("password reset for {}", escape_log(username));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreConfig, DEFAULT_PET};
    use std::time::Duration;
    use tempfile::tempdir;

    fn open_store(dir: &std::path::Path) -> Store {
        let mut config = StoreConfig::new(dir);
        config.flush_interval = Duration::from_secs(120);
        Store::open(config).unwrap()
    }

    #[test]
    fn register_then_login() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let accounts = AccountManager::new(&store);

        accounts
            .register("alice", "pw", "pw", "favorite color?", "teal")
            .unwrap();
        accounts.login("alice", "pw").unwrap();
        assert!(accounts.login("alice", "wrong").is_err());

        let record = store.get_user("alice").unwrap();
        assert!(record.unlocked_pets.contains(DEFAULT_PET));
        assert_ne!(record.password_hash, "pw");
    }

    #[test]
    fn duplicate_and_empty_usernames_are_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let accounts = AccountManager::new(&store);

        accounts.register("alice", "pw", "pw", "q", "a").unwrap();
        assert!(accounts.register("alice", "pw", "pw", "q", "a").is_err());
        assert!(accounts.register("  ", "pw", "pw", "q", "a").is_err());
        assert!(accounts.register("bob", "pw", "pww", "q", "a").is_err());
        assert!(accounts.register("bob", "pw", "pw", "", "a").is_err());
    }

    #[test]
    fn recovery_checks_literal_answer() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let accounts = AccountManager::new(&store);

        accounts.register("alice", "pw", "pw", "color?", "teal").unwrap();
        assert_eq!(accounts.security_question("alice").as_deref(), Some("color?"));
        assert!(accounts
            .recover_password("alice", "TEAL", "new", "new")
            .is_err());
        accounts
            .recover_password("alice", "teal", "new", "new")
            .unwrap();
        accounts.login("alice", "new").unwrap();
        assert!(accounts.login("alice", "pw").is_err());
    }
}
