//! # PixelPet - Durable State Core for a Desktop Pixel Pet
//!
//! PixelPet is the user-state backbone of a desktop companion application:
//! pixel pets earn "run time" while they sit on screen, and that time is the
//! currency for unlocking pets, buying feed, and transferring between
//! accounts. The presentation layer (windows, sprite animation, menus) sits
//! outside this crate and consumes it through a small read/write contract.
//!
//! ## Features
//!
//! - **Durable Cache Store**: in-memory user records and catalogs backed by
//!   JSON documents, with crash-safe atomic replacement and a once-per-second
//!   background merge-flush for high-frequency updates.
//! - **Account Management**: registration, login, and security-question
//!   password recovery with SHA-256 password digests.
//! - **Encrypted Backups**: a single-string, tamper-evident export/import
//!   codec for moving one account between machines.
//! - **License Keys**: deterministic HMAC unlock keys for key-gated pets and
//!   signed single-use transfer tokens for moving run time between accounts.
//! - **Runtime Tracking**: a cancellable accrual thread crediting the active
//!   pet every second.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixelpet::account::AccountManager;
//! use pixelpet::store::{Store, StoreConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Store::open(StoreConfig::new("./data"))?;
//!     let accounts = AccountManager::new(&store);
//!     accounts.register("alice", "hunter2", "hunter2", "favorite color?", "teal")?;
//!     store.credit_run_time("alice", 600)?;
//!     store.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - concurrent cache, atomic document I/O, patch write-back
//! - [`account`] - registration, login, password recovery
//! - [`backup`] - encrypted backup export/import
//! - [`license`] - unlock keys and transfer tokens
//! - [`tracker`] - per-second runtime accrual
//! - [`config`] - TOML configuration
//! - [`errors`] - the error taxonomy shared by all of the above
//!
//! ## Concurrency Model
//!
//! One UI thread plus periodic background threads (the store's flush loop,
//! the runtime tracker). All shared state sits behind the store's single
//! lock; every logical operation holds it for its whole read-modify-enqueue
//! sequence. No operation is fatal: persistence failures degrade to logged
//! errors and the worst outcome is a failed user-visible action.

pub mod account;
pub mod backup;
pub mod config;
pub mod errors;
pub mod license;
pub mod logutil;
pub mod store;
pub mod tracker;

pub use errors::{ErrorKind, PetError};
