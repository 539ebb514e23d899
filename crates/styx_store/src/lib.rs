//! styx_store: persistent state for Styx clients
//!
//! Holds the per-owner scan cursor, the seen-set used for at-most-once
//! delivery, and an opaque key-value space for key material.
//!
//! Two backends implement the same traits:
//! - [`MemoryStore`] for tests and ephemeral clients;
//! - [`SqliteStore`] over sqlx, with migrations in `migrations/` run on open.

pub mod db;
pub mod error;
pub mod memory;
pub mod prekeys;
pub mod traits;

pub use db::SqliteStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use prekeys::{load_prekey_state, prekey_state_key, save_prekey_state};
pub use traits::{CursorStore, KeyValueStore, SeenKey};
