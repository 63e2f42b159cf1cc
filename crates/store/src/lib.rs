//! Persistence backends for aula.
//!
//! One backend implements all three store traits (`ConversationStore`,
//! `CacheStore`, `UsageStore`):
//! - `InMemoryStore` — RwLock-guarded maps, for tests and ephemeral runs
//! - `SqliteStore` — sqlx over SQLite with WAL journaling (feature "sqlite")

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
