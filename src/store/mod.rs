//! Local object store for offline-first access.
//!
//! This module is Habitica-agnostic and provides:
//! - Typed tables of `Storable` entities keyed by identifier
//! - Atomic write transactions with rollback
//! - Optional write-through persistence to SQLite
//! - Change broadcasts and live queries that re-run on every relevant commit

mod live;
mod local;
mod persistence;
mod query;
mod traits;

pub use live::LiveQuery;
pub use local::{LocalStore, WriteTxn};
pub use persistence::{NoopPersistence, PendingWrite, Persistence, SqlitePersistence, StoredRow};
pub use query::Query;
pub use traits::{Storable, StoreChange};
