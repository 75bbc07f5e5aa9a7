//! Write-through persistence for the local store and its SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;

/// A single row as kept on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
  pub entity_type: String,
  pub entity_key: String,
  /// Serialized JSON of the entity
  pub data: Vec<u8>,
}

/// A committed change to replay against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
  Upsert {
    entity_type: &'static str,
    entity_key: String,
    data: Vec<u8>,
  },
  Delete {
    entity_type: &'static str,
    entity_key: String,
  },
}

/// Trait for store persistence backends.
pub trait Persistence: Send {
  /// Load every stored row.
  fn load_all(&self) -> Result<Vec<StoredRow>>;

  /// Apply a batch of writes atomically. Either all writes land or none do.
  fn apply(&mut self, writes: &[PendingWrite]) -> Result<()>;
}

/// Backend that doesn't persist anything.
/// Used for in-memory stores and when caching is disabled.
pub struct NoopPersistence;

impl Persistence for NoopPersistence {
  fn load_all(&self) -> Result<Vec<StoredRow>> {
    Ok(Vec::new()) // Nothing stored
  }

  fn apply(&mut self, _writes: &[PendingWrite]) -> Result<()> {
    Ok(()) // Discard
  }
}

/// SQLite-based persistence.
pub struct SqlitePersistence {
  conn: Connection,
}

impl SqlitePersistence {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let persistence = Self { conn };
    persistence.run_migrations()?;

    Ok(persistence)
  }

  /// Run database migrations for the store table.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the entity table.
const STORE_SCHEMA: &str = r#"
-- One row per entity (stores serialized JSON)
CREATE TABLE IF NOT EXISTS entity_store (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, entity_key)
);
"#;

impl Persistence for SqlitePersistence {
  fn load_all(&self) -> Result<Vec<StoredRow>> {
    let mut stmt = self
      .conn
      .prepare("SELECT entity_type, entity_key, data FROM entity_store")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok(StoredRow {
          entity_type: row.get(0)?,
          entity_key: row.get(1)?,
          data: row.get(2)?,
        })
      })
      .map_err(|e| eyre!("Failed to query stored entities: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read stored entity: {}", e))?;

    Ok(rows)
  }

  fn apply(&mut self, writes: &[PendingWrite]) -> Result<()> {
    let tx = self
      .conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for write in writes {
      match write {
        PendingWrite::Upsert {
          entity_type,
          entity_key,
          data,
        } => {
          tx.execute(
            "INSERT OR REPLACE INTO entity_store (entity_type, entity_key, data, stored_at)
             VALUES (?, ?, ?, datetime('now'))",
            params![entity_type, entity_key, data],
          )
          .map_err(|e| eyre!("Failed to store entity: {}", e))?;
        }
        PendingWrite::Delete {
          entity_type,
          entity_key,
        } => {
          tx.execute(
            "DELETE FROM entity_store WHERE entity_type = ? AND entity_key = ?",
            params![entity_type, entity_key],
          )
          .map_err(|e| eyre!("Failed to delete entity: {}", e))?;
        }
      }
    }

    // Dropping an uncommitted transaction rolls it back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}
