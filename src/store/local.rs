//! In-memory object store with atomic write transactions and change notification.

use color_eyre::{eyre::eyre, Result};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::live::LiveQuery;
use super::persistence::{NoopPersistence, PendingWrite, Persistence, SqlitePersistence};
use super::query::Query;
use super::traits::{Storable, StoreChange};

/// Entities of one type, keyed by store key.
type Table<T> = BTreeMap<String, T>;

/// Capacity of the change channel. Slow subscribers see `Lagged` and re-query.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Type-indexed set of tables.
///
/// Rows loaded from disk stay serialized until their table is first touched,
/// so the store never needs to know the concrete entity types up front.
#[derive(Default)]
struct Tables {
  tables: HashMap<&'static str, Box<dyn Any + Send>>,
  unloaded: HashMap<String, Vec<(String, Vec<u8>)>>,
}

impl Tables {
  fn table<T: Storable>(&mut self) -> Result<&mut Table<T>> {
    let entity_type = T::entity_type();
    let Tables { tables, unloaded } = self;

    let slot = tables.entry(entity_type).or_insert_with(|| {
      let rows = unloaded.remove(entity_type).unwrap_or_default();
      let table: Box<dyn Any + Send> = Box::new(decode_rows::<T>(rows));
      table
    });

    slot
      .downcast_mut::<Table<T>>()
      .ok_or_else(|| eyre!("Table '{}' is registered with another type", entity_type))
  }
}

fn decode_rows<T: Storable>(rows: Vec<(String, Vec<u8>)>) -> Table<T> {
  let mut table = Table::new();
  for (key, data) in rows {
    match serde_json::from_slice::<T>(&data) {
      Ok(entity) => {
        table.insert(key, entity);
      }
      Err(e) => warn!(
        entity_type = T::entity_type(),
        key = %key,
        error = %e,
        "Skipping undecodable row"
      ),
    }
  }
  table
}

type UndoFn = Box<dyn FnOnce(&mut Tables) + Send>;

/// A write transaction against the store.
///
/// Changes are visible to later reads within the same transaction. If the
/// transaction body or the persistence backend fails, every change is undone.
pub struct WriteTxn<'a> {
  tables: &'a mut Tables,
  writes: Vec<PendingWrite>,
  undo: Vec<UndoFn>,
  touched: BTreeSet<&'static str>,
}

impl<'a> WriteTxn<'a> {
  fn new(tables: &'a mut Tables) -> Self {
    Self {
      tables,
      writes: Vec::new(),
      undo: Vec::new(),
      touched: BTreeSet::new(),
    }
  }

  /// Get a copy of an entity by key.
  pub fn get<T: Storable>(&mut self, key: &str) -> Result<Option<T>> {
    Ok(self.tables.table::<T>()?.get(key).cloned())
  }

  /// Get copies of every entity matching the query.
  pub fn select<T: Storable>(&mut self, query: &Query<T>) -> Result<Vec<T>> {
    Ok(query.apply(self.tables.table::<T>()?.values()))
  }

  /// Insert or overwrite an entity.
  pub fn upsert<T: Storable>(&mut self, entity: T) -> Result<()> {
    let key = entity.store_key();
    let data =
      serde_json::to_vec(&entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    let previous = self.tables.table::<T>()?.insert(key.clone(), entity);
    self.record_undo::<T>(key.clone(), previous);
    self.writes.push(PendingWrite::Upsert {
      entity_type: T::entity_type(),
      entity_key: key,
      data,
    });
    self.touched.insert(T::entity_type());
    Ok(())
  }

  /// Remove an entity, returning it if it was present.
  pub fn delete<T: Storable>(&mut self, key: &str) -> Result<Option<T>> {
    let previous = self.tables.table::<T>()?.remove(key);
    if previous.is_none() {
      return Ok(None);
    }

    self.record_undo::<T>(key.to_string(), previous.clone());
    self.writes.push(PendingWrite::Delete {
      entity_type: T::entity_type(),
      entity_key: key.to_string(),
    });
    self.touched.insert(T::entity_type());
    Ok(previous)
  }

  /// Modify an entity in place. Returns false if no entity has that key.
  pub fn update<T: Storable, F>(&mut self, key: &str, modify: F) -> Result<bool>
  where
    F: FnOnce(&mut T),
  {
    let Some(mut entity) = self.get::<T>(key)? else {
      return Ok(false);
    };
    modify(&mut entity);
    self.upsert(entity)?;
    Ok(true)
  }

  fn record_undo<T: Storable>(&mut self, key: String, previous: Option<T>) {
    self.undo.push(Box::new(move |tables: &mut Tables| {
      if let Ok(table) = tables.table::<T>() {
        match previous {
          Some(entity) => {
            table.insert(key, entity);
          }
          None => {
            table.remove(&key);
          }
        }
      }
    }));
  }

  fn rollback(self) {
    let WriteTxn { tables, undo, .. } = self;
    for undo in undo.into_iter().rev() {
      undo(&mut *tables);
    }
  }
}

struct State {
  tables: Tables,
  backend: Box<dyn Persistence>,
}

struct StoreInner {
  state: Mutex<State>,
  changes: broadcast::Sender<StoreChange>,
}

/// Handle to the local object store. Cloning shares the same store.
#[derive(Clone)]
pub struct LocalStore {
  inner: Arc<StoreInner>,
}

impl LocalStore {
  /// A store that lives only in memory.
  pub fn in_memory() -> Self {
    Self::build(Tables::default(), Box::new(NoopPersistence))
  }

  /// Open a store backed by the SQLite database at `path`, loading what it holds.
  pub fn open(path: &Path) -> Result<Self> {
    let backend = SqlitePersistence::open(path)?;
    Self::with_persistence(Box::new(backend))
  }

  /// Open a store over an arbitrary persistence backend.
  pub fn with_persistence(backend: Box<dyn Persistence>) -> Result<Self> {
    let mut tables = Tables::default();
    let rows = backend.load_all()?;
    debug!(rows = rows.len(), "Loaded local store");
    for row in rows {
      tables
        .unloaded
        .entry(row.entity_type)
        .or_default()
        .push((row.entity_key, row.data));
    }
    Ok(Self::build(tables, backend))
  }

  fn build(tables: Tables, backend: Box<dyn Persistence>) -> Self {
    let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
    Self {
      inner: Arc::new(StoreInner {
        state: Mutex::new(State { tables, backend }),
        changes,
      }),
    }
  }

  /// Get a copy of an entity by key.
  pub fn get<T: Storable>(&self, key: &str) -> Result<Option<T>> {
    let mut state = self.lock()?;
    Ok(state.tables.table::<T>()?.get(key).cloned())
  }

  /// Get copies of every entity matching the query.
  pub fn query<T: Storable>(&self, query: &Query<T>) -> Result<Vec<T>> {
    let mut state = self.lock()?;
    Ok(query.apply(state.tables.table::<T>()?.values()))
  }

  /// Run `body` as one atomic write transaction.
  ///
  /// On success the changes are persisted and subscribers are notified once.
  /// On failure nothing is kept and nothing is broadcast.
  pub fn write<R, F>(&self, body: F) -> Result<R>
  where
    F: FnOnce(&mut WriteTxn<'_>) -> Result<R>,
  {
    let mut guard = self.lock()?;
    let State { tables, backend } = &mut *guard;

    let mut txn = WriteTxn::new(tables);
    let value = match body(&mut txn) {
      Ok(value) => value,
      Err(e) => {
        txn.rollback();
        return Err(e);
      }
    };

    if !txn.writes.is_empty() {
      if let Err(e) = backend.apply(&txn.writes) {
        txn.rollback();
        return Err(e);
      }
    }

    let touched: Vec<&'static str> = txn.touched.iter().copied().collect();
    drop(txn);
    drop(guard);

    if !touched.is_empty() {
      // No subscribers is not an error
      let _ = self.inner.changes.send(StoreChange {
        entity_types: touched,
      });
    }

    Ok(value)
  }

  /// Subscribe to committed changes.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
    self.inner.changes.subscribe()
  }

  /// Start a live query that re-evaluates whenever its table changes.
  pub fn live<T: Storable>(&self, query: Query<T>) -> Result<LiveQuery<T>> {
    LiveQuery::new(self.clone(), query)
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
    self
      .inner
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl std::fmt::Debug for LocalStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LocalStore")
      .field("subscribers", &self.inner.changes.receiver_count())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::persistence::StoredRow;
  use serde::{Deserialize, Serialize};
  use std::sync::atomic::{AtomicBool, Ordering};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Note {
    id: String,
    body: String,
  }

  impl Storable for Note {
    fn store_key(&self) -> String {
      self.id.clone()
    }

    fn entity_type() -> &'static str {
      "note"
    }
  }

  fn note(id: &str, body: &str) -> Note {
    Note {
      id: id.to_string(),
      body: body.to_string(),
    }
  }

  #[test]
  fn test_write_then_read() {
    let store = LocalStore::in_memory();
    store.write(|txn| txn.upsert(note("1", "hello"))).unwrap();

    assert_eq!(store.get::<Note>("1").unwrap(), Some(note("1", "hello")));
    assert_eq!(store.get::<Note>("2").unwrap(), None);
  }

  #[test]
  fn test_failed_transaction_is_rolled_back() {
    let store = LocalStore::in_memory();
    store.write(|txn| txn.upsert(note("1", "original"))).unwrap();
    let mut changes = store.subscribe();

    let result: Result<()> = store.write(|txn| {
      txn.upsert(note("1", "changed"))?;
      txn.upsert(note("2", "new"))?;
      Err(eyre!("boom"))
    });

    assert!(result.is_err());
    assert_eq!(store.get::<Note>("1").unwrap(), Some(note("1", "original")));
    assert_eq!(store.get::<Note>("2").unwrap(), None);
    assert!(changes.try_recv().is_err());
  }

  #[test]
  fn test_commit_broadcasts_touched_tables_once() {
    let store = LocalStore::in_memory();
    let mut changes = store.subscribe();

    store
      .write(|txn| {
        txn.upsert(note("1", "a"))?;
        txn.upsert(note("2", "b"))
      })
      .unwrap();

    let change = changes.try_recv().unwrap();
    assert_eq!(change.entity_types, vec!["note"]);
    assert!(change.touches::<Note>());
    assert!(changes.try_recv().is_err());
  }

  #[test]
  fn test_deleting_missing_entity_does_not_notify() {
    let store = LocalStore::in_memory();
    let mut changes = store.subscribe();

    let removed = store.write(|txn| txn.delete::<Note>("missing")).unwrap();

    assert_eq!(removed, None);
    assert!(changes.try_recv().is_err());
  }

  struct FailingPersistence {
    fail: Arc<AtomicBool>,
  }

  impl Persistence for FailingPersistence {
    fn load_all(&self) -> Result<Vec<StoredRow>> {
      Ok(Vec::new())
    }

    fn apply(&mut self, _writes: &[PendingWrite]) -> Result<()> {
      if self.fail.load(Ordering::SeqCst) {
        Err(eyre!("disk full"))
      } else {
        Ok(())
      }
    }
  }

  #[test]
  fn test_persistence_failure_rolls_back_memory() {
    let fail = Arc::new(AtomicBool::new(false));
    let store = LocalStore::with_persistence(Box::new(FailingPersistence { fail: fail.clone() }))
      .unwrap();
    store.write(|txn| txn.upsert(note("1", "kept"))).unwrap();

    fail.store(true, Ordering::SeqCst);
    let result = store.write(|txn| {
      txn.delete::<Note>("1")?;
      txn.upsert(note("2", "lost"))
    });

    assert!(result.is_err());
    assert_eq!(store.get::<Note>("1").unwrap(), Some(note("1", "kept")));
    assert_eq!(store.get::<Note>("2").unwrap(), None);
  }

  #[test]
  fn test_reopen_restores_entities_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = LocalStore::open(&path).unwrap();
      store
        .write(|txn| {
          txn.upsert(note("1", "one"))?;
          txn.upsert(note("2", "two"))?;
          txn.delete::<Note>("2")
        })
        .unwrap();
    }

    let store = LocalStore::open(&path).unwrap();
    let notes = store.query(&Query::<Note>::all()).unwrap();
    assert_eq!(notes, vec![note("1", "one")]);
  }

  #[test]
  fn test_update_modifies_existing_only() {
    let store = LocalStore::in_memory();
    store.write(|txn| txn.upsert(note("1", "a"))).unwrap();

    let updated = store
      .write(|txn| txn.update::<Note, _>("1", |n| n.body = "b".to_string()))
      .unwrap();
    let missing = store
      .write(|txn| txn.update::<Note, _>("9", |n| n.body = "x".to_string()))
      .unwrap();

    assert!(updated);
    assert!(!missing);
    assert_eq!(store.get::<Note>("1").unwrap(), Some(note("1", "b")));
  }
}
