//! Core traits and types for the local store.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can live in the local store.
///
/// Implementors provide a stable key and the name of the table they are kept in.
pub trait Storable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity within its table (e.g., task id)
  fn store_key(&self) -> String;

  /// Table name for storage organization (e.g., "task", "chat_message")
  fn entity_type() -> &'static str;
}

/// Notification broadcast after every committed write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
  /// Tables touched by the transaction, sorted and deduplicated
  pub entity_types: Vec<&'static str>,
}

impl StoreChange {
  /// Whether the transaction touched the table of `T`.
  pub fn touches<T: Storable>(&self) -> bool {
    self.entity_types.contains(&T::entity_type())
  }
}
