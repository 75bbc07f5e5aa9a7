//! Live queries: result sets that follow the store as it changes.
//!
//! A `LiveQuery<T>` holds the latest results of a `Query<T>` and a subscription
//! to the store's change channel. Every committed transaction that touches the
//! table of `T` re-runs the query.
//!
//! # Example
//!
//! ```ignore
//! let mut due = store.live(Query::filter(|t: &Task| t.is_due_today()))?;
//! render(due.results());
//!
//! // Event-loop style
//! if due.poll()? {
//!     render(due.results());
//! }
//!
//! // Or await the next change
//! while due.changed().await.is_ok() {
//!     render(due.results());
//! }
//! ```

use color_eyre::{eyre::eyre, Result};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::local::LocalStore;
use super::query::Query;
use super::traits::{Storable, StoreChange};

/// Reactive query over one table of the local store.
pub struct LiveQuery<T: Storable> {
  store: LocalStore,
  query: Query<T>,
  receiver: broadcast::Receiver<StoreChange>,
  results: Vec<T>,
  /// Number of re-evaluations since creation
  generation: u64,
}

impl<T: Storable> LiveQuery<T> {
  pub(super) fn new(store: LocalStore, query: Query<T>) -> Result<Self> {
    // Subscribe before the first read so no commit slips between them
    let receiver = store.subscribe();
    let results = store.query(&query)?;
    Ok(Self {
      store,
      query,
      receiver,
      results,
      generation: 0,
    })
  }

  /// The latest results.
  pub fn results(&self) -> &[T] {
    &self.results
  }

  /// The first result, for queries that select a single entity.
  pub fn first(&self) -> Option<&T> {
    self.results.first()
  }

  /// How many times the results have been refreshed.
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Drain pending change notifications without blocking.
  ///
  /// Returns `true` if a relevant change arrived and the results were refreshed.
  /// Call this from an event loop tick.
  pub fn poll(&mut self) -> Result<bool> {
    let mut relevant = false;
    loop {
      match self.receiver.try_recv() {
        Ok(change) => relevant |= change.touches::<T>(),
        // Missed notifications may have touched our table
        Err(TryRecvError::Lagged(_)) => relevant = true,
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Closed) => return Err(eyre!("Local store was closed")),
      }
    }

    if relevant {
      self.refresh()?;
    }
    Ok(relevant)
  }

  /// Wait for the next relevant change and refresh the results.
  pub async fn changed(&mut self) -> Result<()> {
    loop {
      match self.receiver.recv().await {
        Ok(change) if change.touches::<T>() => break,
        Ok(_) => continue,
        Err(RecvError::Lagged(_)) => break,
        Err(RecvError::Closed) => return Err(eyre!("Local store was closed")),
      }
    }
    self.refresh()
  }

  fn refresh(&mut self) -> Result<()> {
    self.results = self.store.query(&self.query)?;
    self.generation += 1;
    Ok(())
  }
}

impl<T: Storable + std::fmt::Debug> std::fmt::Debug for LiveQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LiveQuery")
      .field("query", &self.query)
      .field("results", &self.results)
      .field("generation", &self.generation)
      .finish_non_exhaustive()
  }
}
