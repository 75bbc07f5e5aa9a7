//! Typed queries over a single store table.
//!
//! A `Query<T>` is a filter, an optional ordering and an optional distinct-by key.
//! Queries are cheap to clone so a live query can re-run them on every change.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;
type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

pub struct Query<T> {
  filters: Vec<Predicate<T>>,
  order: Option<Comparator<T>>,
  distinct: Option<KeyFn<T>>,
}

impl<T> Query<T> {
  /// Every entity in the table, in key order.
  pub fn all() -> Self {
    Self {
      filters: Vec::new(),
      order: None,
      distinct: None,
    }
  }

  /// Entities matching `predicate`.
  pub fn filter<F>(predicate: F) -> Self
  where
    F: Fn(&T) -> bool + Send + Sync + 'static,
  {
    Self::all().and(predicate)
  }

  /// Narrow the query with an additional predicate.
  pub fn and<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.filters.push(Arc::new(predicate));
    self
  }

  /// Order results with a comparator.
  pub fn sort_by<F>(mut self, compare: F) -> Self
  where
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
  {
    self.order = Some(Arc::new(compare));
    self
  }

  /// Order results by a key, ascending or descending.
  pub fn sort_by_key<K, F>(self, key: F, ascending: bool) -> Self
  where
    K: Ord,
    F: Fn(&T) -> K + Send + Sync + 'static,
  {
    self.sort_by(move |a, b| {
      let ordering = key(a).cmp(&key(b));
      if ascending {
        ordering
      } else {
        ordering.reverse()
      }
    })
  }

  /// Keep only the first result (after ordering) for each distinct key.
  pub fn distinct_by<F>(mut self, key: F) -> Self
  where
    F: Fn(&T) -> String + Send + Sync + 'static,
  {
    self.distinct = Some(Arc::new(key));
    self
  }

  /// Check a single entity against the filters.
  pub fn matches(&self, item: &T) -> bool {
    self.filters.iter().all(|predicate| predicate(item))
  }

  /// Run the query over a set of entities.
  pub fn apply<'a, I>(&self, items: I) -> Vec<T>
  where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a T>,
  {
    let mut results: Vec<T> = items
      .into_iter()
      .filter(|item| self.matches(item))
      .cloned()
      .collect();

    if let Some(order) = &self.order {
      // Stable sort keeps key order for ties
      results.sort_by(|a, b| order(a, b));
    }

    if let Some(distinct) = &self.distinct {
      let mut seen = HashSet::new();
      results.retain(|item| seen.insert(distinct(item)));
    }

    results
  }
}

impl<T> Clone for Query<T> {
  fn clone(&self) -> Self {
    Self {
      filters: self.filters.clone(),
      order: self.order.clone(),
      distinct: self.distinct.clone(),
    }
  }
}

impl<T> Default for Query<T> {
  fn default() -> Self {
    Self::all()
  }
}

impl<T> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("filters", &self.filters.len())
      .field("ordered", &self.order.is_some())
      .field("distinct", &self.distinct.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  struct Message {
    thread: &'static str,
    at: u32,
  }

  fn messages() -> Vec<Message> {
    vec![
      Message { thread: "a", at: 1 },
      Message { thread: "b", at: 5 },
      Message { thread: "a", at: 7 },
      Message { thread: "c", at: 3 },
    ]
  }

  #[test]
  fn test_all_returns_everything_in_input_order() {
    let items = messages();
    assert_eq!(Query::all().apply(&items), items);
  }

  #[test]
  fn test_filters_are_combined() {
    let items = messages();
    let query = Query::filter(|m: &Message| m.thread == "a").and(|m: &Message| m.at > 2);
    assert_eq!(query.apply(&items), vec![Message { thread: "a", at: 7 }]);
  }

  #[test]
  fn test_sort_descending() {
    let items = messages();
    let query = Query::all().sort_by_key(|m: &Message| m.at, false);
    let order: Vec<u32> = query.apply(&items).iter().map(|m| m.at).collect();
    assert_eq!(order, vec![7, 5, 3, 1]);
  }

  #[test]
  fn test_distinct_keeps_first_after_sort() {
    let items = messages();
    let query = Query::all()
      .sort_by_key(|m: &Message| m.at, false)
      .distinct_by(|m: &Message| m.thread.to_string());
    let results = query.apply(&items);
    assert_eq!(
      results,
      vec![
        Message { thread: "a", at: 7 },
        Message { thread: "b", at: 5 },
        Message { thread: "c", at: 3 },
      ]
    );
  }
}
