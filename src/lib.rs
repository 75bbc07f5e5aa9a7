//! Offline-first Habitica client core.
//!
//! - `store`: local object store with transactions, persistence and live queries
//! - `habitica`: API types and the REST client
//! - `repository`: task and social repositories on top of both

pub mod config;
pub mod form;
pub mod habitica;
pub mod logging;
pub mod repository;
pub mod store;
