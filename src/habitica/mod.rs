//! Habitica API types, decoders and client.

pub mod api_types;
pub mod client;
mod storable;
pub mod types;

pub use client::{ApiError, ApiResult, HabiticaClient, SocialApi, TaskApi};
