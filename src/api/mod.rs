// File: ./src/api/mod.rs
//! Remote source of truth for activities.
//!
//! The store only ever talks to the network through `ActivityApi`. Two
//! implementations ship with the crate: `HttpApi` for the real backend and
//! `MemoryApi`, an in-process stand-in used for offline mode and tests.
pub mod http;
pub mod memory;

use crate::model::{Activity, ActivityDraft, ActivityId, ActivityPatch, DateKey};
use thiserror::Error;

pub use http::HttpApi;
pub use memory::{MemoryApi, Op};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Unreachable, timed out, or an unexpected server status.
    #[error("network error: {0}")]
    Network(String),
    #[error("not found")]
    NotFound,
    /// The server rejected the request body.
    #[error("{0}")]
    Validation(String),
}

pub trait ActivityApi: Send + Sync + 'static {
    fn fetch_activities(
        &self,
        key: DateKey,
    ) -> impl Future<Output = Result<Vec<Activity>, ApiError>> + Send;

    fn create_activity(
        &self,
        key: DateKey,
        draft: ActivityDraft,
    ) -> impl Future<Output = Result<Activity, ApiError>> + Send;

    fn update_activity(
        &self,
        id: ActivityId,
        patch: ActivityPatch,
    ) -> impl Future<Output = Result<Activity, ApiError>> + Send;

    fn delete_activity(&self, id: ActivityId)
    -> impl Future<Output = Result<(), ApiError>> + Send;
}
