// File: ./src/model/mod.rs
pub mod activity;
pub mod date_key;

pub use activity::{Activity, ActivityDraft, ActivityId, ActivityPatch};
pub use date_key::{DateKey, DateKeyError};
