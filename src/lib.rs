// Crate root library declaration and module exports.
pub mod api;
pub mod config;
pub mod context;
pub mod copy;
pub mod model;
pub mod storage;
pub mod store;

pub use copy::{CopyError, CopyPhase, CopyStatus, DayCopyCoordinator, Eligibility};
pub use store::{ActivityStore, DaySnapshot, EntryStatus, StoreError};
