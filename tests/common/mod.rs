// Shared fixtures for the integration tests.
#![allow(dead_code)]
use chrono::NaiveTime;
use std::sync::Arc;
use weekplan::ActivityStore;
use weekplan::api::MemoryApi;
use weekplan::model::{ActivityDraft, DateKey};

pub fn day(y: i32, m: u32, d: u32) -> DateKey {
    DateKey::new(y, m, d).unwrap()
}

pub fn draft(key: DateKey, name: &str, from: (u32, u32), to: (u32, u32)) -> ActivityDraft {
    ActivityDraft::new(
        name,
        key.at(NaiveTime::from_hms_opt(from.0, from.1, 0).unwrap()),
        key.at(NaiveTime::from_hms_opt(to.0, to.1, 0).unwrap()),
    )
}

pub fn setup() -> (MemoryApi, Arc<ActivityStore<MemoryApi>>) {
    let api = MemoryApi::new();
    let store = Arc::new(ActivityStore::new(api.clone()));
    (api, store)
}

/// Yields to spawned tasks until `cond` holds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was never reached");
}

/// Gives spawned tasks a chance to run as far as they can.
pub async fn let_run() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}
