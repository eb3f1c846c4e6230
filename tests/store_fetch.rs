// File: ./tests/store_fetch.rs
mod common;

use common::{day, draft, setup, wait_for};
use std::time::Duration;
use weekplan::api::{ActivityApi, ApiError, Op};
use weekplan::model::{Activity, ActivityDraft, ActivityId, ActivityPatch, DateKey};
use weekplan::{ActivityStore, EntryStatus, StoreError};

#[tokio::test]
async fn second_fetch_within_window_hits_the_cache() {
    let (api, store) = setup();
    let key = day(2024, 5, 1);
    api.seed(draft(key, "Walk", (9, 0), (10, 0)));

    let first = store.ensure_fetched(key).await.unwrap();
    let second = store.ensure_fetched(key).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(api.calls(Op::Fetch), 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_goes_back_to_the_server_after_ten_minutes() {
    let (api, store) = setup();
    let key = day(2024, 5, 1);

    store.ensure_fetched(key).await.unwrap();
    tokio::time::advance(Duration::from_secs(9 * 60)).await;
    store.ensure_fetched(key).await.unwrap();
    assert_eq!(api.calls(Op::Fetch), 1);

    tokio::time::advance(Duration::from_secs(2 * 60)).await;
    store.ensure_fetched(key).await.unwrap();
    assert_eq!(api.calls(Op::Fetch), 2);
}

#[tokio::test]
async fn failed_first_fetch_leaves_the_day_unknown() {
    let (api, store) = setup();
    let key = day(2024, 5, 1);
    api.seed(draft(key, "Walk", (9, 0), (10, 0)));

    api.fail_next(Op::Fetch, ApiError::Network("unreachable".into()));
    let err = store.ensure_fetched(key).await.unwrap_err();
    assert_eq!(err, StoreError::Network("unreachable".into()));
    assert_eq!(store.read(key).status, EntryStatus::Unknown);

    // The next attempt retries instead of trusting a cached failure.
    assert_eq!(store.ensure_fetched(key).await.unwrap().len(), 1);
    assert_eq!(api.calls(Op::Fetch), 2);
}

#[tokio::test]
async fn failed_refresh_keeps_known_data() {
    let (api, store) = setup();
    let key = day(2024, 5, 1);
    api.seed(draft(key, "Walk", (9, 0), (10, 0)));
    store.ensure_fetched(key).await.unwrap();
    let before = store.read(key);

    api.seed(draft(key, "Cook", (18, 0), (19, 0)));
    api.fail_next(Op::Fetch, ApiError::NotFound);
    assert_eq!(
        store.refresh(key).await.unwrap_err(),
        StoreError::DayNotFound(key)
    );

    assert_eq!(store.read(key), before);
    assert!(store.read(key).is_known());
}

#[tokio::test]
async fn fetch_overtaken_by_a_local_change_is_discarded_and_retried() {
    let (api, store) = setup();
    let key = day(2024, 5, 1);
    api.hold_day(key);

    let fetch = {
        let store = store.clone();
        tokio::spawn(async move { store.ensure_fetched(key).await })
    };
    wait_for(|| api.calls(Op::Fetch) == 1).await;

    let created = store
        .create(key, draft(key, "Swim", (9, 0), (10, 0)))
        .await
        .unwrap();

    // The first response predates the create; it must not wipe it out.
    api.release_day(key);
    wait_for(|| api.calls(Op::Fetch) == 2).await;
    assert_eq!(store.read(key).activities, vec![created.clone()]);

    api.release_day(key);
    let fetched = fetch.await.unwrap().unwrap();
    assert_eq!(fetched, vec![created.clone()]);
    assert_eq!(store.read(key).activities, vec![created]);
}

#[tokio::test]
async fn prefetch_week_loads_all_seven_days() {
    let (api, store) = setup();
    let wednesday = day(2024, 5, 1);
    api.seed(draft(wednesday, "Team sync", (10, 0), (11, 0)));

    let results = store.prefetch_week(wednesday).await;

    assert_eq!(results.len(), 7);
    assert_eq!(results[0].0, day(2024, 4, 29));
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(api.calls(Op::Fetch), 7);
    for monday_to_sunday in wednesday.week() {
        assert!(store.read(monday_to_sunday).is_known());
    }
    assert_eq!(store.read(wednesday).activities.len(), 1);
}

/// A backend that files a second activity under the wrong day.
struct Misfiling;

impl ActivityApi for Misfiling {
    async fn fetch_activities(&self, key: DateKey) -> Result<Vec<Activity>, ApiError> {
        let mine = draft(key, "Right day", (9, 0), (10, 0));
        let other = draft(key.succ(), "Wrong day", (9, 0), (10, 0));
        Ok(vec![mine, other]
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mut a = Activity::from_draft(d);
                a.id = ActivityId::Server(i as i64 + 1);
                a
            })
            .collect())
    }

    async fn create_activity(
        &self,
        _key: DateKey,
        _draft: ActivityDraft,
    ) -> Result<Activity, ApiError> {
        Err(ApiError::Network("read only".into()))
    }

    async fn update_activity(
        &self,
        _id: ActivityId,
        _patch: ActivityPatch,
    ) -> Result<Activity, ApiError> {
        Err(ApiError::Network("read only".into()))
    }

    async fn delete_activity(&self, _id: ActivityId) -> Result<(), ApiError> {
        Err(ApiError::Network("read only".into()))
    }
}

#[tokio::test]
async fn activities_of_other_days_are_not_cached_under_this_one() {
    let store = ActivityStore::new(Misfiling);
    let key = day(2024, 5, 1);

    let fetched = store.ensure_fetched(key).await.unwrap();

    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].name, "Right day");
    assert!(store.read(key).activities.iter().all(|a| a.date_key() == key));
    assert_eq!(store.read(key.succ()).status, EntryStatus::Unknown);
}
