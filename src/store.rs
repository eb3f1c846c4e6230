// File: ./src/store.rs
//! Per-day activity cache.
//!
//! `ActivityStore` is the single source of truth for activities on the client.
//! Reads are synchronous and never touch the network. Fetches are read-through
//! and bounded by a freshness window. Every mutation follows the same
//! protocol:
//!
//! 1. apply the change locally so readers see it immediately, remembering
//!    how to undo just that change,
//! 2. issue the remote call and, once it settles, either reconcile the entry
//!    with the server's answer or undo the change.
//!
//! Undoing one mutation leaves the effects of others on the same day alone.
//! Fetch results never overwrite a day with mutations in flight; the fetch
//! waits for them to settle and tries again.
//!
//! The mutex guarding the cache is never held across an await, so each local
//! apply is atomic with respect to reads.
use crate::api::{ActivityApi, ApiError};
use crate::config::Config;
use crate::model::{Activity, ActivityDraft, ActivityId, ActivityPatch, DateKey};
use futures::future::join_all;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::Instant;

/// Maximum age of a fetched day before `ensure_fetched` goes back to the server.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(10 * 60);

// A fetch that keeps racing local mutations gives up after this many tries.
const MAX_FETCH_ATTEMPTS: usize = 3;
const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("no activities found for {0}")]
    DayNotFound(DateKey),
    #[error("activity {id} no longer exists on {key}")]
    ActivityGone { key: DateKey, id: ActivityId },
    #[error("rejected by server: {0}")]
    Validation(String),
    #[error("activity starts on {found}, not on {expected}")]
    DateMismatch { expected: DateKey, found: DateKey },
    #[error("activity {0} has not been confirmed by the server yet")]
    Unconfirmed(ActivityId),
    #[error("fetch for {0} kept being superseded by local changes")]
    FetchSuperseded(DateKey),
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::FetchSuperseded(_))
    }

    fn from_api(err: ApiError, key: DateKey, id: Option<ActivityId>) -> Self {
        match (err, id) {
            (ApiError::Network(msg), _) => Self::Network(msg),
            (ApiError::NotFound, Some(id)) => Self::ActivityGone { key, id },
            (ApiError::NotFound, None) => Self::DayNotFound(key),
            (ApiError::Validation(msg), _) => Self::Validation(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum EntryStatus {
    /// Never fetched, invalidated, or only touched by local mutations.
    Unknown,
    /// Fetched from the server (possibly empty).
    Known,
}

/// What `read` returns: the current, possibly optimistic, view of one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySnapshot {
    pub key: DateKey,
    pub status: EntryStatus,
    pub activities: Vec<Activity>,
}

impl DaySnapshot {
    pub fn is_known(&self) -> bool {
        self.status == EntryStatus::Known
    }
}

#[derive(Debug, Clone, Default)]
struct CacheEntry {
    activities: Vec<Activity>,
    fetched_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self, window: Duration) -> bool {
        self.fetched_at
            .is_some_and(|at| Instant::now().duration_since(at) < window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
enum MutationKind {
    Create,
    Update,
    Delete,
    ToggleCompleted,
}

/// How to take back one optimistic change without touching the rest of the day.
#[derive(Debug)]
enum Undo {
    /// Drop the temporary record of a create.
    Discard(ActivityId),
    /// Put back the fields an update or toggle touched.
    Revert { id: ActivityId, inverse: ActivityPatch },
    /// Re-insert a deleted record at its old position.
    Restore { index: usize, activity: Activity },
}

/// An optimistic change whose remote call has not settled yet.
struct PendingMutation {
    key: DateKey,
    kind: MutationKind,
    undo: Undo,
}

impl PendingMutation {
    /// Reverts this mutation only; changes other mutations made to the day
    /// in the meantime stay.
    fn rollback(self, state: &mut StoreState) {
        let entry = state.entries.entry(self.key).or_default();
        match self.undo {
            Undo::Discard(id) => entry.activities.retain(|a| a.id != id),
            Undo::Revert { id, inverse } => {
                if let Some(activity) = entry.activities.iter_mut().find(|a| a.id == id) {
                    activity.apply_patch(&inverse);
                }
            }
            Undo::Restore { index, activity } => {
                if !entry.activities.iter().any(|a| a.id == activity.id) {
                    let index = index.min(entry.activities.len());
                    entry.activities.insert(index, activity);
                }
            }
        }
        // A never-fetched, empty entry reads exactly like a missing one.
        if entry.fetched_at.is_none() && entry.activities.is_empty() {
            state.entries.remove(&self.key);
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<DateKey, CacheEntry>,
    // Bumped on every local apply and settle; fetches compare it to detect
    // that the day changed under them.
    revisions: HashMap<DateKey, u64>,
    pending: HashMap<DateKey, usize>,
}

impl StoreState {
    fn revision(&self, key: DateKey) -> u64 {
        self.revisions.get(&key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: DateKey) {
        *self.revisions.entry(key).or_default() += 1;
    }

    fn settle(&mut self, key: DateKey) {
        if let Some(count) = self.pending.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(&key);
            }
        }
        self.bump(key);
    }
}

/// Change notifications for a single day.
///
/// Dropping the subscription unsubscribes.
pub struct KeySubscription {
    key: DateKey,
    rx: broadcast::Receiver<DateKey>,
}

impl KeySubscription {
    pub fn key(&self) -> DateKey {
        self.key
    }

    /// Waits for the next change of this day. Returns `false` once the store
    /// is gone.
    pub async fn changed(&mut self) -> bool {
        loop {
            match self.rx.recv().await {
                Ok(key) if key == self.key => return true,
                Ok(_) => continue,
                // Missed messages may include ours.
                Err(RecvError::Lagged(_)) => return true,
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Drains pending notifications; true if any concerned this day.
    pub fn has_changed(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.rx.try_recv() {
                Ok(key) => changed |= key == self.key,
                Err(TryRecvError::Lagged(_)) => changed = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return changed,
            }
        }
    }
}

pub struct ActivityStore<A> {
    api: A,
    freshness: Duration,
    state: Mutex<StoreState>,
    changes: broadcast::Sender<DateKey>,
}

impl<A: ActivityApi> ActivityStore<A> {
    pub fn new(api: A) -> Self {
        Self::with_freshness(api, DEFAULT_FRESHNESS)
    }

    pub fn with_freshness(api: A, freshness: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            api,
            freshness,
            state: Mutex::new(StoreState::default()),
            changes,
        }
    }

    pub fn from_config(api: A, config: &Config) -> Self {
        Self::with_freshness(api, config.freshness_window())
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Nothing panics while the lock is held; recover rather than cascade.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: DateKey) {
        // No receivers is fine.
        let _ = self.changes.send(key);
    }

    pub fn subscribe(&self, key: DateKey) -> KeySubscription {
        KeySubscription {
            key,
            rx: self.changes.subscribe(),
        }
    }

    // --- Reads ---

    pub fn read(&self, key: DateKey) -> DaySnapshot {
        let state = self.lock();
        match state.entries.get(&key) {
            Some(entry) => DaySnapshot {
                key,
                status: if entry.fetched_at.is_some() {
                    EntryStatus::Known
                } else {
                    EntryStatus::Unknown
                },
                activities: entry.activities.clone(),
            },
            None => DaySnapshot {
                key,
                status: EntryStatus::Unknown,
                activities: Vec::new(),
            },
        }
    }

    /// Number of mutations on `key` whose remote call is still outstanding.
    pub fn pending_mutations(&self, key: DateKey) -> usize {
        self.lock().pending.get(&key).copied().unwrap_or(0)
    }

    /// Returns the day's activities, fetching them unless a fresh copy is cached.
    ///
    /// On failure the entry is left exactly as it was: known data stays
    /// readable and an unknown day stays unknown, so the next call retries.
    pub async fn ensure_fetched(&self, key: DateKey) -> Result<Vec<Activity>, StoreError> {
        {
            let state = self.lock();
            if let Some(entry) = state.entries.get(&key)
                && entry.is_fresh(self.freshness)
            {
                debug!("Cache hit for {}", key);
                return Ok(entry.activities.clone());
            }
        }
        self.fetch(key).await
    }

    /// Fetches the day regardless of its age.
    pub async fn refresh(&self, key: DateKey) -> Result<Vec<Activity>, StoreError> {
        self.fetch(key).await
    }

    /// Marks a day stale. Its activities stay readable until the next fetch.
    pub fn invalidate(&self, key: DateKey) {
        let touched = {
            let mut state = self.lock();
            match state.entries.get_mut(&key) {
                Some(entry) => {
                    entry.fetched_at = None;
                    true
                }
                None => false,
            }
        };
        if touched {
            self.notify(key);
        }
    }

    /// Ensures all seven days of `key`'s week, concurrently.
    pub async fn prefetch_week(
        &self,
        key: DateKey,
    ) -> Vec<(DateKey, Result<Vec<Activity>, StoreError>)> {
        let days = key.week();
        let results = join_all(days.iter().map(|day| self.ensure_fetched(*day))).await;
        days.into_iter().zip(results).collect()
    }

    async fn fetch(&self, key: DateKey) -> Result<Vec<Activity>, StoreError> {
        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            self.settled(key).await;
            let revision = self.lock().revision(key);
            debug!("Fetching activities for {} (attempt {})", key, attempt);

            let fetched = match self.api.fetch_activities(key).await {
                Ok(list) => list,
                Err(e) => {
                    warn!("Fetch for {} failed: {}", key, e);
                    return Err(StoreError::from_api(e, key, None));
                }
            };

            let (activities, foreign): (Vec<Activity>, Vec<Activity>) =
                fetched.into_iter().partition(|a| a.date_key() == key);
            if !foreign.is_empty() {
                warn!(
                    "Dropping {} activities returned for {} that belong to other days",
                    foreign.len(),
                    key
                );
            }

            {
                let mut state = self.lock();
                if state.revision(key) != revision || state.pending.contains_key(&key) {
                    debug!("Discarding fetch for {}: changed locally in flight", key);
                    continue;
                }
                state.entries.insert(
                    key,
                    CacheEntry {
                        activities: activities.clone(),
                        fetched_at: Some(Instant::now()),
                    },
                );
            }
            self.notify(key);
            return Ok(activities);
        }
        Err(StoreError::FetchSuperseded(key))
    }

    /// Waits until no mutation on `key` is outstanding.
    async fn settled(&self, key: DateKey) {
        loop {
            let mut sub = {
                let state = self.lock();
                if !state.pending.contains_key(&key) {
                    return;
                }
                self.subscribe(key)
            };
            if !sub.changed().await {
                return;
            }
        }
    }

    // --- Mutations ---

    /// Apply locally, then reconcile or undo.
    ///
    /// `apply` runs under the lock against a copy of the day's list and may
    /// refuse the change, in which case nothing is touched and no remote call
    /// is made. It returns the payload for `remote` and the `Undo` of its own
    /// change. On success `reconcile` folds the server's answer into the
    /// entry; on failure the undo is applied before the error is returned.
    async fn mutate<P, R, Fut>(
        &self,
        key: DateKey,
        kind: MutationKind,
        apply: impl FnOnce(&mut Vec<Activity>) -> Result<(P, Undo), StoreError>,
        remote: impl FnOnce(P) -> Fut,
        reconcile: impl FnOnce(&mut Vec<Activity>, &R),
    ) -> Result<R, StoreError>
    where
        Fut: Future<Output = Result<R, StoreError>>,
    {
        let (pending, payload) = {
            let mut state = self.lock();
            let mut working = state
                .entries
                .get(&key)
                .map(|entry| entry.activities.clone())
                .unwrap_or_default();
            let (payload, undo) = apply(&mut working)?;

            state.entries.entry(key).or_default().activities = working;
            *state.pending.entry(key).or_default() += 1;
            state.bump(key);
            (PendingMutation { key, kind, undo }, payload)
        };
        self.notify(key);

        let result = remote(payload).await;

        {
            let mut state = self.lock();
            match &result {
                Ok(value) => {
                    let entry = state.entries.entry(key).or_default();
                    reconcile(&mut entry.activities, value);
                    debug!("{} on {} confirmed", pending.kind, key);
                }
                Err(e) => {
                    warn!("{} on {} failed, rolling back: {}", pending.kind, key, e);
                    pending.rollback(&mut state);
                }
            }
            state.settle(key);
        }
        self.notify(key);
        result
    }

    fn require_confirmed(id: ActivityId) -> Result<(), StoreError> {
        if id.is_confirmed() {
            Ok(())
        } else {
            Err(StoreError::Unconfirmed(id))
        }
    }

    fn find_mut(
        list: &mut [Activity],
        key: DateKey,
        id: ActivityId,
    ) -> Result<&mut Activity, StoreError> {
        list.iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::ActivityGone { key, id })
    }

    /// Puts the server copy in place of the local one.
    fn replace_confirmed(
        list: &mut Vec<Activity>,
        key: DateKey,
        local_id: ActivityId,
        confirmed: &Activity,
    ) {
        list.retain(|a| a.id == local_id || a.id != confirmed.id);
        let slot = list.iter().position(|a| a.id == local_id);

        if confirmed.date_key() != key {
            warn!(
                "Server placed activity {} on {}, expected {}",
                confirmed.id,
                confirmed.date_key(),
                key
            );
            if let Some(idx) = slot {
                list.remove(idx);
            }
            return;
        }

        match slot {
            Some(idx) => list[idx] = confirmed.clone(),
            None => list.push(confirmed.clone()),
        }
    }

    /// Optimistically adds an activity, then swaps in the server's record.
    pub async fn create(&self, key: DateKey, draft: ActivityDraft) -> Result<Activity, StoreError> {
        let found = draft.date_key();
        if found != key {
            return Err(StoreError::DateMismatch {
                expected: key,
                found,
            });
        }

        let local = Activity::from_draft(&draft);
        let local_id = local.id;
        let api = &self.api;

        self.mutate(
            key,
            MutationKind::Create,
            move |list| {
                list.push(local);
                Ok((draft, Undo::Discard(local_id)))
            },
            move |draft| async move {
                api.create_activity(key, draft)
                    .await
                    .map_err(|e| StoreError::from_api(e, key, None))
            },
            move |list, confirmed: &Activity| {
                Self::replace_confirmed(list, key, local_id, confirmed)
            },
        )
        .await
    }

    /// Optimistically merges `patch` into the activity.
    pub async fn update(
        &self,
        key: DateKey,
        id: ActivityId,
        patch: ActivityPatch,
    ) -> Result<Activity, StoreError> {
        Self::require_confirmed(id)?;
        if let Some(start) = patch.start
            && DateKey::from_naive(&start) != key
        {
            return Err(StoreError::DateMismatch {
                expected: key,
                found: DateKey::from_naive(&start),
            });
        }

        let api = &self.api;
        self.mutate(
            key,
            MutationKind::Update,
            move |list| {
                let activity = Self::find_mut(list, key, id)?;
                let inverse = patch.inverse_for(activity);
                activity.apply_patch(&patch);
                Ok((patch, Undo::Revert { id, inverse }))
            },
            move |patch| async move {
                api.update_activity(id, patch)
                    .await
                    .map_err(|e| StoreError::from_api(e, key, Some(id)))
            },
            move |list, confirmed: &Activity| Self::replace_confirmed(list, key, id, confirmed),
        )
        .await
    }

    /// Optimistically removes the activity. A server that no longer knows it
    /// counts as success.
    pub async fn delete(&self, key: DateKey, id: ActivityId) -> Result<(), StoreError> {
        Self::require_confirmed(id)?;

        let api = &self.api;
        self.mutate(
            key,
            MutationKind::Delete,
            move |list| {
                let index = list
                    .iter()
                    .position(|a| a.id == id)
                    .ok_or(StoreError::ActivityGone { key, id })?;
                let activity = list.remove(index);
                Ok(((), Undo::Restore { index, activity }))
            },
            move |()| async move {
                match api.delete_activity(id).await {
                    Ok(()) => Ok(()),
                    Err(ApiError::NotFound) => {
                        debug!("Activity {} was already gone on the server", id);
                        Ok(())
                    }
                    Err(e) => Err(StoreError::from_api(e, key, Some(id))),
                }
            },
            move |list, _: &()| list.retain(|a| a.id != id),
        )
        .await
    }

    /// Optimistically flips the completion flag.
    pub async fn toggle_completed(
        &self,
        key: DateKey,
        id: ActivityId,
    ) -> Result<Activity, StoreError> {
        Self::require_confirmed(id)?;

        let api = &self.api;
        self.mutate(
            key,
            MutationKind::ToggleCompleted,
            move |list| {
                let activity = Self::find_mut(list, key, id)?;
                let was = activity.is_completed;
                activity.is_completed = !was;
                let inverse = ActivityPatch::completed(was);
                Ok((!was, Undo::Revert { id, inverse }))
            },
            move |done| async move {
                api.update_activity(id, ActivityPatch::completed(done))
                    .await
                    .map_err(|e| StoreError::from_api(e, key, Some(id)))
            },
            move |list, confirmed: &Activity| Self::replace_confirmed(list, key, id, confirmed),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryApi;
    use chrono::NaiveTime;

    fn key() -> DateKey {
        DateKey::new(2024, 5, 1).unwrap()
    }

    fn draft(key: DateKey, name: &str, from: u32, to: u32) -> ActivityDraft {
        ActivityDraft::new(
            name,
            key.at(NaiveTime::from_hms_opt(from, 0, 0).unwrap()),
            key.at(NaiveTime::from_hms_opt(to, 0, 0).unwrap()),
        )
    }

    #[tokio::test]
    async fn read_never_fetches() {
        let api = MemoryApi::new();
        let store = ActivityStore::new(api.clone());

        let snap = store.read(key());
        assert_eq!(snap.status, EntryStatus::Unknown);
        assert!(snap.activities.is_empty());
        assert_eq!(api.calls(crate::api::Op::Fetch), 0);
    }

    #[tokio::test]
    async fn empty_day_is_known_after_fetch() {
        let store = ActivityStore::new(MemoryApi::new());
        store.ensure_fetched(key()).await.unwrap();

        let snap = store.read(key());
        assert!(snap.is_known());
        assert!(snap.activities.is_empty());
    }

    #[tokio::test]
    async fn create_for_another_day_is_rejected_before_any_change() {
        let api = MemoryApi::new();
        let store = ActivityStore::new(api.clone());

        let err = store
            .create(key(), draft(key().succ(), "wrong day", 9, 10))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DateMismatch { .. }));
        assert_eq!(api.calls(crate::api::Op::Create), 0);
        assert!(store.read(key()).activities.is_empty());
        assert_eq!(store.pending_mutations(key()), 0);
    }

    #[tokio::test]
    async fn unconfirmed_ids_cannot_be_mutated() {
        let store = ActivityStore::new(MemoryApi::new());
        let id = ActivityId::temporary();
        assert_eq!(
            store.delete(key(), id).await,
            Err(StoreError::Unconfirmed(id))
        );
    }

    #[tokio::test]
    async fn invalidate_keeps_data_but_forces_refetch() {
        let api = MemoryApi::new();
        api.seed(draft(key(), "Walk", 9, 10));
        let store = ActivityStore::new(api.clone());

        store.ensure_fetched(key()).await.unwrap();
        store.invalidate(key());

        let snap = store.read(key());
        assert_eq!(snap.status, EntryStatus::Unknown);
        assert_eq!(snap.activities.len(), 1);

        store.ensure_fetched(key()).await.unwrap();
        assert_eq!(api.calls(crate::api::Op::Fetch), 2);
        assert!(store.read(key()).is_known());
    }

    #[test]
    fn retryable_errors() {
        assert!(StoreError::Network("timeout".into()).is_retryable());
        assert!(!StoreError::Validation("bad".into()).is_retryable());
        assert!(
            !StoreError::ActivityGone {
                key: key(),
                id: ActivityId::Server(1)
            }
            .is_retryable()
        );
    }
}
