// File: ./src/api/memory.rs
//! In-process remote.
//!
//! Behaves like the HTTP backend (server-assigned ids, not-found semantics)
//! but keeps everything in memory. Besides serving the offline mode of the
//! binary, it lets callers hold calls in flight (`hold` / `release`), inject
//! failures (`fail_next`) and count calls, which is what the store tests are
//! built on.
use crate::api::{ActivityApi, ApiError};
use crate::model::{Activity, ActivityDraft, ActivityId, ActivityPatch, DateKey};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Fetch,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct MemoryState {
    activities: BTreeMap<i64, Activity>,
    next_id: i64,
    failures: HashMap<Op, VecDeque<ApiError>>,
    calls: HashMap<Op, usize>,
    gates: HashMap<Op, Arc<Semaphore>>,
    day_gates: HashMap<DateKey, Arc<Semaphore>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryApi {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding this lock can only come from a test assertion;
        // the data is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores an activity as if it had been created earlier, returning it with
    /// its server id.
    pub fn seed(&self, draft: ActivityDraft) -> Activity {
        let mut state = self.lock();
        Self::insert(&mut state, &draft)
    }

    fn insert(state: &mut MemoryState, draft: &ActivityDraft) -> Activity {
        state.next_id += 1;
        let mut activity = Activity::from_draft(draft);
        activity.id = ActivityId::Server(state.next_id);
        state.activities.insert(state.next_id, activity.clone());
        activity
    }

    /// Server-side view of one day.
    pub fn activities_on(&self, key: DateKey) -> Vec<Activity> {
        self.lock()
            .activities
            .values()
            .filter(|a| a.date_key() == key)
            .cloned()
            .collect()
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// The next call of `op` fails with `err` (queued, one per call).
    pub fn fail_next(&self, op: Op, err: ApiError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Calls of `op` block until released.
    pub fn hold(&self, op: Op) {
        self.lock()
            .gates
            .entry(op)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Lets one held call of `op` through.
    pub fn release(&self, op: Op) {
        if let Some(gate) = self.lock().gates.get(&op) {
            gate.add_permits(1);
        }
    }

    /// Fetches for `key` block until released.
    pub fn hold_day(&self, key: DateKey) {
        self.lock()
            .day_gates
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    pub fn release_day(&self, key: DateKey) {
        if let Some(gate) = self.lock().day_gates.get(&key) {
            gate.add_permits(1);
        }
    }

    /// Counts the call, waits at its gate, then pops any injected failure.
    async fn enter(&self, op: Op, day: Option<DateKey>) -> Result<(), ApiError> {
        let (gate, day_gate) = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            let day_gate = day.and_then(|k| state.day_gates.get(&k).cloned());
            (state.gates.get(&op).cloned(), day_gate)
        };

        for gate in [gate, day_gate].into_iter().flatten() {
            gate.acquire()
                .await
                .map_err(|_| ApiError::Network("connection closed".to_string()))?
                .forget();
        }

        match self.lock().failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ActivityApi for MemoryApi {
    async fn fetch_activities(&self, key: DateKey) -> Result<Vec<Activity>, ApiError> {
        self.enter(Op::Fetch, Some(key)).await?;
        Ok(self.activities_on(key))
    }

    async fn create_activity(
        &self,
        _key: DateKey,
        draft: ActivityDraft,
    ) -> Result<Activity, ApiError> {
        self.enter(Op::Create, None).await?;
        if draft.end < draft.start {
            return Err(ApiError::Validation(
                "endTime must not precede startTime".to_string(),
            ));
        }
        let mut state = self.lock();
        Ok(Self::insert(&mut state, &draft))
    }

    async fn update_activity(
        &self,
        id: ActivityId,
        patch: ActivityPatch,
    ) -> Result<Activity, ApiError> {
        self.enter(Op::Update, None).await?;
        let server_id = id.server_id().ok_or(ApiError::NotFound)?;
        let mut state = self.lock();
        let activity = state
            .activities
            .get_mut(&server_id)
            .ok_or(ApiError::NotFound)?;
        activity.apply_patch(&patch);
        Ok(activity.clone())
    }

    async fn delete_activity(&self, id: ActivityId) -> Result<(), ApiError> {
        self.enter(Op::Delete, None).await?;
        let server_id = id.server_id().ok_or(ApiError::NotFound)?;
        self.lock()
            .activities
            .remove(&server_id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }
}
