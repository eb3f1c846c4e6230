// File: ./src/copy.rs
//! "Copy a whole day" workflow.
//!
//! `DayCopyCoordinator` owns the source/destination selection of the copy
//! dialog and drives the copy itself as a sequence of ordinary store
//! mutations. It never talks to the network directly; every error it reports
//! comes from the store, attributed to the step that failed.
use crate::api::ActivityApi;
use crate::model::{ActivityId, DateKey};
use crate::store::{ActivityStore, StoreError};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CopyPhase {
    Idle,
    Loading,
    Ready,
    Submitting,
    Done,
}

/// Whether the selected pair of days can be copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Eligibility {
    /// The source day has nothing to copy.
    Blocked,
    /// The destination already has activities that will be replaced.
    WarnOverwrite,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStep {
    DeleteExisting(ActivityId),
    CreateCopy(ActivityId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CopyError {
    #[error("the source day has no activities to copy")]
    EmptySource,
    #[error("cannot copy while {0}")]
    NotReady(CopyPhase),
    #[error("a copy is already being submitted")]
    Busy,
    #[error("loading failed: {0}")]
    Load(StoreError),
    #[error("copy stopped at {step:?}: {source}")]
    Step { step: CopyStep, source: StoreError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStatus {
    pub phase: CopyPhase,
    pub source: DateKey,
    pub destination: DateKey,
    /// Only derived while `Ready`.
    pub eligibility: Option<Eligibility>,
    pub error: Option<CopyError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyReport {
    pub deleted: usize,
    pub created: usize,
}

#[derive(Debug)]
struct Selection {
    source: DateKey,
    destination: DateKey,
    phase: CopyPhase,
    error: Option<CopyError>,
    // Incremented on every date change; a load only lands if it still matches.
    generation: u64,
}

pub struct DayCopyCoordinator<A> {
    store: Arc<ActivityStore<A>>,
    selection: Mutex<Selection>,
}

impl<A: ActivityApi> DayCopyCoordinator<A> {
    /// Starts idle with source = `today`, destination = the day after.
    pub fn new(store: Arc<ActivityStore<A>>, today: DateKey) -> Self {
        Self {
            store,
            selection: Mutex::new(Selection {
                source: today,
                destination: today.succ(),
                phase: CopyPhase::Idle,
                error: None,
                generation: 0,
            }),
        }
    }

    pub fn for_today(store: Arc<ActivityStore<A>>) -> Self {
        Self::new(store, DateKey::today())
    }

    pub fn store(&self) -> &Arc<ActivityStore<A>> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn eligibility(&self, source: DateKey, destination: DateKey) -> Eligibility {
        if self.store.read(source).activities.is_empty() {
            Eligibility::Blocked
        } else if !self.store.read(destination).activities.is_empty() {
            Eligibility::WarnOverwrite
        } else {
            Eligibility::Clear
        }
    }

    pub fn status(&self) -> CopyStatus {
        let sel = self.lock();
        let eligibility =
            (sel.phase == CopyPhase::Ready).then(|| self.eligibility(sel.source, sel.destination));
        CopyStatus {
            phase: sel.phase,
            source: sel.source,
            destination: sel.destination,
            eligibility,
            error: sel.error.clone(),
        }
    }

    /// Loads both days for the current selection.
    pub async fn load(&self) -> Result<(), CopyError> {
        self.reselect(|_| {}).await
    }

    pub async fn set_source_date(&self, key: DateKey) -> Result<(), CopyError> {
        self.reselect(|sel| sel.source = key).await
    }

    pub async fn set_destination_date(&self, key: DateKey) -> Result<(), CopyError> {
        self.reselect(|sel| sel.destination = key).await
    }

    async fn reselect(&self, change: impl FnOnce(&mut Selection)) -> Result<(), CopyError> {
        let (generation, source, destination) = {
            let mut sel = self.lock();
            if sel.phase == CopyPhase::Submitting {
                return Err(CopyError::Busy);
            }
            change(&mut sel);
            sel.generation += 1;
            sel.phase = CopyPhase::Loading;
            sel.error = None;
            (sel.generation, sel.source, sel.destination)
        };
        debug!("Loading copy selection {} -> {}", source, destination);

        let (src, dst) = futures::join!(
            self.store.ensure_fetched(source),
            self.store.ensure_fetched(destination)
        );

        let mut sel = self.lock();
        if sel.generation != generation {
            debug!(
                "Dropping stale load for {} -> {} (selection changed)",
                source, destination
            );
            return Ok(());
        }
        match src.and(dst) {
            Ok(_) => {
                sel.phase = CopyPhase::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("Could not load {} -> {}: {}", source, destination, e);
                let err = CopyError::Load(e);
                sel.phase = CopyPhase::Idle;
                sel.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Replaces the destination's activities with copies of the source's.
    ///
    /// Deletes run first, then creates, one at a time. The first failing step
    /// stops the sequence; steps already done stay done and the coordinator
    /// returns to `Ready` with the error.
    pub async fn confirm_copy(&self) -> Result<CopyReport, CopyError> {
        let (source, destination) = {
            let mut sel = self.lock();
            if sel.phase != CopyPhase::Ready {
                return Err(CopyError::NotReady(sel.phase));
            }
            if self.eligibility(sel.source, sel.destination) == Eligibility::Blocked {
                return Err(CopyError::EmptySource);
            }
            sel.phase = CopyPhase::Submitting;
            sel.error = None;
            (sel.source, sel.destination)
        };

        // Captured up front: when source == destination the deletes below
        // would otherwise empty the list being copied.
        let originals = self.store.read(source).activities;
        let existing = self.store.read(destination).activities;
        info!(
            "Copying {} activities {} -> {} (replacing {})",
            originals.len(),
            source,
            destination,
            existing.len()
        );

        let mut report = CopyReport::default();
        let outcome = async {
            for activity in &existing {
                self.store
                    .delete(destination, activity.id)
                    .await
                    .map_err(|err| CopyError::Step {
                        step: CopyStep::DeleteExisting(activity.id),
                        source: err,
                    })?;
                report.deleted += 1;
            }
            for activity in &originals {
                self.store
                    .create(destination, activity.copy_to(destination))
                    .await
                    .map_err(|err| CopyError::Step {
                        step: CopyStep::CreateCopy(activity.id),
                        source: err,
                    })?;
                report.created += 1;
            }
            Ok::<(), CopyError>(())
        }
        .await;

        let mut sel = self.lock();
        match outcome {
            Ok(()) => {
                sel.phase = CopyPhase::Done;
                info!("Copied {} -> {}", source, destination);
                Ok(report)
            }
            Err(e) => {
                warn!(
                    "Copy {} -> {} stopped after {} deletes and {} creates: {}",
                    source, destination, report.deleted, report.created, e
                );
                sel.phase = CopyPhase::Ready;
                sel.error = Some(e.clone());
                Err(e)
            }
        }
    }
}
