// File: ./src/model/activity.rs
use crate::model::DateKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of an activity.
///
/// `Server` ids are assigned by the remote. `Local` ids only exist between an
/// optimistic create and its confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityId {
    Server(i64),
    Local(Uuid),
}

impl ActivityId {
    pub fn temporary() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{}", id),
            Self::Local(uuid) => write!(f, "tmp-{}", uuid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub is_completed: bool,
}

impl Activity {
    /// Builds the optimistic record for a draft that has not reached the server.
    pub fn from_draft(draft: &ActivityDraft) -> Self {
        Self {
            id: ActivityId::temporary(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            start: draft.start,
            end: draft.end,
            is_completed: draft.is_completed,
        }
    }

    /// The day this activity belongs to, derived from its start.
    pub fn date_key(&self) -> DateKey {
        DateKey::from_naive(&self.start)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn apply_patch(&mut self, patch: &ActivityPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(start) = patch.start {
            self.start = start;
        }
        if let Some(end) = patch.end {
            self.end = end;
        }
        if let Some(done) = patch.is_completed {
            self.is_completed = done;
        }
    }

    /// Draft for a copy of this activity on another day.
    ///
    /// Start keeps its clock time; end keeps the original duration, so an
    /// activity that ran past midnight still does after the shift.
    pub fn copy_to(&self, target: DateKey) -> ActivityDraft {
        let start = target.at(self.start.time());
        ActivityDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            start,
            end: start + self.duration(),
            is_completed: false,
        }
    }
}

/// Fields of an activity that the caller chooses when creating one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDraft {
    pub name: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub is_completed: bool,
}

impl ActivityDraft {
    pub fn new(name: impl Into<String>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            description: None,
            start,
            end,
            is_completed: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn date_key(&self) -> DateKey {
        DateKey::from_naive(&self.start)
    }
}

/// Partial update. `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub is_completed: Option<bool>,
}

impl ActivityPatch {
    pub fn completed(done: bool) -> Self {
        Self {
            is_completed: Some(done),
            ..Self::default()
        }
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// The patch that puts back, on `before`, every field this one sets.
    pub fn inverse_for(&self, before: &Activity) -> Self {
        Self {
            name: self.name.as_ref().map(|_| before.name.clone()),
            description: self.description.as_ref().map(|_| before.description.clone()),
            start: self.start.map(|_| before.start),
            end: self.end.map(|_| before.end),
            is_completed: self.is_completed.map(|_| before.is_completed),
        }
    }
}
