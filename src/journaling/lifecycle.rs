use std::mem;

use thiserror::Error;

use crate::model::{Entry, EntryId};
use crate::repository::{EntryRepository, RequestError};

/// What the caregiver typed, trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub mood: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("pick a mood before saving")]
    EmptyMood,
    #[error("write a few words about the day before saving")]
    EmptyBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("a save is already in progress")]
    SaveInFlight,
    #[error("the save finished after the form was reset")]
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    Idle,
    Saving { draft: Draft },
    AwaitingAnalysis { entry: Entry },
    Resolved { entry: Entry },
    Failed { draft: Draft, message: String },
}

/// Owns one compose -> save -> await analysis cycle.
///
/// `resolve` is the only way analysis reaches the held entry, and only while
/// the entry is still awaiting it.
#[derive(Debug)]
pub struct EntryLifecycleController {
    state: LifecycleState,
}

impl Default for EntryLifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl Draft {
    pub fn validate(mood: &str, body: &str) -> Result<Self, ValidationError> {
        let mood = mood.trim();
        let body = body.trim();
        if mood.is_empty() {
            return Err(ValidationError::EmptyMood);
        }
        if body.is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        Ok(Self {
            mood: mood.to_string(),
            body: body.to_string(),
        })
    }
}

impl EntryLifecycleController {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn is_saving(&self) -> bool {
        matches!(self.state, LifecycleState::Saving { .. })
    }

    /// The last saved entry, whether or not its analysis has arrived.
    pub fn tracked(&self) -> Option<&Entry> {
        match &self.state {
            LifecycleState::AwaitingAnalysis { entry } | LifecycleState::Resolved { entry } => {
                Some(entry)
            }
            _ => None,
        }
    }

    pub fn awaiting(&self) -> Option<EntryId> {
        match &self.state {
            LifecycleState::AwaitingAnalysis { entry } => Some(entry.id),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            LifecycleState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Validate and enter `Saving`. Pair with [`Self::complete_submit`].
    pub fn begin_submit(&mut self, mood: &str, body: &str) -> Result<Draft, SubmitError> {
        if self.is_saving() {
            return Err(SubmitError::SaveInFlight);
        }
        let draft = match Draft::validate(mood, body) {
            Ok(draft) => draft,
            Err(err) => {
                if matches!(self.state, LifecycleState::Failed { .. }) {
                    self.state = LifecycleState::Idle;
                }
                return Err(err.into());
            }
        };
        self.state = LifecycleState::Saving {
            draft: draft.clone(),
        };
        Ok(draft)
    }

    pub fn complete_submit(
        &mut self,
        result: Result<Entry, RequestError>,
    ) -> Result<Entry, SubmitError> {
        let draft = match mem::replace(&mut self.state, LifecycleState::Idle) {
            LifecycleState::Saving { draft } => draft,
            other => {
                self.state = other;
                return Err(SubmitError::Stale);
            }
        };
        match result {
            Ok(entry) => {
                self.state = if entry.analysis.is_some() {
                    LifecycleState::Resolved {
                        entry: entry.clone(),
                    }
                } else {
                    LifecycleState::AwaitingAnalysis {
                        entry: entry.clone(),
                    }
                };
                Ok(entry)
            }
            Err(err) => {
                tracing::error!(%err, "saving entry failed");
                self.state = LifecycleState::Failed {
                    draft,
                    message: err.message.clone(),
                };
                Err(err.into())
            }
        }
    }

    pub fn submit(
        &mut self,
        repo: &dyn EntryRepository,
        mood: &str,
        body: &str,
    ) -> Result<Entry, SubmitError> {
        let draft = self.begin_submit(mood, body)?;
        let result = repo.create_entry(&draft.mood, &draft.body);
        self.complete_submit(result)
    }

    /// Accept an analysed copy of the tracked entry. Returns whether the held
    /// entry changed.
    pub fn resolve(&mut self, entry: Entry) -> bool {
        let accepted = matches!(
            &self.state,
            LifecycleState::AwaitingAnalysis { entry: held }
                if held.id == entry.id && entry.analysis.is_some()
        );
        if accepted {
            tracing::info!(id = %entry.id, "analysis resolved");
            self.state = LifecycleState::Resolved { entry };
        }
        accepted
    }

    pub fn dismiss(&mut self) {
        self.state = LifecycleState::Idle;
    }
}
