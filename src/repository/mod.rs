use anyhow::{Context, Result};
use thiserror::Error;

use crate::config::{AppConfig, BackendKind};
use crate::model::{AnalysisSummary, Entry};
use crate::storage::{self, SqliteEntryRepository};

mod http;

pub use http::{HealthStatus, HttpEntryRepository};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Foreground failure talking to the backend. `message` is shown to the user
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,
}

impl RequestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Whatever persists entries and eventually attaches their analysis.
pub trait EntryRepository {
    fn create_entry(&self, mood: &str, body: &str) -> Result<Entry, RequestError>;

    /// Newest first. `None` lets the backend pick its default page size.
    fn list_entries(&self, limit: Option<usize>) -> Result<Vec<Entry>, RequestError>;

    fn analyze_range(
        &self,
        range_days: u32,
        question: Option<&str>,
    ) -> Result<AnalysisSummary, RequestError>;
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

/// The repository selected by `backend` in the config file.
pub enum Backend {
    Http(HttpEntryRepository),
    Local(SqliteEntryRepository),
}

impl Backend {
    pub fn open(config: &AppConfig) -> Result<Self> {
        match config.backend {
            BackendKind::Http => {
                tracing::info!(base_url = %config.server.base_url, "using http backend");
                Ok(Backend::Http(HttpEntryRepository::new(&config.server)))
            }
            BackendKind::Local => {
                let repo = storage::init(&config.storage, config.calendar.offset())
                    .context("opening local entry store")?;
                tracing::info!(
                    path = %repo.database_path().display(),
                    "using local sqlite backend"
                );
                Ok(Backend::Local(repo))
            }
        }
    }

    pub fn as_repository(&self) -> &dyn EntryRepository {
        match self {
            Backend::Http(repo) => repo,
            Backend::Local(repo) => repo,
        }
    }
}

impl EntryRepository for Backend {
    fn create_entry(&self, mood: &str, body: &str) -> Result<Entry, RequestError> {
        self.as_repository().create_entry(mood, body)
    }

    fn list_entries(&self, limit: Option<usize>) -> Result<Vec<Entry>, RequestError> {
        self.as_repository().list_entries(limit)
    }

    fn analyze_range(
        &self,
        range_days: u32,
        question: Option<&str>,
    ) -> Result<AnalysisSummary, RequestError> {
        self.as_repository().analyze_range(range_days, question)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use super::{EntryRepository, RequestError};
    use crate::model::{AnalysisSummary, Entry};

    /// In-memory repository that replays queued responses. The last queued
    /// list response repeats once the queue drains.
    #[derive(Default)]
    pub struct ScriptedRepository {
        creates: RefCell<VecDeque<Result<Entry, RequestError>>>,
        lists: RefCell<VecDeque<Result<Vec<Entry>, RequestError>>>,
        pub create_calls: Cell<usize>,
        pub list_calls: Cell<usize>,
        pub analyze_calls: Cell<usize>,
    }

    impl ScriptedRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_create(&self, response: Result<Entry, RequestError>) -> &Self {
            self.creates.borrow_mut().push_back(response);
            self
        }

        pub fn push_list(&self, response: Result<Vec<Entry>, RequestError>) -> &Self {
            self.lists.borrow_mut().push_back(response);
            self
        }
    }

    impl EntryRepository for ScriptedRepository {
        fn create_entry(&self, _mood: &str, _body: &str) -> Result<Entry, RequestError> {
            self.create_calls.set(self.create_calls.get() + 1);
            self.creates
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(RequestError::new("no scripted create response")))
        }

        fn list_entries(&self, _limit: Option<usize>) -> Result<Vec<Entry>, RequestError> {
            self.list_calls.set(self.list_calls.get() + 1);
            let mut lists = self.lists.borrow_mut();
            if lists.len() > 1 {
                lists.pop_front().unwrap_or_else(|| Ok(Vec::new()))
            } else {
                lists.front().cloned().unwrap_or_else(|| Ok(Vec::new()))
            }
        }

        fn analyze_range(
            &self,
            _range_days: u32,
            _question: Option<&str>,
        ) -> Result<AnalysisSummary, RequestError> {
            self.analyze_calls.set(self.analyze_calls.get() + 1);
            Err(RequestError::new("no scripted analysis"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), MAX_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(42)), 42);
    }

    #[test]
    fn request_error_displays_message_verbatim() {
        let err = RequestError::new("Mood is required");
        assert_eq!(err.to_string(), "Mood is required");
    }
}
