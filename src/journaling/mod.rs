//! Entry lifecycle and the background reconciliation that completes it.

pub mod lifecycle;
pub mod poller;

pub use lifecycle::{Draft, EntryLifecycleController, LifecycleState, SubmitError, ValidationError};
pub use poller::{BackgroundFetchError, Lineage, PollReport, ReconciliationPoller};
