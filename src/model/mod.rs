use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};

mod analysis;

pub use analysis::{
    Analysis, AnalysisItem, AnalysisSection, AnalysisSummary, Citation, WindowInfo,
    DEFAULT_DISCLAIMER,
};

/// Identifier assigned by whichever backend persisted the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One diary note. `analysis` is `None` until the backend finishes; once set
/// the entry is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub mood: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub analysis: Option<Analysis>,
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        self.analysis.is_none()
    }

    /// Calendar day of the entry as seen from `offset`.
    pub fn local_date(&self, offset: UtcOffset) -> Date {
        self.created_at.to_offset(offset).date()
    }
}

/// The client's current copy of the entry list, newest first.
#[derive(Debug, Clone, Default)]
pub struct EntrySnapshot {
    entries: Vec<Entry>,
}

impl EntrySnapshot {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.entries.iter().any(Entry::is_pending)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_pending()).count()
    }

    pub fn find(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Replace the held list with a freshly fetched one.
    ///
    /// Entries already terminal keep the analysis they were resolved with; a
    /// fetch never rewrites or clears it. Returns whether anything changed.
    pub fn replace(&mut self, fetched: Vec<Entry>) -> bool {
        let merged: Vec<Entry> = fetched
            .into_iter()
            .map(|mut entry| {
                if let Some(held) = self.find(entry.id) {
                    if held.analysis.is_some() {
                        entry.analysis = held.analysis.clone();
                    }
                }
                entry
            })
            .collect();
        if merged == self.entries {
            return false;
        }
        self.entries = merged;
        true
    }

    /// Fold a single entry (e.g. one just created) into the list without a
    /// round trip.
    pub fn upsert(&mut self, entry: Entry) {
        match self.entries.iter_mut().find(|held| held.id == entry.id) {
            Some(held) if held.analysis.is_some() => {}
            Some(held) => *held = entry,
            None => {
                let position = self
                    .entries
                    .iter()
                    .position(|held| held.created_at <= entry.created_at)
                    .unwrap_or(self.entries.len());
                self.entries.insert(position, entry);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;
    use time::macros::{date, datetime, offset};

    #[test]
    fn decodes_backend_entry_with_offset_timestamp() {
        let entry: Entry = serde_json::from_value(json!({
            "id": 7,
            "created_at": "2024-05-01T23:30:00+09:00",
            "mood": "tired",
            "body": "Short nap",
            "analysis": null
        }))
        .expect("decode entry");
        assert_eq!(entry.id, EntryId(7));
        assert!(entry.is_pending());
        assert_eq!(entry.local_date(offset!(+9)), date!(2024 - 05 - 01));
        assert_eq!(entry.local_date(offset!(UTC)), date!(2024 - 05 - 01));
        assert_eq!(entry.local_date(offset!(+1)), date!(2024 - 05 - 01));
        assert_eq!(entry.local_date(offset!(+10)), date!(2024 - 05 - 02));
    }

    #[test]
    fn replace_never_alters_a_terminal_analysis() {
        let mut snapshot = EntrySnapshot::new(vec![analysed(1, noon())]);
        let mut rewritten = entry(1, noon());
        rewritten.analysis = Some(Analysis::default());

        snapshot.replace(vec![rewritten]);
        assert_eq!(
            snapshot.find(EntryId(1)).and_then(|e| e.analysis.clone()),
            Some(sample_analysis())
        );
        assert!(!snapshot.has_pending());
    }

    #[test]
    fn replace_reports_whether_anything_changed() {
        let mut snapshot = EntrySnapshot::new(vec![entry(1, noon())]);
        assert!(!snapshot.replace(vec![entry(1, noon())]));

        assert!(snapshot.replace(vec![analysed(1, noon())]));
        assert_eq!(snapshot.pending_count(), 0);
    }

    #[test]
    fn upsert_keeps_newest_first_order() {
        let mut snapshot = EntrySnapshot::new(vec![
            entry(2, datetime!(2024-05-14 09:00 UTC)),
            entry(1, datetime!(2024-05-10 09:00 UTC)),
        ]);
        snapshot.upsert(entry(3, datetime!(2024-05-15 09:00 UTC)));
        let ids: Vec<_> = snapshot.entries().iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
