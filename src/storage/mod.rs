use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::config::StorageOptions;
use crate::model::{Analysis, AnalysisSummary, Entry, EntryId};
use crate::repository::{clamp_limit, EntryRepository, RequestError};

mod schema;

const ENTRY_COLUMNS: &str = "id, created_at, mood, body, analysis_json";

#[derive(Debug, Clone, Copy)]
pub struct WalCheckpointStats {
    pub busy_frames: i64,
    pub wal_frames: i64,
    pub checkpointed_frames: i64,
}

/// Local entry store. Analysis is written back out of band through
/// [`SqliteEntryRepository::record_analysis`].
#[derive(Clone)]
pub struct SqliteEntryRepository {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
    offset: UtcOffset,
}

struct EntryRow {
    id: i64,
    created_at: String,
    mood: String,
    body: String,
    analysis_json: Option<String>,
}

impl SqliteEntryRepository {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn run_wal_health_check(&self) -> Result<WalCheckpointStats> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("PRAGMA wal_checkpoint(PASSIVE)")
                .context("preparing wal checkpoint pragma")?;
            let mut rows = stmt.query([]).context("executing wal checkpoint pragma")?;
            if let Some(row) = rows.next()? {
                Ok(WalCheckpointStats {
                    busy_frames: row.get(0)?,
                    wal_frames: row.get(1)?,
                    checkpointed_frames: row.get(2)?,
                })
            } else {
                bail!("wal checkpoint returned no rows");
            }
        })
    }

    pub fn insert_entry(&self, mood: &str, body: &str, at: OffsetDateTime) -> Result<Entry> {
        let mood = mood.trim();
        let body = body.trim();
        if mood.is_empty() || body.is_empty() {
            bail!("mood and body must not be empty");
        }
        let created_at = at
            .to_offset(self.offset)
            .replace_nanosecond(0)
            .context("truncating timestamp")?;
        let stamp = created_at.format(&Rfc3339).context("formatting timestamp")?;
        let id = self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO entries (created_at, mood, body) VALUES (?1, ?2, ?3)",
                params![stamp, mood, body],
            )
            .context("inserting entry")?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::info!(id, mood, "entry stored");
        Ok(Entry {
            id: EntryId(id),
            mood: mood.to_string(),
            body: body.to_string(),
            created_at,
            analysis: None,
        })
    }

    pub fn fetch_recent_entries(&self, limit: usize) -> Result<Vec<Entry>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY created_at DESC, id DESC LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([limit as i64], read_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Entry::try_from).collect()
        })
    }

    pub fn fetch_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        let row = self.with_connection(|conn| {
            let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1");
            conn.query_row(&sql, [id.0], read_row)
                .optional()
                .context("fetching entry")
        })?;
        row.map(Entry::try_from).transpose()
    }

    /// Entries created within the last `days` days of `now`, newest first.
    pub fn entries_within_range(&self, days: u32, now: OffsetDateTime) -> Result<Vec<Entry>> {
        let since = now - Duration::days(i64::from(days));
        let rows = self.with_connection(|conn| {
            let sql =
                format!("SELECT {ENTRY_COLUMNS} FROM entries ORDER BY created_at DESC, id DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], read_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let entry = Entry::try_from(row)?;
            if entry.created_at >= since {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Attach analysis to an entry that has none yet. Returns `false` when the
    /// entry was already analysed; the stored analysis is left untouched.
    pub fn record_analysis(&self, id: EntryId, analysis: &Analysis) -> Result<bool> {
        let payload = serde_json::to_string(analysis).context("serializing analysis")?;
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE entries SET analysis_json = ?1 WHERE id = ?2 AND analysis_json IS NULL",
                    params![payload, id.0],
                )
                .context("recording analysis")?;
            if updated == 1 {
                tracing::info!(%id, "analysis recorded");
                return Ok(true);
            }
            let exists: Option<i64> = conn
                .query_row("SELECT id FROM entries WHERE id = ?1", [id.0], |row| {
                    row.get(0)
                })
                .optional()
                .context("checking entry")?;
            match exists {
                Some(_) => {
                    tracing::warn!(%id, "entry already analysed, keeping stored analysis");
                    Ok(false)
                }
                None => Err(anyhow!("entry {id} not found")),
            }
        })
    }
}

impl EntryRepository for SqliteEntryRepository {
    fn create_entry(&self, mood: &str, body: &str) -> Result<Entry, RequestError> {
        self.insert_entry(mood, body, OffsetDateTime::now_utc())
            .map_err(|err| RequestError::new(format!("{err:#}")))
    }

    fn list_entries(&self, limit: Option<usize>) -> Result<Vec<Entry>, RequestError> {
        self.fetch_recent_entries(clamp_limit(limit))
            .map_err(|err| RequestError::new(format!("{err:#}")))
    }

    /// There is no local analyser; the window is still counted so the caller
    /// sees what would have been sent.
    fn analyze_range(
        &self,
        range_days: u32,
        _question: Option<&str>,
    ) -> Result<AnalysisSummary, RequestError> {
        let window = self
            .entries_within_range(range_days, OffsetDateTime::now_utc())
            .map_err(|err| RequestError::new(format!("{err:#}")))?;
        Err(RequestError::new(format!(
            "range analysis is only available with the http backend \
             ({} entries in the last {range_days} days)",
            window.len()
        )))
    }
}

impl TryFrom<EntryRow> for Entry {
    type Error = anyhow::Error;

    fn try_from(row: EntryRow) -> Result<Self> {
        let created_at = OffsetDateTime::parse(&row.created_at, &Rfc3339)
            .with_context(|| format!("parsing created_at of entry {}", row.id))?;
        let analysis = row
            .analysis_json
            .as_deref()
            .map(serde_json::from_str::<Analysis>)
            .transpose()
            .with_context(|| format!("decoding analysis of entry {}", row.id))?;
        Ok(Entry {
            id: EntryId(row.id),
            mood: row.mood,
            body: row.body,
            created_at,
            analysis,
        })
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        mood: row.get(2)?,
        body: row.get(3)?,
        analysis_json: row.get(4)?,
    })
}

pub fn init(storage: &StorageOptions, offset: UtcOffset) -> Result<SqliteEntryRepository> {
    let db_path = &storage.database_path;
    if db_path.as_os_str().is_empty() {
        bail!("database path was not resolved");
    }
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    Ok(SqliteEntryRepository {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
        offset,
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::sample_analysis;
    use tempfile::TempDir;
    use time::macros::{datetime, offset};

    fn init_storage() -> anyhow::Result<(TempDir, SqliteEntryRepository)> {
        let temp = TempDir::new()?;
        let options = StorageOptions {
            database_path: temp.path().join("data").join("entries.db"),
            ..StorageOptions::default()
        };
        let storage = init(&options, offset!(+9))?;
        Ok((temp, storage))
    }

    #[test]
    fn insert_trims_and_stamps_in_configured_offset() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let entry = storage.insert_entry(
            "  happy ",
            "\tPlayed outside\n",
            datetime!(2024-05-01 14:30:15.250 UTC),
        )?;
        assert_eq!(entry.mood, "happy");
        assert_eq!(entry.body, "Played outside");
        assert_eq!(entry.created_at, datetime!(2024-05-01 23:30:15 +9));
        assert!(entry.is_pending());

        let stored = storage.fetch_entry(entry.id)?.expect("stored entry");
        assert_eq!(stored, entry);
        Ok(())
    }

    #[test]
    fn blank_fields_are_rejected_through_the_repository() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let err = storage.create_entry("   ", "body").unwrap_err();
        assert!(err.message.contains("must not be empty"));
        assert!(storage.list_entries(None)?.is_empty());
        Ok(())
    }

    #[test]
    fn list_is_newest_first_and_limit_is_clamped() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let first = storage.insert_entry("calm", "one", datetime!(2024-05-01 01:00 UTC))?;
        let second = storage.insert_entry("calm", "two", datetime!(2024-05-02 01:00 UTC))?;

        let entries = storage.list_entries(None)?;
        assert_eq!(
            entries.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(storage.list_entries(Some(0))?.len(), 1);
        Ok(())
    }

    #[test]
    fn analysis_is_recorded_at_most_once() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let entry = storage.insert_entry("tired", "Short nap", datetime!(2024-05-01 01:00 UTC))?;

        assert!(storage.record_analysis(entry.id, &sample_analysis())?);
        assert!(!storage.record_analysis(entry.id, &Analysis::default())?);

        let stored = storage.fetch_entry(entry.id)?.expect("stored entry");
        assert_eq!(stored.analysis, Some(sample_analysis()));
        assert!(storage.record_analysis(EntryId(999), &sample_analysis()).is_err());
        Ok(())
    }

    #[test]
    fn range_filter_uses_the_supplied_clock() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert_entry("calm", "old", datetime!(2024-04-01 01:00 UTC))?;
        let recent = storage.insert_entry("calm", "recent", datetime!(2024-05-10 01:00 UTC))?;

        let window = storage.entries_within_range(14, datetime!(2024-05-15 00:00 UTC))?;
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, recent.id);
        Ok(())
    }

    #[test]
    fn range_analysis_is_unavailable_locally() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let now = OffsetDateTime::now_utc();
        storage.insert_entry("calm", "today", now)?;
        storage.insert_entry("calm", "long ago", now - Duration::days(30))?;

        let err = storage.analyze_range(14, None).unwrap_err();
        assert_eq!(
            err.message,
            "range analysis is only available with the http backend (1 entries in the last 14 days)"
        );
        Ok(())
    }

    #[test]
    fn wal_health_check_runs() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let stats = storage.run_wal_health_check()?;
        assert!(stats.wal_frames >= 0);
        Ok(())
    }
}
