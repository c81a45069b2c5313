use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            mood TEXT NOT NULL,
            body TEXT NOT NULL,
            analysis_json TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_entries_created_at
            ON entries(created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_entries_pending
            ON entries(id) WHERE analysis_json IS NULL;
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}
