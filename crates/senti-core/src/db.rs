use crate::cache::StoredEntry;
use crate::cost::BudgetState;
use crate::errors::CoreError;
use crate::key::CacheKey;
use crate::models::AnalysisResult;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

const SCHEMA_VERSION: u32 = 1;

/// Open (or create) the senti database with WAL mode enabled.
pub fn open_db(path: &Path) -> Result<Connection, CoreError> {
    let conn = Connection::open(path)?;

    // WAL lets the CLI read status while an analysis run writes.
    conn.pragma_update(None, "journal_mode", "WAL")?;

    migrate(&conn)?;
    Ok(conn)
}

/// A private in-memory database, for runs that do not persist.
pub fn open_in_memory() -> Result<Connection, CoreError> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<(), CoreError> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS budget_days (
                day TEXT PRIMARY KEY,
                daily_limit REAL NOT NULL,
                spent REAL NOT NULL,
                request_count INTEGER NOT NULL,
                cache_hit_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analysis_results (
                record_id TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                stored_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_position ON cache_entries(position);
            ",
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(())
}

pub fn verify_wal_mode(conn: &Connection) -> Result<bool, CoreError> {
    let mode: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    Ok(mode.to_lowercase() == "wal")
}

// ── Cache entries ──

/// Replace the persisted cache with `entries`, given least- to
/// most-recently used.
pub fn save_cache_entries(conn: &Connection, entries: &[StoredEntry]) -> Result<usize, CoreError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM cache_entries", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO cache_entries (key, result_json, expires_at, position)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (position, entry) in entries.iter().enumerate() {
            stmt.execute(params![
                entry.key.as_str(),
                serde_json::to_string(&entry.result)?,
                entry.expires_at.to_rfc3339(),
                position as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(entries.len())
}

/// Load persisted cache entries, least- to most-recently used. Rows that no
/// longer parse are skipped.
pub fn load_cache_entries(conn: &Connection) -> Result<Vec<StoredEntry>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT key, result_json, expires_at FROM cache_entries ORDER BY position",
    )?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let result_json: String = row.get(1)?;
        let expires_at: String = row.get(2)?;
        Ok((key, result_json, expires_at))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (key, result_json, expires_at) = row?;
        let Ok(result) = serde_json::from_str::<AnalysisResult>(&result_json) else {
            tracing::warn!(key = %key, "skipping unreadable cache row");
            continue;
        };
        let Ok(expires_at) = DateTime::parse_from_rfc3339(&expires_at) else {
            tracing::warn!(key = %key, "skipping cache row with bad expiry");
            continue;
        };
        entries.push(StoredEntry {
            key: CacheKey::from_stored(key),
            result,
            expires_at: expires_at.with_timezone(&Utc),
        });
    }
    Ok(entries)
}

pub fn cache_entry_count(conn: &Connection) -> Result<u64, CoreError> {
    let count: u64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
    Ok(count)
}

pub fn clear_cache_entries(conn: &Connection) -> Result<usize, CoreError> {
    Ok(conn.execute("DELETE FROM cache_entries", [])?)
}

// ── Budget ──

pub fn save_budget(conn: &Connection, state: &BudgetState) -> Result<(), CoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO budget_days (day, daily_limit, spent, request_count, cache_hit_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            state.day.to_string(),
            state.daily_limit,
            state.spent_today,
            state.request_count as i64,
            state.cache_hit_count as i64,
        ],
    )?;
    Ok(())
}

pub fn load_budget(conn: &Connection, day: NaiveDate) -> Result<Option<BudgetState>, CoreError> {
    let row = conn
        .query_row(
            "SELECT daily_limit, spent, request_count, cache_hit_count FROM budget_days WHERE day = ?1",
            params![day.to_string()],
            |row| {
                let request_count: i64 = row.get(2)?;
                let cache_hit_count: i64 = row.get(3)?;
                Ok(BudgetState {
                    day,
                    daily_limit: row.get(0)?,
                    spent_today: row.get(1)?,
                    request_count: request_count.max(0) as u64,
                    cache_hit_count: cache_hit_count.max(0) as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ── Results by record id ──

/// Store a result under a caller-chosen record id (a post or comment id).
pub fn store_result(
    conn: &Connection,
    record_id: &str,
    result: &AnalysisResult,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO analysis_results (record_id, result_json, stored_at)
         VALUES (?1, ?2, ?3)",
        params![
            record_id,
            serde_json::to_string(result)?,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn get_result(conn: &Connection, record_id: &str) -> Result<Option<AnalysisResult>, CoreError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT result_json FROM analysis_results WHERE record_id = ?1",
            params![record_id],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn result_count(conn: &Connection) -> Result<u64, CoreError> {
    let count: u64 =
        conn.query_row("SELECT COUNT(*) FROM analysis_results", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sentiment, SourceBackend};
    use chrono::{Duration, TimeZone};

    fn sample_result(sentiment: Sentiment) -> AnalysisResult {
        AnalysisResult {
            sentiment,
            confidence: 0.75,
            emotions: None,
            key_phrases: None,
            source_backend: SourceBackend::Primary,
            cost_estimate: 0.0625,
            processing_time_ms: 12,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_open_db_enables_wal_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("senti.db");
        let conn = open_db(&path).unwrap();
        assert!(verify_wal_mode(&conn).unwrap());
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        drop(conn);

        // Reopening an existing database is a no-op migration.
        let conn = open_db(&path).unwrap();
        assert_eq!(result_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_cache_entries_round_trip_in_order() {
        let conn = open_in_memory().unwrap();
        let expires = Utc.with_ymd_and_hms(2024, 3, 2, 9, 30, 0).unwrap();
        let entries = vec![
            StoredEntry {
                key: CacheKey::from_stored("00000000000000aa:s"),
                result: sample_result(Sentiment::Positive),
                expires_at: expires,
            },
            StoredEntry {
                key: CacheKey::from_stored("00000000000000bb:se"),
                result: sample_result(Sentiment::Negative),
                expires_at: expires + Duration::hours(1),
            },
        ];
        assert_eq!(save_cache_entries(&conn, &entries).unwrap(), 2);

        let loaded = load_cache_entries(&conn).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].key.as_str(), "00000000000000aa:s");
        assert_eq!(loaded[1].result.sentiment, Sentiment::Negative);
        assert_eq!(loaded[1].expires_at, expires + Duration::hours(1));

        // Saving again replaces rather than appends.
        save_cache_entries(&conn, &entries[..1]).unwrap();
        assert_eq!(cache_entry_count(&conn).unwrap(), 1);
        assert_eq!(clear_cache_entries(&conn).unwrap(), 1);
        assert_eq!(cache_entry_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_unreadable_cache_rows_skipped() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO cache_entries (key, result_json, expires_at, position) VALUES ('k', 'garbage', 'never', 0)",
            [],
        )
        .unwrap();
        assert!(load_cache_entries(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_budget_round_trip() {
        let conn = open_in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(load_budget(&conn, day).unwrap().is_none());

        let state = BudgetState {
            day,
            daily_limit: 5.0,
            spent_today: 1.25,
            request_count: 42,
            cache_hit_count: 7,
        };
        save_budget(&conn, &state).unwrap();
        assert_eq!(load_budget(&conn, day).unwrap(), Some(state));

        let next_day = day.succ_opt().unwrap();
        assert!(load_budget(&conn, next_day).unwrap().is_none());
    }

    #[test]
    fn test_store_and_get_result() {
        let conn = open_in_memory().unwrap();
        assert!(get_result(&conn, "t3_abc").unwrap().is_none());

        store_result(&conn, "t3_abc", &sample_result(Sentiment::Mixed)).unwrap();
        store_result(&conn, "t1_def", &sample_result(Sentiment::Neutral)).unwrap();
        store_result(&conn, "t3_abc", &sample_result(Sentiment::Negative)).unwrap();

        assert_eq!(result_count(&conn).unwrap(), 2);
        let stored = get_result(&conn, "t3_abc").unwrap().unwrap();
        assert_eq!(stored.sentiment, Sentiment::Negative);
        assert_eq!(stored, sample_result(Sentiment::Negative));
    }
}
