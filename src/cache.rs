use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::model::WeightedGradePrediction;

/// Cached prediction plus the fingerprint of the inputs it was computed
/// from. Invalidation is fingerprint-only; `updated_at` is forensics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub prediction: WeightedGradePrediction,
    pub updated_at: String,
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradesd.sqlite3");
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prediction_cache(
            subject_code TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

/// Missing key is an explicit `None`, never an error. A row whose payload
/// no longer deserializes (schema drift) also reads as absent.
pub fn load(conn: &Connection, subject_code: &str) -> anyhow::Result<Option<CacheEntry>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT fingerprint, payload, updated_at
             FROM prediction_cache
             WHERE subject_code = ?",
            [subject_code],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    let Some((fingerprint, payload, updated_at)) = row else {
        return Ok(None);
    };
    let Ok(prediction) = serde_json::from_str::<WeightedGradePrediction>(&payload) else {
        tracing::warn!(subject_code = %subject_code, "discarding unreadable cached prediction payload");
        return Ok(None);
    };

    Ok(Some(CacheEntry {
        fingerprint,
        prediction,
        updated_at,
    }))
}

/// Cached prediction only if its inputs fingerprint still matches;
/// anything else is a miss.
pub fn load_if_current(
    conn: &Connection,
    subject_code: &str,
    fingerprint: &str,
) -> anyhow::Result<Option<CacheEntry>> {
    let Some(entry) = load(conn, subject_code)? else {
        return Ok(None);
    };
    if entry.fingerprint != fingerprint {
        tracing::debug!(subject_code = %subject_code, "cached prediction is stale, treating as miss");
        return Ok(None);
    }
    Ok(Some(entry))
}

/// Always overwrites. Last write wins per subject code.
pub fn save(
    conn: &Connection,
    subject_code: &str,
    fingerprint: &str,
    prediction: &WeightedGradePrediction,
) -> anyhow::Result<()> {
    let payload = serde_json::to_string(prediction)?;
    let updated_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO prediction_cache(subject_code, fingerprint, payload, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(subject_code) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            payload = excluded.payload,
            updated_at = excluded.updated_at",
        (subject_code, fingerprint, payload, updated_at),
    )?;
    Ok(())
}
