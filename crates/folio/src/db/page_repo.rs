//! Page repository. Every status change is a conditional update keyed by
//! the page's current status, so a page is only ever written by the caller
//! that holds its claim.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{json_column, parse_column, Database, DatabaseError};
use crate::models::{Page, PageCompletion, PageFilter, PageStatus, PageStatusCounts};

const SELECT_PAGE: &str = "SELECT p.id, p.document_id, d.hash AS document_hash, p.page_number,
    p.content, p.page_file_path, p.thumbnail_path, p.metadata, p.status, p.processing_error,
    p.is_parsed, p.attempts, p.created_at, p.updated_at
    FROM pages p JOIN documents d ON d.id = p.document_id";

/// Subquery resolving a document hash (?1) to its row id.
const DOCUMENT_ID: &str = "(SELECT id FROM documents WHERE hash = ?1)";

fn from_row(row: &Row<'_>) -> Result<Page, rusqlite::Error> {
    let status_idx = row.as_ref().column_index("status")?;
    let metadata_idx = row.as_ref().column_index("metadata")?;
    Ok(Page {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        document_hash: row.get("document_hash")?,
        page_number: row.get("page_number")?,
        content: row.get("content")?,
        page_file_path: row.get("page_file_path")?,
        thumbnail_path: row.get("thumbnail_path")?,
        metadata: json_column(metadata_idx, row.get("metadata")?)?,
        status: parse_column(status_idx, row.get("status")?)?,
        processing_error: row.get("processing_error")?,
        is_parsed: row.get("is_parsed")?,
        attempts: row.get("attempts")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Creates `pending` rows for pages `1..=page_count`. Existing rows are
/// left alone, so repeating the call never duplicates pages.
pub fn create_pages(
    db: &Database,
    hash: &str,
    page_count: u32,
    now: DateTime<Utc>,
) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO pages (document_id, page_number, status, created_at, updated_at)
                 SELECT id, ?2, 'pending', ?3, ?3 FROM documents WHERE hash = ?1",
            )?;
            for page_number in 1..=page_count {
                inserted += stmt.execute(params![hash, page_number, now])? as u32;
            }
        }
        tx.commit()?;
        Ok(inserted)
    })
}

pub fn find(db: &Database, hash: &str, page_number: u32) -> Result<Option<Page>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("{} WHERE d.hash = ?1 AND p.page_number = ?2", SELECT_PAGE);
        Ok(conn
            .query_row(&sql, params![hash, page_number], from_row)
            .optional()?)
    })
}

/// Pages of one document in page order, returning (rows, total_count).
pub fn query(
    db: &Database,
    hash: &str,
    filter: &PageFilter,
) -> Result<(Vec<Page>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let status = filter.status.map(|s| s.as_str());
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM pages p JOIN documents d ON d.id = p.document_id
             WHERE d.hash = ?1 AND (?2 IS NULL OR p.status = ?2)",
            params![hash, status],
            |r| r.get(0),
        )?;

        let sql = format!(
            "{} WHERE d.hash = ?1 AND (?2 IS NULL OR p.status = ?2)
             ORDER BY p.page_number LIMIT ?3 OFFSET ?4",
            SELECT_PAGE
        );
        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![hash, status, limit, offset], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    })
}

pub fn status_counts(db: &Database, hash: &str) -> Result<PageStatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT status, COUNT(*) FROM pages WHERE document_id = {} GROUP BY status",
            DOCUMENT_ID
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut counts = PageStatusCounts::default();
        let rows = stmt.query_map(params![hash], |row| {
            let status: PageStatus = parse_column(0, row.get(0)?)?;
            Ok((status, row.get::<_, u32>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status {
                PageStatus::Pending => counts.pending = count,
                PageStatus::Processing => counts.processing = count,
                PageStatus::Completed => counts.completed = count,
                PageStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    })
}

/// Page numbers of one document currently in `status`, ascending.
pub fn numbers_with_status(
    db: &Database,
    hash: &str,
    status: PageStatus,
) -> Result<Vec<u32>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT page_number FROM pages WHERE document_id = {} AND status = ?2
             ORDER BY page_number",
            DOCUMENT_ID
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![hash, status.as_str()], |r| r.get(0))?
            .collect::<Result<Vec<u32>, _>>()?;
        Ok(rows)
    })
}

/// Claims a page for one worker: `pending -> processing`, and only while the
/// parent document is `processing`. Exactly one concurrent caller wins.
pub fn claim(
    db: &Database,
    hash: &str,
    page_number: u32,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE pages SET status = 'processing', processing_error = NULL,
             attempts = attempts + 1, updated_at = ?3
             WHERE page_number = ?2 AND status = 'pending'
             AND document_id = (SELECT id FROM documents WHERE hash = ?1 AND status = 'processing')",
            params![hash, page_number, now],
        )?;
        Ok(changed > 0)
    })
}

/// Records a successful extraction. Repeating it overwrites the same row.
pub fn complete(
    db: &Database,
    hash: &str,
    page_number: u32,
    completion: &PageCompletion,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let metadata = serde_json::to_string(&completion.metadata)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pages SET status = 'completed', content = ?3, page_file_path = ?4,
             thumbnail_path = ?5, metadata = ?6, is_parsed = 1, processing_error = NULL,
             updated_at = ?7
             WHERE document_id = {} AND page_number = ?2 AND status = 'processing'",
            DOCUMENT_ID
        );
        let changed = conn.execute(
            &sql,
            params![
                hash,
                page_number,
                completion.content,
                completion.page_file_path,
                completion.thumbnail_path,
                metadata,
                now,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn fail(
    db: &Database,
    hash: &str,
    page_number: u32,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pages SET status = 'failed', processing_error = ?3, updated_at = ?4
             WHERE document_id = {} AND page_number = ?2 AND status = 'processing'",
            DOCUMENT_ID
        );
        let changed = conn.execute(&sql, params![hash, page_number, error, now])?;
        Ok(changed > 0)
    })
}

/// `pending -> failed` for a page no worker managed to claim. Like `claim`,
/// it only applies while the parent document is `processing`.
pub fn fail_unclaimed(
    db: &Database,
    hash: &str,
    page_number: u32,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE pages SET status = 'failed', processing_error = ?3, updated_at = ?4
             WHERE page_number = ?2 AND status = 'pending'
             AND document_id = (SELECT id FROM documents WHERE hash = ?1 AND status = 'processing')",
            params![hash, page_number, error, now],
        )?;
        Ok(changed > 0)
    })
}

/// Gives a claimed page back: `processing -> pending`.
pub fn release(
    db: &Database,
    hash: &str,
    page_number: u32,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pages SET status = 'pending', updated_at = ?3
             WHERE document_id = {} AND page_number = ?2 AND status = 'processing'",
            DOCUMENT_ID
        );
        let changed = conn.execute(&sql, params![hash, page_number, now])?;
        Ok(changed > 0)
    })
}

/// `failed -> pending` for every failed page of a document.
pub fn reset_failed(db: &Database, hash: &str, now: DateTime<Utc>) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pages SET status = 'pending', processing_error = NULL, attempts = 0,
             updated_at = ?2
             WHERE document_id = {} AND status = 'failed'",
            DOCUMENT_ID
        );
        Ok(conn.execute(&sql, params![hash, now])? as u32)
    })
}

/// `processing -> pending` for every claimed page of a document. Used when
/// the claim holders are known to be gone (process restart).
pub fn release_claimed(db: &Database, hash: &str, now: DateTime<Utc>) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pages SET status = 'pending', updated_at = ?2
             WHERE document_id = {} AND status = 'processing'",
            DOCUMENT_ID
        );
        Ok(conn.execute(&sql, params![hash, now])? as u32)
    })
}

/// Parsed page text of every completed page, as (hash, page_number, content).
pub fn completed_content(db: &Database) -> Result<Vec<(String, u32, String)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT d.hash, p.page_number, p.content FROM pages p
             JOIN documents d ON d.id = p.document_id
             WHERE p.status = 'completed' AND p.content IS NOT NULL
             ORDER BY d.id, p.page_number",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
