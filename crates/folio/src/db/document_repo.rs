//! Document repository: queries and conditional status updates for the
//! `documents` table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{json_column, parse_column, Database, DatabaseError};
use crate::models::{Document, DocumentFilter, DocumentStatus, NewDocument};

const SELECT_COLUMNS: &str = "id, hash, title, filename, original_filename, mime_type, file_path,
    file_size, page_count, status, is_searchable, metadata, processing_started_at,
    processing_completed_at, processing_error, created_by, created_at, updated_at";

/// Column assignments shared by every status change. Parameters:
/// ?1 hash, ?2 from status, ?3 to status, ?4 now, ?5 error.
const TRANSITION_SET: &str = "status = ?3, updated_at = ?4, processing_error = ?5,
    is_searchable = CASE WHEN ?3 = 'completed' THEN 1 ELSE 0 END,
    processing_started_at = CASE WHEN ?3 = 'processing' THEN ?4
        ELSE processing_started_at END,
    processing_completed_at = CASE WHEN ?3 = 'processing' THEN NULL
        WHEN ?3 IN ('completed', 'failed', 'cancelled') THEN ?4
        ELSE processing_completed_at END";

fn from_row(row: &Row<'_>) -> Result<Document, rusqlite::Error> {
    let status_idx = row.as_ref().column_index("status")?;
    let metadata_idx = row.as_ref().column_index("metadata")?;
    Ok(Document {
        id: row.get("id")?,
        hash: row.get("hash")?,
        title: row.get("title")?,
        filename: row.get("filename")?,
        original_filename: row.get("original_filename")?,
        mime_type: row.get("mime_type")?,
        file_path: row.get("file_path")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        page_count: row.get::<_, Option<u32>>("page_count")?,
        status: parse_column(status_idx, row.get("status")?)?,
        is_searchable: row.get("is_searchable")?,
        metadata: json_column(metadata_idx, row.get("metadata")?)?,
        processing_started_at: row.get("processing_started_at")?,
        processing_completed_at: row.get("processing_completed_at")?,
        processing_error: row.get("processing_error")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn find_in(conn: &Connection, hash: &str) -> Result<Option<Document>, DatabaseError> {
    let sql = format!("SELECT {} FROM documents WHERE hash = ?1", SELECT_COLUMNS);
    Ok(conn.query_row(&sql, params![hash], from_row).optional()?)
}

/// Inserts a document unless one with the same hash exists.
///
/// Returns the stored row and whether this call created it.
pub fn insert(
    db: &Database,
    doc: &NewDocument,
    now: DateTime<Utc>,
) -> Result<(Document, bool), DatabaseError> {
    let metadata = serde_json::to_string(&doc.metadata).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(e))
    })?;
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents (hash, title, filename, original_filename,
             mime_type, file_path, file_size, status, metadata, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'uploaded', ?8, ?9, ?10, ?10)",
            params![
                doc.hash,
                doc.title,
                doc.filename,
                doc.original_filename,
                doc.mime_type,
                doc.file_path,
                doc.file_size as i64,
                metadata,
                doc.created_by,
                now,
            ],
        )?;
        let stored = find_in(conn, &doc.hash)?
            .ok_or(DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
        Ok((stored, inserted > 0))
    })
}

pub fn find_by_hash(db: &Database, hash: &str) -> Result<Option<Document>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, hash))
}

/// Queries documents with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &DocumentFilter,
) -> Result<(Vec<Document>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(ref created_by) = filter.created_by {
            conditions.push(format!("created_by = ?{}", param_values.len() + 1));
            param_values.push(Box::new(created_by.clone()));
        }
        if let Some(searchable) = filter.is_searchable {
            conditions.push(format!("is_searchable = ?{}", param_values.len() + 1));
            param_values.push(Box::new(searchable));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM documents {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT {} FROM documents {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            SELECT_COLUMNS,
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<Document> = stmt
            .query_map(params_ref.as_slice(), from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Every document, oldest first.
pub fn all(db: &Database) -> Result<Vec<Document>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM documents ORDER BY id", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Documents currently in the given status.
pub fn with_status(db: &Database, status: DocumentStatus) -> Result<Vec<Document>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM documents WHERE status = ?1 ORDER BY id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str()], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_status(db: &Database) -> Result<HashMap<DocumentStatus, u64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                let status: DocumentStatus = parse_column(0, row.get(0)?)?;
                Ok((status, row.get::<_, u64>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    })
}

/// Records the page count. Only the first call for a document has any
/// effect; returns whether this call set it.
pub fn set_page_count(
    db: &Database,
    hash: &str,
    page_count: u32,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE documents SET page_count = ?2, updated_at = ?3
             WHERE hash = ?1 AND page_count IS NULL",
            params![hash, page_count, now],
        )?;
        Ok(changed > 0)
    })
}

fn guarded_transition(
    conn: &Connection,
    hash: &str,
    from: DocumentStatus,
    to: DocumentStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
    guard: &str,
) -> Result<bool, DatabaseError> {
    if !from.can_transition_to(to) {
        return Err(DatabaseError::IllegalTransition { from, to });
    }
    let sql = format!(
        "UPDATE documents SET {} WHERE hash = ?1 AND status = ?2 {}",
        TRANSITION_SET, guard
    );
    let changed = conn.execute(
        &sql,
        params![hash, from.as_str(), to.as_str(), now, error],
    )?;
    Ok(changed > 0)
}

/// Compare-and-set on the document status. Returns false when the document
/// was not in `from` (another caller got there first).
pub fn transition(
    db: &Database,
    hash: &str,
    from: DocumentStatus,
    to: DocumentStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| guarded_transition(conn, hash, from, to, error, now, ""))
}

/// Moves a `processing` document to `completed` or `failed`, but only once
/// none of its pages is pending or claimed. `completed` additionally
/// requires every page to have completed.
pub fn finalize(
    db: &Database,
    hash: &str,
    to: DocumentStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let guard = match to {
        DocumentStatus::Completed => {
            "AND page_count IS NOT NULL AND NOT EXISTS (SELECT 1 FROM pages p
             WHERE p.document_id = documents.id AND p.status != 'completed')"
        }
        _ => {
            "AND NOT EXISTS (SELECT 1 FROM pages p
             WHERE p.document_id = documents.id AND p.status IN ('pending', 'processing'))"
        }
    };
    db.with_conn(|conn| {
        guarded_transition(conn, hash, DocumentStatus::Processing, to, error, now, guard)
    })
}

/// Moves a `processing` document to `cancelled` once no page is claimed.
pub fn complete_cancellation(
    db: &Database,
    hash: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        guarded_transition(
            conn,
            hash,
            DocumentStatus::Processing,
            DocumentStatus::Cancelled,
            Some("Processing cancelled"),
            now,
            "AND NOT EXISTS (SELECT 1 FROM pages p
             WHERE p.document_id = documents.id AND p.status = 'processing')",
        )
    })
}

/// Deletes a document; its pages go with it through the foreign key.
pub fn delete(db: &Database, hash: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM documents WHERE hash = ?1", params![hash])?;
        Ok(changed > 0)
    })
}
