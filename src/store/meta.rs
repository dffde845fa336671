use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::core::error::{Result, ScoutError};
use crate::core::types::{Document, PageRecord};

/// Durable record of documents and pages, backing incremental-ingest
/// decisions and result naming.
///
/// SQLite with two tables. The connection lives behind a mutex: writes come
/// only from the (single-threaded) ingestion coordinator, reads are short
/// point lookups, so one connection is plenty.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                doc_id        TEXT PRIMARY KEY,
                path          TEXT NOT NULL,
                sha256        TEXT NOT NULL UNIQUE,
                modified_time TEXT NOT NULL,
                num_pages     INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id     TEXT NOT NULL REFERENCES documents(doc_id) ON DELETE CASCADE,
                page_num   INTEGER NOT NULL,
                width_px   INTEGER NOT NULL,
                height_px  INTEGER NOT NULL,
                text_layer TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pages_doc_id ON pages(doc_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE documents (
                doc_id        TEXT PRIMARY KEY,
                path          TEXT NOT NULL,
                sha256        TEXT NOT NULL UNIQUE,
                modified_time TEXT NOT NULL,
                num_pages     INTEGER NOT NULL
            );
            CREATE TABLE pages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id     TEXT NOT NULL REFERENCES documents(doc_id) ON DELETE CASCADE,
                page_num   INTEGER NOT NULL,
                width_px   INTEGER NOT NULL,
                height_px  INTEGER NOT NULL,
                text_layer TEXT
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("metadata connection poisoned")
    }

    pub fn add_document(&self, doc: &Document) -> Result<()> {
        self.lock().execute(
            "INSERT INTO documents (doc_id, path, sha256, modified_time, num_pages)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                doc.doc_id.to_string(),
                doc.path,
                doc.sha256,
                doc.modified_time.to_rfc3339(),
                doc.num_pages,
            ],
        )?;
        Ok(())
    }

    /// Clamp `num_pages` after render failures so the recorded count matches
    /// what was actually indexed.
    pub fn update_num_pages(&self, doc_id: Uuid, num_pages: u32) -> Result<()> {
        self.lock().execute(
            "UPDATE documents SET num_pages = ?1 WHERE doc_id = ?2",
            params![num_pages, doc_id.to_string()],
        )?;
        Ok(())
    }

    pub fn add_page(&self, page: &PageRecord) -> Result<()> {
        self.lock().execute(
            "INSERT INTO pages (doc_id, page_num, width_px, height_px, text_layer)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                page.doc_id.to_string(),
                page.page_num,
                page.width_px,
                page.height_px,
                page.text_layer,
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, doc_id: Uuid) -> Result<Option<Document>> {
        let conn = self.lock();
        let doc = conn
            .query_row(
                "SELECT doc_id, path, sha256, modified_time, num_pages
                 FROM documents WHERE doc_id = ?1",
                params![doc_id.to_string()],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn get_document_by_hash(&self, sha256: &str) -> Result<Option<Document>> {
        let conn = self.lock();
        let doc = conn
            .query_row(
                "SELECT doc_id, path, sha256, modified_time, num_pages
                 FROM documents WHERE sha256 = ?1",
                params![sha256],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc_id, path, sha256, modified_time, num_pages
             FROM documents ORDER BY path",
        )?;
        let docs = stmt
            .query_map([], row_to_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    pub fn get_pages(&self, doc_id: Uuid) -> Result<Vec<PageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc_id, page_num, width_px, height_px, text_layer
             FROM pages WHERE doc_id = ?1 ORDER BY page_num",
        )?;
        let pages = stmt
            .query_map(params![doc_id.to_string()], row_to_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    /// All `(doc_id, page_num)` pairs, for eval sampling.
    pub fn all_pages(&self) -> Result<Vec<PageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT doc_id, page_num, width_px, height_px, text_layer
             FROM pages ORDER BY doc_id, page_num",
        )?;
        let pages = stmt
            .query_map([], row_to_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    /// Authoritative indexed-page count (health reporting uses this rather
    /// than dividing vector rows by the region count).
    pub fn page_count(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn document_count(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Delete a document and, transactionally, all of its pages.
    pub fn delete_document(&self, doc_id: Uuid) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM pages WHERE doc_id = ?1",
            params![doc_id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM documents WHERE doc_id = ?1",
            params![doc_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let doc_id: String = row.get(0)?;
    let modified: String = row.get(3)?;
    Ok(Document {
        doc_id: Uuid::parse_str(&doc_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        path: row.get(1)?,
        sha256: row.get(2)?,
        modified_time: DateTime::parse_from_rfc3339(&modified)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        num_pages: row.get(4)?,
    })
}

fn row_to_page(row: &rusqlite::Row<'_>) -> rusqlite::Result<PageRecord> {
    let doc_id: String = row.get(0)?;
    Ok(PageRecord {
        doc_id: Uuid::parse_str(&doc_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        page_num: row.get(1)?,
        width_px: row.get(2)?,
        height_px: row.get(3)?,
        text_layer: row.get(4)?,
    })
}

/// Uniqueness of `sha256` is enforced by the schema; surface it as a
/// duplicate-document check.
pub fn is_unique_violation(err: &ScoutError) -> bool {
    matches!(
        err,
        ScoutError::Store(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
