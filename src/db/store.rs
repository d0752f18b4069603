use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;

use super::{repository, sqlite, DatabaseError};
use crate::models::{SaleDeed, SaleDeedRecord};

/// Persistence capability used by the pipeline stages.
pub trait DeedStore: Send + Sync {
    /// Insert or overwrite the deed stored under `document_id`.
    fn upsert_deed(&self, document_id: &str, deed: &SaleDeed) -> Result<(), DatabaseError>;

    fn get_deed(&self, document_id: &str) -> Result<Option<SaleDeedRecord>, DatabaseError>;

    fn exists(&self, document_id: &str) -> Result<bool, DatabaseError>;

    /// Fails with `NotFound` when the deed was never saved.
    fn update_registration_fee(&self, document_id: &str, fee: f64) -> Result<(), DatabaseError>;

    fn list_document_ids(&self) -> Result<Vec<String>, DatabaseError>;
}

/// [`DeedStore`] over a single SQLite connection.
///
/// Writers are serialised by the mutex; each write is its own transaction.
pub struct SqliteDeedStore {
    conn: Mutex<Connection>,
}

impl SqliteDeedStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = sqlite::open_database(path)?;
        tracing::info!(path = %path.display(), "Deed database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(sqlite::open_memory_database()?),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeedStore for SqliteDeedStore {
    fn upsert_deed(&self, document_id: &str, deed: &SaleDeed) -> Result<(), DatabaseError> {
        repository::upsert_deed(&mut self.conn(), document_id, deed)
    }

    fn get_deed(&self, document_id: &str) -> Result<Option<SaleDeedRecord>, DatabaseError> {
        repository::get_deed(&self.conn(), document_id)
    }

    fn exists(&self, document_id: &str) -> Result<bool, DatabaseError> {
        repository::document_exists(&self.conn(), document_id)
    }

    fn update_registration_fee(&self, document_id: &str, fee: f64) -> Result<(), DatabaseError> {
        repository::update_registration_fee(&mut self.conn(), document_id, fee)
    }

    fn list_document_ids(&self) -> Result<Vec<String>, DatabaseError> {
        repository::list_document_ids(&self.conn())
    }
}
