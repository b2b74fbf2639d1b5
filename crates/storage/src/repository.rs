//! Repository Implementation

use crate::StorageError;
use obd_protocol::Reading;
use scan_session::{ScanSession, ScanStore};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Readings kept before the oldest are dropped (about 12 hours of eight
/// parameters at 1 Hz)
pub const DEFAULT_MAX_READINGS: usize = 350_000;

/// One session with its readings, as written by [`Repository::export_session`]
#[derive(Debug, Clone, Serialize)]
pub struct SessionExport {
    pub session: ScanSession,
    pub readings: Vec<Reading>,
}

/// Repository for scan data (in-memory)
pub struct Repository {
    /// Readings in arrival order
    readings: Mutex<VecDeque<Reading>>,
    /// Sessions in start order, replaced in place on update
    sessions: Mutex<Vec<ScanSession>>,
    /// Retention limit for readings
    max_readings: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::LockError(e.to_string()))
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MAX_READINGS)
    }

    /// Create a repository that keeps at most `max_readings` readings
    pub fn with_retention(max_readings: usize) -> Self {
        info!("Creating in-memory repository (retention {} readings)", max_readings);
        Self {
            readings: Mutex::new(VecDeque::with_capacity(max_readings.min(10_000))),
            sessions: Mutex::new(Vec::new()),
            max_readings: max_readings.max(1),
        }
    }

    /// Insert a reading
    pub fn insert_reading(&self, reading: Reading) -> Result<(), StorageError> {
        let mut readings = lock(&self.readings)?;

        // Enforce retention
        while readings.len() >= self.max_readings {
            readings.pop_front();
        }

        readings.push_back(reading);
        Ok(())
    }

    /// Insert a session, or replace the stored copy with the same id
    pub fn upsert_session(&self, session: ScanSession) -> Result<(), StorageError> {
        let mut sessions = lock(&self.sessions)?;

        match sessions.iter_mut().find(|stored| stored.id == session.id) {
            Some(stored) => {
                debug!("Updating session {}", session.id);
                *stored = session;
            }
            None => {
                debug!("Inserting session {}", session.id);
                sessions.push(session);
            }
        }
        Ok(())
    }

    /// Most recent readings, newest first
    pub fn recent_readings(&self, limit: usize) -> Result<Vec<Reading>, StorageError> {
        let readings = lock(&self.readings)?;
        Ok(readings.iter().rev().take(limit).cloned().collect())
    }

    /// Readings belonging to one session, oldest first
    pub fn readings_for_session(&self, session_id: Uuid) -> Result<Vec<Reading>, StorageError> {
        let readings = lock(&self.readings)?;
        Ok(readings
            .iter()
            .filter(|reading| reading.session_id == Some(session_id))
            .cloned()
            .collect())
    }

    /// Readings for one parameter code, oldest first
    pub fn readings_for_code(&self, code: &str) -> Result<Vec<Reading>, StorageError> {
        let readings = lock(&self.readings)?;
        Ok(readings
            .iter()
            .filter(|reading| reading.code.eq_ignore_ascii_case(code))
            .cloned()
            .collect())
    }

    /// All sessions, oldest first
    pub fn sessions(&self) -> Result<Vec<ScanSession>, StorageError> {
        Ok(lock(&self.sessions)?.clone())
    }

    pub fn get_session(&self, id: Uuid) -> Result<ScanSession, StorageError> {
        lock(&self.sessions)?
            .iter()
            .find(|session| session.id == id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("session {}", id)))
    }

    /// Session and its readings as pretty-printed JSON
    pub fn export_session(&self, id: Uuid) -> Result<String, StorageError> {
        let export = SessionExport {
            session: self.get_session(id)?,
            readings: self.readings_for_session(id)?,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Get total reading count
    pub fn reading_count(&self) -> usize {
        lock(&self.readings).map(|r| r.len()).unwrap_or(0)
    }

    /// Get total session count
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).map(|s| s.len()).unwrap_or(0)
    }

    /// Clear all data
    pub fn clear(&self) {
        if let Ok(mut readings) = lock(&self.readings) {
            readings.clear();
        }
        if let Ok(mut sessions) = lock(&self.sessions) {
            sessions.clear();
        }
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStore for Repository {
    fn store_reading(&self, reading: &Reading) {
        if let Err(e) = self.insert_reading(reading.clone()) {
            error!("Failed to store reading {}: {}", reading.id, e);
        }
    }

    fn store_scan_session(&self, session: &ScanSession) {
        if let Err(e) = self.upsert_session(session.clone()) {
            error!("Failed to store session {}: {}", session.id, e);
        }
    }
}
