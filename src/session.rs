//! Persistence of the in-progress grading session.
//!
//! The whole roster lives under one settings key in the workspace database.
//! Saving and clearing never fail from the caller's point of view; problems
//! are logged and the session simply stays as it was.

use crate::db;
use crate::roster::Roster;
use rusqlite::Connection;

pub const STORAGE_KEY: &str = "grader_data";

/// The saved roster, or None when nothing was saved or the stored value no
/// longer parses.
pub fn load(conn: &Connection) -> Option<Roster> {
    let value = match db::settings_get_json(conn, STORAGE_KEY) {
        Ok(Some(v)) => v,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read stored session");
            return None;
        }
    };
    match Roster::from_stored_value(value) {
        Ok(roster) => Some(roster),
        Err(e) => {
            tracing::warn!(error = %e, "stored session is corrupt; ignoring it");
            None
        }
    }
}

pub fn save(conn: &Connection, roster: &Roster) {
    let result = serde_json::to_value(roster)
        .map_err(anyhow::Error::from)
        .and_then(|v| db::settings_set_json(conn, STORAGE_KEY, &v));
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to save session");
    }
}

pub fn clear(conn: &Connection) {
    if let Err(e) = db::settings_delete(conn, STORAGE_KEY) {
        tracing::warn!(error = %e, "failed to clear session");
    }
}
