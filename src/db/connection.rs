// src/db/connection.rs
//! Opening SQLite with runtime parameters.

use std::{path::Path, time::Duration};
use rusqlite::Connection;
use crate::config::model::DatabaseConfig;

pub fn open_db_connection(path: &Path, cfg: &DatabaseConfig) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::trace!("journal_mode={} for {}", mode, path.display());
    conn.pragma_update(None, "synchronous", cfg.synchronous.as_str())?;
    Ok(conn)
}
