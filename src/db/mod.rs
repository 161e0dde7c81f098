// src/db/mod.rs

//! Database layer for Gitpress
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema creation
//! - Connection management
//! - The SQLite-backed [`OptionStore`] used for settings, the update lock
//!   and the version cache

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use crate::store::{OptionStore, expiry_from_now};
use chrono::Utc;
use models::{OptionEntry, Transient};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Initialize a new Gitpress database at the specified path
///
/// Creates the database file and applies all schema migrations.
/// This is idempotent - calling it on an existing database is safe.
///
/// # Arguments
///
/// * `db_path` - Path where the database should be created
///
/// # Returns
///
/// * `Result<()>` - Ok if successful, Error otherwise
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing Gitpress database
///
/// # Arguments
///
/// * `db_path` - Path to the database file
///
/// # Returns
///
/// * `Result<Connection>` - Database connection if successful
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    // Older databases may predate the latest schema
    schema::migrate(&conn)?;

    Ok(conn)
}

/// [`OptionStore`] persisted in the SQLite state database
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Wrap an already-migrated connection
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Open the database at `db_path`
    pub fn open(db_path: &str) -> Result<Self> {
        Ok(Self::new(open(db_path)?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl OptionStore for SqliteStore {
    fn get_option(&self, name: &str) -> Result<Option<String>> {
        Ok(OptionEntry::find_by_name(&self.conn, name)?.map(|entry| entry.value))
    }

    fn set_option(&self, name: &str, value: &str) -> Result<()> {
        OptionEntry::new(name.to_string(), value.to_string()).upsert(&self.conn)
    }

    fn delete_option(&self, name: &str) -> Result<()> {
        OptionEntry::delete(&self.conn, name)
    }

    fn list_options(&self) -> Result<Vec<(String, String)>> {
        Ok(OptionEntry::list_all(&self.conn)?
            .into_iter()
            .map(|entry| (entry.name, entry.value))
            .collect())
    }

    fn get_transient(&self, name: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        Ok(Transient::find_live(&self.conn, name, now)?.map(|t| t.value))
    }

    fn set_transient(&self, name: &str, value: &str, ttl: Duration) -> Result<()> {
        Transient::new(name.to_string(), value.to_string(), expiry_from_now(ttl)).upsert(&self.conn)
    }

    fn delete_transient(&self, name: &str) -> Result<()> {
        Transient::delete(&self.conn, name)
    }

    fn delete_transients_with_prefix(&self, prefix: &str) -> Result<usize> {
        Transient::delete_by_prefix(&self.conn, prefix)
    }

    fn purge_expired_transients(&self) -> Result<usize> {
        Transient::delete_expired(&self.conn, Utc::now().timestamp())
    }
}
