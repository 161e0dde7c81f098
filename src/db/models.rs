// src/db/models.rs

//! Data models for Gitpress database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// A persistent named setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionEntry {
    pub name: String,
    pub value: String,
    pub updated_at: Option<String>,
}

impl OptionEntry {
    /// Create a new option entry
    pub fn new(name: String, value: String) -> Self {
        Self {
            name,
            value,
            updated_at: None,
        }
    }

    /// Insert or replace this option
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO options (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![&self.name, &self.value],
        )?;
        Ok(())
    }

    /// Find an option by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt =
            conn.prepare("SELECT name, value, updated_at FROM options WHERE name = ?1")?;

        let entry = stmt.query_row([name], Self::from_row).optional()?;

        Ok(entry)
    }

    /// List all options
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT name, value, updated_at FROM options ORDER BY name")?;

        let entries = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Delete an option by name
    pub fn delete(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM options WHERE name = ?1", [name])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            value: row.get(1)?,
            updated_at: row.get(2)?,
        })
    }
}

/// An expiring cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transient {
    pub name: String,
    pub value: String,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
}

impl Transient {
    /// Create a new transient
    pub fn new(name: String, value: String, expires_at: i64) -> Self {
        Self {
            name,
            value,
            expires_at,
        }
    }

    /// Insert or replace this transient
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO transients (name, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![&self.name, &self.value, self.expires_at],
        )?;
        Ok(())
    }

    /// Find a transient that has not yet expired at `now`
    pub fn find_live(conn: &Connection, name: &str, now: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, value, expires_at FROM transients WHERE name = ?1 AND expires_at > ?2",
        )?;

        let transient = stmt.query_row(params![name, now], Self::from_row).optional()?;

        Ok(transient)
    }

    /// Delete a transient by name
    pub fn delete(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM transients WHERE name = ?1", [name])?;
        Ok(())
    }

    /// Delete all transients whose name starts with `prefix`
    pub fn delete_by_prefix(conn: &Connection, prefix: &str) -> Result<usize> {
        // Escape LIKE wildcards so slugs with '_' only match literally
        let pattern = format!(
            "{}%",
            prefix
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let count = conn.execute(
            "DELETE FROM transients WHERE name LIKE ?1 ESCAPE '\\'",
            [pattern],
        )?;
        Ok(count)
    }

    /// Delete all transients that expired at or before `now`
    pub fn delete_expired(conn: &Connection, now: i64) -> Result<usize> {
        let count = conn.execute("DELETE FROM transients WHERE expires_at <= ?1", [now])?;
        Ok(count)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            value: row.get(1)?,
            expires_at: row.get(2)?,
        })
    }
}
