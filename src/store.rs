// src/store.rs

//! Durable key-value state shared by the lock, the version cache and
//! configuration
//!
//! Options are plain persistent name/value pairs. Transients are values with
//! an expiry time; an expired transient reads as absent.

use crate::error::Result;
use chrono::Utc;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

/// Name/value store backing options and expiring transients
pub trait OptionStore {
    /// Read an option
    fn get_option(&self, name: &str) -> Result<Option<String>>;

    /// Create or replace an option
    fn set_option(&self, name: &str, value: &str) -> Result<()>;

    /// Remove an option; removing a missing option is not an error
    fn delete_option(&self, name: &str) -> Result<()>;

    /// All options ordered by name
    fn list_options(&self) -> Result<Vec<(String, String)>>;

    /// Read a transient, ignoring it if it has expired
    fn get_transient(&self, name: &str) -> Result<Option<String>>;

    /// Create or replace a transient that expires after `ttl`
    fn set_transient(&self, name: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a transient
    fn delete_transient(&self, name: &str) -> Result<()>;

    /// Remove every transient whose name starts with `prefix`
    fn delete_transients_with_prefix(&self, prefix: &str) -> Result<usize>;

    /// Remove transients whose expiry time has passed
    fn purge_expired_transients(&self) -> Result<usize>;
}

/// Unix timestamp at which a transient set now with `ttl` expires
pub(crate) fn expiry_from_now(ttl: Duration) -> i64 {
    let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    Utc::now().timestamp().saturating_add(secs)
}

/// In-process store, used by tests and by embedders that keep state elsewhere
#[derive(Debug, Default)]
pub struct MemoryStore {
    options: RefCell<HashMap<String, String>>,
    transients: RefCell<HashMap<String, (String, i64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptionStore for MemoryStore {
    fn get_option(&self, name: &str) -> Result<Option<String>> {
        Ok(self.options.borrow().get(name).cloned())
    }

    fn set_option(&self, name: &str, value: &str) -> Result<()> {
        self.options
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete_option(&self, name: &str) -> Result<()> {
        self.options.borrow_mut().remove(name);
        Ok(())
    }

    fn list_options(&self) -> Result<Vec<(String, String)>> {
        let mut options: Vec<_> = self
            .options
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        options.sort();
        Ok(options)
    }

    fn get_transient(&self, name: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        Ok(self
            .transients
            .borrow()
            .get(name)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    fn set_transient(&self, name: &str, value: &str, ttl: Duration) -> Result<()> {
        self.transients
            .borrow_mut()
            .insert(name.to_string(), (value.to_string(), expiry_from_now(ttl)));
        Ok(())
    }

    fn delete_transient(&self, name: &str) -> Result<()> {
        self.transients.borrow_mut().remove(name);
        Ok(())
    }

    fn delete_transients_with_prefix(&self, prefix: &str) -> Result<usize> {
        let mut transients = self.transients.borrow_mut();
        let before = transients.len();
        transients.retain(|name, _| !name.starts_with(prefix));
        Ok(before - transients.len())
    }

    fn purge_expired_transients(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut transients = self.transients.borrow_mut();
        let before = transients.len();
        transients.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - transients.len())
    }
}
