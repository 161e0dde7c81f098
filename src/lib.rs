// src/lib.rs

//! GitPress Core Updater
//!
//! Keeps a WordPress installation current by pulling core releases straight
//! from the GitHub repository named in a remote release index, falling back to
//! WordPress's own updater when that path fails.
//!
//! # Architecture
//!
//! - Database-first: options, transients and the update lock live in SQLite
//! - One run at a time: a time-bounded lock guards every update
//! - Observable: progress goes to a plain log that ends in a sentinel glyph
//! - Self-cleaning: scratch archives and extraction directories never outlive a run

pub mod config;
pub mod db;
mod error;
pub mod fallback;
pub mod fetcher;
pub mod index;
pub mod installer;
pub mod lock;
pub mod log;
pub mod provider;
pub mod resolver;
pub mod store;
pub mod updater;

pub use config::Config;
pub use error::{Error, Result};
pub use store::OptionStore;
pub use updater::{Components, Fault, FailureKind, Outcome, Updater};
