//! queuectl library crate.
//!
//! A durable, single-node background job queue. Jobs are shell commands
//! persisted in SQLite; any number of workers (tasks in one process, or
//! separate processes sharing the database file) claim them atomically,
//! run them, and retry with exponential backoff until they either succeed
//! or are demoted to the dead-letter table.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod queue;

pub use error::{Error, Result};
