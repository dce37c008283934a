//! Sync state persistence for the tapkit engine.
//!
//! Provides the [`StateBackend`] trait with a [`SqliteStateBackend`] for
//! state, run history, and rejected records, and a [`JsonFileStateBackend`]
//! for plain state files.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod json_file;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use json_file::JsonFileStateBackend;
pub use sqlite::SqliteStateBackend;
