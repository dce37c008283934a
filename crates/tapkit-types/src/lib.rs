//! Shared tapkit protocol, catalog, state and error model types.
//!
//! Pure data types, safe to depend on from both the engine and the state
//! persistence crate.

pub mod bookmark;
pub mod catalog;
pub mod error;
pub mod message;
pub mod schema;
pub mod state;
pub mod stream;
