//! Tap definition: types, YAML parsing and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_catalog, parse_tap, parse_tap_str};
pub use types::{ApiConfig, AuthConfig, RetryConfig, StreamConfig, SyncConfig, TapConfig};
pub use validator::validate_tap;
