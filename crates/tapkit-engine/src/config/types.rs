//! Tap definition types, deserialized from YAML.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tapkit_types::catalog::{KeyOrdering, ReplicationMethod};
use tapkit_types::schema::StreamSchema;
use tapkit_types::stream::{StreamFailurePolicy, SyncLimits, UnknownPropertyPolicy};

use crate::batch::BatchConfig;
use crate::http::HttpMethod;
use crate::pagination::{PageParams, PaginationConfig};

/// Top-level tap definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    pub version: String,
    /// Tap name; keys persisted state and run history.
    pub tap: String,
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub streams: Vec<StreamConfig>,
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Remote API connection settings shared by all streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub url_base: String,
    /// Headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Credential source.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Headers {
        headers: BTreeMap<String, String>,
    },
    Bearer {
        token: String,
    },
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        value: String,
    },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Headers { headers } => f
                .debug_struct("Headers")
                .field("names", &headers.keys().collect::<Vec<_>>())
                .finish(),
            Self::Bearer { .. } => f.write_str("Bearer(***)"),
            Self::ApiKey { header, .. } => write!(f, "ApiKey({header}: ***)"),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_checkpoint_interval() -> u64 {
    SyncLimits::DEFAULT_CHECKPOINT_INTERVAL_RECORDS
}

fn default_max_pages() -> u64 {
    SyncLimits::DEFAULT_MAX_PAGES
}

fn default_true() -> bool {
    true
}

/// Run-wide sync behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_records: u64,
    #[serde(default)]
    pub unknown_properties: UnknownPropertyPolicy,
    #[serde(default)]
    pub on_stream_failure: StreamFailurePolicy,
    #[serde(default = "default_max_pages")]
    pub max_pages: u64,
    #[serde(default = "default_true")]
    pub activate_version: bool,
    #[serde(default)]
    pub batch: Option<BatchConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_records: default_checkpoint_interval(),
            unknown_properties: UnknownPropertyPolicy::default(),
            on_stream_failure: StreamFailurePolicy::default(),
            max_pages: default_max_pages(),
            activate_version: true,
            batch: None,
        }
    }
}

/// One stream and the endpoint it is read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    /// Path template relative to `api.url_base`, with `{name}` placeholders.
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub path_params: BTreeMap<String, String>,
    #[serde(default)]
    pub query: PageParams,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Dotted path of the record array inside the response body.
    #[serde(default)]
    pub records_path: Option<String>,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub replication_method: ReplicationMethod,
    #[serde(default)]
    pub replication_key: Option<String>,
    #[serde(default)]
    pub replication_key_ordering: KeyOrdering,
    #[serde(default = "default_true")]
    pub is_sorted: bool,
    /// Query parameter carrying the starting bookmark.
    #[serde(default)]
    pub bookmark_param: Option<String>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default = "default_true")]
    pub selected: bool,
    #[serde(default)]
    pub selected_properties: Option<Vec<String>>,
    /// Declared schema. Absent schemas are inferred during discovery.
    #[serde(default)]
    pub schema: Option<StreamSchema>,
}
