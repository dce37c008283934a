//! Assembly of a runnable tap from its definition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tapkit_types::catalog::{Catalog, ReplicationMethod};
use tapkit_types::error::TapError;
use tapkit_types::schema::StreamSchema;
use tapkit_types::stream::{SyncLimits, SyncPolicies};

use crate::auth::{self, Authenticator};
use crate::config::types::{RetryConfig, StreamConfig, SyncConfig, TapConfig};
use crate::discovery::{apply_catalog_overrides, infer_schema, stream_from_config};
use crate::http::{HttpTransport, ReqwestTransport};
use crate::orchestrator::{SyncOptions, SyncOrchestrator};
use crate::retry::RetryPolicy;
use crate::source::{RecordSource, RestEndpoint, StreamEndpoint};

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            limits: SyncLimits {
                checkpoint_interval_records: config.checkpoint_interval_records,
                max_pages: config.max_pages,
            },
            policies: SyncPolicies {
                unknown_properties: config.unknown_properties,
                on_stream_failure: config.on_stream_failure,
            },
            activate_version: config.activate_version,
            batch: config.batch.clone(),
        }
    }
}

fn build_endpoint(config: &TapConfig, stream: &StreamConfig) -> RestEndpoint {
    let mut headers = config.api.headers.clone();
    headers.extend(stream.headers.clone());
    RestEndpoint::new(config.api.url_base.clone(), stream.path.clone())
        .with_method(stream.method)
        .with_path_params(stream.path_params.clone())
        .with_query(stream.query.clone())
        .with_headers(headers)
        .with_payload(stream.payload.clone())
        .with_records_path(stream.records_path.clone())
        .with_bookmark_param(stream.bookmark_param.clone())
        .with_paginator(stream.pagination.build())
}

/// A tap definition wired to its transport, credentials and endpoints.
pub struct Tap {
    config: TapConfig,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn Authenticator>,
    endpoints: HashMap<String, Arc<dyn StreamEndpoint>>,
}

impl Tap {
    /// Build a tap with a pooled `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns a config [`TapError`] if the HTTP client cannot be built.
    pub fn from_config(config: TapConfig) -> Result<Self, TapError> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.api.timeout_seconds))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a tap over a caller-supplied transport.
    #[must_use]
    pub fn with_transport(config: TapConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let endpoints = config
            .streams
            .iter()
            .map(|stream| {
                let endpoint: Arc<dyn StreamEndpoint> = Arc::new(build_endpoint(&config, stream));
                (stream.name.clone(), endpoint)
            })
            .collect();
        let auth = auth::from_config(&config.api.auth);
        Self {
            config,
            transport,
            auth,
            endpoints,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.tap
    }

    #[must_use]
    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Build the catalog: declared schemas as is, others inferred from
    /// the first page of each stream.
    ///
    /// # Errors
    ///
    /// Returns the [`TapError`] of the first stream that cannot be sampled.
    pub async fn discover(&self) -> Result<Catalog, TapError> {
        let mut streams = Vec::with_capacity(self.config.streams.len());
        for stream_config in &self.config.streams {
            let schema = match &stream_config.schema {
                Some(schema) => schema.clone(),
                None => self.sample_schema(stream_config).await?,
            };
            streams.push(stream_from_config(stream_config, schema));
        }
        let catalog = Catalog::new(streams);
        tracing::info!(tap = self.name(), streams = catalog.streams.len(), "Discovery complete");
        Ok(catalog)
    }

    /// Configured streams with their declared schemas. Nothing is sampled;
    /// streams without a declaration get an empty schema.
    #[must_use]
    pub fn configured_catalog(&self) -> Catalog {
        Catalog::new(
            self.config
                .streams
                .iter()
                .map(|stream| stream_from_config(stream, stream.schema.clone().unwrap_or_default()))
                .collect(),
        )
    }

    /// Catalog for a sync run. A supplied catalog document is overlaid on
    /// the configured streams without touching the API; discovery runs only
    /// when there is no document.
    ///
    /// # Errors
    ///
    /// Returns the discovery [`TapError`] when no document is supplied.
    pub async fn resolve_catalog(&self, supplied: Option<Catalog>) -> Result<Catalog, TapError> {
        match supplied {
            Some(document) => Ok(apply_catalog_overrides(self.configured_catalog(), document)),
            None => self.discover().await,
        }
    }

    async fn sample_schema(&self, stream_config: &StreamConfig) -> Result<StreamSchema, TapError> {
        let Some(endpoint) = self.endpoints.get(&stream_config.name).cloned() else {
            return Err(TapError::config(
                "UNKNOWN_STREAM",
                format!("no endpoint is configured for stream '{}'", stream_config.name),
            ));
        };
        let mut sampled = stream_from_config(stream_config, StreamSchema::default());
        sampled.replication_method = ReplicationMethod::FullTable;
        let mut source = RecordSource::new(
            &sampled,
            endpoint,
            self.transport.clone(),
            self.auth.clone(),
            RetryPolicy::from(&self.config.retry),
            None,
        )
        .with_max_pages(1);
        let sample = source.next_page().await?.unwrap_or_default();
        tracing::info!(
            stream = stream_config.name,
            sampled_records = sample.len(),
            "Inferred schema from first page"
        );
        Ok(infer_schema(&sample))
    }

    /// Orchestrator for `catalog` sharing this tap's transport and credentials.
    #[must_use]
    pub fn orchestrator(&self, catalog: Catalog) -> SyncOrchestrator {
        SyncOrchestrator::new(
            catalog,
            self.endpoints.clone(),
            self.transport.clone(),
            self.auth.clone(),
            RetryPolicy::from(&self.config.retry),
            SyncOptions::from(&self.config.sync),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_tap_str;

    #[test]
    fn retry_and_sync_settings_carry_over() {
        let config = parse_tap_str(
            r#"
version: "1.0"
tap: demo
api: { url_base: "https://api.example.com" }
retry: { max_attempts: 3, base_delay_ms: 250 }
sync: { checkpoint_interval_records: 50, on_stream_failure: continue }
streams:
  - { name: users, path: /users }
"#,
        )
        .unwrap();
        let policy = RetryPolicy::from(&config.retry);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(60));

        let options = SyncOptions::from(&config.sync);
        assert_eq!(options.limits.checkpoint_interval_records, 50);
        assert_eq!(
            options.policies.on_stream_failure,
            tapkit_types::stream::StreamFailurePolicy::Continue
        );
    }
}
