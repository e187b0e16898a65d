//! Grafana Loki shipping for `tracing` events.
//!
//! [`LokiLayer`] captures info+ events into an in-memory batch. A background
//! task pushes the batch to `{url}/loki/api/v1/push` every
//! `flush_interval`, or immediately once `batch_size` entries are pending.
//! Push failures are dropped on the floor; logging never blocks the caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Connection and batching settings for the Loki push endpoint.
#[derive(Clone, Debug)]
pub struct LokiConfig {
    pub url: String,
    pub user: String,
    pub token: SecretString,
    pub job: String,
    pub environment: String,
    pub instance_id: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl LokiConfig {
    pub fn new(url: impl Into<String>, user: impl Into<String>, token: SecretString) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            token,
            job: "c64-terminal-server".into(),
            environment: "production".into(),
            instance_id: crate::instance_id().to_string(),
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }

    fn push_url(&self) -> String {
        format!("{}/loki/api/v1/push", self.url.trim_end_matches('/'))
    }

    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.user, self.token.expose_secret());
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
    }
}

/// A log line waiting to be pushed.
#[derive(Clone, Debug, PartialEq)]
pub struct LokiEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub line: String,
}

/// State shared between the layer and the flush task.
struct Shared {
    batch: Mutex<Vec<LokiEntry>>,
    wake: Notify,
}

/// `tracing` layer that batches events for Loki.
pub struct LokiLayer {
    shared: Arc<Shared>,
    batch_size: usize,
    instance_id: String,
}

/// Handle for flushing from outside the layer.
#[derive(Clone)]
pub struct LokiHandle {
    shared: Arc<Shared>,
    client: reqwest::Client,
    config: Arc<LokiConfig>,
}

impl LokiLayer {
    /// Create the layer and spawn its flush task on the current runtime.
    pub fn spawn(config: LokiConfig) -> (Self, LokiHandle) {
        let shared = Arc::new(Shared {
            batch: Mutex::new(Vec::with_capacity(config.batch_size)),
            wake: Notify::new(),
        });
        let layer = Self {
            shared: Arc::clone(&shared),
            batch_size: config.batch_size,
            instance_id: config.instance_id.clone(),
        };
        let handle = LokiHandle {
            shared,
            client: reqwest::Client::new(),
            config: Arc::new(config),
        };

        let task = handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task.config.flush_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = task.shared.wake.notified() => {}
                }
                task.flush().await;
            }
        });

        (layer, handle)
    }

    fn push(&self, entry: LokiEntry) {
        let full = {
            let mut batch = self.shared.batch.lock();
            batch.push(entry);
            batch.len() >= self.batch_size
        };
        if full {
            self.shared.wake.notify_one();
        }
    }
}

impl LokiHandle {
    /// Push everything pending. Errors are swallowed.
    pub async fn flush(&self) {
        let entries: Vec<LokiEntry> = {
            let mut batch = self.shared.batch.lock();
            if batch.is_empty() {
                return;
            }
            batch.drain(..).collect()
        };

        let payload = build_push_payload(&entries, &self.config);
        let _ = self
            .client
            .post(self.config.push_url())
            .header(reqwest::header::AUTHORIZATION, self.config.auth_header())
            .json(&payload)
            .send()
            .await;
    }

    /// Number of entries waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.shared.batch.lock().len()
    }
}

/// Group entries into one Loki stream per level.
pub fn build_push_payload(entries: &[LokiEntry], config: &LokiConfig) -> Value {
    let mut by_level: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for entry in entries {
        let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or_default();
        by_level
            .entry(entry.level.to_lowercase())
            .or_default()
            .push(json!([nanos.to_string(), entry.line]));
    }

    let streams: Vec<Value> = by_level
        .into_iter()
        .map(|(level, values)| {
            json!({
                "stream": {
                    "job": config.job,
                    "env": config.environment,
                    "level": level,
                    "service_name": config.job,
                    "instance_id": config.instance_id,
                },
                "values": values,
            })
        })
        .collect();

    json!({ "streams": streams })
}

/// Collects the message and fields of an event into a JSON object.
struct LineVisitor {
    fields: serde_json::Map<String, Value>,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

impl<S> Layer<S> for LokiLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::INFO {
            return;
        }
        // The push client logs through tracing too.
        let target = meta.target();
        if target.starts_with("reqwest") || target.starts_with("hyper") {
            return;
        }

        let mut visitor = LineVisitor {
            fields: serde_json::Map::new(),
        };
        event.record(&mut visitor);

        let timestamp = Utc::now();
        let mut line = serde_json::Map::new();
        line.insert("timestamp".into(), Value::String(timestamp.to_rfc3339()));
        line.insert("instance".into(), Value::String(self.instance_id.clone()));
        line.insert("context".into(), Value::String(target.to_string()));
        line.extend(visitor.fields);

        self.push(LokiEntry {
            timestamp,
            level: meta.level().to_string(),
            line: Value::Object(line).to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tracing_subscriber::layer::SubscriberExt;

    fn config() -> LokiConfig {
        let mut config = LokiConfig::new("https://logs.example.com/", "1234", SecretString::from("tok"));
        config.instance_id = "host0000-abcd".into();
        config.flush_interval = Duration::from_secs(3600);
        config
    }

    #[test]
    fn push_url_trims_trailing_slash() {
        assert_eq!(config().push_url(), "https://logs.example.com/loki/api/v1/push");
    }

    #[test]
    fn basic_auth_header() {
        assert_eq!(config().auth_header(), "Basic MTIzNDp0b2s=");
    }

    #[test]
    fn payload_groups_by_level() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entries = vec![
            LokiEntry { timestamp: ts, level: "INFO".into(), line: "a".into() },
            LokiEntry { timestamp: ts, level: "WARN".into(), line: "b".into() },
            LokiEntry { timestamp: ts, level: "INFO".into(), line: "c".into() },
        ];
        let payload = build_push_payload(&entries, &config());
        let streams = payload["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 2);

        let info = &streams[0];
        assert_eq!(info["stream"]["level"], "info");
        assert_eq!(info["stream"]["job"], "c64-terminal-server");
        assert_eq!(info["stream"]["instance_id"], "host0000-abcd");
        assert_eq!(info["values"].as_array().unwrap().len(), 2);
        assert_eq!(info["values"][0][0], "1767225600000000000");
        assert_eq!(info["values"][1][1], "c");

        assert_eq!(streams[1]["stream"]["level"], "warn");
    }

    #[tokio::test]
    async fn layer_batches_info_and_above() {
        let (layer, handle) = LokiLayer::spawn(config());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("dropped");
            tracing::info!(address = "127.0.0.1:6400", "terminal connected");
            tracing::warn!("link lost");
        });

        assert_eq!(handle.pending(), 2);
        let line: Value = {
            let batch = handle.shared.batch.lock();
            serde_json::from_str(&batch[0].line).unwrap()
        };
        assert_eq!(line["message"], "terminal connected");
        assert_eq!(line["address"], "127.0.0.1:6400");
        assert_eq!(line["instance"], "host0000-abcd");
    }
}
