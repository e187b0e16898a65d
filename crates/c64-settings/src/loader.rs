//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GatewaySettings;

/// Resolve the settings file path: `C64_RELAY_SETTINGS`, else
/// `~/.c64-relay/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("C64_RELAY_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".c64-relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides(settings: &mut GatewaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let port = |name: &str| {
        let val = string(name)?;
        let parsed = parse_u16_range(&val, 1, 65535);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid port env var, ignoring");
        }
        parsed
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = port("TCP_PORT") {
        settings.server.tcp_port = v;
    }
    if let Some(v) = port("API_PORT") {
        settings.server.api_port = v;
    }
    if let Some(v) = string("BIND_HOST") {
        settings.server.bind_host = v;
    }
    if let Some(v) = string("ALLOWED_IPS") {
        settings.server.allowed_ips = parse_allow_list(&v);
    }
    if let Some(v) = string("APP_VERSION") {
        settings.server.app_version = v;
    }

    // ── Feed ────────────────────────────────────────────────────────
    if let Some(v) = string("PUSHER_KEY") {
        settings.feed.pusher_key = v;
    }
    if let Some(v) = string("PUSHER_CLUSTER") {
        settings.feed.pusher_cluster = v;
    }
    if let Some(v) = string("PUSHER_CHANNEL") {
        settings.feed.pusher_channel = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("APP_ENV").or_else(|| string("NODE_ENV")) {
        settings.logging.environment = v;
    }
    if let Some(v) = string("LOKI_URL") {
        settings.logging.loki.url = Some(v);
    }
    if let Some(v) = string("LOKI_USER") {
        settings.logging.loki.user = Some(v);
    }
    if let Some(v) = string("LOKI_TOKEN") {
        settings.logging.loki.token = Some(SecretString::from(v));
    }
    if let Some(v) = string("LOKI_JOB") {
        settings.logging.loki.job = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Split a comma-separated allow-list, trimming entries and dropping blanks.
pub fn parse_allow_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
