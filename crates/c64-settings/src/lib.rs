//! # c64-settings
//!
//! Layered configuration for the gateway:
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `~/.c64-relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TCP_PORT`, `ALLOWED_IPS`, `PUSHER_*`, `LOKI_*`

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    parse_allow_list, settings_path,
};
pub use types::*;
