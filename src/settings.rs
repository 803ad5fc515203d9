//! Tool settings.
//!
//! The rconf file says *what* to build. How the tool itself behaves (where the
//! dev server listens, how long to debounce file events, the default date
//! format for templates) lives in an optional `remarkc.toml` placed next to
//! the rconf file:
//!
//! ```text
//! talks/
//! ├── talks.rconf
//! ├── remarkc.toml      # optional, overrides stock settings
//! ├── base.html
//! └── slides/
//!     └── intro.md
//! ```
//!
//! ## Layering
//!
//! Settings are resolved in three layers, later layers winning:
//!
//! 1. stock defaults ([`Settings::default`])
//! 2. `remarkc.toml`, merged table-by-table so a file only needs the keys it changes
//! 3. command line flags (`--port`, `--host`), applied by the binary
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name of the settings file looked up next to the rconf file.
pub const SETTINGS_FILENAME: &str = "remarkc.toml";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Settings validation error: {0}")]
    Validation(String),
}

/// Tool settings loaded from `remarkc.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Development server settings used by `remarkc serve`.
    pub serve: ServeSettings,
    /// Template rendering settings.
    pub render: RenderSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.serve.port == 0 {
            return Err(SettingsError::Validation(
                "serve.port must be non-zero".into(),
            ));
        }
        if self.serve.host.trim().is_empty() {
            return Err(SettingsError::Validation(
                "serve.host must not be empty".into(),
            ));
        }
        if self.render.date_format.is_empty() {
            return Err(SettingsError::Validation(
                "render.date_format must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeSettings {
    /// Interface the HTTP server binds to.
    pub host: String,
    /// TCP port of the HTTP server.
    pub port: u16,
    /// Quiet period after a file event before a rebuild starts, in milliseconds.
    /// Editors often write a file in several steps; events inside the window
    /// collapse into one rebuild.
    pub debounce_ms: u64,
    /// Inject the reload script into served HTML pages.
    pub livereload: bool,
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            debounce_ms: 200,
            livereload: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSettings {
    /// Default strftime pattern of the `dtformat` template filter.
    pub date_format: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            date_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

/// Stock settings as a TOML table, the base layer for merging.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Settings::default()).expect("default settings must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// Tables merge key by key; any other overlay value replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings for the rconf file living in `dir`.
///
/// Returns stock settings when `remarkc.toml` does not exist.
pub fn load_settings(dir: &Path) -> Result<Settings, SettingsError> {
    let path = dir.join(SETTINGS_FILENAME);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(&path)?;
    let overlay: toml::Value = toml::from_str(&content)?;
    let settings: Settings = merge_toml(stock_defaults_value(), overlay).try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// A documented stock `remarkc.toml`, printed by `remarkc gen-config`.
pub fn stock_settings_toml() -> &'static str {
    r#"# remarkc settings
# Place this file next to your .rconf file. All keys are optional;
# the values below are the defaults.

[serve]
# Interface the development server binds to.
host = "127.0.0.1"
# TCP port of the development server.
port = 9090
# Quiet period after a file change before rebuilding (milliseconds).
debounce_ms = 200
# Reload open browser tabs after each rebuild.
livereload = true

[render]
# Default pattern of the `dtformat` template filter, e.g. {{ now | dtformat }}.
date_format = "%Y-%m-%d %H:%M"
"#
}
