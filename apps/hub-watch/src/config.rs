//! Watcher configuration.
//!
//! Read from the TOML file named by `HUB_WATCH_CONFIG` when set, otherwise
//! from `HASS_HOST`, `HASS_PORT` and `HASS_TOKEN`.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use hasslink_hub_connection::HassConfig;

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "HUB_WATCH_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Event type to print; all events when absent.
    #[serde(default)]
    pub event_type: Option<String>,

    #[serde(flatten)]
    pub hub: HassConfig,
}

impl WatchConfig {
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Self::from_env(|key| std::env::var(key).ok()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: WatchConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    pub fn from_env(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut hub = HassConfig::new(var("HASS_TOKEN").unwrap_or_default());
        if let Some(host) = var("HASS_HOST") {
            hub.host = host;
        }
        if let Some(port) = var("HASS_PORT") {
            hub.port = port
                .parse()
                .with_context(|| format!("invalid HASS_PORT {port:?}"))?;
        }
        Ok(Self {
            event_type: None,
            hub,
        })
    }
}
