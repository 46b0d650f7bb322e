//! Tracing / logging initialisation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Reads `PNS_LOG_LEVEL`, `PNS_LOG_JSON` and `PNS_LOG_COMPONENTS`
    /// (`pnsindex-evm=debug,sqlx=warn`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("PNS_LOG_LEVEL") {
            config.level = level;
        }
        if let Ok(json) = std::env::var("PNS_LOG_JSON") {
            config.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        if let Ok(components) = std::env::var("PNS_LOG_COMPONENTS") {
            config.components = parse_components(&components);
        }
        config
    }

    /// The `EnvFilter` directive string, e.g. `"info,pnsindex_evm=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

fn parse_components(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (component, level) = pair.split_once('=')?;
            let (component, level) = (component.trim(), level.trim());
            (!component.is_empty() && !level.is_empty())
                .then(|| (component.to_string(), level.to_string()))
        })
        .collect()
}

/// Initialise tracing with the given log config.
/// Should be called once at application startup.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_components() {
        let config = LogConfig {
            level: "warn".into(),
            components: parse_components("pnsindex-evm=debug, sqlx=error,bogus"),
            json: false,
        };
        assert_eq!(config.directives(), "warn,pnsindex_evm=debug,sqlx=error");
    }

    #[test]
    fn default_is_info_text() {
        let config = LogConfig::default();
        assert_eq!(config.directives(), "info");
        assert!(!config.json);
    }
}
