//! Export/import document for configuration, cache and schedules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::schedule::types::ScheduleConfig;
use crate::service::error::ConfigError;
use crate::version::cache::CacheEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedState {
    pub config: ServiceConfig,
    #[serde(default)]
    pub cache: Vec<CacheEntry>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
}

impl ExportedState {
    /// Parses and validates a document without applying any of it
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let state: Self = serde_json::from_str(json)?;
        state.config.validate().map_err(ConfigError::Invalid)?;
        for schedule in &state.schedules {
            schedule.validate()?;
        }
        Ok(state)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_minimal_document() {
        let state = ExportedState::parse(r#"{ "config": { "maxCacheSize": 5 } }"#).unwrap();

        assert_eq!(state.config.max_cache_size, 5);
        assert!(state.cache.is_empty());
        assert!(state.schedules.is_empty());
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let result = ExportedState::parse(r#"{ "config": { "maxCacheSize": "#);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn parse_rejects_wrong_types() {
        let result = ExportedState::parse(&json!({ "config": {}, "cache": "nope" }).to_string());

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn parse_rejects_invalid_config_and_schedules() {
        let zero_size = json!({ "config": { "maxCacheSize": 0 } }).to_string();
        let zero_interval = json!({
            "config": {},
            "schedules": [{ "tool": "node", "interval": 0, "enabled": true, "autoUpdate": false }]
        })
        .to_string();

        assert!(matches!(
            ExportedState::parse(&zero_size),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExportedState::parse(&zero_interval),
            Err(ConfigError::Schedule(_))
        ));
    }
}
