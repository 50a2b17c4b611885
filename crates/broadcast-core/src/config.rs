//! Centralized configuration for the broadcast layer.
//!
//! Constants live on holder structs; the bootstrap parameters are a
//! serde-loadable [`BroadcastConfig`].

use crate::error::{BroadcastError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Notification event format.
pub struct NotificationConfig;

impl NotificationConfig {
    /// Separator between service and implementation in `<service>.<implementation>`.
    pub const SEPARATOR: char = '.';
}

/// Reference cache query settings.
pub struct CacheConfig;

impl CacheConfig {
    /// Flags passed to every cache query.
    pub const DEFAULT_QUERY_FLAGS: u32 = 0;
}

/// Bootstrap parameters for a [`crate::ServiceBroadcast`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastConfig {
    /// Service family to cache and watch for load events.
    pub service_name: String,
    /// Implementation name of the component doing the broadcasting.
    ///
    /// Also used as the exclusion entry, so the component never
    /// receives its own broadcasts.
    pub component_name: String,
    /// Bind `<service_name>.<component_name>` as the default implementation.
    #[serde(default)]
    pub set_default: bool,
}

impl BroadcastConfig {
    pub fn new(service_name: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            component_name: component_name.into(),
            set_default: false,
        }
    }

    pub fn with_default_binding(mut self, enable: bool) -> Self {
        self.set_default = enable;
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: BroadcastConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BroadcastError::io_with_path(e, path))?;
        Self::from_json(&content).map_err(|e| match e {
            BroadcastError::Json { message, source } => BroadcastError::Json {
                message: format!("Failed to parse {}: {}", path.display(), message),
                source,
            },
            other => other,
        })
    }

    /// Check that both names are non-empty and contain no separator.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("serviceName", &self.service_name),
            ("componentName", &self.component_name),
        ] {
            if value.is_empty() {
                return Err(BroadcastError::Config {
                    message: format!("{} must not be empty", field),
                });
            }
            if value.contains(NotificationConfig::SEPARATOR) {
                return Err(BroadcastError::Config {
                    message: format!(
                        "{} '{}' must not contain '{}'",
                        field,
                        value,
                        NotificationConfig::SEPARATOR
                    ),
                });
            }
        }
        Ok(())
    }

    /// Fully qualified `<service>.<component>` implementation name.
    pub fn implementation_name(&self) -> String {
        format!(
            "{}{}{}",
            self.service_name,
            NotificationConfig::SEPARATOR,
            self.component_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_json_defaults_binding_off() {
        let config = BroadcastConfig::from_json(
            r#"{ "serviceName": "audit_log", "componentName": "audit_filter" }"#,
        )
        .unwrap();
        assert_eq!(config, BroadcastConfig::new("audit_log", "audit_filter"));
        assert!(!config.set_default);
    }

    #[test]
    fn test_implementation_name() {
        let config = BroadcastConfig::new("audit_log", "audit_filter");
        assert_eq!(config.implementation_name(), "audit_log.audit_filter");
    }

    #[test]
    fn test_validate_rejects_empty_and_dotted_names() {
        assert!(BroadcastConfig::new("", "c").validate().is_err());
        assert!(BroadcastConfig::new("s", "").validate().is_err());
        assert!(matches!(
            BroadcastConfig::new("s.x", "c").validate(),
            Err(BroadcastError::Config { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broadcast.json");
        std::fs::write(
            &path,
            r#"{ "serviceName": "events", "componentName": "tap", "setDefault": true }"#,
        )
        .unwrap();

        let config = BroadcastConfig::from_file(&path).unwrap();
        assert!(config.set_default);
        assert_eq!(config.service_name, "events");
    }

    #[test]
    fn test_from_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let result = BroadcastConfig::from_file(temp_dir.path().join("absent.json"));
        assert!(matches!(result, Err(BroadcastError::Io { path: Some(_), .. })));
    }

    #[test]
    fn test_from_file_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{ not valid json }").unwrap();

        match BroadcastConfig::from_file(&path) {
            Err(BroadcastError::Json { message, .. }) => assert!(message.contains("bad.json")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
