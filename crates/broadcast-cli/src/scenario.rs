//! Demo scenario description.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use service_broadcast::BroadcastConfig;
use std::path::Path;

/// One `<service>.<implementation>` to register in the in-memory registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub service: String,
    pub implementation: String,
}

impl Implementation {
    pub fn new(service: &str, implementation: &str) -> Self {
        Self {
            service: service.to_string(),
            implementation: implementation.to_string(),
        }
    }

    pub fn event_name(&self) -> String {
        format!("{}.{}", self.service, self.implementation)
    }
}

/// Registrations before startup, and late loads announced through the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(flatten)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub implementations: Vec<Implementation>,
    #[serde(default)]
    pub load_after_start: Vec<Implementation>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;
        scenario.broadcast.validate()?;
        Ok(scenario)
    }

    /// Built-in scenario used when no file is given.
    pub fn builtin() -> Self {
        Self {
            broadcast: BroadcastConfig::new("audit_log", "audit_filter").with_default_binding(true),
            implementations: vec![
                Implementation::new("audit_log", "audit_filter"),
                Implementation::new("audit_log", "file_sink"),
                Implementation::new("audit_log", "json_sink"),
            ],
            load_after_start: vec![Implementation::new("audit_log", "syslog_sink")],
        }
    }
}
