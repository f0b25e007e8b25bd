use std::fs;
use std::io;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::layout::{WorkspaceLayout, DEFAULT_PRIMARY_APP};

/// Workspace-wide configuration stored in `sites/common_site_config.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceConfig {
    values: Map<String, Value>,
}

impl WorkspaceConfig {
    pub fn load(layout: &WorkspaceLayout) -> Result<Self> {
        let path = layout.common_site_config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read workspace config: {}", path.display())
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let values = serde_json::from_str::<Map<String, Value>>(&raw)
            .with_context(|| format!("failed parsing workspace config: {}", path.display()))?;
        Ok(Self { values })
    }

    pub fn save(&self, layout: &WorkspaceLayout) -> Result<()> {
        let path = layout.common_site_config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut content = serde_json::to_string_pretty(&self.values)
            .context("failed serializing workspace config")?;
        content.push('\n');
        fs::write(&path, content)
            .with_context(|| format!("failed writing workspace config: {}", path.display()))
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn merge(&mut self, other: Map<String, Value>) {
        self.values.extend(other);
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Truthiness as the process tooling reads it: `true` or any non-zero number.
    pub fn flag(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(value)) => *value,
            Some(Value::Number(value)) => value.as_f64().is_some_and(|number| number != 0.0),
            Some(Value::String(value)) => matches!(value.as_str(), "1" | "true" | "yes"),
            _ => false,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn primary_app(&self) -> &str {
        self.string("primary_app").unwrap_or(DEFAULT_PRIMARY_APP)
    }

    pub fn is_release_workspace(&self) -> bool {
        self.flag("release_wrench")
    }

    pub fn shallow_clone(&self) -> bool {
        self.flag("shallow_clone")
    }

    pub fn in_maintenance(&self) -> bool {
        self.flag("maintenance_mode")
    }

    pub fn set_maintenance(&mut self, enabled: bool) {
        let value = i64::from(enabled);
        self.set("maintenance_mode", value);
        self.set("pause_scheduler", value);
    }
}
