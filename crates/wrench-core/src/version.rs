use std::fs;
use std::io;

use anyhow::{Context, Result};
use semver::{Prerelease, Version};

use crate::layout::WorkspaceLayout;

/// Parse versions the way apps declare them: `14`, `14.1`, `v14.1.2`, `15.0.0-dev`.
pub fn parse_lenient_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }

    let (core, pre) = match trimmed.split_once(&['-', '+'][..]) {
        Some((core, rest)) => (core, Some(rest)),
        None => (trimmed, None),
    };

    let mut numbers = [0_u64; 3];
    let parts = core.split('.').collect::<Vec<_>>();
    if parts.len() > 3 {
        return None;
    }
    for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
        *slot = part.parse().ok()?;
    }

    let mut version = Version::new(numbers[0], numbers[1], numbers[2]);
    if let Some(pre) = pre.filter(|value| !value.is_empty()) {
        if let Ok(pre) = Prerelease::new(pre) {
            version.pre = pre;
        }
    }
    Some(version)
}

/// Version string assigned to `__version__` in `apps/<app>/<app>/__init__.py`.
pub fn read_declared_version(layout: &WorkspaceLayout, app: &str) -> Result<Option<String>> {
    let path = layout.app_module_dir(app).join("__init__.py");
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read app version file: {}", path.display()));
        }
    };

    Ok(parse_version_assignment(&raw))
}

pub fn parse_version_assignment(source: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("__version__")?;
        let value = rest.trim_start().strip_prefix('=')?.trim();
        let quote = value.chars().next().filter(|ch| *ch == '"' || *ch == '\'')?;
        let inner = &value[1..];
        let end = inner.find(quote)?;
        Some(inner[..end].to_string())
    })
}

/// Result of comparing the installed primary app with what a pull would fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionUpgrade {
    pub is_major: bool,
    pub from: Option<Version>,
    pub to: Option<Version>,
}

impl VersionUpgrade {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn between(from: Option<&str>, to: Option<&str>) -> Self {
        let from = from.and_then(parse_lenient_version);
        let to = to.and_then(parse_lenient_version);
        let is_major = match (&from, &to) {
            (Some(from), Some(to)) => to.major > from.major,
            _ => false,
        };
        Self { is_major, from, to }
    }

    pub fn describe(&self) -> String {
        let render = |value: &Option<Version>| {
            value
                .as_ref()
                .map(|version| version.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        };
        format!("{} -> {}", render(&self.from), render(&self.to))
    }
}
