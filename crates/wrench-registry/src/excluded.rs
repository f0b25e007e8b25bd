use std::fs;
use std::io;

use anyhow::{Context, Result};
use wrench_core::{WorkspaceLayout, WrenchError};

/// Apps skipped when sources are pulled, one identifier per line.
pub fn read_excluded_apps(layout: &WorkspaceLayout) -> Result<Vec<String>> {
    let path = layout.excluded_apps_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading excluded apps: {}", path.display()));
        }
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn exclude_app(layout: &WorkspaceLayout, registered: &[String], app: &str) -> Result<bool> {
    if !registered.iter().any(|name| name == app) {
        return Err(WrenchError::app_not_installed(app).into());
    }

    let mut excluded = read_excluded_apps(layout)?;
    if excluded.iter().any(|name| name == app) {
        return Ok(false);
    }

    excluded.push(app.to_string());
    write_excluded_apps(layout, &excluded)?;
    Ok(true)
}

pub fn include_app(layout: &WorkspaceLayout, app: &str) -> Result<bool> {
    let mut excluded = read_excluded_apps(layout)?;
    let before = excluded.len();
    excluded.retain(|name| name != app);
    if excluded.len() == before {
        return Ok(false);
    }

    write_excluded_apps(layout, &excluded)?;
    Ok(true)
}

fn write_excluded_apps(layout: &WorkspaceLayout, excluded: &[String]) -> Result<()> {
    let path = layout.excluded_apps_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    fs::write(&path, excluded.join("\n"))
        .with_context(|| format!("failed writing excluded apps: {}", path.display()))
}
