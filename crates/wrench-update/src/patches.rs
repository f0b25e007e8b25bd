use std::fs;
use std::io;

use anyhow::{Context, Result};
use wrench_core::{parse_lenient_version, read_declared_version, WorkspaceLayout, WrenchError};

/// Ordered ledger of workspace migrations shipped with the binary.
pub const DECLARED_PATCHES: &str = include_str!("patches.txt");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied,
    /// Preconditions not met yet; the entry stays pending and is retried next run.
    Skipped,
}

pub trait Migration {
    fn id(&self) -> &str;

    fn execute(&self, layout: &WorkspaceLayout) -> Result<MigrationOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

pub fn declared_patch_ids(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Identifiers already executed in this workspace.
pub fn read_patch_ledger(layout: &WorkspaceLayout) -> Result<Vec<String>> {
    let path = layout.patch_ledger_path();
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(declared_patch_ids(&raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => {
            Err(err).with_context(|| format!("failed reading patch ledger: {}", path.display()))
        }
    }
}

fn write_patch_ledger(layout: &WorkspaceLayout, executed: &[String]) -> Result<()> {
    let path = layout.patch_ledger_path();
    let mut content = String::new();
    for id in executed {
        content.push_str(id);
        content.push('\n');
    }
    fs::write(&path, content)
        .with_context(|| format!("failed writing patch ledger: {}", path.display()))
}

pub struct PatchRunner {
    declared: Vec<String>,
    migrations: Vec<Box<dyn Migration>>,
}

impl PatchRunner {
    pub fn new(declared: Vec<String>, migrations: Vec<Box<dyn Migration>>) -> Self {
        Self {
            declared,
            migrations,
        }
    }

    /// Runner over the shipped ledger and built-in migrations.
    pub fn builtin(primary_app: &str) -> Self {
        Self::new(
            declared_patch_ids(DECLARED_PATCHES),
            vec![Box::new(ArchivedSitesMigration::new(primary_app))],
        )
    }

    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    /// Mark every declared migration as done; used when a workspace is created.
    pub fn seed(&self, layout: &WorkspaceLayout) -> Result<()> {
        let mut executed = read_patch_ledger(layout)?;
        for id in &self.declared {
            if !executed.contains(id) {
                executed.push(id.clone());
            }
        }
        write_patch_ledger(layout, &executed)
    }

    /// Execute pending migrations in declared order, recording each one as it applies.
    pub fn run(&self, layout: &WorkspaceLayout) -> Result<PatchReport> {
        let mut executed = read_patch_ledger(layout)?;
        let mut report = PatchReport::default();

        for id in &self.declared {
            if executed.contains(id) {
                continue;
            }

            let migration = self
                .migrations
                .iter()
                .find(|migration| migration.id() == id)
                .ok_or_else(|| WrenchError::Patch {
                    id: id.clone(),
                    message: "no migration registered under this id".to_string(),
                })?;

            let outcome = migration
                .execute(layout)
                .map_err(|err| WrenchError::Patch {
                    id: id.clone(),
                    message: format!("{err:#}"),
                })?;

            match outcome {
                MigrationOutcome::Applied => {
                    executed.push(id.clone());
                    write_patch_ledger(layout, &executed)?;
                    tracing::info!(patch = %id, "applied workspace patch");
                    report.applied.push(id.clone());
                }
                MigrationOutcome::Skipped => {
                    tracing::debug!(patch = %id, "patch skipped, will retry");
                    report.skipped.push(id.clone());
                }
            }
        }

        Ok(report)
    }
}

/// Moves `archived_sites/` to `archived/sites/` and leaves a symlink behind.
/// Only for workspaces whose primary app is at major version 14 or later.
pub struct ArchivedSitesMigration {
    primary_app: String,
}

impl ArchivedSitesMigration {
    pub const ID: &'static str = "v5.update_archived_sites";

    pub fn new(primary_app: impl Into<String>) -> Self {
        Self {
            primary_app: primary_app.into(),
        }
    }
}

impl Migration for ArchivedSitesMigration {
    fn id(&self) -> &str {
        Self::ID
    }

    fn execute(&self, layout: &WorkspaceLayout) -> Result<MigrationOutcome> {
        let major = read_declared_version(layout, &self.primary_app)?
            .as_deref()
            .and_then(parse_lenient_version)
            .map(|version| version.major);
        if !cfg!(unix) || major.map_or(true, |major| major < 14) {
            return Ok(MigrationOutcome::Skipped);
        }

        let old_dir = layout.legacy_archived_sites_dir();
        let metadata = match fs::symlink_metadata(&old_dir) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(MigrationOutcome::Skipped);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed inspecting {}", old_dir.display()));
            }
        };
        if metadata.file_type().is_symlink() {
            return Ok(MigrationOutcome::Applied);
        }

        let new_dir = layout.archived_sites_dir();
        if let Some(parent) = new_dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        if new_dir.is_dir() {
            // An empty target left by an earlier attempt can be replaced.
            fs::remove_dir(&new_dir)
                .with_context(|| format!("{} already exists and is not empty", new_dir.display()))?;
        }
        fs::rename(&old_dir, &new_dir).with_context(|| {
            format!(
                "failed moving {} to {}",
                old_dir.display(),
                new_dir.display()
            )
        })?;
        link_dir(&new_dir, &old_dir)?;

        tracing::info!(
            from = %old_dir.display(),
            to = %new_dir.display(),
            "archived sites relocated"
        );
        Ok(MigrationOutcome::Applied)
    }
}

#[cfg(unix)]
fn link_dir(target: &std::path::Path, link: &std::path::Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed linking {} -> {}", link.display(), target.display()))
}

#[cfg(not(unix))]
fn link_dir(_target: &std::path::Path, _link: &std::path::Path) -> Result<()> {
    Ok(())
}
