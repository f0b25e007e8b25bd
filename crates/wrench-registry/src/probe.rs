use std::path::Path;

use anyhow::Result;
use wrench_core::{parse_version_assignment, read_declared_version, Resolution, WorkspaceLayout};

use crate::git_ops::{commit_hash, current_branch, is_git_repo, show_remote_file};

/// Read-only questions asked about an installed application.
pub trait AppProbe {
    fn current_version(&self, app: &str) -> Result<Option<String>>;

    /// Version the tracked remote branch would bring in on the next pull.
    fn upstream_version(&self, app: &str) -> Result<Option<String>>;

    fn is_repository(&self, app_dir: &Path) -> bool;

    fn current_branch(&self, app_dir: &Path, app: &str) -> Result<String>;

    fn commit_hash(&self, app_dir: &Path, reference: &str, app: &str) -> Result<String>;

    fn resolve(&self, app_dir: &Path, app: &str, branch: Option<&str>) -> Result<Resolution> {
        if !self.is_repository(app_dir) {
            return Ok(Resolution::NotARepository);
        }

        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => self.current_branch(app_dir, app)?,
        };
        let commit_hash = self.commit_hash(app_dir, &branch, app)?;
        Ok(Resolution::TrackedAt {
            branch,
            commit_hash,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GitAppProbe {
    layout: WorkspaceLayout,
}

impl GitAppProbe {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }
}

impl AppProbe for GitAppProbe {
    fn current_version(&self, app: &str) -> Result<Option<String>> {
        read_declared_version(&self.layout, app)
    }

    fn upstream_version(&self, app: &str) -> Result<Option<String>> {
        let app_dir = self.layout.app_dir(app);
        if !is_git_repo(&app_dir) {
            return Ok(None);
        }

        match show_remote_file(&app_dir, &format!("{app}/__init__.py"), app) {
            Ok(contents) => Ok(parse_version_assignment(&contents)),
            Err(err) => {
                tracing::debug!(app, error = %err, "upstream version unavailable");
                Ok(None)
            }
        }
    }

    fn is_repository(&self, app_dir: &Path) -> bool {
        is_git_repo(app_dir)
    }

    fn current_branch(&self, app_dir: &Path, app: &str) -> Result<String> {
        current_branch(app_dir, app)
    }

    fn commit_hash(&self, app_dir: &Path, reference: &str, app: &str) -> Result<String> {
        commit_hash(app_dir, reference, app)
    }
}
