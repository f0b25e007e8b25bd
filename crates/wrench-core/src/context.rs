use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::layout::{is_workspace_dir, WorkspaceLayout};

/// Caller-owned lookups that are memoized for the lifetime of one working directory.
///
/// Memoized values are only valid for the directory they were computed from;
/// [`WorkspaceContext::change_dir`] drops all of them.
#[derive(Debug)]
pub struct WorkspaceContext {
    cwd: PathBuf,
    workspace: OnceCell<Option<WorkspaceLayout>>,
    env_cmds: RefCell<HashMap<String, PathBuf>>,
}

impl WorkspaceContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            workspace: OnceCell::new(),
            env_cmds: RefCell::new(HashMap::new()),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn change_dir(&mut self, cwd: impl Into<PathBuf>) {
        let cwd = cwd.into();
        tracing::debug!(from = %self.cwd.display(), to = %cwd.display(), "working directory changed");
        self.cwd = cwd;
        self.workspace = OnceCell::new();
        self.env_cmds.get_mut().clear();
    }

    /// Closest workspace at or above the working directory.
    pub fn workspace(&self) -> Option<&WorkspaceLayout> {
        self.workspace
            .get_or_init(|| find_parent_workspace(&self.cwd).map(WorkspaceLayout::new))
            .as_ref()
    }

    /// Path of a command inside the workspace environment, `env/bin/<cmd>`.
    ///
    /// Environments created by patched virtualenv tools may nest an extra
    /// directory under `env/`; one level of nesting is searched before falling
    /// back to the canonical location.
    pub fn env_cmd(&self, cmd: &str) -> Option<PathBuf> {
        if let Some(path) = self.env_cmds.borrow().get(cmd) {
            return Some(path.clone());
        }

        let layout = self.workspace()?;
        let exact = layout.env_bin_dir().join(cmd);
        let resolved = if exact.exists() {
            exact
        } else {
            nested_env_cmd(&layout.env_dir(), cmd).unwrap_or(exact)
        };

        self.env_cmds
            .borrow_mut()
            .insert(cmd.to_string(), resolved.clone());
        Some(resolved)
    }
}

fn find_parent_workspace(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|candidate| is_workspace_dir(candidate))
        .map(Path::to_path_buf)
}

fn nested_env_cmd(env_dir: &Path, cmd: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(env_dir).ok()?;
    let mut candidates = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join("bin").join(cmd))
        .filter(|path| path.exists())
        .collect::<Vec<_>>();
    candidates.sort();
    candidates.into_iter().next()
}
