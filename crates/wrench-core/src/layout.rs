use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PRIMARY_APP: &str = "saashq";

/// Directories that must all exist for a path to count as a workspace.
pub const WORKSPACE_DIRS: [&str; 5] = ["apps", "sites", "config", "logs", "config/pids"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn app_dir(&self, name: &str) -> PathBuf {
        self.apps_dir().join(name)
    }

    /// Python package directory inside an app checkout, `apps/<name>/<name>`.
    pub fn app_module_dir(&self, name: &str) -> PathBuf {
        self.app_dir(name).join(name)
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.root.join("sites")
    }

    pub fn site_config_path(&self, site: &str) -> PathBuf {
        self.sites_dir().join(site).join("site_config.json")
    }

    pub fn apps_list_path(&self) -> PathBuf {
        self.sites_dir().join("apps.txt")
    }

    pub fn descriptors_path(&self) -> PathBuf {
        self.sites_dir().join("apps.json")
    }

    pub fn excluded_apps_path(&self) -> PathBuf {
        self.sites_dir().join("excluded_apps.txt")
    }

    pub fn common_site_config_path(&self) -> PathBuf {
        self.sites_dir().join("common_site_config.json")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.config_dir().join("pids")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn env_dir(&self) -> PathBuf {
        self.root.join("env")
    }

    pub fn env_bin_dir(&self) -> PathBuf {
        self.env_dir().join("bin")
    }

    pub fn patch_ledger_path(&self) -> PathBuf {
        self.root.join("patches.txt")
    }

    pub fn archived_sites_dir(&self) -> PathBuf {
        self.root.join("archived").join("sites")
    }

    pub fn legacy_archived_sites_dir(&self) -> PathBuf {
        self.root.join("archived_sites")
    }

    pub fn process_manager_socket_path(&self) -> PathBuf {
        self.root.join(".overmind.sock")
    }

    /// Workspace name used to prefix supervisor groups and systemd targets.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wrench".to_string())
    }

    /// An app directory is one that carries `apps/<name>/<name>/hooks.py`.
    pub fn is_app_dir(&self, name: &str) -> bool {
        self.app_module_dir(name).join("hooks.py").is_file()
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in WORKSPACE_DIRS {
            let dir = self.root.join(dir);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Sites are the sub-directories of `sites/` that hold a `site_config.json`.
    pub fn list_sites(&self) -> Result<Vec<String>> {
        let dir = self.sites_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sites = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read sites directory: {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.site_config_path(&name).is_file() {
                sites.push(name);
            }
        }

        sites.sort();
        Ok(sites)
    }
}

pub fn is_workspace_dir(path: &Path) -> bool {
    WORKSPACE_DIRS.iter().all(|dir| path.join(dir).is_dir())
}
