use std::collections::BTreeSet;
use std::fs;
use std::io;

use anyhow::{Context, Result};
use wrench_core::{AppDescriptor, DescriptorMap, WorkspaceLayout, WrenchError};

use crate::descriptor_store::{read_descriptors, write_descriptors};
use crate::probe::AppProbe;

/// Source reference handed to the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRequest {
    pub source: String,
    pub branch: Option<String>,
}

/// External operations that put application code on disk and take it away again.
pub trait AppInstaller {
    /// Fetch sources into `apps/`, returning the identifier the app was stored under.
    fn fetch(&self, request: &AppRequest) -> Result<String>;

    fn install(&self, app: &str) -> Result<()>;

    fn uninstall(&self, app: &str) -> Result<()>;

    fn remove(&self, app: &str, no_backup: bool) -> Result<()>;

    /// Sites that still have `app` installed.
    fn sites_using(&self, app: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    pub no_backup: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncRequest {
    pub app_name: Option<String>,
    /// Directory under `apps/` when it differs from the app identifier.
    pub app_dir: Option<String>,
    pub branch: Option<String>,
    pub required: Vec<String>,
}

impl SyncRequest {
    pub fn for_app(app: impl Into<String>) -> Self {
        Self {
            app_name: Some(app.into()),
            ..Self::default()
        }
    }
}

/// Ordered set of installed applications plus their persisted descriptors.
///
/// The primary app always sits at index 0. Every other app keeps the order it
/// has in `sites/apps.txt`; apps found on disk but missing from that file are
/// appended in name order. No locking: one writer per workspace.
#[derive(Debug, Clone)]
pub struct AppRegistry {
    layout: WorkspaceLayout,
    primary: String,
    apps: Vec<String>,
    descriptors: DescriptorMap,
}

impl AppRegistry {
    pub fn open(layout: WorkspaceLayout, primary: impl Into<String>) -> Result<Self> {
        let mut registry = Self {
            layout,
            primary: primary.into(),
            apps: Vec::new(),
            descriptors: DescriptorMap::new(),
        };
        registry.reload()?;
        registry.descriptors = read_descriptors(&registry.layout)?;
        Ok(registry)
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn list(&self) -> &[String] {
        &self.apps
    }

    pub fn descriptors(&self) -> &DescriptorMap {
        &self.descriptors
    }

    pub fn contains(&self, app: &str) -> bool {
        self.apps.iter().any(|name| name == app)
    }

    /// Re-derive the ordered app list from `apps/` and the persisted list file.
    pub fn reload(&mut self) -> Result<()> {
        let on_disk = scan_app_dirs(&self.layout)?;
        let persisted = read_app_list(&self.layout)?;

        let mut apps = Vec::with_capacity(on_disk.len());
        for app in persisted {
            if on_disk.contains(&app) && !apps.contains(&app) {
                apps.push(app);
            }
        }
        for app in &on_disk {
            if !apps.contains(app) {
                apps.push(app.clone());
            }
        }

        if let Some(position) = apps.iter().position(|app| *app == self.primary) {
            let primary = apps.remove(position);
            apps.insert(0, primary);
        }

        self.apps = apps;
        Ok(())
    }

    /// Fetch, install and register an app, then record its descriptor.
    pub fn add(
        &mut self,
        installer: &dyn AppInstaller,
        probe: &dyn AppProbe,
        request: &AppRequest,
    ) -> Result<String> {
        let app = installer
            .fetch(request)
            .with_context(|| format!("failed fetching app from {}", request.source))?;
        if self.contains(&app) {
            return Err(WrenchError::validation(format!("app '{app}' is already installed")).into());
        }

        installer
            .install(&app)
            .with_context(|| format!("failed installing app '{app}'"))?;
        self.apps.push(app.clone());
        self.write_app_list()?;

        self.sync(
            probe,
            &SyncRequest {
                app_name: Some(app.clone()),
                branch: request.branch.clone(),
                ..SyncRequest::default()
            },
        )?;
        tracing::info!(app = %app, "app added to registry");
        Ok(app)
    }

    /// Uninstall and delete an app, then drop it from the list and descriptors.
    pub fn remove(
        &mut self,
        installer: &dyn AppInstaller,
        probe: &dyn AppProbe,
        app: &str,
        options: RemoveOptions,
    ) -> Result<()> {
        if app == self.primary {
            return Err(
                WrenchError::validation(format!("you cannot uninstall the app `{app}`")).into(),
            );
        }
        if !self.contains(app) {
            return Err(WrenchError::app_not_installed(app).into());
        }

        if !options.force {
            let sites = installer.sites_using(app)?;
            if let Some(site) = sites.first() {
                return Err(WrenchError::validation(format!(
                    "cannot remove, app '{app}' is installed on site: {site}"
                ))
                .into());
            }
        }

        installer
            .uninstall(app)
            .with_context(|| format!("failed uninstalling app '{app}'"))?;
        if let Err(err) = installer.remove(app, options.no_backup) {
            let remote_failure = matches!(
                WrenchError::find(&err),
                Some(WrenchError::InvalidRemote { .. })
            );
            if !(options.force && remote_failure) {
                return Err(err.context(format!("failed removing app '{app}'")));
            }
            tracing::warn!(app, error = %err, "ignoring remote failure for forced removal");
            let app_dir = self.layout.app_dir(app);
            match fs::remove_dir_all(&app_dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed deleting {}", app_dir.display()));
                }
            }
        }

        self.apps.retain(|name| name != app);
        self.sync(probe, &SyncRequest::default())?;
        tracing::info!(app, "app removed from registry");
        Ok(())
    }

    /// Reconcile the list file and the descriptor map with what is on disk.
    pub fn sync(&mut self, probe: &dyn AppProbe, request: &SyncRequest) -> Result<()> {
        self.reload()?;
        self.write_app_list()?;
        self.update_descriptors(probe, request)
    }

    fn update_descriptors(&mut self, probe: &dyn AppProbe, request: &SyncRequest) -> Result<()> {
        if !self.apps.is_empty() && !self.layout.descriptors_path().exists() {
            tracing::info!(count = self.apps.len(), "bootstrapping app descriptors");
            for (position, app) in self.apps.iter().enumerate() {
                let descriptor = self.probe_descriptor(probe, app, None, None, position + 1)?;
                self.descriptors.insert(app.clone(), descriptor);
            }
        }

        let registered: BTreeSet<&str> = self.apps.iter().map(String::as_str).collect();
        self.descriptors
            .retain(|app, _| registered.contains(app.as_str()));

        if let Some(app) = request.app_name.as_deref() {
            if !self.descriptors.contains_key(app) {
                if self.contains(app) {
                    let descriptor = self.probe_descriptor(
                        probe,
                        app,
                        request.app_dir.as_deref(),
                        request.branch.as_deref(),
                        self.descriptors.len() + 1,
                    )?;
                    let descriptor = AppDescriptor {
                        required: request.required.clone(),
                        ..descriptor
                    };
                    self.descriptors.insert(app.to_string(), descriptor);
                } else {
                    tracing::warn!(app, "not registered on disk, descriptor not recorded");
                }
            }
        }

        let untracked = self
            .apps
            .iter()
            .filter(|app| !self.descriptors.contains_key(app.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        for app in untracked {
            tracing::debug!(app = %app, "recording descriptor for untracked app");
            let descriptor =
                self.probe_descriptor(probe, &app, None, None, self.descriptors.len() + 1)?;
            self.descriptors.insert(app, descriptor);
        }

        write_descriptors(&self.layout, &self.descriptors)
    }

    fn probe_descriptor(
        &self,
        probe: &dyn AppProbe,
        app: &str,
        app_dir: Option<&str>,
        branch: Option<&str>,
        idx: usize,
    ) -> Result<AppDescriptor> {
        let dir = self.layout.app_dir(app_dir.unwrap_or(app));
        let resolution = probe
            .resolve(&dir, app, branch)
            .with_context(|| format!("failed resolving source of app '{app}'"))?;
        let version = probe.current_version(app)?;
        Ok(AppDescriptor {
            resolution,
            required: Vec::new(),
            idx,
            version,
        })
    }

    fn write_app_list(&self) -> Result<()> {
        let path = self.layout.apps_list_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        fs::write(&path, self.apps.join("\n"))
            .with_context(|| format!("failed writing app list: {}", path.display()))
    }
}

fn scan_app_dirs(layout: &WorkspaceLayout) -> Result<BTreeSet<String>> {
    let dir = layout.apps_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading apps directory: {}", dir.display()));
        }
    };

    let mut apps = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if layout.is_app_dir(&name) {
            apps.insert(name);
        }
    }
    Ok(apps)
}

fn read_app_list(layout: &WorkspaceLayout) -> Result<Vec<String>> {
    let path = layout.apps_list_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading app list: {}", path.display()));
        }
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
