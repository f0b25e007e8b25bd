use anyhow::{Context, Result};
use wrench_core::{VersionUpgrade, WorkspaceConfig, WorkspaceLayout, WrenchError};
use wrench_registry::{read_excluded_apps, AppProbe, AppRegistry, PullMode};

use crate::gate::{detect_upgrade, VersionGate};
use crate::ops::{restart_processes, RestartPlan, RestartRequest, WorkspaceOps};
use crate::patches::{PatchReport, PatchRunner};
use crate::reporter::{Prompt, Reporter};

/// Apps whose checkouts may not sit on a retired branch name.
const CORE_APPS: [&str; 1] = ["erpnexus"];
const RETIRED_BRANCH: &str = "master";

/// Pipeline states in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    PatchingLedger,
    GateChecked,
    MaintenanceOn,
    BackedUp,
    SourcesPulled,
    RequirementsInstalled,
    SitesPatched,
    AssetsBuilt,
    PostUpgraded,
    ProcessesRestarted,
    MaintenanceOff,
    Aborted,
}

impl UpdateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    pub pull: bool,
    pub patch: bool,
    pub build: bool,
    pub requirements: bool,
    pub backup: bool,
    /// Comma or space separated subset of apps to pull.
    pub apps: Option<String>,
    pub force: bool,
    pub reset: bool,
    pub restart: RestartRequest,
    pub strict_restart: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            pull: false,
            patch: false,
            build: false,
            requirements: false,
            backup: true,
            apps: None,
            force: false,
            reset: false,
            restart: RestartRequest::default(),
            strict_restart: false,
        }
    }
}

impl UpdateOptions {
    /// No phase selected means every phase.
    pub fn with_default_phases(mut self) -> Self {
        if !(self.pull || self.patch || self.build || self.requirements) {
            self.pull = true;
            self.patch = true;
            self.build = true;
            self.requirements = true;
        }
        self
    }
}

pub fn parse_app_subset(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c == ' ')
        .map(str::trim)
        .filter(|app| !app.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateReport {
    pub visited: Vec<UpdateState>,
    pub upgrade: VersionUpgrade,
    pub patches: PatchReport,
    pub apps: Vec<String>,
    pub backup_failures: Vec<(String, String)>,
    pub restart_warnings: Vec<String>,
}

/// Sequences one `update` run. Every phase runs to completion before the next
/// starts; an error in any phase leaves the workspace in maintenance mode.
pub struct UpdateOrchestrator<'a> {
    layout: &'a WorkspaceLayout,
    probe: &'a dyn AppProbe,
    ops: &'a dyn WorkspaceOps,
    reporter: &'a dyn Reporter,
    prompt: &'a dyn Prompt,
    patches: &'a PatchRunner,
    state: UpdateState,
    report: UpdateReport,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(
        layout: &'a WorkspaceLayout,
        probe: &'a dyn AppProbe,
        ops: &'a dyn WorkspaceOps,
        reporter: &'a dyn Reporter,
        prompt: &'a dyn Prompt,
        patches: &'a PatchRunner,
    ) -> Self {
        Self {
            layout,
            probe,
            ops,
            reporter,
            prompt,
            patches,
            state: UpdateState::Idle,
            report: UpdateReport::default(),
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Visited states so far, including `Aborted` when a run failed.
    pub fn visited(&self) -> &[UpdateState] {
        &self.report.visited
    }

    pub fn run(&mut self, options: UpdateOptions) -> Result<UpdateReport> {
        self.report = UpdateReport::default();
        match self.run_phases(options) {
            Ok(()) => Ok(std::mem::take(&mut self.report)),
            Err(err) => {
                self.transition(UpdateState::Aborted);
                Err(err)
            }
        }
    }

    fn run_phases(&mut self, options: UpdateOptions) -> Result<()> {
        self.transition(UpdateState::PatchingLedger);
        self.report.patches = self.patches.run(self.layout)?;

        let mut config = WorkspaceConfig::load(self.layout)?;
        if config.is_release_workspace() {
            return Err(
                WrenchError::validation("release workspace detected, cannot update").into(),
            );
        }

        let options = options.with_default_phases();
        let primary = config.primary_app().to_string();
        let registry = AppRegistry::open(self.layout.clone(), primary.as_str())?;
        let apps = self.apps_in_scope(&registry, &options)?;
        self.check_retired_branches(&registry)?;

        let upgrade = detect_upgrade(self.probe, &primary)?;
        VersionGate::new(self.prompt, self.reporter, self.ops).handle(
            &upgrade,
            options.force,
            options.reset,
            &config,
        )?;
        self.report.upgrade = upgrade.clone();
        self.transition(UpdateState::GateChecked);

        config.set_maintenance(true);
        config.save(self.layout)?;
        self.transition(UpdateState::MaintenanceOn);

        if options.backup {
            self.backup_sites()?;
        }
        self.transition(UpdateState::BackedUp);

        if options.pull {
            self.pull_sources(&apps, &config, options.reset)?;
        }
        self.transition(UpdateState::SourcesPulled);

        if options.requirements {
            self.reporter.phase_started("Setting up requirements");
            self.ops.install_requirements(&apps)?;
            self.reporter.phase_finished("Requirements set up");
        }
        self.transition(UpdateState::RequirementsInstalled);

        if options.patch {
            self.patch_sites()?;
        }
        self.transition(UpdateState::SitesPatched);

        if options.build {
            self.reporter.phase_started("Building assets");
            self.ops.build_assets()?;
            self.reporter.phase_finished("Assets built");
        }
        self.transition(UpdateState::AssetsBuilt);

        if upgrade.is_major || options.force {
            self.post_upgrade(&upgrade, &config)?;
        }
        self.transition(UpdateState::PostUpgraded);

        let plan = RestartPlan::resolve(
            RestartRequest {
                web_only: false,
                ..options.restart
            },
            &config,
        );
        if !plan.is_empty() {
            self.reporter.phase_started("Restarting processes");
            self.report.restart_warnings =
                restart_processes(self.ops, self.reporter, &plan, options.strict_restart)?;
            self.reporter.phase_finished("Processes restarted");
        }
        self.transition(UpdateState::ProcessesRestarted);

        // Phases may have rewritten the config file; only flip the flags.
        let mut config = WorkspaceConfig::load(self.layout)?;
        config.set_maintenance(false);
        config.save(self.layout)?;
        self.transition(UpdateState::MaintenanceOff);

        self.report.apps = apps;
        self.transition(UpdateState::Idle);
        Ok(())
    }

    fn transition(&mut self, next: UpdateState) {
        tracing::debug!(from = ?self.state, to = ?next, "update state");
        self.state = next;
        self.report.visited.push(next);
    }

    fn apps_in_scope(&self, registry: &AppRegistry, options: &UpdateOptions) -> Result<Vec<String>> {
        let subset = match options.apps.as_deref() {
            Some(raw) if options.pull => parse_app_subset(raw),
            _ => Vec::new(),
        };
        if subset.is_empty() {
            return Ok(registry.list().to_vec());
        }

        for app in &subset {
            if !registry.contains(app) {
                return Err(WrenchError::app_not_installed(app.as_str()).into());
            }
        }
        Ok(subset)
    }

    fn check_retired_branches(&self, registry: &AppRegistry) -> Result<()> {
        let core_apps = std::iter::once(registry.primary()).chain(CORE_APPS);
        for app in core_apps {
            if !registry.contains(app) {
                continue;
            }
            let app_dir = self.layout.app_dir(app);
            if !self.probe.is_repository(&app_dir) {
                continue;
            }

            let branch = self.probe.current_branch(&app_dir, app)?;
            if branch == RETIRED_BRANCH {
                return Err(WrenchError::InvalidBranch {
                    app: app.to_string(),
                    branch,
                    hint: "'master' was renamed to 'version-11'; switch to a supported \
                           version branch with `wrench switch-to-branch <branch>`"
                        .to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn backup_sites(&mut self) -> Result<()> {
        self.reporter.phase_started("Backing up sites");
        for site in self.ops.list_sites()? {
            if let Err(err) = self.ops.backup_site(&site) {
                tracing::warn!(site = %site, error = %err, "site backup failed");
                self.reporter
                    .warn(&format!("backup of site '{site}' failed: {err:#}"));
                self.report.backup_failures.push((site, format!("{err:#}")));
            }
        }

        if !self.report.backup_failures.is_empty() {
            let sites = self
                .report
                .backup_failures
                .iter()
                .map(|(site, _)| site.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            anyhow::bail!("backup failed for site(s): {sites}; workspace left in maintenance mode");
        }
        self.reporter.phase_finished("Sites backed up");
        Ok(())
    }

    fn pull_sources(&self, apps: &[String], config: &WorkspaceConfig, reset: bool) -> Result<()> {
        self.reporter.phase_started("Updating apps source");
        let excluded = read_excluded_apps(self.layout)?;
        let mode = PullMode {
            reset,
            shallow: config.shallow_clone(),
        };

        for app in apps {
            if excluded.contains(app) {
                self.reporter
                    .info(&format!("skipping excluded app '{app}'"));
                continue;
            }
            self.ops
                .pull_app(app, mode)
                .with_context(|| format!("failed updating source of app '{app}'"))?;
        }
        self.reporter.phase_finished("Apps source updated");
        Ok(())
    }

    fn patch_sites(&self) -> Result<()> {
        self.reporter.phase_started("Patching sites");
        for site in self.ops.list_sites()? {
            self.ops
                .migrate_site(&site)
                .map_err(|err| WrenchError::Patch {
                    id: site.clone(),
                    message: format!("{err:#}"),
                })?;
        }
        self.reporter.phase_finished("Sites patched");
        Ok(())
    }

    fn post_upgrade(&self, upgrade: &VersionUpgrade, config: &WorkspaceConfig) -> Result<()> {
        if let Some(to) = &upgrade.to {
            self.reporter
                .info(&format!("workspace upgraded to version {to}"));
        }
        if config.flag("restart_supervisor_on_update") {
            self.reporter.phase_started("Regenerating service configuration");
            self.ops.regenerate_service_config()?;
            self.reporter.phase_finished("Service configuration regenerated");
        }
        Ok(())
    }
}
