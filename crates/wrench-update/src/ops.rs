use anyhow::Result;
use wrench_core::{VersionUpgrade, WorkspaceConfig};
use wrench_registry::PullMode;

use crate::reporter::Reporter;

/// External operations the update pipeline drives. Every call blocks until the
/// underlying tool exits; a failure is returned as an error.
pub trait WorkspaceOps {
    fn list_sites(&self) -> Result<Vec<String>>;

    fn backup_site(&self, site: &str) -> Result<()>;

    fn pull_app(&self, app: &str, mode: PullMode) -> Result<()>;

    fn install_requirements(&self, apps: &[String]) -> Result<()>;

    fn migrate_site(&self, site: &str) -> Result<()>;

    fn build_assets(&self) -> Result<()>;

    /// Check that the host can run the target version, e.g. a node toolchain for newer majors.
    fn validate_environment(&self, upgrade: &VersionUpgrade) -> Result<()>;

    /// Refresh service configuration after an upgrade. An implementation that
    /// cannot render the templates itself may only tell the operator what to run.
    fn regenerate_service_config(&self) -> Result<()>;

    fn restart(&self, target: RestartTarget, web_only: bool) -> Result<()>;
}

/// What the caller asked to restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartRequest {
    pub web_only: bool,
    pub supervisor: bool,
    pub systemd: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartTarget {
    ProcessManager,
    Supervisor,
    Systemd,
}

impl RestartTarget {
    pub fn label(self) -> &'static str {
        match self {
            Self::ProcessManager => "process manager",
            Self::Supervisor => "supervisor",
            Self::Systemd => "systemd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestartPlan {
    pub web_only: bool,
    pub targets: Vec<RestartTarget>,
}

impl RestartPlan {
    /// Combine the request with the workspace's restart-on-update settings.
    pub fn resolve(request: RestartRequest, config: &WorkspaceConfig) -> Self {
        let mut targets = Vec::new();
        if config.flag("developer_mode") {
            targets.push(RestartTarget::ProcessManager);
        }
        if request.supervisor || config.flag("restart_supervisor_on_update") {
            targets.push(RestartTarget::Supervisor);
        }
        if request.systemd && config.flag("restart_systemd_on_update") {
            targets.push(RestartTarget::Systemd);
        }

        Self {
            web_only: request.web_only,
            targets,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Restart every planned target. Failures become warnings unless `strict`.
pub fn restart_processes(
    ops: &dyn WorkspaceOps,
    reporter: &dyn Reporter,
    plan: &RestartPlan,
    strict: bool,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    for target in &plan.targets {
        match ops.restart(*target, plan.web_only) {
            Ok(()) => tracing::debug!(target = target.label(), "restarted"),
            Err(err) if strict => {
                return Err(err.context(format!("failed restarting {}", target.label())));
            }
            Err(err) => {
                let message = format!(
                    "restarting {} failed: {err:#}; use `wrench restart` to retry",
                    target.label()
                );
                tracing::warn!(target = target.label(), error = %err, "restart failed");
                reporter.warn(&message);
                warnings.push(message);
            }
        }
    }
    Ok(warnings)
}

/// Restart after the installed app set changed. Supervisor and systemd are
/// requested; failures only come back as warnings.
pub fn reload_processes(
    ops: &dyn WorkspaceOps,
    reporter: &dyn Reporter,
    config: &WorkspaceConfig,
) -> Result<Vec<String>> {
    let plan = RestartPlan::resolve(
        RestartRequest {
            web_only: false,
            supervisor: true,
            systemd: true,
        },
        config,
    );
    restart_processes(ops, reporter, &plan, false)
}
