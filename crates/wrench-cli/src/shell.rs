use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use time::macros::format_description;
use time::OffsetDateTime;
use wrench_cache::{cache_key, AppCache};
use wrench_core::{VersionUpgrade, WorkspaceConfig, WorkspaceContext, WorkspaceLayout, WrenchError};
use wrench_registry::{
    clone_app_source, is_git_repo, pull_app_source, upstream_remote, AppInstaller, AppRequest,
    PullMode,
};
use wrench_update::{RestartTarget, WorkspaceOps};

use crate::render::TerminalRenderer;

/// Node toolchains needed from this major version of the primary app onwards.
const NODE_REQUIRED_FROM_MAJOR: u64 = 6;

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

/// Like [`run_command`] but lets the child write straight to the terminal.
fn run_streaming(command: &mut Command, context_message: &str) -> Result<()> {
    let status = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if status.success() {
        return Ok(());
    }
    Err(anyhow!("{context_message}: status={status}"))
}

fn command_output(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{context_message}: status={} stderr='{}'",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) fn find_executable(cmd: &str) -> Option<PathBuf> {
    which::which(cmd).ok()
}

/// True when any of the node toolchain commands resolves through `lookup`.
pub(crate) fn has_node_toolchain(lookup: impl Fn(&str) -> Option<PathBuf>) -> bool {
    ["npm", "node", "nodejs"]
        .iter()
        .any(|cmd| lookup(cmd).is_some())
}

/// Supervisor groups to restart, newest naming scheme first.
pub(crate) fn supervisor_groups(status: &str, workspace: &str, web_only: bool) -> Vec<String> {
    let web = format!("{workspace}-web:");
    let workers = format!("{workspace}-workers:");
    let processes = format!("{workspace}-processes:");

    if web_only && status.contains(&web) {
        vec![web]
    } else if status.contains(&workers) {
        vec![web, workers]
    } else if status.contains(&processes) {
        vec![processes]
    } else {
        vec!["saashq:".to_string()]
    }
}

/// Units listed by `systemctl show -p Requires <target>`.
pub(crate) fn parse_systemd_requires(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Requires="))
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

/// App identifier a source reference will be stored under in `apps/`.
pub(crate) fn app_name_from_source(source: &str) -> Result<String> {
    let trimmed = source.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(".git");
    if last.is_empty() || last.starts_with('.') {
        return Err(WrenchError::validation(format!("cannot derive an app name from '{source}'")).into());
    }
    Ok(last.to_string())
}

/// Workspace operations backed by the env python, git and the host's process tools.
pub(crate) struct ShellOps<'a> {
    context: &'a WorkspaceContext,
    layout: WorkspaceLayout,
    config: WorkspaceConfig,
    renderer: TerminalRenderer,
}

impl<'a> ShellOps<'a> {
    pub(crate) fn new(
        context: &'a WorkspaceContext,
        layout: WorkspaceLayout,
        config: WorkspaceConfig,
        renderer: TerminalRenderer,
    ) -> Self {
        Self {
            context,
            layout,
            config,
            renderer,
        }
    }

    fn python(&self) -> PathBuf {
        self.context
            .env_cmd("python")
            .filter(|path| path.exists())
            .unwrap_or_else(|| PathBuf::from("python3"))
    }

    fn primary_command(&self, args: &[&str]) -> Command {
        let primary = self.config.primary_app();
        let mut command = Command::new(self.python());
        command
            .arg("-m")
            .arg(format!("{primary}.utils.wrench_helper"))
            .arg(primary)
            .args(args)
            .current_dir(self.layout.sites_dir());
        command
    }

    fn run_primary(&self, args: &[&str]) -> Result<()> {
        let label = format!("{} {}", self.config.primary_app(), args.join(" "));
        run_streaming(&mut self.primary_command(args), &format!("`{label}` failed"))
    }

    fn install_app_requirements(&self, app: &str) -> Result<()> {
        let app_dir = self.layout.app_dir(app);
        run_streaming(
            Command::new(self.python())
                .arg("-m")
                .arg("pip")
                .arg("install")
                .arg("--upgrade")
                .arg("-e")
                .arg(&app_dir)
                .current_dir(self.layout.root()),
            &format!("failed installing python requirements of '{app}'"),
        )?;

        if app_dir.join("package.json").is_file() {
            run_streaming(
                Command::new("yarn").arg("install").current_dir(&app_dir),
                &format!("failed installing node requirements of '{app}'"),
            )?;
        }
        Ok(())
    }

    fn supervisor_status(&self) -> Result<(bool, String)> {
        let output = match Command::new("supervisorctl")
            .arg("status")
            .current_dir(self.layout.root())
            .output()
        {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(anyhow!("couldn't find supervisorctl in PATH"));
            }
            Err(err) => return Err(err).context("failed launching supervisorctl status"),
        };

        let status = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if !status.contains("Permission denied") {
            return Ok((false, status));
        }

        let output = Command::new("sudo")
            .arg("supervisorctl")
            .arg("status")
            .current_dir(self.layout.root())
            .output()
            .context("failed launching sudo supervisorctl status")?;
        Ok((true, String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn restart_supervisor(&self, web_only: bool) -> Result<()> {
        if let Some(custom) = self.config.string("supervisor_restart_cmd") {
            return run_command(
                Command::new("sh")
                    .arg("-c")
                    .arg(custom)
                    .current_dir(self.layout.root()),
                "custom supervisor restart command failed",
            );
        }

        let (sudo, status) = self.supervisor_status()?;
        for group in supervisor_groups(&status, &self.layout.name(), web_only) {
            let mut command = if sudo {
                let mut command = Command::new("sudo");
                command.arg("supervisorctl");
                command
            } else {
                Command::new("supervisorctl")
            };
            command.arg("restart").arg(&group);
            run_command(
                &mut command,
                &format!("restarting supervisor group `{group}` failed"),
            )?;
        }
        Ok(())
    }

    fn restart_systemd(&self) -> Result<()> {
        let target = format!("{}.target", self.layout.name());
        let requires = command_output(
            Command::new("systemctl")
                .arg("show")
                .arg("-p")
                .arg("Requires")
                .arg(&target),
            &format!("failed reading units of {target}"),
        )?;
        let units = parse_systemd_requires(&requires);
        if units.is_empty() {
            tracing::warn!(target = %target, "no units required by systemd target");
            return Ok(());
        }

        for action in ["stop", "start"] {
            run_command(
                Command::new("sudo")
                    .arg("systemctl")
                    .arg(action)
                    .arg("--")
                    .args(&units),
                &format!("systemctl {action} for {target} failed"),
            )?;
        }
        Ok(())
    }

    fn restart_process_manager(&self, web_only: bool) -> Result<()> {
        if find_executable("overmind").is_none()
            || !self.layout.process_manager_socket_path().exists()
        {
            tracing::debug!("no running process manager to restart");
            return Ok(());
        }

        let mut command = Command::new("overmind");
        command.arg("restart").current_dir(self.layout.root());
        if web_only {
            command.arg("web");
        }
        run_command(&mut command, "overmind restart failed")
    }
}

impl WorkspaceOps for ShellOps<'_> {
    fn list_sites(&self) -> Result<Vec<String>> {
        self.layout.list_sites()
    }

    fn backup_site(&self, site: &str) -> Result<()> {
        self.run_primary(&["--site", site, "backup"])
    }

    fn pull_app(&self, app: &str, mode: PullMode) -> Result<()> {
        tracing::info!(app, reset = mode.reset, "pulling app source");
        pull_app_source(&self.layout.app_dir(app), app, mode)
    }

    fn install_requirements(&self, apps: &[String]) -> Result<()> {
        for app in apps {
            self.install_app_requirements(app)?;
        }
        Ok(())
    }

    fn migrate_site(&self, site: &str) -> Result<()> {
        self.run_primary(&["--site", site, "migrate"])
    }

    fn build_assets(&self) -> Result<()> {
        self.run_primary(&["build"])
    }

    fn validate_environment(&self, upgrade: &VersionUpgrade) -> Result<()> {
        let needs_node = upgrade
            .to
            .as_ref()
            .is_some_and(|version| version.major >= NODE_REQUIRED_FROM_MAJOR);
        if needs_node && !has_node_toolchain(find_executable) {
            return Err(WrenchError::validation("please install nodejs and npm").into());
        }
        Ok(())
    }

    fn regenerate_service_config(&self) -> Result<()> {
        self.renderer.print_status(
            "warn",
            "production setup detected: regenerate configuration with `wrench setup supervisor` \
             and `wrench setup nginx`, then run `sudo service nginx restart` and `sudo supervisorctl reload`",
        );
        Ok(())
    }

    fn restart(&self, target: RestartTarget, web_only: bool) -> Result<()> {
        match target {
            RestartTarget::ProcessManager => self.restart_process_manager(web_only),
            RestartTarget::Supervisor => self.restart_supervisor(web_only),
            RestartTarget::Systemd => self.restart_systemd(),
        }
    }
}

/// Fetches apps with git (or from the archive cache) and installs them into the env.
pub(crate) struct ShellInstaller<'a> {
    ops: &'a ShellOps<'a>,
    cache: Option<AppCache>,
}

impl<'a> ShellInstaller<'a> {
    pub(crate) fn new(ops: &'a ShellOps<'a>, cache: Option<AppCache>) -> Self {
        Self { ops, cache }
    }

    fn layout(&self) -> &WorkspaceLayout {
        &self.ops.layout
    }

    fn fetch_into(&self, request: &AppRequest, app: &str, dest: &Path) -> Result<()> {
        let shallow = self.ops.config.shallow_clone();
        let Some(cache) = &self.cache else {
            return clone_app_source(&request.source, dest, request.branch.as_deref(), shallow);
        };

        let key = cache_key(&[
            request.source.as_str(),
            request.branch.as_deref().unwrap_or(""),
        ]);
        if let Some(archive) = cache.lookup(app, &key) {
            fs::create_dir_all(dest)
                .with_context(|| format!("failed to create {}", dest.display()))?;
            run_command(
                Command::new("tar").arg("-xf").arg(&archive).arg("-C").arg(dest),
                "failed to extract cached app archive",
            )?;
            tracing::info!(app, archive = %archive.display(), "restored app from cache");
            return Ok(());
        }

        clone_app_source(&request.source, dest, request.branch.as_deref(), shallow)?;
        let staging = std::env::temp_dir().join(format!("wrench-{app}-{}.tgz", std::process::id()));
        let archived = run_command(
            Command::new("tar")
                .arg("-czf")
                .arg(&staging)
                .arg("-C")
                .arg(dest)
                .arg("."),
            "failed to archive fetched app",
        )
        .and_then(|()| cache.store(app, &key, &staging, true));
        let _ = fs::remove_file(&staging);
        if let Err(err) = archived {
            tracing::warn!(app, error = %err, "app archive not cached");
        }
        Ok(())
    }
}

impl AppInstaller for ShellInstaller<'_> {
    fn fetch(&self, request: &AppRequest) -> Result<String> {
        let app = app_name_from_source(&request.source)?;
        let dest = self.layout().app_dir(&app);
        if dest.exists() {
            return Err(WrenchError::validation(format!(
                "app '{app}' already exists at {}",
                dest.display()
            ))
            .into());
        }

        self.fetch_into(request, &app, &dest)?;
        if !self.layout().is_app_dir(&app) {
            let _ = fs::remove_dir_all(&dest);
            return Err(WrenchError::validation(format!(
                "{} is not a valid app: missing {app}/hooks.py",
                request.source
            ))
            .into());
        }
        Ok(app)
    }

    fn install(&self, app: &str) -> Result<()> {
        self.ops.install_app_requirements(app)
    }

    fn uninstall(&self, app: &str) -> Result<()> {
        run_command(
            Command::new(self.ops.python())
                .arg("-m")
                .arg("pip")
                .arg("uninstall")
                .arg("-y")
                .arg(app)
                .current_dir(self.layout().root()),
            &format!("failed uninstalling python package '{app}'"),
        )
    }

    fn remove(&self, app: &str, no_backup: bool) -> Result<()> {
        let app_dir = self.layout().app_dir(app);
        if is_git_repo(&app_dir) {
            upstream_remote(&app_dir, app)?;
        }
        if no_backup {
            return fs::remove_dir_all(&app_dir)
                .with_context(|| format!("failed deleting {}", app_dir.display()));
        }

        let date = OffsetDateTime::now_utc()
            .format(format_description!("[year]-[month]-[day]"))
            .context("failed formatting archive date")?;
        let archive_dir = self.layout().root().join("archived").join("apps");
        fs::create_dir_all(&archive_dir)
            .with_context(|| format!("failed to create {}", archive_dir.display()))?;

        let mut target = archive_dir.join(format!("{app}-{date}"));
        let mut attempt = 1;
        while target.exists() {
            target = archive_dir.join(format!("{app}-{date}_{attempt}"));
            attempt += 1;
        }
        fs::rename(&app_dir, &target).with_context(|| {
            format!("failed moving {} to {}", app_dir.display(), target.display())
        })?;
        tracing::info!(app, archive = %target.display(), "app moved to archive");
        Ok(())
    }

    fn sites_using(&self, app: &str) -> Result<Vec<String>> {
        let mut sites = Vec::new();
        for site in self.layout().list_sites()? {
            let output = command_output(
                &mut self.ops.primary_command(&["--site", &site, "list-apps"]),
                &format!("failed listing apps of site '{site}'"),
            )?;
            if output.split_whitespace().any(|installed| installed == app) {
                sites.push(site);
            }
        }
        Ok(sites)
    }
}
