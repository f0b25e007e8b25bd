use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use wrench_core::WrenchError;

pub(crate) fn base_git_command() -> Command {
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg("core.autocrlf=false")
        .arg("-c")
        .arg("core.eol=lf");
    command
}

pub(crate) fn git_output(repo_root: &Path, args: &[&str], app: &str) -> Result<String> {
    let output = base_git_command()
        .args(args)
        .current_dir(repo_root)
        .output()
        .with_context(|| format!("app '{}' failed launching git {}", app, args.join(" ")))?;
    if !output.status.success() {
        anyhow::bail!(
            "app '{}' git {} failed: {}",
            app,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8(output.stdout)
        .with_context(|| format!("app '{}' git {} produced non-UTF-8 output", app, args.join(" ")))?;
    Ok(stdout.trim().to_string())
}

fn run_git_command(repo_root: &Path, args: &[&str], app: &str) -> Result<()> {
    git_output(repo_root, args, app).map(|_| ())
}

pub fn is_git_repo(app_dir: &Path) -> bool {
    app_dir.join(".git").exists()
}

pub fn current_branch(app_dir: &Path, app: &str) -> Result<String> {
    git_output(app_dir, &["rev-parse", "--abbrev-ref", "HEAD"], app)
}

pub(crate) fn commit_hash(app_dir: &Path, reference: &str, app: &str) -> Result<String> {
    git_output(app_dir, &["rev-parse", reference], app)
}

/// `upstream` when configured, otherwise the first remote listed.
pub fn upstream_remote(app_dir: &Path, app: &str) -> Result<String> {
    let remotes = git_output(app_dir, &["remote"], app)?;
    let remotes = remotes.split_whitespace().collect::<Vec<_>>();
    if remotes.contains(&"upstream") {
        return Ok("upstream".to_string());
    }

    remotes
        .first()
        .map(|remote| remote.to_string())
        .ok_or_else(|| {
            WrenchError::InvalidRemote {
                app: app.to_string(),
                message: "no git remote configured".to_string(),
            }
            .into()
        })
}

pub fn is_shallow_repo(app_dir: &Path, app: &str) -> Result<bool> {
    Ok(git_output(app_dir, &["rev-parse", "--is-shallow-repository"], app)? == "true")
}

pub fn has_local_changes(app_dir: &Path, app: &str) -> Result<bool> {
    let status = git_output(
        app_dir,
        &["status", "--untracked-files=no", "--porcelain"],
        app,
    )?;
    Ok(!status.is_empty())
}

/// Contents of `path` on the tip of the tracked remote branch.
pub(crate) fn show_remote_file(app_dir: &Path, path: &str, app: &str) -> Result<String> {
    let remote = upstream_remote(app_dir, app)?;
    let branch = current_branch(app_dir, app)?;
    git_output(app_dir, &["show", &format!("{remote}/{branch}:{path}")], app)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PullMode {
    /// Discard local history and hard-reset onto the remote branch.
    pub reset: bool,
    /// Keep fetches shallow (`--depth=1`); only honoured together with `reset`.
    pub shallow: bool,
}

/// Bring an app checkout up to date with its tracked remote branch.
pub fn pull_app_source(app_dir: &Path, app: &str, mode: PullMode) -> Result<()> {
    if !is_git_repo(app_dir) {
        tracing::debug!(app, "not a git repository, skipping pull");
        return Ok(());
    }

    let remote = upstream_remote(app_dir, app)?;
    let branch = current_branch(app_dir, app)?;

    if mode.reset {
        let mut fetch = vec!["fetch"];
        if mode.shallow {
            fetch.extend(["--depth=1", "--no-tags"]);
        }
        fetch.extend([remote.as_str(), branch.as_str()]);
        run_git_command(app_dir, &fetch, app)?;
        run_git_command(
            app_dir,
            &["reset", "--hard", &format!("{remote}/{branch}")],
            app,
        )?;
        return Ok(());
    }

    if has_local_changes(app_dir, app)? {
        return Err(WrenchError::validation(format!(
            "cannot update app '{app}': local changes present; commit them or rerun with --reset"
        ))
        .into());
    }

    if is_shallow_repo(app_dir, app)? {
        tracing::info!(app, remote = %remote, "unshallowing repository");
        run_git_command(app_dir, &["fetch", &remote, "--unshallow"], app)?;
    }

    run_git_command(app_dir, &["pull", "--rebase", &remote, &branch], app)
}

/// Clone `source` into `dest` with the remote named `upstream`.
pub fn clone_app_source(
    source: &str,
    dest: &Path,
    branch: Option<&str>,
    shallow: bool,
) -> Result<()> {
    let mut command = base_git_command();
    command.arg("clone").arg(source).arg(dest).arg("--origin").arg("upstream");
    if let Some(branch) = branch {
        command.arg("--branch").arg(branch);
    }
    if shallow {
        command.arg("--depth=1").arg("--no-tags");
    }

    let output = command
        .output()
        .with_context(|| format!("failed launching git clone for {source}"))?;
    if !output.status.success() {
        return Err(WrenchError::InvalidRemote {
            app: source.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(())
}
