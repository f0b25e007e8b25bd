mod completion;
mod dispatch;
mod render;
mod shell;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use crate::dispatch::run_cli;
use crate::render::{current_output_style, render_status_line};

#[derive(Parser, Debug)]
#[command(name = "wrench")]
#[command(about = "Manage a multi-app workspace: apps, updates and caches", long_about = None)]
pub(crate) struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Back up, pull, migrate and rebuild the workspace
    Update {
        #[arg(long)]
        pull: bool,
        /// Apps to pull, comma or space separated (only used with --pull)
        #[arg(long)]
        apps: Option<String>,
        #[arg(long)]
        patch: bool,
        #[arg(long)]
        build: bool,
        #[arg(long)]
        requirements: bool,
        #[arg(long)]
        restart_supervisor: bool,
        #[arg(long)]
        restart_systemd: bool,
        #[arg(long)]
        no_backup: bool,
        /// Continue across a major version boundary without asking
        #[arg(long)]
        force: bool,
        /// Hard-reset app checkouts onto their remote branches
        #[arg(long)]
        reset: bool,
        /// Fail the update when a process restart fails
        #[arg(long)]
        strict_restart: bool,
    },
    /// Fetch an app into apps/ and register it
    GetApp {
        source: String,
        #[arg(long)]
        branch: Option<String>,
    },
    RemoveApp {
        app: String,
        #[arg(long)]
        no_backup: bool,
        #[arg(long)]
        force: bool,
    },
    ListApps,
    /// Skip an app when sources are pulled
    ExcludeApp { app: String },
    IncludeApp { app: String },
    /// Inspect or prune cached app archives
    AppCache {
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        remove_app: Option<String>,
        #[arg(long)]
        remove_key: Option<String>,
    },
    Restart {
        #[arg(long)]
        web: bool,
        #[arg(long)]
        supervisor: bool,
        #[arg(long)]
        systemd: bool,
    },
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CliCompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

impl From<CliCompletionShell> for Shell {
    fn from(value: CliCompletionShell) -> Self {
        match value {
            CliCompletionShell::Bash => Shell::Bash,
            CliCompletionShell::Zsh => Shell::Zsh,
            CliCompletionShell::Fish => Shell::Fish,
            CliCompletionShell::Powershell => Shell::PowerShell,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run_cli(cli) {
        eprintln!(
            "{}",
            render_status_line(current_output_style(), "error", &format!("{err:#}"))
        );
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "wrench={level},wrench_core={level},wrench_registry={level},wrench_cache={level},wrench_update={level}"
        ))
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests;
