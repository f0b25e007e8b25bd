use std::io;

use anyhow::{Context, Result};
use wrench_cache::{default_cache_root, AppCache};
use wrench_core::{WorkspaceConfig, WorkspaceContext, WorkspaceLayout, WrenchError};
use wrench_registry::{
    exclude_app, include_app, read_excluded_apps, AppRegistry, AppRequest, GitAppProbe,
    RemoveOptions,
};
use wrench_update::{
    reload_processes, restart_processes, PatchRunner, Reporter, RestartPlan, RestartRequest,
    UpdateOptions, UpdateOrchestrator, UpdateState,
};

use crate::completion::write_completions_script;
use crate::render::{
    format_app_list_lines, format_cache_listing_lines, format_cache_removal_line,
    format_update_report_lines, TerminalPrompt, TerminalRenderer, TerminalReporter,
};
use crate::shell::{ShellInstaller, ShellOps};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Update {
            pull,
            apps,
            patch,
            build,
            requirements,
            restart_supervisor,
            restart_systemd,
            no_backup,
            force,
            reset,
            strict_restart,
        } => {
            let context = current_context()?;
            let layout = require_workspace(&context)?;
            let config = WorkspaceConfig::load(&layout)?;
            let options = UpdateOptions {
                pull,
                patch,
                build,
                requirements,
                backup: !no_backup,
                apps,
                force,
                reset,
                restart: RestartRequest {
                    web_only: false,
                    supervisor: restart_supervisor,
                    systemd: restart_systemd,
                },
                strict_restart,
            };

            let patches = PatchRunner::builtin(config.primary_app());
            let probe = GitAppProbe::new(layout.clone());
            let ops = ShellOps::new(&context, layout.clone(), config, renderer);
            let reporter = TerminalReporter::new(renderer);
            let prompt = TerminalPrompt;
            let mut orchestrator =
                UpdateOrchestrator::new(&layout, &probe, &ops, &reporter, &prompt, &patches);

            match orchestrator.run(options) {
                Ok(report) => {
                    drop(reporter);
                    renderer.print_lines(&format_update_report_lines(&report, renderer.style()));
                }
                Err(err) => {
                    let left_in_maintenance =
                        orchestrator.visited().contains(&UpdateState::MaintenanceOn);
                    drop(reporter);
                    if left_in_maintenance {
                        renderer.print_status(
                            "warn",
                            "workspace is still in maintenance mode; fix the failure and re-run \
                             `wrench update`",
                        );
                    }
                    return Err(err);
                }
            }
        }
        Commands::GetApp { source, branch } => {
            let context = current_context()?;
            let layout = require_workspace(&context)?;
            let config = WorkspaceConfig::load(&layout)?;
            let cache = if config.flag("cache_apps") {
                Some(AppCache::new(default_cache_root()?))
            } else {
                None
            };

            let mut registry = AppRegistry::open(layout.clone(), config.primary_app())?;
            let probe = GitAppProbe::new(layout.clone());
            let ops = ShellOps::new(&context, layout, config, renderer);
            let installer = ShellInstaller::new(&ops, cache);
            let app = registry.add(&installer, &probe, &AppRequest { source, branch })?;
            renderer.print_status("ok", &format!("installed app '{app}'"));
        }
        Commands::RemoveApp {
            app,
            no_backup,
            force,
        } => {
            let context = current_context()?;
            let layout = require_workspace(&context)?;
            let config = WorkspaceConfig::load(&layout)?;

            let mut registry = AppRegistry::open(layout.clone(), config.primary_app())?;
            let probe = GitAppProbe::new(layout.clone());
            let ops = ShellOps::new(&context, layout, config.clone(), renderer);
            let installer = ShellInstaller::new(&ops, None);
            registry.remove(
                &installer,
                &probe,
                &app,
                RemoveOptions { no_backup, force },
            )?;
            renderer.print_status("ok", &format!("removed app '{app}'"));

            let reporter = TerminalReporter::new(renderer);
            reporter.phase_started("Reloading processes");
            reload_processes(&ops, &reporter, &config)?;
            reporter.phase_finished("Processes reloaded");
        }
        Commands::ListApps => {
            let context = current_context()?;
            let layout = require_workspace(&context)?;
            let config = WorkspaceConfig::load(&layout)?;
            let registry = AppRegistry::open(layout.clone(), config.primary_app())?;
            let excluded = read_excluded_apps(&layout)?;
            renderer.print_lines(&format_app_list_lines(
                registry.list(),
                registry.descriptors(),
                &excluded,
                renderer.style(),
            ));
        }
        Commands::ExcludeApp { app } => {
            let context = current_context()?;
            let layout = require_workspace(&context)?;
            let config = WorkspaceConfig::load(&layout)?;
            let registry = AppRegistry::open(layout.clone(), config.primary_app())?;
            if exclude_app(&layout, registry.list(), &app)? {
                renderer.print_status("ok", &format!("excluded app '{app}' from updates"));
            } else {
                renderer.print_status("skip", &format!("app '{app}' is already excluded"));
            }
        }
        Commands::IncludeApp { app } => {
            let context = current_context()?;
            let layout = require_workspace(&context)?;
            if include_app(&layout, &app)? {
                renderer.print_status("ok", &format!("app '{app}' will be updated again"));
            } else {
                renderer.print_status("skip", &format!("app '{app}' was not excluded"));
            }
        }
        Commands::AppCache {
            clear,
            remove_app,
            remove_key,
        } => {
            let cache = AppCache::new(default_cache_root()?);
            let style = renderer.style();
            if clear {
                let freed = cache.clear()?;
                renderer.print_status(
                    "ok",
                    &format!(
                        "cleared {} ({} freed)",
                        cache.root().display(),
                        indicatif::HumanBytes(freed)
                    ),
                );
            } else if remove_app.is_some() || remove_key.is_some() {
                let removal = cache.remove(remove_app.as_deref(), remove_key.as_deref())?;
                println!("{}", format_cache_removal_line(&removal, style));
            } else {
                renderer.print_section(&format!("app cache at {}", cache.root().display()));
                renderer.print_lines(&format_cache_listing_lines(&cache.list()?, style));
            }
        }
        Commands::Restart {
            web,
            supervisor,
            systemd,
        } => {
            let context = current_context()?;
            let layout = require_workspace(&context)?;
            let config = WorkspaceConfig::load(&layout)?;
            let plan = RestartPlan::resolve(
                RestartRequest {
                    web_only: web,
                    supervisor,
                    systemd,
                },
                &config,
            );
            if plan.is_empty() {
                renderer.print_status("skip", "nothing to restart");
                return Ok(());
            }

            let ops = ShellOps::new(&context, layout, config, renderer);
            let reporter = TerminalReporter::new(renderer);
            reporter.phase_started("Restarting processes");
            restart_processes(&ops, &reporter, &plan, true)?;
            reporter.phase_finished("Processes restarted");
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
        }
        Commands::Version => {
            println!("wrench {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn current_context() -> Result<WorkspaceContext> {
    let cwd = std::env::current_dir().context("failed reading current directory")?;
    Ok(WorkspaceContext::new(cwd))
}

fn require_workspace(context: &WorkspaceContext) -> Result<WorkspaceLayout> {
    context.workspace().cloned().ok_or_else(|| {
        WrenchError::validation(format!(
            "not inside a wrench workspace: {}",
            context.cwd().display()
        ))
        .into()
    })
}
