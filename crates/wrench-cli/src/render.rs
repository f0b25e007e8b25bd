use std::cell::RefCell;
use std::io::{self, BufRead, IsTerminal, Write};
use std::time::{Duration, Instant, SystemTime};

use anstyle::{AnsiColor, Effects, Style};
use anyhow::{Context, Result};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use time::macros::format_description;
use time::OffsetDateTime;
use wrench_cache::{CacheListing, CacheRemoval};
use wrench_core::{DescriptorMap, Resolution};
use wrench_update::{Prompt, Reporter, UpdateReport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(io::stdout().is_terminal(), io::stderr().is_terminal())
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "error" => "[ERR]",
        "skip" => "[SKIP]",
        _ => "[..]",
    }
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "error" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        match self.style {
            OutputStyle::Plain => println!("{message}"),
            OutputStyle::Rich => println!(
                "{} {message}",
                colorize(badge_style(status), status_badge(status))
            ),
        }
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", colorize(section_style(), &format!("== {title} ==")));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

struct ActivePhase {
    title: String,
    started_at: Instant,
    spinner: Option<ProgressBar>,
}

/// Prints phase progress, with a spinner per phase on a terminal.
pub(crate) struct TerminalReporter {
    renderer: TerminalRenderer,
    active: RefCell<Option<ActivePhase>>,
}

impl TerminalReporter {
    pub(crate) fn new(renderer: TerminalRenderer) -> Self {
        Self {
            renderer,
            active: RefCell::new(None),
        }
    }

    fn print_around_spinner(&self, status: &str, message: &str) {
        let active = self.active.borrow();
        match active.as_ref().and_then(|phase| phase.spinner.as_ref()) {
            Some(spinner) => spinner.suspend(|| self.renderer.print_status(status, message)),
            None => self.renderer.print_status(status, message),
        }
    }
}

impl Reporter for TerminalReporter {
    fn phase_started(&self, title: &str) {
        let spinner = if self.renderer.style() == OutputStyle::Rich {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}")
            {
                spinner.set_style(style.tick_chars("|/-\\ "));
            }
            spinner.set_message(title.to_string());
            spinner.enable_steady_tick(Duration::from_millis(80));
            Some(spinner)
        } else {
            self.renderer.print_status("step", &format!("{title}..."));
            None
        };

        *self.active.borrow_mut() = Some(ActivePhase {
            title: title.to_string(),
            started_at: Instant::now(),
            spinner,
        });
    }

    fn phase_finished(&self, title: &str) {
        let phase = self.active.borrow_mut().take();
        let elapsed = match phase {
            Some(phase) => {
                if let Some(spinner) = phase.spinner {
                    spinner.finish_and_clear();
                }
                tracing::debug!(phase = %phase.title, "phase finished");
                Some(phase.started_at.elapsed())
            }
            None => None,
        };

        let message = match elapsed {
            Some(elapsed) if self.renderer.style() == OutputStyle::Rich => {
                format!("{title} in {}", format_elapsed(elapsed))
            }
            _ => title.to_string(),
        };
        self.renderer.print_status("ok", &message);
    }

    fn info(&self, message: &str) {
        self.print_around_spinner("step", message);
    }

    fn warn(&self, message: &str) {
        self.print_around_spinner("warn", message);
    }
}

impl Drop for TerminalReporter {
    fn drop(&mut self) {
        if let Some(spinner) = self
            .active
            .get_mut()
            .take()
            .and_then(|phase| phase.spinner)
        {
            spinner.abandon();
        }
    }
}

/// Reads answers from stdin; the pause is a plain sleep the operator can Ctrl+C out of.
pub(crate) struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        print!("{message} [y/N]: ");
        io::stdout().flush().context("failed flushing prompt")?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed reading confirmation")?;
        Ok(is_affirmative(&answer))
    }

    fn pause(&self, seconds: u64) -> Result<()> {
        println!("continuing in {seconds} seconds, press Ctrl+C to cancel");
        std::thread::sleep(Duration::from_secs(seconds));
        Ok(())
    }
}

pub(crate) fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub(crate) fn format_timestamp(value: Option<SystemTime>) -> String {
    let Some(value) = value else {
        return "-".to_string();
    };
    OffsetDateTime::from(value)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| "-".to_string())
}

pub(crate) fn format_app_list_lines(
    apps: &[String],
    descriptors: &DescriptorMap,
    excluded: &[String],
    style: OutputStyle,
) -> Vec<String> {
    apps.iter()
        .map(|app| {
            let descriptor = descriptors.get(app);
            let version = descriptor
                .and_then(|descriptor| descriptor.version.as_deref())
                .unwrap_or("unknown");
            let source = match descriptor.map(|descriptor| &descriptor.resolution) {
                Some(Resolution::TrackedAt {
                    branch,
                    commit_hash,
                }) => {
                    let short = commit_hash.get(..7).unwrap_or(commit_hash);
                    format!("{branch} ({short})")
                }
                Some(Resolution::NotARepository) => "not a repository".to_string(),
                None => "untracked".to_string(),
            };
            let is_excluded = excluded.contains(app);
            let suffix = if is_excluded { " [excluded]" } else { "" };
            let status = if is_excluded { "skip" } else { "ok" };
            render_status_line(style, status, &format!("{app} {version} {source}{suffix}"))
        })
        .collect()
}

pub(crate) fn format_cache_listing_lines(listing: &CacheListing, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::with_capacity(listing.entries.len() + 1);
    for entry in &listing.entries {
        let kind = if entry.compressed { "tgz" } else { "tar" };
        lines.push(render_status_line(
            style,
            "step",
            &format!(
                "{} key={} {} {} created={} accessed={}",
                entry.app,
                entry.key,
                kind,
                HumanBytes(entry.size),
                format_timestamp(entry.created),
                format_timestamp(entry.accessed)
            ),
        ));
    }
    lines.push(render_status_line(
        style,
        "ok",
        &format!(
            "{} cached archive(s), {} total",
            listing.entries.len(),
            HumanBytes(listing.total_size)
        ),
    ));
    lines
}

pub(crate) fn format_cache_removal_line(removal: &CacheRemoval, style: OutputStyle) -> String {
    render_status_line(
        style,
        "ok",
        &format!(
            "removed {} cached archive(s), freed {}",
            removal.removed.len(),
            HumanBytes(removal.freed_bytes)
        ),
    )
}

pub(crate) fn format_update_report_lines(report: &UpdateReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    for id in &report.patches.applied {
        lines.push(render_status_line(style, "ok", &format!("applied patch {id}")));
    }
    for id in &report.patches.skipped {
        lines.push(render_status_line(
            style,
            "skip",
            &format!("patch {id} deferred to a later run"),
        ));
    }
    for warning in &report.restart_warnings {
        lines.push(render_status_line(style, "warn", warning));
    }
    if report.upgrade.is_major {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("upgraded {}", report.upgrade.describe()),
        ));
    }
    lines.push(render_status_line(
        style,
        "ok",
        &format!("workspace updated ({} app(s))", report.apps.len()),
    ));
    lines
}
