use super::*;
use clap::error::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};
use wrench_cache::{CacheEntry, CacheListing, CacheRemoval};
use wrench_core::{AppDescriptor, DescriptorMap, Resolution, VersionUpgrade};
use wrench_update::{PatchReport, UpdateReport};

use crate::completion::write_completions_script;
use crate::render::{
    format_app_list_lines, format_cache_listing_lines, format_cache_removal_line,
    format_timestamp, format_update_report_lines, is_affirmative, resolve_output_style,
    OutputStyle,
};
use crate::shell::{
    app_name_from_source, has_node_toolchain, parse_systemd_requires, supervisor_groups,
};

fn descriptor(resolution: Resolution, version: Option<&str>) -> AppDescriptor {
    AppDescriptor {
        resolution,
        required: Vec::new(),
        idx: 1,
        version: version.map(str::to_string),
    }
}

fn cache_entry(app: &str, key: &str, size: u64, compressed: bool) -> CacheEntry {
    let extension = if compressed { "tgz" } else { "tar" };
    CacheEntry {
        app: app.to_string(),
        key: key.to_string(),
        file_name: format!("{app}-{key}.{extension}"),
        path: format!("/tmp/{app}-{key}.{extension}").into(),
        size,
        compressed,
        created: None,
        accessed: None,
    }
}

#[test]
fn render_status_line_plain_is_bare_message() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "workspace updated"),
        "workspace updated"
    );
}

#[test]
fn render_status_line_rich_prefixes_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "workspace updated"),
        "[OK] workspace updated"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "backup failed"),
        "[WARN] backup failed"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "error", "boom"),
        "[ERR] boom"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "pulling"),
        "[..] pulling"
    );
}

#[test]
fn output_style_follows_stdout_tty() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
    assert_eq!(resolve_output_style(false, false), OutputStyle::Plain);
}

#[test]
fn affirmative_answers_are_case_insensitive() {
    assert!(is_affirmative("y\n"));
    assert!(is_affirmative("  YES "));
    assert!(!is_affirmative("\n"));
    assert!(!is_affirmative("no"));
    assert!(!is_affirmative("yep"));
}

#[test]
fn timestamps_render_dash_when_unknown() {
    assert_eq!(format_timestamp(None), "-");
    assert_eq!(
        format_timestamp(Some(UNIX_EPOCH + Duration::from_secs(86_400 + 3_661))),
        "1970-01-02 01:01:01"
    );
}

#[test]
fn app_list_lines_show_version_source_and_exclusion() {
    let apps = vec![
        "saashq".to_string(),
        "erpnexus".to_string(),
        "local_app".to_string(),
        "fresh".to_string(),
    ];
    let mut descriptors = DescriptorMap::new();
    descriptors.insert(
        "saashq".to_string(),
        descriptor(
            Resolution::TrackedAt {
                branch: "version-15".to_string(),
                commit_hash: "0123456789abcdef".to_string(),
            },
            Some("15.2.0"),
        ),
    );
    descriptors.insert(
        "erpnexus".to_string(),
        descriptor(
            Resolution::TrackedAt {
                branch: "develop".to_string(),
                commit_hash: "abc".to_string(),
            },
            None,
        ),
    );
    descriptors.insert(
        "local_app".to_string(),
        descriptor(Resolution::NotARepository, Some("0.0.1")),
    );

    let lines = format_app_list_lines(
        &apps,
        &descriptors,
        &["erpnexus".to_string()],
        OutputStyle::Plain,
    );
    assert_eq!(
        lines,
        vec![
            "saashq 15.2.0 version-15 (0123456)".to_string(),
            "erpnexus unknown develop (abc) [excluded]".to_string(),
            "local_app 0.0.1 not a repository".to_string(),
            "fresh unknown untracked".to_string(),
        ]
    );

    let rich = format_app_list_lines(
        &apps[1..2],
        &descriptors,
        &["erpnexus".to_string()],
        OutputStyle::Rich,
    );
    assert_eq!(rich, vec!["[SKIP] erpnexus unknown develop (abc) [excluded]"]);
}

#[test]
fn cache_listing_lines_end_with_total() {
    let listing = CacheListing {
        entries: vec![
            cache_entry("erpnexus", "0123456789", 2048, true),
            cache_entry("payments", "abcdef0123", 512, false),
        ],
        total_size: 2560,
    };

    let lines = format_cache_listing_lines(&listing, OutputStyle::Plain);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("erpnexus key=0123456789 tgz 2.00 KiB"));
    assert!(lines[0].ends_with("created=- accessed=-"));
    assert!(lines[1].starts_with("payments key=abcdef0123 tar 512 B"));
    assert_eq!(lines[2], "2 cached archive(s), 2.50 KiB total");
}

#[test]
fn cache_listing_lines_report_empty_cache() {
    let lines = format_cache_listing_lines(&CacheListing::default(), OutputStyle::Plain);
    assert_eq!(lines, vec!["0 cached archive(s), 0 B total"]);
}

#[test]
fn cache_removal_line_counts_files_and_bytes() {
    let removal = CacheRemoval {
        removed: vec![
            "erpnexus-0123456789.tgz".to_string(),
            "erpnexus-abcdef0123.tar".to_string(),
        ],
        freed_bytes: 1024,
    };
    assert_eq!(
        format_cache_removal_line(&removal, OutputStyle::Rich),
        "[OK] removed 2 cached archive(s), freed 1.00 KiB"
    );
}

#[test]
fn update_report_lines_list_patches_and_warnings() {
    let report = UpdateReport {
        upgrade: VersionUpgrade::between(Some("14.1.0"), Some("15.0.0")),
        patches: PatchReport {
            applied: vec!["v5.update_archived_sites".to_string()],
            skipped: Vec::new(),
        },
        apps: vec!["saashq".to_string(), "erpnexus".to_string()],
        restart_warnings: vec!["supervisor restart failed: exit 1".to_string()],
        ..UpdateReport::default()
    };

    let lines = format_update_report_lines(&report, OutputStyle::Plain);
    assert_eq!(
        lines,
        vec![
            "applied patch v5.update_archived_sites".to_string(),
            "supervisor restart failed: exit 1".to_string(),
            "upgraded 14.1.0 -> 15.0.0".to_string(),
            "workspace updated (2 app(s))".to_string(),
        ]
    );
}

#[test]
fn supervisor_groups_prefer_split_web_and_workers() {
    let status = "\
wrench-web:wrench-saashq-web            RUNNING   pid 10, uptime 1:00:00
wrench-workers:wrench-saashq-schedule   RUNNING   pid 11, uptime 1:00:00
";
    assert_eq!(
        supervisor_groups(status, "wrench", false),
        vec!["wrench-web:", "wrench-workers:"]
    );
    assert_eq!(supervisor_groups(status, "wrench", true), vec!["wrench-web:"]);
}

#[test]
fn supervisor_groups_fall_back_to_processes_then_default() {
    let status = "wrench-processes:wrench-saashq-web   RUNNING   pid 10\n";
    assert_eq!(
        supervisor_groups(status, "wrench", false),
        vec!["wrench-processes:"]
    );
    assert_eq!(
        supervisor_groups(status, "wrench", true),
        vec!["wrench-processes:"]
    );
    assert_eq!(supervisor_groups("", "wrench", false), vec!["saashq:"]);
}

#[test]
fn systemd_requires_lists_every_unit() {
    let output = "Requires=wrench-web.target wrench-workers.target\n";
    assert_eq!(
        parse_systemd_requires(output),
        vec!["wrench-web.target", "wrench-workers.target"]
    );
    assert!(parse_systemd_requires("Requires=\n").is_empty());
    assert!(parse_systemd_requires("").is_empty());
}

#[test]
fn node_toolchain_accepts_any_of_its_commands() {
    assert!(has_node_toolchain(|cmd: &str| {
        (cmd == "nodejs").then(|| PathBuf::from("/usr/bin/nodejs"))
    }));
    assert!(!has_node_toolchain(|_: &str| None));
}

#[cfg(unix)]
#[test]
fn node_toolchain_ignores_non_executable_files() {
    use std::os::unix::fs::PermissionsExt;

    let dir = std::env::temp_dir().join(format!(
        "wrench-cli-path-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("must read time")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("must create dir");
    let node = dir.join("node");
    std::fs::write(&node, "#!/bin/sh\n").expect("must write node");
    std::fs::set_permissions(&node, std::fs::Permissions::from_mode(0o644))
        .expect("must clear exec bit");

    let lookup = |cmd: &str| which::which_in(cmd, Some(&dir), &dir).ok();
    assert!(!has_node_toolchain(lookup));

    std::fs::set_permissions(&node, std::fs::Permissions::from_mode(0o755))
        .expect("must set exec bit");
    assert!(has_node_toolchain(lookup));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn app_name_is_derived_from_source() {
    let cases = [
        ("https://github.com/saashq/erpnexus", "erpnexus"),
        ("https://github.com/saashq/erpnexus.git", "erpnexus"),
        ("git@github.com:saashq/payments.git", "payments"),
        ("git@host:hrms", "hrms"),
        ("/srv/sources/local_app/", "local_app"),
        ("local_app", "local_app"),
    ];
    for (source, expected) in cases {
        assert_eq!(
            app_name_from_source(source).expect("must derive app name"),
            expected,
            "source: {source}"
        );
    }
}

#[test]
fn app_name_rejects_empty_sources() {
    let err = app_name_from_source("https://github.com/saashq/.git")
        .expect_err("dotfile-only name must be rejected");
    assert!(wrench_core::WrenchError::find(&err).is_some_and(|err| err.is_validation()));
    assert!(app_name_from_source("  ").is_err());
}

#[test]
fn cli_parses_update_flags() {
    let cli = Cli::try_parse_from([
        "wrench",
        "update",
        "--pull",
        "--apps",
        "erpnexus,payments",
        "--no-backup",
        "--reset",
        "--strict-restart",
    ])
    .expect("must parse update");

    match cli.command {
        Commands::Update {
            pull,
            apps,
            patch,
            no_backup,
            reset,
            strict_restart,
            force,
            ..
        } => {
            assert!(pull);
            assert_eq!(apps.as_deref(), Some("erpnexus,payments"));
            assert!(!patch);
            assert!(no_backup);
            assert!(reset);
            assert!(strict_restart);
            assert!(!force);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_counts_global_verbose_flags() {
    let cli = Cli::try_parse_from(["wrench", "list-apps", "-vv"]).expect("must parse list-apps");
    assert_eq!(cli.verbose, 2);
    assert!(matches!(cli.command, Commands::ListApps));
}

#[test]
fn cli_parses_app_cache_filters() {
    let cli = Cli::try_parse_from(["wrench", "app-cache", "--remove-key", "0123456789abcdef"])
        .expect("must parse app-cache");
    match cli.command {
        Commands::AppCache {
            clear,
            remove_app,
            remove_key,
        } => {
            assert!(!clear);
            assert_eq!(remove_app, None);
            assert_eq!(remove_key.as_deref(), Some("0123456789abcdef"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_requires_app_for_remove() {
    let err = Cli::try_parse_from(["wrench", "remove-app"]).expect_err("app is required");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn cli_rejects_unknown_completion_shell() {
    let err = Cli::try_parse_from(["wrench", "completions", "tcsh"])
        .expect_err("tcsh is not supported");
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

#[test]
fn completions_are_generated_for_every_shell() {
    for shell in [
        CliCompletionShell::Bash,
        CliCompletionShell::Zsh,
        CliCompletionShell::Fish,
        CliCompletionShell::Powershell,
    ] {
        let mut output = Vec::new();
        write_completions_script(shell, &mut output).expect("must write completions");
        let script = String::from_utf8(output).expect("must be utf-8");
        assert!(script.contains("wrench"), "{shell:?} script names the binary");
        assert!(script.contains("get-app"), "{shell:?} script lists subcommands");
    }
}
