use super::*;
use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use wrench_core::{Resolution, WorkspaceLayout, WrenchError};

static TEST_WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct FakeProbe {
    versions: HashMap<String, String>,
    tracked: HashMap<String, (String, String)>,
}

impl FakeProbe {
    fn with_version(mut self, app: &str, version: &str) -> Self {
        self.versions.insert(app.to_string(), version.to_string());
        self
    }

    fn with_tracked(mut self, app: &str, branch: &str, commit: &str) -> Self {
        self.tracked
            .insert(app.to_string(), (branch.to_string(), commit.to_string()));
        self
    }

    fn app_of(app_dir: &Path) -> String {
        app_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl AppProbe for FakeProbe {
    fn current_version(&self, app: &str) -> Result<Option<String>> {
        Ok(self.versions.get(app).cloned())
    }

    fn upstream_version(&self, _app: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn is_repository(&self, app_dir: &Path) -> bool {
        self.tracked.contains_key(&Self::app_of(app_dir))
    }

    fn current_branch(&self, app_dir: &Path, _app: &str) -> Result<String> {
        Ok(self.tracked[&Self::app_of(app_dir)].0.clone())
    }

    fn commit_hash(&self, app_dir: &Path, reference: &str, _app: &str) -> Result<String> {
        let (_, commit) = &self.tracked[&Self::app_of(app_dir)];
        Ok(format!("{commit}@{reference}"))
    }
}

struct FakeInstaller {
    layout: WorkspaceLayout,
    sites_using: Vec<String>,
    remote_failure: bool,
    calls: RefCell<Vec<String>>,
}

impl FakeInstaller {
    fn new(layout: &WorkspaceLayout) -> Self {
        Self {
            layout: layout.clone(),
            sites_using: Vec::new(),
            remote_failure: false,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl AppInstaller for FakeInstaller {
    fn fetch(&self, request: &AppRequest) -> Result<String> {
        self.calls.borrow_mut().push(format!("fetch:{}", request.source));
        make_app(&self.layout, &request.source);
        Ok(request.source.clone())
    }

    fn install(&self, app: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("install:{app}"));
        Ok(())
    }

    fn uninstall(&self, app: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("uninstall:{app}"));
        Ok(())
    }

    fn remove(&self, app: &str, _no_backup: bool) -> Result<()> {
        self.calls.borrow_mut().push(format!("remove:{app}"));
        if self.remote_failure {
            return Err(WrenchError::InvalidRemote {
                app: app.to_string(),
                message: "no git remote configured".to_string(),
            }
            .into());
        }
        fs::remove_dir_all(self.layout.app_dir(app))?;
        Ok(())
    }

    fn sites_using(&self, _app: &str) -> Result<Vec<String>> {
        Ok(self.sites_using.clone())
    }
}

#[test]
fn list_pins_primary_first_regardless_of_name_order() {
    let layout = test_workspace(&["alpha", "saashq", "zeta"]);
    let registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    assert_eq!(registry.list(), ["saashq", "alpha", "zeta"]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn list_keeps_persisted_order_and_appends_new_apps_sorted() {
    let layout = test_workspace(&["saashq", "payments", "crm", "hrms", "blog"]);
    fs::write(layout.apps_list_path(), "saashq\npayments\ncrm\ngone").expect("must seed list");

    let registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    assert_eq!(registry.list(), ["saashq", "payments", "crm", "blog", "hrms"]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn directories_without_hooks_are_not_apps() {
    let layout = test_workspace(&["saashq"]);
    fs::create_dir_all(layout.app_dir("node_modules")).expect("must create dir");

    let registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    assert_eq!(registry.list(), ["saashq"]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn sync_writes_primary_first_and_matching_descriptor_keys() {
    let layout = test_workspace(&["crm", "saashq", "blog"]);
    let probe = FakeProbe::default();
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");

    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");

    let list = fs::read_to_string(layout.apps_list_path()).expect("must read list");
    assert_eq!(list.lines().next(), Some("saashq"));

    let persisted = read_descriptors(&layout).expect("must read descriptors");
    let keys = persisted.keys().cloned().collect::<Vec<_>>();
    let mut apps = registry.list().to_vec();
    apps.sort();
    assert_eq!(keys, apps);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn sync_bootstraps_descriptor_indices_in_registry_order() {
    let layout = test_workspace(&["saashq", "a", "b"]);
    let probe = FakeProbe::default()
        .with_version("saashq", "14.2.0")
        .with_version("a", "1.0.0")
        .with_version("b", "2.0.0")
        .with_tracked("saashq", "version-14", "deadbeef");
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    assert!(!layout.descriptors_path().exists());

    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");

    let descriptors = registry.descriptors();
    assert_eq!(descriptors["saashq"].idx, 1);
    assert_eq!(descriptors["a"].idx, 2);
    assert_eq!(descriptors["b"].idx, 3);
    assert_eq!(descriptors["saashq"].version.as_deref(), Some("14.2.0"));
    assert_eq!(descriptors["b"].version.as_deref(), Some("2.0.0"));
    assert_eq!(
        descriptors["saashq"].resolution,
        Resolution::TrackedAt {
            branch: "version-14".to_string(),
            commit_hash: "deadbeef@version-14".to_string(),
        }
    );
    assert_eq!(descriptors["a"].resolution, Resolution::NotARepository);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn sync_is_idempotent_on_disk() {
    let layout = test_workspace(&["saashq", "crm", "blog"]);
    let probe = FakeProbe::default()
        .with_version("saashq", "15.0.0-dev")
        .with_tracked("crm", "develop", "cafe");
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");

    registry
        .sync(&probe, &SyncRequest::default())
        .expect("first sync");
    let list_first = fs::read(layout.apps_list_path()).expect("must read list");
    let descriptors_first = fs::read(layout.descriptors_path()).expect("must read descriptors");

    let mut reopened = AppRegistry::open(layout.clone(), "saashq").expect("must reopen");
    reopened
        .sync(&probe, &SyncRequest::default())
        .expect("second sync");
    assert_eq!(
        fs::read(layout.apps_list_path()).expect("must read list"),
        list_first
    );
    assert_eq!(
        fs::read(layout.descriptors_path()).expect("must read descriptors"),
        descriptors_first
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn sync_prunes_descriptors_of_apps_gone_from_disk() {
    let layout = test_workspace(&["saashq", "crm"]);
    let probe = FakeProbe::default();
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");
    assert!(registry.descriptors().contains_key("crm"));

    fs::remove_dir_all(layout.app_dir("crm")).expect("must delete app");
    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");

    assert_eq!(registry.list(), ["saashq"]);
    assert!(!registry.descriptors().contains_key("crm"));
    let persisted = read_descriptors(&layout).expect("must read descriptors");
    assert_eq!(persisted.len(), 1);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn sync_named_app_gets_next_index_and_supplied_branch() {
    let layout = test_workspace(&["saashq"]);
    let probe = FakeProbe::default()
        .with_version("payments", "0.3.0")
        .with_tracked("payments", "develop", "beef");
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");

    make_app(&layout, "payments");
    registry
        .sync(
            &probe,
            &SyncRequest {
                app_name: Some("payments".to_string()),
                branch: Some("version-15".to_string()),
                required: vec!["saashq".to_string()],
                ..SyncRequest::default()
            },
        )
        .expect("must sync named app");

    let descriptor = &registry.descriptors()["payments"];
    assert_eq!(descriptor.idx, 2);
    assert_eq!(descriptor.required, vec!["saashq".to_string()]);
    assert_eq!(descriptor.resolution.branch(), Some("version-15"));
    assert_eq!(descriptor.resolution.commit_hash(), Some("beef@version-15"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn sync_rewrites_legacy_descriptor_shapes_in_tagged_form() {
    let layout = test_workspace(&["saashq"]);
    fs::write(
        layout.descriptors_path(),
        r#"{"saashq": {"is_repo": false, "resolution": "not a repo", "required": [], "idx": 1, "version": "14.0.0"}}"#,
    )
    .expect("must seed legacy descriptors");

    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    registry
        .sync(&FakeProbe::default(), &SyncRequest::default())
        .expect("must sync");

    let raw = fs::read_to_string(layout.descriptors_path()).expect("must read descriptors");
    assert!(raw.contains("\"kind\": \"not-a-repository\""));
    assert!(!raw.contains("is_repo"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn add_appends_after_existing_apps() {
    let layout = test_workspace(&["saashq", "zeta"]);
    let probe = FakeProbe::default();
    let installer = FakeInstaller::new(&layout);
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");

    let app = registry
        .add(
            &installer,
            &probe,
            &AppRequest {
                source: "alpha".to_string(),
                branch: None,
            },
        )
        .expect("must add");

    assert_eq!(app, "alpha");
    assert_eq!(registry.list(), ["saashq", "zeta", "alpha"]);
    assert_eq!(registry.descriptors()["alpha"].idx, 3);
    assert_eq!(
        installer.calls.borrow().as_slice(),
        ["fetch:alpha", "install:alpha"]
    );
    let list = fs::read_to_string(layout.apps_list_path()).expect("must read list");
    assert_eq!(list, "saashq\nzeta\nalpha");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn remove_unknown_app_fails_without_touching_files() {
    let layout = test_workspace(&["saashq", "crm"]);
    let probe = FakeProbe::default();
    let installer = FakeInstaller::new(&layout);
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");
    let list_before = fs::read(layout.apps_list_path()).expect("must read list");
    let descriptors_before = fs::read(layout.descriptors_path()).expect("must read descriptors");

    let err = registry
        .remove(&installer, &probe, "ghost", RemoveOptions::default())
        .expect_err("must reject unknown app");
    assert_eq!(
        err.downcast_ref::<WrenchError>(),
        Some(&WrenchError::app_not_installed("ghost"))
    );
    assert!(installer.calls.borrow().is_empty());
    assert_eq!(
        fs::read(layout.apps_list_path()).expect("must read list"),
        list_before
    );
    assert_eq!(
        fs::read(layout.descriptors_path()).expect("must read descriptors"),
        descriptors_before
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn remove_refuses_primary_and_apps_in_use() {
    let layout = test_workspace(&["saashq", "crm"]);
    let probe = FakeProbe::default();
    let mut installer = FakeInstaller::new(&layout);
    installer.sites_using = vec!["site1.local".to_string()];
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");

    let err = registry
        .remove(&installer, &probe, "saashq", RemoveOptions::default())
        .expect_err("must refuse primary");
    assert!(WrenchError::find(&err).is_some_and(WrenchError::is_validation));

    let err = registry
        .remove(&installer, &probe, "crm", RemoveOptions::default())
        .expect_err("must refuse app in use");
    assert!(err.to_string().contains("site1.local"));
    assert!(installer.calls.borrow().is_empty());

    registry
        .remove(
            &installer,
            &probe,
            "crm",
            RemoveOptions {
                force: true,
                ..RemoveOptions::default()
            },
        )
        .expect("forced removal must proceed");
    assert_eq!(registry.list(), ["saashq"]);
    assert!(!registry.descriptors().contains_key("crm"));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn remove_drops_list_entry_and_descriptor() {
    let layout = test_workspace(&["saashq", "crm", "blog"]);
    let probe = FakeProbe::default();
    let installer = FakeInstaller::new(&layout);
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");

    registry
        .remove(&installer, &probe, "crm", RemoveOptions::default())
        .expect("must remove");

    assert_eq!(
        installer.calls.borrow().as_slice(),
        ["uninstall:crm", "remove:crm"]
    );
    assert_eq!(
        fs::read_to_string(layout.apps_list_path()).expect("must read list"),
        "saashq\nblog"
    );
    let persisted = read_descriptors(&layout).expect("must read descriptors");
    assert!(!persisted.contains_key("crm"));
    assert_eq!(persisted.len(), 2);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn forced_remove_deletes_app_when_remote_is_invalid() {
    let layout = test_workspace(&["saashq", "crm"]);
    let probe = FakeProbe::default();
    let mut installer = FakeInstaller::new(&layout);
    installer.remote_failure = true;
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");
    registry
        .sync(&probe, &SyncRequest::default())
        .expect("must sync");

    registry
        .remove(
            &installer,
            &probe,
            "crm",
            RemoveOptions {
                no_backup: false,
                force: true,
            },
        )
        .expect("forced removal must succeed");

    assert!(!layout.app_dir("crm").exists());
    assert_eq!(registry.list(), ["saashq"]);
    let persisted = read_descriptors(&layout).expect("must read descriptors");
    assert_eq!(persisted.keys().collect::<Vec<_>>(), ["saashq"]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn unforced_remove_keeps_app_when_remote_is_invalid() {
    let layout = test_workspace(&["saashq", "crm"]);
    let probe = FakeProbe::default();
    let mut installer = FakeInstaller::new(&layout);
    installer.remote_failure = true;
    let mut registry = AppRegistry::open(layout.clone(), "saashq").expect("must open");

    let err = registry
        .remove(&installer, &probe, "crm", RemoveOptions::default())
        .expect_err("remote failure must surface");
    assert!(matches!(
        WrenchError::find(&err),
        Some(WrenchError::InvalidRemote { .. })
    ));
    assert!(layout.app_dir("crm").exists());
    assert_eq!(registry.list(), ["saashq", "crm"]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn exclude_and_include_round_trip() {
    let layout = test_workspace(&["saashq", "crm"]);
    let registered = vec!["saashq".to_string(), "crm".to_string()];

    assert!(exclude_app(&layout, &registered, "crm").expect("must exclude"));
    assert!(!exclude_app(&layout, &registered, "crm").expect("second exclude is a no-op"));
    assert_eq!(
        read_excluded_apps(&layout).expect("must read"),
        vec!["crm".to_string()]
    );

    let err = exclude_app(&layout, &registered, "ghost").expect_err("must reject unknown app");
    assert!(err.to_string().contains("no app named ghost"));

    assert!(include_app(&layout, "crm").expect("must include"));
    assert!(!include_app(&layout, "crm").expect("second include is a no-op"));
    assert!(read_excluded_apps(&layout).expect("must read").is_empty());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn git_probe_treats_plain_directory_as_not_a_repository() {
    let layout = test_workspace(&["saashq"]);
    let probe = GitAppProbe::new(layout.clone());

    let resolution = probe
        .resolve(&layout.app_dir("saashq"), "saashq", None)
        .expect("must resolve");
    assert_eq!(resolution, Resolution::NotARepository);
    assert!(probe
        .upstream_version("saashq")
        .expect("must not fail")
        .is_none());

    let _ = fs::remove_dir_all(layout.root());
}

fn make_app(layout: &WorkspaceLayout, app: &str) {
    let module_dir = layout.app_module_dir(app);
    fs::create_dir_all(&module_dir).expect("must create app module dir");
    fs::write(module_dir.join("hooks.py"), "app_name = \"x\"\n").expect("must write hooks");
}

fn test_workspace(apps: &[&str]) -> WorkspaceLayout {
    let layout = WorkspaceLayout::new(test_workspace_root());
    layout.ensure_base_dirs().expect("must create workspace dirs");
    for app in apps {
        make_app(&layout, app);
    }
    layout
}

fn test_workspace_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_WORKSPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    path.push(format!(
        "wrench-registry-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    path
}
