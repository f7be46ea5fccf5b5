use async_trait::async_trait;
use plugin_host_core::host::{InMemoryCommandRegistry, SqliteStorage};
use plugin_host_core::{
    Capability, HighRiskConfirmer, HostServices, LifecycleError, LoadedModule, ManagerOptions,
    ModuleExports, Plugin, PluginContext, PluginManager, PluginStatus, RegistryModuleLoader,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Events = Arc<Mutex<Vec<String>>>;

struct Fixture {
    root: TempDir,
    data: TempDir,
    loader: Arc<RegistryModuleLoader>,
    commands: Arc<InMemoryCommandRegistry>,
    events: Events,
}

impl Fixture {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("plugin root"),
            data: tempfile::tempdir().expect("data root"),
            loader: Arc::new(RegistryModuleLoader::new()),
            commands: Arc::new(InMemoryCommandRegistry::new()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Writes `<root>/<id>/package.json` and returns the code entry path.
    fn add_package(&self, id: &str, permissions: &[&str]) -> PathBuf {
        let dir = self.root.path().join(id);
        std::fs::create_dir_all(&dir).expect("package dir");
        let metadata = json!({
            "name": id,
            "version": "1.2.3",
            "extension": {
                "displayName": format!("Plugin {id}"),
                "description": format!("{id} for tests"),
                "permissions": permissions,
                "entry": {"main": "./index.js"}
            }
        });
        std::fs::write(dir.join("package.json"), metadata.to_string()).expect("metadata");
        dir.join("index.js")
    }

    fn add_healthy(&self, id: &str) {
        let entry = self.add_package(id, &[]);
        let exports = recording_exports(id, &self.events);
        self.loader
            .register(entry, move || Ok(LoadedModule::Direct(exports.clone())));
    }

    fn add_failing(&self, id: &str) {
        let entry = self.add_package(id, &[]);
        let exports = ModuleExports::new()
            .with_name(id)
            .on_activate(|_context| async { Err::<(), _>(anyhow::anyhow!("database offline")) });
        self.loader
            .register(entry, move || Ok(LoadedModule::Direct(exports.clone())));
    }

    fn manager(&self) -> PluginManager {
        self.manager_with(ManagerOptions::new(self.data.path()))
    }

    fn manager_with(&self, options: ManagerOptions) -> PluginManager {
        let storage = Arc::new(SqliteStorage::in_memory().expect("in-memory storage"));
        let mut services = HostServices::local(storage);
        services.commands = self.commands.clone();
        PluginManager::new(self.loader.clone(), services, options)
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }
}

fn recording_exports(id: &str, events: &Events) -> ModuleExports {
    let (activate_id, deactivate_id) = (id.to_string(), id.to_string());
    let (activate_events, deactivate_events) = (Arc::clone(events), Arc::clone(events));
    ModuleExports::new()
        .with_name(id)
        .on_activate(move |_context| {
            let (id, events) = (activate_id.clone(), Arc::clone(&activate_events));
            async move {
                events.lock().expect("events lock").push(format!("activate:{id}"));
                anyhow::Ok(())
            }
        })
        .on_deactivate(move || {
            let (id, events) = (deactivate_id.clone(), Arc::clone(&deactivate_events));
            async move {
                events
                    .lock()
                    .expect("events lock")
                    .push(format!("deactivate:{id}"));
                anyhow::Ok(())
            }
        })
}

fn explode() -> anyhow::Result<()> {
    panic!("activation exploded")
}

#[tokio::test]
async fn failing_plugin_does_not_affect_healthy_sibling_in_either_order() {
    for (first, second) in [("a-broken", "b-healthy"), ("a-healthy", "b-broken")] {
        let fixture = Fixture::new();
        for id in [first, second] {
            if id.ends_with("broken") {
                fixture.add_failing(id);
            } else {
                fixture.add_healthy(id);
            }
        }
        let manager = fixture.manager();

        let report = manager
            .load_all(&[fixture.root.path()])
            .await
            .expect("load_all never fails for plugin errors");

        let (broken, healthy) = if first.ends_with("broken") {
            (first, second)
        } else {
            (second, first)
        };
        assert_eq!(report.activated, vec![healthy.to_string()]);
        assert_eq!(report.failed, vec![broken.to_string()]);
        assert_eq!(manager.plugin_status(healthy), Some(PluginStatus::Active));
        assert_eq!(manager.plugin_status(broken), Some(PluginStatus::Error));

        let item = manager
            .plugin_list()
            .into_iter()
            .find(|item| item.id == broken)
            .expect("broken plugin is listed");
        let error = item.error.expect("error is recorded");
        assert!(error.contains("database offline"), "{error}");
    }
}

#[tokio::test]
async fn plugin_list_reports_descriptor_fields() {
    let fixture = Fixture::new();
    let entry = fixture.add_package("notes", &["fs:read", "notification"]);
    let exports = recording_exports("notes", &fixture.events);
    fixture
        .loader
        .register(entry, move || Ok(LoadedModule::Direct(exports.clone())));
    let manager = fixture.manager();
    manager.load_all(&[fixture.root.path()]).await.expect("load");

    let list = manager.plugin_list();
    assert_eq!(list.len(), 1);
    let item = &list[0];
    assert_eq!(item.id, "notes");
    assert_eq!(item.name, "Plugin notes");
    assert_eq!(item.version, "1.2.3");
    assert_eq!(item.description.as_deref(), Some("notes for tests"));
    assert_eq!(item.status, PluginStatus::Active);
    assert_eq!(
        item.permissions,
        vec![Capability::FsRead, Capability::Notification]
    );
    assert!(!item.has_ui);
    assert_eq!(item.error, None);
    assert!(fixture.data.path().join("notes").is_dir());
}

#[tokio::test]
async fn disable_then_enable_restores_active() {
    let fixture = Fixture::new();
    fixture.add_healthy("notes");
    let manager = fixture.manager();
    manager.load_all(&[fixture.root.path()]).await.expect("load");

    let context = manager.plugin_context("notes").expect("active plugin has a context");
    assert_eq!(context.identity().id, "notes");
    assert_eq!(context.identity().version, "1.2.3");

    manager.disable_plugin("notes").await.expect("disable");
    assert_eq!(manager.plugin_status("notes"), Some(PluginStatus::Disabled));
    assert!(manager.plugin_context("notes").is_none());

    manager.enable_plugin("notes").await.expect("enable");
    assert_eq!(manager.plugin_status("notes"), Some(PluginStatus::Active));
    assert!(manager.plugin_context("notes").is_some());
    assert_eq!(
        fixture.events(),
        ["activate:notes", "deactivate:notes", "activate:notes"]
    );
}

#[tokio::test]
async fn disabling_a_disabled_plugin_does_not_deactivate_twice() {
    let fixture = Fixture::new();
    fixture.add_healthy("notes");
    let manager = fixture.manager();
    manager.load_all(&[fixture.root.path()]).await.expect("load");

    manager.disable_plugin("notes").await.expect("disable");
    manager.disable_plugin("notes").await.expect("disable again");
    assert_eq!(fixture.events(), ["activate:notes", "deactivate:notes"]);
}

#[tokio::test]
async fn shutdown_deactivates_in_reverse_order_once() {
    let fixture = Fixture::new();
    for id in ["alpha", "beta", "gamma"] {
        fixture.add_healthy(id);
    }
    fixture.add_failing("delta");
    let manager = fixture.manager();
    manager.load_all(&[fixture.root.path()]).await.expect("load");
    manager.disable_plugin("beta").await.expect("disable beta");

    manager.shutdown().await;
    manager.shutdown().await;

    assert_eq!(
        fixture.events(),
        [
            "activate:alpha",
            "activate:beta",
            "activate:gamma",
            "deactivate:beta",
            "deactivate:gamma",
            "deactivate:alpha",
        ]
    );
    assert!(manager
        .plugin_list()
        .iter()
        .all(|item| item.status == PluginStatus::Unloaded));
}

#[tokio::test]
async fn administrative_calls_after_shutdown_are_rejected() {
    let fixture = Fixture::new();
    fixture.add_healthy("notes");
    let manager = fixture.manager();
    manager.load_all(&[fixture.root.path()]).await.expect("load");
    manager.shutdown().await;

    assert_eq!(
        manager.enable_plugin("notes").await,
        Err(LifecycleError::ShutDown("notes".to_string()))
    );
    assert_eq!(
        manager.disable_plugin("notes").await,
        Err(LifecycleError::ShutDown("notes".to_string()))
    );
    assert_eq!(manager.plugin_status("notes"), Some(PluginStatus::Unloaded));
}

#[tokio::test]
async fn load_all_runs_once_and_unknown_ids_are_rejected() {
    let fixture = Fixture::new();
    fixture.add_healthy("notes");
    let manager = fixture.manager();

    manager.load_all(&[fixture.root.path()]).await.expect("load");
    assert_eq!(
        manager.load_all(&[fixture.root.path()]).await,
        Err(LifecycleError::AlreadyLoaded)
    );
    assert_eq!(fixture.events(), ["activate:notes"]);

    assert_eq!(
        manager.enable_plugin("ghost").await,
        Err(LifecycleError::UnknownPlugin("ghost".to_string()))
    );
    assert_eq!(
        manager.disable_plugin("ghost").await,
        Err(LifecycleError::UnknownPlugin("ghost".to_string()))
    );
    assert_eq!(manager.plugin_status("ghost"), None);
}

#[tokio::test]
async fn enable_reports_activation_failure_and_records_it() {
    let fixture = Fixture::new();
    fixture.add_failing("broken");
    let manager = fixture.manager();
    manager.load_all(&[fixture.root.path()]).await.expect("load");

    let err = manager
        .enable_plugin("broken")
        .await
        .expect_err("activation still fails");
    assert!(matches!(err, LifecycleError::ActivationFailed { ref id, .. } if id == "broken"));
    assert_eq!(manager.plugin_status("broken"), Some(PluginStatus::Error));

    manager.disable_plugin("broken").await.expect("disable from error");
    assert_eq!(manager.plugin_status("broken"), Some(PluginStatus::Disabled));
}

#[tokio::test]
async fn panics_and_invalid_modules_are_contained() {
    let fixture = Fixture::new();
    let entry = fixture.add_package("a-panics", &[]);
    let exports = ModuleExports::new().on_activate(|_context| async { explode() });
    fixture
        .loader
        .register(entry, move || Ok(LoadedModule::Direct(exports.clone())));

    let entry = fixture.add_package("b-no-activate", &[]);
    fixture.loader.register(entry, || {
        Ok(LoadedModule::DefaultExport(
            ModuleExports::new().on_deactivate(|| async { anyhow::Ok(()) }),
        ))
    });

    fixture.add_package("c-unregistered", &[]);

    let entry = fixture.add_package("d-eval-fails", &[]);
    fixture
        .loader
        .register(entry, || Err(anyhow::anyhow!("syntax error at line 3")));

    fixture.add_healthy("e-healthy");
    let manager = fixture.manager();

    let report = manager
        .load_all(&[fixture.root.path()])
        .await
        .expect("load_all contains every failure");

    assert_eq!(report.activated, vec!["e-healthy".to_string()]);
    let errors: Vec<(String, String)> = manager
        .plugin_list()
        .into_iter()
        .filter(|item| item.status == PluginStatus::Error)
        .map(|item| (item.id, item.error.unwrap_or_default()))
        .collect();
    assert_eq!(errors.len(), 4);
    for (id, needle) in [
        ("a-panics", "activation exploded"),
        ("b-no-activate", "activate"),
        ("c-unregistered", "index.js"),
        ("d-eval-fails", "syntax error"),
    ] {
        let (_, message) = errors
            .iter()
            .find(|(error_id, _)| error_id == id)
            .expect("failure is recorded");
        assert!(message.contains(needle), "{id}: {message}");
    }
}

struct Greeter {
    events: Events,
}

#[async_trait]
impl Plugin for Greeter {
    fn name(&self) -> &str {
        "greeter"
    }

    async fn activate(&self, context: PluginContext) -> anyhow::Result<()> {
        let events = Arc::clone(&self.events);
        context.commands().register("greeter.hello", move |_args| {
            let events = Arc::clone(&events);
            async move {
                events.lock().expect("events lock").push("hello".to_string());
                anyhow::Ok(json!("hello"))
            }
        })?;
        Ok(())
    }

    async fn deactivate(&self) -> anyhow::Result<()> {
        anyhow::bail!("teardown is flaky")
    }
}

#[tokio::test]
async fn registrations_are_revoked_on_disable_and_restored_on_enable() {
    let fixture = Fixture::new();
    let entry = fixture.add_package("greeter", &[]);
    let events = Arc::clone(&fixture.events);
    fixture.loader.register_plugin(entry, move || Greeter {
        events: Arc::clone(&events),
    });
    let manager = fixture.manager();
    manager.load_all(&[fixture.root.path()]).await.expect("load");

    assert_eq!(
        fixture.commands.owner("greeter.hello").as_deref(),
        Some("greeter")
    );
    fixture
        .commands
        .execute("greeter.hello", json!(null))
        .await
        .expect("command runs");

    // A failing deactivate does not block the transition.
    manager.disable_plugin("greeter").await.expect("disable");
    assert_eq!(manager.plugin_status("greeter"), Some(PluginStatus::Disabled));
    assert!(fixture.commands.command_ids().is_empty());

    manager.enable_plugin("greeter").await.expect("re-enable");
    assert_eq!(fixture.commands.command_ids(), vec!["greeter.hello".to_string()]);
    assert_eq!(fixture.events(), ["hello"]);
}

struct CountingConfirmer {
    calls: AtomicUsize,
}

#[async_trait]
impl HighRiskConfirmer for CountingConfirmer {
    async fn confirm(&self, _plugin_id: &str, _capability: Capability) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[tokio::test]
async fn confirmations_survive_disable_and_enable() {
    let fixture = Fixture::new();
    let entry = fixture.add_package("writer", &["fs:write"]);
    fixture.loader.register(entry, || {
        Ok(LoadedModule::Direct(ModuleExports::new().on_activate(
            |context: PluginContext| async move {
                let target = context.workspace().data_path().join("state.txt");
                context.fs().write_file(target, "ready").await?;
                anyhow::Ok(())
            },
        )))
    });
    let confirmer = Arc::new(CountingConfirmer {
        calls: AtomicUsize::new(0),
    });
    let manager = fixture.manager_with(
        ManagerOptions::new(fixture.data.path())
            .with_confirmer(confirmer.clone() as Arc<dyn HighRiskConfirmer>),
    );

    manager.load_all(&[fixture.root.path()]).await.expect("load");
    manager.disable_plugin("writer").await.expect("disable");
    manager.enable_plugin("writer").await.expect("enable");

    assert_eq!(manager.plugin_status("writer"), Some(PluginStatus::Active));
    assert_eq!(confirmer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        std::fs::read_to_string(fixture.data.path().join("writer").join("state.txt"))
            .expect("state written"),
        "ready"
    );
}

#[tokio::test]
async fn scan_errors_are_surfaced_in_the_report() {
    let fixture = Fixture::new();
    fixture.add_healthy("good");
    let bad = fixture.root.path().join("bad");
    std::fs::create_dir_all(&bad).expect("bad dir");
    std::fs::write(bad.join("package.json"), "not json").expect("write");
    let manager = fixture.manager();

    let report = manager
        .load_all(&[fixture.root.path()])
        .await
        .expect("load");
    assert_eq!(report.activated, vec!["good".to_string()]);
    assert_eq!(report.scan_errors.len(), 1);
    assert_eq!(manager.plugin_list().len(), 1);
}
