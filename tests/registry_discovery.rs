//! Discovery over built-in factories and manifest directories.

use std::collections::HashMap;
use std::fs;

use serde_json::json;
use tiny_display::plugin::{
    ContentModule, FnModuleFactory, ModuleConfig, PluginRegistry, SearchLocation,
};
use tracing_test::traced_test;

fn write_manifest(dir: &std::path::Path, file: &str, contents: &str) {
    fs::write(dir.join(file), contents).unwrap();
}

#[tokio::test]
#[traced_test]
async fn broken_candidate_is_logged_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(
        dir.path(),
        "desk-clock.toml",
        r#"
        entry = "clock"
        name = "Desk Clock"
        update_interval = 10

        [config]
        cities = ["London=+00:00"]
        "#,
    );
    // No entry point: cannot be instantiated.
    write_manifest(dir.path(), "broken.toml", "name = \"Broken\"\n");

    let catalogue = PluginRegistry::with_builtins()
        .discover(
            &[SearchLocation::Directory(dir.path().to_path_buf())],
            &HashMap::new(),
        )
        .await;

    assert_eq!(catalogue.len(), 1);
    let clock = catalogue.get(0).unwrap();
    assert_eq!(clock.name(), "Desk Clock");
    assert_eq!(clock.entry(), "clock");
    assert_eq!(clock.update_interval().as_secs(), 10);
    assert!(clock.instantiate().is_ok());

    assert_eq!(catalogue.rejected().len(), 1);
    assert!(catalogue.rejected()[0].source.ends_with("broken.toml"));
    assert!(logs_contain("Skipping plugin candidate"));
    assert!(logs_contain("Discovered plugin"));
}

#[tokio::test]
#[traced_test]
async fn failing_and_panicking_constructors_are_skipped() {
    let mut registry = PluginRegistry::with_builtins();
    registry.register(FnModuleFactory::new("refuses", |_| {
        Err(anyhow::anyhow!("missing hardware"))
    }));
    registry.register(FnModuleFactory::new("explodes", |_| -> anyhow::Result<Box<dyn ContentModule>> {
        panic!("constructor bug")
    }));

    let catalogue = registry
        .discover(&[SearchLocation::Builtin], &HashMap::new())
        .await;

    let names: Vec<_> = catalogue.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["World Clock", "Hello World Sample"]);
    let sources: Vec<_> = catalogue
        .rejected()
        .iter()
        .map(|r| r.source.as_str())
        .collect();
    assert_eq!(sources, vec!["builtin/explodes", "builtin/refuses"]);
    assert!(logs_contain("module constructor panicked"));
    assert!(logs_contain("missing hardware"));
}

#[tokio::test]
async fn manifests_and_builtins_share_one_namespace() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "a-hello.toml", "entry = \"hello\"\n");
    write_manifest(
        dir.path(),
        "b-banner.toml",
        "entry = \"hello\"\nname = \"Banner\"\n[config]\ntext = \"SALE\"\n",
    );
    write_manifest(dir.path(), "c-unknown.toml", "entry = \"weather\"\n");
    write_manifest(dir.path(), "notes.txt", "not a manifest");

    let catalogue = PluginRegistry::with_builtins()
        .discover(
            &[
                SearchLocation::Builtin,
                SearchLocation::Directory(dir.path().to_path_buf()),
                SearchLocation::Directory(dir.path().join("missing")),
            ],
            &HashMap::new(),
        )
        .await;

    // Directory sources sort before "builtin/...", so the manifest claims the
    // default name first and the built-in hello is a duplicate.
    let names: Vec<_> = catalogue.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["Hello World Sample", "Banner", "World Clock"]);
    let reasons: Vec<_> = catalogue
        .rejected()
        .iter()
        .map(|r| r.message.as_str())
        .collect();
    assert_eq!(reasons.len(), 2);
    assert!(reasons.iter().any(|m| m.contains("unknown module entry 'weather'")));
    assert!(reasons.iter().any(|m| m.contains("duplicate plugin name")));

    assert_eq!(catalogue.find("banner").map(|d| d.name()), Some("Banner"));
    assert_eq!(catalogue.find("2").map(|d| d.name()), Some("World Clock"));
    assert_eq!(catalogue.find("builtin/clock").map(|d| d.name()), Some("World Clock"));
    assert!(catalogue.find("7").is_none());
}

#[tokio::test]
async fn module_config_reaches_factory() {
    let mut cities = ModuleConfig::new();
    cities.set("cities", json!(["Tokyo=+09:00", "Lima=-05:00"]));
    let mut bad = ModuleConfig::new();
    bad.set("color", json!("not-a-colour"));
    let configs = HashMap::from([("clock".to_string(), cities), ("hello".to_string(), bad)]);

    let catalogue = PluginRegistry::with_builtins()
        .discover(&[SearchLocation::Builtin], &configs)
        .await;

    assert_eq!(catalogue.len(), 1);
    let clock = catalogue.find("world").unwrap();
    assert_eq!(
        clock.config().get_as::<Vec<String>>("cities").unwrap().unwrap().len(),
        2
    );
    assert!(catalogue.rejected()[0].message.contains("module constructor failed"));
}

#[tokio::test]
async fn discovery_is_repeatable() {
    let registry = PluginRegistry::with_builtins();
    let first = registry
        .discover(&[SearchLocation::Builtin], &HashMap::new())
        .await;
    let second = registry
        .discover(&[SearchLocation::Builtin], &HashMap::new())
        .await;
    let names = |c: &tiny_display::plugin::Catalogue| {
        c.iter().map(|d| d.name().to_string()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(first.get(1).map(|d| d.source()), Some("builtin/hello"));
}

#[tokio::test]
async fn oversized_interval_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(
        dir.path(),
        "forever.toml",
        "entry = \"hello\"\nname = \"Forever\"\nupdate_interval = 9223372036854775807\n",
    );
    write_manifest(
        dir.path(),
        "daily.toml",
        "entry = \"hello\"\nname = \"Daily\"\nupdate_interval = 86400\n",
    );

    let catalogue = PluginRegistry::with_builtins()
        .discover(
            &[SearchLocation::Directory(dir.path().to_path_buf())],
            &HashMap::new(),
        )
        .await;

    let names: Vec<_> = catalogue.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["Daily"]);
    assert_eq!(catalogue.rejected().len(), 1);
    assert!(catalogue.rejected()[0].source.ends_with("forever.toml"));
    assert!(catalogue.rejected()[0].message.contains("exceeds 86400s"));
}
