use plugin_host_core::extension::manifest::{CommandDeclaration, PluginEntry};
use plugin_host_core::{parse_manifest, parse_manifest_file, Capability, ManifestError};
use serde_json::json;
use std::path::{Path, PathBuf};

#[test]
fn sample_metadata_yields_expected_descriptor() {
    let raw = json!({
        "name": "sample",
        "version": "1.0.0",
        "extension": {
            "name": "Sample",
            "permissions": ["fs:read"],
            "entry": {"main": "./index.js"}
        }
    });

    let descriptor =
        parse_manifest(&raw, Path::new("/plugins/sample")).expect("sample metadata is valid");

    assert_eq!(descriptor.id, "sample");
    assert_eq!(descriptor.path, PathBuf::from("/plugins/sample"));
    assert_eq!(descriptor.version, "1.0.0");
    assert_eq!(descriptor.config.display_name, "Sample");
    assert_eq!(descriptor.config.permissions, vec![Capability::FsRead]);
    assert_eq!(
        descriptor.config.entry,
        PluginEntry {
            main: "./index.js".to_string(),
            ui: None,
        }
    );
    assert_eq!(descriptor.config.description, None);
    assert!(descriptor.config.commands.is_empty());
    assert!(descriptor.config.ai.is_none());
}

#[test]
fn full_declaration_is_reflected_losslessly() {
    let raw = json!({
        "name": "git-helper",
        "version": "2.3.1",
        "extension": {
            "displayName": "Git Helper",
            "description": "Shows repository status",
            "icon": "assets/icon.svg",
            "permissions": ["fs:read", "shell:exec", "notification"],
            "entry": {"main": "dist/main.js", "ui": "dist/panel.html"},
            "commands": [
                {"id": "git.status", "title": "Git Status", "shortcut": "Ctrl+Shift+G"},
                {"id": "git.log", "title": "Git Log"}
            ],
            "ai": {"tools": ["git_diff"]}
        }
    });

    let descriptor = parse_manifest(&raw, Path::new("/plugins/git-helper")).expect("valid");
    let config = &descriptor.config;

    assert_eq!(config.display_name, "Git Helper");
    assert_eq!(config.description.as_deref(), Some("Shows repository status"));
    assert_eq!(config.icon.as_deref(), Some("assets/icon.svg"));
    assert_eq!(
        config.permissions,
        vec![
            Capability::FsRead,
            Capability::ShellExec,
            Capability::Notification
        ]
    );
    assert_eq!(config.entry.ui.as_deref(), Some("dist/panel.html"));
    assert_eq!(
        config.commands,
        vec![
            CommandDeclaration {
                id: "git.status".to_string(),
                title: "Git Status".to_string(),
                shortcut: Some("Ctrl+Shift+G".to_string()),
            },
            CommandDeclaration {
                id: "git.log".to_string(),
                title: "Git Log".to_string(),
                shortcut: None,
            },
        ]
    );
    assert_eq!(
        config.ai.as_ref().map(|ai| ai.tools.clone()),
        Some(vec!["git_diff".to_string()])
    );
    assert!(descriptor.has_ui());
}

#[test]
fn missing_required_fields_are_named_in_the_error() {
    let path = Path::new("/plugins/broken");
    let cases = [
        (json!({"name": "broken"}), "extension"),
        (
            json!({"name": "broken", "extension": {"entry": {"main": "index.js"}}}),
            "extension.displayName",
        ),
        (
            json!({"name": "broken", "extension": {"displayName": "Broken"}}),
            "extension.entry",
        ),
        (
            json!({"name": "broken", "extension": {"displayName": "Broken", "entry": {}}}),
            "extension.entry.main",
        ),
        (
            json!({"name": "broken", "extension": {"displayName": "Broken", "entry": {"main": 7}}}),
            "extension.entry.main",
        ),
    ];

    for (raw, field) in cases {
        let err = parse_manifest(&raw, path).expect_err("required field is missing");
        let message = err.to_string();
        assert!(message.contains(field), "`{message}` should name `{field}`");
        assert!(message.contains("/plugins/broken"), "`{message}` should name the path");
    }
}

#[test]
fn unsupported_capability_token_is_reported_verbatim() {
    let raw = json!({
        "name": "greedy",
        "extension": {
            "displayName": "Greedy",
            "permissions": ["fs:read", "FS:WRITE"],
            "entry": {"main": "index.js"}
        }
    });

    let err = parse_manifest(&raw, Path::new("/plugins/greedy")).expect_err("bad token");
    assert!(matches!(
        err,
        ManifestError::UnsupportedCapability { ref token, .. } if token == "FS:WRITE"
    ));
    assert!(err.to_string().contains("FS:WRITE"));
}

#[test]
fn entry_escaping_the_package_is_rejected() {
    let raw = json!({
        "name": "escape",
        "extension": {"displayName": "Escape", "entry": {"main": "../shared/index.js"}}
    });
    let err = parse_manifest(&raw, Path::new("/plugins/escape")).expect_err("escape");
    assert!(err.to_string().contains("extension.entry.main"));
}

#[test]
fn entry_must_name_a_file_inside_the_package() {
    for main in [".", "./", "./."] {
        let raw = json!({
            "name": "x",
            "extension": {"displayName": "X", "entry": {"main": main}}
        });
        let err = parse_manifest(&raw, Path::new("/plugins/x")).expect_err("directory entry");
        let message = err.to_string();
        assert!(message.contains("extension.entry.main"), "{message}");
        assert!(message.contains("does not name a file"), "{message}");
    }

    let raw = json!({
        "name": "x",
        "extension": {"displayName": "X", "entry": {"main": "index.js", "ui": "."}}
    });
    let err = parse_manifest(&raw, Path::new("/plugins/x")).expect_err("directory ui entry");
    assert!(err.to_string().contains("extension.entry.ui"));
}

#[test]
fn malformed_optional_fields_are_rejected() {
    let raw = json!({
        "name": "odd",
        "extension": {
            "displayName": "Odd",
            "entry": {"main": "index.js"},
            "commands": [{"id": "odd.run"}]
        }
    });
    let err = parse_manifest(&raw, Path::new("/plugins/odd")).expect_err("command without title");
    assert!(err.to_string().contains("extension.commands[0].title"));
}

#[test]
fn parse_manifest_file_reads_package_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("package.json"),
        json!({
            "name": "on-disk",
            "version": "0.2.0",
            "extension": {"displayName": "On Disk", "entry": {"main": "index.js"}}
        })
        .to_string(),
    )
    .expect("write metadata");

    let descriptor = parse_manifest_file(dir.path()).expect("valid package");
    assert_eq!(descriptor.id, "on-disk");
    assert_eq!(descriptor.entry_path(), dir.path().join("index.js"));

    let missing = tempfile::tempdir().expect("tempdir");
    let err = parse_manifest_file(missing.path()).expect_err("no metadata file");
    assert!(matches!(err, ManifestError::Io { .. }));
}
