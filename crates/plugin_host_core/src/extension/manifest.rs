//! Extension metadata parsing and validation.
//!
//! # Responsibility
//! - Turn raw package metadata (`package.json`) into an immutable
//!   [`PluginDescriptor`].
//! - Report every validation failure with the offending field and the
//!   candidate location.
//!
//! # Invariants
//! - A descriptor always has a non-empty id, a non-empty display name and a
//!   code entry that stays inside the package directory.
//! - Declared capabilities only contain tokens of the closed set.

use crate::extension::capability::{parse_capability, Capability, CapabilityError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Metadata file looked up in every candidate package directory.
pub const METADATA_FILE_NAME: &str = "package.json";
/// Key of the extension-declaration block inside the metadata file.
pub const DECLARATION_KEY: &str = "extension";
/// Version recorded when the metadata omits one.
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Validated, immutable representation of one extension package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Unique extension id (metadata `name`).
    pub id: String,
    /// Package directory.
    pub path: PathBuf,
    pub version: String,
    pub config: PluginConfig,
}

impl PluginDescriptor {
    /// Absolute-or-relative path of the code entry, joined onto the package
    /// directory with `.` components removed.
    pub fn entry_path(&self) -> PathBuf {
        join_normalized(&self.path, &self.config.entry.main)
    }

    /// Path of the UI entry, when declared.
    pub fn ui_entry_path(&self) -> Option<PathBuf> {
        self.config
            .entry
            .ui
            .as_deref()
            .map(|ui| join_normalized(&self.path, ui))
    }

    pub fn has_ui(&self) -> bool {
        self.config.entry.ui.is_some()
    }
}

/// Contents of the extension-declaration block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub display_name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    /// Declared capabilities, in declaration order.
    pub permissions: Vec<Capability>,
    pub entry: PluginEntry,
    pub commands: Vec<CommandDeclaration>,
    pub ai: Option<AiDeclaration>,
}

/// Code and UI entry points, relative to the package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginEntry {
    pub main: String,
    pub ui: Option<String>,
}

/// Command contributed by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDeclaration {
    pub id: String,
    pub title: String,
    pub shortcut: Option<String>,
}

/// AI tools an extension intends to register.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AiDeclaration {
    pub tools: Vec<String>,
}

/// Metadata validation errors.
///
/// Every variant carries the candidate location so collected scan errors stay
/// actionable.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{}: metadata has no `extension` declaration block", .path.display())]
    MissingDeclaration { path: PathBuf },
    #[error("{}: required field `{field}` is missing or not a string", .path.display())]
    MissingField { path: PathBuf, field: &'static str },
    #[error("{}: field `{field}` is invalid: {reason}", .path.display())]
    InvalidField {
        path: PathBuf,
        field: String,
        reason: String,
    },
    #[error("{}: unsupported capability `{token}` in `extension.permissions`", .path.display())]
    UnsupportedCapability { path: PathBuf, token: String },
    #[error("{}: failed to read metadata: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: metadata is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ManifestError {
    fn invalid(path: &Path, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            path: path.to_path_buf(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Parses raw metadata into a descriptor.
///
/// `path_hint` is the package directory. It becomes the descriptor path and
/// supplies the id when the metadata has no top-level `name`.
pub fn parse_manifest(raw: &Value, path_hint: &Path) -> Result<PluginDescriptor, ManifestError> {
    let declaration = match raw.get(DECLARATION_KEY) {
        None | Some(Value::Null) => {
            return Err(ManifestError::MissingDeclaration {
                path: path_hint.to_path_buf(),
            })
        }
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(ManifestError::invalid(
                path_hint,
                DECLARATION_KEY,
                "must be an object",
            ))
        }
    };

    let id = parse_id(raw, path_hint)?;
    let version = match raw.get("version") {
        None | Some(Value::Null) => DEFAULT_VERSION.to_string(),
        Some(Value::String(value)) if !value.trim().is_empty() => value.clone(),
        Some(_) => {
            return Err(ManifestError::invalid(
                path_hint,
                "version",
                "must be a non-empty string",
            ))
        }
    };

    // `name` is accepted as a shorthand for `displayName`.
    let display_name = non_empty_string(declaration, "displayName")
        .or_else(|| non_empty_string(declaration, "name"))
        .ok_or_else(|| ManifestError::MissingField {
            path: path_hint.to_path_buf(),
            field: "extension.displayName",
        })?;
    let description =
        optional_string(declaration, "description", "extension.description", path_hint)?;
    let icon = optional_string(declaration, "icon", "extension.icon", path_hint)?;
    let permissions = parse_permissions(declaration, path_hint)?;
    let entry = parse_entry(declaration, path_hint)?;
    let commands = parse_commands(declaration, path_hint)?;
    let ai = parse_ai(declaration, path_hint)?;

    Ok(PluginDescriptor {
        id,
        path: path_hint.to_path_buf(),
        version,
        config: PluginConfig {
            display_name,
            description,
            icon,
            permissions,
            entry,
            commands,
            ai,
        },
    })
}

/// Reads `<package_dir>/package.json` as JSON.
pub fn read_metadata(package_dir: &Path) -> Result<Value, ManifestError> {
    let metadata_path = package_dir.join(METADATA_FILE_NAME);
    let raw = std::fs::read_to_string(&metadata_path).map_err(|source| ManifestError::Io {
        path: metadata_path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ManifestError::Json {
        path: metadata_path,
        source,
    })
}

/// Reads and parses one package directory's metadata.
pub fn parse_manifest_file(package_dir: &Path) -> Result<PluginDescriptor, ManifestError> {
    let raw = read_metadata(package_dir)?;
    parse_manifest(&raw, package_dir)
}

fn parse_id(raw: &Value, path_hint: &Path) -> Result<String, ManifestError> {
    let id = match raw.get("name") {
        Some(Value::String(name)) => name.trim().to_string(),
        None | Some(Value::Null) => path_hint
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        Some(_) => {
            return Err(ManifestError::invalid(
                path_hint,
                "name",
                "must be a string",
            ))
        }
    };
    if id.is_empty() {
        return Err(ManifestError::MissingField {
            path: path_hint.to_path_buf(),
            field: "name",
        });
    }
    Ok(id)
}

fn parse_permissions(
    declaration: &Map<String, Value>,
    path: &Path,
) -> Result<Vec<Capability>, ManifestError> {
    let values = match declaration.get("permissions") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(values)) => values,
        Some(_) => {
            return Err(ManifestError::invalid(
                path,
                "extension.permissions",
                "must be an array of capability tokens",
            ))
        }
    };

    values
        .iter()
        .map(|value| {
            let Value::String(token) = value else {
                return Err(ManifestError::UnsupportedCapability {
                    path: path.to_path_buf(),
                    token: value.to_string(),
                });
            };
            parse_capability(token).map_err(|err| match err {
                CapabilityError::Empty | CapabilityError::Unsupported(_) => {
                    ManifestError::UnsupportedCapability {
                        path: path.to_path_buf(),
                        token: token.clone(),
                    }
                }
            })
        })
        .collect()
}

fn parse_entry(
    declaration: &Map<String, Value>,
    path: &Path,
) -> Result<PluginEntry, ManifestError> {
    let Some(Value::Object(entry)) = declaration.get("entry") else {
        return Err(ManifestError::MissingField {
            path: path.to_path_buf(),
            field: "extension.entry",
        });
    };

    let main = non_empty_string(entry, "main").ok_or_else(|| ManifestError::MissingField {
        path: path.to_path_buf(),
        field: "extension.entry.main",
    })?;
    validate_entry_path(&main)
        .map_err(|reason| ManifestError::invalid(path, "extension.entry.main", reason))?;

    let ui = optional_string(entry, "ui", "extension.entry.ui", path)?;
    if let Some(ui) = ui.as_deref() {
        validate_entry_path(ui)
            .map_err(|reason| ManifestError::invalid(path, "extension.entry.ui", reason))?;
    }

    Ok(PluginEntry { main, ui })
}

fn parse_commands(
    declaration: &Map<String, Value>,
    path: &Path,
) -> Result<Vec<CommandDeclaration>, ManifestError> {
    let values = match declaration.get("commands") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(values)) => values,
        Some(_) => {
            return Err(ManifestError::invalid(
                path,
                "extension.commands",
                "must be an array",
            ))
        }
    };

    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let field = format!("extension.commands[{index}]");
            let Value::Object(command) = value else {
                return Err(ManifestError::invalid(path, field, "must be an object"));
            };
            let id = non_empty_string(command, "id").ok_or_else(|| {
                ManifestError::invalid(path, format!("{field}.id"), "must be a non-empty string")
            })?;
            let title = non_empty_string(command, "title").ok_or_else(|| {
                ManifestError::invalid(path, format!("{field}.title"), "must be a non-empty string")
            })?;
            let shortcut = match command.get("shortcut") {
                None | Some(Value::Null) => None,
                Some(Value::String(shortcut)) => Some(shortcut.clone()),
                Some(_) => {
                    return Err(ManifestError::invalid(
                        path,
                        format!("{field}.shortcut"),
                        "must be a string",
                    ))
                }
            };
            Ok(CommandDeclaration { id, title, shortcut })
        })
        .collect()
}

fn parse_ai(
    declaration: &Map<String, Value>,
    path: &Path,
) -> Result<Option<AiDeclaration>, ManifestError> {
    let ai = match declaration.get("ai") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(ai)) => ai,
        Some(_) => {
            return Err(ManifestError::invalid(
                path,
                "extension.ai",
                "must be an object",
            ))
        }
    };

    let tools = match ai.get("tools") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| match value {
                Value::String(tool) => Ok(tool.clone()),
                _ => Err(ManifestError::invalid(
                    path,
                    "extension.ai.tools",
                    "must only contain tool-name strings",
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ManifestError::invalid(
                path,
                "extension.ai.tools",
                "must be an array",
            ))
        }
    };

    Ok(Some(AiDeclaration { tools }))
}

fn non_empty_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.clone()),
        _ => None,
    }
}

fn optional_string(
    map: &Map<String, Value>,
    key: &str,
    field: &'static str,
    path: &Path,
) -> Result<Option<String>, ManifestError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ManifestError::invalid(path, field, "must be a string")),
    }
}

fn validate_entry_path(entry: &str) -> Result<(), String> {
    let path = Path::new(entry.trim());
    if path.is_absolute() {
        return Err(format!("entry `{entry}` must be relative to the package"));
    }
    let mut names_file = false;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(format!("entry `{entry}` must not contain parent traversals"));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("entry `{entry}` must be relative to the package"));
            }
            Component::CurDir => {}
            Component::Normal(_) => names_file = true,
        }
    }
    if !names_file {
        return Err(format!("entry `{entry}` does not name a file"));
    }
    Ok(())
}

fn join_normalized(base: &Path, relative: &str) -> PathBuf {
    let mut joined = base.to_path_buf();
    for component in Path::new(relative.trim()).components() {
        if let Component::Normal(part) = component {
            joined.push(part);
        }
    }
    joined
}
