//! Capability tokens declared by extensions in their metadata.
//!
//! # Invariants
//! - The capability set is closed; parsing rejects any other token.
//! - Tokens are case-sensitive (`fs:read`, never `FS:READ`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Capability an extension must declare before using gated host operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    FsRead,
    FsWrite,
    ShellExec,
    NetworkFetch,
    AiChat,
    Clipboard,
    Notification,
}

/// Manifest token for filesystem read access.
pub const CAPABILITY_FS_READ: &str = "fs:read";
/// Manifest token for filesystem write access.
pub const CAPABILITY_FS_WRITE: &str = "fs:write";
/// Manifest token for shell command execution.
pub const CAPABILITY_SHELL_EXEC: &str = "shell:exec";
/// Manifest token for outbound network fetches.
pub const CAPABILITY_NETWORK_FETCH: &str = "network:fetch";
/// Manifest token for AI chat access.
pub const CAPABILITY_AI_CHAT: &str = "ai:chat";
/// Manifest token for clipboard access.
pub const CAPABILITY_CLIPBOARD: &str = "clipboard";
/// Manifest token for posting notifications.
pub const CAPABILITY_NOTIFICATION: &str = "notification";

const SUPPORTED_CAPABILITY_TOKENS: &[&str] = &[
    CAPABILITY_FS_READ,
    CAPABILITY_FS_WRITE,
    CAPABILITY_SHELL_EXEC,
    CAPABILITY_NETWORK_FETCH,
    CAPABILITY_AI_CHAT,
    CAPABILITY_CLIPBOARD,
    CAPABILITY_NOTIFICATION,
];

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 7] = [
        Self::FsRead,
        Self::FsWrite,
        Self::ShellExec,
        Self::NetworkFetch,
        Self::AiChat,
        Self::Clipboard,
        Self::Notification,
    ];

    /// Stable token used in metadata declarations.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FsRead => CAPABILITY_FS_READ,
            Self::FsWrite => CAPABILITY_FS_WRITE,
            Self::ShellExec => CAPABILITY_SHELL_EXEC,
            Self::NetworkFetch => CAPABILITY_NETWORK_FETCH,
            Self::AiChat => CAPABILITY_AI_CHAT,
            Self::Clipboard => CAPABILITY_CLIPBOARD,
            Self::Notification => CAPABILITY_NOTIFICATION,
        }
    }

    /// Whether first use needs an interactive user confirmation.
    pub fn is_high_risk(self) -> bool {
        matches!(self, Self::FsWrite | Self::ShellExec)
    }

    /// User-facing short description.
    pub fn description(self) -> &'static str {
        match self {
            Self::FsRead => "Read files and folders on this device.",
            Self::FsWrite => "Create, modify and overwrite files on this device.",
            Self::ShellExec => "Run shell commands on this device.",
            Self::NetworkFetch => "Send requests to remote network services.",
            Self::AiChat => "Talk to the built-in AI assistant.",
            Self::Clipboard => "Read and write the system clipboard.",
            Self::Notification => "Show notification messages.",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_capability(value)
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_capability(&raw).map_err(serde::de::Error::custom)
    }
}

/// Returns supported capability tokens for manifest validation.
pub fn supported_capability_tokens() -> &'static [&'static str] {
    SUPPORTED_CAPABILITY_TOKENS
}

/// Parses one capability token from a manifest declaration.
///
/// Surrounding whitespace is not accepted; the token must match verbatim.
pub fn parse_capability(value: &str) -> Result<Capability, CapabilityError> {
    if value.trim().is_empty() {
        return Err(CapabilityError::Empty);
    }

    match value {
        CAPABILITY_FS_READ => Ok(Capability::FsRead),
        CAPABILITY_FS_WRITE => Ok(Capability::FsWrite),
        CAPABILITY_SHELL_EXEC => Ok(Capability::ShellExec),
        CAPABILITY_NETWORK_FETCH => Ok(Capability::NetworkFetch),
        CAPABILITY_AI_CHAT => Ok(Capability::AiChat),
        CAPABILITY_CLIPBOARD => Ok(Capability::Clipboard),
        CAPABILITY_NOTIFICATION => Ok(Capability::Notification),
        other => Err(CapabilityError::Unsupported(other.to_string())),
    }
}

/// Capability token parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability token must not be empty")]
    Empty,
    #[error("unknown capability `{0}`")]
    Unsupported(String),
}
