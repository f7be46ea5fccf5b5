//! Extension runtime for the desktop host.
//! Discovers extension packages, scopes what each may touch, and keeps a
//! failing extension from taking the host down with it.

pub mod config;
pub mod db;
pub mod extension;
pub mod host;
pub mod logging;

pub use config::{ConfigError, HostConfig};
pub use extension::capability::{parse_capability, Capability, CapabilityError};
pub use extension::context::{ContextError, ContextResult, PluginContext, PluginIdentity};
pub use extension::discovery::{resolve_load_order, scan_plugins, ScanError, ScanReport};
pub use extension::kernel::{
    ActivationError, LifecycleError, LoadReport, ManagerOptions, PluginListItem, PluginManager,
    PluginStatus,
};
pub use extension::manifest::{
    parse_manifest, parse_manifest_file, ManifestError, PluginConfig, PluginDescriptor,
};
pub use extension::module::{
    LoadedModule, ModuleExports, ModuleLoader, Plugin, PluginDefinition, RegistryModuleLoader,
};
pub use extension::permission::{HighRiskConfirmer, PermissionDenied, PermissionManager};
pub use host::{HostError, HostServices};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
