//! Extension code loading contracts.
//!
//! A loader turns a descriptor's code entry into a [`LoadedModule`]. The shape
//! of what it yields is checked, never assumed: only modules exposing an
//! activation entry point become a [`PluginDefinition`].

use crate::extension::context::PluginContext;
use crate::extension::manifest::PluginDescriptor;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub type ActivateFn =
    Arc<dyn Fn(PluginContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type DeactivateFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Values exported by an evaluated code entry. Every export is optional
/// until checked.
#[derive(Clone, Default)]
pub struct ModuleExports {
    pub name: Option<String>,
    pub activate: Option<ActivateFn>,
    pub deactivate: Option<DeactivateFn>,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_activate<F, Fut>(mut self, activate: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.activate = Some(Arc::new(move |context| activate(context).boxed()));
        self
    }

    pub fn on_deactivate<F, Fut>(mut self, deactivate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.deactivate = Some(Arc::new(move || deactivate().boxed()));
        self
    }

    /// Exports backed by a [`Plugin`] implementation.
    pub fn from_plugin(plugin: Arc<dyn Plugin>) -> Self {
        let activating = Arc::clone(&plugin);
        let deactivating = Arc::clone(&plugin);
        Self {
            name: Some(plugin.name().to_string()),
            activate: Some(Arc::new(move |context| {
                let plugin = Arc::clone(&activating);
                async move { plugin.activate(context).await }.boxed()
            })),
            deactivate: Some(Arc::new(move || {
                let plugin = Arc::clone(&deactivating);
                async move { plugin.deactivate().await }.boxed()
            })),
        }
    }
}

impl std::fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleExports")
            .field("name", &self.name)
            .field("activate", &self.activate.is_some())
            .field("deactivate", &self.deactivate.is_some())
            .finish()
    }
}

/// Evaluated code entry: exports either directly or under a default-export
/// wrapper.
#[derive(Debug, Clone)]
pub enum LoadedModule {
    Direct(ModuleExports),
    DefaultExport(ModuleExports),
}

impl LoadedModule {
    pub fn exports(&self) -> &ModuleExports {
        match self {
            Self::Direct(exports) | Self::DefaultExport(exports) => exports,
        }
    }
}

/// A loaded module that passed the shape check.
#[derive(Clone)]
pub struct PluginDefinition {
    name: String,
    activate: ActivateFn,
    deactivate: Option<DeactivateFn>,
}

impl PluginDefinition {
    /// Checks `module` exposes an activation entry point.
    ///
    /// `fallback_name` is used when the module does not export a name.
    pub fn from_module(
        module: LoadedModule,
        fallback_name: &str,
    ) -> Result<Self, InvalidModule> {
        let wrapper = match &module {
            LoadedModule::Direct(_) => "module",
            LoadedModule::DefaultExport(_) => "default export",
        };
        let (LoadedModule::Direct(exports) | LoadedModule::DefaultExport(exports)) = module;
        let Some(activate) = exports.activate else {
            return Err(InvalidModule::MissingActivate { wrapper });
        };
        Ok(Self {
            name: exports
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| fallback_name.to_string()),
            activate,
            deactivate: exports.deactivate,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_deactivate(&self) -> bool {
        self.deactivate.is_some()
    }

    pub(crate) fn activate(&self, context: PluginContext) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.activate)(context)
    }

    pub(crate) fn deactivate(&self) -> Option<BoxFuture<'static, anyhow::Result<()>>> {
        self.deactivate.as_ref().map(|deactivate| deactivate())
    }
}

impl std::fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("name", &self.name)
            .field("deactivate", &self.deactivate.is_some())
            .finish_non_exhaustive()
    }
}

/// Shape-check failure of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidModule {
    #[error("{wrapper} does not export a callable `activate` entry point")]
    MissingActivate { wrapper: &'static str },
}

/// In-process extension implementation.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn activate(&self, context: PluginContext) -> anyhow::Result<()>;
    async fn deactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no module is available for entry `{}`", .0.display())]
    NotFound(PathBuf),
    #[error("failed to evaluate entry `{}`: {message}", .entry.display())]
    Evaluation { entry: PathBuf, message: String },
}

/// Resolves and evaluates a descriptor's code entry.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, descriptor: &PluginDescriptor) -> Result<LoadedModule, LoadError>;
}

pub type ModuleFactory = Arc<dyn Fn() -> anyhow::Result<LoadedModule> + Send + Sync>;

/// Loader for extensions linked into the host binary, keyed by entry path
/// (`<package dir>/<entry.main>` without `.` components).
#[derive(Default)]
pub struct RegistryModuleLoader {
    factories: Mutex<BTreeMap<PathBuf, ModuleFactory>>,
}

impl RegistryModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory evaluated on every load of `entry`.
    pub fn register<F>(&self, entry: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> anyhow::Result<LoadedModule> + Send + Sync + 'static,
    {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.into(), Arc::new(factory));
    }

    /// Registers a [`Plugin`] constructor as the direct export of `entry`.
    pub fn register_plugin<F, P>(&self, entry: impl Into<PathBuf>, constructor: F)
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Plugin,
    {
        self.register(entry, move || {
            Ok(LoadedModule::Direct(ModuleExports::from_plugin(Arc::new(
                constructor(),
            ))))
        });
    }
}

#[async_trait]
impl ModuleLoader for RegistryModuleLoader {
    async fn load(&self, descriptor: &PluginDescriptor) -> Result<LoadedModule, LoadError> {
        let entry = descriptor.entry_path();
        let factory = self
            .factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entry)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(entry.clone()))?;
        factory().map_err(|err| LoadError::Evaluation {
            entry,
            message: format!("{err:#}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{InvalidModule, LoadedModule, ModuleExports, PluginDefinition};

    #[test]
    fn accepts_direct_and_default_exports() {
        let exports = ModuleExports::new()
            .with_name("sample")
            .on_activate(|_context| async { anyhow::Ok(()) });

        let direct = PluginDefinition::from_module(LoadedModule::Direct(exports.clone()), "fallback")
            .expect("direct export is valid");
        assert_eq!(direct.name(), "sample");
        assert!(!direct.has_deactivate());

        let wrapped = PluginDefinition::from_module(LoadedModule::DefaultExport(exports), "fallback")
            .expect("default export is valid");
        assert_eq!(wrapped.name(), "sample");
    }

    #[test]
    fn rejects_module_without_activate() {
        let exports = ModuleExports::new()
            .with_name("broken")
            .on_deactivate(|| async { anyhow::Ok(()) });
        let err = PluginDefinition::from_module(LoadedModule::DefaultExport(exports), "broken")
            .expect_err("activate is required");
        assert_eq!(
            err,
            InvalidModule::MissingActivate {
                wrapper: "default export"
            }
        );
        assert!(err.to_string().contains("activate"));
    }

    #[test]
    fn falls_back_to_descriptor_name() {
        let exports = ModuleExports::new().on_activate(|_context| async { anyhow::Ok(()) });
        let definition = PluginDefinition::from_module(LoadedModule::Direct(exports), "sample")
            .expect("valid module");
        assert_eq!(definition.name(), "sample");
    }
}
