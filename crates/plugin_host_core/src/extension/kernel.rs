//! Extension lifecycle manager.
//!
//! # Responsibility
//! - Drive discovery, context creation, code loading and activation.
//! - Track one status per extension and expose enable/disable/shutdown.
//! - Contain every extension failure (errors and panics) inside that
//!   extension's status.
//!
//! # Invariants
//! - At most one instance per id; instances are never recreated.
//! - Activation is sequential during `load_all`.
//! - `deactivate` runs at most once per active period.
//! - After `shutdown`, every extension stays `unloaded`.

use crate::extension::capability::Capability;
use crate::extension::context::{PluginContext, PluginIdentity};
use crate::extension::discovery::{resolve_load_order, scan_plugins, ScanError};
use crate::extension::manifest::PluginDescriptor;
use crate::extension::module::{InvalidModule, LoadError, ModuleLoader, PluginDefinition};
use crate::extension::permission::{HighRiskConfirmer, PermissionManager};
use crate::host::HostServices;
use crate::logging::panic_message;
use futures::FutureExt;
use log::{error, info, warn};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;

/// Lifecycle status of one extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Unloaded,
    Loading,
    Active,
    Error,
    Disabled,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

/// Host-facing snapshot of one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginListItem {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub status: PluginStatus,
    pub permissions: Vec<Capability>,
    pub has_ui: bool,
    pub error: Option<String>,
}

/// Outcome of [`PluginManager::load_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub activated: Vec<String>,
    pub failed: Vec<String>,
    pub scan_errors: Vec<ScanError>,
}

/// Administrative call failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("plugins are already loaded; load_all runs once per manager")]
    AlreadyLoaded,
    #[error("unknown plugin `{0}`")]
    UnknownPlugin(String),
    #[error("plugin host is shut down; `{0}` can no longer change state")]
    ShutDown(String),
    #[error("plugin `{id}` failed to activate: {message}")]
    ActivationFailed { id: String, message: String },
}

/// Why one activation attempt failed. Recorded as the extension's error.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("invalid module at `{}`: {source}", .entry.display())]
    InvalidModule {
        entry: PathBuf,
        #[source]
        source: InvalidModule,
    },
    #[error("activate failed: {0:#}")]
    Activate(anyhow::Error),
    #[error("activate panicked: {0}")]
    Panicked(String),
}

/// Construction options for [`PluginManager`].
#[derive(Clone)]
pub struct ManagerOptions {
    /// Parent of every extension's private data directory.
    pub data_root: PathBuf,
    /// Asked before the first use of a high-risk capability.
    pub confirmer: Option<Arc<dyn HighRiskConfirmer>>,
}

impl ManagerOptions {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            confirmer: None,
        }
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn HighRiskConfirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }
}

struct PluginInstance {
    descriptor: PluginDescriptor,
    status: PluginStatus,
    context: Option<PluginContext>,
    definition: Option<PluginDefinition>,
    permissions: Arc<PermissionManager>,
    last_error: Option<String>,
}

struct InstanceSlot {
    id: String,
    // Serializes administrative calls for this id.
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<PluginInstance>,
}

impl InstanceSlot {
    fn state(&self) -> MutexGuard<'_, PluginInstance> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> PluginStatus {
        self.state().status
    }

    fn descriptor(&self) -> PluginDescriptor {
        self.state().descriptor.clone()
    }
}

/// Owns every discovered extension and its lifecycle.
pub struct PluginManager {
    loader: Arc<dyn ModuleLoader>,
    services: HostServices,
    options: ManagerOptions,
    instances: RwLock<Vec<Arc<InstanceSlot>>>,
    loaded: AtomicBool,
    shut_down: AtomicBool,
}

impl PluginManager {
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        services: HostServices,
        options: ManagerOptions,
    ) -> Self {
        Self {
            loader,
            services,
            options,
            instances: RwLock::new(Vec::new()),
            loaded: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Discovers and activates every extension under `directories`.
    ///
    /// Runs once per manager. Extension failures never fail the call; they
    /// are recorded on the failing extension and listed in the report.
    pub async fn load_all<P>(&self, directories: &[P]) -> Result<LoadReport, LifecycleError>
    where
        P: AsRef<Path> + Sync,
    {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyLoaded);
        }

        let started_at = Instant::now();
        let scan = scan_plugins(directories);
        let mut report = LoadReport {
            scan_errors: scan.errors,
            ..LoadReport::default()
        };

        for descriptor in resolve_load_order(scan.valid) {
            let Some(slot) = self.register(descriptor) else {
                continue;
            };
            let _op = slot.op_lock.lock().await;
            if self.shut_down.load(Ordering::SeqCst) {
                break;
            }
            // An overlapping enable/disable already decided this one.
            if slot.status() != PluginStatus::Unloaded {
                continue;
            }
            match self.activate_slot(&slot).await {
                Ok(()) => report.activated.push(slot.id.clone()),
                Err(_) => report.failed.push(slot.id.clone()),
            }
        }

        info!(
            "event=plugin_load_all module=lifecycle status=ok activated={} failed={} scan_errors={} duration_ms={}",
            report.activated.len(),
            report.failed.len(),
            report.scan_errors.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Re-runs activation for `id`, recovering from `error` or `disabled`.
    ///
    /// An already active extension is deactivated first.
    pub async fn enable_plugin(&self, id: &str) -> Result<(), LifecycleError> {
        let slot = self.slot(id)?;
        let _op = slot.op_lock.lock().await;
        self.ensure_running(&slot)?;

        if slot.status() == PluginStatus::Active {
            self.deactivate_slot(&slot).await;
        }
        self.activate_slot(&slot)
            .await
            .map_err(|err| LifecycleError::ActivationFailed {
                id: slot.id.clone(),
                message: err.to_string(),
            })
    }

    /// Deactivates `id` (best effort) and marks it `disabled`.
    pub async fn disable_plugin(&self, id: &str) -> Result<(), LifecycleError> {
        let slot = self.slot(id)?;
        let _op = slot.op_lock.lock().await;
        self.ensure_running(&slot)?;

        self.deactivate_slot(&slot).await;
        self.services.revoke_registrations(&slot.id);
        let mut state = slot.state();
        state.status = PluginStatus::Disabled;
        state.context = None;
        info!(
            "event=plugin_disable module=lifecycle status=ok plugin_id={}",
            slot.id
        );
        Ok(())
    }

    /// Deactivates active extensions in reverse registration order and marks
    /// every extension `unloaded`. Later calls are no-ops.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let slots = self.slots();
        for slot in slots.iter().rev() {
            let _op = slot.op_lock.lock().await;
            self.deactivate_slot(slot).await;
            self.services.revoke_registrations(&slot.id);
            let mut state = slot.state();
            state.status = PluginStatus::Unloaded;
            state.context = None;
        }
        info!(
            "event=plugin_shutdown module=lifecycle status=ok count={}",
            slots.len()
        );
    }

    /// Snapshot of every extension, in registration order.
    pub fn plugin_list(&self) -> Vec<PluginListItem> {
        self.slots()
            .iter()
            .map(|slot| {
                let state = slot.state();
                let config = &state.descriptor.config;
                PluginListItem {
                    id: state.descriptor.id.clone(),
                    name: config.display_name.clone(),
                    version: state.descriptor.version.clone(),
                    description: config.description.clone(),
                    status: state.status,
                    permissions: config.permissions.clone(),
                    has_ui: state.descriptor.has_ui(),
                    error: state.last_error.clone(),
                }
            })
            .collect()
    }

    pub fn plugin_status(&self, id: &str) -> Option<PluginStatus> {
        self.slot(id).ok().map(|slot| slot.status())
    }

    /// Context of an active extension, for host-side UI entry points.
    pub fn plugin_context(&self, id: &str) -> Option<PluginContext> {
        let slot = self.slot(id).ok()?;
        let state = slot.state();
        state.context.clone()
    }

    pub fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        self.slot(id).ok().map(|slot| slot.descriptor())
    }

    fn register(&self, descriptor: PluginDescriptor) -> Option<Arc<InstanceSlot>> {
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if instances.iter().any(|slot| slot.id == descriptor.id) {
            warn!(
                "event=plugin_register module=lifecycle status=skip reason=duplicate_id plugin_id={}",
                descriptor.id
            );
            return None;
        }

        let permissions = Arc::new(PermissionManager::new(
            descriptor.id.clone(),
            &descriptor.config.permissions,
            self.options.confirmer.clone(),
        ));
        let slot = Arc::new(InstanceSlot {
            id: descriptor.id.clone(),
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(PluginInstance {
                descriptor,
                status: PluginStatus::Unloaded,
                context: None,
                definition: None,
                permissions,
                last_error: None,
            }),
        });
        instances.push(Arc::clone(&slot));
        Some(slot)
    }

    fn slots(&self) -> Vec<Arc<InstanceSlot>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn slot(&self, id: &str) -> Result<Arc<InstanceSlot>, LifecycleError> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|slot| slot.id == id)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownPlugin(id.to_string()))
    }

    fn ensure_running(&self, slot: &InstanceSlot) -> Result<(), LifecycleError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(LifecycleError::ShutDown(slot.id.clone()));
        }
        Ok(())
    }

    /// One activation attempt. The caller holds the slot's `op_lock`.
    async fn activate_slot(&self, slot: &InstanceSlot) -> Result<(), ActivationError> {
        let (descriptor, permissions) = {
            let mut state = slot.state();
            state.status = PluginStatus::Loading;
            state.context = None;
            state.definition = None;
            state.last_error = None;
            (state.descriptor.clone(), Arc::clone(&state.permissions))
        };
        let started_at = Instant::now();
        info!(
            "event=plugin_activate module=lifecycle status=start plugin_id={}",
            slot.id
        );

        // Leftovers of a previous attempt must not survive into this one.
        self.services.revoke_registrations(&slot.id);
        let result = AssertUnwindSafe(self.run_activation(&descriptor, permissions))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ActivationError::Panicked(panic_message(&*payload))));

        let mut state = slot.state();
        match result {
            Ok((definition, context)) => {
                state.status = PluginStatus::Active;
                state.definition = Some(definition);
                state.context = Some(context);
                info!(
                    "event=plugin_activate module=lifecycle status=ok plugin_id={} duration_ms={}",
                    slot.id,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                drop(state);
                self.services.revoke_registrations(&slot.id);
                let mut state = slot.state();
                state.status = PluginStatus::Error;
                state.last_error = Some(err.to_string());
                error!(
                    "event=plugin_activate module=lifecycle status=error plugin_id={} duration_ms={} error={}",
                    slot.id,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    async fn run_activation(
        &self,
        descriptor: &PluginDescriptor,
        permissions: Arc<PermissionManager>,
    ) -> Result<(PluginDefinition, PluginContext), ActivationError> {
        let data_path = self.options.data_root.join(&descriptor.id);
        if let Err(err) = tokio::fs::create_dir_all(&data_path).await {
            warn!(
                "event=plugin_activate module=lifecycle status=warn plugin_id={} data_path={} error={}",
                descriptor.id,
                data_path.display(),
                err
            );
        }
        let context = PluginContext::new(
            PluginIdentity {
                id: descriptor.id.clone(),
                name: descriptor.config.display_name.clone(),
                version: descriptor.version.clone(),
                data_path,
            },
            permissions,
            self.services.clone(),
        );

        let module = self.loader.load(descriptor).await?;
        let definition = PluginDefinition::from_module(module, &descriptor.id).map_err(|source| {
            ActivationError::InvalidModule {
                entry: descriptor.entry_path(),
                source,
            }
        })?;
        definition
            .activate(context.clone())
            .await
            .map_err(ActivationError::Activate)?;
        Ok((definition, context))
    }

    /// Runs `deactivate` if the extension is active; failures are logged and
    /// swallowed. The caller holds the slot's `op_lock`.
    async fn deactivate_slot(&self, slot: &InstanceSlot) {
        let definition = {
            let state = slot.state();
            if state.status != PluginStatus::Active {
                return;
            }
            state.definition.clone()
        };
        let Some(teardown) = definition.as_ref().and_then(PluginDefinition::deactivate) else {
            return;
        };

        match AssertUnwindSafe(teardown).catch_unwind().await {
            Ok(Ok(())) => info!(
                "event=plugin_deactivate module=lifecycle status=ok plugin_id={}",
                slot.id
            ),
            Ok(Err(err)) => warn!(
                "event=plugin_deactivate module=lifecycle status=error plugin_id={} error={:#}",
                slot.id, err
            ),
            Err(payload) => warn!(
                "event=plugin_deactivate module=lifecycle status=error plugin_id={} panic={}",
                slot.id,
                panic_message(&*payload)
            ),
        }
    }
}
