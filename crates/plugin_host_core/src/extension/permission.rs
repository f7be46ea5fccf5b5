//! Per-extension permission gate.
//!
//! # Responsibility
//! - Answer whether an extension declared a capability.
//! - Gate first use of high-risk capabilities behind a one-time user
//!   confirmation, cached per manager.
//!
//! # Invariants
//! - `declared` never changes after construction.
//! - `confirmed` only grows and is always a subset of `declared`: confirmation
//!   runs only after the declaration check passed.
//! - The confirmer is asked at most once per high-risk capability, even under
//!   concurrent callers.

use crate::extension::capability::Capability;
use async_trait::async_trait;
use log::{info, warn};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Interactive confirmation for high-risk capabilities.
#[async_trait]
pub trait HighRiskConfirmer: Send + Sync {
    /// Returns `Ok(true)` when the user allows `plugin_id` to use `capability`.
    async fn confirm(&self, plugin_id: &str, capability: Capability) -> anyhow::Result<bool>;
}

/// Raised when an extension uses a capability it may not use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionDenied {
    #[error(
        "plugin `{plugin_id}` is not allowed to use `{capability}`: declare \"{capability}\" in `extension.permissions` of its package.json"
    )]
    Undeclared {
        plugin_id: String,
        capability: Capability,
    },
    #[error("plugin `{plugin_id}` was denied `{capability}` by the user")]
    Declined {
        plugin_id: String,
        capability: Capability,
    },
}

impl PermissionDenied {
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::Undeclared { plugin_id, .. } | Self::Declined { plugin_id, .. } => plugin_id,
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Undeclared { capability, .. } | Self::Declined { capability, .. } => *capability,
        }
    }
}

/// Declared and confirmed capabilities of one extension.
pub struct PermissionManager {
    plugin_id: String,
    declared: BTreeSet<Capability>,
    confirmed: Mutex<BTreeSet<Capability>>,
    // Serializes prompts so one capability is never asked about twice.
    confirm_gate: tokio::sync::Mutex<()>,
    confirmer: Option<Arc<dyn HighRiskConfirmer>>,
}

impl PermissionManager {
    /// Builds a manager over a copy of `declared`.
    pub fn new(
        plugin_id: impl Into<String>,
        declared: &[Capability],
        confirmer: Option<Arc<dyn HighRiskConfirmer>>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            declared: declared.iter().copied().collect(),
            confirmed: Mutex::new(BTreeSet::new()),
            confirm_gate: tokio::sync::Mutex::new(()),
            confirmer,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn check(&self, capability: Capability) -> bool {
        self.declared.contains(&capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), PermissionDenied> {
        if self.check(capability) {
            return Ok(());
        }
        warn!(
            "event=permission_denied module=permission plugin_id={} capability={} reason=undeclared",
            self.plugin_id, capability
        );
        Err(PermissionDenied::Undeclared {
            plugin_id: self.plugin_id.clone(),
            capability,
        })
    }

    /// Like [`require`](Self::require), plus a one-time confirmation for
    /// high-risk capabilities.
    ///
    /// Without a confirmer the declaration alone grants the capability.
    pub async fn require_with_confirm(
        &self,
        capability: Capability,
    ) -> Result<(), PermissionDenied> {
        self.require(capability)?;
        if !capability.is_high_risk() || self.is_confirmed(capability) {
            return Ok(());
        }
        let Some(confirmer) = self.confirmer.as_ref() else {
            return Ok(());
        };

        let _gate = self.confirm_gate.lock().await;
        if self.is_confirmed(capability) {
            return Ok(());
        }

        let allowed = match confirmer.confirm(&self.plugin_id, capability).await {
            Ok(allowed) => allowed,
            Err(err) => {
                warn!(
                    "event=permission_confirm module=permission status=error plugin_id={} capability={} error={}",
                    self.plugin_id, capability, err
                );
                false
            }
        };
        if !allowed {
            warn!(
                "event=permission_denied module=permission plugin_id={} capability={} reason=declined",
                self.plugin_id, capability
            );
            return Err(PermissionDenied::Declined {
                plugin_id: self.plugin_id.clone(),
                capability,
            });
        }

        self.confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(capability);
        info!(
            "event=permission_confirm module=permission status=ok plugin_id={} capability={}",
            self.plugin_id, capability
        );
        Ok(())
    }

    /// Whether the user already confirmed `capability` for this manager.
    pub fn is_confirmed(&self, capability: Capability) -> bool {
        self.confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&capability)
    }

    /// Declared capabilities, as a copy.
    pub fn permissions(&self) -> Vec<Capability> {
        self.declared.iter().copied().collect()
    }
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionManager")
            .field("plugin_id", &self.plugin_id)
            .field("declared", &self.declared)
            .field("has_confirmer", &self.confirmer.is_some())
            .finish_non_exhaustive()
    }
}
