//! Extension runtime.
//!
//! Discovery and manifest validation, per-extension permissions, the
//! capability-scoped context handed to extension code, and the lifecycle
//! manager that ties them together. Host collaborators live in
//! [`crate::host`].

pub mod capability;
pub mod context;
pub mod discovery;
pub mod kernel;
pub mod manifest;
pub mod module;
pub mod permission;
