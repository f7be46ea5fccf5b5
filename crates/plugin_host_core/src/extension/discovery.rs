//! Extension package discovery.
//!
//! # Responsibility
//! - Enumerate candidate package directories under configured roots.
//! - Collect per-candidate failures instead of aborting the scan.
//!
//! # Invariants
//! - `scan_plugins` is total: missing roots, unreadable files and malformed
//!   metadata end up in `ScanReport::errors`, never in a panic or `Err`.
//! - Candidates are visited in sorted directory-name order per root, roots in
//!   the order given.
//! - At most one descriptor per id; later duplicates are reported.

use crate::extension::manifest::{
    parse_manifest, read_metadata, PluginDescriptor, DECLARATION_KEY, METADATA_FILE_NAME,
};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One discovery failure, tied to the root and candidate it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanError {
    /// Root directory being scanned.
    pub directory: PathBuf,
    /// Candidate package directory, when the failure is candidate-specific.
    pub candidate: Option<PathBuf>,
    pub message: String,
}

/// Discovery result: validated descriptors plus collected failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub valid: Vec<PluginDescriptor>,
    pub errors: Vec<ScanError>,
}

/// Scans every root for extension packages.
///
/// A subdirectory is a candidate only when it holds a metadata file; metadata
/// without an extension-declaration block is skipped silently.
pub fn scan_plugins<P: AsRef<Path>>(directories: &[P]) -> ScanReport {
    let started_at = Instant::now();
    let mut report = ScanReport::default();
    let mut seen_ids = BTreeSet::new();

    for directory in directories {
        scan_root(directory.as_ref(), &mut report, &mut seen_ids);
    }

    info!(
        "event=plugin_scan module=discovery status=ok roots={} valid={} errors={} duration_ms={}",
        directories.len(),
        report.valid.len(),
        report.errors.len(),
        started_at.elapsed().as_millis()
    );
    report
}

/// Orders descriptors for activation.
///
/// Scan order is kept as-is; this is the single place a dependency-aware
/// ordering would go.
pub fn resolve_load_order(descriptors: Vec<PluginDescriptor>) -> Vec<PluginDescriptor> {
    descriptors
}

fn scan_root(root: &Path, report: &mut ScanReport, seen_ids: &mut BTreeSet<String>) {
    if !root.is_dir() {
        debug!(
            "event=plugin_scan module=discovery status=skip reason=missing_root root={}",
            root.display()
        );
        return;
    }

    let mut candidates = match list_subdirectories(root) {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(
                "event=plugin_scan module=discovery status=error root={} error={}",
                root.display(),
                err
            );
            report.errors.push(ScanError {
                directory: root.to_path_buf(),
                candidate: None,
                message: format!("failed to read plugin directory: {err}"),
            });
            return;
        }
    };
    candidates.sort();

    for candidate in candidates {
        if !candidate.join(METADATA_FILE_NAME).is_file() {
            continue;
        }

        let raw = match read_metadata(&candidate) {
            Ok(raw) => raw,
            Err(err) => {
                report.errors.push(candidate_error(root, &candidate, err.to_string()));
                continue;
            }
        };
        if matches!(raw.get(DECLARATION_KEY), None | Some(Value::Null)) {
            debug!(
                "event=plugin_scan module=discovery status=skip reason=not_an_extension candidate={}",
                candidate.display()
            );
            continue;
        }

        match parse_manifest(&raw, &candidate) {
            Ok(descriptor) => {
                if !seen_ids.insert(descriptor.id.clone()) {
                    report.errors.push(candidate_error(
                        root,
                        &candidate,
                        format!("duplicate extension id `{}`", descriptor.id),
                    ));
                    continue;
                }
                report.valid.push(descriptor);
            }
            Err(err) => {
                warn!(
                    "event=plugin_scan module=discovery status=error candidate={} error={}",
                    candidate.display(),
                    err
                );
                report.errors.push(candidate_error(root, &candidate, err.to_string()));
            }
        }
    }
}

fn list_subdirectories(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut directories = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            directories.push(path);
        }
    }
    Ok(directories)
}

fn candidate_error(root: &Path, candidate: &Path, message: String) -> ScanError {
    ScanError {
        directory: root.to_path_buf(),
        candidate: Some(candidate.to_path_buf()),
        message,
    }
}
