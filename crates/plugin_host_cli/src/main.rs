//! Command-line companion for extension authors and host packagers.
//!
//! # Responsibility
//! - Lint one extension package without starting a host.
//! - Run discovery over configured roots and print the report as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use plugin_host_core::{
    core_version, init_logging, parse_manifest_file, scan_plugins, Capability, HostConfig,
    ScanReport,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "plugin-host", about = "Inspect extension packages for the plugin host")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse one package directory and print its descriptor.
    Validate {
        /// Directory containing `package.json`.
        package_dir: PathBuf,
    },
    /// Scan plugin directories and print valid descriptors and errors.
    Scan {
        /// Host config whose `plugin_dirs` are scanned before any extra dirs.
        #[arg(long, env = "PLUGIN_HOST_CONFIG")]
        config: Option<PathBuf>,
        /// Extra directories to scan.
        dirs: Vec<PathBuf>,
    },
    /// List capability tokens extensions may declare.
    Capabilities,
    /// Print the core version.
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Validate { package_dir } => validate(&package_dir),
        Command::Scan { config, dirs } => scan(config.as_deref(), dirs),
        Command::Capabilities => {
            let tokens: Vec<_> = Capability::ALL
                .iter()
                .map(|capability| {
                    json!({
                        "token": capability.as_str(),
                        "highRisk": capability.is_high_risk(),
                        "description": capability.description(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&tokens)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => {
            println!("plugin_host_core version={}", core_version());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate(package_dir: &Path) -> anyhow::Result<ExitCode> {
    let descriptor = parse_manifest_file(package_dir)?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(ExitCode::SUCCESS)
}

fn scan(config_path: Option<&Path>, extra_dirs: Vec<PathBuf>) -> anyhow::Result<ExitCode> {
    let mut dirs = Vec::new();
    if let Some(path) = config_path {
        let config = HostConfig::load(path)
            .with_context(|| format!("loading config `{}`", path.display()))?;
        if let Some(log_dir) = &config.log_dir {
            init_logging(&config.log_level, log_dir)?;
        }
        dirs.extend(config.plugin_dirs);
    }
    dirs.extend(extra_dirs);
    if dirs.is_empty() {
        anyhow::bail!("nothing to scan: pass directories or --config");
    }

    let report = scan_plugins(&dirs);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(scan_exit_status(&report)))
}

/// Exit status for a finished scan: 0 when clean, 2 when any package failed.
fn scan_exit_status(report: &ScanReport) -> u8 {
    if report.errors.is_empty() {
        0
    } else {
        2
    }
}
