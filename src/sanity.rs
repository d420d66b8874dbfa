//! Pre-flight sanity checks for the runtime environment
//!
//! Host-touching commands verify that the dom0 tools they drive are on
//! `PATH` before doing anything, so a run on a non-Qubes machine stops with
//! a clear message instead of half-way through an apply.

use crate::process_guard::CommandProcessGroup;
use std::process::Command;
use tracing::{debug, info};

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty()
    }

    /// Human readable report of what is missing
    pub fn describe(&self) -> String {
        let mut lines = vec!["Missing required binaries:".to_string()];
        for binary in &self.missing_binaries {
            lines.push(format!("  - {} ({})", binary, package_for_binary(binary)));
        }
        lines.push("qubes-automation must run in dom0 of a Qubes OS host.".to_string());
        lines.join("\n")
    }
}

/// Binaries every host-touching command needs
pub const REQUIRED_BINARIES: &[&str] = &[
    "qvm-ls",
    "qvm-prefs",
    "qvm-features",
    "qvm-tags",
    "qvm-pci",
    "qvm-appmenus",
    "qvm-service",
    "qvm-create",
    "qvm-remove",
    "qvm-start",
    "qvm-shutdown",
    "qubes-prefs",
    "qubesctl",
];

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .in_new_process_group()
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check `binaries`; `sudo` is added when salt runs through it
pub fn verify_binaries(binaries: &[&str], use_sudo: bool) -> SanityCheckResult {
    let mut missing: Vec<String> = binaries
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| b.to_string())
        .collect();
    if use_sudo && !binary_exists("sudo") {
        missing.push("sudo".to_string());
    }
    SanityCheckResult {
        missing_binaries: missing,
    }
}

/// Map binary names to the dom0 package providing them
fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "qubesctl" => "qubes-mgmt-salt-dom0",
        "qubes-prefs" | "qvm-ls" | "qvm-prefs" | "qvm-features" | "qvm-tags" | "qvm-pci"
        | "qvm-service" | "qvm-create" | "qvm-remove" | "qvm-start" | "qvm-shutdown" => {
            "qubes-core-admin-client"
        }
        "qvm-appmenus" => "qubes-desktop-linux-manager",
        "sudo" => "sudo",
        _ => "unknown",
    }
}

/// Verify the environment, or describe what is missing
pub fn run_preflight_checks(use_sudo: bool) -> Result<(), String> {
    debug!("Running pre-flight sanity checks...");
    let result = verify_binaries(REQUIRED_BINARIES, use_sudo);
    if !result.is_ok() {
        return Err(result.describe());
    }
    info!("Pre-flight checks passed");
    Ok(())
}
