//! [`QubesHost`] over the dom0 command-line tools.
//!
//! Queries always run. With `dry_run` set, mutations and state runs are
//! logged and skipped so `qa --dry-run apply` shows what would change.

use tracing::{info, warn};

use super::{QubesHost, parse_lines, parse_pci_devices, parse_raw_pairs};
use crate::config_file::{PciDevice, Settings};
use crate::error::Result;
use crate::runner::{CommandSpec, OutputMode, query, run_command};
use crate::salt::pillar::TargetPillar;
use crate::salt::{SaltCall, SaltTarget};

pub struct QvmCli {
    settings: Settings,
    dry_run: bool,
}

impl QvmCli {
    pub fn new(settings: Settings, dry_run: bool) -> Self {
        Self { settings, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn query(&self, program: &str, args: &[&str]) -> Result<String> {
        query(&CommandSpec::new(program, args.iter().copied()))
    }

    fn query_lines(&self, program: &str, args: &[&str]) -> Result<Vec<String>> {
        Ok(parse_lines(&self.query(program, args)?))
    }

    /// Run a mutating command with output passed through
    fn mutate(&self, spec: CommandSpec) -> Result<()> {
        if self.dry_run {
            info!("[dry-run] would run {}", spec);
            return Ok(());
        }
        info!("Running command {}", spec);
        run_command(&spec, OutputMode::Inherit)?.ensure_success(&spec)?;
        Ok(())
    }
}

impl QubesHost for QvmCli {
    fn list_vms(&mut self) -> Result<Vec<String>> {
        self.query_lines("qvm-ls", &["--raw-data", "--fields", "NAME"])
    }

    fn list_running(&mut self) -> Result<Vec<String>> {
        self.query_lines("qvm-ls", &["--raw-data", "--running", "--fields", "NAME"])
    }

    fn list_with_field(&mut self, field: &str) -> Result<Vec<(String, String)>> {
        let fields = format!("NAME,{}", field);
        let out = self.query("qvm-ls", &["--raw-data", "--fields", &fields])?;
        Ok(parse_raw_pairs(&out))
    }

    fn get_pref(&mut self, vm: &str, pref: &str) -> Result<String> {
        self.query("qvm-prefs", &[vm, pref])
    }

    fn get_global_pref(&mut self, pref: &str) -> Result<String> {
        self.query("qubes-prefs", &[pref])
    }

    fn get_feature(&mut self, vm: &str, feature: &str) -> Result<Option<String>> {
        let spec = CommandSpec::new("qvm-features", [vm, feature]);
        let output = run_command(&spec, OutputMode::Capture)?;
        // unset features make qvm-features exit non-zero
        if output.success {
            Ok(Some(output.trimmed().to_string()))
        } else {
            Ok(None)
        }
    }

    fn list_tags(&mut self, vm: &str) -> Result<Vec<String>> {
        self.query_lines("qvm-tags", &[vm, "list"])
    }

    fn list_pci(&mut self, vm: &str) -> Result<Vec<String>> {
        Ok(parse_pci_devices(&self.query("qvm-pci", &["list", vm])?))
    }

    fn appmenu_whitelist(&mut self, vm: &str) -> Result<Vec<String>> {
        self.query_lines("qvm-appmenus", &["--get-whitelist", vm])
    }

    fn list_services(&mut self, vm: &str) -> Result<Vec<String>> {
        self.query_lines("qvm-service", &["--list", vm])
    }

    fn set_pref(&mut self, vm: &str, pref: &str, value: &str) -> Result<()> {
        self.mutate(CommandSpec::new("qvm-prefs", [vm, pref, value]))
    }

    fn reset_pref(&mut self, vm: &str, pref: &str) -> Result<()> {
        self.mutate(CommandSpec::new("qvm-prefs", ["--default", vm, pref]))
    }

    fn set_global_pref(&mut self, pref: &str, value: &str) -> Result<()> {
        self.mutate(CommandSpec::new("qubes-prefs", [pref, value]))
    }

    fn set_feature(&mut self, vm: &str, feature: &str, value: &str) -> Result<()> {
        self.mutate(CommandSpec::new("qvm-features", [vm, feature, value]))
    }

    fn add_tag(&mut self, vm: &str, tag: &str) -> Result<()> {
        self.mutate(CommandSpec::new("qvm-tags", [vm, "add", tag]))
    }

    fn attach_pci(&mut self, vm: &str, device: &PciDevice) -> Result<()> {
        let mut args = vec!["attach", "--persistent"];
        if device.no_strict_reset {
            args.push("-ono-strict-reset=True");
        }
        args.push(vm);
        args.push(&device.device);
        self.mutate(CommandSpec::new("qvm-pci", args))
    }

    fn create_dispvm(&mut self, name: &str, template: &str, label: &str) -> Result<()> {
        self.mutate(CommandSpec::new(
            "qvm-create",
            ["--template", template, "--class", "DispVM", "--label", label, name],
        ))
    }

    fn start(&mut self, vm: &str) -> Result<()> {
        self.mutate(CommandSpec::new("qvm-start", ["--verbose", vm]))
    }

    fn shutdown(&mut self, vm: &str) -> Result<()> {
        info!("Shutting down {}", vm);
        self.mutate(CommandSpec::new("qvm-shutdown", ["--wait", vm]))
    }

    fn remove(&mut self, vm: &str, force: bool) -> Result<()> {
        let flag = if force { "--force" } else { "--verbose" };
        self.mutate(CommandSpec::new("qvm-remove", [flag, vm]))
    }

    fn reinstall_template(&mut self, template: &str) -> Result<()> {
        let package = format!("qubes-template-{}", template);
        self.mutate(CommandSpec::new(
            "qubes-dom0-update",
            ["--action=reinstall", package.as_str()],
        ))
    }

    fn apply_salt(&mut self, call: &SaltCall) -> Result<()> {
        let spec = call.qubesctl_command(self.settings.use_sudo);
        match &call.target {
            SaltTarget::Dom0 => self.mutate(spec),
            SaltTarget::Vm(vm) => {
                if self.dry_run {
                    info!("[dry-run] would apply {} in {} with pillar {}", call.sls(), vm, call.pillar_json());
                    return Ok(());
                }
                for (key, value) in &call.pillar {
                    info!("    {} pillar {}={}", call.state, key, value);
                }
                let _pillar =
                    TargetPillar::install(&self.settings.user_pillar_dir, vm, &call.pillar)?;
                let result = self.mutate(spec);
                if result.is_err() {
                    warn!("State {} failed in {}", call.sls(), vm);
                }
                result
            }
        }
    }
}
