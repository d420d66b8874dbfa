//! The VM manager seam.
//!
//! [`QubesHost`] is everything qubes-automation asks of dom0. [`QvmCli`]
//! implements it with the `qvm-*` tools and `qubesctl`; tests use an
//! in-memory implementation.

pub mod qvm;

use crate::config_file::PciDevice;
use crate::error::Result;
use crate::salt::SaltCall;

pub use qvm::QvmCli;

/// Operations on the Qubes host
pub trait QubesHost {
    // ---- queries -----------------------------------------------------------

    /// `qvm-ls --raw-data --fields NAME`
    fn list_vms(&mut self) -> Result<Vec<String>>;
    /// `qvm-ls --raw-data --running --fields NAME`
    fn list_running(&mut self) -> Result<Vec<String>>;
    /// `qvm-ls --raw-data --fields NAME,<field>` as `(name, value)` pairs
    fn list_with_field(&mut self, field: &str) -> Result<Vec<(String, String)>>;
    fn get_pref(&mut self, vm: &str, pref: &str) -> Result<String>;
    fn get_global_pref(&mut self, pref: &str) -> Result<String>;
    /// `None` when the feature is not set
    fn get_feature(&mut self, vm: &str, feature: &str) -> Result<Option<String>>;
    fn list_tags(&mut self, vm: &str) -> Result<Vec<String>>;
    /// Attached device ids, e.g. `dom0:00_14.0`
    fn list_pci(&mut self, vm: &str) -> Result<Vec<String>>;
    fn appmenu_whitelist(&mut self, vm: &str) -> Result<Vec<String>>;
    /// Raw `qvm-service --list` lines
    fn list_services(&mut self, vm: &str) -> Result<Vec<String>>;

    // ---- mutations ---------------------------------------------------------

    fn set_pref(&mut self, vm: &str, pref: &str, value: &str) -> Result<()>;
    /// `qvm-prefs --default`: follow the system default again
    fn reset_pref(&mut self, vm: &str, pref: &str) -> Result<()>;
    fn set_global_pref(&mut self, pref: &str, value: &str) -> Result<()>;
    fn set_feature(&mut self, vm: &str, feature: &str, value: &str) -> Result<()>;
    fn add_tag(&mut self, vm: &str, tag: &str) -> Result<()>;
    fn attach_pci(&mut self, vm: &str, device: &PciDevice) -> Result<()>;
    fn create_dispvm(&mut self, name: &str, template: &str, label: &str) -> Result<()>;
    fn start(&mut self, vm: &str) -> Result<()>;
    /// Shut down and wait
    fn shutdown(&mut self, vm: &str) -> Result<()>;
    fn remove(&mut self, vm: &str, force: bool) -> Result<()>;
    /// Reinstall a root template package from the Qubes repositories
    fn reinstall_template(&mut self, template: &str) -> Result<()>;
    fn apply_salt(&mut self, call: &SaltCall) -> Result<()>;

    // ---- derived -----------------------------------------------------------

    fn vm_exists(&mut self, vm: &str) -> Result<bool> {
        Ok(self.list_vms()?.iter().any(|name| name == vm))
    }

    fn is_running(&mut self, vm: &str) -> Result<bool> {
        Ok(self.list_running()?.iter().any(|name| name == vm))
    }

    /// The template has pending updates
    fn is_updateable(&mut self, vm: &str) -> Result<bool> {
        Ok(self.get_feature(vm, "updates-available")?.as_deref() == Some("1"))
    }

    /// Qubes whose template is `template`
    fn vms_using_template(&mut self, template: &str) -> Result<Vec<String>> {
        Ok(matching(self.list_with_field("TEMPLATE")?, template))
    }

    /// Qubes whose network VM is `netvm`
    fn vms_connected_to(&mut self, netvm: &str) -> Result<Vec<String>> {
        Ok(matching(self.list_with_field("NETVM")?, netvm))
    }
}

fn matching(pairs: Vec<(String, String)>, value: &str) -> Vec<String> {
    pairs
        .into_iter()
        .filter(|(_, v)| v == value)
        .map(|(name, _)| name)
        .collect()
}

// ============================================================================
// Output parsing
// ============================================================================

/// Non-empty trimmed lines
pub fn parse_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `qvm-ls --raw-data` output of two fields: `name|value` per line
pub fn parse_raw_pairs(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let (name, value) = line.trim().split_once('|')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// First column of `qvm-pci list`
pub fn parse_pci_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|id| id.contains(':') && *id != "BACKEND:DEVID")
        .map(str::to_string)
        .collect()
}

/// Whether `service` is listed as `on` in `qvm-service --list` lines
pub fn service_enabled(lines: &[String], service: &str) -> bool {
    lines.iter().any(|line| {
        let mut cols = line.split_whitespace();
        cols.next() == Some(service) && cols.last() == Some("on")
    })
}
