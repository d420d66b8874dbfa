//! Destroy and rebuild a template or DispVM template.
//!
//! Qubes refuses to remove a template that is still in use, so everything
//! depending on it is parked first:
//!
//! - qubes based on a cloned template move to a temporary alternative
//!   template and back
//! - DispVMs of a DispVM template are removed and recreated, together with
//!   the network connections and global prefs that pointed at them

use tracing::info;

use super::Engine;
use crate::catalog;
use crate::error::{QubesError, Result};
use crate::vm::VmKind;

/// Global prefs that may name a DispVM, e.g. a disposable sys-net
const DISPVM_GLOBAL_PREFS: &[&str] = &["default_netvm", "clockvm"];

/// DispVMs removed from a DispVM template, and what pointed at them
#[derive(Debug, Default)]
struct ParkedDispVms {
    dispvms: Vec<String>,
    /// `(qube, its netvm)` for every qube connected to one of the DispVMs
    connected: Vec<(String, String)>,
    /// `(global pref, DispVM)` cleared during teardown
    global_prefs: Vec<(&'static str, String)>,
}

impl Engine<'_> {
    /// Remove and rebuild `name` from its declaration
    pub fn regenerate(&mut self, name: &str) -> Result<()> {
        let vm = self.definition(name)?;
        if !self.host.vm_exists(name)? {
            info!("{} does not exist, creating it", name);
            self.check_vm(name, true)?;
            return Ok(());
        }

        match &vm.kind {
            VmKind::Template { cloned_from: None } => {
                info!("Reinstalling root template {}", name);
                self.host.reinstall_template(name)?;
                self.check_vm(name, true)?;
            }
            VmKind::Template { cloned_from: Some(_) } => self.regenerate_clone(name)?,
            VmKind::DispVmTemplate { .. } => {
                let parked = self.park_dispvms(name)?;
                info!("Removing {}", name);
                self.host.remove(name, false)?;
                info!("Regenerating {}", name);
                self.check_vm(name, true)?;
                self.restore_dispvms(parked)?;
            }
            VmKind::App { .. } | VmKind::DispVm { .. } => {
                return Err(QubesError::validation(format!(
                    "{} is a {}; only templates and DispVM templates can be regenerated",
                    name,
                    vm.class()
                )));
            }
        }
        Ok(())
    }

    fn regenerate_clone(&mut self, name: &str) -> Result<()> {
        let alternative = catalog::temporary_alternative_template(name);
        if !self.host.vm_exists(&alternative)? {
            return Err(QubesError::host(format!(
                "cannot regenerate {}: temporary template {} does not exist",
                name, alternative
            )));
        }

        let users = self.host.vms_using_template(name)?;
        let mut parked = Vec::new();
        for user in &users {
            let is_dispvm_template = self
                .inventory
                .get(user)
                .is_some_and(|vm| matches!(vm.kind, VmKind::DispVmTemplate { .. }));
            if is_dispvm_template {
                parked.push(self.park_dispvms(user)?);
            }
            info!("Setting {} template to {}", user, alternative);
            self.host.set_pref(user, "template", &alternative)?;
        }

        info!("Removing {}", name);
        self.host.remove(name, false)?;
        info!("Regenerating {}", name);
        self.check_vm(name, true)?;

        for user in &users {
            info!("Setting {} template to {}", user, name);
            self.host.set_pref(user, "template", name)?;
        }
        for dispvms in parked {
            self.restore_dispvms(dispvms)?;
        }
        Ok(())
    }

    /// Disconnect, shut down and remove every DispVM of `template`
    fn park_dispvms(&mut self, template: &str) -> Result<ParkedDispVms> {
        let mut parked = ParkedDispVms::default();
        for dispvm in self.host.vms_using_template(template)? {
            let declared = self
                .inventory
                .get(&dispvm)
                .is_some_and(|vm| matches!(vm.kind, VmKind::DispVm { .. }));
            if !declared {
                return Err(QubesError::validation(format!(
                    "cannot regenerate {}: {} uses it but is not a declared DispVM",
                    template, dispvm
                )));
            }
            for connected in self.host.vms_connected_to(&dispvm)? {
                parked.connected.push((connected, dispvm.clone()));
            }
            parked.dispvms.push(dispvm);
        }
        // qvm-ls lists alphabetically; rebuild in declaration order so a
        // disposable netvm exists before the DispVMs that use it
        let inventory = self.inventory;
        parked
            .dispvms
            .sort_by_key(|dispvm| inventory.position(dispvm).unwrap_or(usize::MAX));

        for (connected, netvm) in &parked.connected {
            info!("Removing netvm {} from {}", netvm, connected);
            self.host.set_pref(connected, "netvm", "")?;
        }
        for &pref in DISPVM_GLOBAL_PREFS {
            let current = self.host.get_global_pref(pref)?;
            if parked.dispvms.contains(&current) {
                info!("Clearing global {} (was {})", pref, current);
                self.host.set_global_pref(pref, "")?;
                parked.global_prefs.push((pref, current));
            }
        }
        for dispvm in &parked.dispvms {
            if self.host.is_running(dispvm)? {
                self.host.shutdown(dispvm)?;
            }
            info!("Removing {}", dispvm);
            self.host.remove(dispvm, true)?;
        }
        Ok(parked)
    }

    /// Recreate parked DispVMs and reconnect what pointed at them
    fn restore_dispvms(&mut self, parked: ParkedDispVms) -> Result<()> {
        for dispvm in &parked.dispvms {
            info!("Regenerating {}", dispvm);
            self.check_vm(dispvm, true)?;
        }
        for (pref, value) in &parked.global_prefs {
            info!("Restoring global {} to {}", pref, value);
            self.host.set_global_pref(pref, value)?;
        }
        for (connected, netvm) in &parked.connected {
            info!("Setting netvm {} for {}", netvm, connected);
            if self.host.is_running(connected)? && !self.host.is_running(netvm)? {
                self.host.start(netvm)?;
            }
            self.host.set_pref(connected, "netvm", netvm)?;
        }
        Ok(())
    }
}
