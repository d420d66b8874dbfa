//! Check and apply.
//!
//! `check_vm(name, false)` reports drift of one qube. `check_vm(name, true)`
//! also creates it when missing, runs its states and fixes every drifted
//! value.

use tracing::{info, warn};

use super::{Engine, creation_call};
use crate::error::{QubesError, Result};
use crate::salt::{InstallPackages, SaltArgs, SaltCall, SaltState, Upgrade};
use crate::state::{
    AppMenuState, FeaturesState, PciState, PrefsState, ServicesState, State, TagsState,
};
use crate::vm::{VmDefinition, VmKind};

/// Outcome of a pass over several qubes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub checked: Vec<String>,
    pub drifted: Vec<String>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }
}

impl Engine<'_> {
    /// Check every qube, or only `names`, in declaration order
    pub fn check_all(&mut self, names: &[String], fix: bool) -> Result<Report> {
        for name in names {
            self.definition(name)?;
        }
        let inventory = self.inventory;
        let mut report = Report::default();
        for vm in inventory.iter() {
            if !names.is_empty() && !names.contains(&vm.name) {
                continue;
            }
            if self.check_vm(&vm.name, fix)? {
                report.drifted.push(vm.name.clone());
            }
            report.checked.push(vm.name.clone());
        }
        Ok(report)
    }

    /// Check one qube. Returns true if anything differed.
    pub fn check_vm(&mut self, name: &str, fix: bool) -> Result<bool> {
        let vm = self.definition(name)?;
        if fix {
            info!("Applying {} {}", vm.class(), vm.name);
        }
        match &vm.kind {
            VmKind::Template { cloned_from } => self.check_template(vm, cloned_from.as_deref(), fix),
            _ => self.check_app(vm, fix),
        }
    }

    fn check_template(
        &mut self,
        vm: &VmDefinition,
        cloned_from: Option<&str>,
        fix: bool,
    ) -> Result<bool> {
        let name = vm.name.as_str();
        let mut drift = false;
        if !self.host.vm_exists(name)? {
            warn!("Template {} does not exist", name);
            if !fix {
                return Ok(true);
            }
            let (Some(parent), Some(clone)) = (cloned_from, creation_call(vm)) else {
                return Err(QubesError::host(format!(
                    "will not create root template {}; install it with qvm-template",
                    name
                )));
            };
            self.require_on_host(parent, name)?;
            info!("Cloning template {} to {}", parent, name);
            self.host.apply_salt(&clone)?;
            if !self.created(name)? {
                return Ok(true);
            }
            drift = true;
        }

        if fix {
            self.run_salts(name, &vm.presalts)?;
            self.install_packages(name, &vm.packages)?;
            self.upgrade(name)?;
        }
        drift |= self.check_common(vm, fix)?;
        if fix {
            self.run_salts(name, &vm.salts)?;
        }
        Ok(drift)
    }

    fn check_app(&mut self, vm: &VmDefinition, fix: bool) -> Result<bool> {
        let name = vm.name.as_str();
        let mut drift = false;
        if !self.host.vm_exists(name)? {
            warn!("{} {} does not exist", vm.class(), name);
            if !fix {
                return Ok(true);
            }
            let template = vm.kind.parent().unwrap_or_default();
            self.require_on_host(template, name)?;
            info!("Creating {} {} based on {}", vm.class(), name, template);
            self.create(vm, template)?;
            if !self.created(name)? {
                return Ok(true);
            }
            self.run_salts(name, &vm.presalts)?;
            drift = true;
        }

        drift |= AppMenuState {
            vm: name,
            entries: &vm.appmenu,
        }
        .check(self.host, fix)?;
        drift |= self.check_common(vm, fix)?;
        drift |= PciState {
            vm: name,
            devices: &vm.pci,
        }
        .check(self.host, fix)?;
        drift |= ServicesState {
            vm: name,
            services: &vm.services,
        }
        .check(self.host, fix)?;
        if fix {
            self.run_salts(name, &vm.salts)?;
        }
        Ok(drift)
    }

    /// Prefs, features and tags
    fn check_common(&mut self, vm: &VmDefinition, fix: bool) -> Result<bool> {
        let name = vm.name.as_str();
        let states: [&dyn State; 3] = [
            &PrefsState {
                vm: name,
                prefs: &vm.prefs,
            },
            &FeaturesState {
                vm: name,
                features: &vm.features,
            },
            &TagsState {
                vm: name,
                tags: &vm.tags,
            },
        ];
        let mut drift = false;
        for state in states {
            drift |= state.check(self.host, fix)?;
        }
        Ok(drift)
    }

    fn create(&mut self, vm: &VmDefinition, template: &str) -> Result<()> {
        match creation_call(vm) {
            Some(call) => self.host.apply_salt(&call),
            None => self
                .host
                .create_dispvm(&vm.name, template, &vm.prefs.label.to_string()),
        }
    }

    /// Whether `name` exists after a create step (not the case in a dry run)
    fn created(&mut self, name: &str) -> Result<bool> {
        let exists = self.host.vm_exists(name)?;
        if !exists {
            info!("{} was not created, skipping its remaining checks", name);
        }
        Ok(exists)
    }

    fn require_on_host(&mut self, source: &str, for_vm: &str) -> Result<()> {
        if self.host.vm_exists(source)? {
            Ok(())
        } else {
            Err(QubesError::host(format!(
                "cannot create {}: {} does not exist on this host",
                for_vm, source
            )))
        }
    }

    fn run_salts(&mut self, name: &str, salts: &[SaltState]) -> Result<()> {
        for salt in salts {
            info!("Applying {} to {}", salt.state_name(), name);
            self.host.apply_salt(&SaltCall::on_vm(salt, name))?;
        }
        Ok(())
    }

    /// Install `packages` in a template through the update VM
    pub fn install_packages(&mut self, template: &str, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        info!("Ensuring template {} has installed {}", template, packages.join(", "));
        let call = SaltCall::on_vm(
            &InstallPackages {
                packages: packages.to_vec(),
            },
            template,
        );
        self.through_updatevm(&call)
    }

    pub fn upgrade(&mut self, template: &str) -> Result<()> {
        info!("Upgrading template {}", template);
        self.through_updatevm(&SaltCall::on_vm(&Upgrade, template))
    }

    /// Run `call`, then shut the update VM down again if it was not running
    fn through_updatevm(&mut self, call: &SaltCall) -> Result<()> {
        let updatevm = self.host.get_global_pref("updatevm")?;
        let was_running = updatevm.is_empty() || self.host.is_running(&updatevm)?;
        self.host.apply_salt(call)?;
        if !was_running && self.host.is_running(&updatevm)? {
            self.host.shutdown(&updatevm)?;
        }
        Ok(())
    }

    /// Upgrade declared templates with pending updates, or all with `all`
    pub fn upgrade_templates(&mut self, names: &[String], all: bool) -> Result<Vec<String>> {
        for name in names {
            let vm = self.definition(name)?;
            if !vm.kind.is_template() {
                return Err(QubesError::validation(format!(
                    "{} is a {}, only templates can be upgraded",
                    name,
                    vm.class()
                )));
            }
        }
        let inventory = self.inventory;
        let mut upgraded = Vec::new();
        for vm in inventory.iter().filter(|vm| vm.kind.is_template()) {
            if !names.is_empty() && !names.contains(&vm.name) {
                continue;
            }
            if !self.host.vm_exists(&vm.name)? {
                warn!("Template {} does not exist, not upgrading it", vm.name);
                continue;
            }
            if all || self.host.is_updateable(&vm.name)? {
                self.upgrade(&vm.name)?;
                upgraded.push(vm.name.clone());
            } else {
                info!("Template {} has no pending updates", vm.name);
            }
        }
        Ok(upgraded)
    }
}
