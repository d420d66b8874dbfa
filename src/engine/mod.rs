//! Reconciliation engine.
//!
//! The engine walks the resolved [`Inventory`] in declaration order and
//! drives a [`QubesHost`] towards it. It never reorders, retries or loops:
//! one pass, in the order the user wrote the qubes.

pub mod reconcile;
pub mod regenerate;

use std::path::PathBuf;

use crate::config_file::Settings;
use crate::error::{QubesError, Result};
use crate::host::QubesHost;
use crate::salt::{
    CloneTemplate, CreateVm, InstallPackages, SaltCall, SetAppMenu, Upgrade, VmService,
};
use crate::types::NetVm;
use crate::vm::{Inventory, VmDefinition, VmKind};

/// Netvm value the create-vm state understands as "system default"
const CREATE_VM_DEFAULT_NETVM: &str = "*default*";

pub use reconcile::Report;

/// Drives one host towards one inventory
pub struct Engine<'a> {
    host: &'a mut dyn QubesHost,
    inventory: &'a Inventory,
}

impl<'a> Engine<'a> {
    pub fn new(host: &'a mut dyn QubesHost, inventory: &'a Inventory) -> Self {
        Self { host, inventory }
    }

    pub fn inventory(&self) -> &Inventory {
        self.inventory
    }

    fn definition(&self, name: &str) -> Result<&'a VmDefinition> {
        self.inventory
            .get(name)
            .ok_or_else(|| QubesError::validation(format!("qube '{}' is not declared", name)))
    }
}

/// dom0 state that creates `vm`.
///
/// `None` for root templates, which are installed with qvm-template, and for
/// DispVMs, which are created with `qvm-create --class DispVM`.
pub fn creation_call(vm: &VmDefinition) -> Option<SaltCall> {
    match &vm.kind {
        VmKind::Template { cloned_from: None } | VmKind::DispVm { .. } => None,
        VmKind::Template {
            cloned_from: Some(parent),
        } => Some(SaltCall::dom0(&CloneTemplate {
            template: vm.name.clone(),
            template_parent: parent.clone(),
        })),
        VmKind::App { template } | VmKind::DispVmTemplate { template } => {
            let netvm = match &vm.prefs.netvm {
                NetVm::None => String::new(),
                NetVm::Default => CREATE_VM_DEFAULT_NETVM.to_string(),
                NetVm::Named(netvm) => netvm.clone(),
            };
            Some(SaltCall::dom0(&CreateVm {
                vm_name: vm.name.clone(),
                vm_template: template.clone(),
                netvm,
                label: vm.prefs.label.to_string(),
                memory: vm.prefs.memory,
                maxmem: vm.prefs.maxmem,
            }))
        }
    }
}

/// Every state run `apply` performs when it builds `vm` from scratch, in
/// order, dom0 states included
pub fn salt_plan(vm: &VmDefinition) -> Vec<SaltCall> {
    let mut plan: Vec<SaltCall> = creation_call(vm).into_iter().collect();
    plan.extend(vm.presalts.iter().map(|salt| SaltCall::on_vm(salt, &vm.name)));
    if vm.kind.is_template() {
        if !vm.packages.is_empty() {
            plan.push(SaltCall::on_vm(
                &InstallPackages {
                    packages: vm.packages.clone(),
                },
                &vm.name,
            ));
        }
        plan.push(SaltCall::on_vm(&Upgrade, &vm.name));
    } else {
        plan.push(SaltCall::dom0(&SetAppMenu {
            vm_name: vm.name.clone(),
            entries: vm.appmenu.clone(),
        }));
        if !vm.services.is_empty() {
            plan.push(SaltCall::dom0(&VmService {
                vm_name: vm.name.clone(),
                enabled: vm.services.clone(),
            }));
        }
    }
    plan.extend(vm.salts.iter().map(|salt| SaltCall::on_vm(salt, &vm.name)));
    plan
}

/// `file-manage` sources that are not under `<salt_root>/user_salt/files`
pub fn missing_salt_files(inventory: &Inventory, settings: &Settings) -> Vec<PathBuf> {
    let files = settings.files_dir();
    let mut missing: Vec<PathBuf> = Vec::new();
    for vm in inventory.iter() {
        for salt_file in vm.all_salts().filter_map(|s| s.required_salt_file()) {
            let path = files.join(salt_file);
            if !path.exists() && !missing.contains(&path) {
                missing.push(path);
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::QubesConfig;
    use crate::logic::resolver::resolve;
    use crate::salt::SaltTarget;
    use std::fs;
    use tempfile::TempDir;

    fn inventory(json: &str) -> Inventory {
        resolve(&QubesConfig::from_json(json).unwrap()).unwrap()
    }

    #[test]
    fn test_salt_plan_for_template() {
        let inv = inventory(
            r#"{"vms": [{"name": "debian-11", "class": "TemplateVM", "packages": ["mpv"],
                "presalts": [{"state": "run-command", "command": "apt-get update"}],
                "salts": [{"state": "file-symlink", "file_name": "/a", "symlink": "/b"}]}]}"#,
        );
        let plan = salt_plan(inv.get("debian-11").unwrap());
        let states: Vec<&str> = plan.iter().map(|c| c.state.as_str()).collect();
        assert_eq!(states, vec!["run-command", "install", "upgrade", "file-symlink"]);
        assert_eq!(plan[1].get("packages"), Some("mpv"));
    }

    #[test]
    fn test_salt_plan_for_app_has_no_upgrade() {
        let inv = inventory(
            r#"{"vms": [
                {"name": "debian-11", "class": "TemplateVM",
                 "subclass_salts": [{"state": "run-command", "command": "true"}]},
                {"name": "work", "class": "AppVM", "template": "debian-11", "label": "blue"}
            ]}"#,
        );
        let plan = salt_plan(inv.get("work").unwrap());
        let states: Vec<&str> = plan.iter().map(|c| c.state.as_str()).collect();
        assert_eq!(states, vec!["create-vm", "appmenus", "run-command"]);
        assert_eq!(plan[0].get("vm_template"), Some("debian-11"));
        assert_eq!(plan[0].target, SaltTarget::Dom0);
        assert_eq!(plan[2].target, SaltTarget::Vm("work".into()));
    }

    #[test]
    fn test_salt_plan_includes_dom0_states() {
        let inv = inventory(
            r#"{"vms": [
                {"name": "debian-11", "class": "TemplateVM"},
                {"name": "debian-11-print", "class": "TemplateVM", "cloned_from": "debian-11"},
                {"name": "print", "class": "AppVM", "template": "debian-11-print", "label": "gray",
                 "netvm": "default", "services": ["cups"]},
                {"name": "debian-11-dvm", "class": "DispVMTemplate", "template": "debian-11"},
                {"name": "disp", "class": "DispVM", "template": "debian-11-dvm", "label": "red"}
            ]}"#,
        );
        let states = |name: &str| -> Vec<String> {
            salt_plan(inv.get(name).unwrap()).into_iter().map(|c| c.state).collect()
        };
        assert_eq!(states("debian-11"), vec!["upgrade"]);
        assert_eq!(states("debian-11-print"), vec!["clone-template", "upgrade"]);
        assert_eq!(states("print"), vec!["create-vm", "appmenus", "vm-service"]);
        assert_eq!(states("disp"), vec!["appmenus"]);

        let create = creation_call(inv.get("print").unwrap()).unwrap();
        assert_eq!(create.get("netvm"), Some("*default*"));
        assert!(creation_call(inv.get("disp").unwrap()).is_none());
    }

    #[test]
    fn test_missing_salt_files() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            salt_root: dir.path().to_path_buf(),
            ..Settings::default()
        };
        fs::create_dir_all(settings.files_dir()).unwrap();
        fs::write(settings.files_dir().join("present.conf"), "x").unwrap();

        let inv = inventory(
            r#"{"vms": [{"name": "debian-11", "class": "TemplateVM", "salts": [
                {"state": "file-manage", "file_name": "/etc/a", "salt_file": "present.conf"},
                {"state": "file-manage", "file_name": "/etc/b", "salt_file": "absent.conf"},
                {"state": "file-manage", "file_name": "/etc/c", "salt_file": "absent.conf"}
            ]}]}"#,
        );
        let missing = missing_salt_files(&inv, &settings);
        assert_eq!(missing, vec![settings.files_dir().join("absent.conf")]);
    }
}
