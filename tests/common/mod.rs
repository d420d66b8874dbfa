//! In-memory Qubes host for integration tests.
//!
//! `FakeHost` keeps qubes, prefs, features and so on in maps and records
//! every mutation in `calls`, so tests can assert both the end state and
//! the order things happened in. The create-vm and clone-template states
//! create qubes, the appmenus and vm-service states update them, other
//! states are only recorded.

#![allow(dead_code)]

use std::collections::BTreeMap;

use qubes_automation::config_file::PciDevice;
use qubes_automation::error::{QubesError, Result};
use qubes_automation::host::QubesHost;
use qubes_automation::salt::{SaltCall, SaltTarget};
use qubes_automation::{Inventory, QubesConfig, resolve};

#[derive(Debug, Clone, Default)]
pub struct FakeVm {
    pub template: Option<String>,
    pub prefs: BTreeMap<String, String>,
    pub features: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub pci: Vec<String>,
    pub appmenu: Vec<String>,
    pub services: Vec<String>,
    pub running: bool,
}

#[derive(Debug, Default)]
pub struct FakeHost {
    pub vms: BTreeMap<String, FakeVm>,
    pub global: BTreeMap<String, String>,
    /// Every mutation, e.g. `set_pref work label blue`
    pub calls: Vec<String>,
    pub salts: Vec<SaltCall>,
    /// Device ids `attach_pci` refuses
    pub busy_pci: Vec<String>,
    /// install and upgrade states start the update VM, as qubesctl does
    pub salt_starts_updatevm: bool,
}

impl FakeHost {
    pub fn new() -> Self {
        let mut host = Self::default();
        host.global.insert("updatevm".into(), "sys-firewall".into());
        host.global.insert("default_netvm".into(), "sys-firewall".into());
        host.global.insert("clockvm".into(), "sys-net".into());
        host
    }

    /// Add a qube that already exists on the host
    pub fn with_vm(mut self, name: &str, template: Option<&str>) -> Self {
        self.vms.insert(
            name.to_string(),
            FakeVm {
                template: template.map(str::to_string),
                ..FakeVm::default()
            },
        );
        self
    }

    pub fn with_running(mut self, name: &str) -> Self {
        self.vm_mut(name).running = true;
        self
    }

    pub fn with_pref(mut self, name: &str, pref: &str, value: &str) -> Self {
        self.vm_mut(name).prefs.insert(pref.into(), value.into());
        self
    }

    pub fn vm(&self, name: &str) -> &FakeVm {
        &self.vms[name]
    }

    pub fn vm_mut(&mut self, name: &str) -> &mut FakeVm {
        self.vms.get_mut(name).expect("vm exists in fake host")
    }

    pub fn salt_states(&self) -> Vec<String> {
        self.salts.iter().map(|c| c.state.clone()).collect()
    }

    /// Index of the first call starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls.iter().position(|c| c.starts_with(prefix))
    }

    pub fn forget_calls(&mut self) {
        self.calls.clear();
        self.salts.clear();
    }

    fn existing(&mut self, vm: &str) -> Result<&mut FakeVm> {
        self.vms
            .get_mut(vm)
            .ok_or_else(|| QubesError::host(format!("no such domain: '{}'", vm)))
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }
}

impl QubesHost for FakeHost {
    fn list_vms(&mut self) -> Result<Vec<String>> {
        Ok(self.vms.keys().cloned().collect())
    }

    fn list_running(&mut self) -> Result<Vec<String>> {
        Ok(self
            .vms
            .iter()
            .filter(|(_, vm)| vm.running)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn list_with_field(&mut self, field: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .vms
            .iter()
            .map(|(name, vm)| {
                let value = match field {
                    "TEMPLATE" => vm.template.clone().unwrap_or_default(),
                    "NETVM" => vm.prefs.get("netvm").cloned().unwrap_or_default(),
                    _ => String::new(),
                };
                (name.clone(), value)
            })
            .collect())
    }

    fn get_pref(&mut self, vm: &str, pref: &str) -> Result<String> {
        Ok(self.existing(vm)?.prefs.get(pref).cloned().unwrap_or_default())
    }

    fn get_global_pref(&mut self, pref: &str) -> Result<String> {
        Ok(self.global.get(pref).cloned().unwrap_or_default())
    }

    fn get_feature(&mut self, vm: &str, feature: &str) -> Result<Option<String>> {
        Ok(self.existing(vm)?.features.get(feature).cloned())
    }

    fn list_tags(&mut self, vm: &str) -> Result<Vec<String>> {
        Ok(self.existing(vm)?.tags.clone())
    }

    fn list_pci(&mut self, vm: &str) -> Result<Vec<String>> {
        Ok(self.existing(vm)?.pci.clone())
    }

    fn appmenu_whitelist(&mut self, vm: &str) -> Result<Vec<String>> {
        Ok(self.existing(vm)?.appmenu.clone())
    }

    fn list_services(&mut self, vm: &str) -> Result<Vec<String>> {
        Ok(self
            .existing(vm)?
            .services
            .iter()
            .map(|s| format!("{:<16} on", s))
            .collect())
    }

    fn set_pref(&mut self, vm: &str, pref: &str, value: &str) -> Result<()> {
        self.record(format!("set_pref {} {} {}", vm, pref, value));
        let target = self.existing(vm)?;
        if pref == "template" {
            target.template = Some(value.to_string());
        } else {
            target.prefs.insert(pref.to_string(), value.to_string());
        }
        Ok(())
    }

    fn reset_pref(&mut self, vm: &str, pref: &str) -> Result<()> {
        self.record(format!("reset_pref {} {}", vm, pref));
        let value = match pref {
            "netvm" => self.global.get("default_netvm").cloned().unwrap_or_default(),
            _ => String::new(),
        };
        self.existing(vm)?.prefs.insert(pref.to_string(), value);
        Ok(())
    }

    fn set_global_pref(&mut self, pref: &str, value: &str) -> Result<()> {
        self.record(format!("set_global_pref {} {}", pref, value));
        self.global.insert(pref.to_string(), value.to_string());
        Ok(())
    }

    fn set_feature(&mut self, vm: &str, feature: &str, value: &str) -> Result<()> {
        self.record(format!("set_feature {} {} {}", vm, feature, value));
        self.existing(vm)?
            .features
            .insert(feature.to_string(), value.to_string());
        Ok(())
    }

    fn add_tag(&mut self, vm: &str, tag: &str) -> Result<()> {
        self.record(format!("add_tag {} {}", vm, tag));
        self.existing(vm)?.tags.push(tag.to_string());
        Ok(())
    }

    fn attach_pci(&mut self, vm: &str, device: &PciDevice) -> Result<()> {
        self.record(format!("attach_pci {} {}", vm, device.device));
        if self.busy_pci.contains(&device.device) {
            return Err(QubesError::command(format!("{} is in use", device.device)));
        }
        self.existing(vm)?.pci.push(device.device.clone());
        Ok(())
    }

    fn create_dispvm(&mut self, name: &str, template: &str, label: &str) -> Result<()> {
        self.record(format!("create_dispvm {} {} {}", name, template, label));
        let mut vm = FakeVm {
            template: Some(template.to_string()),
            ..FakeVm::default()
        };
        vm.prefs.insert("label".into(), label.into());
        self.vms.insert(name.to_string(), vm);
        Ok(())
    }

    fn start(&mut self, vm: &str) -> Result<()> {
        self.record(format!("start {}", vm));
        self.existing(vm)?.running = true;
        Ok(())
    }

    fn shutdown(&mut self, vm: &str) -> Result<()> {
        self.record(format!("shutdown {}", vm));
        self.existing(vm)?.running = false;
        Ok(())
    }

    fn remove(&mut self, vm: &str, force: bool) -> Result<()> {
        self.record(format!("remove {}{}", if force { "--force " } else { "" }, vm));
        if let Some(user) = self
            .vms
            .iter()
            .find(|(_, v)| v.template.as_deref() == Some(vm))
            .map(|(name, _)| name.clone())
        {
            return Err(QubesError::command(format!("{} is used as template by {}", vm, user)));
        }
        self.vms
            .remove(vm)
            .map(|_| ())
            .ok_or_else(|| QubesError::host(format!("no such domain: '{}'", vm)))
    }

    fn reinstall_template(&mut self, template: &str) -> Result<()> {
        self.record(format!("reinstall_template {}", template));
        Ok(())
    }

    fn apply_salt(&mut self, call: &SaltCall) -> Result<()> {
        let target = match &call.target {
            SaltTarget::Dom0 => "dom0".to_string(),
            SaltTarget::Vm(vm) => vm.clone(),
        };
        self.record(format!("salt {} {}", call.state, target));
        self.salts.push(call.clone());
        let get = |key: &str| call.get(key).unwrap_or_default().to_string();
        match call.state.as_str() {
            "clone-template" => {
                self.vms.insert(get("template"), FakeVm::default());
            }
            "create-vm" => {
                let mut vm = FakeVm {
                    template: Some(get("vm_template")),
                    ..FakeVm::default()
                };
                for key in ["netvm", "label", "memory", "maxmem"] {
                    vm.prefs.insert(key.to_string(), get(key));
                }
                self.vms.insert(get("vm_name"), vm);
            }
            "appmenus" => {
                let entries = get("appmenu");
                self.existing(&get("vm_name"))?.appmenu =
                    entries.split("\\n").map(str::to_string).collect();
            }
            "install" | "upgrade" if self.salt_starts_updatevm => {
                let updatevm = self.global.get("updatevm").cloned().unwrap_or_default();
                self.existing(&updatevm)?.running = true;
            }
            "vm-service" => {
                let enabled = get("enabled");
                self.existing(&get("vm_name"))?.services =
                    enabled.split(',').map(str::to_string).collect();
            }
            _ => {}
        }
        Ok(())
    }
}

pub fn config(json: &str) -> QubesConfig {
    QubesConfig::from_json(json).expect("valid config")
}

pub fn inventory(json: &str) -> Inventory {
    resolve(&config(json)).expect("config resolves")
}
