//! Drift checks.
//!
//! Each [`State`] compares one aspect of a declared qube with what the host
//! reports. `check(host, false)` only reports; `check(host, true)` also
//! pushes the declared value to the host. Both return whether drift was
//! found.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config_file::PciDevice;
use crate::error::Result;
use crate::host::{QubesHost, service_enabled};
use crate::salt::{SaltCall, SetAppMenu, VmService};
use crate::vm::{PrefValue, QvmPrefs};

pub trait State {
    /// True when the host differs from the declaration
    fn check(&self, host: &mut dyn QubesHost, fix: bool) -> Result<bool>;
}

// ============================================================================
// Prefs
// ============================================================================

pub struct PrefsState<'a> {
    pub vm: &'a str,
    pub prefs: &'a QvmPrefs,
}

impl State for PrefsState<'_> {
    fn check(&self, host: &mut dyn QubesHost, fix: bool) -> Result<bool> {
        let mut drift = false;
        for (pref, wanted) in self.prefs.expected() {
            let current = host.get_pref(self.vm, pref)?;
            match wanted {
                PrefValue::Literal(value) => {
                    if current == value {
                        continue;
                    }
                    warn!("VM {} pref {} is '{}' not '{}'", self.vm, pref, current, value);
                    drift = true;
                    if fix {
                        info!("Setting VM {} pref {} to '{}'", self.vm, pref, value);
                        host.set_pref(self.vm, pref, &value)?;
                    }
                }
                PrefValue::SystemDefault { global_pref } => {
                    let system = host.get_global_pref(global_pref)?;
                    if current == system {
                        continue;
                    }
                    warn!(
                        "VM {} pref {} is '{}' not the system {} '{}'",
                        self.vm, pref, current, global_pref, system
                    );
                    drift = true;
                    if fix {
                        info!("Resetting VM {} pref {} to the system default", self.vm, pref);
                        host.reset_pref(self.vm, pref)?;
                    }
                }
            }
        }
        Ok(drift)
    }
}

// ============================================================================
// Features & tags
// ============================================================================

pub struct FeaturesState<'a> {
    pub vm: &'a str,
    pub features: &'a BTreeMap<String, String>,
}

impl State for FeaturesState<'_> {
    fn check(&self, host: &mut dyn QubesHost, fix: bool) -> Result<bool> {
        let mut drift = false;
        for (feature, value) in self.features {
            let current = host.get_feature(self.vm, feature)?;
            if current.as_deref() == Some(value.as_str()) {
                continue;
            }
            warn!(
                "VM {} feature {} is {} not '{}'",
                self.vm,
                feature,
                current.map_or_else(|| "unset".to_string(), |c| format!("'{}'", c)),
                value
            );
            drift = true;
            if fix {
                info!("Setting VM {} feature {} to '{}'", self.vm, feature, value);
                host.set_feature(self.vm, feature, value)?;
            }
        }
        Ok(drift)
    }
}

/// Declared tags must be present; other tags are left alone
pub struct TagsState<'a> {
    pub vm: &'a str,
    pub tags: &'a [String],
}

impl State for TagsState<'_> {
    fn check(&self, host: &mut dyn QubesHost, fix: bool) -> Result<bool> {
        if self.tags.is_empty() {
            return Ok(false);
        }
        let current = host.list_tags(self.vm)?;
        let mut drift = false;
        for tag in self.tags.iter().filter(|t| !current.contains(t)) {
            warn!("VM {} does not have tag {}", self.vm, tag);
            drift = true;
            if fix {
                info!("Adding tag {} to VM {}", tag, self.vm);
                host.add_tag(self.vm, tag)?;
            }
        }
        Ok(drift)
    }
}

// ============================================================================
// Devices
// ============================================================================

pub struct PciState<'a> {
    pub vm: &'a str,
    pub devices: &'a [PciDevice],
}

impl State for PciState<'_> {
    fn check(&self, host: &mut dyn QubesHost, fix: bool) -> Result<bool> {
        if self.devices.is_empty() {
            return Ok(false);
        }
        let attached = host.list_pci(self.vm)?;
        let mut drift = false;
        for device in self.devices.iter().filter(|d| !attached.contains(&d.device)) {
            warn!("VM {} does not have PCI device {} attached", self.vm, device.device);
            drift = true;
            if fix {
                info!("Attaching PCI device {} to VM {}", device.device, self.vm);
                // the device may be held by a running qube; the next run retries
                if let Err(e) = host.attach_pci(self.vm, device) {
                    warn!("Could not attach {} to {}: {}", device.device, self.vm, e);
                }
            }
        }
        Ok(drift)
    }
}

// ============================================================================
// App menu & services (fixed through dom0 states)
// ============================================================================

pub struct AppMenuState<'a> {
    pub vm: &'a str,
    pub entries: &'a [String],
}

impl State for AppMenuState<'_> {
    fn check(&self, host: &mut dyn QubesHost, fix: bool) -> Result<bool> {
        let mut current = host.appmenu_whitelist(self.vm)?;
        let mut wanted = self.entries.to_vec();
        current.sort();
        wanted.sort();
        if current == wanted {
            return Ok(false);
        }
        warn!("VM {} has app menu {:?} and not {:?}", self.vm, current, wanted);
        if fix {
            host.apply_salt(&SaltCall::dom0(&SetAppMenu {
                vm_name: self.vm.to_string(),
                entries: self.entries.to_vec(),
            }))?;
        }
        Ok(true)
    }
}

pub struct ServicesState<'a> {
    pub vm: &'a str,
    pub services: &'a [String],
}

impl State for ServicesState<'_> {
    fn check(&self, host: &mut dyn QubesHost, fix: bool) -> Result<bool> {
        if self.services.is_empty() {
            return Ok(false);
        }
        let lines = host.list_services(self.vm)?;
        let mut drift = false;
        for service in self.services.iter().filter(|s| !service_enabled(&lines, s)) {
            warn!("VM {} has not enabled service {}", self.vm, service);
            drift = true;
        }
        if drift && fix {
            host.apply_salt(&SaltCall::dom0(&VmService {
                vm_name: self.vm.to_string(),
                enabled: self.services.to_vec(),
            }))?;
        }
        Ok(drift)
    }
}
