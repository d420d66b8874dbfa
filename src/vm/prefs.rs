//! `qvm-prefs` properties managed for every qube.

use crate::config_file::Attributes;
use crate::types::{LabelColor, NetVm, VirtMode, pref_bool};

pub const DEFAULT_MAXMEM: u32 = 4000;
pub const DEFAULT_MEMORY: u32 = 400;

/// Fully resolved prefs of one qube
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QvmPrefs {
    pub label: LabelColor,
    pub netvm: NetVm,
    pub virt_mode: VirtMode,
    pub autostart: bool,
    pub provides_network: bool,
    /// 0 means no memory balancing
    pub maxmem: u32,
    pub memory: u32,
    /// Only checked when set
    pub template_for_dispvms: Option<bool>,
}

/// Desired value of one pref
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefValue {
    /// Must read back exactly as this string
    Literal(String),
    /// Must follow the system-wide default (`qvm-prefs --default`)
    SystemDefault { global_pref: &'static str },
}

impl QvmPrefs {
    /// Fill unset attributes with Qubes' defaults
    pub fn from_attributes(attrs: &Attributes, label: LabelColor) -> Self {
        Self {
            label,
            netvm: attrs.netvm.clone().unwrap_or_default(),
            virt_mode: attrs.virt_mode.unwrap_or_default(),
            autostart: attrs.autostart.unwrap_or(false),
            provides_network: attrs.provides_network.unwrap_or(false),
            maxmem: attrs.maxmem.unwrap_or(DEFAULT_MAXMEM),
            memory: attrs.memory.unwrap_or(DEFAULT_MEMORY),
            template_for_dispvms: None,
        }
    }

    /// Prefs in the order they are checked and fixed
    pub fn expected(&self) -> Vec<(&'static str, PrefValue)> {
        let lit = |s: &str| PrefValue::Literal(s.to_string());
        let mut prefs = vec![
            ("virt_mode", lit(&self.virt_mode.to_string())),
            ("autostart", lit(pref_bool(self.autostart))),
            ("provides_network", lit(pref_bool(self.provides_network))),
            ("maxmem", lit(&self.maxmem.to_string())),
            ("memory", lit(&self.memory.to_string())),
            ("label", lit(&self.label.to_string())),
        ];
        let netvm = match self.netvm.as_pref_value() {
            Some(value) => lit(value),
            None => PrefValue::SystemDefault {
                global_pref: "default_netvm",
            },
        };
        prefs.push(("netvm", netvm));
        if let Some(flag) = self.template_for_dispvms {
            prefs.push(("template_for_dispvms", lit(pref_bool(flag))));
        }
        prefs
    }
}
