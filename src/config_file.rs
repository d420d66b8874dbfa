//! Configuration file: settings, profiles and qube declarations.
//!
//! ```json
//! {
//!   "settings": { "use_sudo": true },
//!   "profiles": {
//!     "vpn-client": { "label": "yellow", "netvm": "sys-vpn" }
//!   },
//!   "vms": [
//!     { "name": "debian-11", "class": "TemplateVM" },
//!     { "name": "bank", "class": "AppVM", "template": "debian-11",
//!       "extends": ["vpn-client"], "maxmem": 1000, "appmenu": ["firefox-esr.desktop"] }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logic::merge;
use crate::salt::{SALT_ENV, SaltState};
use crate::types::{LabelColor, NetVm, VirtMode, VmClass};

/// Paths and privileges used to talk to the state engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Salt file root; states live in `<salt_root>/user_salt`
    pub salt_root: PathBuf,
    /// Pillar tree used for states applied inside qubes
    pub user_pillar_dir: PathBuf,
    /// Run `qubesctl` through sudo
    pub use_sudo: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            salt_root: PathBuf::from("/srv/salt"),
            user_pillar_dir: PathBuf::from("/srv/user_pillar"),
            use_sudo: true,
        }
    }
}

impl Settings {
    /// `<salt_root>/user_salt`
    pub fn states_dir(&self) -> PathBuf {
        self.salt_root.join(SALT_ENV)
    }

    /// Settings of the config file at `path`, or the defaults when there is
    /// no such file
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        Ok(QubesConfig::load_from_file(path)?.settings)
    }

    /// `<salt_root>/user_salt/files`
    pub fn files_dir(&self) -> PathBuf {
        self.states_dir().join("files")
    }
}

/// A PCI device to pass through, e.g. `dom0:00_14.0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PciDevice {
    pub device: String,
    #[serde(default)]
    pub no_strict_reset: bool,
}

/// Inheritable key/value attributes of a qube.
///
/// Every field is optional so that profiles can set only what they care
/// about. See [`Attributes::merge`] for how layers combine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelColor>,
    /// Outer `None`: not set here. `Some(NetVm::None)`: explicitly no network.
    #[serde(
        deserialize_with = "deserialize_netvm",
        skip_serializing_if = "Option::is_none"
    )]
    pub netvm: Option<NetVm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virt_mode: Option<VirtMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autostart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provides_network: Option<bool>,
    /// Initial memory in MB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    /// Maximum memory in MB, 0 disables memory balancing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxmem: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_for_dispvms: Option<bool>,
    /// Hide the real IP configuration from the qube
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, String>,
    #[serde(deserialize_with = "deserialize_unique", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Replaces the inherited app menu when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appmenu: Option<Vec<String>>,
    #[serde(deserialize_with = "deserialize_unique", skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(deserialize_with = "deserialize_unique_pci", skip_serializing_if = "Vec::is_empty")]
    pub pci: Vec<PciDevice>,
    /// Template packages
    #[serde(deserialize_with = "deserialize_unique", skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,

    /// States run before packages are installed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub presalts: Vec<SaltState>,
    /// States run after packages are installed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub salts: Vec<SaltState>,
    /// States run in every AppVM based on this template
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subclass_salts: Vec<SaltState>,
}

/// `null` must mean "no network VM", not "unset", so it cannot go through
/// the default `Option` handling
fn deserialize_netvm<'de, D>(deserializer: D) -> std::result::Result<Option<NetVm>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    NetVm::deserialize(deserializer).map(Some)
}

/// Union lists hold each entry once
fn deserialize_unique<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let items = Vec::<String>::deserialize(deserializer)?;
    Ok(merge::union(&items, &[]))
}

fn deserialize_unique_pci<'de, D>(deserializer: D) -> std::result::Result<Vec<PciDevice>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let devices = Vec::<PciDevice>::deserialize(deserializer)?;
    Ok(merge::union_pci(&devices, &[]))
}

/// A named, reusable attribute set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDeclaration {
    /// Parent profiles, merged left to right
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
    /// Keys no field claimed, reported by validation
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// One qube as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDeclaration {
    pub name: String,
    pub class: VmClass,
    /// Template of an AppVM / DispVM template, DispVM template of a DispVM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Parent template of a cloned TemplateVM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloned_from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    /// Whether a clone inherits its parent's subclass salts
    #[serde(default = "default_true")]
    pub inherit_subclass_salts: bool,
    #[serde(flatten)]
    pub attributes: Attributes,
    /// Keys no field claimed, reported by validation
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

/// The whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QubesConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileDeclaration>,
    #[serde(default)]
    pub vms: Vec<VmDeclaration>,
}

impl QubesConfig {
    /// Parse a configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse configuration JSON")
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid configuration in {:?}", path.as_ref()))
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;
        Ok(())
    }
}
