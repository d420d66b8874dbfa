//! Type-safe qube property types
//!
//! Label colors, virtualization modes, VM classes and operating systems are
//! closed sets in Qubes, so they are enums here rather than strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Window border label of a qube
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LabelColor {
    Red,
    Orange,
    Yellow,
    Green,
    Gray,
    Blue,
    Purple,
    Black,
}

impl LabelColor {
    /// Label every template and DispVM template gets
    pub const TEMPLATE: LabelColor = LabelColor::Gray;
}

/// Xen virtualization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VirtMode {
    #[default]
    Pvh,
    /// Needed for qubes with PCI passthrough (sys-net, sys-usb)
    Hvm,
}

/// Qubes VM class as written in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum VmClass {
    #[serde(rename = "TemplateVM")]
    #[strum(serialize = "TemplateVM")]
    Template,
    #[serde(rename = "AppVM")]
    #[strum(serialize = "AppVM")]
    App,
    #[serde(rename = "DispVMTemplate")]
    #[strum(serialize = "DispVMTemplate")]
    DispVmTemplate,
    #[serde(rename = "DispVM")]
    #[strum(serialize = "DispVM")]
    DispVm,
}

/// Operating systems shipped as Qubes root templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OperatingSystem {
    Debian,
    Fedora,
    WhonixWs,
    WhonixGw,
}

/// Network VM setting of a qube.
///
/// In the config file `null` or `""` means no network, `"default"` follows
/// the system-wide `default_netvm`, anything else names a qube.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum NetVm {
    #[default]
    None,
    Default,
    Named(String),
}

impl NetVm {
    pub const DEFAULT_KEYWORD: &'static str = "default";

    /// Value as `qvm-prefs` prints it. `Default` has no fixed value.
    pub fn as_pref_value(&self) -> Option<&str> {
        match self {
            NetVm::None => Some(""),
            NetVm::Default => None,
            NetVm::Named(name) => Some(name),
        }
    }
}

impl From<Option<String>> for NetVm {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            None | Some("") => NetVm::None,
            Some(NetVm::DEFAULT_KEYWORD) => NetVm::Default,
            Some(name) => NetVm::Named(name.to_string()),
        }
    }
}

impl From<NetVm> for Option<String> {
    fn from(value: NetVm) -> Self {
        match value {
            NetVm::None => None,
            NetVm::Default => Some(NetVm::DEFAULT_KEYWORD.to_string()),
            NetVm::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for NetVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetVm::None => write!(f, "none"),
            NetVm::Default => write!(f, "{}", NetVm::DEFAULT_KEYWORD),
            NetVm::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Render a boolean the way `qvm-prefs` prints it
pub fn pref_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}
