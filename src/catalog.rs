//! Root template catalog and built-in profiles.
//!
//! Qubes ships a fixed set of root templates (`debian-11`, `fedora-34-minimal`,
//! ...). Anything else must be cloned from one of them. The catalog also holds
//! each OS's default app menu and the `sys-*` profiles every setup needs.

use std::collections::BTreeMap;

use crate::config_file::Attributes;
use crate::types::{LabelColor, NetVm, OperatingSystem, VirtMode};

/// Versions and default app menu of a supported root template OS
#[derive(Debug, Clone, Copy)]
pub struct OsEntry {
    pub os: OperatingSystem,
    pub versions: &'static [u32],
    pub default_appmenu: &'static [&'static str],
}

/// Supported root template operating systems, in lookup order
pub const SUPPORTED_OPERATING_SYSTEMS: &[OsEntry] = &[
    OsEntry {
        os: OperatingSystem::Debian,
        versions: &[10, 11],
        default_appmenu: &["debian-xterm.desktop"],
    },
    OsEntry {
        os: OperatingSystem::Fedora,
        versions: &[32, 34],
        default_appmenu: &["xterm.desktop"],
    },
    OsEntry {
        os: OperatingSystem::WhonixWs,
        versions: &[16],
        default_appmenu: &[
            "janondisttorbrowser.desktop",
            "anondist-torbrowser_update.desktop",
            "whonixcheck.desktop",
            "xfce4-terminal.desktop",
        ],
    },
    OsEntry {
        os: OperatingSystem::WhonixGw,
        versions: &[16],
        default_appmenu: &[
            "anon_connection_wizard.desktop",
            "gateway-arm.desktop",
            "gateway-reloadtor.desktop",
            "restart-tor-gui.desktop",
            "sdwdate-gui.desktop",
            "gateway-stoptor.desktop",
            "Thunar.desktop",
            "tor-control-panel.desktop",
            "gateway-tordata.desktop",
            "gateway-torrcexamples.desktop",
            "gateway-torrc.desktop",
            "whonixcheck.desktop",
            "xfce4-terminal.desktop",
        ],
    },
];

/// OS used for the default templates
pub const DEFAULT_OS: OperatingSystem = OperatingSystem::Debian;

fn entry(os: OperatingSystem) -> &'static OsEntry {
    SUPPORTED_OPERATING_SYSTEMS
        .iter()
        .find(|e| e.os == os)
        .unwrap_or(&SUPPORTED_OPERATING_SYSTEMS[0])
}

/// All root template names, full and minimal flavour of every version
pub fn root_templates() -> Vec<String> {
    let mut names = Vec::new();
    for entry in SUPPORTED_OPERATING_SYSTEMS {
        for version in entry.versions {
            for minimal in ["", "-minimal"] {
                names.push(format!("{}-{}{}", entry.os, version, minimal));
            }
        }
    }
    names
}

pub fn is_root_template(name: &str) -> bool {
    root_templates().iter().any(|t| t == name)
}

/// Latest root template of `os`
pub fn default_root_template(os: OperatingSystem, minimal: bool) -> String {
    let entry = entry(os);
    let version = entry.versions.last().copied().unwrap_or_default();
    let suffix = if minimal { "-minimal" } else { "" };
    format!("{}-{}{}", os, version, suffix)
}

/// Default app menu of a root template, if it is one we know
pub fn default_appmenu(root_template: &str) -> Option<&'static [&'static str]> {
    if !is_root_template(root_template) {
        return None;
    }
    SUPPORTED_OPERATING_SYSTEMS
        .iter()
        .find(|e| root_template.starts_with(&e.os.to_string()))
        .map(|e| e.default_appmenu)
}

/// Template VMs are moved to while `name` is removed and rebuilt
pub fn temporary_alternative_template(name: &str) -> String {
    let full = default_root_template(DEFAULT_OS, false);
    let minimal = default_root_template(DEFAULT_OS, true);
    if name == minimal { full } else { minimal }
}

// ============================================================================
// Built-in profiles
// ============================================================================

pub const BUILTIN_PROFILES: &[&str] = &["sys-net", "sys-firewall", "sys-usb", "sys-vpn"];

/// Built-in `sys-*` profile by name.
///
/// All of them disable memory balancing and start with 300 MB.
pub fn builtin_profile(name: &str) -> Option<Attributes> {
    let base = Attributes {
        maxmem: Some(0),
        memory: Some(300),
        ..Attributes::default()
    };
    let attrs = match name {
        "sys-net" => Attributes {
            label: Some(LabelColor::Red),
            netvm: Some(NetVm::None),
            virt_mode: Some(VirtMode::Hvm),
            provides_network: Some(true),
            ..base
        },
        "sys-firewall" => Attributes {
            provides_network: Some(true),
            features: BTreeMap::from([("qubes-firewall".to_string(), "True".to_string())]),
            ..base
        },
        "sys-usb" => Attributes {
            label: Some(LabelColor::Red),
            netvm: Some(NetVm::None),
            virt_mode: Some(VirtMode::Hvm),
            provides_network: Some(false),
            ..base
        },
        "sys-vpn" => Attributes {
            provides_network: Some(true),
            ..base
        },
        _ => return None,
    };
    Some(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_templates() {
        let roots = root_templates();
        assert_eq!(roots.len(), 12);
        assert!(roots.contains(&"debian-11-minimal".to_string()));
        assert!(roots.contains(&"whonix-gw-16".to_string()));
        assert!(is_root_template("fedora-32"));
        assert!(!is_root_template("debian-11-bank"));
    }

    #[test]
    fn test_default_root_template_uses_latest_version() {
        assert_eq!(default_root_template(OperatingSystem::Debian, true), "debian-11-minimal");
        assert_eq!(default_root_template(OperatingSystem::Fedora, false), "fedora-34");
    }

    #[test]
    fn test_default_appmenu() {
        assert_eq!(default_appmenu("debian-10"), Some(&["debian-xterm.desktop"][..]));
        assert_eq!(default_appmenu("fedora-34-minimal"), Some(&["xterm.desktop"][..]));
        assert_eq!(default_appmenu("whonix-ws-16").map(|m| m.len()), Some(4));
        assert_eq!(default_appmenu("debian-11-signal"), None);
    }

    #[test]
    fn test_temporary_alternative_template() {
        assert_eq!(temporary_alternative_template("debian-11-minimal"), "debian-11");
        assert_eq!(temporary_alternative_template("debian-11"), "debian-11-minimal");
        assert_eq!(temporary_alternative_template("debian-11-bank"), "debian-11-minimal");
    }

    #[test]
    fn test_builtin_profiles() {
        for name in BUILTIN_PROFILES {
            let profile = builtin_profile(name).expect("builtin profile");
            assert_eq!(profile.maxmem, Some(0));
            assert_eq!(profile.memory, Some(300));
        }
        let firewall = builtin_profile("sys-firewall").unwrap();
        assert_eq!(firewall.features.get("qubes-firewall").map(String::as_str), Some("True"));
        assert_eq!(builtin_profile("sys-usb").unwrap().virt_mode, Some(VirtMode::Hvm));
        assert!(builtin_profile("sys-whatever").is_none());
    }
}
