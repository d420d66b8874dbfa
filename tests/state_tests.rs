//! Drift checks against an in-memory host.

mod common;

use std::collections::BTreeMap;

use common::FakeHost;
use qubes_automation::config_file::{Attributes, PciDevice};
use qubes_automation::state::{
    AppMenuState, FeaturesState, PciState, PrefsState, ServicesState, State, TagsState,
};
use qubes_automation::vm::QvmPrefs;
use qubes_automation::{LabelColor, NetVm};

fn host_with(name: &str) -> FakeHost {
    FakeHost::new().with_vm(name, Some("debian-11"))
}

#[test]
fn test_prefs_render_booleans_and_numbers() {
    let attrs = Attributes {
        autostart: Some(true),
        maxmem: Some(0),
        netvm: Some(NetVm::Named("sys-firewall".into())),
        ..Attributes::default()
    };
    let prefs = QvmPrefs::from_attributes(&attrs, LabelColor::Orange);
    let mut host = host_with("mail");
    let state = PrefsState {
        vm: "mail",
        prefs: &prefs,
    };

    assert!(state.check(&mut host, false).unwrap());
    assert!(host.calls.is_empty());

    assert!(state.check(&mut host, true).unwrap());
    let mail = host.vm("mail");
    assert_eq!(mail.prefs["autostart"], "True");
    assert_eq!(mail.prefs["provides_network"], "False");
    assert_eq!(mail.prefs["maxmem"], "0");
    assert_eq!(mail.prefs["label"], "orange");
    assert_eq!(mail.prefs["netvm"], "sys-firewall");
    assert!(!mail.prefs.contains_key("template_for_dispvms"));

    assert!(!state.check(&mut host, false).unwrap());
}

#[test]
fn test_unset_feature_is_drift() {
    let mut features = BTreeMap::new();
    features.insert("appmenus-dispvm".to_string(), String::new());
    let mut host = host_with("sys-net");
    let state = FeaturesState {
        vm: "sys-net",
        features: &features,
    };
    assert!(state.check(&mut host, true).unwrap());
    assert_eq!(host.calls, vec!["set_feature sys-net appmenus-dispvm "]);
    assert!(!state.check(&mut host, false).unwrap());
}

#[test]
fn test_extra_tags_are_fine() {
    let mut host = host_with("vault");
    host.vm_mut("vault").tags = vec!["created-by-dom0".into(), "offline".into()];
    let tags = vec!["offline".to_string()];
    let state = TagsState {
        vm: "vault",
        tags: &tags,
    };
    assert!(!state.check(&mut host, true).unwrap());
    assert!(host.calls.is_empty());
}

#[test]
fn test_missing_tag_is_added() {
    let mut host = host_with("vault");
    let tags = vec!["offline".to_string(), "keys".to_string()];
    let state = TagsState {
        vm: "vault",
        tags: &tags,
    };
    assert!(state.check(&mut host, true).unwrap());
    assert_eq!(host.vm("vault").tags, vec!["offline", "keys"]);
}

#[test]
fn test_appmenu_order_does_not_matter() {
    let mut host = host_with("work");
    host.vm_mut("work").appmenu = vec!["xterm.desktop".into(), "firefox.desktop".into()];
    let entries = vec!["firefox.desktop".to_string(), "xterm.desktop".to_string()];
    let state = AppMenuState {
        vm: "work",
        entries: &entries,
    };
    assert!(!state.check(&mut host, true).unwrap());
    assert!(host.salts.is_empty());
}

#[test]
fn test_appmenu_fixed_through_dom0_state() {
    let mut host = host_with("work");
    let entries = vec!["firefox.desktop".to_string(), "xterm.desktop".to_string()];
    let state = AppMenuState {
        vm: "work",
        entries: &entries,
    };
    assert!(state.check(&mut host, true).unwrap());
    assert_eq!(host.salts.len(), 1);
    assert_eq!(host.salts[0].state, "appmenus");
    assert_eq!(host.salts[0].get("appmenu"), Some("firefox.desktop\\nxterm.desktop"));
    assert_eq!(host.vm("work").appmenu, entries);
}

#[test]
fn test_services_need_exact_match_and_one_fix() {
    let mut host = host_with("print");
    host.vm_mut("print").services = vec!["cups-browsed".into()];
    let services = vec!["cups".to_string(), "crond".to_string()];
    let state = ServicesState {
        vm: "print",
        services: &services,
    };
    assert!(state.check(&mut host, true).unwrap());
    assert_eq!(host.salts.len(), 1);
    assert_eq!(host.salts[0].get("enabled"), Some("cups,crond"));
    assert!(!state.check(&mut host, false).unwrap());
}

#[test]
fn test_attached_pci_is_not_reattached() {
    let mut host = host_with("sys-usb");
    host.vm_mut("sys-usb").pci = vec!["dom0:00_14.0".into()];
    let devices = vec![PciDevice {
        device: "dom0:00_14.0".into(),
        no_strict_reset: true,
    }];
    let state = PciState {
        vm: "sys-usb",
        devices: &devices,
    };
    assert!(!state.check(&mut host, true).unwrap());
    assert!(host.calls.is_empty());
}
