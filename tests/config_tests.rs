//! Configuration files and bundled states on disk.

use std::fs;
use tempfile::TempDir;

use qubes_automation::config_file::Settings;
use qubes_automation::salt::templates::{self, STATES};
use qubes_automation::{QubesConfig, missing_salt_files, resolve, salt_plan};

const FULL_CONFIG: &str = r#"{
    "settings": {"use_sudo": false},
    "profiles": {
        "vpn-client": {"label": "yellow", "netvm": "sys-vpn", "maxmem": 4000}
    },
    "vms": [
        {"name": "debian-11", "class": "TemplateVM",
         "salts": [{"state": "file-manage", "file_name": "/etc/mpv/mpv.conf", "salt_file": "mpv.conf"}]},
        {"name": "debian-11-bank", "class": "TemplateVM", "cloned_from": "debian-11",
         "salts": [{"state": "install", "packages": ["banking-app"]}]},
        {"name": "bank", "class": "AppVM", "template": "debian-11-bank",
         "extends": ["vpn-client"], "maxmem": 1000, "appmenu": ["banking-app.desktop"]},
        {"name": "debian-11-minimal", "class": "TemplateVM",
         "packages": ["qubes-usb-proxy", "usbutils"],
         "subclass_salts": [{"state": "file-manage",
            "file_name": "/rw/config/qubes-firewall-user-script",
            "salt_file": "firewall/qubes-firewall-user-script", "mode": "755"}]},
        {"name": "sys-usb-template", "class": "DispVMTemplate", "template": "debian-11-minimal"},
        {"name": "sys-usb", "class": "DispVM", "template": "sys-usb-template",
         "extends": ["sys-usb"], "autostart": true,
         "pci": [{"device": "dom0:00_14.0", "no_strict_reset": true}]}
    ]
}"#;

#[test]
fn test_load_resolve_and_check_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("qaconf.json");
    fs::write(&path, FULL_CONFIG).unwrap();

    let mut config = QubesConfig::load_from_file(&path).unwrap();
    assert!(!config.settings.use_sudo);
    config.settings.salt_root = dir.path().join("salt");

    let inv = resolve(&config).unwrap();
    assert_eq!(inv.len(), 6);
    let bank = inv.get("bank").unwrap();
    assert_eq!(bank.prefs.maxmem, 1000);
    assert_eq!(bank.salts.len(), 0);

    let files = config.settings.files_dir();
    let missing = missing_salt_files(&inv, &config.settings);
    assert_eq!(
        missing,
        vec![
            files.join("mpv.conf"),
            files.join("firewall/qubes-firewall-user-script")
        ]
    );

    fs::create_dir_all(files.join("firewall")).unwrap();
    fs::write(files.join("mpv.conf"), "hwdec=auto\n").unwrap();
    fs::write(files.join("firewall/qubes-firewall-user-script"), "#!/bin/sh\n").unwrap();
    assert!(missing_salt_files(&inv, &config.settings).is_empty());
}

#[test]
fn test_every_planned_call_renders() {
    let config = QubesConfig::from_json(FULL_CONFIG).unwrap();
    let inv = resolve(&config).unwrap();
    for vm in inv.iter() {
        for call in salt_plan(vm) {
            let source = templates::template(&call.state).unwrap();
            let out = templates::render(source, &call.pillar).unwrap();
            assert!(!out.contains("{{"), "{} left a placeholder", call.state);
        }
    }
}

#[test]
fn test_install_states() {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        salt_root: dir.path().to_path_buf(),
        ..Settings::default()
    };
    let written = templates::install_states(&settings.states_dir()).unwrap();
    assert_eq!(written.len(), STATES.len());
    let create_vm = fs::read_to_string(settings.states_dir().join("create-vm.sls")).unwrap();
    assert!(create_vm.contains("pillar['vm_name']"));

    // installing twice overwrites
    assert!(templates::install_states(&settings.states_dir()).is_ok());
}

#[test]
fn test_save_round_trip_keeps_declarations() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("qaconf.json");
    let config = QubesConfig::from_json(FULL_CONFIG).unwrap();
    config.save_to_file(&path).unwrap();
    let loaded = QubesConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(
        resolve(&loaded).unwrap().names().collect::<Vec<_>>(),
        resolve(&config).unwrap().names().collect::<Vec<_>>()
    );
}

#[test]
fn test_invalid_json_is_reported_with_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{\"vms\": [").unwrap();
    let err = QubesConfig::load_from_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.json"));
}
