//! Resolved qube definitions.
//!
//! A [`VmDefinition`] is what is left after profiles and template
//! inheritance have been applied: every value is concrete and ready to be
//! compared with the host.

pub mod prefs;

use std::collections::{BTreeMap, HashMap};

use crate::config_file::PciDevice;
use crate::salt::SaltState;
use crate::types::VmClass;

pub use prefs::{PrefValue, QvmPrefs};

/// Class of a qube plus the qube it is derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmKind {
    /// `cloned_from: None` is a root template installed from the Qubes repos
    Template { cloned_from: Option<String> },
    App { template: String },
    DispVmTemplate { template: String },
    /// `template` is a DispVM template
    DispVm { template: String },
}

impl VmKind {
    pub fn class(&self) -> VmClass {
        match self {
            VmKind::Template { .. } => VmClass::Template,
            VmKind::App { .. } => VmClass::App,
            VmKind::DispVmTemplate { .. } => VmClass::DispVmTemplate,
            VmKind::DispVm { .. } => VmClass::DispVm,
        }
    }

    /// Qube this one is cloned from or based on
    pub fn parent(&self) -> Option<&str> {
        match self {
            VmKind::Template { cloned_from } => cloned_from.as_deref(),
            VmKind::App { template }
            | VmKind::DispVmTemplate { template }
            | VmKind::DispVm { template } => Some(template),
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self, VmKind::Template { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDefinition {
    pub name: String,
    pub kind: VmKind,
    /// Root template at the end of the template chain
    pub root_template: String,
    pub prefs: QvmPrefs,
    pub features: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub appmenu: Vec<String>,
    pub services: Vec<String>,
    pub pci: Vec<PciDevice>,
    pub packages: Vec<String>,
    pub presalts: Vec<SaltState>,
    pub salts: Vec<SaltState>,
    pub subclass_salts: Vec<SaltState>,
}

impl VmDefinition {
    pub fn class(&self) -> VmClass {
        self.kind.class()
    }

    /// Every salt this qube runs, for file preflight
    pub fn all_salts(&self) -> impl Iterator<Item = &SaltState> {
        self.presalts
            .iter()
            .chain(&self.salts)
            .chain(&self.subclass_salts)
    }
}

/// All resolved qubes in declaration order
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    vms: Vec<VmDefinition>,
    index: HashMap<String, usize>,
}

impl Inventory {
    /// Append a definition. Returns false if the name is taken.
    pub fn push(&mut self, vm: VmDefinition) -> bool {
        if self.index.contains_key(&vm.name) {
            return false;
        }
        self.index.insert(vm.name.clone(), self.vms.len());
        self.vms.push(vm);
        true
    }

    pub fn get(&self, name: &str) -> Option<&VmDefinition> {
        self.index.get(name).map(|&i| &self.vms[i])
    }

    /// Declaration index of `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VmDefinition> {
        self.vms.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vms.iter().map(|vm| vm.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }

    /// Declared qubes whose parent is `name`
    pub fn children_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a VmDefinition> {
        self.vms.iter().filter(move |vm| vm.kind.parent() == Some(name))
    }
}
