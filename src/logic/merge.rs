//! Attribute layering.
//!
//! | Field kind                      | Rule                                   |
//! |---------------------------------|----------------------------------------|
//! | scalars (`label`, `memory`, ..) | child wins when set                    |
//! | `appmenu`                       | child list replaces parent's when set  |
//! | `features`                      | key-wise, child wins on conflict       |
//! | `tags`, `services`, `packages`  | parent then child, first copy kept     |
//! | `pci`                           | parent then child, unique by device id |
//! | salt lists                      | parent then child                      |
//!
//! `merge` is associative and `Attributes::default()` is its identity, so a
//! chain of profiles can be folded in any grouping. The identity needs the
//! union lists to be duplicate free, which deserialization guarantees and
//! [`Attributes::normalized`] restores for hand-built values.

use crate::config_file::{Attributes, PciDevice};

impl Attributes {
    /// Layer `child` on top of `self`
    pub fn merge(&self, child: &Attributes) -> Attributes {
        let mut features = self.features.clone();
        features.extend(child.features.iter().map(|(k, v)| (k.clone(), v.clone())));

        Attributes {
            label: child.label.or(self.label),
            netvm: child.netvm.clone().or_else(|| self.netvm.clone()),
            virt_mode: child.virt_mode.or(self.virt_mode),
            autostart: child.autostart.or(self.autostart),
            provides_network: child.provides_network.or(self.provides_network),
            memory: child.memory.or(self.memory),
            maxmem: child.maxmem.or(self.maxmem),
            template_for_dispvms: child.template_for_dispvms.or(self.template_for_dispvms),
            anonymous: child.anonymous.or(self.anonymous),
            features,
            tags: union(&self.tags, &child.tags),
            appmenu: child.appmenu.clone().or_else(|| self.appmenu.clone()),
            services: union(&self.services, &child.services),
            pci: union_pci(&self.pci, &child.pci),
            packages: union(&self.packages, &child.packages),
            presalts: concat(&self.presalts, &child.presalts),
            salts: concat(&self.salts, &child.salts),
            subclass_salts: concat(&self.subclass_salts, &child.subclass_salts),
        }
    }

    /// Drop repeated entries from the union lists, first occurrence kept
    pub fn normalized(mut self) -> Attributes {
        self.tags = union(&self.tags, &[]);
        self.services = union(&self.services, &[]);
        self.packages = union(&self.packages, &[]);
        self.pci = union_pci(&self.pci, &[]);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Attributes::default()
    }
}

/// Fold layers left to right
pub fn merge_all<'a, I>(layers: I) -> Attributes
where
    I: IntoIterator<Item = &'a Attributes>,
{
    layers
        .into_iter()
        .fold(Attributes::default(), |acc, layer| acc.merge(layer))
}

/// `parent ++ child` without duplicates, first occurrence kept
pub fn union(parent: &[String], child: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(parent.len() + child.len());
    for item in parent.iter().chain(child) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// `parent ++ child` without duplicate device ids, first occurrence kept
pub fn union_pci(parent: &[PciDevice], child: &[PciDevice]) -> Vec<PciDevice> {
    let mut out: Vec<PciDevice> = Vec::with_capacity(parent.len() + child.len());
    for dev in parent.iter().chain(child) {
        if !out.iter().any(|d| d.device == dev.device) {
            out.push(dev.clone());
        }
    }
    out
}

fn concat<T: Clone>(parent: &[T], child: &[T]) -> Vec<T> {
    parent.iter().chain(child).cloned().collect()
}
