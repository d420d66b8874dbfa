//! Declaration resolver.
//!
//! Turns the config file into an [`Inventory`] of concrete qubes:
//!
//! 1. profiles named in `extends` are resolved (recursively, cycle checked)
//!    and merged left to right, then the qube's own attributes on top
//! 2. template inheritance is applied: clones take their parent's packages
//!    and salts, AppVMs run their template's subclass salts
//! 3. class rules fix up labels, network, features and app menus
//!
//! Parents must be declared before their children. Nothing here touches the
//! host.

use std::collections::BTreeMap;
use tracing::warn;

use crate::catalog;
use crate::config_file::{Attributes, ProfileDeclaration, QubesConfig, VmDeclaration};
use crate::error::{QubesError, Result};
use crate::logic::merge::{merge_all, union};
use crate::types::{LabelColor, NetVm, VmClass};
use crate::vm::{Inventory, QvmPrefs, VmDefinition, VmKind};

/// Features set on anonymous qubes
pub const ANONYMOUS_FEATURES: &[(&str, &str)] = &[
    ("net.fake-ip", "192.168.0.2"),
    ("net.fake-gateway", "192.168.0.1"),
    ("net.fake-netmask", "255.255.255.0"),
    ("no-monitor-layout", "True"),
];

/// Resolve every declaration of `config`
pub fn resolve(config: &QubesConfig) -> Result<Inventory> {
    let mut profiles = ProfileResolver::new(&config.profiles);
    let mut inventory = Inventory::default();

    for decl in &config.vms {
        let vm = resolve_vm(decl, &mut profiles, &inventory)?;
        if !inventory.push(vm) {
            return Err(QubesError::validation(format!(
                "qube '{}' is declared more than once",
                decl.name
            )));
        }
    }
    Ok(inventory)
}

// ============================================================================
// Profiles
// ============================================================================

/// Resolves named profiles with memoization and cycle detection
pub struct ProfileResolver<'a> {
    declared: &'a BTreeMap<String, ProfileDeclaration>,
    resolved: BTreeMap<String, Attributes>,
}

impl<'a> ProfileResolver<'a> {
    pub fn new(declared: &'a BTreeMap<String, ProfileDeclaration>) -> Self {
        Self {
            declared,
            resolved: BTreeMap::new(),
        }
    }

    /// Fully merged attributes of profile `name`.
    ///
    /// User profiles shadow built-in ones of the same name.
    pub fn resolve(&mut self, name: &str) -> Result<Attributes> {
        let mut stack = Vec::new();
        self.resolve_inner(name, &mut stack)
    }

    fn resolve_inner(&mut self, name: &str, stack: &mut Vec<String>) -> Result<Attributes> {
        if let Some(done) = self.resolved.get(name) {
            return Ok(done.clone());
        }
        if stack.iter().any(|s| s == name) {
            stack.push(name.to_string());
            return Err(QubesError::inheritance(format!(
                "profile cycle: {}",
                stack.join(" -> ")
            )));
        }

        let Some(decl) = self.declared.get(name) else {
            return catalog::builtin_profile(name)
                .ok_or_else(|| QubesError::inheritance(format!("unknown profile '{}'", name)));
        };
        if let Some(key) = decl.unknown.keys().next() {
            return Err(QubesError::validation(format!(
                "profile '{}' has unknown attribute '{}'",
                name, key
            )));
        }

        stack.push(name.to_string());
        let mut layers = Vec::with_capacity(decl.extends.len() + 1);
        for parent in &decl.extends {
            layers.push(self.resolve_inner(parent, stack)?);
        }
        stack.pop();
        layers.push(decl.attributes.clone());

        let attrs = merge_all(&layers);
        self.resolved.insert(name.to_string(), attrs.clone());
        Ok(attrs)
    }
}

// ============================================================================
// Qubes
// ============================================================================

fn resolve_vm(
    decl: &VmDeclaration,
    profiles: &mut ProfileResolver<'_>,
    inventory: &Inventory,
) -> Result<VmDefinition> {
    let name = decl.name.as_str();
    if name.is_empty() {
        return Err(QubesError::validation("qube name must not be empty"));
    }
    if name.contains(char::is_whitespace) {
        return Err(QubesError::validation(format!(
            "qube name '{}' must not contain whitespace",
            name
        )));
    }
    if let Some(key) = decl.unknown.keys().next() {
        return Err(QubesError::validation(format!(
            "qube '{}' has unknown attribute '{}'",
            name, key
        )));
    }

    let mut layers = Vec::with_capacity(decl.extends.len() + 1);
    for profile in &decl.extends {
        layers.push(profiles.resolve(profile)?);
    }
    layers.push(decl.attributes.clone());
    let attrs = merge_all(&layers);

    match decl.class {
        VmClass::Template => resolve_template(decl, attrs, inventory),
        VmClass::App | VmClass::DispVmTemplate | VmClass::DispVm => {
            resolve_app(decl, attrs, inventory)
        }
    }
}

fn resolve_template(
    decl: &VmDeclaration,
    attrs: Attributes,
    inventory: &Inventory,
) -> Result<VmDefinition> {
    let name = &decl.name;
    if decl.template.is_some() {
        return Err(QubesError::validation(format!(
            "TemplateVM '{}' uses 'template'; use 'cloned_from' to clone a template",
            name
        )));
    }
    reject_non_empty(name, "appmenu", attrs.appmenu.as_ref().is_some_and(|m| !m.is_empty()))?;
    reject_non_empty(name, "services", !attrs.services.is_empty())?;
    reject_non_empty(name, "pci", !attrs.pci.is_empty())?;
    reject_non_empty(name, "template_for_dispvms", attrs.template_for_dispvms == Some(true))?;
    reject_non_empty(name, "anonymous", attrs.anonymous == Some(true))?;
    if attrs.label.is_some_and(|l| l != LabelColor::TEMPLATE) {
        warn!("TemplateVM {} always gets label {}", name, LabelColor::TEMPLATE);
    }

    let mut prefs = QvmPrefs::from_attributes(&attrs, LabelColor::TEMPLATE);
    prefs.netvm = NetVm::None;

    let (root_template, packages, presalts, salts, subclass_salts) = match &decl.cloned_from {
        None => {
            if !catalog::is_root_template(name) {
                return Err(QubesError::validation(format!(
                    "TemplateVM '{}' is not a known root template and has no 'cloned_from'",
                    name
                )));
            }
            (
                name.clone(),
                attrs.packages.clone(),
                attrs.presalts.clone(),
                attrs.salts.clone(),
                attrs.subclass_salts.clone(),
            )
        }
        Some(parent_name) => {
            let parent = earlier(inventory, name, parent_name)?;
            if !parent.kind.is_template() {
                return Err(QubesError::validation(format!(
                    "TemplateVM '{}' is cloned from '{}', which is a {}",
                    name,
                    parent_name,
                    parent.class()
                )));
            }
            let inherited_subclass = if decl.inherit_subclass_salts {
                parent.subclass_salts.clone()
            } else {
                Vec::new()
            };
            (
                parent.root_template.clone(),
                union(&parent.packages, &attrs.packages),
                [parent.presalts.clone(), attrs.presalts.clone()].concat(),
                [parent.salts.clone(), attrs.salts.clone()].concat(),
                [inherited_subclass, attrs.subclass_salts.clone()].concat(),
            )
        }
    };

    Ok(VmDefinition {
        name: name.clone(),
        kind: VmKind::Template {
            cloned_from: decl.cloned_from.clone(),
        },
        root_template,
        prefs,
        features: attrs.features,
        tags: attrs.tags,
        appmenu: Vec::new(),
        services: Vec::new(),
        pci: Vec::new(),
        packages,
        presalts,
        salts,
        subclass_salts,
    })
}

fn resolve_app(
    decl: &VmDeclaration,
    attrs: Attributes,
    inventory: &Inventory,
) -> Result<VmDefinition> {
    let name = &decl.name;
    let class = decl.class;
    if decl.cloned_from.is_some() {
        return Err(QubesError::validation(format!(
            "{} '{}' cannot use 'cloned_from'",
            class, name
        )));
    }
    reject_non_empty(name, "packages", !attrs.packages.is_empty())?;
    reject_non_empty(name, "subclass_salts", !attrs.subclass_salts.is_empty())?;
    reject_non_empty(name, "inherit_subclass_salts", !decl.inherit_subclass_salts)?;

    let template_name = decl.template.as_deref().ok_or_else(|| {
        QubesError::validation(format!("{} '{}' needs a 'template'", class, name))
    })?;
    let template = earlier(inventory, name, template_name)?;
    let wanted_parent = match class {
        VmClass::DispVm => VmClass::DispVmTemplate,
        _ => VmClass::Template,
    };
    if template.class() != wanted_parent {
        return Err(QubesError::validation(format!(
            "{} '{}' must be based on a {}, but '{}' is a {}",
            class,
            name,
            wanted_parent,
            template_name,
            template.class()
        )));
    }

    let mut features = attrs.features.clone();
    let (label, kind) = match class {
        VmClass::DispVmTemplate => {
            if attrs.label.is_some_and(|l| l != LabelColor::TEMPLATE) {
                warn!("DispVMTemplate {} always gets label {}", name, LabelColor::TEMPLATE);
            }
            (
                LabelColor::TEMPLATE,
                VmKind::DispVmTemplate {
                    template: template_name.to_string(),
                },
            )
        }
        _ => {
            let label = attrs.label.ok_or_else(|| {
                QubesError::validation(format!("{} '{}' needs a 'label'", class, name))
            })?;
            let kind = if class == VmClass::DispVm {
                VmKind::DispVm {
                    template: template_name.to_string(),
                }
            } else {
                VmKind::App {
                    template: template_name.to_string(),
                }
            };
            (label, kind)
        }
    };

    let mut prefs = QvmPrefs::from_attributes(&attrs, label);
    match class {
        VmClass::DispVmTemplate => {
            prefs.netvm = NetVm::None;
            prefs.template_for_dispvms = Some(true);
            features.insert("appmenus-dispvm".to_string(), "1".to_string());
        }
        VmClass::App if attrs.template_for_dispvms == Some(true) => {
            prefs.template_for_dispvms = Some(true);
            features.insert("appmenus-dispvm".to_string(), "1".to_string());
        }
        VmClass::DispVm => {
            features.insert("appmenus-dispvm".to_string(), String::new());
        }
        _ => {}
    }
    if attrs.anonymous == Some(true) {
        for (key, value) in ANONYMOUS_FEATURES {
            features.insert(key.to_string(), value.to_string());
        }
    }

    let (presalts, salts) = if class == VmClass::DispVm {
        if !attrs.presalts.is_empty() || !attrs.salts.is_empty() {
            return Err(QubesError::validation(format!(
                "DispVM '{}' cannot run salts; put them on its DispVM template",
                name
            )));
        }
        (Vec::new(), Vec::new())
    } else {
        (
            attrs.presalts.clone(),
            [template.subclass_salts.clone(), attrs.salts.clone()].concat(),
        )
    };

    let root_template = template.root_template.clone();
    let appmenu = match attrs.appmenu {
        Some(menu) if !menu.is_empty() => menu,
        _ => catalog::default_appmenu(&root_template)
            .map(|menu| menu.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default(),
    };

    Ok(VmDefinition {
        name: name.clone(),
        kind,
        root_template,
        prefs,
        features,
        tags: attrs.tags,
        appmenu,
        services: attrs.services,
        pci: attrs.pci,
        packages: Vec::new(),
        presalts,
        salts,
        subclass_salts: Vec::new(),
    })
}

/// `parent` must already be in the inventory
fn earlier<'i>(inventory: &'i Inventory, name: &str, parent: &str) -> Result<&'i VmDefinition> {
    if parent == name {
        return Err(QubesError::inheritance(format!("qube '{}' is based on itself", name)));
    }
    inventory.get(parent).ok_or_else(|| {
        QubesError::inheritance(format!(
            "qube '{}' is based on '{}', which is not declared before it",
            name, parent
        ))
    })
}

fn reject_non_empty(name: &str, field: &str, present: bool) -> Result<()> {
    if present {
        Err(QubesError::validation(format!(
            "'{}' is not supported on qube '{}'",
            field, name
        )))
    } else {
        Ok(())
    }
}
