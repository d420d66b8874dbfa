//! Bundled state templates and local pillar substitution.
//!
//! The templates only use `{{ pillar['key'] }}` placeholders, which Salt's
//! Jinja renderer resolves on dom0. [`render`] performs the same
//! substitution locally for `qa render` and for tests.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{QubesError, Result};

/// `(state name, template source)` for every bundled state
pub const STATES: &[(&str, &str)] = &[
    ("clone-template", include_str!("../../states/clone-template.sls")),
    ("create-vm", include_str!("../../states/create-vm.sls")),
    ("appmenus", include_str!("../../states/appmenus.sls")),
    ("vm-service", include_str!("../../states/vm-service.sls")),
    ("install", include_str!("../../states/install.sls")),
    ("upgrade", include_str!("../../states/upgrade.sls")),
    ("file-manage", include_str!("../../states/file-manage.sls")),
    ("file-recurse", include_str!("../../states/file-recurse.sls")),
    ("file-symlink", include_str!("../../states/file-symlink.sls")),
    ("run-command", include_str!("../../states/run-command.sls")),
];

/// Template source of a bundled state
pub fn template(state: &str) -> Option<&'static str> {
    STATES.iter().find(|(name, _)| *name == state).map(|(_, src)| *src)
}

/// Substitute every `{{ pillar['key'] }}` in `template`.
///
/// Any other expression, an unterminated placeholder or a key missing from
/// `pillar` is an error.
pub fn render(template: &str, pillar: &[(String, String)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| QubesError::salt("unterminated '{{' in template"))?;
        let key = placeholder_key(&after[..end])?;
        let value = pillar
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| QubesError::salt(format!("pillar has no key '{}'", key)))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// `pillar['key']` or `pillar["key"]` -> `key`
fn placeholder_key(expr: &str) -> Result<&str> {
    let unsupported = || QubesError::salt(format!("unsupported template expression '{}'", expr.trim()));
    let inner = expr
        .trim()
        .strip_prefix("pillar[")
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(unsupported)?;
    let key = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .ok_or_else(unsupported)?;
    if key.is_empty() {
        return Err(unsupported());
    }
    Ok(key)
}

/// Pillar keys a template reads, in order of first use
pub fn placeholders(template: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| QubesError::salt("unterminated '{{' in template"))?;
        let key = placeholder_key(&after[..end])?.to_string();
        if !keys.contains(&key) {
            keys.push(key);
        }
        rest = &after[end + 2..];
    }
    Ok(keys)
}

/// Write every bundled state to `dest` as `<name>.sls`
pub fn install_states(dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut written = Vec::with_capacity(STATES.len());
    for (name, source) in STATES {
        let path = dest.join(format!("{}.sls", name));
        fs::write(&path, source)?;
        info!("Installed state {}", path.display());
        written.push(path);
    }
    Ok(written)
}
