//! Typed state-template contracts.
//!
//! Each Salt state under `states/` expects a fixed set of pillar keys. Rust
//! structs implement [`SaltArgs`] to produce exactly those keys, so a
//! renamed key breaks a test instead of a `qubesctl` run on dom0.
//!
//! A [`SaltCall`] is one state plus its pillar and the qube it targets; the
//! host turns it into a `qubesctl` invocation.

pub mod pillar;
pub mod templates;

use serde::{Deserialize, Serialize};

use crate::runner::CommandSpec;

/// Salt environment directory the bundled states live in
pub const SALT_ENV: &str = "user_salt";

/// Contract between a Rust struct and a state template.
///
/// - `state_name()`: template file name without `.sls`
/// - `pillar()`: ordered key/value pairs the template reads
pub trait SaltArgs {
    fn state_name(&self) -> &'static str;
    fn pillar(&self) -> Vec<(String, String)>;
}

fn pair(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

// ============================================================================
// User-declarable states
// ============================================================================

fn default_user() -> String {
    "root".to_string()
}

fn default_file_mode() -> String {
    "644".to_string()
}

fn default_dir_mode() -> String {
    "755".to_string()
}

/// A state a user attaches to a qube in the config file.
///
/// ```json
/// { "state": "file-manage", "file_name": "/etc/apt/sources.list", "salt_file": "apt/bullseye.list" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum SaltState {
    /// Place `files/<salt_file>` at `file_name`
    FileManage {
        file_name: String,
        salt_file: String,
        #[serde(default = "default_user")]
        user: String,
        #[serde(default = "default_file_mode")]
        mode: String,
    },
    /// Copy the directory `files/<salt_dir>` to `directory`
    FileRecurse {
        directory: String,
        salt_dir: String,
        #[serde(default = "default_user")]
        user: String,
        #[serde(default = "default_dir_mode")]
        dir_mode: String,
        #[serde(default = "default_file_mode")]
        file_mode: String,
    },
    /// Make `symlink` point at `file_name`
    FileSymlink { file_name: String, symlink: String },
    RunCommand {
        command: String,
        #[serde(default = "default_user")]
        user: String,
    },
    Install { packages: Vec<String> },
}

impl SaltState {
    /// Path below `files/` this state reads from, if it must exist up front
    pub fn required_salt_file(&self) -> Option<&str> {
        match self {
            SaltState::FileManage { salt_file, .. } => Some(salt_file),
            _ => None,
        }
    }
}

impl SaltArgs for SaltState {
    fn state_name(&self) -> &'static str {
        match self {
            SaltState::FileManage { .. } => "file-manage",
            SaltState::FileRecurse { .. } => "file-recurse",
            SaltState::FileSymlink { .. } => "file-symlink",
            SaltState::RunCommand { .. } => "run-command",
            SaltState::Install { .. } => "install",
        }
    }

    fn pillar(&self) -> Vec<(String, String)> {
        match self {
            SaltState::FileManage {
                file_name,
                salt_file,
                user,
                mode,
            } => vec![
                pair("file_name", file_name),
                pair("salt_file", salt_file),
                pair("user", user),
                pair("group", user),
                pair("mode", mode),
            ],
            SaltState::FileRecurse {
                directory,
                salt_dir,
                user,
                dir_mode,
                file_mode,
            } => vec![
                pair("file_name", directory),
                pair("salt_file", salt_dir),
                pair("user", user),
                pair("group", user),
                pair("dir_mode", dir_mode),
                pair("file_mode", file_mode),
            ],
            SaltState::FileSymlink { file_name, symlink } => vec![
                pair("file_name", file_name),
                pair("symlink_path", symlink),
            ],
            SaltState::RunCommand { command, user } => {
                vec![pair("command", command), pair("user", user)]
            }
            SaltState::Install { packages } => InstallPackages {
                packages: packages.clone(),
            }
            .pillar(),
        }
    }
}

// ============================================================================
// Internal states (dom0)
// ============================================================================

/// Clone `template_parent` to `template`
#[derive(Debug, Clone)]
pub struct CloneTemplate {
    pub template: String,
    pub template_parent: String,
}

impl SaltArgs for CloneTemplate {
    fn state_name(&self) -> &'static str {
        "clone-template"
    }

    fn pillar(&self) -> Vec<(String, String)> {
        vec![
            pair("template", &self.template),
            pair("template_parent", &self.template_parent),
        ]
    }
}

/// Create an AppVM or DispVM template based on `vm_template`
#[derive(Debug, Clone)]
pub struct CreateVm {
    pub vm_name: String,
    pub vm_template: String,
    /// Empty for no network VM
    pub netvm: String,
    pub label: String,
    pub memory: u32,
    pub maxmem: u32,
}

impl SaltArgs for CreateVm {
    fn state_name(&self) -> &'static str {
        "create-vm"
    }

    fn pillar(&self) -> Vec<(String, String)> {
        vec![
            pair("vm_name", &self.vm_name),
            pair("vm_template", &self.vm_template),
            pair("netvm", &self.netvm),
            pair("label", &self.label),
            pair("memory", self.memory),
            pair("maxmem", self.maxmem),
        ]
    }
}

/// Replace the app menu whitelist of a qube
#[derive(Debug, Clone)]
pub struct SetAppMenu {
    pub vm_name: String,
    pub entries: Vec<String>,
}

impl SaltArgs for SetAppMenu {
    fn state_name(&self) -> &'static str {
        "appmenus"
    }

    fn pillar(&self) -> Vec<(String, String)> {
        // literal backslash-n, expanded by printf in the state
        vec![
            pair("vm_name", &self.vm_name),
            pair("appmenu", self.entries.join("\\n")),
        ]
    }
}

/// Enable qvm-services of a qube
#[derive(Debug, Clone)]
pub struct VmService {
    pub vm_name: String,
    pub enabled: Vec<String>,
}

impl SaltArgs for VmService {
    fn state_name(&self) -> &'static str {
        "vm-service"
    }

    fn pillar(&self) -> Vec<(String, String)> {
        vec![
            pair("vm_name", &self.vm_name),
            pair("enabled", self.enabled.join(",")),
        ]
    }
}

// ============================================================================
// Internal states (inside a template)
// ============================================================================

#[derive(Debug, Clone)]
pub struct InstallPackages {
    pub packages: Vec<String>,
}

impl SaltArgs for InstallPackages {
    fn state_name(&self) -> &'static str {
        "install"
    }

    fn pillar(&self) -> Vec<(String, String)> {
        vec![pair("packages", self.packages.join(","))]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Upgrade;

impl SaltArgs for Upgrade {
    fn state_name(&self) -> &'static str {
        "upgrade"
    }

    fn pillar(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Where a state is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaltTarget {
    /// dom0 itself, pillar passed on the command line
    Dom0,
    /// a qube, pillar passed through the user pillar tree
    Vm(String),
}

/// One state application, ready to hand to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltCall {
    pub state: String,
    pub pillar: Vec<(String, String)>,
    pub target: SaltTarget,
}

impl SaltCall {
    pub fn new(args: &dyn SaltArgs, target: SaltTarget) -> Self {
        Self {
            state: args.state_name().to_string(),
            pillar: args.pillar(),
            target,
        }
    }

    pub fn dom0(args: &dyn SaltArgs) -> Self {
        Self::new(args, SaltTarget::Dom0)
    }

    pub fn on_vm(args: &dyn SaltArgs, vm: &str) -> Self {
        Self::new(args, SaltTarget::Vm(vm.to_string()))
    }

    /// `user_salt.<state>`
    pub fn sls(&self) -> String {
        format!("{}.{}", SALT_ENV, self.state)
    }

    /// Pillar as a JSON object, keys in declaration order
    pub fn pillar_json(&self) -> String {
        let body: Vec<String> = self
            .pillar
            .iter()
            .map(|(k, v)| format!("{}: {}", json_string(k), json_string(v)))
            .collect();
        format!("{{{}}}", body.join(", "))
    }

    /// Pillar value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pillar
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `qubesctl` command line for this call
    pub fn qubesctl_command(&self, use_sudo: bool) -> CommandSpec {
        let mut args = vec!["--show-output".to_string()];
        match &self.target {
            SaltTarget::Dom0 => {
                args.push("state.sls".to_string());
                args.push(self.sls());
                if !self.pillar.is_empty() {
                    args.push(format!("pillar={}", self.pillar_json()));
                }
            }
            SaltTarget::Vm(vm) => {
                args.push("--skip-dom0".to_string());
                args.push(format!("--targets={}", vm));
                args.push("state.sls".to_string());
                args.push(self.sls());
            }
        }
        let spec = CommandSpec::new("qubesctl", args);
        if use_sudo { spec.with_sudo() } else { spec }
    }
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
