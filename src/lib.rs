//! qubes-automation library
//!
//! Declare Qubes OS qubes with inheritable settings in one JSON file, then
//! check or converge dom0 to that declaration through the `qvm-*` tools and
//! `qubesctl`.

pub mod catalog;
pub mod cli;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod host;
pub mod logic;
pub mod process_guard;
pub mod runner;
pub mod salt;
pub mod sanity;
pub mod state;
pub mod types;
pub mod vm;

// Re-export main types for convenience
pub use config_file::{Attributes, PciDevice, QubesConfig, Settings, VmDeclaration};
pub use engine::{Engine, Report, missing_salt_files, salt_plan};
pub use error::{QubesError, Result};
pub use host::{QubesHost, QvmCli};
pub use logic::resolver::resolve;
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use salt::{SaltArgs, SaltCall, SaltState, SaltTarget};
pub use state::State;
pub use types::{LabelColor, NetVm, OperatingSystem, VirtMode, VmClass};
pub use vm::{Inventory, VmDefinition, VmKind};
