//! Temporary pillar for states applied inside a qube.
//!
//! `qubesctl --targets=<vm>` cannot take `pillar=` on the command line, so the
//! pillar is written to `<user_pillar_dir>/target_pillar.sls` and mapped to
//! the target in `top.sls`. [`TargetPillar`] restores both files on drop,
//! including when the state run fails.
//!
//! Only one `TargetPillar` may exist at a time; runs are sequential.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;

pub const USER_PILLAR_NAME: &str = "target_pillar";

/// Live pillar mapping for one targeted state run
#[derive(Debug)]
pub struct TargetPillar {
    pillar_path: PathBuf,
    top_path: PathBuf,
    old_top: Option<String>,
}

impl TargetPillar {
    /// Write the pillar file and map it to `target` in `top.sls`
    pub fn install(dir: &Path, target: &str, pillar: &[(String, String)]) -> Result<Self> {
        let pillar_path = dir.join(format!("{}.sls", USER_PILLAR_NAME));
        let top_path = dir.join("top.sls");

        let old_top = match fs::read_to_string(&top_path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        debug!("Writing {}", pillar_path.display());
        fs::write(&pillar_path, render_pillar(pillar))?;

        let guard = Self {
            pillar_path,
            top_path,
            old_top,
        };
        fs::write(&guard.top_path, guard.top_with_target(target))?;
        Ok(guard)
    }

    fn top_with_target(&self, target: &str) -> String {
        let mut top = match &self.old_top {
            Some(content) => content.clone(),
            None => "base:\n".to_string(),
        };
        if !top.is_empty() && !top.ends_with('\n') {
            top.push('\n');
        }
        top.push_str(&format!("  {}:\n    - {}\n", target, USER_PILLAR_NAME));
        top
    }

    pub fn pillar_path(&self) -> &Path {
        &self.pillar_path
    }
}

impl Drop for TargetPillar {
    fn drop(&mut self) {
        debug!("Removing {}", self.pillar_path.display());
        if let Err(e) = fs::write(&self.pillar_path, "") {
            warn!("Failed to clear {}: {}", self.pillar_path.display(), e);
        }
        let restored = match &self.old_top {
            Some(content) => fs::write(&self.top_path, content),
            None => fs::remove_file(&self.top_path),
        };
        if let Err(e) = restored {
            warn!("Failed to restore {}: {}", self.top_path.display(), e);
        }
    }
}

/// `key: "value"` lines, values JSON-quoted so they stay valid YAML
pub fn render_pillar(pillar: &[(String, String)]) -> String {
    pillar
        .iter()
        .map(|(k, v)| format!("{}: {}\n", k, serde_json::Value::String(v.clone())))
        .collect()
}
