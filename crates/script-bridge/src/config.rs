//! Bridge configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! lock_timeout_ms = 5000
//! convenience_table = "nscp"
//!
//! [scripts]
//! cpu = "check_cpu.lua"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a caller waits for a busy script before giving up.
    pub lock_timeout_ms: u64,

    /// `package.path` patterns, relative to each instance's base path.
    pub search_paths: Vec<String>,

    /// Directories, relative to the base path, searched for bare script names.
    pub script_dirs: Vec<String>,

    /// Global table holding `execute`, `register`, `info`, `error`, `print`,
    /// `getSetting` and `getSection`.
    pub convenience_table: String,

    /// Native call audit ring size; 0 disables auditing.
    pub audit_capacity: usize,

    /// `alias = "script"` entries loaded by `ScriptBridge::load_configured`.
    pub scripts: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            search_paths: vec![
                "scripts/lua/lib/?.lua".to_string(),
                "scripts/lua/?.lua".to_string(),
            ],
            script_dirs: vec!["scripts/lua".to_string(), "scripts".to_string()],
            convenience_table: "nscp".to_string(),
            audit_capacity: 512,
            scripts: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).context("parsing bridge config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read bridge config {}", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("invalid bridge config {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.convenience_table.is_empty() {
            anyhow::bail!("convenience_table must not be empty");
        }
        if let Some(alias) = self.scripts.keys().find(|alias| alias.is_empty()) {
            anyhow::bail!("script alias {alias:?} must not be empty");
        }
        Ok(())
    }
}
