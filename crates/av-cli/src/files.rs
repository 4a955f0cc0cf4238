use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use av_core::EngineConfig;
use av_rules::{MemoryRuleEngine, Rule, RuleEngine, RuleEngineError, SyncConfig};
use serde::Deserialize;

/// Engine settings plus the `sync` section, read from `--config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    pub sync: SyncConfig,
}

pub fn load_config(path: Option<&Path>) -> Result<CliConfig, String> {
    match path {
        Some(path) => {
            let text = read_text(path)?;
            serde_json::from_str(&text).map_err(|e| format!("Invalid config '{}': {}", path.display(), e))
        }
        None => Ok(CliConfig::default()),
    }
}

pub fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, String> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid JSON in '{}': {}", path.display(), e))
}

/// Write `text` to `path`, or to stdout when no path is given.
pub fn write_output(path: Option<&Path>, text: &str) -> Result<(), String> {
    let Some(path) = path else {
        println!("{text}");
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, text).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}

/// Installed rules kept in a JSON file, standing in for the browser's
/// rule engine.
#[derive(Debug, Clone)]
pub struct RulesFile {
    path: PathBuf,
    capacity: usize,
}

impl RulesFile {
    pub fn new(path: impl AsRef<Path>, capacity: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            capacity,
        }
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> RuleEngineError {
        RuleEngineError::Unavailable(format!("{}: {}", self.path.display(), e))
    }
}

impl RuleEngine for RulesFile {
    fn installed_rules(&self) -> Result<Vec<Rule>, RuleEngineError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| self.unavailable(e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn update_rules(&mut self, remove_ids: &[u32], add: Vec<Rule>) -> Result<(), RuleEngineError> {
        let mut engine = MemoryRuleEngine::with_rules(self.capacity, self.installed_rules()?);
        engine.update_rules(remove_ids, add)?;
        let text = serde_json::to_string_pretty(&engine.installed_rules()?).map_err(|e| self.unavailable(e))?;
        fs::write(&self.path, text).map_err(|e| self.unavailable(e))
    }
}
