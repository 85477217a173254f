use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use engram_core::EngineConfig;

use crate::error::Result;

pub const CONFIG_FILE: &str = "engram.toml";

/// Load and validate an engine config. A missing file yields defaults;
/// omitted sections and keys fall back to their defaults too.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    match fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(EngineConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn parse_config(text: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}
