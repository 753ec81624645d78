//! Engine config loader (strict parsing).

pub mod schema;

use std::fs;

use sesskey_core::error::{Result, SessionError};

pub use schema::{AccountingSection, ChainSection, EngineConfig, SessionsSection, WindowAnchor};

pub fn load_from_file(path: &str) -> Result<EngineConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| SessionError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<EngineConfig> {
    let cfg: EngineConfig = serde_yaml::from_str(s)
        .map_err(|e| SessionError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
