use std::time::Duration;

use serde::Deserialize;
use sesskey_core::error::{Result, SessionError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,

    #[serde(default)]
    pub accounting: AccountingSection,

    #[serde(default)]
    pub chain: ChainSection,

    #[serde(default)]
    pub sessions: SessionsSection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            accounting: AccountingSection::default(),
            chain: ChainSection::default(),
            sessions: SessionsSection::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(SessionError::UnsupportedVersion);
        }
        self.chain.validate()?;
        Ok(())
    }
}

/// What `t = 0` is when bucketing usage into allowance windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAnchor {
    /// Windows start at the session's observed creation time.
    #[default]
    Creation,
    /// Windows are aligned to the UNIX epoch (`timestamp / period`).
    Epoch,
}

impl WindowAnchor {
    /// Anchor timestamp for a session created at `created_at`.
    pub fn resolve(self, created_at: u64) -> u64 {
        match self {
            WindowAnchor::Creation => created_at,
            WindowAnchor::Epoch => 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountingSection {
    #[serde(default)]
    pub window_anchor: WindowAnchor,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainSection {
    /// How long to wait locally for a submission to confirm.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

impl ChainSection {
    pub fn validate(&self) -> Result<()> {
        if !(1000..=600000).contains(&self.confirm_timeout_ms) {
            return Err(SessionError::Config(
                "chain.confirm_timeout_ms must be between 1000 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsSection {
    /// Longest grant `create_session` accepts, in seconds. 0 disables the check.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

fn default_confirm_timeout_ms() -> u64 {
    60000
}
fn default_max_lifetime_secs() -> u64 {
    // 90 days
    7_776_000
}
