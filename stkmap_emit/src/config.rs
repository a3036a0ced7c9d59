use std::env;

use stkmap_types::STACKMAP_VERSION;

use crate::error::{EmitError, Result};

const VERSION_VAR: &str = "STACKMAP_VERSION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMapConfig {
    /// Section format revision to emit.
    pub version: u8,
}

impl Default for StackMapConfig {
    fn default() -> Self {
        Self {
            version: STACKMAP_VERSION,
        }
    }
}

impl StackMapConfig {
    /// Reads overrides from the environment. The version is only checked once a session is built.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = env::var(VERSION_VAR) {
            config.version = value.trim().parse().map_err(|_| EmitError::BadConfig {
                var: VERSION_VAR,
                value,
            })?;
        }
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.version != STACKMAP_VERSION {
            return Err(EmitError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}
