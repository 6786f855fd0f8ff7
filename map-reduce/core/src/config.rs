// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Tunables of one orchestrator instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapReduceConfig {
    /// Maximum number of workers per phase (None = host logical core count)
    pub pool_size: Option<usize>,
    /// Buffered events per subscriber before slow subscribers start lagging
    pub event_capacity: usize,
    /// How long a failed or cancelled phase waits for its units to exit
    pub teardown_grace_ms: u64,
}

impl Default for MapReduceConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            event_capacity: 1024,
            teardown_grace_ms: 5000,
        }
    }
}

impl MapReduceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MapReduceConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.pool_size {
            Some(0) => Err(ConfigError::InvalidPoolSize(0)),
            _ => Ok(()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(num_cpus::get)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}
