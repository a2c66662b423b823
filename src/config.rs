// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bootstrap configuration.
//!
//! Stored as TOML through `confy`. Holds logging preferences, the manager's
//! log tag and transition buffer, and the service lifecycle script the
//! bootstrap plays through the local discovery facility.

use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use service_link::{DEFAULT_TAG, MAX_TRANSITION_BUFFER};
use thiserror::Error;

/// Application name used for the config directory.
pub const APP_NAME: &str = "hookbridge";

/// Config file stem inside the application directory.
const CONFIG_NAME: &str = "config";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Storage(#[from] confy::ConfyError),

    #[error("invalid log level {level:?}: {reason}")]
    LogLevel { level: String, reason: String },

    #[error("transition_buffer must be at least 1")]
    EmptyTransitionBuffer,

    #[error("transition_buffer {requested} exceeds the maximum of {max}")]
    TransitionBufferTooLarge { requested: usize, max: usize },

    #[error("scenario step {step}: die refers to bind #{service}, but only {binds} bind(s) come before it")]
    UnknownService {
        step: usize,
        service: usize,
        binds: usize,
    },
}

/// One step of the service lifecycle script.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Bind a new service instance.
    Bind {
        name: String,
        version: String,
        #[serde(default)]
        version_code: i64,
    },
    /// Report the death of the service created by the `service`-th bind
    /// (zero-based). Deaths of replaced services are allowed.
    Die { service: usize },
    /// Sleep between steps.
    Pause { millis: u64 },
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Log level when neither `--log-level` nor `RUST_LOG` is set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log target for service manager messages
    #[serde(default = "default_log_tag")]
    pub log_tag: String,

    /// Transitions buffered per subscriber
    #[serde(default = "default_transition_buffer")]
    pub transition_buffer: usize,

    /// Service lifecycle played at startup
    #[serde(default = "default_scenario")]
    pub scenario: Vec<ScenarioStep>,
}

fn default_config_version() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_tag() -> String {
    DEFAULT_TAG.to_string()
}

fn default_transition_buffer() -> usize {
    16
}

fn bind_step(version: &str, version_code: i64) -> ScenarioStep {
    ScenarioStep::Bind {
        name: "LSPosed".to_string(),
        version: version.to_string(),
        version_code,
    }
}

/// Bind, die, rebind, then a late death of the first instance.
fn default_scenario() -> Vec<ScenarioStep> {
    vec![
        bind_step("1.9.2", 7024),
        ScenarioStep::Pause { millis: 50 },
        ScenarioStep::Die { service: 0 },
        ScenarioStep::Pause { millis: 50 },
        bind_step("1.9.2", 7024),
        ScenarioStep::Die { service: 0 },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            log_level: default_log_level(),
            log_tag: default_log_tag(),
            transition_buffer: default_transition_buffer(),
            scenario: default_scenario(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform config directory
    pub fn load() -> Result<Self, ConfigError> {
        Ok(confy::load(APP_NAME, CONFIG_NAME)?)
    }

    /// Load configuration from an explicit file, creating it with defaults if missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Ok(confy::load_path(path)?)
    }

    /// Get the config file path for display to user
    pub fn config_path() -> Result<std::path::PathBuf, ConfigError> {
        Ok(confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)?)
    }

    /// Parsed form of [`log_level`](Self::log_level).
    pub fn log_level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log_level).map_err(|e| ConfigError::LogLevel {
            level: self.log_level.clone(),
            reason: e.to_string(),
        })
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_level_filter()?;

        if self.transition_buffer == 0 {
            return Err(ConfigError::EmptyTransitionBuffer);
        }
        if self.transition_buffer > MAX_TRANSITION_BUFFER {
            return Err(ConfigError::TransitionBufferTooLarge {
                requested: self.transition_buffer,
                max: MAX_TRANSITION_BUFFER,
            });
        }

        let mut binds = 0;
        for (step, action) in self.scenario.iter().enumerate() {
            match action {
                ScenarioStep::Bind { .. } => binds += 1,
                ScenarioStep::Die { service } if *service >= binds => {
                    return Err(ConfigError::UnknownService {
                        step,
                        service: *service,
                        binds,
                    });
                }
                ScenarioStep::Die { .. } | ScenarioStep::Pause { .. } => {}
            }
        }

        Ok(())
    }
}
