// Copyright 2025 coScene
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

// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::load_str(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn load_str(content: &str) -> Result<RecorderConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: RecorderConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${RECORDING_DIR:-./recordings} -> ./recordings (if RECORDING_DIR not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });
        Ok(substituted.to_string())
    }

    /// Validate configuration
    pub fn validate(config: &RecorderConfig) -> Result<()> {
        match config.storage.backend.as_str() {
            "filesystem" => {
                let Some(filesystem) = config.storage.backend_config.as_filesystem() else {
                    bail!("filesystem backend selected but filesystem config missing");
                };
                if filesystem.base_path.is_empty() {
                    bail!("storage.filesystem.base_path cannot be empty");
                }
            }
            "memory" => {}
            unknown => bail!("Unknown backend: '{}'. Supported: filesystem, memory", unknown),
        }

        if config.storage.max_retries == 0 {
            bail!("storage.max_retries must be > 0");
        }

        if config.recorder.filename_template.trim().is_empty() {
            bail!("recorder.filename_template cannot be empty");
        }

        let frame_rate = config.recorder.frame_rate;
        if frame_rate.numerator == 0 || frame_rate.denominator == 0 {
            bail!("recorder.frame_rate must have a non-zero numerator and denominator");
        }

        let streaming = &config.streaming;
        if streaming.report_interval == 0 {
            bail!("streaming.report_interval must be > 0");
        }
        if streaming.pause_timeout_ms == 0 {
            bail!("streaming.pause_timeout_ms must be > 0");
        }
        if streaming.shutdown_timeout_ms == 0 {
            bail!("streaming.shutdown_timeout_ms must be > 0");
        }

        if config.playback.frame_buffer_size_mb == 0 {
            bail!("playback.frame_buffer_size_mb must be > 0");
        }
        if config.playback.min_frames_to_buffer < 1 {
            bail!("playback.min_frames_to_buffer must be >= 1");
        }

        Ok(())
    }
}
