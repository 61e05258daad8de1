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

// Configuration types for livelink-recorder

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::FrameRate;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration with backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend type: "filesystem" or "memory"
    pub backend: String,

    /// Attempts per package save before giving up
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Backend-specific configuration
    #[serde(flatten)]
    pub backend_config: BackendConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "filesystem".to_string(),
            max_retries: default_retries(),
            backend_config: BackendConfig::Filesystem {
                filesystem: FilesystemConfig::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendConfig {
    Filesystem {
        #[serde(rename = "filesystem")]
        filesystem: FilesystemConfig,
    },
    // Must stay last: an empty variant matches any remaining keys.
    Memory {},
}

impl BackendConfig {
    pub fn as_filesystem(&self) -> Option<&FilesystemConfig> {
        match self {
            BackendConfig::Filesystem { filesystem } => Some(filesystem),
            _ => None,
        }
    }

    pub fn as_filesystem_mut(&mut self) -> Option<&mut FilesystemConfig> {
        match self {
            BackendConfig::Filesystem { filesystem } => Some(filesystem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "./recordings".to_string(),
        }
    }
}

/// Recorder-specific settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    /// Package name template; `{date}` and `{time}` are replaced at save time
    #[serde(default = "default_filename_template")]
    pub filename_template: String,

    /// Frame rate stamped on new recordings
    #[serde(default)]
    pub frame_rate: FrameRate,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            filename_template: default_filename_template(),
            frame_rate: FrameRate::default(),
        }
    }
}

/// Knobs for the background streaming loader
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Artificial delay after each decoded frame, for testing slow disks
    #[serde(default)]
    pub debug_sleep_time_ms: u64,

    /// Publish the buffered range every N loop iterations
    #[serde(default = "default_report_interval")]
    pub report_interval: usize,

    /// Idle wait between polls of the streaming request
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Sleep between checks in `wait_for_buffered_frames`
    #[serde(default = "default_wait_poll_interval")]
    pub wait_poll_interval_ms: u64,

    #[serde(default = "default_pause_timeout")]
    pub pause_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            debug_sleep_time_ms: 0,
            report_interval: default_report_interval(),
            poll_interval_ms: default_poll_interval(),
            wait_poll_interval_ms: default_wait_poll_interval(),
            pause_timeout_ms: default_pause_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl StreamingConfig {
    pub fn debug_sleep_time(&self) -> Duration {
        Duration::from_millis(self.debug_sleep_time_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Memory budget for streamed frames, in megabytes
    #[serde(default = "default_frame_buffer_size")]
    pub frame_buffer_size_mb: u64,

    /// Lower bound for frames buffered on each side of the playhead
    #[serde(default = "default_min_frames_to_buffer")]
    pub min_frames_to_buffer: i32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_buffer_size_mb: default_frame_buffer_size(),
            min_frames_to_buffer: default_min_frames_to_buffer(),
        }
    }
}

impl PlaybackConfig {
    /// Frames to keep on each side of the playhead for records of `frame_disk_size` bytes.
    pub fn frames_to_buffer(&self, frame_disk_size: usize) -> i32 {
        if frame_disk_size == 0 {
            return self.min_frames_to_buffer;
        }
        let budget = self.frame_buffer_size_mb.saturating_mul(1024 * 1024);
        let frames = budget / frame_disk_size as u64 / 2;
        (frames.min(i32::MAX as u64) as i32).max(self.min_frames_to_buffer)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,  // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String,  // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_retries() -> u32 { 3 }
fn default_filename_template() -> String { "LiveLinkRecording_{date}_{time}".to_string() }
fn default_report_interval() -> usize { 5 }
fn default_poll_interval() -> u64 { 1 }
fn default_wait_poll_interval() -> u64 { 2 }
fn default_pause_timeout() -> u64 { 5000 }
fn default_shutdown_timeout() -> u64 { 5000 }
fn default_frame_buffer_size() -> u64 { 100 }
fn default_min_frames_to_buffer() -> i32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
