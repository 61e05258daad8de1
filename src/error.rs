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

//! Error types for recording, streaming and playback.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the recording core.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bulk data was written by a different format version.
    #[error("recording format version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: i32, found: i32 },

    #[error("payload type '{0}' is not registered")]
    UnknownPayloadType(String),

    /// A payload does not have the byte size registered for its type.
    #[error("payload type '{type_name}' has size {found} bytes, expected {expected}")]
    PayloadSize {
        type_name: String,
        expected: usize,
        found: usize,
    },

    /// A decoded frame record carried a different index than its file position implies.
    #[error("frame index mismatch: expected {expected}, got {found}")]
    FrameIndexMismatch { expected: i32, found: i32 },

    /// Recorded data failed validation and must not be persisted.
    #[error("invalid recording data for subject '{subject}': {reason}")]
    InvalidData { subject: String, reason: String },

    #[error(
        "frame {frame} of subject '{subject}' serialized to {found} bytes, expected {expected}"
    )]
    InconsistentFrameSize {
        subject: String,
        frame: usize,
        expected: usize,
        found: usize,
    },

    #[error("malformed recording data: {0}")]
    Malformed(String),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("streaming task did not shut down within {0:?}")]
    ShutdownTimedOut(Duration),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, RecordingError>;
