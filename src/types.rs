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

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::payload::SharedPayload;

/// Suffix appended to a subject name to address its static-data track.
pub const STATIC_TRACK_SUFFIX: &str = "_STATIC";

/// Identifies one recorded data stream: the source it came from plus the subject name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub source: Uuid,
    pub name: String,
}

impl SubjectKey {
    pub fn new(source: Uuid, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    /// Key used for the static-data playback track of this subject, so it does not
    /// collide with the subject's frame-data track.
    pub fn static_track_key(&self) -> SubjectKey {
        SubjectKey {
            source: self.source,
            name: format!("{}{}", self.name, STATIC_TRACK_SUFFIX),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.source)
    }
}

/// Role of a subject's static data (e.g. "Animation", "Transform", "Camera").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Rational frame rate, e.g. 30/1 or 30000/1001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn as_fps(&self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new(30, 1)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Inclusive range of absolute frame indices. `min > max` means empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub min: i32,
    pub max: i32,
}

impl FrameRange {
    pub const EMPTY: FrameRange = FrameRange { min: 0, max: -1 };

    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.max - self.min) as usize + 1
        }
    }

    pub fn contains(&self, frame: i32) -> bool {
        frame >= self.min && frame <= self.max
    }

    /// True when every frame of `other` lies inside this range. An empty `other` is always contained.
    pub fn contains_range(&self, other: &FrameRange) -> bool {
        if other.is_empty() {
            return true;
        }
        !self.is_empty() && self.min <= other.min && other.max <= self.max
    }

    pub fn intersection(&self, other: &FrameRange) -> FrameRange {
        let range = FrameRange::new(self.min.max(other.min), self.max.min(other.max));
        if range.is_empty() {
            FrameRange::EMPTY
        } else {
            range
        }
    }
}

impl Default for FrameRange {
    fn default() -> Self {
        FrameRange::EMPTY
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[]")
        } else {
            write!(f, "[{}, {}]", self.min, self.max)
        }
    }
}

/// One frame handed to the playback consumer.
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    pub data: SharedPayload,
    pub subject_key: SubjectKey,
    /// Set for static data only.
    pub role: Option<Role>,
    /// Absolute frame index within the recording.
    pub frame_index: i32,
}
