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

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::error::{RecordingError, Result};
use crate::payload::{Payload, SharedPayload};
use crate::types::{FrameRange, Role, SubjectKey};

/// In-memory window over one subject's timeline.
///
/// `frames[i]` is absolute frame `window_start + i`. While recording the window
/// starts at 0 and grows by appending; while streaming the loader swaps a
/// window in with [`RecordingBuffer::replace_window`] and grows it at both ends.
#[derive(Debug, Clone, Default)]
pub struct RecordingBuffer {
    timestamps: VecDeque<f64>,
    frames: VecDeque<SharedPayload>,
    window_start: i32,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a resident frame by absolute index.
    pub fn try_get_frame(&self, absolute_index: i32) -> Option<(SharedPayload, f64)> {
        if !self.is_frame_loaded(absolute_index) {
            return None;
        }
        let relative = (absolute_index - self.window_start) as usize;
        Some((Arc::clone(&self.frames[relative]), self.timestamps[relative]))
    }

    pub fn is_frame_loaded(&self, absolute_index: i32) -> bool {
        absolute_index >= self.window_start
            && (absolute_index - self.window_start) < self.frames.len() as i32
    }

    /// Append a live sample. `timestamp` is seconds since the recording started.
    pub fn append(&mut self, payload: SharedPayload, timestamp: f64) {
        self.frames.push_back(payload);
        self.timestamps.push_back(timestamp);
    }

    /// Grow the window by one frame on the left.
    pub fn prepend(&mut self, payload: SharedPayload, timestamp: f64) {
        self.frames.push_front(payload);
        self.timestamps.push_front(timestamp);
        self.window_start -= 1;
    }

    /// Swap in a freshly streamed window. Callers hold the data container lock.
    pub fn replace_window(
        &mut self,
        timestamps: impl Into<VecDeque<f64>>,
        frames: impl Into<VecDeque<SharedPayload>>,
        window_start: i32,
    ) {
        self.timestamps = timestamps.into();
        self.frames = frames.into();
        debug_assert_eq!(self.timestamps.len(), self.frames.len());
        self.window_start = window_start;
    }

    /// Check the buffer is safe to persist.
    pub fn validate(&self, subject: &SubjectKey) -> Result<()> {
        if self.timestamps.len() != self.frames.len() {
            return Err(RecordingError::InvalidData {
                subject: subject.to_string(),
                reason: format!(
                    "{} timestamps for {} frames",
                    self.timestamps.len(),
                    self.frames.len()
                ),
            });
        }
        if let Some(index) = self.frames.iter().position(|frame| !frame.is_valid()) {
            return Err(RecordingError::InvalidData {
                subject: subject.to_string(),
                reason: format!("frame {} has an invalid payload", index),
            });
        }
        // Playback walks frames by time, so a window must never step backwards.
        let not_increasing = (1..self.timestamps.len()).find(|&index| {
            self.timestamps[index].partial_cmp(&self.timestamps[index - 1]) != Some(Ordering::Greater)
        });
        if let Some(index) = not_increasing {
            return Err(RecordingError::InvalidData {
                subject: subject.to_string(),
                reason: format!(
                    "frame {} at {}s does not follow frame {} at {}s",
                    index,
                    self.timestamps[index],
                    index - 1,
                    self.timestamps[index - 1]
                ),
            });
        }
        Ok(())
    }

    /// Drop every resident frame. The window start is kept.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn timestamps(&self) -> &VecDeque<f64> {
        &self.timestamps
    }

    pub fn frames(&self) -> &VecDeque<SharedPayload> {
        &self.frames
    }

    pub fn window_start(&self) -> i32 {
        self.window_start
    }

    /// Absolute frames currently resident.
    pub fn window_range(&self) -> FrameRange {
        if self.frames.is_empty() {
            return FrameRange::EMPTY;
        }
        FrameRange::new(
            self.window_start,
            self.window_start + self.frames.len() as i32 - 1,
        )
    }
}

/// Static data recorded for a subject, with the role it was announced with.
#[derive(Debug, Clone, Default)]
pub struct StaticRecordingBuffer {
    pub role: Option<Role>,
    pub buffer: RecordingBuffer,
}

impl StaticRecordingBuffer {
    pub fn new(role: Option<Role>) -> Self {
        Self {
            role,
            buffer: RecordingBuffer::new(),
        }
    }

    /// Static buffer holding one sample at frame 0.
    pub fn with_sample(role: Option<Role>, payload: Payload) -> Self {
        let mut buffer = RecordingBuffer::new();
        buffer.append(Arc::new(payload), 0.0);
        Self { role, buffer }
    }
}

/// Every subject's static and frame data for one recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingDataSet {
    pub static_data: BTreeMap<SubjectKey, StaticRecordingBuffer>,
    pub frame_data: BTreeMap<SubjectKey, RecordingBuffer>,
}

impl RecordingDataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest frame-data track, in frames.
    pub fn max_frames(&self) -> i32 {
        self.frame_data
            .values()
            .map(|buffer| buffer.len() as i32)
            .max()
            .unwrap_or(0)
    }

    /// Empty every buffer while keeping the subject keys and roles.
    pub fn clear_frames(&mut self) {
        for static_data in self.static_data.values_mut() {
            static_data.buffer.clear();
        }
        for frame_data in self.frame_data.values_mut() {
            frame_data.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.static_data.is_empty() && self.frame_data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn payload(value: u8) -> SharedPayload {
        Arc::new(Payload::new("Basic", vec![value; 4]))
    }

    #[test]
    fn test_append_and_get() {
        let mut buffer = RecordingBuffer::new();
        buffer.append(payload(1), 0.0);
        buffer.append(payload(2), 0.5);

        let (frame, timestamp) = buffer.try_get_frame(1).unwrap();
        assert_eq!(frame.data()[0], 2);
        assert_eq!(timestamp, 0.5);
        assert!(buffer.try_get_frame(2).is_none());
        assert!(buffer.try_get_frame(-1).is_none());
    }

    #[test]
    fn test_window_offset_addressing() {
        let mut buffer = RecordingBuffer::new();
        buffer.replace_window(vec![1.0, 1.1, 1.2], vec![payload(10), payload(11), payload(12)], 10);

        assert!(buffer.try_get_frame(9).is_none());
        assert_eq!(buffer.try_get_frame(10).unwrap().1, 1.0);
        assert_eq!(buffer.try_get_frame(12).unwrap().0.data()[0], 12);
        assert!(buffer.try_get_frame(13).is_none());
        assert_eq!(buffer.window_range(), FrameRange::new(10, 12));
    }

    #[test]
    fn test_repeated_lookup_is_stable() {
        let mut buffer = RecordingBuffer::new();
        buffer.append(payload(5), 0.25);
        let first = buffer.try_get_frame(0).unwrap();
        let second = buffer.try_get_frame(0).unwrap();
        assert!(Arc::ptr_eq(&first.0, &second.0));
        assert_eq!(first.1, second.1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_validate_rejects_invalid_payload() {
        let key = SubjectKey::new(Uuid::nil(), "Subject");
        let mut buffer = RecordingBuffer::new();
        buffer.append(payload(1), 0.0);
        assert!(buffer.validate(&key).is_ok());

        buffer.append(Arc::new(Payload::new("Basic", Vec::new())), 0.1);
        assert!(matches!(
            buffer.validate(&key),
            Err(RecordingError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_repeated_timestamp() {
        let key = SubjectKey::new(Uuid::nil(), "Subject");
        let mut buffer = RecordingBuffer::new();
        buffer.append(payload(1), 0.0);
        buffer.append(payload(2), 0.5);
        buffer.append(payload(3), 0.5);

        let err = buffer.validate(&key).unwrap_err();
        assert!(err.to_string().contains("frame 2"), "{}", err);
    }

    #[test]
    fn test_prepend_grows_window_left() {
        let mut buffer = RecordingBuffer::new();
        buffer.replace_window(vec![2.0], vec![payload(20)], 20);
        buffer.prepend(payload(19), 1.9);
        buffer.append(payload(21), 2.1);

        assert_eq!(buffer.window_range(), FrameRange::new(19, 21));
        assert_eq!(buffer.try_get_frame(19).unwrap().0.data()[0], 19);
        assert_eq!(buffer.try_get_frame(21).unwrap().1, 2.1);
    }

    #[test]
    fn test_data_set_max_frames() {
        let mut data = RecordingDataSet::new();
        let mut short = RecordingBuffer::new();
        short.append(payload(1), 0.0);
        let mut long = RecordingBuffer::new();
        for i in 0..4 {
            long.append(payload(i), i as f64);
        }
        data.frame_data.insert(SubjectKey::new(Uuid::nil(), "a"), short);
        data.frame_data.insert(SubjectKey::new(Uuid::nil(), "b"), long);
        assert_eq!(data.max_frames(), 4);

        data.clear_frames();
        assert_eq!(data.max_frames(), 0);
        assert_eq!(data.frame_data.len(), 2);
    }
}
