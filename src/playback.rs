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

//! Playback of streamed recordings.
//!
//! A [`PlaybackTrack`] is a read-only snapshot of one subject's resident
//! window plus a read cursor. The cursor is kept in absolute frame indices so
//! it survives the window being replaced by the streaming loader.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PlaybackConfig;
use crate::error::Result;
use crate::payload::SharedPayload;
use crate::recording::Recording;
use crate::types::{FrameRange, FrameRate, RecordedFrame, Role, SubjectKey};

/// Playback track for one subject.
#[derive(Debug, Clone)]
pub struct PlaybackTrack {
    frames: Vec<SharedPayload>,
    timestamps: Vec<f64>,
    role: Option<Role>,
    subject_key: SubjectKey,
    last_read_relative: i32,
    last_read_absolute: i32,
    /// Absolute index of `frames[0]`.
    start_index_offset: i32,
    last_timestamp: f64,
}

impl PlaybackTrack {
    pub fn new(subject_key: SubjectKey) -> Self {
        Self {
            frames: Vec::new(),
            timestamps: Vec::new(),
            role: None,
            subject_key,
            last_read_relative: -1,
            last_read_absolute: -1,
            start_index_offset: 0,
            last_timestamp: -1.0,
        }
    }

    /// Replace the resident window. Read cursors are kept.
    pub fn set_window(&mut self, frames: Vec<SharedPayload>, timestamps: Vec<f64>, start_index_offset: i32) {
        self.frames = frames;
        self.timestamps = timestamps;
        self.start_index_offset = start_index_offset;
    }

    pub fn set_role(&mut self, role: Option<Role>) {
        self.role = role;
    }

    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    pub fn subject_key(&self) -> &SubjectKey {
        &self.subject_key
    }

    pub fn start_index_offset(&self) -> i32 {
        self.start_index_offset
    }

    pub fn last_read_absolute_index(&self) -> i32 {
        self.last_read_absolute
    }

    /// Frames resident in this track.
    pub fn max_frames(&self) -> usize {
        self.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn len(&self) -> i32 {
        self.frames.len().min(self.timestamps.len()) as i32
    }

    /// Absolute index clamped into the resident window, as a relative index.
    /// `-1` when nothing is resident.
    pub fn relative_index(&self, absolute_index: i32) -> i32 {
        let len = self.len();
        if len == 0 {
            return -1;
        }
        (absolute_index - self.start_index_offset).clamp(0, len - 1)
    }

    fn emit(&mut self, relative: i32, out: &mut Vec<RecordedFrame>) {
        self.last_read_relative = relative;
        self.last_read_absolute = relative + self.start_index_offset;
        self.last_timestamp = self.timestamps[relative as usize];
        out.push(self.frame_at(relative));
    }

    fn frame_at(&self, relative: i32) -> RecordedFrame {
        RecordedFrame {
            data: Arc::clone(&self.frames[relative as usize]),
            subject_key: self.subject_key.clone(),
            role: self.role.clone(),
            frame_index: relative + self.start_index_offset,
        }
    }

    /// Every frame from the last read one up to `playhead`, moving forward.
    pub fn frames_until(&mut self, playhead: f64, out: &mut Vec<RecordedFrame>) {
        let len = self.len();
        let mut index = self.relative_index(self.last_read_absolute).max(0);
        while index < len {
            let timestamp = self.timestamps[index as usize];
            // The last emitted frame is usually the first one visited.
            if timestamp == self.last_timestamp {
                index += 1;
                continue;
            }
            if timestamp > playhead {
                break;
            }
            self.emit(index, out);
            index += 1;
        }
    }

    /// Every frame from the last read one back to `playhead`, moving in reverse.
    ///
    /// Stops at the frame a forward lookup of `playhead` would land on, so the
    /// two directions agree on the final frame.
    pub fn frames_until_reverse(&mut self, playhead: f64, out: &mut Vec<RecordedFrame>) {
        if self.last_read_relative == -1 {
            self.last_read_relative = self.len();
            self.last_read_absolute = self.last_read_relative + self.start_index_offset;
        }

        let final_frame = self.playhead_to_frame_index(playhead);
        let mut index = self.relative_index(self.last_read_absolute);
        while index >= 0 {
            let timestamp = self.timestamps[index as usize];
            if timestamp == self.last_timestamp {
                index -= 1;
                continue;
            }
            if timestamp < playhead
                || final_frame == self.last_read_relative + self.start_index_offset
            {
                break;
            }
            self.emit(index, out);
            index -= 1;
        }
    }

    /// Frame nearest `absolute_index` within the resident window.
    pub fn try_get_frame(&mut self, absolute_index: i32) -> Option<RecordedFrame> {
        let relative = self.relative_index(absolute_index);
        if relative < 0 {
            return None;
        }
        self.last_read_relative = relative;
        self.last_read_absolute = relative + self.start_index_offset;
        Some(self.frame_at(relative))
    }

    /// Last frame whose timestamp is at or before `playhead`.
    pub fn playhead_to_frame_index(&self, playhead: f64) -> i32 {
        let mut current = 0;
        for (index, timestamp) in self.timestamps.iter().enumerate() {
            if *timestamp > playhead {
                break;
            }
            current = index as i32;
        }
        current + self.start_index_offset
    }

    pub fn frame_index_to_playhead(&self, absolute_index: i32) -> Option<f64> {
        let relative = self.relative_index(absolute_index);
        if relative < 0 {
            return None;
        }
        self.timestamps.get(relative as usize).copied()
    }

    /// Move the read cursor to `index`, or before the first frame.
    pub fn restart(&mut self, index: Option<i32>) {
        let relative = index
            .map(|index| index - self.start_index_offset)
            .filter(|relative| (0..self.len()).contains(relative));
        match relative {
            Some(relative) => {
                self.last_read_relative = relative;
                self.last_read_absolute = relative + self.start_index_offset;
            }
            None => {
                self.last_read_relative = -1;
                self.last_read_absolute = -1;
            }
        }
    }
}

/// Playback tracks of one recording, keyed by subject.
///
/// Static data lives under `<subject>_STATIC` keys. Time conversions use the
/// first track without a role, i.e. the first frame-data track.
#[derive(Debug, Clone, Default)]
pub struct PlaybackTrackSet {
    tracks: BTreeMap<SubjectKey, PlaybackTrack>,
}

impl PlaybackTrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing track for `key`, or a new empty one.
    pub fn track_entry(&mut self, key: SubjectKey) -> &mut PlaybackTrack {
        self.tracks
            .entry(key)
            .or_insert_with_key(|key| PlaybackTrack::new(key.clone()))
    }

    pub fn get(&self, key: &SubjectKey) -> Option<&PlaybackTrack> {
        self.tracks.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SubjectKey, &PlaybackTrack)> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn fetch_next_frames(&mut self, playhead: f64) -> Vec<RecordedFrame> {
        let mut frames = Vec::new();
        for track in self.tracks.values_mut() {
            track.frames_until(playhead, &mut frames);
        }
        frames
    }

    pub fn fetch_previous_frames(&mut self, playhead: f64) -> Vec<RecordedFrame> {
        let mut frames = Vec::new();
        for track in self.tracks.values_mut() {
            track.frames_until_reverse(playhead, &mut frames);
        }
        frames
    }

    pub fn fetch_next_frames_at_index(&mut self, frame_index: i32) -> Vec<RecordedFrame> {
        if frame_index < 0 {
            return Vec::new();
        }
        self.tracks
            .values_mut()
            .filter_map(|track| track.try_get_frame(frame_index))
            .collect()
    }

    fn frame_track(&self) -> Option<&PlaybackTrack> {
        self.tracks.values().find(|track| track.role.is_none())
    }

    pub fn playhead_to_frame_index(&self, playhead: f64) -> Option<i32> {
        self.frame_track()
            .map(|track| track.playhead_to_frame_index(playhead))
    }

    pub fn frame_index_to_playhead(&self, frame_index: i32) -> Option<f64> {
        self.frame_track()
            .and_then(|track| track.frame_index_to_playhead(frame_index))
    }

    pub fn restart(&mut self, index: Option<i32>) {
        for track in self.tracks.values_mut() {
            track.restart(index);
        }
    }
}

/// A playhead position in both time domains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayheadTime {
    pub frame: i32,
    pub seconds: f64,
}

impl PlayheadTime {
    pub fn new(frame: i32, seconds: f64) -> Self {
        Self { frame, seconds }
    }

    pub fn from_seconds(seconds: f64, frame_rate: FrameRate) -> Self {
        let frame = (seconds * frame_rate.as_fps()).floor() as i32;
        Self { frame, seconds }
    }
}

/// Streams a recording around the playhead and serves its frames.
pub struct RecordingPlayer {
    config: PlaybackConfig,
    recording: Option<Arc<Recording>>,
    tracks: PlaybackTrackSet,
}

impl RecordingPlayer {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            recording: None,
            tracks: PlaybackTrackSet::new(),
        }
    }

    /// Load `recording` for playback, releasing whatever was loaded before.
    pub fn prepare_playback(&mut self, recording: Arc<Recording>) -> Result<()> {
        self.shutdown_playback()?;
        debug!("Preparing playback of {}", recording.name());
        self.recording = Some(recording);
        self.tracks = PlaybackTrackSet::new();
        self.stream_playback(0)
    }

    pub fn shutdown_playback(&mut self) -> Result<()> {
        if let Some(recording) = self.recording.take() {
            recording.unload_recording_data()?;
        }
        self.tracks.clear();
        Ok(())
    }

    pub fn recording(&self) -> Option<&Arc<Recording>> {
        self.recording.as_ref()
    }

    /// Identity of the recording being played, if any.
    pub fn playing_recording_id(&self) -> Option<Uuid> {
        self.recording.as_ref().map(|recording| recording.id())
    }

    pub fn tracks(&self) -> &PlaybackTrackSet {
        &self.tracks
    }

    pub fn fetch_next_frames_at_timestamp(&mut self, time: PlayheadTime) -> Result<Vec<RecordedFrame>> {
        self.stream_playback(time.frame)?;
        Ok(self.tracks.fetch_next_frames(time.seconds))
    }

    pub fn fetch_previous_frames_at_timestamp(&mut self, time: PlayheadTime) -> Result<Vec<RecordedFrame>> {
        self.stream_playback(time.frame)?;
        Ok(self.tracks.fetch_previous_frames(time.seconds))
    }

    pub fn fetch_next_frames_at_index(&mut self, frame_index: i32) -> Result<Vec<RecordedFrame>> {
        self.stream_playback(frame_index)?;
        Ok(self.tracks.fetch_next_frames_at_index(frame_index))
    }

    pub fn restart_playback(&mut self, index: Option<i32>) {
        self.tracks.restart(index);
    }

    /// Frame rate the recording was made at.
    pub fn initial_frame_rate(&self) -> FrameRate {
        match self.recording.as_ref().and_then(|recording| recording.frame_rate()) {
            Some(frame_rate) => frame_rate,
            None => {
                warn!("Could not find an initial frame rate for the recording, using the default");
                FrameRate::default()
            }
        }
    }

    pub fn buffered_frames(&self) -> FrameRange {
        self.recording
            .as_ref()
            .map(|recording| recording.buffered_frames())
            .unwrap_or(FrameRange::EMPTY)
    }

    /// Frames to buffer on each side of the playhead.
    pub fn frames_to_buffer(&self) -> i32 {
        let disk_size = self
            .recording
            .as_ref()
            .map(|recording| recording.frame_disk_size())
            .unwrap_or(0);
        self.config.frames_to_buffer(disk_size)
    }

    /// Buffer around `from_frame` and refresh the tracks from the resident data.
    pub fn stream_playback(&mut self, from_frame: i32) -> Result<()> {
        let Some(recording) = self.recording.clone() else {
            return Ok(());
        };

        let initial_frames = self.frames_to_buffer();
        recording.load_recording_data(from_frame, initial_frames)?;

        // Make sure a few frames are ready.
        recording.wait_for_buffered_frames(from_frame, from_frame + 2);

        // The record size is only known once the layout has been read.
        let current_frames = self.frames_to_buffer();
        if current_frames != initial_frames {
            recording.load_recording_data(from_frame, current_frames)?;
        }

        recording.copy_recording_data(&mut self.tracks);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;

    fn track(start: i32, timestamps: &[f64]) -> PlaybackTrack {
        let mut track = PlaybackTrack::new(SubjectKey::new(Uuid::nil(), "Subject"));
        let frames = timestamps
            .iter()
            .enumerate()
            .map(|(i, _)| Arc::new(Payload::new("Basic", vec![i as u8 + 1])))
            .collect();
        track.set_window(frames, timestamps.to_vec(), start);
        track
    }

    fn indices(frames: &[RecordedFrame]) -> Vec<i32> {
        frames.iter().map(|frame| frame.frame_index).collect()
    }

    #[test]
    fn test_frames_until_forward() {
        let mut track = track(0, &[0.0, 0.1, 0.2, 0.3, 0.4]);
        let mut out = Vec::new();
        track.frames_until(0.15, &mut out);
        assert_eq!(indices(&out), vec![0, 1]);

        out.clear();
        track.frames_until(0.35, &mut out);
        assert_eq!(indices(&out), vec![2, 3]);

        // Nothing new at the same playhead.
        out.clear();
        track.frames_until(0.35, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_frames_until_reverse_stops_at_forward_frame() {
        let mut track = track(0, &[0.0, 0.1, 0.2, 0.3, 0.4]);
        let mut out = Vec::new();
        track.frames_until_reverse(0.25, &mut out);
        // Starts past the end, walks back to the frame a forward lookup gives (index 2).
        assert_eq!(indices(&out), vec![4, 3]);
        assert_eq!(track.playhead_to_frame_index(0.25), 2);
    }

    #[test]
    fn test_absolute_addressing_with_offset() {
        let mut track = track(10, &[1.0, 1.1, 1.2]);
        assert_eq!(track.try_get_frame(11).unwrap().frame_index, 11);
        // Clamped into the resident window.
        assert_eq!(track.try_get_frame(50).unwrap().frame_index, 12);
        assert_eq!(track.try_get_frame(0).unwrap().frame_index, 10);
        assert_eq!(track.frame_index_to_playhead(12), Some(1.2));
        assert_eq!(track.playhead_to_frame_index(1.15), 11);
    }

    #[test]
    fn test_empty_track() {
        let mut track = track(0, &[]);
        let mut out = Vec::new();
        track.frames_until(10.0, &mut out);
        track.frames_until_reverse(0.0, &mut out);
        assert!(out.is_empty());
        assert!(track.try_get_frame(0).is_none());
        assert_eq!(track.frame_index_to_playhead(0), None);
    }

    #[test]
    fn test_restart() {
        let mut track = track(5, &[0.0, 0.1, 0.2]);
        track.restart(Some(6));
        assert_eq!(track.last_read_absolute_index(), 6);
        track.restart(Some(20));
        assert_eq!(track.last_read_absolute_index(), -1);
        track.restart(None);
        assert_eq!(track.last_read_absolute_index(), -1);
    }

    #[test]
    fn test_track_set_uses_frame_track_for_time() {
        let mut set = PlaybackTrackSet::new();
        let key = SubjectKey::new(Uuid::nil(), "Subject");

        let static_track = set.track_entry(key.static_track_key());
        static_track.set_role(Some(Role::new("Animation")));
        static_track.set_window(vec![Arc::new(Payload::new("Static", vec![1u8]))], vec![0.0], 0);

        set.track_entry(key.clone()).set_window(
            vec![
                Arc::new(Payload::new("Basic", vec![1u8])),
                Arc::new(Payload::new("Basic", vec![2u8])),
            ],
            vec![0.5, 1.0],
            0,
        );

        assert_eq!(set.len(), 2);
        assert_eq!(set.frame_index_to_playhead(1), Some(1.0));
        assert_eq!(set.playhead_to_frame_index(0.7), Some(0));
        assert_eq!(set.fetch_next_frames_at_index(1).len(), 2);
        assert!(set.fetch_next_frames_at_index(-1).is_empty());
    }

    #[test]
    fn test_playhead_from_seconds() {
        let time = PlayheadTime::from_seconds(1.0, FrameRate::new(30, 1));
        assert_eq!(time.frame, 30);
    }
}
