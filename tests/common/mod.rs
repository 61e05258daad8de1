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

// Shared fixtures for the integration tests

#![allow(dead_code)]

use livelink_recorder::config::StreamingConfig;
use livelink_recorder::{
    FrameRate, Payload, PlaybackTrackSet, Recording, RecordingBuffer, RecordingDataSet,
    StaticRecordingBuffer, Role, SubjectKey, TypeRegistry,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const FRAME_TYPE: &str = "LiveLinkAnimationFrameData";
pub const STATIC_TYPE: &str = "LiveLinkSkeletonStaticData";
pub const FRAME_SIZE: usize = 8;
pub const STATIC_SIZE: usize = 4;
pub const FPS: f64 = 30.0;

pub fn subject(name: &str) -> SubjectKey {
    SubjectKey::new(Uuid::from_u128(0xC0FFEE), name)
}

/// Frame payload tagging the subject and absolute frame index.
pub fn frame_payload(subject_tag: u8, frame_index: i32) -> Payload {
    let mut data = vec![subject_tag, 0, 0, 0];
    data.extend_from_slice(&frame_index.to_le_bytes());
    Payload::new(FRAME_TYPE, data)
}

/// Frame index stored by [`frame_payload`].
pub fn payload_frame_index(payload: &Payload) -> i32 {
    let data = payload.data();
    i32::from_le_bytes([data[4], data[5], data[6], data[7]])
}

pub fn payload_subject_tag(payload: &Payload) -> u8 {
    payload.data()[0]
}

pub fn timestamp(frame_index: i32) -> f64 {
    frame_index as f64 / FPS
}

pub fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry
        .register(FRAME_TYPE, FRAME_SIZE)
        .register(STATIC_TYPE, STATIC_SIZE);
    Arc::new(registry)
}

/// One static sample plus `frames` frames for each `(name, frames)`.
pub fn data_set(subjects: &[(&str, i32)]) -> RecordingDataSet {
    let mut data = RecordingDataSet::new();
    for (tag, (name, frames)) in subjects.iter().enumerate() {
        let tag = tag as u8 + 1;
        data.static_data.insert(
            subject(name),
            StaticRecordingBuffer::with_sample(
                Some(Role::new("Animation")),
                Payload::new(STATIC_TYPE, vec![tag; STATIC_SIZE]),
            ),
        );
        let mut buffer = RecordingBuffer::new();
        for index in 0..*frames {
            buffer.append(Arc::new(frame_payload(tag, index)), timestamp(index));
        }
        data.frame_data.insert(subject(name), buffer);
    }
    data
}

pub fn streaming_config(debug_sleep_time_ms: u64) -> StreamingConfig {
    StreamingConfig {
        debug_sleep_time_ms,
        ..StreamingConfig::default()
    }
}

/// Recording whose data was encoded into its bulk data and then released,
/// so everything has to be streamed back.
pub fn streamed_recording(data: RecordingDataSet, config: StreamingConfig) -> Recording {
    let max_frames = data.max_frames();
    let recording = Recording::new("StreamTest", registry(), config);
    recording.initialize_new_recording_data(data, timestamp(max_frames), FrameRate::default());
    recording.save_recording_data().unwrap();
    recording.unload_recording_data().unwrap();
    recording
}

/// Poll `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Check every resident frame of every frame track is the frame it claims to be.
pub fn assert_tracks_consistent(tracks: &PlaybackTrackSet) {
    for (key, track) in tracks.iter() {
        if track.role().is_some() {
            continue;
        }
        let mut track = track.clone();
        let start = track.start_index_offset();
        let mut previous = f64::NEG_INFINITY;
        for index in start..start + track.max_frames() as i32 {
            let frame = track.try_get_frame(index).unwrap();
            assert_eq!(frame.frame_index, index, "{}", key);
            assert_eq!(payload_frame_index(&frame.data), index, "{}", key);
            let time = track.frame_index_to_playhead(index).unwrap();
            assert!(time > previous, "timestamps of {} not increasing", key);
            assert_eq!(time, timestamp(index));
            previous = time;
        }
    }
}
