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

// Recording player integration tests over a streamed recording

mod common;

use common::*;
use livelink_recorder::config::PlaybackConfig;
use livelink_recorder::{FrameRange, PlayheadTime, RecordedFrame, RecordingPlayer};
use std::sync::Arc;

/// Frame-track indices per subject, in emission order.
fn frame_indices(frames: &[RecordedFrame], name: &str) -> Vec<i32> {
    frames
        .iter()
        .filter(|frame| frame.role.is_none() && frame.subject_key == subject(name))
        .map(|frame| frame.frame_index)
        .collect()
}

fn player_for(frames: i32) -> RecordingPlayer {
    let recording = streamed_recording(
        data_set(&[("Performer", frames), ("Prop", frames)]),
        streaming_config(0),
    );
    let mut player = RecordingPlayer::new(PlaybackConfig::default());
    player.prepare_playback(Arc::new(recording)).unwrap();
    player
}

#[test]
fn test_prepare_playback_buffers_first_frames() {
    let player = player_for(90);

    assert!(player.playing_recording_id().is_some());
    let performer = player.tracks().get(&subject("Performer")).unwrap();
    assert_eq!(performer.start_index_offset(), 0);
    assert!(performer.max_frames() >= 3);
    // Frame and static tracks for both subjects
    assert_eq!(player.tracks().len(), 4);
    assert_tracks_consistent(player.tracks());
    assert_eq!(player.initial_frame_rate().as_fps(), 30.0);
    // 20 byte records against a 100 MB budget
    assert_eq!(player.frames_to_buffer(), 2_621_440);

    // The larger window replaces the first one in the background.
    assert!(wait_until(std::time::Duration::from_secs(10), || player
        .buffered_frames()
        .contains_range(&FrameRange::new(0, 89))));
}

#[test]
fn test_forward_and_reverse_fetch() {
    let mut player = player_for(90);

    let frames = player
        .fetch_next_frames_at_timestamp(PlayheadTime::new(2, timestamp(2)))
        .unwrap();
    assert_eq!(frame_indices(&frames, "Performer"), vec![0, 1, 2]);
    assert_eq!(frame_indices(&frames, "Prop"), vec![0, 1, 2]);

    let frames = player
        .fetch_next_frames_at_timestamp(PlayheadTime::new(5, timestamp(5)))
        .unwrap();
    assert_eq!(frame_indices(&frames, "Performer"), vec![3, 4, 5]);

    // Nothing new at the same playhead
    let frames = player
        .fetch_next_frames_at_timestamp(PlayheadTime::new(5, timestamp(5)))
        .unwrap();
    assert!(frame_indices(&frames, "Performer").is_empty());

    let frames = player
        .fetch_previous_frames_at_timestamp(PlayheadTime::new(3, timestamp(3)))
        .unwrap();
    assert_eq!(frame_indices(&frames, "Performer"), vec![4, 3]);
    assert_eq!(frame_indices(&frames, "Prop"), vec![4, 3]);
}

#[test]
fn test_fetch_at_index_and_time_conversion() {
    let mut player = player_for(90);

    let frames = player.fetch_next_frames_at_index(40).unwrap();
    assert_eq!(frame_indices(&frames, "Performer"), vec![40]);
    let performer = frames
        .iter()
        .find(|frame| frame.role.is_none() && frame.subject_key == subject("Performer"))
        .unwrap();
    assert_eq!(payload_frame_index(&performer.data), 40);
    assert_eq!(payload_subject_tag(&performer.data), 1);

    let tracks = player.tracks();
    assert_eq!(tracks.frame_index_to_playhead(40), Some(timestamp(40)));
    assert_eq!(tracks.playhead_to_frame_index(timestamp(40)), Some(40));
}

#[test]
fn test_restart_rewinds_cursor() {
    let mut player = player_for(30);

    player
        .fetch_next_frames_at_timestamp(PlayheadTime::new(3, timestamp(3)))
        .unwrap();
    player.restart_playback(None);

    let frames = player
        .fetch_next_frames_at_timestamp(PlayheadTime::new(1, timestamp(1)))
        .unwrap();
    assert_eq!(frame_indices(&frames, "Performer"), vec![0, 1]);
}

#[test]
fn test_shutdown_releases_recording() {
    let mut player = player_for(30);
    let recording = Arc::clone(player.recording().unwrap());

    player.shutdown_playback().unwrap();
    assert!(player.playing_recording_id().is_none());
    assert!(player.tracks().is_empty());
    assert_eq!(player.buffered_frames(), FrameRange::EMPTY);
    assert!(!recording.is_streaming());
    assert_eq!(recording.buffered_frames(), FrameRange::EMPTY);

    // Without a recording, fetches are empty.
    assert!(player.fetch_next_frames_at_index(0).unwrap().is_empty());
    assert_eq!(player.initial_frame_rate().as_fps(), 30.0);
}
