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

//! A recording asset: its manifest, its recorded data and the bulk data the
//! data is streamed from.
//!
//! A freshly recorded asset is fully resident. Once unloaded, frames are
//! streamed back from bulk data by a background [`StreamingWindowLoader`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::{RecordingBuffer, RecordingDataSet, StaticRecordingBuffer};
use crate::bulk_data::BulkDataStore;
use crate::codec::{self, RECORDING_FORMAT_VERSION, RECORD_OVERHEAD};
use crate::config::StreamingConfig;
use crate::error::Result;
use crate::payload::TypeRegistry;
use crate::playback::PlaybackTrackSet;
use crate::streaming::{StreamShared, StreamTask, StreamingRequest, StreamingWindowLoader};
use crate::types::{FrameRange, FrameRate, Role, SubjectKey};

/// Static subject entry of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSubject {
    pub key: SubjectKey,
    pub role: Option<Role>,
}

/// Package metadata stored next to the bulk data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingManifest {
    pub name: String,
    pub id: Uuid,
    pub length_seconds: f64,
    pub frame_rate: Option<FrameRate>,
    pub created_at: DateTime<Utc>,
    pub static_subjects: Vec<StaticSubject>,
    pub frame_subjects: Vec<SubjectKey>,
    pub max_frames: i32,
    pub format_version: i32,
}

impl RecordingManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            length_seconds: 0.0,
            frame_rate: None,
            created_at: Utc::now(),
            static_subjects: Vec::new(),
            frame_subjects: Vec::new(),
            max_frames: 0,
            format_version: RECORDING_FORMAT_VERSION,
        }
    }

    fn describe(&mut self, data: &RecordingDataSet) {
        self.static_subjects = data
            .static_data
            .iter()
            .map(|(key, static_data)| StaticSubject {
                key: key.clone(),
                role: static_data.role.clone(),
            })
            .collect();
        self.frame_subjects = data.frame_data.keys().cloned().collect();
        self.max_frames = data.max_frames();
    }

    /// Data set with every subject key and role but no frames.
    pub fn empty_data_set(&self) -> RecordingDataSet {
        let mut data = RecordingDataSet::new();
        for subject in &self.static_subjects {
            data.static_data.insert(
                subject.key.clone(),
                StaticRecordingBuffer::new(subject.role.clone()),
            );
        }
        for key in &self.frame_subjects {
            data.frame_data.insert(key.clone(), RecordingBuffer::new());
        }
        data
    }
}

pub struct Recording {
    manifest: RwLock<RecordingManifest>,
    shared: Arc<StreamShared>,
    bulk: Arc<Mutex<BulkDataStore>>,
    registry: Arc<TypeRegistry>,
    config: StreamingConfig,
    stream_task: Mutex<Option<StreamTask>>,
    is_fully_loaded: AtomicBool,
    is_saving: AtomicBool,
}

impl Recording {
    /// Empty in-memory recording, ready for [`Recording::initialize_new_recording_data`].
    pub fn new(name: impl Into<String>, registry: Arc<TypeRegistry>, config: StreamingConfig) -> Self {
        Self {
            manifest: RwLock::new(RecordingManifest::new(name)),
            shared: Arc::new(StreamShared::default()),
            bulk: Arc::new(Mutex::new(BulkDataStore::in_memory())),
            registry,
            config,
            stream_task: Mutex::new(None),
            is_fully_loaded: AtomicBool::new(false),
            is_saving: AtomicBool::new(false),
        }
    }

    /// Recording backed by saved bulk data. Nothing is resident until streamed.
    pub fn open(
        manifest: RecordingManifest,
        bulk: BulkDataStore,
        registry: Arc<TypeRegistry>,
        config: StreamingConfig,
    ) -> Self {
        let data = manifest.empty_data_set();
        Self {
            manifest: RwLock::new(manifest),
            shared: Arc::new(StreamShared::new(data)),
            bulk: Arc::new(Mutex::new(bulk)),
            registry,
            config,
            stream_task: Mutex::new(None),
            is_fully_loaded: AtomicBool::new(false),
            is_saving: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.manifest.read().id
    }

    pub fn name(&self) -> String {
        self.manifest.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.manifest.write().name = name.into();
    }

    pub fn manifest(&self) -> RecordingManifest {
        self.manifest.read().clone()
    }

    pub fn length_seconds(&self) -> f64 {
        self.manifest.read().length_seconds
    }

    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.manifest.read().frame_rate
    }

    /// Take ownership of freshly recorded data. The recording becomes fully resident.
    pub fn initialize_new_recording_data(
        &self,
        data: RecordingDataSet,
        length_seconds: f64,
        frame_rate: FrameRate,
    ) {
        let max_frames = data.max_frames();
        let disk_size = data
            .frame_data
            .values()
            .filter_map(|buffer| buffer.frames().front())
            .map(|frame| RECORD_OVERHEAD + frame.len())
            .max()
            .unwrap_or(0);

        {
            let mut manifest = self.manifest.write();
            manifest.length_seconds = length_seconds;
            manifest.frame_rate = Some(frame_rate);
            manifest.describe(&data);
        }

        *self.shared.data() = data;
        self.shared.set_max_frames(max_frames);
        self.shared.set_max_frame_disk_size(disk_size);
        self.is_fully_loaded.store(true, Ordering::Release);
    }

    /// Encode the resident data into this recording's bulk data and return the bytes.
    pub fn save_recording_data(&self) -> Result<Bytes> {
        // A recorder save marks the recording for the whole package save; leave that mark alone.
        let already_saving = self.is_saving.swap(true, Ordering::AcqRel);
        let result = self.encode_into_bulk();
        if !already_saving {
            self.is_saving.store(false, Ordering::Release);
        }
        result
    }

    fn encode_into_bulk(&self) -> Result<Bytes> {
        let bytes = {
            let data = self.shared.data();
            codec::encode_recording(&data)?
        };
        self.manifest.write().format_version = RECORDING_FORMAT_VERSION;
        let bytes = Bytes::from(bytes);
        *self.bulk.lock() = BulkDataStore::from_bytes(bytes.to_vec());
        debug!("Encoded {} bytes of recording data for {}", bytes.len(), self.name());
        Ok(bytes)
    }

    pub(crate) fn set_saving(&self, saving: bool) {
        self.is_saving.store(saving, Ordering::Release);
    }

    pub fn is_saving(&self) -> bool {
        self.is_saving.load(Ordering::Acquire)
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.is_fully_loaded.load(Ordering::Acquire)
    }

    /// True while a streaming thread exists for this recording.
    pub fn is_streaming(&self) -> bool {
        self.stream_task.lock().is_some()
    }

    /// Point the bulk data at a saved file. Used once a save has completed.
    pub fn rebind_bulk_data(&self, path: impl Into<PathBuf>) {
        self.bulk.lock().rebind_to_file(path);
    }

    /// Request frames around `initial_frame`, `frames_to_buffer` on each side.
    /// Starts the streaming thread on first use.
    pub fn load_recording_data(&self, initial_frame: i32, frames_to_buffer: i32) -> Result<()> {
        if self.is_fully_loaded() {
            return Ok(());
        }

        let frames_to_buffer = frames_to_buffer.max(0);
        let earliest = initial_frame.saturating_sub(frames_to_buffer).max(0);
        // Both directions plus the initial frame.
        let total = frames_to_buffer.saturating_mul(2).saturating_add(1);

        let mut task = self.stream_task.lock();
        if task.is_none() {
            self.shared.control.begin();
            self.shared.clear_buffered();
        }

        self.shared
            .control
            .set_request(StreamingRequest::new(earliest, initial_frame, total));

        if task.is_none() {
            let loader = StreamingWindowLoader::new(
                Arc::clone(&self.shared),
                Arc::clone(&self.bulk),
                Arc::clone(&self.registry),
                self.config.clone(),
            );
            *task = Some(StreamTask::spawn(loader, &self.name())?);
            info!("Started streaming {}", self.name());
        }
        Ok(())
    }

    /// Stop streaming and release every resident frame.
    ///
    /// Ignored while the recording is being saved. Returns
    /// `ShutdownTimedOut` when the streaming thread does not exit in time;
    /// resources are released regardless.
    pub fn unload_recording_data(&self) -> Result<()> {
        if self.is_saving() {
            warn!("Attempted to unload {} while it was still being saved", self.name());
            return Ok(());
        }

        self.shared.control.cancel();
        self.is_fully_loaded.store(false, Ordering::Release);

        let task = self.stream_task.lock().take();
        let joined = match task {
            Some(task) => task.join(self.config.shutdown_timeout()),
            None => Ok(()),
        };

        self.shared.control.reset();
        self.shared.clear_buffered();
        self.shared.set_max_frames(0);
        self.shared.set_max_frame_disk_size(0);
        self.bulk.lock().unload();
        self.shared.data().clear_frames();

        debug!("Unloaded recording data for {}", self.name());
        joined
    }

    fn stream_done(&self) -> bool {
        self.stream_task
            .lock()
            .as_ref()
            .map_or(true, |task| task.is_done())
    }

    /// Block until frames `[min_frame, max_frame]` are buffered, the request
    /// can never cover them, or streaming stops.
    pub fn wait_for_buffered_frames(&self, min_frame: i32, max_frame: i32) {
        if !self.is_streaming() {
            return;
        }

        let poll = self.config.wait_poll_interval();
        // The frame count is unknown until the initial load.
        while !self.shared.control.performed_initial_load() {
            if self.stream_done() {
                return;
            }
            thread::sleep(poll);
        }

        let max_possible = self.shared.max_frames() - 1;
        if max_possible < 0 {
            return;
        }
        let min_frame = min_frame.clamp(0, max_possible);
        let max_frame = max_frame.clamp(0, max_possible);
        let wanted = FrameRange::new(min_frame, max_frame);
        let wanted_len = wanted.len() as i32;

        loop {
            if wanted_len > self.shared.control.request().total_frames
                || self.shared.buffered_frames().contains_range(&wanted)
                || self.stream_done()
            {
                break;
            }
            thread::sleep(poll);
        }
    }

    pub fn buffered_frames(&self) -> FrameRange {
        if self.is_fully_loaded() {
            let max_frames = self.shared.max_frames();
            if max_frames <= 0 {
                return FrameRange::EMPTY;
            }
            return FrameRange::new(0, max_frames - 1);
        }
        self.shared.buffered_frames()
    }

    /// Snapshot the resident data into playback tracks, reusing existing tracks.
    pub fn copy_recording_data(&self, tracks: &mut PlaybackTrackSet) {
        let data = self.shared.data();

        for (key, static_data) in &data.static_data {
            let track = tracks.track_entry(key.static_track_key());
            track.set_window(
                static_data.buffer.frames().iter().cloned().collect(),
                static_data.buffer.timestamps().iter().copied().collect(),
                static_data.buffer.window_start(),
            );
            track.set_role(static_data.role.clone());
        }

        for (key, buffer) in &data.frame_data {
            let track = tracks.track_entry(key.clone());
            track.set_window(
                buffer.frames().iter().cloned().collect(),
                buffer.timestamps().iter().copied().collect(),
                buffer.window_start(),
            );
        }
    }

    pub fn max_frames(&self) -> i32 {
        self.shared.max_frames()
    }

    /// Largest on-disk record size over all subjects.
    pub fn frame_disk_size(&self) -> usize {
        self.shared.max_frame_disk_size()
    }

    /// Pause streaming and wait for the thread to confirm.
    pub fn pause_stream(&self) -> bool {
        let running = self
            .stream_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_done());
        if !running {
            return false;
        }
        self.shared.control.pause(self.config.pause_timeout())
    }

    pub fn unpause_stream(&self) {
        self.shared.control.unpause();
    }

    /// Host hook: payload type metadata may be invalidated, stop touching it.
    pub fn on_pre_garbage_collect(&self) {
        self.pause_stream();
    }

    pub fn on_post_garbage_collect(&self) {
        self.unpause_stream();
    }

    /// Subjects known to this recording and the frames resident for each.
    pub fn resident_frames(&self) -> Vec<(SubjectKey, FrameRange)> {
        self.shared
            .data()
            .frame_data
            .iter()
            .map(|(key, buffer)| (key.clone(), buffer.window_range()))
            .collect()
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        self.shared.control.cancel();
        if let Some(task) = self.stream_task.get_mut().take() {
            // Errors are logged by the join.
            let _ = task.join(self.config.shutdown_timeout());
        }
    }
}
