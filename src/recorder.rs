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

//! Live capture of subject data into a [`Recording`] and asynchronous package saves.

use anyhow::Context;
use chrono::Local;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::buffer::{RecordingDataSet, StaticRecordingBuffer};
use crate::config::RecorderConfig;
use crate::error::{RecordingError, Result};
use crate::payload::{Payload, TypeRegistry};
use crate::recording::Recording;
use crate::storage::{resolve_package_name, PackageStore, RecordingPackage, SavedPackage};
use crate::types::{Role, SubjectKey};

/// Host lookup of the subjects currently known to the live data source.
pub trait SubjectRegistry: Send + Sync {
    fn subjects(&self) -> Vec<SubjectKey>;

    /// Latest static data announced for `key`, with its role.
    fn static_data(&self, key: &SubjectKey) -> Option<(Option<Role>, Payload)>;
}

/// Time source for sample timestamps, in seconds. Only differences are used.
pub trait Clock: Send + Sync {
    fn now_seconds(&self) -> f64;
}

/// Monotonic clock counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Registry with no subjects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSubjects;

impl SubjectRegistry for NoSubjects {
    fn subjects(&self) -> Vec<SubjectKey> {
        Vec::new()
    }

    fn static_data(&self, _key: &SubjectKey) -> Option<(Option<Role>, Payload)> {
        None
    }
}

/// Outcome of one asynchronous save, delivered through
/// [`Recorder::process_save_completions`].
pub struct SaveCompletion {
    pub recording: Arc<Recording>,
    pub result: anyhow::Result<SavedPackage>,
}

impl SaveCompletion {
    pub fn recording_id(&self) -> Uuid {
        self.recording.id()
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

struct ActiveRecording {
    start_time: f64,
    data: RecordingDataSet,
}

pub struct Recorder {
    state: Mutex<Option<ActiveRecording>>,
    is_recording: AtomicBool,

    // Recordings with a save in flight, keyed by recording id
    saving: DashMap<Uuid, Arc<Recording>>,
    completions_tx: mpsc::UnboundedSender<SaveCompletion>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<SaveCompletion>>,
    // Package names are chosen and written one save at a time.
    save_lock: Arc<tokio::sync::Mutex<()>>,

    runtime: Handle,
    store: Arc<dyn PackageStore>,
    subjects: Arc<dyn SubjectRegistry>,
    clock: Arc<dyn Clock>,
    registry: Arc<TypeRegistry>,
    config: RecorderConfig,
}

impl Recorder {
    /// Saves run on `runtime`; the recorder itself may be driven from any thread.
    pub fn new(
        config: RecorderConfig,
        store: Arc<dyn PackageStore>,
        subjects: Arc<dyn SubjectRegistry>,
        registry: Arc<TypeRegistry>,
        runtime: Handle,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(None),
            is_recording: AtomicBool::new(false),
            saving: DashMap::new(),
            completions_tx,
            completions_rx: Mutex::new(completions_rx),
            save_lock: Arc::new(tokio::sync::Mutex::new(())),
            runtime,
            store,
            subjects,
            clock: Arc::new(SystemClock::new()),
            registry,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::Acquire)
    }

    /// Begin capturing. Static data already known for a subject becomes its frame 0.
    pub fn start_recording(&self) -> Result<()> {
        let mut state = self.state.lock();
        if self.is_recording.swap(true, Ordering::AcqRel) {
            error!("start_recording called while a recording is already active");
            return Err(RecordingError::AlreadyRecording);
        }

        let mut data = RecordingDataSet::new();
        for key in self.subjects.subjects() {
            if let Some((role, payload)) = self.subjects.static_data(&key) {
                data.static_data
                    .insert(key, StaticRecordingBuffer::with_sample(role, payload));
            }
        }

        info!(
            "Recording started with {} subjects carrying static data",
            data.static_data.len()
        );
        *state = Some(ActiveRecording {
            start_time: self.clock.now_seconds(),
            data,
        });
        Ok(())
    }

    /// Record a subject's static data. Kept once per subject; later samples are ignored.
    pub fn record_static(&self, key: &SubjectKey, role: Option<Role>, payload: Payload) {
        if !self.is_recording() {
            return;
        }
        let now = self.clock.now_seconds();
        let mut state = self.state.lock();
        let Some(active) = state.as_mut() else {
            return;
        };
        if active.data.static_data.contains_key(key) {
            debug!("Ignoring repeated static data for {}", key);
            return;
        }

        let mut static_data = StaticRecordingBuffer::new(role);
        static_data
            .buffer
            .append(Arc::new(payload), now - active.start_time);
        active.data.static_data.insert(key.clone(), static_data);
    }

    /// Record a frame sample. A sample that does not come after the subject's
    /// previous one is dropped.
    pub fn record_frame(&self, key: &SubjectKey, payload: Payload) {
        if !self.is_recording() {
            return;
        }
        let now = self.clock.now_seconds();
        let mut state = self.state.lock();
        let Some(active) = state.as_mut() else {
            return;
        };
        let timestamp = now - active.start_time;
        let buffer = active.data.frame_data.entry(key.clone()).or_default();
        if let Some(previous) = buffer.timestamps().back() {
            if timestamp <= *previous {
                warn!(
                    "Dropping frame of {} at {:.6}s, previous frame was at {:.6}s",
                    key, timestamp, previous
                );
                return;
            }
        }
        buffer.append(Arc::new(payload), timestamp);
    }

    /// Finish capturing and hand the data to a new recording, saved in the background.
    ///
    /// Returns `None` when no recording was active.
    pub fn stop_recording(&self) -> Option<Arc<Recording>> {
        let active = {
            let mut state = self.state.lock();
            if !self.is_recording.swap(false, Ordering::AcqRel) {
                return None;
            }
            state.take()?
        };

        let length_seconds = self.clock.now_seconds() - active.start_time;
        let recording = Arc::new(Recording::new(
            self.config.recorder.filename_template.clone(),
            Arc::clone(&self.registry),
            self.config.streaming.clone(),
        ));
        recording.initialize_new_recording_data(
            active.data,
            length_seconds,
            self.config.recorder.frame_rate,
        );
        recording.set_saving(true);
        self.saving.insert(recording.id(), Arc::clone(&recording));

        info!(
            "Recording stopped after {:.3}s with {} frames, saving {}",
            length_seconds,
            recording.max_frames(),
            recording.id()
        );

        let store = Arc::clone(&self.store);
        let template = self.config.recorder.filename_template.clone();
        let max_retries = self.config.storage.max_retries;
        let tx = self.completions_tx.clone();
        let task_recording = Arc::clone(&recording);
        let save_lock = Arc::clone(&self.save_lock);
        self.runtime.spawn(async move {
            let result = {
                let _guard = save_lock.lock().await;
                save_recording(&*store, &task_recording, &template, max_retries).await
            };
            match &result {
                Ok(saved) => info!("Recording {} saved as '{}'", task_recording.id(), saved.name),
                Err(e) => error!("Failed to save recording {}: {:#}", task_recording.id(), e),
            }
            task_recording.set_saving(false);
            if tx
                .send(SaveCompletion {
                    recording: task_recording,
                    result,
                })
                .is_err()
            {
                warn!("Recorder dropped before save completion could be delivered");
            }
        });

        Some(recording)
    }

    /// True while `id` has a save in flight that has not been processed yet.
    pub fn is_saving_recording(&self, id: &Uuid) -> bool {
        self.saving.contains_key(id)
    }

    pub fn pending_saves(&self) -> usize {
        self.saving.len()
    }

    /// Drain finished saves. Call from the thread that owns playback.
    ///
    /// Each saved recording is unloaded and pointed at its package bulk data,
    /// except `playing`, which keeps its resident data.
    pub fn process_save_completions(&self, playing: Option<Uuid>) -> Vec<SaveCompletion> {
        let mut completions = Vec::new();
        {
            let mut rx = self.completions_rx.lock();
            while let Ok(completion) = rx.try_recv() {
                completions.push(completion);
            }
        }

        for completion in &completions {
            let id = completion.recording_id();
            self.saving.remove(&id);

            let Ok(saved) = &completion.result else {
                continue;
            };
            if playing == Some(id) {
                debug!("Keeping {} resident, it is being played", saved.name);
                continue;
            }
            if let Err(e) = completion.recording.unload_recording_data() {
                error!("Failed to unload saved recording {}: {}", saved.name, e);
            }
            if let Some(path) = &saved.bulk_path {
                completion.recording.rebind_bulk_data(path);
            }
        }

        completions
    }
}

async fn save_recording(
    store: &dyn PackageStore,
    recording: &Arc<Recording>,
    template: &str,
    max_retries: u32,
) -> anyhow::Result<SavedPackage> {
    store.initialize().await.context("Failed to prepare package store")?;

    let base_name = resolve_package_name(template, &Local::now());
    let name = store.unique_package_name(&base_name).await?;
    recording.set_name(name);

    let encoder = Arc::clone(recording);
    let bulk_data = tokio::task::spawn_blocking(move || encoder.save_recording_data())
        .await
        .context("Encoding task failed")??;

    let package = RecordingPackage {
        manifest: recording.manifest(),
        bulk_data,
    };
    store.save_with_retry(&package, max_retries).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct StepClock(AtomicU64);

    impl Clock for StepClock {
        // Advances by half a second per reading.
        fn now_seconds(&self) -> f64 {
            self.0.fetch_add(1, Ordering::SeqCst) as f64 * 0.5
        }
    }

    fn recorder(store: Arc<dyn PackageStore>) -> Recorder {
        let mut config = RecorderConfig::default();
        config.storage.max_retries = 1;
        Recorder::new(
            config,
            store,
            Arc::new(NoSubjects),
            Arc::new(TypeRegistry::permissive()),
            Handle::current(),
        )
        .with_clock(Arc::new(StepClock(AtomicU64::new(0))))
    }

    async fn drain(recorder: &Recorder, playing: Option<Uuid>) -> Vec<SaveCompletion> {
        for _ in 0..500 {
            let completions = recorder.process_save_completions(playing);
            if !completions.is_empty() {
                return completions;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("save did not complete");
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let recorder = recorder(Arc::new(MemoryStore::new()));
        recorder.start_recording().unwrap();
        assert!(matches!(
            recorder.start_recording(),
            Err(RecordingError::AlreadyRecording)
        ));
        assert!(recorder.is_recording());
    }

    #[tokio::test]
    async fn test_record_outside_session_is_ignored() {
        let recorder = recorder(Arc::new(MemoryStore::new()));
        let key = SubjectKey::new(Uuid::nil(), "Idle");
        recorder.record_frame(&key, Payload::new("Basic", vec![1u8; 4]));
        assert!(recorder.stop_recording().is_none());
    }

    #[tokio::test]
    async fn test_stop_saves_package() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder(store.clone());
        let key = SubjectKey::new(Uuid::nil(), "Performer");

        recorder.start_recording().unwrap();
        recorder.record_static(&key, Some(Role::new("Animation")), Payload::new("Static", vec![0u8; 2]));
        recorder.record_static(&key, None, Payload::new("Static", vec![9u8; 2]));
        recorder.record_frame(&key, Payload::new("Basic", vec![1u8; 4]));
        recorder.record_frame(&key, Payload::new("Basic", vec![2u8; 4]));

        let recording = recorder.stop_recording().unwrap();
        assert!(recorder.is_saving_recording(&recording.id()));
        assert_eq!(recording.max_frames(), 2);

        let completions = drain(&recorder, None).await;
        assert_eq!(completions.len(), 1);
        assert!(completions[0].is_success());
        assert!(!recorder.is_saving_recording(&recording.id()));
        assert!(!recording.is_saving());
        assert_eq!(store.len(), 1);

        let manifest = recording.manifest();
        assert!(manifest.name.starts_with("LiveLinkRecording_"));
        assert_eq!(manifest.static_subjects.len(), 1);
        assert_eq!(manifest.static_subjects[0].role, Some(Role::new("Animation")));
        assert!(!recording.is_fully_loaded());
    }

    struct FrozenClock;

    impl Clock for FrozenClock {
        fn now_seconds(&self) -> f64 {
            12.0
        }
    }

    #[tokio::test]
    async fn test_frames_without_time_progress_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder(store.clone()).with_clock(Arc::new(FrozenClock));
        let key = SubjectKey::new(Uuid::nil(), "Performer");

        recorder.start_recording().unwrap();
        recorder.record_frame(&key, Payload::new("Basic", vec![1u8; 4]));
        recorder.record_frame(&key, Payload::new("Basic", vec![2u8; 4]));
        recorder.record_frame(&key, Payload::new("Basic", vec![3u8; 4]));
        let recording = recorder.stop_recording().unwrap();
        assert_eq!(recording.max_frames(), 1);

        // The remaining data is valid, so the save goes through.
        let completions = drain(&recorder, None).await;
        assert!(completions[0].is_success());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_system_clock_never_goes_back() {
        let clock = SystemClock::new();
        let mut previous = clock.now_seconds();
        for _ in 0..1000 {
            let now = clock.now_seconds();
            assert!(now >= previous);
            previous = now;
        }
    }

    #[tokio::test]
    async fn test_playing_recording_stays_resident() {
        let recorder = recorder(Arc::new(MemoryStore::new()));
        let key = SubjectKey::new(Uuid::nil(), "Performer");

        recorder.start_recording().unwrap();
        recorder.record_frame(&key, Payload::new("Basic", vec![1u8; 4]));
        let recording = recorder.stop_recording().unwrap();

        drain(&recorder, Some(recording.id())).await;
        assert!(recording.is_fully_loaded());
        assert_eq!(recording.buffered_frames().len(), 1);
    }
}
