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

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use super::{CancelToken, StreamShared, StreamingRequest};
use crate::buffer::{RecordingBuffer, StaticRecordingBuffer};
use crate::bulk_data::BulkDataStore;
use crate::codec::{self, BlockHeader};
use crate::config::StreamingConfig;
use crate::error::Result;
use crate::payload::{PayloadDescriptor, SharedPayload, TypeRegistry};
use crate::types::{FrameRange, SubjectKey};

/// Where one subject's records live in the bulk data.
#[derive(Debug, Clone)]
struct FrameFileIndexEntry {
    header: BlockHeader,
    descriptor: PayloadDescriptor,
}

/// Sets the initial-load flag however a pass exits, so blocking waiters are released.
struct InitialLoadGuard<'a> {
    shared: &'a StreamShared,
    cancel: &'a CancelToken,
}

impl Drop for InitialLoadGuard<'_> {
    fn drop(&mut self) {
        // A thread left over from an earlier stream must not release the waiters of the current one.
        if self.shared.control.is_current(self.cancel) {
            self.shared.control.mark_initial_load();
        }
    }
}

/// Frames read since the window was last published.
///
/// Frames are published in batches: the first batch of a pass replaces the
/// subject's window, later batches grow it at both ends.
#[derive(Default)]
struct WindowBuilder {
    // Descending frame order, as loaded.
    left: Vec<(SharedPayload, f64)>,
    right: Vec<(SharedPayload, f64)>,
    loaded: FrameRange,
    published: bool,
}

impl WindowBuilder {
    fn push(&mut self, frame_index: i32, payload: SharedPayload, timestamp: f64, right: bool) {
        if right {
            self.right.push((payload, timestamp));
        } else {
            self.left.push((payload, timestamp));
        }
        self.loaded = if self.loaded.is_empty() {
            FrameRange::new(frame_index, frame_index)
        } else {
            FrameRange::new(
                self.loaded.min.min(frame_index),
                self.loaded.max.max(frame_index),
            )
        };
    }

    /// Move the pending frames into `buffer`. `anchor` is where the right
    /// side of the window starts.
    fn flush_into(&mut self, buffer: &mut RecordingBuffer, anchor: i32) {
        if !self.published {
            buffer.replace_window(Vec::<f64>::new(), Vec::<SharedPayload>::new(), anchor);
            self.published = true;
        }
        for (payload, timestamp) in self.left.drain(..) {
            buffer.prepend(payload, timestamp);
        }
        for (payload, timestamp) in self.right.drain(..) {
            buffer.append(payload, timestamp);
        }
    }
}

/// Loads windows of frames from bulk data into the shared data set.
///
/// Runs on its own thread (see [`super::StreamTask`]). The loop is level
/// triggered: it re-reads the shared request on every poll and starts a pass
/// whenever the request differs from the last one it processed.
pub struct StreamingWindowLoader {
    shared: Arc<StreamShared>,
    bulk: Arc<Mutex<BulkDataStore>>,
    registry: Arc<TypeRegistry>,
    config: StreamingConfig,
    cancel: CancelToken,
    entries: Vec<FrameFileIndexEntry>,
    initial_load_done: bool,
}

impl StreamingWindowLoader {
    /// Loader for the stream `shared` is currently running.
    pub fn new(
        shared: Arc<StreamShared>,
        bulk: Arc<Mutex<BulkDataStore>>,
        registry: Arc<TypeRegistry>,
        config: StreamingConfig,
    ) -> Self {
        let cancel = shared.control.token();
        Self {
            shared,
            bulk,
            registry,
            config,
            cancel,
            entries: Vec::new(),
            initial_load_done: false,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn wait_if_paused(&self) {
        if !self.is_cancelled() {
            self.shared.control.wait_if_paused();
        }
    }

    /// Poll the request until cancelled.
    pub fn run(mut self) {
        info!("Streaming thread started");

        let mut last_request: Option<StreamingRequest> = None;
        while !self.is_cancelled() {
            self.wait_if_paused();
            if self.is_cancelled() {
                break;
            }

            let control = &self.shared.control;
            if last_request == Some(control.request()) {
                thread::sleep(self.config.poll_interval());
                continue;
            }

            // Clear before reading so a change issued during the pass interrupts it.
            control.clear_frame_change();
            let request = control.request();
            last_request = Some(request);
            self.load_window(request);
        }

        if self.shared.control.is_current(&self.cancel) {
            self.shared.control.signal_stopped();
        }
        info!("Streaming thread stopped");
    }

    /// One streaming pass over every subject.
    pub fn load_window(&mut self, request: StreamingRequest) {
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let _guard = InitialLoadGuard {
            shared: &shared,
            cancel: &cancel,
        };

        if !self.initial_load_done {
            self.initial_load_done = true;
            if let Err(e) = self.initial_load() {
                error!("Initial load of recording data failed: {}", e);
                return;
            }
        }

        let max_frames = shared.max_frames();
        if max_frames <= 0 {
            return;
        }
        let max_possible = max_frames - 1;
        let start = request.earliest_frame.clamp(0, max_possible);
        let initial = request.initial_frame.clamp(0, max_possible);
        let end = start
            .saturating_add(request.total_frames.max(1) - 1)
            .min(max_possible);
        let target = FrameRange::new(start, end);

        if shared.buffered_frames().contains_range(&target) {
            debug!("Frames {} already buffered", target);
            return;
        }

        debug!("Streaming frames {} around frame {}", target, initial);
        for entry in &self.entries {
            if self.is_cancelled() {
                return;
            }
            if shared.control.frame_changed() {
                debug!("Streaming request changed, ending pass");
                return;
            }
            if let Err(e) = self.load_entry(entry, target, initial) {
                error!(
                    "Streaming pass for {} aborted: {}",
                    entry.header.subject_key, e
                );
            }
        }
    }

    /// Read the layout, static frames and per-subject record positions.
    fn initial_load(&mut self) -> Result<()> {
        let mut store = self.bulk.lock();
        let layout = codec::read_layout(&mut store, &self.registry)?;

        for header in &layout.static_blocks {
            let Some(descriptor) = &header.descriptor else {
                continue;
            };
            match codec::read_frame(&mut store, header, descriptor, 0) {
                Ok((payload, timestamp)) => {
                    let mut data = self.shared.data();
                    if self.is_cancelled() {
                        return Ok(());
                    }
                    let static_data = data
                        .static_data
                        .entry(header.subject_key.clone())
                        .or_insert_with(|| StaticRecordingBuffer::new(None));
                    static_data
                        .buffer
                        .replace_window(vec![timestamp], vec![Arc::new(payload)], 0);
                }
                Err(e) => error!(
                    "Failed to load static data for {}: {}",
                    header.subject_key, e
                ),
            }
        }

        if self.is_cancelled() {
            return Ok(());
        }
        self.shared.set_max_frames(layout.max_frames());
        self.shared
            .set_max_frame_disk_size(layout.max_frame_disk_size());

        for header in layout.frame_blocks.clone() {
            let Some(descriptor) = header.descriptor.clone() else {
                warn!(
                    "Subject {} has an unknown payload type and will not stream",
                    header.subject_key
                );
                continue;
            };
            self.shared
                .set_buffered(&header.subject_key, FrameRange::EMPTY);
            self.entries.push(FrameFileIndexEntry { header, descriptor });
        }

        info!(
            "Loaded recording layout: {} static, {} streamed subjects, {} frames",
            layout.static_blocks.len(),
            self.entries.len(),
            layout.max_frames()
        );
        Ok(())
    }

    /// Publish the pending frames and the buffered range under the data lock.
    /// Returns false once this stream has been cancelled.
    fn publish(
        &self,
        key: &SubjectKey,
        window: &mut WindowBuilder,
        anchor: i32,
        buffered: FrameRange,
    ) -> bool {
        let mut data = self.shared.data();
        if self.is_cancelled() {
            return false;
        }
        window.flush_into(data.frame_data.entry(key.clone()).or_default(), anchor);
        self.shared.set_buffered(key, buffered);
        true
    }

    /// Put back the window a failed pass started replacing.
    fn restore(&self, key: &SubjectKey, existing: RecordingBuffer, buffered: FrameRange) {
        let mut data = self.shared.data();
        if self.is_cancelled() {
            return;
        }
        data.frame_data.insert(key.clone(), existing);
        self.shared.set_buffered(key, buffered);
    }

    /// Build a new window for one subject, alternating right and left of `initial`.
    fn load_entry(
        &self,
        entry: &FrameFileIndexEntry,
        target: FrameRange,
        initial: i32,
    ) -> Result<()> {
        let control = &self.shared.control;
        let header = &entry.header;
        let key = &header.subject_key;
        let start = target.min;
        let frame_end = header.frame_count.min(target.max + 1);

        // Snapshot so resident frames can be reused without holding the lock during I/O.
        let (existing, previous_buffered) = {
            let data = self.shared.data();
            let existing = data.frame_data.get(key).cloned().unwrap_or_default();
            let buffered = self
                .shared
                .subject_buffered_frames(key)
                .unwrap_or(FrameRange::EMPTY);
            (existing, buffered)
        };

        let mut window = WindowBuilder::default();
        let mut right = initial;
        let mut left = (initial - 1).min(frame_end - 1);
        let anchor = left + 1;
        let mut load_right = true;
        let mut iteration = 0usize;
        let mut interrupted = false;

        while right < frame_end || left >= start {
            let this_iteration = iteration;
            iteration += 1;

            if self.is_cancelled() {
                debug!("Streaming of {} cancelled", key);
                return Ok(());
            }
            self.wait_if_paused();
            if self.is_cancelled() {
                return Ok(());
            }

            let frame_index = if load_right {
                if right >= frame_end {
                    load_right = false;
                    continue;
                }
                right += 1;
                right - 1
            } else {
                if left < start {
                    load_right = true;
                    continue;
                }
                left -= 1;
                left + 1
            };

            let (payload, timestamp, resident) = match existing.try_get_frame(frame_index) {
                Some((payload, timestamp)) => (payload, timestamp, true),
                None => {
                    let read = {
                        let mut store = self.bulk.lock();
                        codec::read_frame(&mut store, header, &entry.descriptor, frame_index)
                    };
                    match read {
                        Ok((payload, timestamp)) => (Arc::new(payload), timestamp, false),
                        Err(e) => {
                            if window.published {
                                self.restore(key, existing, previous_buffered);
                            }
                            return Err(e);
                        }
                    }
                }
            };

            window.push(frame_index, payload, timestamp, load_right);
            load_right = !load_right;
            if resident {
                continue;
            }

            if this_iteration % self.config.report_interval.max(1) == 0 {
                let loaded = window.loaded;
                if !self.publish(key, &mut window, anchor, loaded) {
                    return Ok(());
                }
            }

            let sleep = self.config.debug_sleep_time();
            if !sleep.is_zero() {
                thread::sleep(sleep);
            }

            if control.frame_changed() {
                interrupted = true;
                break;
            }
        }

        let loaded = window.loaded;
        let anchor = if loaded.is_empty() { start } else { anchor };
        // A completed pass covers the whole target; frames past the subject's end do not exist.
        let covered = if interrupted { loaded } else { target };
        if self.publish(key, &mut window, anchor, covered) {
            debug!(
                "Published window {} for {} (buffered {})",
                loaded, key, covered
            );
        }
        Ok(())
    }
}
