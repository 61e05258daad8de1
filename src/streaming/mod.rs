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

// Background streaming of recorded frames
//
// Provides:
// - The shared streaming request and its control flags
// - The pause/unpause handshake used around host garbage collection
// - The window loader that runs on a dedicated thread
// - A join handle with a shutdown deadline

mod loader;
mod signal;

pub use loader::StreamingWindowLoader;
pub use signal::ManualResetEvent;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::buffer::RecordingDataSet;
use crate::error::{RecordingError, Result};
use crate::types::{FrameRange, SubjectKey};

/// Frames the consumer wants resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamingRequest {
    /// Leftmost frame that must stay loaded.
    pub earliest_frame: i32,
    /// Frame nearest the playhead; loading fans out from here.
    pub initial_frame: i32,
    /// Window width, already covering both directions plus the initial frame.
    pub total_frames: i32,
}

impl StreamingRequest {
    pub fn new(earliest_frame: i32, initial_frame: i32, total_frames: i32) -> Self {
        Self {
            earliest_frame,
            initial_frame,
            total_frames,
        }
    }
}

/// Cancellation flag owned by one streaming thread.
///
/// Each stream gets a fresh token, so a thread left running after a timed out
/// shutdown stays cancelled when the recording starts streaming again.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Cross-thread signals between a recording and its streaming thread.
#[derive(Debug, Default)]
pub struct StreamControl {
    request: Mutex<StreamingRequest>,
    frame_change: AtomicBool,
    cancel: Mutex<CancelToken>,
    pause: AtomicBool,
    performed_initial_load: AtomicBool,
    paused: ManualResetEvent,
    unpaused: ManualResetEvent,
}

impl StreamControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> StreamingRequest {
        *self.request.lock()
    }

    /// Publish a new target. Moving the initial frame interrupts the pass in flight.
    pub fn set_request(&self, request: StreamingRequest) {
        let mut current = self.request.lock();
        if current.initial_frame != request.initial_frame {
            self.frame_change.store(true, Ordering::Release);
        }
        *current = request;
    }

    /// Clear every flag before a new stream starts and hand out its cancel token.
    pub fn begin(&self) -> CancelToken {
        let token = CancelToken::default();
        *self.cancel.lock() = token.clone();
        self.pause.store(false, Ordering::Release);
        self.paused.reset();
        self.unpaused.reset();
        token
    }

    /// Token of the current stream.
    pub fn token(&self) -> CancelToken {
        self.cancel.lock().clone()
    }

    pub fn is_current(&self, token: &CancelToken) -> bool {
        self.cancel.lock().same_as(token)
    }

    /// Return to the idle state after a stream has been shut down.
    pub fn reset(&self) {
        *self.request.lock() = StreamingRequest::default();
        self.frame_change.store(false, Ordering::Release);
        self.performed_initial_load.store(false, Ordering::Release);
    }

    pub fn frame_changed(&self) -> bool {
        self.frame_change.load(Ordering::Acquire)
    }

    pub(crate) fn clear_frame_change(&self) {
        self.frame_change.store(false, Ordering::Release);
    }

    /// Ask the streaming thread to stop at its next safe point.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
        self.unpause();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    pub fn performed_initial_load(&self) -> bool {
        self.performed_initial_load.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initial_load(&self) {
        self.performed_initial_load.store(true, Ordering::Release);
    }

    /// Request a pause and block until the streaming thread confirms it or
    /// `timeout` elapses. Returns whether the pause was confirmed.
    pub fn pause(&self, timeout: Duration) -> bool {
        // A confirmation left over from an earlier pause must not count for this one.
        self.paused.reset();
        self.unpaused.reset();
        self.pause.store(true, Ordering::Release);
        let confirmed = self.paused.wait_for(timeout);
        if !confirmed {
            warn!("Streaming thread did not confirm pause within {:?}", timeout);
        }
        confirmed
    }

    pub fn unpause(&self) {
        self.pause.store(false, Ordering::Release);
        self.paused.reset();
        self.unpaused.set();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }

    /// Called by the streaming thread at safe points.
    pub(crate) fn wait_if_paused(&self) {
        if self.pause.load(Ordering::Acquire) {
            self.paused.set();
            self.unpaused.wait();
        }
    }

    /// Release a controller blocked in [`StreamControl::pause`] once the thread exits.
    pub(crate) fn signal_stopped(&self) {
        self.paused.set();
    }
}

/// State shared between a recording and its streaming thread.
#[derive(Debug, Default)]
pub struct StreamShared {
    pub control: StreamControl,
    data: Mutex<RecordingDataSet>,
    buffered: Mutex<BTreeMap<SubjectKey, FrameRange>>,
    max_frames: AtomicI32,
    max_frame_disk_size: AtomicUsize,
}

impl StreamShared {
    pub fn new(data: RecordingDataSet) -> Self {
        Self {
            data: Mutex::new(data),
            ..Default::default()
        }
    }

    /// Lock the recorded data. Also taken by the loader to publish a window.
    pub fn data(&self) -> MutexGuard<'_, RecordingDataSet> {
        self.data.lock()
    }

    /// Frames buffered for every streamed subject: the intersection of their ranges.
    pub fn buffered_frames(&self) -> FrameRange {
        let buffered = self.buffered.lock();
        let mut ranges = buffered.values();
        let Some(first) = ranges.next() else {
            return FrameRange::EMPTY;
        };
        ranges.fold(*first, |acc, range| acc.intersection(range))
    }

    pub fn subject_buffered_frames(&self, key: &SubjectKey) -> Option<FrameRange> {
        self.buffered.lock().get(key).copied()
    }

    pub(crate) fn set_buffered(&self, key: &SubjectKey, range: FrameRange) {
        self.buffered.lock().insert(key.clone(), range);
    }

    pub(crate) fn clear_buffered(&self) {
        self.buffered.lock().clear();
    }

    pub fn max_frames(&self) -> i32 {
        self.max_frames.load(Ordering::Acquire)
    }

    pub(crate) fn set_max_frames(&self, max_frames: i32) {
        self.max_frames.store(max_frames, Ordering::Release);
    }

    pub fn max_frame_disk_size(&self) -> usize {
        self.max_frame_disk_size.load(Ordering::Acquire)
    }

    pub(crate) fn set_max_frame_disk_size(&self, size: usize) {
        self.max_frame_disk_size.store(size, Ordering::Release);
    }
}

struct DoneGuard {
    done: Arc<AtomicBool>,
    tx: Sender<()>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        let _ = self.tx.try_send(());
    }
}

/// Handle to a running streaming thread.
#[derive(Debug)]
pub struct StreamTask {
    handle: Option<JoinHandle<()>>,
    done: Arc<AtomicBool>,
    done_rx: Receiver<()>,
}

impl StreamTask {
    /// Run `loader` on a new named thread.
    pub fn spawn(loader: StreamingWindowLoader, name: &str) -> Result<Self> {
        let done = Arc::new(AtomicBool::new(false));
        let (tx, done_rx) = channel::bounded(1);
        let guard = DoneGuard {
            done: Arc::clone(&done),
            tx,
        };

        let handle = thread::Builder::new()
            .name(format!("stream-{}", name))
            .spawn(move || {
                let _guard = guard;
                loader.run();
            })?;

        Ok(Self {
            handle: Some(handle),
            done,
            done_rx,
        })
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Wait for the thread to exit. On timeout the thread is left detached.
    pub fn join(mut self, timeout: Duration) -> Result<()> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                error!("Streaming thread still running after {:?}", timeout);
                return Err(RecordingError::ShutdownTimedOut(timeout));
            }
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Streaming thread panicked");
            }
        }
        debug!("Streaming thread joined");
        Ok(())
    }
}
