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

// LiveLink recording and playback core
//
// Captures timestamped subject data, saves it in a block-structured binary
// format with frame-level random access, and streams a window of frames
// around the playhead back into memory on a background thread:
// - Records static and per-frame samples for any number of subjects
// - Encodes one fixed-size-record block per subject
// - Streams frames outward from the playhead, cancellable and pausable
// - Serves playback queries from per-subject tracks

pub mod buffer;
pub mod bulk_data;
pub mod codec;
pub mod config;
pub mod error;
pub mod payload;
pub mod playback;
pub mod recorder;
pub mod recording;
pub mod storage;
pub mod streaming;
pub mod types;

// Re-export main types
pub use buffer::{RecordingBuffer, RecordingDataSet, StaticRecordingBuffer};
pub use bulk_data::{BulkDataStore, ScopedReader};
pub use codec::{read_layout, write_recording, RecordingLayout, RECORDING_FORMAT_VERSION};
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use error::{RecordingError, Result};
pub use payload::{Payload, PayloadDescriptor, SharedPayload, TypeRegistry};
pub use playback::{PlaybackTrack, PlaybackTrackSet, PlayheadTime, RecordingPlayer};
pub use recorder::{Clock, Recorder, SaveCompletion, SubjectRegistry, SystemClock};
pub use recording::{Recording, RecordingManifest};
pub use storage::{open_recording, PackageStore, StoreFactory};
pub use streaming::{ManualResetEvent, StreamingRequest, StreamingWindowLoader};
pub use types::{FrameRange, FrameRate, RecordedFrame, Role, SubjectKey};
