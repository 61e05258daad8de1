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

// Package storage module
//
// A saved recording is a package: a JSON manifest plus the encoded bulk
// data. Stores hide where packages live so the recorder can save to disk
// or keep everything in memory.

pub mod backend;
pub mod factory;
pub mod filesystem;
pub mod memory;
pub mod naming;

pub use backend::{PackageStore, RecordingPackage, SavedPackage, StoredPackage};
pub use factory::StoreFactory;
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use naming::resolve_package_name;

use crate::config::StreamingConfig;
use crate::payload::TypeRegistry;
use crate::recording::Recording;
use std::sync::Arc;

/// Open a saved package as a streamable recording. Nothing is resident until
/// [`Recording::load_recording_data`] is called.
pub async fn open_recording(
    store: &dyn PackageStore,
    name: &str,
    registry: Arc<TypeRegistry>,
    config: StreamingConfig,
) -> anyhow::Result<Recording> {
    let package = store.load_package(name).await?;
    Ok(Recording::open(package.manifest, package.bulk, registry, config))
}
