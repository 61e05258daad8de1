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

// Filesystem package store implementation

use super::backend::{validate_package_name, PackageStore, RecordingPackage, SavedPackage, StoredPackage};
use crate::bulk_data::BulkDataStore;
use crate::config::FilesystemConfig;
use crate::recording::RecordingManifest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Extension of the bulk data file written next to each manifest
pub const BULK_DATA_EXTENSION: &str = "rec";
/// Extension of the manifest sidecar
pub const MANIFEST_EXTENSION: &str = "json";

/// Filesystem store writing `<name>.json` + `<name>.rec` under a base directory
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    pub fn new(config: FilesystemConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem store at: {}",
            base_path.display()
        );

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Ensure base directory exists
    async fn ensure_base_directory(&self) -> Result<()> {
        if !self.base_path.exists() {
            info!("Creating base directory: {}", self.base_path.display());
            fs::create_dir_all(&self.base_path)
                .await
                .context("Failed to create base directory")?;
        }
        Ok(())
    }

    /// Bulk data file for a package
    pub fn bulk_data_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", name, BULK_DATA_EXTENSION))
    }

    /// Manifest file for a package
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", name, MANIFEST_EXTENSION))
    }

    async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path)
            .await
            .context(format!("Failed to create file: {}", path.display()))?;

        file.write_all(data)
            .await
            .context("Failed to write data")?;

        file.flush().await.context("Failed to flush data")?;
        Ok(())
    }
}

#[async_trait]
impl PackageStore for FilesystemStore {
    async fn initialize(&self) -> Result<()> {
        self.ensure_base_directory().await
    }

    async fn save_package(&self, package: &RecordingPackage) -> Result<SavedPackage> {
        let name = &package.manifest.name;
        validate_package_name(name)?;

        let bulk_path = self.bulk_data_path(name);
        let manifest_path = self.manifest_path(name);

        if let Some(parent) = bulk_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create package directory: {}", parent.display()))?;
        }

        debug!(
            "Writing {} bytes to {}",
            package.bulk_data.len(),
            bulk_path.display()
        );
        Self::write_file(&bulk_path, &package.bulk_data).await?;

        // The manifest goes last so a package only becomes visible once its data is complete.
        let manifest_json = serde_json::to_string_pretty(&package.manifest)
            .context("Failed to serialize manifest")?;
        Self::write_file(&manifest_path, manifest_json.as_bytes()).await?;

        info!(
            "Saved package '{}' ({} bytes) to {}",
            name,
            package.bulk_data.len(),
            bulk_path.display()
        );

        Ok(SavedPackage {
            name: name.clone(),
            bulk_path: Some(bulk_path),
        })
    }

    async fn load_package(&self, name: &str) -> Result<StoredPackage> {
        validate_package_name(name)?;
        let manifest_path = self.manifest_path(name);
        let content = fs::read_to_string(&manifest_path)
            .await
            .context(format!("Failed to read manifest: {}", manifest_path.display()))?;
        let manifest: RecordingManifest = serde_json::from_str(&content)
            .context("Failed to parse manifest")?;

        let bulk_path = self.bulk_data_path(name);
        if !bulk_path.exists() {
            anyhow::bail!("Bulk data file missing: {}", bulk_path.display());
        }

        Ok(StoredPackage {
            manifest,
            bulk: BulkDataStore::from_file(bulk_path),
        })
    }

    async fn package_exists(&self, name: &str) -> Result<bool> {
        validate_package_name(name)?;
        Ok(self.manifest_path(name).exists() || self.bulk_data_path(name).exists())
    }

    async fn list_packages(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.base_path.exists() {
            return Ok(names);
        }

        let mut pending = vec![self.base_path.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .context(format!("Failed to read directory: {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|ext| ext.to_str()) != Some(MANIFEST_EXTENSION) {
                    continue;
                }
                if let Ok(relative) = path.with_extension("").strip_prefix(&self.base_path) {
                    let name = relative
                        .components()
                        .map(|part| part.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    names.push(name);
                }
            }
        }

        names.sort();
        Ok(names)
    }

    async fn health_check(&self) -> Result<bool> {
        // Check if base directory is accessible and writable
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => {
                let test_file = self.base_path.join(".health_check_test");
                match fs::File::create(&test_file).await {
                    Ok(mut f) => {
                        if let Err(e) = f.write_all(b"test").await {
                            warn!("Health check failed - cannot write: {}", e);
                            return Ok(false);
                        }
                        let _ = fs::remove_file(&test_file).await;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot create file: {}", e);
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - base path is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access base path {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}
