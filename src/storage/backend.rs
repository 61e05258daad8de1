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

// Package store trait for saving and opening recordings

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

use crate::bulk_data::BulkDataStore;
use crate::recording::RecordingManifest;

/// A recording ready to be persisted: its manifest and encoded bulk data.
#[derive(Debug, Clone)]
pub struct RecordingPackage {
    pub manifest: RecordingManifest,
    pub bulk_data: Bytes,
}

/// Where a saved package ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPackage {
    pub name: String,
    /// Bulk data file, for stores that write to disk.
    pub bulk_path: Option<PathBuf>,
}

/// A package opened from a store.
#[derive(Debug)]
pub struct StoredPackage {
    pub manifest: RecordingManifest,
    pub bulk: BulkDataStore,
}

/// Check a package name is a relative path without parent components.
pub fn validate_package_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("package name cannot be empty");
    }
    if name.starts_with('/') || name.starts_with('\\') {
        bail!("package name '{}' must be relative", name);
    }
    if name.split(['/', '\\']).any(|part| part == ".." || part.is_empty()) {
        bail!("package name '{}' contains an invalid path component", name);
    }
    Ok(())
}

/// Host package storage
///
/// Stands in for the host's package create/save pipeline: a package is a
/// manifest plus the bulk data it describes, addressed by name. Names may
/// contain `/` to place packages in sub-folders.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Initialize the store (create directories if needed)
    async fn initialize(&self) -> Result<()>;

    /// Persist a package under `package.manifest.name`, replacing any existing one
    async fn save_package(&self, package: &RecordingPackage) -> Result<SavedPackage>;

    /// Open a saved package
    async fn load_package(&self, name: &str) -> Result<StoredPackage>;

    async fn package_exists(&self, name: &str) -> Result<bool>;

    /// Names of every saved package, sorted
    async fn list_packages(&self) -> Result<Vec<String>>;

    /// `base` if free, otherwise the first free `base_1`, `base_2`, ...
    async fn unique_package_name(&self, base: &str) -> Result<String> {
        validate_package_name(base)?;
        if !self.package_exists(base).await? {
            return Ok(base.to_string());
        }
        let mut suffix = 1u32;
        loop {
            let candidate = format!("{}_{}", base, suffix);
            if !self.package_exists(&candidate).await? {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    /// Save with retry logic (optional, has default implementation)
    ///
    /// # Arguments
    /// * `package` - Manifest and bulk data to persist
    /// * `max_retries` - Maximum number of retry attempts
    async fn save_with_retry(
        &self,
        package: &RecordingPackage,
        max_retries: u32,
    ) -> Result<SavedPackage> {
        use tokio::time::{sleep, Duration};
        use tracing::{info, warn};

        let name = &package.manifest.name;
        let mut attempt = 0;
        let mut delay = Duration::from_millis(100);

        loop {
            match self.save_package(package).await {
                Ok(saved) => {
                    if attempt > 0 {
                        info!("Saved package '{}' after {} retries", name, attempt);
                    }
                    return Ok(saved);
                }
                Err(e) if attempt < max_retries => {
                    warn!(
                        "Saving package '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        name,
                        attempt + 1,
                        max_retries,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    delay *= 2; // Exponential backoff
                    delay = delay.min(Duration::from_secs(30));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Saving package '{}' failed after {} attempts: {}",
                        name,
                        max_retries,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Health check
    async fn health_check(&self) -> Result<bool>;

    /// Get store type identifier
    fn backend_type(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_package_name() {
        assert!(validate_package_name("Take_01").is_ok());
        assert!(validate_package_name("Session/Take_01").is_ok());
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("/abs").is_err());
        assert!(validate_package_name("a/../b").is_err());
        assert!(validate_package_name("a//b").is_err());
    }
}
