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

// In-memory package store, for tests and ephemeral sessions

use super::backend::{validate_package_name, PackageStore, RecordingPackage, SavedPackage, StoredPackage};
use crate::bulk_data::BulkDataStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

#[derive(Default)]
pub struct MemoryStore {
    packages: DashMap<String, RecordingPackage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[async_trait]
impl PackageStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save_package(&self, package: &RecordingPackage) -> Result<SavedPackage> {
        let name = package.manifest.name.clone();
        validate_package_name(&name)?;
        debug!("Storing package '{}' ({} bytes) in memory", name, package.bulk_data.len());
        self.packages.insert(name.clone(), package.clone());
        Ok(SavedPackage {
            name,
            bulk_path: None,
        })
    }

    async fn load_package(&self, name: &str) -> Result<StoredPackage> {
        let package = self
            .packages
            .get(name)
            .ok_or_else(|| anyhow!("Package '{}' not found", name))?;
        Ok(StoredPackage {
            manifest: package.manifest.clone(),
            bulk: BulkDataStore::from_bytes(package.bulk_data.to_vec()),
        })
    }

    async fn package_exists(&self, name: &str) -> Result<bool> {
        Ok(self.packages.contains_key(name))
    }

    async fn list_packages(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.packages.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}
