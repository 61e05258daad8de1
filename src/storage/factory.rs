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

// Store factory for creating package stores from configuration

use super::backend::PackageStore;
use super::filesystem::FilesystemStore;
use super::memory::MemoryStore;
use crate::config::StorageConfig;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct StoreFactory;

impl StoreFactory {
    /// Create package store from configuration
    pub fn create(config: &StorageConfig) -> Result<Arc<dyn PackageStore>> {
        match config.backend.as_str() {
            "filesystem" => {
                let backend_config = config
                    .backend_config
                    .as_filesystem()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem config missing"))?;

                let store = FilesystemStore::new(backend_config.clone())?;
                Ok(Arc::new(store))
            }

            "memory" => Ok(Arc::new(MemoryStore::new())),

            unknown => bail!(
                "Unknown storage backend: '{}'. Supported: filesystem, memory",
                unknown
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, FilesystemConfig};

    #[test]
    fn test_create_filesystem_store() {
        let storage_config = StorageConfig {
            backend: "filesystem".to_string(),
            max_retries: 3,
            backend_config: BackendConfig::Filesystem {
                filesystem: FilesystemConfig::default(),
            },
        };

        let store = StoreFactory::create(&storage_config);
        assert!(store.is_ok());
        assert_eq!(store.unwrap().backend_type(), "filesystem");
    }

    #[test]
    fn test_create_memory_store() {
        let storage_config = StorageConfig {
            backend: "memory".to_string(),
            max_retries: 3,
            backend_config: BackendConfig::Memory {},
        };

        let store = StoreFactory::create(&storage_config).unwrap();
        assert_eq!(store.backend_type(), "memory");
    }

    #[test]
    fn test_filesystem_without_config() {
        let storage_config = StorageConfig {
            backend: "filesystem".to_string(),
            max_retries: 3,
            backend_config: BackendConfig::Memory {},
        };

        assert!(StoreFactory::create(&storage_config).is_err());
    }

    #[test]
    fn test_create_unknown_backend() {
        let storage_config = StorageConfig {
            backend: "unknown_backend".to_string(),
            max_retries: 3,
            backend_config: BackendConfig::Memory {},
        };

        let store = StoreFactory::create(&storage_config);
        assert!(store.is_err());
        if let Err(e) = store {
            assert!(e.to_string().contains("Unknown storage backend"));
        }
    }
}
