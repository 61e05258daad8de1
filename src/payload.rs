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

//! Opaque, type-tagged frame payloads and the registry that resolves
//! payload type names found in recording files.
//!
//! A payload is the serialized form of one LiveLink static or frame struct.
//! The recording core never looks inside it; it only needs the type name to
//! describe the block on disk and the byte size to compute record offsets.
//! Typed structs go in and out through serde + bincode, whose fixed-width
//! integer encoding keeps plain structs at a constant serialized size.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{RecordingError, Result};

/// One serialized struct instance tagged with its type name.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    type_name: Arc<str>,
    data: Bytes,
}

/// Payloads are shared between the resident window and in-flight playback consumers.
pub type SharedPayload = Arc<Payload>;

impl Payload {
    pub fn new(type_name: impl Into<Arc<str>>, data: impl Into<Bytes>) -> Self {
        Self {
            type_name: type_name.into(),
            data: data.into(),
        }
    }

    /// Serialize a typed value as the payload of `type_name`.
    pub fn from_value<T: Serialize>(type_name: impl Into<Arc<str>>, value: &T) -> Result<Self> {
        let data = bincode::serialize(value)?;
        Ok(Self::new(type_name, data))
    }

    /// Deserialize the payload back into a typed value.
    pub fn to_value<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.data)?)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A payload is valid when it names its type and carries data.
    pub fn is_valid(&self) -> bool {
        !self.type_name.is_empty() && !self.data.is_empty()
    }
}

/// Resolved payload type: the interned name plus the fixed serialized size, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadDescriptor {
    name: Arc<str>,
    serialized_size: Option<usize>,
}

impl PayloadDescriptor {
    pub fn new(name: impl Into<Arc<str>>, serialized_size: Option<usize>) -> Self {
        Self {
            name: name.into(),
            serialized_size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serialized_size(&self) -> Option<usize> {
        self.serialized_size
    }

    /// Build a payload of this type from raw record bytes.
    pub fn decode(&self, data: Bytes) -> Result<Payload> {
        if let Some(expected) = self.serialized_size {
            if data.len() != expected {
                return Err(RecordingError::PayloadSize {
                    type_name: self.name.to_string(),
                    expected,
                    found: data.len(),
                });
            }
        }
        Ok(Payload {
            type_name: Arc::clone(&self.name),
            data,
        })
    }
}

/// Maps payload type names stored in recording files to descriptors.
///
/// A permissive registry accepts any type name and trusts the record size
/// found in the file; it is meant for inspection tools that do not know the
/// application's payload types.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, PayloadDescriptor>,
    permissive: bool,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissive() -> Self {
        Self {
            types: HashMap::new(),
            permissive: true,
        }
    }

    /// Register a type whose serialized size is fixed and known up front.
    pub fn register(&mut self, name: impl Into<String>, serialized_size: usize) -> &mut Self {
        let name = name.into();
        let descriptor = PayloadDescriptor::new(name.as_str(), Some(serialized_size));
        self.types.insert(name, descriptor);
        self
    }

    /// Register a serde type; its size is taken from the bincode encoding of `T::default()`.
    pub fn register_type<T: Serialize + Default>(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        let size = bincode::serialized_size(&T::default())? as usize;
        Ok(self.register(name, size))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolve a type name read from a block header. `serialized_size` is the
    /// per-record payload size the block declares.
    pub fn resolve(&self, name: &str, serialized_size: usize) -> Result<PayloadDescriptor> {
        match self.types.get(name) {
            Some(descriptor) => match descriptor.serialized_size {
                Some(expected) if expected != serialized_size => Err(RecordingError::PayloadSize {
                    type_name: name.to_string(),
                    expected,
                    found: serialized_size,
                }),
                _ => Ok(descriptor.clone()),
            },
            None if self.permissive => {
                debug!("Accepting unregistered payload type '{}'", name);
                Ok(PayloadDescriptor::new(name, Some(serialized_size)))
            }
            None => Err(RecordingError::UnknownPayloadType(name.to_string())),
        }
    }
}
