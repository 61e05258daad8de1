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

//! Append-only backing store for a recording's encoded frame data.
//!
//! The store keeps its own logical read offset, independent of any file
//! position, so the streaming loader can jump straight to a frame record
//! without reopening the file. Reads are batched: a scoped reader pulls an
//! exact byte range into memory once and fields are then decoded from it.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RecordingError, Result};

/// Fixed-width little-endian values readable directly from the store.
pub trait BulkPrimitive: Sized {
    const SIZE: usize;
    fn decode(bytes: &[u8]) -> Self;
}

impl BulkPrimitive for i32 {
    const SIZE: usize = 4;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_i32(bytes)
    }
}

impl BulkPrimitive for i64 {
    const SIZE: usize = 8;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_i64(bytes)
    }
}

impl BulkPrimitive for f64 {
    const SIZE: usize = 8;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_f64(bytes)
    }
}

#[derive(Debug)]
enum Backing {
    Memory(Vec<u8>),
    File {
        path: PathBuf,
        handle: Option<File>,
    },
}

#[derive(Debug)]
pub struct BulkDataStore {
    backing: Backing,
    offset: u64,
}

impl Default for BulkDataStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl BulkDataStore {
    /// Empty store held entirely in memory.
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
            offset: 0,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            backing: Backing::Memory(bytes.into()),
            offset: 0,
        }
    }

    /// Store backed by a file on disk. The file is opened on first access.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            backing: Backing::File {
                path: path.into(),
                handle: None,
            },
            offset: 0,
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File { path, .. } => Some(path),
            Backing::Memory(_) => None,
        }
    }

    /// Total size of the stored data in bytes.
    pub fn len(&mut self) -> Result<u64> {
        match &mut self.backing {
            Backing::Memory(data) => Ok(data.len() as u64),
            Backing::File { path, handle } => {
                let file = Self::open_handle(path, handle)?;
                Ok(file.metadata()?.len())
            }
        }
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append bytes at the end of the store. The read offset is unchanged.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.backing {
            Backing::Memory(data) => data.extend_from_slice(bytes),
            Backing::File { path, handle } => {
                // Drop any read handle so the next read observes the new length.
                *handle = None;
                let mut file = OpenOptions::new().create(true).append(true).open(&*path)?;
                file.write_all(bytes)?;
                file.flush()?;
            }
        }
        Ok(())
    }

    /// Contents of an in-memory store.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Memory(data) => Some(data),
            Backing::File { .. } => None,
        }
    }

    /// Read the whole store regardless of backing.
    pub fn read_all(&mut self) -> Result<Bytes> {
        match &mut self.backing {
            Backing::Memory(data) => Ok(Bytes::copy_from_slice(data)),
            Backing::File { path, handle } => {
                let file = Self::open_handle(path, handle)?;
                let mut data = Vec::new();
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut data)?;
                Ok(Bytes::from(data))
            }
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn reset_offset(&mut self) {
        self.offset = 0;
    }

    /// Read one primitive at the current offset and advance past it.
    pub fn read_primitive<T: BulkPrimitive>(&mut self) -> Result<T> {
        let mut buf = [0u8; 8];
        let slot = &mut buf[..T::SIZE];
        self.read_exact_at(self.offset, slot)?;
        self.offset += T::SIZE as u64;
        Ok(T::decode(slot))
    }

    /// Pull `byte_count` bytes starting at the current offset into memory and
    /// advance the offset past them.
    pub fn create_scoped_reader(&mut self, byte_count: usize) -> Result<ScopedReader> {
        // Sizes come from the file; check them before allocating.
        let len = self.len()?;
        let fits = self
            .offset
            .checked_add(byte_count as u64)
            .is_some_and(|end| end <= len);
        if !fits {
            return Err(past_end(byte_count, self.offset, len));
        }
        let mut data = vec![0u8; byte_count];
        self.read_exact_at(self.offset, &mut data)?;
        self.offset += byte_count as u64;
        Ok(ScopedReader::new(Bytes::from(data)))
    }

    /// Release any open file handle and rewind. In-memory data is kept.
    pub fn unload(&mut self) {
        if let Backing::File { path, handle } = &mut self.backing {
            if handle.take().is_some() {
                debug!("Closed bulk data file {}", path.display());
            }
        }
        self.offset = 0;
    }

    /// Point the store at a file, discarding any in-memory data.
    pub fn rebind_to_file(&mut self, path: impl Into<PathBuf>) {
        self.backing = Backing::File {
            path: path.into(),
            handle: None,
        };
        self.offset = 0;
    }

    fn read_exact_at(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        match &mut self.backing {
            Backing::Memory(data) => {
                let start = offset as usize;
                let end = start.checked_add(out.len()).filter(|end| *end <= data.len());
                match end {
                    Some(end) => {
                        out.copy_from_slice(&data[start..end]);
                        Ok(())
                    }
                    None => Err(past_end(out.len(), offset, data.len() as u64)),
                }
            }
            Backing::File { path, handle } => {
                let file = Self::open_handle(path, handle)?;
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(out)?;
                Ok(())
            }
        }
    }

    fn open_handle<'a>(path: &Path, handle: &'a mut Option<File>) -> Result<&'a mut File> {
        if handle.is_none() {
            debug!("Opening bulk data file {}", path.display());
            *handle = Some(File::open(path)?);
        }
        handle
            .as_mut()
            .ok_or_else(|| RecordingError::Malformed("bulk data file handle unavailable".into()))
    }
}

fn past_end(byte_count: usize, offset: u64, len: u64) -> RecordingError {
    RecordingError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "read of {} bytes at offset {} past end of {} bytes",
            byte_count, offset, len
        ),
    ))
}

/// Bounded in-memory view over a byte range read from a [`BulkDataStore`].
#[derive(Debug, Clone)]
pub struct ScopedReader {
    data: Bytes,
    position: usize,
}

impl ScopedReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Take the next `count` bytes without copying.
    pub fn take_bytes(&mut self, count: usize) -> Result<Bytes> {
        if count > self.remaining() {
            return Err(RecordingError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("requested {} bytes, {} remaining", count, self.remaining()),
            )));
        }
        let bytes = self.data.slice(self.position..self.position + count);
        self.position += count;
        Ok(bytes)
    }

    /// Everything not read yet.
    pub fn take_remaining(&mut self) -> Bytes {
        let bytes = self.data.slice(self.position..);
        self.position = self.data.len();
        bytes
    }
}

impl Read for ScopedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.remaining());
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ReadBytesExt, WriteBytesExt};

    fn sample_bytes() -> Vec<u8> {
        let mut data = Vec::new();
        data.write_i32::<LittleEndian>(42).unwrap();
        data.write_f64::<LittleEndian>(1.5).unwrap();
        data.write_i64::<LittleEndian>(-7).unwrap();
        data.extend_from_slice(b"tail");
        data
    }

    #[test]
    fn test_read_primitives_advance_offset() {
        let mut store = BulkDataStore::from_bytes(sample_bytes());
        assert_eq!(store.read_primitive::<i32>().unwrap(), 42);
        assert_eq!(store.offset(), 4);
        assert_eq!(store.read_primitive::<f64>().unwrap(), 1.5);
        assert_eq!(store.read_primitive::<i64>().unwrap(), -7);
        assert_eq!(store.offset(), 20);
    }

    #[test]
    fn test_scoped_reader() {
        let mut store = BulkDataStore::from_bytes(sample_bytes());
        store.set_offset(4);
        let mut reader = store.create_scoped_reader(8).unwrap();
        assert_eq!(store.offset(), 12);
        assert_eq!(reader.read_f64::<LittleEndian>().unwrap(), 1.5);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.take_bytes(1).is_err());
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut store = BulkDataStore::from_bytes(vec![1, 2]);
        assert!(store.read_primitive::<i32>().is_err());
        assert_eq!(store.offset(), 0);
        assert!(store.create_scoped_reader(3).is_err());
    }

    #[test]
    fn test_oversized_scoped_reader_is_rejected() {
        let mut store = BulkDataStore::from_bytes(sample_bytes());
        store.set_offset(4);
        let err = store.create_scoped_reader(i32::MAX as usize).unwrap_err();
        assert!(err.to_string().contains("past end of 24 bytes"), "{}", err);
        assert_eq!(store.offset(), 4);

        let dir = tempfile::tempdir().unwrap();
        let mut store = BulkDataStore::from_file(dir.path().join("take.rec"));
        store.append_bytes(&sample_bytes()).unwrap();
        store.set_offset(u64::MAX - 1);
        assert!(store.create_scoped_reader(8).is_err());
    }

    #[test]
    fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.rec");
        let mut store = BulkDataStore::from_file(&path);
        store.append_bytes(&sample_bytes()).unwrap();
        assert_eq!(store.len().unwrap(), 24);

        store.set_offset(20);
        let mut reader = store.create_scoped_reader(4).unwrap();
        assert_eq!(&reader.take_remaining()[..], b"tail");

        store.unload();
        assert_eq!(store.offset(), 0);
        assert_eq!(store.read_primitive::<i32>().unwrap(), 42);
    }

    #[test]
    fn test_unload_keeps_memory() {
        let mut store = BulkDataStore::from_bytes(sample_bytes());
        store.set_offset(12);
        store.unload();
        assert_eq!(store.offset(), 0);
        assert_eq!(store.bytes().map(|b| b.len()), Some(24));
    }
}
