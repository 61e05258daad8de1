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

/// Binary frame codec for recorded subject tracks
///
/// This module serializes one subject's timestamped frames into a
/// self-describing block and reads blocks back with frame-level random access.
///
/// # Format Structure
///
/// A recording file is:
/// - `i32` format version
/// - `i32` static block count, then the static blocks
/// - `i32` frame block count, then the frame blocks
///
/// Each block is:
/// - `i32` header size (covers the next three fields)
/// - subject key: 16-byte source uuid + length-prefixed UTF-8 name
/// - `i32` frame count
/// - length-prefixed payload type name
/// - `i32` payload size shared by every record of the block
/// - `frame_count` records of `[i32 frame index][f64 timestamp][payload]`
///
/// All integers are little-endian. Records are fixed size, so frame `n`
/// of a block lives at `first_frame_offset + disk_record_size * n`.
///
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, error};
use uuid::Uuid;

use crate::buffer::{RecordingBuffer, RecordingDataSet};
use crate::bulk_data::BulkDataStore;
use crate::error::{RecordingError, Result};
use crate::payload::{Payload, PayloadDescriptor, TypeRegistry};
use crate::types::SubjectKey;

/// Version written at the start of every recording file.
pub const RECORDING_FORMAT_VERSION: i32 = 1;

/// Bytes of every record that precede the payload: frame index + timestamp.
pub const RECORD_OVERHEAD: usize = 4 + 8;

// Upper bound for length-prefixed strings, guards against reading garbage lengths.
const MAX_STRING_LEN: i32 = 64 * 1024;

/// Serialize a whole data set: version, static blocks, then frame blocks.
///
/// Subjects without frames are skipped and not counted. Any invalid subject
/// aborts the write; the output is then incomplete and must be discarded.
pub fn write_recording<W: Write + Seek>(out: &mut W, data: &RecordingDataSet) -> Result<()> {
    out.write_i32::<LittleEndian>(RECORDING_FORMAT_VERSION)?;

    let static_blocks: Vec<_> = data
        .static_data
        .iter()
        .map(|(key, static_data)| (key, &static_data.buffer))
        .collect();
    write_block_list(out, &static_blocks)?;

    let frame_blocks: Vec<_> = data.frame_data.iter().collect();
    write_block_list(out, &frame_blocks)?;
    Ok(())
}

/// Encode a data set into a new in-memory buffer.
pub fn encode_recording(data: &RecordingDataSet) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    write_recording(&mut cursor, data)?;
    Ok(cursor.into_inner())
}

fn write_block_list<W: Write + Seek>(
    out: &mut W,
    blocks: &[(&SubjectKey, &RecordingBuffer)],
) -> Result<()> {
    let count_position = out.stream_position()?;
    out.write_i32::<LittleEndian>(0)?;

    let mut written = 0i32;
    for (key, buffer) in blocks {
        if write_block(out, key, buffer)? {
            written += 1;
        }
    }

    patch_i32(out, count_position, written)
}

/// Write one subject block. Returns `Ok(false)` when the buffer is empty and
/// nothing was written.
pub fn write_block<W: Write + Seek>(
    out: &mut W,
    subject_key: &SubjectKey,
    buffer: &RecordingBuffer,
) -> Result<bool> {
    buffer.validate(subject_key).inspect_err(|e| {
        error!("Refusing to save invalid data for {}: {}", subject_key, e);
    })?;

    let frames = buffer.frames();
    let Some(first) = frames.front() else {
        error!("Subject {} has no frames, skipping block", subject_key);
        return Ok(false);
    };

    // Records are fixed size: every payload must match the first one.
    let payload_size = first.len();
    for (index, frame) in frames.iter().enumerate() {
        if frame.type_name() != first.type_name() {
            return Err(RecordingError::InvalidData {
                subject: subject_key.to_string(),
                reason: format!(
                    "frame {} has type '{}', block type is '{}'",
                    index,
                    frame.type_name(),
                    first.type_name()
                ),
            });
        }
        if frame.len() != payload_size {
            return Err(RecordingError::InconsistentFrameSize {
                subject: subject_key.to_string(),
                frame: index,
                expected: payload_size,
                found: frame.len(),
            });
        }
    }

    let header_size_position = out.stream_position()?;
    out.write_i32::<LittleEndian>(0)?;
    let header_start = out.stream_position()?;

    out.write_all(subject_key.source.as_bytes())?;
    write_string(out, &subject_key.name)?;
    out.write_i32::<LittleEndian>(frames.len() as i32)?;
    write_string(out, first.type_name())?;

    let header_end = out.stream_position()?;
    patch_i32(out, header_size_position, (header_end - header_start) as i32)?;

    let payload_size_position = out.stream_position()?;
    out.write_i32::<LittleEndian>(0)?;

    for (index, (frame, timestamp)) in frames.iter().zip(buffer.timestamps()).enumerate() {
        out.write_i32::<LittleEndian>(index as i32)?;
        out.write_f64::<LittleEndian>(*timestamp)?;
        out.write_all(frame.data())?;
    }

    patch_i32(out, payload_size_position, payload_size as i32)?;

    debug!(
        "Wrote {} frames of '{}' for {} ({} bytes per record)",
        frames.len(),
        first.type_name(),
        subject_key,
        RECORD_OVERHEAD + payload_size
    );
    Ok(true)
}

fn patch_i32<W: Write + Seek>(out: &mut W, position: u64, value: i32) -> Result<()> {
    let current = out.stream_position()?;
    out.seek(SeekFrom::Start(position))?;
    out.write_i32::<LittleEndian>(value)?;
    out.seek(SeekFrom::Start(current))?;
    Ok(())
}

fn write_string<W: Write>(out: &mut W, value: &str) -> Result<()> {
    out.write_i32::<LittleEndian>(value.len() as i32)?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_i32::<LittleEndian>()?;
    if !(0..=MAX_STRING_LEN).contains(&len) {
        return Err(RecordingError::Malformed(format!(
            "invalid string length {}",
            len
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| RecordingError::Malformed(format!("string is not UTF-8: {}", e)))
}

/// Parsed block header plus everything needed to address its records.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub subject_key: SubjectKey,
    pub frame_count: i32,
    pub type_name: String,
    /// `None` when the payload type could not be resolved.
    pub descriptor: Option<PayloadDescriptor>,
    pub payload_size: usize,
    pub disk_record_size: usize,
    pub first_frame_offset: u64,
}

impl BlockHeader {
    /// Absolute store offset of record `frame_index`.
    pub fn frame_position(&self, frame_index: i32) -> u64 {
        self.first_frame_offset + self.disk_record_size as u64 * frame_index as u64
    }

    /// Offset just past the last record of the block.
    pub fn end_position(&self) -> u64 {
        self.frame_position(self.frame_count)
    }

    pub fn descriptor(&self) -> Result<&PayloadDescriptor> {
        self.descriptor
            .as_ref()
            .ok_or_else(|| RecordingError::UnknownPayloadType(self.type_name.clone()))
    }
}

/// Read a block header at the store's current offset. On return the offset
/// points at the first record.
///
/// An unresolvable payload type is logged and leaves `descriptor` empty so the
/// caller can still skip the block.
pub fn read_block_header(store: &mut BulkDataStore, registry: &TypeRegistry) -> Result<BlockHeader> {
    let header_size = store.read_primitive::<i32>()?;
    if header_size <= 0 {
        return Err(RecordingError::Malformed(format!(
            "invalid block header size {}",
            header_size
        )));
    }

    let mut reader = store.create_scoped_reader(header_size as usize)?;
    let mut source = [0u8; 16];
    reader.read_exact(&mut source)?;
    let name = read_string(&mut reader)?;
    let frame_count = reader.read_i32::<LittleEndian>()?;
    if frame_count <= 0 {
        return Err(RecordingError::Malformed(format!(
            "block for '{}' has frame count {}",
            name, frame_count
        )));
    }
    let type_name = read_string(&mut reader)?;

    let payload_size = store.read_primitive::<i32>()?;
    if payload_size < 0 {
        return Err(RecordingError::Malformed(format!(
            "block for '{}' has payload size {}",
            name, payload_size
        )));
    }
    let payload_size = payload_size as usize;
    let subject_key = SubjectKey::new(Uuid::from_bytes(source), name);

    let descriptor = match registry.resolve(&type_name, payload_size) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            error!("Cannot resolve payload type for {}: {}", subject_key, e);
            None
        }
    };

    Ok(BlockHeader {
        subject_key,
        frame_count,
        type_name,
        descriptor,
        payload_size,
        disk_record_size: RECORD_OVERHEAD + payload_size,
        first_frame_offset: store.offset(),
    })
}

/// Read the record of `expected_index` from a block. The store offset is moved
/// to the record first; the read is all-or-nothing.
pub fn read_frame(
    store: &mut BulkDataStore,
    header: &BlockHeader,
    descriptor: &PayloadDescriptor,
    expected_index: i32,
) -> Result<(Payload, f64)> {
    store.set_offset(header.frame_position(expected_index));
    let mut reader = store.create_scoped_reader(header.disk_record_size)?;

    let frame_index = reader.read_i32::<LittleEndian>()?;
    if frame_index != expected_index {
        return Err(RecordingError::FrameIndexMismatch {
            expected: expected_index,
            found: frame_index,
        });
    }
    let timestamp = reader.read_f64::<LittleEndian>()?;
    let payload = descriptor.decode(reader.take_remaining())?;
    Ok((payload, timestamp))
}

/// Headers of every block in a recording file.
#[derive(Debug, Clone)]
pub struct RecordingLayout {
    pub version: i32,
    pub static_blocks: Vec<BlockHeader>,
    pub frame_blocks: Vec<BlockHeader>,
}

impl RecordingLayout {
    /// Largest record size over all frame blocks.
    pub fn max_frame_disk_size(&self) -> usize {
        self.frame_blocks
            .iter()
            .map(|block| block.disk_record_size)
            .max()
            .unwrap_or(0)
    }

    /// Longest frame block, in frames.
    pub fn max_frames(&self) -> i32 {
        self.frame_blocks
            .iter()
            .map(|block| block.frame_count)
            .max()
            .unwrap_or(0)
    }
}

/// Parse the version and every block header from the start of the store,
/// skipping record data.
pub fn read_layout(store: &mut BulkDataStore, registry: &TypeRegistry) -> Result<RecordingLayout> {
    store.reset_offset();
    let version = store.read_primitive::<i32>()?;
    if version != RECORDING_FORMAT_VERSION {
        return Err(RecordingError::VersionMismatch {
            expected: RECORDING_FORMAT_VERSION,
            found: version,
        });
    }

    let static_blocks = read_block_list(store, registry)?;
    let frame_blocks = read_block_list(store, registry)?;
    Ok(RecordingLayout {
        version,
        static_blocks,
        frame_blocks,
    })
}

fn read_block_list(store: &mut BulkDataStore, registry: &TypeRegistry) -> Result<Vec<BlockHeader>> {
    let count = store.read_primitive::<i32>()?;
    if count < 0 {
        return Err(RecordingError::Malformed(format!("negative block count {}", count)));
    }
    let mut blocks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let header = read_block_header(store, registry)?;
        store.set_offset(header.end_position());
        blocks.push(header);
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StaticRecordingBuffer;
    use crate::types::Role;
    use std::sync::Arc;

    fn key(name: &str) -> SubjectKey {
        SubjectKey::new(Uuid::from_u128(0x1234), name)
    }

    fn frame(value: u8) -> Arc<Payload> {
        Arc::new(Payload::new("Basic", vec![value; 8]))
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register("Basic", 8).register("Static", 4);
        registry
    }

    fn data_set() -> RecordingDataSet {
        let mut data = RecordingDataSet::new();
        data.static_data.insert(
            key("Performer"),
            StaticRecordingBuffer::with_sample(Some(Role::new("Animation")), Payload::new("Static", vec![9u8; 4])),
        );
        let mut buffer = RecordingBuffer::new();
        for i in 0..5u8 {
            buffer.append(frame(i), i as f64 * 0.1);
        }
        data.frame_data.insert(key("Performer"), buffer);
        data
    }

    #[test]
    fn test_layout_scan() {
        let bytes = encode_recording(&data_set()).unwrap();
        let mut store = BulkDataStore::from_bytes(bytes);
        let layout = read_layout(&mut store, &registry()).unwrap();

        assert_eq!(layout.version, RECORDING_FORMAT_VERSION);
        assert_eq!(layout.static_blocks.len(), 1);
        assert_eq!(layout.frame_blocks.len(), 1);
        let block = &layout.frame_blocks[0];
        assert_eq!(block.subject_key, key("Performer"));
        assert_eq!(block.frame_count, 5);
        assert_eq!(block.disk_record_size, RECORD_OVERHEAD + 8);
        assert_eq!(layout.max_frames(), 5);
        assert_eq!(store.offset(), store.len().unwrap());
    }

    #[test]
    fn test_random_access_frame() {
        let bytes = encode_recording(&data_set()).unwrap();
        let mut store = BulkDataStore::from_bytes(bytes);
        let layout = read_layout(&mut store, &registry()).unwrap();
        let block = &layout.frame_blocks[0];
        let descriptor = block.descriptor().unwrap();

        let (payload, timestamp) = read_frame(&mut store, block, descriptor, 3).unwrap();
        assert_eq!(payload.data()[0], 3);
        assert!((timestamp - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_frame_index_mismatch() {
        let bytes = encode_recording(&data_set()).unwrap();
        let mut store = BulkDataStore::from_bytes(bytes);
        let layout = read_layout(&mut store, &registry()).unwrap();
        let mut block = layout.frame_blocks[0].clone();
        // Shift the block start by one record so index 0 reads record 1.
        block.first_frame_offset += block.disk_record_size as u64;
        let descriptor = block.descriptor().unwrap().clone();

        let err = read_frame(&mut store, &block, &descriptor, 0).unwrap_err();
        assert!(matches!(
            err,
            RecordingError::FrameIndexMismatch { expected: 0, found: 1 }
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = encode_recording(&data_set()).unwrap();
        bytes[0] = 99;
        let mut store = BulkDataStore::from_bytes(bytes);
        assert!(matches!(
            read_layout(&mut store, &registry()),
            Err(RecordingError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    #[test]
    fn test_zero_frame_block_skipped() {
        let mut data = data_set();
        data.frame_data.insert(key("Empty"), RecordingBuffer::new());
        let bytes = encode_recording(&data).unwrap();
        let mut store = BulkDataStore::from_bytes(bytes);
        let layout = read_layout(&mut store, &registry()).unwrap();
        assert_eq!(layout.frame_blocks.len(), 1);
    }

    #[test]
    fn test_inconsistent_frame_size_rejected() {
        let mut data = data_set();
        let buffer = data.frame_data.get_mut(&key("Performer")).unwrap();
        buffer.append(Arc::new(Payload::new("Basic", vec![1u8; 12])), 1.0);
        assert!(matches!(
            encode_recording(&data),
            Err(RecordingError::InconsistentFrameSize { frame: 5, expected: 8, found: 12, .. })
        ));
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let mut data = data_set();
        let buffer = data.frame_data.get_mut(&key("Performer")).unwrap();
        buffer.append(Arc::new(Payload::new("Basic", Vec::new())), 1.0);
        assert!(matches!(
            encode_recording(&data),
            Err(RecordingError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_unknown_type_is_skippable() {
        let bytes = encode_recording(&data_set()).unwrap();
        let mut store = BulkDataStore::from_bytes(bytes);
        let mut partial = TypeRegistry::new();
        partial.register("Static", 4);

        let layout = read_layout(&mut store, &partial).unwrap();
        let block = &layout.frame_blocks[0];
        assert!(block.descriptor.is_none());
        assert!(matches!(
            block.descriptor(),
            Err(RecordingError::UnknownPayloadType(name)) if name == "Basic"
        ));
        assert!(layout.static_blocks[0].descriptor.is_some());
    }
}
