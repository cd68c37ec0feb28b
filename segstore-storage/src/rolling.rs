//! Legacy rolling layout.
//!
//! Each segment is a header chunk plus a series of data chunks, all stored
//! directly on the driver. No external metadata store is involved; the
//! header is the source of truth.
//!
//! ```text
//!  scope/stream/0$header          {"record":"policy","max_length":4096}
//!                                 {"record":"chunk","name":"scope/stream/0$offset.0","offset":0}
//!                                 {"record":"chunk","name":"scope/stream/0$offset.4096","offset":4096}
//!                                 {"record":"sealed"}
//!  scope/stream/0$offset.0        bytes 0..4096
//!  scope/stream/0$offset.4096     bytes 4096..
//! ```
//!
//! Header records are appended when the driver can append; otherwise the
//! header is replaced whole, atomically, so a failed rewrite keeps the old
//! header. The API is blocking; the factory wraps it in
//! [`AsyncStorageWrapper`](crate::wrapper::AsyncStorageWrapper).

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::locks::SegmentLocks;
use crate::traits::{
    ChunkHandle, ChunkStorage, SegmentHandle, SegmentProperties, SegmentRollingPolicy, SyncStorage,
};

const HEADER_SUFFIX: &str = "$header";

fn header_name(segment: &str) -> String {
    format!("{}{}", segment, HEADER_SUFFIX)
}

fn chunk_name(segment: &str, offset: u64) -> String {
    format!("{}$offset.{}", segment, offset)
}

/// One line of a segment header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum HeaderRecord {
    Policy { max_length: u64 },
    Chunk { name: String, offset: u64 },
    Sealed,
    Truncated { offset: u64 },
}

fn encode_records(records: &[HeaderRecord]) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    for record in records {
        serde_json::to_writer(&mut payload, record)?;
        payload.push(b'\n');
    }
    Ok(payload)
}

fn decode_records(content: &[u8]) -> Result<Vec<HeaderRecord>> {
    content
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).map_err(StorageError::from))
        .collect()
}

#[derive(Debug, Clone)]
struct RollingChunk {
    name: String,
    start_offset: u64,
    length: u64,
}

impl RollingChunk {
    fn end_offset(&self) -> u64 {
        self.start_offset + self.length
    }
}

/// Segment state rebuilt from its header.
#[derive(Debug)]
struct RollingState {
    name: String,
    policy: SegmentRollingPolicy,
    chunks: Vec<RollingChunk>,
    sealed: bool,
    start_offset: u64,
    header: Bytes,
}

impl RollingState {
    fn length(&self) -> u64 {
        self.chunks
            .last()
            .map(RollingChunk::end_offset)
            .unwrap_or(0)
            .max(self.start_offset)
    }

    fn properties(&self) -> SegmentProperties {
        SegmentProperties {
            name: self.name.clone(),
            length: self.length(),
            start_offset: self.start_offset,
            sealed: self.sealed,
        }
    }
}

/// Segment storage in the rolling layout.
pub struct RollingStorage {
    driver: Arc<dyn ChunkStorage>,
    executor: ExecutionContext,
    locks: SegmentLocks,
    epoch: AtomicU64,
}

impl RollingStorage {
    /// Create a rolling storage on top of a driver.
    pub fn new(driver: Arc<dyn ChunkStorage>, executor: ExecutionContext) -> Self {
        info!(driver = driver.driver_name(), "Creating rolling storage");
        Self {
            driver,
            executor,
            locks: SegmentLocks::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Driver holding headers and data chunks.
    pub fn chunk_storage(&self) -> &Arc<dyn ChunkStorage> {
        &self.driver
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn check_writable(handle: &SegmentHandle) -> Result<()> {
        if handle.read_only {
            return Err(StorageError::ReadOnly(handle.segment_name.clone()));
        }
        Ok(())
    }

    async fn load_state(&self, segment: &str) -> Result<RollingState> {
        let header = header_name(segment);
        let info = match self.driver.get_info(&header).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Err(StorageError::NotFound(segment.to_string())),
            Err(e) => return Err(e),
        };
        let content = if info.length == 0 {
            Bytes::new()
        } else {
            self.driver
                .read(&ChunkHandle::read_only(header), 0, info.length as usize)
                .await?
        };

        let mut state = RollingState {
            name: segment.to_string(),
            policy: SegmentRollingPolicy::NO_ROLLING,
            chunks: Vec::new(),
            sealed: false,
            start_offset: 0,
            header: content.clone(),
        };
        for record in decode_records(&content)? {
            match record {
                HeaderRecord::Policy { max_length } => {
                    state.policy = SegmentRollingPolicy::new(max_length)
                }
                HeaderRecord::Chunk { name, offset } => state.chunks.push(RollingChunk {
                    name,
                    start_offset: offset,
                    length: 0,
                }),
                HeaderRecord::Sealed => state.sealed = true,
                HeaderRecord::Truncated { offset } => {
                    state.start_offset = state.start_offset.max(offset)
                }
            }
        }

        // Only the last chunk can still grow; the others end where the next begins
        let count = state.chunks.len();
        for i in 0..count.saturating_sub(1) {
            state.chunks[i].length = state.chunks[i + 1].start_offset - state.chunks[i].start_offset;
        }
        if let Some(last) = state.chunks.last_mut() {
            last.length = self.driver.get_info(&last.name).await?.length;
        }

        // Chunks below the truncation offset are gone, except the last one
        let keep_from = state
            .chunks
            .iter()
            .position(|c| c.end_offset() > state.start_offset)
            .unwrap_or(count.saturating_sub(1));
        state.chunks.drain(..keep_from);

        Ok(state)
    }

    async fn append_header(&self, state: &mut RollingState, records: &[HeaderRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let payload = encode_records(records)?;
        let header = header_name(&state.name);

        if self.driver.supports_append() {
            self.driver
                .write(
                    &ChunkHandle::writable(header),
                    state.header.len() as u64,
                    Bytes::from(payload.clone()),
                )
                .await?;
            let mut content = BytesMut::from(&state.header[..]);
            content.extend_from_slice(&payload);
            state.header = content.freeze();
        } else {
            let mut content = BytesMut::from(&state.header[..]);
            content.extend_from_slice(&payload);
            let content = content.freeze();
            self.driver.replace(&header, content.clone()).await?;
            state.header = content;
        }
        Ok(())
    }

    /// Create a data chunk.
    ///
    /// Data chunk names are derived from offsets, so a chunk can already
    /// exist past the segment's end when an earlier write failed before its
    /// header update. No header names such a chunk; it is overwritten.
    async fn create_data_chunk(&self, segment: &str, name: &str, data: Bytes) -> Result<()> {
        match self.driver.create_with_content(name, data.clone()).await {
            Ok(_) => Ok(()),
            Err(StorageError::AlreadyExists(_)) => {
                warn!(segment, chunk = name, "Overwriting orphaned chunk");
                self.driver.replace(name, data).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_chunks_quietly(&self, segment: &str, chunks: &[RollingChunk]) {
        for chunk in chunks {
            if let Err(e) = self
                .driver
                .delete(&ChunkHandle::writable(chunk.name.clone()))
                .await
            {
                warn!(segment, chunk = %chunk.name, "Failed to delete chunk: {}", e);
            }
        }
    }

    async fn create_async(&self, segment: &str, policy: SegmentRollingPolicy) -> Result<SegmentHandle> {
        let header = header_name(segment);
        if self.driver.exists(&header).await? {
            return Err(StorageError::AlreadyExists(segment.to_string()));
        }
        let content = encode_records(&[HeaderRecord::Policy {
            max_length: policy.max_length,
        }])?;
        self.driver
            .create_with_content(&header, Bytes::from(content))
            .await?;
        debug!(segment, max_length = policy.max_length, "Created rolling segment");
        Ok(SegmentHandle::writable(segment))
    }

    async fn read_async(&self, handle: &SegmentHandle, offset: u64, length: usize) -> Result<Bytes> {
        let state = self.load_state(&handle.segment_name).await?;
        let segment_length = state.length();

        if offset < state.start_offset {
            return Err(StorageError::InvalidArgument(format!(
                "Offset {} of {} is below truncation offset {}",
                offset, state.name, state.start_offset
            )));
        }
        let end = offset.saturating_add(length as u64);
        if end > segment_length {
            return Err(StorageError::InvalidArgument(format!(
                "Read of {}..{} past end of {} ({} bytes)",
                offset, end, state.name, segment_length
            )));
        }

        let mut buffer = BytesMut::with_capacity(length);
        for chunk in &state.chunks {
            if chunk.end_offset() <= offset || chunk.start_offset >= end {
                continue;
            }
            let from = offset.max(chunk.start_offset);
            let to = end.min(chunk.end_offset());
            let data = self
                .driver
                .read(
                    &ChunkHandle::read_only(chunk.name.clone()),
                    from - chunk.start_offset,
                    (to - from) as usize,
                )
                .await?;
            buffer.extend_from_slice(&data);
        }
        Ok(buffer.freeze())
    }

    async fn write_async(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let mut state = self.load_state(&handle.segment_name).await?;

        if state.sealed {
            return Err(StorageError::Sealed(state.name));
        }
        let mut current = state.length();
        if offset != current {
            return Err(StorageError::BadOffset {
                name: state.name,
                expected: current,
                given: offset,
            });
        }

        let max_length = state.policy.max_length;
        let mut remaining = data;

        if self.driver.supports_append() {
            if let Some(last) = state.chunks.last() {
                let room = max_length.saturating_sub(last.length);
                if room > 0 && !remaining.is_empty() {
                    let take = room.min(remaining.len() as u64) as usize;
                    let part = remaining.split_to(take);
                    self.driver
                        .write(&ChunkHandle::writable(last.name.clone()), last.length, part)
                        .await?;
                    current += take as u64;
                }
            }
        }

        let mut records = Vec::new();
        while !remaining.is_empty() {
            let take = max_length.min(remaining.len() as u64) as usize;
            let part = remaining.split_to(take);
            let name = chunk_name(&state.name, current);
            self.create_data_chunk(&state.name, &name, part).await?;
            records.push(HeaderRecord::Chunk {
                name,
                offset: current,
            });
            current += take as u64;
        }

        self.append_header(&mut state, &records).await
    }

    async fn seal_async(&self, handle: &SegmentHandle) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let mut state = self.load_state(&handle.segment_name).await?;
        if state.sealed {
            return Ok(());
        }
        self.append_header(&mut state, &[HeaderRecord::Sealed]).await?;
        debug!(segment = %handle.segment_name, "Sealed rolling segment");
        Ok(())
    }

    async fn concat_async(&self, target: &SegmentHandle, offset: u64, source: &str) -> Result<()> {
        Self::check_writable(target)?;
        let _guards = self.locks.lock_pair(&target.segment_name, source).await;

        let mut target_state = self.load_state(&target.segment_name).await?;
        let source_state = self.load_state(source).await?;

        if target_state.sealed {
            return Err(StorageError::Sealed(target_state.name));
        }
        if !source_state.sealed {
            return Err(StorageError::InvalidArgument(format!(
                "Concat source {} is not sealed",
                source
            )));
        }
        if source_state.start_offset != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "Concat source {} is truncated",
                source
            )));
        }
        let target_length = target_state.length();
        if offset != target_length {
            return Err(StorageError::BadOffset {
                name: target_state.name,
                expected: target_length,
                given: offset,
            });
        }

        let records: Vec<HeaderRecord> = source_state
            .chunks
            .iter()
            .filter(|c| c.length > 0)
            .map(|c| HeaderRecord::Chunk {
                name: c.name.clone(),
                offset: target_length + c.start_offset,
            })
            .collect();
        self.append_header(&mut target_state, &records).await?;
        self.driver
            .delete(&ChunkHandle::writable(header_name(source)))
            .await?;
        debug!(
            target = %target.segment_name,
            source,
            chunks = records.len(),
            "Concatenated rolling segment"
        );
        Ok(())
    }

    async fn delete_async(&self, handle: &SegmentHandle) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let state = self.load_state(&handle.segment_name).await?;

        self.driver
            .delete(&ChunkHandle::writable(header_name(&state.name)))
            .await?;
        self.delete_chunks_quietly(&state.name, &state.chunks).await;
        debug!(segment = %state.name, "Deleted rolling segment");
        Ok(())
    }

    async fn truncate_async(&self, handle: &SegmentHandle, offset: u64) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let mut state = self.load_state(&handle.segment_name).await?;

        let length = state.length();
        if offset > length {
            return Err(StorageError::BadOffset {
                name: state.name,
                expected: length,
                given: offset,
            });
        }
        if offset <= state.start_offset {
            return Ok(());
        }

        self.append_header(&mut state, &[HeaderRecord::Truncated { offset }])
            .await?;

        let last = state.chunks.len().saturating_sub(1);
        let dropped: Vec<RollingChunk> = state
            .chunks
            .iter()
            .enumerate()
            .filter(|(i, c)| *i < last && c.end_offset() <= offset)
            .map(|(_, c)| c.clone())
            .collect();
        self.delete_chunks_quietly(&state.name, &dropped).await;
        Ok(())
    }
}

impl SyncStorage for RollingStorage {
    fn initialize(&self, epoch: u64) -> Result<()> {
        self.epoch.store(epoch, Ordering::SeqCst);
        Ok(())
    }

    fn create(&self, segment: &str, policy: SegmentRollingPolicy) -> Result<SegmentHandle> {
        self.executor.block_on(self.create_async(segment, policy))
    }

    fn open_write(&self, segment: &str) -> Result<SegmentHandle> {
        self.executor.block_on(self.load_state(segment))?;
        Ok(SegmentHandle::writable(segment))
    }

    fn open_read(&self, segment: &str) -> Result<SegmentHandle> {
        self.executor.block_on(self.load_state(segment))?;
        Ok(SegmentHandle::read_only(segment))
    }

    fn read(&self, handle: &SegmentHandle, offset: u64, length: usize) -> Result<Bytes> {
        self.executor.block_on(self.read_async(handle, offset, length))
    }

    fn write(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> Result<()> {
        self.executor.block_on(self.write_async(handle, offset, data))
    }

    fn get_info(&self, segment: &str) -> Result<SegmentProperties> {
        Ok(self.executor.block_on(self.load_state(segment))?.properties())
    }

    fn exists(&self, segment: &str) -> Result<bool> {
        self.executor.block_on(self.driver.exists(&header_name(segment)))
    }

    fn seal(&self, handle: &SegmentHandle) -> Result<()> {
        self.executor.block_on(self.seal_async(handle))
    }

    fn concat(&self, target: &SegmentHandle, offset: u64, source: &str) -> Result<()> {
        self.executor.block_on(self.concat_async(target, offset, source))
    }

    fn delete(&self, handle: &SegmentHandle) -> Result<()> {
        self.executor.block_on(self.delete_async(handle))
    }

    fn truncate(&self, handle: &SegmentHandle, offset: u64) -> Result<()> {
        self.executor.block_on(self.truncate_async(handle, offset))
    }

    fn supports_truncation(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for RollingStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingStorage")
            .field("driver", &self.driver.driver_name())
            .field("epoch", &self.epoch())
            .finish()
    }
}
