//! Memory management utilities
//!
//! [`FrameHeap`] is the chunked arena each perspective allocates its per-frame
//! transient data from. Allocations are handed out as [`HeapSlice`] handles
//! rather than references, so the heap can keep growing while earlier
//! allocations stay addressable. Handles die with the next [`FrameHeap::free`].

/// Default size of the first heap chunk in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Alignment every allocation is rounded up to
pub const HEAP_ALIGNMENT: usize = 16;

const fn align_up(value: usize) -> usize {
    (value + HEAP_ALIGNMENT - 1) & !(HEAP_ALIGNMENT - 1)
}

/// Handle to a block of bytes allocated from a [`FrameHeap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapSlice {
    chunk: u32,
    offset: u32,
    len: u32,
    generation: u32,
}

impl HeapSlice {
    /// Size of the allocation in bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the allocation is zero-sized
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
struct Chunk {
    data: Vec<u8>,
    used: usize,
}

impl Chunk {
    fn with_size(size: usize) -> Self {
        Self {
            data: vec![0; size],
            used: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.used
    }
}

/// Chunked per-frame arena
///
/// Freeing keeps the first chunk and grows it to the largest amount ever
/// allocated in one cycle, so a steady-state frame runs out of one chunk.
#[derive(Debug)]
pub struct FrameHeap {
    chunks: Vec<Chunk>,
    chunk_size: usize,
    watermark: usize,
    generation: u32,
}

impl FrameHeap {
    /// Create a heap whose chunks hold at least `chunk_size` bytes
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = align_up(chunk_size.max(HEAP_ALIGNMENT));
        Self {
            chunks: vec![Chunk::with_size(chunk_size)],
            chunk_size,
            watermark: 0,
            generation: 0,
        }
    }

    /// Allocate `size` zeroed bytes, growing the heap by a chunk if needed
    pub fn allocate(&mut self, size: usize) -> HeapSlice {
        let reserved = align_up(size);

        let fits = self
            .chunks
            .last()
            .is_some_and(|chunk| chunk.remaining() >= reserved);
        if !fits {
            let chunk_size = self.chunk_size.max(reserved);
            log::trace!(
                "Frame heap growing by {} bytes (chunk {})",
                chunk_size,
                self.chunks.len()
            );
            self.chunks.push(Chunk::with_size(chunk_size));
        }

        let chunk_index = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_index];
        let offset = chunk.used;
        chunk.data[offset..offset + size].fill(0);
        chunk.used += reserved;

        HeapSlice {
            chunk: chunk_index as u32,
            offset: offset as u32,
            len: size as u32,
            generation: self.generation,
        }
    }

    /// Allocate a copy of `bytes`
    pub fn allocate_from(&mut self, bytes: &[u8]) -> HeapSlice {
        let slice = self.allocate(bytes.len());
        if let Some(target) = self.bytes_mut(slice) {
            target.copy_from_slice(bytes);
        }
        slice
    }

    /// Resolve a handle, `None` if it was allocated before the last free
    pub fn bytes(&self, slice: HeapSlice) -> Option<&[u8]> {
        if slice.generation != self.generation {
            return None;
        }
        let start = slice.offset as usize;
        self.chunks
            .get(slice.chunk as usize)?
            .data
            .get(start..start + slice.len as usize)
    }

    /// Resolve a handle mutably, `None` if it was allocated before the last free
    pub fn bytes_mut(&mut self, slice: HeapSlice) -> Option<&mut [u8]> {
        if slice.generation != self.generation {
            return None;
        }
        let start = slice.offset as usize;
        self.chunks
            .get_mut(slice.chunk as usize)?
            .data
            .get_mut(start..start + slice.len as usize)
    }

    /// Release every allocation
    ///
    /// Keeps the first chunk, sized to the high-watermark. Every outstanding
    /// [`HeapSlice`] is invalidated.
    pub fn free(&mut self) {
        self.watermark = self.watermark.max(self.allocated());

        self.chunks.truncate(1);
        if let Some(first) = self.chunks.first_mut() {
            if first.data.len() < self.watermark {
                first.data.resize(self.watermark, 0);
            }
            first.used = 0;
        } else {
            self.chunks.push(Chunk::with_size(self.chunk_size.max(self.watermark)));
        }

        self.generation = self.generation.wrapping_add(1);
    }

    /// Bytes currently reserved by allocations, including alignment padding
    pub fn allocated(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.used).sum()
    }

    /// Largest number of bytes ever allocated in one cycle
    pub fn watermark(&self) -> usize {
        self.watermark.max(self.allocated())
    }

    /// Number of chunks currently held
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total capacity of all chunks in bytes
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.data.len()).sum()
    }
}

impl Default for FrameHeap {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
