//! Append-only arena of fixed-capacity output chunks.

/// Capacity of every chunk: two 8 KiB I/O buffer units.
pub const CHUNK_CAPACITY: usize = 2 * 8192;

/// One fixed-capacity block of captured bytes.
#[derive(Debug)]
pub struct OutputChunk {
    data: Box<[u8]>,
    len: usize,
}

impl OutputChunk {
    fn new() -> Self {
        Self {
            data: vec![0u8; CHUNK_CAPACITY].into_boxed_slice(),
            len: 0,
        }
    }

    /// Bytes written into this chunk so far.
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Remaining writable capacity.
    #[must_use]
    pub fn remaining(&self) -> usize {
        CHUNK_CAPACITY - self.len
    }

    /// Whether the chunk has no remaining capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == CHUNK_CAPACITY
    }
}

/// Ordered list of [`OutputChunk`]s scoped to one worker's output.
///
/// Chunks are only ever appended; written bytes are never overwritten and
/// the arena never shrinks while it is alive. A chunk joins the list only
/// once bytes were committed into it.
#[derive(Debug)]
pub struct ChunkArena {
    chunks: Vec<OutputChunk>,
    reserve: Option<OutputChunk>,
    total: usize,
}

impl Default for ChunkArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkArena {
    /// Create an arena holding one empty chunk.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: vec![OutputChunk::new()],
            reserve: None,
            total: 0,
        }
    }

    /// Writable tail of the active chunk. When the active chunk is full
    /// this is a reserve chunk that is appended by the next non-empty
    /// [`commit`](Self::commit).
    pub fn spare(&mut self) -> &mut [u8] {
        let last = self.chunks.len() - 1;
        if self.chunks[last].is_full() {
            let reserve = self.reserve.get_or_insert_with(OutputChunk::new);
            return &mut reserve.data[..];
        }
        let active = &mut self.chunks[last];
        let start = active.len;
        &mut active.data[start..]
    }

    /// Advance the active chunk's cursor after `n` bytes were written into
    /// [`spare`](Self::spare).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the active chunk's remaining capacity.
    pub fn commit(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if self.active().is_full() {
            let chunk = self.reserve.take().unwrap_or_else(OutputChunk::new);
            self.chunks.push(chunk);
        }
        let active = self.active_mut();
        assert!(n <= active.remaining(), "commit beyond chunk capacity");
        active.len += n;
        self.total += n;
    }

    /// Total bytes captured across all chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.total
    }

    /// Whether nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of chunks allocated.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Iterate over the chunks in capture order.
    pub fn chunks(&self) -> impl Iterator<Item = &OutputChunk> {
        self.chunks.iter()
    }

    /// Copy up to `max` bytes starting at absolute offset `from`.
    #[must_use]
    pub fn copy_range(&self, from: usize, max: usize) -> Vec<u8> {
        let end = self.total.min(from.saturating_add(max));
        let mut out = Vec::with_capacity(end.saturating_sub(from));
        let mut offset = 0;
        for chunk in &self.chunks {
            let filled = chunk.filled();
            let chunk_end = offset + filled.len();
            if chunk_end > from && offset < end {
                let lo = from.saturating_sub(offset);
                let hi = (end - offset).min(filled.len());
                out.extend_from_slice(&filled[lo..hi]);
            }
            if chunk_end >= end {
                break;
            }
            offset = chunk_end;
        }
        out
    }

    fn active(&self) -> &OutputChunk {
        // The arena is created with one chunk and never shrinks.
        &self.chunks[self.chunks.len() - 1]
    }

    fn active_mut(&mut self) -> &mut OutputChunk {
        let last = self.chunks.len() - 1;
        &mut self.chunks[last]
    }
}
