//! Fixed-size chunks of a track stream.
//!
//! The service transmits audio as a sequence of 2 KiB chunks. All chunks
//! but the last have exactly [`CHUNK_SIZE`] bytes; the last one may be
//! shorter. Chunk indices start at 0 and increase by one.

use std::fmt;

/// Size of each chunk in bytes (2 KiB).
pub const CHUNK_SIZE: usize = 2 * 1024;

/// One chunk of a track stream.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Chunk {
    /// Position of this chunk in the stream, starting at 0.
    pub index: u64,

    /// Chunk contents; [`CHUNK_SIZE`] bytes unless this is the final chunk.
    pub data: Vec<u8>,

    /// Whether no chunks follow this one.
    pub is_final: bool,
}

impl Chunk {
    #[must_use]
    pub fn new(index: u64, data: Vec<u8>, is_final: bool) -> Self {
        Self {
            index,
            data,
            is_final,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte offset of the first byte of this chunk in the stream.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.index * CHUNK_SIZE as u64
    }
}

/// Chunk contents are audio; only show their shape.
impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("index", &self.index)
            .field("len", &self.data.len())
            .field("is_final", &self.is_final)
            .finish()
    }
}

/// Re-chunks arbitrarily sized body pieces into [`Chunk`]s.
///
/// Network reads do not respect chunk boundaries. The chunker buffers
/// incoming bytes and emits a chunk only once it knows whether more data
/// follows, so that the final chunk is flagged correctly even when the
/// stream length is an exact multiple of [`CHUNK_SIZE`].
#[derive(Debug, Default)]
pub struct Chunker {
    next_index: u64,
    buffer: Vec<u8>,
}

impl Chunker {
    /// Creates a chunker whose first chunk gets index `start_index`.
    #[must_use]
    pub fn new(start_index: u64) -> Self {
        Self {
            next_index: start_index,
            buffer: Vec::with_capacity(2 * CHUNK_SIZE),
        }
    }

    /// Appends a body piece and returns every chunk that is now complete.
    pub fn push(&mut self, piece: &[u8]) -> Vec<Chunk> {
        self.buffer.extend_from_slice(piece);

        // Keep at least one byte back: a full chunk is only known to be
        // non-final once a byte beyond it has arrived.
        let mut chunks = Vec::new();
        let mut consumed = 0;
        while self.buffer.len() - consumed > CHUNK_SIZE {
            let data = self.buffer[consumed..consumed + CHUNK_SIZE].to_vec();
            chunks.push(Chunk::new(self.next_index, data, false));
            self.next_index += 1;
            consumed += CHUNK_SIZE;
        }
        self.buffer.drain(..consumed);

        chunks
    }

    /// Flushes the remaining bytes as the final chunk.
    ///
    /// Returns `None` when the stream carried no bytes after the last
    /// emitted chunk.
    #[must_use]
    pub fn finish(self) -> Option<Chunk> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(Chunk::new(self.next_index, self.buffer, true))
    }

    /// Index the next emitted chunk will get.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}
