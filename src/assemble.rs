//! Writing decrypted chunks to their destination.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    chunk::{Chunk, CHUNK_SIZE},
    error::{Error, OrderingViolation, Result},
};

/// Writes chunks to a sink in strict index order.
///
/// The chunk at index `i` lands at byte offset `i * CHUNK_SIZE`. Any chunk
/// that arrives out of sequence is refused with an `OrderingViolation`,
/// nothing of it is written, and the assembler refuses all further input.
#[derive(Debug)]
pub struct Assembler<W> {
    sink: W,
    next_index: u64,
    offset: u64,
    final_index: Option<u64>,
    poisoned: bool,
}

impl<W: AsyncWrite + Unpin> Assembler<W> {
    #[must_use]
    pub fn new(sink: W) -> Self {
        Self::resume(sink, 0)
    }

    /// Creates an assembler that continues a partial download whose first
    /// `next_index` chunks are already in `sink`.
    #[must_use]
    pub fn resume(sink: W, next_index: u64) -> Self {
        Self {
            sink,
            next_index,
            offset: next_index * CHUNK_SIZE as u64,
            final_index: None,
            poisoned: false,
        }
    }

    /// Appends a chunk.
    ///
    /// # Errors
    ///
    /// * `OrderingViolation` if the chunk is not the next one expected, or
    ///   arrives after the final chunk
    /// * `Internal` if a chunk before the final one is short, or an earlier
    ///   call already failed
    /// * any error writing to the sink
    pub async fn push(&mut self, chunk: Chunk) -> Result<()> {
        if self.poisoned {
            return Err(Error::internal(format!(
                "chunk {} refused after an earlier failure",
                chunk.index
            )));
        }

        if let Some(last) = self.final_index {
            self.poisoned = true;
            return Err(Error::ordering_violation(OrderingViolation::AfterFinal {
                last,
                received: chunk.index,
            }));
        }

        if chunk.index != self.next_index {
            self.poisoned = true;
            return Err(Error::ordering_violation(OrderingViolation::OutOfSequence {
                expected: self.next_index,
                received: chunk.index,
            }));
        }

        if !chunk.is_final && chunk.len() != CHUNK_SIZE {
            self.poisoned = true;
            return Err(Error::internal(format!(
                "chunk {} has {} bytes but is not the final chunk",
                chunk.index,
                chunk.len()
            )));
        }

        if let Err(e) = self.sink.write_all(&chunk.data).await {
            self.poisoned = true;
            return Err(e.into());
        }

        trace!("wrote chunk {} at offset {}", chunk.index, self.offset);
        self.offset += chunk.len() as u64;
        self.next_index += 1;
        if chunk.is_final {
            self.final_index = Some(chunk.index);
        }

        Ok(())
    }

    /// Index of the next chunk expected.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Number of bytes in the sink, including any resumed prefix.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Whether the final chunk has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.final_index.is_some()
    }

    /// Flushes the sink and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if an earlier chunk was refused or flushing fails.
    pub async fn finish(mut self) -> Result<W> {
        if self.poisoned {
            return Err(Error::internal("assembly failed earlier"));
        }

        self.sink.flush().await?;
        Ok(self.sink)
    }

    /// Returns the sink without checks, holding whatever was written so
    /// far.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn chunk(index: u64, is_final: bool) -> Chunk {
        let len = if is_final { 100 } else { CHUNK_SIZE };
        Chunk::new(index, vec![u8::try_from(index).unwrap(); len], is_final)
    }

    #[tokio::test]
    async fn writes_chunks_at_their_offsets() {
        let mut assembler = Assembler::new(Vec::new());
        for i in 0..3 {
            assembler.push(chunk(i, false)).await.unwrap();
        }
        assembler.push(chunk(3, true)).await.unwrap();
        assert!(assembler.is_complete());
        assert_eq!(assembler.bytes_written(), 3 * CHUNK_SIZE as u64 + 100);

        let output = assembler.finish().await.unwrap();
        assert_eq!(output.len(), 3 * CHUNK_SIZE + 100);
        for i in 0..4u8 {
            assert_eq!(output[usize::from(i) * CHUNK_SIZE], i);
        }
    }

    #[tokio::test]
    async fn out_of_sequence_chunk_is_refused_and_not_written() {
        let mut assembler = Assembler::new(Vec::new());
        assembler.push(chunk(0, false)).await.unwrap();

        let err = assembler.push(chunk(2, false)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(
            err.downcast::<OrderingViolation>(),
            Some(&OrderingViolation::OutOfSequence {
                expected: 1,
                received: 2
            })
        );
        assert_eq!(assembler.bytes_written(), CHUNK_SIZE as u64);

        // Poisoned from here on, even for the chunk that was expected.
        assert!(assembler.push(chunk(1, false)).await.is_err());
        assert!(assembler.finish().await.is_err());
    }

    #[tokio::test]
    async fn duplicate_chunk_is_refused() {
        let mut assembler = Assembler::new(Vec::new());
        assembler.push(chunk(0, false)).await.unwrap();
        let err = assembler.push(chunk(0, false)).await.unwrap_err();
        assert!(err.downcast::<OrderingViolation>().is_some());
    }

    #[tokio::test]
    async fn chunk_after_final_is_refused() {
        let mut assembler = Assembler::new(Vec::new());
        assembler.push(chunk(0, true)).await.unwrap();

        let err = assembler.push(chunk(1, false)).await.unwrap_err();
        assert_eq!(
            err.downcast::<OrderingViolation>(),
            Some(&OrderingViolation::AfterFinal {
                last: 0,
                received: 1
            })
        );
        assert_eq!(assembler.into_inner().len(), 100);
    }

    #[tokio::test]
    async fn short_chunk_before_the_end_is_refused() {
        let mut assembler = Assembler::new(Vec::new());
        let err = assembler
            .push(Chunk::new(0, vec![0; 10], false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn resumed_assembler_expects_the_next_chunk() {
        let mut assembler = Assembler::resume(vec![0; 2 * CHUNK_SIZE], 2);
        assert_eq!(assembler.bytes_written(), 2 * CHUNK_SIZE as u64);
        assert!(assembler.push(chunk(0, false)).await.is_err());

        let mut assembler = Assembler::resume(vec![0; 2 * CHUNK_SIZE], 2);
        assembler.push(chunk(2, true)).await.unwrap();
        assert_eq!(assembler.finish().await.unwrap().len(), 2 * CHUNK_SIZE + 100);
    }
}
