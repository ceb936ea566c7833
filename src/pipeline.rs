//! Fetch, decrypt and assemble one track stream.

use futures_util::StreamExt;
use tokio::{io::AsyncWrite, sync::watch};
use tokio_util::sync::CancellationToken;

use crate::{
    assemble::Assembler,
    decrypt::Decryptor,
    error::{Error, Result},
    fetch::{ChunkFetcher, Source},
};

/// Outcome of a completed run.
#[derive(Debug)]
pub struct Assembled<W> {
    pub sink: W,

    /// Number of chunks in the sink, including any resumed prefix.
    pub chunks: u64,

    /// Number of bytes in the sink, including any resumed prefix.
    pub bytes: u64,
}

/// How far a run has got.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Progress {
    /// Chunks in the sink, including any resumed prefix
    pub chunks: u64,

    /// Bytes in the sink, including any resumed prefix
    pub bytes: u64,

    /// Length of the whole stream, if known
    pub total: Option<u64>,
}

impl Progress {
    /// Completion in whole percent, if the total is known.
    #[must_use]
    pub fn percent(&self) -> Option<u64> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some(self.bytes.min(total) * 100 / total),
            None => None,
        }
    }
}

/// Runs chunks from `fetcher` through `decryptor` into `assembler`.
///
/// Fetching runs ahead on its own task while the current chunk is
/// decrypted and written. Without a decryptor, chunks pass through
/// unchanged.
///
/// Cancelling `cancel` stops the run at the next chunk boundary and drops
/// all outstanding requests. A chunk that is being written when `cancel`
/// fires is written in full, so the sink holds exactly the bytes that the
/// `Incomplete` detail reports.
///
/// # Errors
///
/// * `Cancelled` with an `Incomplete` detail if `cancel` fired first
/// * `TransportFailure` if the stream broke off or its length disagrees
///   with the advertised content length
/// * any decryption or assembly error
pub async fn run<S, W>(
    fetcher: ChunkFetcher<S>,
    decryptor: Option<&Decryptor>,
    assembler: Assembler<W>,
    cancel: &CancellationToken,
) -> Result<Assembled<W>>
where
    S: Source,
    W: AsyncWrite + Unpin,
{
    let (progress, _) = watch::channel(Progress::default());
    run_with_progress(fetcher, decryptor, assembler, cancel, &progress).await
}

/// As [`run`], publishing [`Progress`] on `progress` before the first
/// chunk and after every chunk written.
///
/// # Errors
///
/// See [`run`].
pub async fn run_with_progress<S, W>(
    fetcher: ChunkFetcher<S>,
    decryptor: Option<&Decryptor>,
    mut assembler: Assembler<W>,
    cancel: &CancellationToken,
    progress: &watch::Sender<Progress>,
) -> Result<Assembled<W>>
where
    S: Source,
    W: AsyncWrite + Unpin,
{
    let expected = fetcher.content_length();
    let publish = |assembler: &Assembler<W>| {
        progress.send_replace(Progress {
            chunks: assembler.next_index(),
            bytes: assembler.bytes_written(),
            total: expected,
        });
    };

    publish(&assembler);
    let mut chunks = fetcher.spawn();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            next = chunks.next() => Some(next),
        };

        let chunk = match next {
            None => return Err(incomplete(&assembler)),
            Some(None) => break,
            Some(Some(chunk)) => chunk?,
        };

        let chunk = match decryptor {
            Some(decryptor) => decryptor.process(chunk)?,
            None => chunk,
        };

        // Not raced against `cancel`: a chunk is written whole or not at all.
        assembler.push(chunk).await?;
        publish(&assembler);
    }

    // Stop fetching before reporting the outcome.
    drop(chunks);

    let bytes = assembler.bytes_written();
    if let Some(length) = expected {
        if bytes != length {
            return Err(Error::transport_failure(
                assembler.next_index().checked_sub(1),
                format!("assembled {bytes} bytes of a {length} byte stream"),
            ));
        }
    }

    let chunks = assembler.next_index();
    let sink = assembler.finish().await?;
    debug!("assembled {chunks} chunks ({bytes} bytes)");

    Ok(Assembled {
        sink,
        chunks,
        bytes,
    })
}

fn incomplete<W>(assembler: &Assembler<W>) -> Error
where
    W: AsyncWrite + Unpin,
{
    let chunks = assembler.next_index();
    let bytes = assembler.bytes_written();
    info!("download cancelled after {chunks} chunks ({bytes} bytes)");
    Error::incomplete(chunks, bytes)
}
