//! Fetching track streams as ordered chunks.
//!
//! A [`ChunkFetcher`] reads a [`Source`] and hands out [`Chunk`]s in strict
//! index order through a bounded queue. It runs on its own task so that
//! network reads overlap with decryption and writing downstream. When the
//! queue is full the fetcher waits, which bounds memory use no matter how
//! slow the consumer is.
//!
//! Two modes are supported:
//!
//! * [`FetchMode::Sequential`] streams the body over one connection and
//!   re-chunks it.
//! * [`FetchMode::Concurrent`] splits the stream into segments that are
//!   requested in parallel with HTTP ranges. Segments are delivered in
//!   order regardless of which request finishes first.
//!
//! A network failure ends the stream with a single `TransportFailure`
//! carrying the index of the last chunk handed out, so that callers can
//! resume from the next one.

use std::{
    future::Future,
    num::NonZeroUsize,
    ops::Range,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use futures_util::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use reqwest::{header::RANGE, StatusCode};
use tokio::{sync::mpsc, task::JoinHandle};
use url::Url;

use crate::{
    chunk::{Chunk, Chunker, CHUNK_SIZE},
    error::{Error, Result},
};

/// Stream of body pieces of arbitrary size.
pub type Body = BoxStream<'static, Result<Vec<u8>>>;

/// Where the bytes of a track stream come from.
pub trait Source: Send + Sync + 'static {
    /// Total length of the stream in bytes, if known.
    fn content_length(&self) -> Option<u64>;

    /// Streams the body from `offset` to the end.
    fn body(&self, offset: u64) -> impl Future<Output = Result<Body>> + Send;

    /// Reads the bytes in `range`.
    fn range(&self, range: Range<u64>) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// How chunks are fetched.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FetchMode {
    /// Read the body over a single connection.
    Sequential,

    /// Read segments of `segment_chunks` chunks over up to `workers`
    /// parallel range requests.
    Concurrent {
        workers: NonZeroUsize,
        segment_chunks: NonZeroUsize,
    },
}

impl FetchMode {
    /// Concurrent fetching with `workers` requests of 64 chunks each.
    #[must_use]
    pub fn concurrent(workers: NonZeroUsize) -> Self {
        Self::Concurrent {
            workers,
            segment_chunks: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl Default for FetchMode {
    fn default() -> Self {
        Self::concurrent(NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FetchSettings {
    pub mode: FetchMode,

    /// Maximum number of chunks waiting for the consumer.
    pub queue_depth: NonZeroUsize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            mode: FetchMode::default(),
            queue_depth: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Fetches a [`Source`] as a sequence of chunks.
pub struct ChunkFetcher<S> {
    source: Arc<S>,
    settings: FetchSettings,
    start_index: u64,
}

impl<S: Source> ChunkFetcher<S> {
    #[must_use]
    pub fn new(source: S, settings: FetchSettings) -> Self {
        Self {
            source: Arc::new(source),
            settings,
            start_index: 0,
        }
    }

    /// Starts fetching at chunk `index` instead of the beginning.
    #[must_use]
    pub fn start_at(mut self, index: u64) -> Self {
        self.start_index = index;
        self
    }

    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.source.content_length()
    }

    /// Spawns the fetch task and returns the stream of chunks it produces.
    ///
    /// Dropping the returned stream stops the task and any requests it has
    /// in flight.
    #[must_use]
    pub fn spawn(self) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.settings.queue_depth.get());
        let task = tokio::spawn(produce(
            self.source,
            self.settings.mode,
            self.start_index,
            tx,
        ));

        ChunkStream { rx, task }
    }
}

/// Chunks in index order, as produced by a [`ChunkFetcher`].
///
/// Ends after the final chunk, or after a single error.
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<Chunk>>,
    task: JoinHandle<()>,
}

impl Stream for ChunkStream {
    type Item = Result<Chunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Hands out chunks and remembers the last one delivered.
struct Emitter {
    tx: mpsc::Sender<Result<Chunk>>,
    last_good_index: Option<u64>,
}

impl Emitter {
    /// Queues a chunk, waiting while the queue is full. Returns `false`
    /// once the consumer has gone away.
    async fn emit(&mut self, chunk: Chunk) -> bool {
        let index = chunk.index;
        if self.tx.send(Ok(chunk)).await.is_err() {
            return false;
        }
        self.last_good_index = Some(index);
        true
    }

    async fn fail(self, error: Error) {
        let error = if error.is_authentication_rejected() {
            error
        } else {
            Error::transport_failure(self.last_good_index, error)
        };
        let _ = self.tx.send(Err(error)).await;
    }
}

async fn produce<S: Source>(
    source: Arc<S>,
    mode: FetchMode,
    start_index: u64,
    tx: mpsc::Sender<Result<Chunk>>,
) {
    let mut emitter = Emitter {
        tx,
        last_good_index: start_index.checked_sub(1),
    };

    let result = match (mode, source.content_length()) {
        (
            FetchMode::Concurrent {
                workers,
                segment_chunks,
            },
            Some(length),
        ) => {
            concurrent(
                &source,
                length,
                start_index,
                workers,
                segment_chunks,
                &mut emitter,
            )
            .await
        }
        (FetchMode::Concurrent { .. }, None) => {
            debug!("content length unknown, fetching sequentially");
            sequential(&*source, start_index, &mut emitter).await
        }
        (FetchMode::Sequential, _) => sequential(&*source, start_index, &mut emitter).await,
    };

    if let Err(e) = result {
        error!("fetching chunks failed: {e}");
        emitter.fail(e).await;
    }
}

async fn sequential<S: Source>(source: &S, start_index: u64, emitter: &mut Emitter) -> Result<()> {
    let start = start_index * CHUNK_SIZE as u64;
    let expected = source.content_length();

    let mut body = source.body(start).await?;
    let mut chunker = Chunker::new(start_index);
    let mut position = start;

    while let Some(piece) = body.next().await {
        let piece = piece?;
        position += piece.len() as u64;
        if let Some(length) = expected {
            if position > length {
                return Err(Error::data_loss(format!(
                    "stream exceeds its content length of {length} bytes"
                )));
            }
        }

        for chunk in chunker.push(&piece) {
            if !emitter.emit(chunk).await {
                return Ok(());
            }
        }
    }

    if let Some(length) = expected {
        if position < length {
            return Err(Error::data_loss(format!(
                "stream ended at byte {position} of {length}"
            )));
        }
    }

    if let Some(chunk) = chunker.finish() {
        emitter.emit(chunk).await;
    }

    Ok(())
}

async fn concurrent<S: Source>(
    source: &Arc<S>,
    length: u64,
    start_index: u64,
    workers: NonZeroUsize,
    segment_chunks: NonZeroUsize,
    emitter: &mut Emitter,
) -> Result<()> {
    let start = start_index * CHUNK_SIZE as u64;
    if start > length {
        return Err(Error::out_of_range(format!(
            "chunk {start_index} starts beyond the end of the stream at byte {length}"
        )));
    }

    let segment_size = (segment_chunks.get() * CHUNK_SIZE) as u64;
    let ranges = (start..length)
        .step_by(segment_size.try_into().unwrap_or(usize::MAX))
        .map(move |offset| offset..u64::min(offset + segment_size, length));

    // `buffered` runs up to `workers` requests at once but yields their
    // results in the order the ranges were queued.
    let mut segments = stream::iter(ranges)
        .map(|range| {
            let source = Arc::clone(source);
            async move {
                let data = source.range(range.clone()).await?;
                let expected = range.end - range.start;
                if data.len() as u64 != expected {
                    return Err(Error::data_loss(format!(
                        "range {range:?} returned {} of {expected} bytes",
                        data.len()
                    )));
                }
                Ok((range, data))
            }
        })
        .buffered(workers.get());

    while let Some(segment) = segments.next().await {
        let (range, data) = segment?;
        let first_index = range.start / CHUNK_SIZE as u64;
        let count = data.len().div_ceil(CHUNK_SIZE);

        for (i, piece) in data.chunks(CHUNK_SIZE).enumerate() {
            let is_final = range.end == length && i + 1 == count;
            let chunk = Chunk::new(first_index + i as u64, piece.to_vec(), is_final);
            if !emitter.emit(chunk).await {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// A track stream on a CDN.
///
/// Opening the source issues a `GET` for the whole body. Sequential reads
/// from the start consume that response; any other read uses a ranged
/// request.
pub struct HttpSource {
    client: reqwest::Client,
    url: Url,
    content_length: Option<u64>,
    response: Mutex<Option<reqwest::Response>>,
}

impl HttpSource {
    /// Requests `url` and reads the response headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server responds with
    /// an error status. The CDN is not sent the session credential, so a
    /// refusal is `PermissionDenied` and a missing stream is `NotFound`.
    pub async fn open(client: reqwest::Client, url: Url) -> Result<Self> {
        let response = client.get(url.clone()).send().await?.error_for_status()?;
        let content_length = response.content_length();
        debug!(
            "opened stream on {} ({} bytes)",
            url.host_str().unwrap_or("unknown host"),
            content_length.map_or_else(|| "unknown".to_string(), |len| len.to_string())
        );

        Ok(Self {
            client,
            url,
            content_length,
            response: Mutex::new(Some(response)),
        })
    }

    fn take_response(&self) -> Option<reqwest::Response> {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn ranged(&self, range: &str) -> Result<reqwest::Response> {
        // Release the initial connection before opening new ones.
        drop(self.take_response());

        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, range)
            .send()
            .await?
            .error_for_status()?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(Error::unimplemented(format!(
                "server ignored range {range} (status {})",
                response.status()
            )));
        }

        Ok(response)
    }
}

impl Source for HttpSource {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn body(&self, offset: u64) -> Result<Body> {
        let response = match self.take_response() {
            Some(response) if offset == 0 => response,
            _ => self.ranged(&format!("bytes={offset}-")).await?,
        };

        Ok(response
            .bytes_stream()
            .map(|piece| piece.map(|bytes| bytes.to_vec()).map_err(Error::from))
            .boxed())
    }

    async fn range(&self, range: Range<u64>) -> Result<Vec<u8>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let header = format!("bytes={}-{}", range.start, range.end - 1);
        let response = self.ranged(&header).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
