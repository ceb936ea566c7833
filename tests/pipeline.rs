//! Fetch, decrypt and assemble recorded track streams end to end.
//!
//! The fixtures were encrypted with a reference Blowfish implementation
//! under the key of their track ID and the secret `0123456789abcdef`.

use std::{
    num::NonZeroUsize,
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use deezdl::{
    assemble::Assembler,
    chunk::CHUNK_SIZE,
    decrypt::{Decryptor, Key, KeyDeriver},
    error::{ErrorKind, Incomplete, Result, TransportFailure},
    fetch::{Body, ChunkFetcher, FetchMode, FetchSettings, Source},
    pipeline,
    track::TrackId,
};

const TRACK_ID: u64 = 1_043_317_462;
const TRACK_ENC: &[u8] = include_bytes!("fixtures/track_1043317462.enc");
const TRACK_PLAIN: &[u8] = include_bytes!("fixtures/track_1043317462.plain");
const SHORT_TAIL_ENC: &[u8] = include_bytes!("fixtures/short_tail.enc");
const SHORT_TAIL_PLAIN: &[u8] = include_bytes!("fixtures/short_tail.plain");

/// Recorded stream served from memory, with optional jitter and a point
/// after which requests fail or never complete.
#[derive(Clone)]
struct Recorded {
    data: Arc<Vec<u8>>,
    jitter: bool,
    fail_from: Option<u64>,
    stall_from: Option<u64>,
    stalled: Arc<AtomicBool>,
}

impl Recorded {
    fn new(data: &[u8]) -> Self {
        Self {
            data: Arc::new(data.to_vec()),
            jitter: false,
            fail_from: None,
            stall_from: None,
            stalled: Arc::default(),
        }
    }

    async fn delay(&self) {
        if self.jitter {
            tokio::time::sleep(Duration::from_millis(fastrand::u64(0..5))).await;
        }
    }

    fn slice(&self, range: Range<u64>) -> Vec<u8> {
        let start = usize::try_from(range.start).unwrap();
        let end = usize::try_from(range.end).unwrap();
        self.data[start..end].to_vec()
    }
}

impl Source for Recorded {
    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn body(&self, offset: u64) -> Result<Body> {
        let length = self.data.len() as u64;
        let end = self.fail_from.unwrap_or(length).max(offset);

        // Pieces of uneven size, as a network would deliver them.
        let mut pieces = Vec::new();
        let mut position = offset;
        while position < end {
            let size = fastrand::u64(1..=3 * CHUNK_SIZE as u64);
            let next = u64::min(position + size, end);
            pieces.push(Ok(self.slice(position..next)));
            position = next;
        }
        if end < length {
            pieces.push(Err(deezdl::error::Error::aborted("connection reset")));
        }

        Ok(stream::iter(pieces).boxed())
    }

    async fn range(&self, range: Range<u64>) -> Result<Vec<u8>> {
        self.delay().await;

        if self.stall_from.is_some_and(|at| range.end > at) {
            self.stalled.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        if self.fail_from.is_some_and(|at| range.end > at) {
            return Err(deezdl::error::Error::aborted("connection reset"));
        }

        Ok(self.slice(range))
    }
}

fn decryptor(track_id: u64) -> Decryptor {
    let deriver = KeyDeriver::new(Key::new(*b"0123456789abcdef"));
    Decryptor::new(deriver.derive(TrackId::new(track_id).unwrap()))
}

fn sequential() -> FetchSettings {
    FetchSettings {
        mode: FetchMode::Sequential,
        queue_depth: NonZeroUsize::new(2).unwrap(),
    }
}

fn concurrent(workers: usize, segment_chunks: usize) -> FetchSettings {
    FetchSettings {
        mode: FetchMode::Concurrent {
            workers: NonZeroUsize::new(workers).unwrap(),
            segment_chunks: NonZeroUsize::new(segment_chunks).unwrap(),
        },
        queue_depth: NonZeroUsize::new(2).unwrap(),
    }
}

async fn download(source: Recorded, settings: FetchSettings, track_id: u64) -> Result<Vec<u8>> {
    let decryptor = decryptor(track_id);
    let assembled = pipeline::run(
        ChunkFetcher::new(source, settings),
        Some(&decryptor),
        Assembler::new(Vec::new()),
        &CancellationToken::new(),
    )
    .await?;
    Ok(assembled.sink)
}

#[test]
fn fixture_stripes_every_third_chunk() {
    assert_eq!(TRACK_ENC.len(), 5 * CHUNK_SIZE);
    assert_eq!(TRACK_PLAIN.len(), 5 * CHUNK_SIZE);

    let enc: Vec<&[u8]> = TRACK_ENC.chunks(CHUNK_SIZE).collect();
    let plain: Vec<&[u8]> = TRACK_PLAIN.chunks(CHUNK_SIZE).collect();
    for index in [1, 2, 4] {
        assert_eq!(enc[index], plain[index], "chunk {index} should be clear");
    }
    for index in [0, 3] {
        assert_ne!(enc[index], plain[index], "chunk {index} should be encrypted");
    }
}

#[tokio::test]
async fn decrypts_recorded_track_sequentially() {
    let plain = download(Recorded::new(TRACK_ENC), sequential(), TRACK_ID)
        .await
        .unwrap();
    assert_eq!(plain, TRACK_PLAIN);
}

#[tokio::test]
async fn decrypts_recorded_track_concurrently_despite_jitter() {
    for (workers, segment_chunks) in [(4, 1), (3, 2), (8, 64)] {
        let mut source = Recorded::new(TRACK_ENC);
        source.jitter = true;

        let plain = download(source, concurrent(workers, segment_chunks), TRACK_ID)
            .await
            .unwrap();
        assert_eq!(plain, TRACK_PLAIN, "{workers} workers, {segment_chunks} chunks");
    }
}

#[tokio::test]
async fn decrypts_short_encrypted_tail() {
    assert_eq!(SHORT_TAIL_ENC.len(), 3 * CHUNK_SIZE + 1003);

    for settings in [sequential(), concurrent(2, 1)] {
        let plain = download(Recorded::new(SHORT_TAIL_ENC), settings, TRACK_ID)
            .await
            .unwrap();
        assert_eq!(plain, SHORT_TAIL_PLAIN);
    }

    // The three bytes past the last cipher block are stored as is.
    let tail = SHORT_TAIL_ENC.len() - 3;
    assert_eq!(SHORT_TAIL_ENC[tail..], SHORT_TAIL_PLAIN[tail..]);
}

#[tokio::test]
async fn wrong_key_yields_different_bytes_of_same_length() {
    let plain = download(Recorded::new(TRACK_ENC), sequential(), TRACK_ID + 1)
        .await
        .unwrap();
    assert_eq!(plain.len(), TRACK_PLAIN.len());
    assert_ne!(plain[..CHUNK_SIZE], TRACK_PLAIN[..CHUNK_SIZE]);
    assert_eq!(plain[CHUNK_SIZE..3 * CHUNK_SIZE], TRACK_PLAIN[CHUNK_SIZE..3 * CHUNK_SIZE]);
}

#[tokio::test]
async fn resumes_after_transport_failure() {
    for settings in [sequential(), concurrent(2, 1)] {
        let mut source = Recorded::new(TRACK_ENC);
        source.fail_from = Some(3 * CHUNK_SIZE as u64 + 512);

        let decryptor = decryptor(TRACK_ID);
        let mut sink = Vec::new();
        let err = pipeline::run(
            ChunkFetcher::new(source, settings),
            Some(&decryptor),
            Assembler::new(&mut sink),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::DataLoss);
        assert_eq!(err.last_good_index(), Some(2));
        let resume_index = err.transport().map(TransportFailure::resume_index).unwrap();
        assert_eq!(sink, TRACK_PLAIN[..3 * CHUNK_SIZE]);

        let assembled = pipeline::run(
            ChunkFetcher::new(Recorded::new(TRACK_ENC), settings).start_at(resume_index),
            Some(&decryptor),
            Assembler::resume(&mut sink, resume_index),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(assembled.chunks, 5);
        assert_eq!(assembled.bytes, TRACK_PLAIN.len() as u64);
        assert_eq!(sink, TRACK_PLAIN);
    }
}

#[tokio::test]
async fn cancellation_never_reports_success() {
    let mut source = Recorded::new(TRACK_ENC);
    source.stall_from = Some(2 * CHUNK_SIZE as u64 + 1);
    let stalled = Arc::clone(&source.stalled);

    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let decryptor = decryptor(TRACK_ID);
            pipeline::run(
                ChunkFetcher::new(source, concurrent(1, 1)),
                Some(&decryptor),
                Assembler::new(Vec::new()),
                &cancel,
            )
            .await
        })
    };

    while !stalled.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    // Let the first two chunks drain into the assembler.
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(
        err.downcast::<Incomplete>(),
        Some(&Incomplete {
            chunks: 2,
            bytes: 2 * CHUNK_SIZE as u64
        })
    );
}
