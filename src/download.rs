//! Track download facade.
//!
//! A [`Downloader`] turns a track ID and an audio quality into the
//! decrypted bytes of the track:
//!
//! 1. derive the track key (no network I/O)
//! 2. fetch the track data from the gateway
//! 3. locate candidate streams, best format first
//! 4. open the first candidate that has content
//! 5. fetch, decrypt and assemble its chunks
//!
//! Steps 1 to 3 produce a [`Selection`]. Once a stream of the selection is
//! opened, the selection is pinned to that stream's format, so that a
//! transfer that broke off can be resumed at a chunk index with
//! [`Downloader::fetch_to`].
//!
//! Downloads may run concurrently on one `Downloader`. They share the
//! gateway session and the HTTP clients, nothing else. Links and albums
//! are downloaded as a batch of such downloads with bounded concurrency,
//! see [`Downloader::download`].

use std::{future::Future, num::NonZeroUsize};

use futures_util::{stream, StreamExt};
use tokio::{
    io::AsyncWrite,
    sync::{watch, Mutex},
};
use tokio_util::sync::CancellationToken;
use veil::Redact;

use crate::{
    assemble::Assembler,
    catalog::{AlbumId, Catalog, Link},
    chunk::CHUNK_SIZE,
    config::Config,
    decrypt::{Decryptor, Key, KeyDeriver},
    error::{Error, Result},
    fetch::{ChunkFetcher, FetchSettings, HttpSource, Source},
    gateway::Gateway,
    http::Client as HttpClient,
    locator::{StreamHandle, StreamLocator},
    pipeline::{self, Progress},
    protocol::{
        api::CoverSize,
        media::{AudioQuality, Cipher, Format},
    },
    tag::Tags,
    track::{Track, TrackId},
};

/// Outcome of a batch download, one entry per track in link order.
pub type Batch = Vec<(TrackId, Result<Vec<u8>>)>;

/// A completed download.
#[derive(Debug)]
pub struct Download<W> {
    pub track: Track,

    /// Format of the stream that was downloaded
    pub format: Format,

    pub sink: W,

    /// Number of chunks in the sink, including any resumed prefix.
    pub chunks: u64,

    /// Number of bytes in the sink, including any resumed prefix.
    pub bytes: u64,
}

/// Candidate streams of a track, best first.
#[derive(Clone, Redact)]
pub struct Selection {
    track: Track,
    handles: Vec<StreamHandle>,
    #[redact]
    key: Key,
}

impl Selection {
    #[must_use]
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Format of the best remaining candidate.
    #[must_use]
    pub fn format(&self) -> Option<Format> {
        self.handles.first().map(|handle| handle.format)
    }

    /// Whether the selection was narrowed to the format of an opened
    /// stream.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.handles
            .windows(2)
            .all(|pair| pair[0].format == pair[1].format)
    }

    /// Keeps only the candidates in `format`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if none are left.
    pub fn pin(&mut self, format: Format) -> Result<()> {
        self.handles.retain(|handle| handle.format == format);
        if self.handles.is_empty() {
            return Err(Error::not_found(format!(
                "track {} is not available in {format}",
                self.track
            )));
        }
        Ok(())
    }
}

/// Downloads and decrypts tracks.
pub struct Downloader {
    gateway: Mutex<Gateway>,
    catalog: Catalog,
    cdn: HttpClient,
    deriver: KeyDeriver,
    locator: StreamLocator,
    fetch: FetchSettings,
}

impl Downloader {
    /// Creates a downloader. No request is made until the first download.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built, or
    /// `FailedPrecondition` if the configured locator lacks its secret.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            gateway: Mutex::new(Gateway::new(config)?),
            catalog: Catalog::new(config)?,
            cdn: HttpClient::without_cookies(config)?,
            deriver: KeyDeriver::new(config.bf_secret),
            locator: StreamLocator::new(config.locator, config.url_secret)?,
            fetch: config.fetch,
        })
    }

    /// The catalog that links, tags and searches are resolved on.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Derives the decryption key of a track.
    #[must_use]
    pub fn derive_key(&self, track_id: TrackId) -> Key {
        self.deriver.derive(track_id)
    }

    /// Fetches the gateway track data of `track_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the track does not exist, or
    /// `AuthenticationRejected` if the session credential is not accepted.
    pub async fn track(&self, track_id: TrackId) -> Result<Track> {
        self.gateway.lock().await.track(track_id).await
    }

    /// Downloads a track into memory.
    ///
    /// # Errors
    ///
    /// See [`download_track_to`](Self::download_track_to).
    pub async fn download_track(
        &self,
        track_id: TrackId,
        quality: AudioQuality,
    ) -> Result<Vec<u8>> {
        let (progress, _) = watch::channel(Progress::default());
        let download = self
            .download_track_to(
                track_id,
                quality,
                Vec::new(),
                &CancellationToken::new(),
                &progress,
            )
            .await?;
        Ok(download.sink)
    }

    /// Downloads a track into memory and tags it.
    ///
    /// A track that cannot be tagged is returned untagged.
    ///
    /// # Errors
    ///
    /// See [`download_track_to`](Self::download_track_to).
    pub async fn download_tagged(
        &self,
        track_id: TrackId,
        quality: AudioQuality,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let (progress, _) = watch::channel(Progress::default());
        let download = self
            .download_track_to(track_id, quality, Vec::new(), cancel, &progress)
            .await?;

        match self.tag(&download.track, download.format, &download.sink).await {
            Ok(tagged) => Ok(tagged),
            Err(e) => {
                warn!("failed to tag track {}: {e}", download.track);
                Ok(download.sink)
            }
        }
    }

    /// Resolves a link to the IDs of its tracks, in album order for
    /// albums.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the album does not exist.
    pub async fn track_ids(&self, link: Link) -> Result<Vec<TrackId>> {
        match link {
            Link::Track(track_id) => Ok(vec![track_id]),
            Link::Album(album_id) => Ok(self.catalog.resolve_album(album_id).await?.track_ids()),
        }
    }

    /// Downloads and tags every track of `link`, at most `concurrency` at a
    /// time.
    ///
    /// A track that fails does not stop the others. Its entry carries the
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be resolved to tracks.
    pub async fn download(
        &self,
        link: Link,
        quality: AudioQuality,
        concurrency: NonZeroUsize,
        cancel: &CancellationToken,
    ) -> Result<Batch> {
        let track_ids = self.track_ids(link).await?;
        info!("downloading {link}: {} tracks", track_ids.len());

        Ok(each_bounded(track_ids, concurrency, move |track_id| {
            self.download_tagged(track_id, quality, cancel)
        })
        .await)
    }

    /// Downloads and tags every track of an album, at most `concurrency` at
    /// a time.
    ///
    /// # Errors
    ///
    /// See [`download`](Self::download).
    pub async fn download_album(
        &self,
        album_id: AlbumId,
        quality: AudioQuality,
        concurrency: NonZeroUsize,
        cancel: &CancellationToken,
    ) -> Result<Batch> {
        self.download(Link::Album(album_id), quality, concurrency, cancel)
            .await
    }

    /// Collects the tags of `track` from the catalog, with the album cover
    /// if it can be downloaded.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the catalog does not know the track or its
    /// album.
    pub async fn tags(&self, track: &Track) -> Result<Tags> {
        let details = self.catalog.resolve(track.id()).await?;
        let album = match &details.album {
            Some(album) => Some(
                self.catalog
                    .resolve_album(AlbumId::new(album.id)?)
                    .await?,
            ),
            None => None,
        };

        let tags = Tags::new(track, Some(&details), album.as_ref());
        let Some(album) = album else {
            return Ok(tags);
        };

        match self.catalog.cover(&album, CoverSize::Xl).await {
            Ok(cover) => Ok(tags.with_cover(cover)),
            Err(e) => {
                warn!("failed to download cover of album {}: {e}", album.id);
                Ok(tags)
            }
        }
    }

    /// Embeds the tags of `track` in `audio` downloaded in `format`.
    ///
    /// # Errors
    ///
    /// See [`tags`](Self::tags) and [`Tags::apply`].
    pub async fn tag(&self, track: &Track, format: Format, audio: &[u8]) -> Result<Vec<u8>> {
        self.tags(track).await?.apply(format, audio)
    }

    /// Downloads a track into `sink`, publishing how far it got on
    /// `progress`.
    ///
    /// # Errors
    ///
    /// * `AuthenticationRejected` if the session credential is not accepted
    /// * `NotFound` if no format of the track can be downloaded
    /// * `TransportFailure` if the stream broke off; the sink then holds
    ///   every chunk up to the reported index
    /// * `Cancelled` if `cancel` fired first
    pub async fn download_track_to<W>(
        &self,
        track_id: TrackId,
        quality: AudioQuality,
        sink: W,
        cancel: &CancellationToken,
        progress: &watch::Sender<Progress>,
    ) -> Result<Download<W>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut selection = self.select(track_id, quality).await?;
        self.fetch_to(&mut selection, 0, sink, cancel, progress)
            .await
    }

    /// Continues a download in `format` whose first `from_index` chunks are
    /// already in `sink`.
    ///
    /// # Errors
    ///
    /// As [`download_track_to`](Self::download_track_to), and `NotFound`
    /// if the track is no longer offered in `format`.
    pub async fn resume_track_to<W>(
        &self,
        track_id: TrackId,
        format: Format,
        from_index: u64,
        sink: W,
        cancel: &CancellationToken,
        progress: &watch::Sender<Progress>,
    ) -> Result<Download<W>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut selection = self.select(track_id, AudioQuality::from(format)).await?;
        selection.pin(format)?;
        self.fetch_to(&mut selection, from_index, sink, cancel, progress)
            .await
    }

    /// Looks up the candidate streams of a track.
    ///
    /// # Errors
    ///
    /// * `AuthenticationRejected` if the session credential is not accepted
    /// * `NotFound` if the track does not exist or has no streams
    /// * `PermissionDenied` if the license covers none of its formats
    pub async fn select(&self, track_id: TrackId, quality: AudioQuality) -> Result<Selection> {
        // Before any network I/O.
        let key = self.derive_key(track_id);

        let track = self.track(track_id).await?;
        let user_data = self.gateway.lock().await.user_data().await?;
        let handles = self
            .locator
            .locate(&self.cdn, &user_data, &track, quality)
            .await?;

        Ok(Selection {
            track,
            handles,
            key,
        })
    }

    /// Downloads the best candidate of `selection` into `sink`, starting at
    /// chunk `from_index`.
    ///
    /// The first `from_index` chunks must already be in `sink`. The
    /// selection is pinned to the format of the stream that is opened.
    /// `progress` is updated after every chunk written.
    ///
    /// # Errors
    ///
    /// See [`download_track_to`](Self::download_track_to).
    pub async fn fetch_to<W>(
        &self,
        selection: &mut Selection,
        from_index: u64,
        sink: W,
        cancel: &CancellationToken,
        progress: &watch::Sender<Progress>,
    ) -> Result<Download<W>>
    where
        W: AsyncWrite + Unpin,
    {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            opened = self.open(selection) => Some(opened),
        };
        let Some(opened) = opened else {
            return Err(Error::incomplete(from_index, from_index * CHUNK_SIZE as u64));
        };
        let (handle, source) = opened?;
        selection.pin(handle.format)?;

        let track = &selection.track;
        if from_index > 0 {
            info!("resuming track {track} in {} at chunk {from_index}", handle.format);
        } else {
            info!("downloading track {track} in {}", handle.format);
        }

        let decryptor = match handle.cipher {
            Cipher::BF_CBC_STRIPE => Some(Decryptor::new(selection.key)),
            Cipher::NONE => None,
        };

        let fetcher = ChunkFetcher::new(source, self.fetch).start_at(from_index);
        let assembler = Assembler::resume(sink, from_index);
        let assembled =
            pipeline::run_with_progress(fetcher, decryptor.as_ref(), assembler, cancel, progress)
                .await?;

        Ok(Download {
            track: track.clone(),
            format: handle.format,
            sink: assembled.sink,
            chunks: assembled.chunks,
            bytes: assembled.bytes,
        })
    }

    /// Opens the first candidate of `selection` that has content.
    ///
    /// The CDN is not sent the session credential, so a candidate that is
    /// refused or missing only moves on to the next one.
    async fn open(&self, selection: &Selection) -> Result<(StreamHandle, HttpSource)> {
        let track = &selection.track;
        let mut last_error = None;

        for handle in &selection.handles {
            match HttpSource::open(self.cdn.unlimited.clone(), handle.url.clone()).await {
                Ok(source) if source.content_length() == Some(0) => {
                    warn!("track {track} has no content in {}", handle.format);
                }
                Ok(source) => return Ok((handle.clone(), source)),
                Err(e) => {
                    warn!("failed to open track {track} in {}: {e}", handle.format);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::not_found(format!("track {track} is not available for download"))
        }))
    }
}

/// Runs `task` for every track, at most `limit` at a time, and returns
/// the outcomes in the order of `track_ids`.
pub(crate) async fn each_bounded<T, F, Fut>(
    track_ids: Vec<TrackId>,
    limit: NonZeroUsize,
    task: F,
) -> Vec<(TrackId, T)>
where
    F: Fn(TrackId) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(track_ids)
        .map(|track_id| {
            let outcome = task(track_id);
            async move { (track_id, outcome.await) }
        })
        .buffered(limit.get())
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use axum::{http::StatusCode, routing::get, Router};
    use url::Url;

    use super::*;
    use crate::{
        config::Secrets,
        error::ErrorKind,
        fetch::FetchMode,
        locator::LocatorKind,
        protocol::gateway::PageTrack,
    };

    fn config() -> Config {
        Config::new(Secrets {
            arl: "abc123".parse().unwrap(),
            bf_secret: "0123456789abcdef".parse().unwrap(),
            url_secret: None,
        })
        .unwrap()
    }

    fn selection(formats: &[Format]) -> Selection {
        selection_at(&"https://cdn.example.com/".parse().unwrap(), formats)
    }

    /// Selection whose candidates are at `base` followed by their format.
    fn selection_at(base: &Url, formats: &[Format]) -> Selection {
        let page: PageTrack = serde_json::from_str(
            r#"{"DATA": {"SNG_ID": "1043317462", "TRACK_TOKEN": "token",
                "TRACK_TOKEN_EXPIRE": 4102444800}}"#,
        )
        .unwrap();

        Selection {
            track: Track::from(page.data),
            handles: formats
                .iter()
                .map(|&format| StreamHandle {
                    url: base.join(&format.to_string()).unwrap(),
                    format,
                    cipher: Cipher::NONE,
                })
                .collect(),
            key: Key::default(),
        }
    }

    #[test]
    fn derives_keys_without_a_session() {
        let downloader = Downloader::new(&config()).unwrap();
        let key = downloader.derive_key(TrackId::new(1_043_317_462).unwrap());
        assert_eq!(&*key, b"56i733d5>lfo9f35");
    }

    #[test]
    fn legacy_locator_requires_url_secret() {
        let mut config = config();
        config.locator = LocatorKind::Legacy;
        let err = Downloader::new(&config).err().unwrap();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);

        config.url_secret = Some("fixture-urlkey16".parse().unwrap());
        assert!(Downloader::new(&config).is_ok());
    }

    #[test]
    fn pinning_keeps_one_format() {
        let mut selection = selection(&[Format::MP3_320, Format::MP3_320, Format::MP3_128]);
        assert_eq!(selection.format(), Some(Format::MP3_320));
        assert!(!selection.is_pinned());

        selection.pin(Format::MP3_128).unwrap();
        assert!(selection.is_pinned());
        assert_eq!(selection.format(), Some(Format::MP3_128));

        let err = selection.pin(Format::FLAC).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!format!("{selection:?}").contains("cdn.example.com"));
    }

    #[tokio::test]
    async fn cancelled_before_opening_reports_resumed_prefix() {
        let downloader = Downloader::new(&config()).unwrap();
        let mut selection = selection(&[Format::MP3_128]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (progress, _) = watch::channel(Progress::default());

        let err = downloader
            .fetch_to(&mut selection, 3, Vec::new(), &cancel, &progress)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(
            err.downcast::<crate::error::Incomplete>(),
            Some(&crate::error::Incomplete {
                chunks: 3,
                bytes: 3 * CHUNK_SIZE as u64
            })
        );
    }

    #[tokio::test]
    async fn refused_candidates_fall_through_to_the_next() {
        let audio: Vec<u8> = (0..5000_u32).map(|i| (i % 251) as u8).collect();
        let body = audio.clone();
        let base = crate::testing::serve(
            Router::new()
                .route("/MP3_320", get(|| async { StatusCode::FORBIDDEN }))
                .route("/MP3_256", get(|| async { StatusCode::NOT_FOUND }))
                .route("/MP3_128", get(move || async move { body })),
        )
        .await;

        let mut downloader = Downloader::new(&config()).unwrap();
        downloader.fetch = FetchSettings {
            mode: FetchMode::Sequential,
            ..FetchSettings::default()
        };
        let mut selection =
            selection_at(&base, &[Format::MP3_320, Format::MP3_256, Format::MP3_128]);
        let (progress, mut updates) = watch::channel(Progress::default());

        let download = downloader
            .fetch_to(
                &mut selection,
                0,
                Vec::new(),
                &CancellationToken::new(),
                &progress,
            )
            .await
            .unwrap();

        assert_eq!(download.format, Format::MP3_128);
        assert_eq!(download.sink, audio);
        assert_eq!(download.chunks, 3);
        assert!(selection.is_pinned());
        assert_eq!(selection.format(), Some(Format::MP3_128));

        assert!(updates.has_changed().unwrap());
        let last = *updates.borrow_and_update();
        assert_eq!(
            last,
            Progress {
                chunks: 3,
                bytes: 5000,
                total: Some(5000),
            }
        );
        assert_eq!(last.percent(), Some(100));
    }

    #[tokio::test]
    async fn every_refused_candidate_reports_the_last_refusal() {
        let base = crate::testing::serve(
            Router::new().route("/MP3_128", get(|| async { StatusCode::FORBIDDEN })),
        )
        .await;

        let downloader = Downloader::new(&config()).unwrap();
        let selection = selection_at(&base, &[Format::MP3_128]);
        let err = downloader.open(&selection).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(!err.is_authentication_rejected());
    }

    #[tokio::test]
    async fn batches_keep_track_order_and_bound_concurrency() {
        let running = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);
        let track_ids: Vec<TrackId> = (1..=8).map(|id| TrackId::new(id).unwrap()).collect();

        let outcomes = each_bounded(
            track_ids.clone(),
            NonZeroUsize::new(3).unwrap(),
            move |track_id| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later tracks finish first.
                tokio::time::sleep(Duration::from_millis(5 * (9 - track_id.get()))).await;
                running.fetch_sub(1, Ordering::SeqCst);
                track_id.get() * 10
            },
        )
        .await;

        assert_eq!(
            outcomes.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            track_ids
        );
        assert!(outcomes.iter().all(|(id, outcome)| *outcome == id.get() * 10));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_track_links_need_no_lookup() {
        let downloader = Downloader::new(&config()).unwrap();
        let track_id = TrackId::new(1_043_317_462).unwrap();
        assert_eq!(
            downloader.track_ids(Link::Track(track_id)).await.unwrap(),
            [track_id]
        );
    }
}
