//! Track and album lookups on the public catalog API.
//!
//! The catalog needs no session. It resolves links and search queries to
//! track IDs, which is all the download pipeline consumes, and provides the
//! metadata and cover art that downloads are tagged with.

use std::{fmt, num::NonZeroU64, str::FromStr};

use regex_lite::Regex;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::api::{self, Album, AlbumSummary, CoverSize, List, Track},
    track::TrackId,
};

/// Album ID on the catalog.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AlbumId(NonZeroU64);

impl AlbumId {
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if `id` is zero.
    pub fn new(id: u64) -> Result<Self> {
        NonZeroU64::new(id)
            .map(Self)
            .ok_or_else(|| Error::invalid_identifier("album id must not be zero"))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl FromStr for AlbumId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<NonZeroU64>()
            .map(Self)
            .map_err(|e| Error::invalid_identifier(format!("album \"{s}\": {e}")))
    }
}

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something to download, as given on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Link {
    Track(TrackId),
    Album(AlbumId),
}

impl Link {
    const PATTERN: &'static str = r"^https?://(?:www\.)?deezer\.com/(?:\w+/)?(\w+)/(\d+)";
}

impl FromStr for Link {
    type Err = Error;

    /// Parses a bare track ID or a `deezer.com` track or album link, such
    /// as `https://www.deezer.com/en/album/302127`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|byte| byte.is_ascii_digit()) {
            return s.parse().map(Self::Track);
        }

        let pattern = Regex::new(Self::PATTERN).map_err(|e| Error::internal(e.to_string()))?;
        let captures = pattern
            .captures(s)
            .ok_or_else(|| Error::invalid_argument(format!("not a deezer link: {s}")))?;

        let id = &captures[2];
        match &captures[1] {
            "track" => id.parse().map(Self::Track),
            "album" => id.parse().map(Self::Album),
            kind => Err(Error::unimplemented(format!(
                "downloading {kind} links is not supported"
            ))),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Track(id) => write!(f, "track {id}"),
            Self::Album(id) => write!(f, "album {id}"),
        }
    }
}

/// Client of the public catalog API.
pub struct Catalog {
    http_client: HttpClient,
    base_url: Url,
}

impl Catalog {
    const API_URL: &'static str = "https://api.deezer.com/";

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::without_cookies(config)?,
            base_url: Self::API_URL.parse()?,
        })
    }

    async fn get<T>(&self, url: Url, origin: &str) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de> + fmt::Debug,
    {
        let request = self.http_client.get(url);
        self.http_client
            .json::<api::Response<T>>(request, origin)
            .await?
            .into_result()
    }

    /// Looks up a track.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the track does not exist.
    pub async fn resolve(&self, track_id: TrackId) -> Result<Track> {
        let url = self.base_url.join(&format!("track/{track_id}"))?;
        self.get(url, "track").await
    }

    /// Looks up an album with its track listing.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the album does not exist.
    pub async fn resolve_album(&self, album_id: AlbumId) -> Result<Album> {
        let url = self.base_url.join(&format!("album/{album_id}"))?;
        let album: Album = self.get(url, "album").await?;
        debug!(
            "album {album_id}: \"{} - {}\" with {} tracks",
            album.artist.name,
            album.title,
            album.tracks.data.len()
        );
        Ok(album)
    }

    /// Downloads the cover image of `album` in `size`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the album has no cover in that size.
    pub async fn cover(&self, album: &Album, size: CoverSize) -> Result<Vec<u8>> {
        let url = album
            .cover(size)
            .ok_or_else(|| Error::not_found(format!("album {} has no cover", album.id)))?;

        let request = self.http_client.get(url.clone());
        let response = self
            .http_client
            .execute(request)
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    fn search_url(&self, kind: &str, query: &str, limit: usize) -> Result<Url> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_argument("search query is empty"));
        }

        let mut url = self.base_url.join(&format!("search/{kind}"))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    /// Searches tracks, best match first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `query` is blank.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>> {
        let url = self.search_url("track", query, limit)?;
        let results: List<Track> = self.get(url, "search").await?;
        Ok(results.data)
    }

    /// Searches albums, best match first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `query` is blank.
    pub async fn search_albums(&self, query: &str, limit: usize) -> Result<Vec<AlbumSummary>> {
        let url = self.search_url("album", query, limit)?;
        let results: List<AlbumSummary> = self.get(url, "search").await?;
        Ok(results.data)
    }

    /// Searches albums and tracks at once.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `query` is blank, or the first error of
    /// either search.
    pub async fn search_all(
        &self,
        query: &str,
        albums: usize,
        tracks: usize,
    ) -> Result<SearchResults> {
        let (albums, tracks) = tokio::try_join!(
            self.search_albums(query, albums),
            self.search(query, tracks)
        )?;
        Ok(SearchResults { albums, tracks })
    }
}

/// Albums and tracks matching a query.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SearchResults {
    pub albums: Vec<AlbumSummary>,
    pub tracks: Vec<Track>,
}
