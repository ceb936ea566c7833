use std::{
    fmt,
    num::NonZeroU64,
    str::FromStr,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use veil::Redact;

use crate::{
    error::{Error, Result},
    protocol::{
        gateway::{Contributors, Lyrics, PageTrack, TrackData},
        media::Format,
    },
};

/// Catalog identifier of a track.
///
/// Always a positive integer. Its decimal representation is the input to
/// key derivation, so parsing is strict: zero, negative numbers and
/// anything that is not a plain decimal number are rejected with an
/// `InvalidIdentifier` error before any network I/O happens.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct TrackId(NonZeroU64);

impl TrackId {
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if `id` is zero.
    pub fn new(id: u64) -> Result<Self> {
        NonZeroU64::new(id)
            .map(Self)
            .ok_or_else(|| Error::invalid_identifier("track id must not be zero"))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl From<NonZeroU64> for TrackId {
    fn from(id: NonZeroU64) -> Self {
        Self(id)
    }
}

impl TryFrom<i64> for TrackId {
    type Error = Error;

    fn try_from(id: i64) -> Result<Self> {
        let id = u64::try_from(id)
            .map_err(|_| Error::invalid_identifier(format!("track id {id} is negative")))?;
        Self::new(id)
    }
}

impl FromStr for TrackId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_identifier(format!(
                "\"{s}\" is not a positive decimal number"
            )));
        }

        let id = s
            .parse::<u64>()
            .map_err(|e| Error::invalid_identifier(format!("\"{s}\": {e}")))?;
        Self::new(id)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Track data needed to locate and name a stream.
#[derive(Clone, PartialEq, Redact)]
pub struct Track {
    id: TrackId,
    title: String,
    artist: String,
    album: String,
    duration: Duration,
    md5_origin: String,
    media_version: String,
    #[redact]
    track_token: String,
    expiry: SystemTime,
    file_sizes: FileSizes,
    copyright: String,
    contributors: Contributors,
    lyrics: Option<Lyrics>,
}

/// Advertised stream sizes per format, `0` when a format is unavailable.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FileSizes {
    pub mp3_64: u64,
    pub mp3_128: u64,
    pub mp3_256: u64,
    pub mp3_320: u64,
    pub flac: u64,
}

impl Track {
    #[must_use]
    pub fn id(&self) -> TrackId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn artist(&self) -> &str {
        &self.artist
    }

    #[must_use]
    pub fn album(&self) -> &str {
        &self.album
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn md5_origin(&self) -> &str {
        &self.md5_origin
    }

    #[must_use]
    pub fn media_version(&self) -> &str {
        &self.media_version
    }

    #[must_use]
    pub fn track_token(&self) -> &str {
        &self.track_token
    }

    #[must_use]
    pub fn expiry(&self) -> SystemTime {
        self.expiry
    }

    #[must_use]
    pub fn copyright(&self) -> &str {
        &self.copyright
    }

    #[must_use]
    pub fn contributors(&self) -> &Contributors {
        &self.contributors
    }

    #[must_use]
    pub fn lyrics(&self) -> Option<&Lyrics> {
        self.lyrics.as_ref()
    }

    /// The advertised size of the stream in `format`.
    ///
    /// Returns `None` for formats the track data carries no size for.
    #[must_use]
    pub fn file_size(&self, format: Format) -> Option<u64> {
        match format {
            Format::MP3_64 => Some(self.file_sizes.mp3_64),
            Format::MP3_128 => Some(self.file_sizes.mp3_128),
            Format::MP3_256 => Some(self.file_sizes.mp3_256),
            Format::MP3_320 => Some(self.file_sizes.mp3_320),
            Format::FLAC => Some(self.file_sizes.flac),
            Format::MP3_MISC | Format::EXTERNAL => None,
        }
    }
}

impl From<TrackData> for Track {
    fn from(data: TrackData) -> Self {
        Self {
            id: data.track_id,
            title: data.title.0,
            artist: data.artist.0,
            album: data.album_title.0,
            duration: data.duration,
            md5_origin: data.md5_origin,
            media_version: data.media_version,
            track_token: data.track_token,
            expiry: data.expiry,
            file_sizes: FileSizes {
                mp3_64: data.filesize_mp3_64,
                mp3_128: data.filesize_mp3_128,
                mp3_256: data.filesize_mp3_256,
                mp3_320: data.filesize_mp3_320,
                flac: data.filesize_flac,
            },
            copyright: data.copyright,
            contributors: data.contributors,
            lyrics: None,
        }
    }
}

impl From<PageTrack> for Track {
    fn from(page: PageTrack) -> Self {
        Self {
            lyrics: page.lyrics.filter(|lyrics| !lyrics.text.is_empty()),
            ..Self::from(page.data)
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.id, self.artist, self.title)
    }
}
