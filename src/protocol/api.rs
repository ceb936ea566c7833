//! Types of the public catalog API at <https://api.deezer.com/>.
//!
//! Lookups that fail return an error object instead of the resource:
//! ```json
//! {"error": {"type": "DataException", "message": "no data", "code": 800}}
//! ```

use std::{fmt, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::track::TrackId;

/// API response: the requested resource, or an error.
#[derive(Clone, PartialEq, Deserialize, Debug)]
#[serde(untagged)]
pub enum Response<T> {
    Error { error: Error },
    Ok(T),
}

impl<T> Response<T> {
    /// Converts into a `Result`, mapping API errors onto error kinds.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for data errors, `ResourceExhausted` for quota
    /// errors and `Unknown` for anything else.
    pub fn into_result(self) -> crate::error::Result<T> {
        match self {
            Self::Ok(resource) => Ok(resource),
            Self::Error { error } => Err(error.into()),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct Error {
    #[serde(rename = "type", default)]
    pub typ: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: i64,
}

impl Error {
    /// Requested resource does not exist.
    pub const DATA_NOT_FOUND: i64 = 800;

    /// Too many requests.
    pub const QUOTA: i64 = 4;
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} ({})", self.typ, self.message, self.code)
    }
}

impl std::error::Error for Error {}

impl From<Error> for crate::error::Error {
    fn from(error: Error) -> Self {
        match error.code {
            Error::DATA_NOT_FOUND => Self::not_found(error),
            Error::QUOTA => Self::resource_exhausted(error),
            _ => Self::unknown(error),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct Artist {
    pub id: u64,
    pub name: String,
}

/// Album reference embedded in a track.
#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct AlbumRef {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub cover_medium: Option<Url>,
}

#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[serde_as]
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    #[serde(default)]
    pub title_short: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub duration: Duration,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub link: Option<Url>,
    #[serde(default)]
    pub track_position: Option<u64>,
    #[serde(default)]
    pub disk_number: Option<u64>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Loudness in dB, as used for replay gain
    #[serde(default)]
    pub gain: Option<f64>,
    pub artist: Artist,
    #[serde(default)]
    pub contributors: Vec<Artist>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
}

impl Track {
    /// Replay gain of the track, such as `-9.80 dB`.
    #[must_use]
    pub fn replay_gain(&self) -> Option<String> {
        self.gain.map(|gain| format!("{:.2} dB", -(gain + 18.4)))
    }
}

/// Cover image sizes, from 56 to 1000 pixels square.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum CoverSize {
    Small,
    Medium,
    Big,
    #[default]
    Xl,
}

#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Album {
    pub id: u64,
    pub title: String,
    pub artist: Artist,
    #[serde(default)]
    pub cover_small: Option<Url>,
    #[serde(default)]
    pub cover_medium: Option<Url>,
    #[serde(default)]
    pub cover_big: Option<Url>,
    #[serde(default)]
    pub cover_xl: Option<Url>,
    #[serde(default)]
    pub genres: Option<List<Genre>>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub link: Option<Url>,
    #[serde(default)]
    pub nb_tracks: u64,
    pub tracks: List<Track>,
}

impl Album {
    #[must_use]
    pub fn cover(&self, size: CoverSize) -> Option<&Url> {
        match size {
            CoverSize::Small => self.cover_small.as_ref(),
            CoverSize::Medium => self.cover_medium.as_ref(),
            CoverSize::Big => self.cover_big.as_ref(),
            CoverSize::Xl => self.cover_xl.as_ref(),
        }
    }

    #[must_use]
    pub fn genre_names(&self) -> Vec<String> {
        self.genres
            .iter()
            .flat_map(|genres| &genres.data)
            .map(|genre| genre.name.clone())
            .collect()
    }

    /// Track IDs in album order.
    #[must_use]
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.data.iter().map(|track| track.id).collect()
    }
}

/// Album as listed in search results, without its tracks.
#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct AlbumSummary {
    pub id: u64,
    pub title: String,
    pub artist: Artist,
    #[serde(default)]
    pub nb_tracks: u64,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default)]
    pub link: Option<Url>,
    #[serde(default)]
    pub cover_medium: Option<Url>,
}

/// A list of resources, as returned by album track listings and searches.
#[derive(Clone, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct List<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub next: Option<Url>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_track() {
        let body = r#"{
            "id": 3135556,
            "readable": true,
            "title": "Harder, Better, Faster, Stronger",
            "title_short": "Harder, Better, Faster, Stronger",
            "isrc": "GBDUW0000059",
            "link": "https://www.deezer.com/track/3135556",
            "duration": 224,
            "track_position": 4,
            "disk_number": 1,
            "release_date": "2001-03-07",
            "artist": {"id": 27, "name": "Daft Punk"},
            "album": {"id": 302127, "title": "Discovery"}
        }"#;

        let track = serde_json::from_str::<Response<Track>>(body)
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(track.id.get(), 3_135_556);
        assert_eq!(track.duration, Duration::from_secs(224));
        assert_eq!(track.artist.name, "Daft Punk");
        assert_eq!(track.album.map(|album| album.id), Some(302_127));
    }

    #[test]
    fn maps_api_errors() {
        let body = r#"{"error": {"type": "DataException", "message": "no data", "code": 800}}"#;
        let err = serde_json::from_str::<Response<Track>>(body)
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.to_string().contains("no data"));
    }

    #[test]
    fn parses_album_with_track_listing() {
        let body = r#"{
            "id": 302127,
            "title": "Discovery",
            "upc": "724384960650",
            "nb_tracks": 2,
            "artist": {"id": 27, "name": "Daft Punk"},
            "tracks": {"data": [
                {"id": 3135553, "title": "One More Time", "duration": 320,
                 "artist": {"id": 27, "name": "Daft Punk"}},
                {"id": 3135554, "title": "Aerodynamic", "duration": 212,
                 "artist": {"id": 27, "name": "Daft Punk"}}
            ]}
        }"#;

        let album: Album = serde_json::from_str(body).unwrap();
        assert_eq!(album.tracks.data.len(), 2);
        assert_eq!(album.tracks.data[1].title, "Aerodynamic");
        assert!(album.tracks.data[0].album.is_none());
        assert_eq!(
            album.track_ids().iter().map(|id| id.get()).collect::<Vec<_>>(),
            [3_135_553, 3_135_554]
        );
        assert!(album.cover(CoverSize::Xl).is_none());
        assert!(album.genre_names().is_empty());
    }

    #[test]
    fn parses_tagging_metadata() {
        let track: Track = serde_json::from_str(
            r#"{"id": 3135556, "title": "Harder, Better, Faster, Stronger", "duration": 224,
                "bpm": 123.4, "gain": -8.6,
                "artist": {"id": 27, "name": "Daft Punk"},
                "contributors": [{"id": 27, "name": "Daft Punk"}, {"id": 1, "name": "Edwin Birdsong"}]}"#,
        )
        .unwrap();
        assert_eq!(track.bpm, Some(123.4));
        assert_eq!(track.replay_gain().as_deref(), Some("-9.80 dB"));
        assert_eq!(track.contributors[1].name, "Edwin Birdsong");

        let album: Album = serde_json::from_str(
            r#"{"id": 302127, "title": "Discovery", "artist": {"id": 27, "name": "Daft Punk"},
                "cover_xl": "https://e-cdns-images.dzcdn.net/images/cover/1000x1000.jpg",
                "genres": {"data": [{"id": 113, "name": "Dance"}, {"id": 106, "name": "Electro"}]},
                "tracks": {"data": []}}"#,
        )
        .unwrap();
        assert_eq!(
            album.cover(CoverSize::Xl).map(Url::as_str),
            Some("https://e-cdns-images.dzcdn.net/images/cover/1000x1000.jpg")
        );
        assert_eq!(album.cover(CoverSize::Small), None);
        assert_eq!(album.genre_names(), ["Dance", "Electro"]);
    }

    #[test]
    fn parses_album_search_results() {
        let body = r#"{"data": [{"id": 302127, "title": "Discovery", "nb_tracks": 14,
            "record_type": "album", "artist": {"id": 27, "name": "Daft Punk"}}],
            "total": 1}"#;
        let results: List<AlbumSummary> = serde_json::from_str(body).unwrap();
        assert_eq!(results.data[0].nb_tracks, 14);
        assert_eq!(results.total, Some(1));
    }
}
