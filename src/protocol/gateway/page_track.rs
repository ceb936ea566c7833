//! Track data from the `deezer.pageTrack` gateway method.
//!
//! # Wire Format
//!
//! Request:
//! ```json
//! {"sng_id": "3135556"}
//! ```
//!
//! Response (abbreviated):
//! ```json
//! {
//!     "DATA": {
//!         "SNG_ID": "3135556",
//!         "SNG_TITLE": "Harder, Better, Faster, Stronger",
//!         "ART_NAME": "Daft Punk",
//!         "ALB_TITLE": "Discovery",
//!         "DURATION": "224",
//!         "MD5_ORIGIN": "51afcde9f56a132096c0496cc95eb24b",
//!         "MEDIA_VERSION": "4",
//!         "TRACK_TOKEN": "secret",
//!         "TRACK_TOKEN_EXPIRE": 1700000000,
//!         "FILESIZE_MP3_128": "3596115",
//!         "FILESIZE_MP3_320": "8990474",
//!         "FILESIZE_FLAC": "25055058"
//!     }
//! }
//! ```

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{
    formats::Flexible, serde_as, DefaultOnError, DisplayFromStr, DurationSeconds, OneOrMany,
    PickFirst, TimestampSeconds,
};
use veil::Redact;

use super::{Method, StringOrUnknown};
use crate::track::TrackId;

impl Method for PageTrack {
    const METHOD: &'static str = "deezer.pageTrack";
}

/// Request body of `deezer.pageTrack`.
#[serde_as]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Hash)]
pub struct Request {
    #[serde(rename = "sng_id")]
    #[serde_as(as = "DisplayFromStr")]
    pub track_id: TrackId,
}

#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct PageTrack {
    #[serde(rename = "DATA")]
    pub data: TrackData,

    /// Absent for instrumentals and tracks without licensed lyrics
    #[serde(default)]
    #[serde(rename = "LYRICS")]
    pub lyrics: Option<Lyrics>,
}

#[derive(Clone, Default, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct Lyrics {
    #[serde(default)]
    #[serde(rename = "LYRICS_TEXT")]
    pub text: String,

    /// Comma separated
    #[serde(default)]
    #[serde(rename = "LYRICS_WRITERS")]
    pub writers: String,

    #[serde(default)]
    #[serde(rename = "LYRICS_COPYRIGHTS")]
    pub copyrights: String,
}

/// Credits by role. Tracks without credits carry an empty list instead of
/// an object, which parses as no credits.
#[serde_as]
#[derive(Clone, Default, Eq, PartialEq, Deserialize, Debug, Hash)]
pub struct Contributors {
    #[serde(default)]
    #[serde_as(as = "OneOrMany<_>")]
    pub composer: Vec<String>,

    #[serde(default)]
    #[serde_as(as = "OneOrMany<_>")]
    pub author: Vec<String>,
}

#[serde_as]
#[derive(Clone, PartialEq, Deserialize, Redact)]
pub struct TrackData {
    #[serde(rename = "SNG_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub track_id: TrackId,

    #[serde(default)]
    #[serde(rename = "SNG_TITLE")]
    pub title: StringOrUnknown,

    #[serde(default)]
    #[serde(rename = "ART_NAME")]
    pub artist: StringOrUnknown,

    #[serde(default)]
    #[serde(rename = "ALB_TITLE")]
    pub album_title: StringOrUnknown,

    #[serde(default)]
    #[serde(rename = "COPYRIGHT")]
    pub copyright: String,

    #[serde(default)]
    #[serde(rename = "SNG_CONTRIBUTORS")]
    #[serde_as(as = "DefaultOnError")]
    pub contributors: Contributors,

    #[serde(default)]
    #[serde(rename = "DURATION")]
    #[serde_as(as = "DurationSeconds<String, Flexible>")]
    pub duration: Duration,

    /// Origin hash used to build legacy stream URLs
    #[serde(default)]
    #[serde(rename = "MD5_ORIGIN")]
    pub md5_origin: String,

    #[serde(default)]
    #[serde(rename = "MEDIA_VERSION")]
    pub media_version: String,

    /// Token for the media API
    #[serde(rename = "TRACK_TOKEN")]
    #[redact]
    pub track_token: String,

    #[serde(rename = "TRACK_TOKEN_EXPIRE")]
    #[serde_as(as = "TimestampSeconds<i64, Flexible>")]
    pub expiry: SystemTime,

    #[serde(default)]
    #[serde(rename = "FILESIZE_MP3_64")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp3_64: u64,

    #[serde(default)]
    #[serde(rename = "FILESIZE_MP3_128")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp3_128: u64,

    #[serde(default)]
    #[serde(rename = "FILESIZE_MP3_256")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp3_256: u64,

    #[serde(default)]
    #[serde(rename = "FILESIZE_MP3_320")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_mp3_320: u64,

    #[serde(default)]
    #[serde(rename = "FILESIZE_FLAC")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub filesize_flac: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::gateway::Response;

    const BODY: &str = r#"{
        "error": [],
        "results": {
            "DATA": {
                "SNG_ID": "3135556",
                "SNG_TITLE": "Harder, Better, Faster, Stronger",
                "ART_NAME": "Daft Punk",
                "ALB_TITLE": "Discovery",
                "DURATION": "224",
                "MD5_ORIGIN": "51afcde9f56a132096c0496cc95eb24b",
                "MEDIA_VERSION": "4",
                "TRACK_TOKEN": "track-token",
                "TRACK_TOKEN_EXPIRE": 1700000000,
                "FILESIZE_MP3_128": "3596115",
                "FILESIZE_MP3_320": 8990474,
                "FILESIZE_FLAC": "0"
            }
        }
    }"#;

    #[test]
    fn parses_page_track_response() {
        let response: Response<PageTrack> = serde_json::from_str(BODY).unwrap();
        let data = &response.first().unwrap().data;

        assert_eq!(data.track_id.get(), 3_135_556);
        assert_eq!(&*data.artist, "Daft Punk");
        assert_eq!(data.duration, Duration::from_secs(224));
        assert_eq!(data.media_version, "4");
        assert_eq!(data.filesize_mp3_128, 3_596_115);
        assert_eq!(data.filesize_mp3_320, 8_990_474);
        assert_eq!(data.filesize_flac, 0);
        assert_eq!(data.filesize_mp3_64, 0);
        assert!(!format!("{data:?}").contains("track-token"));
    }

    #[test]
    fn parses_credits_and_lyrics() {
        let page: PageTrack = serde_json::from_str(
            r#"{
                "DATA": {
                    "SNG_ID": "3135556",
                    "COPYRIGHT": "(P) 2001 Daft Life Ltd.",
                    "SNG_CONTRIBUTORS": {
                        "composer": ["Thomas Bangalter", "Guy-Manuel de Homem-Christo"],
                        "author": "Edwin Birdsong"
                    },
                    "TRACK_TOKEN": "token",
                    "TRACK_TOKEN_EXPIRE": 1700000000
                },
                "LYRICS": {
                    "LYRICS_TEXT": "Work it harder\nMake it better",
                    "LYRICS_WRITERS": "Edwin Birdsong, Thomas Bangalter"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(page.data.copyright, "(P) 2001 Daft Life Ltd.");
        assert_eq!(page.data.contributors.composer.len(), 2);
        assert_eq!(page.data.contributors.author, ["Edwin Birdsong"]);
        let lyrics = page.lyrics.unwrap();
        assert!(lyrics.text.starts_with("Work it harder\n"));
        assert!(lyrics.copyrights.is_empty());
    }

    #[test]
    fn credits_may_be_an_empty_list() {
        let page: PageTrack = serde_json::from_str(
            r#"{"DATA": {"SNG_ID": "1", "SNG_CONTRIBUTORS": [],
                "TRACK_TOKEN": "token", "TRACK_TOKEN_EXPIRE": 1700000000}}"#,
        )
        .unwrap();
        assert_eq!(page.data.contributors, Contributors::default());
        assert!(page.lyrics.is_none());
    }

    #[test]
    fn request_sends_id_as_string() {
        let request = Request {
            track_id: TrackId::new(3_135_556).unwrap(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"sng_id":"3135556"}"#
        );
    }
}
