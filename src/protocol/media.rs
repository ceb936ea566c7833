//! Media access types: formats, ciphers and the media API wire format.
//!
//! # Wire Format
//!
//! Request:
//! ```json
//! {
//!     "license_token": "secret",
//!     "media": [{
//!         "type": "FULL",
//!         "formats": [{
//!             "cipher": "BF_CBC_STRIPE",
//!             "format": "MP3_320"
//!         }]
//!     }],
//!     "track_tokens": ["token"]
//! }
//! ```
//!
//! Response:
//! ```json
//! {
//!     "data": [{
//!         "media": [{
//!             "media_type": "FULL",
//!             "cipher": {"type": "BF_CBC_STRIPE"},
//!             "format": "MP3_320",
//!             "sources": [{
//!                 "url": "https://...",
//!                 "provider": "ak"
//!             }],
//!             "nbf": 1234567890,
//!             "exp": 1234599999
//!         }]
//!     }]
//! }
//! ```

use std::{fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, TimestampSeconds};
use url::Url;
use veil::Redact;

/// Media access request.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Redact, Hash)]
pub struct Request {
    /// License authentication token
    #[redact]
    pub license_token: String,
    /// Requested media formats
    pub media: Vec<Media>,
    /// Track-specific access tokens
    #[redact]
    pub track_tokens: Vec<String>,
}

/// Media format request.
#[derive(Clone, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct Media {
    /// Full track or preview clip
    #[serde(rename = "type")]
    pub typ: Type,

    /// Requested format and encryption combinations, in order of
    /// preference
    #[serde(rename = "formats")]
    pub cipher_formats: Vec<CipherFormat>,
}

/// Media content type.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash,
)]
pub enum Type {
    /// Full-length track
    #[default]
    FULL,
    /// Preview clip (typically 30 seconds)
    PREVIEW,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Format and encryption combination.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash,
)]
pub struct CipherFormat {
    pub cipher: Cipher,
    pub format: Format,
}

/// Content encryption method.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash,
)]
#[expect(non_camel_case_types)]
pub enum Cipher {
    /// Blowfish CBC on every third chunk
    #[default]
    BF_CBC_STRIPE,
    /// No encryption
    NONE,
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Audio format of a stream.
///
/// The discriminants are the numeric format codes used when building
/// legacy stream URLs.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash,
)]
#[expect(non_camel_case_types)]
#[repr(i64)]
pub enum Format {
    /// External source (-1)
    EXTERNAL = -1,
    /// FLAC lossless (9)
    FLAC = 9,
    /// 64 kbps MP3 (10)
    MP3_64 = 10,
    /// 128 kbps MP3 (1, default)
    #[default]
    MP3_128 = 1,
    /// 256 kbps MP3 (5)
    MP3_256 = 5,
    /// 320 kbps MP3 (3)
    MP3_320 = 3,
    /// Other or unknown MP3 bitrate (0)
    MP3_MISC = 0,
}

impl Format {
    /// Numeric code of this format.
    #[must_use]
    pub fn code(self) -> i64 {
        self as i64
    }

    /// File extension for streams in this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::FLAC => "flac",
            _ => "mp3",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Requested audio quality.
///
/// Each quality maps to a list of formats to try in order, falling back
/// to lower qualities when the preferred format is unavailable.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AudioQuality {
    /// 64 kbps MP3
    Basic,
    /// 128 kbps MP3
    #[default]
    Standard,
    /// 320 kbps MP3
    High,
    /// FLAC
    Lossless,
    /// Quality that no format maps onto
    Unknown,
}

impl AudioQuality {
    const FORMATS_BASIC: [Format; 1] = [Format::MP3_64];
    const FORMATS_STANDARD: [Format; 2] = [Format::MP3_128, Format::MP3_64];
    const FORMATS_HIGH: [Format; 4] = [
        Format::MP3_320,
        Format::MP3_256,
        Format::MP3_128,
        Format::MP3_64,
    ];
    const FORMATS_LOSSLESS: [Format; 5] = [
        Format::FLAC,
        Format::MP3_320,
        Format::MP3_256,
        Format::MP3_128,
        Format::MP3_64,
    ];

    /// Formats to request for this quality, best first.
    #[must_use]
    pub fn formats(self) -> &'static [Format] {
        match self {
            Self::Basic => &Self::FORMATS_BASIC,
            Self::Standard => &Self::FORMATS_STANDARD,
            Self::High => &Self::FORMATS_HIGH,
            Self::Lossless => &Self::FORMATS_LOSSLESS,
            Self::Unknown => &[],
        }
    }
}

impl From<Format> for AudioQuality {
    fn from(format: Format) -> Self {
        match format {
            Format::MP3_64 => AudioQuality::Basic,
            Format::MP3_128 => AudioQuality::Standard,
            Format::MP3_256 | Format::MP3_320 => AudioQuality::High,
            Format::FLAC => AudioQuality::Lossless,
            Format::EXTERNAL | Format::MP3_MISC => AudioQuality::Unknown,
        }
    }
}

impl FromStr for AudioQuality {
    type Err = crate::error::Error;

    /// Parses a quality name, or a format name for the quality that
    /// starts with that format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" | "mp3_64" => Ok(Self::Basic),
            "standard" | "mp3_128" => Ok(Self::Standard),
            "high" | "mp3_256" | "mp3_320" => Ok(Self::High),
            "lossless" | "flac" => Ok(Self::Lossless),
            _ => Err(crate::error::Error::invalid_argument(format!(
                "unknown audio quality \"{s}\""
            ))),
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Standard => write!(f, "standard"),
            Self::High => write!(f, "high"),
            Self::Lossless => write!(f, "lossless"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Media access response.
#[derive(Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash)]
pub struct Response {
    pub data: Vec<Data>,
}

/// Response data: media for a track, or why there is none.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash)]
#[serde(untagged)]
pub enum Data {
    Media { media: Vec<Medium> },
    Errors { errors: Vec<Error> },
}

/// Media access error.
#[derive(Clone, Eq, Default, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash)]
pub struct Error {
    pub code: i64,
    pub message: String,
}

impl Error {
    /// Code returned when the license does not cover the requested format.
    pub const INSUFFICIENT_RIGHTS: i64 = 2002;
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Media access details for one format.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash)]
pub struct Medium {
    #[serde(default)]
    pub media_type: Type,

    #[serde(default)]
    pub cipher: CipherType,

    #[serde(default)]
    pub format: Format,

    /// Download sources, in order of preference
    pub sources: Vec<Source>,

    /// Start of validity period
    #[serde(rename = "nbf")]
    #[serde_as(as = "TimestampSeconds<i64, Flexible>")]
    pub not_before: SystemTime,

    /// End of validity period
    #[serde(rename = "exp")]
    #[serde_as(as = "TimestampSeconds<i64, Flexible>")]
    pub expiry: SystemTime,
}

/// Encryption method wrapper, as `{"type": "BF_CBC_STRIPE"}` on the wire.
#[derive(
    Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Debug, Hash,
)]
pub struct CipherType {
    #[serde(rename = "type")]
    pub typ: Cipher,
}

/// Media source.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize, Redact, Hash)]
pub struct Source {
    /// Download URL (redacted in debug output)
    #[redact]
    pub url: Url,

    /// Content provider name
    #[serde(default)]
    pub provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_parses_names_and_format_aliases() {
        assert_eq!("lossless".parse::<AudioQuality>().unwrap(), AudioQuality::Lossless);
        assert_eq!("FLAC".parse::<AudioQuality>().unwrap(), AudioQuality::Lossless);
        assert_eq!("MP3_320".parse::<AudioQuality>().unwrap(), AudioQuality::High);
        assert_eq!("mp3_128".parse::<AudioQuality>().unwrap(), AudioQuality::Standard);
        assert!("ogg".parse::<AudioQuality>().is_err());
    }

    #[test]
    fn fallback_lists_start_at_the_requested_format() {
        assert_eq!(AudioQuality::Lossless.formats()[0], Format::FLAC);
        assert_eq!(AudioQuality::High.formats()[0], Format::MP3_320);
        assert_eq!(AudioQuality::Standard.formats(), &[Format::MP3_128, Format::MP3_64]);
        assert!(AudioQuality::Unknown.formats().is_empty());

        for quality in [AudioQuality::Basic, AudioQuality::High, AudioQuality::Lossless] {
            assert_eq!(quality.formats().last(), Some(&Format::MP3_64));
        }
    }

    #[test]
    fn format_codes() {
        assert_eq!(Format::FLAC.code(), 9);
        assert_eq!(Format::MP3_320.code(), 3);
        assert_eq!(Format::MP3_256.code(), 5);
        assert_eq!(Format::MP3_128.code(), 1);
        assert_eq!(Format::MP3_64.code(), 10);
        assert_eq!(Format::MP3_MISC.code(), 0);
    }

    #[test]
    fn request_serializes_to_wire_format() {
        let request = Request {
            license_token: "license".to_string(),
            media: vec![Media {
                typ: Type::FULL,
                cipher_formats: vec![CipherFormat {
                    cipher: Cipher::BF_CBC_STRIPE,
                    format: Format::MP3_320,
                }],
            }],
            track_tokens: vec!["token".to_string()],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "license_token": "license",
                "media": [{
                    "type": "FULL",
                    "formats": [{"cipher": "BF_CBC_STRIPE", "format": "MP3_320"}]
                }],
                "track_tokens": ["token"]
            })
        );
    }

    #[test]
    fn response_parses_media_and_errors() {
        let body = r#"{"data": [{"media": [{
            "media_type": "FULL",
            "cipher": {"type": "BF_CBC_STRIPE"},
            "format": "MP3_128",
            "sources": [{"url": "https://cdn.example.com/a", "provider": "ak"}],
            "nbf": 1700000000,
            "exp": "1700003600"
        }]}, {"errors": [{"code": 2002, "message": "Track token has no sufficient rights on requested media"}]}]}"#;

        let response: Response = serde_json::from_str(body).unwrap();
        match &response.data[0] {
            Data::Media { media } => {
                assert_eq!(media[0].format, Format::MP3_128);
                assert_eq!(media[0].cipher.typ, Cipher::BF_CBC_STRIPE);
                assert_eq!(media[0].sources[0].url.host_str(), Some("cdn.example.com"));
            }
            Data::Errors { .. } => panic!("expected media"),
        }
        match &response.data[1] {
            Data::Errors { errors } => assert_eq!(errors[0].code, Error::INSUFFICIENT_RIGHTS),
            Data::Media { .. } => panic!("expected errors"),
        }
    }

    #[test]
    fn source_url_is_redacted() {
        let source = Source {
            url: "https://cdn.example.com/secret-path".parse().unwrap(),
            provider: "ak".to_string(),
        };
        assert!(!format!("{source:?}").contains("secret-path"));
    }
}
