//! Locating the encrypted stream of a track.
//!
//! Two schemes are supported:
//!
//! * [`LocatorKind::Media`] asks the media API for signed CDN URLs, using
//!   the license token of the session and the token of the track.
//! * [`LocatorKind::Legacy`] builds a CDN URL directly from the track's
//!   origin hash, encrypted with a URL secret that must be configured.
//!
//! Either way the result is a list of candidate streams, best format
//! first, for the caller to try in order.

use std::{fmt, str::FromStr, time::SystemTime};

use aes::{
    cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit},
    Aes128,
};
use md5::{Digest, Md5};
use time::OffsetDateTime;
use url::Url;
use veil::Redact;

use crate::{
    decrypt::Key,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        gateway::UserData,
        media::{self, AudioQuality, Cipher, CipherFormat, Format},
    },
    track::{Track, TrackId},
};

/// How stream URLs are obtained.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum LocatorKind {
    #[default]
    Media,
    Legacy,
}

impl FromStr for LocatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "media" => Ok(Self::Media),
            "legacy" => Ok(Self::Legacy),
            _ => Err(Error::invalid_argument(format!("unknown locator \"{s}\""))),
        }
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Media => write!(f, "media"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// A candidate stream of a track.
#[derive(Clone, Eq, PartialEq, Hash, Redact)]
pub struct StreamHandle {
    /// Stream URL (redacted in debug output)
    #[redact]
    pub url: Url,
    pub format: Format,
    pub cipher: Cipher,
}

/// Finds stream URLs for tracks.
#[derive(Clone, Redact)]
pub struct StreamLocator {
    kind: LocatorKind,
    #[redact]
    url_secret: Option<Key>,
}

impl StreamLocator {
    const MEDIA_GET_URL: &'static str = "/v1/get_url";

    /// Separator between the fields of a legacy URL payload.
    const LEGACY_SEPARATOR: u8 = 0xA4;

    const AES_BLOCK_SIZE: usize = 16;

    /// # Errors
    ///
    /// Returns `FailedPrecondition` if `kind` is legacy and no URL secret is
    /// given.
    pub fn new(kind: LocatorKind, url_secret: Option<Key>) -> Result<Self> {
        if kind == LocatorKind::Legacy && url_secret.is_none() {
            return Err(Error::failed_precondition(
                "legacy stream urls need a url secret",
            ));
        }

        Ok(Self { kind, url_secret })
    }

    #[must_use]
    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    /// Lists candidate streams of `track` for `quality`, best first.
    ///
    /// # Errors
    ///
    /// * `Unavailable` if the track token has expired
    /// * `PermissionDenied` if the license does not cover any format
    /// * `NotFound` if no stream exists for any format
    pub async fn locate(
        &self,
        client: &HttpClient,
        user_data: &UserData,
        track: &Track,
        quality: AudioQuality,
    ) -> Result<Vec<StreamHandle>> {
        let formats = quality.formats();
        if formats.is_empty() {
            return Err(Error::invalid_argument(format!(
                "no formats for {quality} audio quality"
            )));
        }

        let handles = match self.kind {
            LocatorKind::Media => Self::media(client, user_data, track, formats).await?,
            LocatorKind::Legacy => self.legacy(track, formats)?,
        };

        if handles.is_empty() {
            return Err(Error::not_found(format!(
                "no streams found for track {track} in {quality} audio quality"
            )));
        }

        Ok(handles)
    }

    async fn media(
        client: &HttpClient,
        user_data: &UserData,
        track: &Track,
        formats: &[Format],
    ) -> Result<Vec<StreamHandle>> {
        if track.expiry() <= SystemTime::now() {
            return Err(Error::unavailable(format!(
                "track {track} no longer available since {}",
                OffsetDateTime::from(track.expiry())
            )));
        }

        let license_token = &user_data.user.options.license_token;
        if license_token.is_empty() {
            return Err(Error::permission_denied("session has no license token"));
        }

        let request = media::Request {
            license_token: license_token.clone(),
            track_tokens: vec![track.track_token().to_owned()],
            media: vec![media::Media {
                typ: media::Type::FULL,
                cipher_formats: formats
                    .iter()
                    .map(|&format| CipherFormat {
                        cipher: Cipher::BF_CBC_STRIPE,
                        format,
                    })
                    .collect(),
            }],
        };
        trace!("{}: {request:#?}", Self::MEDIA_GET_URL);

        let get_url = user_data.media_url.join(Self::MEDIA_GET_URL)?;
        let response = client
            .unlimited
            .post(get_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::credentialed)?;
        let body = response.text().await?;
        let response: media::Response = crate::protocol::json(&body, Self::MEDIA_GET_URL)?;

        Self::handles_from_response(track, response, SystemTime::now())
    }

    fn handles_from_response(
        track: &Track,
        response: media::Response,
        now: SystemTime,
    ) -> Result<Vec<StreamHandle>> {
        let mut handles = Vec::new();
        let mut errors = Vec::new();

        for data in response.data {
            let media = match data {
                media::Data::Media { media } => media,
                media::Data::Errors { errors: mut e } => {
                    errors.append(&mut e);
                    continue;
                }
            };

            for medium in media {
                // The link may have expired and need refreshing, or the track
                // may not be available yet or anymore.
                if medium.not_before > now {
                    warn!(
                        "track {track} is not available in {} until {}",
                        medium.format,
                        OffsetDateTime::from(medium.not_before)
                    );
                    continue;
                }
                if medium.expiry <= now {
                    warn!(
                        "track {track} is no longer available in {} since {}",
                        medium.format,
                        OffsetDateTime::from(medium.expiry)
                    );
                    continue;
                }

                for source in medium.sources {
                    // URLs can theoretically be non-HTTP.
                    if !matches!(source.url.scheme(), "http" | "https") {
                        warn!("skipping non-http source for track {track}");
                        continue;
                    }

                    handles.push(StreamHandle {
                        url: source.url,
                        format: medium.format,
                        cipher: medium.cipher.typ,
                    });
                }
            }
        }

        if handles.is_empty() {
            if let Some(error) = errors.first() {
                let message = format!("no media for track {track}: {error}");
                return Err(if error.code == media::Error::INSUFFICIENT_RIGHTS {
                    Error::permission_denied(message)
                } else {
                    Error::not_found(message)
                });
            }
        }

        Ok(handles)
    }

    fn legacy(&self, track: &Track, formats: &[Format]) -> Result<Vec<StreamHandle>> {
        let secret = self
            .url_secret
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("legacy stream urls need a url secret"))?;

        let mut handles = Vec::new();
        for &format in formats {
            if track.file_size(format) == Some(0) {
                debug!("track {track} is not available in {format}");
                continue;
            }

            let url = legacy_url(
                track.md5_origin(),
                format,
                track.id(),
                track.media_version(),
                secret,
            )?;
            handles.push(StreamHandle {
                url,
                format,
                cipher: Cipher::BF_CBC_STRIPE,
            });
        }

        Ok(handles)
    }
}

/// Builds a legacy CDN URL.
///
/// The payload joins the origin hash, format code, track ID and media
/// version with `0xA4` separators, prefixes the hex MD5 digest of that,
/// pads with zeros to the AES block size and encrypts it with AES-128-ECB.
///
/// # Errors
///
/// Returns `NotFound` if `md5_origin` is empty, or `MalformedCipherInput`
/// if the secret cannot key AES-128.
pub fn legacy_url(
    md5_origin: &str,
    format: Format,
    track_id: TrackId,
    media_version: &str,
    secret: &Key,
) -> Result<Url> {
    let Some(host_char) = md5_origin.chars().next() else {
        return Err(Error::not_found(format!(
            "track {track_id} has no origin hash"
        )));
    };

    let separator = [StreamLocator::LEGACY_SEPARATOR];
    let code = format.code().to_string();
    let id = track_id.to_string();
    let data = [
        md5_origin.as_bytes(),
        code.as_bytes(),
        id.as_bytes(),
        media_version.as_bytes(),
    ]
    .join(&separator[..]);

    let digest = format!("{:x}", Md5::digest(&data));
    let mut payload = [digest.as_bytes(), &data[..]].join(&separator[..]);
    payload.push(StreamLocator::LEGACY_SEPARATOR);

    let remainder = payload.len() % StreamLocator::AES_BLOCK_SIZE;
    if remainder != 0 {
        payload.resize(
            payload.len() + StreamLocator::AES_BLOCK_SIZE - remainder,
            0,
        );
    }

    let cipher = Aes128::new_from_slice(&**secret)
        .map_err(|e| Error::malformed_cipher_input(e.to_string()))?;
    for block in payload.chunks_exact_mut(StreamLocator::AES_BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    let hex: String = payload.iter().map(|byte| format!("{byte:02x}")).collect();
    let url = format!("https://e-cdn-proxy-{host_char}.dzcdn.net/api/1/{hex}");
    url.parse().map_err(Into::into)
}
