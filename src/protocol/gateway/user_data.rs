//! Session and license data from the gateway.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "USER": {
//!         "USER_ID": "123456789",
//!         "BLOG_NAME": "Username",
//!         "OPTIONS": {
//!             "license_token": "secret",
//!             "expiration_timestamp": 1234567890,
//!             "web_hq": true,
//!             "web_lossless": false
//!         }
//!     },
//!     "USER_TOKEN": "secret_token",
//!     "checkForm": "api_token",
//!     "URL_MEDIA": "https://media.deezer.com"
//! }
//! ```
//!
//! An `arl` the service does not accept yields `USER_ID` 0.

use std::{ops::Deref, str::FromStr, time::SystemTime};

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DisplayFromStr, PickFirst, TimestampSeconds};
use url::Url;
use veil::Redact;

use super::Method;

impl Method for UserData {
    const METHOD: &'static str = "deezer.getUserData";
}

/// User ID; 0 for anonymous sessions.
pub type UserId = u64;

/// Session data of the logged-in user.
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct UserData {
    #[serde(rename = "USER")]
    pub user: User,

    #[serde(default)]
    #[serde(rename = "USER_TOKEN")]
    #[redact]
    pub user_token: String,

    /// API token for subsequent gateway calls
    #[serde(rename = "checkForm")]
    #[redact]
    pub api_token: String,

    #[serde(default)]
    #[serde(rename = "URL_MEDIA")]
    pub media_url: MediaUrl,
}

impl UserData {
    /// Whether the service recognised the session credential.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.id != 0
    }
}

/// Media server URL, defaulting to <https://media.deezer.com>.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Debug, Hash)]
pub struct MediaUrl(pub Url);

impl Deref for MediaUrl {
    type Target = Url;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<MediaUrl> for Url {
    fn from(url: MediaUrl) -> Self {
        url.0
    }
}

impl Default for MediaUrl {
    fn default() -> Self {
        let media_url = Url::from_str("https://media.deezer.com").expect("invalid media url");
        Self(media_url)
    }
}

#[serde_as]
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Debug, Hash)]
pub struct User {
    #[serde(rename = "USER_ID")]
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: UserId,

    #[serde(default)]
    #[serde(rename = "BLOG_NAME")]
    pub name: String,

    #[serde(default)]
    #[serde(rename = "OPTIONS")]
    pub options: Options,
}

/// License options of the user.
#[serde_as]
#[derive(Clone, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Redact, Hash)]
pub struct Options {
    /// License token for the media API
    #[serde(default)]
    #[redact]
    pub license_token: String,

    /// License expiration time
    #[serde(default)]
    #[serde_as(as = "Option<TimestampSeconds<i64, Flexible>>")]
    pub expiration_timestamp: Option<SystemTime>,

    /// Whether 320 kbps streams are licensed
    #[serde(default)]
    pub web_hq: bool,

    /// Whether lossless streams are licensed
    #[serde(default)]
    pub web_lossless: bool,
}
