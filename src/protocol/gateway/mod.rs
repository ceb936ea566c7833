//! Gateway API types for Deezer's web services.
//!
//! * Session and license data ([`user_data`])
//! * Track data needed to locate streams ([`page_track`])
//!
//! # Number Handling
//!
//! All numeric values are stored as 64-bit integers because the JSON protocol
//! doesn't distinguish between number sizes. Several numbers arrive as
//! strings and are parsed leniently.
//!
//! # Response Types
//!
//! Successful calls return either a paginated list ([`Response::Paginated`])
//! or plain results ([`Response::Unpaginated`]). Failed calls carry an
//! error object instead, which is parsed as a [`Failure`].

pub mod page_track;
pub mod user_data;

pub use page_track::{Contributors, Lyrics, PageTrack, TrackData};
pub use user_data::{MediaUrl, UserData};

use std::{collections::HashMap, convert::Infallible, fmt, ops::Deref, str::FromStr};

use serde::Deserialize;
use serde_with::serde_as;

/// Defines a gateway API method identifier.
pub trait Method {
    /// The gateway API method name, in Deezer's dot-notation
    /// (e.g. "deezer.pageTrack").
    const METHOD: &'static str;
}

/// Response from a gateway API endpoint.
///
/// Paginated format:
/// ```json
/// {
///     "error": [],
///     "results": {
///         "data": [...],
///         "count": 10,
///         "total": 100,
///         "filtered_count": 10
///     }
/// }
/// ```
///
/// Unpaginated format:
/// ```json
/// {
///     "error": [],
///     "results": {...}
/// }
/// ```
#[serde_as]
#[derive(Clone, PartialEq, Deserialize, Debug)]
#[serde(untagged)]
pub enum Response<T> {
    Paginated {
        #[serde_as(as = "serde_with::Seq<(_, _)>")]
        error: HashMap<String, serde_json::Value>,
        results: Paginated<T>,
    },

    Unpaginated {
        #[serde_as(as = "serde_with::Seq<(_, _)>")]
        error: HashMap<String, serde_json::Value>,
        /// Result items (single item or array)
        #[serde_as(as = "serde_with::OneOrMany<_>")]
        results: Vec<T>,
    },
}

impl<T> Response<T> {
    /// Returns the first result item, if any.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.all().first()
    }

    /// Returns all result items, paginated or not.
    #[must_use]
    pub fn all(&self) -> &Vec<T> {
        match self {
            Self::Paginated { results, .. } => &results.data,
            Self::Unpaginated { results, .. } => results,
        }
    }

    /// Takes ownership of the first result item, if any.
    #[must_use]
    pub fn into_first(self) -> Option<T> {
        let results = match self {
            Self::Paginated { results, .. } => results.data,
            Self::Unpaginated { results, .. } => results,
        };
        results.into_iter().next()
    }
}

/// Paginated result set.
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub count: u64,
    pub total: u64,
    pub filtered_count: u64,
}

/// Response of a failed gateway call.
///
/// ```json
/// {
///     "error": {"VALID_TOKEN_REQUIRED": "Invalid CSRF token"},
///     "results": {}
/// }
/// ```
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Failure {
    pub error: HashMap<String, serde_json::Value>,
}

impl Failure {
    /// Error codes that mean the session credential was not accepted.
    pub const AUTHENTICATION_CODES: [&'static str; 3] = [
        "VALID_TOKEN_REQUIRED",
        "NEED_USER_AUTH_REQUIRED",
        "GATEWAY_ERROR",
    ];

    /// Error code for lookups of content that does not exist.
    pub const DATA_ERROR: &'static str = "DATA_ERROR";

    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        Self::AUTHENTICATION_CODES
            .iter()
            .any(|code| self.error.contains_key(*code))
    }

    #[must_use]
    pub fn is_data_error(&self) -> bool {
        self.error.contains_key(Self::DATA_ERROR)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut codes: Vec<_> = self.error.iter().collect();
        codes.sort_by(|a, b| a.0.cmp(b.0));

        let mut first = true;
        for (code, message) in codes {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match message.as_str() {
                Some(message) => write!(f, "{code}: {message}")?,
                None => write!(f, "{code}: {message}")?,
            }
        }
        Ok(())
    }
}

/// String value that defaults to "UNKNOWN" when missing.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Debug, Hash)]
pub struct StringOrUnknown(pub String);

impl Deref for StringOrUnknown {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for StringOrUnknown {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl Default for StringOrUnknown {
    fn default() -> Self {
        Self(String::from("UNKNOWN"))
    }
}
