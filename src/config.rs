//! Runtime configuration and secrets.
//!
//! Secrets are read from a TOML file:
//!
//! ```toml
//! arl = "..."          # session cookie
//! bf_secret = "..."    # 16-byte master secret for track keys
//! url_secret = "..."   # optional, 16-byte key for legacy stream URLs
//! ```
//!
//! None of these are embedded in the program.

use std::{fs, path::Path};

use serde::Deserialize;
use veil::Redact;

use crate::{
    arl::Arl,
    decrypt::Key,
    error::{Error, Result},
    fetch::FetchSettings,
    locator::LocatorKind,
};

/// Secrets that authenticate the session and derive keys.
#[derive(Clone, Redact)]
pub struct Secrets {
    #[redact]
    pub arl: Arl,
    #[redact]
    pub bf_secret: Key,
    #[redact]
    pub url_secret: Option<Key>,
}

#[derive(Deserialize)]
struct SecretsFile {
    arl: String,
    bf_secret: String,
    url_secret: Option<String>,
}

impl Secrets {
    /// Secrets files are small; refuse anything larger.
    const MAX_FILE_SIZE: u64 = 1024;

    /// Loads secrets from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is larger than 1 KiB,
    /// is not valid TOML, or holds a malformed value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: the file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }
}

impl std::str::FromStr for Secrets {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let file: SecretsFile = toml::from_str(s)?;
        Ok(Self {
            arl: file.arl.parse()?,
            bf_secret: file.bf_secret.parse()?,
            url_secret: file.url_secret.as_deref().map(str::parse::<Key>).transpose()?,
        })
    }
}

/// Configuration of a [`Downloader`](crate::download::Downloader).
#[derive(Clone, Redact)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    pub user_agent: String,

    /// Client ID sent with gateway calls
    pub client_id: usize,

    #[redact]
    pub arl: Arl,
    #[redact]
    pub bf_secret: Key,
    #[redact]
    pub url_secret: Option<Key>,

    pub locator: LocatorKind,
    pub fetch: FetchSettings,
}

impl Config {
    /// Creates a configuration with default settings.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the application name, version or language
    /// cannot be put in a `User-Agent` header.
    pub fn new(secrets: Secrets) -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            return Err(Error::internal(format!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        // Distributions may put anything in their version string.
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty())
            .unwrap_or_else(|| String::from("0"))
            .replace(['/', ';'], "-");

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,
            app_lang,

            user_agent,
            client_id: fastrand::usize(100_000_000..1_000_000_000),

            arl: secrets.arl,
            bf_secret: secrets.bf_secret,
            url_secret: secrets.url_secret,

            locator: LocatorKind::default(),
            fetch: FetchSettings::default(),
        })
    }
}
