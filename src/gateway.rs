//! Session management with Deezer's gateway API.
//!
//! The gateway authenticates with the `arl` cookie and hands out:
//! * an API token for subsequent gateway calls
//! * a license token for the media API
//! * track data needed to locate streams
//!
//! Session data is refreshed when absent, when the license expires, or
//! after an hour, whichever comes first.

use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        gateway::{self, page_track, Failure, Method, PageTrack, UserData},
    },
    track::{Track, TrackId},
};

/// Client of the gateway API, holding the current session.
pub struct Gateway {
    http_client: HttpClient,
    user_data: Option<UserData>,
    refreshed_at: Option<Instant>,
    client_id: usize,
}

impl Gateway {
    const COOKIE_ORIGIN: &'static str = "https://www.deezer.com";

    const GATEWAY_URL: &'static str = "https://www.deezer.com/ajax/gw-light.php";

    const GATEWAY_VERSION: &'static str = "1.0";

    const GATEWAY_INPUT: usize = 3;

    const PLAIN_TEXT_CONTENT: HeaderValue = HeaderValue::from_static("text/plain;charset=UTF-8");

    const EMPTY_JSON_OBJECT: &'static str = "{}";

    /// Maximum age of session data before it is refreshed.
    const SESSION_TTL: Duration = Duration::from_secs(3600);

    fn cookie_origin() -> Url {
        Url::parse(Self::COOKIE_ORIGIN).expect("invalid cookie origin")
    }

    fn cookie_jar(config: &Config) -> reqwest::cookie::Jar {
        let cookie_jar = reqwest::cookie::Jar::default();
        let cookie_origin = Self::cookie_origin();

        let lang_cookie = format!(
            "dz_lang={}; Domain=deezer.com; Path=/; Secure; HttpOnly",
            &config.app_lang
        );
        cookie_jar.add_cookie_str(&lang_cookie, &cookie_origin);

        let arl_cookie = format!(
            "arl={}; Domain=deezer.com; Path=/; Secure; HttpOnly",
            config.arl
        );
        cookie_jar.add_cookie_str(&arl_cookie, &cookie_origin);

        cookie_jar
    }

    /// Creates a gateway client. No request is made until the session is
    /// first needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let cookie_jar = Self::cookie_jar(config);
        let http_client = HttpClient::with_cookies(config, cookie_jar)?;

        Ok(Self {
            client_id: config.client_id,
            http_client,
            user_data: None,
            refreshed_at: None,
        })
    }

    /// Fetches fresh session data.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationRejected` if the service does not accept the
    /// `arl`, or any error of the request.
    pub async fn refresh(&mut self) -> Result<()> {
        let response = match self
            .request::<UserData>(Self::EMPTY_JSON_OBJECT.to_string())
            .await
        {
            Ok(response) => response,
            // For an invalid or expired `arl`, the response can have some
            // fields as integer `0` which are normally typed as string.
            Err(e) if e.kind == crate::error::ErrorKind::InvalidArgument => {
                return Err(Error::authentication_rejected(format!(
                    "{e}: please refresh your arl"
                )));
            }
            Err(e) => return Err(e),
        };

        let data = response
            .into_first()
            .ok_or_else(|| Error::unavailable("no user data received"))?;

        if !data.is_authenticated() {
            return Err(Error::authentication_rejected(
                "arl is invalid or expired, please refresh it",
            ));
        }

        debug!("logged in as user {}", data.user.id);
        self.user_data = Some(data);
        self.refreshed_at = Some(Instant::now());

        Ok(())
    }

    /// Calls gateway method `T` with a JSON `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the gateway reports an error,
    /// or the response does not parse as `T`.
    pub async fn request<T>(&self, body: String) -> Result<gateway::Response<T>>
    where
        T: std::fmt::Debug + Method + for<'de> Deserialize<'de>,
    {
        // Get the API token from the user data or use an empty string.
        let api_token = self
            .user_data
            .as_ref()
            .map(|data| data.api_token.as_str())
            .unwrap_or_default();

        // Check the URL early to not needlessly hit the rate limiter.
        let url_str = format!(
            "{}?method={}&input={}&api_version={}&api_token={api_token}&cid={}",
            Self::GATEWAY_URL,
            T::METHOD,
            Self::GATEWAY_INPUT,
            Self::GATEWAY_VERSION,
            self.client_id,
        );
        let url = url_str.parse::<Url>()?;
        let mut request = self.http_client.post(url, body);
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, Self::PLAIN_TEXT_CONTENT)?;

        let response = self
            .http_client
            .execute(request)
            .await?
            .error_for_status()
            .map_err(Error::credentialed)?;
        let body = response.text().await?;

        // Failed calls carry an error object that does not parse as a
        // regular response.
        if let Ok(failure) = serde_json::from_str::<Failure>(&body) {
            if !failure.error.is_empty() {
                return Err(Self::failure_to_error(T::METHOD, &failure));
            }
        }

        protocol::json(&body, T::METHOD)
    }

    fn failure_to_error(method: &str, failure: &Failure) -> Error {
        warn!("{method}: {failure}");
        if failure.is_authentication_failure() {
            Error::authentication_rejected(failure.to_string())
        } else if failure.is_data_error() {
            Error::not_found(failure.to_string())
        } else {
            Error::unknown(failure.to_string())
        }
    }

    /// Whether the session data must be refreshed before use.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let (Some(data), Some(refreshed_at)) = (&self.user_data, self.refreshed_at) else {
            return true;
        };

        if refreshed_at.elapsed() >= Self::SESSION_TTL {
            return true;
        }

        data.user
            .options
            .expiration_timestamp
            .is_some_and(|expiry| expiry <= SystemTime::now())
    }

    async fn ensure_session(&mut self) -> Result<&UserData> {
        if self.is_expired() {
            self.refresh().await?;
        }

        self.user_data
            .as_ref()
            .ok_or_else(|| Error::unavailable("user data unavailable"))
    }

    /// Current session data, refreshed first if needed.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationRejected` if the `arl` is not accepted.
    pub async fn user_data(&mut self) -> Result<UserData> {
        self.ensure_session().await.cloned()
    }

    /// Fetches the track data needed to locate streams of `track_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the track does not exist, or
    /// `AuthenticationRejected` if the `arl` is not accepted.
    pub async fn track(&mut self, track_id: TrackId) -> Result<Track> {
        self.ensure_session().await?;

        let body = serde_json::to_string(&page_track::Request { track_id })?;
        let page = self
            .request::<PageTrack>(body)
            .await?
            .into_first()
            .ok_or_else(|| Error::not_found(format!("no data for track {track_id}")))?;

        if page.data.track_id != track_id {
            return Err(Error::failed_precondition(format!(
                "requested track {track_id} but received {}",
                page.data.track_id
            )));
        }

        let track = Track::from(page);
        debug!("track {track}");
        Ok(track)
    }
}
