//! HTTP client with rate limiting and cookie management for Deezer APIs.
//!
//! Wraps `reqwest::Client` and adds:
//! * Request rate limiting for metadata endpoints
//! * Cookie management for authentication
//! * Consistent timeouts and headers
//!
//! # Rate Limiting
//!
//! Metadata requests through [`Client::execute`] are limited to 50 calls
//! per 5-second interval, allowing bursts up to that number. Stream
//! downloads go through [`Client::unlimited`] as they are few but long.

use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    cookie::CookieStore,
    header::{HeaderValue, ACCEPT_LANGUAGE},
    Body, Method, Url,
};
use serde::Deserialize;

use crate::{config::Config, error::Result, protocol};

/// Rate-limited HTTP client.
pub struct Client {
    /// Client without rate limiting, for stream downloads.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Maximum time between two reads of a response. Bounds how long a
    /// stalled stream goes unnoticed.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new client, optionally with a cookie store.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    ///
    /// # Panics
    ///
    /// Panics if the rate limit constants are zero.
    pub fn new<C>(config: &Config, cookie_jar: Option<C>) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let mut http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        if let Some(jar) = cookie_jar {
            http_client = http_client.cookie_provider(Arc::new(jar));
        }

        // Rate limit own requests as to not DoS the Deezer infrastructure.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Creates a client that stores and sends cookies from `cookie_jar`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn with_cookies<C>(config: &Config, cookie_jar: C) -> Result<Self>
    where
        C: CookieStore + 'static,
    {
        Self::new(config, Some(cookie_jar))
    }

    /// Creates a client for public endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn without_cookies(config: &Config) -> Result<Self> {
        // Need to specify a type that satisfies the trait bounds.
        Self::new(config, None::<reqwest::cookie::Jar>)
    }

    #[must_use]
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    #[must_use]
    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, body)
    }

    /// Creates a `GET` request without a body.
    #[must_use]
    pub fn get<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        reqwest::Request::new(Method::GET, url.into())
    }

    /// Executes a request once the rate limiter allows it.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Executes a request and parses its JSON response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server responds with an
    /// error status, or the body does not parse as `T`.
    pub async fn json<T>(&self, request: reqwest::Request, origin: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de> + std::fmt::Debug,
    {
        let response = self.execute(request).await?.error_for_status()?;
        let body = response.text().await?;
        protocol::json(&body, origin)
    }
}
