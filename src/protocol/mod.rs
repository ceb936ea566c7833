//! Wire types of the Deezer services.
//!
//! * [`api`] - Public catalog API
//! * [`gateway`] - Gateway API for session and track data
//! * [`media`] - Media API, formats and ciphers

pub mod api;
pub mod gateway;
pub mod media;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Parses and logs JSON responses from Deezer APIs.
///
/// `origin` names the endpoint in log output.
///
/// # Errors
///
/// Returns an error if the body is not valid JSON or does not match `T`.
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error and raw text at ERROR level
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{}: {result:#?}", origin);
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{}: {json:#?}", origin);
            } else {
                error!("{}: failed parsing response ({e:?})", origin);
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
