//! The `arl` session cookie that authenticates a user with Deezer.
//!
//! It is as good as a password: never logged and redacted from debug
//! output.

use std::{fmt, str::FromStr};

use veil::Redact;

use crate::error::{Error, Result};

/// Session credential, sent as the `arl` cookie.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Redact)]
#[redact(all)]
pub struct Arl(String);

impl Arl {
    /// Maximum length of an `arl` in characters.
    pub const MAX_LENGTH: usize = 192;
}

impl FromStr for Arl {
    type Err = Error;

    /// Parses an `arl`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the `arl` is empty, longer than
    /// [`Arl::MAX_LENGTH`] or contains characters that cannot be sent in a
    /// cookie.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::invalid_argument("arl is empty"));
        }

        let chars = s.chars().count();
        if chars > Self::MAX_LENGTH {
            return Err(Error::invalid_argument(format!(
                "arl should be at most {} characters long but is {chars}",
                Self::MAX_LENGTH
            )));
        }

        if let Some(chr) = s.chars().find(|chr| !chr.is_ascii_alphanumeric()) {
            return Err(Error::invalid_argument(format!(
                "arl contains illegal character '{}'",
                chr.escape_default()
            )));
        }

        Ok(Self(s.to_owned()))
    }
}

/// Writes the raw credential, for use in the cookie header only.
impl fmt::Display for Arl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepts_hex_credentials() {
        let raw = "a1b2c3".repeat(32);
        let arl: Arl = format!("  {raw}\n").parse().unwrap();
        assert_eq!(arl.to_string(), raw);
    }

    #[test]
    fn rejects_malformed_credentials() {
        for input in [String::new(), "a".repeat(193), "abc;def".to_string(), "ab cd".to_string()] {
            let err = input.parse::<Arl>().unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "{input}");
        }
    }

    #[test]
    fn debug_output_is_redacted() {
        let arl: Arl = "deadbeef".parse().unwrap();
        assert!(!format!("{arl:?}").contains("deadbeef"));
    }
}
