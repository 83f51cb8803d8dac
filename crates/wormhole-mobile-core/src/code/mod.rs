//! Wormhole code parsing and input normalization.
//!
//! Codes arrive in two ways: typed into the receive field, or scanned from a
//! QR code. Scanned codes are URIs in one of two schemes:
//!
//! - `wormhole:<rendezvous-url>?code=<code>`
//! - `wormhole-transfer:<code>[?rendezvous=<url>&version=0&role=follower]`
//!
//! The code part of the second form is percent-encoded.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wormhole_mobile_core::code::CodeUri;
//!
//! let uri = CodeUri::parse("wormhole-transfer:7-some-code")?;
//! assert_eq!(uri.code, "7-some-code");
//! ```

use url::{form_urlencoded, Url};

use crate::error::{Error, Result};

/// Scheme used by wormhole-william share links.
pub const WORMHOLE_SCHEME: &str = "wormhole";

/// Scheme used by magic-wormhole transfer links.
pub const TRANSFER_SCHEME: &str = "wormhole-transfer";

/// A code extracted from a scanned URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUri {
    /// The wormhole code
    pub code: String,
    /// Rendezvous server carried by the URI, if any
    pub rendezvous_url: Option<String>,
}

impl CodeUri {
    /// Parse a scanned code URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCode`] if the input is not a wormhole URI or
    /// carries no code.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|_| Error::InvalidCode("not a wormhole code".to_string()))?;

        match url.scheme() {
            WORMHOLE_SCHEME => Self::from_wormhole(&url),
            TRANSFER_SCHEME => Self::from_transfer(&url),
            _ => Err(Error::InvalidCode("not a wormhole code".to_string())),
        }
    }

    fn from_wormhole(url: &Url) -> Result<Self> {
        let code = query_value(url, "code")
            .filter(|code| !code.is_empty())
            .ok_or_else(|| Error::InvalidCode("no code".to_string()))?;

        let rendezvous_url = Url::parse(url.path())
            .ok()
            .filter(|relay| relay.has_host())
            .map(|relay| relay.to_string());

        Ok(Self {
            code,
            rendezvous_url,
        })
    }

    fn from_transfer(url: &Url) -> Result<Self> {
        let code = percent_decode(url.path());
        if code.is_empty() {
            return Err(Error::InvalidCode("no code".to_string()));
        }

        Ok(Self {
            code,
            rendezvous_url: query_value(url, "rendezvous").filter(|relay| !relay.is_empty()),
        })
    }
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn percent_decode(raw: &str) -> String {
    form_urlencoded::parse(format!("v={raw}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Normalize text typed into the receive-code field.
///
/// Spaces become the `-` word separator and line breaks are dropped, so a
/// code read aloud as words can be typed naturally.
pub fn normalize_code_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r'))
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}
