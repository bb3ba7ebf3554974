// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Provider credentials
//!
//! [`ApiKey`] can only hold a non-blank value, so a provider client that was built at
//! all has a usable credential. Its `Debug` output is redacted; configuration structs
//! holding keys derive `Debug` freely and still never print a secret into the logs.

use core::fmt;
use std::str::FromStr;

/// A non-blank provider credential
///
/// ```rust
/// use external_apis::ApiKey;
///
/// let key = ApiKey::new("cqt_live_123").unwrap();
/// assert_eq!(key.expose(), "cqt_live_123");
/// assert_eq!(format!("{key:?}"), "ApiKey(\"cqt_***\")");
///
/// assert!(ApiKey::new("   ").is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Box<str>);

impl ApiKey {
    /// Wrap a credential, trimming surrounding whitespace
    ///
    /// Keys pasted into environment variables regularly carry a trailing newline.
    pub fn new(key: impl Into<String>) -> Result<Self, String> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            Err("API key cannot be empty or whitespace-only".to_string())
        } else {
            Ok(ApiKey(trimmed.into()))
        }
    }

    /// The credential itself, for building requests
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        f.debug_tuple("ApiKey").field(&format!("{prefix}***")).finish()
    }
}

impl FromStr for ApiKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
