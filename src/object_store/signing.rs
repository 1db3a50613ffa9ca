//! HMAC-signed URLs for the local storage backend, plus the encoding helpers
//! shared with the GCS V4 signer.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use ring::hmac;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("URL has expired")]
    Expired,
    #[error("Signature is malformed")]
    Malformed,
    #[error("Signature does not match")]
    Mismatch,
}

/// Signs and verifies `(method, key, expires)` triples with a shared secret.
pub struct UrlSigner {
    base_url: String,
    key: hmac::Key,
}

impl UrlSigner {
    pub fn new(base_url: &str, secret: &[u8]) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    fn message(method: &str, key: &str, expires: i64) -> String {
        format!("{method}\n{key}\n{expires}")
    }

    pub fn signature(&self, method: &str, key: &str, expires: i64) -> String {
        let tag = hmac::sign(&self.key, Self::message(method, key, expires).as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref())
    }

    /// Build a URL for `method` on `key` that stops working at `expires_at`.
    pub fn sign(&self, method: &str, key: &str, expires_at: DateTime<Utc>) -> String {
        let expires = expires_at.timestamp();
        format!(
            "{}/storage/{}?expires={}&signature={}",
            self.base_url,
            percent_encode_path(key),
            expires,
            self.signature(method, key, expires)
        )
    }

    pub fn verify(
        &self,
        method: &str,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let tag = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Malformed)?;

        hmac::verify(
            &self.key,
            Self::message(method, key, expires).as_bytes(),
            &tag,
        )
        .map_err(|_| SignatureError::Mismatch)?;

        let expires_at = Utc
            .timestamp_opt(expires, 0)
            .single()
            .ok_or(SignatureError::Malformed)?;
        if now >= expires_at {
            return Err(SignatureError::Expired);
        }

        Ok(())
    }
}

/// RFC 3986 unreserved characters; everything else is escaped.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as [`UNRESERVED`] but keeps path separators.
const PATH: &AsciiSet = &UNRESERVED.remove(b'/');

pub fn percent_encode_component(input: &str) -> String {
    utf8_percent_encode(input, UNRESERVED).to_string()
}

pub fn percent_encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}
