//! Webhook signature validation.
//!
//! The vendor signs every webhook with `base64(HMAC-SHA1(auth_token, payload))`
//! where the payload is the full public URL followed by each form parameter's
//! key and value, parameters sorted by key.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

/// Header carrying the vendor's claimed signature (lowercase for `http` lookups).
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature missing")]
    Missing,
    #[error("Signature invalid")]
    Invalid,
}

/// Recomputes and checks webhook signatures against the account's auth token.
#[derive(Clone)]
pub struct SignatureValidator {
    auth_token: String,
}

impl fmt::Debug for SignatureValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureValidator")
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl SignatureValidator {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
        }
    }

    /// Computes the signature for a URL and its decoded form parameters.
    pub fn sign(&self, url: &str, params: &[(String, String)]) -> String {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort();

        let mut mac = HmacSha1::new_from_slice(self.auth_token.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(url.as_bytes());
        for (key, value) in sorted {
            mac.update(key.as_bytes());
            mac.update(value.as_bytes());
        }
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Computes the signature for a URL and a raw `application/x-www-form-urlencoded` body.
    pub fn sign_body(&self, url: &str, body: &[u8]) -> String {
        self.sign(url, &parse_form(body))
    }

    /// Accepts the request iff the claimed signature matches the recomputed one.
    /// A blank header counts as missing.
    pub fn validate(&self, url: &str, body: &[u8], claimed: Option<&str>) -> Result<(), SignatureError> {
        let Some(claimed) = claimed.map(str::trim).filter(|c| !c.is_empty()) else {
            warn!(%url, "Webhook rejected: signature header missing");
            return Err(SignatureError::Missing);
        };

        let expected = self.sign_body(url, body);
        if bool::from(expected.as_bytes().ct_eq(claimed.as_bytes())) {
            debug!(%url, "Webhook signature verified");
            Ok(())
        } else {
            warn!(%url, "Webhook rejected: signature mismatch");
            Err(SignatureError::Invalid)
        }
    }
}

/// Decodes a form-encoded body into ordered key/value pairs.
pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}
