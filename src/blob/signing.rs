//! Retrieval URLs for stored objects.
//!
//! Signed URLs carry the signer identity, an absolute expiry and a SHA-256
//! signature over the signing key and the request shape, so a URL minted for
//! one key can never be reused for another.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use thiserror::Error;

const SIGNED_URL_HOST: &str = "https://storage.googleapis.com";
const PUBLIC_URL_HOST: &str = "https://firebasestorage.googleapis.com";

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Unreserved characters of a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Far-future date used for links that are meant to stay valid.
const FAR_FUTURE: (i32, u32, u32) = (2499, 12, 31);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpiryParseError {
    #[error("expected YYYY-MM-DD, <days>d or 'permanent', got '{0}'")]
    Unrecognised(String),
    #[error("relative expiry must be at least one day")]
    ZeroDays,
}

/// When a minted URL stops working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlExpiry {
    At(DateTime<Utc>),
    After(Duration),
}

impl UrlExpiry {
    pub fn far_future() -> Self {
        let (y, m, d) = FAR_FUTURE;
        UrlExpiry::At(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn one_year() -> Self {
        UrlExpiry::After(Duration::days(365))
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            UrlExpiry::At(at) => *at,
            UrlExpiry::After(delta) => now + *delta,
        }
    }
}

impl Default for UrlExpiry {
    fn default() -> Self {
        UrlExpiry::far_future()
    }
}

impl FromStr for UrlExpiry {
    type Err = ExpiryParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("permanent") {
            return Ok(UrlExpiry::far_future());
        }
        if let Some(days) = raw.strip_suffix('d') {
            let days: i64 = days
                .parse()
                .map_err(|_| ExpiryParseError::Unrecognised(raw.to_string()))?;
            if days <= 0 {
                return Err(ExpiryParseError::ZeroDays);
            }
            return Ok(UrlExpiry::After(Duration::days(days)));
        }
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ExpiryParseError::Unrecognised(raw.to_string()))?;
        let at = date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| ExpiryParseError::Unrecognised(raw.to_string()))?;
        Ok(UrlExpiry::At(at))
    }
}

impl fmt::Display for UrlExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlExpiry::At(at) => write!(f, "{}", at.format("%Y-%m-%d")),
            UrlExpiry::After(delta) => write!(f, "{}d", delta.num_days()),
        }
    }
}

/// Mints retrieval URLs on behalf of a service account.
#[derive(Clone)]
pub struct UrlSigner {
    client_email: String,
    signing_key: Vec<u8>,
}

impl fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSigner")
            .field("client_email", &self.client_email)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl UrlSigner {
    pub fn new(client_email: impl Into<String>, private_key: &str) -> Self {
        Self {
            client_email: client_email.into(),
            signing_key: private_key.as_bytes().to_vec(),
        }
    }

    /// Read URL for `key`, valid until `expires`.
    pub fn signed_url(&self, bucket: &str, key: &str, expires: DateTime<Utc>) -> String {
        let expires = expires.timestamp();
        let resource = format!("/{bucket}/{}", encode_key_path(key));
        let signature = self.signature(&resource, expires);
        format!(
            "{SIGNED_URL_HOST}{resource}?GoogleAccessId={}&Expires={expires}&Signature={signature}",
            utf8_percent_encode(&self.client_email, URI_COMPONENT),
        )
    }

    /// Whether `url` carries a valid signature from this signer. Expiry is not
    /// checked.
    pub fn verify(&self, url: &str) -> bool {
        let Some(rest) = url.strip_prefix(SIGNED_URL_HOST) else {
            return false;
        };
        let Some((resource, query)) = rest.split_once('?') else {
            return false;
        };
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("Expires", value)) => expires = value.parse::<i64>().ok(),
                Some(("Signature", value)) => signature = Some(value),
                _ => {}
            }
        }
        match (expires, signature) {
            (Some(expires), Some(signature)) => self.signature(resource, expires) == signature,
            _ => false,
        }
    }

    fn signature(&self, resource: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.signing_key);
        hasher.update(b"\nGET\n");
        hasher.update(expires.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(resource.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Download URL served through the public media endpoint; access is governed
/// by bucket rules rather than a signature.
pub fn public_url(bucket: &str, key: &str) -> String {
    format!(
        "{PUBLIC_URL_HOST}/v0/b/{bucket}/o/{}?alt=media",
        utf8_percent_encode(key, URI_COMPONENT)
    )
}

fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("admin@tu-recorrido-dev.iam.gserviceaccount.com", "test-key")
    }

    #[test]
    fn parses_expiry_forms() {
        assert_eq!("2499-12-31".parse::<UrlExpiry>().unwrap(), UrlExpiry::far_future());
        assert_eq!("permanent".parse::<UrlExpiry>().unwrap(), UrlExpiry::far_future());
        assert_eq!("365d".parse::<UrlExpiry>().unwrap(), UrlExpiry::one_year());
        assert_eq!("0d".parse::<UrlExpiry>(), Err(ExpiryParseError::ZeroDays));
        assert!(matches!(
            "tomorrow".parse::<UrlExpiry>(),
            Err(ExpiryParseError::Unrecognised(_))
        ));
        assert_eq!(UrlExpiry::far_future().to_string(), "2499-12-31");
        assert_eq!(UrlExpiry::one_year().to_string(), "365d");
    }

    #[test]
    fn relative_expiry_counts_from_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let resolved = UrlExpiry::one_year().resolve(now);
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn signed_urls_depend_on_key_and_verify() {
        let signer = signer();
        let expires = UrlExpiry::far_future().resolve(Utc::now());
        let a = signer.signed_url("bucket", "places/B/photo.jpg", expires);
        let b = signer.signed_url("bucket", "estaciones/B/photo.jpg", expires);
        assert_ne!(a, b);
        assert!(a.starts_with("https://storage.googleapis.com/bucket/places/B/photo.jpg?"));
        assert!(a.contains("GoogleAccessId=admin%40tu-recorrido-dev.iam.gserviceaccount.com"));
        assert!(signer.verify(&a));
        assert!(signer.verify(&b));
        assert!(!UrlSigner::new("admin@x", "other-key").verify(&a));

        let tampered = a.replace("places", "estaciones");
        assert!(!signer.verify(&tampered));
    }

    #[test]
    fn signed_urls_are_stable_for_fixed_expiry() {
        let signer = signer();
        let expires = UrlExpiry::far_future().resolve(Utc::now());
        assert_eq!(
            signer.signed_url("bucket", "estaciones/B/a b.jpg", expires),
            signer.signed_url("bucket", "estaciones/B/a b.jpg", expires)
        );
        assert!(signer
            .signed_url("bucket", "estaciones/B/a b.jpg", expires)
            .contains("/estaciones/B/a%20b.jpg?"));
    }

    #[test]
    fn public_url_encodes_whole_key() {
        assert_eq!(
            public_url("tu-recorrido-dev.firebasestorage.app", "users/u1/profile.jpg"),
            "https://firebasestorage.googleapis.com/v0/b/tu-recorrido-dev.firebasestorage.app/o/users%2Fu1%2Fprofile.jpg?alt=media"
        );
    }
}
