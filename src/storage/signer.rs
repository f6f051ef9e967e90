//! Time-limited download links.
//!
//! A link authorizes a `GET` of one object key until its expiry. The signature is an
//! HMAC-SHA256 over `"{key}\n{expires}"` keyed by the configured signing secret, hex encoded in
//! the `signature` query parameter next to the unix `expires` timestamp.

use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

type HmacSha256 = Hmac<Sha256>;

/// Errors raised while issuing or verifying download links.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// Public base URL cannot host path segments.
    #[error("Invalid public base URL: {0}")]
    InvalidBaseUrl(String),
    /// Signing secret cannot key the MAC.
    #[error("Signing secret rejected")]
    InvalidSecret,
    /// Link expiry lies in the past.
    #[error("Download link expired")]
    Expired,
    /// Signature does not match the key and expiry.
    #[error("Download link signature mismatch")]
    BadSignature,
}

/// Issues and verifies signed download links for stored objects.
#[derive(Clone)]
pub struct UrlSigner {
    keyed: HmacSha256,
    base_url: Url,
    ttl: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url.as_str())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    /// Create a signer issuing links below `base_url` that stay valid for `ttl_secs`.
    pub fn new(secret: &str, base_url: &str, ttl_secs: u64) -> Result<Self, LinkError> {
        let base_url =
            Url::parse(base_url).map_err(|error| LinkError::InvalidBaseUrl(error.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(LinkError::InvalidBaseUrl(base_url.to_string()));
        }
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .map_err(|_| LinkError::InvalidSecret)?;
        Ok(Self {
            keyed,
            base_url,
            ttl: Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
        })
    }

    /// Issue a link for `key` valid from now for the configured lifetime.
    pub fn sign(&self, key: &str) -> String {
        self.sign_at(key, OffsetDateTime::now_utc())
    }

    /// Issue a link for `key` valid from `now` for the configured lifetime.
    pub fn sign_at(&self, key: &str, now: OffsetDateTime) -> String {
        let expires = now.saturating_add(self.ttl).unix_timestamp();
        let signature = hex::encode(self.digest(key, expires));

        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("files").extend(key.split('/'));
        }
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);
        url.to_string()
    }

    /// Check that `signature` authorizes `key` until `expires` and that `now` precedes it.
    pub fn verify(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> Result<(), LinkError> {
        if now.unix_timestamp() > expires {
            return Err(LinkError::Expired);
        }
        let provided = hex::decode(signature).map_err(|_| LinkError::BadSignature)?;
        self.mac(key, expires)
            .verify_slice(&provided)
            .map_err(|_| LinkError::BadSignature)
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    fn digest(&self, key: &str, expires: i64) -> Vec<u8> {
        self.mac(key, expires).finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn signer() -> UrlSigner {
        UrlSigner::new("secret", "https://docs.example.com/base/", 604_800).expect("signer")
    }

    fn query_param(url: &str, name: &str) -> String {
        Url::parse(url)
            .expect("url")
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .expect("query parameter")
    }

    #[test]
    fn signed_links_verify_until_expiry() {
        let signer = signer();
        let now = datetime!(2025-01-01 00:00:00 UTC);
        let link = signer.sign_at("PDF/設計/manual.pdf", now);

        assert!(link.starts_with("https://docs.example.com/base/files/PDF/"));
        let expires: i64 = query_param(&link, "expires").parse().expect("expires");
        assert_eq!(expires, now.unix_timestamp() + 604_800);
        let signature = query_param(&link, "signature");

        assert_eq!(
            signer.verify("PDF/設計/manual.pdf", expires, &signature, now),
            Ok(())
        );
        assert_eq!(
            signer.verify(
                "PDF/設計/manual.pdf",
                expires,
                &signature,
                now + Duration::days(8)
            ),
            Err(LinkError::Expired)
        );
    }

    #[test]
    fn tampered_keys_fail_verification() {
        let signer = signer();
        let now = datetime!(2025-01-01 00:00:00 UTC);
        let link = signer.sign_at("PDF/a/one.pdf", now);
        let expires: i64 = query_param(&link, "expires").parse().expect("expires");
        let signature = query_param(&link, "signature");

        assert_eq!(
            signer.verify("PDF/a/two.pdf", expires, &signature, now),
            Err(LinkError::BadSignature)
        );
        assert_eq!(
            signer.verify("PDF/a/one.pdf", expires, "zz", now),
            Err(LinkError::BadSignature)
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            UrlSigner::new("secret", "mailto:someone@example.com", 10),
            Err(LinkError::InvalidBaseUrl(_))
        ));
    }
}
