//! AWS Signature Version 4.
//!
//! Only the header-based variant is implemented: requests are signed over
//! their method, path, query string, a chosen set of headers and the SHA-256
//! of the payload, and the result is sent in the `Authorization` header.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Characters left as-is in canonical path segments.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Lowercase hex SHA-256 of a payload.
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// `x-amz-date` value, e.g. `20120525T002453Z`.
pub fn amz_date(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Derives the key for one day, region and service.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> [u8; 32] {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// URI-encodes each segment of `path`.
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".into();
    }
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, UNRESERVED).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// A request as seen by the signer.
///
/// `headers` must use lowercase names and include `host` and `x-amz-date`.
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    pub fn signed_headers(&self) -> String {
        self.headers
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn to_canonical_string(&self) -> String {
        let mut out = format!(
            "{}\n{}\n{}\n",
            self.method,
            canonical_uri(self.path),
            self.query
        );
        for (name, value) in self.headers {
            out.push_str(name);
            out.push(':');
            out.push_str(value.trim());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.signed_headers());
        out.push('\n');
        out.push_str(self.payload_hash);
        out
    }
}

/// Signs requests for one region and service.
pub struct Signer<'a> {
    credentials: &'a Credentials,
    region: &'a str,
    service: &'a str,
}

impl<'a> Signer<'a> {
    pub fn new(credentials: &'a Credentials, region: &'a str, service: &'a str) -> Self {
        Self {
            credentials,
            region,
            service,
        }
    }

    fn scope(&self, date: &str) -> String {
        format!("{date}/{}/{}/aws4_request", self.region, self.service)
    }

    /// Hex signature of `request` at `time`.
    pub fn signature(&self, request: &CanonicalRequest<'_>, time: DateTime<Utc>) -> String {
        let date = time.format("%Y%m%d").to_string();
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{}\n{}",
            amz_date(time),
            self.scope(&date),
            payload_hash(request.to_canonical_string().as_bytes())
        );
        let key = signing_key(
            &self.credentials.secret_access_key,
            &date,
            self.region,
            self.service,
        );
        hex::encode(hmac(&key, string_to_sign.as_bytes()))
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self, request: &CanonicalRequest<'_>, time: DateTime<Utc>) -> String {
        let date = time.format("%Y%m%d").to_string();
        format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={}",
            self.credentials.access_key_id,
            self.scope(&date),
            request.signed_headers(),
            self.signature(request, time)
        )
    }
}
