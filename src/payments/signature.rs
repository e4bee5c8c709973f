//! Request signing for the gateway's HMAC-SHA512 scheme.
//!
//! The signed message is five newline-separated fields:
//!
//! ```text
//! METHOD
//! hex(sha512(body))
//! Content-Type
//! Date
//! /request/path
//! ```
//!
//! and the signature is `base64(hmac_sha512(shared_secret, message))`. The body
//! hashed here must be byte-for-byte the body that goes on the wire.

use crate::payments::error::{PaymentError, PaymentResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

type HmacSha512 = Hmac<Sha512>;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Lowercase hex SHA-512 of the exact body bytes.
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha512::digest(body))
}

pub fn canonical_message(
    method: &str,
    body: &[u8],
    content_type: &str,
    timestamp: &str,
    request_path: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method,
        body_hash(body),
        content_type,
        timestamp,
        request_path
    )
}

/// Compute the `X-Signature` value for one request.
pub fn sign(
    shared_secret: &str,
    method: &str,
    body: &[u8],
    content_type: &str,
    timestamp: &str,
    request_path: &str,
) -> PaymentResult<String> {
    let message = canonical_message(method, body, content_type, timestamp, request_path);
    let mut mac = HmacSha512::new_from_slice(shared_secret.as_bytes()).map_err(|e| {
        PaymentError::SignatureError {
            message: format!("invalid shared secret: {}", e),
        }
    })?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Recompute the signature and compare it in constant time.
pub fn verify(
    shared_secret: &str,
    method: &str,
    body: &[u8],
    content_type: &str,
    timestamp: &str,
    request_path: &str,
    signature: &str,
) -> bool {
    match sign(
        shared_secret,
        method,
        body,
        content_type,
        timestamp,
        request_path,
    ) {
        Ok(expected) => secure_eq(expected.as_bytes(), signature.trim().as_bytes()),
        Err(_) => false,
    }
}

/// `Authorization` header value for the API user.
pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", username, password))
    )
}

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// RFC 7231 HTTP-date, e.g. `Tue, 07 May 2024 10:15:00 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE_FORMAT).to_string()
}

/// Inverse of [`http_date`]. `None` for anything that is not an HTTP-date.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
