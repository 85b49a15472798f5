//! Client IP resolution from proxy headers.
//!
//! Rate limiting and error logging both attribute a request to a client using
//! [`resolve_client_ip`], so the two always agree on who sent it.
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **This trusts client-provided headers.** A client talking to the service
//! directly can put anything in `X-Forwarded-For`. Deploy behind a reverse
//! proxy that overwrites (not appends to) these headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! Without that, clients can rotate spoofed addresses to dodge rate limits or
//! exhaust the quota of someone else's address.
//!
//! ## The "unknown" Fallback
//!
//! Requests with none of the headers share the [`UNKNOWN_IP`] key and are
//! rate-limited collectively. Monitor for high "unknown" traffic in production.

use std::borrow::Cow;

use axum::http::HeaderMap;

/// Fallback value when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Where a client address was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    /// First entry of `X-Forwarded-For`.
    FromXff(&'a str),
    /// `X-Real-IP`.
    FromRealIp(&'a str),
    /// `CF-Connecting-IP` (Cloudflare).
    FromCloudflare(&'a str),
    NotFound,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[inline]
fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ExtractedIp::FromXff(first_ip);
    }

    if let Some(ip) = header_str(headers, "x-real-ip") {
        return ExtractedIp::FromRealIp(ip);
    }

    if let Some(ip) = header_str(headers, "cf-connecting-ip") {
        return ExtractedIp::FromCloudflare(ip);
    }

    ExtractedIp::NotFound
}

/// Resolve the client address for a request.
///
/// # Header Priority
///
/// Returns the first non-empty value of:
/// 1. `X-Forwarded-For` (first comma-separated entry, trimmed)
/// 2. `X-Real-IP`
/// 3. `CF-Connecting-IP`
/// 4. [`UNKNOWN_IP`]
///
/// Values are passed through as-is (ports, IPv6 brackets); no address
/// parsing is attempted.
///
/// # Returns
///
/// `Cow<'static, str>` - Borrowed for "unknown" (no allocation), owned otherwise.
#[inline]
pub fn resolve_client_ip(headers: &HeaderMap) -> Cow<'static, str> {
    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) | ExtractedIp::FromCloudflare(ip) => {
            Cow::Owned(ip.to_string())
        }
        ExtractedIp::NotFound => Cow::Borrowed(UNKNOWN_IP),
    }
}
