//! Fuzz testing for request header parsing.
//!
//! Client-controlled headers feed the client address resolver, the body-size
//! gate and the security header policy. None of them may panic, whatever the
//! bytes.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the header fuzz target
//! cargo +nightly fuzz run fuzz_headers
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_headers -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;
use sentinel_api::config::Environment;
use sentinel_api::middleware::{check_body_size, resolve_client_ip, security_headers};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    forwarded_for: &'a [u8],
    real_ip: &'a [u8],
    cf_connecting_ip: &'a [u8],
    content_length: &'a [u8],
    max_size: usize,
    path: &'a str,
    production: bool,
    https: bool,
}

fn insert(headers: &mut HeaderMap, name: &'static str, raw: &[u8]) {
    // Bytes that are not a legal header value never reach the service.
    if let Ok(value) = HeaderValue::from_bytes(raw) {
        headers.insert(name, value);
    }
}

fuzz_target!(|input: Input<'_>| {
    let mut headers = HeaderMap::new();
    insert(&mut headers, "x-forwarded-for", input.forwarded_for);
    insert(&mut headers, "x-real-ip", input.real_ip);
    insert(&mut headers, "cf-connecting-ip", input.cf_connecting_ip);
    insert(&mut headers, "content-length", input.content_length);

    let ip = resolve_client_ip(&headers);
    assert!(!ip.is_empty());

    let _ = check_body_size(&headers, input.max_size);

    let environment = if input.production {
        Environment::Production
    } else {
        Environment::Development
    };
    let headers = security_headers(input.path, environment, input.https);
    assert!(headers.contains_key("content-security-policy"));
});
