#![no_main]

use arena_client::{normalize, RawError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First two bytes pick the status, the rest is the response body.
    let (status, body) = match data {
        [hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]), rest),
        _ => (500, data),
    };

    let response = normalize(&RawError::Http {
        status,
        body: body.to_vec(),
    });
    assert!(!response.message.is_empty());
    assert!(response.error_code.as_deref().is_some_and(|code| !code.is_empty()));

    if let Ok(s) = std::str::from_utf8(data) {
        let response = normalize(&RawError::network(s));
        assert!(!response.message.is_empty());
        assert_eq!(response.error_code.as_deref(), Some("NETWORK_ERROR"));
    }
});
