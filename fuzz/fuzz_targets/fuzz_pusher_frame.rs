#![no_main]

use arena_client::realtime::pusher::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(frame) = Frame::parse(text) {
            // Decoding the string-encoded payload must never panic.
            let _ = frame.payload();
            let _ = serde_json::to_string(&frame);
        }
    }
});
