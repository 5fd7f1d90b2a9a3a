//! Fuzz testing for the sanitization guard.
//!
//! Feeds arbitrary bytes through JSON parsing into every sanitizer entry
//! point and asserts they never panic: each call must return a clean value
//! or an error, no matter how hostile or deeply nested the input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_sanitize
//! cargo +nightly fuzz run fuzz_sanitize -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use memoria_gateway::guard::{
    MAX_SANITIZE_DEPTH, create_safe_projection, sanitize_document, sanitize_filter,
    sanitize_pipeline, sanitize_update,
};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Projection field names take raw strings
    let _ = create_safe_projection(&[text]);

    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };

    let _ = sanitize_document(&value, MAX_SANITIZE_DEPTH);
    let _ = sanitize_filter(&value, MAX_SANITIZE_DEPTH);
    let _ = sanitize_update(&value, MAX_SANITIZE_DEPTH);

    if let Some(stages) = value.as_array() {
        let _ = sanitize_pipeline(stages, MAX_SANITIZE_DEPTH);
    }
});
