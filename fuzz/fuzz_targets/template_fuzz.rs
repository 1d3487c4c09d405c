//! Fuzz target for the template and expression parsers
//!
//! Run with: cargo +nightly fuzz run template_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_dsl::{parse, parse_expression};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    match parse(input) {
        Ok(fragment) => {
            assert!(fragment.span.end <= input.len(), "Fragment span should stay inside input");
        }
        Err(err) => {
            assert!(err.line >= 1, "Error line should be >= 1");
            assert!(err.column >= 1, "Error column should be >= 1");
            assert!(!err.message.is_empty(), "Error message should not be empty");
        }
    }

    let _ = parse_expression(input);
});
