//! Fuzz target for full rendering
//!
//! Compiles arbitrary templates with an empty parameter set. Errors are
//! expected; panics and hangs are not.
//!
//! Run with: cargo +nightly fuzz run render_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_core::Parameters;
use parley_dsl::create_chain;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut chain) = create_chain(input, Parameters::new()) else {
        return;
    };

    // Walk at most a few steps with a canned response.
    let mut response = None;
    for _ in 0..4 {
        match chain.step(response.take()) {
            Ok(step) if step.completed => break,
            Ok(_) => response = Some("ok".into()),
            Err(_) => break,
        }
    }
});
