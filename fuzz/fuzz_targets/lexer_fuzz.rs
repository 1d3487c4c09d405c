//! Fuzz target for the expression lexer
//!
//! Feeds arbitrary UTF-8 to the lexer, both from the start of input and in
//! mustache mode at an arbitrary offset.
//!
//! Run with: cargo +nightly fuzz run lexer_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_dsl::lexer::{Lexer, TokenKind};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let tokens = Lexer::new(input).tokenize();
    let Some(last) = tokens.last() else {
        panic!("Tokenization should produce at least one token");
    };
    assert!(
        matches!(
            last.kind,
            TokenKind::Eof | TokenKind::MustacheEnd | TokenKind::Error(_)
        ),
        "Token stream must end in Eof, MustacheEnd or Error"
    );

    for token in &tokens {
        assert!(token.span.start <= token.span.end, "Span start should be <= end");
        assert!(token.span.end <= input.len(), "Span should stay inside input");
        assert!(token.span.line >= 1, "Line numbers should be >= 1");
        assert!(token.span.column >= 1, "Column numbers should be >= 1");
    }

    // Mustache mode starting at every char boundary near the front.
    for (offset, _) in input.char_indices().take(8) {
        let mut lexer = Lexer::mustache(input, offset);
        let _ = lexer.tokenize();
        assert!(lexer.position() <= input.len());
    }
});
