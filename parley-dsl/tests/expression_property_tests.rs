//! Property-Based Tests for Template Evaluation
//!
//! Properties:
//! - Interpolated values render exactly as their output string
//! - Arithmetic agrees with IEEE-754 doubles
//! - Plain text passes through unchanged (modulo trimming)
//! - The parser never panics, whatever the input
//! - Scope stashes restore every binding
//! - Every identifier read before assignment is reported as a parameter

use parley_core::format_number;
use parley_dsl::{parse, read_metadata, render, ChainError, ReadMetadataOptions, Scope};
use parley_test_utils::generators::*;
use parley_test_utils::{Message, Parameters, Value};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// ARBITRATORS (Generate Random Templates)
// ============================================================================

/// Creates a strategy for arithmetic operators with exact f64 counterparts.
fn arb_arithmetic_op() -> impl Strategy<Value = (&'static str, fn(f64, f64) -> f64)> {
    prop_oneof![
        Just(("+", (|a, b| a + b) as fn(f64, f64) -> f64)),
        Just(("-", (|a, b| a - b) as fn(f64, f64) -> f64)),
        Just(("*", (|a, b| a * b) as fn(f64, f64) -> f64)),
    ]
}

/// Creates a strategy for a set of distinct identifiers.
fn arb_identifier_set() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(arb_identifier(), 1..6)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Messages expected for a template whose whole output is `text`.
fn system_output(text: &str) -> Vec<Message> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![Message::system(trimmed)]
    }
}

fn render_messages(prompt: &str, parameters: Parameters) -> Result<Vec<Message>, TestCaseError> {
    render(prompt, parameters)
        .map(|conversation| conversation.messages)
        .map_err(|e: ChainError| TestCaseError::fail(format!("Render failed for {:?}: {}", prompt, e)))
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a number parameter renders as its canonical string.
    #[test]
    fn prop_number_interpolation(n in arb_number()) {
        let mut parameters = Parameters::new();
        parameters.insert("n".to_string(), Value::Number(n));

        let messages = render_messages("{{ n }}", parameters)?;
        prop_assert_eq!(messages, system_output(&format_number(n)));
    }

    /// Property: binary arithmetic matches f64 arithmetic.
    #[test]
    fn prop_arithmetic_matches_f64(
        a in arb_number(),
        b in arb_number(),
        (op, apply) in arb_arithmetic_op(),
    ) {
        let mut parameters = Parameters::new();
        parameters.insert("a".to_string(), Value::Number(a));
        parameters.insert("b".to_string(), Value::Number(b));

        let prompt = format!("{{{{ a {} b }}}}", op);
        let messages = render_messages(&prompt, parameters)?;
        prop_assert_eq!(messages, system_output(&format_number(apply(a, b))));
    }

    /// Property: text without markup is emitted as-is.
    #[test]
    fn prop_plain_text_passthrough(text in arb_plain_text()) {
        let messages = render_messages(&text, Parameters::new())?;
        prop_assert_eq!(messages, system_output(&text));
    }

    /// Property: interpolating any value splices its output string.
    #[test]
    fn prop_value_interpolation(value in arb_value()) {
        let expected = system_output(&value.to_output_string());
        let mut parameters = Parameters::new();
        parameters.insert("value".to_string(), value);

        let messages = render_messages("{{ value }}", parameters)?;
        prop_assert_eq!(messages, expected);
    }

    /// Property: an assignment outputs nothing and the variable then holds
    /// the assigned value.
    #[test]
    fn prop_assignment_round_trip(name in arb_identifier(), value in arb_value()) {
        let expected = system_output(&value.to_output_string());
        let mut parameters = Parameters::new();
        parameters.insert("value".to_string(), value);

        let silent = render_messages(&format!("{{{{ {} = value }}}}", name), parameters.clone())?;
        prop_assert!(silent.is_empty(), "Assignment produced output: {:?}", silent);

        let prompt = format!("{{{{ {0} = value }}}}{{{{ {0} }}}}", name);
        prop_assert_eq!(render_messages(&prompt, parameters)?, expected);
    }

    /// Property: parsing arbitrary input returns instead of panicking.
    #[test]
    fn prop_parse_never_panics(source in any::<String>()) {
        let _ = parse(&source);
    }

    /// Property: parsing template-shaped noise returns instead of panicking.
    #[test]
    fn prop_parse_markup_noise_never_panics(
        source in "[a-z{}<>/#:*!= \"'\\-\\n]{0,64}",
    ) {
        let _ = parse(&source);
    }

    /// Property: a stashed scope restores every binding.
    #[test]
    fn prop_scope_stash_round_trip(parameters in arb_parameters()) {
        let scope = Scope::with_parameters(&parameters);
        let restored = Scope::with_stash(scope.stash());

        for (name, value) in &parameters {
            let found = restored
                .get(name)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(found, value);
        }
    }

    /// Property: identifiers read before assignment are exactly the
    /// reported parameters.
    #[test]
    fn prop_metadata_reports_read_identifiers(
        read in arb_identifier_set(),
        assigned in arb_identifier_set(),
    ) {
        let mut prompt = String::new();
        for name in &assigned {
            prompt.push_str(&format!("{{{{ {} = 1 }}}}", name));
        }
        for name in &read {
            prompt.push_str(&format!("{{{{ {} }}}}", name));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let metadata = runtime.block_on(read_metadata(ReadMetadataOptions::new(prompt)));

        let expected: BTreeSet<String> = read.difference(&assigned).cloned().collect();
        prop_assert!(metadata.errors.is_empty(), "{:?}", metadata.errors);
        prop_assert_eq!(metadata.parameters, expected);
    }
}

// ============================================================================
// SPECIFIC CASE TESTS
// ============================================================================

#[test]
fn test_fractional_numbers_keep_shortest_form() -> Result<(), ChainError> {
    let conversation = render("{{ 0.1 + 0.2 }}", Parameters::new())?;
    assert_eq!(conversation.messages, vec![Message::system("0.30000000000000004")]);
    Ok(())
}
