//! Parley Test Utilities
//!
//! Centralized test infrastructure for the Parley workspace:
//! - Proptest generators for template values and identifiers
//! - Recording callables for observing side effects of templates
//! - Test fixtures for common scenarios
//! - Custom assertions for Parley error codes

// Re-export core types for convenience
pub use parley_core::{
    Callable, CompileError, CompileResult, Content, ErrorCode, Message, MessageContent,
    MessageRole, Object, Parameters, Value,
};

use std::sync::{Arc, Mutex};

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber. Safe to call from every test;
/// only the first call installs anything. Filter with `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_dsl=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// RECORDING CALLABLES
// ============================================================================

/// A host function that records every call it receives.
#[derive(Debug, Clone)]
pub struct CallRecorder {
    name: String,
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
    returns: Value,
}

impl CallRecorder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
            returns: Value::Undefined,
        }
    }

    /// Value every call returns (default `undefined`).
    pub fn returning(mut self, value: impl Into<Value>) -> Self {
        self.returns = value.into();
        self
    }

    /// The callable to place in template parameters.
    pub fn callable(&self) -> Callable {
        let calls = Arc::clone(&self.calls);
        let returns = self.returns.clone();
        Callable::new(self.name.clone(), move |args: &[Value]| {
            calls
                .lock()
                .map_err(|e| e.to_string())?
                .push(args.to_vec());
            Ok(returns.clone())
        })
    }

    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating template values.

    use super::*;
    use proptest::prelude::*;

    const KEYWORDS: &[&str] = &[
        "true", "false", "null", "undefined", "typeof", "void", "in", "instanceof",
    ];

    /// Generate a valid identifier that is not a keyword.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-zA-Z_][a-zA-Z0-9_]{0,12}".prop_filter("identifier must not be a keyword", |s| {
            !KEYWORDS.contains(&s.as_str())
        })
    }

    /// Generate a finite number that survives a JSON round trip.
    pub fn arb_number() -> impl Strategy<Value = f64> {
        prop_oneof![
            (-1_000_000i64..1_000_000i64).prop_map(|n| n as f64),
            (-1_000_000i64..1_000_000i64).prop_map(|n| n as f64 / 8.0),
        ]
    }

    /// Generate a string free of template syntax characters.
    pub fn arb_plain_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 .,!?]{0,40}"
    }

    /// Generate a primitive value.
    pub fn arb_primitive() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            arb_number().prop_map(Value::Number),
            arb_plain_text().prop_map(Value::String),
        ]
    }

    /// Generate a JSON-like value (no functions, no `undefined`).
    pub fn arb_value() -> impl Strategy<Value = Value> {
        arb_primitive().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec((arb_identifier(), inner), 0..4).prop_map(|entries| {
                    let mut object = Object::new();
                    for (key, value) in entries {
                        object.insert(key, value);
                    }
                    Value::Object(object)
                }),
            ]
        })
    }

    /// Generate a parameter map.
    pub fn arb_parameters() -> impl Strategy<Value = Parameters> {
        prop::collection::vec((arb_identifier(), arb_value()), 0..5).prop_map(|entries| {
            entries.into_iter().collect()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Common templates and helpers for building test inputs.

    use super::*;

    /// Strip the indentation shared by every non-blank line and trim the
    /// result, so templates can be written indented inside test code.
    pub fn remove_common_indent(text: &str) -> String {
        let indent = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.len() - line.trim_start().len())
            .min()
            .unwrap_or(0);

        text.lines()
            .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// Parameters from a JSON object literal.
    pub fn params(json: serde_json::Value) -> Parameters {
        parley_core::parameters_from_json(json)
    }

    /// A two-step conversation: ask, then summarize the answer.
    pub const TWO_STEP_PROMPT: &str = "\
---
model: gpt-4o
---
<user>What is {{ topic }}?</user>
<step as=\"answer\" temperature={{ 0.1 }} />
<user>Summarize: {{ answer }}</user>";

    /// A prompt exercising loops, conditionals and content parts.
    pub const CART_PROMPT: &str = "\
You sell things.
<user>
  {{#each items as item, i}}{{ i }}:{{ item }} {{/each}}
  <image>{{ image_url }}</image>
</user>";
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for Parley-specific validation.

    use super::*;

    /// Assert that a result is an error carrying `code`.
    #[track_caller]
    pub fn assert_error_code<T: std::fmt::Debug>(result: &CompileResult<T>, code: ErrorCode) {
        match result {
            Err(err) => assert_eq!(err.code, code, "unexpected error: {}", err),
            Ok(value) => panic!("Expected {} error, got Ok: {:?}", code, value),
        }
    }

    /// Assert that a message has the given role and text-only content.
    #[track_caller]
    pub fn assert_text_message(message: &Message, role: MessageRole, text: &str) {
        assert_eq!(message.role, role, "wrong role for {:?}", message);
        assert_eq!(message.content.text(), text, "wrong text for {:?}", message);
    }
}

// ============================================================================
// TESTS
// ============================================================================
