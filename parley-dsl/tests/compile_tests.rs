//! End-to-end compile tests
//!
//! Renders complete templates and checks the resulting conversation: message
//! shapes, scoping, expression output and the error codes raised along the way.

use parley_dsl::{render, ChainError};
use parley_test_utils::assertions::assert_text_message;
use parley_test_utils::fixtures::{params, remove_common_indent, CART_PROMPT};
use parley_test_utils::{
    init_tracing, CallRecorder, CompileError, Content, ErrorCode, Message, MessageContent,
    MessageRole, Parameters, Value,
};
use serde_json::json;

// ============================================================================
// HELPERS
// ============================================================================

fn render_messages(prompt: &str, parameters: Parameters) -> Result<Vec<Message>, ChainError> {
    init_tracing();
    Ok(render(prompt, parameters)?.messages)
}

/// Text of the single system message a prompt renders to ("" when none).
fn render_text(prompt: &str) -> Result<String, ChainError> {
    let messages = render_messages(prompt, Parameters::new())?;
    match messages.as_slice() {
        [] => Ok(String::new()),
        [message] => {
            assert_eq!(message.role, MessageRole::System);
            Ok(message.content.text())
        }
        more => panic!("Expected one message, got {:?}", more),
    }
}

#[track_caller]
fn expect_error(prompt: &str, parameters: Parameters, code: ErrorCode) -> CompileError {
    match render(prompt, parameters) {
        Err(ChainError::Compile(err)) => {
            assert_eq!(err.code, code, "unexpected error: {}", err);
            err
        }
        other => panic!("Expected {} error, got {:?}", code, other),
    }
}

// ============================================================================
// TEXT & COMMENTS
// ============================================================================

#[test]
fn test_comments_are_removed() -> Result<(), ChainError> {
    let prompt = remove_common_indent(
        "
        anna
        bob
        /* all this is a comment */
        charlie
        ",
    );
    assert_eq!(render_text(&prompt)?, "anna\nbob\n\ncharlie");
    Ok(())
}

#[test]
fn test_html_comments_inside_messages() -> Result<(), ChainError> {
    let prompt = remove_common_indent(
        "
        <user>
          <!-- not for the model -->
          hi
        </user>
        ",
    );
    let messages = render_messages(&prompt, Parameters::new())?;
    assert_eq!(messages, vec![Message::user("hi")]);
    Ok(())
}

#[test]
fn test_escaped_characters_are_literal() -> Result<(), ChainError> {
    assert_eq!(render_text("2 \\< 3 is {{ 2 < 3 }}")?, "2 < 3 is true");
    assert_eq!(render_text("\\{{ not a mustache \\}}")?, "{{ not a mustache }}");
    Ok(())
}

#[test]
fn test_bare_text_becomes_system_message() -> Result<(), ChainError> {
    let prompt = remove_common_indent(
        "
        Bare text
        <user>hi</user>
        trailing
        ",
    );
    let messages = render_messages(&prompt, Parameters::new())?;
    assert_eq!(
        messages,
        vec![
            Message::system("Bare text"),
            Message::user("hi"),
            Message::system("trailing"),
        ]
    );
    Ok(())
}

#[test]
fn test_config_block_is_returned() -> Result<(), ChainError> {
    let conversation = render("---\nmodel: gpt-4o\ntemperature: 0.5\n---\nhi", Parameters::new())?;
    assert_eq!(conversation.config["model"], json!("gpt-4o"));
    assert_eq!(conversation.config["temperature"], json!(0.5));
    assert_eq!(conversation.messages, vec![Message::system("hi")]);
    Ok(())
}

// ============================================================================
// MESSAGES & CONTENT
// ============================================================================

#[test]
fn test_message_content_shapes() -> Result<(), ChainError> {
    let prompt = remove_common_indent(
        r#"
        <system>sys</system>
        <user>usr</user>
        <assistant>ast</assistant>
        <tool id="call_1">tl</tool>
        "#,
    );
    let messages = render_messages(&prompt, Parameters::new())?;

    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].content, Content::Text("sys".to_string()));
    assert_eq!(
        messages[1].content,
        Content::Parts(vec![MessageContent::text("usr")])
    );
    assert_eq!(messages[2].content, Content::Text("ast".to_string()));
    assert_eq!(messages[3].role, MessageRole::Tool);
    assert_eq!(messages[3].tool_id.as_deref(), Some("call_1"));
    assert_eq!(
        messages[3].content,
        Content::Parts(vec![MessageContent::text("tl")])
    );
    Ok(())
}

#[test]
fn test_generic_message_role_from_expression() -> Result<(), ChainError> {
    let messages = render_messages(
        "<message role={{ role }}>hi</message>",
        params(json!({ "role": "assistant" })),
    )?;
    assert_text_message(&messages[0], MessageRole::Assistant, "hi");
    Ok(())
}

#[test]
fn test_invalid_message_role() {
    expect_error(
        "<message role=\"robot\">hi</message>",
        Parameters::new(),
        ErrorCode::InvalidMessageRole,
    );
    expect_error("<message>hi</message>", Parameters::new(), ErrorCode::InvalidMessageRole);
}

#[test]
fn test_tool_message_requires_id() {
    expect_error("<tool>result</tool>", Parameters::new(), ErrorCode::ToolMessageWithoutId);
}

#[test]
fn test_nested_messages_fail() {
    let err = expect_error(
        "<user><assistant>hi</assistant></user>",
        Parameters::new(),
        ErrorCode::MessageTagInsideMessage,
    );
    assert_eq!(err.line, 1);
    assert_eq!(err.column, 7);
}

#[test]
fn test_unknown_tags_fail() {
    expect_error("<foo>bar</foo>", Parameters::new(), ErrorCode::UnknownTag);
    expect_error("<user><foo/></user>", Parameters::new(), ErrorCode::UnknownTag);
}

#[test]
fn test_content_tags() -> Result<(), ChainError> {
    let messages = render_messages(
        "<user>look <image>{{ url }}</image> <text>at this</text></user>",
        params(json!({ "url": "https://example.com/cat.png" })),
    )?;
    assert_eq!(
        messages[0].content,
        Content::Parts(vec![
            MessageContent::text("look"),
            MessageContent::image("https://example.com/cat.png"),
            MessageContent::text("at this"),
        ])
    );

    expect_error(
        "<system><image>x</image></system>",
        Parameters::new(),
        ErrorCode::UnsupportedContentType,
    );
    expect_error("<image>x</image>", Parameters::new(), ErrorCode::ContentTagOutsideMessage);
    Ok(())
}

#[test]
fn test_cart_prompt() -> Result<(), ChainError> {
    let messages = render_messages(
        CART_PROMPT,
        params(json!({ "items": ["apple", "pear"], "image_url": "cart.png" })),
    )?;
    assert_eq!(messages[0], Message::system("You sell things."));
    assert_eq!(
        messages[1].content,
        Content::Parts(vec![
            MessageContent::text("0:apple1:pear"),
            MessageContent::image("cart.png"),
        ])
    );
    Ok(())
}

#[test]
fn test_unresolved_reference_fails() {
    expect_error(
        "Before <ref prompt=\"other\" /> after",
        Parameters::new(),
        ErrorCode::DidNotResolveReferences,
    );
}

// ============================================================================
// VARIABLES & SCOPE
// ============================================================================

#[test]
fn test_assignment_outputs_nothing() -> Result<(), ChainError> {
    assert_eq!(render_text("{{ foo = 5 }}")?, "");
    assert_eq!(render_text("{{ foo = 5 }}{{ foo += 2 }}{{ foo }}")?, "7");
    Ok(())
}

#[test]
fn test_update_expressions() -> Result<(), ChainError> {
    assert_eq!(render_text("{{ foo = 0 }} {{ foo++ }} {{ foo }}")?, "0 1");
    assert_eq!(render_text("{{ foo = 0 }} {{ ++foo }} {{ foo }}")?, "1 1");
    assert_eq!(render_text("{{ foo = 3 }}{{ foo-- }}{{ --foo }}")?, "31");
    Ok(())
}

#[test]
fn test_update_on_non_number_fails() {
    expect_error("{{ foo = 'a' }}{{ foo++ }}", Parameters::new(), ErrorCode::InvalidUpdate);
}

#[test]
fn test_undeclared_variable_fails() {
    let err = expect_error("Hi {{ name }}", Parameters::new(), ErrorCode::VariableNotDeclared);
    assert_eq!((err.line, err.column), (1, 7));
}

#[test]
fn test_parameters_are_readable() -> Result<(), ChainError> {
    let messages = render_messages(
        "Hello {{ user.name }}, you have {{ count }} items",
        params(json!({ "user": { "name": "Ada" }, "count": 3 })),
    )?;
    assert_eq!(messages, vec![Message::system("Hello Ada, you have 3 items")]);
    Ok(())
}

#[test]
fn test_block_assignments_update_outer_variables() -> Result<(), ChainError> {
    assert_eq!(render_text("{{ foo = 5 }}{{#if true}}{{ foo = 7 }}{{/if}}{{ foo }}")?, "7");
    assert_eq!(
        render_text("{{ foo = 5 }}{{#each [1, 2, 3] as n}}{{ foo += n }}{{/each}}{{ foo }}")?,
        "11"
    );
    Ok(())
}

#[test]
fn test_block_declarations_do_not_leak() {
    expect_error(
        "{{#if true}}{{ inner = 1 }}{{/if}}{{ inner }}",
        Parameters::new(),
        ErrorCode::VariableNotDeclared,
    );
    expect_error(
        "{{#each [1] as item}}{{ item }}{{/each}}{{ item }}",
        Parameters::new(),
        ErrorCode::VariableNotDeclared,
    );
}

// ============================================================================
// MEMBER ACCESS
// ============================================================================

#[test]
fn test_optional_member_assignment_is_a_parse_error() {
    expect_error("{{ foo = { a: 1 } }}{{ foo?.a = 2 }}", Parameters::new(), ErrorCode::ParseError);
}

#[test]
fn test_array_element_assignment() -> Result<(), ChainError> {
    assert_eq!(
        render_text("{{ foo = [1, 2, 3, 4, 5, 6] }}{{ foo[3] = 'bar' }}{{ foo }}")?,
        "[1,2,3,\"bar\",5,6]"
    );
    Ok(())
}

#[test]
fn test_object_member_assignment() -> Result<(), ChainError> {
    assert_eq!(render_text("{{ foo = { a: 1 } }}{{ foo.a += 2 }}{{ foo.a }}")?, "3");
    assert_eq!(render_text("{{ foo = {} }}{{ foo['b'] = 1 }}{{ foo }}")?, "{\"b\":1}");
    expect_error(
        "{{ foo = { a: 1 } }}{{ foo.c += 2 }}",
        Parameters::new(),
        ErrorCode::PropertyNotExists,
    );
    Ok(())
}

#[test]
fn test_optional_chaining_reads() -> Result<(), ChainError> {
    assert_eq!(render_text("{{ obj = { a: null } }}{{ obj.a?.b }}")?, "");
    assert_eq!(render_text("{{ obj = { a: null } }}{{ obj.a?.b ?? 'none' }}")?, "none");
    Ok(())
}

// ============================================================================
// CONDITIONALS & LOOPS
// ============================================================================

#[test]
fn test_if_else_branches() -> Result<(), ChainError> {
    let prompt = "{{#if n > 1}} many {{:else if n == 1}} one {{:else}} none {{/if}}";
    for (n, expected) in [(3, "many"), (1, "one"), (0, "none")] {
        let messages = render_messages(prompt, params(json!({ "n": n })))?;
        assert_eq!(messages, vec![Message::system(expected)]);
    }
    Ok(())
}

#[test]
fn test_each_trims_body() -> Result<(), ChainError> {
    assert_eq!(render_text("{{#each [1, 2, 3] as element}} {{ element }} {{/each}}")?, "123");
    Ok(())
}

#[test]
fn test_each_else_branch() -> Result<(), ChainError> {
    assert_eq!(render_text("{{#each 5 as e}}{{ e }}{{:else}} FOO {{/each}}")?, "FOO");
    assert_eq!(render_text("{{#each [] as e}}{{ e }}{{:else}} FOO {{/each}}")?, "FOO");
    assert_eq!(render_text("{{#each {} as e}}{{ e }}{{:else}} FOO {{/each}}")?, "FOO");
    Ok(())
}

#[test]
fn test_each_over_non_iterable_renders_nothing() -> Result<(), ChainError> {
    assert_eq!(render_text("{{#each 5 as e}}{{ e }}{{/each}}")?, "");
    assert_eq!(render_text("{{#each null as e}}{{ e }}{{/each}}")?, "");
    assert_eq!(render_text("before {{#each {} as e}}{{ e }}{{/each}}")?, "before");
    Ok(())
}

#[test]
fn test_each_index_and_strings() -> Result<(), ChainError> {
    assert_eq!(render_text("{{#each ['a', 'b', 'c'] as e, i}}{{ i }}{{/each}}")?, "012");
    assert_eq!(render_text("{{#each 'abc' as c}}{{ c }}-{{/each}}")?, "a-b-c-");
    assert_eq!(render_text("{{#each { x: 1, y: 2 } as v}}{{ v }}{{/each}}")?, "12");
    Ok(())
}

#[test]
fn test_messages_inside_loops() -> Result<(), ChainError> {
    let messages = render_messages(
        "{{#each turns as turn}}<user>{{ turn }}</user>{{/each}}",
        params(json!({ "turns": ["a", "b"] })),
    )?;
    assert_eq!(messages, vec![Message::user("a"), Message::user("b")]);
    Ok(())
}

// ============================================================================
// OPERATORS
// ============================================================================

#[test]
fn test_binary_operators() -> Result<(), ChainError> {
    let cases = [
        ("{{ 2 + 3 }}", "5"),
        ("{{ 2 - 3 }}", "-1"),
        ("{{ 2 * 3 }}", "6"),
        ("{{ 2 / 3 }}", "0.6666666666666666"),
        ("{{ 7 % 3 }}", "1"),
        ("{{ 2 ** 10 }}", "1024"),
        ("{{ 'a' + 1 }}", "a1"),
        ("{{ 1 == '1' }}", "true"),
        ("{{ 1 === '1' }}", "false"),
        ("{{ 1 != 2 }}", "true"),
        ("{{ 5 & 3 }}", "1"),
        ("{{ 5 | 3 }}", "7"),
        ("{{ 5 ^ 3 }}", "6"),
        ("{{ 1 << 4 }}", "16"),
        ("{{ -16 >> 2 }}", "-4"),
        ("{{ -1 >>> 28 }}", "15"),
        ("{{ 'ab' in { ab: 1 } }}", "true"),
        ("{{ 2 >= 2 }}", "true"),
    ];
    for (prompt, expected) in cases {
        assert_eq!(render_text(prompt)?, expected, "prompt: {}", prompt);
    }
    Ok(())
}

#[test]
fn test_unary_and_logical_operators() -> Result<(), ChainError> {
    let cases = [
        ("{{ -2 }}", "-2"),
        ("{{ +'3' }}", "3"),
        ("{{ !0 }}", "true"),
        ("{{ ~2 }}", "-3"),
        ("{{ typeof 'x' }}", "string"),
        ("{{ typeof missing }}", "undefined"),
        ("{{ 0 || 'fallback' }}", "fallback"),
        ("{{ 1 && 'both' }}", "both"),
        ("{{ 0 ?? 'unused' }}", "0"),
        ("{{ true ? 'yes' : 'no' }}", "yes"),
    ];
    for (prompt, expected) in cases {
        assert_eq!(render_text(prompt)?, expected, "prompt: {}", prompt);
    }
    assert_eq!(render_text("{{ void 2 }}")?, "");
    Ok(())
}

#[test]
fn test_value_output_formats() -> Result<(), ChainError> {
    assert_eq!(render_text("{{ null }}")?, "null");
    assert_eq!(render_text("{{ [1, 'a'] }}")?, "[1,\"a\"]");
    assert_eq!(render_text("{{ { a: 1 } }}")?, "{\"a\":1}");
    assert_eq!(render_text("{{ 1.5e3 }}")?, "1500");
    Ok(())
}

#[test]
fn test_instanceof_is_unsupported() {
    expect_error("{{ a = {} }}{{ a instanceof a }}", Parameters::new(), ErrorCode::UnsupportedOperator);
}

// ============================================================================
// FUNCTIONS
// ============================================================================

#[test]
fn test_callables_receive_arguments() -> Result<(), ChainError> {
    let spy = CallRecorder::new("spy");
    let mut parameters = Parameters::new();
    parameters.insert("spy".to_string(), Value::Function(spy.callable()));

    let messages = render_messages("{{ spy(1, 'x') }}", parameters)?;
    assert!(messages.is_empty());
    assert_eq!(spy.calls(), vec![vec![Value::from(1), Value::from("x")]]);
    Ok(())
}

#[test]
fn test_callable_results_are_interpolated() -> Result<(), ChainError> {
    let shout = CallRecorder::new("shout").returning("HEY");
    let mut parameters = Parameters::new();
    parameters.insert("shout".to_string(), Value::Function(shout.callable()));

    let messages = render_messages("{{ shout() }}!", parameters)?;
    assert_eq!(messages, vec![Message::system("HEY!")]);
    assert_eq!(shout.call_count(), 1);
    Ok(())
}

#[test]
fn test_calling_a_non_function_fails() {
    expect_error("{{ x = 1 }}{{ x() }}", Parameters::new(), ErrorCode::NotAFunction);
}
