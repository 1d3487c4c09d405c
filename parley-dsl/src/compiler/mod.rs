//! Compiler: Fragment -> Conversation
//!
//! Walks the template AST with a [`Scope`], evaluating expressions and
//! collecting messages. A `<step>` tag suspends compilation: the output then
//! carries the rest of the document, rewritten so that a later compile can
//! resume exactly where this one stopped.

pub mod evaluate;
pub mod scope;

pub use evaluate::*;
pub use scope::*;

use crate::lexer::Span;
use crate::parser::ast::*;
use parley_core::{
    CompileError, CompileResult, Config, ErrorCode, Message, MessageContent, MessageRole, Value,
};

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// Everything a single compile call needs.
#[derive(Debug, Clone)]
pub struct CompileInput<'a> {
    pub ast: &'a Fragment,
    /// Source text, used to resolve error positions.
    pub raw_text: &'a str,
    pub scope: Scope,
    /// Model response injected where the previous compile suspended.
    pub step_response: Option<Vec<MessageContent>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutput {
    /// Whether the whole document has been compiled.
    pub completed: bool,
    pub scope_stash: ScopeStash,
    /// Remaining document to compile on the next step.
    pub ast: Fragment,
    /// Messages produced by this call only.
    pub messages: Vec<Message>,
    /// Config block of the document, when this call walked it.
    pub global_config: Option<Config>,
    /// Attributes of the `<step>` tag this call suspended at.
    pub step_config: Option<Config>,
}

/// Outcome of walking a node.
enum Flow {
    Continue,
    /// Compilation stopped at a step; holds the nodes still to be compiled.
    Suspend(Vec<TemplateNode>),
}

// ============================================================================
// MESSAGE BUILDER
// ============================================================================

/// Message currently being compiled.
struct MessageBuilder {
    role: MessageRole,
    tool_id: Option<String>,
    parts: Vec<MessageContent>,
    /// Text outside any content tag.
    text: String,
    /// Text of the open content tag, if any.
    content: Option<String>,
}

impl MessageBuilder {
    fn new(role: MessageRole, tool_id: Option<String>) -> Self {
        Self {
            role,
            tool_id,
            parts: Vec::new(),
            text: String::new(),
            content: None,
        }
    }

    fn flush_text(&mut self) {
        let trimmed = self.text.trim();
        if !trimmed.is_empty() {
            self.parts.push(MessageContent::text(trimmed));
        }
        self.text.clear();
    }

    fn finish(mut self) -> Message {
        self.flush_text();
        let mut message = Message::from_parts(self.role, self.parts);
        message.tool_id = self.tool_id;
        message
    }
}

// ============================================================================
// COMPILER
// ============================================================================

pub struct Compile<'a> {
    ast: &'a Fragment,
    raw_text: &'a str,
    scope: Scope,
    step_response: Option<Vec<MessageContent>>,
    messages: Vec<Message>,
    /// Text outside any message.
    text: String,
    message: Option<MessageBuilder>,
    global_config: Option<Config>,
    step_config: Option<Config>,
}

impl<'a> Compile<'a> {
    pub fn new(input: CompileInput<'a>) -> Self {
        Self {
            ast: input.ast,
            raw_text: input.raw_text,
            scope: input.scope,
            step_response: input.step_response,
            messages: Vec::new(),
            text: String::new(),
            message: None,
            global_config: None,
            step_config: None,
        }
    }

    /// Compile until the document ends or a step suspends it.
    pub fn run(mut self) -> CompileResult<CompileOutput> {
        let raw_text = self.raw_text;
        self.compile().map_err(|e| e.locate(raw_text))
    }

    fn compile(&mut self) -> CompileResult<CompileOutput> {
        // Reference tags must be resolved before compiling.
        let mut reference = None;
        self.ast.walk(&mut |node| {
            if let TemplateNode::Reference(tag) = node {
                reference.get_or_insert(tag.span);
            }
        });
        if let Some(span) = reference {
            return Err(CompileError::did_not_resolve_references().at(span.start, span.end));
        }

        let ast = self.ast;
        let flow = self.walk_nodes(&ast.children)?;
        self.flush_root_text();

        let (completed, rest) = match flow {
            Flow::Continue => (true, Vec::new()),
            Flow::Suspend(rest) => (false, rest),
        };

        tracing::debug!(
            completed,
            messages = self.messages.len(),
            remaining = rest.len(),
            "Compiled template"
        );

        Ok(CompileOutput {
            completed,
            scope_stash: self.scope.stash(),
            ast: Fragment::new(rest, ast.span),
            messages: std::mem::take(&mut self.messages),
            global_config: self.global_config.take(),
            step_config: self.step_config.take(),
        })
    }

    // ========================================================================
    // Walking
    // ========================================================================

    fn walk_nodes(&mut self, nodes: &[TemplateNode]) -> CompileResult<Flow> {
        for (i, node) in nodes.iter().enumerate() {
            if let Flow::Suspend(mut rest) = self.walk_node(node)? {
                rest.extend(nodes[i + 1..].iter().cloned());
                return Ok(Flow::Suspend(rest));
            }
        }
        Ok(Flow::Continue)
    }

    fn walk_node(&mut self, node: &TemplateNode) -> CompileResult<Flow> {
        match node {
            TemplateNode::Text(text) => self.push_text(&text.data),

            TemplateNode::Config(config) => {
                if self.global_config.is_none() {
                    self.global_config = Some(config.value.clone());
                }
            }

            TemplateNode::Comment(_) => {}

            TemplateNode::Mustache(tag) => {
                let value = evaluate(&tag.expression, &mut self.scope)?;
                if !tag.expression.is_assignment() {
                    self.push_text(&value.to_output_string());
                }
            }

            TemplateNode::If(block) => {
                let branch = if evaluate(&block.condition, &mut self.scope)?.is_truthy() {
                    Some(&block.consequent)
                } else {
                    block.alternate.as_ref()
                };
                if let Some(branch) = branch {
                    return self.walk_scoped(branch, block.span);
                }
            }

            TemplateNode::Each(block) => self.compile_each(block)?,

            TemplateNode::Message(tag) => self.compile_message(tag)?,

            TemplateNode::Content(tag) => self.compile_content(tag)?,

            TemplateNode::Reference(tag) => {
                return Err(CompileError::did_not_resolve_references()
                    .at(tag.span.start, tag.span.end))
            }

            TemplateNode::Step(tag) => return self.compile_step(tag),

            TemplateNode::Scoped(block) => {
                // Adopts the frame left open by the suspended block.
                return match self.walk_nodes(&block.children)? {
                    Flow::Continue => {
                        self.scope.pop();
                        Ok(Flow::Continue)
                    }
                    Flow::Suspend(rest) => Ok(Flow::Suspend(vec![scoped(rest, block.span)])),
                };
            }

            TemplateNode::StepResponse(node) => self.inject_step_response(node)?,
        }
        Ok(Flow::Continue)
    }

    /// Walk a block body in a fresh frame. On suspension the frame stays open
    /// and the remainder is wrapped in a `Scoped` node that closes it later.
    fn walk_scoped(&mut self, nodes: &[TemplateNode], span: Span) -> CompileResult<Flow> {
        self.scope.push();
        match self.walk_nodes(nodes)? {
            Flow::Continue => {
                self.scope.pop();
                Ok(Flow::Continue)
            }
            Flow::Suspend(rest) => Ok(Flow::Suspend(vec![scoped(rest, span)])),
        }
    }

    fn compile_each(&mut self, block: &EachBlock) -> CompileResult<()> {
        let items = iterate(evaluate(&block.expression, &mut self.scope)?);

        if items.is_empty() {
            if let Some(alternate) = &block.alternate {
                if let Flow::Suspend(_) = self.walk_scoped(alternate, block.span)? {
                    return Err(step_inside_each(block.span));
                }
            }
            return Ok(());
        }

        for (index, item) in items.into_iter().enumerate() {
            self.scope.push();
            self.scope.declare(&block.context, item);
            if let Some(name) = &block.index {
                self.scope.declare(name, Value::from(index));
            }
            if let Flow::Suspend(_) = self.walk_nodes(&block.body)? {
                return Err(step_inside_each(block.span));
            }
            self.scope.pop();
        }
        Ok(())
    }

    fn push_text(&mut self, text: &str) {
        match &mut self.message {
            Some(builder) => match &mut builder.content {
                Some(content) => content.push_str(text),
                None => builder.text.push_str(text),
            },
            None => self.text.push_str(text),
        }
    }

    /// Emit pending text outside any message as a system message.
    fn flush_root_text(&mut self) {
        let trimmed = self.text.trim();
        if !trimmed.is_empty() {
            self.messages.push(Message::system(trimmed));
        }
        self.text.clear();
    }

    // ========================================================================
    // Messages & content
    // ========================================================================

    fn compile_message(&mut self, tag: &MessageTag) -> CompileResult<()> {
        let error_at = |e: CompileError| e.at(tag.span.start, tag.span.end);

        if self.message.is_some() {
            return Err(error_at(CompileError::message_tag_inside_message()));
        }
        self.flush_root_text();

        let role = match tag.role {
            Some(role) => role,
            None => {
                let value = match find_attribute(&tag.attributes, "role") {
                    Some(attribute) => self.evaluate_attribute(attribute)?,
                    None => Value::Undefined,
                };
                let name = value.to_output_string();
                match (&value, name.parse::<MessageRole>()) {
                    (Value::String(_), Ok(role)) => role,
                    _ => return Err(error_at(CompileError::invalid_message_role(&name))),
                }
            }
        };

        let tool_id = match find_attribute(&tag.attributes, "id") {
            Some(attribute) => Some(self.evaluate_attribute(attribute)?.to_output_string()),
            None => None,
        };
        if role == MessageRole::Tool && tool_id.is_none() {
            return Err(error_at(CompileError::new(
                ErrorCode::ToolMessageWithoutId,
                "Tool messages must have an id attribute",
            )));
        }

        self.message = Some(MessageBuilder::new(role, tool_id));
        let flow = self.walk_nodes(&tag.children);
        let builder = self.message.take();
        flow?;

        if let Some(builder) = builder {
            self.messages.push(builder.finish());
        }
        Ok(())
    }

    fn compile_content(&mut self, tag: &ContentTag) -> CompileResult<()> {
        let error_at = |e: CompileError| e.at(tag.span.start, tag.span.end);

        let Some(builder) = self.message.as_mut() else {
            return Err(error_at(CompileError::new(
                ErrorCode::ContentTagOutsideMessage,
                format!("Content tag <{}> must be placed inside a message", tag.kind.as_str()),
            )));
        };
        if builder.content.is_some() {
            return Err(error_at(CompileError::new(
                ErrorCode::ContentTagInsideContent,
                "Content tags cannot be placed inside another content tag",
            )));
        }
        if builder.role == MessageRole::System && tag.kind == ContentKind::Image {
            return Err(error_at(CompileError::new(
                ErrorCode::UnsupportedContentType,
                "System messages can only contain text content",
            )));
        }

        builder.flush_text();
        builder.content = Some(String::new());

        self.walk_nodes(&tag.children)?;

        if let Some(builder) = self.message.as_mut() {
            let data = builder.content.take().unwrap_or_default();
            let data = data.trim();
            builder.parts.push(match tag.kind {
                ContentKind::Text => MessageContent::text(data),
                ContentKind::Image => MessageContent::image(data),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Steps
    // ========================================================================

    fn compile_step(&mut self, tag: &StepTag) -> CompileResult<Flow> {
        let mut as_name = None;
        let mut step_config = Config::new();
        for attribute in &tag.attributes {
            let value = self.evaluate_attribute(attribute)?;
            if attribute.name == "as" {
                as_name = Some(value.to_output_string());
            } else {
                step_config.insert(attribute.name.clone(), value.to_json());
            }
        }

        if let Flow::Suspend(_) = self.walk_nodes(&tag.children)? {
            return Err(CompileError::new(
                ErrorCode::StepTagInsideStep,
                "Step tags cannot be placed inside another step",
            )
            .at(tag.span.start, tag.span.end));
        }
        self.flush_root_text();

        tracing::debug!(
            step_as = as_name.as_deref().unwrap_or(""),
            config_keys = step_config.len(),
            "Suspending at step"
        );

        self.step_config = Some(step_config);
        Ok(Flow::Suspend(vec![TemplateNode::StepResponse(StepResponseNode {
            as_name,
            span: tag.span,
        })]))
    }

    fn inject_step_response(&mut self, node: &StepResponseNode) -> CompileResult<()> {
        let Some(parts) = self.step_response.take() else {
            return Err(CompileError::new(
                ErrorCode::MissingStepResponse,
                "A response is required to resume after a step",
            )
            .at(node.span.start, node.span.end));
        };

        let text = parts
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        self.messages
            .push(Message::from_parts(MessageRole::Assistant, parts));

        if let Some(name) = &node.as_name {
            self.scope.set(name, Value::String(text));
        }
        Ok(())
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// A flag is `true`, a lone mustache keeps its raw value, anything else
    /// is the concatenated text.
    fn evaluate_attribute(&mut self, attribute: &Attribute) -> CompileResult<Value> {
        let nodes = match &attribute.value {
            AttributeValue::Flag => return Ok(Value::Bool(true)),
            AttributeValue::Nodes(nodes) => nodes,
        };

        if let [TemplateNode::Mustache(tag)] = nodes.as_slice() {
            return evaluate(&tag.expression, &mut self.scope);
        }

        let mut text = String::new();
        for node in nodes {
            match node {
                TemplateNode::Text(t) => text.push_str(&t.data),
                TemplateNode::Mustache(tag) => {
                    let value = evaluate(&tag.expression, &mut self.scope)?;
                    if !tag.expression.is_assignment() {
                        text.push_str(&value.to_output_string());
                    }
                }
                _ => {}
            }
        }
        Ok(Value::String(text))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn scoped(children: Vec<TemplateNode>, span: Span) -> TemplateNode {
    TemplateNode::Scoped(ScopedBlock { children, span })
}

fn step_inside_each(span: Span) -> CompileError {
    CompileError::new(
        ErrorCode::StepTagInsideEach,
        "Step tags cannot be placed inside an each block",
    )
    .at(span.start, span.end)
}

/// Items an `each` block iterates: array elements, string characters or
/// object values. Anything else yields nothing.
pub fn iterate(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
        Value::Object(map) => map.into_values().collect(),
        _ => Vec::new(),
    }
}

/// Compile `ast` to completion or to its first step.
pub fn compile(ast: &Fragment, raw_text: &str, scope: Scope) -> CompileResult<CompileOutput> {
    Compile::new(CompileInput {
        ast,
        raw_text,
        scope,
        step_response: None,
    })
    .run()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use parley_core::Content;

    fn compile_source(source: &str) -> CompileResult<CompileOutput> {
        let ast = parse(source)?;
        compile(&ast, source, Scope::new())
    }

    #[test]
    fn test_root_text_becomes_system_message() -> Result<(), CompileError> {
        let output = compile_source("  Hello there  ")?;
        assert!(output.completed);
        assert_eq!(output.messages, vec![Message::system("Hello there")]);
        Ok(())
    }

    #[test]
    fn test_assignments_splice_nothing() -> Result<(), CompileError> {
        let output = compile_source("{{ foo = 5 }}{{ foo }}")?;
        assert_eq!(output.messages, vec![Message::system("5")]);
        Ok(())
    }

    #[test]
    fn test_if_branch_frame_is_discarded() -> Result<(), CompileError> {
        let output = compile_source("{{ a = 1 }}{{#if true}}{{ a = 2 }}{{ b = 3 }}{{/if}}{{ a }}")?;
        assert_eq!(output.messages, vec![Message::system("2")]);

        let err = compile_source("{{#if true}}{{ b = 3 }}{{/if}}{{ b }}").unwrap_err();
        assert_eq!(err.code, ErrorCode::VariableNotDeclared);
        Ok(())
    }

    #[test]
    fn test_each_iterates_values() -> Result<(), CompileError> {
        let output = compile_source("{{#each {a: 'x', b: 'y'} as v, i}}{{i}}{{v}}{{/each}}")?;
        assert_eq!(output.messages, vec![Message::system("0x1y")]);
        Ok(())
    }

    #[test]
    fn test_content_tags_produce_parts() -> Result<(), CompileError> {
        let output = compile_source("<user>intro <text> hi </text><image> url </image></user>")?;
        assert_eq!(
            output.messages[0].content,
            Content::Parts(vec![
                MessageContent::text("intro"),
                MessageContent::text("hi"),
                MessageContent::image("url"),
            ])
        );
        Ok(())
    }

    #[test]
    fn test_image_in_system_is_rejected() {
        let err = compile_source("<system><image>url</image></system>").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedContentType);
    }

    #[test]
    fn test_tool_message_requires_id() -> Result<(), CompileError> {
        let err = compile_source("<tool>result</tool>").unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolMessageWithoutId);

        let output = compile_source("<tool id=\"call-1\">result</tool>")?;
        assert_eq!(output.messages[0].tool_id.as_deref(), Some("call-1"));
        Ok(())
    }

    #[test]
    fn test_step_suspends_with_scoped_remainder() -> Result<(), CompileError> {
        let source = "{{#if true}}{{ x = 1 }}<step as=\"answer\" temperature={{ 0.5 }}/>{{ x }}{{/if}}tail";
        let output = compile_source(source)?;
        assert!(!output.completed);
        assert_eq!(output.step_config.unwrap()["temperature"], serde_json::json!(0.5));
        assert_eq!(output.ast.children.len(), 2);
        assert!(matches!(output.ast.children[0], TemplateNode::Scoped(_)));

        let resumed = Compile::new(CompileInput {
            ast: &output.ast,
            raw_text: source,
            scope: Scope::with_stash(output.scope_stash),
            step_response: Some(vec![MessageContent::text("42")]),
        })
        .run()?;
        assert!(resumed.completed);
        assert_eq!(
            resumed.messages,
            vec![Message::assistant("42"), Message::system("1tail")]
        );
        Ok(())
    }

    #[test]
    fn test_resume_without_response_fails() -> Result<(), CompileError> {
        let source = "<step/>";
        let output = compile_source(source)?;
        let err = compile(&output.ast, source, Scope::with_stash(output.scope_stash)).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingStepResponse);
        Ok(())
    }

    #[test]
    fn test_reference_tags_are_rejected() {
        let err = compile_source("Hi <ref prompt=\"other\"/>").unwrap_err();
        assert_eq!(err.code, ErrorCode::DidNotResolveReferences);
        assert_eq!(err.column, 4);
    }
}
