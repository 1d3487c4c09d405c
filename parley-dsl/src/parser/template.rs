//! Template parser
//!
//! Turns raw prompt text into a [`Fragment`]. The scanner works directly on
//! characters for literal text and markup and hands every `{{ ... }}` span to
//! the expression lexer, which finds the closing braces itself.

use super::ast::*;
use super::expression::{parse_each_header, ExpressionParser};
use crate::config::parse_config_block;
use crate::lexer::*;
use parley_core::{CompileError, CompileResult, ErrorCode, MessageRole};

// ============================================================================
// NESTING CONTEXT
// ============================================================================

/// Which structural tags enclose the current position.
#[derive(Debug, Clone, Copy, Default)]
struct Nesting {
    in_message: bool,
    in_content: bool,
    in_step: bool,
    in_each: bool,
}

/// What stopped a run of sibling nodes.
#[derive(Debug)]
enum Terminator {
    Eof,
    Else { condition: Option<Expr>, span: Span },
    BlockClose { name: String, span: Span },
    TagClose { name: String, span: Span },
}

enum Parsed {
    Node(TemplateNode),
    Terminator(Terminator),
}

// ============================================================================
// PARSER
// ============================================================================

/// Parser for template documents.
pub struct TemplateParser<'a> {
    source: &'a str,
    pos: usize,
    line_starts: Vec<usize>,
}

impl<'a> TemplateParser<'a> {
    pub fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            pos: 0,
            line_starts,
        }
    }

    /// Parse the whole document.
    pub fn parse(mut self) -> CompileResult<Fragment> {
        let mut children = Vec::new();
        if let Some(config) = self.parse_config()? {
            children.push(config);
        }

        let (nodes, terminator) = self.parse_children(Nesting::default())?;
        children.extend(nodes);
        match terminator {
            Terminator::Eof => {}
            other => return Err(unexpected_terminator(other, "end of input")),
        }

        Ok(Fragment::new(children, self.span(0, self.source.len())))
    }

    // ========================================================================
    // Config block
    // ========================================================================

    /// A `---` fenced YAML block, recognized only as the first content.
    fn parse_config(&mut self) -> CompileResult<Option<TemplateNode>> {
        let start = self.source.len() - self.source.trim_start().len();
        let rest = &self.source[start..];
        let Some(after_fence) = rest.strip_prefix("---") else {
            return Ok(None);
        };
        let first_line_end = after_fence.find('\n').unwrap_or(after_fence.len());
        if !after_fence[..first_line_end].trim().is_empty() {
            return Ok(None);
        }

        let body_start = start + 3 + (first_line_end + 1).min(after_fence.len());
        let mut line_start = body_start;
        loop {
            if line_start >= self.source.len() {
                return Err(CompileError::unexpected_eof("closing '---' of the config block")
                    .at(start, self.source.len()));
            }
            let line_end = self.source[line_start..]
                .find('\n')
                .map(|i| line_start + i)
                .unwrap_or(self.source.len());
            if self.source[line_start..line_end].trim_end() == "---" {
                let yaml = &self.source[body_start..line_start];
                let value = parse_config_block(yaml).map_err(|e| {
                    CompileError::new(ErrorCode::InvalidConfig, e.to_string())
                        .at(start, line_end)
                })?;
                self.pos = line_end;
                tracing::trace!(keys = value.len(), "Parsed config block");
                return Ok(Some(TemplateNode::Config(ConfigNode {
                    value,
                    span: self.span(start, line_end),
                })));
            }
            line_start = line_end + 1;
        }
    }

    // ========================================================================
    // Children
    // ========================================================================

    fn parse_children(&mut self, nesting: Nesting) -> CompileResult<(Vec<TemplateNode>, Terminator)> {
        let mut nodes = Vec::new();
        let mut text = String::new();
        let mut text_start = self.pos;

        loop {
            let rest = &self.source[self.pos..];

            let Some(c) = rest.chars().next() else {
                self.flush_text(&mut nodes, &mut text, text_start);
                return Ok((nodes, Terminator::Eof));
            };

            if c == '\\' {
                if let Some(escaped) = rest[1..].chars().next() {
                    if matches!(escaped, '<' | '{' | '}' | '/' | '\\') {
                        if text.is_empty() {
                            text_start = self.pos;
                        }
                        text.push(escaped);
                        self.pos += 1 + escaped.len_utf8();
                        continue;
                    }
                }
            }

            let markup = rest.starts_with("/*")
                || rest.starts_with("<!--")
                || rest.starts_with("{{")
                || (c == '<' && starts_tag(&rest[1..]));

            if !markup {
                if text.is_empty() {
                    text_start = self.pos;
                }
                text.push(c);
                self.pos += c.len_utf8();
                continue;
            }

            self.flush_text(&mut nodes, &mut text, text_start);

            if rest.starts_with("/*") {
                nodes.push(self.parse_comment("/*", "*/")?);
            } else if rest.starts_with("<!--") {
                nodes.push(self.parse_comment("<!--", "-->")?);
            } else if rest.starts_with("{{") {
                match self.parse_mustache_or_block(nesting)? {
                    Parsed::Node(node) => nodes.push(node),
                    Parsed::Terminator(terminator) => return Ok((nodes, terminator)),
                }
            } else if rest.starts_with("</") {
                return Ok((nodes, self.parse_closing_tag()?));
            } else {
                nodes.push(self.parse_element(nesting)?);
            }
        }
    }

    fn flush_text(&self, nodes: &mut Vec<TemplateNode>, text: &mut String, start: usize) {
        if text.is_empty() {
            return;
        }
        nodes.push(TemplateNode::Text(TextNode {
            data: std::mem::take(text),
            span: self.span(start, self.pos),
        }));
    }

    fn parse_comment(&mut self, open: &str, close: &str) -> CompileResult<TemplateNode> {
        let start = self.pos;
        let body_start = start + open.len();
        let Some(offset) = self.source[body_start..].find(close) else {
            return Err(CompileError::unexpected_eof(&format!("'{}'", close))
                .at(start, self.source.len()));
        };
        let data = self.source[body_start..body_start + offset].to_string();
        self.pos = body_start + offset + close.len();

        let ignores = data
            .trim()
            .strip_prefix("parley-ignore")
            .map(|codes| {
                codes
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|code| !code.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(TemplateNode::Comment(CommentNode {
            data,
            ignores,
            span: self.span(start, self.pos),
        }))
    }

    // ========================================================================
    // Mustaches & blocks
    // ========================================================================

    fn parse_mustache_or_block(&mut self, nesting: Nesting) -> CompileResult<Parsed> {
        let start = self.pos;
        let inner_start = start + 2;
        let inner = &self.source[inner_start..];
        let leading = inner.len() - inner.trim_start().len();
        let marker_pos = inner_start + leading;

        match self.source[marker_pos..].chars().next() {
            Some('#') => {
                let (keyword, after) = self.read_word(marker_pos + 1);
                match keyword.as_str() {
                    "if" => {
                        let tokens = self.lex_mustache(start, after)?;
                        let condition = ExpressionParser::new(tokens).parse()?;
                        Ok(Parsed::Node(self.parse_if_tail(condition, start, nesting)?))
                    }
                    "each" => {
                        let tokens = self.lex_mustache(start, after)?;
                        let header_span = self.span(start, self.pos);
                        let (expression, context, index) = parse_each_header(tokens, header_span)?;
                        Ok(Parsed::Node(
                            self.parse_each_tail(expression, context, index, start, nesting)?,
                        ))
                    }
                    other => Err(CompileError::parse_error(format!("Unknown block '#{}'", other))
                        .at(start, after)),
                }
            }
            Some(':') => {
                let (keyword, after) = self.read_word(marker_pos + 1);
                if keyword != "else" {
                    return Err(CompileError::parse_error(format!(
                        "Unknown block continuation ':{}'",
                        keyword
                    ))
                    .at(start, after));
                }
                let rest = &self.source[after..];
                let after_ws = after + (rest.len() - rest.trim_start().len());
                let (next_word, after_if) = self.read_word(after_ws);
                let condition = if next_word == "if" {
                    let tokens = self.lex_mustache(start, after_if)?;
                    Some(ExpressionParser::new(tokens).parse()?)
                } else {
                    self.expect_mustache_end(start, after)?;
                    None
                };
                Ok(Parsed::Terminator(Terminator::Else {
                    condition,
                    span: self.span(start, self.pos),
                }))
            }
            Some('/') => {
                let (name, after) = self.read_word(marker_pos + 1);
                self.expect_mustache_end(start, after)?;
                Ok(Parsed::Terminator(Terminator::BlockClose {
                    name,
                    span: self.span(start, self.pos),
                }))
            }
            _ => Ok(Parsed::Node(self.parse_mustache_tag()?)),
        }
    }

    /// A plain `{{ expression }}` starting at the current position.
    fn parse_mustache_tag(&mut self) -> CompileResult<TemplateNode> {
        let start = self.pos;
        let tokens = self.lex_mustache(start, start + 2)?;
        let expression = ExpressionParser::new(tokens).parse()?;
        Ok(TemplateNode::Mustache(MustacheTag {
            expression,
            span: self.span(start, self.pos),
        }))
    }

    /// Run the expression lexer from `from` to the closing `}}` and move past it.
    fn lex_mustache(&mut self, start: usize, from: usize) -> CompileResult<Vec<Token>> {
        let mut lexer = Lexer::mustache(self.source, from);
        let tokens = lexer.tokenize();
        match tokens.last().map(|t| &t.kind) {
            Some(TokenKind::MustacheEnd) => {
                self.pos = lexer.position();
                Ok(tokens)
            }
            Some(TokenKind::Error(msg)) => {
                let span = tokens.last().map(|t| t.span).unwrap_or_default();
                Err(CompileError::parse_error(msg.clone()).at(span.start, span.end))
            }
            _ => Err(CompileError::unexpected_eof("'}}'").at(start, self.source.len())),
        }
    }

    fn expect_mustache_end(&mut self, start: usize, from: usize) -> CompileResult<()> {
        let tokens = self.lex_mustache(start, from)?;
        if tokens.len() != 1 {
            let span = tokens[0].span;
            return Err(CompileError::parse_error(format!(
                "Unexpected token {} in block tag",
                tokens[0].kind
            ))
            .at(span.start, span.end));
        }
        Ok(())
    }

    fn read_word(&self, from: usize) -> (String, usize) {
        let word: String = self.source[from..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let end = from + word.len();
        (word, end)
    }

    fn parse_if_tail(&mut self, condition: Expr, start: usize, nesting: Nesting) -> CompileResult<TemplateNode> {
        let (consequent, terminator) = self.parse_children(nesting)?;

        let alternate = match terminator {
            Terminator::BlockClose { ref name, .. } if name == "if" => None,
            Terminator::Else {
                condition: None, ..
            } => {
                let (alternate, terminator) = self.parse_children(nesting)?;
                expect_block_close(terminator, "if")?;
                Some(trim_block(alternate))
            }
            Terminator::Else {
                condition: Some(condition),
                span,
            } => {
                let nested = self.parse_if_tail(condition, span.start, nesting)?;
                Some(vec![nested])
            }
            other => return Err(unexpected_terminator(other, "{{/if}}")),
        };

        Ok(TemplateNode::If(IfBlock {
            condition,
            consequent: trim_block(consequent),
            alternate,
            span: self.span(start, self.pos),
        }))
    }

    fn parse_each_tail(
        &mut self,
        expression: Expr,
        context: String,
        index: Option<String>,
        start: usize,
        nesting: Nesting,
    ) -> CompileResult<TemplateNode> {
        let body_nesting = Nesting {
            in_each: true,
            ..nesting
        };
        let (body, terminator) = self.parse_children(body_nesting)?;

        let alternate = match terminator {
            Terminator::BlockClose { ref name, .. } if name == "each" => None,
            Terminator::Else {
                condition: None, ..
            } => {
                let (alternate, terminator) = self.parse_children(body_nesting)?;
                expect_block_close(terminator, "each")?;
                Some(trim_block(alternate))
            }
            Terminator::Else {
                condition: Some(_),
                span,
            } => {
                return Err(CompileError::parse_error(
                    "'{{:else if}}' is only valid inside if blocks",
                )
                .at(span.start, span.end))
            }
            other => return Err(unexpected_terminator(other, "{{/each}}")),
        };

        Ok(TemplateNode::Each(EachBlock {
            expression,
            context,
            index,
            body: trim_block(body),
            alternate,
            span: self.span(start, self.pos),
        }))
    }

    // ========================================================================
    // Elements
    // ========================================================================

    fn parse_closing_tag(&mut self) -> CompileResult<Terminator> {
        let start = self.pos;
        let (name, after) = self.read_tag_name(start + 2);
        let rest = &self.source[after..];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with('>') {
            return Err(CompileError::parse_error(format!("Malformed closing tag </{}", name))
                .at(start, after));
        }
        self.pos = after + (rest.len() - trimmed.len()) + 1;
        Ok(Terminator::TagClose {
            name,
            span: self.span(start, self.pos),
        })
    }

    fn parse_element(&mut self, nesting: Nesting) -> CompileResult<TemplateNode> {
        let start = self.pos;
        let (name, after) = self.read_tag_name(start + 1);
        self.pos = after;
        let (attributes, self_closing) = self.parse_attributes()?;
        let tag_span = self.span(start, self.pos);
        let tag_error = |e: CompileError| e.at(tag_span.start, tag_span.end);

        enum Kind {
            Message(Option<MessageRole>),
            Content(ContentKind),
            Reference,
            Step,
        }

        let kind = if name == "message" {
            Kind::Message(None)
        } else if let Ok(role) = name.parse::<MessageRole>() {
            Kind::Message(Some(role))
        } else if let Some(content) = ContentKind::from_tag(&name) {
            Kind::Content(content)
        } else if name == "ref" {
            Kind::Reference
        } else if name == "step" {
            Kind::Step
        } else {
            return Err(tag_error(CompileError::unknown_tag(&name)));
        };

        let child_nesting = match kind {
            Kind::Message(_) => {
                if nesting.in_message {
                    return Err(tag_error(CompileError::message_tag_inside_message()));
                }
                Nesting {
                    in_message: true,
                    ..nesting
                }
            }
            Kind::Content(_) => {
                if nesting.in_content {
                    return Err(tag_error(CompileError::new(
                        ErrorCode::ContentTagInsideContent,
                        "Content tags cannot be placed inside another content tag",
                    )));
                }
                if !nesting.in_message {
                    return Err(tag_error(CompileError::new(
                        ErrorCode::ContentTagOutsideMessage,
                        format!("Content tag <{}> must be placed inside a message", name),
                    )));
                }
                Nesting {
                    in_content: true,
                    ..nesting
                }
            }
            Kind::Step => {
                let violation = if nesting.in_message {
                    Some((ErrorCode::StepTagInsideMessage, "a message"))
                } else if nesting.in_step {
                    Some((ErrorCode::StepTagInsideStep, "another step"))
                } else if nesting.in_each {
                    Some((ErrorCode::StepTagInsideEach, "an each block"))
                } else {
                    None
                };
                if let Some((code, place)) = violation {
                    return Err(tag_error(CompileError::new(
                        code,
                        format!("Step tags cannot be placed inside {}", place),
                    )));
                }
                Nesting {
                    in_step: true,
                    ..nesting
                }
            }
            Kind::Reference => nesting,
        };

        let children = if self_closing {
            Vec::new()
        } else {
            let (children, terminator) = self.parse_children(child_nesting)?;
            match terminator {
                Terminator::TagClose { name: closing, .. } if closing == name => {}
                Terminator::TagClose {
                    name: closing,
                    span,
                } => {
                    return Err(CompileError::new(
                        ErrorCode::UnexpectedTagClose,
                        format!("Expected </{}> but found </{}>", name, closing),
                    )
                    .at(span.start, span.end))
                }
                Terminator::Eof => {
                    return Err(CompileError::unexpected_eof(&format!("</{}>", name))
                        .at(start, self.source.len()))
                }
                other => return Err(unexpected_terminator(other, &format!("</{}>", name))),
            }
            children
        };

        let span = self.span(start, self.pos);
        Ok(match kind {
            Kind::Message(role) => TemplateNode::Message(MessageTag {
                role,
                attributes,
                children,
                span,
            }),
            Kind::Content(kind) => TemplateNode::Content(ContentTag {
                kind,
                attributes,
                children,
                span,
            }),
            Kind::Reference => TemplateNode::Reference(ReferenceTag { attributes, span }),
            Kind::Step => TemplateNode::Step(StepTag {
                attributes,
                children,
                span,
            }),
        })
    }

    fn read_tag_name(&self, from: usize) -> (String, usize) {
        let name: String = self.source[from..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let end = from + name.len();
        (name, end)
    }

    /// Parse attributes up to and including `>` or `/>`. Returns whether the
    /// tag was self-closing.
    fn parse_attributes(&mut self) -> CompileResult<(Vec<Attribute>, bool)> {
        let mut attributes: Vec<Attribute> = Vec::new();

        loop {
            self.skip_whitespace();
            let rest = &self.source[self.pos..];

            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok((attributes, true));
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok((attributes, false));
            }
            if rest.is_empty() {
                return Err(CompileError::unexpected_eof("'>'").at(self.pos, self.pos));
            }

            let start = self.pos;
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
                .collect();
            if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
                return Err(CompileError::parse_error("Malformed attribute").at(start, start + 1));
            }
            self.pos += name.len();

            if attributes.iter().any(|a| a.name == name) {
                return Err(CompileError::parse_error(format!("Duplicate attribute '{}'", name))
                    .at(start, self.pos));
            }

            self.skip_whitespace();
            let value = if self.source[self.pos..].starts_with('=') {
                self.pos += 1;
                self.skip_whitespace();
                AttributeValue::Nodes(self.parse_attribute_value()?)
            } else {
                AttributeValue::Flag
            };

            attributes.push(Attribute {
                name,
                value,
                span: self.span(start, self.pos),
            });
        }
    }

    fn parse_attribute_value(&mut self) -> CompileResult<Vec<TemplateNode>> {
        let rest = &self.source[self.pos..];

        if rest.starts_with("{{") {
            return Ok(vec![self.parse_mustache_tag()?]);
        }

        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            Some(_) => {
                // Unquoted value
                let start = self.pos;
                let value: String = rest
                    .chars()
                    .take_while(|c| !c.is_whitespace() && !matches!(c, '>' | '/' | '"' | '\'' | '='))
                    .collect();
                if value.is_empty() {
                    return Err(CompileError::parse_error("Malformed attribute value")
                        .at(start, start + 1));
                }
                self.pos += value.len();
                return Ok(vec![TemplateNode::Text(TextNode {
                    data: value,
                    span: self.span(start, self.pos),
                })]);
            }
            None => {
                return Err(CompileError::unexpected_eof("attribute value").at(self.pos, self.pos))
            }
        };

        let open = self.pos;
        self.pos += 1;
        let mut nodes = Vec::new();
        let mut text = String::new();
        let mut text_start = self.pos;

        loop {
            let rest = &self.source[self.pos..];
            let Some(c) = rest.chars().next() else {
                return Err(CompileError::unexpected_eof(&format!("closing {}", quote))
                    .at(open, self.source.len()));
            };

            if c == quote {
                self.flush_text(&mut nodes, &mut text, text_start);
                self.pos += 1;
                return Ok(nodes);
            }

            if rest.starts_with("{{") {
                self.flush_text(&mut nodes, &mut text, text_start);
                nodes.push(self.parse_mustache_tag()?);
                continue;
            }

            if text.is_empty() {
                text_start = self.pos;
            }
            text.push(c);
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.source[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Build a span with line and column resolved from the line table.
    fn span(&self, start: usize, end: usize) -> Span {
        let line_idx = match self.line_starts.binary_search(&start) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        let column = self
            .source
            .get(line_start..start)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0)
            + 1;
        Span::new(start, end, line_idx + 1, column)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// `<` starts markup only when followed by a tag name or a closing slash and
/// tag name; anything else (`a < b`) is literal text.
fn starts_tag(after_lt: &str) -> bool {
    let after = after_lt.strip_prefix('/').unwrap_or(after_lt);
    after
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false)
}

/// Trim leading whitespace of the first text child and trailing whitespace
/// of the last one, dropping text nodes left empty.
fn trim_block(mut nodes: Vec<TemplateNode>) -> Vec<TemplateNode> {
    if let Some(TemplateNode::Text(first)) = nodes.first_mut() {
        first.data = first.data.trim_start().to_string();
    }
    if let Some(TemplateNode::Text(last)) = nodes.last_mut() {
        last.data = last.data.trim_end().to_string();
    }
    nodes.retain(|node| !matches!(node, TemplateNode::Text(t) if t.data.is_empty()));
    nodes
}

fn expect_block_close(terminator: Terminator, block: &str) -> CompileResult<()> {
    match terminator {
        Terminator::BlockClose { ref name, .. } if name == block => Ok(()),
        other => Err(unexpected_terminator(other, &format!("{{{{/{}}}}}", block))),
    }
}

fn unexpected_terminator(terminator: Terminator, expected: &str) -> CompileError {
    match terminator {
        Terminator::Eof => CompileError::unexpected_eof(expected),
        Terminator::Else { span, .. } => CompileError::new(
            ErrorCode::UnexpectedBlockClose,
            format!("Unexpected {{{{:else}}}}, expected {}", expected),
        )
        .at(span.start, span.end),
        Terminator::BlockClose { name, span } => CompileError::new(
            ErrorCode::UnexpectedBlockClose,
            format!("Unexpected {{{{/{}}}}}, expected {}", name, expected),
        )
        .at(span.start, span.end),
        Terminator::TagClose { name, span } => CompileError::new(
            ErrorCode::UnexpectedTagClose,
            format!("Unexpected </{}>, expected {}", name, expected),
        )
        .at(span.start, span.end),
    }
}

// ============================================================================
// CONVENIENCE FUNCTIONS
// ============================================================================

/// Parse a template into a [`Fragment`].
pub fn parse(source: &str) -> CompileResult<Fragment> {
    let fragment = TemplateParser::new(source)
        .parse()
        .map_err(|e| e.locate(source))?;
    tracing::trace!(nodes = fragment.children.len(), "Parsed template");
    Ok(fragment)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(nodes: &[TemplateNode]) -> Vec<String> {
        nodes
            .iter()
            .filter_map(|n| match n {
                TemplateNode::Text(t) => Some(t.data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_plain_text() -> Result<(), CompileError> {
        let fragment = parse("hello world")?;
        assert_eq!(texts(&fragment.children), vec!["hello world"]);
        Ok(())
    }

    #[test]
    fn test_config_only_recognized_first() -> Result<(), CompileError> {
        let fragment = parse("---\nfoo: bar\n---\nbody")?;
        match &fragment.children[0] {
            TemplateNode::Config(config) => {
                assert_eq!(config.value["foo"], serde_json::json!("bar"));
            }
            other => panic!("expected config, got {:?}", other),
        }

        let fragment = parse("Lorem\n---\nfoo: bar\n---")?;
        assert!(fragment
            .children
            .iter()
            .all(|n| matches!(n, TemplateNode::Text(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_config_block() {
        let err = parse("---\n- a\n- b\n---\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_comments_keep_surrounding_text() -> Result<(), CompileError> {
        let fragment = parse("anna\nbob\n/* comment */\ncharlie")?;
        assert_eq!(texts(&fragment.children), vec!["anna\nbob\n", "\ncharlie"]);
        assert!(matches!(fragment.children[1], TemplateNode::Comment(_)));
        Ok(())
    }

    #[test]
    fn test_comment_ignores() -> Result<(), CompileError> {
        let fragment = parse("<!-- parley-ignore unknown-tag, parse-error -->")?;
        match &fragment.children[0] {
            TemplateNode::Comment(comment) => {
                assert_eq!(comment.ignores, vec!["unknown-tag", "parse-error"])
            }
            other => panic!("expected comment, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_escapes_produce_literal_characters() -> Result<(), CompileError> {
        let fragment = parse(r"2 \< 3 \{{ x }}")?;
        assert_eq!(texts(&fragment.children), vec!["2 < 3 {{ x }}"]);
        Ok(())
    }

    #[test]
    fn test_less_than_without_tag_name_is_text() -> Result<(), CompileError> {
        let fragment = parse("a < b")?;
        assert_eq!(texts(&fragment.children), vec!["a < b"]);
        Ok(())
    }

    #[test]
    fn test_if_else_blocks_are_trimmed() -> Result<(), CompileError> {
        let fragment = parse("{{#if foo}}\n  yes\n{{:else}}\n  no\n{{/if}}")?;
        match &fragment.children[0] {
            TemplateNode::If(block) => {
                assert_eq!(texts(&block.consequent), vec!["yes"]);
                assert_eq!(texts(block.alternate.as_ref().unwrap()), vec!["no"]);
            }
            other => panic!("expected if block, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_else_if_chain_nests() -> Result<(), CompileError> {
        let fragment = parse("{{#if a}}A{{:else if b}}B{{:else}}C{{/if}}")?;
        match &fragment.children[0] {
            TemplateNode::If(block) => {
                let alternate = block.alternate.as_ref().unwrap();
                assert_eq!(alternate.len(), 1);
                assert!(matches!(alternate[0], TemplateNode::If(_)));
            }
            other => panic!("expected if block, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_each_block_bindings() -> Result<(), CompileError> {
        let fragment = parse("{{#each [1, 2] as item, i}} {{item}} {{:else}} none {{/each}}")?;
        match &fragment.children[0] {
            TemplateNode::Each(block) => {
                assert_eq!(block.context, "item");
                assert_eq!(block.index.as_deref(), Some("i"));
                assert_eq!(block.body.len(), 1);
                assert_eq!(texts(block.alternate.as_ref().unwrap()), vec!["none"]);
            }
            other => panic!("expected each block, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_mismatched_block_close() {
        let err = parse("{{#if a}}x{{/each}}").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedBlockClose);
        let err = parse("{{#if a}}x").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedEof);
        let err = parse("x{{/if}}").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedBlockClose);
    }

    #[test]
    fn test_message_tags() -> Result<(), CompileError> {
        let fragment = parse("<system>a</system><user>b</user><tool id=\"1\">c</tool>")?;
        let roles: Vec<_> = fragment
            .children
            .iter()
            .filter_map(|n| match n {
                TemplateNode::Message(m) => m.role,
                _ => None,
            })
            .collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::Tool]
        );
        Ok(())
    }

    #[test]
    fn test_generic_message_tag_with_mustache_attribute() -> Result<(), CompileError> {
        let fragment = parse("<message role={{ role }}>hi</message>")?;
        match &fragment.children[0] {
            TemplateNode::Message(m) => {
                assert!(m.role.is_none());
                let role = find_attribute(&m.attributes, "role").unwrap();
                assert!(matches!(
                    &role.value,
                    AttributeValue::Nodes(nodes) if matches!(nodes[0], TemplateNode::Mustache(_))
                ));
            }
            other => panic!("expected message, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_structural_errors() {
        let cases = [
            ("<foo>x</foo>", ErrorCode::UnknownTag),
            ("<system><user>x</user></system>", ErrorCode::MessageTagInsideMessage),
            ("<user><text><text>x</text></text></user>", ErrorCode::ContentTagInsideContent),
            ("<text>x</text>", ErrorCode::ContentTagOutsideMessage),
            ("<user><step/></user>", ErrorCode::StepTagInsideMessage),
            ("<step><step/></step>", ErrorCode::StepTagInsideStep),
            ("{{#each xs as x}}<step/>{{/each}}", ErrorCode::StepTagInsideEach),
            ("{{#each xs as x}}{{:else}}<step/>{{/each}}", ErrorCode::StepTagInsideEach),
            ("<user>x</system>", ErrorCode::UnexpectedTagClose),
            ("<user =x>x</user>", ErrorCode::ParseError),
            ("<system><foo>x</foo></system>", ErrorCode::UnknownTag),
        ];
        for (source, code) in cases {
            let err = parse(source).unwrap_err();
            assert_eq!(err.code, code, "source: {}", source);
        }
    }

    #[test]
    fn test_error_positions_are_located() {
        let err = parse("line\n  <foo/>").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 3);
    }

    #[test]
    fn test_reference_and_step_tags() -> Result<(), CompileError> {
        let fragment = parse("<ref prompt=\"other\" /><step as=\"answer\" temperature={{ 0.5 }}/>")?;
        assert!(matches!(fragment.children[0], TemplateNode::Reference(_)));
        match &fragment.children[1] {
            TemplateNode::Step(step) => assert_eq!(step.attributes.len(), 2),
            other => panic!("expected step, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_object_literal_inside_mustache() -> Result<(), CompileError> {
        let fragment = parse("{{ foo = { a: 1, b: 2 } }}after")?;
        assert!(matches!(fragment.children[0], TemplateNode::Mustache(_)));
        assert_eq!(texts(&fragment.children), vec!["after"]);
        Ok(())
    }
}
