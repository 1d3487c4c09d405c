//! Expression parser
//!
//! Precedence climbing over the token stream produced by the lexer. Binding
//! power, loosest first:
//!
//! ```text
//! assignment  =  +=  -= ...       (right)
//! conditional a ? b : c           (right)
//! ||  ??
//! &&
//! |
//! ^
//! &
//! ==  !=  ===  !==
//! <  >  <=  >=  in  instanceof
//! <<  >>  >>>
//! +  -
//! *  /  %
//! **                              (right)
//! unary  ! - + ~ typeof void ++x --x
//! postfix x++ x--
//! member / call  a.b  a?.b  a[b]  a(b)
//! ```

use super::ast::*;
use crate::lexer::*;
use parley_core::{CompileError, CompileResult};

// ============================================================================
// PARSER
// ============================================================================

/// Parser over the tokens of a single expression.
pub struct ExpressionParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExpressionParser {
    /// Create a parser. The token stream is terminated with `Eof` if the
    /// lexer did not already end it.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        let needs_eof = !matches!(
            tokens.last().map(|t| &t.kind),
            Some(TokenKind::Eof) | Some(TokenKind::MustacheEnd)
        );
        if needs_eof {
            let span = tokens
                .last()
                .map(|t| Span::new(t.span.end, t.span.end, t.span.line, t.span.column))
                .unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Eof,
                span,
            });
        }
        Self { tokens, pos: 0 }
    }

    /// Parse one complete expression, requiring every token to be consumed.
    pub fn parse(mut self) -> CompileResult<Expr> {
        if self.is_at_end() {
            return Err(self.error("Expected expression"));
        }
        let expr = self.parse_assignment()?;
        if !self.is_at_end() {
            return Err(self.error(&format!("Unexpected token {}", self.current().kind)));
        }
        Ok(expr)
    }

    // ========================================================================
    // Assignment & conditional
    // ========================================================================

    fn parse_assignment(&mut self) -> CompileResult<Expr> {
        let target = self.parse_conditional()?;

        let op = match self.current().kind {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::Add,
            TokenKind::MinusAssign => AssignOp::Sub,
            TokenKind::StarAssign => AssignOp::Mul,
            TokenKind::StarStarAssign => AssignOp::Pow,
            TokenKind::SlashAssign => AssignOp::Div,
            TokenKind::PercentAssign => AssignOp::Rem,
            TokenKind::ShlAssign => AssignOp::Shl,
            TokenKind::ShrAssign => AssignOp::Shr,
            TokenKind::UShrAssign => AssignOp::UShr,
            TokenKind::AmpAssign => AssignOp::BitAnd,
            TokenKind::PipeAssign => AssignOp::BitOr,
            TokenKind::CaretAssign => AssignOp::BitXor,
            _ => return Ok(target),
        };

        if !target.is_valid_target() {
            return Err(CompileError::parse_error("Invalid assignment target")
                .at(target.span.start, target.span.end));
        }

        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.to(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_conditional(&mut self) -> CompileResult<Expr> {
        let test = self.parse_binary(0)?;
        if !self.check(&TokenKind::Question) {
            return Ok(test);
        }

        self.advance();
        let consequent = self.parse_assignment()?;
        self.expect(TokenKind::Colon)?;
        let alternate = self.parse_assignment()?;
        let span = test.span.to(alternate.span);
        Ok(Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span,
        ))
    }

    // ========================================================================
    // Binary operators
    // ========================================================================

    fn parse_binary(&mut self, min_precedence: u8) -> CompileResult<Expr> {
        let mut left = self.parse_unary()?;

        while let Some((precedence, op)) = binary_operator(&self.current().kind) {
            if precedence < min_precedence {
                break;
            }
            self.advance();

            // `**` is right associative, everything else binds left.
            let next_min = if matches!(op, Operator::Binary(BinaryOp::Pow)) {
                precedence
            } else {
                precedence + 1
            };
            let right = self.parse_binary(next_min)?;
            let span = left.span.to(right.span);

            let kind = match op {
                Operator::Binary(op) => ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Operator::Logical(op) => ExprKind::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
            left = Expr::new(kind, span);
        }

        Ok(left)
    }

    // ========================================================================
    // Unary & update
    // ========================================================================

    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let start = self.current().span;

        let op = match self.current().kind {
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Typeof => Some(UnaryOp::Typeof),
            TokenKind::Void => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let argument = self.parse_unary()?;
            let span = start.to(argument.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    argument: Box::new(argument),
                },
                span,
            ));
        }

        let update = match self.current().kind {
            TokenKind::PlusPlus => Some(UpdateOp::Increment),
            TokenKind::MinusMinus => Some(UpdateOp::Decrement),
            _ => None,
        };
        if let Some(op) = update {
            self.advance();
            let argument = self.parse_unary()?;
            if !argument.is_valid_target() {
                return Err(CompileError::parse_error(format!(
                    "Invalid operand for prefix '{}'",
                    op.as_str()
                ))
                .at(argument.span.start, argument.span.end));
            }
            let span = start.to(argument.span);
            return Ok(Expr::new(
                ExprKind::Update {
                    op,
                    prefix: true,
                    argument: Box::new(argument),
                },
                span,
            ));
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let expr = self.parse_call_member()?;

        let op = match self.current().kind {
            TokenKind::PlusPlus => UpdateOp::Increment,
            TokenKind::MinusMinus => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        if !expr.is_valid_target() {
            return Err(CompileError::parse_error(format!(
                "Invalid operand for postfix '{}'",
                op.as_str()
            ))
            .at(expr.span.start, expr.span.end));
        }

        let span = expr.span.to(self.current().span);
        self.advance();
        Ok(Expr::new(
            ExprKind::Update {
                op,
                prefix: false,
                argument: Box::new(expr),
            },
            span,
        ))
    }

    // ========================================================================
    // Member access & calls
    // ========================================================================

    fn parse_call_member(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    let (name, end) = self.expect_property_name()?;
                    let span = expr.span.to(end);
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property: MemberProperty::Static(name),
                            optional: false,
                        },
                        span,
                    );
                }
                TokenKind::QuestionDot => {
                    self.advance();
                    expr = match self.current().kind {
                        TokenKind::LBracket => self.finish_computed_member(expr, true)?,
                        TokenKind::LParen => self.finish_call(expr, true)?,
                        _ => {
                            let (name, end) = self.expect_property_name()?;
                            let span = expr.span.to(end);
                            Expr::new(
                                ExprKind::Member {
                                    object: Box::new(expr),
                                    property: MemberProperty::Static(name),
                                    optional: true,
                                },
                                span,
                            )
                        }
                    };
                }
                TokenKind::LBracket => {
                    expr = self.finish_computed_member(expr, false)?;
                }
                TokenKind::LParen => {
                    expr = self.finish_call(expr, false)?;
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn finish_computed_member(&mut self, object: Expr, optional: bool) -> CompileResult<Expr> {
        self.expect(TokenKind::LBracket)?;
        let property = self.parse_assignment()?;
        let end = self.current().span;
        self.expect(TokenKind::RBracket)?;
        let span = object.span.to(end);
        Ok(Expr::new(
            ExprKind::Member {
                object: Box::new(object),
                property: MemberProperty::Computed(Box::new(property)),
                optional,
            },
            span,
        ))
    }

    fn finish_call(&mut self, callee: Expr, optional: bool) -> CompileResult<Expr> {
        self.expect(TokenKind::LParen)?;
        let mut arguments = Vec::new();
        while !self.check(&TokenKind::RParen) {
            arguments.push(self.parse_assignment()?);
            if !self.check(&TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        let end = self.current().span;
        self.expect(TokenKind::RParen)?;
        let span = callee.span.to(end);
        Ok(Expr::new(
            ExprKind::Call {
                callee: Box::new(callee),
                arguments,
                optional,
            },
            span,
        ))
    }

    // ========================================================================
    // Primary expressions
    // ========================================================================

    fn parse_primary(&mut self) -> CompileResult<Expr> {
        let span = self.current().span;

        let literal = match &self.current().kind {
            TokenKind::Number(n) => Some(Literal::Number(*n)),
            TokenKind::String(s) => Some(Literal::String(s.clone())),
            TokenKind::True => Some(Literal::Bool(true)),
            TokenKind::False => Some(Literal::Bool(false)),
            TokenKind::Null => Some(Literal::Null),
            TokenKind::Undefined => Some(Literal::Undefined),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(Expr::new(ExprKind::Literal(literal), span));
        }

        match &self.current().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(Expr::new(ExprKind::Identifier(name), span))
            }
            TokenKind::LParen => {
                self.advance();
                let mut expr = self.parse_assignment()?;
                let end = self.current().span;
                self.expect(TokenKind::RParen)?;
                expr.span = span.to(end);
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array(),
            TokenKind::LBrace => self.parse_object(),
            TokenKind::Error(msg) => {
                let msg = msg.clone();
                Err(self.error(&msg))
            }
            TokenKind::Eof | TokenKind::MustacheEnd => Err(self.error("Expected expression")),
            other => {
                let msg = format!("Unexpected token {}", other);
                Err(self.error(&msg))
            }
        }
    }

    fn parse_array(&mut self) -> CompileResult<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LBracket)?;

        let mut elements = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            elements.push(self.parse_assignment()?);
            if !self.check(&TokenKind::RBracket) {
                self.expect(TokenKind::Comma)?;
            }
        }

        let end = self.current().span;
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(ExprKind::Array(elements), start.to(end)))
    }

    fn parse_object(&mut self) -> CompileResult<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LBrace)?;

        let mut properties = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            properties.push(self.parse_object_property()?);
            if !self.check(&TokenKind::RBrace) {
                self.expect(TokenKind::Comma)?;
            }
        }

        let end = self.current().span;
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Object(properties), start.to(end)))
    }

    fn parse_object_property(&mut self) -> CompileResult<ObjectProperty> {
        let span = self.current().span;

        let key = match &self.current().kind {
            TokenKind::LBracket => {
                self.advance();
                let key = self.parse_assignment()?;
                self.expect(TokenKind::RBracket)?;
                PropertyKey::Computed(key)
            }
            TokenKind::String(s) => {
                let key = s.clone();
                self.advance();
                PropertyKey::Static(key)
            }
            TokenKind::Number(n) => {
                let key = parley_core::format_number(*n);
                self.advance();
                PropertyKey::Static(key)
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                if !self.check(&TokenKind::Colon) {
                    // Shorthand `{ foo }`
                    return Ok(ObjectProperty {
                        key: PropertyKey::Static(name.clone()),
                        value: Expr::new(ExprKind::Identifier(name), span),
                    });
                }
                PropertyKey::Static(name)
            }
            _ => {
                let (name, _) = self.expect_property_name()?;
                PropertyKey::Static(name)
            }
        };

        self.expect(TokenKind::Colon)?;
        let value = self.parse_assignment()?;
        Ok(ObjectProperty { key, value })
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    pub(crate) fn current(&self) -> &Token {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    pub(crate) fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    pub(crate) fn is_at_end(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Eof | TokenKind::MustacheEnd
        )
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> CompileResult<()> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!(
                "Expected '{}' but found {}",
                kind.symbol(),
                self.current().kind
            )))
        }
    }

    /// Property names after `.` may be identifiers or reserved words.
    fn expect_property_name(&mut self) -> CompileResult<(String, Span)> {
        let span = self.current().span;
        let name = match &self.current().kind {
            TokenKind::Identifier(name) => name.clone(),
            TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::Undefined
            | TokenKind::Typeof
            | TokenKind::Void
            | TokenKind::In
            | TokenKind::Instanceof => self.current().kind.symbol().to_string(),
            _ => return Err(self.error("Expected property name")),
        };
        self.advance();
        Ok((name, span))
    }

    pub(crate) fn error(&self, msg: &str) -> CompileError {
        let span = self.current().span;
        CompileError::parse_error(msg).at(span.start, span.end)
    }
}

enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_operator(kind: &TokenKind) -> Option<(u8, Operator)> {
    let entry = match kind {
        TokenKind::OrOr => (1, Operator::Logical(LogicalOp::Or)),
        TokenKind::QuestionQuestion => (1, Operator::Logical(LogicalOp::Nullish)),
        TokenKind::AndAnd => (2, Operator::Logical(LogicalOp::And)),
        TokenKind::Pipe => (3, Operator::Binary(BinaryOp::BitOr)),
        TokenKind::Caret => (4, Operator::Binary(BinaryOp::BitXor)),
        TokenKind::Amp => (5, Operator::Binary(BinaryOp::BitAnd)),
        TokenKind::EqEq => (6, Operator::Binary(BinaryOp::Eq)),
        TokenKind::NotEq => (6, Operator::Binary(BinaryOp::NotEq)),
        TokenKind::EqEqEq => (6, Operator::Binary(BinaryOp::StrictEq)),
        TokenKind::NotEqEq => (6, Operator::Binary(BinaryOp::StrictNotEq)),
        TokenKind::Lt => (7, Operator::Binary(BinaryOp::Lt)),
        TokenKind::Gt => (7, Operator::Binary(BinaryOp::Gt)),
        TokenKind::Le => (7, Operator::Binary(BinaryOp::Le)),
        TokenKind::Ge => (7, Operator::Binary(BinaryOp::Ge)),
        TokenKind::In => (7, Operator::Binary(BinaryOp::In)),
        TokenKind::Instanceof => (7, Operator::Binary(BinaryOp::Instanceof)),
        TokenKind::Shl => (8, Operator::Binary(BinaryOp::Shl)),
        TokenKind::Shr => (8, Operator::Binary(BinaryOp::Shr)),
        TokenKind::UShr => (8, Operator::Binary(BinaryOp::UShr)),
        TokenKind::Plus => (9, Operator::Binary(BinaryOp::Add)),
        TokenKind::Minus => (9, Operator::Binary(BinaryOp::Sub)),
        TokenKind::Star => (10, Operator::Binary(BinaryOp::Mul)),
        TokenKind::Slash => (10, Operator::Binary(BinaryOp::Div)),
        TokenKind::Percent => (10, Operator::Binary(BinaryOp::Rem)),
        TokenKind::StarStar => (11, Operator::Binary(BinaryOp::Pow)),
        _ => return None,
    };
    Some(entry)
}

// ============================================================================
// CONVENIENCE FUNCTIONS
// ============================================================================

/// Parse a standalone expression.
pub fn parse_expression(source: &str) -> CompileResult<Expr> {
    ExpressionParser::new(tokenize(source)).parse()
}

/// Split the tokens of an `{{#each}}` header into the iterated expression
/// and its `as context[, index]` bindings.
pub fn parse_each_header(
    tokens: Vec<Token>,
    block_span: Span,
) -> CompileResult<(Expr, String, Option<String>)> {
    let mut depth = 0usize;
    let mut as_index = None;
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Identifier(name) if name == "as" && depth == 0 => as_index = Some(i),
            _ => {}
        }
    }

    let as_index = as_index.ok_or_else(|| {
        CompileError::parse_error("Expected 'as' in each block")
            .at(block_span.start, block_span.end)
    })?;

    let mut bindings = tokens[as_index + 1..]
        .iter()
        .filter(|t| !matches!(t.kind, TokenKind::Eof | TokenKind::MustacheEnd));
    let binding_error = |span: Span| {
        CompileError::parse_error("Expected 'as element' or 'as element, index' in each block")
            .at(span.start, span.end)
    };

    let context = match bindings.next() {
        Some(Token {
            kind: TokenKind::Identifier(name),
            ..
        }) => name.clone(),
        Some(other) => return Err(binding_error(other.span)),
        None => return Err(binding_error(block_span)),
    };

    let index = match bindings.next() {
        None => None,
        Some(Token {
            kind: TokenKind::Comma,
            ..
        }) => match bindings.next() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => Some(name.clone()),
            Some(other) => return Err(binding_error(other.span)),
            None => return Err(binding_error(block_span)),
        },
        Some(other) => return Err(binding_error(other.span)),
    };

    if let Some(extra) = bindings.next() {
        return Err(binding_error(extra.span));
    }

    let mut expression_tokens: Vec<Token> = tokens[..as_index].to_vec();
    let end_span = tokens[as_index].span;
    expression_tokens.push(Token {
        kind: TokenKind::Eof,
        span: end_span,
    });
    let expression = ExpressionParser::new(expression_tokens).parse()?;

    Ok((expression, context, index))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ErrorCode;

    #[test]
    fn test_multiplicative_binds_tighter_than_additive() -> Result<(), CompileError> {
        let expr = parse_expression("2 + 3 * 4")?;
        match expr.kind {
            ExprKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_in_binds_tighter_than_logical_and() -> Result<(), CompileError> {
        let expr = parse_expression("'a' + 'b' in {ab: 1} && x")?;
        match expr.kind {
            ExprKind::Logical {
                op: LogicalOp::And,
                left,
                ..
            } => assert!(matches!(
                left.kind,
                ExprKind::Binary {
                    op: BinaryOp::In,
                    ..
                }
            )),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_exponent_is_right_associative() -> Result<(), CompileError> {
        let expr = parse_expression("2 ** 3 ** 2")?;
        match expr.kind {
            ExprKind::Binary {
                op: BinaryOp::Pow,
                left,
                right,
            } => {
                assert!(matches!(left.kind, ExprKind::Literal(Literal::Number(_))));
                assert!(matches!(right.kind, ExprKind::Binary { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_assignment_is_right_associative() -> Result<(), CompileError> {
        let expr = parse_expression("a = b = 3")?;
        match expr.kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assign { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_optional_chain_cannot_be_assigned() {
        let err = parse_expression("foo?.a = 2").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        let err = parse_expression("foo?.a.b += 2").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        let err = parse_expression("3 = 2").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[test]
    fn test_update_requires_target() {
        assert!(parse_expression("foo++").is_ok());
        assert!(parse_expression("--foo.bar[0]").is_ok());
        assert_eq!(
            parse_expression("5++").unwrap_err().code,
            ErrorCode::ParseError
        );
    }

    #[test]
    fn test_object_literal_forms() -> Result<(), CompileError> {
        let expr = parse_expression("{ a: 1, 'b c': 2, [k]: 3, d, }")?;
        match expr.kind {
            ExprKind::Object(props) => {
                assert_eq!(props.len(), 4);
                assert!(matches!(props[2].key, PropertyKey::Computed(_)));
                assert_eq!(props[3].key, PropertyKey::Static("d".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_conditional_expression() -> Result<(), CompileError> {
        let expr = parse_expression("a ? b : c ? d : e")?;
        match expr.kind {
            ExprKind::Conditional { alternate, .. } => {
                assert!(matches!(alternate.kind, ExprKind::Conditional { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_trailing_tokens_are_rejected() {
        assert_eq!(
            parse_expression("a b").unwrap_err().code,
            ErrorCode::ParseError
        );
        assert_eq!(parse_expression("").unwrap_err().code, ErrorCode::ParseError);
    }

    #[test]
    fn test_each_header_bindings() -> Result<(), CompileError> {
        let (expr, context, index) =
            parse_each_header(tokenize("items.filter(x) as item, i"), Span::default())?;
        assert!(matches!(expr.kind, ExprKind::Call { .. }));
        assert_eq!(context, "item");
        assert_eq!(index.as_deref(), Some("i"));

        let (_, context, index) = parse_each_header(tokenize("[1, 2] as n"), Span::default())?;
        assert_eq!(context, "n");
        assert!(index.is_none());

        assert!(parse_each_header(tokenize("items"), Span::default()).is_err());
        assert!(parse_each_header(tokenize("items as a b"), Span::default()).is_err());
        Ok(())
    }
}
