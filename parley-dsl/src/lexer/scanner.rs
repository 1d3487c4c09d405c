//! Lexer implementation

use super::token::*;
use std::iter::Peekable;
use std::str::CharIndices;

// ============================================================================
// LEXER IMPLEMENTATION
// ============================================================================

/// Lexer for embedded expressions.
///
/// In mustache mode the lexer starts right after an opening `{{` and stops at
/// the first `}}` found at brace depth zero, so object literals inside a tag
/// (`{{ foo = { a: 1 } }}`) are tokenized correctly.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    base: usize,
    line: usize,
    column: usize,
    pos: usize,
    brace_depth: usize,
    mustache: bool,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over a standalone expression.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            base: 0,
            line: 1,
            column: 1,
            pos: 0,
            brace_depth: 0,
            mustache: false,
        }
    }

    /// Create a lexer that starts at byte `offset` of `source` (just after an
    /// opening `{{`) and ends at the matching `}}`.
    pub fn mustache(source: &'a str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let prefix = &source[..offset];
        let line = prefix.matches('\n').count() + 1;
        let column = match prefix.rfind('\n') {
            Some(idx) => prefix[idx + 1..].chars().count() + 1,
            None => prefix.chars().count() + 1,
        };

        Self {
            source,
            chars: source[offset..].char_indices().peekable(),
            base: offset,
            line,
            column,
            pos: offset,
            brace_depth: 0,
            mustache: true,
        }
    }

    /// Byte offset just past the last consumed character.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Tokenize until the end of input (or the closing `}}` in mustache
    /// mode). The final token is always `Eof`, `MustacheEnd` or `Error`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token();
            let done = matches!(
                token.kind,
                TokenKind::Eof | TokenKind::MustacheEnd | TokenKind::Error(_)
            );
            tokens.push(token);
            if done {
                break;
            }
        }

        tokens
    }

    /// Get the next token from the source.
    fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let start_pos = self.pos;
        let start_line = self.line;
        let start_col = self.column;

        let kind = match self.peek_char() {
            None => TokenKind::Eof,
            Some(c) => match c {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ',' => self.single(TokenKind::Comma),
                ':' => self.single(TokenKind::Colon),
                ';' => self.single(TokenKind::Semicolon),
                '~' => self.single(TokenKind::Tilde),

                '{' => {
                    self.brace_depth += 1;
                    self.single(TokenKind::LBrace)
                }

                '}' => {
                    if self.brace_depth == 0 && self.mustache {
                        self.advance();
                        if self.peek_char() == Some('}') {
                            self.advance();
                            TokenKind::MustacheEnd
                        } else {
                            TokenKind::Error("Unexpected character: }".to_string())
                        }
                    } else {
                        self.brace_depth = self.brace_depth.saturating_sub(1);
                        self.single(TokenKind::RBrace)
                    }
                }

                '.' => {
                    if self.peek_nth(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                        self.scan_number()
                    } else {
                        self.single(TokenKind::Dot)
                    }
                }

                '?' => {
                    self.advance();
                    match self.peek_char() {
                        Some('?') => {
                            self.advance();
                            TokenKind::QuestionQuestion
                        }
                        // `a?.5:1` is a conditional, not an optional chain
                        Some('.') if !self.peek_nth(1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                            self.advance();
                            TokenKind::QuestionDot
                        }
                        _ => TokenKind::Question,
                    }
                }

                '=' => {
                    self.advance();
                    if self.eat('=') {
                        if self.eat('=') {
                            TokenKind::EqEqEq
                        } else {
                            TokenKind::EqEq
                        }
                    } else if self.peek_char() == Some('>') {
                        self.advance();
                        TokenKind::Error("Arrow functions are not supported".to_string())
                    } else {
                        TokenKind::Assign
                    }
                }

                '!' => {
                    self.advance();
                    if self.eat('=') {
                        if self.eat('=') {
                            TokenKind::NotEqEq
                        } else {
                            TokenKind::NotEq
                        }
                    } else {
                        TokenKind::Not
                    }
                }

                '<' => {
                    self.advance();
                    if self.eat('<') {
                        if self.eat('=') {
                            TokenKind::ShlAssign
                        } else {
                            TokenKind::Shl
                        }
                    } else if self.eat('=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }

                '>' => {
                    self.advance();
                    if self.eat('>') {
                        if self.eat('>') {
                            if self.eat('=') {
                                TokenKind::UShrAssign
                            } else {
                                TokenKind::UShr
                            }
                        } else if self.eat('=') {
                            TokenKind::ShrAssign
                        } else {
                            TokenKind::Shr
                        }
                    } else if self.eat('=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }

                '+' => {
                    self.advance();
                    if self.eat('+') {
                        TokenKind::PlusPlus
                    } else if self.eat('=') {
                        TokenKind::PlusAssign
                    } else {
                        TokenKind::Plus
                    }
                }

                '-' => {
                    self.advance();
                    if self.eat('-') {
                        TokenKind::MinusMinus
                    } else if self.eat('=') {
                        TokenKind::MinusAssign
                    } else {
                        TokenKind::Minus
                    }
                }

                '*' => {
                    self.advance();
                    if self.eat('*') {
                        if self.eat('=') {
                            TokenKind::StarStarAssign
                        } else {
                            TokenKind::StarStar
                        }
                    } else if self.eat('=') {
                        TokenKind::StarAssign
                    } else {
                        TokenKind::Star
                    }
                }

                '/' => {
                    self.advance();
                    if self.eat('=') {
                        TokenKind::SlashAssign
                    } else {
                        TokenKind::Slash
                    }
                }

                '%' => {
                    self.advance();
                    if self.eat('=') {
                        TokenKind::PercentAssign
                    } else {
                        TokenKind::Percent
                    }
                }

                '&' => {
                    self.advance();
                    if self.eat('&') {
                        TokenKind::AndAnd
                    } else if self.eat('=') {
                        TokenKind::AmpAssign
                    } else {
                        TokenKind::Amp
                    }
                }

                '|' => {
                    self.advance();
                    if self.eat('|') {
                        TokenKind::OrOr
                    } else if self.eat('=') {
                        TokenKind::PipeAssign
                    } else {
                        TokenKind::Pipe
                    }
                }

                '^' => {
                    self.advance();
                    if self.eat('=') {
                        TokenKind::CaretAssign
                    } else {
                        TokenKind::Caret
                    }
                }

                '"' | '\'' => self.scan_string(c),

                '`' => {
                    self.advance();
                    TokenKind::Error("Template literals are not supported".to_string())
                }

                c if c.is_ascii_digit() => self.scan_number(),

                c if is_identifier_start(c) => self.scan_identifier(),

                c => {
                    self.advance();
                    TokenKind::Error(format!("Unexpected character: {}", c))
                }
            },
        };

        Token {
            kind,
            span: Span {
                start: start_pos,
                end: self.pos,
                line: start_line,
                column: start_col,
            },
        }
    }

    /// Scan an identifier or keyword.
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if is_identifier_part(c) {
                self.advance();
            } else {
                break;
            }
        }

        match &self.source[start..self.pos] {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "undefined" => TokenKind::Undefined,
            "typeof" => TokenKind::Typeof,
            "void" => TokenKind::Void,
            "in" => TokenKind::In,
            "instanceof" => TokenKind::Instanceof,
            ident => TokenKind::Identifier(ident.to_string()),
        }
    }

    /// Scan a numeric literal: decimal with optional fraction and exponent,
    /// or a `0x`/`0o`/`0b` prefixed integer.
    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;

        if self.peek_char() == Some('0') {
            let radix = match self.peek_nth(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                self.advance();
                let digits_start = self.pos;
                while let Some(c) = self.peek_char() {
                    if c.is_digit(radix) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let digits = &self.source[digits_start..self.pos];
                return match u64::from_str_radix(digits, radix) {
                    Ok(value) => TokenKind::Number(value as f64),
                    Err(_) => TokenKind::Error(format!(
                        "Invalid number: {}",
                        &self.source[start..self.pos]
                    )),
                };
            }
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        if self.peek_char() == Some('.') {
            self.advance();
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let has_exponent = match self.peek_nth(1) {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => self
                    .peek_nth(2)
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false),
                _ => false,
            };
            if has_exponent {
                self.advance();
                if matches!(self.peek_char(), Some('+') | Some('-')) {
                    self.advance();
                }
                while let Some(c) = self.peek_char() {
                    if c.is_ascii_digit() {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        let text = &self.source[start..self.pos];
        if self.peek_char().map(is_identifier_start).unwrap_or(false) {
            self.advance();
            return TokenKind::Error(format!("Invalid number: {}", text));
        }

        match text.parse::<f64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Error(format!("Invalid number: {}", text)),
        }
    }

    /// Scan a single- or double-quoted string literal.
    fn scan_string(&mut self, quote: char) -> TokenKind {
        self.advance();
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    return TokenKind::Error("Unterminated string".to_string());
                }
                Some(c) if c == quote => {
                    self.advance();
                    return TokenKind::String(value);
                }
                Some('\\') => {
                    self.advance();
                    match self.peek_char() {
                        None => return TokenKind::Error("Unterminated string".to_string()),
                        Some('u') => {
                            self.advance();
                            match self.scan_unicode_escape() {
                                Some(c) => value.push(c),
                                None => {
                                    return TokenKind::Error(
                                        "Invalid unicode escape sequence".to_string(),
                                    )
                                }
                            }
                        }
                        Some(c) => {
                            self.advance();
                            match c {
                                'n' => value.push('\n'),
                                't' => value.push('\t'),
                                'r' => value.push('\r'),
                                'b' => value.push('\u{0008}'),
                                'f' => value.push('\u{000C}'),
                                'v' => value.push('\u{000B}'),
                                '0' => value.push('\0'),
                                '\n' => {}
                                other => value.push(other),
                            }
                        }
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }
    }

    fn scan_unicode_escape(&mut self) -> Option<char> {
        let mut digits = String::new();
        if self.eat('{') {
            while let Some(c) = self.peek_char() {
                self.advance();
                if c == '}' {
                    break;
                }
                digits.push(c);
            }
        } else {
            for _ in 0..4 {
                let c = self.peek_char()?;
                self.advance();
                digits.push(c);
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let (idx, c) = self.chars.next()?;
        self.pos = self.base + idx + c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Tokenize a standalone expression.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_use_longest_match() {
        assert_eq!(
            kinds("a >>>= b"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::UShrAssign,
                TokenKind::Identifier("b".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("=== !== ** ?? ?."),
            vec![
                TokenKind::EqEqEq,
                TokenKind::NotEqEq,
                TokenKind::StarStar,
                TokenKind::QuestionQuestion,
                TokenKind::QuestionDot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1F")[0], TokenKind::Number(31.0));
        assert_eq!(kinds("1.5e3")[0], TokenKind::Number(1500.0));
        assert_eq!(kinds(".5")[0], TokenKind::Number(0.5));
        assert_eq!(kinds("0b101")[0], TokenKind::Number(5.0));
        assert!(matches!(kinds("12abc")[0], TokenKind::Error(_)));
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" 'A'"#),
            vec![
                TokenKind::String("it's".into()),
                TokenKind::String("a\nb".into()),
                TokenKind::String("A".into()),
                TokenKind::Eof,
            ]
        );
        assert!(matches!(kinds("'open")[0], TokenKind::Error(_)));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("typeof void in instanceof undefined"),
            vec![
                TokenKind::Typeof,
                TokenKind::Void,
                TokenKind::In,
                TokenKind::Instanceof,
                TokenKind::Undefined,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_mustache_mode_stops_at_closing_braces() {
        let source = "{{ foo = { a: 1 } }} tail";
        let mut lexer = Lexer::mustache(source, 2);
        let tokens = lexer.tokenize();
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::MustacheEnd);
        assert_eq!(&source[lexer.position()..], " tail");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::RBrace));
    }

    #[test]
    fn test_mustache_mode_tracks_line_and_column() {
        let source = "line one\n  {{ bar }}";
        let mut lexer = Lexer::mustache(source, 13);
        let tokens = lexer.tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Identifier("bar".into()));
        assert_eq!(tokens[0].span.line, 2);
        assert_eq!(tokens[0].span.column, 6);
        assert_eq!(tokens[0].span.start, 14);
    }

    #[test]
    fn test_unclosed_mustache_ends_with_eof() {
        let tokens = Lexer::mustache("{{ foo", 2).tokenize();
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }
}
