//! Lexer and recursive-descent parser for the rconf format.
//!
//! The grammar is keyword driven and whitespace insensitive. Separators
//! (`:` after a rule key, `;` after a statement) are optional:
//!
//! ```text
//! file      := (statement | rule)*               at least one rule
//! statement := 'param' NAME VALUE ';'?
//!            | 'template' ':'? VALUE ';'?
//! rule      := 'rule' '{' rule_item* '}'
//! rule_item := ('input' | 'output' | 'template') ':'? VALUE ';'?
//!            | 'param' NAME VALUE ';'?
//! ```
//!
//! `VALUE` is a double- or single-quoted string or a bare word. Bare words
//! run until whitespace or one of `" ' { } ; : #`, so glob braces and URLs
//! need quotes. `#` and `//` start a comment that runs to the end of the line.

use super::{Param, Rule, TEMPLATE_PARAM};
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Statements of an rconf file, before validation.
#[derive(Debug, Default)]
pub struct Document {
    pub params: Vec<Param>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    LBrace,
    RBrace,
    Colon,
    Semi,
    Eof,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Word(w) => format!("'{w}'"),
            TokenKind::Quoted(s) => format!("string \"{s}\""),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Semi => "';'".to_string(),
            TokenKind::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }

    fn skip_line(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let (line, column) = (self.line, self.column);
            let Some(&c) = self.chars.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };

            let kind = match c {
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                '#' => {
                    self.skip_line();
                    continue;
                }
                '{' => {
                    self.bump();
                    TokenKind::LBrace
                }
                '}' => {
                    self.bump();
                    TokenKind::RBrace
                }
                ':' => {
                    self.bump();
                    TokenKind::Colon
                }
                ';' => {
                    self.bump();
                    TokenKind::Semi
                }
                '"' | '\'' => TokenKind::Quoted(self.quoted(line, column)?),
                _ => {
                    let word = self.word();
                    if word.starts_with("//") {
                        self.skip_line();
                        continue;
                    }
                    TokenKind::Word(word)
                }
            };
            tokens.push(Token { kind, line, column });
        }
    }

    fn quoted(&mut self, line: usize, column: usize) -> Result<String, ParseError> {
        let quote = self.bump().unwrap_or('"');
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, column, "unterminated string")),
                Some(c) if c == quote => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c @ ('\\' | '"' | '\'')) => value.push(c),
                    Some(other) => {
                        return Err(self.error(
                            self.line,
                            self.column.saturating_sub(2),
                            format!("unknown escape sequence '\\{other}'"),
                        ));
                    }
                    None => return Err(self.error(line, column, "unterminated string")),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '"' | '\'' | '{' | '}' | ';' | ':' | '#') {
                break;
            }
            word.push(c);
            self.bump();
        }
        word
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The token stream always ends with Eof, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_at(token: &Token, message: impl Into<String>) -> ParseError {
        ParseError {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn skip(&mut self, kind: TokenKind) {
        if self.peek().kind == kind {
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let token = self.advance();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(Self::error_at(
                &token,
                format!("expected {}, found {}", kind.describe(), token.kind.describe()),
            ))
        }
    }

    fn value(&mut self, what: &str) -> Result<String, ParseError> {
        let token = self.advance();
        match &token.kind {
            TokenKind::Word(w) | TokenKind::Quoted(w) => Ok(w.clone()),
            other => Err(Self::error_at(
                &token,
                format!("expected {what}, found {}", other.describe()),
            )),
        }
    }

    fn name(&mut self) -> Result<String, ParseError> {
        let token = self.advance();
        match &token.kind {
            TokenKind::Word(w) if is_identifier(w) => Ok(w.clone()),
            other => Err(Self::error_at(
                &token,
                format!("expected parameter name, found {}", other.describe()),
            )),
        }
    }

    /// `param NAME VALUE`, with the keyword already consumed.
    fn param(&mut self) -> Result<Param, ParseError> {
        let name = self.name()?;
        let value = self.value("parameter value")?;
        self.skip(TokenKind::Semi);
        Ok(Param::new(name, value))
    }

    /// `KEY ':'? VALUE ';'?`, with the key already consumed.
    fn keyed_value(&mut self, key: &str) -> Result<String, ParseError> {
        self.skip(TokenKind::Colon);
        let value = self.value(&format!("value for '{key}'"))?;
        self.skip(TokenKind::Semi);
        Ok(value)
    }

    fn document(&mut self) -> Result<Document, ParseError> {
        let mut doc = Document::default();
        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Eof => break,
                TokenKind::Semi => {
                    self.advance();
                }
                TokenKind::Word(w) => match w.as_str() {
                    "param" => {
                        self.advance();
                        doc.params.push(self.param()?);
                    }
                    "template" => {
                        self.advance();
                        let value = self.keyed_value("template")?;
                        doc.params.push(Param::new(TEMPLATE_PARAM, value));
                    }
                    "rule" => {
                        self.advance();
                        doc.rules.push(self.rule(token.line)?);
                    }
                    other => {
                        return Err(Self::error_at(
                            &token,
                            format!("expected 'param', 'template' or 'rule', found '{other}'"),
                        ));
                    }
                },
                other => {
                    return Err(Self::error_at(
                        &token,
                        format!(
                            "expected 'param', 'template' or 'rule', found {}",
                            other.describe()
                        ),
                    ));
                }
            }
        }

        if doc.rules.is_empty() {
            return Err(Self::error_at(self.peek(), "expected at least one rule"));
        }
        Ok(doc)
    }

    fn rule(&mut self, line: usize) -> Result<Rule, ParseError> {
        let open = self.expect(TokenKind::LBrace)?;
        let mut input: Option<String> = None;
        let mut output: Option<String> = None;
        let mut params = Vec::new();

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Semi => {
                    self.advance();
                }
                TokenKind::Eof => {
                    return Err(Self::error_at(&open, "unclosed rule block"));
                }
                TokenKind::Word(w) => match w.as_str() {
                    "input" => {
                        self.advance();
                        if input.is_some() {
                            return Err(Self::error_at(&token, "duplicate 'input' in rule"));
                        }
                        input = Some(self.keyed_value("input")?);
                    }
                    "output" => {
                        self.advance();
                        if output.is_some() {
                            return Err(Self::error_at(&token, "duplicate 'output' in rule"));
                        }
                        output = Some(self.keyed_value("output")?);
                    }
                    "template" => {
                        self.advance();
                        let value = self.keyed_value("template")?;
                        params.push(Param::new(TEMPLATE_PARAM, value));
                    }
                    "param" => {
                        self.advance();
                        params.push(self.param()?);
                    }
                    other => {
                        return Err(Self::error_at(
                            &token,
                            format!(
                                "expected 'input', 'output', 'template' or 'param', found '{other}'"
                            ),
                        ));
                    }
                },
                other => {
                    return Err(Self::error_at(
                        &token,
                        format!("unexpected {} in rule", other.describe()),
                    ));
                }
            }
        }

        let input = input.ok_or_else(|| Self::error_at(&open, "rule has no 'input'"))?;
        if input.is_empty() {
            return Err(Self::error_at(&open, "rule 'input' must not be empty"));
        }
        Ok(Rule {
            input,
            output: output.filter(|o| !o.is_empty()),
            params,
            line,
        })
    }
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse rconf source text into its statements.
pub fn parse(source: &str) -> Result<Document, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, pos: 0 }.document()
}
