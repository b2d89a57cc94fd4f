/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Sovereign Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Query tokenizer.
//!
//! A single anchored regex with one named group per token class is tried at
//! the current offset; the first alternative that matches wins. Whitespace is
//! dropped, comments are kept so the parser can attach them to operands.

use crate::parser::ParseError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static::lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(concat!(
        r"^(?:(?P<Space>\s+)",
        r"|(?P<Ident>[a-zA-Z$_][a-zA-Z0-9_]*)",
        r"|(?P<Float>[-+]?\d*\.\d+([eE][-+]?\d+)?)",
        r"|(?P<Int>[-+]?\d+([eE][-+]?\d+)?)",
        r#"|(?P<String>'[^']*'|"[^"]*")"#,
        r"|(?P<Comment>(//|#)[^\n]*(\n|\z))",
        r"|(?P<Regex>/([^\\/]+|\\.)+/[msi]*)",
        r"|(?P<Op>[-+*/%,:.=<>!|&~;])",
        r"|(?P<Call>[(){}\[\]]))",
    ))
    .expect("token grammar is a valid regex");
}

const CLASSES: [(&str, TokenKind); 9] = [
    ("Space", TokenKind::Eof),
    ("Ident", TokenKind::Ident),
    ("Float", TokenKind::Float),
    ("Int", TokenKind::Int),
    ("String", TokenKind::String),
    ("Comment", TokenKind::Comment),
    ("Regex", TokenKind::Regex),
    ("Op", TokenKind::Op),
    ("Call", TokenKind::Call),
];

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Ident,
    Float,
    Int,
    String,
    Comment,
    Regex,
    Op,
    Call,
    Eof,
}

impl TokenKind {
    /// Human readable class name used in "expected X, got ..." errors.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Ident => "identifier",
            TokenKind::Float => "float",
            TokenKind::Int => "number",
            TokenKind::String => "string",
            TokenKind::Comment => "comment",
            TokenKind::Regex => "regex",
            TokenKind::Op => "operator",
            TokenKind::Call | TokenKind::Eof => "token",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub offset: usize,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<source>:{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub pos: Position,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    pub fn is(&self, kind: TokenKind, value: &str) -> bool {
        self.kind == kind && self.value == value
    }
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

pub struct Lexer<'a> {
    source: &'a str,
    pos: Position,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            pos: Position {
                offset: 0,
                line: 1,
                col: 1,
            },
        }
    }

    /// Tokenizes the whole input. The result always ends with an `Eof` token.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        while self.pos.offset < self.source.len() {
            let rest = &self.source[self.pos.offset..];
            let caps = TOKEN_RE.captures(rest).ok_or_else(|| ParseError::Lex {
                text: rest.chars().take(16).collect(),
                pos: self.pos,
            })?;

            let mut matched = None;
            for (name, kind) in CLASSES {
                if let Some(m) = caps.name(name) {
                    matched = Some((name, kind, m.as_str()));
                    break;
                }
            }
            let Some((name, kind, text)) = matched else {
                return Err(ParseError::Lex {
                    text: rest.chars().take(16).collect(),
                    pos: self.pos,
                });
            };

            let start = self.pos;
            self.advance(text);
            if name != "Space" {
                tokens.push(Token {
                    kind,
                    value: text.to_string(),
                    pos: start,
                });
            }
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            value: String::new(),
            pos: self.pos,
        });
        log::trace!("lexed {} tokens", tokens.len());
        Ok(tokens)
    }

    fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.pos.line += 1;
                self.pos.col = 1;
            } else {
                self.pos.col += 1;
            }
        }
        self.pos.offset += text.len();
    }
}

/// Tokenizes `input`, dropping comments.
pub fn lex(input: &str) -> Result<Vec<Token>, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    Ok(tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Comment)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, String)> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.value))
            .collect()
    }

    #[test]
    fn test_lex_classes() {
        let tokens = kinds("mondoo.version == 'yo' 1.5 -3 /ab+c/i");
        let expect = vec![
            (TokenKind::Ident, "mondoo"),
            (TokenKind::Op, "."),
            (TokenKind::Ident, "version"),
            (TokenKind::Op, "="),
            (TokenKind::Op, "="),
            (TokenKind::String, "'yo'"),
            (TokenKind::Float, "1.5"),
            (TokenKind::Int, "-3"),
            (TokenKind::Regex, "/ab+c/i"),
            (TokenKind::Eof, ""),
        ];
        let expect: Vec<_> = expect.into_iter().map(|(k, v)| (k, v.to_string())).collect();
        assert_eq!(tokens, expect);
    }

    #[test]
    fn test_lex_comments_and_calls() {
        let tokens = kinds("# note\nusers { name }");
        assert_eq!(tokens[0], (TokenKind::Comment, "# note\n".to_string()));
        assert_eq!(tokens[2], (TokenKind::Call, "{".to_string()));
        assert_eq!(tokens[4], (TokenKind::Call, "}".to_string()));
    }

    #[test]
    fn test_lex_positions() {
        let tokens = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!(tokens[1].pos.line, 2);
        assert_eq!(tokens[1].pos.col, 3);
        assert_eq!(tokens[2].pos.to_string(), "<source>:2:4");
    }

    #[test]
    fn test_lex_rejects_unknown_input() {
        let err = Lexer::new("a @ b").tokenize().unwrap_err();
        assert!(matches!(err, ParseError::Lex { .. }));
    }

    #[test]
    fn test_lex_drops_comments() {
        let tokens = lex("// only a comment").unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_eof());
    }
}
