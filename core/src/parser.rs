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

//! Query Parser — Recursive Descent
//!
//! ```text
//! expression := operand ( op operand )*
//! operand    := value ( '.' ident | '(' args ')' | '[' expression ']' )* block?
//! value      := ident | number | string | regex | '[' array ']' | '{' map '}' | '*'
//! ```
//!
//! Parsing is tolerant: when a query is cut short (`sshd.`, `users {`) the
//! expressions read so far are returned next to the error, so the compiler can
//! still produce suggestions for the unfinished part.

use crate::ast::{Arg, Ast, Call, Expression, Operand, Operation, Operator, Value};
use crate::lexer::{Lexer, Position, Token, TokenKind};
use regex::Regex;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

// ─── Error Types ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid input text {text:?} at {pos}")]
    Lex { text: String, pos: Position },
    /// The query ended before a construct was closed. `indent` hints how far
    /// an editor should indent the continuation line.
    #[error("incomplete query, missing {missing} at {pos}")]
    Incomplete {
        missing: String,
        pos: Position,
        indent: usize,
    },
    #[error("expected {expected}, got '{got}' at {pos}")]
    Incorrect {
        expected: String,
        got: String,
        pos: Position,
    },
    #[error("expected {expected}, got {found} at {pos} in function {function}")]
    Expected {
        expected: String,
        found: String,
        pos: Position,
        function: String,
    },
    #[error("{message} at {pos}")]
    Syntax { message: String, pos: Position },
    #[error("{0}")]
    Structure(String),
}

impl ParseError {
    fn syntax(msg: impl Into<String>, tok: &Token) -> Self {
        ParseError::Syntax {
            message: msg.into(),
            pos: tok.pos,
        }
    }

    fn expected(expected: impl Into<String>, tok: &Token, function: &str) -> Self {
        ParseError::Expected {
            expected: expected.into(),
            found: format!("{} \"{}\"", tok.kind.describe(), tok.value),
            pos: tok.pos,
            function: function.to_string(),
        }
    }

    fn unclosed(closing: &str, tok: &Token, indent: usize) -> Self {
        if tok.is_eof() {
            ParseError::Incomplete {
                missing: format!("closing '{closing}'"),
                pos: tok.pos,
                indent,
            }
        } else {
            ParseError::Incorrect {
                expected: format!("closing '{closing}'"),
                got: tok.value.clone(),
                pos: tok.pos,
            }
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete { .. })
    }
}

lazy_static::lazy_static! {
    static ref ESCAPE_RE: Regex = Regex::new(r"\\.").expect("escape pattern is a valid regex");
}

/// The ident that wraps every `case`/`default` body inside a `switch` block.
pub const BLOCK_CALL: &str = "{}";

/// Result of a parse: the (possibly partial) AST and the first syntax error.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    pub ast: Ast,
    pub error: Option<ParseError>,
}

impl Parsed {
    pub fn into_result(self) -> Result<Ast, ParseError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.ast),
        }
    }
}

// ─── Parser ──────────────────────────────────────────────────────────────────

pub struct Parser {
    tokens: VecDeque<Token>,
    token: Token,
    comments: String,
    indent: usize,
    partial: Option<Operand>,
    partial_expression: Option<Expression>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut parser = Parser {
            tokens: tokens.into(),
            token: Token {
                kind: TokenKind::Eof,
                value: String::new(),
                pos: Position::default(),
            },
            comments: String::new(),
            indent: 0,
            partial: None,
            partial_expression: None,
        };
        parser.next_token();
        parser
    }

    fn next_token(&mut self) {
        while let Some(tok) = self.tokens.pop_front() {
            if tok.kind == TokenKind::Comment {
                self.parse_comment(&tok.value);
                continue;
            }
            self.token = tok;
            return;
        }
        // Stay on the final Eof token once the stream is drained.
        self.token.kind = TokenKind::Eof;
        self.token.value.clear();
    }

    /// Pushes the current token back and makes `tok` current again.
    fn rewind(&mut self, tok: Token) {
        let current = std::mem::replace(&mut self.token, tok);
        self.tokens.push_front(current);
    }

    fn parse_comment(&mut self, raw: &str) {
        let body = match raw.strip_prefix('#') {
            Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
            None => {
                let rest = raw.get(2..).unwrap_or("");
                rest.strip_prefix(' ').unwrap_or(rest)
            }
        };
        self.comments.push_str(body.trim_end_matches([' ', '\t']));
    }

    fn flush_comments(&mut self) -> String {
        std::mem::take(&mut self.comments)
    }

    fn flush_expression(&mut self) -> Option<Expression> {
        if self.comments.is_empty() {
            return None;
        }
        Some(Expression::from_operand(Operand {
            comments: self.flush_comments(),
            ..Default::default()
        }))
    }

    fn token_string(&self) -> String {
        let raw = &self.token.value;
        let inner = &raw[1..raw.len() - 1];
        if raw.starts_with('\'') {
            return inner.to_string();
        }
        ESCAPE_RE
            .replace_all(inner, |caps: &regex::Captures| {
                let m = &caps[0];
                match m {
                    "\\n" => "\n".to_string(),
                    "\\t" => "\t".to_string(),
                    "\\v" => "\u{0B}".to_string(),
                    "\\b" => "\u{08}".to_string(),
                    "\\f" => "\u{0C}".to_string(),
                    "\\0" => "\0".to_string(),
                    other => other[1..].to_string(),
                }
            })
            .into_owned()
    }

    // ─── Values ──────────────────────────────────────────────────────────────

    fn parse_value(&mut self) -> Result<Option<Value>, ParseError> {
        let tok = &self.token;
        let value = match tok.kind {
            TokenKind::Ident => match tok.value.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Nil,
                "NaN" => Value::Float(f64::NAN),
                "Infinity" => Value::Float(f64::INFINITY),
                other => Value::Ident(other.to_string()),
            },
            TokenKind::Float => {
                let v: f64 = tok.value.parse().map_err(|e| {
                    ParseError::syntax(format!("failed to parse float: {e}"), tok)
                })?;
                Value::Float(v)
            }
            TokenKind::Int => {
                let radix = if tok.value.starts_with('0') { 8 } else { 10 };
                let v = i64::from_str_radix(&tok.value, radix).map_err(|e| {
                    ParseError::syntax(format!("failed to parse integer: {e}"), tok)
                })?;
                Value::Int(v)
            }
            TokenKind::String => Value::String(self.token_string()),
            TokenKind::Regex => {
                let raw = &tok.value;
                let end = raw.rfind('/').filter(|&i| i > 0).unwrap_or(raw.len() - 1);
                let body = &raw[1..end];
                let mods = &raw[end + 1..];
                if mods.is_empty() {
                    Value::Regex(body.to_string())
                } else {
                    Value::Regex(format!("(?{mods}){body}"))
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn parse_arg(&mut self) -> Result<Option<Arg>, ParseError> {
        let mut name = None;
        if self.token.kind == TokenKind::Ident {
            let ident = self.token.clone();
            self.next_token();
            if self.token.value == ":" {
                self.next_token();
                name = Some(ident.value);
            } else {
                self.rewind(ident);
            }
        }

        match self.parse_expression()? {
            Some(value) => Ok(Some(Arg { name, value })),
            None if name.is_some() => Err(ParseError::expected(
                "argument",
                &self.token,
                "parseArgument",
            )),
            None => Ok(None),
        }
    }

    fn parse_array(&mut self) -> Result<Value, ParseError> {
        let mut items = Vec::new();
        self.next_token();
        if self.token.value == "]" {
            return Ok(Value::Array(items));
        }

        loop {
            let Some(exp) = self.parse_expression()? else {
                return Err(ParseError::expected(
                    "expression",
                    &self.token,
                    "parseOperand-array",
                ));
            };
            items.push(exp);

            if self.token.value == "]" {
                break;
            }
            if self.token.value != "," {
                return Err(ParseError::expected(", or ]", &self.token, "parseOperand"));
            }
            self.next_token();
            // trailing comma: [a, b, ]
            if self.token.value == "]" {
                break;
            }
        }
        Ok(Value::Array(items))
    }

    fn parse_map(&mut self) -> Result<Value, ParseError> {
        let mut entries = BTreeMap::new();
        self.next_token();
        if self.token.value == "}" {
            return Ok(Value::Map(entries));
        }

        loop {
            let key = match self.token.kind {
                TokenKind::String => self.token_string(),
                TokenKind::Ident => self.token.value.clone(),
                _ => return Err(ParseError::expected("string", &self.token, "map key")),
            };

            self.next_token();
            if !self.token.is(TokenKind::Op, ":") {
                return Err(ParseError::expected(":", &self.token, "after map key"));
            }

            self.next_token();
            let Some(exp) = self.parse_expression()? else {
                return Err(ParseError::expected(
                    "expression",
                    &self.token,
                    "parseOperand-map",
                ));
            };
            entries.insert(key, exp);

            if self.token.value == "}" {
                break;
            }
            if self.token.value != "," {
                return Err(ParseError::expected(", or }", &self.token, "parseOperand"));
            }
            self.next_token();
            if self.token.value == "}" {
                break;
            }
        }
        Ok(Value::Map(entries))
    }

    // ─── Operands ────────────────────────────────────────────────────────────

    /// Parses an operand. The flag is true for standalone operands (`*`,
    /// `return`) that never take operations.
    fn parse_operand(&mut self) -> Result<Option<(Operand, bool)>, ParseError> {
        let mut value = self.parse_value()?;
        if value.is_none() {
            if self.token.value == "[" {
                value = Some(self.parse_array()?);
            }
            if self.token.value == "{" {
                value = Some(self.parse_map()?);
            }
            if self.token.value == "*" {
                self.next_token();
                return Ok(Some((Operand::ident("*"), true)));
            }
        }
        let Some(value) = value else {
            return Ok(None);
        };

        if value == Value::Ident("return".into()) {
            self.next_token();
            return Ok(Some((
                Operand {
                    value: Some(value),
                    ..Default::default()
                },
                true,
            )));
        }

        let is_switch = value == Value::Ident("switch".into());
        let mut res = Operand {
            comments: self.flush_comments(),
            value: Some(value),
            calls: Vec::new(),
            block: None,
        };
        self.next_token();

        loop {
            match self.token.value.as_str() {
                "." => {
                    self.next_token();
                    if self.token.kind != TokenKind::Ident {
                        res.calls.push(Call::Ident {
                            name: ".".into(),
                            comments: String::new(),
                        });
                        let err = if self.token.is_eof() {
                            self.indent += 1;
                            ParseError::Incomplete {
                                missing: "identifier after '.'".into(),
                                pos: self.token.pos,
                                indent: self.indent,
                            }
                        } else {
                            ParseError::syntax("missing field accessor", &self.token)
                        };
                        self.partial = Some(res);
                        return Err(err);
                    }
                    let name = self.token.value.clone();
                    res.calls.push(Call::Ident {
                        name,
                        comments: self.flush_comments(),
                    });
                    self.next_token();
                }
                "(" => {
                    self.indent += 1;
                    self.next_token();
                    let mut args = Vec::new();
                    while let Some(arg) = self.parse_arg()? {
                        args.push(arg);
                        if self.token.value == "," {
                            self.next_token();
                        }
                    }
                    if self.token.value != ")" {
                        return Err(ParseError::unclosed(")", &self.token, self.indent));
                    }
                    self.indent -= 1;
                    res.calls.push(Call::Function(args));
                    self.next_token();
                }
                "[" => {
                    self.indent += 1;
                    self.next_token();
                    let exp = self.parse_expression()?;
                    if self.token.value != "]" {
                        return Err(ParseError::unclosed("]", &self.token, self.indent));
                    }
                    self.indent -= 1;
                    let Some(exp) = exp else {
                        return Err(ParseError::syntax(
                            "missing value inside of `[]`",
                            &self.token,
                        ));
                    };
                    res.calls.push(Call::Accessor(Box::new(exp)));
                    self.next_token();
                }
                "{" if is_switch => {
                    self.indent += 1;
                    self.next_token();
                    res.block = Some(self.parse_switch_cases()?);
                    self.next_token();
                }
                "{" => {
                    self.indent += 1;
                    self.next_token();
                    let mut block = Vec::new();
                    while let Some(exp) = self.parse_expression()? {
                        if exp.operand.is_none() && exp.operations.is_empty() {
                            break;
                        }
                        block.push(exp);
                    }
                    res.block = Some(block);

                    if self.token.value != "}" {
                        let err = ParseError::unclosed("}", &self.token, self.indent);
                        self.partial = Some(res);
                        return Err(err);
                    }
                    self.indent -= 1;
                    self.next_token();
                }
                _ => return Ok(Some((res, false))),
            }
        }
    }

    /// Reads `case cond: body` / `default: body` pairs up to the closing brace.
    /// Conditions and bodies alternate in the result; `default` contributes an
    /// empty condition expression.
    fn parse_switch_cases(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut cases = Vec::new();
        loop {
            let ident = self.token.value.clone();
            if ident == "}" {
                break;
            }
            if ident != "case" && ident != "default" {
                return Err(ParseError::Structure(format!(
                    "expected `case` or `default` statements in `switch` call, got `{ident}`"
                )));
            }
            self.next_token();

            if ident == "case" {
                let missing = || {
                    ParseError::Structure("missing expression after `case` statement".into())
                };
                let exp = self.parse_expression()?.ok_or_else(missing)?;
                let exp = exp.fold_operators().map_err(ParseError::Structure)?;
                if exp.operand.is_none() {
                    return Err(missing());
                }
                cases.push(exp);
            } else {
                cases.push(Expression::default());
            }

            if self.token.value != ":" {
                return Err(ParseError::Structure(format!(
                    "expected `:` in `{ident}` statement"
                )));
            }
            self.next_token();

            let mut body = Vec::new();
            while let Some(exp) = self.parse_expression()? {
                if exp.operand.is_none() && exp.operations.is_empty() {
                    break;
                }
                body.push(exp);
            }
            if body.is_empty() {
                return Err(ParseError::Structure(format!(
                    "expected block following `{ident}` statement"
                )));
            }
            cases.push(Expression::from_operand(Operand {
                value: Some(Value::Ident(BLOCK_CALL.into())),
                block: Some(body),
                ..Default::default()
            }));

            while self.token.value == ";" {
                self.next_token();
            }
        }
        Ok(cases)
    }

    fn parse_operation(&mut self) -> Result<Option<Operation>, ParseError> {
        if self.token.kind != TokenKind::Op {
            return Ok(None);
        }

        let operator = match self.token.value.as_str() {
            ";" | ":" => return Ok(None),
            "&" => {
                self.next_token();
                if self.token.value != "&" {
                    return Err(ParseError::expected("&&", &self.token, "parseOperation"));
                }
                self.next_token();
                Operator::And
            }
            "|" => {
                self.next_token();
                if self.token.value != "|" {
                    return Err(ParseError::expected("||", &self.token, "parseOperation"));
                }
                self.next_token();
                Operator::Or
            }
            "=" => {
                self.next_token();
                match self.token.value.as_str() {
                    "=" => {
                        self.next_token();
                        Operator::Equal
                    }
                    "~" => {
                        self.next_token();
                        Operator::Cmp
                    }
                    _ => Operator::Assignment,
                }
            }
            "!" => {
                self.next_token();
                match self.token.value.as_str() {
                    "=" => {
                        self.next_token();
                        Operator::NotEqual
                    }
                    "~" => {
                        self.next_token();
                        Operator::NotCmp
                    }
                    _ => {
                        return Err(ParseError::expected(
                            "!= or !~",
                            &self.token,
                            "parseOperation",
                        ))
                    }
                }
            }
            "<" | ">" => {
                let smaller = self.token.value == "<";
                self.next_token();
                let or_equal = self.token.value == "=";
                if or_equal {
                    self.next_token();
                }
                match (smaller, or_equal) {
                    (true, true) => Operator::SmallerEqual,
                    (true, false) => Operator::Smaller,
                    (false, true) => Operator::GreaterEqual,
                    (false, false) => Operator::Greater,
                }
            }
            symbol @ ("+" | "-" | "*" | "/" | "%") => {
                let op = Operator::from_symbol(symbol).unwrap_or(Operator::Add);
                self.next_token();
                op
            }
            other => {
                return Err(ParseError::Structure(format!(
                    "found unexpected operation '{other}'"
                )))
            }
        };

        let Some((operand, _)) = self.parse_operand()? else {
            return Err(ParseError::expected("operand", &self.token, "parseOperation"));
        };
        Ok(Some(Operation { operator, operand }))
    }

    fn parse_expression(&mut self) -> Result<Option<Expression>, ParseError> {
        if self.token.is_eof() {
            return Ok(self.flush_expression());
        }

        let mut res = Expression::default();
        match self.parse_operand() {
            Ok(Some((operand, standalone))) => {
                res.operand = Some(operand);
                if standalone {
                    return Ok(Some(res));
                }
            }
            Ok(None) => {}
            Err(err) => {
                res.operand = self.partial.take();
                self.partial_expression = Some(res);
                return Err(err);
            }
        }

        while self.token.value != "," {
            match self.parse_operation() {
                Ok(Some(op)) => res.operations.push(op),
                Ok(None) => break,
                Err(err) => {
                    self.partial = None;
                    self.partial_expression = Some(res);
                    return Err(err);
                }
            }
        }

        if res.operand.is_none() && res.operations.is_empty() {
            return Ok(self.flush_expression());
        }
        Ok(Some(res))
    }

    /// Parses the whole token stream.
    pub fn parse(&mut self) -> Parsed {
        let mut res = Parsed::default();
        loop {
            match self.parse_expression() {
                Ok(Some(exp)) => res.ast.expressions.push(exp),
                Ok(None) => break,
                Err(err) => {
                    if let Some(partial) = self.partial_expression.take() {
                        res.ast.expressions.push(partial);
                    }
                    res.error = Some(err);
                    break;
                }
            }

            if self.token.value == ";" {
                self.next_token();
            }

            let tok = &self.token;
            if tok.kind == TokenKind::Call && tok.value != "[" && tok.value != "{" {
                res.error = Some(ParseError::Structure(format!(
                    "mismatched symbol '{}' at the end of expression",
                    tok.value
                )));
                break;
            }
        }
        log::trace!(
            "parsed {} expressions (error: {:?})",
            res.ast.expressions.len(),
            res.error
        );
        res
    }
}

/// Parses a query. Tokenizer failures abort without an AST; syntax errors
/// come back inside `Parsed` together with the expressions read so far.
pub fn parse(input: &str) -> Result<Parsed, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    Ok(Parser::new(tokens).parse())
}
