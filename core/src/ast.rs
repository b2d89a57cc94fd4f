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

//! Query syntax tree.
//!
//! The parser produces flat `operand (op operand)*` expressions. Before
//! compilation they are folded by precedence into nested binary operations,
//! where each operation becomes an operand named after its operator with a
//! single two-argument function call: `a == b` turns into `==(a, b)`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub operand: Option<Operand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operand {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comments: String,
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Vec<Expression>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Regex(String),
    Array(Vec<Expression>),
    Map(BTreeMap<String, Expression>),
    Ident(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    Ident { name: String, comments: String },
    Function(Vec<Arg>),
    Accessor(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Assignment,
    Or,
    And,
    Equal,
    Cmp,
    NotEqual,
    NotCmp,
    Smaller,
    SmallerEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

// ─── Operators ───────────────────────────────────────────────────────────────

/// Precedence groups, tightest first.
const PRECEDENCE: [&[Operator]; 7] = [
    &[Operator::Multiply, Operator::Divide, Operator::Remainder],
    &[Operator::Add, Operator::Subtract],
    &[
        Operator::Smaller,
        Operator::SmallerEqual,
        Operator::Greater,
        Operator::GreaterEqual,
    ],
    &[
        Operator::Equal,
        Operator::Cmp,
        Operator::NotEqual,
        Operator::NotCmp,
    ],
    &[Operator::And],
    &[Operator::Or],
    &[Operator::Assignment],
];

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Assignment => "=",
            Operator::Or => "||",
            Operator::And => "&&",
            Operator::Equal => "==",
            Operator::Cmp => "=~",
            Operator::NotEqual => "!=",
            Operator::NotCmp => "!~",
            Operator::Smaller => "<",
            Operator::SmallerEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Remainder => "%",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Operator> {
        let op = match symbol {
            "=" => Operator::Assignment,
            "||" => Operator::Or,
            "&&" => Operator::And,
            "==" => Operator::Equal,
            "=~" => Operator::Cmp,
            "!=" => Operator::NotEqual,
            "!~" => Operator::NotCmp,
            "<" => Operator::Smaller,
            "<=" => Operator::SmallerEqual,
            ">" => Operator::Greater,
            ">=" => Operator::GreaterEqual,
            "+" => Operator::Add,
            "-" => Operator::Subtract,
            "*" => Operator::Multiply,
            "/" => Operator::Divide,
            "%" => Operator::Remainder,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True for builtin ids that start with an operator symbol (`==empty`, `&&bool`).
pub fn is_operator_id(id: &str) -> bool {
    id.starts_with(['=', '!', '<', '>', '&', '|', '+', '-', '*', '/', '%'])
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

impl Expression {
    pub fn from_operand(operand: Operand) -> Self {
        Expression {
            operand: Some(operand),
            operations: Vec::new(),
        }
    }

    /// An expression with nothing to compile. Comment-only expressions count.
    pub fn is_empty(&self) -> bool {
        if !self.operations.is_empty() {
            return false;
        }
        match &self.operand {
            None => true,
            Some(op) => {
                op.value.is_none()
                    && op.calls.is_empty()
                    && op.block.as_ref().map_or(true, |b| b.is_empty())
            }
        }
    }

    /// The identifier at the head of this expression, if any.
    pub fn ident(&self) -> Option<&str> {
        match &self.operand {
            Some(Operand {
                value: Some(Value::Ident(id)),
                ..
            }) => Some(id),
            _ => None,
        }
    }

    /// Folds the flat operation list into nested binary operands by
    /// precedence. Already folded expressions are returned unchanged.
    pub fn fold_operators(&self) -> Result<Expression, String> {
        if self.operations.is_empty() {
            return Ok(self.clone());
        }
        let Some(first) = self.operand.clone() else {
            return Err(format!(
                "missing operand before operator '{}'",
                self.operations[0].operator
            ));
        };

        let mut operands = vec![first];
        let mut operators = Vec::with_capacity(self.operations.len());
        for op in &self.operations {
            operators.push(op.operator);
            operands.push(op.operand.clone());
        }

        for group in PRECEDENCE {
            let mut idx = 0;
            while idx < operators.len() {
                if !group.contains(&operators[idx]) {
                    idx += 1;
                    continue;
                }
                let op = operators.remove(idx);
                let right = operands.remove(idx + 1);
                let left = std::mem::take(&mut operands[idx]);
                operands[idx] = Operand::binary(op, left, right);
            }
        }

        Ok(Expression::from_operand(operands.remove(0)))
    }
}

impl Operand {
    pub fn ident(id: impl Into<String>) -> Self {
        Operand {
            value: Some(Value::Ident(id.into())),
            ..Default::default()
        }
    }

    fn binary(op: Operator, left: Operand, right: Operand) -> Self {
        Operand {
            comments: String::new(),
            value: Some(Value::Ident(op.as_str().to_string())),
            calls: vec![Call::Function(vec![
                Arg::unnamed(Expression::from_operand(left)),
                Arg::unnamed(Expression::from_operand(right)),
            ])],
            block: None,
        }
    }
}

impl Call {
    pub fn comments(&self) -> &str {
        match self {
            Call::Ident { comments, .. } => comments,
            _ => "",
        }
    }

    pub fn args(&self) -> Option<&[Arg]> {
        match self {
            Call::Function(args) => Some(args),
            _ => None,
        }
    }
}

impl Arg {
    pub fn unnamed(value: Expression) -> Self {
        Arg { name: None, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Operand {
        Operand {
            value: Some(Value::Int(v)),
            ..Default::default()
        }
    }

    fn op(operator: Operator, v: i64) -> Operation {
        Operation {
            operator,
            operand: int(v),
        }
    }

    fn binary_parts(operand: &Operand) -> (&str, &Operand, &Operand) {
        let Some(Value::Ident(id)) = &operand.value else {
            panic!("not an operation: {operand:?}");
        };
        let Some(Call::Function(args)) = operand.calls.first() else {
            panic!("missing operation call");
        };
        (
            id,
            args[0].value.operand.as_ref().unwrap(),
            args[1].value.operand.as_ref().unwrap(),
        )
    }

    #[test]
    fn test_fold_precedence() {
        // 1 + 2 * 3 == 7
        let expr = Expression {
            operand: Some(int(1)),
            operations: vec![
                op(Operator::Add, 2),
                op(Operator::Multiply, 3),
                op(Operator::Equal, 7),
            ],
        };
        let folded = expr.fold_operators().unwrap();
        assert!(folded.operations.is_empty());
        let (id, left, right) = binary_parts(folded.operand.as_ref().unwrap());
        assert_eq!(id, "==");
        assert_eq!(right.value, Some(Value::Int(7)));
        let (id, one, product) = binary_parts(left);
        assert_eq!(id, "+");
        assert_eq!(one.value, Some(Value::Int(1)));
        assert_eq!(binary_parts(product).0, "*");
    }

    #[test]
    fn test_fold_left_associative() {
        let expr = Expression {
            operand: Some(int(8)),
            operations: vec![op(Operator::Subtract, 2), op(Operator::Subtract, 1)],
        };
        let folded = expr.fold_operators().unwrap();
        let (_, left, right) = binary_parts(folded.operand.as_ref().unwrap());
        assert_eq!(right.value, Some(Value::Int(1)));
        assert_eq!(binary_parts(left).0, "-");
    }

    #[test]
    fn test_fold_without_operand_fails() {
        let expr = Expression {
            operand: None,
            operations: vec![op(Operator::And, 1)],
        };
        assert!(expr.fold_operators().is_err());
    }

    #[test]
    fn test_is_empty() {
        assert!(Expression::default().is_empty());
        let comment_only = Expression::from_operand(Operand {
            comments: "hi".into(),
            ..Default::default()
        });
        assert!(comment_only.is_empty());
        assert!(!Expression::from_operand(Operand::ident("a")).is_empty());
    }

    #[test]
    fn test_is_operator_id() {
        assert!(is_operator_id("==empty"));
        assert!(is_operator_id("&&bool"));
        assert!(!is_operator_id("length"));
    }
}
