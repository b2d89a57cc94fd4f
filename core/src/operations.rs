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

//! Which operator overloads the execution engine implements.
//!
//! Operator chunks carry ids like `==string` or `+int`: the operator followed
//! by the label of the right-hand type. A bare operator id (`==`) is the
//! generic overload. The compiler asks an [`OperationValidator`] whether an
//! overload exists on the left-hand type before emitting it.

use crate::bytecode::{arithmetic_operator, comparable_operator};
use crate::types::Type;

pub trait OperationValidator: Send + Sync {
    /// Result type of calling `name` on a value of type `binding`, or `None`
    /// if the runtime has no such operation.
    fn result_type(&self, binding: &Type, name: &str) -> Option<Type>;

    fn supports(&self, binding: &Type, name: &str) -> bool {
        self.result_type(binding, name).is_some()
    }
}

/// The operator table of the standard execution engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardOperations;

impl OperationValidator for StandardOperations {
    fn result_type(&self, binding: &Type, name: &str) -> Option<Type> {
        let (op, suffix) = split_operator(name)?;
        let rhs = if suffix.is_empty() {
            None
        } else {
            Some(suffix.parse::<Type>().ok()?)
        };

        match op {
            "&&" | "||" => Some(Type::Bool),
            "==" | "!=" => equality(binding, rhs.as_ref()).then_some(Type::Bool),
            "=~" | "!~" => regex_match(binding, rhs.as_ref()?).then_some(Type::Bool),
            "<" | "<=" | ">" | ">=" => ordering(binding, rhs.as_ref()?).then_some(Type::Bool),
            _ => arithmetic(op, binding, rhs.as_ref()?),
        }
    }
}

fn split_operator(name: &str) -> Option<(&str, &str)> {
    let op = comparable_operator(name).or_else(|| arithmetic_operator(name))?;
    Some((op, &name[op.len()..]))
}

fn is_wildcard(t: &Type) -> bool {
    matches!(t, Type::Nil | Type::Empty | Type::Any | Type::Dict)
}

fn equality(lhs: &Type, rhs: Option<&Type>) -> bool {
    let Some(rhs) = rhs else {
        return matches!(lhs.underlying(), Type::ArrayLike | Type::MapLike | Type::Any);
    };
    if is_wildcard(lhs) || is_wildcard(rhs) || lhs == rhs {
        return true;
    }
    if lhs.is_basic() && rhs.is_basic() {
        return true;
    }
    match (lhs, rhs) {
        (Type::Array(_), _) => true,
        (Type::Map(_, _), Type::Map(_, _)) | (Type::Map(_, _), Type::MapLike) => true,
        (Type::Resource(_), Type::ResourceLike) => true,
        _ => false,
    }
}

fn regex_match(lhs: &Type, rhs: &Type) -> bool {
    let target = match lhs {
        Type::String | Type::Dict | Type::Any | Type::StringSlice => true,
        Type::Array(child) => matches!(**child, Type::String | Type::Dict),
        _ => false,
    };
    target && matches!(rhs, Type::Regex | Type::String | Type::Dict | Type::Any)
}

fn is_ordered(t: &Type) -> bool {
    matches!(
        t,
        Type::Int | Type::Float | Type::String | Type::Time | Type::Dict | Type::Semver | Type::Version | Type::Any
    )
}

fn ordering(lhs: &Type, rhs: &Type) -> bool {
    if !is_ordered(lhs) || !is_ordered(rhs) {
        return false;
    }
    if lhs == rhs || matches!(lhs, Type::Dict | Type::Any) || matches!(rhs, Type::Dict | Type::Any) {
        return true;
    }
    if lhs.is_numeric() && rhs.is_numeric() {
        return true;
    }
    let stringish = |t: &Type| matches!(t, Type::String | Type::Semver | Type::Version);
    (stringish(lhs) && (rhs.is_numeric() || stringish(rhs))) || (stringish(rhs) && lhs.is_numeric())
}

fn arithmetic(op: &str, lhs: &Type, rhs: &Type) -> Option<Type> {
    match (lhs, rhs) {
        (Type::Int, Type::Int) => Some(Type::Int),
        (Type::Int | Type::Float, Type::Int | Type::Float) if op != "%" => Some(Type::Float),
        (Type::Dict, r) if r.is_numeric() || matches!(r, Type::Dict | Type::String) => Some(Type::Dict),
        (l, Type::Dict) if l.is_numeric() => Some(Type::Dict),
        (Type::String, Type::String | Type::Int | Type::Float | Type::Dict) if op == "+" => Some(Type::String),
        (Type::Array(a), Type::Array(b)) if a == b && matches!(op, "+" | "-") => Some(lhs.clone()),
        (Type::Array(_), Type::ArrayLike) if matches!(op, "+" | "-") => Some(lhs.clone()),
        (Type::Time, Type::Time) if matches!(op, "+" | "-") => Some(Type::Time),
        (Type::Time, Type::Int) | (Type::Int, Type::Time) if op == "*" => Some(Type::Time),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_overloads() {
        let ops = StandardOperations;
        assert_eq!(ops.result_type(&Type::String, "==string"), Some(Type::Bool));
        assert!(ops.supports(&Type::Int, "!=float"));
        assert!(ops.supports(&Type::resource("user"), "==user"));
        assert!(ops.supports(&Type::resource("user"), "==empty"));
        assert!(!ops.supports(&Type::resource("user"), "==file"));
        assert!(!ops.supports(&Type::String, "=="));
        assert!(ops.supports(&Type::array(Type::Int), "=="));
    }

    #[test]
    fn test_regex_overloads() {
        let ops = StandardOperations;
        assert!(ops.supports(&Type::String, "=~regex"));
        assert!(ops.supports(&Type::array(Type::String), "!~regex"));
        assert!(!ops.supports(&Type::Int, "=~regex"));
    }

    #[test]
    fn test_arithmetic_result_types() {
        let ops = StandardOperations;
        assert_eq!(ops.result_type(&Type::Int, "+int"), Some(Type::Int));
        assert_eq!(ops.result_type(&Type::Int, "*float"), Some(Type::Float));
        assert_eq!(ops.result_type(&Type::String, "+string"), Some(Type::String));
        assert_eq!(ops.result_type(&Type::String, "-string"), None);
        assert_eq!(ops.result_type(&Type::Float, "%float"), None);
    }

    #[test]
    fn test_non_operators_are_unknown() {
        assert_eq!(StandardOperations.result_type(&Type::String, "length"), None);
        assert_eq!(StandardOperations.result_type(&Type::String, "==not a type"), None);
    }
}
