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

//! Semantic types of the query language.
//!
//! Every type has a textual label (`int`, `[]string`, `map[string]dict`,
//! `sshd.config`). The label is what goes into checksums, builtin ids like
//! `==string` and error messages, and it is also the serde representation so
//! schemas can spell types the way users read them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Type {
    Unset,
    #[default]
    Any,
    Nil,
    Ref,
    Bool,
    Int,
    Float,
    String,
    Regex,
    Time,
    Dict,
    Score,
    Block,
    Empty,
    Semver,
    Version,
    Ip,
    StringSlice,
    Range,
    Array(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Resource(String),
    // Kinds. These only ever appear as registry keys and underlying types.
    ArrayLike,
    MapLike,
    ResourceLike,
    FunctionLike,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeError {
    #[error("empty type label")]
    Empty,
    #[error("malformed type label '{0}'")]
    Malformed(String),
}

impl Type {
    pub fn array(child: Type) -> Type {
        Type::Array(Box::new(child))
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn resource(name: impl Into<String>) -> Type {
        Type::Resource(name.into())
    }

    pub fn label(&self) -> String {
        match self {
            Type::Unset => "unset".into(),
            Type::Any => "any".into(),
            Type::Nil => "null".into(),
            Type::Ref => "ref".into(),
            Type::Bool => "bool".into(),
            Type::Int => "int".into(),
            Type::Float => "float".into(),
            Type::String => "string".into(),
            Type::Regex => "regex".into(),
            Type::Time => "time".into(),
            Type::Dict => "dict".into(),
            Type::Score => "score".into(),
            Type::Block => "block".into(),
            Type::Empty => "empty".into(),
            Type::Semver => "semver".into(),
            Type::Version => "version".into(),
            Type::Ip => "ip".into(),
            Type::StringSlice => "stringslice".into(),
            Type::Range => "range".into(),
            Type::Array(child) => format!("[]{}", child.label()),
            Type::Map(key, value) => format!("map[{}]{}", key.label(), value.label()),
            Type::Resource(name) => name.clone(),
            Type::ArrayLike => "[]".into(),
            Type::MapLike => "map".into(),
            Type::ResourceLike => "resource".into(),
            Type::FunctionLike => "function".into(),
        }
    }

    /// The kind a type belongs to for builtin lookups.
    pub fn underlying(&self) -> Type {
        match self {
            Type::Array(_) => Type::ArrayLike,
            Type::Map(_, _) => Type::MapLike,
            Type::Resource(_) => Type::ResourceLike,
            other => other.clone(),
        }
    }

    pub fn child(&self) -> Type {
        match self {
            Type::Array(child) => (**child).clone(),
            Type::Map(_, value) => (**value).clone(),
            Type::Dict => Type::Dict,
            _ => Type::Any,
        }
    }

    pub fn key(&self) -> Type {
        match self {
            Type::Map(key, _) => (**key).clone(),
            Type::Dict => Type::String,
            _ => Type::Any,
        }
    }

    pub fn resource_name(&self) -> Option<&str> {
        match self {
            Type::Resource(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Type::Map(_, _))
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Type::Resource(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// Scalar values that comparisons and conversions treat alike.
    pub fn is_basic(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::Int
                | Type::Float
                | Type::String
                | Type::Regex
                | Type::Time
                | Type::Dict
                | Type::Score
                | Type::Semver
                | Type::Version
                | Type::Ip
        )
    }

    /// Reconcile two types that must agree. `Unset` yields to the other side.
    pub fn enforce(&self, other: &Type) -> Option<Type> {
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),
            (Type::Unset, b) => Some(b.clone()),
            (a, Type::Unset) => Some(a.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Type {
    type Err = TypeError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let label = label.trim();
        if label.is_empty() {
            return Err(TypeError::Empty);
        }
        if label == "[]" {
            return Ok(Type::ArrayLike);
        }
        if let Some(child) = label.strip_prefix("[]") {
            return Ok(Type::array(child.parse()?));
        }
        if let Some(rest) = label.strip_prefix("map[") {
            let mut depth = 1;
            for (idx, ch) in rest.char_indices() {
                match ch {
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            let key = rest[..idx].parse()?;
                            let value = rest[idx + 1..].parse()?;
                            return Ok(Type::map(key, value));
                        }
                    }
                    _ => {}
                }
            }
            return Err(TypeError::Malformed(label.to_string()));
        }

        let typ = match label {
            "unset" => Type::Unset,
            "any" => Type::Any,
            "null" => Type::Nil,
            "ref" => Type::Ref,
            "bool" => Type::Bool,
            "int" => Type::Int,
            "float" => Type::Float,
            "string" => Type::String,
            "regex" => Type::Regex,
            "time" => Type::Time,
            "dict" => Type::Dict,
            "score" => Type::Score,
            "block" => Type::Block,
            "empty" => Type::Empty,
            "semver" => Type::Semver,
            "version" => Type::Version,
            "ip" => Type::Ip,
            "stringslice" => Type::StringSlice,
            "range" => Type::Range,
            "map" => Type::MapLike,
            "resource" => Type::ResourceLike,
            "function" => Type::FunctionLike,
            name => {
                let valid = name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
                if !valid {
                    return Err(TypeError::Malformed(name.to_string()));
                }
                Type::Resource(name.to_string())
            }
        };
        Ok(typ)
    }
}

impl TryFrom<String> for Type {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Type> for String {
    fn from(typ: Type) -> Self {
        typ.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(Type::array(Type::String).label(), "[]string");
        assert_eq!(Type::map(Type::String, Type::Dict).label(), "map[string]dict");
        assert_eq!(Type::resource("sshd.config").label(), "sshd.config");
        assert_eq!(Type::Nil.to_string(), "null");
    }

    #[test]
    fn test_parse_labels() {
        let nested: Type = "map[string][]user".parse().unwrap();
        assert_eq!(nested, Type::map(Type::String, Type::array(Type::resource("user"))));
        assert_eq!("[][]int".parse::<Type>().unwrap(), Type::array(Type::array(Type::Int)));
        assert!("map[string".parse::<Type>().is_err());
        assert!("a b".parse::<Type>().is_err());
    }

    #[test]
    fn test_underlying_and_child() {
        let users = Type::array(Type::resource("user"));
        assert_eq!(users.underlying(), Type::ArrayLike);
        assert_eq!(users.child(), Type::resource("user"));
        assert_eq!(Type::Dict.child(), Type::Dict);
        assert_eq!(Type::map(Type::String, Type::Int).key(), Type::String);
    }

    #[test]
    fn test_enforce() {
        assert_eq!(Type::Unset.enforce(&Type::Block), Some(Type::Block));
        assert_eq!(Type::Int.enforce(&Type::Int), Some(Type::Int));
        assert_eq!(Type::Int.enforce(&Type::String), None);
    }

    #[test]
    fn test_serde_as_label() {
        let json = serde_json::to_string(&Type::array(Type::Int)).unwrap();
        assert_eq!(json, "\"[]int\"");
        let back: Type = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Type::array(Type::Int));
    }
}
