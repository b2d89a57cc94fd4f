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

//! Builtin function, operator and conversion tables.
//!
//! Builtins are keyed by the type they are called on. Lookups try the exact
//! type first (`parse.date`) and then its underlying kind (`[].where`).
//! Handlers either describe a plain call through a result type and a
//! signature, or carry a compile function for calls that build blocks.

use crate::ast::Call;
use crate::builtin_array as array;
use crate::builtin_map as map;
use crate::builtin_resource as resource;
use crate::bytecode::{Documentation, Primitive, Ref};
use crate::compiler::{CompileError, Compiler, Frame};
use crate::operators;
use crate::types::Type;
use std::collections::BTreeMap;

/// Compiles a builtin call on the value at `binding` (of type `typ`).
pub type CompileFn =
    fn(&mut Compiler<'_>, &mut Frame, &Type, Ref, &str, Option<&Call>) -> Result<Type, CompileError>;

/// Compiles an operator or keyword. Returns the type of the emitted chunk.
pub type OperatorFn = fn(&mut Compiler<'_>, &mut Frame, &str, Option<&Call>) -> Result<Type, CompileError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Fixed(Type),
    /// The element type of the binding.
    Child,
    /// The binding's own type.
    Same,
    /// An array of the binding's key type.
    Keys,
    /// An array of the binding's element type.
    Values,
}

/// Argument counts and types of a plain builtin call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    pub required: usize,
    pub args: Vec<Type>,
}

impl Signature {
    fn expected(&self) -> String {
        if self.required == self.args.len() {
            self.required.to_string()
        } else {
            format!("{}-{}", self.required, self.args.len())
        }
    }

    /// Checks call arguments against the signature. Refs are compared by the
    /// type of the chunk they point at.
    pub fn validate(&self, args: &[Primitive], c: &Compiler<'_>) -> Result<(), CompileError> {
        if args.is_empty() && self.required > 0 {
            return Err(CompileError::invalid(format!("no arguments given (expected {})", self.expected())));
        }
        if args.len() < self.required {
            return Err(CompileError::invalid(format!(
                "not enough arguments (expected {}, got {})",
                self.expected(),
                args.len()
            )));
        }
        if args.len() > self.args.len() {
            return Err(CompileError::invalid(format!(
                "too many arguments (expected {}, got {})",
                self.expected(),
                args.len()
            )));
        }

        for (idx, (arg, expected)) in args.iter().zip(&self.args).enumerate() {
            let actual = c.dereference_type(arg)?;
            if !accepts(expected, &actual) {
                return Err(CompileError::invalid(format!(
                    "incorrect argument {}: expected {} got {}",
                    idx + 1,
                    expected.label(),
                    actual.label()
                )));
            }
        }
        Ok(())
    }
}

fn accepts(expected: &Type, actual: &Type) -> bool {
    if expected == actual || matches!(expected, Type::Any) || matches!(actual, Type::Any | Type::Dict) {
        return true;
    }
    match (expected, actual) {
        (Type::ArrayLike, Type::Array(_)) => true,
        (Type::Array(e), Type::Array(a)) => accepts(e, a),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct Handler {
    pub result: ResultType,
    pub signature: Signature,
    pub compile: Option<CompileFn>,
    pub desc: &'static str,
}

impl Handler {
    fn new(result: ResultType) -> Self {
        Handler {
            result,
            signature: Signature::default(),
            compile: None,
            desc: "",
        }
    }

    fn fixed(typ: Type) -> Self {
        Handler::new(ResultType::Fixed(typ))
    }

    fn compiled(f: CompileFn) -> Self {
        Handler {
            compile: Some(f),
            ..Handler::new(ResultType::Same)
        }
    }

    fn args(mut self, required: usize, args: Vec<Type>) -> Self {
        self.signature = Signature { required, args };
        self
    }

    fn desc(mut self, desc: &'static str) -> Self {
        self.desc = desc;
        self
    }

    pub fn result_type(&self, binding: &Type) -> Type {
        match &self.result {
            ResultType::Fixed(t) => t.clone(),
            ResultType::Child => binding.child(),
            ResultType::Same => binding.clone(),
            ResultType::Keys => Type::array(binding.key()),
            ResultType::Values => Type::array(binding.child()),
        }
    }
}

type Table = BTreeMap<&'static str, Handler>;

/// Everything callable that isn't a resource or a field.
#[derive(Debug, Clone)]
pub struct Registry {
    builtins: BTreeMap<Type, Table>,
    operators: BTreeMap<&'static str, OperatorFn>,
    conversions: BTreeMap<&'static str, (Type, OperatorFn)>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

impl Registry {
    pub fn standard() -> Self {
        let mut builtins = BTreeMap::new();
        builtins.insert(Type::Int, number_builtins());
        builtins.insert(Type::Float, number_builtins());
        builtins.insert(Type::String, string_builtins());
        builtins.insert(Type::Time, time_builtins());
        builtins.insert(Type::Dict, dict_builtins());
        builtins.insert(Type::Version, version_builtins());
        builtins.insert(Type::Semver, version_builtins());
        builtins.insert(Type::Ip, ip_builtins());
        builtins.insert(Type::ArrayLike, array_builtins());
        builtins.insert(Type::MapLike, map_builtins());
        builtins.insert(Type::ResourceLike, resource_builtins());
        builtins.insert(Type::resource("parse"), parse_builtins());

        Registry {
            builtins,
            operators: operators::standard_operators(),
            conversions: operators::standard_conversions(),
        }
    }

    /// The builtin `id` on `typ`, trying the exact type before its kind.
    pub fn builtin(&self, typ: &Type, id: &str) -> Option<&Handler> {
        self.builtins
            .get(typ)
            .and_then(|t| t.get(id))
            .or_else(|| self.builtins.get(&typ.underlying()).and_then(|t| t.get(id)))
    }

    /// All builtins callable on `typ`, as suggestion entries.
    pub fn docs(&self, typ: &Type) -> BTreeMap<String, Documentation> {
        let mut res = BTreeMap::new();
        for table in [self.builtins.get(&typ.underlying()), self.builtins.get(typ)].into_iter().flatten() {
            for (id, h) in table {
                if id.starts_with(['[', '{', '=', '!']) {
                    continue;
                }
                res.insert(
                    id.to_string(),
                    Documentation {
                        field: id.to_string(),
                        title: h.desc.to_string(),
                        desc: String::new(),
                    },
                );
            }
        }
        res
    }

    pub fn operator(&self, id: &str) -> Option<OperatorFn> {
        self.operators.get(id).copied()
    }

    pub fn conversion(&self, id: &str) -> Option<(Type, OperatorFn)> {
        self.conversions.get(id).cloned()
    }
}

// ─── Tables ──────────────────────────────────────────────────────────────────

fn table(entries: Vec<(&'static str, Handler)>) -> Table {
    entries.into_iter().collect()
}

fn in_range() -> Handler {
    Handler::fixed(Type::Bool)
        .args(2, vec![Type::Any, Type::Any])
        .desc("checks if the value is within the given range")
}

fn number_builtins() -> Table {
    table(vec![("inRange", in_range())])
}

fn string_builtins() -> Table {
    let strings = Type::array(Type::String);
    table(vec![
        ("contains", Handler::fixed(Type::Bool).args(1, vec![Type::Any]).desc("checks if the string contains a value")),
        ("in", Handler::fixed(Type::Bool).args(1, vec![strings.clone()])),
        ("notIn", Handler::fixed(Type::Bool).args(1, vec![strings.clone()])),
        ("inRange", in_range()),
        ("find", Handler::fixed(strings.clone()).args(1, vec![Type::Regex]).desc("finds all matches of a regex")),
        ("length", Handler::fixed(Type::Int).desc("length of the string")),
        ("camelcase", Handler::fixed(Type::String)),
        ("downcase", Handler::fixed(Type::String)),
        ("upcase", Handler::fixed(Type::String)),
        ("lines", Handler::fixed(strings.clone()).desc("splits the string into lines")),
        ("split", Handler::fixed(strings).args(1, vec![Type::String])),
        ("trim", Handler::fixed(Type::String).args(0, vec![Type::String])),
    ])
}

fn time_builtins() -> Table {
    table(vec![
        ("seconds", Handler::fixed(Type::Int)),
        ("minutes", Handler::fixed(Type::Int)),
        ("hours", Handler::fixed(Type::Int)),
        ("days", Handler::fixed(Type::Int)),
        ("unix", Handler::fixed(Type::Int).desc("seconds since the unix epoch")),
        ("inRange", in_range()),
    ])
}

fn dict_builtins() -> Table {
    let strings = Type::array(Type::String);
    let lists = vec![strings.clone(), Type::array(Type::Dict)];
    table(vec![
        ("[]", Handler::fixed(Type::Dict).args(1, vec![Type::Any])),
        ("inRange", in_range()),
        ("find", Handler::fixed(strings.clone()).args(1, vec![Type::Regex]).desc("finds all matches of a regex")),
        ("camelcase", Handler::fixed(Type::String)),
        ("split", Handler::fixed(strings.clone()).args(1, vec![Type::String])),
        ("in", Handler::fixed(Type::Bool).args(1, lists.clone())),
        ("notIn", Handler::fixed(Type::Bool).args(1, lists)),
        ("length", Handler::fixed(Type::Int)),
        ("first", Handler::fixed(Type::Dict)),
        ("last", Handler::fixed(Type::Dict)),
        ("where", Handler::compiled(map::compile_dict_where).desc("filters entries by a condition")),
        ("sample", Handler::fixed(Type::Dict).args(1, vec![Type::Int])),
        ("recurse", Handler::compiled(map::compile_dict_recurse).desc("finds all nested values matching a condition")),
        ("contains", Handler::compiled(map::compile_dict_contains)),
        ("containsOnly", Handler::compiled(array::compile_array_contains_only)),
        ("containsAll", Handler::compiled(array::compile_array_contains_all)),
        ("containsNone", Handler::compiled(array::compile_array_contains_none)),
        ("all", Handler::compiled(map::compile_dict_all)),
        ("any", Handler::compiled(map::compile_dict_any)),
        ("one", Handler::compiled(map::compile_dict_one)),
        ("none", Handler::compiled(map::compile_dict_none)),
        ("map", Handler::compiled(array::compile_array_map)),
        ("flat", Handler::fixed(Type::array(Type::Dict))),
        ("keys", Handler::fixed(strings.clone())),
        ("values", Handler::fixed(Type::array(Type::Dict))),
        ("downcase", Handler::fixed(Type::String)),
        ("upcase", Handler::fixed(Type::String)),
        ("trim", Handler::fixed(Type::String).args(0, vec![Type::String])),
        ("lines", Handler::fixed(strings)),
    ])
}

fn version_builtins() -> Table {
    table(vec![("epoch", Handler::fixed(Type::Int)), ("inRange", in_range())])
}

fn ip_builtins() -> Table {
    table(vec![
        ("address", Handler::fixed(Type::String)),
        ("cidr", Handler::fixed(Type::String)),
        ("inRange", in_range()),
        ("isPublic", Handler::fixed(Type::Bool)),
        ("isUnspecified", Handler::fixed(Type::Bool)),
        ("prefix", Handler::fixed(Type::String)),
        ("prefixLength", Handler::fixed(Type::Int)),
        ("subnet", Handler::fixed(Type::String)),
        ("suffix", Handler::fixed(Type::String)),
        ("version", Handler::fixed(Type::Int)),
    ])
}

fn array_builtins() -> Table {
    table(vec![
        ("[]", Handler::new(ResultType::Child).args(1, vec![Type::Int])),
        ("first", Handler::new(ResultType::Child).desc("the first entry")),
        ("last", Handler::new(ResultType::Child).desc("the last entry")),
        ("length", Handler::fixed(Type::Int).desc("number of entries")),
        ("where", Handler::compiled(array::compile_array_where).desc("filters entries by a condition")),
        ("sample", Handler::new(ResultType::Same).args(1, vec![Type::Int])),
        ("duplicates", Handler::compiled(array::compile_array_duplicates)),
        ("unique", Handler::new(ResultType::Same)),
        ("in", Handler::fixed(Type::Bool).args(1, vec![Type::ArrayLike])),
        ("notIn", Handler::fixed(Type::Bool).args(1, vec![Type::ArrayLike])),
        ("contains", Handler::compiled(array::compile_array_contains).desc("checks if any entry matches")),
        ("containsOnly", Handler::compiled(array::compile_array_contains_only)),
        ("containsAll", Handler::compiled(array::compile_array_contains_all)),
        ("containsNone", Handler::compiled(array::compile_array_contains_none)),
        ("all", Handler::compiled(array::compile_array_all).desc("checks that all entries match")),
        ("any", Handler::compiled(array::compile_array_any)),
        ("one", Handler::compiled(array::compile_array_one)),
        ("none", Handler::compiled(array::compile_array_none)),
        ("map", Handler::compiled(array::compile_array_map).desc("transforms every entry")),
        ("flat", Handler::compiled(array::compile_array_flat)),
        ("reverse", Handler::new(ResultType::Same)),
        ("join", Handler::fixed(Type::String).args(0, vec![Type::String])),
    ])
}

fn map_builtins() -> Table {
    table(vec![
        ("[]", Handler::new(ResultType::Child).args(1, vec![Type::String])),
        ("length", Handler::fixed(Type::Int)),
        ("keys", Handler::new(ResultType::Keys).desc("all keys of the map")),
        ("values", Handler::new(ResultType::Values).desc("all values of the map")),
        ("where", Handler::compiled(map::compile_map_where)),
        ("sample", Handler::new(ResultType::Same).args(1, vec![Type::Int])),
        ("contains", Handler::compiled(map::compile_map_contains)),
        ("all", Handler::compiled(map::compile_map_all)),
        ("one", Handler::compiled(map::compile_map_one)),
        ("none", Handler::compiled(map::compile_map_none)),
    ])
}

fn resource_builtins() -> Table {
    table(vec![
        ("first", Handler::compiled(resource::compile_resource_child_access)),
        ("last", Handler::compiled(resource::compile_resource_child_access)),
        ("length", Handler::compiled(resource::compile_resource_length)),
        ("where", Handler::compiled(resource::compile_resource_where)),
        ("sample", Handler::compiled(resource::compile_resource_sample)),
        ("contains", Handler::compiled(resource::compile_resource_contains)),
        ("all", Handler::compiled(resource::compile_resource_all)),
        ("any", Handler::compiled(resource::compile_resource_any)),
        ("one", Handler::compiled(resource::compile_resource_one)),
        ("none", Handler::compiled(resource::compile_resource_none)),
        ("map", Handler::compiled(resource::compile_resource_map)),
        ("==empty", Handler::compiled(resource::compile_resource_cmp_empty)),
        ("!=empty", Handler::compiled(resource::compile_resource_cmp_empty)),
    ])
}

fn parse_builtins() -> Table {
    table(vec![
        ("date", Handler::fixed(Type::Time).args(1, vec![Type::String, Type::String]).desc("parses a date")),
        ("duration", Handler::fixed(Type::Time).args(1, vec![Type::String]).desc("parses a duration")),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_prefers_exact_type() {
        let reg = Registry::standard();
        let date = reg.builtin(&Type::resource("parse"), "date").unwrap();
        assert_eq!(date.result_type(&Type::resource("parse")), Type::Time);
        assert!(reg.builtin(&Type::resource("parse"), "where").unwrap().compile.is_some());
        assert!(reg.builtin(&Type::resource("users"), "date").is_none());
    }

    #[test]
    fn test_result_types() {
        let reg = Registry::standard();
        let ints = Type::array(Type::Int);
        assert_eq!(reg.builtin(&ints, "first").unwrap().result_type(&ints), Type::Int);
        assert_eq!(reg.builtin(&ints, "reverse").unwrap().result_type(&ints), ints);

        let m = Type::map(Type::String, Type::Int);
        assert_eq!(reg.builtin(&m, "keys").unwrap().result_type(&m), Type::array(Type::String));
        assert_eq!(reg.builtin(&m, "values").unwrap().result_type(&m), ints);
        assert_eq!(reg.builtin(&Type::Dict, "[]").unwrap().result_type(&Type::Dict), Type::Dict);
    }

    #[test]
    fn test_signature_expectations() {
        let sig = Signature {
            required: 1,
            args: vec![Type::String, Type::String],
        };
        assert_eq!(sig.expected(), "1-2");
        let sig = Signature {
            required: 2,
            args: vec![Type::Any, Type::Any],
        };
        assert_eq!(sig.expected(), "2");
    }

    #[test]
    fn test_accepts() {
        assert!(accepts(&Type::String, &Type::String));
        assert!(accepts(&Type::String, &Type::Dict));
        assert!(accepts(&Type::ArrayLike, &Type::array(Type::Int)));
        assert!(!accepts(&Type::Int, &Type::String));
        assert!(!accepts(&Type::array(Type::String), &Type::array(Type::Int)));
    }

    #[test]
    fn test_docs_hide_operators() {
        let docs = Registry::standard().docs(&Type::resource("users"));
        assert!(docs.contains_key("where"));
        assert!(docs.contains_key("length"));
        assert!(!docs.contains_key("==empty"));
    }

    #[test]
    fn test_operators_and_conversions() {
        let reg = Registry::standard();
        assert!(reg.operator("==").is_some());
        assert!(reg.operator("if").is_some());
        assert!(reg.operator("where").is_none());
        assert_eq!(reg.conversion("int").map(|(t, _)| t), Some(Type::Int));
    }

    fn compile_entry(src: &str) -> (String, Type) {
        use crate::config::{CompilerConfig, FeatureSet};
        use crate::schema::testutil::test_schema;
        use std::sync::Arc;

        let cfg = CompilerConfig::new(Arc::new(test_schema()), FeatureSet::default());
        let b = match crate::compile(src, &BTreeMap::new(), &cfg) {
            Ok(b) => b,
            Err(e) => panic!("{src}: {e}"),
        };
        let chunk = b.code.chunk(b.code.entrypoints()[0]).unwrap();
        (chunk.id().to_string(), chunk.typ())
    }

    #[test]
    fn test_dict_string_builtins() {
        let strings = Type::array(Type::String);
        for (src, id, typ) in [
            ("json('x').params.x.split(',')", "split", strings.clone()),
            ("json('x').params.x.find(/a+/)", "find", strings),
            ("json('x').params.x.camelcase", "camelcase", Type::String),
        ] {
            assert_eq!(compile_entry(src), (id.to_string(), typ), "{src}");
        }
    }

    #[test]
    fn test_dict_membership_builtins() {
        for (src, id) in [
            ("json('x').params.x.in(['a', 'b'])", "in"),
            ("json('x').params.x.notIn(['a'])", "notIn"),
            ("json('x').params.x.in(json('y').params.list)", "in"),
            ("json('x').params.x.inRange(1, 5)", "inRange"),
        ] {
            assert_eq!(compile_entry(src), (id.to_string(), Type::Bool), "{src}");
        }
    }
}
