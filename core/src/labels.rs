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

//! Human readable labels for entry and data points.
//!
//! A label spells the path that produced a value (`sshd.config.params`,
//! `users.list[0]`, `mondoo.version == "1"`). Labels are keyed by checksum,
//! so equal code in different blocks shares one label. Labels recorded
//! while compiling (e.g. `[].all()`) take precedence.

use crate::bytecode::{arithmetic_operator, comparable_operator, Chunk, CodeBundle, Primitive, PrimitiveValue, Ref};
use crate::compiler::CompileError;
use crate::types::Type;
use std::collections::{BTreeMap, BTreeSet};
use unicode_normalization::UnicodeNormalization;

/// Adds labels for every entry and data point reachable from the top-level
/// block.
pub fn update_labels(bundle: &mut CodeBundle) -> Result<(), CompileError> {
    let labels = std::mem::take(&mut bundle.labels);
    let assertion_refs = bundle
        .assertions
        .values()
        .flat_map(|a| a.refs.iter().copied())
        .collect();

    let mut labeler = Labeler {
        bundle: &*bundle,
        labels,
        visited: BTreeSet::new(),
        assertion_refs,
    };
    let res = labeler.label_block(Ref::binding_of(1));
    let labels = labeler.labels;
    bundle.labels = labels;
    res
}

struct Labeler<'b> {
    bundle: &'b CodeBundle,
    labels: BTreeMap<String, String>,
    visited: BTreeSet<u32>,
    assertion_refs: BTreeSet<Ref>,
}

impl<'b> Labeler<'b> {
    fn label_block(&mut self, block_ref: Ref) -> Result<(), CompileError> {
        if !self.visited.insert(block_ref.block) {
            return Ok(());
        }
        let bundle: &'b CodeBundle = self.bundle;
        let Some(block) = bundle.code.block(block_ref) else {
            return Ok(());
        };

        let datapoints = block.datapoints.iter().filter(|r| !self.assertion_refs.contains(r));
        let refs: Vec<Ref> = block.entrypoints.iter().chain(datapoints).copied().collect();
        for r in refs {
            let label = sanitize(&self.create_label(r)?);
            if label.is_empty() {
                continue;
            }
            if let Some(sum) = bundle.code.checksum(r) {
                self.labels.entry(sum.to_string()).or_insert(label);
            }
        }
        Ok(())
    }

    fn create_label(&mut self, r: Ref) -> Result<String, CompileError> {
        let bundle: &'b CodeBundle = self.bundle;
        let code = &bundle.code;
        let chunk = code
            .chunk(r)
            .ok_or_else(|| CompileError::invalid(format!("cannot create label, no chunk for ref {r}")))?;

        if let Chunk::Function { function, .. } = chunk {
            for block in function.args.iter().filter(|a| a.typ == Type::FunctionLike) {
                if let Some(b) = block.as_ref() {
                    self.label_block(b)?;
                }
            }
        }
        if let Some(existing) = code.checksum(r).and_then(|sum| self.labels.get(sum)) {
            return Ok(existing.clone());
        }

        let (id, function) = match chunk {
            Chunk::Primitive { .. } => return Ok(String::new()),
            Chunk::Property { id, .. } => return Ok(format!("props.{id}")),
            Chunk::Function { id, function } => (id.as_str(), function),
        };

        let parent = match function.binding {
            Some(b) if !b.is_block() => self.create_label(b)?,
            _ => String::new(),
        };

        if id == "[]" {
            let Some(arg) = function.args.first() else {
                return Err(CompileError::invalid("don't know how to extract label data from array access"));
            };
            let idx = match (&arg.typ, &arg.value) {
                (Type::Int, PrimitiveValue::Int(i)) => i.to_string(),
                (Type::String, PrimitiveValue::String(s)) => s.clone(),
                (Type::Ref, PrimitiveValue::Ref(target)) => self.value_label(*target)?,
                _ => return Err(CompileError::invalid("don't know how to extract label data from array access")),
            };
            return Ok(format!("{parent}[{idx}]"));
        }

        if id == "{}" || id == "${}" {
            return Ok(parent);
        }

        if let Some(op) = comparable_operator(id).or_else(|| arithmetic_operator(id)) {
            let left = match function.binding {
                Some(b) if parent.is_empty() => self.value_label(b)?,
                _ => parent,
            };
            let right = match function.args.first() {
                Some(arg) if arg.is_ref() => match arg.as_ref() {
                    Some(target) => self.value_label(target)?,
                    None => String::new(),
                },
                Some(arg) => primitive_label(self.bundle, arg),
                None => String::new(),
            };
            return Ok(format!("{left} {op} {right}"));
        }

        if parent.is_empty() {
            return Ok(id.to_string());
        }
        Ok(format!("{parent}.{id}"))
    }

    /// The label of a chunk, or its constant value if it has none.
    fn value_label(&mut self, r: Ref) -> Result<String, CompileError> {
        let label = self.create_label(r)?;
        if !label.is_empty() {
            return Ok(label);
        }
        let bundle: &'b CodeBundle = self.bundle;
        match bundle.code.chunk(r) {
            Some(Chunk::Primitive { primitive, .. }) => match primitive.as_ref().filter(|_| primitive.is_ref()) {
                Some(target) if target != r => self.value_label(target),
                _ => Ok(primitive_label(bundle, primitive)),
            },
            _ => Ok(label),
        }
    }
}

/// Display form of a constant.
pub fn primitive_label(bundle: &CodeBundle, p: &Primitive) -> String {
    match &p.value {
        PrimitiveValue::None => match p.typ {
            Type::Nil | Type::Bool | Type::Int | Type::Float | Type::String | Type::Regex => "null".into(),
            _ => String::new(),
        },
        PrimitiveValue::Bool(b) => b.to_string(),
        PrimitiveValue::Int(i) if *i == i64::MAX => "Infinity".into(),
        PrimitiveValue::Int(i) if *i == i64::MIN => "-Infinity".into(),
        PrimitiveValue::Int(i) => i.to_string(),
        PrimitiveValue::Float(f) if f.is_infinite() => {
            if *f > 0.0 {
                "Infinity".into()
            } else {
                "-Infinity".into()
            }
        }
        PrimitiveValue::Float(f) => format!("{f:.6}"),
        PrimitiveValue::String(s) if p.typ == Type::Regex => format!("/{s}/"),
        PrimitiveValue::String(s) => format!("{s:?}"),
        PrimitiveValue::Ref(r) if p.typ == Type::Ref => bundle.label(*r).unwrap_or_default().to_string(),
        PrimitiveValue::Ref(_) => String::new(),
        PrimitiveValue::Array(items) if items.is_empty() => "[]".into(),
        PrimitiveValue::Array(_) => "[..]".into(),
        PrimitiveValue::Map(entries) if entries.is_empty() => "{}".into(),
        PrimitiveValue::Map(_) => "{..}".into(),
        PrimitiveValue::Time(_) if p.is_never() => "Never".into(),
        PrimitiveValue::Time(_) => "<...>".into(),
    }
}

/// Decomposes the label and keeps printable ASCII only.
fn sanitize(label: &str) -> String {
    label.nfkd().filter(|c| (' '..='~').contains(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompilerConfig, FeatureSet};
    use crate::schema::testutil::test_schema;
    use std::sync::Arc;

    fn compile(src: &str) -> CodeBundle {
        let cfg = CompilerConfig::new(Arc::new(test_schema()), FeatureSet::default());
        match crate::compile(src, &BTreeMap::new(), &cfg) {
            Ok(b) => b,
            Err(e) => panic!("{src}: {e}"),
        }
    }

    fn labels(b: &CodeBundle) -> BTreeSet<&str> {
        b.labels.values().map(String::as_str).collect()
    }

    #[test]
    fn test_comparison_labels() {
        let b = compile("mondoo.version == 'yo'");
        assert_eq!(b.labels.len(), 2);
        assert_eq!(labels(&b), BTreeSet::from(["mondoo.version", "mondoo.version == \"yo\""]));
    }

    #[test]
    fn test_field_chain_labels() {
        let b = compile("sshd.config.params");
        assert_eq!(labels(&b), BTreeSet::from(["sshd.config.params"]));
    }

    #[test]
    fn test_constructor_args_are_not_labeled() {
        let b = compile("sshd.config(\"/my/path\").params");
        assert_eq!(labels(&b), BTreeSet::from(["sshd.config.params"]));
    }

    #[test]
    fn test_accessor_and_block_labels() {
        let b = compile("users.list[0] { uid }");
        assert_eq!(labels(&b), BTreeSet::from(["users.list[0]", "uid"]));
    }

    #[test]
    fn test_static_values_label_themselves() {
        let b = compile("1 + 2");
        let ep = b.code.entrypoints()[0];
        assert_eq!(b.label(ep), Some("1 + 2"));

        let b = compile("mondoo.version != /x.y/");
        let ep = b.code.entrypoints()[0];
        assert_eq!(b.label(ep), Some("mondoo.version != /x.y/"));
    }

    #[test]
    fn test_compile_time_labels_win() {
        let b = compile("users.list.all(uid > 0)");
        let ep = b.code.entrypoints()[0];
        assert_eq!(b.label(ep), Some("[].all()"));
        // the per-entry check is labeled inside its block
        assert!(labels(&b).contains("uid > 0"));
    }

    #[test]
    fn test_dict_keys_in_brackets() {
        let b = compile("json('x').params.a");
        let ep = b.code.entrypoints()[0];
        assert_eq!(b.label(ep), Some("json.params[a]"));
    }

    #[test]
    fn test_primitive_labels() {
        let b = CodeBundle::new();
        assert_eq!(primitive_label(&b, &Primitive::nil()), "null");
        assert_eq!(primitive_label(&b, &Primitive::float(1.5)), "1.500000");
        assert_eq!(primitive_label(&b, &Primitive::int(i64::MAX)), "Infinity");
        assert_eq!(primitive_label(&b, &Primitive::string("a\"b")), "\"a\\\"b\"");
        assert_eq!(primitive_label(&b, &Primitive::never()), "Never");
        assert_eq!(primitive_label(&b, &Primitive::array(vec![], Type::Int)), "[]");
        assert_eq!(primitive_label(&b, &Primitive::array(vec![Primitive::int(1)], Type::Int)), "[..]");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("caf\u{e9}"), "cafe");
        assert_eq!(sanitize("a\tb\u{7}"), "ab");
        assert_eq!(sanitize("plain"), "plain");
        assert_eq!(sanitize("x\u{65e5}\u{672c}"), "x");
        assert_eq!(sanitize("\u{fb01}le \u{2460}"), "file 1");
    }
}
