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

//! Structural checks on finished bytecode. These catch compiler bugs; user
//! queries never trip them.

use crate::bytecode::{Chunk, CodeBundle, Ref};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invariants failed: {}", failure_list(.failures))]
pub struct InvariantError {
    pub failures: Vec<InvariantFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvariantFailure {
    pub rule: &'static str,
    pub detail: String,
}

impl fmt::Display for InvariantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.rule, self.detail)
    }
}

fn failure_list(failures: &[InvariantFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

type Rule = fn(&CodeBundle) -> Vec<String>;

pub struct Invariants {
    rules: Vec<(&'static str, Rule)>,
}

impl Invariants {
    pub fn standard() -> Self {
        Invariants {
            rules: vec![
                ("code has blocks", code_has_blocks),
                ("single value blocks have one entry or data point", single_value_blocks),
                ("entry and data points have checksums", points_have_checksums),
                ("references resolve", references_resolve),
            ],
        }
    }

    /// Runs every rule and reports all failures at once.
    pub fn check(&self, bundle: &CodeBundle) -> Result<(), InvariantError> {
        let failures: Vec<InvariantFailure> = self
            .rules
            .iter()
            .flat_map(|&(rule, f)| f(bundle).into_iter().map(move |detail| InvariantFailure { rule, detail }))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(InvariantError { failures })
    }
}

fn code_has_blocks(bundle: &CodeBundle) -> Vec<String> {
    if bundle.code.blocks.is_empty() {
        return vec!["no blocks".into()];
    }
    vec![]
}

fn single_value_blocks(bundle: &CodeBundle) -> Vec<String> {
    bundle
        .code
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.single_value && b.entrypoints.len() + b.datapoints.len() != 1)
        .map(|(i, b)| {
            format!(
                "block {} has {} entrypoints and {} datapoints",
                i + 1,
                b.entrypoints.len(),
                b.datapoints.len()
            )
        })
        .collect()
}

fn points_have_checksums(bundle: &CodeBundle) -> Vec<String> {
    let code = &bundle.code;
    code.blocks
        .iter()
        .flat_map(|b| b.entrypoints.iter().chain(&b.datapoints))
        .filter(|r| code.checksum(**r).is_none())
        .map(|r| format!("no checksum for {r}"))
        .collect()
}

fn references_resolve(bundle: &CodeBundle) -> Vec<String> {
    let code = &bundle.code;
    let mut out = Vec::new();
    let dangling = |r: &Ref| !r.is_block() && code.chunk(*r).is_none();
    for (i, block) in code.blocks.iter().enumerate() {
        for (j, chunk) in block.chunks.iter().enumerate() {
            let Chunk::Function { function, .. } = chunk else {
                continue;
            };
            let at = Ref::slot_of(i as u32 + 1, j as u32 + 1);
            if let Some(b) = function.binding.filter(|b| dangling(b)) {
                out.push(format!("{at} is bound to missing {b}"));
            }
            for target in function.args.iter().filter(|a| a.is_ref()).filter_map(|a| a.as_ref()) {
                if dangling(&target) {
                    out.push(format!("{at} refers to missing {target}"));
                }
            }
        }
        for r in block.entrypoints.iter().chain(&block.datapoints).filter(|r| dangling(r)) {
            out.push(format!("block {} points at missing {r}", i + 1));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, Primitive};
    use crate::config::{CompilerConfig, FeatureSet};
    use crate::schema::testutil::test_schema;
    use crate::types::Type;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn compile(src: &str) -> CodeBundle {
        let cfg = CompilerConfig::new(Arc::new(test_schema()), FeatureSet::default());
        match crate::compile(src, &BTreeMap::new(), &cfg) {
            Ok(b) => b,
            Err(e) => panic!("{src}: {e}"),
        }
    }

    #[test]
    fn test_compiled_queries_hold() {
        for src in [
            "mondoo.version == 'yo'",
            "users.list.all(uid > 0)",
            "users { name }",
            "sshd.config.params.where(key == 'A')",
            "if (true) { return 1 }\nreturn 2",
            "packages",
            "# @msg found ${$failed.length} bad users\nusers.list.all(uid == 0)",
        ] {
            let b = compile(src);
            assert_eq!(Invariants::standard().check(&b), Ok(()), "{src}");
        }
    }

    #[test]
    fn test_broken_single_value_block() {
        let mut b = compile("1");
        b.code.blocks[0].single_value = true;
        b.code.blocks[0].entrypoints.clear();
        let err = Invariants::standard().check(&b).unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].rule, "single value blocks have one entry or data point");
    }

    #[test]
    fn test_failures_are_aggregated() {
        let mut b = CodeBundle::new();
        b.code.blocks[0].chunks.push(Chunk::function(
            "length",
            Type::Int,
            Some(Ref::slot_of(1, 5)),
            vec![Primitive::reference(Ref::slot_of(3, 1))],
        ));
        b.code.blocks[0].entrypoints.push(Ref::slot_of(1, 1));
        let err = Invariants::standard().check(&b).unwrap_err();
        let rules: Vec<_> = err.failures.iter().map(|f| f.rule).collect();
        assert_eq!(
            rules,
            vec!["entry and data points have checksums", "references resolve", "references resolve"]
        );
        assert!(err.to_string().starts_with("invariants failed: entry and data points have checksums (no checksum for 1|1)"));
    }
}
