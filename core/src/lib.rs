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

pub mod assertions;
pub mod ast;
pub mod builtin_array;
pub mod builtin_map;
pub mod builtin_resource;
pub mod builtins;
pub mod bytecode;
pub mod checksum;
pub mod compiler;
pub mod config;
mod dedent;
mod expand;
pub mod invariants;
pub mod labels;
pub mod lexer;
pub mod operations;
pub mod operators;
pub mod parser;
pub mod schema;
pub mod suggestions;
pub mod types;

pub use bytecode::{CodeBundle, Primitive, Ref};
pub use compiler::{CompileError, CompileFailure};
pub use config::{CompilerConfig, Feature, FeatureSet};
pub use dedent::dedent;
pub use invariants::Invariants;
pub use schema::{ResourceSchema, Schema};

use ast::Ast;
use compiler::Compiler;
use std::collections::BTreeMap;

/// Compiles a parsed program. Labels and assertion checksums are not
/// resolved; use [`compile`] for a finished bundle.
pub fn compile_ast(
    ast: &Ast,
    props: &BTreeMap<String, Primitive>,
    config: &CompilerConfig,
) -> Result<CodeBundle, CompileFailure> {
    let mut c = Compiler::new(config, props);
    let mut frame = c.root_frame();
    match c.compile_parsed(&mut frame, ast) {
        Ok(()) => Ok(c.into_bundle()),
        Err(err) => Err(CompileFailure::new(err, Some(c.into_bundle()))),
    }
}

/// Compiles a query into a labeled bundle.
///
/// The source is dedented first so indentation does not change checksums.
/// On a syntax error the partial program is still compiled and its bundle
/// returned with the error, so editors get suggestions.
pub fn compile(
    source: &str,
    props: &BTreeMap<String, Primitive>,
    config: &CompilerConfig,
) -> Result<CodeBundle, CompileFailure> {
    let source = dedent(source);
    let parsed = parser::parse(&source).map_err(|e| CompileFailure::new(e.into(), None))?;

    if let Some(err) = parsed.error {
        let bundle = match compile_ast(&parsed.ast, props, config) {
            Ok(bundle) => Some(bundle),
            Err(failure) => failure.bundle.map(|b| *b),
        };
        return Err(CompileFailure::new(err.into(), bundle));
    }

    let mut bundle = compile_ast(&parsed.ast, props, config)?;
    let finish = |bundle: &mut CodeBundle| -> Result<(), CompileError> {
        labels::update_labels(bundle)?;
        assertions::update_assertions(bundle)
    };
    if let Err(err) = finish(&mut bundle) {
        return Err(CompileFailure::new(err, Some(bundle)));
    }
    bundle.source = source;

    if bundle.code.id.is_empty() {
        return Err(CompileFailure::new(CompileError::EmptyCode, Some(bundle)));
    }
    log::debug!("compiled code {} with {} blocks", bundle.code.id, bundle.code.blocks.len());
    Ok(bundle)
}
