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

//! Array builtins that take a function block: filters, quantifiers, `map`.
//!
//! Quantifiers are built out of filters. `all` keeps the entries that fail
//! the check (`$whereNot`) and asserts that none are left; `any`, `one` and
//! `none` filter with `where` and count what is left.

use crate::assertions;
use crate::ast::{Arg, Call};
use crate::bytecode::{Chunk, Primitive, Ref};
use crate::compiler::{CompileError, Compiler, Frame};
use crate::types::Type;

/// The single block argument of a filter-like call. `None` for an empty
/// call such as `where()`.
pub(crate) fn single_block_arg<'a>(id: &str, call: Option<&'a Call>) -> Result<Option<&'a Arg>, CompileError> {
    let Some(args) = call.and_then(Call::args) else {
        return Err(CompileError::invalid(format!("missing filter argument for calling '{id}'")));
    };
    match args {
        [] => Ok(None),
        [arg] => Ok(Some(arg)),
        _ => Err(CompileError::invalid(format!(
            "too many arguments when calling '{id}', only 1 is supported"
        ))),
    }
}

/// A block without any reference to its binding (`where(123)`) compares
/// each entry with the block's value.
pub(crate) fn add_implicit_equality(
    c: &mut Compiler<'_>,
    block: Ref,
    child: &Type,
    bound: Ref,
    id: &str,
) -> Result<(), CompileError> {
    let code = &c.bundle.code;
    let value = code.tail_ref(block);
    let block_typ = code.dereferenced_block_type(block);

    let mut op = format!("=={}", child.label());
    if block_typ != *child {
        op = format!("=={}", block_typ.label());
        if !c.config.operations.supports(child, &op) {
            return Err(CompileError::invalid(format!(
                "called '{id}' with wrong type; either provide a type {} value or write it as an expression (e.g. \"_ == 123\")",
                child.label()
            )));
        }
    }

    let r = c
        .bundle
        .code
        .add_chunk(block, Chunk::function(op, Type::Bool, Some(bound), vec![Primitive::reference(value)]));
    if let Some(b) = c.bundle.code.block_mut(block) {
        b.entrypoints = vec![r];
    }
    Ok(())
}

/// Filters with a per-entry block. Used for `where` and `$whereNot`.
pub(crate) fn compile_where(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    let Some(arg) = single_block_arg(id, call)? else {
        return Ok(typ.clone());
    };
    if arg.name.is_some() {
        return Err(CompileError::invalid(format!(
            "called '{id}' with a named parameter, which is not supported"
        )));
    }

    let refs = c.block_expressions(frame, std::slice::from_ref(&arg.value), typ, r, "_")?;
    let Some(block) = refs.block else {
        return Err(CompileError::invalid(format!("called '{id}' without a function block")));
    };
    if refs.standalone {
        add_implicit_equality(c, block, &typ.child(), block.with_slot(1), id)?;
    }

    let args = c.closure_args(frame, refs.binding, block, &refs.deps);
    c.add_chunk(frame, Chunk::function(id, typ.clone(), Some(refs.binding), args));
    Ok(typ.clone())
}

pub fn compile_array_where(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_where(c, frame, typ, r, id, call)
}

pub fn compile_array_duplicates(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    let args = call.and_then(Call::args).unwrap_or_default();
    match args {
        [] => {
            if !typ.child().is_basic() {
                return Err(CompileError::invalid(
                    "cannot extract duplicates from array, must be a basic type. Try using a field argument.",
                ));
            }
            c.add_chunk(frame, Chunk::function(id, typ.clone(), Some(r), vec![]));
            Ok(typ.clone())
        }
        [arg] => {
            let refs = c.block_expressions(frame, std::slice::from_ref(&arg.value), typ, r, "_")?;
            let Some(block) = refs.block else {
                return Err(CompileError::invalid(format!("called '{id}' without a field name")));
            };
            if refs.standalone {
                return Err(CompileError::invalid(
                    "called duplicates with a field name on an invalid type",
                ));
            }
            let args = c.closure_args(frame, refs.binding, block, &refs.deps);
            c.add_chunk(frame, Chunk::function("fieldDuplicates", typ.clone(), Some(refs.binding), args));
            Ok(typ.clone())
        }
        _ => Err(CompileError::invalid(format!(
            "too many arguments when calling '{id}', only 1 is supported"
        ))),
    }
}

/// `contains(cond)` is `where(cond).length > 0`.
pub fn compile_array_contains(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    _id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_where(c, frame, typ, r, "where", call)?;
    let filtered = c.tail_ref(frame);
    let length = c.add_chunk(frame, Chunk::function("length", Type::Int, Some(filtered), vec![]));
    let res = c.add_chunk(frame, Chunk::function(">int", Type::Bool, Some(length), vec![Primitive::int(0)]));
    c.set_label(res, "[].contains()");
    Ok(Type::Bool)
}

/// Set checks against a literal list: the runtime computes the offending
/// entries with `method`, which must come back empty.
fn compile_set_check(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
    method: &str,
) -> Result<Type, CompileError> {
    let args = call.and_then(Call::args).unwrap_or_default();
    let [arg] = args else {
        return Err(CompileError::invalid(format!("function {id} needs one argument (array)")));
    };

    let value = c.compile_expression(frame, &arg.value)?;
    let value_typ = c.dereference_type(&value)?;
    let loose = *typ == Type::Dict || value_typ == Type::Dict;
    if value_typ != *typ && !loose {
        return Err(CompileError::invalid(format!(
            "types don't match for calling contains (got: {}, expected: {})",
            value_typ.label(),
            typ.label()
        )));
    }

    let diff = c.add_chunk(frame, Chunk::function(method, typ.clone(), Some(r), vec![value]));
    let empty = Primitive::array(Vec::new(), typ.child());
    let res = c.add_chunk(frame, Chunk::function("==", Type::Bool, Some(diff), vec![empty]));
    c.set_label(res, format!("[].{id}()"));
    Ok(Type::Bool)
}

pub fn compile_array_contains_only(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_set_check(c, frame, typ, r, id, call, "difference")
}

pub fn compile_array_contains_all(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_set_check(c, frame, typ, r, id, call, "containsAll")
}

pub fn compile_array_contains_none(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_set_check(c, frame, typ, r, id, call, "containsNone")
}

/// Shared shape of `all`, `any`, `one` and `none` on arrays.
fn compile_quantifier(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    call: Option<&Call>,
    check: &str,
) -> Result<Type, CompileError> {
    let filter = if check == "$all" { "$whereNot" } else { "where" };
    compile_where(c, frame, typ, r, filter, call)?;
    let list = c.tail_ref(frame);

    let (all_ref, failed_ref) = match check {
        "$any" => (r, r),
        _ => (r, list),
    };
    let msg = assertions::compile_list_assertion_msg(c, frame, typ, all_ref, failed_ref, list)?;

    let res = c.add_chunk(frame, Chunk::function(check, Type::Bool, Some(list), vec![]));
    if let Some(msg) = msg {
        let sum = c.checksum_of(res);
        c.bundle.assertions.insert(sum, msg);
    }
    c.set_label(res, format!("[].{}()", &check[1..]));
    Ok(Type::Bool)
}

pub fn compile_array_all(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_quantifier(c, frame, typ, r, call, "$all")
}

pub fn compile_array_any(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_quantifier(c, frame, typ, r, call, "$any")
}

pub fn compile_array_one(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_quantifier(c, frame, typ, r, call, "$one")
}

pub fn compile_array_none(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_quantifier(c, frame, typ, r, call, "$none")
}

pub fn compile_array_map(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    let Some(arg) = single_block_arg(id, call)? else {
        return Ok(typ.clone());
    };
    if arg.name.is_some() {
        return Err(CompileError::invalid(format!(
            "called '{id}' with a named parameter, which is not supported"
        )));
    }

    let refs = c.block_expressions(frame, std::slice::from_ref(&arg.value), typ, r, "_")?;
    let Some(block) = refs.block else {
        return Err(CompileError::invalid(format!("called '{id}' without a function block")));
    };
    let entrypoints = c.bundle.code.block(block).map_or(0, |b| b.entrypoints.len());
    if entrypoints != 1 {
        return Err(CompileError::invalid(format!(
            "called '{id}' with a bad function block, you can only return 1 value"
        )));
    }

    let mapped = Type::array(c.bundle.code.dereferenced_block_type(block));
    let args = c.closure_args(frame, refs.binding, block, &refs.deps);
    c.add_chunk(frame, Chunk::function(id, mapped.clone(), Some(refs.binding), args));
    Ok(mapped)
}

pub fn compile_array_flat(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    if call.and_then(Call::args).is_some_and(|a| !a.is_empty()) {
        return Err(CompileError::invalid(format!("function {id} does not take arguments")));
    }
    let child = typ.child();
    let res = if child.is_array() {
        Type::array(child.child())
    } else {
        typ.clone()
    };
    c.add_chunk(frame, Chunk::function(id, res.clone(), Some(r), vec![]));
    Ok(res)
}
