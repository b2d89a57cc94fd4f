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

//! Builtins on list resources (`users.where(...)`, `packages.length`).
//!
//! The filters keep the resource type, so `users.where(..)` is still a
//! `users` and can be filtered again. The entries are read through the
//! resource's `list` field.

use crate::assertions;
use crate::ast::Call;
use crate::builtin_array::single_block_arg;
use crate::bytecode::{Chunk, Primitive, Ref};
use crate::compiler::{CompileError, Compiler, Frame};
use crate::types::Type;

/// Element type of a list resource.
fn list_resource(c: &Compiler<'_>, typ: &Type, id: &str) -> Result<Type, CompileError> {
    let name = typ.resource_name().unwrap_or_default();
    let Some(info) = c.config.schema.lookup(name) else {
        return Err(CompileError::invalid(format!(
            "failed to compile {id}: cannot find resource '{name}'"
        )));
    };
    info.list_type.clone().ok_or_else(|| {
        CompileError::invalid(format!("failed to compile {id}: resource '{name}' is not a list type"))
    })
}

fn add_list(c: &mut Compiler<'_>, frame: &Frame, list_typ: &Type, binding: Ref) -> Ref {
    c.add_chunk(frame, Chunk::function("list", Type::array(list_typ.clone()), Some(binding), vec![]))
}

fn no_args(id: &str, call: Option<&Call>) -> Result<(), CompileError> {
    if call.and_then(Call::args).is_some_and(|a| !a.is_empty()) {
        return Err(CompileError::invalid(format!("function {id} does not take arguments")));
    }
    Ok(())
}

/// A block run on every entry of the list resource at `r`. Emits `id`
/// bound to the resource with the list, the block and its dependencies as
/// arguments. `None` when called without a block.
fn compile_list_block(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
    result: impl FnOnce(&Compiler<'_>, Ref) -> Type,
) -> Result<Option<Type>, CompileError> {
    let list_typ = list_resource(c, typ, id)?;
    let Some(arg) = single_block_arg(id, call)? else {
        return Ok(None);
    };
    if arg.name.is_some() {
        return Err(CompileError::invalid(format!(
            "called '{id}' function with a named parameter, which is not supported"
        )));
    }

    let array = Type::array(list_typ.clone());
    let refs = c.block_expressions(frame, std::slice::from_ref(&arg.value), &array, r, "_")?;
    let Some(block) = refs.block else {
        return Err(CompileError::invalid(format!("called '{id}' clause without a function block")));
    };
    let typ = result(&*c, block);

    let list = add_list(c, frame, &list_typ, r);
    let args = c.closure_args(frame, list, block, &refs.deps);
    c.add_chunk(frame, Chunk::function(id, typ.clone(), Some(r), args));
    Ok(Some(typ))
}

pub fn compile_resource_where(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    let name = typ.clone();
    let res = compile_list_block(c, frame, typ, r, id, call, |_, _| name)?;
    Ok(res.unwrap_or_else(|| typ.clone()))
}

pub fn compile_resource_map(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    let res = compile_list_block(c, frame, typ, r, id, call, |c, block| {
        Type::array(c.bundle.code.dereferenced_block_type(block))
    })?;
    Ok(res.unwrap_or_else(|| typ.clone()))
}

/// `contains(cond)` is `where(cond).list.length > 0`.
pub fn compile_resource_contains(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    _id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_resource_where(c, frame, typ, r, "where", call)?;
    let list_typ = list_resource(c, typ, "contains")?;
    let filtered = c.tail_ref(frame);
    let list = add_list(c, frame, &list_typ, filtered);
    let length = c.add_chunk(frame, Chunk::function("length", Type::Int, Some(list), vec![]));
    let res = c.add_chunk(frame, Chunk::function(">int", Type::Bool, Some(length), vec![Primitive::int(0)]));
    c.set_label(res, format!("{}.contains()", typ.label()));
    Ok(Type::Bool)
}

fn compile_resource_quantifier(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    call: Option<&Call>,
    check: &str,
) -> Result<Type, CompileError> {
    let filter = if check == "$all" { "$whereNot" } else { "where" };
    compile_resource_where(c, frame, typ, r, filter, call)?;
    let filtered = c.tail_ref(frame);

    let list_typ = list_resource(c, typ, &check[1..])?;
    let list = add_list(c, frame, &list_typ, filtered);
    let array = Type::array(list_typ);
    let failed = if check == "$any" { r } else { list };
    let msg = assertions::compile_list_assertion_msg(c, frame, &array, r, failed, list)?;

    let res = c.add_chunk(frame, Chunk::function(check, Type::Bool, Some(list), vec![]));
    if let Some(msg) = msg {
        let sum = c.checksum_of(res);
        c.bundle.assertions.insert(sum, msg);
    }
    c.set_label(res, format!("{}.{}()", typ.label(), &check[1..]));
    Ok(Type::Bool)
}

pub fn compile_resource_all(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_resource_quantifier(c, frame, typ, r, call, "$all")
}

pub fn compile_resource_any(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_resource_quantifier(c, frame, typ, r, call, "$any")
}

pub fn compile_resource_one(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_resource_quantifier(c, frame, typ, r, call, "$one")
}

pub fn compile_resource_none(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_resource_quantifier(c, frame, typ, r, call, "$none")
}

/// Number of entries. Bound to the resource, with its list as argument.
pub fn compile_resource_length(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    no_args(id, call)?;
    let list_typ = list_resource(c, typ, id)?;
    let list = add_list(c, frame, &list_typ, r);
    c.add_chunk(frame, Chunk::function(id, Type::Int, Some(r), vec![Primitive::reference(list)]));
    Ok(Type::Int)
}

/// `first` and `last` entries.
pub fn compile_resource_child_access(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    no_args(id, call)?;
    let list_typ = list_resource(c, typ, id)?;
    let list = add_list(c, frame, &list_typ, r);
    c.add_chunk(frame, Chunk::function(id, list_typ.clone(), Some(list), vec![]));
    Ok(list_typ)
}

pub fn compile_resource_sample(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    let list_typ = list_resource(c, typ, id)?;
    let args = call.and_then(Call::args).unwrap_or_default();
    let [arg] = args else {
        return Err(CompileError::invalid(format!(
            "function {id} needs one argument (int), got {}",
            args.len()
        )));
    };
    let value = c.compile_expression(frame, &arg.value)?;
    let vt = c.dereference_type(&value)?;
    if vt != Type::Int {
        return Err(CompileError::invalid(format!(
            "incorrect argument 1 for {id}: expected int got {}",
            vt.label()
        )));
    }

    let array = Type::array(list_typ.clone());
    let list = add_list(c, frame, &list_typ, r);
    c.add_chunk(frame, Chunk::function(id, array.clone(), Some(list), vec![value]));
    Ok(array)
}

/// `== empty` and `!= empty`. List resources compare their entries, all
/// other resources compare themselves.
pub fn compile_resource_cmp_empty(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    _call: Option<&Call>,
) -> Result<Type, CompileError> {
    let binding = match c.list_type(typ) {
        Some(list_typ) => add_list(c, frame, &list_typ, r),
        None => r,
    };
    c.add_chunk(frame, Chunk::function(id, Type::Bool, Some(binding), vec![Primitive::empty()]));
    Ok(Type::Bool)
}
