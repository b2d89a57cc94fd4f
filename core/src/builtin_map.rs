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

//! Map and dict builtins that take a function block.
//!
//! The block receives two arguments, `key` and `value`. `_` refers to the
//! value.

use crate::assertions;
use crate::ast::Call;
use crate::builtin_array::{add_implicit_equality, single_block_arg};
use crate::bytecode::{Chunk, Primitive, Ref};
use crate::compiler::{CompileError, Compiler, Frame, Variable};
use crate::types::Type;

/// Runs the call's block on every key/value pair and emits `id` bound to
/// `r`. A standalone block on a dict is compared against each value.
fn compile_keyed_query(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
    implicit_equality: bool,
) -> Result<Type, CompileError> {
    let Some(arg) = single_block_arg(id, call)? else {
        return Ok(typ.clone());
    };

    let (key_typ, value_typ) = match typ {
        Type::Dict => (Type::Dict, Type::Dict),
        t => (t.key(), t.child()),
    };
    let sum = c.checksum_of(r);

    let mut child = c.new_block_frame(frame, None);
    let key = c
        .bundle
        .code
        .add_argument_placeholder(child.block_ref, key_typ.clone(), sum.clone());
    let value = c
        .bundle
        .code
        .add_argument_placeholder(child.block_ref, value_typ.clone(), sum);

    let marks = Some(child.scope);
    c.add_var(
        &child,
        "key",
        Variable {
            marks,
            ..Variable::named("key", key, key_typ)
        },
    );
    c.add_var(
        &child,
        "value",
        Variable {
            marks,
            ..Variable::named("value", value, value_typ.clone())
        },
    );

    let binding = Variable {
        marks,
        ..Variable::bound(value, value_typ.clone())
    };
    c.add_var(&child, "_", binding.clone());
    child.binding = Some(binding);
    if let Some(name) = arg.name.as_deref().filter(|n| *n != "_") {
        c.add_var(
            &child,
            name,
            Variable {
                marks,
                ..Variable::named(name, value, value_typ.clone())
            },
        );
    }

    c.compile_expressions(&mut child, std::slice::from_ref(&arg.value))?;
    c.update_entrypoints(&child, false);

    let block = child.block_ref;
    if implicit_equality && c.is_standalone(&child) {
        add_implicit_equality(c, block, &value_typ, block.with_slot(2), id)?;
    }

    let deps: Vec<Ref> = child.deps.iter().copied().filter(|d| d.block != block.block).collect();
    let args = c.closure_args(frame, r, block, &deps);
    c.add_chunk(frame, Chunk::function(id, typ.clone(), Some(r), args));
    Ok(typ.clone())
}

pub fn compile_dict_where(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_keyed_query(c, frame, typ, r, id, call, true)
}

/// `recurse(cond)` walks nested dicts and collects every value matching
/// the condition.
pub fn compile_dict_recurse(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    _id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_keyed_query(c, frame, typ, r, "recurse", call, true)
}

pub fn compile_map_where(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_keyed_query(c, frame, typ, r, id, call, false)
}

#[allow(clippy::too_many_arguments)]
fn compile_keyed_quantifier(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    call: Option<&Call>,
    check: &str,
    label: &str,
    implicit_equality: bool,
) -> Result<Type, CompileError> {
    let filter = if check == "$all" { "$whereNot" } else { "where" };
    compile_keyed_query(c, frame, typ, r, filter, call, implicit_equality)?;
    let list = c.tail_ref(frame);

    let msg = assertions::compile_list_assertion_msg(c, frame, typ, r, list, list)?;
    let res = c.add_chunk(frame, Chunk::function(check, Type::Bool, Some(list), vec![]));
    if let Some(msg) = msg {
        let sum = c.checksum_of(res);
        c.bundle.assertions.insert(sum, msg);
    }
    c.set_label(res, label);
    Ok(Type::Bool)
}

fn compile_map_quantifier(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    call: Option<&Call>,
    check: &str,
    label: &str,
) -> Result<Type, CompileError> {
    compile_keyed_quantifier(c, frame, typ, r, call, check, label, false)
}

/// On dicts, `contains(cond)` filters the entries and checks that something
/// is left: `where.length != 0 && dict != nil`.
pub fn compile_dict_contains(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    _id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_keyed_query(c, frame, typ, r, "where", call, true)?;
    let filtered = c.tail_ref(frame);
    let length = c.add_chunk(frame, Chunk::function("length", Type::Int, Some(filtered), vec![]));
    let not_empty = c.add_chunk(frame, Chunk::function("!=int", Type::Bool, Some(length), vec![Primitive::int(0)]));
    let not_nil = c.add_chunk(frame, Chunk::function("!=nil", Type::Bool, Some(r), vec![Primitive::nil()]));
    let res = c.add_chunk(
        frame,
        Chunk::function("&&bool", Type::Bool, Some(not_nil), vec![Primitive::reference(not_empty)]),
    );
    c.set_label(res, "[].contains()");
    Ok(Type::Bool)
}

pub fn compile_dict_all(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_keyed_quantifier(c, frame, typ, r, call, "$all", "[].all()", true)
}

pub fn compile_dict_any(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_keyed_quantifier(c, frame, typ, r, call, "$any", "[].any()", true)
}

pub fn compile_dict_one(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_keyed_quantifier(c, frame, typ, r, call, "$one", "[].one()", true)
}

pub fn compile_dict_none(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_keyed_quantifier(c, frame, typ, r, call, "$none", "[].none()", true)
}

/// On maps, `contains(cond)` asserts that any entry matches.
pub fn compile_map_contains(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    r: Ref,
    _id: &str,
    call: Option<&Call>,
) -> Result<Type, CompileError> {
    compile_map_quantifier(c, frame, typ, r, call, "$any", "[].contains()")
}

pub fn compile_map_all(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_map_quantifier(c, frame, typ, r, call, "$all", "[].all()")
}

pub fn compile_map_one(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_map_quantifier(c, frame, typ, r, call, "$one", "[].one()")
}

pub fn compile_map_none(c: &mut Compiler<'_>, frame: &mut Frame, typ: &Type, r: Ref, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_map_quantifier(c, frame, typ, r, call, "$none", "[].none()")
}

#[cfg(test)]
mod tests {
    use crate::bytecode::{CodeBundle, Primitive, Ref};
    use crate::compiler::CompileFailure;
    use crate::config::{CompilerConfig, FeatureSet};
    use crate::schema::testutil::test_schema;
    use crate::types::Type;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn compile(src: &str) -> Result<CodeBundle, CompileFailure> {
        let cfg = CompilerConfig::new(Arc::new(test_schema()), FeatureSet::default());
        crate::compile(src, &BTreeMap::new(), &cfg)
    }

    fn ids(b: &CodeBundle, block: usize) -> Vec<String> {
        b.code.blocks[block].chunks.iter().map(|c| c.id().to_string()).collect()
    }

    #[test]
    fn test_map_where_binds_key_and_value() {
        let b = compile("sshd.config.params.where(key == 'A' && value != 'no')").unwrap();
        let ep = b.code.entrypoints()[0];
        let chunk = b.code.chunk(ep).unwrap();
        assert_eq!(chunk.id(), "where");
        let params = Type::map(Type::String, Type::String);
        assert_eq!(chunk.typ(), params);

        let inner = &b.code.blocks[1];
        assert_eq!(inner.parameters, 2);
        assert_eq!(inner.chunks[0].typ(), Type::String);
        assert_eq!(inner.chunks[1].typ(), Type::String);
        // both placeholders carry the checksum of the map itself
        let map_ref = chunk.as_function().unwrap().binding.unwrap();
        let sum = b.code.checksum(map_ref).unwrap();
        assert_eq!(b.code.checksum(Ref::slot_of(2, 1)), Some(sum));
        assert_eq!(b.code.checksum(Ref::slot_of(2, 2)), Some(sum));

        let args = &chunk.as_function().unwrap().args;
        assert_eq!(args[0], Primitive::reference(map_ref));
        assert_eq!(args[1], Primitive::function(Ref::binding_of(2)));
    }

    #[test]
    fn test_underscore_is_the_value() {
        let b = compile("sshd.config.params.where(_ == 'yes')").unwrap();
        let inner = &b.code.blocks[1];
        let cmp = b.code.chunk(inner.entrypoints[0]).unwrap();
        assert_eq!(cmp.id(), "==string");
        assert_eq!(cmp.as_function().unwrap().binding, Some(Ref::slot_of(2, 2)));
    }

    #[test]
    fn test_dict_where_standalone_compares_values() {
        let b = compile("json('x').params.where('a')").unwrap();
        assert!(ids(&b, 1).contains(&"==string".to_string()));
        let inner = &b.code.blocks[1];
        let cmp = b.code.chunk(inner.entrypoints[0]).unwrap();
        assert_eq!(cmp.as_function().unwrap().binding, Some(Ref::slot_of(2, 2)));
    }

    #[test]
    fn test_dict_recurse() {
        let b = compile("json('x').params.recurse(value == 1)").unwrap();
        let ep = b.code.entrypoints()[0];
        assert_eq!(b.code.chunk(ep).unwrap().id(), "recurse");
        assert_eq!(b.code.chunk(ep).unwrap().typ(), Type::Dict);
    }

    #[test]
    fn test_map_quantifiers() {
        for (src, check, label) in [
            ("sshd.config.params.all(value != '')", "$all", "[].all()"),
            ("sshd.config.params.one(key == 'A')", "$one", "[].one()"),
            ("sshd.config.params.none(key == 'A')", "$none", "[].none()"),
            ("sshd.config.params.contains(key == 'A')", "$any", "[].contains()"),
        ] {
            let b = compile(src).unwrap();
            let ep = b.code.entrypoints()[0];
            let res = b.code.chunk(ep).unwrap();
            assert_eq!(res.id(), check, "{src}");
            assert_eq!(b.label(ep), Some(label), "{src}");
            let filter = b.code.chunk(res.as_function().unwrap().binding.unwrap()).unwrap();
            let expected = if check == "$all" { "$whereNot" } else { "where" };
            assert_eq!(filter.id(), expected, "{src}");
        }
    }

    #[test]
    fn test_dict_quantifiers_bind_key_and_value() {
        for (src, check, filter, label) in [
            ("json('x').params.all(value != '')", "$all", "$whereNot", "[].all()"),
            ("json('x').params.any(key == 'a')", "$any", "where", "[].any()"),
            ("json('x').params.one(value == 1)", "$one", "where", "[].one()"),
            ("json('x').params.none(key == 'a')", "$none", "where", "[].none()"),
        ] {
            let b = compile(src).unwrap();
            let ep = b.code.entrypoints()[0];
            let res = b.code.chunk(ep).unwrap();
            assert_eq!(res.id(), check, "{src}");
            assert_eq!(b.label(ep), Some(label), "{src}");
            let list = b.code.chunk(res.as_function().unwrap().binding.unwrap()).unwrap();
            assert_eq!(list.id(), filter, "{src}");

            let inner = &b.code.blocks[1];
            assert_eq!(inner.parameters, 2, "{src}");
            assert!(!ids(&b, 1).contains(&"[]".to_string()), "{src}");
        }
    }

    #[test]
    fn test_dict_all_matches_where_block() {
        let filtered = compile("json('x').params.where(value != '')").unwrap();
        let all = compile("json('x').params.all(value != '')").unwrap();
        assert_eq!(ids(&all, 1), ids(&filtered, 1));
        let cmp = all.code.chunk(all.code.blocks[1].entrypoints[0]).unwrap();
        assert_eq!(cmp.as_function().unwrap().binding, Some(Ref::slot_of(2, 2)));
    }

    #[test]
    fn test_dict_contains() {
        let b = compile("json('x').params.contains(key == 'a')").unwrap();
        let top = ids(&b, 0);
        assert!(top.ends_with(&["where", "length", "!=int", "!=nil", "&&bool"].map(String::from)), "{top:?}");
        let slot = |id: &str| Ref::slot_of(1, top.iter().position(|x| x == id).unwrap() as u32 + 1);

        let ep = b.code.entrypoints()[0];
        assert_eq!(ep, slot("&&bool"));
        assert_eq!(b.label(ep), Some("[].contains()"));
        let and = b.code.chunk(ep).unwrap().as_function().unwrap();
        assert_eq!(and.binding, Some(slot("!=nil")));
        assert_eq!(and.args, vec![Primitive::reference(slot("!=int"))]);
        // the nil check is on the dict, not on the filtered list
        let not_nil = b.code.chunk(slot("!=nil")).unwrap().as_function().unwrap();
        assert_eq!(not_nil.binding, Some(slot("params")));
        assert_eq!(not_nil.args, vec![Primitive::nil()]);
        assert_eq!(b.code.blocks[1].parameters, 2);
    }

    #[test]
    fn test_dict_all_standalone_compares_values() {
        let b = compile("json('x').params.all('a')").unwrap();
        assert!(ids(&b, 1).contains(&"==string".to_string()));
    }

    #[test]
    fn test_named_binding() {
        let b = compile("sshd.config.params.where(v: v == 'x')").unwrap();
        let inner = &b.code.blocks[1];
        let cmp = b.code.chunk(inner.entrypoints[0]).unwrap();
        assert_eq!(cmp.id(), "==string");
    }

    #[test]
    fn test_outer_variables_become_args() {
        let b = compile("x = 'A'\nsshd.config.params.where(key == x)").unwrap();
        let ep = b.code.entrypoints()[0];
        let args = &b.code.chunk(ep).unwrap().as_function().unwrap().args;
        assert!(args.contains(&Primitive::reference(Ref::slot_of(1, 1))));
    }
}
