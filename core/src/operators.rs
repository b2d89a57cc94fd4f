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

//! Operators, keywords and type conversions.
//!
//! Binary operators arrive from the parser as calls with two unnamed
//! arguments (`==(a, b)`). Comparisons and arithmetic emit one chunk bound to
//! the left operand, with the right operand as its only argument. The chunk id
//! carries the right-hand type label (`==string`) when the runtime has that
//! overload.

use crate::assertions;
use crate::ast::{Arg, Call};
use crate::builtins::OperatorFn;
use crate::bytecode::{AssertionMessage, Chunk, Primitive, Ref};
use crate::compiler::{CompileError, Compiler, Frame, Variable};
use crate::types::Type;
use std::collections::BTreeMap;

pub fn standard_operators() -> BTreeMap<&'static str, OperatorFn> {
    let mut ops: BTreeMap<&'static str, OperatorFn> = BTreeMap::new();
    for op in ["==", "!=", "=~", "!~", ">=", ">", "<=", "<", "&&", "||"] {
        ops.insert(op, compile_comparable);
    }
    for op in ["+", "-", "*", "/", "%"] {
        ops.insert(op, compile_transformation);
    }
    ops.insert("=", compile_assignment);
    ops.insert("if", compile_if);
    ops.insert("else", compile_else);
    ops.insert("expect", compile_expect);
    ops.insert("score", compile_score);
    ops.insert("typeof", compile_typeof);
    ops.insert("switch", compile_switch);
    ops.insert("Never", compile_never);
    ops.insert("empty", compile_empty);
    ops
}

pub fn standard_conversions() -> BTreeMap<&'static str, (Type, OperatorFn)> {
    [
        ("int", Type::Int),
        ("float", Type::Float),
        ("string", Type::String),
        ("bool", Type::Bool),
        ("regex", Type::Regex),
        ("dict", Type::Dict),
        ("semver", Type::Semver),
        ("version", Type::Version),
        ("ip", Type::Ip),
    ]
    .into_iter()
    .map(|(id, typ)| (id, (typ, compile_conversion as OperatorFn)))
    .collect()
}

// ─── Binary operations ───────────────────────────────────────────────────────

/// Both sides of a binary operation plus the `@msg` attached to either.
struct AbOperation {
    left: Ref,
    right: Primitive,
    msg: Option<AssertionMessage>,
}

fn compile_ab_operation(c: &mut Compiler<'_>, frame: &mut Frame, call: Option<&Call>) -> Result<AbOperation, CompileError> {
    let args = call
        .and_then(Call::args)
        .ok_or_else(|| CompileError::invalid("operation needs a function call"))?;
    let (a, b) = match args {
        [a, b] => (a, b),
        [] | [_] => return Err(CompileError::invalid("missing arguments")),
        _ => return Err(CompileError::invalid("too many arguments")),
    };
    if a.name.is_some() || b.name.is_some() {
        return Err(CompileError::invalid(
            "calling operations with named arguments is not supported",
        ));
    }

    let left = c.compile_and_add_expression(frame, &a.value)?;
    let right = c.compile_expression(frame, &b.value)?;

    let comments = format!(
        "{}\n{}",
        assertions::extract_comments(&a.value),
        assertions::extract_comments(&b.value)
    );
    let template = assertions::extract_msg_tag(&comments);
    if template.is_empty() {
        return Ok(AbOperation { left, right, msg: None });
    }

    let expected = match right.as_ref().filter(|_| right.is_ref()) {
        Some(r) => r,
        None => c.add_chunk(frame, Chunk::primitive(right.clone())),
    };
    let expected_type = c.dereference_type(&right)?;
    let actual_type = c.chunk_type(left);
    c.add_var(frame, "$expected", Variable::named("$expected", expected, expected_type));
    c.add_var(frame, "$actual", Variable::named("$actual", left, actual_type));
    if let Some(binding) = frame.binding.clone() {
        c.add_var(frame, "$binding", Variable { name: "$binding".into(), ..binding });
    }

    let msg = assertions::compile_assertion_msg(c, frame, &template);
    for name in ["$expected", "$actual", "$binding"] {
        c.remove_var(frame, name);
    }
    Ok(AbOperation { left, right, msg: Some(msg?) })
}

/// Follows reference primitives to the chunk that produces the value.
fn resolve_ref(c: &Compiler<'_>, mut r: Ref) -> Ref {
    let mut hops = 0;
    while let Some(target) = c
        .bundle
        .code
        .chunk(r)
        .and_then(Chunk::as_primitive)
        .filter(|p| p.is_ref())
        .and_then(Primitive::as_ref)
    {
        if target == r || hops > c.bundle.code.checksums.len() {
            break;
        }
        r = target;
        hops += 1;
    }
    r
}

fn operator_candidates(id: &str, rt: &Type) -> [String; 3] {
    [
        format!("{id}{}", rt.label()),
        id.to_string(),
        format!("{id}{}", rt.underlying().label()),
    ]
}

fn register_assertion(c: &mut Compiler<'_>, r: Ref, msg: Option<AssertionMessage>) {
    if let Some(msg) = msg {
        let sum = c.checksum_of(r);
        c.bundle.assertions.insert(sum, msg);
    }
}

fn compile_comparable(c: &mut Compiler<'_>, frame: &mut Frame, id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    let op = compile_ab_operation(c, frame, call).map_err(|e| CompileError::Operation(e.to_string()))?;
    let left = resolve_ref(c, op.left);
    let lt = c.bundle.code.dereferenced_type(left).unwrap_or(Type::Any);
    let rt = c.dereference_type(&op.right)?;

    let config = c.config;
    let special = format!("{id}{}", rt.label());
    if let Some(f) = config.registry.builtin(&lt, &special).and_then(|h| h.compile) {
        let typ = f(c, frame, &lt, left, &special, None)?;
        let tail = c.tail_ref(frame);
        register_assertion(c, tail, op.msg);
        return Ok(typ);
    }

    let name = operator_candidates(id, &rt)
        .into_iter()
        .find(|name| config.operations.supports(&lt, name))
        .ok_or_else(|| {
            CompileError::invalid(format!(
                "cannot find operator handler: {} {id} {}",
                lt.label(),
                rt.label()
            ))
        })?;

    let r = c.add_chunk(frame, Chunk::function(name, Type::Bool, Some(left), vec![op.right]));
    register_assertion(c, r, op.msg);
    Ok(Type::Bool)
}

fn compile_transformation(c: &mut Compiler<'_>, frame: &mut Frame, id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    let op = compile_ab_operation(c, frame, call).map_err(|e| CompileError::Operation(e.to_string()))?;
    let left = resolve_ref(c, op.left);
    let lt = c.bundle.code.dereferenced_type(left).unwrap_or(Type::Any);
    let rt = c.dereference_type(&op.right)?;

    let config = c.config;
    let (name, result) = operator_candidates(id, &rt)
        .into_iter()
        .find_map(|name| config.operations.result_type(&lt, &name).map(|t| (name, t)))
        .ok_or_else(|| {
            CompileError::invalid(format!(
                "cannot find operator handler: {} {id} {}",
                lt.label(),
                rt.label()
            ))
        })?;
    let typ = if result == Type::Empty { lt } else { result };

    let r = c.add_chunk(frame, Chunk::function(name, typ.clone(), Some(left), vec![op.right]));
    register_assertion(c, r, op.msg);
    Ok(typ)
}

// ─── Keywords ────────────────────────────────────────────────────────────────

fn compile_assignment(c: &mut Compiler<'_>, frame: &mut Frame, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    let args = call
        .and_then(Call::args)
        .ok_or_else(|| CompileError::invalid("assignment needs a function call"))?;
    let [ident, value] = args else {
        return Err(CompileError::invalid(if args.len() < 2 {
            "missing arguments"
        } else {
            "too many arguments"
        }));
    };
    if ident.name.is_some() || value.name.is_some() {
        return Err(CompileError::invalid(
            "calling operations with named arguments is not supported",
        ));
    }

    let name = ident
        .value
        .ident()
        .ok_or_else(|| CompileError::invalid("variable name is not defined"))?;
    if name.is_empty() {
        return Err(CompileError::invalid("cannot assign to empty variable name"));
    }
    if name.starts_with('$') {
        return Err(CompileError::invalid("illegal character in variable assignment '$'"));
    }

    let r = c.compile_and_add_expression(frame, &value.value)?;
    let typ = c.bundle.code.dereferenced_type(r).unwrap_or(Type::Any);
    c.add_var(frame, name, Variable::named(name, r, typ));
    Ok(Type::Nil)
}

fn single_unnamed_arg<'a>(call: Option<&'a Call>, missing: &str, many: &str, named: &str) -> Result<&'a Arg, CompileError> {
    let args = call.and_then(Call::args).unwrap_or_default();
    match args {
        [] => Err(CompileError::invalid(missing)),
        [arg] if arg.name.is_some() => Err(CompileError::invalid(named)),
        [arg] => Ok(arg),
        _ => Err(CompileError::invalid(many)),
    }
}

fn compile_if(c: &mut Compiler<'_>, frame: &mut Frame, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    if call.and_then(Call::args).is_none() {
        return Err(CompileError::invalid("need conditional arguments for if-clause"));
    }
    let arg = single_unnamed_arg(
        call,
        "missing parameters for if-clause, it requires 1",
        "missing parameters for if-clause, it requires 1",
        "called if-clause with a named argument, which is not supported",
    )?;

    let tail = c.tail_ref(frame);
    let chained = frame.prev_id == "else" && c.bundle.code.chunk(tail).is_some_and(|ch| ch.id() == "if");
    if chained {
        let popped = c
            .bundle
            .code
            .pop_chunk(frame.block_ref)
            .ok_or_else(|| CompileError::invalid("else-if without a preceding if-statement"))?;
        let mut chunk = popped.chunk;
        let condition = c.compile_expression(frame, &arg.value)?;
        if let Some(function) = chunk.as_function_mut() {
            function.args.push(condition);
        }
        c.add_chunk(frame, chunk);
        frame.prev_id = "if".into();
        return Ok(Type::Nil);
    }

    let condition = c.compile_expression(frame, &arg.value)?;
    c.add_chunk(frame, Chunk::function("if", Type::Unset, None, vec![condition]));
    frame.prev_id = "if".into();
    Ok(Type::Nil)
}

fn compile_else(c: &mut Compiler<'_>, frame: &mut Frame, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    if call.is_some() {
        return Err(CompileError::invalid(
            "cannot have conditional arguments for else-clause, use another if-statement",
        ));
    }
    let tail = c.tail_ref(frame);
    if !c.bundle.code.chunk(tail).is_some_and(|ch| ch.id() == "if") {
        return Err(CompileError::invalid(
            "can only use else-statement after a preceding if-statement",
        ));
    }
    if frame.prev_id != "if" {
        return Err(CompileError::invalid(
            "can only use else-statement after a preceding if-statement (internal reference is wrong)",
        ));
    }
    frame.prev_id = "else".into();
    Ok(Type::Nil)
}

fn compile_expect(c: &mut Compiler<'_>, frame: &mut Frame, id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    let arg = single_unnamed_arg(
        call,
        &format!("missing parameter for '{id}', it requires 1"),
        &format!("called '{id}' with too many arguments, it requires 1"),
        &format!("called '{id}' with a named argument, which is not supported"),
    )?;
    let value = c.compile_expression(frame, &arg.value)?;
    let binding = frame.binding.as_ref().map(|b| b.reference);
    if let Some(r) = value.as_ref().filter(|_| value.is_ref()) {
        c.add_datapoint(frame, r);
    }
    if let Some(b) = binding {
        c.add_datapoint(frame, b);
    }
    c.add_chunk(frame, Chunk::function(id, Type::Bool, binding, vec![value]));
    Ok(Type::Bool)
}

/// `score(..)` and `typeof(..)`: one argument, no binding.
fn compile_unary(c: &mut Compiler<'_>, frame: &mut Frame, id: &str, call: Option<&Call>, typ: Type) -> Result<Type, CompileError> {
    let args = call.and_then(Call::args).unwrap_or_default();
    let Some(arg) = args.first() else {
        return Err(CompileError::invalid(format!("missing parameter for '{id}', it requires 1")));
    };
    if arg.value.is_empty() {
        return Err(CompileError::invalid(format!("failed to get parameter for '{id}'")));
    }
    let value = c.compile_expression(frame, &arg.value)?;
    c.add_chunk(frame, Chunk::function(id, typ.clone(), None, vec![value]));
    Ok(typ)
}

fn compile_score(c: &mut Compiler<'_>, frame: &mut Frame, id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_unary(c, frame, id, call, Type::Score)
}

fn compile_typeof(c: &mut Compiler<'_>, frame: &mut Frame, id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    compile_unary(c, frame, id, call, Type::String)
}

fn compile_switch(c: &mut Compiler<'_>, frame: &mut Frame, _id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    let args = call.and_then(Call::args).unwrap_or_default();
    let value = match args {
        [] => Primitive::unset(),
        [arg] if arg.name.is_none() => c.compile_expression(frame, &arg.value)?,
        [_] => {
            return Err(CompileError::invalid(
                "called 'switch' with a named argument, which is not supported",
            ))
        }
        _ => {
            return Err(CompileError::invalid(
                "called 'switch' with too many arguments, it requires 1",
            ))
        }
    };
    c.add_chunk(frame, Chunk::function("switch", Type::Unset, None, vec![value]));
    frame.prev_id = "switch".into();
    Ok(Type::Nil)
}

fn compile_never(c: &mut Compiler<'_>, frame: &mut Frame, _id: &str, _call: Option<&Call>) -> Result<Type, CompileError> {
    c.add_chunk(frame, Chunk::primitive(Primitive::never()));
    Ok(Type::Time)
}

fn compile_empty(c: &mut Compiler<'_>, frame: &mut Frame, _id: &str, _call: Option<&Call>) -> Result<Type, CompileError> {
    c.add_chunk(frame, Chunk::primitive(Primitive::empty()));
    Ok(Type::Empty)
}

/// `int(x)`, `string(x)`, ... A bare keyword is not a conversion and falls
/// through to the other identifier lookups.
fn compile_conversion(c: &mut Compiler<'_>, frame: &mut Frame, id: &str, call: Option<&Call>) -> Result<Type, CompileError> {
    let args = call.and_then(Call::args).unwrap_or_default();
    let [arg] = args else {
        if args.is_empty() {
            return Err(CompileError::NotConversion);
        }
        return Err(CompileError::invalid(format!(
            "too many arguments for type conversion '{id}', only 1 is supported"
        )));
    };
    if arg.name.is_some() {
        return Err(CompileError::invalid(format!(
            "called '{id}' with a named argument, which is not supported"
        )));
    }

    let config = c.config;
    let (typ, _) = config.registry.conversion(id).ok_or(CompileError::NotConversion)?;
    let value = c.compile_expression(frame, &arg.value)?;
    c.add_chunk(frame, Chunk::function(id, typ.clone(), None, vec![value]));
    Ok(typ)
}

#[cfg(test)]
mod tests {
    use crate::bytecode::{Chunk, CodeBundle, Primitive, Ref};
    use crate::compiler::{CompileError, CompileFailure};
    use crate::config::{CompilerConfig, FeatureSet};
    use crate::schema::testutil::test_schema;
    use crate::types::Type;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn compile(src: &str) -> Result<CodeBundle, CompileFailure> {
        let cfg = CompilerConfig::new(Arc::new(test_schema()), FeatureSet::default());
        crate::compile(src, &BTreeMap::new(), &cfg)
    }

    fn compile_ok(src: &str) -> CodeBundle {
        match compile(src) {
            Ok(b) => b,
            Err(e) => panic!("{src}: {e}"),
        }
    }

    fn entry(b: &CodeBundle, idx: usize) -> &Chunk {
        b.code.chunk(b.code.entrypoints()[idx]).unwrap()
    }

    #[test]
    fn test_comparison_ids_carry_right_type() {
        let b = compile_ok("mondoo.version != 'x'");
        assert_eq!(entry(&b, 0).id(), "!=string");
        assert_eq!(b.code.datapoints(), &[Ref::slot_of(1, 2)]);

        let b = compile_ok("mondoo.version =~ /5\\./");
        assert_eq!(entry(&b, 0).id(), "=~regex");

        let b = compile_ok("asset.ids == ['a']");
        assert_eq!(entry(&b, 0).id(), "==[]string");
    }

    #[test]
    fn test_missing_operator_handler() {
        let err = compile("1 =~ 2").unwrap_err();
        assert_eq!(err.error.to_string(), "cannot find operator handler: int =~ int");
    }

    #[test]
    fn test_transformation_types() {
        let b = compile_ok("1 + 2");
        assert_eq!(entry(&b, 0).id(), "+int");
        assert_eq!(entry(&b, 0).typ(), Type::Int);

        let b = compile_ok("1 * 2.5");
        assert_eq!(entry(&b, 0).typ(), Type::Float);

        let b = compile_ok("mondoo.version + 'x'");
        assert_eq!(entry(&b, 0).typ(), Type::String);
    }

    #[test]
    fn test_logical_operators() {
        let b = compile_ok("true && mondoo.version == 'x'");
        let and = entry(&b, 0);
        assert_eq!(and.id(), "&&bool");
        assert_eq!(and.typ(), Type::Bool);
    }

    #[test]
    fn test_resource_empty_comparison() {
        let b = compile_ok("users == empty");
        let cmp = entry(&b, 0);
        assert_eq!(cmp.id(), "==empty");
        let list = b.code.chunk(cmp.as_function().unwrap().binding.unwrap()).unwrap();
        assert_eq!(list.id(), "list");

        let b = compile_ok("sshd.config != empty");
        let cmp = entry(&b, 0);
        assert_eq!(cmp.id(), "!=empty");
        assert_eq!(cmp.as_function().unwrap().args, vec![Primitive::empty()]);
    }

    #[test]
    fn test_assignment_errors() {
        let err = compile("1 = 2").unwrap_err();
        assert_eq!(err.error.to_string(), "variable name is not defined");
        let err = compile("$x = 2").unwrap_err();
        assert!(err.error.to_string().contains("illegal character in variable assignment"));
    }

    #[test]
    fn test_variable_comparison_binds_value() {
        let b = compile_ok("v = mondoo.version\nv == '1'");
        let cmp = entry(&b, 0).as_function().unwrap();
        assert_eq!(b.code.chunk(cmp.binding.unwrap()).unwrap().id(), "version");
    }

    #[test]
    fn test_else_requires_if() {
        let err = compile("else { 1 }").unwrap_err();
        assert_eq!(
            err.error.to_string(),
            "can only use else-statement after a preceding if-statement"
        );
        let err = compile("if () { 1 }").unwrap_err();
        assert_eq!(err.error.to_string(), "missing parameters for if-clause, it requires 1");
    }

    #[test]
    fn test_expect_reports_its_argument() {
        let b = compile_ok("expect(mondoo.version == '1')");
        let expect = entry(&b, 0);
        assert_eq!(expect.id(), "expect");
        assert_eq!(expect.typ(), Type::Bool);
        let cmp = expect.as_function().unwrap().args[0].as_ref().unwrap();
        assert!(b.code.datapoints().contains(&cmp));

        let err = compile("expect(1, 2)").unwrap_err();
        assert_eq!(err.error.to_string(), "called 'expect' with too many arguments, it requires 1");
    }

    #[test]
    fn test_score_and_typeof() {
        let b = compile_ok("score(100)");
        assert_eq!(entry(&b, 0).typ(), Type::Score);
        let b = compile_ok("typeof(mondoo)");
        assert_eq!(entry(&b, 0).id(), "typeof");
        assert_eq!(entry(&b, 0).typ(), Type::String);
        let err = compile("score()").unwrap_err();
        assert_eq!(err.error.to_string(), "missing parameter for 'score', it requires 1");
    }

    #[test]
    fn test_conversions() {
        let b = compile_ok("int(mondoo.version)");
        let conv = entry(&b, 0);
        assert_eq!(conv.id(), "int");
        assert_eq!(conv.typ(), Type::Int);
        assert!(conv.as_function().unwrap().binding.is_none());

        let err = compile("semver('1', '2')").unwrap_err();
        assert!(err.error.to_string().starts_with("too many arguments for type conversion"));
    }

    #[test]
    fn test_bare_conversion_keyword_is_not_a_conversion() {
        let err = compile("version").unwrap_err();
        assert_eq!(err.error, CompileError::ResourceNotFound("version".into()));
    }

    #[test]
    fn test_never_and_empty_values() {
        let b = compile_ok("Never");
        assert_eq!(entry(&b, 0).as_primitive(), Some(&Primitive::never()));
        let b = compile_ok("empty");
        assert_eq!(entry(&b, 0).typ(), Type::Empty);
    }

    #[test]
    fn test_msg_comment_becomes_assertion() {
        let b = compile_ok("# @msg expected ${$expected} got ${$actual}\nmondoo.version == '1'");
        let ep = b.code.entrypoints()[0];
        let sum = b.code.checksum(ep).unwrap();
        let msg = b.assertions.get(sum).unwrap();
        assert_eq!(msg.template, "expected $0 got $1");
        assert_eq!(msg.checksums.len(), 2);
        assert!(msg.refs.is_empty());
    }
}
