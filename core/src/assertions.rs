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

//! `@msg` assertion messages.
//!
//! A comment line starting with `@msg ` attaches a message template to the
//! assertion below it. `${expr}` placeholders are compiled like any other
//! expression and replaced with positional markers (`$0`, `$1`, ...). Once
//! the whole program is compiled the markers are resolved to checksums, so
//! the message survives re-ordering of the code.

use crate::ast::{Call, Expression};
use crate::bytecode::{AssertionMessage, Chunk, CodeBundle, Primitive, Ref};
use crate::compiler::{CompileError, Compiler, Frame, Variable};
use crate::parser;
use crate::types::Type;

/// All comments attached to an expression and the operands nested in it.
pub fn extract_comments(expr: &Expression) -> String {
    let mut res = String::new();
    collect_comments(expr, &mut res);
    res
}

fn collect_comments(expr: &Expression, out: &mut String) {
    if let Some(operand) = &expr.operand {
        out.push_str(&operand.comments);
        for call in &operand.calls {
            match call {
                Call::Ident { comments, .. } => out.push_str(comments),
                Call::Function(args) => args.iter().for_each(|a| collect_comments(&a.value, out)),
                Call::Accessor(inner) => collect_comments(inner, out),
            }
        }
    }
    for op in &expr.operations {
        out.push_str(&op.operand.comments);
    }
}

/// The text of the first `@msg` tag: its line plus the lines that follow,
/// up to a blank line or the next tag.
pub fn extract_msg_tag(comments: &str) -> String {
    let mut lines = comments.lines().skip_while(|l| !l.starts_with("@msg "));
    let Some(first) = lines.next() else {
        return String::new();
    };

    let mut res = String::from(&first[5..]);
    res.push('\n');
    for line in lines.take_while(|l| !l.is_empty() && !l.starts_with('@')) {
        res.push_str(line);
        res.push('\n');
    }
    res.trim().to_string()
}

/// Splits a template into its text with `$N` markers and the source of each
/// `${...}` placeholder. Brackets inside a placeholder must balance; ones in
/// quoted strings don't count.
fn split_template(msg: &str) -> Result<(String, Vec<String>), CompileError> {
    let bytes = msg.as_bytes();
    let mut template = String::with_capacity(msg.len());
    let mut codes = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' || bytes.get(i + 1) != Some(&b'{') {
            i += 1;
            continue;
        }
        template.push_str(&msg[text_start..i]);

        let start = i + 2;
        // closers still owed, innermost last
        let mut open = vec![b'}'];
        let mut quote: Option<u8> = None;
        let mut j = start;
        while j < bytes.len() {
            let ch = bytes[j];
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => {}
                None => match ch {
                    b'\'' | b'"' => quote = Some(ch),
                    b'{' => open.push(b'}'),
                    b'(' => open.push(b')'),
                    b'[' => open.push(b']'),
                    b'}' | b')' | b']' => {
                        if open.last() != Some(&ch) {
                            return Err(CompileError::invalid(format!(
                                "mismatched `{}` in assertion message: '{msg}'",
                                ch as char
                            )));
                        }
                        open.pop();
                        if open.is_empty() {
                            break;
                        }
                    }
                    _ => {}
                },
            }
            j += 1;
        }
        if let Some(&closer) = open.last() {
            return Err(CompileError::invalid(format!(
                "missing closing `{}` in assertion message: '{msg}'",
                closer as char
            )));
        }

        let code = msg[start..j].trim();
        if code.is_empty() {
            return Err(CompileError::invalid("empty code block `${}` in assertion message"));
        }
        template.push('$');
        template.push_str(&codes.len().to_string());
        codes.push(code.to_string());
        i = j + 1;
        text_start = i;
    }
    template.push_str(&msg[text_start..]);
    Ok((template, codes))
}

/// Compiles the placeholders of a message template into the frame's block.
pub(crate) fn compile_assertion_msg(c: &mut Compiler<'_>, frame: &mut Frame, msg: &str) -> Result<AssertionMessage, CompileError> {
    let (template, codes) = split_template(msg)?;

    let mut refs = Vec::with_capacity(codes.len());
    for code in &codes {
        let ast = parser::parse(code)?.into_result()?;
        let exprs: Vec<&Expression> = ast.expressions.iter().filter(|e| !e.is_empty()).collect();
        let expr = match exprs.as_slice() {
            [expr] => *expr,
            [] => return Err(CompileError::invalid("empty code block `${}` in assertion message")),
            _ => {
                return Err(CompileError::invalid(format!(
                    "cannot have more than one expression in assertion message placeholder '{code}'"
                )))
            }
        };
        refs.push(c.compile_and_add_expression(frame, expr)?);
    }

    Ok(AssertionMessage {
        template,
        refs,
        checksums: Vec::new(),
        decode_block: false,
    })
}

/// Message for a list assertion (`all`, `any`, `one`, `none`). The
/// placeholders run in their own block, which sees the full list as `$all`,
/// the offending entries as `$failed` and the per-entry check as
/// `$assertion` (also `$expected`). Returns `None` without an `@msg` tag.
pub(crate) fn compile_list_assertion_msg(
    c: &mut Compiler<'_>,
    frame: &mut Frame,
    typ: &Type,
    all_ref: Ref,
    failed_ref: Ref,
    assertion_ref: Ref,
) -> Result<Option<AssertionMessage>, CompileError> {
    let msg = extract_msg_tag(&frame.comment);
    if msg.is_empty() {
        return Ok(None);
    }

    let mut child = c.new_block_frame(frame, None);
    let params = [
        ("$all", typ.clone(), all_ref),
        ("$failed", typ.clone(), failed_ref),
        ("$assertion", Type::Block, assertion_ref),
    ];
    for (name, ptyp, source) in params {
        let sum = c.checksum_of(source);
        let r = c.bundle.code.add_argument_placeholder(child.block_ref, ptyp.clone(), sum);
        c.add_var(&child, name, Variable::named(name, r, ptyp.clone()));
        if name == "$assertion" {
            c.add_var(&child, "$expected", Variable::named("$expected", r, ptyp));
        }
    }

    let mut res = compile_assertion_msg(c, &mut child, &msg)?;
    c.set_entrypoints(&child, res.refs.clone());

    let block = child.block_ref;
    let mut args = vec![Primitive::function(block)];
    args.extend(
        child
            .deps
            .iter()
            .filter(|r| r.block == frame.block_ref.block)
            .map(|r| Primitive::reference(*r)),
    );
    frame.deps.extend(child.deps.iter().filter(|r| r.block != block.block));

    let r = c.add_chunk(frame, Chunk::function("${}", Type::Block, Some(failed_ref), args));
    c.add_datapoint(frame, r);

    res.decode_block = true;
    res.checksums = vec![c.checksum_of(r)];
    Ok(Some(res))
}

/// Replaces the refs of every assertion message with the checksums of the
/// chunks they point at.
pub fn update_assertions(bundle: &mut CodeBundle) -> Result<(), CompileError> {
    let code = &bundle.code;
    for msg in bundle.assertions.values_mut() {
        for r in std::mem::take(&mut msg.refs) {
            let sum = code.checksum(r).ok_or_else(|| {
                CompileError::invalid(format!("failed to find checksum for assertion reference {r}"))
            })?;
            msg.checksums.push(sum.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompilerConfig, FeatureSet};
    use crate::schema::testutil::test_schema;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn compile(src: &str) -> Result<CodeBundle, crate::compiler::CompileFailure> {
        let cfg = CompilerConfig::new(Arc::new(test_schema()), FeatureSet::default());
        crate::compile(src, &BTreeMap::new(), &cfg)
    }

    #[test]
    fn test_extract_msg_tag() {
        assert_eq!(extract_msg_tag("note\n@msg hello ${name}\nworld\n\nafter"), "hello ${name}\nworld");
        assert_eq!(extract_msg_tag("@msg one\n@other two"), "one");
        assert_eq!(extract_msg_tag("nothing here"), "");
        assert_eq!(extract_msg_tag("@msgx nope"), "");
    }

    #[test]
    fn test_split_template() {
        let (tpl, codes) = split_template("got ${a.b} and ${ 'x}' } $ plain").unwrap();
        assert_eq!(tpl, "got $0 and $1 $ plain");
        assert_eq!(codes, vec!["a.b".to_string(), "'x}'".to_string()]);

        let err = split_template("open ${a").unwrap_err();
        assert!(err.to_string().starts_with("missing closing `}`"));
        let err = split_template("open ${a.where(b == 1}").unwrap_err();
        assert!(err.to_string().starts_with("mismatched `}`"), "{err}");
        let err = split_template("open ${a.b(]}").unwrap_err();
        assert!(err.to_string().starts_with("mismatched `]`"), "{err}");
        let err = split_template("open ${a.where(x == 1)").unwrap_err();
        assert!(err.to_string().starts_with("missing closing `}`"));
        let err = split_template("none ${ }").unwrap_err();
        assert!(err.to_string().starts_with("empty code block"));
    }

    #[test]
    fn test_split_template_nested_brackets() {
        let (tpl, codes) = split_template("bad: ${$failed.map(_['name']) { x: [1, 2] }} (${a(')')})").unwrap();
        assert_eq!(tpl, "bad: $0 ($1)");
        assert_eq!(codes, vec!["$failed.map(_['name']) { x: [1, 2] }".to_string(), "a(')')".to_string()]);
    }

    #[test]
    fn test_msg_refers_to_fields() {
        let b = compile("# @msg version is ${mondoo.version}\nmondoo.version == '1'").unwrap();
        let ep = b.code.entrypoints()[0];
        let msg = &b.assertions[b.code.checksum(ep).unwrap()];
        assert_eq!(msg.template, "version is $0");
        assert!(!msg.decode_block);
        assert_eq!(msg.checksums.len(), 1);
    }

    #[test]
    fn test_msg_with_two_expressions_fails() {
        let err = compile("# @msg ${1; 2}\nmondoo.version == '1'").unwrap_err();
        assert!(err
            .error
            .to_string()
            .contains("cannot have more than one expression in assertion message placeholder"));
    }

    #[test]
    fn test_list_assertion_msg_runs_in_a_block() {
        let b = compile("# @msg found ${$failed.length} bad users\nusers.list.all(uid == 0)").unwrap();
        let ep = b.code.entrypoints()[0];
        assert_eq!(b.code.chunk(ep).unwrap().id(), "$all");
        let msg = &b.assertions[b.code.checksum(ep).unwrap()];
        assert!(msg.decode_block);
        assert_eq!(msg.template, "found $0 bad users");
        // the ${} block itself plus one placeholder
        assert_eq!(msg.checksums.len(), 2);

        let top = &b.code.blocks[0];
        let decoder = top
            .chunks
            .iter()
            .position(|c| c.id() == "${}")
            .map(|idx| Ref::slot_of(1, idx as u32 + 1))
            .unwrap();
        assert!(top.datapoints.contains(&decoder));
        assert_eq!(msg.checksums[0], b.code.checksum(decoder).unwrap());
    }
}
