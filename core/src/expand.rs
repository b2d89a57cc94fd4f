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

//! Post-compile expansion of resources into their default fields.
//!
//! An entrypoint that yields a resource (or a list of them) is wrapped in a
//! `{}` block that reads the resource's `defaults`. List resources are first
//! redirected onto their `list` field. For `all`/`any`/`one`/`none` the
//! filtered entries are expanded as a data point, and the fields the
//! assertion reads are copied into the default block so failures show them.

use crate::bytecode::{comparable_operator, Chunk, Primitive, Ref};
use crate::compiler::Compiler;
use crate::config::Feature;
use crate::parser;
use crate::types::Type;
use std::collections::BTreeMap;

pub(crate) fn post_compile(c: &mut Compiler<'_>) {
    // blocks added while expanding are not expanded again
    let blocks = c.bundle.code.blocks.len();
    for idx in 0..blocks {
        let block_ref = Ref::binding_of(idx as u32 + 1);
        let entrypoints = c.bundle.code.blocks[idx].entrypoints.clone();

        for ep in entrypoints {
            let Some(chunk) = c.bundle.code.chunk(ep) else {
                continue;
            };
            if chunk.as_function().is_none() {
                continue;
            }

            let (id, typ, ep) = expand_list_resource(c, ep);
            match id.as_str() {
                "$one" | "$all" | "$none" | "$any" => {
                    let Some(binding) = c.bundle.code.chunk(ep).and_then(|ch| ch.as_function()?.binding) else {
                        continue;
                    };
                    let Some(typ) = c.bundle.code.chunk(binding).and_then(|ch| Some(ch.as_function()?.typ.clone())) else {
                        continue;
                    };
                    if let Some(defaults) = expand_resource_fields(c, binding, &typ) {
                        let tail = c.bundle.code.tail_ref(block_ref);
                        if let Some(block) = c.bundle.code.block_mut(block_ref) {
                            block.datapoints.push(tail);
                        }
                        add_value_field_chunks(c, binding, defaults);
                    }
                }
                _ => {
                    expand_resource_fields(c, ep, &typ);
                }
            }
        }
    }
}

/// Replaces an entrypoint that yields a list resource with its `list` field.
/// Returns the id, type and ref of the resulting entrypoint.
fn expand_list_resource(c: &mut Compiler<'_>, r: Ref) -> (String, Type, Ref) {
    let Some(chunk) = c.bundle.code.chunk(r) else {
        return (String::new(), Type::Unset, r);
    };
    let (id, typ) = (chunk.id().to_string(), chunk.typ());
    let Some(list_typ) = typ
        .resource_name()
        .filter(|_| typ.is_resource())
        .and_then(|name| c.config.schema.lookup(name))
        .and_then(|info| info.list_type.clone())
    else {
        return (id, typ, r);
    };

    let typ = Type::array(list_typ);
    let list = c
        .bundle
        .code
        .add_chunk(r.block_ref(), Chunk::function("list", typ.clone(), Some(r), vec![]));
    c.bundle.code.replace_entrypoint(r, list);
    ("list".to_string(), typ, list)
}

/// Wraps the resource at `r` in a block compiled from its defaults and
/// returns that block. Nothing happens for values that are not resources
/// or resources without defaults.
fn expand_resource_fields(c: &mut Compiler<'_>, r: Ref, typ: &Type) -> Option<Ref> {
    let (typ, result_typ) = match typ {
        t if t.is_array() => (t.child(), Type::array(Type::Block)),
        t => (t.clone(), Type::Block),
    };
    if !typ.is_resource() {
        return None;
    }
    let info = c.config.schema.lookup(typ.resource_name()?)?;
    if info.defaults.is_empty() {
        return None;
    }
    let (name, defaults, context) = (info.name.clone(), info.defaults.clone(), info.context.clone());

    let exprs = match parser::parse(&defaults) {
        Ok(parsed) if !parsed.ast.expressions.is_empty() => parsed.ast.expressions,
        Ok(parsed) => {
            log::error!("failed to parse defaults for {name}: {:?}", parsed.error);
            return None;
        }
        Err(err) => {
            log::error!("failed to parse defaults for {name}: {err}");
            return None;
        }
    };

    let parent = c.detached_frame(r);
    let (child, res) = c.blockcompile_on_resource(&parent, &exprs, &Type::resource(&name), r, "_");
    if let Err(err) = res {
        log::error!("failed to compile defaults for {name}: {err}");
    }
    let block = child.block_ref;
    if child.deps.iter().any(|d| d.block != block.block) {
        log::warn!("defaults included external dependencies for resource {name}");
    }

    if c.config.is_active(Feature::ResourceContext) && !context.is_empty() {
        let ctx_typ = Type::resource(&context);
        let head = Ref::slot_of(block.block, 1);
        let ctx = c.add_chunk(&child, Chunk::function("context", ctx_typ.clone(), Some(head), vec![]));
        expand_resource_fields(c, ctx, &ctx_typ);
        let tail = c.tail_ref(&child);
        if let Some(b) = c.bundle.code.block_mut(block) {
            b.entrypoints.push(tail);
        }
    }

    let expanded = c.bundle.code.add_chunk(
        r.block_ref(),
        Chunk::function("{}", result_typ, Some(r), vec![Primitive::function(block)]),
    );
    c.bundle.code.replace_entrypoint(r, expanded);
    let sum = c.checksum_of(expanded);
    c.bundle.auto_expand.insert(sum, block);
    Some(block)
}

/// Node of a field tree: chunks of one block keyed by the path of ids that
/// leads to them from the block's argument.
struct FieldNode {
    id: String,
    slot: u32,
    children: BTreeMap<String, usize>,
}

struct FieldTree {
    nodes: Vec<Option<FieldNode>>,
}

impl FieldTree {
    /// Builds the tree of a block whose chunks only depend on earlier ones.
    fn of_block(chunks: &[Chunk], block: u32, keep: impl Fn(&Chunk) -> bool) -> FieldTree {
        let mut nodes: Vec<Option<FieldNode>> = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if !keep(chunk) {
                nodes.push(None);
                continue;
            }
            let binding = chunk.as_function().and_then(|f| f.binding);
            if let Some(b) = binding.filter(|b| b.block == block && b.slot > 0) {
                let parent = b.slot as usize - 1;
                if let Some(Some(p)) = nodes.get_mut(parent) {
                    p.children.insert(chunk.id().to_string(), i);
                }
            }
            nodes.push(Some(FieldNode {
                id: chunk.id().to_string(),
                slot: i as u32 + 1,
                children: BTreeMap::new(),
            }));
        }
        FieldTree { nodes }
    }

    fn node(&self, idx: usize) -> Option<&FieldNode> {
        self.nodes.get(idx).and_then(Option::as_ref)
    }

    /// Depth-first walk in id order. Yields the path of ids leading to each
    /// node (without the root) and the node's index.
    fn walk(&self) -> Vec<(Vec<String>, usize)> {
        let mut out = Vec::new();
        self.walk_from(0, &mut Vec::new(), &mut out);
        out
    }

    fn walk_from(&self, idx: usize, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, usize)>) {
        let Some(node) = self.node(idx) else {
            return;
        };
        for &child in node.children.values() {
            out.push((path.clone(), child));
            if let Some(c) = self.node(child) {
                path.push(c.id.clone());
                self.walk_from(child, path, out);
                path.pop();
            }
        }
    }

    fn find(&self, path: &[String]) -> Option<usize> {
        let mut idx = 0;
        for id in path {
            idx = *self.node(idx)?.children.get(id)?;
        }
        Some(idx)
    }
}

/// Copies the fields the assertion's block reads into the default-field
/// block, so failed entries report the values they were checked on.
fn add_value_field_chunks(c: &mut Compiler<'_>, r: Ref, defaults: Ref) {
    let code = &c.bundle.code;
    let mut current = r;
    let filter = loop {
        let Some(Chunk::Function { id, function }) = code.chunk(current) else {
            log::debug!("no filter found for assertion, this happens with empty assertions");
            return;
        };
        if id == "where" || id == "$whereNot" {
            break function;
        }
        match function.binding {
            Some(b) if b != current => current = b,
            _ => {
                log::debug!("no filter found in the assertion's chain, this happens with empty assertions");
                return;
            }
        }
    };

    let Some(assessment) = filter
        .args
        .iter()
        .rev()
        .find(|a| a.typ.underlying() == Type::FunctionLike)
        .and_then(Primitive::as_ref)
    else {
        return;
    };
    let Some(assessment_chunks) = code.block(assessment).map(|b| b.chunks.clone()) else {
        return;
    };
    let source = FieldTree::of_block(&assessment_chunks, assessment.block, |chunk| {
        if matches!(chunk.id(), "where" | "$whereNot") || comparable_operator(chunk.id()).is_some() {
            return false;
        }
        match chunk.as_function() {
            Some(f) => !f.args.iter().any(|a| a.typ.underlying() == Type::Ref),
            None => true,
        }
    });

    let Some(default_chunks) = code.block(defaults).map(|b| b.chunks.clone()) else {
        return;
    };
    let mut target = FieldTree::of_block(&default_chunks, defaults.block, |_| true);

    for (path, idx) in source.walk() {
        let Some(node) = source.node(idx) else {
            continue;
        };
        let Some(parent) = target.find(&path) else {
            continue;
        };
        let Some(parent_slot) = target.node(parent).map(|p| p.slot) else {
            continue;
        };
        if target.node(parent).is_some_and(|p| p.children.contains_key(&node.id)) {
            continue;
        }

        let mut chunk = assessment_chunks[node.slot as usize - 1].clone();
        let is_function = chunk.as_function().is_some();
        if let Some(f) = chunk.as_function_mut() {
            f.binding = Some(Ref::slot_of(defaults.block, parent_slot));
        }
        let added = c.bundle.code.add_chunk(defaults, chunk);

        let new_idx = target.nodes.len();
        target.nodes.push(Some(FieldNode {
            id: node.id.clone(),
            slot: added.slot,
            children: BTreeMap::new(),
        }));
        if let Some(Some(p)) = target.nodes.get_mut(parent) {
            p.children.insert(node.id.clone(), new_idx);
        }
        if is_function {
            if let Some(block) = c.bundle.code.block_mut(defaults) {
                block.entrypoints.push(added);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::{Chunk, CodeBundle, Ref};
    use crate::config::{CompilerConfig, Feature, FeatureSet};
    use crate::schema::testutil::test_schema;
    use crate::types::Type;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn compile_with(src: &str, features: FeatureSet) -> CodeBundle {
        let cfg = CompilerConfig::new(Arc::new(test_schema()), features);
        match crate::compile(src, &BTreeMap::new(), &cfg) {
            Ok(b) => b,
            Err(e) => panic!("{src}: {e}"),
        }
    }

    fn compile(src: &str) -> CodeBundle {
        compile_with(src, FeatureSet::default())
    }

    fn chunk(b: &CodeBundle, r: Ref) -> &Chunk {
        b.code.chunk(r).unwrap()
    }

    fn entry_ids(b: &CodeBundle, block: Ref) -> Vec<&str> {
        b.code
            .block(block)
            .unwrap()
            .entrypoints
            .iter()
            .map(|r| chunk(b, *r).id())
            .collect()
    }

    #[test]
    fn test_list_resource_expands_to_list_and_defaults() {
        let b = compile("users");
        let ep = b.code.entrypoints()[0];
        let expanded = chunk(&b, ep);
        assert_eq!(expanded.id(), "{}");
        assert_eq!(expanded.typ(), Type::array(Type::Block));

        let list = expanded.as_function().unwrap().binding.unwrap();
        assert_eq!(chunk(&b, list).id(), "list");
        assert_eq!(chunk(&b, list).typ(), Type::array(Type::resource("user")));
        let users = chunk(&b, list).as_function().unwrap().binding.unwrap();
        assert_eq!(chunk(&b, users).id(), "users");

        let block = b.auto_expand[b.code.checksum(ep).unwrap()];
        assert_eq!(entry_ids(&b, block), vec!["name", "uid"]);
    }

    #[test]
    fn test_single_resource_expands_to_block() {
        let b = compile("file('/etc/passwd')");
        let ep = b.code.entrypoints()[0];
        assert_eq!(chunk(&b, ep).id(), "{}");
        assert_eq!(chunk(&b, ep).typ(), Type::Block);
        let block = b.auto_expand[b.code.checksum(ep).unwrap()];
        assert_eq!(entry_ids(&b, block), vec!["path", "size"]);
    }

    #[test]
    fn test_resources_without_defaults_stay() {
        let b = compile("mondoo");
        let ep = b.code.entrypoints()[0];
        assert_eq!(chunk(&b, ep).id(), "mondoo");
        assert!(b.auto_expand.is_empty());
    }

    #[test]
    fn test_context_is_reported_when_enabled() {
        let b = compile("packages");
        let ep = b.code.entrypoints()[0];
        let block = b.auto_expand[b.code.checksum(ep).unwrap()];
        assert_eq!(entry_ids(&b, block), vec!["name", "version"]);

        let b = compile_with("packages", FeatureSet::new([Feature::ResourceContext]));
        let ep = b.code.entrypoints()[0];
        let block = b.auto_expand[b.code.checksum(ep).unwrap()];
        assert_eq!(entry_ids(&b, block), vec!["name", "version", "{}"]);
        let ctx_ep = *b.code.block(block).unwrap().entrypoints.last().unwrap();
        let ctx = chunk(&b, ctx_ep).as_function().unwrap().binding.unwrap();
        assert_eq!(chunk(&b, ctx).id(), "context");
        assert_eq!(chunk(&b, ctx).typ(), Type::resource("file"));
        assert_eq!(b.auto_expand.len(), 2);
    }

    #[test]
    fn test_assertion_fields_join_the_defaults() {
        let b = compile("users.list.all(gid > 0)");
        let (expanded, _) = b.code.blocks[0]
            .chunks
            .iter()
            .enumerate()
            .find(|(_, c)| c.id() == "{}")
            .map(|(i, c)| (Ref::slot_of(1, i as u32 + 1), c))
            .unwrap();
        assert!(b.code.datapoints().contains(&expanded));

        let block = b.auto_expand[b.code.checksum(expanded).unwrap()];
        assert_eq!(entry_ids(&b, block), vec!["name", "uid", "gid"]);
        let gid = *b.code.block(block).unwrap().entrypoints.last().unwrap();
        assert_eq!(chunk(&b, gid).as_function().unwrap().binding, Some(Ref::slot_of(block.block, 1)));
    }

    #[test]
    fn test_fields_already_in_defaults_are_not_copied() {
        let b = compile("users.list.all(uid > 0)");
        let block = b.auto_expand.values().next().copied().unwrap();
        assert_eq!(entry_ids(&b, block), vec!["name", "uid"]);
    }

    #[test]
    fn test_values_without_resources_are_not_expanded() {
        let b = compile("asset.ids.all(_ != '')");
        assert!(b.auto_expand.is_empty());
        assert_eq!(chunk(&b, b.code.entrypoints()[0]).id(), "$all");
    }
}
