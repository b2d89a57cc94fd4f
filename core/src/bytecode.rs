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

//! Content-addressed bytecode.
//!
//! A `Code` is a list of blocks; block `n` (1-based) holds chunks at slots
//! `1..`, slot 0 stands for the block itself. Every chunk is addressed by a
//! [`Ref`] and fingerprinted by a checksum (see `checksum.rs`) over its own
//! content and the checksums of whatever it refers to.

use crate::checksum;
use crate::types::Type;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ─── References ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct Ref {
    pub block: u32,
    pub slot: u32,
}

impl Ref {
    /// The reference to a block as a whole (slot 0).
    pub const fn binding_of(block: u32) -> Ref {
        Ref { block, slot: 0 }
    }

    pub const fn slot_of(block: u32, slot: u32) -> Ref {
        Ref { block, slot }
    }

    /// The block this ref lives in.
    pub const fn block_ref(&self) -> Ref {
        Ref::binding_of(self.block)
    }

    pub const fn with_slot(&self, slot: u32) -> Ref {
        Ref {
            block: self.block,
            slot,
        }
    }

    pub fn is_block(&self) -> bool {
        self.slot == 0
    }
}

impl From<u64> for Ref {
    fn from(raw: u64) -> Self {
        Ref {
            block: (raw >> 32) as u32,
            slot: (raw & 0xFFFF_FFFF) as u32,
        }
    }
}

impl From<Ref> for u64 {
    fn from(r: Ref) -> Self {
        ((r.block as u64) << 32) | r.slot as u64
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}|{}", self.block, self.slot)
    }
}

// ─── Primitives ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Ref(Ref),
    Array(Vec<Primitive>),
    Map(BTreeMap<String, Primitive>),
    Time(DateTime<Utc>),
}

/// A typed constant. Refs and function (block) references are primitives too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub typ: Type,
    pub value: PrimitiveValue,
}

impl Primitive {
    pub fn nil() -> Self {
        Primitive::placeholder(Type::Nil)
    }

    pub fn unset() -> Self {
        Primitive::placeholder(Type::Unset)
    }

    pub fn empty() -> Self {
        Primitive::placeholder(Type::Empty)
    }

    /// A typed slot without a value, e.g. the argument of a block.
    pub fn placeholder(typ: Type) -> Self {
        Primitive {
            typ,
            value: PrimitiveValue::None,
        }
    }

    pub fn bool(v: bool) -> Self {
        Primitive {
            typ: Type::Bool,
            value: PrimitiveValue::Bool(v),
        }
    }

    pub fn int(v: i64) -> Self {
        Primitive {
            typ: Type::Int,
            value: PrimitiveValue::Int(v),
        }
    }

    pub fn float(v: f64) -> Self {
        Primitive {
            typ: Type::Float,
            value: PrimitiveValue::Float(v),
        }
    }

    pub fn string(v: impl Into<String>) -> Self {
        Primitive {
            typ: Type::String,
            value: PrimitiveValue::String(v.into()),
        }
    }

    pub fn regex(v: impl Into<String>) -> Self {
        Primitive {
            typ: Type::Regex,
            value: PrimitiveValue::String(v.into()),
        }
    }

    pub fn time(v: DateTime<Utc>) -> Self {
        Primitive {
            typ: Type::Time,
            value: PrimitiveValue::Time(v),
        }
    }

    /// The point in time that never arrives.
    pub fn never() -> Self {
        Primitive::time(DateTime::<Utc>::MAX_UTC)
    }

    pub fn reference(r: Ref) -> Self {
        Primitive {
            typ: Type::Ref,
            value: PrimitiveValue::Ref(r),
        }
    }

    /// Points at a block. `block` is the block's binding ref.
    pub fn function(block: Ref) -> Self {
        Primitive {
            typ: Type::FunctionLike,
            value: PrimitiveValue::Ref(block),
        }
    }

    pub fn array(items: Vec<Primitive>, child: Type) -> Self {
        Primitive {
            typ: Type::array(child),
            value: PrimitiveValue::Array(items),
        }
    }

    pub fn map(entries: BTreeMap<String, Primitive>, value_type: Type) -> Self {
        Primitive {
            typ: Type::map(Type::String, value_type),
            value: PrimitiveValue::Map(entries),
        }
    }

    /// The referenced chunk or block, for `Ref` and function primitives.
    pub fn as_ref(&self) -> Option<Ref> {
        match self.value {
            PrimitiveValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_ref(&self) -> bool {
        self.typ == Type::Ref
    }

    pub fn is_never(&self) -> bool {
        matches!(self.value, PrimitiveValue::Time(t) if t == DateTime::<Utc>::MAX_UTC)
    }
}

// ─── Chunks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub typ: Type,
    pub binding: Option<Ref>,
    pub args: Vec<Primitive>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Chunk {
    Primitive { id: String, primitive: Primitive },
    Function { id: String, function: Function },
    Property { id: String, typ: Type },
}

impl Chunk {
    pub fn primitive(primitive: Primitive) -> Self {
        Chunk::Primitive {
            id: String::new(),
            primitive,
        }
    }

    pub fn function(id: impl Into<String>, typ: Type, binding: Option<Ref>, args: Vec<Primitive>) -> Self {
        Chunk::Function {
            id: id.into(),
            function: Function { typ, binding, args },
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Chunk::Primitive { id, .. } | Chunk::Function { id, .. } | Chunk::Property { id, .. } => id,
        }
    }

    pub fn typ(&self) -> Type {
        match self {
            Chunk::Primitive { primitive, .. } => primitive.typ.clone(),
            Chunk::Function { function, .. } => function.typ.clone(),
            Chunk::Property { typ, .. } => typ.clone(),
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Chunk::Function { function, .. } => Some(function),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut Function> {
        match self {
            Chunk::Function { function, .. } => Some(function),
            _ => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Chunk::Primitive { primitive, .. } => Some(primitive),
            _ => None,
        }
    }

    /// A constant that never changes at runtime.
    pub fn is_static(&self) -> bool {
        matches!(self, Chunk::Primitive { primitive, .. } if !primitive.is_ref())
    }

    /// A resource reference without arguments or binding, e.g. `mondoo`.
    pub fn is_bare_resource(&self) -> bool {
        matches!(self, Chunk::Function { function, .. }
            if function.binding.is_none() && function.args.is_empty() && function.typ.is_resource())
    }
}

/// The comparison operator an id starts with, if any (`==string` → `==`).
pub fn comparable_operator(id: &str) -> Option<&'static str> {
    ["==", "!=", "=~", "!~", ">=", "<=", ">", "<", "&&", "||"]
        .into_iter()
        .find(|op| id.starts_with(op))
}

/// The arithmetic operator an id starts with, if any (`+int` → `+`).
pub fn arithmetic_operator(id: &str) -> Option<&'static str> {
    ["+", "-", "*", "/", "%"].into_iter().find(|op| id.starts_with(op))
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub chunks: Vec<Chunk>,
    pub entrypoints: Vec<Ref>,
    pub datapoints: Vec<Ref>,
    pub parameters: u32,
    pub single_value: bool,
}

/// A chunk removed from the end of a block.
#[derive(Debug, Clone)]
pub struct PoppedChunk {
    pub chunk: Chunk,
    pub entrypoint: bool,
    pub datapoint: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub id: String,
    pub blocks: Vec<Block>,
    pub checksums: BTreeMap<Ref, String>,
}

impl Default for Code {
    fn default() -> Self {
        Self::new()
    }
}

impl Code {
    /// Code with one empty top-level block.
    pub fn new() -> Self {
        Code {
            id: String::new(),
            blocks: vec![Block::default()],
            checksums: BTreeMap::new(),
        }
    }

    pub fn block(&self, r: Ref) -> Option<&Block> {
        let idx = (r.block as usize).checked_sub(1)?;
        self.blocks.get(idx)
    }

    pub fn block_mut(&mut self, r: Ref) -> Option<&mut Block> {
        let idx = (r.block as usize).checked_sub(1)?;
        self.blocks.get_mut(idx)
    }

    pub fn chunk(&self, r: Ref) -> Option<&Chunk> {
        let slot = (r.slot as usize).checked_sub(1)?;
        self.block(r)?.chunks.get(slot)
    }

    pub fn chunk_mut(&mut self, r: Ref) -> Option<&mut Chunk> {
        let slot = (r.slot as usize).checked_sub(1)?;
        self.block_mut(r)?.chunks.get_mut(slot)
    }

    pub fn checksum(&self, r: Ref) -> Option<&str> {
        self.checksums.get(&r).map(String::as_str)
    }

    pub fn add_block(&mut self) -> Ref {
        self.blocks.push(Block::default());
        Ref::binding_of(self.blocks.len() as u32)
    }

    pub fn last_block_ref(&self) -> Ref {
        Ref::binding_of(self.blocks.len() as u32)
    }

    /// Ref of the last chunk in the block, or the block itself when empty.
    pub fn tail_ref(&self, block: Ref) -> Ref {
        let len = self.block(block).map_or(0, |b| b.chunks.len());
        Ref::slot_of(block.block, len as u32)
    }

    /// Appends a chunk and records its checksum.
    pub fn add_chunk(&mut self, block: Ref, chunk: Chunk) -> Ref {
        let sum = checksum::chunk_checksum(self, &chunk);
        let Some(b) = self.block_mut(block) else {
            log::error!("add_chunk on missing block {block}");
            return block;
        };
        b.chunks.push(chunk);
        let r = Ref::slot_of(block.block, b.chunks.len() as u32);
        self.checksums.insert(r, sum);
        r
    }

    /// Appends a block argument. Its checksum is that of the value bound to it.
    pub fn add_argument_placeholder(&mut self, block: Ref, typ: Type, checksum: String) -> Ref {
        let Some(b) = self.block_mut(block) else {
            log::error!("argument placeholder on missing block {block}");
            return block;
        };
        b.chunks.push(Chunk::primitive(Primitive::placeholder(typ)));
        b.parameters += 1;
        let r = Ref::slot_of(block.block, b.chunks.len() as u32);
        self.checksums.insert(r, checksum);
        r
    }

    pub fn pop_chunk(&mut self, block: Ref) -> Option<PoppedChunk> {
        let tail = self.tail_ref(block);
        let b = self.block_mut(block)?;
        let chunk = b.chunks.pop()?;
        let entrypoint = remove_ref(&mut b.entrypoints, tail);
        let datapoint = remove_ref(&mut b.datapoints, tail);
        self.checksums.remove(&tail);
        Some(PoppedChunk {
            chunk,
            entrypoint,
            datapoint,
        })
    }

    /// Recomputes the checksum of a chunk after its arguments changed.
    pub fn refresh_checksum(&mut self, r: Ref) {
        if let Some(chunk) = self.chunk(r) {
            let sum = checksum::chunk_checksum(self, chunk);
            self.checksums.insert(r, sum);
        }
    }

    pub fn replace_entrypoint(&mut self, old: Ref, new: Ref) {
        if let Some(b) = self.block_mut(old) {
            for ep in b.entrypoints.iter_mut().filter(|ep| **ep == old) {
                *ep = new;
            }
        }
    }

    /// Drops every block after the first `len` blocks along with their checksums.
    pub fn truncate_blocks(&mut self, len: usize) {
        self.blocks.truncate(len);
        self.checksums.retain(|r, _| (r.block as usize) <= len);
    }

    pub fn entrypoints(&self) -> &[Ref] {
        self.blocks.first().map_or(&[], |b| &b.entrypoints)
    }

    pub fn datapoints(&self) -> &[Ref] {
        self.blocks.first().map_or(&[], |b| &b.datapoints)
    }

    /// Type of the chunk at `r`, following reference primitives.
    pub fn dereferenced_type(&self, r: Ref) -> Option<Type> {
        let mut current = r;
        let mut seen = BTreeSet::new();
        loop {
            let chunk = self.chunk(current)?;
            match chunk.as_primitive() {
                Some(p) if p.is_ref() => {
                    let next = p.as_ref()?;
                    if !seen.insert(next) {
                        return None;
                    }
                    current = next;
                }
                _ => return Some(chunk.typ()),
            }
        }
    }

    /// The type a block evaluates to: its single entrypoint's type, or
    /// `Block` when it has several.
    pub fn dereferenced_block_type(&self, block: Ref) -> Type {
        let Some(b) = self.block(block) else {
            return Type::Nil;
        };
        match b.entrypoints.as_slice() {
            [ep] => self.dereferenced_type(*ep).unwrap_or(Type::Any),
            _ => Type::Block,
        }
    }

    /// Refs whose values should be reported next to the result of the
    /// entrypoint `r`: both sides of a comparison, the failing entries of a
    /// list assertion and the values a `@msg` template refers to.
    pub fn ref_datapoints(&self, r: Ref, assertions: &BTreeMap<String, AssertionMessage>) -> Vec<Ref> {
        let Some(chunk) = self.chunk(r) else {
            return Vec::new();
        };
        let Some(function) = chunk.as_function() else {
            return Vec::new();
        };

        let mut res = Vec::new();
        match chunk.id() {
            "$all" | "$none" | "$one" | "$any" => {
                if let Some(binding) = function.binding {
                    res.push(binding);
                }
            }
            id if comparable_operator(id).is_some() => {
                if let Some(left) = function.binding {
                    if self.chunk(left).is_some_and(|c| !c.is_static()) {
                        res.push(left);
                    }
                }
                if let Some(right) = function.args.first().filter(|p| p.is_ref()).and_then(Primitive::as_ref) {
                    res.push(right);
                }
            }
            _ => return res,
        }

        let assertion = self.checksum(r).and_then(|sum| assertions.get(sum));
        if let Some(msg) = assertion.filter(|a| !a.decode_block) {
            res.extend(msg.refs.iter().copied());
        }
        res
    }

    /// Recomputes the code id from the checksums of all entry and data points.
    pub fn update_id(&mut self) {
        self.id = checksum::code_id(self);
    }
}

fn remove_ref(refs: &mut Vec<Ref>, r: Ref) -> bool {
    let before = refs.len();
    refs.retain(|x| *x != r);
    refs.len() != before
}

// ─── Bundle ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Documentation {
    pub field: String,
    pub title: String,
    pub desc: String,
}

/// A user-facing message template from an `@msg` comment. After compilation
/// only `checksums` are kept; `refs` is the intermediate form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertionMessage {
    pub template: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<Ref>,
    pub checksums: Vec<String>,
    pub decode_block: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeBundle {
    pub code: Code,
    pub suggestions: Vec<Documentation>,
    pub source: String,
    pub labels: BTreeMap<String, String>,
    pub props: BTreeMap<String, Type>,
    pub version: String,
    pub min_version: String,
    pub assertions: BTreeMap<String, AssertionMessage>,
    pub auto_expand: BTreeMap<String, Ref>,
    pub vars: BTreeMap<Ref, String>,
}

impl CodeBundle {
    pub fn new() -> Self {
        CodeBundle {
            code: Code::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        }
    }

    /// Label of the chunk at `r`, if one was recorded.
    pub fn label(&self, r: Ref) -> Option<&str> {
        let sum = self.code.checksum(r)?;
        self.labels.get(sum).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_encoding() {
        let r = Ref::slot_of(1, 2);
        let raw: u64 = r.into();
        assert_eq!(raw, (1 << 32) | 2);
        assert_eq!(Ref::from(raw), r);
        assert_eq!(r.block_ref(), Ref::binding_of(1));
        assert_eq!(serde_json::to_string(&r).unwrap(), raw.to_string());
    }

    #[test]
    fn test_add_and_pop_chunks() {
        let mut code = Code::new();
        let block = Ref::binding_of(1);
        let a = code.add_chunk(block, Chunk::primitive(Primitive::int(1)));
        let b = code.add_chunk(block, Chunk::function("==int", Type::Bool, Some(a), vec![Primitive::int(2)]));
        assert_eq!(a, Ref::slot_of(1, 1));
        assert_eq!(b, Ref::slot_of(1, 2));
        assert_eq!(code.tail_ref(block), b);

        code.blocks[0].entrypoints.push(b);
        let popped = code.pop_chunk(block).unwrap();
        assert!(popped.entrypoint);
        assert!(code.checksum(b).is_none());
        assert!(code.blocks[0].entrypoints.is_empty());
    }

    #[test]
    fn test_placeholder_checksum_is_binding_checksum() {
        let mut code = Code::new();
        let top = Ref::binding_of(1);
        let value = code.add_chunk(top, Chunk::primitive(Primitive::string("x")));
        let child = code.add_block();
        let sum = code.checksum(value).unwrap().to_string();
        let slot = code.add_argument_placeholder(child, Type::String, sum.clone());
        assert_eq!(slot, Ref::slot_of(2, 1));
        assert_eq!(code.checksum(slot), Some(sum.as_str()));
        assert_eq!(code.blocks[1].parameters, 1);
    }

    #[test]
    fn test_dereferenced_type_follows_refs() {
        let mut code = Code::new();
        let top = Ref::binding_of(1);
        let value = code.add_chunk(top, Chunk::primitive(Primitive::string("x")));
        let alias = code.add_chunk(top, Chunk::primitive(Primitive::reference(value)));
        assert_eq!(code.dereferenced_type(alias), Some(Type::String));
    }

    #[test]
    fn test_ref_datapoints_skip_static_left() {
        let mut code = Code::new();
        let top = Ref::binding_of(1);
        let left = code.add_chunk(top, Chunk::primitive(Primitive::int(1)));
        let cmp = code.add_chunk(top, Chunk::function("==int", Type::Bool, Some(left), vec![Primitive::int(1)]));
        assert!(code.ref_datapoints(cmp, &BTreeMap::new()).is_empty());

        let field = code.add_chunk(top, Chunk::function("mondoo", Type::resource("mondoo"), None, vec![]));
        let cmp = code.add_chunk(top, Chunk::function("==mondoo", Type::Bool, Some(field), vec![Primitive::reference(field)]));
        assert_eq!(code.ref_datapoints(cmp, &BTreeMap::new()), vec![field, field]);
    }

    #[test]
    fn test_operator_prefixes() {
        assert_eq!(comparable_operator(">=int"), Some(">="));
        assert_eq!(comparable_operator("==empty"), Some("=="));
        assert_eq!(comparable_operator("length"), None);
        assert_eq!(arithmetic_operator("+string"), Some("+"));
    }
}
