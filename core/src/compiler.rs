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

//! Lowers the AST into blocks of chunks.
//!
//! One [`Compiler`] owns the bundle being built and an arena of scopes. Every
//! block under construction is described by a [`Frame`]: the block it writes
//! to, its scope, the value it is bound to and the outer refs it reads.
//! Nested blocks get their own frame and scope; reads of outer variables are
//! recorded as dependencies and passed to the block as extra arguments.

use crate::ast::{Arg, Ast, Call, Expression, Value};
use crate::builtins::Handler;
use crate::bytecode::{AssertionMessage, Chunk, CodeBundle, Documentation, Primitive, Ref};
use crate::config::{CompilerConfig, Feature};
use crate::expand;
use crate::parser::ParseError;
use crate::schema::{ResourceInfo, TypedArg};
use crate::suggestions;
use crate::types::Type;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// ─── Error Types ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("cannot find resource for identifier '{0}'")]
    ResourceNotFound(String),
    #[error("cannot find field or resource '{id}' in block for type '{binding}'")]
    FieldNotFound { id: String, binding: String },
    #[error("cannot find property '{0}', please define it first")]
    PropertyNotFound(String),
    #[error("failed to compile: {0}")]
    Operation(String),
    #[error("failed to compile: received an unspecified empty code structure")]
    EmptyCode,
    #[error("failed to compile: received an empty code structure. this is a bug with the query compilation")]
    NoEntrypoints,
    #[error("{0}")]
    Invalid(String),
    /// A conversion keyword used as something else; resolution continues.
    #[error("not a type conversion")]
    NotConversion,
}

impl CompileError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CompileError::Invalid(msg.into())
    }
}

/// A failed compile. The partial bundle carries suggestions for editors.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct CompileFailure {
    pub error: CompileError,
    pub bundle: Option<Box<CodeBundle>>,
}

impl CompileFailure {
    pub fn new(error: CompileError, bundle: Option<CodeBundle>) -> Self {
        CompileFailure {
            error,
            bundle: bundle.map(Box::new),
        }
    }
}

lazy_static::lazy_static! {
    static ref ACCESSOR_RE: Regex = Regex::new(r"^[\p{L}\d_]+$").expect("accessor pattern is a valid regex");
}

// ─── Scopes ──────────────────────────────────────────────────────────────────

pub type ScopeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub reference: Ref,
    pub typ: Type,
    /// Scope whose block stops being standalone once this variable is read.
    pub marks: Option<ScopeId>,
}

impl Variable {
    pub fn bound(reference: Ref, typ: Type) -> Self {
        Variable {
            name: String::new(),
            reference,
            typ,
            marks: None,
        }
    }

    pub fn named(name: impl Into<String>, reference: Ref, typ: Type) -> Self {
        Variable {
            name: name.into(),
            ..Variable::bound(reference, typ)
        }
    }
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    vars: BTreeMap<String, Variable>,
    standalone: bool,
}

/// State of one block under construction.
#[derive(Debug, Clone)]
pub struct Frame {
    pub scope: ScopeId,
    pub block_ref: Ref,
    pub binding: Option<Variable>,
    /// Refs outside this block that its code reads.
    pub deps: Vec<Ref>,
    pub prev_id: String,
    pub comment: String,
}

/// A compiled child block together with what it needs from the outside.
#[derive(Debug)]
pub(crate) struct BlockRefs {
    pub block: Option<Ref>,
    pub deps: Vec<Ref>,
    pub standalone: bool,
    pub binding: Ref,
    /// Whether the block runs once per list entry.
    pub is_list: bool,
}

struct Checkpoint {
    blocks: usize,
    chunks: usize,
    suggestions: usize,
    labels: BTreeMap<String, String>,
    assertions: BTreeMap<String, AssertionMessage>,
    min_version: String,
}

// ─── Compiler ────────────────────────────────────────────────────────────────

pub struct Compiler<'c> {
    pub(crate) config: &'c CompilerConfig,
    props: &'c BTreeMap<String, Primitive>,
    pub(crate) bundle: CodeBundle,
    scopes: Vec<Scope>,
}

impl<'c> Compiler<'c> {
    pub fn new(config: &'c CompilerConfig, props: &'c BTreeMap<String, Primitive>) -> Self {
        Compiler {
            config,
            props,
            bundle: CodeBundle::new(),
            scopes: vec![Scope {
                parent: None,
                vars: BTreeMap::new(),
                standalone: true,
            }],
        }
    }

    /// The frame of the top-level block.
    pub fn root_frame(&self) -> Frame {
        Frame {
            scope: 0,
            block_ref: Ref::binding_of(1),
            binding: None,
            deps: Vec::new(),
            prev_id: String::new(),
            comment: String::new(),
        }
    }

    pub fn into_bundle(self) -> CodeBundle {
        self.bundle
    }

    /// Compiles a whole program into the top-level block and resolves its
    /// entry and data points.
    pub fn compile_parsed(&mut self, frame: &mut Frame, ast: &Ast) -> Result<(), CompileError> {
        self.compile_expressions(frame, &ast.expressions)?;
        expand::post_compile(self);
        self.update_entrypoints(frame, true);
        self.update_vars(frame);
        self.bundle.code.update_id();
        self.fail_if_no_entrypoints()
    }

    fn fail_if_no_entrypoints(&self) -> Result<(), CompileError> {
        if !self.config.is_active(Feature::FailIfNoEntryPoints) {
            return Ok(());
        }
        let code = &self.bundle.code;
        if code.entrypoints().is_empty() && code.datapoints().is_empty() {
            return Err(CompileError::NoEntrypoints);
        }
        Ok(())
    }

    // ─── Scope helpers ───────────────────────────────────────────────────────

    fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            vars: BTreeMap::new(),
            standalone: true,
        });
        self.scopes.len() - 1
    }

    /// Opens a new block nested in `parent`. A binding becomes `_` in the
    /// new scope and the block's first dependency.
    pub(crate) fn new_block_frame(&mut self, parent: &Frame, binding: Option<Variable>) -> Frame {
        let block_ref = self.bundle.code.add_block();
        let scope = self.new_scope(parent.scope);
        let mut deps = Vec::new();
        if let Some(b) = &binding {
            self.scopes[scope].vars.insert("_".into(), b.clone());
            deps.push(b.reference);
        }
        Frame {
            scope,
            block_ref,
            binding,
            deps,
            prev_id: String::new(),
            comment: String::new(),
        }
    }

    /// A frame writing to an existing block, used by passes that run after
    /// the main compile.
    pub(crate) fn detached_frame(&self, block_ref: Ref) -> Frame {
        Frame {
            block_ref: block_ref.block_ref(),
            ..self.root_frame()
        }
    }

    pub(crate) fn lookup_var(&self, scope: ScopeId, name: &str) -> Option<&Variable> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id];
            if let Some(v) = s.vars.get(name) {
                return Some(v);
            }
            current = s.parent;
        }
        None
    }

    pub(crate) fn add_var(&mut self, frame: &Frame, name: impl Into<String>, var: Variable) {
        self.scopes[frame.scope].vars.insert(name.into(), var);
    }

    pub(crate) fn remove_var(&mut self, frame: &Frame, name: &str) {
        self.scopes[frame.scope].vars.remove(name);
    }

    pub(crate) fn is_standalone(&self, frame: &Frame) -> bool {
        self.scopes[frame.scope].standalone
    }

    pub(crate) fn set_standalone(&mut self, frame: &Frame, standalone: bool) {
        self.scopes[frame.scope].standalone = standalone;
    }

    // ─── Code helpers ────────────────────────────────────────────────────────

    pub(crate) fn add_chunk(&mut self, frame: &Frame, chunk: Chunk) -> Ref {
        self.bundle.code.add_chunk(frame.block_ref, chunk)
    }

    pub(crate) fn tail_ref(&self, frame: &Frame) -> Ref {
        self.bundle.code.tail_ref(frame.block_ref)
    }

    pub(crate) fn checksum_of(&self, r: Ref) -> String {
        self.bundle.code.checksum(r).unwrap_or_default().to_string()
    }

    pub(crate) fn chunk_type(&self, r: Ref) -> Type {
        self.bundle.code.chunk(r).map_or(Type::Nil, Chunk::typ)
    }

    pub(crate) fn set_label(&mut self, r: Ref, label: impl Into<String>) {
        let label = label.into();
        if label.is_empty() {
            return;
        }
        let sum = self.checksum_of(r);
        self.bundle.labels.insert(sum, label);
    }

    pub(crate) fn set_single_value(&mut self, frame: &Frame) {
        if let Some(b) = self.bundle.code.block_mut(frame.block_ref) {
            b.single_value = true;
        }
    }

    pub(crate) fn set_entrypoints(&mut self, frame: &Frame, entrypoints: Vec<Ref>) {
        if let Some(b) = self.bundle.code.block_mut(frame.block_ref) {
            b.entrypoints = entrypoints;
        }
    }

    pub(crate) fn add_datapoint(&mut self, frame: &Frame, r: Ref) {
        if let Some(b) = self.bundle.code.block_mut(frame.block_ref) {
            b.datapoints.push(r);
        }
    }

    /// The type a primitive evaluates to, looking through refs.
    pub(crate) fn dereference_type(&self, p: &Primitive) -> Result<Type, CompileError> {
        if !p.is_ref() {
            return Ok(p.typ.clone());
        }
        let r = p
            .as_ref()
            .ok_or_else(|| CompileError::invalid("reference primitive without a target"))?;
        self.bundle
            .code
            .dereferenced_type(r)
            .ok_or_else(|| CompileError::invalid(format!("cannot find chunk for ref {r}")))
    }

    /// The element type of a list resource.
    pub(crate) fn list_type(&self, typ: &Type) -> Option<Type> {
        let schema = self.config.schema.as_ref();
        typ.resource_name().and_then(|n| schema.lookup(n))?.list_type.clone()
    }

    fn add_suggestions(&mut self, docs: &BTreeMap<String, Documentation>, query: &str) {
        let found = suggestions::matching(docs, query);
        self.bundle.suggestions.extend(found);
    }

    pub(crate) fn add_field_suggestions(&mut self, typ: &Type, query: &str) {
        let docs = suggestions::available_fields(self.config, typ);
        self.add_suggestions(&docs, query);
    }

    fn update_min_version(&mut self, resource: &str, field: &str) {
        let config = self.config;
        let schema = config.schema.as_ref();
        let Some(info) = schema.lookup(resource) else {
            return;
        };
        let mut version = info.min_version.as_str();
        if let Some(f) = info.fields.get(field).filter(|f| !f.min_version.is_empty()) {
            version = &f.min_version;
        }
        if version_gt(version, &self.bundle.min_version) {
            self.bundle.min_version = version.to_string();
        }
    }

    fn checkpoint(&self, frame: &Frame) -> Checkpoint {
        Checkpoint {
            blocks: self.bundle.code.blocks.len(),
            chunks: self.bundle.code.block(frame.block_ref).map_or(0, |b| b.chunks.len()),
            suggestions: self.bundle.suggestions.len(),
            labels: self.bundle.labels.clone(),
            assertions: self.bundle.assertions.clone(),
            min_version: self.bundle.min_version.clone(),
        }
    }

    fn rollback(&mut self, frame: &Frame, cp: &Checkpoint) {
        let code = &mut self.bundle.code;
        code.truncate_blocks(cp.blocks);
        while code.block(frame.block_ref).is_some_and(|b| b.chunks.len() > cp.chunks) {
            code.pop_chunk(frame.block_ref);
        }
        self.bundle.suggestions.truncate(cp.suggestions);
        self.bundle.labels = cp.labels.clone();
        self.bundle.assertions = cp.assertions.clone();
        self.bundle.min_version = cp.min_version.clone();
    }

    // ─── Blocks ──────────────────────────────────────────────────────────────

    /// Compiles `exprs` in a new block whose single argument is the value at
    /// `binding`. Returns the child frame even when compilation failed.
    pub(crate) fn blockcompile_on_resource(
        &mut self,
        parent: &Frame,
        exprs: &[Expression],
        typ: &Type,
        binding: Ref,
        name: &str,
    ) -> (Frame, Result<(), CompileError>) {
        let mut child = self.new_block_frame(parent, None);
        let sum = self.checksum_of(binding);
        let arg = self
            .bundle
            .code
            .add_argument_placeholder(child.block_ref, typ.clone(), sum);

        let var = Variable {
            marks: Some(child.scope),
            ..Variable::bound(arg, typ.clone())
        };
        child.binding = Some(var.clone());
        self.add_var(&child, name, var);

        let res = self.compile_expressions(&mut child, exprs);
        if res.is_ok() {
            self.update_entrypoints(&child, false);
            self.update_vars(&child);
        }
        (child, res)
    }

    fn block_on_resource(
        &mut self,
        parent: &Frame,
        exprs: &[Expression],
        typ: &Type,
        binding: Ref,
        name: &str,
    ) -> Result<BlockRefs, CompileError> {
        let (child, res) = self.blockcompile_on_resource(parent, exprs, typ, binding, name);
        res?;
        let block = child.block_ref;
        let mut deps = child.deps.clone();
        deps.retain(|r| r.block != block.block);
        Ok(BlockRefs {
            block: Some(block),
            deps,
            standalone: self.is_standalone(&child),
            binding,
            is_list: false,
        })
    }

    /// Compiles a block bound to the value at `binding`. Arrays bind each
    /// element; list resources are redirected onto their `list` field.
    pub(crate) fn block_expressions(
        &mut self,
        frame: &Frame,
        exprs: &[Expression],
        typ: &Type,
        binding: Ref,
        name: &str,
    ) -> Result<BlockRefs, CompileError> {
        if exprs.is_empty() {
            return Ok(BlockRefs {
                block: None,
                deps: Vec::new(),
                standalone: true,
                binding,
                is_list: false,
            });
        }

        if let Type::Array(child) = typ {
            let mut refs = self.block_on_resource(frame, exprs, child, binding, name)?;
            refs.is_list = true;
            return Ok(refs);
        }

        let Some(list) = self.list_type(typ) else {
            return self.block_on_resource(frame, exprs, typ, binding, name);
        };

        let cp = self.checkpoint(frame);
        let list_ref = self.add_chunk(frame, Chunk::function("list", Type::array(list.clone()), Some(binding), vec![]));
        match self.block_on_resource(frame, exprs, &list, list_ref, name) {
            Ok(mut refs) => {
                refs.is_list = true;
                Ok(refs)
            }
            Err(err) => {
                self.rollback(frame, &cp);
                self.legacy_list_block(frame, exprs, typ, binding, name, err)
            }
        }
    }

    /// Older queries wrote blocks on list resources against the resource
    /// itself (`users { list }`). Retry that way before giving up.
    fn legacy_list_block(
        &mut self,
        frame: &Frame,
        exprs: &[Expression],
        typ: &Type,
        binding: Ref,
        name: &str,
        err: CompileError,
    ) -> Result<BlockRefs, CompileError> {
        let cp = self.checkpoint(frame);
        match self.block_on_resource(frame, exprs, typ, binding, name) {
            Ok(refs) => {
                log::warn!(
                    "deprecated: block on list resource '{}' resolved against the resource itself, access its entries directly instead",
                    typ.label()
                );
                Ok(refs)
            }
            Err(_) => {
                self.rollback(frame, &cp);
                Err(err)
            }
        }
    }

    pub(crate) fn compile_block(
        &mut self,
        frame: &mut Frame,
        exprs: &[Expression],
        typ: &Type,
        binding: Ref,
    ) -> Result<Type, CompileError> {
        let globbed: Vec<Expression>;
        let mut exprs = exprs;
        if exprs.len() == 1 && exprs[0].ident() == Some("*") {
            let target = match typ {
                Type::Array(child) => Some((**child).clone()),
                t => self.list_type(t).or_else(|| Some(t.clone())),
            };
            if let Some(target) = target.filter(Type::is_resource) {
                globbed = suggestions::glob_fields(self.config, &target)
                    .into_iter()
                    .map(|f| Expression::from_operand(crate::ast::Operand::ident(f)))
                    .collect();
                exprs = &globbed;
            }
        }

        let refs = self.block_expressions(frame, exprs, typ, binding, "_")?;
        let Some(block) = refs.block else {
            return Ok(typ.clone());
        };

        let mut args = vec![Primitive::function(block)];
        args.extend(
            refs.deps
                .iter()
                .filter(|r| r.block == frame.block_ref.block)
                .map(|r| Primitive::reference(*r)),
        );
        frame.deps.extend(refs.deps);

        let result = if refs.is_list {
            Type::array(Type::Block)
        } else {
            Type::Block
        };
        self.add_chunk(frame, Chunk::function("{}", result.clone(), Some(refs.binding), args));
        Ok(result)
    }

    /// Arguments of a chunk that runs `block` on the value at `bound`: the
    /// value, the block, then the refs of this block the child reads.
    pub(crate) fn closure_args(&mut self, frame: &mut Frame, bound: Ref, block: Ref, deps: &[Ref]) -> Vec<Primitive> {
        let mut args = vec![Primitive::reference(bound), Primitive::function(block)];
        args.extend(
            deps.iter()
                .filter(|r| r.block == frame.block_ref.block)
                .map(|r| Primitive::reference(*r)),
        );
        frame.deps.extend_from_slice(deps);
        args
    }

    /// Blocks that follow keywords instead of values: `if`, `else` and
    /// `switch` bodies.
    fn compile_unbound_block(
        &mut self,
        frame: &mut Frame,
        exprs: &[Expression],
        chunk_ref: Ref,
    ) -> Result<Type, CompileError> {
        let id = self
            .bundle
            .code
            .chunk(chunk_ref)
            .map(|c| c.id().to_string())
            .unwrap_or_default();
        match id.as_str() {
            "if" => {
                let t = self.compile_if_block(frame, exprs, chunk_ref)?;
                self.bundle.code.refresh_checksum(chunk_ref);
                Ok(t)
            }
            "switch" => self.compile_switch_block(frame, exprs, chunk_ref),
            _ => Err(CompileError::invalid(format!(
                "don't know how to compile unbound block on call `{id}`"
            ))),
        }
    }

    fn compile_if_block(&mut self, frame: &mut Frame, exprs: &[Expression], if_ref: Ref) -> Result<Type, CompileError> {
        if frame.prev_id == "else" {
            frame.prev_id.clear();
        }

        let mut child = self.new_block_frame(frame, frame.binding.clone());
        self.compile_expressions(&mut child, exprs)?;
        self.update_entrypoints(&child, false);

        let block = child.block_ref;
        let (child_single, child_empty) = self
            .bundle
            .code
            .block(block)
            .map_or((false, true), |b| (b.single_value, b.chunks.is_empty()));
        if child_single {
            self.set_single_value(frame);
        }
        if child_empty && self.is_standalone(frame) {
            let nil = self.add_chunk(&child, Chunk::primitive(Primitive::nil()));
            let ret = self.add_chunk(&child, Chunk::function("return", Type::Nil, None, vec![Primitive::reference(nil)]));
            self.set_single_value(&child);
            self.set_entrypoints(&child, vec![ret]);
        }

        let dep_args: Vec<Primitive> = child
            .deps
            .iter()
            .filter(|r| r.block == frame.block_ref.block)
            .map(|r| Primitive::reference(*r))
            .collect();
        frame.deps.extend(child.deps.iter().filter(|r| r.block != block.block));

        let parent_single = self.bundle.code.block(frame.block_ref).is_some_and(|b| b.single_value);
        let last_type = self
            .bundle
            .code
            .block(block)
            .and_then(|b| b.chunks.last())
            .map(Chunk::typ);

        let function = self
            .bundle
            .code
            .chunk_mut(if_ref)
            .and_then(Chunk::as_function_mut)
            .ok_or_else(|| CompileError::invalid("if-block without an if-statement"))?;
        function.args.push(Primitive::function(block));
        function.args.push(Primitive::array(dep_args, Type::Ref));

        if let Some(last_type) = last_type {
            let enforce = if parent_single { last_type } else { Type::Block };
            function.typ = function.typ.enforce(&enforce).ok_or_else(|| {
                CompileError::invalid(
                    "mismatched return type for child block of if-function; make sure all return types are the same",
                )
            })?;
        }
        Ok(Type::Nil)
    }

    fn compile_switch_block(
        &mut self,
        frame: &mut Frame,
        exprs: &[Expression],
        switch_ref: Ref,
    ) -> Result<Type, CompileError> {
        if self.tail_ref(frame) != switch_ref {
            return Err(CompileError::invalid(
                "failed to compile switch statement, it wasn't on the top of the compile stack",
            ));
        }
        let popped = self
            .bundle
            .code
            .pop_chunk(frame.block_ref)
            .ok_or_else(|| CompileError::invalid("failed to compile switch statement, missing switch chunk"))?;
        let mut chunk = popped.chunk;

        let arg = chunk
            .as_function()
            .and_then(|f| f.args.first())
            .cloned()
            .unwrap_or_else(Primitive::unset);
        let bind = if arg.typ == Type::Unset {
            None
        } else if let Some(r) = arg.as_ref().filter(|_| arg.is_ref()) {
            let typ = self.bundle.code.dereferenced_type(r).unwrap_or(Type::Any);
            Some(Variable::bound(r, typ))
        } else {
            let typ = arg.typ.clone();
            let r = self.add_chunk(frame, Chunk::primitive(arg));
            Some(Variable::bound(r, typ))
        };

        let res = self.compile_switch_cases(frame, exprs, bind, &mut chunk);
        self.add_chunk(frame, chunk);
        res
    }

    fn compile_switch_cases(
        &mut self,
        frame: &mut Frame,
        exprs: &[Expression],
        bind: Option<Variable>,
        chunk: &mut Chunk,
    ) -> Result<Type, CompileError> {
        let mut last_type = Type::Unset;
        for pair in exprs.chunks(2) {
            let condition = if pair[0].is_empty() {
                Primitive::bool(true)
            } else {
                let prev = std::mem::replace(&mut frame.binding, bind.clone());
                let res = self.compile_expression(frame, &pair[0]);
                frame.binding = prev;
                res?
            };

            let body = pair
                .get(1)
                .ok_or_else(|| CompileError::invalid("missing block expression in calling `case`/`default` statement"))?;
            let block_exprs = match &body.operand {
                Some(op) if body.ident() == Some(crate::parser::BLOCK_CALL) => op.block.as_deref(),
                _ => None,
            }
            .ok_or_else(|| CompileError::invalid("expected block inside case/default statement"))?;

            let mut child = self.new_block_frame(frame, bind.clone());
            self.compile_expressions(&mut child, block_exprs)?;
            self.update_entrypoints(&child, false);
            self.set_single_value(&child);

            let typ = self
                .bundle
                .code
                .block(child.block_ref)
                .and_then(|b| b.chunks.last())
                .map_or(Type::Nil, Chunk::typ);

            let dep_args: Vec<Primitive> = child
                .deps
                .iter()
                .filter(|r| r.block == frame.block_ref.block)
                .map(|r| Primitive::reference(*r))
                .collect();
            frame.deps.extend(child.deps.iter().filter(|r| r.block != child.block_ref.block));

            let Some(function) = chunk.as_function_mut() else {
                return Err(CompileError::invalid("switch statement is not a function"));
            };
            if last_type == Type::Unset {
                last_type = typ;
            } else {
                if typ != last_type {
                    last_type = Type::Any;
                }
                function.typ = last_type.clone();
            }
            function.args.push(condition);
            function.args.push(Primitive::function(child.block_ref));
            function.args.push(Primitive::array(dep_args, Type::Ref));
        }
        if let Some(function) = chunk.as_function_mut() {
            if function.typ == Type::Unset {
                function.typ = last_type;
            }
        }
        Ok(Type::Nil)
    }

    // ─── Arguments ───────────────────────────────────────────────────────────

    fn unnamed_args(&mut self, frame: &mut Frame, label: &str, params: &[TypedArg], args: &[Arg]) -> Result<Vec<Primitive>, CompileError> {
        if args.len() > params.len() {
            return Err(CompileError::invalid(format!(
                "Called {label} with too many arguments (expected {} but got {})",
                params.len(),
                args.len()
            )));
        }

        let mut res = Vec::with_capacity(args.len() * 2);
        for (idx, (arg, param)) in args.iter().zip(params).enumerate() {
            let v = self.compile_expression(frame, &arg.value)?;
            let vt = self.dereference_type(&v)?;
            if vt != param.typ && !(vt == Type::Dict && param.typ == Type::String) {
                return Err(CompileError::invalid(format!(
                    "Incorrect type on argument {idx} in {label}: expected {}, got: {}",
                    param.typ.label(),
                    vt.label()
                )));
            }
            res.push(Primitive::string(param.name.clone()));
            res.push(v);
        }
        Ok(res)
    }

    /// Constructor arguments as alternating name / value primitives.
    fn resource_args(&mut self, frame: &mut Frame, resource: &ResourceInfo, args: &[Arg]) -> Result<Vec<Primitive>, CompileError> {
        if args.first().is_some_and(|a| a.name.is_none()) {
            let Some(init) = &resource.init else {
                return Err(CompileError::invalid(format!(
                    "resource {} does not accept unnamed arguments",
                    resource.name
                )));
            };
            return self.unnamed_args(frame, &format!("resource {}", resource.name), &init.args, args);
        }

        let mut res = Vec::with_capacity(args.len() * 2);
        for arg in args {
            let name = arg.name.as_deref().unwrap_or_default();
            let Some(field) = resource.fields.get(name) else {
                return Err(CompileError::invalid(format!(
                    "resource {} does not have a field named {name}",
                    resource.name
                )));
            };
            let v = self.compile_expression(frame, &arg.value)?;
            let vt = self.dereference_type(&v)?;
            if vt != field.typ {
                return Err(CompileError::invalid(format!(
                    "Wrong type for field {name} in resource {}: expected {}, got {}",
                    resource.name,
                    field.typ.label(),
                    vt.label()
                )));
            }
            res.push(Primitive::string(name));
            res.push(v);
        }
        Ok(res)
    }

    // ─── Identifiers ─────────────────────────────────────────────────────────

    pub(crate) fn compile_builtin_function(
        &mut self,
        frame: &mut Frame,
        handler: &Handler,
        id: &str,
        binding: &Variable,
        call: Option<&Call>,
    ) -> Result<Type, CompileError> {
        if let Some(f) = handler.compile {
            return f(self, frame, &binding.typ, binding.reference, id, call);
        }

        let mut args = Vec::new();
        for arg in call.and_then(Call::args).unwrap_or_default() {
            args.push(self.compile_expression(frame, &arg.value)?);
        }
        handler.signature.validate(&args, self)?;

        let typ = handler.result_type(&binding.typ);
        self.add_chunk(frame, Chunk::function(id, typ.clone(), Some(binding.reference), args));
        Ok(typ)
    }

    /// Array builtins reached through a list resource: binds a `list` chunk
    /// first.
    fn compile_implicit_builtin(&mut self, frame: &Frame, typ: &Type, id: &str) -> Option<(&'c Handler, Variable)> {
        let list = self.list_type(typ)?;
        let config = self.config;
        let handler = config.registry.builtin(&Type::array(list.clone()), id)?;
        let binding = self.tail_ref(frame);
        let r = self.add_chunk(frame, Chunk::function("list", Type::array(list.clone()), Some(binding), vec![]));
        Some((handler, Variable::bound(r, Type::array(list))))
    }

    fn compile_accessor(&mut self, frame: &mut Frame, typ: &Type, r: Ref, expr: &Expression) -> Result<Type, CompileError> {
        let call = Call::Function(vec![Arg::unnamed(expr.clone())]);
        let config = self.config;
        let (handler, binding) = match config.registry.builtin(typ, "[]") {
            Some(h) => (h, Variable::bound(r, typ.clone())),
            None => self
                .compile_implicit_builtin(frame, typ, "[]")
                .ok_or_else(|| CompileError::invalid(format!("cannot find '[]' function on type {}", typ.label())))?,
        };
        self.compile_builtin_function(frame, handler, "[]", &binding, Some(&call))
    }

    fn compile_implicit_resource(
        &mut self,
        frame: &mut Frame,
        id: &str,
        typ: &Type,
        binding: &Variable,
        call: Option<&Call>,
    ) -> Result<Type, CompileError> {
        let config = self.config;
        let schema = config.schema.as_ref();
        let name = typ.resource_name().unwrap_or_default();
        let resource = schema
            .lookup(name)
            .ok_or_else(|| CompileError::invalid(format!("could not find resource {name}")))?;

        if !config.is_active(Feature::ImplicitResourceCreation) {
            self.add_resource(frame, name, resource, call)?;
        } else {
            let mut args = vec![Primitive::reference(binding.reference)];
            if let Some(call_args) = call.and_then(Call::args).filter(|a| !a.is_empty()) {
                args.extend(self.resource_args(frame, resource, call_args)?);
            }
            self.add_chunk(frame, Chunk::function("createResource", typ.clone(), None, args));
        }
        let tail = self.tail_ref(frame);
        self.set_label(tail, id);
        Ok(typ.clone())
    }

    /// Resolves `id` as a field or builtin on `binding`. `Ok(None)` means
    /// nothing by that name exists on the binding's type.
    pub(crate) fn compile_bound_identifier(
        &mut self,
        frame: &mut Frame,
        id: &str,
        binding: &Variable,
        call: Option<&Call>,
    ) -> Result<Option<Type>, CompileError> {
        let typ = &binding.typ;
        let config = self.config;
        if let Some(rname) = typ.resource_name() {
            let schema = config.schema.as_ref();
            let (resource, _) = schema.lookup_field(rname, id);
            let Some(resource) = resource else {
                return Err(CompileError::invalid(format!(
                    "cannot find resource that is called by '{id}' of type {}",
                    typ.label()
                )));
            };

            if let Some((path, fields)) = schema.find_field(resource, id) {
                let Some(field) = fields.last() else {
                    return Ok(None);
                };
                let has_args = call.and_then(Call::args).is_some_and(|a| !a.is_empty());
                if has_args && !field.is_implicit_resource {
                    return Err(CompileError::invalid("cannot call resource field with arguments yet"));
                }
                self.update_min_version(&resource.name, id);

                let ftyp = field.typ.clone();
                if field.is_implicit_resource {
                    return self.compile_implicit_resource(frame, id, &ftyp, binding, call).map(Some);
                }

                let mut last = binding.reference;
                for (name, f) in path.iter().zip(&fields) {
                    last = self.add_chunk(frame, Chunk::function(name, f.typ.clone(), Some(last), vec![]));
                }
                return Ok(Some(ftyp));
            }
        }

        let call = filter_trailing_empty_args(call);
        if let Some(handler) = config.registry.builtin(typ, id) {
            return self.compile_builtin_function(frame, handler, id, binding, call.as_ref()).map(Some);
        }
        if let Some((handler, list)) = self.compile_implicit_builtin(frame, typ, id) {
            return self.compile_builtin_function(frame, handler, id, &list, call.as_ref()).map(Some);
        }
        Ok(None)
    }

    fn add_resource(&mut self, frame: &mut Frame, id: &str, resource: &ResourceInfo, call: Option<&Call>) -> Result<Type, CompileError> {
        let typ = Type::resource(id);
        let args = match call.and_then(Call::args).filter(|a| !a.is_empty()) {
            Some(args) => self.resource_args(frame, resource, args)?,
            None => Vec::new(),
        };
        self.add_chunk(frame, Chunk::function(id, typ.clone(), None, args));
        Ok(typ)
    }

    /// Global resources, matching the longest dotted name (`sshd.config`).
    fn compile_resource<'a>(
        &mut self,
        frame: &mut Frame,
        id: &str,
        calls: &'a [Call],
    ) -> Result<Option<(&'a [Call], Type)>, CompileError> {
        let config = self.config;
        let schema = config.schema.as_ref();
        let Some(mut resource) = schema.lookup(id) else {
            return Ok(None);
        };

        let mut name = id.to_string();
        let mut calls = calls;
        while let Some(Call::Ident { name: next, .. }) = calls.first() {
            let candidate = format!("{name}.{next}");
            let Some(found) = schema.lookup(&candidate) else {
                break;
            };
            resource = found;
            name = candidate;
            calls = &calls[1..];
        }

        let mut call = None;
        if let Some(c @ Call::Function(_)) = calls.first() {
            call = Some(c);
            calls = &calls[1..];
        }

        self.update_min_version(&name, "");
        let typ = self.add_resource(frame, &name, resource, call)?;
        Ok(Some((calls, typ)))
    }

    fn compile_props<'a>(
        &mut self,
        frame: &mut Frame,
        call: Option<&Call>,
        rest: &'a [Call],
    ) -> Result<(&'a [Call], Type), CompileError> {
        if call.and_then(Call::args).is_some_and(|a| !a.is_empty()) {
            return Err(CompileError::invalid("'props' is not a function"));
        }
        let Some(next) = rest.first() else {
            return Err(CompileError::invalid(
                "called 'props' without a property, please provide the name you are trying to access",
            ));
        };
        let Call::Ident { name, .. } = next else {
            return Err(CompileError::invalid(
                "please call 'props' with the name of the property you are trying to access",
            ));
        };

        let props = self.props;
        let Some(prop) = props.get(name) else {
            let docs: BTreeMap<String, Documentation> = props
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        Documentation {
                            field: k.clone(),
                            title: format!("{k} ({})", v.typ.label()),
                            desc: String::new(),
                        },
                    )
                })
                .collect();
            self.add_suggestions(&docs, name);
            return Err(CompileError::PropertyNotFound(name.clone()));
        };

        self.add_chunk(
            frame,
            Chunk::Property {
                id: name.clone(),
                typ: prop.typ.clone(),
            },
        );
        self.bundle.props.insert(name.clone(), prop.typ.clone());
        Ok((&rest[1..], prop.typ.clone()))
    }

    /// Resolves the identifier at the head of an operand. Returns the calls
    /// it did not consume.
    fn compile_identifier<'a>(
        &mut self,
        frame: &mut Frame,
        id: &str,
        call_binding: Option<Variable>,
        calls: &'a [Call],
    ) -> Result<(&'a [Call], Type), CompileError> {
        let (call, rest) = match calls.first() {
            Some(c @ Call::Function(_)) => (Some(c), &calls[1..]),
            _ => (None, calls),
        };

        if let Some(binding) = &call_binding {
            if id == "_" {
                self.set_standalone(frame, false);
                let Some(next) = calls.first() else {
                    return Ok((calls, binding.typ.clone()));
                };
                return match next {
                    Call::Ident { name, .. } => {
                        let fcall = calls.get(1).filter(|c| matches!(c, Call::Function(_)));
                        match self.compile_bound_identifier(frame, name, binding, fcall)? {
                            Some(t) => {
                                let used = if fcall.is_some() { 2 } else { 1 };
                                Ok((&calls[used..], t))
                            }
                            None => Err(CompileError::invalid(format!("could not find call _.{name}"))),
                        }
                    }
                    Call::Accessor(expr) => {
                        let t = self.compile_accessor(frame, &binding.typ, binding.reference, expr)?;
                        Ok((&calls[1..], t))
                    }
                    Call::Function(_) => Err(CompileError::invalid("not sure how to handle implicit calls around `_`")),
                };
            }

            if let Some(t) = self.compile_bound_identifier(frame, id, binding, call)? {
                self.set_standalone(frame, false);
                return Ok((rest, t));
            }
        }

        if id == "props" {
            return self.compile_props(frame, call, rest);
        }

        let config = self.config;
        if let Some(f) = config.registry.operator(id) {
            let t = f(self, frame, id, call)?;
            return Ok((rest, t));
        }

        if let Some(var) = self.lookup_var(frame.scope, id).cloned() {
            if var.name.is_empty() {
                self.set_standalone(frame, false);
            }
            if let Some(scope) = var.marks {
                self.scopes[scope].standalone = false;
            }
            frame.deps.push(var.reference);
            let r = self.add_chunk(frame, Chunk::primitive(Primitive::reference(var.reference)));
            self.set_label(r, var.name);
            return Ok((rest, var.typ));
        }

        if let Some((_, f)) = config.registry.conversion(id) {
            match f(self, frame, id, call) {
                Err(CompileError::NotConversion) => {}
                res => return res.map(|t| (rest, t)),
            }
        }

        if let Some(found) = self.compile_resource(frame, id, calls)? {
            return Ok(found);
        }

        if let Some(binding) = call_binding.as_ref().filter(|b| b.typ == Type::Dict) {
            self.add_chunk(
                frame,
                Chunk::function("[]", Type::Dict, Some(binding.reference), vec![Primitive::string(id)]),
            );
            self.set_standalone(frame, false);
            return Ok((rest, Type::Dict));
        }

        match call_binding {
            Some(b) => {
                self.add_field_suggestions(&b.typ, id);
                Err(CompileError::FieldNotFound {
                    id: id.to_string(),
                    binding: b.typ.label(),
                })
            }
            None => {
                let docs = suggestions::resource_docs(config);
                self.add_suggestions(&docs, id);
                Err(CompileError::ResourceNotFound(id.to_string()))
            }
        }
    }

    // ─── Values & Operands ───────────────────────────────────────────────────

    fn compile_value(&mut self, frame: &mut Frame, value: Option<&Value>) -> Result<Primitive, CompileError> {
        let Some(value) = value else {
            return Ok(Primitive::nil());
        };
        let res = match value {
            Value::Nil | Value::Ident(_) => Primitive::nil(),
            Value::Bool(v) => Primitive::bool(*v),
            Value::Int(v) => Primitive::int(*v),
            Value::Float(v) => Primitive::float(*v),
            Value::String(v) => Primitive::string(v.clone()),
            Value::Regex(re) => {
                Regex::new(re).map_err(|e| {
                    CompileError::invalid(format!("failed to compile regular expression '{re}': {e}"))
                })?;
                Primitive::regex(re.clone())
            }
            Value::Array(items) => {
                let mut res = Vec::with_capacity(items.len());
                let mut types = BTreeSet::new();
                for item in items {
                    let p = self.compile_expression(frame, item)?;
                    types.insert(self.dereference_type(&p)?);
                    res.push(p);
                }
                let child = match types.len() {
                    1 => types.into_iter().next().unwrap_or(Type::Any),
                    _ => Type::Any,
                };
                Primitive::array(res, child)
            }
            Value::Map(entries) => {
                let mut res = BTreeMap::new();
                let mut value_type: Option<Type> = None;
                for (key, expr) in entries {
                    let p = self.compile_expression(frame, expr)?;
                    let t = self.dereference_type(&p)?;
                    value_type = match value_type {
                        None => Some(t),
                        Some(prev) if prev == t => Some(prev),
                        Some(_) => Some(Type::Any),
                    };
                    res.insert(key.clone(), p);
                }
                Primitive::map(res, value_type.unwrap_or(Type::Unset))
            }
        };
        Ok(res)
    }

    fn compile_operand(&mut self, frame: &mut Frame, operand: &crate::ast::Operand) -> Result<Primitive, CompileError> {
        frame.comment = operand.comments.clone();
        let mut calls: &[Call] = &operand.calls;
        let mut typ;
        let mut r;
        let mut res;

        match &operand.value {
            Some(Value::Ident(id)) => {
                let binding = frame.binding.clone();
                let (rest, t) = self.compile_identifier(frame, id, binding, calls)?;
                calls = rest;
                typ = t;
                r = self.tail_ref(frame);
                if id == "_" && operand.calls.is_empty() {
                    if let Some(b) = &frame.binding {
                        r = b.reference;
                    }
                }
                res = Primitive::reference(r);
            }
            value => {
                res = self.compile_value(frame, value.as_ref())?;
                typ = res.typ.clone();
                r = Ref::default();
                if !calls.is_empty() || operand.block.is_some() {
                    r = self.add_chunk(frame, Chunk::primitive(res));
                    res = Primitive::reference(r);
                }
            }
        }

        while let Some(call) = calls.first() {
            match call {
                Call::Function(_) => {
                    return Err(CompileError::invalid("don't know how to compile chained functions just yet"));
                }
                Call::Accessor(expr) => {
                    typ = self.compile_accessor(frame, &typ, r, expr)?;
                    calls = &calls[1..];
                }
                Call::Ident { name, comments } => {
                    if !comments.is_empty() {
                        frame.comment = comments.clone();
                    }
                    if name == "." {
                        self.add_field_suggestions(&typ, "");
                        return Err(CompileError::invalid(format!("missing field name in accessing {}", typ.label())));
                    }
                    calls = &calls[1..];
                    let fcall = calls.first().filter(|c| matches!(c, Call::Function(_)));

                    let binding = Variable::bound(r, typ.clone());
                    match self.compile_bound_identifier(frame, name, &binding, fcall)? {
                        Some(t) => typ = t,
                        None => {
                            let keyed = typ == Type::Dict || typ.is_map();
                            if !keyed || !ACCESSOR_RE.is_match(name) {
                                self.add_field_suggestions(&typ, name);
                                return Err(CompileError::invalid(format!(
                                    "cannot find field '{name}' in {}",
                                    typ.label()
                                )));
                            }
                            let child = typ.child();
                            self.add_chunk(frame, Chunk::function("[]", child.clone(), Some(r), vec![Primitive::string(name.clone())]));
                            typ = child;
                        }
                    }
                    if fcall.is_some() {
                        calls = &calls[1..];
                    }
                }
            }
            r = self.tail_ref(frame);
            res = Primitive::reference(r);
        }

        if let Some(block) = &operand.block {
            if self.tail_ref(frame).slot == 0 {
                let v = self.compile_value(frame, operand.value.as_ref())?;
                r = self.add_chunk(frame, Chunk::primitive(v));
            }
            if typ == Type::Nil {
                let tail = self.tail_ref(frame);
                self.compile_unbound_block(frame, block, tail)?;
            } else {
                self.compile_block(frame, block, &typ, r)?;
            }
            r = self.tail_ref(frame);
            res = Primitive::reference(r);
        }

        Ok(res)
    }

    pub(crate) fn compile_expression(&mut self, frame: &mut Frame, expr: &Expression) -> Result<Primitive, CompileError> {
        let folded;
        let expr = if expr.operations.is_empty() {
            expr
        } else {
            folded = expr.fold_operators().map_err(CompileError::Invalid)?;
            &folded
        };
        match &expr.operand {
            Some(operand) => self.compile_operand(frame, operand),
            None => Ok(Primitive::nil()),
        }
    }

    /// Compiles an expression into a chunk and returns its ref. Values that
    /// are already refs are not copied.
    pub(crate) fn compile_and_add_expression(&mut self, frame: &mut Frame, expr: &Expression) -> Result<Ref, CompileError> {
        let v = self.compile_expression(frame, expr)?;
        if let Some(r) = v.as_ref().filter(|_| v.is_ref()) {
            return Ok(r);
        }
        Ok(self.add_chunk(frame, Chunk::primitive(v)))
    }

    pub(crate) fn compile_expressions(&mut self, frame: &mut Frame, exprs: &[Expression]) -> Result<(), CompileError> {
        let exprs: Vec<Expression> = exprs
            .iter()
            .filter(|e| !e.is_empty())
            .map(Expression::fold_operators)
            .collect::<Result<_, _>>()
            .map_err(CompileError::Invalid)?;

        let mut ident: Option<String> = None;
        for (idx, expr) in exprs.iter().enumerate() {
            let prev = ident.take();
            ident = expr.ident().map(str::to_string);
            let single = self.bundle.code.block(frame.block_ref).is_some_and(|b| b.single_value);

            if prev.as_deref() == Some("else") && ident.as_deref() != Some("if") && single {
                return Err(CompileError::invalid("single valued block followed by expressions"));
            }
            if prev.as_deref() == Some("if") && ident.as_deref() != Some("else") && single {
                frame.prev_id = "else".into();
                let tail = self.tail_ref(frame);
                return self.compile_unbound_block(frame, &exprs[idx..], tail).map(|_| ());
            }

            if ident.as_deref() == Some("return") {
                if idx + 2 < exprs.len() {
                    return Err(CompileError::invalid("return statement is followed by too many expressions"));
                }
                self.set_single_value(frame);
                continue;
            }

            let r = self.compile_and_add_expression(frame, expr)?;

            if prev.as_deref() == Some("return") {
                let typ = self.chunk_type(r);
                let ret = self.add_chunk(frame, Chunk::function("return", typ, None, vec![Primitive::reference(r)]));
                self.set_entrypoints(frame, vec![ret]);
                self.set_single_value(frame);
                return Ok(());
            }

            let Some(block) = self.bundle.code.block_mut(frame.block_ref) else {
                return Err(CompileError::invalid(format!("missing block {}", frame.block_ref)));
            };
            if block.entrypoints.last() == Some(&r) {
                continue;
            }
            block.entrypoints.push(r);

            if self.bundle.code.checksum(r).is_none() {
                return Err(CompileError::invalid(format!(
                    "failed to compile expression, ref returned empty checksum ID for ref {}",
                    u64::from(r)
                )));
            }
        }
        Ok(())
    }

    // ─── Entrypoints ─────────────────────────────────────────────────────────

    /// Drops variable assignments from the entrypoints. With `collect`, also
    /// gathers the data points each remaining entrypoint reports.
    pub(crate) fn update_entrypoints(&mut self, frame: &Frame, collect: bool) {
        let var_refs: BTreeSet<Ref> = self.scopes[frame.scope]
            .vars
            .iter()
            .filter(|(name, _)| name.as_str() != "_")
            .map(|(_, v)| v.reference)
            .collect();

        let bundle = &mut self.bundle;
        let Some(block) = bundle.code.block_mut(frame.block_ref) else {
            return;
        };
        block.entrypoints.retain(|r| !var_refs.contains(r));
        if !collect {
            return;
        }
        let entrypoints = block.entrypoints.clone();

        let code = &bundle.code;
        let bindings: BTreeSet<Ref> = entrypoints
            .iter()
            .filter_map(|r| code.chunk(*r)?.as_function()?.binding)
            .collect();
        let mut found = BTreeSet::new();
        for ep in entrypoints.iter().filter(|r| !bindings.contains(r)) {
            found.extend(code.ref_datapoints(*ep, &bundle.assertions));
        }

        let Some(block) = bundle.code.block_mut(frame.block_ref) else {
            return;
        };
        block.datapoints.extend(found);

        // a datapoint that another datapoint is bound to is reported through it
        let code = &bundle.code;
        let datapoints = code.block(frame.block_ref).map(|b| b.datapoints.clone()).unwrap_or_default();
        let bound: BTreeSet<Ref> = datapoints
            .iter()
            .filter_map(|r| code.chunk(*r)?.as_function()?.binding)
            .collect();
        let mut seen = BTreeSet::new();
        let kept: Vec<Ref> = datapoints
            .into_iter()
            .filter(|r| !bound.contains(r) && seen.insert(*r))
            .collect();
        if let Some(block) = bundle.code.block_mut(frame.block_ref) {
            block.datapoints = kept;
        }
    }

    /// Records named variables of the frame's scope in the bundle.
    pub(crate) fn update_vars(&mut self, frame: &Frame) {
        for var in self.scopes[frame.scope].vars.values() {
            if !var.name.is_empty() && !var.name.starts_with('$') {
                self.bundle.vars.insert(var.reference, var.name.clone());
            }
        }
    }
}

/// Drops a trailing `empty` argument, which stands for "no argument".
fn filter_trailing_empty_args(call: Option<&Call>) -> Option<Call> {
    let call = call?;
    let Call::Function(args) = call else {
        return Some(call.clone());
    };
    let mut args = args.clone();
    if args.last().is_some_and(|a| a.value.ident() == Some("empty") && a.value.operations.is_empty()) {
        args.pop();
    }
    Some(Call::Function(args))
}

/// Numeric comparison of dotted versions; missing parts count as zero.
fn version_gt(a: &str, b: &str) -> bool {
    if a.is_empty() {
        return false;
    }
    let parts = |v: &str| -> Vec<u64> { v.split('.').map(|p| p.trim().parse().unwrap_or(0)).collect() };
    let (pa, pb) = (parts(a), parts(b));
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let (x, y) = (pa.get(i).copied().unwrap_or(0), pb.get(i).copied().unwrap_or(0));
        if x != y {
            return x > y;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSet;
    use crate::schema::testutil::test_schema;
    use std::sync::Arc;

    fn config() -> CompilerConfig {
        CompilerConfig::new(Arc::new(test_schema()), FeatureSet::default())
    }

    fn compile_with(src: &str, cfg: &CompilerConfig) -> Result<CodeBundle, CompileFailure> {
        crate::compile(src, &BTreeMap::new(), cfg)
    }

    fn compile_ok(src: &str) -> CodeBundle {
        match compile_with(src, &config()) {
            Ok(b) => b,
            Err(e) => panic!("{src}: {e}"),
        }
    }

    fn compile_err(src: &str) -> CompileFailure {
        compile_with(src, &config()).expect_err(src)
    }

    fn chunk(bundle: &CodeBundle, r: Ref) -> &Chunk {
        bundle.code.chunk(r).unwrap()
    }

    #[test]
    fn test_version_gt() {
        assert!(version_gt("6.1.0", "5.15.0"));
        assert!(version_gt("5.15.0", ""));
        assert!(!version_gt("5.9", "5.15.0"));
        assert!(!version_gt("", "1.0"));
    }

    #[test]
    fn test_simple_values() {
        let b = compile_ok("1 == 1");
        let ep = b.code.entrypoints()[0];
        let cmp = chunk(&b, ep);
        assert_eq!(cmp.id(), "==int");
        assert_eq!(cmp.typ(), Type::Bool);
        assert!(b.code.datapoints().is_empty());
    }

    #[test]
    fn test_resource_field_chain() {
        let b = compile_ok("sshd.config.params");
        let eps = b.code.entrypoints();
        assert_eq!(eps.len(), 1);
        let params = chunk(&b, eps[0]);
        assert_eq!(params.id(), "params");
        assert_eq!(params.typ(), Type::map(Type::String, Type::String));
        let binding = params.as_function().unwrap().binding.unwrap();
        assert_eq!(chunk(&b, binding).id(), "sshd.config");
    }

    #[test]
    fn test_resource_init_args() {
        let b = compile_ok("sshd.config('/my/path').params");
        let cfg = chunk(&b, Ref::slot_of(1, 1)).as_function().unwrap();
        assert_eq!(cfg.args, vec![Primitive::string("path"), Primitive::string("/my/path")]);

        let err = compile_err("sshd.config(1)");
        assert_eq!(
            err.error.to_string(),
            "Incorrect type on argument 0 in resource sshd.config: expected string, got: int"
        );
        let err = compile_err("file(nope: 'x')");
        assert_eq!(err.error.to_string(), "resource file does not have a field named nope");
    }

    #[test]
    fn test_embedded_field_path() {
        let b = compile_ok("machine.hostname");
        let ep = b.code.entrypoints()[0];
        assert_eq!(chunk(&b, ep).id(), "hostname");
        let os = chunk(&b, ep).as_function().unwrap().binding.unwrap();
        assert_eq!(chunk(&b, os).id(), "os");
    }

    #[test]
    fn test_min_version_tracking() {
        assert_eq!(compile_ok("mondoo.jobEnvironment").min_version, "5.15.0");
        assert_eq!(compile_ok("platform.advisories").min_version, "6.1.0");
        assert_eq!(compile_ok("mondoo.version").min_version, "");
    }

    #[test]
    fn test_unknown_identifiers_suggest() {
        let err = compile_err("sshd.config.para");
        assert_eq!(err.error.to_string(), "cannot find field 'para' in sshd.config");
        let bundle = err.bundle.unwrap();
        assert_eq!(bundle.suggestions[0].field, "params");

        let err = compile_err("platfor");
        assert_eq!(err.error, CompileError::ResourceNotFound("platfor".into()));
        let fields: Vec<_> = err.bundle.unwrap().suggestions.iter().map(|d| d.field.clone()).collect();
        assert_eq!(fields[0], "platform");
        assert!(!fields.contains(&"platform.internals".to_string()));
    }

    #[test]
    fn test_trailing_dot_suggests_fields() {
        let err = compile_err("users.");
        let bundle = err.bundle.unwrap();
        let fields: Vec<_> = bundle.suggestions.iter().map(|d| d.field.as_str()).collect();
        assert!(fields.contains(&"list"));
        assert!(fields.contains(&"where"));
        assert!(fields.contains(&"length"));
    }

    #[test]
    fn test_array_accessor_and_block() {
        let b = compile_ok("users.list[0] { uid }");
        let ep = b.code.entrypoints()[0];
        let block_call = chunk(&b, ep);
        assert_eq!(block_call.id(), "{}");
        assert_eq!(block_call.typ(), Type::Block);
        let accessor = chunk(&b, block_call.as_function().unwrap().binding.unwrap());
        assert_eq!(accessor.id(), "[]");
        assert_eq!(accessor.typ(), Type::resource("user"));

        let inner = &b.code.blocks[1];
        assert_eq!(inner.parameters, 1);
        assert_eq!(inner.entrypoints.len(), 1);
        assert_eq!(b.code.chunk(inner.entrypoints[0]).unwrap().id(), "uid");
    }

    #[test]
    fn test_list_resource_block_binds_list() {
        let b = compile_ok("users { name }");
        let ep = b.code.entrypoints()[0];
        assert_eq!(chunk(&b, ep).typ(), Type::array(Type::Block));
        let list = chunk(&b, chunk(&b, ep).as_function().unwrap().binding.unwrap());
        assert_eq!(list.id(), "list");
    }

    #[test]
    fn test_legacy_list_block_fallback() {
        let b = compile_ok("users { list }");
        let ep = b.code.entrypoints()[0];
        assert_eq!(chunk(&b, ep).typ(), Type::Block);
        let binding = chunk(&b, ep).as_function().unwrap().binding.unwrap();
        assert_eq!(chunk(&b, binding).id(), "users");
        assert!(b.code.blocks[1].chunks.iter().any(|c| c.id() == "list"));
    }

    #[test]
    fn test_glob_expands_sorted_fields() {
        let b = compile_ok("mondoo { * }");
        let ids: Vec<_> = b.code.blocks[1]
            .entrypoints
            .iter()
            .map(|r| b.code.chunk(*r).unwrap().id().to_string())
            .collect();
        assert_eq!(ids, vec!["build", "jobEnvironment", "version"]);
    }

    #[test]
    fn test_closure_dependencies() {
        let b = compile_ok("x = 1\nusers.list.where(uid == x)");
        let where_chunk = b.code.blocks[0].chunks.iter().find(|c| c.id() == "where").unwrap();
        let where_fn = where_chunk.as_function().unwrap();
        assert!(where_fn.args.contains(&Primitive::reference(Ref::slot_of(1, 1))));
        // the filtered users are expanded into their default fields
        let ep = b.code.entrypoints()[0];
        assert_eq!(chunk(&b, ep).id(), "{}");
        assert_eq!(chunk(&b, ep).typ(), Type::array(Type::Block));
        assert_eq!(b.vars.get(&Ref::slot_of(1, 1)).map(String::as_str), Some("x"));
    }

    #[test]
    fn test_variables_are_not_entrypoints() {
        let b = compile_ok("a = mondoo.version\na == 'x'");
        let eps = b.code.entrypoints();
        assert_eq!(eps.len(), 1);
        assert_eq!(chunk(&b, eps[0]).id(), "==string");
    }

    #[test]
    fn test_standalone_where_gets_implicit_equality() {
        let b = compile_ok("asset.ids.where('a')");
        let block = &b.code.blocks[1];
        let ep = block.entrypoints[0];
        assert_eq!(b.code.chunk(ep).unwrap().id(), "==string");
    }

    #[test]
    fn test_if_else_chain() {
        let b = compile_ok("if (mondoo.version == '1') { 1 } else if (true) { 2 } else { 3 }");
        let eps = b.code.entrypoints();
        assert_eq!(eps.len(), 1);
        let if_fn = chunk(&b, eps[0]);
        assert_eq!(if_fn.id(), "if");
        let args = &if_fn.as_function().unwrap().args;
        // condition, block, deps; condition, block, deps; block, deps
        assert_eq!(args.len(), 8);
        assert_eq!(args[1].typ, Type::FunctionLike);
    }

    #[test]
    fn test_return_forces_else_branch() {
        let b = compile_ok("if (true) { return 1 }\nreturn 2");
        let top = &b.code.blocks[0];
        assert!(top.single_value);
        assert_eq!(top.entrypoints.len(), 1);
        let if_fn = chunk(&b, top.entrypoints[0]).as_function().unwrap();
        assert_eq!(if_fn.typ, Type::Int);
    }

    #[test]
    fn test_single_value_block_followed_by_expressions() {
        let err = compile_err("return 1\n2\n3");
        assert_eq!(err.error.to_string(), "return statement is followed by too many expressions");
    }

    #[test]
    fn test_switch_cases() {
        let b = compile_ok("switch (mondoo.version) { case _ == '1': 1; default: 2 }");
        let ep = b.code.entrypoints()[0];
        let sw = chunk(&b, ep);
        assert_eq!(sw.id(), "switch");
        assert_eq!(sw.typ(), Type::Int);
        let args = &sw.as_function().unwrap().args;
        assert_eq!(args.len(), 7);
        assert_eq!(args[4], Primitive::bool(true));
    }

    #[test]
    fn test_dict_accessors() {
        let b = compile_ok("json('x').params.a.b");
        let ep = b.code.entrypoints()[0];
        let last = chunk(&b, ep);
        assert_eq!(last.id(), "[]");
        assert_eq!(last.as_function().unwrap().args, vec![Primitive::string("b")]);

        let b = compile_ok("json('x').params { key }");
        let inner = &b.code.blocks[1];
        assert_eq!(b.code.chunk(inner.entrypoints[0]).unwrap().id(), "[]");
    }

    #[test]
    fn test_props() {
        let mut props = BTreeMap::new();
        props.insert("limit".to_string(), Primitive::int(0));
        let cfg = config();
        let b = crate::compile("props.limit > 3", &props, &cfg).unwrap();
        assert_eq!(b.props.get("limit"), Some(&Type::Int));
        assert!(matches!(chunk(&b, Ref::slot_of(1, 1)), Chunk::Property { .. }));

        let err = crate::compile("props.limt", &props, &cfg).unwrap_err();
        assert_eq!(err.error, CompileError::PropertyNotFound("limt".into()));
        assert_eq!(err.bundle.unwrap().suggestions[0].title, "limit (int)");
        let err = crate::compile("props", &props, &cfg).unwrap_err();
        assert!(err.error.to_string().starts_with("called 'props' without a property"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = compile_err("mondoo.version == /(/");
        assert!(err.error.to_string().contains("failed to compile regular expression '('"));
    }

    #[test]
    fn test_chained_functions_rejected() {
        let err = compile_err("users.list.where(uid > 1)(1)");
        assert_eq!(err.error.to_string(), "don't know how to compile chained functions just yet");
    }

    #[test]
    fn test_implicit_resources() {
        let b = compile_ok("users.list { authorizedkeys.file }");
        let inner = &b.code.blocks[1];
        let keys = b.code.chunk(Ref::slot_of(2, 2)).unwrap();
        assert_eq!(keys.id(), "authorizedkeys");
        assert!(keys.is_bare_resource());
        assert_eq!(b.label(Ref::slot_of(2, 2)), Some("authorizedkeys"));
        assert_eq!(inner.entrypoints.len(), 1);

        let cfg = CompilerConfig::new(
            Arc::new(test_schema()),
            FeatureSet::new([Feature::ImplicitResourceCreation]),
        );
        let b = compile_with("users.list { authorizedkeys.file }", &cfg).unwrap();
        let create = b.code.chunk(Ref::slot_of(2, 2)).unwrap();
        assert_eq!(create.id(), "createResource");
        assert_eq!(create.as_function().unwrap().args, vec![Primitive::reference(Ref::slot_of(2, 1))]);
    }

    #[test]
    fn test_fail_if_no_entrypoints() {
        let cfg = CompilerConfig::new(
            Arc::new(test_schema()),
            FeatureSet::new([Feature::FailIfNoEntryPoints]),
        );
        let err = compile_with("a = 1", &cfg).unwrap_err();
        assert_eq!(err.error, CompileError::NoEntrypoints);
        assert!(compile_with("a = 1", &config()).is_ok());
    }

    #[test]
    fn test_deterministic_output() {
        let src = "users.list.where(name == 'root').all(uid == 0)\nsshd.config.params['A'] == 'x'";
        let a = compile_ok(src);
        let b = compile_ok(src);
        assert_eq!(a.code.id, b.code.id);
        assert_eq!(a.code.checksums, b.code.checksums);
        assert_eq!(a.labels, b.labels);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }
}
