//! LLVM-IR textual generator.
//!
//! Lowers the checked AST to the textual form of LLVM IR. Generic functions
//! are monomorphized through [`mono::MonoQueue`]: calls queue instantiations,
//! the drain loop emits them, and emission may queue more until a fixed
//! point. The generator never emits a call to a symbol it has not also
//! defined or declared, and never silently drops an expression: unsupported
//! constructs produce a `C*` diagnostic bound to the originating span.

pub mod calls;
pub mod closures;
pub mod intrinsics;
pub mod mangle;
pub mod methods;
pub mod mono;
pub mod types;

use crate::compiler::codegen::mangle::mangle_function;
use crate::compiler::codegen::mono::MonoQueue;
use crate::compiler::codegen::types::{aggregate_name, enum_payload_size_with, llvm_type};
use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::modules::loader::suffix_primitive;
use crate::compiler::modules::ModuleRegistry;
use crate::compiler::parser::ast_nodes::*;
use crate::compiler::source::{SourceMap, TextLocation};
use crate::compiler::types::environment::{ConstValue, TypeEnvironment};
use crate::compiler::types::{lower_type_expr, Primitive, Type, TypeRef};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    pub module_name: String,
    pub target_triple: String,
    pub debug_info: bool,
    /// Prefix inserted into every mangled symbol when compiling a test suite
    pub suite_prefix: Option<String>,
}

impl CodegenOptions {
    pub fn new(module_name: impl Into<String>) -> CodegenOptions {
        CodegenOptions {
            module_name: module_name.into(),
            target_triple: default_target_triple().to_string(),
            debug_info: false,
            suite_prefix: None,
        }
    }
}

/// LLVM-parseable float literal: always signed exponent, e.g. `2.500000e+00`.
pub fn float_literal(value: f64) -> String {
    let text = format!("{value:.6e}");
    match text.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{:0>2}", exponent)
        }
        Some((mantissa, exponent)) => {
            format!("{mantissa}e-{:0>2}", exponent.trim_start_matches('-'))
        }
        None => text,
    }
}

pub fn default_target_triple() -> &'static str {
    if cfg!(target_os = "windows") {
        "x86_64-pc-windows-msvc"
    } else if cfg!(target_os = "macos") {
        "arm64-apple-macosx"
    } else {
        "x86_64-unknown-linux-gnu"
    }
}

/// An SSA value: the operand text (`%r3`, `42`, `@global`) and its type.
#[derive(Debug, Clone)]
pub struct Value {
    pub operand: String,
    pub value_type: TypeRef,
}

impl Value {
    pub fn new(operand: impl Into<String>, value_type: TypeRef) -> Value {
        Value {
            operand: operand.into(),
            value_type,
        }
    }

    pub fn unit() -> Value {
        Value::new("undef", Type::unit())
    }
}

#[derive(Debug, Clone)]
pub struct LocalSlot {
    /// Register holding the alloca pointer
    pub ptr: String,
    pub value_type: TypeRef,
}

/// Per-function lowering state.
pub struct Ctx {
    pub lines: Vec<String>,
    pub locals: FxHashMap<String, LocalSlot>,
    /// Active type-parameter substitutions for the instantiation being
    /// emitted (`current_type_subs`)
    pub subs: Vec<(String, TypeRef)>,
    pub return_type: TypeRef,
    reg: usize,
    label: usize,
    /// Innermost loop labels for break/continue
    pub loop_stack: Vec<(String, String)>,
}

impl Ctx {
    pub fn new(return_type: TypeRef) -> Ctx {
        Ctx {
            lines: Vec::new(),
            locals: FxHashMap::default(),
            subs: Vec::new(),
            return_type,
            reg: 0,
            label: 0,
            loop_stack: Vec::new(),
        }
    }

    pub fn fresh_reg(&mut self) -> String {
        self.reg += 1;
        format!("%r{}", self.reg)
    }

    pub fn fresh_label(&mut self, stem: &str) -> String {
        self.label += 1;
        format!("{stem}{}", self.label)
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn apply_subs(&self, value_type: &TypeRef) -> TypeRef {
        value_type.substitute(&self.subs)
    }
}

pub struct LlvmGenerator<'a> {
    pub env: &'a TypeEnvironment,
    pub registry: &'a ModuleRegistry,
    pub sources: &'a SourceMap,
    pub options: CodegenOptions,

    /// Named aggregate definitions, keyed by the `%name`
    pub type_defs: BTreeMap<String, String>,
    /// Global constants (string literals, vtables)
    pub globals: Vec<String>,
    /// External declarations
    pub declares: BTreeSet<String>,
    /// Emitted function definitions
    pub definitions: Vec<String>,
    pub mono: MonoQueue,
    pub errors: Vec<CompileError>,

    /// AST of every function in the unit, for monomorphized re-emission
    function_asts: FxHashMap<String, &'a FunctionDecl>,
    string_counter: usize,
    pub lambda_counter: usize,
    dbg_counter: usize,
    dbg_lines: Vec<String>,
}

impl<'a> LlvmGenerator<'a> {
    pub fn new(
        env: &'a TypeEnvironment,
        registry: &'a ModuleRegistry,
        sources: &'a SourceMap,
        options: CodegenOptions,
    ) -> LlvmGenerator<'a> {
        LlvmGenerator {
            env,
            registry,
            sources,
            options,
            type_defs: BTreeMap::new(),
            globals: Vec::new(),
            declares: BTreeSet::new(),
            definitions: Vec::new(),
            mono: MonoQueue::new(),
            errors: Vec::new(),
            function_asts: FxHashMap::default(),
            string_counter: 0,
            lambda_counter: 0,
            dbg_counter: 0,
            dbg_lines: Vec::new(),
        }
    }

    /// Lowers a whole module AST to IR text. Non-generic functions emit
    /// directly; generic ones emit on demand as the queue drains.
    pub fn emit_module(&mut self, ast: &'a ModuleAst) -> String {
        self.collect_function_asts(ast);

        for decl in &ast.decls {
            match decl {
                Decl::Function(func) if func.type_params.is_empty() => {
                    self.emit_function(func, None, &[]);
                }
                Decl::Impl(impl_decl) => {
                    let target_name = match &impl_decl.target {
                        TypeExpr::Named { name, .. } => name.clone(),
                        _ => continue,
                    };
                    if !impl_decl.type_params.is_empty() {
                        // Generic impl methods emit when first referenced
                        continue;
                    }
                    for method in &impl_decl.methods {
                        if method.type_params.is_empty() {
                            self.emit_method(method, &target_name, &[]);
                        }
                    }
                }
                Decl::Class(class_decl) if class_decl.type_params.is_empty() => {
                    for method in &class_decl.methods {
                        if method.modifier != MethodModifier::Abstract
                            && method.func.type_params.is_empty()
                        {
                            self.emit_method(&method.func, &class_decl.name, &[]);
                        }
                    }
                }
                Decl::Extern(block) => {
                    for extern_func in &block.functions {
                        let link_name = extern_func
                            .extern_name
                            .clone()
                            .unwrap_or_else(|| extern_func.name.clone());
                        let params = extern_func
                            .params
                            .iter()
                            .map(|param| llvm_type(&lower_type_expr(&param.type_expr), self.env))
                            .collect::<Vec<_>>()
                            .join(", ");
                        let varargs = if extern_func.varargs {
                            if params.is_empty() { "..." } else { ", ..." }
                        } else {
                            ""
                        };
                        let return_type = extern_func
                            .return_type
                            .as_ref()
                            .map(|ret| llvm_type(&lower_type_expr(ret), self.env))
                            .unwrap_or_else(|| "void".to_string());
                        self.declares.insert(format!(
                            "declare {return_type} @{link_name}({params}{varargs})"
                        ));
                    }
                }
                _ => {}
            }
        }

        self.drain_instantiations();
        self.assemble()
    }

    fn collect_function_asts(&mut self, ast: &'a ModuleAst) {
        for decl in &ast.decls {
            match decl {
                Decl::Function(func) => {
                    self.function_asts.insert(func.name.clone(), func);
                }
                Decl::Impl(impl_decl) => {
                    if let TypeExpr::Named { name, .. } = &impl_decl.target {
                        for method in &impl_decl.methods {
                            self.function_asts
                                .insert(format!("{name}::{}", method.name), method);
                        }
                    }
                }
                Decl::Class(class_decl) => {
                    for method in &class_decl.methods {
                        self.function_asts.insert(
                            format!("{}::{}", class_decl.name, method.func.name),
                            &method.func,
                        );
                    }
                }
                _ => {}
            }
        }
    }

    /// Drain pending instantiations to a fixed point. Every queued
    /// instantiation is either emitted or diagnosed.
    fn drain_instantiations(&mut self) {
        while let Some(pending) = self.mono.next() {
            match self.function_asts.get(pending.function_name.as_str()).copied() {
                Some(func) => {
                    let subs: Vec<(String, TypeRef)> = self
                        .combined_type_params(&pending.function_name, func)
                        .into_iter()
                        .zip(pending.type_args.iter().cloned())
                        .collect();
                    let target = pending
                        .function_name
                        .split_once("::")
                        .map(|(target, _)| target.to_string());
                    self.emit_function_mangled(func, target.as_deref(), &subs, &pending.mangled);
                }
                None => {
                    // A registry function without an AST in this unit: declare
                    // the forward reference so the call still links
                    if let Some((_, sig)) = self.registry.find_function(&pending.function_name) {
                        let subs: Vec<(String, TypeRef)> = sig
                            .type_params
                            .iter()
                            .cloned()
                            .zip(pending.type_args.iter().cloned())
                            .collect();
                        let params = sig
                            .params
                            .iter()
                            .map(|(_, param_type)| {
                                llvm_type(&param_type.substitute(&subs), self.env)
                            })
                            .collect::<Vec<_>>()
                            .join(", ");
                        let return_type =
                            llvm_type(&sig.return_type.substitute(&subs), self.env);
                        self.declares.insert(format!(
                            "declare {return_type} @{}({params})",
                            pending.mangled
                        ));
                    } else {
                        self.errors.push(CompileError::new(
                            format!(
                                "Unresolved monomorphization of '{}'",
                                pending.function_name
                            ),
                            Default::default(),
                            ErrorCode::C002,
                        ));
                    }
                }
            }
        }
    }

    /// Impl-block generics come first in a method's combined parameter list;
    /// plain functions just use their own.
    fn combined_type_params(&self, qualified: &str, func: &FunctionDecl) -> Vec<String> {
        let sig = self.env.functions.get(qualified);
        match sig {
            Some(sig) if sig.type_params.len() > func.type_params.len() => {
                sig.type_params.clone()
            }
            _ => func.type_params.clone(),
        }
    }

    pub fn emit_function(
        &mut self,
        func: &FunctionDecl,
        self_type: Option<&str>,
        subs: &[(String, TypeRef)],
    ) {
        let mangled = mangle_function(&func.name, &[], self.options.suite_prefix.as_deref());
        self.emit_function_mangled(func, self_type, subs, &mangled);
    }

    fn emit_method(&mut self, func: &FunctionDecl, target: &str, subs: &[(String, TypeRef)]) {
        let mangled = mangle_function(
            &format!("{target}::{}", func.name),
            &[],
            self.options.suite_prefix.as_deref(),
        );
        self.emit_function_mangled(func, Some(target), subs, &mangled);
    }

    pub fn emit_function_mangled(
        &mut self,
        func: &FunctionDecl,
        self_type: Option<&str>,
        subs: &[(String, TypeRef)],
        mangled: &str,
    ) {
        let Some(body) = &func.body else {
            return;
        };
        let signature_marker = format!("@{mangled}(");
        if self
            .definitions
            .iter()
            .any(|def| def.contains(&signature_marker))
        {
            return;
        }
        self.mono.mark_emitted(mangled);

        let mut all_subs: Vec<(String, TypeRef)> = subs.to_vec();
        if let Some(self_name) = self_type {
            all_subs.push(("Self".to_string(), Type::named(self_name, vec![])));
        }

        let return_type = self.resolve(
            &func
                .return_type
                .as_ref()
                .map(lower_type_expr)
                .unwrap_or_else(Type::unit),
            &all_subs,
        );
        let mut ctx = Ctx::new(return_type.clone());
        ctx.subs = all_subs;

        // Entry: one alloca per parameter, then store the incoming value
        let mut param_decls: Vec<String> = Vec::new();
        let mut entry_lines: Vec<String> = Vec::new();
        for (index, param) in func.params.iter().enumerate() {
            let param_type = self.resolve(&lower_type_expr(&param.type_expr), &ctx.subs);
            let llvm = llvm_type(&param_type, self.env);
            self.ensure_aggregate(&param_type);
            param_decls.push(format!("{llvm} %arg{index}"));
            let slot = ctx.fresh_reg();
            entry_lines.push(format!("  {slot} = alloca {llvm}"));
            entry_lines.push(format!("  store {llvm} %arg{index}, ptr {slot}"));
            ctx.locals.insert(
                param.name.clone(),
                LocalSlot {
                    ptr: slot,
                    value_type: param_type,
                },
            );
        }
        ctx.lines.extend(entry_lines);

        self.lower_block(body, &mut ctx);

        // Fall-off return
        let needs_terminator = ctx
            .lines
            .last()
            .map(|line| {
                let trimmed = line.trim_start();
                !(trimmed.starts_with("ret ")
                    || trimmed.starts_with("br ")
                    || trimmed.starts_with("unreachable")
                    || trimmed.starts_with("switch "))
            })
            .unwrap_or(true);
        if needs_terminator {
            if return_type.is_unit() || return_type.is_never() {
                ctx.push("  ret void");
            } else {
                let llvm = llvm_type(&return_type, self.env);
                ctx.push(format!("  ret {llvm} zeroinitializer"));
            }
        }

        let llvm_return = if return_type.is_unit() || return_type.is_never() {
            "void".to_string()
        } else {
            self.ensure_aggregate(&return_type);
            llvm_type(&return_type, self.env)
        };

        let mut definition = format!(
            "define {llvm_return} @{mangled}({}) {{\nentry:\n",
            param_decls.join(", ")
        );
        for line in &ctx.lines {
            definition.push_str(line);
            definition.push('\n');
        }
        definition.push_str("}\n");
        self.definitions.push(definition);
    }

    pub fn resolve(&self, value_type: &TypeRef, subs: &[(String, TypeRef)]) -> TypeRef {
        self.env.resolve_alias(&value_type.substitute(subs))
    }

    /// Named aggregates referenced by a function must have a type definition
    /// in the output; this registers them (and their field aggregates) on
    /// first use.
    pub fn ensure_aggregate(&mut self, value_type: &TypeRef) {
        match value_type.as_ref() {
            Type::Named { name, type_args } => {
                if let Some(def) = self.env.structs.get(name).cloned() {
                    let key = format!("%struct.{}", aggregate_name(name, type_args));
                    if self.type_defs.contains_key(&key) {
                        return;
                    }
                    let subs: Vec<(String, TypeRef)> = def
                        .type_params
                        .iter()
                        .cloned()
                        .zip(type_args.iter().cloned())
                        .collect();
                    // Insert a placeholder first to break recursive shapes
                    self.type_defs.insert(key.clone(), String::new());
                    let fields = def
                        .fields
                        .iter()
                        .map(|(_, field_type, _)| {
                            let resolved = field_type.substitute(&subs);
                            self.ensure_aggregate(&resolved);
                            llvm_type(&resolved, self.env)
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.type_defs
                        .insert(key.clone(), format!("{key} = type {{ {fields} }}"));
                } else if let Some(def) = self.env.enums.get(name).cloned() {
                    let key = format!("%enum.{}", aggregate_name(name, type_args));
                    if self.type_defs.contains_key(&key) {
                        return;
                    }
                    let subs: Vec<(String, TypeRef)> = def
                        .type_params
                        .iter()
                        .cloned()
                        .zip(type_args.iter().cloned())
                        .collect();
                    let payload = enum_payload_size_with(&def, &subs, self.env);
                    self.type_defs.insert(
                        key.clone(),
                        format!("{key} = type {{ i32, [{payload} x i8] }}"),
                    );
                } else if let Some(def) = self.env.classes.get(name).cloned() {
                    self.ensure_class_aggregate(name, &def);
                }
            }
            Type::Reference { target, .. } | Type::Pointer { target, .. } => {
                self.ensure_aggregate(target)
            }
            Type::Slice(element) | Type::Array { element, .. } => self.ensure_aggregate(element),
            Type::Tuple(members) => {
                for member in members {
                    self.ensure_aggregate(member);
                }
            }
            _ => {}
        }
    }

    pub fn ensure_class_aggregate(
        &mut self,
        name: &str,
        def: &crate::compiler::types::environment::ClassDef,
    ) {
        let key = format!("%class.{name}");
        if self.type_defs.contains_key(&key) {
            return;
        }
        self.type_defs.insert(key.clone(), String::new());
        let mut fields: Vec<String> = Vec::new();
        if !def.is_value {
            // vtable pointer first
            fields.push("ptr".to_string());
        }
        for (_, field_type, _) in &def.fields {
            self.ensure_aggregate(field_type);
            fields.push(llvm_type(field_type, self.env));
        }
        self.type_defs.insert(
            key.clone(),
            format!("{key} = type {{ {} }}", fields.join(", ")),
        );
    }

    /// Interns a string literal, returning a `ptr` operand.
    pub fn intern_string(&mut self, text: &str) -> String {
        self.string_counter += 1;
        let name = format!("@.str.{}", self.string_counter);
        let mut encoded = String::new();
        for byte in text.bytes() {
            match byte {
                b'\\' => encoded.push_str("\\5C"),
                b'"' => encoded.push_str("\\22"),
                0x20..=0x7E => encoded.push(byte as char),
                other => encoded.push_str(&format!("\\{other:02X}")),
            }
        }
        let len = text.len() + 1;
        self.globals.push(format!(
            "{name} = private unnamed_addr constant [{len} x i8] c\"{encoded}\\00\""
        ));
        name
    }

    /// `!dbg` suffix for the owning span when debug info is enabled.
    pub fn dbg_suffix(&mut self, location: &TextLocation) -> String {
        if !self.options.debug_info {
            return String::new();
        }
        self.dbg_counter += 1;
        let id = self.dbg_counter;
        self.dbg_lines.push(format!(
            "!{id} = !DILocation(line: {}, column: {}, scope: !0)",
            location.start.line, location.start.column
        ));
        format!(", !dbg !{id}")
    }

    fn assemble(&mut self) -> String {
        let mut out = String::new();
        out.push_str(&format!("; ModuleID = '{}'\n", self.options.module_name));
        out.push_str(&format!(
            "source_filename = \"{}.ll\"\n",
            self.options.module_name
        ));
        out.push_str(&format!(
            "target triple = \"{}\"\n\n",
            self.options.target_triple
        ));

        for def in self.type_defs.values() {
            if !def.is_empty() {
                out.push_str(def);
                out.push('\n');
            }
        }
        if !self.type_defs.is_empty() {
            out.push('\n');
        }

        for global in &self.globals {
            out.push_str(global);
            out.push('\n');
        }
        if !self.globals.is_empty() {
            out.push('\n');
        }

        for declare in &self.declares {
            out.push_str(declare);
            out.push('\n');
        }
        if !self.declares.is_empty() {
            out.push('\n');
        }

        for definition in &self.definitions {
            out.push_str(definition);
            out.push('\n');
        }

        if self.options.debug_info && !self.dbg_lines.is_empty() {
            out.push_str("!0 = !DISubprogram()\n");
            for line in &self.dbg_lines {
                out.push_str(line);
                out.push('\n');
            }
        }

        out
    }

    // ---------------------------------
    //           Statements
    // ---------------------------------

    pub fn lower_block(&mut self, block: &Block, ctx: &mut Ctx) {
        for stmt in &block.statements {
            self.lower_statement(stmt, ctx);
        }
    }

    fn lower_statement(&mut self, stmt: &Stmt, ctx: &mut Ctx) {
        match stmt {
            Stmt::Let {
                pattern,
                type_expr,
                value,
                ..
            } => {
                let expected = type_expr
                    .as_ref()
                    .map(|type_expr| self.resolve(&lower_type_expr(type_expr), &ctx.subs));
                let lowered = match self.lower_expr(value, ctx, expected.as_ref()) {
                    Ok(value) => value,
                    Err(error) => {
                        self.errors.push(error);
                        return;
                    }
                };
                self.bind_pattern_slot(pattern, lowered, ctx);
            }
            Stmt::Assign {
                target, op, value, ..
            } => {
                if let Err(error) = self.lower_assign(target, *op, value, ctx) {
                    self.errors.push(error);
                }
            }
            Stmt::Expr(expr) => {
                if let Err(error) = self.lower_expr(expr, ctx, None) {
                    self.errors.push(error);
                }
            }
            Stmt::Return { value, location } => {
                let dbg = self.dbg_suffix(location);
                match value {
                    Some(value) => {
                        let expected = ctx.return_type.clone();
                        match self.lower_expr(value, ctx, Some(&expected)) {
                            Ok(lowered) => {
                                if expected.is_unit() {
                                    ctx.push(format!("  ret void{dbg}"));
                                } else {
                                    let llvm = llvm_type(&expected, self.env);
                                    ctx.push(format!("  ret {llvm} {}{dbg}", lowered.operand));
                                }
                            }
                            Err(error) => self.errors.push(error),
                        }
                    }
                    None => ctx.push(format!("  ret void{dbg}")),
                }
            }
            Stmt::Break { .. } => {
                if let Some((_, end)) = ctx.loop_stack.last().cloned() {
                    ctx.push(format!("  br label %{end}"));
                }
            }
            Stmt::Continue { .. } => {
                if let Some((header, _)) = ctx.loop_stack.last().cloned() {
                    ctx.push(format!("  br label %{header}"));
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                let header = ctx.fresh_label("while.cond");
                let body_label = ctx.fresh_label("while.body");
                let end = ctx.fresh_label("while.end");
                ctx.push(format!("  br label %{header}"));
                ctx.push(format!("{header}:"));
                match self.lower_expr(condition, ctx, Some(&Type::primitive(Primitive::Bool))) {
                    Ok(cond) => {
                        ctx.push(format!(
                            "  br i1 {}, label %{body_label}, label %{end}",
                            cond.operand
                        ));
                    }
                    Err(error) => {
                        self.errors.push(error);
                        ctx.push(format!("  br label %{end}"));
                    }
                }
                ctx.push(format!("{body_label}:"));
                ctx.loop_stack.push((header.clone(), end.clone()));
                self.lower_block(body, ctx);
                ctx.loop_stack.pop();
                ctx.push(format!("  br label %{header}"));
                ctx.push(format!("{end}:"));
            }
            Stmt::Loop { body, .. } => {
                let header = ctx.fresh_label("loop.body");
                let end = ctx.fresh_label("loop.end");
                ctx.push(format!("  br label %{header}"));
                ctx.push(format!("{header}:"));
                ctx.loop_stack.push((header.clone(), end.clone()));
                self.lower_block(body, ctx);
                ctx.loop_stack.pop();
                ctx.push(format!("  br label %{header}"));
                ctx.push(format!("{end}:"));
            }
            Stmt::For {
                pattern,
                iterable,
                body,
                location,
            } => {
                if let Err(error) = self.lower_for(pattern, iterable, body, location, ctx) {
                    self.errors.push(error);
                }
            }
        }
    }

    /// `for` over a range lowers to an index loop; other iterables are
    /// unsupported at this stage and diagnosed.
    fn lower_for(
        &mut self,
        pattern: &Pattern,
        iterable: &Expr,
        body: &Block,
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<(), CompileError> {
        let Expr::Range {
            start,
            end,
            inclusive,
            ..
        } = iterable
        else {
            return Err(CompileError::new(
                "Only range-based for loops lower to IR at this stage",
                location.to_error_location(self.sources),
                ErrorCode::C001,
            ));
        };

        let element_type = Type::primitive(Primitive::I64);
        let start_value = match start {
            Some(start) => self.lower_expr(start, ctx, Some(&element_type))?,
            None => Value::new("0", element_type.clone()),
        };
        let end_value = match end {
            Some(end) => self.lower_expr(end, ctx, Some(&element_type))?,
            None => {
                return Err(CompileError::new(
                    "Unbounded range in for loop",
                    location.to_error_location(self.sources),
                    ErrorCode::C001,
                ));
            }
        };

        let slot = ctx.fresh_reg();
        ctx.push(format!("  {slot} = alloca i64"));
        ctx.push(format!("  store i64 {}, ptr {slot}", start_value.operand));

        let binding = match pattern {
            Pattern::Binding { name, .. } => name.clone(),
            Pattern::Wildcard(_) => String::from("_"),
            other => {
                return Err(CompileError::new(
                    "Unsupported pattern in for loop",
                    other.location().to_error_location(self.sources),
                    ErrorCode::C001,
                ));
            }
        };
        ctx.locals.insert(
            binding,
            LocalSlot {
                ptr: slot.clone(),
                value_type: element_type,
            },
        );

        let header = ctx.fresh_label("for.cond");
        let body_label = ctx.fresh_label("for.body");
        let latch = ctx.fresh_label("for.latch");
        let end_label = ctx.fresh_label("for.end");

        ctx.push(format!("  br label %{header}"));
        ctx.push(format!("{header}:"));
        let current = ctx.fresh_reg();
        ctx.push(format!("  {current} = load i64, ptr {slot}"));
        let cmp = ctx.fresh_reg();
        let op = if *inclusive { "sle" } else { "slt" };
        ctx.push(format!(
            "  {cmp} = icmp {op} i64 {current}, {}",
            end_value.operand
        ));
        ctx.push(format!(
            "  br i1 {cmp}, label %{body_label}, label %{end_label}"
        ));
        ctx.push(format!("{body_label}:"));
        ctx.loop_stack.push((latch.clone(), end_label.clone()));
        self.lower_block(body, ctx);
        ctx.loop_stack.pop();
        ctx.push(format!("  br label %{latch}"));
        ctx.push(format!("{latch}:"));
        let loaded = ctx.fresh_reg();
        ctx.push(format!("  {loaded} = load i64, ptr {slot}"));
        let next = ctx.fresh_reg();
        ctx.push(format!("  {next} = add i64 {loaded}, 1"));
        ctx.push(format!("  store i64 {next}, ptr {slot}"));
        ctx.push(format!("  br label %{header}"));
        ctx.push(format!("{end_label}:"));
        Ok(())
    }

    fn bind_pattern_slot(&mut self, pattern: &Pattern, value: Value, ctx: &mut Ctx) {
        match pattern {
            Pattern::Binding { name, .. } => {
                let llvm = llvm_type(&value.value_type, self.env);
                let slot = ctx.fresh_reg();
                ctx.push(format!("  {slot} = alloca {llvm}"));
                ctx.push(format!("  store {llvm} {}, ptr {slot}", value.operand));
                ctx.locals.insert(
                    name.clone(),
                    LocalSlot {
                        ptr: slot,
                        value_type: value.value_type,
                    },
                );
            }
            Pattern::Wildcard(_) => {}
            Pattern::Tuple(members, _) => {
                if let Type::Tuple(member_types) = value.value_type.clone().as_ref() {
                    let llvm = llvm_type(&value.value_type, self.env);
                    for (index, (member, member_type)) in
                        members.iter().zip(member_types.iter()).enumerate()
                    {
                        let extracted = ctx.fresh_reg();
                        ctx.push(format!(
                            "  {extracted} = extractvalue {llvm} {}, {index}",
                            value.operand
                        ));
                        self.bind_pattern_slot(
                            member,
                            Value::new(extracted, member_type.clone()),
                            ctx,
                        );
                    }
                }
            }
            other => {
                self.errors.push(CompileError::new(
                    "Unsupported pattern in let binding",
                    other.location().to_error_location(self.sources),
                    ErrorCode::C001,
                ));
            }
        }
    }

    fn lower_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        ctx: &mut Ctx,
    ) -> Result<(), CompileError> {
        let (ptr, slot_type) = self.lower_place(target, ctx)?;
        let resolved = self.resolve(&slot_type, &ctx.subs);
        let llvm = llvm_type(&resolved, self.env);

        let rhs = self.lower_expr(value, ctx, Some(&resolved))?;
        let stored = if op == AssignOp::Assign {
            rhs.operand
        } else {
            let current = ctx.fresh_reg();
            ctx.push(format!("  {current} = load {llvm}, ptr {ptr}"));
            let primitive = resolved.as_primitive().unwrap_or(Primitive::I64);
            let instruction = match (op, primitive.is_float()) {
                (AssignOp::AddAssign, false) => "add",
                (AssignOp::SubAssign, false) => "sub",
                (AssignOp::MulAssign, false) => "mul",
                (AssignOp::DivAssign, false) => {
                    if primitive.is_signed() {
                        "sdiv"
                    } else {
                        "udiv"
                    }
                }
                (AssignOp::AddAssign, true) => "fadd",
                (AssignOp::SubAssign, true) => "fsub",
                (AssignOp::MulAssign, true) => "fmul",
                (AssignOp::DivAssign, true) => "fdiv",
                (AssignOp::Assign, _) => unreachable!(),
            };
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = {instruction} {llvm} {current}, {}",
                rhs.operand
            ));
            result
        };
        ctx.push(format!("  store {llvm} {stored}, ptr {ptr}"));
        Ok(())
    }

    /// Lower a place expression to (pointer operand, pointee type).
    pub fn lower_place(
        &mut self,
        expr: &Expr,
        ctx: &mut Ctx,
    ) -> Result<(String, TypeRef), CompileError> {
        match expr {
            Expr::Identifier(name, location) => match ctx.locals.get(name) {
                Some(slot) => Ok((slot.ptr.clone(), slot.value_type.clone())),
                None => Err(CompileError::new(
                    format!("Unknown place '{name}'"),
                    location.to_error_location(self.sources),
                    ErrorCode::C003,
                )),
            },
            Expr::Field {
                receiver,
                field,
                location,
            } => {
                let (base_ptr, base_type) = self.lower_place(receiver, ctx)?;
                let resolved = self.resolve(&base_type, &ctx.subs);
                let (through, ptr) = match resolved.as_ref() {
                    Type::Reference { target, .. } => {
                        let loaded = ctx.fresh_reg();
                        ctx.push(format!("  {loaded} = load ptr, ptr {base_ptr}"));
                        (target.clone(), loaded)
                    }
                    _ => (resolved.clone(), base_ptr),
                };
                match through.as_ref() {
                    Type::Named { name, type_args } => {
                        if let Some(def) = self.env.structs.get(name).cloned() {
                            let index = def
                                .fields
                                .iter()
                                .position(|(field_name, ..)| field_name == field)
                                .ok_or_else(|| {
                                    CompileError::new(
                                        format!("'{name}' has no field '{field}'"),
                                        location.to_error_location(self.sources),
                                        ErrorCode::C003,
                                    )
                                })?;
                            let subs: Vec<(String, TypeRef)> = def
                                .type_params
                                .iter()
                                .cloned()
                                .zip(type_args.iter().cloned())
                                .collect();
                            let field_type = def.fields[index].1.substitute(&subs);
                            self.ensure_aggregate(&through);
                            let aggregate = llvm_type(&through, self.env);
                            let gep = ctx.fresh_reg();
                            ctx.push(format!(
                                "  {gep} = getelementptr {aggregate}, ptr {ptr}, i32 0, i32 {index}"
                            ));
                            return Ok((gep, field_type));
                        }
                        if let Some(def) = self.env.classes.get(name).cloned() {
                            let index = def
                                .fields
                                .iter()
                                .position(|(field_name, ..)| field_name == field)
                                .ok_or_else(|| {
                                    CompileError::new(
                                        format!("'{name}' has no field '{field}'"),
                                        location.to_error_location(self.sources),
                                        ErrorCode::C003,
                                    )
                                })?;
                            // Reference classes hold a vtable slot at index 0
                            let offset = if def.is_value { index } else { index + 1 };
                            let field_type = def.fields[index].1.clone();
                            self.ensure_class_aggregate(name, &def);
                            let object = if def.is_value {
                                ptr
                            } else {
                                let loaded = ctx.fresh_reg();
                                ctx.push(format!("  {loaded} = load ptr, ptr {ptr}"));
                                loaded
                            };
                            let gep = ctx.fresh_reg();
                            ctx.push(format!(
                                "  {gep} = getelementptr %class.{name}, ptr {object}, i32 0, i32 {offset}"
                            ));
                            return Ok((gep, field_type));
                        }
                        Err(CompileError::new(
                            format!("Cannot address field '{field}' of '{name}'"),
                            location.to_error_location(self.sources),
                            ErrorCode::C001,
                        ))
                    }
                    Type::Tuple(members) => {
                        let index: usize = field.parse().map_err(|_| {
                            CompileError::new(
                                format!("Bad tuple index '{field}'"),
                                location.to_error_location(self.sources),
                                ErrorCode::C001,
                            )
                        })?;
                        let aggregate = llvm_type(&through, self.env);
                        let gep = ctx.fresh_reg();
                        ctx.push(format!(
                            "  {gep} = getelementptr {aggregate}, ptr {ptr}, i32 0, i32 {index}"
                        ));
                        Ok((gep, members[index].clone()))
                    }
                    _ => Err(CompileError::new(
                        "Field access on a non-aggregate",
                        location.to_error_location(self.sources),
                        ErrorCode::C001,
                    )),
                }
            }
            Expr::Index {
                receiver,
                index,
                location,
            } => {
                let (base_ptr, base_type) = self.lower_place(receiver, ctx)?;
                let index_value =
                    self.lower_expr(index, ctx, Some(&Type::primitive(Primitive::I64)))?;
                match self.resolve(&base_type, &ctx.subs).as_ref() {
                    Type::Array { element, size } => {
                        let gep = ctx.fresh_reg();
                        let element_llvm = llvm_type(element, self.env);
                        ctx.push(format!(
                            "  {gep} = getelementptr [{size} x {element_llvm}], ptr {base_ptr}, i64 0, i64 {}",
                            index_value.operand
                        ));
                        Ok((gep, element.clone()))
                    }
                    Type::Slice(element) => {
                        let data = ctx.fresh_reg();
                        ctx.push(format!(
                            "  {data} = getelementptr {{ ptr, i64 }}, ptr {base_ptr}, i32 0, i32 0"
                        ));
                        let loaded = ctx.fresh_reg();
                        ctx.push(format!("  {loaded} = load ptr, ptr {data}"));
                        let gep = ctx.fresh_reg();
                        let element_llvm = llvm_type(element, self.env);
                        ctx.push(format!(
                            "  {gep} = getelementptr {element_llvm}, ptr {loaded}, i64 {}",
                            index_value.operand
                        ));
                        Ok((gep, element.clone()))
                    }
                    _ => Err(CompileError::new(
                        "Cannot index this value",
                        location.to_error_location(self.sources),
                        ErrorCode::C001,
                    )),
                }
            }
            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
                ..
            } => {
                let pointer = self.lower_expr(operand, ctx, None)?;
                let pointee = match pointer.value_type.as_ref() {
                    Type::Reference { target, .. } | Type::Pointer { target, .. } => {
                        target.clone()
                    }
                    _ => Type::unit(),
                };
                Ok((pointer.operand, pointee))
            }
            other => Err(CompileError::new(
                "Expression is not assignable",
                other.location().to_error_location(self.sources),
                ErrorCode::C001,
            )),
        }
    }

    // ---------------------------------
    //           Expressions
    // ---------------------------------

    pub fn lower_expr(
        &mut self,
        expr: &Expr,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        match expr {
            Expr::Literal(literal, _) => Ok(self.lower_literal(literal, expected)),
            Expr::InterpolatedString(parts, location) => {
                self.lower_interpolated(parts, location, ctx)
            }
            Expr::Identifier(name, location) => {
                if let Some(slot) = ctx.locals.get(name).cloned() {
                    let resolved = self.resolve(&slot.value_type, &ctx.subs);
                    let llvm = llvm_type(&resolved, self.env);
                    let loaded = ctx.fresh_reg();
                    ctx.push(format!("  {loaded} = load {llvm}, ptr {}", slot.ptr));
                    return Ok(Value::new(loaded, resolved));
                }
                if let Some((value, const_type)) = self.env.constants.get(name) {
                    let value = value.clone();
                    let const_type = const_type.clone();
                    return Ok(self.lower_const_value(&value, &const_type));
                }
                // A bare function name evaluates to its address
                if let Some(sig) = self.env.functions.get(name).cloned() {
                    let mangled =
                        mangle_function(name, &[], self.options.suite_prefix.as_deref());
                    self.declare_sig(&mangled, &sig, &[]);
                    return Ok(Value::new(
                        format!("@{mangled}"),
                        Arc::new(Type::Function {
                            params: sig.params.iter().map(|(_, t)| t.clone()).collect(),
                            return_type: sig.return_type.clone(),
                            varargs: false,
                        }),
                    ));
                }
                Err(CompileError::new(
                    format!("Unknown identifier '{name}' during lowering"),
                    location.to_error_location(self.sources),
                    ErrorCode::C003,
                ))
            }
            Expr::Path { .. } | Expr::Call { .. } => self.lower_call_like(expr, ctx, expected),
            Expr::MethodCall {
                receiver,
                method,
                type_args,
                args,
                location,
            } => self.lower_method_call(receiver, method, type_args, args, location, ctx),
            Expr::Binary {
                op,
                lhs,
                rhs,
                location,
            } => self.lower_binary(*op, lhs, rhs, location, ctx, expected),
            Expr::Unary {
                op,
                operand,
                location,
            } => self.lower_unary(*op, operand, location, ctx, expected),
            Expr::Field { .. } | Expr::Index { .. } => {
                let (ptr, slot_type) = self.lower_place(expr, ctx)?;
                let resolved = self.resolve(&slot_type, &ctx.subs);
                let llvm = llvm_type(&resolved, self.env);
                let loaded = ctx.fresh_reg();
                ctx.push(format!("  {loaded} = load {llvm}, ptr {ptr}"));
                Ok(Value::new(loaded, resolved))
            }
            Expr::Tuple(members, _) => {
                let mut lowered = Vec::new();
                for member in members {
                    lowered.push(self.lower_expr(member, ctx, None)?);
                }
                let tuple_type = Arc::new(Type::Tuple(
                    lowered
                        .iter()
                        .map(|value| value.value_type.clone())
                        .collect(),
                ));
                let llvm = llvm_type(&tuple_type, self.env);
                let mut current = String::from("undef");
                for (index, member) in lowered.iter().enumerate() {
                    let next = ctx.fresh_reg();
                    let member_llvm = llvm_type(&member.value_type, self.env);
                    ctx.push(format!(
                        "  {next} = insertvalue {llvm} {current}, {member_llvm} {}, {index}",
                        member.operand
                    ));
                    current = next;
                }
                Ok(Value::new(current, tuple_type))
            }
            Expr::Array(elements, _) => {
                let element_hint = expected.and_then(|expected| match expected.as_ref() {
                    Type::Array { element, .. } | Type::Slice(element) => Some(element.clone()),
                    _ => None,
                });
                let mut lowered = Vec::new();
                let mut element_type = element_hint;
                for element in elements {
                    let value = self.lower_expr(element, ctx, element_type.as_ref())?;
                    if element_type.is_none() {
                        element_type = Some(value.value_type.clone());
                    }
                    lowered.push(value);
                }
                let element_type = element_type.unwrap_or_else(Type::unit);
                let array_type = Arc::new(Type::Array {
                    element: element_type.clone(),
                    size: lowered.len() as u64,
                });
                let llvm = llvm_type(&array_type, self.env);
                let element_llvm = llvm_type(&element_type, self.env);
                let mut current = String::from("undef");
                for (index, value) in lowered.iter().enumerate() {
                    let next = ctx.fresh_reg();
                    ctx.push(format!(
                        "  {next} = insertvalue {llvm} {current}, {element_llvm} {}, {index}",
                        value.operand
                    ));
                    current = next;
                }
                Ok(Value::new(current, array_type))
            }
            Expr::ArrayRepeat {
                value,
                count,
                location,
            } => {
                let element = self.lower_expr(value, ctx, None)?;
                let size = match count.as_ref() {
                    Expr::Literal(Literal::Int(size, _), _) if *size >= 0 => *size as u64,
                    _ => {
                        return Err(CompileError::new(
                            "Array repeat count must be a constant",
                            location.to_error_location(self.sources),
                            ErrorCode::C001,
                        ));
                    }
                };
                let array_type = Arc::new(Type::Array {
                    element: element.value_type.clone(),
                    size,
                });
                let llvm = llvm_type(&array_type, self.env);
                let element_llvm = llvm_type(&element.value_type, self.env);
                let mut current = String::from("undef");
                for index in 0..size {
                    let next = ctx.fresh_reg();
                    ctx.push(format!(
                        "  {next} = insertvalue {llvm} {current}, {element_llvm} {}, {index}",
                        element.operand
                    ));
                    current = next;
                }
                Ok(Value::new(current, array_type))
            }
            Expr::StructLiteral {
                type_name,
                type_args,
                fields,
                location,
            } => self.lower_struct_literal(type_name, type_args, fields, location, ctx, expected),
            Expr::Block(block) => {
                self.lower_block(block, ctx);
                Ok(Value::unit())
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let cond =
                    self.lower_expr(condition, ctx, Some(&Type::primitive(Primitive::Bool)))?;
                let then_label = ctx.fresh_label("if.then");
                let else_label = ctx.fresh_label("if.else");
                let end_label = ctx.fresh_label("if.end");
                ctx.push(format!(
                    "  br i1 {}, label %{then_label}, label %{else_label}",
                    cond.operand
                ));
                ctx.push(format!("{then_label}:"));
                self.lower_block(then_branch, ctx);
                ctx.push(format!("  br label %{end_label}"));
                ctx.push(format!("{else_label}:"));
                if let Some(else_branch) = else_branch {
                    self.lower_expr(else_branch, ctx, expected)?;
                }
                ctx.push(format!("  br label %{end_label}"));
                ctx.push(format!("{end_label}:"));
                Ok(Value::unit())
            }
            Expr::When {
                scrutinee,
                arms,
                location,
            } => self.lower_when(scrutinee, arms, location, ctx, expected),
            Expr::Closure {
                params,
                return_type,
                body,
                location,
            } => self.lower_closure(params, return_type.as_ref(), body, location, ctx),
            Expr::Try(inner, location) => self.lower_try(inner, location, ctx),
            Expr::Cast {
                value,
                target,
                location,
            } => {
                let source = self.lower_expr(value, ctx, None)?;
                let target_type = self.resolve(&lower_type_expr(target), &ctx.subs);
                self.lower_numeric_conversion(source, &target_type, location, ctx)
            }
            Expr::Await(inner, _) => {
                // Async bodies lower as ordinary functions returning a
                // Future-shaped aggregate; await is a pass-through here
                self.lower_expr(inner, ctx, expected)
            }
            Expr::Range { location, .. } => Err(CompileError::new(
                "Ranges are only supported in for loops and slicing",
                location.to_error_location(self.sources),
                ErrorCode::C001,
            )),
        }
    }

    pub fn lower_literal(&mut self, literal: &Literal, expected: Option<&TypeRef>) -> Value {
        match literal {
            Literal::Int(value, suffix) => {
                let value_type = match suffix {
                    Some(suffix) => Type::primitive(suffix_primitive(*suffix)),
                    None => expected
                        .filter(|expected| {
                            expected
                                .as_primitive()
                                .map(|primitive| primitive.is_integer() || primitive.is_float())
                                .unwrap_or(false)
                        })
                        .cloned()
                        .unwrap_or_else(|| Type::primitive(Primitive::I32)),
                };
                if value_type
                    .as_primitive()
                    .map(|primitive| primitive.is_float())
                    .unwrap_or(false)
                {
                    return Value::new(float_literal(*value as f64), value_type);
                }
                Value::new(value.to_string(), value_type)
            }
            Literal::Float(value, suffix) => {
                let value_type = match suffix {
                    Some(suffix) => Type::primitive(suffix_primitive(*suffix)),
                    None => expected
                        .filter(|expected| {
                            expected
                                .as_primitive()
                                .map(|primitive| primitive.is_float())
                                .unwrap_or(false)
                        })
                        .cloned()
                        .unwrap_or_else(|| Type::primitive(Primitive::F64)),
                };
                Value::new(float_literal(*value), value_type)
            }
            Literal::Bool(value) => Value::new(
                if *value { "true" } else { "false" },
                Type::primitive(Primitive::Bool),
            ),
            Literal::Char(value) => Value::new(
                (*value as u32).to_string(),
                Type::primitive(Primitive::Char),
            ),
            Literal::Str(text) => {
                let global = self.intern_string(text);
                Value::new(global, Type::primitive(Primitive::Str))
            }
            Literal::Unit => Value::unit(),
        }
    }

    fn lower_const_value(&mut self, value: &ConstValue, const_type: &TypeRef) -> Value {
        match value {
            ConstValue::Int(value) => Value::new(value.to_string(), const_type.clone()),
            ConstValue::Float(value) => Value::new(float_literal(*value), const_type.clone()),
            ConstValue::Bool(value) => {
                Value::new(if *value { "true" } else { "false" }, const_type.clone())
            }
            ConstValue::Str(text) => {
                let global = self.intern_string(text);
                Value::new(global, const_type.clone())
            }
            ConstValue::Char(value) => {
                Value::new((*value as u32).to_string(), const_type.clone())
            }
        }
    }

    /// Interpolated strings lower to a string-builder sequence using the
    /// runtime's append helpers.
    fn lower_interpolated(
        &mut self,
        parts: &[InterpolatedPart],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        self.declares
            .insert("declare ptr @tml_rt_sb_new()".to_string());
        self.declares
            .insert("declare void @tml_rt_sb_push_str(ptr, ptr)".to_string());
        self.declares
            .insert("declare ptr @tml_rt_sb_finish(ptr)".to_string());

        let builder = ctx.fresh_reg();
        let dbg = self.dbg_suffix(location);
        ctx.push(format!("  {builder} = call ptr @tml_rt_sb_new(){dbg}"));

        for part in parts {
            match part {
                InterpolatedPart::Text(text) => {
                    let global = self.intern_string(text);
                    ctx.push(format!(
                        "  call void @tml_rt_sb_push_str(ptr {builder}, ptr {global})"
                    ));
                }
                InterpolatedPart::Expr(inner) => {
                    let value = self.lower_expr(inner, ctx, None)?;
                    let text = self.to_string_value(value, location, ctx)?;
                    ctx.push(format!(
                        "  call void @tml_rt_sb_push_str(ptr {builder}, ptr {})",
                        text.operand
                    ));
                }
            }
        }

        let result = ctx.fresh_reg();
        ctx.push(format!(
            "  {result} = call ptr @tml_rt_sb_finish(ptr {builder})"
        ));
        Ok(Value::new(result, Type::primitive(Primitive::Str)))
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        // Short-circuit && / ||
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.lower_short_circuit(op, lhs, rhs, ctx);
        }

        let arithmetic_hint = expected.filter(|expected| {
            expected
                .as_primitive()
                .map(|primitive| primitive.is_integer() || primitive.is_float())
                .unwrap_or(false)
        });
        let left = self.lower_expr(lhs, ctx, arithmetic_hint)?;
        let right = self.lower_expr(rhs, ctx, Some(&left.value_type))?;
        let primitive = left.value_type.as_primitive().ok_or_else(|| {
            CompileError::new(
                format!("Operator on non-primitive type {}", left.value_type),
                location.to_error_location(self.sources),
                ErrorCode::C001,
            )
        })?;
        let llvm = llvm_type(&left.value_type, self.env);
        let is_float = primitive.is_float();
        let signed = primitive.is_signed();

        let instruction = match op {
            BinaryOp::Add => if is_float { "fadd" } else { "add" }.to_string(),
            BinaryOp::Sub => if is_float { "fsub" } else { "sub" }.to_string(),
            BinaryOp::Mul => if is_float { "fmul" } else { "mul" }.to_string(),
            BinaryOp::Div => {
                if is_float {
                    "fdiv".to_string()
                } else if signed {
                    "sdiv".to_string()
                } else {
                    "udiv".to_string()
                }
            }
            BinaryOp::Rem => {
                if is_float {
                    "frem".to_string()
                } else if signed {
                    "srem".to_string()
                } else {
                    "urem".to_string()
                }
            }
            BinaryOp::BitAnd => "and".to_string(),
            BinaryOp::BitOr => "or".to_string(),
            BinaryOp::BitXor => "xor".to_string(),
            BinaryOp::Shl => "shl".to_string(),
            BinaryOp::Shr => if signed { "ashr" } else { "lshr" }.to_string(),
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::LtEq
            | BinaryOp::GtEq => {
                let condition = if is_float {
                    let code = match op {
                        BinaryOp::Eq => "oeq",
                        BinaryOp::NotEq => "one",
                        BinaryOp::Lt => "olt",
                        BinaryOp::Gt => "ogt",
                        BinaryOp::LtEq => "ole",
                        _ => "oge",
                    };
                    format!("fcmp {code}")
                } else {
                    let code = match op {
                        BinaryOp::Eq => "eq".to_string(),
                        BinaryOp::NotEq => "ne".to_string(),
                        BinaryOp::Lt => if signed { "slt" } else { "ult" }.to_string(),
                        BinaryOp::Gt => if signed { "sgt" } else { "ugt" }.to_string(),
                        BinaryOp::LtEq => if signed { "sle" } else { "ule" }.to_string(),
                        _ => if signed { "sge" } else { "uge" }.to_string(),
                    };
                    format!("icmp {code}")
                };
                let result = ctx.fresh_reg();
                let dbg = self.dbg_suffix(location);
                ctx.push(format!(
                    "  {result} = {condition} {llvm} {}, {}{dbg}",
                    left.operand, right.operand
                ));
                return Ok(Value::new(result, Type::primitive(Primitive::Bool)));
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        };

        let result = ctx.fresh_reg();
        let dbg = self.dbg_suffix(location);
        ctx.push(format!(
            "  {result} = {instruction} {llvm} {}, {}{dbg}",
            left.operand, right.operand
        ));
        Ok(Value::new(result, left.value_type))
    }

    fn lower_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let bool_type = Type::primitive(Primitive::Bool);
        let left = self.lower_expr(lhs, ctx, Some(&bool_type))?;
        let entry = ctx.fresh_label("sc.entry");
        let rhs_label = ctx.fresh_label("sc.rhs");
        let end_label = ctx.fresh_label("sc.end");
        ctx.push(format!("  br label %{entry}"));
        ctx.push(format!("{entry}:"));
        match op {
            BinaryOp::And => ctx.push(format!(
                "  br i1 {}, label %{rhs_label}, label %{end_label}",
                left.operand
            )),
            _ => ctx.push(format!(
                "  br i1 {}, label %{end_label}, label %{rhs_label}",
                left.operand
            )),
        }
        ctx.push(format!("{rhs_label}:"));
        let right = self.lower_expr(rhs, ctx, Some(&bool_type))?;
        let rhs_exit = ctx.fresh_label("sc.rhsexit");
        ctx.push(format!("  br label %{rhs_exit}"));
        ctx.push(format!("{rhs_exit}:"));
        ctx.push(format!("  br label %{end_label}"));
        ctx.push(format!("{end_label}:"));
        let result = ctx.fresh_reg();
        let short_value = if op == BinaryOp::And { "false" } else { "true" };
        ctx.push(format!(
            "  {result} = phi i1 [ {short_value}, %{entry} ], [ {}, %{rhs_exit} ]",
            right.operand
        ));
        Ok(Value::new(result, bool_type))
    }

    fn lower_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        match op {
            UnaryOp::Neg => {
                let value = self.lower_expr(operand, ctx, expected)?;
                let llvm = llvm_type(&value.value_type, self.env);
                let result = ctx.fresh_reg();
                let is_float = value
                    .value_type
                    .as_primitive()
                    .map(|primitive| primitive.is_float())
                    .unwrap_or(false);
                if is_float {
                    ctx.push(format!("  {result} = fneg {llvm} {}", value.operand));
                } else {
                    ctx.push(format!("  {result} = sub {llvm} 0, {}", value.operand));
                }
                Ok(Value::new(result, value.value_type))
            }
            UnaryOp::Not => {
                let value =
                    self.lower_expr(operand, ctx, Some(&Type::primitive(Primitive::Bool)))?;
                let result = ctx.fresh_reg();
                ctx.push(format!("  {result} = xor i1 {}, true", value.operand));
                Ok(Value::new(result, Type::primitive(Primitive::Bool)))
            }
            UnaryOp::Ref | UnaryOp::RefMut => {
                let (ptr, pointee) = self.lower_place(operand, ctx)?;
                Ok(Value::new(
                    ptr,
                    Arc::new(Type::Reference {
                        target: pointee,
                        mutable: op == UnaryOp::RefMut,
                    }),
                ))
            }
            UnaryOp::Deref => {
                let pointer = self.lower_expr(operand, ctx, None)?;
                let pointee = match pointer.value_type.as_ref() {
                    Type::Reference { target, .. } | Type::Pointer { target, .. } => {
                        target.clone()
                    }
                    _ => {
                        return Err(CompileError::new(
                            format!("Cannot dereference {}", pointer.value_type),
                            location.to_error_location(self.sources),
                            ErrorCode::C001,
                        ));
                    }
                };
                let llvm = llvm_type(&pointee, self.env);
                let loaded = ctx.fresh_reg();
                ctx.push(format!("  {loaded} = load {llvm}, ptr {}", pointer.operand));
                Ok(Value::new(loaded, pointee))
            }
        }
    }

    fn lower_struct_literal(
        &mut self,
        type_name: &str,
        type_args: &[TypeExpr],
        fields: &[(String, Expr)],
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        let def = self.env.structs.get(type_name).cloned().ok_or_else(|| {
            CompileError::new(
                format!("Unknown struct '{type_name}' during lowering"),
                location.to_error_location(self.sources),
                ErrorCode::C003,
            )
        })?;

        let resolved_args: Vec<TypeRef> = if !type_args.is_empty() {
            type_args
                .iter()
                .map(|arg| self.resolve(&lower_type_expr(arg), &ctx.subs))
                .collect()
        } else if let Some(Type::Named { name, type_args }) =
            expected.map(|expected| expected.as_ref())
        {
            if name == type_name {
                type_args.clone()
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        let struct_type = Type::named(type_name, resolved_args.clone());
        self.ensure_aggregate(&struct_type);
        let llvm = llvm_type(&struct_type, self.env);
        let subs: Vec<(String, TypeRef)> = def
            .type_params
            .iter()
            .cloned()
            .zip(resolved_args.iter().cloned())
            .collect();

        let mut current = String::from("undef");
        for (index, (field_name, field_type, _)) in def.fields.iter().enumerate() {
            let field_expr = fields
                .iter()
                .find(|(name, _)| name == field_name)
                .map(|(_, expr)| expr)
                .ok_or_else(|| {
                    CompileError::new(
                        format!("Missing field '{field_name}' lowering '{type_name}'"),
                        location.to_error_location(self.sources),
                        ErrorCode::C001,
                    )
                })?;
            let resolved_field = self.resolve(&field_type.substitute(&subs), &ctx.subs);
            let value = self.lower_expr(field_expr, ctx, Some(&resolved_field))?;
            let field_llvm = llvm_type(&resolved_field, self.env);
            let next = ctx.fresh_reg();
            ctx.push(format!(
                "  {next} = insertvalue {llvm} {current}, {field_llvm} {}, {index}",
                value.operand
            ));
            current = next;
        }

        Ok(Value::new(current, struct_type))
    }

    fn lower_try(
        &mut self,
        inner: &Expr,
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let value = self.lower_expr(inner, ctx, None)?;
        let resolved = self.resolve(&value.value_type, &ctx.subs);
        let Type::Named { name, type_args } = resolved.as_ref() else {
            return Err(CompileError::new(
                "'?' requires a Result or Option value",
                location.to_error_location(self.sources),
                ErrorCode::C001,
            ));
        };
        if (name != "Result" && name != "Option") || type_args.is_empty() {
            return Err(CompileError::new(
                "'?' requires a Result or Option value",
                location.to_error_location(self.sources),
                ErrorCode::C001,
            ));
        }
        let ok_type = type_args[0].clone();

        self.ensure_aggregate(&resolved);
        let enum_llvm = llvm_type(&resolved, self.env);
        // Store, inspect the tag, early-return the failure payload
        let slot = ctx.fresh_reg();
        ctx.push(format!("  {slot} = alloca {enum_llvm}"));
        ctx.push(format!("  store {enum_llvm} {}, ptr {slot}", value.operand));
        let tag_ptr = ctx.fresh_reg();
        ctx.push(format!(
            "  {tag_ptr} = getelementptr {enum_llvm}, ptr {slot}, i32 0, i32 0"
        ));
        let tag = ctx.fresh_reg();
        ctx.push(format!("  {tag} = load i32, ptr {tag_ptr}"));

        // Result: Ok = 0; Option: Some = 1 (None is declared first)
        let success_tag = if name == "Result" { 0 } else { 1 };
        let success_label = ctx.fresh_label("try.ok");
        let failure_label = ctx.fresh_label("try.err");
        let cmp = ctx.fresh_reg();
        ctx.push(format!("  {cmp} = icmp eq i32 {tag}, {success_tag}"));
        ctx.push(format!(
            "  br i1 {cmp}, label %{success_label}, label %{failure_label}"
        ));

        ctx.push(format!("{failure_label}:"));
        let return_type = ctx.return_type.clone();
        if return_type.is_unit() {
            ctx.push("  ret void");
        } else {
            // The propagated failure re-wraps into the caller's return enum;
            // identical layout allows a direct reload
            let return_llvm = llvm_type(&return_type, self.env);
            let propagated = ctx.fresh_reg();
            ctx.push(format!("  {propagated} = load {return_llvm}, ptr {slot}"));
            ctx.push(format!("  ret {return_llvm} {propagated}"));
        }

        ctx.push(format!("{success_label}:"));
        if ok_type.is_unit() {
            return Ok(Value::unit());
        }
        let payload_ptr = ctx.fresh_reg();
        ctx.push(format!(
            "  {payload_ptr} = getelementptr {enum_llvm}, ptr {slot}, i32 0, i32 1"
        ));
        let ok_llvm = llvm_type(&ok_type, self.env);
        let payload = ctx.fresh_reg();
        ctx.push(format!("  {payload} = load {ok_llvm}, ptr {payload_ptr}"));
        Ok(Value::new(payload, ok_type))
    }

    /// Declares an external symbol for a signature if not already present.
    pub fn declare_sig(
        &mut self,
        mangled: &str,
        sig: &crate::compiler::types::FunctionSig,
        subs: &[(String, TypeRef)],
    ) {
        if self.mono.is_known(mangled) {
            return;
        }
        let params = sig
            .params
            .iter()
            .map(|(_, param_type)| llvm_type(&param_type.substitute(subs), self.env))
            .collect::<Vec<_>>()
            .join(", ");
        let return_type = {
            let resolved = sig.return_type.substitute(subs);
            if resolved.is_unit() || resolved.is_never() {
                "void".to_string()
            } else {
                llvm_type(&resolved, self.env)
            }
        };
        self.declares
            .insert(format!("declare {return_type} @{mangled}({params})"));
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::compiler::checker::check_module;
    use crate::compiler::diagnostics::CompilerMessages;
    use crate::compiler::modules::loader::ModuleLoader;
    use crate::compiler::parser::build_ast::parse_module;
    use crate::compiler::preprocessor::BuildMode;
    use crate::compiler::tokenizer::tokenizer::tokenize;
    use std::path::PathBuf;

    pub(crate) fn emit(source: &str) -> (String, Vec<CompileError>) {
        let mut sources = SourceMap::new();
        let file = sources.add(PathBuf::from("gen.tml"), source.to_string());
        let lexed = tokenize(source, file, &sources);
        assert!(lexed.errors.is_empty(), "lexer errors: {:?}", lexed.errors);
        let parsed = parse_module(&lexed.tokens, &sources);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);

        let mut messages = CompilerMessages::new();
        let mut loader = ModuleLoader::new(PathBuf::from("."), BuildMode::Debug);
        loader.library_roots = vec![];
        let mut registry = ModuleRegistry::new();
        let env = check_module(
            &parsed.ast,
            &mut loader,
            &mut registry,
            &mut sources,
            &mut messages,
        );
        assert!(
            !messages.has_errors(),
            "checker errors: {:?}",
            messages.errors
        );

        let mut generator =
            LlvmGenerator::new(&env, &registry, &sources, CodegenOptions::new("gen"));
        let ir = generator.emit_module(&parsed.ast);
        (ir, generator.errors)
    }

    #[test]
    fn main_returning_zero_emits_a_definition() {
        let (ir, errors) = emit("func main() -> I32 {\n    return 0\n}\n");
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("define i32 @tml_main()"));
        assert!(ir.contains("ret i32 0"));
        assert!(ir.contains("target triple"));
    }

    #[test]
    fn monomorphization_emits_one_symbol_per_type_tuple() {
        let (ir, errors) = emit(
            "func id[T](x: T) -> T {\n    return x\n}\nfunc main() -> I32 {\n    let a = id(1_i32)\n    let b = id(2_i64)\n    let c = id(\"a\")\n    let d = id(3_i32)\n    return a\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("define i32 @tml_id__I32(i32 %arg0)"));
        assert!(ir.contains("define i64 @tml_id__I64(i64 %arg0)"));
        assert!(ir.contains("define ptr @tml_id__Str(ptr %arg0)"));
        // exactly one definition per tuple even with two I32 call sites
        assert_eq!(ir.matches("define i32 @tml_id__I32").count(), 1);
        assert!(ir.contains("call i32 @tml_id__I32"));
        assert!(ir.contains("call i64 @tml_id__I64"));
        assert!(ir.contains("call ptr @tml_id__Str"));
    }

    #[test]
    fn struct_literal_and_field_access_lower_to_aggregates() {
        let (ir, errors) = emit(
            "struct Point {\n    pub x: F64\n    pub y: F64\n}\nfunc main() -> I32 {\n    let p = Point { x: 1.0, y: 2.0 }\n    let total = p.x + p.y\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("%struct.Point = type { double, double }"));
        assert!(ir.contains("insertvalue %struct.Point"));
        assert!(ir.contains("getelementptr %struct.Point"));
        assert!(ir.contains("fadd double"));
    }

    #[test]
    fn enums_lower_to_tag_plus_payload() {
        let (ir, errors) = emit(
            "enum Shape {\n    Circle(F64),\n    Empty,\n}\nfunc main() -> I32 {\n    let s = Circle(1.5)\n    return when s {\n        Circle(r) => 1,\n        Empty => 0,\n    }\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("%enum.Shape = type { i32, [8 x i8] }"));
        assert!(ir.contains("switch i32"));
    }

    #[test]
    fn while_loops_emit_structured_blocks() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let mut n = 0\n    while n < 10 {\n        n = n + 1\n    }\n    return n\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("while.cond"));
        assert!(ir.contains("while.body"));
        assert!(ir.contains("icmp slt i32"));
    }

    #[test]
    fn string_literals_are_interned_globals() {
        let (ir, errors) = emit("func main() -> I32 {\n    let s = \"hello\"\n    return 0\n}\n");
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains(
            "@.str.1 = private unnamed_addr constant [6 x i8] c\"hello\\00\""
        ));
    }

    #[test]
    fn unsupported_constructs_error_instead_of_vanishing() {
        let (_, errors) = emit("func main() -> I32 {\n    let r = 1..10\n    return 0\n}\n");
        assert!(errors.iter().any(|error| error.code == ErrorCode::C001));
    }

    #[test]
    fn numeric_cast_selects_the_right_instruction() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let a = 3_i64 as I32\n    let b = 1_i32 as F64\n    let c = 2.5 as I32\n    let d = 4_u8 as U32\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("trunc i64"));
        assert!(ir.contains("sitofp i32"));
        assert!(ir.contains("fptosi double"));
        assert!(ir.contains("zext i8"));
    }

    #[test]
    fn for_over_range_lowers_to_an_index_loop() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let mut total = 0_i64\n    for i in 0..10 {\n        total = total + i\n    }\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("for.cond"));
        assert!(ir.contains("icmp slt i64"));
        assert!(ir.contains("add i64"));
    }
}
