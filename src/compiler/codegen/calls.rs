//! Call-expression dispatch.
//!
//! The resolution order is fixed for reproducibility:
//! 1. primitive static method / constant (`I32::default`, `F64::from(x)`)
//! 2. enum constructor, via path or bare, with payload/context inference
//! 3. builtin intrinsics (`unreachable`, `assume`)
//! 4. builtin families (io, mem, atomic, sync, time, math, collections,
//!    string, assert, async)
//! 5. indirect call through a function-pointer local (closures included)
//! 6. generic free function (unify, queue instantiation, direct call)
//! 7. class/struct constructor `Type::new`
//! 8. generic static methods, inferred from path args or expected context
//! 9. user-defined bare function; registry lookup; finally a forward
//!    reference with the computed mangled name

use crate::compiler::checker::inference::{unify, Substitutions};
use crate::compiler::codegen::intrinsics;
use crate::compiler::codegen::mangle::mangle_function;
use crate::compiler::codegen::types::{enum_payload_size_with, llvm_type};
use crate::compiler::codegen::{Ctx, LlvmGenerator, Value};
use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::parser::ast_nodes::{Expr, Pattern, TypeExpr, WhenArm};
use crate::compiler::source::TextLocation;
use crate::compiler::types::{lower_type_expr, FunctionSig, Primitive, Type, TypeRef};
use std::sync::Arc;

impl<'a> LlvmGenerator<'a> {
    pub fn lower_call_like(
        &mut self,
        expr: &Expr,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        match expr {
            Expr::Call {
                callee,
                args,
                location,
            } => self.lower_call(callee, args, location, ctx, expected),
            // A bare path in value position: enum constant or function ref
            Expr::Path {
                segments,
                location,
                ..
            } => self.lower_path_value(segments, location, ctx, expected),
            _ => unreachable!("lower_call_like only receives calls and paths"),
        }
    }

    fn lower_path_value(
        &mut self,
        segments: &[String],
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        if segments.len() == 2 {
            // Primitive constant: I32::MAX etc.
            if let Some(value) =
                intrinsics::primitive_constant(&segments[0], &segments[1])
            {
                return Ok(value);
            }
            // Payload-free enum constructor as a value: Color::Red
            if let Some(def) = self.env.enums.get(&segments[0]).cloned() {
                if let Some(index) = def.variant_index(&segments[1]) {
                    return self.construct_enum(&def, index, &[], location, ctx, expected);
                }
            }
        }
        // Function reference by path
        let qualified = segments.join("::");
        if let Some(sig) = self.env.functions.get(&qualified).cloned() {
            let mangled = mangle_function(&qualified, &[], self.options.suite_prefix.as_deref());
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
            format!("Unknown path '{qualified}' during lowering"),
            location.to_error_location(self.sources),
            ErrorCode::C003,
        ))
    }

    fn lower_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        let (segments, explicit_type_args): (Option<Vec<String>>, Vec<TypeExpr>) = match callee {
            Expr::Identifier(name, _) => (Some(vec![name.clone()]), Vec::new()),
            Expr::Path {
                segments,
                type_args,
                ..
            } => (Some(segments.clone()), type_args.clone()),
            _ => (None, Vec::new()),
        };

        if let Some(segments) = &segments {
            // 1. Primitive static methods: I32::default, F64::from(x)
            if segments.len() == 2 {
                if let Some(primitive) = Primitive::parse(&segments[0]) {
                    return intrinsics::lower_primitive_static(
                        self, primitive, &segments[1], args, location, ctx,
                    );
                }
            }

            // 2. Enum constructor
            if let Some((def, index)) = self.find_enum_variant(segments) {
                return self.construct_enum_with_args(
                    &def, index, args, location, ctx, expected,
                );
            }

            if segments.len() == 1 {
                let name = segments[0].as_str();

                // 3. Builtin intrinsics
                if let Some(result) =
                    intrinsics::lower_intrinsic(self, name, args, location, ctx)?
                {
                    return Ok(result);
                }

                // 4. Builtin families
                if let Some(result) =
                    intrinsics::lower_builtin_family(self, name, args, location, ctx)?
                {
                    return Ok(result);
                }

                // 5. Indirect call through a local
                if ctx.locals.contains_key(name) {
                    return self.lower_indirect_call(name, args, location, ctx);
                }
            }

            let qualified = segments.join("::");

            // 6. Generic free function / 8. generic static methods
            if let Some(sig) = self.env.functions.get(&qualified).cloned() {
                if sig.is_generic() {
                    return self.lower_generic_call(
                        &qualified,
                        &sig,
                        &explicit_type_args,
                        args,
                        location,
                        ctx,
                        expected,
                    );
                }
                // 7/9. Direct non-generic call
                return self.lower_direct_call(&qualified, &sig, args, location, ctx);
            }

            // 7. Class constructor `Type::new` without an explicit decl
            if segments.len() == 2 && segments[1] == "new" {
                if let Some(def) = self.env.classes.get(&segments[0]).cloned() {
                    return self.lower_class_alloc(&def, args, location, ctx);
                }
            }

            // 9. Registry search, then a forward reference
            if let Some((_, sig)) = self.registry.find_function(&qualified) {
                return self.lower_direct_call(&qualified, &sig, args, location, ctx);
            }
            let mangled = mangle_function(&qualified, &[], self.options.suite_prefix.as_deref());
            let mut lowered = Vec::new();
            for arg in args {
                lowered.push(self.lower_expr(arg, ctx, None)?);
            }
            let params = lowered
                .iter()
                .map(|value| llvm_type(&value.value_type, self.env))
                .collect::<Vec<_>>()
                .join(", ");
            self.declares
                .insert(format!("declare i32 @{mangled}({params})"));
            let arg_list = lowered
                .iter()
                .map(|value| {
                    format!("{} {}", llvm_type(&value.value_type, self.env), value.operand)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let result = ctx.fresh_reg();
            let dbg = self.dbg_suffix(location);
            ctx.push(format!("  {result} = call i32 @{mangled}({arg_list}){dbg}"));
            return Ok(Value::new(result, Type::primitive(Primitive::I32)));
        }

        // Callee is a computed expression: evaluate and call indirectly
        let callee_value = self.lower_expr(callee, ctx, None)?;
        self.lower_indirect_value_call(callee_value, args, location, ctx)
    }

    fn find_enum_variant(
        &self,
        segments: &[String],
    ) -> Option<(crate::compiler::types::environment::EnumDef, usize)> {
        if segments.len() == 2 {
            let def = self.env.enums.get(&segments[0])?.clone();
            let index = def.variant_index(&segments[1])?;
            return Some((def, index));
        }
        if segments.len() == 1
            && segments[0]
                .chars()
                .next()
                .map(char::is_uppercase)
                .unwrap_or(false)
        {
            for def in self.env.enums.values() {
                if let Some(index) = def.variant_index(&segments[0]) {
                    return Some((def.clone(), index));
                }
            }
        }
        None
    }

    fn construct_enum_with_args(
        &mut self,
        def: &crate::compiler::types::environment::EnumDef,
        index: usize,
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        let (_, payload_types) = def.variants[index].clone();

        // Infer enum type args from payload values, then expected context
        let mut subs = Substitutions::new();
        if let Some(expected) = expected {
            if let Type::Named { name, type_args } = expected.as_ref() {
                if *name == def.name {
                    for (param, arg) in def.type_params.iter().zip(type_args) {
                        subs.bind(param, arg.clone());
                    }
                }
            }
        }

        let mut lowered = Vec::new();
        for (arg, payload_type) in args.iter().zip(&payload_types) {
            let hint = ctx.apply_subs(&payload_type.substitute(subs.as_slice()));
            let value = self.lower_expr(arg, ctx, Some(&hint))?;
            unify(payload_type, &value.value_type, &def.type_params, &mut subs);
            lowered.push(value);
        }

        let resolved_args: Vec<TypeRef> = def
            .type_params
            .iter()
            .map(|param| {
                subs.get(param)
                    .cloned()
                    .map(|bound| ctx.apply_subs(&bound))
                    .unwrap_or_else(|| Type::primitive(Primitive::I64))
            })
            .collect();

        self.construct_enum_lowered(def, index, lowered, resolved_args, location, ctx)
    }

    fn construct_enum(
        &mut self,
        def: &crate::compiler::types::environment::EnumDef,
        index: usize,
        args: &[Value],
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        let resolved_args: Vec<TypeRef> = match expected.map(|expected| expected.as_ref()) {
            Some(Type::Named { name, type_args }) if *name == def.name => type_args.clone(),
            _ => def
                .type_params
                .iter()
                .map(|_| Type::primitive(Primitive::I64))
                .collect(),
        };
        self.construct_enum_lowered(def, index, args.to_vec(), resolved_args, location, ctx)
    }

    /// Tag store plus per-field payload stores through a stack slot.
    fn construct_enum_lowered(
        &mut self,
        def: &crate::compiler::types::environment::EnumDef,
        index: usize,
        payload: Vec<Value>,
        resolved_args: Vec<TypeRef>,
        _location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let enum_type = Type::named(def.name.clone(), resolved_args);
        self.ensure_aggregate(&enum_type);
        let enum_llvm = llvm_type(&enum_type, self.env);

        let slot = ctx.fresh_reg();
        ctx.push(format!("  {slot} = alloca {enum_llvm}"));
        let tag_ptr = ctx.fresh_reg();
        ctx.push(format!(
            "  {tag_ptr} = getelementptr {enum_llvm}, ptr {slot}, i32 0, i32 0"
        ));
        // Tag is the declaration-order index
        ctx.push(format!("  store i32 {index}, ptr {tag_ptr}"));

        if !payload.is_empty() {
            let payload_ptr = ctx.fresh_reg();
            ctx.push(format!(
                "  {payload_ptr} = getelementptr {enum_llvm}, ptr {slot}, i32 0, i32 1"
            ));
            let mut offset_reg = payload_ptr;
            for (field_index, value) in payload.iter().enumerate() {
                let field_llvm = llvm_type(&value.value_type, self.env);
                if field_index == 0 {
                    ctx.push(format!(
                        "  store {field_llvm} {}, ptr {offset_reg}",
                        value.operand
                    ));
                } else {
                    let advanced = ctx.fresh_reg();
                    ctx.push(format!(
                        "  {advanced} = getelementptr i8, ptr {offset_reg}, i64 {}",
                        crate::compiler::codegen::types::size_of(
                            &payload[field_index - 1].value_type,
                            self.env
                        )
                    ));
                    ctx.push(format!(
                        "  store {field_llvm} {}, ptr {advanced}",
                        value.operand
                    ));
                    offset_reg = advanced;
                }
            }
        }

        let loaded = ctx.fresh_reg();
        ctx.push(format!("  {loaded} = load {enum_llvm}, ptr {slot}"));
        Ok(Value::new(loaded, enum_type))
    }

    fn lower_indirect_call(
        &mut self,
        name: &str,
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let slot = ctx.locals.get(name).cloned().ok_or_else(|| {
            CompileError::new(
                format!("Unknown callee '{name}'"),
                location.to_error_location(self.sources),
                ErrorCode::C003,
            )
        })?;
        let resolved = self.resolve(&slot.value_type, &ctx.subs);
        let llvm = llvm_type(&resolved, self.env);
        let loaded = ctx.fresh_reg();
        ctx.push(format!("  {loaded} = load {llvm}, ptr {}", slot.ptr));
        self.lower_indirect_value_call(Value::new(loaded, resolved), args, location, ctx)
    }

    pub(crate) fn lower_indirect_value_call(
        &mut self,
        callee: Value,
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        match callee.value_type.clone().as_ref() {
            Type::Function {
                params,
                return_type,
                ..
            } => {
                let mut arg_texts = Vec::new();
                for (arg, param_type) in args.iter().zip(params) {
                    let resolved = ctx.apply_subs(param_type);
                    let value = self.lower_expr(arg, ctx, Some(&resolved))?;
                    arg_texts.push(format!(
                        "{} {}",
                        llvm_type(&value.value_type, self.env),
                        value.operand
                    ));
                }
                let return_llvm = if return_type.is_unit() {
                    "void".to_string()
                } else {
                    llvm_type(return_type, self.env)
                };
                let dbg = self.dbg_suffix(location);
                if return_type.is_unit() {
                    ctx.push(format!(
                        "  call {return_llvm} {}({}){dbg}",
                        callee.operand,
                        arg_texts.join(", ")
                    ));
                    Ok(Value::unit())
                } else {
                    let result = ctx.fresh_reg();
                    ctx.push(format!(
                        "  {result} = call {return_llvm} {}({}){dbg}",
                        callee.operand,
                        arg_texts.join(", ")
                    ));
                    Ok(Value::new(result, return_type.clone()))
                }
            }
            Type::Closure {
                params,
                return_type,
                ..
            } => {
                // Fat pointer: extract fn_ptr and env_ptr; env_ptr prepends
                // to the user argument list
                let fn_ptr = ctx.fresh_reg();
                ctx.push(format!(
                    "  {fn_ptr} = extractvalue {{ ptr, ptr }} {}, 0",
                    callee.operand
                ));
                let env_ptr = ctx.fresh_reg();
                ctx.push(format!(
                    "  {env_ptr} = extractvalue {{ ptr, ptr }} {}, 1",
                    callee.operand
                ));
                let mut arg_texts = vec![format!("ptr {env_ptr}")];
                for (arg, param_type) in args.iter().zip(params) {
                    let resolved = ctx.apply_subs(param_type);
                    let value = self.lower_expr(arg, ctx, Some(&resolved))?;
                    arg_texts.push(format!(
                        "{} {}",
                        llvm_type(&value.value_type, self.env),
                        value.operand
                    ));
                }
                let return_llvm = if return_type.is_unit() {
                    "void".to_string()
                } else {
                    llvm_type(return_type, self.env)
                };
                let dbg = self.dbg_suffix(location);
                if return_type.is_unit() {
                    ctx.push(format!(
                        "  call {return_llvm} {fn_ptr}({}){dbg}",
                        arg_texts.join(", ")
                    ));
                    Ok(Value::unit())
                } else {
                    let result = ctx.fresh_reg();
                    ctx.push(format!(
                        "  {result} = call {return_llvm} {fn_ptr}({}){dbg}",
                        arg_texts.join(", ")
                    ));
                    Ok(Value::new(result, return_type.clone()))
                }
            }
            other => Err(CompileError::new(
                format!("Cannot call a value of type {other:?}"),
                location.to_error_location(self.sources),
                ErrorCode::C001,
            )),
        }
    }

    pub(crate) fn lower_direct_call(
        &mut self,
        qualified: &str,
        sig: &FunctionSig,
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let mangled = match &sig.extern_name {
            Some(link_name) => link_name.clone(),
            None if sig.extern_abi.is_some() => sig.name.clone(),
            None => mangle_function(qualified, &[], self.options.suite_prefix.as_deref()),
        };

        // Hot-path helpers expand inline instead of a plain call
        if intrinsics::is_hot_path_symbol(&mangled) {
            return intrinsics::lower_hot_path(self, &mangled, sig, args, location, ctx);
        }

        self.declare_sig(&mangled, sig, &[]);

        let mut arg_texts = Vec::new();
        for (arg, (_, param_type)) in args.iter().zip(&sig.params) {
            let resolved = ctx.apply_subs(param_type);
            let value = self.lower_expr(arg, ctx, Some(&resolved))?;
            arg_texts.push(format!(
                "{} {}",
                llvm_type(&value.value_type, self.env),
                value.operand
            ));
        }

        let return_type = ctx.apply_subs(&sig.return_type);
        let dbg = self.dbg_suffix(location);
        if return_type.is_unit() || return_type.is_never() {
            ctx.push(format!(
                "  call void @{mangled}({}){dbg}",
                arg_texts.join(", ")
            ));
            Ok(Value::unit())
        } else {
            let return_llvm = llvm_type(&return_type, self.env);
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call {return_llvm} @{mangled}({}){dbg}",
                arg_texts.join(", ")
            ));
            Ok(Value::new(result, return_type))
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn lower_generic_call(
        &mut self,
        qualified: &str,
        sig: &FunctionSig,
        explicit_type_args: &[TypeExpr],
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        // Explicit `path[T, U](args)` type args take priority
        let mut subs = Substitutions::new();
        for (param, arg) in sig.type_params.iter().zip(explicit_type_args) {
            subs.bind(param, self.resolve(&lower_type_expr(arg), &ctx.subs));
        }

        // Unify parameter patterns with argument types
        let mut lowered = Vec::new();
        for (arg, (_, param_type)) in args.iter().zip(&sig.params) {
            let hint = ctx.apply_subs(&param_type.substitute(subs.as_slice()));
            let value = self.lower_expr(arg, ctx, Some(&hint))?;
            unify(param_type, &value.value_type, &sig.type_params, &mut subs);
            lowered.push(value);
        }

        if subs.ordered(&sig.type_params).is_none() {
            if let Some(expected) = expected {
                unify(&sig.return_type, expected, &sig.type_params, &mut subs);
            }
        }

        let Some(type_args) = subs.ordered(&sig.type_params) else {
            return Err(CompileError::new(
                format!("Cannot infer type arguments for '{qualified}'"),
                location.to_error_location(self.sources),
                ErrorCode::C002,
            ));
        };
        let type_args: Vec<TypeRef> = type_args
            .iter()
            .map(|arg| ctx.apply_subs(arg))
            .collect();

        let mangled = mangle_function(
            qualified,
            &type_args,
            self.options.suite_prefix.as_deref(),
        );
        // Queue the instantiation; the drain loop emits it exactly once
        self.mono
            .request(qualified, type_args.clone(), mangled.clone());

        let final_subs: Vec<(String, TypeRef)> = sig
            .type_params
            .iter()
            .cloned()
            .zip(type_args.iter().cloned())
            .collect();

        let arg_texts = lowered
            .iter()
            .map(|value| {
                format!("{} {}", llvm_type(&value.value_type, self.env), value.operand)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let return_type = ctx.apply_subs(&sig.return_type.substitute(&final_subs));
        let dbg = self.dbg_suffix(location);
        if return_type.is_unit() || return_type.is_never() {
            ctx.push(format!("  call void @{mangled}({arg_texts}){dbg}"));
            Ok(Value::unit())
        } else {
            self.ensure_aggregate(&return_type);
            let return_llvm = llvm_type(&return_type, self.env);
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call {return_llvm} @{mangled}({arg_texts}){dbg}"
            ));
            Ok(Value::new(result, return_type))
        }
    }

    /// Reference-class allocation: heap cell, vtable store, field stores by
    /// constructor-argument order.
    fn lower_class_alloc(
        &mut self,
        def: &crate::compiler::types::environment::ClassDef,
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        self.declares
            .insert("declare ptr @tml_rt_alloc(i64)".to_string());
        self.ensure_class_aggregate(&def.name, def);

        let size: u64 = 8 + def
            .fields
            .iter()
            .map(|(_, field_type, _)| {
                crate::compiler::codegen::types::size_of(field_type, self.env)
            })
            .sum::<u64>();
        let object = ctx.fresh_reg();
        let dbg = self.dbg_suffix(location);
        ctx.push(format!(
            "  {object} = call ptr @tml_rt_alloc(i64 {size}){dbg}"
        ));

        for (index, ((_, field_type, _), arg)) in def.fields.iter().zip(args).enumerate() {
            let value = self.lower_expr(arg, ctx, Some(field_type))?;
            let offset = if def.is_value { index } else { index + 1 };
            let gep = ctx.fresh_reg();
            ctx.push(format!(
                "  {gep} = getelementptr %class.{}, ptr {object}, i32 0, i32 {offset}",
                def.name
            ));
            let field_llvm = llvm_type(field_type, self.env);
            ctx.push(format!("  store {field_llvm} {}, ptr {gep}", value.operand));
        }

        Ok(Value::new(object, Type::named(def.name.clone(), vec![])))
    }

    // ---------------------------------
    //          when lowering
    // ---------------------------------

    /// `when` over an enum lowers to a switch on the tag; each arm block
    /// reads its payload fields out of the scrutinee slot.
    pub(crate) fn lower_when(
        &mut self,
        scrutinee: &Expr,
        arms: &[WhenArm],
        location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        let value = self.lower_expr(scrutinee, ctx, None)?;
        let resolved = self.resolve(&value.value_type, &ctx.subs);

        let Type::Named { name, type_args } = resolved.as_ref() else {
            return self.lower_when_open(value, arms, location, ctx, expected);
        };
        let Some(def) = self.env.enums.get(name).cloned() else {
            return self.lower_when_open(value, arms, location, ctx, expected);
        };

        let enum_subs: Vec<(String, TypeRef)> = def
            .type_params
            .iter()
            .cloned()
            .zip(type_args.iter().cloned())
            .collect();

        self.ensure_aggregate(&resolved);
        let enum_llvm = llvm_type(&resolved, self.env);
        let slot = ctx.fresh_reg();
        ctx.push(format!("  {slot} = alloca {enum_llvm}"));
        ctx.push(format!("  store {enum_llvm} {}, ptr {slot}", value.operand));
        let tag_ptr = ctx.fresh_reg();
        ctx.push(format!(
            "  {tag_ptr} = getelementptr {enum_llvm}, ptr {slot}, i32 0, i32 0"
        ));
        let tag = ctx.fresh_reg();
        ctx.push(format!("  {tag} = load i32, ptr {tag_ptr}"));

        let result_type = expected.cloned().unwrap_or_else(Type::unit);
        let has_result = !result_type.is_unit();
        let result_slot = if has_result {
            let result_slot = ctx.fresh_reg();
            let result_llvm = llvm_type(&result_type, self.env);
            ctx.push(format!("  {result_slot} = alloca {result_llvm}"));
            Some(result_slot)
        } else {
            None
        };

        let default_label = ctx.fresh_label("when.default");
        let end_label = ctx.fresh_label("when.end");

        // Arm labels keyed by variant tag
        let mut cases: Vec<(usize, String, &WhenArm)> = Vec::new();
        let mut default_arm: Option<&WhenArm> = None;
        for arm in arms {
            match &arm.pattern {
                Pattern::EnumVariant { variant, .. } => {
                    if let Some(index) = def.variant_index(variant) {
                        let label = ctx.fresh_label("when.arm");
                        cases.push((index, label, arm));
                    }
                }
                Pattern::Wildcard(_) | Pattern::Binding { .. } => {
                    if default_arm.is_none() {
                        default_arm = Some(arm);
                    }
                }
                _ => {}
            }
        }

        let dbg = self.dbg_suffix(location);
        let mut switch_line = format!("  switch i32 {tag}, label %{default_label} [");
        for (index, label, _) in &cases {
            switch_line.push_str(&format!(" i32 {index}, label %{label}"));
        }
        switch_line.push_str(&format!(" ]{dbg}"));
        ctx.push(switch_line);

        for (index, label, arm) in &cases {
            ctx.push(format!("{label}:"));
            // Bind payload patterns from the payload area
            if let Pattern::EnumVariant { payload, .. } = &arm.pattern {
                let (_, payload_types) = &def.variants[*index];
                let payload_ptr = ctx.fresh_reg();
                ctx.push(format!(
                    "  {payload_ptr} = getelementptr {enum_llvm}, ptr {slot}, i32 0, i32 1"
                ));
                let mut offset: u64 = 0;
                for (pattern, payload_type) in payload.iter().zip(payload_types) {
                    let field_type = ctx.apply_subs(&payload_type.substitute(&enum_subs));
                    let field_llvm = llvm_type(&field_type, self.env);
                    let field_ptr = if offset == 0 {
                        payload_ptr.clone()
                    } else {
                        let advanced = ctx.fresh_reg();
                        ctx.push(format!(
                            "  {advanced} = getelementptr i8, ptr {payload_ptr}, i64 {offset}"
                        ));
                        advanced
                    };
                    if let Pattern::Binding {
                        name: binding_name, ..
                    } = pattern
                    {
                        let local_slot = ctx.fresh_reg();
                        ctx.push(format!("  {local_slot} = alloca {field_llvm}"));
                        let loaded = ctx.fresh_reg();
                        ctx.push(format!("  {loaded} = load {field_llvm}, ptr {field_ptr}"));
                        ctx.push(format!("  store {field_llvm} {loaded}, ptr {local_slot}"));
                        ctx.locals.insert(
                            binding_name.clone(),
                            crate::compiler::codegen::LocalSlot {
                                ptr: local_slot,
                                value_type: field_type.clone(),
                            },
                        );
                    }
                    offset += crate::compiler::codegen::types::size_of(&field_type, self.env);
                }
            }
            let arm_value = self.lower_expr(&arm.body, ctx, Some(&result_type))?;
            if let Some(result_slot) = &result_slot {
                let result_llvm = llvm_type(&result_type, self.env);
                ctx.push(format!(
                    "  store {result_llvm} {}, ptr {result_slot}",
                    arm_value.operand
                ));
            }
            ctx.push(format!("  br label %{end_label}"));
        }

        ctx.push(format!("{default_label}:"));
        if let Some(arm) = default_arm {
            if let Pattern::Binding { name, .. } = &arm.pattern {
                // The catch-all binding sees the whole scrutinee
                ctx.locals.insert(
                    name.clone(),
                    crate::compiler::codegen::LocalSlot {
                        ptr: slot.clone(),
                        value_type: resolved.clone(),
                    },
                );
            }
            let arm_value = self.lower_expr(&arm.body, ctx, Some(&result_type))?;
            if let Some(result_slot) = &result_slot {
                let result_llvm = llvm_type(&result_type, self.env);
                ctx.push(format!(
                    "  store {result_llvm} {}, ptr {result_slot}",
                    arm_value.operand
                ));
            }
            ctx.push(format!("  br label %{end_label}"));
        } else {
            ctx.push("  unreachable");
        }

        ctx.push(format!("{end_label}:"));
        match result_slot {
            Some(result_slot) => {
                let result_llvm = llvm_type(&result_type, self.env);
                let result = ctx.fresh_reg();
                ctx.push(format!("  {result} = load {result_llvm}, ptr {result_slot}"));
                Ok(Value::new(result, result_type))
            }
            None => Ok(Value::unit()),
        }
    }

    /// `when` over a non-enum scrutinee lowers to an equality chain.
    fn lower_when_open(
        &mut self,
        scrutinee: Value,
        arms: &[WhenArm],
        _location: &TextLocation,
        ctx: &mut Ctx,
        expected: Option<&TypeRef>,
    ) -> Result<Value, CompileError> {
        let result_type = expected.cloned().unwrap_or_else(Type::unit);
        let has_result = !result_type.is_unit();
        let result_slot = if has_result {
            let result_slot = ctx.fresh_reg();
            let result_llvm = llvm_type(&result_type, self.env);
            ctx.push(format!("  {result_slot} = alloca {result_llvm}"));
            Some(result_slot)
        } else {
            None
        };
        let end_label = ctx.fresh_label("when.end");
        let scrutinee_llvm = llvm_type(&scrutinee.value_type, self.env);

        for arm in arms {
            let next_label = ctx.fresh_label("when.next");
            match &arm.pattern {
                Pattern::Literal(literal, _) => {
                    let pattern_value =
                        self.lower_literal(literal, Some(&scrutinee.value_type));
                    let cmp = ctx.fresh_reg();
                    let is_float = scrutinee
                        .value_type
                        .as_primitive()
                        .map(|primitive| primitive.is_float())
                        .unwrap_or(false);
                    if is_float {
                        ctx.push(format!(
                            "  {cmp} = fcmp oeq {scrutinee_llvm} {}, {}",
                            scrutinee.operand, pattern_value.operand
                        ));
                    } else {
                        ctx.push(format!(
                            "  {cmp} = icmp eq {scrutinee_llvm} {}, {}",
                            scrutinee.operand, pattern_value.operand
                        ));
                    }
                    let body_label = ctx.fresh_label("when.body");
                    ctx.push(format!(
                        "  br i1 {cmp}, label %{body_label}, label %{next_label}"
                    ));
                    ctx.push(format!("{body_label}:"));
                    let arm_value = self.lower_expr(&arm.body, ctx, Some(&result_type))?;
                    if let Some(result_slot) = &result_slot {
                        let result_llvm = llvm_type(&result_type, self.env);
                        ctx.push(format!(
                            "  store {result_llvm} {}, ptr {result_slot}",
                            arm_value.operand
                        ));
                    }
                    ctx.push(format!("  br label %{end_label}"));
                }
                Pattern::Wildcard(_) | Pattern::Binding { .. } => {
                    if let Pattern::Binding { name, .. } = &arm.pattern {
                        let slot = ctx.fresh_reg();
                        ctx.push(format!("  {slot} = alloca {scrutinee_llvm}"));
                        ctx.push(format!(
                            "  store {scrutinee_llvm} {}, ptr {slot}",
                            scrutinee.operand
                        ));
                        ctx.locals.insert(
                            name.clone(),
                            crate::compiler::codegen::LocalSlot {
                                ptr: slot,
                                value_type: scrutinee.value_type.clone(),
                            },
                        );
                    }
                    let arm_value = self.lower_expr(&arm.body, ctx, Some(&result_type))?;
                    if let Some(result_slot) = &result_slot {
                        let result_llvm = llvm_type(&result_type, self.env);
                        ctx.push(format!(
                            "  store {result_llvm} {}, ptr {result_slot}",
                            arm_value.operand
                        ));
                    }
                    ctx.push(format!("  br label %{end_label}"));
                    ctx.push(format!("{next_label}:"));
                    break;
                }
                other => {
                    return Err(CompileError::new(
                        "Unsupported pattern in when over a non-enum value",
                        other.location().to_error_location(self.sources),
                        ErrorCode::C001,
                    ));
                }
            }
            ctx.push(format!("{next_label}:"));
        }

        ctx.push(format!("  br label %{end_label}"));
        ctx.push(format!("{end_label}:"));
        match result_slot {
            Some(result_slot) => {
                let result_llvm = llvm_type(&result_type, self.env);
                let result = ctx.fresh_reg();
                ctx.push(format!("  {result} = load {result_llvm}, ptr {result_slot}"));
                Ok(Value::new(result, result_type))
            }
            None => Ok(Value::unit()),
        }
    }

    /// Enum payload size helper exposed for tests.
    pub fn enum_payload_size(&self, def: &crate::compiler::types::environment::EnumDef) -> u64 {
        enum_payload_size_with(def, &[], self.env)
    }
}
