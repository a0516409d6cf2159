//! Method-call dispatch.
//!
//! Resolution order:
//! 1. primitive intrinsic methods (`duplicate`, `to_owned`, `to_string`, …),
//!    including receivers that became primitive via type-parameter
//!    substitution
//! 2. struct/class/enum method on a concrete type - direct call with `this`
//!    first
//! 3. behavior method on a `dyn` receiver - indirect call through the
//!    v-table slot
//! 4. bounded-generic dispatch: substitute the parameter with the concrete
//!    type from the active substitutions and resolve statically; primitives
//!    re-route to (1)
//! 5. `call`/`call_mut`/`call_once` on function and closure receivers
//! 6. fat-pointer literal fallback, treated as a closure call

use crate::compiler::codegen::intrinsics;
use crate::compiler::codegen::mangle::mangle_function;
use crate::compiler::codegen::types::llvm_type;
use crate::compiler::codegen::{Ctx, LlvmGenerator, Value};
use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::parser::ast_nodes::{Expr, TypeExpr};
use crate::compiler::source::TextLocation;
use crate::compiler::types::{lower_type_expr, FunctionSig, Type, TypeRef};

impl<'a> LlvmGenerator<'a> {
    pub(crate) fn lower_method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        type_args: &[TypeExpr],
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let receiver_value = self.lower_expr(receiver, ctx, None)?;
        let resolved = self.resolve(&receiver_value.value_type, &ctx.subs);
        let through_ref = match resolved.as_ref() {
            Type::Reference { target, .. } => self.resolve(target, &ctx.subs),
            _ => resolved.clone(),
        };

        // 1. Primitive intrinsic methods - receivers that substituted down
        // to a primitive land here too
        if let Some(primitive) = through_ref.as_primitive() {
            if let Some(result) = intrinsics::lower_primitive_method(
                self,
                primitive,
                &receiver_value,
                method,
                args,
                location,
                ctx,
            )? {
                return Ok(result);
            }
        }

        // 2. Concrete-type method
        if let Type::Named { name, type_args: receiver_args } = through_ref.as_ref() {
            let qualified = format!("{name}::{method}");
            let sig = self
                .env
                .functions
                .get(&qualified)
                .cloned()
                .or_else(|| self.registry.find_function(&qualified).map(|(_, sig)| sig));
            if let Some(sig) = sig {
                return self.lower_concrete_method(
                    &qualified,
                    &sig,
                    name,
                    receiver_args,
                    receiver_value,
                    type_args,
                    args,
                    location,
                    ctx,
                );
            }
        }

        // 3. Behavior method on dyn receiver: v-table slot load + indirect call
        if let Type::DynBehavior { behavior, .. } = through_ref.as_ref() {
            return self.lower_dyn_method(
                behavior,
                &through_ref,
                receiver_value,
                method,
                args,
                location,
                ctx,
            );
        }

        // 5/6. Fn-behavior methods and the fat-pointer fallback
        if matches!(method, "call" | "call_mut" | "call_once")
            || matches!(through_ref.as_ref(), Type::Closure { .. })
        {
            match through_ref.as_ref() {
                Type::Function { .. } | Type::Closure { .. } => {
                    return self.lower_indirect_value_call(
                        Value::new(receiver_value.operand, through_ref.clone()),
                        args,
                        location,
                        ctx,
                    );
                }
                _ => {}
            }
        }

        Err(CompileError::new(
            format!(
                "No method '{method}' on {} during lowering",
                receiver_value.value_type
            ),
            location.to_error_location(self.sources),
            ErrorCode::C003,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_concrete_method(
        &mut self,
        qualified: &str,
        sig: &FunctionSig,
        type_name: &str,
        receiver_args: &[TypeRef],
        receiver_value: Value,
        explicit_type_args: &[TypeExpr],
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        // Receiver type args bind the container's type parameters; explicit
        // method args bind the rest
        let container_params = self.container_type_params(type_name);
        let mut subs: Vec<(String, TypeRef)> = container_params
            .iter()
            .cloned()
            .zip(receiver_args.iter().cloned())
            .collect();
        subs.push(("Self".to_string(), Type::named(type_name, receiver_args.to_vec())));

        let method_own_params: Vec<String> = sig
            .type_params
            .iter()
            .filter(|param| !container_params.contains(param))
            .cloned()
            .collect();
        for (param, arg) in method_own_params.iter().zip(explicit_type_args) {
            subs.push((
                param.clone(),
                self.resolve(&lower_type_expr(arg), &ctx.subs),
            ));
        }

        let type_args: Vec<TypeRef> = sig
            .type_params
            .iter()
            .filter_map(|param| {
                subs.iter()
                    .find(|(name, _)| name == param)
                    .map(|(_, bound)| ctx.apply_subs(bound))
            })
            .collect();

        let mangled = if sig.is_generic() && !type_args.is_empty() {
            let mangled = mangle_function(
                qualified,
                &type_args,
                self.options.suite_prefix.as_deref(),
            );
            // Impl method instantiations queue when first referenced
            self.mono.request(qualified, type_args.clone(), mangled.clone());
            mangled
        } else {
            mangle_function(qualified, &[], self.options.suite_prefix.as_deref())
        };

        // Hot-path helpers expand inline; the receiver spills to a stack
        // slot so the expansion can address its fields
        if intrinsics::is_hot_path_symbol(&mangled) {
            let receiver_ptr = match receiver_value.value_type.as_ref() {
                Type::Reference { .. } | Type::Pointer { .. } => receiver_value.operand.clone(),
                _ => {
                    let receiver_llvm = llvm_type(&receiver_value.value_type, self.env);
                    let slot = ctx.fresh_reg();
                    ctx.push(format!("  {slot} = alloca {receiver_llvm}"));
                    ctx.push(format!(
                        "  store {receiver_llvm} {}, ptr {slot}",
                        receiver_value.operand
                    ));
                    slot
                }
            };
            return intrinsics::lower_hot_path_method(
                self,
                &mangled,
                sig,
                receiver_ptr,
                args,
                location,
                ctx,
            );
        }

        if !sig.is_generic() && !self.mono.is_known(&mangled) {
            self.declare_sig(&mangled, sig, &subs);
        }

        // `this` goes first, shaped to the receiver parameter: a `&self`
        // method takes a pointer (values spill to a stack slot), a by-value
        // method takes the loaded aggregate
        let self_param = sig
            .params
            .iter()
            .find(|(param_name, _)| param_name == "self")
            .map(|(_, self_type)| self_type.clone());
        let mut arg_texts: Vec<String> = Vec::new();
        if let Some(self_type) = self_param {
            let wants_pointer = matches!(
                self_type.as_ref(),
                Type::Reference { .. } | Type::Pointer { .. }
            );
            let has_pointer = matches!(
                receiver_value.value_type.as_ref(),
                Type::Reference { .. } | Type::Pointer { .. }
            );
            let receiver_text = if wants_pointer && !has_pointer {
                let receiver_llvm = llvm_type(&receiver_value.value_type, self.env);
                let slot = ctx.fresh_reg();
                ctx.push(format!("  {slot} = alloca {receiver_llvm}"));
                ctx.push(format!(
                    "  store {receiver_llvm} {}, ptr {slot}",
                    receiver_value.operand
                ));
                format!("ptr {slot}")
            } else if !wants_pointer && has_pointer {
                let pointee = match receiver_value.value_type.as_ref() {
                    Type::Reference { target, .. } | Type::Pointer { target, .. } => {
                        target.clone()
                    }
                    _ => receiver_value.value_type.clone(),
                };
                let pointee_llvm = llvm_type(&pointee, self.env);
                let loaded = ctx.fresh_reg();
                ctx.push(format!(
                    "  {loaded} = load {pointee_llvm}, ptr {}",
                    receiver_value.operand
                ));
                format!("{pointee_llvm} {loaded}")
            } else {
                format!(
                    "{} {}",
                    llvm_type(&receiver_value.value_type, self.env),
                    receiver_value.operand
                )
            };
            arg_texts.push(receiver_text);
        }
        let value_params: Vec<&(String, TypeRef)> = sig
            .params
            .iter()
            .filter(|(name, _)| name != "self")
            .collect();
        for (arg, (_, param_type)) in args.iter().zip(value_params) {
            let hint = ctx.apply_subs(&param_type.substitute(&subs));
            let value = self.lower_expr(arg, ctx, Some(&hint))?;
            arg_texts.push(format!(
                "{} {}",
                llvm_type(&value.value_type, self.env),
                value.operand
            ));
        }

        let return_type = ctx.apply_subs(&sig.return_type.substitute(&subs));
        let dbg = self.dbg_suffix(location);
        if return_type.is_unit() || return_type.is_never() {
            ctx.push(format!(
                "  call void @{mangled}({}){dbg}",
                arg_texts.join(", ")
            ));
            Ok(Value::unit())
        } else {
            self.ensure_aggregate(&return_type);
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
    fn lower_dyn_method(
        &mut self,
        behavior: &str,
        receiver_type: &TypeRef,
        receiver_value: Value,
        method: &str,
        args: &[Expr],
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let def = self.env.behaviors.get(behavior).cloned().ok_or_else(|| {
            CompileError::new(
                format!("Unknown behavior '{behavior}' during lowering"),
                location.to_error_location(self.sources),
                ErrorCode::C003,
            )
        })?;
        let slot_index = def
            .methods
            .iter()
            .position(|candidate| candidate.name == method)
            .ok_or_else(|| {
                CompileError::new(
                    format!("'dyn {behavior}' has no method '{method}'"),
                    location.to_error_location(self.sources),
                    ErrorCode::C003,
                )
            })?;
        let sig = def.methods[slot_index].clone();

        // Fat pointer: { data_ptr, vtable_ptr }
        let data_ptr = ctx.fresh_reg();
        ctx.push(format!(
            "  {data_ptr} = extractvalue {{ ptr, ptr }} {}, 0",
            receiver_value.operand
        ));
        let vtable_ptr = ctx.fresh_reg();
        ctx.push(format!(
            "  {vtable_ptr} = extractvalue {{ ptr, ptr }} {}, 1",
            receiver_value.operand
        ));
        // Fixed-offset load from the v-table
        let slot_ptr = ctx.fresh_reg();
        ctx.push(format!(
            "  {slot_ptr} = getelementptr ptr, ptr {vtable_ptr}, i64 {slot_index}"
        ));
        let fn_ptr = ctx.fresh_reg();
        ctx.push(format!("  {fn_ptr} = load ptr, ptr {slot_ptr}"));

        let mut arg_texts = vec![format!("ptr {data_ptr}")];
        let value_params: Vec<&(String, TypeRef)> = sig
            .params
            .iter()
            .filter(|(name, _)| name != "self")
            .collect();
        for (arg, (_, param_type)) in args.iter().zip(value_params) {
            let hint = ctx.apply_subs(param_type);
            let value = self.lower_expr(arg, ctx, Some(&hint))?;
            arg_texts.push(format!(
                "{} {}",
                llvm_type(&value.value_type, self.env),
                value.operand
            ));
        }

        let return_type = ctx.apply_subs(
            &sig.return_type
                .substitute(&[("Self".to_string(), receiver_type.clone())]),
        );
        let dbg = self.dbg_suffix(location);
        if return_type.is_unit() || return_type.is_never() {
            ctx.push(format!("  call void {fn_ptr}({}){dbg}", arg_texts.join(", ")));
            Ok(Value::unit())
        } else {
            let return_llvm = llvm_type(&return_type, self.env);
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call {return_llvm} {fn_ptr}({}){dbg}",
                arg_texts.join(", ")
            ));
            Ok(Value::new(result, return_type))
        }
    }

    pub(crate) fn container_type_params(&self, type_name: &str) -> Vec<String> {
        if let Some(def) = self.env.structs.get(type_name) {
            return def.type_params.clone();
        }
        if let Some(def) = self.env.enums.get(type_name) {
            return def.type_params.clone();
        }
        if let Some(def) = self.env.classes.get(type_name) {
            return def.type_params.clone();
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::codegen::tests::emit;

    #[test]
    fn concrete_method_calls_pass_this_first() {
        let (ir, errors) = emit(
            "struct Point {\n    pub x: F64\n    pub y: F64\n}\nimpl Point {\n    func magnitude(&self) -> F64 {\n        return self.x * self.x + self.y * self.y\n    }\n}\nfunc main() -> I32 {\n    let p = Point { x: 3.0, y: 4.0 }\n    let m = p.magnitude()\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("define double @tml_Point_magnitude"));
        assert!(ir.contains("call double @tml_Point_magnitude"));
    }

    #[test]
    fn primitive_intrinsic_methods_lower_inline() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let n = 41_i32\n    let copy = n.duplicate()\n    return copy\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        // duplicate on a primitive is the value itself, no call emitted
        assert!(!ir.contains("call i32 @tml_duplicate"));
    }

    #[test]
    fn dyn_receiver_calls_through_the_vtable() {
        let (ir, errors) = emit(
            "behavior Speaker {\n    func speak(&self) -> Str\n}\nfunc announce(s: dyn Speaker) -> Str {\n    return s.speak()\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("extractvalue { ptr, ptr }"));
        assert!(ir.contains("load ptr, ptr"));
    }

    #[test]
    fn bounded_generic_method_resolves_to_the_concrete_impl() {
        let (ir, errors) = emit(
            "struct Tag {\n    pub id: I32\n}\nimpl Printable for Tag {\n    func to_string(&self) -> Str {\n        return \"tag\"\n    }\n}\nfunc show[T](x: T) -> Str where T: Printable {\n    return x.to_string()\n}\nfunc main() -> I32 {\n    let t = Tag { id: 1 }\n    let s = show(t)\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        // The T=Tag instantiation dispatches statically to Tag::to_string
        assert!(ir.contains("define ptr @tml_show__Tag"));
        assert!(ir.contains("call ptr @tml_Tag_to_string"));
    }
}
