//! Closure lowering.
//!
//! A non-capturing closure becomes a top-level function plus the fat pointer
//! `{ @lambda, null }`. A capturing closure allocates an environment struct,
//! stores the captured values, and emits a top-level function whose first
//! parameter is the `env_ptr`; its fat pointer is `{ @lambda, env_ptr }`.
//! Calling through the fat pointer prepends the extracted `env_ptr` to the
//! user argument list (see calls.rs).

use crate::compiler::codegen::types::llvm_type;
use crate::compiler::codegen::{Ctx, LlvmGenerator, LocalSlot, Value};
use crate::compiler::diagnostics::CompileError;
use crate::compiler::parser::ast_nodes::{Expr, InterpolatedPart, Param, Pattern, Stmt, TypeExpr};
use crate::compiler::source::TextLocation;
use crate::compiler::types::{lower_type_expr, Type, TypeRef};
use rustc_hash::FxHashSet;
use std::sync::Arc;

impl<'a> LlvmGenerator<'a> {
    pub(crate) fn lower_closure(
        &mut self,
        params: &[Param],
        return_type: Option<&TypeExpr>,
        body: &Expr,
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        self.lambda_counter += 1;
        let lambda_name = format!("tml_lambda_{}", self.lambda_counter);

        // Free identifiers in the body that name enclosing locals are the
        // captures
        let mut bound: FxHashSet<String> =
            params.iter().map(|param| param.name.clone()).collect();
        let mut free = Vec::new();
        collect_free_identifiers(body, &mut bound, &mut free);
        let captures: Vec<(String, LocalSlot)> = free
            .iter()
            .filter_map(|name| {
                ctx.locals
                    .get(name)
                    .map(|slot| (name.clone(), slot.clone()))
            })
            .collect();

        let param_types: Vec<TypeRef> = params
            .iter()
            .map(|param| self.resolve(&lower_type_expr(&param.type_expr), &ctx.subs))
            .collect();
        let declared_return = return_type
            .map(|return_type| self.resolve(&lower_type_expr(return_type), &ctx.subs));

        // Build the lambda body in its own context
        let mut inner = Ctx::new(declared_return.clone().unwrap_or_else(Type::unit));
        inner.subs = ctx.subs.clone();

        let mut param_decls: Vec<String> = Vec::new();
        let env_llvm = if captures.is_empty() {
            String::new()
        } else {
            let fields = captures
                .iter()
                .map(|(_, slot)| llvm_type(&slot.value_type, self.env))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {fields} }}")
        };

        if !captures.is_empty() {
            param_decls.push("ptr %env".to_string());
            // Unpack each captured value into a local slot
            for (index, (name, slot)) in captures.iter().enumerate() {
                let field_llvm = llvm_type(&slot.value_type, self.env);
                let gep = inner.fresh_reg();
                inner.push(format!(
                    "  {gep} = getelementptr {env_llvm}, ptr %env, i32 0, i32 {index}"
                ));
                let loaded = inner.fresh_reg();
                inner.push(format!("  {loaded} = load {field_llvm}, ptr {gep}"));
                let local = inner.fresh_reg();
                inner.push(format!("  {local} = alloca {field_llvm}"));
                inner.push(format!("  store {field_llvm} {loaded}, ptr {local}"));
                inner.locals.insert(
                    name.clone(),
                    LocalSlot {
                        ptr: local,
                        value_type: slot.value_type.clone(),
                    },
                );
            }
        }

        for (index, (param, param_type)) in params.iter().zip(&param_types).enumerate() {
            let llvm = llvm_type(param_type, self.env);
            param_decls.push(format!("{llvm} %p{index}"));
            let slot = inner.fresh_reg();
            inner.push(format!("  {slot} = alloca {llvm}"));
            inner.push(format!("  store {llvm} %p{index}, ptr {slot}"));
            inner.locals.insert(
                param.name.clone(),
                LocalSlot {
                    ptr: slot,
                    value_type: param_type.clone(),
                },
            );
        }

        let body_value = self.lower_expr(body, &mut inner, declared_return.as_ref())?;
        let actual_return = declared_return.unwrap_or_else(|| body_value.value_type.clone());
        if actual_return.is_unit() {
            inner.push("  ret void");
        } else {
            let return_llvm = llvm_type(&actual_return, self.env);
            inner.push(format!("  ret {return_llvm} {}", body_value.operand));
        }

        let return_llvm = if actual_return.is_unit() {
            "void".to_string()
        } else {
            llvm_type(&actual_return, self.env)
        };
        let mut definition = format!(
            "define internal {return_llvm} @{lambda_name}({}) {{\nentry:\n",
            param_decls.join(", ")
        );
        for line in &inner.lines {
            definition.push_str(line);
            definition.push('\n');
        }
        definition.push_str("}\n");
        self.definitions.push(definition);
        self.mono.mark_emitted(&lambda_name);

        // Build the fat pointer in the enclosing function
        let env_operand = if captures.is_empty() {
            "null".to_string()
        } else {
            self.declares
                .insert("declare ptr @tml_rt_alloc(i64)".to_string());
            let size: u64 = captures
                .iter()
                .map(|(_, slot)| {
                    crate::compiler::codegen::types::size_of(&slot.value_type, self.env)
                })
                .sum();
            let env_ptr = ctx.fresh_reg();
            let dbg = self.dbg_suffix(location);
            ctx.push(format!(
                "  {env_ptr} = call ptr @tml_rt_alloc(i64 {size}){dbg}"
            ));
            for (index, (_, slot)) in captures.iter().enumerate() {
                let field_llvm = llvm_type(&slot.value_type, self.env);
                let loaded = ctx.fresh_reg();
                ctx.push(format!("  {loaded} = load {field_llvm}, ptr {}", slot.ptr));
                let gep = ctx.fresh_reg();
                ctx.push(format!(
                    "  {gep} = getelementptr {env_llvm}, ptr {env_ptr}, i32 0, i32 {index}"
                ));
                ctx.push(format!("  store {field_llvm} {loaded}, ptr {gep}"));
            }
            env_ptr
        };

        let with_fn = ctx.fresh_reg();
        ctx.push(format!(
            "  {with_fn} = insertvalue {{ ptr, ptr }} undef, ptr @{lambda_name}, 0"
        ));
        let fat_pointer = ctx.fresh_reg();
        ctx.push(format!(
            "  {fat_pointer} = insertvalue {{ ptr, ptr }} {with_fn}, ptr {env_operand}, 1"
        ));

        Ok(Value::new(
            fat_pointer,
            Arc::new(Type::Closure {
                params: param_types,
                return_type: actual_return,
                captures: captures
                    .iter()
                    .map(|(_, slot)| slot.value_type.clone())
                    .collect(),
            }),
        ))
    }
}

/// Collects identifiers used but not bound inside an expression tree.
fn collect_free_identifiers(expr: &Expr, bound: &mut FxHashSet<String>, free: &mut Vec<String>) {
    match expr {
        Expr::Identifier(name, _) => {
            if !bound.contains(name) && !free.contains(name) {
                free.push(name.clone());
            }
        }
        Expr::Literal(..) | Expr::Path { .. } => {}
        Expr::InterpolatedString(parts, _) => {
            for part in parts {
                if let InterpolatedPart::Expr(inner) = part {
                    collect_free_identifiers(inner, bound, free);
                }
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_free_identifiers(lhs, bound, free);
            collect_free_identifiers(rhs, bound, free);
        }
        Expr::Unary { operand, .. } => collect_free_identifiers(operand, bound, free),
        Expr::Call { callee, args, .. } => {
            collect_free_identifiers(callee, bound, free);
            for arg in args {
                collect_free_identifiers(arg, bound, free);
            }
        }
        Expr::MethodCall { receiver, args, .. } => {
            collect_free_identifiers(receiver, bound, free);
            for arg in args {
                collect_free_identifiers(arg, bound, free);
            }
        }
        Expr::Field { receiver, .. } => collect_free_identifiers(receiver, bound, free),
        Expr::Index {
            receiver, index, ..
        } => {
            collect_free_identifiers(receiver, bound, free);
            collect_free_identifiers(index, bound, free);
        }
        Expr::Tuple(members, _) | Expr::Array(members, _) => {
            for member in members {
                collect_free_identifiers(member, bound, free);
            }
        }
        Expr::ArrayRepeat { value, count, .. } => {
            collect_free_identifiers(value, bound, free);
            collect_free_identifiers(count, bound, free);
        }
        Expr::StructLiteral { fields, .. } => {
            for (_, value) in fields {
                collect_free_identifiers(value, bound, free);
            }
        }
        Expr::Block(block) => {
            let mut scope_bound = bound.clone();
            for stmt in &block.statements {
                collect_free_in_stmt(stmt, &mut scope_bound, free);
            }
        }
        Expr::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            collect_free_identifiers(condition, bound, free);
            let mut then_bound = bound.clone();
            for stmt in &then_branch.statements {
                collect_free_in_stmt(stmt, &mut then_bound, free);
            }
            if let Some(else_branch) = else_branch {
                collect_free_identifiers(else_branch, bound, free);
            }
        }
        Expr::When {
            scrutinee, arms, ..
        } => {
            collect_free_identifiers(scrutinee, bound, free);
            for arm in arms {
                let mut arm_bound = bound.clone();
                bind_pattern_names(&arm.pattern, &mut arm_bound);
                collect_free_identifiers(&arm.body, &mut arm_bound, free);
            }
        }
        Expr::Closure { params, body, .. } => {
            let mut inner_bound = bound.clone();
            for param in params {
                inner_bound.insert(param.name.clone());
            }
            collect_free_identifiers(body, &mut inner_bound, free);
        }
        Expr::Try(inner, _) | Expr::Await(inner, _) => {
            collect_free_identifiers(inner, bound, free)
        }
        Expr::Range { start, end, .. } => {
            if let Some(start) = start {
                collect_free_identifiers(start, bound, free);
            }
            if let Some(end) = end {
                collect_free_identifiers(end, bound, free);
            }
        }
        Expr::Cast { value, .. } => collect_free_identifiers(value, bound, free),
    }
}

fn collect_free_in_stmt(stmt: &Stmt, bound: &mut FxHashSet<String>, free: &mut Vec<String>) {
    match stmt {
        Stmt::Let { pattern, value, .. } => {
            collect_free_identifiers(value, bound, free);
            bind_pattern_names(pattern, bound);
        }
        Stmt::Assign { target, value, .. } => {
            collect_free_identifiers(target, bound, free);
            collect_free_identifiers(value, bound, free);
        }
        Stmt::Expr(expr) => collect_free_identifiers(expr, bound, free),
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                collect_free_identifiers(value, bound, free);
            }
        }
        Stmt::Break { .. } | Stmt::Continue { .. } => {}
        Stmt::While {
            condition, body, ..
        } => {
            collect_free_identifiers(condition, bound, free);
            let mut body_bound = bound.clone();
            for stmt in &body.statements {
                collect_free_in_stmt(stmt, &mut body_bound, free);
            }
        }
        Stmt::Loop { body, .. } => {
            let mut body_bound = bound.clone();
            for stmt in &body.statements {
                collect_free_in_stmt(stmt, &mut body_bound, free);
            }
        }
        Stmt::For {
            pattern,
            iterable,
            body,
            ..
        } => {
            collect_free_identifiers(iterable, bound, free);
            let mut body_bound = bound.clone();
            bind_pattern_names(pattern, &mut body_bound);
            for stmt in &body.statements {
                collect_free_in_stmt(stmt, &mut body_bound, free);
            }
        }
    }
}

fn bind_pattern_names(pattern: &Pattern, bound: &mut FxHashSet<String>) {
    match pattern {
        Pattern::Binding { name, .. } => {
            bound.insert(name.clone());
        }
        Pattern::Tuple(members, _) => {
            for member in members {
                bind_pattern_names(member, bound);
            }
        }
        Pattern::Struct { fields, .. } => {
            for (_, member) in fields {
                bind_pattern_names(member, bound);
            }
        }
        Pattern::EnumVariant { payload, .. } => {
            for member in payload {
                bind_pattern_names(member, bound);
            }
        }
        Pattern::Literal(..) | Pattern::Wildcard(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::codegen::tests::emit;

    #[test]
    fn non_capturing_closure_gets_a_null_env() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let add = |a: I32, b: I32| a + b\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("define internal i32 @tml_lambda_1(i32 %p0, i32 %p1)"));
        assert!(ir.contains("insertvalue { ptr, ptr } undef, ptr @tml_lambda_1, 0"));
        assert!(ir.contains(", ptr null, 1"));
    }

    #[test]
    fn capturing_closure_allocates_an_env_struct() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let base = 10_i32\n    let add = |x: I32| x + base\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        // env struct allocated and the capture stored into it
        assert!(ir.contains("call ptr @tml_rt_alloc(i64 4)"));
        // lambda takes env first and unpacks the capture
        assert!(ir.contains("define internal i32 @tml_lambda_1(ptr %env, i32 %p0)"));
        assert!(ir.contains("getelementptr { i32 }, ptr %env, i32 0, i32 0"));
    }

    #[test]
    fn calling_a_closure_extracts_fn_and_env() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let base = 2_i32\n    let add = |x: I32| x + base\n    return add(40)\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("extractvalue { ptr, ptr }"));
        // env_ptr prepends to the user arguments
        let call_line = ir
            .lines()
            .find(|line| line.contains("= call i32 %r") || line.contains("= call i32 %"))
            .map(|line| line.to_string());
        if let Some(line) = call_line {
            assert!(line.contains("(ptr "), "env not prepended: {line}");
        }
    }
}
