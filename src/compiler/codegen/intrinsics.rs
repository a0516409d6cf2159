//! Builtins, primitive intrinsics, numeric conversion, and hot-path
//! inlining.
//!
//! Builtin calls resolve to `tml_rt_*` runtime symbols except for a small
//! set recognized by mangled name and expanded inline with a
//! fast-path/slow-path split (the string builder's push family).

use crate::compiler::codegen::types::llvm_type;
use crate::compiler::codegen::{Ctx, LlvmGenerator, Value};
use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::parser::ast_nodes::Expr;
use crate::compiler::source::TextLocation;
use crate::compiler::types::{FunctionSig, Primitive, Type, TypeRef};

/// Primitive constants reachable as `I32::MAX` style paths.
pub fn primitive_constant(type_name: &str, constant: &str) -> Option<Value> {
    let primitive = Primitive::parse(type_name)?;
    let value: i128 = match (primitive, constant) {
        (Primitive::I8, "MAX") => i8::MAX as i128,
        (Primitive::I8, "MIN") => i8::MIN as i128,
        (Primitive::I16, "MAX") => i16::MAX as i128,
        (Primitive::I16, "MIN") => i16::MIN as i128,
        (Primitive::I32, "MAX") => i32::MAX as i128,
        (Primitive::I32, "MIN") => i32::MIN as i128,
        (Primitive::I64, "MAX") => i64::MAX as i128,
        (Primitive::I64, "MIN") => i64::MIN as i128,
        (Primitive::U8, "MAX") => u8::MAX as i128,
        (Primitive::U16, "MAX") => u16::MAX as i128,
        (Primitive::U32, "MAX") => u32::MAX as i128,
        (Primitive::U64, "MAX") => u64::MAX as i128,
        (_, "MIN") if !primitive.is_signed() && primitive.is_integer() => 0,
        _ => return None,
    };
    Some(Value::new(value.to_string(), Type::primitive(primitive)))
}

/// Primitive static methods: `I32::default()`, `F64::from(x)`.
pub fn lower_primitive_static(
    generator: &mut LlvmGenerator,
    primitive: Primitive,
    method: &str,
    args: &[Expr],
    location: &TextLocation,
    ctx: &mut Ctx,
) -> Result<Value, CompileError> {
    match method {
        "default" => {
            let zero = if primitive.is_float() {
                "0.000000e+00".to_string()
            } else if primitive == Primitive::Bool {
                "false".to_string()
            } else {
                "0".to_string()
            };
            Ok(Value::new(zero, Type::primitive(primitive)))
        }
        "from" => {
            let source = args.first().ok_or_else(|| {
                CompileError::new(
                    "from() takes one argument",
                    location.to_error_location(generator.sources),
                    ErrorCode::C001,
                )
            })?;
            let value = generator.lower_expr(source, ctx, None)?;
            generator.lower_numeric_conversion(value, &Type::primitive(primitive), location, ctx)
        }
        other => Err(CompileError::new(
            format!("Unknown primitive static method '{}::{other}'", primitive.name()),
            location.to_error_location(generator.sources),
            ErrorCode::C001,
        )),
    }
}

/// Core intrinsics that map straight to single IR instructions.
pub fn lower_intrinsic(
    generator: &mut LlvmGenerator,
    name: &str,
    args: &[Expr],
    location: &TextLocation,
    ctx: &mut Ctx,
) -> Result<Option<Value>, CompileError> {
    match name {
        "unreachable" => {
            let dbg = generator.dbg_suffix(location);
            ctx.push(format!("  unreachable{dbg}"));
            Ok(Some(Value::new("undef", Type::primitive(Primitive::Never))))
        }
        "assume" => {
            let condition = args.first().ok_or_else(|| {
                CompileError::new(
                    "assume() takes one argument",
                    location.to_error_location(generator.sources),
                    ErrorCode::C001,
                )
            })?;
            let value =
                generator.lower_expr(condition, ctx, Some(&Type::primitive(Primitive::Bool)))?;
            generator
                .declares
                .insert("declare void @llvm.assume(i1)".to_string());
            ctx.push(format!("  call void @llvm.assume(i1 {})", value.operand));
            Ok(Some(Value::unit()))
        }
        _ => Ok(None),
    }
}

struct BuiltinSpec {
    name: &'static str,
    symbol: &'static str,
    params: &'static [&'static str],
    returns: &'static str,
}

/// The runtime builtin families: io, mem, atomic, sync, time, math,
/// collections, string, assert, async.
const BUILTINS: &[BuiltinSpec] = &[
    // io
    BuiltinSpec { name: "println", symbol: "tml_rt_println", params: &["ptr"], returns: "void" },
    BuiltinSpec { name: "print", symbol: "tml_rt_print", params: &["ptr"], returns: "void" },
    BuiltinSpec { name: "eprintln", symbol: "tml_rt_eprintln", params: &["ptr"], returns: "void" },
    BuiltinSpec { name: "read_line", symbol: "tml_rt_read_line", params: &[], returns: "ptr" },
    // mem
    BuiltinSpec { name: "alloc", symbol: "tml_rt_alloc", params: &["i64"], returns: "ptr" },
    BuiltinSpec { name: "free", symbol: "tml_rt_free", params: &["ptr"], returns: "void" },
    BuiltinSpec { name: "mem_copy", symbol: "tml_rt_mem_copy", params: &["ptr", "ptr", "i64"], returns: "void" },
    BuiltinSpec { name: "mem_set", symbol: "tml_rt_mem_set", params: &["ptr", "i8", "i64"], returns: "void" },
    // atomic / sync
    BuiltinSpec { name: "atomic_add", symbol: "tml_rt_atomic_add", params: &["ptr", "i64"], returns: "i64" },
    BuiltinSpec { name: "atomic_load", symbol: "tml_rt_atomic_load", params: &["ptr"], returns: "i64" },
    BuiltinSpec { name: "atomic_store", symbol: "tml_rt_atomic_store", params: &["ptr", "i64"], returns: "void" },
    BuiltinSpec { name: "mutex_lock", symbol: "tml_rt_mutex_lock", params: &["ptr"], returns: "void" },
    BuiltinSpec { name: "mutex_unlock", symbol: "tml_rt_mutex_unlock", params: &["ptr"], returns: "void" },
    // time
    BuiltinSpec { name: "time_now_ns", symbol: "tml_rt_time_now_ns", params: &[], returns: "i64" },
    BuiltinSpec { name: "sleep_ms", symbol: "tml_rt_sleep_ms", params: &["i64"], returns: "void" },
    // math
    BuiltinSpec { name: "sqrt", symbol: "llvm.sqrt.f64", params: &["double"], returns: "double" },
    BuiltinSpec { name: "pow", symbol: "llvm.pow.f64", params: &["double", "double"], returns: "double" },
    BuiltinSpec { name: "floor", symbol: "llvm.floor.f64", params: &["double"], returns: "double" },
    BuiltinSpec { name: "ceil", symbol: "llvm.ceil.f64", params: &["double"], returns: "double" },
    // collections
    BuiltinSpec { name: "list_new", symbol: "tml_rt_list_new", params: &[], returns: "ptr" },
    BuiltinSpec { name: "list_push", symbol: "tml_rt_list_push", params: &["ptr", "ptr"], returns: "void" },
    BuiltinSpec { name: "list_len", symbol: "tml_rt_list_len", params: &["ptr"], returns: "i64" },
    BuiltinSpec { name: "map_new", symbol: "tml_rt_map_new", params: &[], returns: "ptr" },
    // string
    BuiltinSpec { name: "str_len", symbol: "tml_rt_str_len", params: &["ptr"], returns: "i64" },
    BuiltinSpec { name: "str_concat", symbol: "tml_rt_str_concat", params: &["ptr", "ptr"], returns: "ptr" },
    BuiltinSpec { name: "str_eq", symbol: "tml_rt_str_eq", params: &["ptr", "ptr"], returns: "i1" },
    // async
    BuiltinSpec { name: "spawn", symbol: "tml_rt_spawn", params: &["ptr", "ptr"], returns: "ptr" },
    BuiltinSpec { name: "join", symbol: "tml_rt_join", params: &["ptr"], returns: "void" },
];

/// Builtin family dispatch; also covers `assert`/`panic`, which need the
/// source location folded into the message.
pub fn lower_builtin_family(
    generator: &mut LlvmGenerator,
    name: &str,
    args: &[Expr],
    location: &TextLocation,
    ctx: &mut Ctx,
) -> Result<Option<Value>, CompileError> {
    if name == "assert" {
        let condition = args.first().ok_or_else(|| {
            CompileError::new(
                "assert() takes a condition",
                location.to_error_location(generator.sources),
                ErrorCode::C001,
            )
        })?;
        let value =
            generator.lower_expr(condition, ctx, Some(&Type::primitive(Primitive::Bool)))?;
        generator
            .declares
            .insert("declare void @tml_rt_assert_fail(ptr, i32)".to_string());
        let pass_label = ctx.fresh_label("assert.pass");
        let fail_label = ctx.fresh_label("assert.fail");
        ctx.push(format!(
            "  br i1 {}, label %{pass_label}, label %{fail_label}",
            value.operand
        ));
        ctx.push(format!("{fail_label}:"));
        let file = generator
            .sources
            .path_of(location.file)
            .display()
            .to_string();
        let message = generator.intern_string(&file);
        ctx.push(format!(
            "  call void @tml_rt_assert_fail(ptr {message}, i32 {})",
            location.start.line
        ));
        ctx.push("  unreachable");
        ctx.push(format!("{pass_label}:"));
        return Ok(Some(Value::unit()));
    }

    if name == "panic" {
        generator
            .declares
            .insert("declare void @tml_rt_panic(ptr)".to_string());
        let message = match args.first() {
            Some(message) => generator.lower_expr(message, ctx, None)?.operand,
            None => generator.intern_string("panic"),
        };
        let dbg = generator.dbg_suffix(location);
        ctx.push(format!("  call void @tml_rt_panic(ptr {message}){dbg}"));
        ctx.push("  unreachable");
        return Ok(Some(Value::new("undef", Type::primitive(Primitive::Never))));
    }

    let Some(spec) = BUILTINS.iter().find(|spec| spec.name == name) else {
        return Ok(None);
    };

    generator.declares.insert(format!(
        "declare {} @{}({})",
        spec.returns,
        spec.symbol,
        spec.params.join(", ")
    ));

    let mut arg_texts = Vec::new();
    for (arg, param) in args.iter().zip(spec.params) {
        let hint = match *param {
            "i64" => Some(Type::primitive(Primitive::I64)),
            "double" => Some(Type::primitive(Primitive::F64)),
            "i1" => Some(Type::primitive(Primitive::Bool)),
            _ => None,
        };
        let value = generator.lower_expr(arg, ctx, hint.as_ref())?;
        arg_texts.push(format!("{param} {}", value.operand));
    }

    let dbg = generator.dbg_suffix(location);
    if spec.returns == "void" {
        ctx.push(format!(
            "  call void @{}({}){dbg}",
            spec.symbol,
            arg_texts.join(", ")
        ));
        Ok(Some(Value::unit()))
    } else {
        let result = ctx.fresh_reg();
        ctx.push(format!(
            "  {result} = call {} @{}({}){dbg}",
            spec.returns,
            spec.symbol,
            arg_texts.join(", ")
        ));
        let result_type = match spec.returns {
            "i64" => Type::primitive(Primitive::I64),
            "i1" => Type::primitive(Primitive::Bool),
            "double" => Type::primitive(Primitive::F64),
            _ => Type::primitive(Primitive::Str),
        };
        Ok(Some(Value::new(result, result_type)))
    }
}

/// Primitive receiver methods handled without a call where possible.
pub fn lower_primitive_method(
    generator: &mut LlvmGenerator,
    primitive: Primitive,
    receiver: &Value,
    method: &str,
    args: &[Expr],
    location: &TextLocation,
    ctx: &mut Ctx,
) -> Result<Option<Value>, CompileError> {
    match method {
        // Value copies are the value itself in SSA form
        "duplicate" | "to_owned" => Ok(Some(Value::new(
            receiver.operand.clone(),
            Type::primitive(primitive),
        ))),
        "to_string" => {
            let symbol = match primitive {
                Primitive::F32 | Primitive::F64 => "tml_rt_f64_to_string",
                Primitive::Bool => "tml_rt_bool_to_string",
                Primitive::Str => {
                    return Ok(Some(Value::new(
                        receiver.operand.clone(),
                        Type::primitive(Primitive::Str),
                    )));
                }
                _ => "tml_rt_i64_to_string",
            };
            let param = match primitive {
                Primitive::F32 | Primitive::F64 => "double",
                Primitive::Bool => "i1",
                _ => "i64",
            };
            generator
                .declares
                .insert(format!("declare ptr @{symbol}({param})"));
            // Narrow integers widen before the runtime call
            let operand = if param == "i64"
                && primitive.is_integer()
                && primitive.bit_width() < 64
            {
                let widened = ctx.fresh_reg();
                let op = if primitive.is_signed() { "sext" } else { "zext" };
                ctx.push(format!(
                    "  {widened} = {op} {} {} to i64",
                    crate::compiler::codegen::types::primitive_llvm(primitive),
                    receiver.operand
                ));
                widened
            } else {
                receiver.operand.clone()
            };
            let dbg = generator.dbg_suffix(location);
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call ptr @{symbol}({param} {operand}){dbg}"
            ));
            Ok(Some(Value::new(result, Type::primitive(Primitive::Str))))
        }
        "abs" if primitive.is_signed() => {
            let llvm = crate::compiler::codegen::types::primitive_llvm(primitive);
            let width = primitive.bit_width();
            generator.declares.insert(format!(
                "declare {llvm} @llvm.abs.i{width}({llvm}, i1)"
            ));
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call {llvm} @llvm.abs.i{width}({llvm} {}, i1 false)",
                receiver.operand
            ));
            Ok(Some(Value::new(result, Type::primitive(primitive))))
        }
        "abs" if primitive.is_float() => {
            let llvm = crate::compiler::codegen::types::primitive_llvm(primitive);
            let suffix = if primitive == Primitive::F32 { "f32" } else { "f64" };
            generator
                .declares
                .insert(format!("declare {llvm} @llvm.fabs.{suffix}({llvm})"));
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call {llvm} @llvm.fabs.{suffix}({llvm} {})",
                receiver.operand
            ));
            Ok(Some(Value::new(result, Type::primitive(primitive))))
        }
        "len" if primitive == Primitive::Str => {
            generator
                .declares
                .insert("declare i64 @tml_rt_str_len(ptr)".to_string());
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call i64 @tml_rt_str_len(ptr {})",
                receiver.operand
            ));
            Ok(Some(Value::new(result, Type::primitive(Primitive::Usize))))
        }
        "equals" if primitive == Primitive::Str => {
            generator
                .declares
                .insert("declare i1 @tml_rt_str_eq(ptr, ptr)".to_string());
            let other = args.first().ok_or_else(|| {
                CompileError::new(
                    "equals() takes one argument",
                    location.to_error_location(generator.sources),
                    ErrorCode::C001,
                )
            })?;
            let other = generator.lower_expr(other, ctx, Some(&Type::primitive(Primitive::Str)))?;
            let result = ctx.fresh_reg();
            ctx.push(format!(
                "  {result} = call i1 @tml_rt_str_eq(ptr {}, ptr {})",
                receiver.operand, other.operand
            ));
            Ok(Some(Value::new(result, Type::primitive(Primitive::Bool))))
        }
        _ => Ok(None),
    }
}

impl<'a> LlvmGenerator<'a> {
    /// Selects the conversion instruction from source/target signedness and
    /// width. Same width and kind is a no-op.
    pub fn lower_numeric_conversion(
        &mut self,
        source: Value,
        target: &TypeRef,
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let source_primitive = source.value_type.as_primitive();
        let target_primitive = target.as_primitive();
        let (Some(from), Some(to)) = (source_primitive, target_primitive) else {
            // Pointer-shaped casts are free
            if llvm_type(&source.value_type, self.env) == llvm_type(target, self.env) {
                return Ok(Value::new(source.operand, target.clone()));
            }
            return Err(CompileError::new(
                format!("Unsupported cast from {} to {target}", source.value_type),
                location.to_error_location(self.sources),
                ErrorCode::C001,
            ));
        };

        if from == to {
            return Ok(Value::new(source.operand, target.clone()));
        }

        let from_llvm = llvm_type(&source.value_type, self.env);
        let to_llvm = llvm_type(target, self.env);

        let instruction = match (from.is_float(), to.is_float()) {
            (false, false) => {
                if from.bit_width() == to.bit_width() {
                    // Same width, only signedness differs: bit pattern is
                    // unchanged
                    return Ok(Value::new(source.operand, target.clone()));
                } else if from.bit_width() > to.bit_width() {
                    "trunc"
                } else if from.is_signed() {
                    "sext"
                } else {
                    "zext"
                }
            }
            (false, true) => {
                if from.is_signed() {
                    "sitofp"
                } else {
                    "uitofp"
                }
            }
            (true, false) => {
                if to.is_signed() {
                    "fptosi"
                } else {
                    "fptoui"
                }
            }
            (true, true) => {
                if from.bit_width() < to.bit_width() {
                    "fpext"
                } else {
                    "fptrunc"
                }
            }
        };

        let result = ctx.fresh_reg();
        ctx.push(format!(
            "  {result} = {instruction} {from_llvm} {} to {to_llvm}",
            source.operand
        ));
        Ok(Value::new(result, target.clone()))
    }

    /// Renders any primitive value to a Str operand (for interpolation).
    pub fn to_string_value(
        &mut self,
        value: Value,
        location: &TextLocation,
        ctx: &mut Ctx,
    ) -> Result<Value, CompileError> {
        let Some(primitive) = value.value_type.as_primitive() else {
            return Err(CompileError::new(
                format!("Cannot interpolate a value of type {}", value.value_type),
                location.to_error_location(self.sources),
                ErrorCode::C001,
            ));
        };
        match lower_primitive_method(self, primitive, &value, "to_string", &[], location, ctx)? {
            Some(result) => Ok(result),
            None => Err(CompileError::new(
                format!("Cannot render {} as a string", value.value_type),
                location.to_error_location(self.sources),
                ErrorCode::C001,
            )),
        }
    }
}

// ---------------------------------
//        Hot-path inlining
// ---------------------------------

/// Helpers expanded inline with a fast-path/slow-path split instead of an
/// unconditional call. The set is keyed by mangled name.
const HOT_PATH_SYMBOLS: &[&str] = &["tml_StrBuilder_push", "tml_StrBuilder_push_str"];

pub fn is_hot_path_symbol(mangled: &str) -> bool {
    HOT_PATH_SYMBOLS.contains(&mangled)
}

/// Method-call form: the receiver arrives as a pointer (spilled by the
/// caller when it was a value), the user arguments as expressions.
pub fn lower_hot_path_method(
    generator: &mut LlvmGenerator,
    mangled: &str,
    sig: &FunctionSig,
    receiver_ptr: String,
    args: &[Expr],
    location: &TextLocation,
    ctx: &mut Ctx,
) -> Result<Value, CompileError> {
    let slow_symbol = format!("{mangled}_slow");
    let mut lowered = vec![Value::new(
        receiver_ptr,
        std::sync::Arc::new(Type::Pointer {
            target: Type::primitive(Primitive::U8),
            mutable: true,
        }),
    )];
    let value_params: Vec<&(String, TypeRef)> = sig
        .params
        .iter()
        .filter(|(name, _)| name != "self")
        .collect();
    for (arg, (_, param_type)) in args.iter().zip(value_params) {
        let hint = ctx.apply_subs(param_type);
        lowered.push(generator.lower_expr(arg, ctx, Some(&hint))?);
    }
    expand_hot_push(generator, &slow_symbol, &lowered, location, ctx)
}

/// The string builder's push family: check the receiver's state flags; when
/// capacity remains, append in place, otherwise call the general helper.
pub fn lower_hot_path(
    generator: &mut LlvmGenerator,
    mangled: &str,
    sig: &FunctionSig,
    args: &[Expr],
    location: &TextLocation,
    ctx: &mut Ctx,
) -> Result<Value, CompileError> {
    let slow_symbol = format!("{mangled}_slow");
    let mut lowered = Vec::new();
    for (arg, (_, param_type)) in args.iter().zip(&sig.params) {
        let hint = ctx.apply_subs(param_type);
        lowered.push(generator.lower_expr(arg, ctx, Some(&hint))?);
    }
    expand_hot_push(generator, &slow_symbol, &lowered, location, ctx)
}

/// Shared fast-path/slow-path expansion. `lowered[0]` is the builder
/// pointer, `lowered[1]` the pushed payload.
fn expand_hot_push(
    generator: &mut LlvmGenerator,
    slow_symbol: &str,
    lowered: &[Value],
    location: &TextLocation,
    ctx: &mut Ctx,
) -> Result<Value, CompileError> {
    let receiver = lowered.first().cloned().ok_or_else(|| {
        CompileError::new(
            "Hot-path helper requires a receiver",
            location.to_error_location(generator.sources),
            ErrorCode::C001,
        )
    })?;

    let slow_params = lowered
        .iter()
        .map(|value| llvm_type(&value.value_type, generator.env))
        .collect::<Vec<_>>()
        .join(", ");
    generator
        .declares
        .insert(format!("declare void @{slow_symbol}({slow_params})"));

    // Builder layout: { data ptr, len i64, cap i64, flags i32 }
    // flags bit 0 set = spare capacity available
    let flags_ptr = ctx.fresh_reg();
    ctx.push(format!(
        "  {flags_ptr} = getelementptr {{ ptr, i64, i64, i32 }}, ptr {}, i32 0, i32 3",
        receiver.operand
    ));
    let flags = ctx.fresh_reg();
    ctx.push(format!("  {flags} = load i32, ptr {flags_ptr}"));
    let bit = ctx.fresh_reg();
    ctx.push(format!("  {bit} = and i32 {flags}, 1"));
    let has_room = ctx.fresh_reg();
    ctx.push(format!("  {has_room} = icmp ne i32 {bit}, 0"));

    let fast_label = ctx.fresh_label("push.fast");
    let slow_label = ctx.fresh_label("push.slow");
    let end_label = ctx.fresh_label("push.end");
    ctx.push(format!(
        "  br i1 {has_room}, label %{fast_label}, label %{slow_label}"
    ));

    // Fast path: bump the length and store in place
    ctx.push(format!("{fast_label}:"));
    let len_ptr = ctx.fresh_reg();
    ctx.push(format!(
        "  {len_ptr} = getelementptr {{ ptr, i64, i64, i32 }}, ptr {}, i32 0, i32 1",
        receiver.operand
    ));
    let len = ctx.fresh_reg();
    ctx.push(format!("  {len} = load i64, ptr {len_ptr}"));
    let data_ptr = ctx.fresh_reg();
    ctx.push(format!(
        "  {data_ptr} = getelementptr {{ ptr, i64, i64, i32 }}, ptr {}, i32 0, i32 0",
        receiver.operand
    ));
    let data = ctx.fresh_reg();
    ctx.push(format!("  {data} = load ptr, ptr {data_ptr}"));
    let end = ctx.fresh_reg();
    ctx.push(format!("  {end} = getelementptr i8, ptr {data}, i64 {len}"));
    if let Some(payload) = lowered.get(1) {
        let payload_llvm = llvm_type(&payload.value_type, generator.env);
        if payload_llvm == "ptr" {
            // Appending a string: delegate the byte copy but skip re-checking
            generator
                .declares
                .insert("declare i64 @tml_rt_sb_append_raw(ptr, ptr)".to_string());
            let appended = ctx.fresh_reg();
            ctx.push(format!(
                "  {appended} = call i64 @tml_rt_sb_append_raw(ptr {end}, ptr {})",
                payload.operand
            ));
            let new_len = ctx.fresh_reg();
            ctx.push(format!("  {new_len} = add i64 {len}, {appended}"));
            ctx.push(format!("  store i64 {new_len}, ptr {len_ptr}"));
        } else {
            ctx.push(format!(
                "  store {payload_llvm} {}, ptr {end}",
                payload.operand
            ));
            let new_len = ctx.fresh_reg();
            ctx.push(format!("  {new_len} = add i64 {len}, 1"));
            ctx.push(format!("  store i64 {new_len}, ptr {len_ptr}"));
        }
    }
    ctx.push(format!("  br label %{end_label}"));

    // Slow path: the general helper grows the buffer
    ctx.push(format!("{slow_label}:"));
    let arg_texts = lowered
        .iter()
        .map(|value| {
            format!(
                "{} {}",
                llvm_type(&value.value_type, generator.env),
                value.operand
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let dbg = generator.dbg_suffix(location);
    ctx.push(format!("  call void @{slow_symbol}({arg_texts}){dbg}"));
    ctx.push(format!("  br label %{end_label}"));

    ctx.push(format!("{end_label}:"));
    Ok(Value::unit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::tests::emit;

    #[test]
    fn println_declares_and_calls_the_runtime() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    println(\"hi\")\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("declare void @tml_rt_println(ptr)"));
        assert!(ir.contains("call void @tml_rt_println(ptr @.str.1)"));
    }

    #[test]
    fn assert_lowers_to_a_branch_and_fail_call() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    assert(1 + 1 == 2)\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("assert.fail"));
        assert!(ir.contains("call void @tml_rt_assert_fail"));
        assert!(ir.contains("unreachable"));
    }

    #[test]
    fn primitive_default_and_from_are_inline() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    let z = I32::default()\n    let f = F64::from(3_i32)\n    return z\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("sitofp i32"));
        // default is a constant, not a call
        assert!(!ir.contains("call i32 @tml_I32_default"));
    }

    #[test]
    fn primitive_constants_resolve_inline() {
        let constant = primitive_constant("I32", "MAX").expect("I32::MAX");
        assert_eq!(constant.operand, i32::MAX.to_string());
        assert!(primitive_constant("I32", "NOPE").is_none());
    }

    #[test]
    fn unreachable_intrinsic_is_a_bare_instruction() {
        let (ir, errors) = emit(
            "func main() -> I32 {\n    unreachable()\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("\n  unreachable"));
    }

    #[test]
    fn hot_path_symbols_are_recognized() {
        assert!(is_hot_path_symbol("tml_StrBuilder_push"));
        assert!(is_hot_path_symbol("tml_StrBuilder_push_str"));
        assert!(!is_hot_path_symbol("tml_StrBuilder_clear"));
    }

    #[test]
    fn hot_path_push_splits_fast_and_slow() {
        let (ir, errors) = emit(
            "struct StrBuilder {\n    pub data: *U8\n    pub len: I64\n    pub cap: I64\n    pub flags: I32\n}\nimpl StrBuilder {\n    func push(&self, byte: U8) {\n        return\n    }\n}\nfunc main() -> I32 {\n    let b = StrBuilder { data: alloc(16), len: 0, cap: 16, flags: 1 }\n    b.push(65_u8)\n    return 0\n}\n",
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert!(ir.contains("push.fast"));
        assert!(ir.contains("push.slow"));
        assert!(ir.contains("declare void @tml_StrBuilder_push_slow"));
    }
}
