//! Semantic type -> LLVM textual type mapping and aggregate layout.
//!
//! Primitives map to fixed-width integers and floats, `Bool` to `i1`, `Str`
//! and all references/pointers to opaque `ptr`. Structs and value classes
//! become named aggregates. Enums lower to `{ i32 tag, [N x i8] payload }`
//! with N the largest payload size. Closures and `dyn` receivers are fat
//! pointers `{ ptr, ptr }`.

use crate::compiler::types::environment::TypeEnvironment;
use crate::compiler::types::{Primitive, Type, TypeRef};

pub fn llvm_type(value_type: &TypeRef, env: &TypeEnvironment) -> String {
    match value_type.as_ref() {
        Type::Primitive(primitive) => primitive_llvm(*primitive).to_string(),
        Type::Named { name, type_args } => {
            if let Some(def) = env.enums.get(name) {
                let _ = def;
                return format!("%enum.{}", aggregate_name(name, type_args));
            }
            if env.structs.get(name).is_some() {
                return format!("%struct.{}", aggregate_name(name, type_args));
            }
            if let Some(def) = env.classes.get(name) {
                // Reference classes are pointers; value classes are aggregates
                if def.is_value {
                    return format!("%class.{}", aggregate_name(name, type_args));
                }
                return "ptr".to_string();
            }
            // Unresolved named types (type parameters pre-substitution,
            // foreign types) lower as pointers
            "ptr".to_string()
        }
        Type::Reference { .. } | Type::Pointer { .. } => "ptr".to_string(),
        Type::Slice(_) => "{ ptr, i64 }".to_string(),
        Type::Array { element, size } => {
            format!("[{size} x {}]", llvm_type(element, env))
        }
        Type::Tuple(members) => {
            let body = members
                .iter()
                .map(|member| llvm_type(member, env))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {body} }}")
        }
        Type::Function { .. } => "ptr".to_string(),
        Type::Closure { .. } => "{ ptr, ptr }".to_string(),
        Type::DynBehavior { .. } => "{ ptr, ptr }".to_string(),
        Type::TypeVar(_) => "ptr".to_string(),
    }
}

pub fn primitive_llvm(primitive: Primitive) -> &'static str {
    match primitive {
        Primitive::I8 | Primitive::U8 => "i8",
        Primitive::I16 | Primitive::U16 => "i16",
        Primitive::I32 | Primitive::U32 => "i32",
        Primitive::I64 | Primitive::U64 | Primitive::Isize | Primitive::Usize => "i64",
        Primitive::I128 | Primitive::U128 => "i128",
        Primitive::F32 => "float",
        Primitive::F64 => "double",
        Primitive::Bool => "i1",
        Primitive::Char => "i32",
        Primitive::Str => "ptr",
        Primitive::Unit | Primitive::Never => "void",
    }
}

/// Name for a (possibly monomorphized) aggregate: `Point`, `List__I32`.
pub fn aggregate_name(name: &str, type_args: &[TypeRef]) -> String {
    if type_args.is_empty() {
        return name.to_string();
    }
    let args = type_args
        .iter()
        .map(|arg| flatten_type_name(arg))
        .collect::<Vec<_>>()
        .join("_");
    format!("{name}__{args}")
}

/// A type rendered as a mangle-safe identifier fragment.
pub fn flatten_type_name(value_type: &TypeRef) -> String {
    match value_type.as_ref() {
        Type::Primitive(primitive) => primitive.name().to_string(),
        Type::Named { name, type_args } => aggregate_name(name, type_args),
        Type::Reference { target, mutable } | Type::Pointer { target, mutable } => {
            if *mutable {
                format!("mutptr_{}", flatten_type_name(target))
            } else {
                format!("ptr_{}", flatten_type_name(target))
            }
        }
        Type::Slice(element) => format!("slice_{}", flatten_type_name(element)),
        Type::Array { element, size } => format!("arr{size}_{}", flatten_type_name(element)),
        Type::Tuple(members) => {
            let body = members
                .iter()
                .map(flatten_type_name)
                .collect::<Vec<_>>()
                .join("_");
            format!("tup_{body}")
        }
        Type::Function { .. } | Type::Closure { .. } => "fn".to_string(),
        Type::DynBehavior { behavior, .. } => format!("dyn_{behavior}"),
        Type::TypeVar(name) => name.clone(),
    }
}

/// Size in bytes of a lowered value, for enum payload sizing.
pub fn size_of(value_type: &TypeRef, env: &TypeEnvironment) -> u64 {
    match value_type.as_ref() {
        Type::Primitive(primitive) => match primitive {
            Primitive::Unit | Primitive::Never => 0,
            Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 | Primitive::Char => 4,
            Primitive::I128 | Primitive::U128 => 16,
            _ => 8,
        },
        Type::Named { name, type_args } => {
            if let Some(def) = env.structs.get(name) {
                let subs: Vec<(String, TypeRef)> = def
                    .type_params
                    .iter()
                    .cloned()
                    .zip(type_args.iter().cloned())
                    .collect();
                return def
                    .fields
                    .iter()
                    .map(|(_, field_type, _)| size_of(&field_type.substitute(&subs), env))
                    .sum();
            }
            if let Some(def) = env.enums.get(name) {
                let subs: Vec<(String, TypeRef)> = def
                    .type_params
                    .iter()
                    .cloned()
                    .zip(type_args.iter().cloned())
                    .collect();
                return 4 + enum_payload_size_with(def, &subs, env);
            }
            if let Some(def) = env.classes.get(name) {
                if def.is_value {
                    return def
                        .fields
                        .iter()
                        .map(|(_, field_type, _)| size_of(field_type, env))
                        .sum();
                }
            }
            8
        }
        Type::Reference { .. } | Type::Pointer { .. } | Type::Function { .. } => 8,
        Type::Slice(_) | Type::Closure { .. } | Type::DynBehavior { .. } => 16,
        Type::Array { element, size } => size_of(element, env) * size,
        Type::Tuple(members) => members.iter().map(|member| size_of(member, env)).sum(),
        Type::TypeVar(_) => 8,
    }
}

/// Largest payload across an enum's variants after substitution. Zero for
/// payload-free (and zero-variant, Never-like) enums.
pub fn enum_payload_size_with(
    def: &crate::compiler::types::environment::EnumDef,
    subs: &[(String, TypeRef)],
    env: &TypeEnvironment,
) -> u64 {
    def.variants
        .iter()
        .map(|(_, payload)| {
            payload
                .iter()
                .map(|payload_type| size_of(&payload_type.substitute(subs), env))
                .sum::<u64>()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::ast_nodes::Visibility;
    use crate::compiler::types::environment::{EnumDef, StructDef};

    fn env_with_shape() -> TypeEnvironment {
        let mut env = TypeEnvironment::default();
        env.enums.insert(
            "Shape".to_string(),
            EnumDef {
                name: "Shape".to_string(),
                type_params: vec![],
                variants: vec![
                    (
                        "Circle".to_string(),
                        vec![Type::primitive(Primitive::F64)],
                    ),
                    (
                        "Rect".to_string(),
                        vec![
                            Type::primitive(Primitive::F64),
                            Type::primitive(Primitive::F64),
                        ],
                    ),
                    ("Empty".to_string(), vec![]),
                ],
                is_public: true,
            },
        );
        env.structs.insert(
            "Point".to_string(),
            StructDef {
                name: "Point".to_string(),
                type_params: vec![],
                fields: vec![
                    ("x".to_string(), Type::primitive(Primitive::F64), Visibility::Public),
                    ("y".to_string(), Type::primitive(Primitive::F64), Visibility::Public),
                ],
                is_public: true,
            },
        );
        env
    }

    #[test]
    fn primitive_mapping_matches_the_contract() {
        let env = TypeEnvironment::default();
        assert_eq!(llvm_type(&Type::primitive(Primitive::Bool), &env), "i1");
        assert_eq!(llvm_type(&Type::primitive(Primitive::I64), &env), "i64");
        assert_eq!(llvm_type(&Type::primitive(Primitive::F32), &env), "float");
        assert_eq!(llvm_type(&Type::primitive(Primitive::Str), &env), "ptr");
    }

    #[test]
    fn enum_payload_is_the_widest_variant() {
        let env = env_with_shape();
        let def = env.enums.get("Shape").unwrap();
        assert_eq!(enum_payload_size_with(def, &[], &env), 16);
        let shape = Type::named("Shape", vec![]);
        assert_eq!(size_of(&shape, &env), 20);
        assert_eq!(llvm_type(&shape, &env), "%enum.Shape");
    }

    #[test]
    fn zero_variant_enum_has_no_payload() {
        let mut env = TypeEnvironment::default();
        env.enums.insert(
            "Void".to_string(),
            EnumDef {
                name: "Void".to_string(),
                type_params: vec![],
                variants: vec![],
                is_public: true,
            },
        );
        let def = env.enums.get("Void").unwrap();
        assert_eq!(enum_payload_size_with(def, &[], &env), 0);
    }

    #[test]
    fn closures_and_dyn_are_fat_pointers() {
        let env = TypeEnvironment::default();
        let closure = std::sync::Arc::new(Type::Closure {
            params: vec![],
            return_type: Type::unit(),
            captures: vec![Type::primitive(Primitive::I32)],
        });
        assert_eq!(llvm_type(&closure, &env), "{ ptr, ptr }");
        let dyn_behavior = std::sync::Arc::new(Type::DynBehavior {
            behavior: "Printable".to_string(),
            type_args: vec![],
            mutable: false,
        });
        assert_eq!(llvm_type(&dyn_behavior, &env), "{ ptr, ptr }");
    }

    #[test]
    fn monomorphized_aggregates_embed_their_args() {
        assert_eq!(
            aggregate_name("List", &[Type::primitive(Primitive::I32)]),
            "List__I32"
        );
        assert_eq!(
            flatten_type_name(&std::sync::Arc::new(Type::Pointer {
                target: Type::primitive(Primitive::U8),
                mutable: true,
            })),
            "mutptr_U8"
        );
    }
}
