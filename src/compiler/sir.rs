//! Language-neutral s-expression IR for tooling.
//!
//! This is NOT the compilation IR; the doc generator and external consumers
//! read it. Output is deterministic: declarations sort const, type,
//! behavior, impl, func, alphabetical within each kind; struct fields, enum
//! variants and impl methods sort alphabetically. Each item carries a stable
//! 8-hex-char id derived from `(module_path, name, signature)`.

use crate::compiler::modules::Module;
use crate::compiler::types::environment::ConstValue;
use crate::hashing::crc32c;
use std::fmt::Write;

/// Stable item id: 8 lowercase hex chars.
pub fn item_id(module_path: &str, name: &str, signature: &str) -> String {
    let mut input = String::with_capacity(module_path.len() + name.len() + signature.len() + 2);
    input.push_str(module_path);
    input.push('\u{1}');
    input.push_str(name);
    input.push('\u{1}');
    input.push_str(signature);
    format!("{:08x}", crc32c(input.as_bytes()))
}

/// Renders one module to its s-expression document.
pub fn module_to_sir(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "(module \"{}\"", module.path);

    // const -> type -> behavior -> impl -> func

    let mut const_names: Vec<&String> = module.constants.keys().collect();
    const_names.sort();
    for name in const_names {
        let (value, const_type) = &module.constants[name];
        let id = item_id(&module.path, name, &const_type.to_string());
        let _ = writeln!(
            out,
            "  (const {id} \"{name}\" (type \"{const_type}\") (value {}))",
            render_const(value)
        );
    }

    let mut type_entries: Vec<(String, String)> = Vec::new();
    for (name, def) in module.structs.iter().chain(module.internal_structs.iter()) {
        let mut fields: Vec<(&String, String)> = def
            .fields
            .iter()
            .map(|(field_name, field_type, _)| (field_name, field_type.to_string()))
            .collect();
        fields.sort();
        let mut body = String::new();
        for (field_name, field_type) in fields {
            let _ = write!(body, " (field \"{field_name}\" \"{field_type}\")");
        }
        let id = item_id(&module.path, name, "struct");
        type_entries.push((name.clone(), format!("  (struct {id} \"{name}\"{body})")));
    }
    for (name, def) in &module.enums {
        let mut variants: Vec<(&String, String)> = def
            .variants
            .iter()
            .map(|(variant_name, payload)| {
                let payload_text = payload
                    .iter()
                    .map(|payload_type| format!("\"{payload_type}\""))
                    .collect::<Vec<_>>()
                    .join(" ");
                (variant_name, payload_text)
            })
            .collect();
        variants.sort();
        let mut body = String::new();
        for (variant_name, payload_text) in variants {
            if payload_text.is_empty() {
                let _ = write!(body, " (variant \"{variant_name}\")");
            } else {
                let _ = write!(body, " (variant \"{variant_name}\" {payload_text})");
            }
        }
        let id = item_id(&module.path, name, "enum");
        type_entries.push((name.clone(), format!("  (enum {id} \"{name}\"{body})")));
    }
    for (name, target) in &module.type_aliases {
        let id = item_id(&module.path, name, &target.to_string());
        type_entries.push((
            name.clone(),
            format!("  (type-alias {id} \"{name}\" \"{target}\")"),
        ));
    }
    type_entries.sort();
    for (_, line) in type_entries {
        let _ = writeln!(out, "{line}");
    }

    let mut behavior_names: Vec<&String> = module.behaviors.keys().collect();
    behavior_names.sort();
    for name in behavior_names {
        let def = &module.behaviors[name];
        let mut methods: Vec<(&String, String)> = def
            .methods
            .iter()
            .map(|method| (&method.name, method.signature_text()))
            .collect();
        methods.sort();
        let mut body = String::new();
        for (method_name, signature) in methods {
            let _ = write!(body, " (method \"{method_name}\" \"{signature}\")");
        }
        let id = item_id(&module.path, name, "behavior");
        let _ = writeln!(out, "  (behavior {id} \"{name}\"{body})");
    }

    let mut impl_entries: Vec<String> = module
        .behavior_impls
        .iter()
        .map(|impl_record| {
            let prefix = format!("{}::", impl_record.target_type_name);
            let mut methods: Vec<(&str, String)> = module
                .functions
                .iter()
                .filter(|(qualified, _)| qualified.starts_with(&prefix))
                .map(|(qualified, sig)| (qualified.as_str(), sig.signature_text()))
                .collect();
            methods.sort();
            let mut body = String::new();
            for (qualified, signature) in methods {
                let _ = write!(body, " (method \"{qualified}\" \"{signature}\")");
            }
            let descriptor = match &impl_record.behavior_name {
                Some(behavior) => format!("\"{behavior}\" \"{}\"", impl_record.target_type_name),
                None => format!("\"{}\"", impl_record.target_type_name),
            };
            let id = item_id(
                &module.path,
                &impl_record.target_type_name,
                impl_record.behavior_name.as_deref().unwrap_or("inherent"),
            );
            format!("  (impl {id} {descriptor}{body})")
        })
        .collect();
    impl_entries.sort();
    for line in impl_entries {
        let _ = writeln!(out, "{line}");
    }

    let mut func_names: Vec<&String> = module
        .functions
        .keys()
        .filter(|name| !name.contains("::"))
        .collect();
    func_names.sort();
    for name in func_names {
        let sig = &module.functions[name];
        let id = item_id(&module.path, name, &sig.signature_text());
        let _ = writeln!(out, "  (func {id} \"{name}\" \"{}\")", sig.signature_text());
    }

    out.push_str(")\n");
    out
}

fn render_const(value: &ConstValue) -> String {
    match value {
        ConstValue::Int(value) => value.to_string(),
        ConstValue::Float(value) => format!("{value:?}"),
        ConstValue::Bool(value) => value.to_string(),
        ConstValue::Str(value) => format!("\"{}\"", value.replace('"', "\\\"")),
        ConstValue::Char(value) => format!("'{value}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::environment::StructDef;
    use crate::compiler::types::{FunctionSig, Primitive, Type};
    use std::path::PathBuf;

    fn sample() -> Module {
        let mut module = Module::new("geometry", "geometry", PathBuf::from("geometry.tml"));
        module.functions.insert(
            "area".to_string(),
            FunctionSig::new(
                "area",
                vec![("r".to_string(), Type::primitive(Primitive::F64))],
                Type::primitive(Primitive::F64),
            ),
        );
        module.functions.insert(
            "brim".to_string(),
            FunctionSig::new("brim", vec![], Type::unit()),
        );
        module.structs.insert(
            "Point".to_string(),
            StructDef {
                name: "Point".to_string(),
                type_params: vec![],
                fields: vec![
                    (
                        "y".to_string(),
                        Type::primitive(Primitive::F64),
                        crate::compiler::parser::ast_nodes::Visibility::Public,
                    ),
                    (
                        "x".to_string(),
                        Type::primitive(Primitive::F64),
                        crate::compiler::parser::ast_nodes::Visibility::Public,
                    ),
                ],
                is_public: true,
            },
        );
        module
            .constants
            .insert("PI".to_string(), (ConstValue::Float(3.14159), Type::primitive(Primitive::F64)));
        module
    }

    #[test]
    fn output_is_deterministic() {
        let module = sample();
        assert_eq!(module_to_sir(&module), module_to_sir(&module));
    }

    #[test]
    fn ordering_is_const_type_then_func_with_sorted_members() {
        let text = module_to_sir(&sample());
        let const_pos = text.find("(const").expect("const present");
        let struct_pos = text.find("(struct").expect("struct present");
        let func_pos = text.find("(func").expect("func present");
        assert!(const_pos < struct_pos && struct_pos < func_pos);

        // fields sorted alphabetically: x before y
        let x_pos = text.find("\"x\"").expect("x field");
        let y_pos = text.find("\"y\"").expect("y field");
        assert!(x_pos < y_pos);

        // functions alphabetical: area before brim
        assert!(text.find("\"area\"").unwrap() < text.find("\"brim\"").unwrap());
    }

    #[test]
    fn item_ids_are_stable_8_hex_chars() {
        let id = item_id("geometry", "area", "func(F64) -> F64");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(id, item_id("geometry", "area", "func(F64) -> F64"));
        assert_ne!(id, item_id("geometry", "area", "func(F32) -> F32"));
        assert_ne!(id, item_id("other", "area", "func(F64) -> F64"));
    }
}
