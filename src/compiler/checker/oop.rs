//! Class and interface rule validation.
//!
//! Runs during declaration registration, before any body is checked:
//! - a `sealed` class cannot be extended
//! - `abstract` methods may only appear in abstract classes or interfaces
//! - `override` must match a virtual or abstract base method exactly
//!   (same signature modulo Self)
//! - `final` methods cannot be overridden
//! - member visibility is respected across the class boundary

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use crate::compiler::types::environment::{ClassDef, MethodKind, TypeEnvironment};
use crate::compiler::types::FunctionSig;

pub fn validate_class(
    class: &ClassDef,
    env: &TypeEnvironment,
    location: &ErrorLocation,
) -> Vec<CompileError> {
    let mut errors = Vec::new();

    let base = class
        .extends
        .as_ref()
        .and_then(|base_name| env.classes.get(base_name));

    if let Some(base_name) = &class.extends {
        match env.classes.get(base_name) {
            Some(base_class) => {
                if base_class.is_sealed {
                    errors.push(CompileError::new(
                        format!("Cannot extend sealed class '{base_name}'"),
                        location.clone(),
                        ErrorCode::T006,
                    ));
                }
            }
            None => {
                errors.push(CompileError::new(
                    format!("Unknown base class '{base_name}'"),
                    location.clone(),
                    ErrorCode::T002,
                ));
            }
        }
    }

    for interface_name in &class.implements {
        if !env.interfaces.contains_key(interface_name) {
            errors.push(CompileError::new(
                format!("Unknown interface '{interface_name}'"),
                location.clone(),
                ErrorCode::T002,
            ));
        }
    }

    for method in &class.methods {
        match method.kind {
            MethodKind::Abstract => {
                if !class.is_abstract {
                    errors.push(CompileError::new(
                        format!(
                            "Abstract method '{}' in non-abstract class '{}'",
                            method.sig.name, class.name
                        ),
                        location.clone(),
                        ErrorCode::T006,
                    ));
                }
            }
            MethodKind::Override => {
                match base.and_then(|base_class| base_class.method(&method.sig.name)) {
                    Some(base_method) => {
                        if base_method.kind == MethodKind::Final {
                            errors.push(CompileError::new(
                                format!(
                                    "Cannot override final method '{}'",
                                    method.sig.name
                                ),
                                location.clone(),
                                ErrorCode::T006,
                            ));
                        } else if !matches!(
                            base_method.kind,
                            MethodKind::Virtual | MethodKind::Abstract | MethodKind::Override
                        ) {
                            errors.push(CompileError::new(
                                format!(
                                    "'{}' overrides a method that is neither virtual nor abstract",
                                    method.sig.name
                                ),
                                location.clone(),
                                ErrorCode::T006,
                            ));
                        } else if !signatures_match(&method.sig, &base_method.sig) {
                            errors.push(
                                CompileError::new(
                                    format!(
                                        "Override of '{}' does not match the base signature",
                                        method.sig.name
                                    ),
                                    location.clone(),
                                    ErrorCode::T006,
                                )
                                .with_note(format!(
                                    "base: {}, override: {}",
                                    base_method.sig.signature_text(),
                                    method.sig.signature_text()
                                )),
                            );
                        }
                    }
                    None => {
                        errors.push(CompileError::new(
                            format!(
                                "'{}' is marked override but no base class declares it",
                                method.sig.name
                            ),
                            location.clone(),
                            ErrorCode::T006,
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    // An abstract base leaves obligations: a concrete subclass must override
    // every abstract method it inherits
    if !class.is_abstract {
        if let Some(base_class) = base {
            for base_method in &base_class.methods {
                if base_method.kind == MethodKind::Abstract
                    && class.method(&base_method.sig.name).is_none()
                {
                    errors.push(CompileError::new(
                        format!(
                            "Class '{}' must override abstract method '{}' from '{}'",
                            class.name, base_method.sig.name, base_class.name
                        ),
                        location.clone(),
                        ErrorCode::T006,
                    ));
                }
            }
        }
    }

    errors
}

/// Signatures match modulo the receiver: same parameter types (skipping
/// `self`) and same return type.
fn signatures_match(a: &FunctionSig, b: &FunctionSig) -> bool {
    let a_params: Vec<_> = a
        .params
        .iter()
        .filter(|(name, _)| name != "self")
        .map(|(_, param_type)| param_type.to_string())
        .collect();
    let b_params: Vec<_> = b
        .params
        .iter()
        .filter(|(name, _)| name != "self")
        .map(|(_, param_type)| param_type.to_string())
        .collect();
    a_params == b_params && a.return_type.to_string() == b.return_type.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::ast_nodes::Visibility;
    use crate::compiler::types::environment::ClassMethodDef;
    use crate::compiler::types::{Primitive, Type};

    fn method(name: &str, kind: MethodKind) -> ClassMethodDef {
        ClassMethodDef {
            kind,
            is_static: false,
            visibility: Visibility::Public,
            sig: FunctionSig::new(
                name,
                vec![("self".to_string(), Type::named("Self", vec![]))],
                Type::primitive(Primitive::F64),
            ),
        }
    }

    fn class(name: &str) -> ClassDef {
        ClassDef {
            name: name.to_string(),
            type_params: vec![],
            is_abstract: false,
            is_sealed: false,
            is_value: false,
            extends: None,
            implements: vec![],
            fields: vec![],
            methods: vec![],
            is_public: true,
        }
    }

    #[test]
    fn extending_a_sealed_class_fails() {
        let mut env = TypeEnvironment::default();
        let mut base = class("Base");
        base.is_sealed = true;
        env.classes.insert("Base".to_string(), base);

        let mut derived = class("Derived");
        derived.extends = Some("Base".to_string());

        let errors = validate_class(&derived, &env, &ErrorLocation::default());
        assert!(errors.iter().any(|error| error.msg.contains("sealed")));
    }

    #[test]
    fn abstract_method_requires_abstract_class() {
        let env = TypeEnvironment::default();
        let mut bad = class("Shape");
        bad.methods.push(method("area", MethodKind::Abstract));
        let errors = validate_class(&bad, &env, &ErrorLocation::default());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::T006);

        let mut good = class("Shape");
        good.is_abstract = true;
        good.methods.push(method("area", MethodKind::Abstract));
        assert!(validate_class(&good, &env, &ErrorLocation::default()).is_empty());
    }

    #[test]
    fn override_must_target_virtual_or_abstract() {
        let mut env = TypeEnvironment::default();
        let mut base = class("Base");
        base.methods.push(method("plain", MethodKind::Normal));
        base.methods.push(method("open", MethodKind::Virtual));
        env.classes.insert("Base".to_string(), base);

        let mut derived = class("Derived");
        derived.extends = Some("Base".to_string());
        derived.methods.push(method("plain", MethodKind::Override));
        derived.methods.push(method("open", MethodKind::Override));

        let errors = validate_class(&derived, &env, &ErrorLocation::default());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].msg.contains("plain"));
    }

    #[test]
    fn final_methods_cannot_be_overridden() {
        let mut env = TypeEnvironment::default();
        let mut base = class("Base");
        base.methods.push(method("locked", MethodKind::Final));
        env.classes.insert("Base".to_string(), base);

        let mut derived = class("Derived");
        derived.extends = Some("Base".to_string());
        derived.methods.push(method("locked", MethodKind::Override));

        let errors = validate_class(&derived, &env, &ErrorLocation::default());
        assert!(errors.iter().any(|error| error.msg.contains("final")));
    }

    #[test]
    fn override_signature_must_match() {
        let mut env = TypeEnvironment::default();
        let mut base = class("Base");
        base.methods.push(method("area", MethodKind::Virtual));
        env.classes.insert("Base".to_string(), base);

        let mut derived = class("Derived");
        derived.extends = Some("Base".to_string());
        let mut bad_override = method("area", MethodKind::Override);
        bad_override.sig = FunctionSig::new(
            "area",
            vec![
                ("self".to_string(), Type::named("Self", vec![])),
                ("scale".to_string(), Type::primitive(Primitive::F64)),
            ],
            Type::primitive(Primitive::F64),
        );
        derived.methods.push(bad_override);

        let errors = validate_class(&derived, &env, &ErrorLocation::default());
        assert!(errors.iter().any(|error| error.msg.contains("does not match")));
    }

    #[test]
    fn concrete_subclass_must_implement_abstract_methods() {
        let mut env = TypeEnvironment::default();
        let mut base = class("Shape");
        base.is_abstract = true;
        base.methods.push(method("area", MethodKind::Abstract));
        env.classes.insert("Shape".to_string(), base);

        let mut derived = class("Circle");
        derived.extends = Some("Shape".to_string());

        let errors = validate_class(&derived, &env, &ErrorLocation::default());
        assert!(errors.iter().any(|error| error.msg.contains("must override")));
    }
}
