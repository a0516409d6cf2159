//! `when` exhaustiveness checking.
//!
//! A `when` over an enum must cover every variant or end in a catch-all
//! (wildcard or binding). Missing variants are named in the diagnostic.
//! Duplicate coverage of the same variant is reported as an overlap warning
//! condition via an unreachable-arm error.

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation, ErrorMetaDataKey};
use crate::compiler::parser::ast_nodes::{Pattern, WhenArm};
use crate::compiler::types::environment::EnumDef;
use rustc_hash::FxHashSet;

pub fn check_enum_exhaustiveness(
    enum_def: &EnumDef,
    arms: &[WhenArm],
    location: &ErrorLocation,
) -> Vec<CompileError> {
    let mut errors = Vec::new();
    let mut covered: FxHashSet<&str> = FxHashSet::default();
    let mut has_catch_all = false;

    for arm in arms {
        if has_catch_all {
            errors.push(CompileError::new(
                "Unreachable arm: a previous pattern already matches everything",
                location.clone(),
                ErrorCode::T004,
            ));
            continue;
        }
        match &arm.pattern {
            Pattern::Wildcard(_) => has_catch_all = true,
            Pattern::Binding { .. } => has_catch_all = true,
            Pattern::EnumVariant {
                variant, enum_name, ..
            } => {
                if let Some(enum_name) = enum_name {
                    if *enum_name != enum_def.name {
                        errors.push(CompileError::new(
                            format!(
                                "Pattern matches '{enum_name}::{variant}' but the scrutinee is '{}'",
                                enum_def.name
                            ),
                            location.clone(),
                            ErrorCode::T001,
                        ));
                        continue;
                    }
                }
                if enum_def.variant_index(variant).is_none() {
                    errors.push(CompileError::new(
                        format!("'{}' has no variant named '{variant}'", enum_def.name),
                        location.clone(),
                        ErrorCode::T002,
                    ));
                    continue;
                }
                if !covered.insert(variant.as_str()) {
                    errors.push(CompileError::new(
                        format!("Variant '{variant}' is matched more than once"),
                        location.clone(),
                        ErrorCode::T004,
                    ));
                }
            }
            // Literal and structural patterns over an enum scrutinee never
            // cover a variant on their own
            _ => {}
        }
    }

    if !has_catch_all {
        let missing: Vec<&str> = enum_def
            .variants
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| !covered.contains(name))
            .collect();
        if !missing.is_empty() {
            errors.push(
                CompileError::new(
                    format!(
                        "Non-exhaustive when over '{}': missing {}",
                        enum_def.name,
                        missing.join(", ")
                    ),
                    location.clone(),
                    ErrorCode::T004,
                )
                .with_metadata(ErrorMetaDataKey::MissingVariants, missing.join(","))
                .with_metadata(
                    ErrorMetaDataKey::PrimarySuggestion,
                    "add the missing arms or a trailing `_ =>` catch-all",
                ),
            );
        }
    }

    errors
}

/// A `when` over a non-enum scrutinee (integers, booleans, strings) needs a
/// catch-all; the value space is never enumerable arm-by-arm, except Bool
/// with both literals present.
pub fn check_open_exhaustiveness(
    arms: &[WhenArm],
    scrutinee_is_bool: bool,
    location: &ErrorLocation,
) -> Vec<CompileError> {
    let has_catch_all = arms
        .iter()
        .any(|arm| matches!(arm.pattern, Pattern::Wildcard(_) | Pattern::Binding { .. }));
    if has_catch_all {
        return Vec::new();
    }

    if scrutinee_is_bool {
        let mut saw_true = false;
        let mut saw_false = false;
        for arm in arms {
            if let Pattern::Literal(
                crate::compiler::parser::ast_nodes::Literal::Bool(value),
                _,
            ) = &arm.pattern
            {
                if *value {
                    saw_true = true;
                } else {
                    saw_false = true;
                }
            }
        }
        if saw_true && saw_false {
            return Vec::new();
        }
    }

    vec![CompileError::new(
        "Non-exhaustive when: add a trailing `_ =>` catch-all",
        location.clone(),
        ErrorCode::T004,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::ast_nodes::{Expr, Literal};
    use crate::compiler::source::TextLocation;
    use crate::compiler::types::Type;

    fn shape_enum() -> EnumDef {
        EnumDef {
            name: "Shape".to_string(),
            type_params: vec![],
            variants: vec![
                ("Circle".to_string(), vec![Type::primitive(crate::compiler::types::Primitive::F64)]),
                ("Square".to_string(), vec![Type::primitive(crate::compiler::types::Primitive::F64)]),
                ("Empty".to_string(), vec![]),
            ],
            is_public: true,
        }
    }

    fn arm(pattern: Pattern) -> WhenArm {
        WhenArm {
            pattern,
            body: Expr::Literal(Literal::Unit, TextLocation::default()),
            location: TextLocation::default(),
        }
    }

    fn variant_arm(name: &str) -> WhenArm {
        arm(Pattern::EnumVariant {
            enum_name: None,
            variant: name.to_string(),
            payload: vec![],
            location: TextLocation::default(),
        })
    }

    #[test]
    fn all_variants_listed_is_exhaustive() {
        let arms = vec![
            variant_arm("Circle"),
            variant_arm("Square"),
            variant_arm("Empty"),
        ];
        let errors =
            check_enum_exhaustiveness(&shape_enum(), &arms, &ErrorLocation::default());
        assert!(errors.is_empty());
    }

    #[test]
    fn wildcard_covers_the_rest() {
        let arms = vec![variant_arm("Circle"), arm(Pattern::Wildcard(TextLocation::default()))];
        let errors =
            check_enum_exhaustiveness(&shape_enum(), &arms, &ErrorLocation::default());
        assert!(errors.is_empty());
    }

    #[test]
    fn missing_variants_are_named() {
        let arms = vec![variant_arm("Circle")];
        let errors =
            check_enum_exhaustiveness(&shape_enum(), &arms, &ErrorLocation::default());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::T004);
        assert!(errors[0].msg.contains("Square"));
        assert!(errors[0].msg.contains("Empty"));
        assert!(!errors[0].msg.contains("missing Circle"));
    }

    #[test]
    fn unknown_variant_is_a_t002() {
        let arms = vec![variant_arm("Triangle"), arm(Pattern::Wildcard(TextLocation::default()))];
        let errors =
            check_enum_exhaustiveness(&shape_enum(), &arms, &ErrorLocation::default());
        assert!(errors.iter().any(|error| error.code == ErrorCode::T002));
    }

    #[test]
    fn duplicate_variant_is_reported() {
        let arms = vec![
            variant_arm("Circle"),
            variant_arm("Circle"),
            arm(Pattern::Wildcard(TextLocation::default())),
        ];
        let errors =
            check_enum_exhaustiveness(&shape_enum(), &arms, &ErrorLocation::default());
        assert!(errors.iter().any(|error| error.msg.contains("more than once")));
    }

    #[test]
    fn bool_with_both_literals_is_exhaustive() {
        let arms = vec![
            arm(Pattern::Literal(Literal::Bool(true), TextLocation::default())),
            arm(Pattern::Literal(Literal::Bool(false), TextLocation::default())),
        ];
        let errors = check_open_exhaustiveness(&arms, true, &ErrorLocation::default());
        assert!(errors.is_empty());
    }

    #[test]
    fn integer_when_without_catch_all_fails() {
        let arms = vec![arm(Pattern::Literal(
            Literal::Int(1, None),
            TextLocation::default(),
        ))];
        let errors = check_open_exhaustiveness(&arms, false, &ErrorLocation::default());
        assert_eq!(errors.len(), 1);
    }
}
