//! Type-argument inference for generic calls.
//!
//! Unifies a parameter-type pattern (which may mention type parameters as
//! bare named types) against a concrete argument type, accumulating
//! substitutions. All parameters unify against all arguments before any
//! substitution is applied, so inference is order-independent for the same
//! call site.

use crate::compiler::types::{Type, TypeRef};

/// Accumulated bindings for one call site, in first-bound order.
#[derive(Debug, Default, Clone)]
pub struct Substitutions {
    pub bindings: Vec<(String, TypeRef)>,
}

impl Substitutions {
    pub fn new() -> Substitutions {
        Substitutions::default()
    }

    pub fn get(&self, param: &str) -> Option<&TypeRef> {
        self.bindings
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, bound)| bound)
    }

    pub fn bind(&mut self, param: &str, bound: TypeRef) -> bool {
        match self.get(param) {
            // A parameter bound twice must bind to the same type
            Some(existing) => **existing == *bound,
            None => {
                self.bindings.push((param.to_string(), bound));
                true
            }
        }
    }

    pub fn as_slice(&self) -> &[(String, TypeRef)] {
        &self.bindings
    }

    /// The inferred types for `type_params`, in declaration order. None if
    /// any parameter is still unbound.
    pub fn ordered(&self, type_params: &[String]) -> Option<Vec<TypeRef>> {
        type_params
            .iter()
            .map(|param| self.get(param).cloned())
            .collect()
    }
}

/// Unify `pattern` (the declared parameter type) with `concrete` (the
/// argument's type). Returns false on a structural mismatch; mismatches on
/// already-bound parameters also fail.
pub fn unify(
    pattern: &TypeRef,
    concrete: &TypeRef,
    type_params: &[String],
    subs: &mut Substitutions,
) -> bool {
    match (pattern.as_ref(), concrete.as_ref()) {
        (Type::TypeVar(name), _) => subs.bind(name, concrete.clone()),
        (Type::Named { name, type_args }, _)
            if type_args.is_empty() && type_params.iter().any(|param| param == name) =>
        {
            subs.bind(name, concrete.clone())
        }
        (
            Type::Named {
                name: pattern_name,
                type_args: pattern_args,
            },
            Type::Named {
                name: concrete_name,
                type_args: concrete_args,
            },
        ) => {
            pattern_name == concrete_name
                && pattern_args.len() == concrete_args.len()
                && pattern_args
                    .iter()
                    .zip(concrete_args)
                    .all(|(pattern_arg, concrete_arg)| {
                        unify(pattern_arg, concrete_arg, type_params, subs)
                    })
        }
        (
            Type::Reference {
                target: pattern_target,
                mutable: pattern_mut,
            },
            Type::Reference {
                target: concrete_target,
                mutable: concrete_mut,
            },
        ) => pattern_mut == concrete_mut && unify(pattern_target, concrete_target, type_params, subs),
        (
            Type::Pointer {
                target: pattern_target,
                mutable: pattern_mut,
            },
            Type::Pointer {
                target: concrete_target,
                mutable: concrete_mut,
            },
        ) => pattern_mut == concrete_mut && unify(pattern_target, concrete_target, type_params, subs),
        (Type::Slice(pattern_element), Type::Slice(concrete_element)) => {
            unify(pattern_element, concrete_element, type_params, subs)
        }
        (
            Type::Array {
                element: pattern_element,
                size: pattern_size,
            },
            Type::Array {
                element: concrete_element,
                size: concrete_size,
            },
        ) => {
            pattern_size == concrete_size
                && unify(pattern_element, concrete_element, type_params, subs)
        }
        (Type::Tuple(pattern_members), Type::Tuple(concrete_members)) => {
            pattern_members.len() == concrete_members.len()
                && pattern_members
                    .iter()
                    .zip(concrete_members)
                    .all(|(pattern_member, concrete_member)| {
                        unify(pattern_member, concrete_member, type_params, subs)
                    })
        }
        (
            Type::Function {
                params: pattern_params,
                return_type: pattern_ret,
                ..
            },
            Type::Function {
                params: concrete_params,
                return_type: concrete_ret,
                ..
            },
        )
        | (
            Type::Function {
                params: pattern_params,
                return_type: pattern_ret,
                ..
            },
            Type::Closure {
                params: concrete_params,
                return_type: concrete_ret,
                ..
            },
        ) => {
            pattern_params.len() == concrete_params.len()
                && pattern_params
                    .iter()
                    .zip(concrete_params)
                    .all(|(pattern_param, concrete_param)| {
                        unify(pattern_param, concrete_param, type_params, subs)
                    })
                && unify(pattern_ret, concrete_ret, type_params, subs)
        }
        (
            Type::DynBehavior {
                behavior: pattern_behavior,
                type_args: pattern_args,
                ..
            },
            Type::DynBehavior {
                behavior: concrete_behavior,
                type_args: concrete_args,
                ..
            },
        ) => {
            pattern_behavior == concrete_behavior
                && pattern_args.len() == concrete_args.len()
                && pattern_args
                    .iter()
                    .zip(concrete_args)
                    .all(|(pattern_arg, concrete_arg)| {
                        unify(pattern_arg, concrete_arg, type_params, subs)
                    })
        }
        (Type::Primitive(pattern_primitive), Type::Primitive(concrete_primitive)) => {
            pattern_primitive == concrete_primitive
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::Primitive;

    fn named(name: &str) -> TypeRef {
        Type::named(name, vec![])
    }

    #[test]
    fn infers_a_simple_parameter() {
        let mut subs = Substitutions::new();
        let params = vec!["T".to_string()];
        assert!(unify(
            &named("T"),
            &Type::primitive(Primitive::I64),
            &params,
            &mut subs
        ));
        assert_eq!(subs.get("T").unwrap().to_string(), "I64");
    }

    #[test]
    fn infers_through_nested_structure() {
        let mut subs = Substitutions::new();
        let params = vec!["T".to_string()];
        let pattern = Type::named("List", vec![named("T")]);
        let concrete = Type::named("List", vec![Type::primitive(Primitive::Str)]);
        assert!(unify(&pattern, &concrete, &params, &mut subs));
        assert_eq!(subs.get("T").unwrap().to_string(), "Str");
    }

    #[test]
    fn conflicting_bindings_fail() {
        let mut subs = Substitutions::new();
        let params = vec!["T".to_string()];
        let pattern = std::sync::Arc::new(Type::Tuple(vec![named("T"), named("T")]));
        let concrete = std::sync::Arc::new(Type::Tuple(vec![
            Type::primitive(Primitive::I32),
            Type::primitive(Primitive::I64),
        ]));
        assert!(!unify(&pattern, &concrete, &params, &mut subs));
    }

    #[test]
    fn mismatched_shapes_fail_without_binding() {
        let mut subs = Substitutions::new();
        let params = vec!["T".to_string()];
        let pattern = Type::named("List", vec![named("T")]);
        let concrete = Type::primitive(Primitive::I32);
        assert!(!unify(&pattern, &concrete, &params, &mut subs));
    }

    #[test]
    fn function_patterns_accept_closure_arguments() {
        let mut subs = Substitutions::new();
        let params = vec!["T".to_string()];
        let pattern = std::sync::Arc::new(Type::Function {
            params: vec![named("T")],
            return_type: named("T"),
            varargs: false,
        });
        let concrete = std::sync::Arc::new(Type::Closure {
            params: vec![Type::primitive(Primitive::I32)],
            return_type: Type::primitive(Primitive::I32),
            captures: vec![Type::primitive(Primitive::Str)],
        });
        assert!(unify(&pattern, &concrete, &params, &mut subs));
        assert_eq!(subs.get("T").unwrap().to_string(), "I32");
    }

    #[test]
    fn ordered_returns_declaration_order() {
        let mut subs = Substitutions::new();
        subs.bind("U", Type::primitive(Primitive::Str));
        subs.bind("T", Type::primitive(Primitive::I32));
        let ordered = subs
            .ordered(&["T".to_string(), "U".to_string()])
            .expect("both bound");
        assert_eq!(ordered[0].to_string(), "I32");
        assert_eq!(ordered[1].to_string(), "Str");
    }
}
