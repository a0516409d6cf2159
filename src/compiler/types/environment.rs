//! The per-unit type environment.
//!
//! Holds every registered type, function, behavior, class and constant for a
//! compilation unit, plus the import table with its conflict sets. The
//! builtins snapshot is built once per process behind a mutex and cloned into
//! each unit, so registering the built-in behaviors is never repeated.

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use crate::compiler::parser::ast_nodes::Visibility;
use crate::compiler::types::{BehaviorDef, FunctionSig, ImplRecord, Primitive, Type, TypeRef};
use rustc_hash::FxHashMap;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<(String, TypeRef, Visibility)>,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub type_params: Vec<String>,
    /// Declaration order defines the runtime tag of each variant
    pub variants: Vec<(String, Vec<TypeRef>)>,
    pub is_public: bool,
}

impl EnumDef {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|(variant, _)| variant == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Normal,
    Abstract,
    Virtual,
    Override,
    Final,
}

#[derive(Debug, Clone)]
pub struct ClassMethodDef {
    pub kind: MethodKind,
    pub is_static: bool,
    pub visibility: Visibility,
    pub sig: FunctionSig,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub is_abstract: bool,
    pub is_sealed: bool,
    /// Value classes copy as aggregates; reference classes are pointers
    pub is_value: bool,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub fields: Vec<(String, TypeRef, Visibility)>,
    pub methods: Vec<ClassMethodDef>,
    pub is_public: bool,
}

impl ClassDef {
    pub fn method(&self, name: &str) -> Option<&ClassMethodDef> {
        self.methods.iter().find(|method| method.sig.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub extends: Vec<String>,
    pub methods: Vec<FunctionSig>,
}

/// A compile-time constant reduced to a literal value and its type.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
    Char(char),
}

/// Where an imported local name came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOrigin {
    pub module_path: String,
    pub original_name: String,
}

/// Behaviors whose names user code cannot take. These exist in every unit
/// through the builtins snapshot.
pub const RESERVED_BEHAVIORS: &[&str] = &[
    "Duplicate", "Printable", "Eq", "Ord", "Hash", "Default", "From", "Iterator", "Fn", "FnMut",
    "FnOnce", "Drop",
];

#[derive(Debug, Clone, Default)]
pub struct TypeEnvironment {
    pub functions: FxHashMap<String, FunctionSig>,
    pub structs: FxHashMap<String, StructDef>,
    pub enums: FxHashMap<String, EnumDef>,
    pub behaviors: FxHashMap<String, BehaviorDef>,
    pub classes: FxHashMap<String, ClassDef>,
    pub interfaces: FxHashMap<String, InterfaceDef>,
    pub type_aliases: FxHashMap<String, TypeRef>,
    pub constants: FxHashMap<String, (ConstValue, TypeRef)>,
    pub impls: Vec<ImplRecord>,

    /// local name -> origin of the import
    pub imports: FxHashMap<String, ImportOrigin>,
    /// local name -> every conflicting origin; resolving one of these names
    /// is an error listing the sources
    pub import_conflicts: FxHashMap<String, Vec<ImportOrigin>>,
}

impl TypeEnvironment {
    /// A fresh environment pre-populated with the builtins. The builtin
    /// snapshot is constructed at most once per process.
    pub fn snapshot() -> TypeEnvironment {
        static BUILTINS: OnceLock<Mutex<TypeEnvironment>> = OnceLock::new();
        let base = BUILTINS.get_or_init(|| Mutex::new(build_builtins()));
        base.lock()
            .map(|env| env.clone())
            .unwrap_or_else(|_| build_builtins())
    }

    fn check_reserved(name: &str, location: &ErrorLocation) -> Result<(), CompileError> {
        if Primitive::parse(name).is_some() {
            return Err(CompileError::new(
                format!("Cannot redefine primitive type '{name}'"),
                location.clone(),
                ErrorCode::T007,
            ));
        }
        if RESERVED_BEHAVIORS.contains(&name) {
            return Err(CompileError::new(
                format!("Cannot redefine built-in behavior '{name}'"),
                location.clone(),
                ErrorCode::T007,
            ));
        }
        Ok(())
    }

    pub fn register_function(&mut self, sig: FunctionSig) {
        self.functions.insert(sig.name.clone(), sig);
    }

    pub fn register_struct(
        &mut self,
        def: StructDef,
        location: &ErrorLocation,
    ) -> Result<(), CompileError> {
        Self::check_reserved(&def.name, location)?;
        self.structs.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn register_enum(
        &mut self,
        def: EnumDef,
        location: &ErrorLocation,
    ) -> Result<(), CompileError> {
        Self::check_reserved(&def.name, location)?;
        self.enums.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn register_behavior(
        &mut self,
        def: BehaviorDef,
        location: &ErrorLocation,
    ) -> Result<(), CompileError> {
        Self::check_reserved(&def.name, location)?;
        self.behaviors.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn register_class(
        &mut self,
        def: ClassDef,
        location: &ErrorLocation,
    ) -> Result<(), CompileError> {
        Self::check_reserved(&def.name, location)?;
        self.classes.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn register_interface(
        &mut self,
        def: InterfaceDef,
        location: &ErrorLocation,
    ) -> Result<(), CompileError> {
        Self::check_reserved(&def.name, location)?;
        self.interfaces.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn register_type_alias(
        &mut self,
        name: &str,
        target: TypeRef,
        location: &ErrorLocation,
    ) -> Result<(), CompileError> {
        Self::check_reserved(name, location)?;
        self.type_aliases.insert(name.to_string(), target);
        Ok(())
    }

    pub fn register_constant(&mut self, name: &str, value: ConstValue, const_type: TypeRef) {
        self.constants.insert(name.to_string(), (value, const_type));
    }

    /// Records an import. Importing the same (module, name) twice under one
    /// local name is idempotent; importing a DIFFERENT origin under an
    /// existing local name records a conflict surfaced on use.
    pub fn register_import(&mut self, local_name: &str, origin: ImportOrigin) {
        if let Some(existing) = self.imports.get(local_name) {
            if *existing != origin {
                let conflicts = self
                    .import_conflicts
                    .entry(local_name.to_string())
                    .or_insert_with(|| vec![existing.clone()]);
                if !conflicts.contains(&origin) {
                    conflicts.push(origin);
                }
            }
            return;
        }
        self.imports.insert(local_name.to_string(), origin);
    }

    /// Resolves a local name through the import table. A name with a
    /// recorded conflict yields a diagnostic naming every source rather than
    /// silently picking one.
    pub fn resolve_import(
        &self,
        local_name: &str,
        location: &ErrorLocation,
    ) -> Result<Option<&ImportOrigin>, CompileError> {
        if let Some(conflicts) = self.import_conflicts.get(local_name) {
            let sources = conflicts
                .iter()
                .map(|origin| format!("{}::{}", origin.module_path, origin.original_name))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CompileError::new(
                format!("'{local_name}' is ambiguous; it is imported from {sources}"),
                location.clone(),
                ErrorCode::R002,
            )
            .with_note("use an alias (`use path::name as other`) to disambiguate".to_string()));
        }
        Ok(self.imports.get(local_name))
    }

    /// Follows alias chains to the underlying type.
    pub fn resolve_alias(&self, type_ref: &TypeRef) -> TypeRef {
        let mut current = type_ref.clone();
        let mut depth = 0;
        while let Type::Named { name, type_args } = current.as_ref() {
            if !type_args.is_empty() || depth > 32 {
                break;
            }
            match self.type_aliases.get(name) {
                Some(target) => {
                    current = target.clone();
                    depth += 1;
                }
                None => break,
            }
        }
        current
    }
}

fn build_builtins() -> TypeEnvironment {
    let mut env = TypeEnvironment::default();

    let t = || Type::named("T", vec![]);
    let self_type = || Type::named("Self", vec![]);

    env.behaviors.insert(
        "Duplicate".to_string(),
        BehaviorDef {
            name: "Duplicate".to_string(),
            type_params: vec![],
            associated_types: vec![],
            methods: vec![FunctionSig::new(
                "duplicate",
                vec![("self".to_string(), self_type())],
                self_type(),
            )],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    env.behaviors.insert(
        "Printable".to_string(),
        BehaviorDef {
            name: "Printable".to_string(),
            type_params: vec![],
            associated_types: vec![],
            methods: vec![FunctionSig::new(
                "to_string",
                vec![("self".to_string(), self_type())],
                Type::primitive(Primitive::Str),
            )],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    env.behaviors.insert(
        "Eq".to_string(),
        BehaviorDef {
            name: "Eq".to_string(),
            type_params: vec![],
            associated_types: vec![],
            methods: vec![FunctionSig::new(
                "equals",
                vec![
                    ("self".to_string(), self_type()),
                    ("other".to_string(), self_type()),
                ],
                Type::primitive(Primitive::Bool),
            )],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    env.behaviors.insert(
        "Ord".to_string(),
        BehaviorDef {
            name: "Ord".to_string(),
            type_params: vec![],
            associated_types: vec![],
            methods: vec![FunctionSig::new(
                "compare",
                vec![
                    ("self".to_string(), self_type()),
                    ("other".to_string(), self_type()),
                ],
                Type::primitive(Primitive::I32),
            )],
            super_behaviors: vec!["Eq".to_string()],
            methods_with_defaults: vec![],
        },
    );

    env.behaviors.insert(
        "Hash".to_string(),
        BehaviorDef {
            name: "Hash".to_string(),
            type_params: vec![],
            associated_types: vec![],
            methods: vec![FunctionSig::new(
                "hash",
                vec![("self".to_string(), self_type())],
                Type::primitive(Primitive::U64),
            )],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    env.behaviors.insert(
        "Default".to_string(),
        BehaviorDef {
            name: "Default".to_string(),
            type_params: vec![],
            associated_types: vec![],
            methods: vec![FunctionSig::new("default", vec![], self_type())],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    env.behaviors.insert(
        "From".to_string(),
        BehaviorDef {
            name: "From".to_string(),
            type_params: vec!["T".to_string()],
            associated_types: vec![],
            methods: vec![FunctionSig::new(
                "from",
                vec![("value".to_string(), t())],
                self_type(),
            )],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    env.behaviors.insert(
        "Iterator".to_string(),
        BehaviorDef {
            name: "Iterator".to_string(),
            type_params: vec![],
            associated_types: vec!["Item".to_string()],
            methods: vec![FunctionSig::new(
                "next",
                vec![("self".to_string(), self_type())],
                Type::named("Option", vec![Type::named("Item", vec![])]),
            )],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    // The call family backing function and closure receivers
    for (behavior, method) in [("Fn", "call"), ("FnMut", "call_mut"), ("FnOnce", "call_once")] {
        env.behaviors.insert(
            behavior.to_string(),
            BehaviorDef {
                name: behavior.to_string(),
                type_params: vec!["Args".to_string(), "Ret".to_string()],
                associated_types: vec![],
                methods: vec![FunctionSig::new(
                    method,
                    vec![
                        ("self".to_string(), self_type()),
                        ("args".to_string(), Type::named("Args", vec![])),
                    ],
                    Type::named("Ret", vec![]),
                )],
                super_behaviors: vec![],
                methods_with_defaults: vec![],
            },
        );
    }

    env.behaviors.insert(
        "Drop".to_string(),
        BehaviorDef {
            name: "Drop".to_string(),
            type_params: vec![],
            associated_types: vec![],
            methods: vec![FunctionSig::new(
                "drop",
                vec![("self".to_string(), self_type())],
                Type::unit(),
            )],
            super_behaviors: vec![],
            methods_with_defaults: vec![],
        },
    );

    // Builtin function families the compiler recognizes directly: io, mem,
    // atomic, sync, time, math, string, assert, async, plus the bare
    // intrinsics. Codegen intercepts these by name; the signatures here let
    // the checker validate their call sites.
    let str_type = || Type::primitive(Primitive::Str);
    let unit = Type::unit;
    let i64_type = || Type::primitive(Primitive::I64);
    let f64_type = || Type::primitive(Primitive::F64);
    let bool_type = || Type::primitive(Primitive::Bool);
    let byte_ptr = |mutable: bool| {
        std::sync::Arc::new(Type::Pointer {
            target: Type::primitive(Primitive::U8),
            mutable,
        })
    };
    let never = || Type::primitive(Primitive::Never);

    let builtin_sigs: Vec<FunctionSig> = vec![
        FunctionSig::new("println", vec![("message".to_string(), str_type())], unit()),
        FunctionSig::new("print", vec![("message".to_string(), str_type())], unit()),
        FunctionSig::new("eprintln", vec![("message".to_string(), str_type())], unit()),
        FunctionSig::new("read_line", vec![], str_type()),
        FunctionSig::new("alloc", vec![("size".to_string(), i64_type())], byte_ptr(true)),
        FunctionSig::new("free", vec![("pointer".to_string(), byte_ptr(true))], unit()),
        FunctionSig::new(
            "mem_copy",
            vec![
                ("dst".to_string(), byte_ptr(true)),
                ("src".to_string(), byte_ptr(false)),
                ("len".to_string(), i64_type()),
            ],
            unit(),
        ),
        FunctionSig::new(
            "mem_set",
            vec![
                ("dst".to_string(), byte_ptr(true)),
                ("value".to_string(), Type::primitive(Primitive::U8)),
                ("len".to_string(), i64_type()),
            ],
            unit(),
        ),
        FunctionSig::new(
            "atomic_add",
            vec![
                ("target".to_string(), byte_ptr(true)),
                ("value".to_string(), i64_type()),
            ],
            i64_type(),
        ),
        FunctionSig::new(
            "atomic_load",
            vec![("target".to_string(), byte_ptr(false))],
            i64_type(),
        ),
        FunctionSig::new(
            "atomic_store",
            vec![
                ("target".to_string(), byte_ptr(true)),
                ("value".to_string(), i64_type()),
            ],
            unit(),
        ),
        FunctionSig::new("mutex_lock", vec![("mutex".to_string(), byte_ptr(true))], unit()),
        FunctionSig::new("mutex_unlock", vec![("mutex".to_string(), byte_ptr(true))], unit()),
        FunctionSig::new("time_now_ns", vec![], i64_type()),
        FunctionSig::new("sleep_ms", vec![("millis".to_string(), i64_type())], unit()),
        FunctionSig::new("sqrt", vec![("value".to_string(), f64_type())], f64_type()),
        FunctionSig::new(
            "pow",
            vec![
                ("base".to_string(), f64_type()),
                ("exponent".to_string(), f64_type()),
            ],
            f64_type(),
        ),
        FunctionSig::new("floor", vec![("value".to_string(), f64_type())], f64_type()),
        FunctionSig::new("ceil", vec![("value".to_string(), f64_type())], f64_type()),
        FunctionSig::new("str_len", vec![("text".to_string(), str_type())], i64_type()),
        FunctionSig::new(
            "str_concat",
            vec![
                ("left".to_string(), str_type()),
                ("right".to_string(), str_type()),
            ],
            str_type(),
        ),
        FunctionSig::new(
            "str_eq",
            vec![
                ("left".to_string(), str_type()),
                ("right".to_string(), str_type()),
            ],
            bool_type(),
        ),
        FunctionSig::new("assert", vec![("condition".to_string(), bool_type())], unit()),
        FunctionSig::new("panic", vec![("message".to_string(), str_type())], never()),
        FunctionSig::new("unreachable", vec![], never()),
        FunctionSig::new("assume", vec![("condition".to_string(), bool_type())], unit()),
    ];
    for sig in builtin_sigs {
        env.functions.insert(sig.name.clone(), sig);
    }

    // Option and Result ship with the builtins so inference and
    // exhaustiveness work before any library module loads
    env.enums.insert(
        "Option".to_string(),
        EnumDef {
            name: "Option".to_string(),
            type_params: vec!["T".to_string()],
            variants: vec![
                ("None".to_string(), vec![]),
                ("Some".to_string(), vec![t()]),
            ],
            is_public: true,
        },
    );
    env.enums.insert(
        "Result".to_string(),
        EnumDef {
            name: "Result".to_string(),
            type_params: vec!["T".to_string(), "E".to_string()],
            variants: vec![
                ("Ok".to_string(), vec![t()]),
                ("Err".to_string(), vec![Type::named("E", vec![])]),
            ],
            is_public: true,
        },
    );

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_contains_builtins_and_is_isolated() {
        let mut first = TypeEnvironment::snapshot();
        let second = TypeEnvironment::snapshot();
        assert!(first.behaviors.contains_key("Printable"));
        assert!(second.enums.contains_key("Option"));

        first.functions.insert(
            "local_only".to_string(),
            FunctionSig::new("local_only", vec![], Type::unit()),
        );
        let third = TypeEnvironment::snapshot();
        assert!(!third.functions.contains_key("local_only"));
    }

    #[test]
    fn redefining_a_primitive_is_a_hard_error() {
        let mut env = TypeEnvironment::snapshot();
        let result = env.register_struct(
            StructDef {
                name: "I32".to_string(),
                type_params: vec![],
                fields: vec![],
                is_public: true,
            },
            &ErrorLocation::default(),
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::T007);
    }

    #[test]
    fn redefining_a_builtin_behavior_is_a_hard_error() {
        let mut env = TypeEnvironment::snapshot();
        let result = env.register_behavior(
            BehaviorDef {
                name: "Printable".to_string(),
                type_params: vec![],
                associated_types: vec![],
                methods: vec![],
                super_behaviors: vec![],
                methods_with_defaults: vec![],
            },
            &ErrorLocation::default(),
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::T007);
    }

    #[test]
    fn conflicting_imports_error_on_use_not_on_insert() {
        let mut env = TypeEnvironment::default();
        env.register_import(
            "foo",
            ImportOrigin {
                module_path: "a".to_string(),
                original_name: "foo".to_string(),
            },
        );
        env.register_import(
            "foo",
            ImportOrigin {
                module_path: "b".to_string(),
                original_name: "foo".to_string(),
            },
        );

        let error = env
            .resolve_import("foo", &ErrorLocation::default())
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::R002);
        assert!(error.msg.contains("a::foo"));
        assert!(error.msg.contains("b::foo"));
    }

    #[test]
    fn re_importing_the_same_origin_is_idempotent() {
        let mut env = TypeEnvironment::default();
        let origin = ImportOrigin {
            module_path: "a".to_string(),
            original_name: "foo".to_string(),
        };
        env.register_import("foo", origin.clone());
        env.register_import("foo", origin);
        assert!(env.import_conflicts.is_empty());
        assert!(env
            .resolve_import("foo", &ErrorLocation::default())
            .unwrap()
            .is_some());
    }

    #[test]
    fn alias_chains_resolve_to_the_underlying_type() {
        let mut env = TypeEnvironment::default();
        env.type_aliases
            .insert("Bytes".to_string(), type_of("[U8]"));
        env.type_aliases
            .insert("Buffer".to_string(), Type::named("Bytes", vec![]));
        let resolved = env.resolve_alias(&Type::named("Buffer", vec![]));
        assert_eq!(resolved.to_string(), "[U8]");
    }

    fn type_of(text: &str) -> TypeRef {
        crate::compiler::types::type_from_text(text).expect("type should parse")
    }
}
