//! The type checker.
//!
//! Processes a module AST in four phases:
//! 1. imports - `use` declarations resolve through the module loader
//! 2. declaration registration - types, behaviors and classes with OOP rules
//! 3. function signatures - resolved against imports and generics
//! 4. bodies - expression checking with literal coercion, generic inference,
//!    method resolution, exhaustiveness, and move/borrow rules

pub mod exhaustiveness;
pub mod inference;
pub mod oop;
pub mod ownership;

use crate::compiler::checker::inference::{unify, Substitutions};
use crate::compiler::checker::ownership::{
    check_argument_aliasing, is_trivially_duplicable, MoveTracker,
};
use crate::compiler::diagnostics::{
    CompileError, CompilerMessages, ErrorCode, ErrorLocation, ErrorMetaDataKey,
};
use crate::compiler::modules::loader::{build_function_sig, suffix_primitive, ModuleLoader};
use crate::compiler::modules::{Module, ModuleRegistry, ReExport};
use crate::compiler::parser::ast_nodes::*;
use crate::compiler::source::SourceMap;
use crate::compiler::types::environment::{
    ConstValue, EnumDef, ImportOrigin, StructDef, TypeEnvironment,
};
use crate::compiler::types::{
    lower_type_expr, FunctionSig, ImplRecord, Primitive, Type, TypeRef,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Local {
    local_type: TypeRef,
    mutable: bool,
}

pub struct TypeChecker<'a> {
    pub env: TypeEnvironment,
    registry: &'a ModuleRegistry,
    sources: &'a SourceMap,
    scopes: Vec<FxHashMap<String, Local>>,
    moves: MoveTracker,
    /// Type parameters and where-constraints of the function currently
    /// being checked
    current_type_params: Vec<String>,
    current_where: Vec<crate::compiler::types::WhereBound>,
    current_return_type: TypeRef,
    errors: Vec<CompileError>,
}

/// Runs all four phases over one module AST. Errors accumulate in
/// `messages`; the returned environment feeds codegen.
pub fn check_module(
    ast: &ModuleAst,
    loader: &mut ModuleLoader,
    registry: &mut ModuleRegistry,
    sources: &mut SourceMap,
    messages: &mut CompilerMessages,
) -> TypeEnvironment {
    let mut env = TypeEnvironment::snapshot();

    // Phase 1: imports
    for decl in &ast.decls {
        if let Decl::Use(use_decl) = decl {
            register_use(use_decl, loader, registry, sources, &mut env, messages);
        }
    }

    // Phase 2: declarations
    register_declarations(ast, &mut env, messages, sources);

    // Phase 3: signatures
    register_signatures(ast, &mut env);

    // Phase 4: bodies
    let mut checker = TypeChecker {
        env,
        registry,
        sources,
        scopes: Vec::new(),
        moves: MoveTracker::new(),
        current_type_params: Vec::new(),
        current_where: Vec::new(),
        current_return_type: Type::unit(),
        errors: Vec::new(),
    };
    checker.check_bodies(ast);
    messages.errors.extend(std::mem::take(&mut checker.errors));
    checker.env
}

fn register_use(
    use_decl: &UseDecl,
    loader: &mut ModuleLoader,
    registry: &mut ModuleRegistry,
    sources: &mut SourceMap,
    env: &mut TypeEnvironment,
    messages: &mut CompilerMessages,
) {
    let module_path = use_decl.module_path.join("::");
    if let Err(error) = loader.load(&module_path, registry, sources, messages, false) {
        messages.errors.push(error);
        return;
    }
    let Some(module) = registry.get(&module_path) else {
        return;
    };

    match &use_decl.target {
        UseTarget::Single { name, alias } => {
            let local = alias.as_deref().unwrap_or(name);
            env.register_import(
                local,
                ImportOrigin {
                    module_path: module_path.clone(),
                    original_name: name.clone(),
                },
            );
            import_symbol(env, &module, registry, name, local);
        }
        UseTarget::List(symbols) => {
            for (name, alias) in symbols {
                let local = alias.as_deref().unwrap_or(name);
                env.register_import(
                    local,
                    ImportOrigin {
                        module_path: module_path.clone(),
                        original_name: name.clone(),
                    },
                );
                import_symbol(env, &module, registry, name, local);
            }
        }
        UseTarget::Glob => {
            import_glob(env, &module, registry, &mut Vec::new());
        }
    }
}

/// Glob import: every exported symbol, recursing through glob re-exports.
/// `visited` breaks re-export cycles.
fn import_glob(
    env: &mut TypeEnvironment,
    module: &Arc<Module>,
    registry: &ModuleRegistry,
    visited: &mut Vec<String>,
) {
    if visited.contains(&module.path) {
        return;
    }
    visited.push(module.path.clone());

    for name in module.exported_names() {
        env.register_import(
            &name,
            ImportOrigin {
                module_path: module.path.clone(),
                original_name: name.clone(),
            },
        );
        import_symbol(env, module, registry, &name, &name);
    }

    for re_export in &module.re_exports {
        match re_export {
            ReExport::Glob { module_path } => {
                if let Some(target) = registry.get(module_path) {
                    import_glob(env, &target, registry, visited);
                }
            }
            ReExport::Symbols {
                module_path,
                symbols,
            } => {
                if let Some(target) = registry.get(module_path) {
                    for (name, alias) in symbols {
                        let local = alias.as_deref().unwrap_or(name);
                        import_symbol(env, &target, registry, name, local);
                    }
                }
            }
            ReExport::Single {
                module_path,
                name,
                alias,
            } => {
                if let Some(target) = registry.get(module_path) {
                    let local = alias.as_deref().unwrap_or(name);
                    import_symbol(env, &target, registry, name, local);
                }
            }
        }
    }
}

/// Copies one symbol's definition from a module into the unit environment
/// under `local`. Re-exports of the symbol are chased through the registry.
fn import_symbol(
    env: &mut TypeEnvironment,
    module: &Arc<Module>,
    registry: &ModuleRegistry,
    name: &str,
    local: &str,
) {
    if let Some(sig) = module.functions.get(name) {
        let mut sig = sig.clone();
        sig.name = local.to_string();
        env.functions.insert(local.to_string(), sig);
        return;
    }
    if let Some(def) = module.structs.get(name) {
        env.structs.insert(local.to_string(), def.clone());
        // Methods travel with the type
        copy_qualified_methods(env, module, name);
        return;
    }
    if let Some(def) = module.enums.get(name) {
        env.enums.insert(local.to_string(), def.clone());
        copy_qualified_methods(env, module, name);
        return;
    }
    if let Some(def) = module.behaviors.get(name) {
        env.behaviors.insert(local.to_string(), def.clone());
        return;
    }
    if let Some(def) = module.classes.get(name) {
        env.classes.insert(local.to_string(), def.clone());
        copy_qualified_methods(env, module, name);
        return;
    }
    if let Some(def) = module.interfaces.get(name) {
        env.interfaces.insert(local.to_string(), def.clone());
        return;
    }
    if let Some(target) = module.type_aliases.get(name) {
        env.type_aliases.insert(local.to_string(), target.clone());
        return;
    }
    if let Some((value, const_type)) = module.constants.get(name) {
        env.constants
            .insert(local.to_string(), (value.clone(), const_type.clone()));
        return;
    }

    // The symbol may come from a re-export of this module
    for re_export in &module.re_exports {
        let target_module = registry.get(re_export.module_path());
        let Some(target_module) = target_module else {
            continue;
        };
        match re_export {
            ReExport::Glob { .. } => {
                import_symbol(env, &target_module, registry, name, local);
            }
            ReExport::Symbols { symbols, .. } => {
                for (symbol, alias) in symbols {
                    let visible = alias.as_deref().unwrap_or(symbol);
                    if visible == name {
                        import_symbol(env, &target_module, registry, symbol, local);
                    }
                }
            }
            ReExport::Single {
                name: symbol,
                alias,
                ..
            } => {
                let visible = alias.as_deref().unwrap_or(symbol);
                if visible == name {
                    import_symbol(env, &target_module, registry, symbol, local);
                }
            }
        }
    }
}

fn copy_qualified_methods(env: &mut TypeEnvironment, module: &Arc<Module>, type_name: &str) {
    let prefix = format!("{type_name}::");
    for (qualified, sig) in &module.functions {
        if qualified.starts_with(&prefix) {
            env.functions.insert(qualified.clone(), sig.clone());
        }
    }
    for impl_record in &module.behavior_impls {
        if impl_record.target_type_name == type_name && !env.impls.contains(impl_record) {
            env.impls.push(impl_record.clone());
        }
    }
}

fn register_declarations(
    ast: &ModuleAst,
    env: &mut TypeEnvironment,
    messages: &mut CompilerMessages,
    sources: &SourceMap,
) {
    for decl in &ast.decls {
        let location = decl.location().to_error_location(sources);
        let result = match decl {
            Decl::Struct(decl) => env.register_struct(
                StructDef {
                    name: decl.name.clone(),
                    type_params: decl.type_params.clone(),
                    fields: decl
                        .fields
                        .iter()
                        .map(|field| {
                            (
                                field.name.clone(),
                                lower_type_expr(&field.type_expr),
                                field.visibility,
                            )
                        })
                        .collect(),
                    is_public: decl.visibility == Visibility::Public,
                },
                &location,
            ),
            Decl::Enum(decl) => env.register_enum(
                EnumDef {
                    name: decl.name.clone(),
                    type_params: decl.type_params.clone(),
                    variants: decl
                        .variants
                        .iter()
                        .map(|variant| {
                            (
                                variant.name.clone(),
                                variant.payload.iter().map(lower_type_expr).collect(),
                            )
                        })
                        .collect(),
                    is_public: decl.visibility == Visibility::Public,
                },
                &location,
            ),
            Decl::Behavior(decl) => {
                let methods_with_defaults = decl
                    .methods
                    .iter()
                    .filter(|method| method.body.is_some())
                    .map(|method| method.name.clone())
                    .collect();
                env.register_behavior(
                    crate::compiler::types::BehaviorDef {
                        name: decl.name.clone(),
                        type_params: decl.type_params.clone(),
                        associated_types: decl.associated_types.clone(),
                        methods: decl
                            .methods
                            .iter()
                            .map(|method| build_function_sig(method, None))
                            .collect(),
                        super_behaviors: decl.super_behaviors.clone(),
                        methods_with_defaults,
                    },
                    &location,
                )
            }
            Decl::Class(decl) => {
                let def = class_def_from_ast(decl);
                let result = env.register_class(def, &location);
                if result.is_ok() {
                    let def = &env.classes[&decl.name];
                    messages
                        .errors
                        .extend(oop::validate_class(def, env, &location));
                }
                result
            }
            Decl::Interface(decl) => env.register_interface(
                crate::compiler::types::environment::InterfaceDef {
                    name: decl.name.clone(),
                    type_params: decl.type_params.clone(),
                    extends: decl.extends.clone(),
                    methods: decl
                        .methods
                        .iter()
                        .map(|method| build_function_sig(method, None))
                        .collect(),
                },
                &location,
            ),
            Decl::TypeAlias(decl) => {
                env.register_type_alias(&decl.name, lower_type_expr(&decl.target), &location)
            }
            Decl::Const(decl) => {
                if let Some((value, const_type)) = const_value_from_ast(decl) {
                    env.register_constant(&decl.name, value, const_type);
                }
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(error) = result {
            messages.errors.push(error);
        }
    }
}

fn class_def_from_ast(decl: &ClassDecl) -> crate::compiler::types::environment::ClassDef {
    use crate::compiler::types::environment::{ClassMethodDef, MethodKind};
    crate::compiler::types::environment::ClassDef {
        name: decl.name.clone(),
        type_params: decl.type_params.clone(),
        is_abstract: decl.is_abstract,
        is_sealed: decl.is_sealed,
        is_value: decl.is_value,
        extends: decl.extends.clone(),
        implements: decl.implements.clone(),
        fields: decl
            .fields
            .iter()
            .map(|field| {
                (
                    field.name.clone(),
                    lower_type_expr(&field.type_expr),
                    field.visibility,
                )
            })
            .collect(),
        methods: decl
            .methods
            .iter()
            .map(|method| ClassMethodDef {
                kind: match method.modifier {
                    MethodModifier::None => MethodKind::Normal,
                    MethodModifier::Abstract => MethodKind::Abstract,
                    MethodModifier::Virtual => MethodKind::Virtual,
                    MethodModifier::Override => MethodKind::Override,
                    MethodModifier::Final => MethodKind::Final,
                },
                is_static: method.is_static,
                visibility: method.func.visibility,
                sig: build_function_sig(&method.func, Some(&decl.name)),
            })
            .collect(),
        is_public: decl.visibility == Visibility::Public,
    }
}

fn const_value_from_ast(decl: &ConstDecl) -> Option<(ConstValue, TypeRef)> {
    let declared = decl.type_expr.as_ref().map(lower_type_expr);
    match &decl.value {
        Expr::Literal(Literal::Int(value, suffix), _) => Some((
            ConstValue::Int(*value),
            declared.unwrap_or_else(|| {
                Type::primitive(suffix.map(suffix_primitive).unwrap_or(Primitive::I32))
            }),
        )),
        Expr::Literal(Literal::Float(value, _), _) => Some((
            ConstValue::Float(*value),
            declared.unwrap_or_else(|| Type::primitive(Primitive::F64)),
        )),
        Expr::Literal(Literal::Bool(value), _) => Some((
            ConstValue::Bool(*value),
            declared.unwrap_or_else(|| Type::primitive(Primitive::Bool)),
        )),
        Expr::Literal(Literal::Str(value), _) => Some((
            ConstValue::Str(value.clone()),
            declared.unwrap_or_else(|| Type::primitive(Primitive::Str)),
        )),
        Expr::Literal(Literal::Char(value), _) => Some((
            ConstValue::Char(*value),
            declared.unwrap_or_else(|| Type::primitive(Primitive::Char)),
        )),
        _ => None,
    }
}

fn register_signatures(ast: &ModuleAst, env: &mut TypeEnvironment) {
    for decl in &ast.decls {
        match decl {
            Decl::Function(func) => {
                env.register_function(build_function_sig(func, None));
            }
            Decl::Impl(impl_decl) => {
                let target_name = match &impl_decl.target {
                    TypeExpr::Named { name, .. } => name.clone(),
                    _ => continue,
                };
                env.impls.push(ImplRecord {
                    target_type_name: target_name.clone(),
                    behavior_name: impl_decl.behavior.clone(),
                });
                for method in &impl_decl.methods {
                    let mut sig = build_function_sig(method, Some(&target_name));
                    let mut combined = impl_decl.type_params.clone();
                    combined.extend(sig.type_params.iter().cloned());
                    sig.type_params = combined;
                    env.functions
                        .insert(format!("{target_name}::{}", method.name), sig);
                }
            }
            Decl::Class(class_decl) => {
                for method in &class_decl.methods {
                    let sig = build_function_sig(&method.func, Some(&class_decl.name));
                    env.functions
                        .insert(format!("{}::{}", class_decl.name, method.func.name), sig);
                }
            }
            Decl::Extern(block) => {
                for extern_func in &block.functions {
                    let mut sig = FunctionSig::new(
                        extern_func.name.clone(),
                        extern_func
                            .params
                            .iter()
                            .map(|param| (param.name.clone(), lower_type_expr(&param.type_expr)))
                            .collect(),
                        extern_func
                            .return_type
                            .as_ref()
                            .map(lower_type_expr)
                            .unwrap_or_else(Type::unit),
                    );
                    sig.extern_abi = Some(block.abi.clone());
                    sig.extern_name = extern_func.extern_name.clone();
                    env.register_function(sig);
                }
            }
            _ => {}
        }
    }
}

impl<'a> TypeChecker<'a> {
    fn check_bodies(&mut self, ast: &ModuleAst) {
        for decl in &ast.decls {
            match decl {
                Decl::Function(func) => self.check_function(func, None),
                Decl::Impl(impl_decl) => {
                    let target_name = match &impl_decl.target {
                        TypeExpr::Named { name, .. } => Some(name.clone()),
                        _ => None,
                    };
                    for method in &impl_decl.methods {
                        self.check_function(method, target_name.as_deref());
                    }
                }
                Decl::Class(class_decl) => {
                    for method in &class_decl.methods {
                        if method.modifier != MethodModifier::Abstract {
                            self.check_function(&method.func, Some(&class_decl.name));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn error_location(&self, location: &crate::compiler::source::TextLocation) -> ErrorLocation {
        location.to_error_location(self.sources)
    }

    fn check_function(&mut self, func: &FunctionDecl, self_type: Option<&str>) {
        let Some(body) = &func.body else {
            return;
        };

        self.scopes.clear();
        self.scopes.push(FxHashMap::default());
        self.moves = MoveTracker::new();
        self.current_type_params = func.type_params.clone();
        self.current_where = func
            .where_constraints
            .iter()
            .map(|constraint| crate::compiler::types::WhereBound {
                type_param: constraint.type_param.clone(),
                required_behaviors: constraint.required_behaviors.clone(),
                parameterized_bounds: constraint
                    .parameterized_bounds
                    .iter()
                    .map(|(behavior, args)| {
                        (behavior.clone(), args.iter().map(lower_type_expr).collect())
                    })
                    .collect(),
            })
            .collect();

        let self_subs = self_type
            .map(|name| vec![("Self".to_string(), Type::named(name, vec![]))])
            .unwrap_or_default();

        for param in &func.params {
            let param_type = lower_type_expr(&param.type_expr).substitute(&self_subs);
            self.declare(&param.name, param_type, param.is_mut);
        }

        self.current_return_type = func
            .return_type
            .as_ref()
            .map(lower_type_expr)
            .map(|return_type| return_type.substitute(&self_subs))
            .unwrap_or_else(Type::unit);

        self.check_block(body);
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, local_type: TypeRef, mutable: bool) {
        self.moves.mark_reinitialized(name);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.to_string(),
                Local {
                    local_type,
                    mutable,
                },
            );
        }
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn check_block(&mut self, block: &Block) {
        self.scopes.push(FxHashMap::default());
        for stmt in &block.statements {
            self.check_statement(stmt);
        }
        self.scopes.pop();
    }

    fn check_statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let {
                pattern,
                type_expr,
                value,
                ..
            } => {
                let expected = type_expr.as_ref().map(lower_type_expr);
                let value_type = self.check_expr(value, expected.as_ref());
                if let Some(expected) = &expected {
                    self.require_type(&value_type, expected, &value.location());
                }
                let bound_type = expected.unwrap_or(value_type);
                self.bind_pattern(pattern, &bound_type);
            }
            Stmt::Assign {
                target, op: _, value, ..
            } => {
                let target_type = self.check_expr(target, None);
                self.check_expr(value, Some(&target_type));
                if let Expr::Identifier(name, location) = target {
                    let location = self.error_location(location);
                    match self.lookup(name) {
                        Some(local) if !local.mutable => {
                            self.errors.push(CompileError::new(
                                format!("Cannot assign to immutable binding '{name}'"),
                                location,
                                ErrorCode::B002,
                            ));
                        }
                        _ => {}
                    }
                    self.moves.mark_reinitialized(name);
                }
            }
            Stmt::Expr(expr) => {
                self.check_expr(expr, None);
            }
            Stmt::Return { value, location } => {
                let expected = self.current_return_type.clone();
                match value {
                    Some(value) => {
                        let found = self.check_expr(value, Some(&expected));
                        self.require_type(&found, &expected, &value.location());
                    }
                    None => {
                        if !expected.is_unit() {
                            self.errors.push(
                                CompileError::new(
                                    format!("Function returns {expected} but this return has no value"),
                                    self.error_location(location),
                                    ErrorCode::T001,
                                )
                                .with_metadata(
                                    ErrorMetaDataKey::ExpectedType,
                                    expected.to_string(),
                                ),
                            );
                        }
                    }
                }
            }
            Stmt::Break { .. } | Stmt::Continue { .. } => {}
            Stmt::While {
                condition, body, ..
            } => {
                self.expect_bool(condition);
                self.check_block(body);
            }
            Stmt::Loop { body, .. } => self.check_block(body),
            Stmt::For {
                pattern,
                iterable,
                body,
                ..
            } => {
                let iterable_type = self.check_expr(iterable, None);
                let element = element_type_of(&iterable_type);
                self.scopes.push(FxHashMap::default());
                self.bind_pattern(pattern, &element);
                for stmt in &body.statements {
                    self.check_statement(stmt);
                }
                self.scopes.pop();
            }
        }
    }

    /// Structural equality check modulo aliases. Types still carrying
    /// unresolved variables are tolerated; inference diagnostics cover them.
    fn require_type(
        &mut self,
        found: &TypeRef,
        expected: &TypeRef,
        location: &crate::compiler::source::TextLocation,
    ) {
        let found = self.env.resolve_alias(found);
        let expected = self.env.resolve_alias(expected);
        if *found == *expected || found.is_never() {
            return;
        }
        if contains_type_var(&found) || contains_type_var(&expected) {
            return;
        }
        self.errors.push(
            CompileError::new(
                format!("Type mismatch: expected {expected}, found {found}"),
                self.error_location(location),
                ErrorCode::T001,
            )
            .with_metadata(ErrorMetaDataKey::ExpectedType, expected.to_string())
            .with_metadata(ErrorMetaDataKey::FoundType, found.to_string()),
        );
    }

    fn expect_bool(&mut self, condition: &Expr) {
        let expected = Type::primitive(Primitive::Bool);
        let found = self.check_expr(condition, Some(&expected));
        if *found != *expected && !found.is_never() {
            self.errors.push(
                CompileError::new(
                    format!("Condition must be Bool, found {found}"),
                    self.error_location(&condition.location()),
                    ErrorCode::T001,
                )
                .with_metadata(ErrorMetaDataKey::ExpectedType, "Bool")
                .with_metadata(ErrorMetaDataKey::FoundType, found.to_string()),
            );
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value_type: &TypeRef) {
        match pattern {
            Pattern::Binding { name, mutable, .. } => {
                self.declare(name, value_type.clone(), *mutable);
            }
            Pattern::Wildcard(_) | Pattern::Literal(..) => {}
            Pattern::Tuple(members, location) => {
                if let Type::Tuple(member_types) = value_type.as_ref() {
                    if member_types.len() == members.len() {
                        for (member, member_type) in members.iter().zip(member_types) {
                            self.bind_pattern(member, member_type);
                        }
                        return;
                    }
                }
                self.errors.push(CompileError::new(
                    format!("Tuple pattern does not match {value_type}"),
                    self.error_location(location),
                    ErrorCode::T001,
                ));
            }
            Pattern::Struct {
                type_name,
                fields,
                location,
            } => {
                let def = self.env.structs.get(type_name).cloned();
                match def {
                    Some(def) => {
                        for (field_name, field_pattern) in fields {
                            match def.fields.iter().find(|(name, ..)| name == field_name) {
                                Some((_, field_type, _)) => {
                                    self.bind_pattern(field_pattern, &field_type.clone());
                                }
                                None => self.errors.push(CompileError::new(
                                    format!("'{type_name}' has no field '{field_name}'"),
                                    self.error_location(location),
                                    ErrorCode::T002,
                                )),
                            }
                        }
                    }
                    None => self.errors.push(CompileError::new(
                        format!("Unknown struct '{type_name}' in pattern"),
                        self.error_location(location),
                        ErrorCode::T002,
                    )),
                }
            }
            Pattern::EnumVariant {
                enum_name,
                variant,
                payload,
                location,
            } => {
                let scrutinee_enum = match value_type.as_ref() {
                    Type::Named { name, type_args } => self
                        .env
                        .enums
                        .get(name)
                        .cloned()
                        .map(|def| (def, type_args.clone())),
                    _ => enum_name
                        .as_ref()
                        .and_then(|name| self.env.enums.get(name))
                        .cloned()
                        .map(|def| (def, vec![])),
                };
                let Some((def, type_args)) = scrutinee_enum else {
                    return;
                };
                let Some(index) = def.variant_index(variant) else {
                    // Exhaustiveness checking reports unknown variants
                    return;
                };
                let subs: Vec<(String, TypeRef)> = def
                    .type_params
                    .iter()
                    .cloned()
                    .zip(type_args.iter().cloned())
                    .collect();
                let (_, payload_types) = &def.variants[index];
                if payload_types.len() != payload.len() {
                    self.errors.push(CompileError::new(
                        format!(
                            "Variant '{variant}' has {} field(s), pattern has {}",
                            payload_types.len(),
                            payload.len()
                        ),
                        self.error_location(location),
                        ErrorCode::T005,
                    ));
                    return;
                }
                for (member, member_type) in payload.iter().zip(payload_types) {
                    self.bind_pattern(member, &member_type.substitute(&subs));
                }
            }
        }
    }

    // ---------------------------------
    //           Expressions
    // ---------------------------------

    fn check_expr(&mut self, expr: &Expr, expected: Option<&TypeRef>) -> TypeRef {
        match expr {
            Expr::Literal(literal, _) => self.literal_type(literal, expected),
            Expr::InterpolatedString(parts, _) => {
                for part in parts {
                    if let InterpolatedPart::Expr(inner) = part {
                        self.check_expr(inner, None);
                    }
                }
                Type::primitive(Primitive::Str)
            }
            Expr::Identifier(name, location) => self.check_identifier(name, location),
            Expr::Path {
                segments,
                type_args,
                location,
            } => self.check_path(segments, type_args, location, expected),
            Expr::Binary {
                op,
                lhs,
                rhs,
                location,
            } => self.check_binary(*op, lhs, rhs, location),
            Expr::Unary {
                op,
                operand,
                location,
            } => self.check_unary(*op, operand, location),
            Expr::Call {
                callee,
                args,
                location,
            } => self.check_call(callee, args, location, expected),
            Expr::MethodCall {
                receiver,
                method,
                args,
                location,
                ..
            } => self.check_method_call(receiver, method, args, location),
            Expr::Field {
                receiver,
                field,
                location,
            } => self.check_field(receiver, field, location),
            Expr::Index {
                receiver,
                index,
                location,
            } => {
                let receiver_type = self.check_expr(receiver, None);
                self.check_expr(index, Some(&Type::primitive(Primitive::Usize)));
                match self.env.resolve_alias(&receiver_type).as_ref() {
                    Type::Slice(element) | Type::Array { element, .. } => element.clone(),
                    Type::Named { name, type_args } if name == "List" && type_args.len() == 1 => {
                        type_args[0].clone()
                    }
                    other => {
                        if !other.is_never() {
                            self.errors.push(CompileError::new(
                                format!("Cannot index into {receiver_type}"),
                                self.error_location(location),
                                ErrorCode::T001,
                            ));
                        }
                        Type::primitive(Primitive::Never)
                    }
                }
            }
            Expr::Tuple(members, _) => {
                let expected_members: Option<&Vec<TypeRef>> =
                    expected.and_then(|expected| match expected.as_ref() {
                        Type::Tuple(members) => Some(members),
                        _ => None,
                    });
                let member_types = members
                    .iter()
                    .enumerate()
                    .map(|(index, member)| {
                        let hint = expected_members.and_then(|members| members.get(index));
                        self.check_expr(member, hint)
                    })
                    .collect();
                Arc::new(Type::Tuple(member_types))
            }
            Expr::Array(elements, _) => {
                let element_hint = expected.and_then(|expected| match expected.as_ref() {
                    Type::Array { element, .. } | Type::Slice(element) => Some(element.clone()),
                    _ => None,
                });
                let mut element_type = element_hint.clone();
                for element in elements {
                    let found = self.check_expr(element, element_type.as_ref());
                    if element_type.is_none() {
                        element_type = Some(found);
                    }
                }
                Arc::new(Type::Array {
                    element: element_type.unwrap_or_else(Type::unit),
                    size: elements.len() as u64,
                })
            }
            Expr::ArrayRepeat { value, count, .. } => {
                let element_hint = expected.and_then(|expected| match expected.as_ref() {
                    Type::Array { element, .. } | Type::Slice(element) => Some(element.clone()),
                    _ => None,
                });
                let element = self.check_expr(value, element_hint.as_ref());
                self.check_expr(count, Some(&Type::primitive(Primitive::Usize)));
                let size = match count.as_ref() {
                    Expr::Literal(Literal::Int(size, _), _) if *size >= 0 => *size as u64,
                    _ => 0,
                };
                Arc::new(Type::Array { element, size })
            }
            Expr::StructLiteral {
                type_name,
                type_args,
                fields,
                location,
            } => self.check_struct_literal(type_name, type_args, fields, location, expected),
            Expr::Block(block) => {
                self.check_block(block);
                Type::unit()
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.expect_bool(condition);
                self.check_block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.check_expr(else_branch, expected);
                }
                expected.cloned().unwrap_or_else(Type::unit)
            }
            Expr::When {
                scrutinee,
                arms,
                location,
            } => self.check_when(scrutinee, arms, location, expected),
            Expr::Closure {
                params,
                return_type,
                body,
                ..
            } => {
                self.scopes.push(FxHashMap::default());
                let mut param_types = Vec::new();
                for param in params {
                    let param_type = lower_type_expr(&param.type_expr);
                    self.declare(&param.name, param_type.clone(), param.is_mut);
                    param_types.push(param_type);
                }
                let declared_return = return_type.as_ref().map(lower_type_expr);
                let body_type = self.check_expr(body, declared_return.as_ref());
                self.scopes.pop();
                Arc::new(Type::Closure {
                    params: param_types,
                    return_type: declared_return.unwrap_or(body_type),
                    captures: Vec::new(),
                })
            }
            Expr::Try(inner, location) => {
                let inner_type = self.check_expr(inner, None);
                match inner_type.as_ref() {
                    Type::Named { name, type_args }
                        if (name == "Result" || name == "Option") && !type_args.is_empty() =>
                    {
                        type_args[0].clone()
                    }
                    other => {
                        if !other.is_never() {
                            self.errors.push(CompileError::new(
                                format!("'?' requires a Result or Option, found {inner_type}"),
                                self.error_location(location),
                                ErrorCode::T001,
                            ));
                        }
                        Type::primitive(Primitive::Never)
                    }
                }
            }
            Expr::Range { start, end, .. } => {
                let mut element = Type::primitive(Primitive::I64);
                if let Some(start) = start {
                    element = self.check_expr(start, None);
                }
                if let Some(end) = end {
                    self.check_expr(end, Some(&element));
                }
                Type::named("Range", vec![element])
            }
            Expr::Cast { value, target, .. } => {
                self.check_expr(value, None);
                lower_type_expr(target)
            }
            Expr::Await(inner, _) => {
                let inner_type = self.check_expr(inner, None);
                match inner_type.as_ref() {
                    Type::Named { name, type_args }
                        if name == "Future" && type_args.len() == 1 =>
                    {
                        type_args[0].clone()
                    }
                    _ => inner_type,
                }
            }
        }
    }

    /// Literal coercion: an unsuffixed literal takes the expected numeric
    /// type when one is in context, otherwise its default (I32 / F64).
    fn literal_type(&mut self, literal: &Literal, expected: Option<&TypeRef>) -> TypeRef {
        match literal {
            Literal::Int(_, Some(suffix)) => Type::primitive(suffix_primitive(*suffix)),
            Literal::Int(_, None) => {
                if let Some(expected) = expected {
                    if let Some(primitive) = expected.as_primitive() {
                        if primitive.is_integer() || primitive.is_float() {
                            return expected.clone();
                        }
                    }
                }
                Type::primitive(Primitive::I32)
            }
            Literal::Float(_, Some(suffix)) => Type::primitive(suffix_primitive(*suffix)),
            Literal::Float(_, None) => {
                if let Some(expected) = expected {
                    if expected.as_primitive().map(|p| p.is_float()).unwrap_or(false) {
                        return expected.clone();
                    }
                }
                Type::primitive(Primitive::F64)
            }
            Literal::Bool(_) => Type::primitive(Primitive::Bool),
            Literal::Char(_) => Type::primitive(Primitive::Char),
            Literal::Str(_) => Type::primitive(Primitive::Str),
            Literal::Unit => Type::unit(),
        }
    }

    fn check_identifier(
        &mut self,
        name: &str,
        location: &crate::compiler::source::TextLocation,
    ) -> TypeRef {
        let error_location = self.error_location(location);

        if let Some(local) = self.lookup(name) {
            let local_type = local.local_type.clone();
            if let Some(error) = self.moves.check_use(name, &error_location) {
                self.errors.push(error);
            }
            return local_type;
        }

        if let Some((_, const_type)) = self.env.constants.get(name) {
            return const_type.clone();
        }

        // A bare function name is a function value
        if let Some(sig) = self.env.functions.get(name) {
            return Arc::new(Type::Function {
                params: sig.params.iter().map(|(_, t)| t.clone()).collect(),
                return_type: sig.return_type.clone(),
                varargs: false,
            });
        }

        // Imported but unresolvable names surface conflicts here
        match self.env.resolve_import(name, &error_location) {
            Err(error) => {
                self.errors.push(error);
                return Type::primitive(Primitive::Never);
            }
            Ok(Some(origin)) => {
                let qualified = format!("{}::{}", origin.module_path, origin.original_name);
                if let Some((_, sig)) = self.registry.find_function(&qualified) {
                    return Arc::new(Type::Function {
                        params: sig.params.iter().map(|(_, t)| t.clone()).collect(),
                        return_type: sig.return_type.clone(),
                        varargs: false,
                    });
                }
            }
            Ok(None) => {}
        }

        self.errors.push(
            CompileError::new(
                format!("Unknown identifier '{name}'"),
                error_location,
                ErrorCode::T002,
            )
            .with_metadata(ErrorMetaDataKey::VariableName, name),
        );
        Type::primitive(Primitive::Never)
    }

    fn check_path(
        &mut self,
        segments: &[String],
        _type_args: &[TypeExpr],
        location: &crate::compiler::source::TextLocation,
        expected: Option<&TypeRef>,
    ) -> TypeRef {
        let error_location = self.error_location(location);
        if segments.len() == 1 {
            return self.check_identifier(&segments[0], location);
        }

        // Primitive constant path `I32::MAX`
        if segments.len() == 2 {
            if let Some(primitive) = Primitive::parse(&segments[0]) {
                if matches!(segments[1].as_str(), "MAX" | "MIN") && primitive.is_integer() {
                    return Type::primitive(primitive);
                }
            }
        }

        // Enum constant path `Color::Red`
        if segments.len() == 2 {
            if let Some(def) = self.env.enums.get(&segments[0]).cloned() {
                if def.variant_index(&segments[1]).is_some() {
                    return self.enum_type_for(&def, expected);
                }
            }
            // Qualified constant or function `Type::item` / `module::item`
            let qualified = segments.join("::");
            if let Some(sig) = self.env.functions.get(&qualified) {
                return Arc::new(Type::Function {
                    params: sig.params.iter().map(|(_, t)| t.clone()).collect(),
                    return_type: sig.return_type.clone(),
                    varargs: false,
                });
            }
            if let Some((_, sig)) = self.registry.find_function(&qualified) {
                return Arc::new(Type::Function {
                    params: sig.params.iter().map(|(_, t)| t.clone()).collect(),
                    return_type: sig.return_type.clone(),
                    varargs: false,
                });
            }
        }

        let qualified = segments.join("::");
        if let Some((_, sig)) = self.registry.find_function(&qualified) {
            return Arc::new(Type::Function {
                params: sig.params.iter().map(|(_, t)| t.clone()).collect(),
                return_type: sig.return_type.clone(),
                varargs: false,
            });
        }

        self.errors.push(CompileError::new(
            format!("Unknown path '{qualified}'"),
            error_location,
            ErrorCode::T002,
        ));
        Type::primitive(Primitive::Never)
    }

    fn enum_type_for(&self, def: &EnumDef, expected: Option<&TypeRef>) -> TypeRef {
        if def.type_params.is_empty() {
            return Type::named(def.name.clone(), vec![]);
        }
        // Generic enum: take type args from the expected type when available
        if let Some(expected) = expected {
            if let Type::Named { name, type_args } = expected.as_ref() {
                if *name == def.name && type_args.len() == def.type_params.len() {
                    return expected.clone();
                }
            }
        }
        Type::named(
            def.name.clone(),
            def.type_params
                .iter()
                .map(|param| Arc::new(Type::TypeVar(param.clone())))
                .collect(),
        )
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        location: &crate::compiler::source::TextLocation,
    ) -> TypeRef {
        let lhs_type = self.check_expr(lhs, None);
        let rhs_type = self.check_expr(rhs, Some(&lhs_type));

        match op {
            BinaryOp::And | BinaryOp::Or => {
                let bool_type = Type::primitive(Primitive::Bool);
                if *lhs_type != *bool_type || *rhs_type != *bool_type {
                    self.errors.push(CompileError::new(
                        "Logical operators require Bool operands",
                        self.error_location(location),
                        ErrorCode::T001,
                    ));
                }
                bool_type
            }
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::LtEq
            | BinaryOp::GtEq => {
                if *lhs_type != *rhs_type && !lhs_type.is_never() && !rhs_type.is_never() {
                    self.errors.push(
                        CompileError::new(
                            format!("Cannot compare {lhs_type} with {rhs_type}"),
                            self.error_location(location),
                            ErrorCode::T001,
                        )
                        .with_metadata(ErrorMetaDataKey::ExpectedType, lhs_type.to_string())
                        .with_metadata(ErrorMetaDataKey::FoundType, rhs_type.to_string()),
                    );
                }
                Type::primitive(Primitive::Bool)
            }
            _ => {
                if *lhs_type != *rhs_type && !lhs_type.is_never() && !rhs_type.is_never() {
                    self.errors.push(
                        CompileError::new(
                            format!("Mismatched operand types: {lhs_type} and {rhs_type}"),
                            self.error_location(location),
                            ErrorCode::T001,
                        )
                        .with_metadata(ErrorMetaDataKey::ExpectedType, lhs_type.to_string())
                        .with_metadata(ErrorMetaDataKey::FoundType, rhs_type.to_string()),
                    );
                }
                lhs_type
            }
        }
    }

    fn check_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        location: &crate::compiler::source::TextLocation,
    ) -> TypeRef {
        match op {
            UnaryOp::Neg => {
                let operand_type = self.check_expr(operand, None);
                if let Some(primitive) = operand_type.as_primitive() {
                    if primitive.is_integer() || primitive.is_float() {
                        return operand_type;
                    }
                }
                if !operand_type.is_never() {
                    self.errors.push(CompileError::new(
                        format!("Cannot negate {operand_type}"),
                        self.error_location(location),
                        ErrorCode::T001,
                    ));
                }
                operand_type
            }
            UnaryOp::Not => {
                self.expect_bool(operand);
                Type::primitive(Primitive::Bool)
            }
            UnaryOp::Ref => Arc::new(Type::Reference {
                target: self.check_expr(operand, None),
                mutable: false,
            }),
            UnaryOp::RefMut => {
                let operand_type = self.check_expr(operand, None);
                if let Expr::Identifier(name, location) = operand {
                    let error_location = self.error_location(location);
                    if let Some(local) = self.lookup(name) {
                        if !local.mutable {
                            self.errors.push(
                                CompileError::new(
                                    format!("Cannot take &mut of immutable binding '{name}'"),
                                    error_location,
                                    ErrorCode::B002,
                                )
                                .with_metadata(ErrorMetaDataKey::BorrowedVariable, name),
                            );
                        }
                    }
                }
                Arc::new(Type::Reference {
                    target: operand_type,
                    mutable: true,
                })
            }
            UnaryOp::Deref => {
                let operand_type = self.check_expr(operand, None);
                match operand_type.as_ref() {
                    Type::Reference { target, .. } | Type::Pointer { target, .. } => {
                        target.clone()
                    }
                    _ => {
                        if !operand_type.is_never() {
                            self.errors.push(CompileError::new(
                                format!("Cannot dereference {operand_type}"),
                                self.error_location(location),
                                ErrorCode::T001,
                            ));
                        }
                        Type::primitive(Primitive::Never)
                    }
                }
            }
        }
    }

    fn check_field(
        &mut self,
        receiver: &Expr,
        field: &str,
        location: &crate::compiler::source::TextLocation,
    ) -> TypeRef {
        let receiver_type = self.check_expr(receiver, None);
        let resolved = self.env.resolve_alias(&receiver_type);
        let through_ref = match resolved.as_ref() {
            Type::Reference { target, .. } => target.clone(),
            _ => resolved,
        };

        match through_ref.as_ref() {
            Type::Named { name, type_args } => {
                if let Some(def) = self.env.structs.get(name) {
                    if let Some((_, field_type, _)) =
                        def.fields.iter().find(|(field_name, ..)| field_name == field)
                    {
                        let subs: Vec<(String, TypeRef)> = def
                            .type_params
                            .iter()
                            .cloned()
                            .zip(type_args.iter().cloned())
                            .collect();
                        return field_type.substitute(&subs);
                    }
                }
                if let Some(def) = self.env.classes.get(name) {
                    if let Some((_, field_type, visibility)) =
                        def.fields.iter().find(|(field_name, ..)| field_name == field)
                    {
                        if *visibility == Visibility::Private
                            && !self.checking_inside_type(name)
                        {
                            self.errors.push(CompileError::new(
                                format!("Field '{field}' of '{name}' is private"),
                                self.error_location(location),
                                ErrorCode::T006,
                            ));
                        }
                        return field_type.clone();
                    }
                }
                self.errors.push(CompileError::new(
                    format!("'{name}' has no field '{field}'"),
                    self.error_location(location),
                    ErrorCode::T002,
                ));
                Type::primitive(Primitive::Never)
            }
            Type::Tuple(members) => {
                if let Ok(index) = field.parse::<usize>() {
                    if let Some(member) = members.get(index) {
                        return member.clone();
                    }
                }
                self.errors.push(CompileError::new(
                    format!("Tuple has no field '{field}'"),
                    self.error_location(location),
                    ErrorCode::T002,
                ));
                Type::primitive(Primitive::Never)
            }
            other => {
                if !other.is_never() {
                    self.errors.push(CompileError::new(
                        format!("{receiver_type} has no fields"),
                        self.error_location(location),
                        ErrorCode::T001,
                    ));
                }
                Type::primitive(Primitive::Never)
            }
        }
    }

    /// True when `self` in scope has the given type name.
    fn checking_inside_type(&self, type_name: &str) -> bool {
        self.lookup("self")
            .map(|local| {
                let through_ref = match local.local_type.as_ref() {
                    Type::Reference { target, .. } => target.clone(),
                    _ => local.local_type.clone(),
                };
                matches!(through_ref.as_ref(), Type::Named { name, .. } if name == type_name)
            })
            .unwrap_or(false)
    }

    fn check_struct_literal(
        &mut self,
        type_name: &str,
        type_args: &[TypeExpr],
        fields: &[(String, Expr)],
        location: &crate::compiler::source::TextLocation,
        expected: Option<&TypeRef>,
    ) -> TypeRef {
        let Some(def) = self.env.structs.get(type_name).cloned() else {
            self.errors.push(CompileError::new(
                format!("Unknown struct '{type_name}'"),
                self.error_location(location),
                ErrorCode::T002,
            ));
            return Type::primitive(Primitive::Never);
        };

        // Explicit args win; otherwise infer from the expected type, then
        // from field values
        let mut subs = Substitutions::new();
        if !type_args.is_empty() {
            for (param, arg) in def.type_params.iter().zip(type_args) {
                subs.bind(param, lower_type_expr(arg));
            }
        } else if let Some(expected) = expected {
            if let Type::Named { name, type_args } = expected.as_ref() {
                if name == type_name {
                    for (param, arg) in def.type_params.iter().zip(type_args) {
                        subs.bind(param, arg.clone());
                    }
                }
            }
        }

        for (field_name, value) in fields {
            match def.fields.iter().find(|(name, ..)| name == field_name) {
                Some((_, field_type, _)) => {
                    let hint = field_type.substitute(subs.as_slice());
                    let found = self.check_expr(value, Some(&hint));
                    // Inference from field values for still-unbound params
                    unify(field_type, &found, &def.type_params, &mut subs);
                }
                None => {
                    self.errors.push(CompileError::new(
                        format!("'{type_name}' has no field '{field_name}'"),
                        self.error_location(location),
                        ErrorCode::T002,
                    ));
                }
            }
        }

        for (field_name, ..) in &def.fields {
            if !fields.iter().any(|(name, _)| name == field_name) {
                self.errors.push(CompileError::new(
                    format!("Missing field '{field_name}' in '{type_name}' literal"),
                    self.error_location(location),
                    ErrorCode::T001,
                ));
            }
        }

        let resolved_args = def
            .type_params
            .iter()
            .map(|param| {
                subs.get(param)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Type::TypeVar(param.clone())))
            })
            .collect();
        Type::named(type_name, resolved_args)
    }

    fn check_when(
        &mut self,
        scrutinee: &Expr,
        arms: &[WhenArm],
        location: &crate::compiler::source::TextLocation,
        expected: Option<&TypeRef>,
    ) -> TypeRef {
        let scrutinee_type = self.check_expr(scrutinee, None);
        let resolved = self.env.resolve_alias(&scrutinee_type);
        let error_location = self.error_location(location);

        match resolved.as_ref() {
            Type::Named { name, .. } => {
                if let Some(def) = self.env.enums.get(name).cloned() {
                    self.errors.extend(exhaustiveness::check_enum_exhaustiveness(
                        &def,
                        arms,
                        &error_location,
                    ));
                } else {
                    self.errors.extend(exhaustiveness::check_open_exhaustiveness(
                        arms,
                        false,
                        &error_location,
                    ));
                }
            }
            Type::Primitive(primitive) => {
                self.errors.extend(exhaustiveness::check_open_exhaustiveness(
                    arms,
                    *primitive == Primitive::Bool,
                    &error_location,
                ));
            }
            _ => {}
        }

        let mut result_type = expected.cloned();
        for arm in arms {
            self.scopes.push(FxHashMap::default());
            self.bind_pattern(&arm.pattern, &resolved);
            let arm_type = self.check_expr(&arm.body, result_type.as_ref());
            self.scopes.pop();
            if result_type.is_none() && !arm_type.is_never() {
                result_type = Some(arm_type);
            }
        }
        result_type.unwrap_or_else(Type::unit)
    }

    fn check_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        location: &crate::compiler::source::TextLocation,
        expected: Option<&TypeRef>,
    ) -> TypeRef {
        let error_location = self.error_location(location);

        // Primitive static methods: `I32::default()`, `F64::from(x)`
        if let Expr::Path { segments, .. } = callee {
            if segments.len() == 2 {
                if let Some(primitive) = Primitive::parse(&segments[0]) {
                    match segments[1].as_str() {
                        "default" => return Type::primitive(primitive),
                        "from" => {
                            for arg in args {
                                let found = self.check_expr(arg, None);
                                if found
                                    .as_primitive()
                                    .map(|from| !from.is_integer() && !from.is_float())
                                    .unwrap_or(true)
                                {
                                    self.errors.push(CompileError::new(
                                        format!("{}::from requires a numeric argument", primitive.name()),
                                        error_location.clone(),
                                        ErrorCode::T001,
                                    ));
                                }
                            }
                            return Type::primitive(primitive);
                        }
                        other => {
                            self.errors.push(CompileError::new(
                                format!("No static method '{other}' on {}", primitive.name()),
                                error_location,
                                ErrorCode::T002,
                            ));
                            return Type::primitive(Primitive::Never);
                        }
                    }
                }
            }
        }

        // Enum constructor: `Some(x)` or `Option::Some(x)`
        if let Some(result) = self.try_enum_constructor(callee, args, expected) {
            return result;
        }

        // Named function call (direct or generic)
        let callee_name = match callee {
            Expr::Identifier(name, _) => Some(vec![name.clone()]),
            Expr::Path { segments, .. } => Some(segments.clone()),
            _ => None,
        };

        if let Some(segments) = callee_name {
            let joined = segments.join("::");
            let sig = self
                .env
                .functions
                .get(&joined)
                .cloned()
                .or_else(|| self.registry.find_function(&joined).map(|(_, sig)| sig));
            if let Some(sig) = sig {
                return self.check_direct_call(&sig, callee, args, &error_location, expected);
            }
            // Struct/class constructor sugar `Type::new(...)`
            if segments.len() == 2 && segments[1] == "new" {
                if let Some(def) = self.env.classes.get(&segments[0]) {
                    let class_type = Type::named(def.name.clone(), vec![]);
                    for arg in args {
                        self.check_expr(arg, None);
                    }
                    return class_type;
                }
            }
        }

        // Indirect call through a function-typed value
        let callee_type = self.check_expr(callee, None);
        match callee_type.as_ref() {
            Type::Function {
                params,
                return_type,
                varargs,
            } => {
                self.check_arguments(args, params, *varargs, &error_location);
                return_type.clone()
            }
            Type::Closure {
                params,
                return_type,
                ..
            } => {
                self.check_arguments(args, params, false, &error_location);
                return_type.clone()
            }
            other => {
                if !other.is_never() {
                    self.errors.push(CompileError::new(
                        format!("{callee_type} is not callable"),
                        error_location,
                        ErrorCode::T001,
                    ));
                }
                Type::primitive(Primitive::Never)
            }
        }
    }

    fn try_enum_constructor(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        expected: Option<&TypeRef>,
    ) -> Option<TypeRef> {
        let (enum_name, variant) = match callee {
            Expr::Path { segments, .. } if segments.len() == 2 => {
                (Some(segments[0].clone()), segments[1].clone())
            }
            Expr::Identifier(name, _)
                if name.chars().next().map(char::is_uppercase).unwrap_or(false) =>
            {
                (None, name.clone())
            }
            _ => return None,
        };

        let def = match &enum_name {
            Some(enum_name) => self.env.enums.get(enum_name).cloned(),
            None => self
                .env
                .enums
                .values()
                .find(|def| def.variant_index(&variant).is_some())
                .cloned(),
        }?;
        let index = def.variant_index(&variant)?;
        let (_, payload_types) = def.variants[index].clone();

        // Infer enum type args from the payload, falling back to the
        // expected type context
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
        for (arg, payload_type) in args.iter().zip(&payload_types) {
            let hint = payload_type.substitute(subs.as_slice());
            let found = self.check_expr(arg, Some(&hint));
            unify(payload_type, &found, &def.type_params, &mut subs);
        }

        let resolved_args = def
            .type_params
            .iter()
            .map(|param| {
                subs.get(param)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Type::TypeVar(param.clone())))
            })
            .collect();
        Some(Type::named(def.name.clone(), resolved_args))
    }

    fn check_direct_call(
        &mut self,
        sig: &FunctionSig,
        callee: &Expr,
        args: &[Expr],
        error_location: &ErrorLocation,
        expected: Option<&TypeRef>,
    ) -> TypeRef {
        if sig.stability == crate::compiler::types::Stability::Deprecated {
            // Deprecation is a warning concern; recorded as a note-level error
            // metadata elsewhere. Body checking proceeds normally.
        }

        // `f(&mut x, &mut x)` and `f(&x, &mut x)` alias the same place
        let borrows = self.collect_argument_borrows(args);
        self.errors.extend(check_argument_aliasing(&borrows));

        if !sig.is_generic() {
            if args.len() != sig.params.len() {
                self.errors.push(CompileError::new(
                    format!(
                        "'{}' takes {} argument(s), {} supplied",
                        sig.name,
                        sig.params.len(),
                        args.len()
                    ),
                    error_location.clone(),
                    ErrorCode::T005,
                ));
            }
            for (arg, (_, param_type)) in args.iter().zip(&sig.params) {
                let found = self.check_expr(arg, Some(param_type));
                self.record_move_if_consuming(arg, param_type, &found);
                if *found != **param_type
                    && !found.is_never()
                    && !matches!(param_type.as_ref(), Type::Named { .. } | Type::TypeVar(_))
                {
                    self.errors.push(
                        CompileError::new(
                            format!(
                                "Argument type mismatch: expected {param_type}, found {found}"
                            ),
                            error_location.clone(),
                            ErrorCode::T001,
                        )
                        .with_metadata(ErrorMetaDataKey::ExpectedType, param_type.to_string())
                        .with_metadata(ErrorMetaDataKey::FoundType, found.to_string()),
                    );
                }
            }
            return sig.return_type.clone();
        }

        // Generic: explicit type args win, else unify parameter patterns
        // against argument types
        let mut subs = Substitutions::new();
        if let Expr::Path { type_args, .. } = callee {
            for (param, arg) in sig.type_params.iter().zip(type_args) {
                subs.bind(param, lower_type_expr(arg));
            }
        }

        if args.len() != sig.params.len() {
            self.errors.push(CompileError::new(
                format!(
                    "'{}' takes {} argument(s), {} supplied",
                    sig.name,
                    sig.params.len(),
                    args.len()
                ),
                error_location.clone(),
                ErrorCode::T005,
            ));
        }

        for (arg, (_, param_type)) in args.iter().zip(&sig.params) {
            let hint = param_type.substitute(subs.as_slice());
            let found = self.check_expr(arg, Some(&hint));
            self.record_move_if_consuming(arg, &hint, &found);
            if !unify(param_type, &found, &sig.type_params, &mut subs) && !found.is_never() {
                self.errors.push(
                    CompileError::new(
                        format!(
                            "Cannot unify argument of type {found} with parameter {param_type}"
                        ),
                        error_location.clone(),
                        ErrorCode::T001,
                    )
                    .with_metadata(ErrorMetaDataKey::FoundType, found.to_string()),
                );
            }
        }

        // Return-type context can finish inference: `let x: I64 = default()`
        if subs.ordered(&sig.type_params).is_none() {
            if let Some(expected) = expected {
                unify(&sig.return_type, expected, &sig.type_params, &mut subs);
            }
        }

        match subs.ordered(&sig.type_params) {
            Some(_) => {
                self.check_where_constraints(sig, &subs, error_location);
                sig.return_type.substitute(subs.as_slice())
            }
            None => {
                self.errors.push(
                    CompileError::new(
                        format!("Cannot infer type arguments for '{}'", sig.name),
                        error_location.clone(),
                        ErrorCode::T003,
                    )
                    .with_metadata(
                        ErrorMetaDataKey::PrimarySuggestion,
                        format!("specify them explicitly: {}[...](...)", sig.name),
                    ),
                );
                Type::primitive(Primitive::Never)
            }
        }
    }

    /// Borrows taken directly in an argument list: `(name, mutable,
    /// location)` for every `&x` / `&mut x` of an identifier. Feeds the
    /// simultaneous-aliasing rule.
    fn collect_argument_borrows(&self, args: &[Expr]) -> Vec<(String, bool, ErrorLocation)> {
        args.iter()
            .filter_map(|arg| match arg {
                Expr::Unary {
                    op: op @ (UnaryOp::Ref | UnaryOp::RefMut),
                    operand,
                    location,
                } => match operand.as_ref() {
                    Expr::Identifier(name, _) => Some((
                        name.clone(),
                        *op == UnaryOp::RefMut,
                        location.to_error_location(self.sources),
                    )),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// A by-value pass of a non-duplicable local consumes it.
    fn record_move_if_consuming(&mut self, arg: &Expr, param_type: &TypeRef, found: &TypeRef) {
        if matches!(
            param_type.as_ref(),
            Type::Reference { .. } | Type::Pointer { .. }
        ) {
            return;
        }
        if is_trivially_duplicable(found) {
            return;
        }
        if let Expr::Identifier(name, location) = arg {
            if self.lookup(name).is_some() {
                let error_location = self.error_location(location);
                self.moves.mark_moved(name, &error_location);
            }
        }
    }

    fn check_where_constraints(
        &mut self,
        sig: &FunctionSig,
        subs: &Substitutions,
        error_location: &ErrorLocation,
    ) {
        for bound in &sig.where_constraints {
            let Some(concrete) = subs.get(&bound.type_param) else {
                continue;
            };
            for behavior in &bound.required_behaviors {
                if !self.type_implements(concrete, behavior) {
                    self.errors.push(
                        CompileError::new(
                            format!(
                                "{concrete} does not implement '{behavior}' required by '{}'",
                                sig.name
                            ),
                            error_location.clone(),
                            ErrorCode::T003,
                        )
                        .with_metadata(ErrorMetaDataKey::FoundType, concrete.to_string()),
                    );
                }
            }
        }
    }

    fn type_implements(&self, concrete: &TypeRef, behavior: &str) -> bool {
        // Primitives implement the core value behaviors intrinsically
        if concrete.as_primitive().is_some() {
            return matches!(
                behavior,
                "Duplicate" | "Printable" | "Eq" | "Ord" | "Hash" | "Default"
            );
        }
        let type_name = match concrete.as_ref() {
            Type::Named { name, .. } => name.as_str(),
            _ => return false,
        };
        self.env.impls.iter().any(|impl_record| {
            impl_record.target_type_name == type_name
                && impl_record.behavior_name.as_deref() == Some(behavior)
        }) || self.registry.modules().any(|module| {
            module.behavior_impls.iter().any(|impl_record| {
                impl_record.target_type_name == type_name
                    && impl_record.behavior_name.as_deref() == Some(behavior)
            })
        })
    }

    fn check_arguments(
        &mut self,
        args: &[Expr],
        params: &[TypeRef],
        varargs: bool,
        error_location: &ErrorLocation,
    ) {
        let borrows = self.collect_argument_borrows(args);
        self.errors.extend(check_argument_aliasing(&borrows));
        if args.len() != params.len() && !(varargs && args.len() >= params.len()) {
            self.errors.push(CompileError::new(
                format!("Expected {} argument(s), found {}", params.len(), args.len()),
                error_location.clone(),
                ErrorCode::T005,
            ));
        }
        for (arg, param_type) in args.iter().zip(params) {
            let found = self.check_expr(arg, Some(param_type));
            self.record_move_if_consuming(arg, param_type, &found);
        }
        for arg in args.iter().skip(params.len()) {
            self.check_expr(arg, None);
        }
    }

    fn check_method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        location: &crate::compiler::source::TextLocation,
    ) -> TypeRef {
        let receiver_type = self.check_expr(receiver, None);
        let error_location = self.error_location(location);
        let resolved = self.env.resolve_alias(&receiver_type);
        let through_ref = match resolved.as_ref() {
            Type::Reference { target, .. } => target.clone(),
            _ => resolved.clone(),
        };

        // 1. Primitive intrinsics
        if let Some(primitive) = through_ref.as_primitive() {
            if let Some(result) = primitive_method_type(primitive, method) {
                for arg in args {
                    self.check_expr(arg, None);
                }
                return result;
            }
        }

        // 2. Concrete type method: Type::method
        if let Type::Named { name, type_args } = through_ref.as_ref() {
            let qualified = format!("{name}::{method}");
            let sig = self
                .env
                .functions
                .get(&qualified)
                .cloned()
                .or_else(|| self.registry.find_function(&qualified).map(|(_, sig)| sig));
            if let Some(sig) = sig {
                let container_params = self.container_type_params(name);
                let subs: Vec<(String, TypeRef)> = container_params
                    .iter()
                    .cloned()
                    .zip(type_args.iter().cloned())
                    .chain(std::iter::once((
                        "Self".to_string(),
                        through_ref.clone(),
                    )))
                    .collect();

                // Skip the receiver parameter when matching arguments
                let value_params: Vec<(String, TypeRef)> = sig
                    .params
                    .iter()
                    .filter(|(param_name, _)| param_name != "self")
                    .cloned()
                    .collect();
                if args.len() != value_params.len() {
                    self.errors.push(CompileError::new(
                        format!(
                            "'{method}' takes {} argument(s), {} supplied",
                            value_params.len(),
                            args.len()
                        ),
                        error_location,
                        ErrorCode::T005,
                    ));
                } else {
                    for (arg, (_, param_type)) in args.iter().zip(&value_params) {
                        let hint = param_type.substitute(&subs);
                        let found = self.check_expr(arg, Some(&hint));
                        self.record_move_if_consuming(arg, &hint, &found);
                    }
                }
                return sig.return_type.substitute(&subs);
            }
        }

        // 3. Behavior method on dyn receiver
        if let Type::DynBehavior { behavior, .. } = through_ref.as_ref() {
            if let Some(def) = self.env.behaviors.get(behavior).cloned() {
                if let Some(sig) = def.method(method) {
                    for (arg, (_, param_type)) in args
                        .iter()
                        .zip(sig.params.iter().filter(|(name, _)| name != "self"))
                    {
                        self.check_expr(arg, Some(param_type));
                    }
                    return sig
                        .return_type
                        .substitute(&[("Self".to_string(), through_ref.clone())]);
                }
            }
            self.errors.push(CompileError::new(
                format!("'dyn {behavior}' has no method '{method}'"),
                error_location,
                ErrorCode::T002,
            ));
            return Type::primitive(Primitive::Never);
        }

        // 4. Bounded generic: the receiver is a type parameter whose bounds
        // grant a behavior declaring this method
        if let Type::Named { name, type_args } = through_ref.as_ref() {
            if type_args.is_empty() && self.current_type_params.contains(name) {
                if let Some(sig) = self.bounded_method(name, method) {
                    for (arg, (_, param_type)) in args
                        .iter()
                        .zip(sig.params.iter().filter(|(name, _)| name != "self"))
                    {
                        self.check_expr(arg, Some(param_type));
                    }
                    return sig
                        .return_type
                        .substitute(&[("Self".to_string(), through_ref.clone())]);
                }
                // Behavior-less parameters also get the universal intrinsics
                if let Some(result) = primitive_method_type(Primitive::I32, method) {
                    if method == "duplicate" {
                        return through_ref.clone();
                    }
                    return result;
                }
            }
        }

        // 5. Fn-behavior methods on function/closure receivers
        if matches!(method, "call" | "call_mut" | "call_once") {
            match through_ref.as_ref() {
                Type::Function {
                    params,
                    return_type,
                    varargs,
                } => {
                    self.check_arguments(args, params, *varargs, &error_location);
                    return return_type.clone();
                }
                Type::Closure {
                    params,
                    return_type,
                    ..
                } => {
                    self.check_arguments(args, params, false, &error_location);
                    return return_type.clone();
                }
                _ => {}
            }
        }

        if !through_ref.is_never() {
            self.errors.push(
                CompileError::new(
                    format!("No method '{method}' on {receiver_type}"),
                    error_location,
                    ErrorCode::T002,
                )
                .with_metadata(ErrorMetaDataKey::FoundType, receiver_type.to_string()),
            );
        }
        Type::primitive(Primitive::Never)
    }

    fn container_type_params(&self, type_name: &str) -> Vec<String> {
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

    /// Search the current function's where-constraints for a behavior bound
    /// on `type_param` that declares `method`.
    fn bounded_method(&self, type_param: &str, method: &str) -> Option<FunctionSig> {
        for bound in &self.current_where {
            if bound.type_param != type_param {
                continue;
            }
            for behavior in bound
                .required_behaviors
                .iter()
                .chain(bound.parameterized_bounds.iter().map(|(name, _)| name))
            {
                if let Some(def) = self.env.behaviors.get(behavior) {
                    if let Some(method_sig) = def.method(method) {
                        return Some(method_sig.clone());
                    }
                }
            }
        }
        None
    }
}

fn contains_type_var(value_type: &TypeRef) -> bool {
    match value_type.as_ref() {
        Type::TypeVar(_) => true,
        Type::Named { type_args, .. } => type_args.iter().any(contains_type_var),
        Type::Reference { target, .. } | Type::Pointer { target, .. } => {
            contains_type_var(target)
        }
        Type::Slice(element) | Type::Array { element, .. } => contains_type_var(element),
        Type::Tuple(members) => members.iter().any(contains_type_var),
        Type::Function {
            params,
            return_type,
            ..
        } => params.iter().any(contains_type_var) || contains_type_var(return_type),
        Type::Closure {
            params,
            return_type,
            ..
        } => params.iter().any(contains_type_var) || contains_type_var(return_type),
        Type::DynBehavior { type_args, .. } => type_args.iter().any(contains_type_var),
        Type::Primitive(_) => false,
    }
}

fn element_type_of(iterable: &TypeRef) -> TypeRef {
    match iterable.as_ref() {
        Type::Slice(element) | Type::Array { element, .. } => element.clone(),
        Type::Named { name, type_args } if name == "Range" && type_args.len() == 1 => {
            type_args[0].clone()
        }
        Type::Named { name, type_args } if name == "List" && type_args.len() == 1 => {
            type_args[0].clone()
        }
        _ => Type::unit(),
    }
}

fn primitive_method_type(primitive: Primitive, method: &str) -> Option<TypeRef> {
    match method {
        "duplicate" | "to_owned" => Some(Type::primitive(primitive)),
        "to_string" => Some(Type::primitive(Primitive::Str)),
        "hash" => Some(Type::primitive(Primitive::U64)),
        "abs" if primitive.is_signed() || primitive.is_float() => {
            Some(Type::primitive(primitive))
        }
        "len" if primitive == Primitive::Str => Some(Type::primitive(Primitive::Usize)),
        "trim" if primitive == Primitive::Str => Some(Type::primitive(Primitive::Str)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::modules::ModuleRegistry;
    use crate::compiler::parser::build_ast::parse_module;
    use crate::compiler::preprocessor::BuildMode;
    use crate::compiler::tokenizer::tokenizer::tokenize;
    use std::path::PathBuf;

    fn check(source: &str) -> CompilerMessages {
        let mut sources = SourceMap::new();
        let file = sources.add(PathBuf::from("check.tml"), source.to_string());
        let lexed = tokenize(source, file, &sources);
        assert!(lexed.errors.is_empty(), "lexer errors: {:?}", lexed.errors);
        let parsed = parse_module(&lexed.tokens, &sources);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);

        let mut messages = CompilerMessages::new();
        let mut loader = ModuleLoader::new(PathBuf::from("."), BuildMode::Debug);
        loader.library_roots = vec![];
        let mut registry = ModuleRegistry::new();
        check_module(
            &parsed.ast,
            &mut loader,
            &mut registry,
            &mut sources,
            &mut messages,
        );
        messages
    }

    fn assert_clean(source: &str) {
        let messages = check(source);
        assert!(!messages.has_errors(), "unexpected errors: {:?}", messages.errors);
    }

    fn assert_has_code(source: &str, code: ErrorCode) {
        let messages = check(source);
        assert!(
            messages.errors.iter().any(|error| error.code == code),
            "expected {code:?}, got {:?}",
            messages.errors
        );
    }

    #[test]
    fn literal_coercion_follows_the_declared_type() {
        assert_clean("func f() {\n    let x: F64 = 5\n    let y: I64 = 7\n}\n");
    }

    #[test]
    fn mismatched_let_is_t001() {
        assert_has_code("func f() {\n    let x: I32 = \"hello\"\n}\n", ErrorCode::T001);
    }

    #[test]
    fn unknown_identifier_is_t002() {
        assert_has_code("func f() -> I32 {\n    return missing\n}\n", ErrorCode::T002);
    }

    #[test]
    fn generic_call_infers_from_arguments() {
        assert_clean(
            "func id[T](x: T) -> T {\n    return x\n}\nfunc f() -> I64 {\n    return id(5_i64)\n}\n",
        );
    }

    #[test]
    fn generic_inference_failure_is_t003() {
        assert_has_code(
            "func make[T]() -> I32 {\n    return 0\n}\nfunc f() {\n    make()\n}\n",
            ErrorCode::T003,
        );
    }

    #[test]
    fn explicit_type_args_satisfy_inference() {
        assert_clean(
            "func make[T]() -> I32 {\n    return 0\n}\nfunc f() {\n    make[I64]()\n}\n",
        );
    }

    #[test]
    fn when_over_enum_checks_exhaustiveness() {
        assert_has_code(
            "enum Shape {\n    Circle(F64),\n    Square(F64),\n}\nfunc f(s: Shape) -> F64 {\n    return when s {\n        Circle(r) => r,\n    }\n}\n",
            ErrorCode::T004,
        );
    }

    #[test]
    fn exhaustive_when_is_clean() {
        assert_clean(
            "enum Shape {\n    Circle(F64),\n    Square(F64),\n}\nfunc f(s: Shape) -> F64 {\n    return when s {\n        Circle(r) => r,\n        Square(side) => side,\n    }\n}\n",
        );
    }

    #[test]
    fn use_after_move_is_b001() {
        assert_has_code(
            "struct Buffer {\n    pub data: Str\n}\nfunc consume(b: Buffer) {\n    return\n}\nfunc f(b: Buffer) {\n    consume(b)\n    consume(b)\n}\n",
            ErrorCode::B001,
        );
    }

    #[test]
    fn duplicable_values_do_not_move() {
        assert_clean(
            "func take(x: I32) {\n    return\n}\nfunc f(x: I32) {\n    take(x)\n    take(x)\n}\n",
        );
    }

    #[test]
    fn reference_parameters_do_not_consume() {
        assert_clean(
            "struct Buffer {\n    pub data: Str\n}\nfunc peek(b: &Buffer) {\n    return\n}\nfunc f(b: Buffer) {\n    peek(&b)\n    peek(&b)\n}\n",
        );
    }

    #[test]
    fn assigning_immutable_binding_is_an_error() {
        assert_has_code(
            "func f() {\n    let x = 1\n    x = 2\n}\n",
            ErrorCode::B002,
        );
    }

    #[test]
    fn double_mutable_borrow_in_one_call_is_b002() {
        assert_has_code(
            "func swap(a: &mut I32, b: &mut I32) {\n    return\n}\nfunc f() {\n    let mut x = 1\n    swap(&mut x, &mut x)\n}\n",
            ErrorCode::B002,
        );
    }

    #[test]
    fn mixing_shared_and_mutable_borrows_in_one_call_is_b002() {
        assert_has_code(
            "func inspect(a: &I32, b: &mut I32) {\n    return\n}\nfunc f() {\n    let mut x = 1\n    inspect(&x, &mut x)\n}\n",
            ErrorCode::B002,
        );
    }

    #[test]
    fn indirect_calls_check_argument_aliasing_too() {
        assert_has_code(
            "func swap(a: &mut I32, b: &mut I32) {\n    return\n}\nfunc f() {\n    let target = swap\n    let mut x = 1\n    target(&mut x, &mut x)\n}\n",
            ErrorCode::B002,
        );
    }

    #[test]
    fn distinct_places_may_both_borrow_mutably() {
        assert_clean(
            "func swap(a: &mut I32, b: &mut I32) {\n    return\n}\nfunc f() {\n    let mut x = 1\n    let mut y = 2\n    swap(&mut x, &mut y)\n}\n",
        );
    }

    #[test]
    fn mut_ref_of_immutable_binding_is_an_error() {
        assert_has_code(
            "func g(x: &mut I32) {\n    return\n}\nfunc f() {\n    let x = 1\n    g(&mut x)\n}\n",
            ErrorCode::B002,
        );
    }

    #[test]
    fn sealed_class_cannot_be_extended() {
        assert_has_code(
            "sealed class Base {\n    x: I32\n}\nclass Derived : Base {\n    y: I32\n}\n",
            ErrorCode::T006,
        );
    }

    #[test]
    fn struct_literal_checks_fields() {
        assert_has_code(
            "struct Point {\n    pub x: I32\n    pub y: I32\n}\nfunc f() {\n    let p = Point { x: 1 }\n}\n",
            ErrorCode::T001,
        );
        assert_has_code(
            "struct Point {\n    pub x: I32\n}\nfunc f() {\n    let p = Point { x: 1, z: 2 }\n}\n",
            ErrorCode::T002,
        );
    }

    #[test]
    fn method_call_on_struct_resolves_impl_method() {
        assert_clean(
            "struct Point {\n    pub x: F64\n    pub y: F64\n}\nimpl Point {\n    func magnitude(&self) -> F64 {\n        return self.x * self.x + self.y * self.y\n    }\n}\nfunc f(p: Point) -> F64 {\n    return p.magnitude()\n}\n",
        );
    }

    #[test]
    fn where_constraint_violation_is_t003() {
        assert_has_code(
            "struct Plain {\n    pub v: I32\n}\nfunc show[T](x: T) -> I32 where T: Printable {\n    return 0\n}\nfunc f(p: Plain) {\n    show(p)\n}\n",
            ErrorCode::T003,
        );
    }

    #[test]
    fn where_constraint_satisfied_by_impl() {
        assert_clean(
            "struct Point {\n    pub x: I32\n}\nimpl Printable for Point {\n    func to_string(&self) -> Str {\n        return \"point\"\n    }\n}\nfunc show[T](x: T) -> I32 where T: Printable {\n    return 0\n}\nfunc f(p: Point) {\n    show(p)\n}\n",
        );
    }

    #[test]
    fn enum_constructor_infers_generic_payload() {
        assert_clean(
            "func f() -> Option[I64] {\n    return Some(5_i64)\n}\n",
        );
    }

    #[test]
    fn try_operator_unwraps_result() {
        assert_clean(
            "func parse() -> Result[I32, Str] {\n    return Ok(1)\n}\nfunc f() -> Result[I32, Str] {\n    let v = parse()?\n    return Ok(v + 1)\n}\n",
        );
    }

    #[test]
    fn zero_type_params_behaves_as_non_generic() {
        assert_clean(
            "func plain(x: I32) -> I32 {\n    return x\n}\nfunc f() -> I32 {\n    return plain(3)\n}\n",
        );
    }
}
