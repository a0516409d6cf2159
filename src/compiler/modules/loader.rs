//! Module loading: path resolution, guarded recursive load, declaration
//! extraction, and registry population.
//!
//! Loading is idempotent and reentrancy-safe. A module currently being
//! loaded is tracked in `loading_modules`; a recursive `use` of it returns
//! success immediately, which is how `a uses b, b uses a` registers both
//! without failing.

use crate::compiler::diagnostics::{CompileError, CompilerMessages, ErrorCode, ErrorLocation};
use crate::compiler::modules::meta_cache;
use crate::compiler::modules::{
    global_module_cache, is_library_module, Module, ModuleRegistry, ReExport,
};
use crate::compiler::parser::ast_nodes::{
    ClassDecl, Decl, Expr, FunctionDecl, Literal, MethodModifier, ModuleAst, UseTarget, Visibility,
};
use crate::compiler::parser::build_ast::parse_module;
use crate::compiler::preprocessor::{preprocess, BuildMode, PreprocessorSymbols};
use crate::compiler::source::SourceMap;
use crate::compiler::tokenizer::tokenizer::tokenize;
use crate::compiler::types::environment::{
    ClassDef, ClassMethodDef, ConstValue, EnumDef, InterfaceDef, MethodKind, StructDef,
};
use crate::compiler::types::{
    lower_type_expr, BehaviorDef, FunctionSig, ImplRecord, Primitive, Type, TypeRef, WhereBound,
};
use crate::settings;
use crate::{log_debug, log_trace};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ModuleLoader {
    /// Directory of the source file currently being compiled; relative
    /// module paths resolve against it first
    pub current_dir: PathBuf,
    pub library_roots: Vec<PathBuf>,
    /// Resolution cache: module path -> resolved file path
    resolution_cache: FxHashMap<String, PathBuf>,
    pub build_mode: BuildMode,
}

impl ModuleLoader {
    pub fn new(current_dir: PathBuf, build_mode: BuildMode) -> ModuleLoader {
        ModuleLoader {
            current_dir,
            library_roots: settings::library_roots(),
            resolution_cache: FxHashMap::default(),
            build_mode,
        }
    }

    /// Resolves `a::b::c` to a filesystem path: first relative to the
    /// current source directory, then each configured library root. Both
    /// `.../c.tml` and `.../c/mod.tml` spellings are accepted.
    pub fn resolve_path(&mut self, module_path: &str) -> Option<PathBuf> {
        if let Some(cached) = self.resolution_cache.get(module_path) {
            return Some(cached.clone());
        }

        let relative: PathBuf = module_path.split("::").collect();
        let mut candidates: Vec<PathBuf> = Vec::new();
        let mut roots: Vec<PathBuf> = vec![self.current_dir.clone()];
        roots.extend(self.library_roots.iter().cloned());

        for root in &roots {
            candidates.push(
                root.join(&relative)
                    .with_extension(settings::TML_FILE_EXTENSION),
            );
            candidates.push(root.join(&relative).join("mod.tml"));
            // Library roots already name their module: `core::io` under
            // `lib/core` is `lib/core/io.tml`
            if let Some((first, rest)) = module_path.split_once("::") {
                if root.ends_with(first) {
                    let trimmed: PathBuf = rest.split("::").collect();
                    candidates.push(
                        root.join(&trimmed)
                            .with_extension(settings::TML_FILE_EXTENSION),
                    );
                    candidates.push(root.join(&trimmed).join("mod.tml"));
                }
            }
        }

        let resolved = candidates.into_iter().find(|candidate| candidate.is_file())?;
        self.resolution_cache
            .insert(module_path.to_string(), resolved.clone());
        Some(resolved)
    }

    /// Loads a module and everything it re-exports into the registry.
    ///
    /// `silent` marks preload paths where a missing target is tolerated (the
    /// error surfaces later if the symbol is actually used).
    pub fn load(
        &mut self,
        module_path: &str,
        registry: &mut ModuleRegistry,
        sources: &mut SourceMap,
        messages: &mut CompilerMessages,
        silent: bool,
    ) -> Result<(), CompileError> {
        // Cycle guard: a module mid-load is registered by its outer frame
        if registry.loading_modules.contains(module_path) {
            log_trace!("modules", "cycle broken on {module_path}");
            return Ok(());
        }
        if registry.contains(module_path) {
            return Ok(());
        }

        // Process-global cache first: library modules survive across units
        if let Ok(cache) = global_module_cache().lock() {
            if let Some(module) = cache.get(module_path) {
                registry.insert(module.as_ref().clone());
                return Ok(());
            }
        }

        let file_path = match self.resolve_path(module_path) {
            Some(path) => path,
            None => {
                if silent {
                    return Ok(());
                }
                return Err(CompileError::new(
                    format!("Module '{module_path}' not found"),
                    ErrorLocation::default(),
                    ErrorCode::R001,
                ));
            }
        };

        registry.loading_modules.insert(module_path.to_string());
        let result = self.load_resolved(module_path, &file_path, registry, sources, messages);
        registry.loading_modules.remove(module_path);
        result
    }

    fn load_resolved(
        &mut self,
        module_path: &str,
        file_path: &Path,
        registry: &mut ModuleRegistry,
        sources: &mut SourceMap,
        messages: &mut CompilerMessages,
    ) -> Result<(), CompileError> {
        // Gather every file contributing to this module. A mod.tml pulls in
        // its sibling single-file modules.
        let mut contributing: Vec<PathBuf> = vec![file_path.to_path_buf()];
        if file_path.file_name().map(|name| name == "mod.tml").unwrap_or(false) {
            if let Some(dir) = file_path.parent() {
                let mut siblings: Vec<PathBuf> = fs::read_dir(dir)
                    .map_err(|error| file_error(file_path, &error))?
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| {
                        path.extension()
                            .map(|extension| extension == settings::TML_FILE_EXTENSION)
                            .unwrap_or(false)
                            && path.file_name().map(|name| name != "mod.tml").unwrap_or(false)
                    })
                    .collect();
                siblings.sort();
                contributing.extend(siblings);
            }
        }

        // Binary metadata cache: keyed by CRC32C of the contributing source
        // bytes; a hash mismatch falls through to a real parse
        let source_hash = crate::hashing::crc32c_files(&contributing)
            .map_err(|error| file_error(file_path, &error))?;
        if let Some(module) =
            meta_cache::load(module_path, source_hash, &self.meta_cache_path(module_path))
        {
            log_debug!("modules", "meta cache hit for {module_path}");
            let shared = registry.insert(module);
            self.cache_library_module(file_path, &shared);
            self.load_re_export_sources(&shared, registry, sources, messages);
            return Ok(());
        }

        let mut module = Module::new(
            module_name_of(module_path),
            module_path,
            file_path.to_path_buf(),
        );

        let mut preprocessed_snapshot = String::new();
        for contributing_path in &contributing {
            let source_code = fs::read_to_string(contributing_path)
                .map_err(|error| file_error(contributing_path, &error))?;
            let file = sources.add(contributing_path.clone(), source_code.clone());

            let lexed = tokenize(&source_code, file, sources);
            messages.errors.extend(lexed.errors);

            let mut symbols = PreprocessorSymbols::host(self.build_mode);
            let preprocessed = preprocess(lexed.tokens, &mut symbols, sources);
            messages.errors.extend(preprocessed.errors);
            messages.warnings.extend(preprocessed.warnings);

            let parsed = parse_module(&preprocessed.tokens, sources);
            messages.errors.extend(parsed.errors);

            self.extract_declarations(
                &parsed.ast,
                &mut module,
                registry,
                sources,
                messages,
            )?;
            preprocessed_snapshot.push_str(&source_code);
        }

        synthesize_default_methods(&mut module);

        if module.has_pure_source_functions {
            module.source_code_snapshot = Some(preprocessed_snapshot);
        }

        let meta_path = self.meta_cache_path(module_path);
        meta_cache::store(&module, source_hash, &meta_path);

        let shared = registry.insert(module);
        self.cache_library_module(file_path, &shared);

        // Preload re-export targets so glob expansion can see them. Failures
        // here are tolerated; a broken re-export surfaces when used.
        self.load_re_export_sources(&shared, registry, sources, messages);

        Ok(())
    }

    fn cache_library_module(&self, file_path: &Path, module: &Arc<Module>) {
        if is_library_module(file_path) {
            if let Ok(mut cache) = global_module_cache().lock() {
                cache.insert(module.path.clone(), module.clone());
            }
        }
    }

    fn load_re_export_sources(
        &mut self,
        module: &Arc<Module>,
        registry: &mut ModuleRegistry,
        sources: &mut SourceMap,
        messages: &mut CompilerMessages,
    ) {
        for re_export in module.re_exports.clone() {
            let _ = self.load(re_export.module_path(), registry, sources, messages, true);
        }
    }

    fn meta_cache_path(&self, module_path: &str) -> PathBuf {
        self.current_dir.join(settings::dirs::META_CACHE).join(format!(
            "{}.{}",
            module_path.replace("::", "_"),
            settings::META_CACHE_EXTENSION
        ))
    }

    fn extract_declarations(
        &mut self,
        ast: &ModuleAst,
        module: &mut Module,
        registry: &mut ModuleRegistry,
        sources: &mut SourceMap,
        messages: &mut CompilerMessages,
    ) -> Result<(), CompileError> {
        for decl in &ast.decls {
            match decl {
                Decl::Function(func) => {
                    // Every public function registers; private ones too so
                    // sibling files in the module can call them
                    let sig = build_function_sig(func, None);
                    if func.is_lowlevel {
                        module.has_pure_source_functions = true;
                    }
                    module.functions.insert(sig.name.clone(), sig);
                }
                Decl::Extern(block) => {
                    // Extern functions always register so callers emit the
                    // right types even when the body lives elsewhere
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
                        module.functions.insert(sig.name.clone(), sig);
                    }
                }
                Decl::Struct(decl) => {
                    let def = StructDef {
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
                    };
                    if def.is_public {
                        module.structs.insert(def.name.clone(), def);
                    } else {
                        module.internal_structs.insert(def.name.clone(), def);
                    }
                }
                Decl::Enum(decl) => {
                    module.enums.insert(
                        decl.name.clone(),
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
                    );
                }
                Decl::Behavior(decl) => {
                    let methods_with_defaults = decl
                        .methods
                        .iter()
                        .filter(|method| method.body.is_some())
                        .map(|method| method.name.clone())
                        .collect();
                    module.behaviors.insert(
                        decl.name.clone(),
                        BehaviorDef {
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
                    );
                }
                Decl::Impl(decl) => {
                    let target_name = match &decl.target {
                        crate::compiler::parser::ast_nodes::TypeExpr::Named { name, .. } => {
                            name.clone()
                        }
                        other => format!("{:?}", other),
                    };
                    module.behavior_impls.push(ImplRecord {
                        target_type_name: target_name.clone(),
                        behavior_name: decl.behavior.clone(),
                    });
                    for method in &decl.methods {
                        // Impl-block generics concatenate with the method's own
                        let mut combined = decl.type_params.clone();
                        let sig = build_function_sig(method, Some(&target_name));
                        combined.extend(sig.type_params.iter().cloned());
                        let mut sig = sig;
                        sig.type_params = combined;
                        sig.where_constraints
                            .extend(decl.where_constraints.iter().map(lower_where));
                        module
                            .functions
                            .insert(format!("{target_name}::{}", method.name), sig);
                    }
                }
                Decl::Class(decl) => {
                    let def = build_class_def(decl);
                    module.classes.insert(def.name.clone(), def);
                    // Class methods are also callable as Type::method
                    for method in &decl.methods {
                        let sig = build_function_sig(&method.func, Some(&decl.name));
                        module
                            .functions
                            .insert(format!("{}::{}", decl.name, method.func.name), sig);
                    }
                }
                Decl::Interface(decl) => {
                    module.interfaces.insert(
                        decl.name.clone(),
                        InterfaceDef {
                            name: decl.name.clone(),
                            type_params: decl.type_params.clone(),
                            extends: decl.extends.clone(),
                            methods: decl
                                .methods
                                .iter()
                                .map(|method| build_function_sig(method, None))
                                .collect(),
                        },
                    );
                }
                Decl::TypeAlias(decl) => {
                    if decl.visibility == Visibility::Public {
                        module
                            .type_aliases
                            .insert(decl.name.clone(), lower_type_expr(&decl.target));
                    }
                }
                Decl::Const(decl) => {
                    if let Some((value, const_type)) = extract_const_value(decl) {
                        module.constants.insert(decl.name.clone(), (value, const_type));
                    }
                }
                Decl::Use(decl) => {
                    let target_path = decl.module_path.join("::");
                    // Declare the dependency and load it now; preload
                    // failures are non-fatal
                    let _ = self.load(&target_path, registry, sources, messages, true);

                    if decl.is_public {
                        module.re_exports.push(match &decl.target {
                            UseTarget::Glob => ReExport::Glob {
                                module_path: target_path,
                            },
                            UseTarget::List(symbols) => ReExport::Symbols {
                                module_path: target_path,
                                symbols: symbols.clone(),
                            },
                            UseTarget::Single { name, alias } => ReExport::Single {
                                module_path: target_path,
                                name: name.clone(),
                                alias: alias.clone(),
                            },
                        });
                    } else if !module.private_imports.contains(&target_path) {
                        module.private_imports.push(target_path);
                    }
                }
                Decl::Mod(decl) => {
                    module.submodules.push(decl.name.clone());
                    let submodule_path = format!("{}::{}", module.path, decl.name);
                    let _ = self.load(&submodule_path, registry, sources, messages, true);
                }
            }
        }
        Ok(())
    }
}

/// Second pass: every impl of a behavior receives `Type::method` entries for
/// default-bodied behavior methods the impl did not override.
fn synthesize_default_methods(module: &mut Module) {
    let impls = module.behavior_impls.clone();
    for impl_record in impls {
        let Some(behavior_name) = &impl_record.behavior_name else {
            continue;
        };
        let Some(behavior) = module.behaviors.get(behavior_name).cloned() else {
            continue;
        };
        for default_method in &behavior.methods_with_defaults {
            let qualified = format!("{}::{}", impl_record.target_type_name, default_method);
            if module.functions.contains_key(&qualified) {
                continue;
            }
            if let Some(sig) = behavior.method(default_method) {
                let mut synthesized = sig.clone();
                synthesized.name = default_method.clone();
                module.functions.insert(qualified, synthesized);
            }
        }
    }
}

fn module_name_of(module_path: &str) -> String {
    module_path
        .rsplit("::")
        .next()
        .unwrap_or(module_path)
        .to_string()
}

fn file_error(path: &Path, error: &std::io::Error) -> CompileError {
    CompileError::new(
        format!("Cannot read '{}': {error}", path.display()),
        ErrorLocation::default(),
        ErrorCode::F001,
    )
}

fn lower_where(constraint: &crate::compiler::parser::ast_nodes::WhereConstraint) -> WhereBound {
    WhereBound {
        type_param: constraint.type_param.clone(),
        required_behaviors: constraint.required_behaviors.clone(),
        parameterized_bounds: constraint
            .parameterized_bounds
            .iter()
            .map(|(behavior, args)| {
                (behavior.clone(), args.iter().map(lower_type_expr).collect())
            })
            .collect(),
    }
}

pub fn build_function_sig(func: &FunctionDecl, self_type: Option<&str>) -> FunctionSig {
    let params = func
        .params
        .iter()
        .map(|param| {
            let mut param_type = lower_type_expr(&param.type_expr);
            if let Some(self_name) = self_type {
                param_type =
                    param_type.substitute(&[("Self".to_string(), Type::named(self_name, vec![]))]);
            }
            (param.name.clone(), param_type)
        })
        .collect();

    let mut return_type = func
        .return_type
        .as_ref()
        .map(lower_type_expr)
        .unwrap_or_else(Type::unit);
    if let Some(self_name) = self_type {
        return_type =
            return_type.substitute(&[("Self".to_string(), Type::named(self_name, vec![]))]);
    }

    let deprecated = func
        .annotations
        .iter()
        .find(|annotation| annotation.name == "deprecated");
    let since = func
        .annotations
        .iter()
        .find(|annotation| annotation.name == "since");

    FunctionSig {
        name: func.name.clone(),
        params,
        return_type,
        type_params: func.type_params.clone(),
        is_async: func.is_async,
        is_lowlevel: func.is_lowlevel,
        stability: if deprecated.is_some() {
            crate::compiler::types::Stability::Deprecated
        } else {
            crate::compiler::types::Stability::Stable
        },
        deprecated_message: deprecated.and_then(|annotation| annotation.argument.clone()),
        since_version: since.and_then(|annotation| annotation.argument.clone()),
        where_constraints: func.where_constraints.iter().map(lower_where).collect(),
        extern_abi: None,
        extern_name: None,
    }
}

fn build_class_def(decl: &ClassDecl) -> ClassDef {
    ClassDef {
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

/// Compile-time-constant expressions reduce to a (value, type) pair for
/// codegen; anything else is left for the checker to diagnose.
fn extract_const_value(
    decl: &crate::compiler::parser::ast_nodes::ConstDecl,
) -> Option<(ConstValue, TypeRef)> {
    let declared = decl.type_expr.as_ref().map(lower_type_expr);
    match &decl.value {
        Expr::Literal(Literal::Int(value, suffix), _) => {
            let const_type = declared.unwrap_or_else(|| {
                Type::primitive(match suffix {
                    Some(suffix) => suffix_primitive(*suffix),
                    None => Primitive::I32,
                })
            });
            Some((ConstValue::Int(*value), const_type))
        }
        Expr::Literal(Literal::Float(value, suffix), _) => {
            let const_type = declared.unwrap_or_else(|| {
                Type::primitive(match suffix {
                    Some(crate::compiler::tokenizer::tokens::NumericSuffix::F32) => Primitive::F32,
                    _ => Primitive::F64,
                })
            });
            Some((ConstValue::Float(*value), const_type))
        }
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
        Expr::Unary {
            op: crate::compiler::parser::ast_nodes::UnaryOp::Neg,
            operand,
            ..
        } => match operand.as_ref() {
            Expr::Literal(Literal::Int(value, _), _) => Some((
                ConstValue::Int(-value),
                declared.unwrap_or_else(|| Type::primitive(Primitive::I32)),
            )),
            Expr::Literal(Literal::Float(value, _), _) => Some((
                ConstValue::Float(-value),
                declared.unwrap_or_else(|| Type::primitive(Primitive::F64)),
            )),
            _ => None,
        },
        _ => None,
    }
}

pub fn suffix_primitive(suffix: crate::compiler::tokenizer::tokens::NumericSuffix) -> Primitive {
    use crate::compiler::tokenizer::tokens::NumericSuffix;
    match suffix {
        NumericSuffix::I8 => Primitive::I8,
        NumericSuffix::I16 => Primitive::I16,
        NumericSuffix::I32 => Primitive::I32,
        NumericSuffix::I64 => Primitive::I64,
        NumericSuffix::I128 => Primitive::I128,
        NumericSuffix::U8 => Primitive::U8,
        NumericSuffix::U16 => Primitive::U16,
        NumericSuffix::U32 => Primitive::U32,
        NumericSuffix::U64 => Primitive::U64,
        NumericSuffix::U128 => Primitive::U128,
        NumericSuffix::Isize => Primitive::Isize,
        NumericSuffix::Usize => Primitive::Usize,
        NumericSuffix::F32 => Primitive::F32,
        NumericSuffix::F64 => Primitive::F64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn loader_in(dir: &TempDir) -> ModuleLoader {
        let mut loader = ModuleLoader::new(dir.path().to_path_buf(), BuildMode::Debug);
        loader.library_roots = vec![];
        loader
    }

    fn write_module(dir: &TempDir, relative: &str, source: &str) {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("should create module dir");
        }
        fs::write(path, source).expect("should write module source");
    }

    #[test]
    fn loads_a_single_file_module() {
        let dir = TempDir::new().expect("tempdir");
        write_module(
            &dir,
            "maths.tml",
            "pub func square(x: I32) -> I32 {\n    return x * x\n}\npub struct Point {\n    pub x: I32\n    pub y: I32\n}\n",
        );

        let mut loader = loader_in(&dir);
        let mut registry = ModuleRegistry::new();
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();

        loader
            .load("maths", &mut registry, &mut sources, &mut messages, false)
            .expect("load should succeed");
        assert!(!messages.has_errors(), "{:?}", messages.errors);

        let module = registry.get("maths").expect("module registered");
        assert!(module.functions.contains_key("square"));
        assert!(module.structs.contains_key("Point"));
        assert_eq!(
            module.functions["square"].signature_text(),
            "func(I32) -> I32"
        );
    }

    #[test]
    fn private_structs_land_in_internal_structs() {
        let dir = TempDir::new().expect("tempdir");
        write_module(
            &dir,
            "inner.tml",
            "struct Hidden {\n    value: I32\n}\npub struct Shown {\n    pub value: I32\n}\n",
        );

        let mut loader = loader_in(&dir);
        let mut registry = ModuleRegistry::new();
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();
        loader
            .load("inner", &mut registry, &mut sources, &mut messages, false)
            .expect("load");

        let module = registry.get("inner").unwrap();
        assert!(module.internal_structs.contains_key("Hidden"));
        assert!(module.structs.contains_key("Shown"));
    }

    #[test]
    fn cyclic_use_registers_both_modules() {
        let dir = TempDir::new().expect("tempdir");
        write_module(&dir, "a.tml", "use b::beta\npub func alpha() {\n    return\n}\n");
        write_module(&dir, "b.tml", "use a::alpha\npub func beta() {\n    return\n}\n");

        let mut loader = loader_in(&dir);
        let mut registry = ModuleRegistry::new();
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();

        loader
            .load("a", &mut registry, &mut sources, &mut messages, false)
            .expect("cycle must not fail the load");

        assert!(registry.contains("a"));
        assert!(registry.contains("b"));
        assert!(registry.get("a").unwrap().functions.contains_key("alpha"));
        assert!(registry.get("b").unwrap().functions.contains_key("beta"));
    }

    #[test]
    fn loading_twice_yields_equal_registrations() {
        let dir = TempDir::new().expect("tempdir");
        write_module(&dir, "stable.tml", "pub func f(x: I64) -> I64 {\n    return x\n}\n");

        let mut loader = loader_in(&dir);
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();

        let mut first_registry = ModuleRegistry::new();
        loader
            .load("stable", &mut first_registry, &mut sources, &mut messages, false)
            .expect("first load");
        let first = first_registry.get("stable").unwrap();

        let mut second_registry = ModuleRegistry::new();
        loader
            .load("stable", &mut second_registry, &mut sources, &mut messages, false)
            .expect("second load");
        let second = second_registry.get("stable").unwrap();

        assert_eq!(first.name, second.name);
        assert_eq!(
            first.functions.keys().collect::<Vec<_>>(),
            second.functions.keys().collect::<Vec<_>>()
        );
        assert_eq!(
            first.functions["f"].signature_text(),
            second.functions["f"].signature_text()
        );
    }

    #[test]
    fn mod_file_pulls_in_sibling_files() {
        let dir = TempDir::new().expect("tempdir");
        write_module(&dir, "pack/mod.tml", "pub func root() {\n    return\n}\n");
        write_module(&dir, "pack/extra.tml", "pub func extra() {\n    return\n}\n");

        let mut loader = loader_in(&dir);
        let mut registry = ModuleRegistry::new();
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();
        loader
            .load("pack", &mut registry, &mut sources, &mut messages, false)
            .expect("load");

        let module = registry.get("pack").unwrap();
        assert!(module.functions.contains_key("root"));
        assert!(module.functions.contains_key("extra"));
    }

    #[test]
    fn default_behavior_methods_are_synthesized_for_impls() {
        let dir = TempDir::new().expect("tempdir");
        write_module(
            &dir,
            "shapes.tml",
            "pub behavior Describe {\n    func name(&self) -> Str\n    func describe(&self) -> Str {\n        return \"a shape\"\n    }\n}\npub struct Circle {\n    pub radius: F64\n}\nimpl Describe for Circle {\n    func name(&self) -> Str {\n        return \"circle\"\n    }\n}\n",
        );

        let mut loader = loader_in(&dir);
        let mut registry = ModuleRegistry::new();
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();
        loader
            .load("shapes", &mut registry, &mut sources, &mut messages, false)
            .expect("load");

        let module = registry.get("shapes").unwrap();
        assert!(module.functions.contains_key("Circle::name"));
        // describe was not overridden: the default-bodied method synthesizes
        assert!(module.functions.contains_key("Circle::describe"));
    }

    #[test]
    fn missing_module_is_an_r_error_when_not_silent() {
        let dir = TempDir::new().expect("tempdir");
        let mut loader = loader_in(&dir);
        let mut registry = ModuleRegistry::new();
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();

        let error = loader
            .load("ghost", &mut registry, &mut sources, &mut messages, false)
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::R001);
    }

    #[test]
    fn pub_use_records_re_exports() {
        let dir = TempDir::new().expect("tempdir");
        write_module(&dir, "base.tml", "pub func helper() {\n    return\n}\n");
        write_module(
            &dir,
            "facade.tml",
            "pub use base::*\npub use base::helper as assist\nuse base::helper\n",
        );

        let mut loader = loader_in(&dir);
        let mut registry = ModuleRegistry::new();
        let mut sources = SourceMap::new();
        let mut messages = CompilerMessages::new();
        loader
            .load("facade", &mut registry, &mut sources, &mut messages, false)
            .expect("load");

        let module = registry.get("facade").unwrap();
        assert_eq!(module.re_exports.len(), 2);
        assert!(matches!(&module.re_exports[0], ReExport::Glob { module_path } if module_path == "base"));
        assert!(matches!(
            &module.re_exports[1],
            ReExport::Single { name, alias: Some(alias), .. } if name == "helper" && alias == "assist"
        ));
        assert_eq!(module.private_imports, vec!["base".to_string()]);
    }
}
