pub mod loader;
pub mod meta_cache;

use crate::compiler::types::environment::{
    ClassDef, ConstValue, EnumDef, InterfaceDef, StructDef,
};
use crate::compiler::types::{BehaviorDef, FunctionSig, ImplRecord, TypeRef};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// A re-export recorded by a `pub use` declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum ReExport {
    /// `pub use path::*`
    Glob { module_path: String },
    /// `pub use path::{a, b as c}`
    Symbols {
        module_path: String,
        symbols: Vec<(String, Option<String>)>,
    },
    /// `pub use path::name [as alias]`
    Single {
        module_path: String,
        name: String,
        alias: Option<String>,
    },
}

impl ReExport {
    pub fn module_path(&self) -> &str {
        match self {
            ReExport::Glob { module_path }
            | ReExport::Symbols { module_path, .. }
            | ReExport::Single { module_path, .. } => module_path,
        }
    }
}

/// One loaded module: every declaration the loader extracted from its source
/// files. All keys are unqualified names; cross-module references are written
/// `module::name`.
#[derive(Debug, Default, Clone)]
pub struct Module {
    pub name: String,
    /// Qualified module path, e.g. `core::io`
    pub path: String,
    pub file_path: PathBuf,

    pub functions: FxHashMap<String, FunctionSig>,
    pub structs: FxHashMap<String, StructDef>,
    /// Private structs kept so internal impls still compile downstream
    pub internal_structs: FxHashMap<String, StructDef>,
    pub enums: FxHashMap<String, EnumDef>,
    pub behaviors: FxHashMap<String, BehaviorDef>,
    pub classes: FxHashMap<String, ClassDef>,
    pub interfaces: FxHashMap<String, InterfaceDef>,
    pub type_aliases: FxHashMap<String, TypeRef>,
    pub constants: FxHashMap<String, (ConstValue, TypeRef)>,

    pub submodules: Vec<String>,
    pub re_exports: Vec<ReExport>,
    /// Modules imported privately; cache consumers must reload these to get
    /// transitive declarations
    pub private_imports: Vec<String>,
    pub behavior_impls: Vec<ImplRecord>,

    /// Set when the module contains functions whose bodies codegen re-lexes
    /// from the preprocessed snapshot
    pub has_pure_source_functions: bool,
    pub source_code_snapshot: Option<String>,
}

impl Module {
    pub fn new(name: impl Into<String>, path: impl Into<String>, file_path: PathBuf) -> Module {
        Module {
            name: name.into(),
            path: path.into(),
            file_path,
            ..Module::default()
        }
    }

    /// Names visible to a glob import, including glob re-exports (resolved
    /// by the loader when it expands them).
    pub fn exported_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        names.extend(self.functions.keys().cloned());
        names.extend(self.structs.keys().cloned());
        names.extend(self.enums.keys().cloned());
        names.extend(self.behaviors.keys().cloned());
        names.extend(self.classes.keys().cloned());
        names.extend(self.interfaces.keys().cloned());
        names.extend(self.type_aliases.keys().cloned());
        names.extend(self.constants.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.structs.is_empty()
            && self.enums.is_empty()
            && self.behaviors.is_empty()
            && self.classes.is_empty()
            && self.interfaces.is_empty()
            && self.type_aliases.is_empty()
            && self.constants.is_empty()
    }
}

/// Per-unit module registry. The registry owns the modules; everything else
/// reads through shared references after loading completes.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: FxHashMap<String, Arc<Module>>,
    /// Modules currently mid-load; a recursive `use` of one of these is a
    /// cycle and short-circuits to success
    pub(crate) loading_modules: FxHashSet<String>,
}

impl ModuleRegistry {
    pub fn new() -> ModuleRegistry {
        ModuleRegistry::default()
    }

    pub fn insert(&mut self, module: Module) -> Arc<Module> {
        let shared = Arc::new(module);
        self.modules.insert(shared.path.clone(), shared.clone());
        shared
    }

    pub fn get(&self, module_path: &str) -> Option<Arc<Module>> {
        self.modules.get(module_path).cloned()
    }

    pub fn contains(&self, module_path: &str) -> bool {
        self.modules.contains_key(module_path)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.modules.values()
    }

    /// Find the module defining a qualified function `module::name`.
    pub fn find_function(&self, qualified: &str) -> Option<(Arc<Module>, FunctionSig)> {
        let (module_path, name) = qualified.rsplit_once("::")?;
        let module = self.get(module_path)?;
        let sig = module.functions.get(name)?.clone();
        Some((module, sig))
    }
}

/// Process-wide cache of library modules, shared across compilation units in
/// the same run. Guarded by a mutex; single writer, many readers.
pub fn global_module_cache() -> &'static Mutex<FxHashMap<String, Arc<Module>>> {
    static CACHE: OnceLock<Mutex<FxHashMap<String, Arc<Module>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Library predicate: modules under a configured library root are shared
/// process-wide, project modules are not.
pub fn is_library_module(file_path: &std::path::Path) -> bool {
    file_path
        .components()
        .any(|component| component.as_os_str() == "lib")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trips_modules() {
        let mut registry = ModuleRegistry::new();
        let module = Module::new("io", "core::io", PathBuf::from("lib/core/io.tml"));
        registry.insert(module);
        assert!(registry.contains("core::io"));
        assert_eq!(registry.get("core::io").unwrap().name, "io");
    }

    #[test]
    fn empty_module_registers_without_error() {
        let mut registry = ModuleRegistry::new();
        let module = Module::new("empty", "empty", PathBuf::from("empty.tml"));
        let shared = registry.insert(module);
        assert!(shared.is_empty());
        assert!(registry.contains("empty"));
    }

    #[test]
    fn library_predicate_matches_lib_roots() {
        assert!(is_library_module(std::path::Path::new("lib/core/io.tml")));
        assert!(!is_library_module(std::path::Path::new("src/main.tml")));
    }
}
