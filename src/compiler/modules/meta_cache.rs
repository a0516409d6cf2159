//! Binary module metadata cache.
//!
//! Persists a parsed [`Module`] so later invocations skip lex/parse for
//! unchanged library sources. File layout:
//!
//! ```text
//! Header (24 bytes):
//!   [0..4)    magic: u32 = 0x544D4D54 ("TMMT"), little-endian
//!   [4..6)    version_major: u16 = 1
//!   [6..8)    version_minor: u16 = 0
//!   [8..16)   source_hash: u64 (CRC32C of contributing sources in load order)
//!   [16..24)  timestamp: u64 (ns since epoch; advisory)
//! Body:
//!   length-prefixed strings (u32 LE length + UTF-8 bytes),
//!   count-prefixed collections (u32 LE count + elements),
//!   semantic types as their canonical text form.
//! ```
//!
//! On load the source hash is recomputed; a mismatch means the file is
//! ignored and rewritten after a real parse. A corrupt body is treated the
//! same way, never as a fatal error.

use crate::compiler::modules::{Module, ReExport};
use crate::compiler::parser::ast_nodes::Visibility;
use crate::compiler::types::environment::{
    ClassDef, ClassMethodDef, ConstValue, EnumDef, InterfaceDef, MethodKind, StructDef,
};
use crate::compiler::types::{
    type_from_text, BehaviorDef, FunctionSig, ImplRecord, Stability, TypeRef, WhereBound,
};
use crate::log_debug;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const META_MAGIC: u32 = 0x544D_4D54;
pub const META_VERSION_MAJOR: u16 = 1;
pub const META_VERSION_MINOR: u16 = 0;
pub const HEADER_LEN: usize = 24;

// ---------------------------------
//             Writer
// ---------------------------------

struct MetaWriter {
    buffer: Vec<u8>,
}

impl MetaWriter {
    fn new() -> MetaWriter {
        MetaWriter { buffer: Vec::new() }
    }

    fn u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn byte(&mut self, value: u8) {
        self.buffer.push(value);
    }

    fn string(&mut self, text: &str) {
        self.u32(text.len() as u32);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn opt_string(&mut self, text: &Option<String>) {
        match text {
            Some(text) => {
                self.byte(1);
                self.string(text);
            }
            None => self.byte(0),
        }
    }

    fn type_ref(&mut self, type_ref: &TypeRef) {
        self.string(&type_ref.to_string());
    }

    fn strings(&mut self, items: &[String]) {
        self.u32(items.len() as u32);
        for item in items {
            self.string(item);
        }
    }

    fn function_sig(&mut self, sig: &FunctionSig) {
        self.string(&sig.name);
        self.u32(sig.params.len() as u32);
        for (name, param_type) in &sig.params {
            self.string(name);
            self.type_ref(param_type);
        }
        self.type_ref(&sig.return_type);
        self.strings(&sig.type_params);
        self.byte(sig.is_async as u8);
        self.byte(sig.is_lowlevel as u8);
        self.byte(match sig.stability {
            Stability::Stable => 0,
            Stability::Unstable => 1,
            Stability::Deprecated => 2,
        });
        self.opt_string(&sig.deprecated_message);
        self.opt_string(&sig.since_version);
        self.u32(sig.where_constraints.len() as u32);
        for bound in &sig.where_constraints {
            self.string(&bound.type_param);
            self.strings(&bound.required_behaviors);
            self.u32(bound.parameterized_bounds.len() as u32);
            for (behavior, args) in &bound.parameterized_bounds {
                self.string(behavior);
                self.u32(args.len() as u32);
                for arg in args {
                    self.type_ref(arg);
                }
            }
        }
        self.opt_string(&sig.extern_abi);
        self.opt_string(&sig.extern_name);
    }

    fn visibility(&mut self, visibility: Visibility) {
        self.byte(match visibility {
            Visibility::Private => 0,
            Visibility::Public => 1,
            Visibility::Protected => 2,
        });
    }

    fn struct_def(&mut self, def: &StructDef) {
        self.string(&def.name);
        self.strings(&def.type_params);
        self.u32(def.fields.len() as u32);
        for (name, field_type, visibility) in &def.fields {
            self.string(name);
            self.type_ref(field_type);
            self.visibility(*visibility);
        }
        self.byte(def.is_public as u8);
    }
}

// ---------------------------------
//             Reader
// ---------------------------------

struct MetaReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> MetaReader<'a> {
    fn new(bytes: &'a [u8]) -> MetaReader<'a> {
        MetaReader { bytes, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.pos..self.pos + count)?;
        self.pos += count;
        Some(slice)
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.take(2)?.try_into().ok()?))
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn byte(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn opt_string(&mut self) -> Option<Option<String>> {
        match self.byte()? {
            0 => Some(None),
            _ => Some(Some(self.string()?)),
        }
    }

    fn type_ref(&mut self) -> Option<TypeRef> {
        type_from_text(&self.string()?)
    }

    fn strings(&mut self) -> Option<Vec<String>> {
        let count = self.u32()? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.string()?);
        }
        Some(items)
    }

    fn function_sig(&mut self) -> Option<FunctionSig> {
        let name = self.string()?;
        let param_count = self.u32()? as usize;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let param_name = self.string()?;
            let param_type = self.type_ref()?;
            params.push((param_name, param_type));
        }
        let return_type = self.type_ref()?;
        let type_params = self.strings()?;
        let is_async = self.byte()? != 0;
        let is_lowlevel = self.byte()? != 0;
        let stability = match self.byte()? {
            0 => Stability::Stable,
            1 => Stability::Unstable,
            _ => Stability::Deprecated,
        };
        let deprecated_message = self.opt_string()?;
        let since_version = self.opt_string()?;
        let where_count = self.u32()? as usize;
        let mut where_constraints = Vec::with_capacity(where_count);
        for _ in 0..where_count {
            let type_param = self.string()?;
            let required_behaviors = self.strings()?;
            let bound_count = self.u32()? as usize;
            let mut parameterized_bounds = Vec::with_capacity(bound_count);
            for _ in 0..bound_count {
                let behavior = self.string()?;
                let arg_count = self.u32()? as usize;
                let mut args = Vec::with_capacity(arg_count);
                for _ in 0..arg_count {
                    args.push(self.type_ref()?);
                }
                parameterized_bounds.push((behavior, args));
            }
            where_constraints.push(WhereBound {
                type_param,
                required_behaviors,
                parameterized_bounds,
            });
        }
        let extern_abi = self.opt_string()?;
        let extern_name = self.opt_string()?;

        Some(FunctionSig {
            name,
            params,
            return_type,
            type_params,
            is_async,
            is_lowlevel,
            stability,
            deprecated_message,
            since_version,
            where_constraints,
            extern_abi,
            extern_name,
        })
    }

    fn visibility(&mut self) -> Option<Visibility> {
        Some(match self.byte()? {
            0 => Visibility::Private,
            1 => Visibility::Public,
            _ => Visibility::Protected,
        })
    }

    fn struct_def(&mut self) -> Option<StructDef> {
        let name = self.string()?;
        let type_params = self.strings()?;
        let field_count = self.u32()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let field_name = self.string()?;
            let field_type = self.type_ref()?;
            let visibility = self.visibility()?;
            fields.push((field_name, field_type, visibility));
        }
        let is_public = self.byte()? != 0;
        Some(StructDef {
            name,
            type_params,
            fields,
            is_public,
        })
    }
}

// ---------------------------------
//          Serialization
// ---------------------------------

/// Serializes a module into cache-file bytes with the given source hash.
pub fn serialize(module: &Module, source_hash: u32) -> Vec<u8> {
    let mut writer = MetaWriter::new();

    writer.u32(META_MAGIC);
    writer.u16(META_VERSION_MAJOR);
    writer.u16(META_VERSION_MINOR);
    writer.u64(source_hash as u64);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0);
    writer.u64(timestamp);

    writer.string(&module.name);
    writer.string(&module.path);
    writer.string(&module.file_path.to_string_lossy());

    // Deterministic order so identical modules serialize identically
    let mut function_names: Vec<&String> = module.functions.keys().collect();
    function_names.sort();
    writer.u32(function_names.len() as u32);
    for name in function_names {
        writer.string(name);
        writer.function_sig(&module.functions[name]);
    }

    for map in [&module.structs, &module.internal_structs] {
        let mut names: Vec<&String> = map.keys().collect();
        names.sort();
        writer.u32(names.len() as u32);
        for name in names {
            writer.struct_def(&map[name]);
        }
    }

    let mut enum_names: Vec<&String> = module.enums.keys().collect();
    enum_names.sort();
    writer.u32(enum_names.len() as u32);
    for name in enum_names {
        let def = &module.enums[name];
        writer.string(&def.name);
        writer.strings(&def.type_params);
        writer.u32(def.variants.len() as u32);
        for (variant, payload) in &def.variants {
            writer.string(variant);
            writer.u32(payload.len() as u32);
            for payload_type in payload {
                writer.type_ref(payload_type);
            }
        }
        writer.byte(def.is_public as u8);
    }

    let mut behavior_names: Vec<&String> = module.behaviors.keys().collect();
    behavior_names.sort();
    writer.u32(behavior_names.len() as u32);
    for name in behavior_names {
        let def = &module.behaviors[name];
        writer.string(&def.name);
        writer.strings(&def.type_params);
        writer.strings(&def.associated_types);
        writer.u32(def.methods.len() as u32);
        for method in &def.methods {
            writer.function_sig(method);
        }
        writer.strings(&def.super_behaviors);
        writer.strings(&def.methods_with_defaults);
    }

    let mut class_names: Vec<&String> = module.classes.keys().collect();
    class_names.sort();
    writer.u32(class_names.len() as u32);
    for name in class_names {
        let def = &module.classes[name];
        writer.string(&def.name);
        writer.strings(&def.type_params);
        writer.byte(def.is_abstract as u8);
        writer.byte(def.is_sealed as u8);
        writer.byte(def.is_value as u8);
        writer.opt_string(&def.extends);
        writer.strings(&def.implements);
        writer.u32(def.fields.len() as u32);
        for (field_name, field_type, visibility) in &def.fields {
            writer.string(field_name);
            writer.type_ref(field_type);
            writer.visibility(*visibility);
        }
        writer.u32(def.methods.len() as u32);
        for method in &def.methods {
            writer.byte(match method.kind {
                MethodKind::Normal => 0,
                MethodKind::Abstract => 1,
                MethodKind::Virtual => 2,
                MethodKind::Override => 3,
                MethodKind::Final => 4,
            });
            writer.byte(method.is_static as u8);
            writer.visibility(method.visibility);
            writer.function_sig(&method.sig);
        }
        writer.byte(def.is_public as u8);
    }

    let mut interface_names: Vec<&String> = module.interfaces.keys().collect();
    interface_names.sort();
    writer.u32(interface_names.len() as u32);
    for name in interface_names {
        let def = &module.interfaces[name];
        writer.string(&def.name);
        writer.strings(&def.type_params);
        writer.strings(&def.extends);
        writer.u32(def.methods.len() as u32);
        for method in &def.methods {
            writer.function_sig(method);
        }
    }

    let mut alias_names: Vec<&String> = module.type_aliases.keys().collect();
    alias_names.sort();
    writer.u32(alias_names.len() as u32);
    for name in alias_names {
        writer.string(name);
        writer.type_ref(&module.type_aliases[name]);
    }

    let mut const_names: Vec<&String> = module.constants.keys().collect();
    const_names.sort();
    writer.u32(const_names.len() as u32);
    for name in const_names {
        let (value, const_type) = &module.constants[name];
        writer.string(name);
        match value {
            ConstValue::Int(value) => {
                writer.byte(0);
                writer.string(&value.to_string());
            }
            ConstValue::Float(value) => {
                writer.byte(1);
                writer.string(&format!("{value:?}"));
            }
            ConstValue::Bool(value) => {
                writer.byte(2);
                writer.byte(*value as u8);
            }
            ConstValue::Str(value) => {
                writer.byte(3);
                writer.string(value);
            }
            ConstValue::Char(value) => {
                writer.byte(4);
                writer.string(&value.to_string());
            }
        }
        writer.type_ref(const_type);
    }

    writer.strings(&module.submodules);

    writer.u32(module.re_exports.len() as u32);
    for re_export in &module.re_exports {
        match re_export {
            ReExport::Glob { module_path } => {
                writer.byte(0);
                writer.string(module_path);
            }
            ReExport::Symbols {
                module_path,
                symbols,
            } => {
                writer.byte(1);
                writer.string(module_path);
                writer.u32(symbols.len() as u32);
                for (name, alias) in symbols {
                    writer.string(name);
                    writer.opt_string(alias);
                }
            }
            ReExport::Single {
                module_path,
                name,
                alias,
            } => {
                writer.byte(2);
                writer.string(module_path);
                writer.string(name);
                writer.opt_string(alias);
            }
        }
    }

    writer.strings(&module.private_imports);

    writer.u32(module.behavior_impls.len() as u32);
    for impl_record in &module.behavior_impls {
        writer.string(&impl_record.target_type_name);
        writer.opt_string(&impl_record.behavior_name);
    }

    writer.byte(module.has_pure_source_functions as u8);
    writer.opt_string(&module.source_code_snapshot);

    writer.buffer
}

/// Parses cache-file bytes. Returns None on any structural problem - corrupt
/// caches are rebuilt, never fatal. `expected_hash` must match the stored
/// header hash.
pub fn deserialize(bytes: &[u8], expected_hash: u32) -> Option<Module> {
    let mut reader = MetaReader::new(bytes);

    if reader.u32()? != META_MAGIC {
        return None;
    }
    if reader.u16()? != META_VERSION_MAJOR {
        return None;
    }
    let _minor = reader.u16()?;
    let stored_hash = reader.u64()?;
    if stored_hash != expected_hash as u64 {
        return None;
    }
    let _timestamp = reader.u64()?;

    let name = reader.string()?;
    let path = reader.string()?;
    let file_path = PathBuf::from(reader.string()?);

    let mut functions = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let key = reader.string()?;
        functions.insert(key, reader.function_sig()?);
    }

    let mut structs = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let def = reader.struct_def()?;
        structs.insert(def.name.clone(), def);
    }
    let mut internal_structs = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let def = reader.struct_def()?;
        internal_structs.insert(def.name.clone(), def);
    }

    let mut enums = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let enum_name = reader.string()?;
        let type_params = reader.strings()?;
        let variant_count = reader.u32()? as usize;
        let mut variants = Vec::with_capacity(variant_count);
        for _ in 0..variant_count {
            let variant = reader.string()?;
            let payload_count = reader.u32()? as usize;
            let mut payload = Vec::with_capacity(payload_count);
            for _ in 0..payload_count {
                payload.push(reader.type_ref()?);
            }
            variants.push((variant, payload));
        }
        let is_public = reader.byte()? != 0;
        enums.insert(
            enum_name.clone(),
            EnumDef {
                name: enum_name,
                type_params,
                variants,
                is_public,
            },
        );
    }

    let mut behaviors = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let behavior_name = reader.string()?;
        let type_params = reader.strings()?;
        let associated_types = reader.strings()?;
        let method_count = reader.u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(reader.function_sig()?);
        }
        let super_behaviors = reader.strings()?;
        let methods_with_defaults = reader.strings()?;
        behaviors.insert(
            behavior_name.clone(),
            BehaviorDef {
                name: behavior_name,
                type_params,
                associated_types,
                methods,
                super_behaviors,
                methods_with_defaults,
            },
        );
    }

    let mut classes = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let class_name = reader.string()?;
        let type_params = reader.strings()?;
        let is_abstract = reader.byte()? != 0;
        let is_sealed = reader.byte()? != 0;
        let is_value = reader.byte()? != 0;
        let extends = reader.opt_string()?;
        let implements = reader.strings()?;
        let field_count = reader.u32()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let field_name = reader.string()?;
            let field_type = reader.type_ref()?;
            let visibility = reader.visibility()?;
            fields.push((field_name, field_type, visibility));
        }
        let method_count = reader.u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            let kind = match reader.byte()? {
                0 => MethodKind::Normal,
                1 => MethodKind::Abstract,
                2 => MethodKind::Virtual,
                3 => MethodKind::Override,
                _ => MethodKind::Final,
            };
            let is_static = reader.byte()? != 0;
            let visibility = reader.visibility()?;
            let sig = reader.function_sig()?;
            methods.push(ClassMethodDef {
                kind,
                is_static,
                visibility,
                sig,
            });
        }
        let is_public = reader.byte()? != 0;
        classes.insert(
            class_name.clone(),
            ClassDef {
                name: class_name,
                type_params,
                is_abstract,
                is_sealed,
                is_value,
                extends,
                implements,
                fields,
                methods,
                is_public,
            },
        );
    }

    let mut interfaces = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let interface_name = reader.string()?;
        let type_params = reader.strings()?;
        let extends = reader.strings()?;
        let method_count = reader.u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(reader.function_sig()?);
        }
        interfaces.insert(
            interface_name.clone(),
            InterfaceDef {
                name: interface_name,
                type_params,
                extends,
                methods,
            },
        );
    }

    let mut type_aliases = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let alias_name = reader.string()?;
        type_aliases.insert(alias_name, reader.type_ref()?);
    }

    let mut constants = FxHashMap::default();
    for _ in 0..reader.u32()? {
        let const_name = reader.string()?;
        let value = match reader.byte()? {
            0 => ConstValue::Int(reader.string()?.parse().ok()?),
            1 => ConstValue::Float(reader.string()?.parse().ok()?),
            2 => ConstValue::Bool(reader.byte()? != 0),
            3 => ConstValue::Str(reader.string()?),
            _ => ConstValue::Char(reader.string()?.chars().next()?),
        };
        let const_type = reader.type_ref()?;
        constants.insert(const_name, (value, const_type));
    }

    let submodules = reader.strings()?;

    let re_export_count = reader.u32()? as usize;
    let mut re_exports = Vec::with_capacity(re_export_count);
    for _ in 0..re_export_count {
        re_exports.push(match reader.byte()? {
            0 => ReExport::Glob {
                module_path: reader.string()?,
            },
            1 => {
                let module_path = reader.string()?;
                let symbol_count = reader.u32()? as usize;
                let mut symbols = Vec::with_capacity(symbol_count);
                for _ in 0..symbol_count {
                    let symbol = reader.string()?;
                    let alias = reader.opt_string()?;
                    symbols.push((symbol, alias));
                }
                ReExport::Symbols {
                    module_path,
                    symbols,
                }
            }
            _ => ReExport::Single {
                module_path: reader.string()?,
                name: reader.string()?,
                alias: reader.opt_string()?,
            },
        });
    }

    let private_imports = reader.strings()?;

    let impl_count = reader.u32()? as usize;
    let mut behavior_impls = Vec::with_capacity(impl_count);
    for _ in 0..impl_count {
        behavior_impls.push(ImplRecord {
            target_type_name: reader.string()?,
            behavior_name: reader.opt_string()?,
        });
    }

    let has_pure_source_functions = reader.byte()? != 0;
    let source_code_snapshot = reader.opt_string()?;

    Some(Module {
        name,
        path,
        file_path,
        functions,
        structs,
        internal_structs,
        enums,
        behaviors,
        classes,
        interfaces,
        type_aliases,
        constants,
        submodules,
        re_exports,
        private_imports,
        behavior_impls,
        has_pure_source_functions,
        source_code_snapshot,
    })
}

/// Reads a module from the cache file if the header hash matches
/// `source_hash`. Any failure is a miss.
pub fn load(module_path: &str, source_hash: u32, cache_file: &Path) -> Option<Module> {
    let bytes = fs::read(cache_file).ok()?;
    let module = deserialize(&bytes, source_hash)?;
    if module.path != module_path {
        return None;
    }
    Some(module)
}

/// Writes the cache file. Failures are logged and ignored; the cache is an
/// optimization, not a requirement.
pub fn store(module: &Module, source_hash: u32, cache_file: &Path) {
    if let Some(parent) = cache_file.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let bytes = serialize(module, source_hash);
    if let Err(error) = fs::write(cache_file, &bytes) {
        log_debug!("modules", "meta cache write failed: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::Type;

    fn sample_module() -> Module {
        let mut module = Module::new("maths", "lib::maths", PathBuf::from("lib/maths.tml"));
        module.functions.insert(
            "square".to_string(),
            FunctionSig::new(
                "square",
                vec![(
                    "x".to_string(),
                    Type::primitive(crate::compiler::types::Primitive::I32),
                )],
                Type::primitive(crate::compiler::types::Primitive::I32),
            ),
        );
        module.structs.insert(
            "Point".to_string(),
            StructDef {
                name: "Point".to_string(),
                type_params: vec![],
                fields: vec![
                    (
                        "x".to_string(),
                        Type::primitive(crate::compiler::types::Primitive::F64),
                        Visibility::Public,
                    ),
                    (
                        "y".to_string(),
                        Type::primitive(crate::compiler::types::Primitive::F64),
                        Visibility::Public,
                    ),
                ],
                is_public: true,
            },
        );
        module.enums.insert(
            "Shape".to_string(),
            EnumDef {
                name: "Shape".to_string(),
                type_params: vec!["T".to_string()],
                variants: vec![
                    ("Circle".to_string(), vec![Type::named("T", vec![])]),
                    ("Empty".to_string(), vec![]),
                ],
                is_public: true,
            },
        );
        module.re_exports.push(ReExport::Single {
            module_path: "lib::inner".to_string(),
            name: "helper".to_string(),
            alias: Some("assist".to_string()),
        });
        module.private_imports.push("lib::secret".to_string());
        module.behavior_impls.push(ImplRecord {
            target_type_name: "Point".to_string(),
            behavior_name: Some("Printable".to_string()),
        });
        module
    }

    #[test]
    fn serialize_then_deserialize_reproduces_the_module() {
        let module = sample_module();
        let bytes = serialize(&module, 0xDEAD_BEEF);
        let restored = deserialize(&bytes, 0xDEAD_BEEF).expect("should deserialize");

        assert_eq!(restored.name, module.name);
        assert_eq!(restored.path, module.path);
        assert_eq!(
            restored.functions["square"].signature_text(),
            module.functions["square"].signature_text()
        );
        assert_eq!(restored.structs["Point"].fields.len(), 2);
        assert_eq!(restored.enums["Shape"].variants.len(), 2);
        assert_eq!(restored.re_exports, module.re_exports);
        assert_eq!(restored.private_imports, module.private_imports);
        assert_eq!(restored.behavior_impls, module.behavior_impls);
    }

    #[test]
    fn write_read_write_is_bytewise_stable() {
        // Only the timestamp differs between writes; mask it out
        let module = sample_module();
        let first = serialize(&module, 7);
        let restored = deserialize(&first, 7).expect("deserialize");
        let second = serialize(&restored, 7);
        assert_eq!(first[..16], second[..16]);
        assert_eq!(first[HEADER_LEN..], second[HEADER_LEN..]);
    }

    #[test]
    fn hash_mismatch_is_a_miss() {
        let module = sample_module();
        let bytes = serialize(&module, 1);
        assert!(deserialize(&bytes, 2).is_none());
    }

    #[test]
    fn wrong_magic_is_a_miss() {
        let module = sample_module();
        let mut bytes = serialize(&module, 1);
        bytes[0] ^= 0xFF;
        assert!(deserialize(&bytes, 1).is_none());
    }

    #[test]
    fn major_version_mismatch_is_rejected() {
        let module = sample_module();
        let mut bytes = serialize(&module, 1);
        bytes[4] = 99;
        assert!(deserialize(&bytes, 1).is_none());
    }

    #[test]
    fn truncated_body_is_a_miss_not_a_panic() {
        let module = sample_module();
        let bytes = serialize(&module, 1);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(deserialize(truncated, 1).is_none());
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let module = sample_module();
        let bytes = serialize(&module, 0x1234_5678);
        assert_eq!(&bytes[0..4], &0x544D_4D54u32.to_le_bytes());
        assert_eq!(&bytes[4..6], &1u16.to_le_bytes());
        assert_eq!(&bytes[6..8], &0u16.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x1234_5678u64.to_le_bytes());
    }
}
