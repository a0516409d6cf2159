pub mod environment;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Shared handle to an immutable semantic type.
///
/// Types are shared freely between the checker, the registries and codegen;
/// equality is structural, which is what every cache key relies on.
pub type TypeRef = Arc<Type>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Primitive {
    I8,
    I16,
    I32,
    I64,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
    Isize,
    Usize,
    F32,
    F64,
    Bool,
    Char,
    Str,
    Unit,
    Never,
}

impl Primitive {
    pub fn parse(name: &str) -> Option<Primitive> {
        match name {
            "I8" => Some(Primitive::I8),
            "I16" => Some(Primitive::I16),
            "I32" => Some(Primitive::I32),
            "I64" => Some(Primitive::I64),
            "I128" => Some(Primitive::I128),
            "U8" => Some(Primitive::U8),
            "U16" => Some(Primitive::U16),
            "U32" => Some(Primitive::U32),
            "U64" => Some(Primitive::U64),
            "U128" => Some(Primitive::U128),
            "Isize" => Some(Primitive::Isize),
            "Usize" => Some(Primitive::Usize),
            "F32" => Some(Primitive::F32),
            "F64" => Some(Primitive::F64),
            "Bool" => Some(Primitive::Bool),
            "Char" => Some(Primitive::Char),
            "Str" => Some(Primitive::Str),
            "Unit" => Some(Primitive::Unit),
            "Never" => Some(Primitive::Never),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::I8 => "I8",
            Primitive::I16 => "I16",
            Primitive::I32 => "I32",
            Primitive::I64 => "I64",
            Primitive::I128 => "I128",
            Primitive::U8 => "U8",
            Primitive::U16 => "U16",
            Primitive::U32 => "U32",
            Primitive::U64 => "U64",
            Primitive::U128 => "U128",
            Primitive::Isize => "Isize",
            Primitive::Usize => "Usize",
            Primitive::F32 => "F32",
            Primitive::F64 => "F64",
            Primitive::Bool => "Bool",
            Primitive::Char => "Char",
            Primitive::Str => "Str",
            Primitive::Unit => "Unit",
            Primitive::Never => "Never",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Primitive::I8
                | Primitive::I16
                | Primitive::I32
                | Primitive::I64
                | Primitive::I128
                | Primitive::U8
                | Primitive::U16
                | Primitive::U32
                | Primitive::U64
                | Primitive::U128
                | Primitive::Isize
                | Primitive::Usize
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Primitive::I8
                | Primitive::I16
                | Primitive::I32
                | Primitive::I64
                | Primitive::I128
                | Primitive::Isize
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// Width in bits for numeric primitives; pointer-sized types assume a
    /// 64-bit target.
    pub fn bit_width(&self) -> u32 {
        match self {
            Primitive::I8 | Primitive::U8 => 8,
            Primitive::I16 | Primitive::U16 => 16,
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 32,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 64,
            Primitive::I128 | Primitive::U128 => 128,
            Primitive::Isize | Primitive::Usize => 64,
            Primitive::Bool => 1,
            Primitive::Char => 32,
            Primitive::Str | Primitive::Unit | Primitive::Never => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(Primitive),
    /// Nominal type with resolved type arguments
    Named {
        name: String,
        type_args: Vec<TypeRef>,
    },
    Reference {
        target: TypeRef,
        mutable: bool,
    },
    Pointer {
        target: TypeRef,
        mutable: bool,
    },
    Slice(TypeRef),
    Array {
        element: TypeRef,
        size: u64,
    },
    Tuple(Vec<TypeRef>),
    Function {
        params: Vec<TypeRef>,
        return_type: TypeRef,
        varargs: bool,
    },
    /// Like Function but carries the shape of the captured environment
    Closure {
        params: Vec<TypeRef>,
        return_type: TypeRef,
        captures: Vec<TypeRef>,
    },
    DynBehavior {
        behavior: String,
        type_args: Vec<TypeRef>,
        mutable: bool,
    },
    /// Unresolved type parameter during inference
    TypeVar(String),
}

impl Type {
    pub fn unit() -> TypeRef {
        Arc::new(Type::Primitive(Primitive::Unit))
    }

    pub fn primitive(primitive: Primitive) -> TypeRef {
        Arc::new(Type::Primitive(primitive))
    }

    pub fn named(name: impl Into<String>, type_args: Vec<TypeRef>) -> TypeRef {
        Arc::new(Type::Named {
            name: name.into(),
            type_args,
        })
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(primitive) => Some(*primitive),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Unit))
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Never))
    }

    /// Substitute every named type-variable simultaneously. The result never
    /// contains a half-substituted form: substitution recurses structurally
    /// and replaces each `TypeVar` in one pass.
    pub fn substitute(self: &TypeRef, subs: &[(String, TypeRef)]) -> TypeRef {
        match self.as_ref() {
            Type::TypeVar(name) => subs
                .iter()
                .find(|(param, _)| param == name)
                .map(|(_, replacement)| replacement.clone())
                .unwrap_or_else(|| self.clone()),
            Type::Named { name, type_args } => {
                // A bare named type that matches a parameter name is the
                // checker's representation of `T` before inference
                if type_args.is_empty() {
                    if let Some((_, replacement)) =
                        subs.iter().find(|(param, _)| param == name)
                    {
                        return replacement.clone();
                    }
                }
                Arc::new(Type::Named {
                    name: name.clone(),
                    type_args: type_args.iter().map(|arg| arg.substitute(subs)).collect(),
                })
            }
            Type::Reference { target, mutable } => Arc::new(Type::Reference {
                target: target.substitute(subs),
                mutable: *mutable,
            }),
            Type::Pointer { target, mutable } => Arc::new(Type::Pointer {
                target: target.substitute(subs),
                mutable: *mutable,
            }),
            Type::Slice(element) => Arc::new(Type::Slice(element.substitute(subs))),
            Type::Array { element, size } => Arc::new(Type::Array {
                element: element.substitute(subs),
                size: *size,
            }),
            Type::Tuple(members) => Arc::new(Type::Tuple(
                members.iter().map(|member| member.substitute(subs)).collect(),
            )),
            Type::Function {
                params,
                return_type,
                varargs,
            } => Arc::new(Type::Function {
                params: params.iter().map(|param| param.substitute(subs)).collect(),
                return_type: return_type.substitute(subs),
                varargs: *varargs,
            }),
            Type::Closure {
                params,
                return_type,
                captures,
            } => Arc::new(Type::Closure {
                params: params.iter().map(|param| param.substitute(subs)).collect(),
                return_type: return_type.substitute(subs),
                captures: captures.iter().map(|capture| capture.substitute(subs)).collect(),
            }),
            Type::DynBehavior {
                behavior,
                type_args,
                mutable,
            } => Arc::new(Type::DynBehavior {
                behavior: behavior.clone(),
                type_args: type_args.iter().map(|arg| arg.substitute(subs)).collect(),
                mutable: *mutable,
            }),
            Type::Primitive(_) => self.clone(),
        }
    }
}

/// The canonical text form. This is the serialization used by the binary
/// metadata cache and the rlib export table, so it must round-trip through
/// [`type_from_text`].
impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(primitive) => f.write_str(primitive.name()),
            Type::Named { name, type_args } => {
                f.write_str(name)?;
                if !type_args.is_empty() {
                    write!(f, "[{}]", join_types(type_args))?;
                }
                Ok(())
            }
            Type::Reference { target, mutable } => {
                if *mutable {
                    write!(f, "&mut {target}")
                } else {
                    write!(f, "&{target}")
                }
            }
            Type::Pointer { target, mutable } => {
                if *mutable {
                    write!(f, "*mut {target}")
                } else {
                    write!(f, "*{target}")
                }
            }
            Type::Slice(element) => write!(f, "[{element}]"),
            Type::Array { element, size } => write!(f, "[{element}: {size}]"),
            Type::Tuple(members) => write!(f, "({})", join_types(members)),
            Type::Function {
                params,
                return_type,
                varargs,
            } => {
                write!(f, "func({}", join_types(params))?;
                if *varargs {
                    if !params.is_empty() {
                        f.write_str(", ")?;
                    }
                    f.write_str("..")?;
                }
                write!(f, ") -> {return_type}")
            }
            Type::Closure {
                params,
                return_type,
                ..
            } => write!(f, "closure({}) -> {return_type}", join_types(params)),
            Type::DynBehavior {
                behavior,
                type_args,
                mutable,
            } => {
                f.write_str("dyn ")?;
                if *mutable {
                    f.write_str("mut ")?;
                }
                f.write_str(behavior)?;
                if !type_args.is_empty() {
                    write!(f, "[{}]", join_types(type_args))?;
                }
                Ok(())
            }
            Type::TypeVar(name) => write!(f, "?{name}"),
        }
    }
}

fn join_types(types: &[TypeRef]) -> String {
    types
        .iter()
        .map(|member| member.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parses the canonical text form back into a type. Inverse of `Display`.
pub fn type_from_text(text: &str) -> Option<TypeRef> {
    let mut parser = TextTypeParser {
        text: text.trim(),
        pos: 0,
    };
    let parsed = parser.parse()?;
    parser.skip_spaces();
    if parser.pos == parser.text.len() {
        Some(parsed)
    } else {
        None
    }
}

struct TextTypeParser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> TextTypeParser<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_spaces(&mut self) {
        while self.rest().starts_with(' ') {
            self.pos += 1;
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        self.skip_spaces();
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn parse_word(&mut self) -> Option<&'a str> {
        self.skip_spaces();
        let rest = self.rest();
        let end = rest
            .find(|ch: char| !ch.is_alphanumeric() && ch != '_')
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        self.pos += end;
        Some(&rest[..end])
    }

    fn parse_list(&mut self, close: char) -> Option<Vec<TypeRef>> {
        let mut members = Vec::new();
        loop {
            self.skip_spaces();
            if self.rest().starts_with(close) {
                self.pos += 1;
                return Some(members);
            }
            members.push(self.parse()?);
            self.skip_spaces();
            if self.rest().starts_with(',') {
                self.pos += 1;
            }
        }
    }

    fn parse(&mut self) -> Option<TypeRef> {
        self.skip_spaces();

        if self.eat_str("&mut ") {
            return Some(Arc::new(Type::Reference {
                target: self.parse()?,
                mutable: true,
            }));
        }
        if self.eat_str("&") {
            return Some(Arc::new(Type::Reference {
                target: self.parse()?,
                mutable: false,
            }));
        }
        if self.eat_str("*mut ") {
            return Some(Arc::new(Type::Pointer {
                target: self.parse()?,
                mutable: true,
            }));
        }
        if self.eat_str("*") {
            return Some(Arc::new(Type::Pointer {
                target: self.parse()?,
                mutable: false,
            }));
        }
        if self.eat_str("?") {
            let name = self.parse_word()?;
            return Some(Arc::new(Type::TypeVar(name.to_string())));
        }
        if self.eat_str("dyn ") {
            let mutable = self.eat_str("mut ");
            let behavior = self.parse_word()?.to_string();
            let type_args = if self.eat_str("[") {
                self.parse_list(']')?
            } else {
                Vec::new()
            };
            return Some(Arc::new(Type::DynBehavior {
                behavior,
                type_args,
                mutable,
            }));
        }
        if self.eat_str("func(") {
            let mut params = Vec::new();
            let mut varargs = false;
            loop {
                self.skip_spaces();
                if self.rest().starts_with(')') {
                    self.pos += 1;
                    break;
                }
                if self.eat_str("..") {
                    varargs = true;
                    continue;
                }
                params.push(self.parse()?);
                self.skip_spaces();
                if self.rest().starts_with(',') {
                    self.pos += 1;
                }
            }
            let return_type = if self.eat_str("->") {
                self.parse()?
            } else {
                Type::unit()
            };
            return Some(Arc::new(Type::Function {
                params,
                return_type,
                varargs,
            }));
        }
        if self.eat_str("closure(") {
            let params = self.parse_list(')')?;
            let return_type = if self.eat_str("->") {
                self.parse()?
            } else {
                Type::unit()
            };
            return Some(Arc::new(Type::Closure {
                params,
                return_type,
                captures: Vec::new(),
            }));
        }
        if self.eat_str("(") {
            let members = self.parse_list(')')?;
            if members.is_empty() {
                return Some(Type::unit());
            }
            return Some(Arc::new(Type::Tuple(members)));
        }
        if self.eat_str("[") {
            let element = self.parse()?;
            self.skip_spaces();
            if self.eat_str(":") {
                self.skip_spaces();
                let digits_end = self
                    .rest()
                    .find(|ch: char| !ch.is_ascii_digit())
                    .unwrap_or(self.rest().len());
                let size = self.rest()[..digits_end].parse::<u64>().ok()?;
                self.pos += digits_end;
                if !self.eat_str("]") {
                    return None;
                }
                return Some(Arc::new(Type::Array { element, size }));
            }
            if !self.eat_str("]") {
                return None;
            }
            return Some(Arc::new(Type::Slice(element)));
        }

        let word = self.parse_word()?;
        if let Some(primitive) = Primitive::parse(word) {
            return Some(Type::primitive(primitive));
        }
        let type_args = if self.eat_str("[") {
            self.parse_list(']')?
        } else {
            Vec::new()
        };
        Some(Type::named(word, type_args))
    }
}

/// Lowers a parsed type expression to a semantic type. Names that match a
/// type parameter in scope stay as bare named types; [`Type::substitute`]
/// replaces them during monomorphization.
pub fn lower_type_expr(type_expr: &crate::compiler::parser::ast_nodes::TypeExpr) -> TypeRef {
    use crate::compiler::parser::ast_nodes::TypeExpr;
    match type_expr {
        TypeExpr::Named { name, type_args } => {
            if type_args.is_empty() {
                if let Some(primitive) = Primitive::parse(name) {
                    return Type::primitive(primitive);
                }
            }
            Type::named(
                name.clone(),
                type_args.iter().map(lower_type_expr).collect(),
            )
        }
        TypeExpr::Reference {
            target, mutable, ..
        } => Arc::new(Type::Reference {
            target: lower_type_expr(target),
            mutable: *mutable,
        }),
        TypeExpr::Pointer { target, mutable } => Arc::new(Type::Pointer {
            target: lower_type_expr(target),
            mutable: *mutable,
        }),
        TypeExpr::Slice(element) => Arc::new(Type::Slice(lower_type_expr(element))),
        TypeExpr::Array { element, size } => Arc::new(Type::Array {
            element: lower_type_expr(element),
            size: *size,
        }),
        TypeExpr::Tuple(members) => {
            if members.is_empty() {
                Type::unit()
            } else {
                Arc::new(Type::Tuple(members.iter().map(lower_type_expr).collect()))
            }
        }
        TypeExpr::Function {
            params,
            return_type,
        } => Arc::new(Type::Function {
            params: params.iter().map(lower_type_expr).collect(),
            return_type: return_type
                .as_ref()
                .map(|ret| lower_type_expr(ret))
                .unwrap_or_else(Type::unit),
            varargs: false,
        }),
        TypeExpr::DynBehavior {
            behavior,
            type_args,
            mutable,
        } => Arc::new(Type::DynBehavior {
            behavior: behavior.clone(),
            type_args: type_args.iter().map(lower_type_expr).collect(),
            mutable: *mutable,
        }),
        TypeExpr::SelfType => Type::named("Self", vec![]),
    }
}

// ---------------------------------
//     Signatures and behaviors
// ---------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable,
    Unstable,
    Deprecated,
}

#[derive(Debug, Clone)]
pub struct WhereBound {
    pub type_param: String,
    pub required_behaviors: Vec<String>,
    pub parameterized_bounds: Vec<(String, Vec<TypeRef>)>,
}

#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<(String, TypeRef)>,
    pub return_type: TypeRef,
    pub type_params: Vec<String>,
    pub is_async: bool,
    pub is_lowlevel: bool,
    pub stability: Stability,
    pub deprecated_message: Option<String>,
    pub since_version: Option<String>,
    pub where_constraints: Vec<WhereBound>,
    pub extern_abi: Option<String>,
    pub extern_name: Option<String>,
}

impl FunctionSig {
    pub fn new(name: impl Into<String>, params: Vec<(String, TypeRef)>, return_type: TypeRef) -> Self {
        FunctionSig {
            name: name.into(),
            params,
            return_type,
            type_params: Vec::new(),
            is_async: false,
            is_lowlevel: false,
            stability: Stability::Stable,
            deprecated_message: None,
            since_version: None,
            where_constraints: Vec::new(),
            extern_abi: None,
            extern_name: None,
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }

    /// Canonical signature text, also used to derive stable item ids.
    pub fn signature_text(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|(_, param_type)| param_type.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("func({params}) -> {}", self.return_type)
    }
}

#[derive(Debug, Clone)]
pub struct BehaviorDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub associated_types: Vec<String>,
    pub methods: Vec<FunctionSig>,
    pub super_behaviors: Vec<String>,
    /// Method names with a default body behaviors supply when an impl omits them
    pub methods_with_defaults: Vec<String>,
}

impl BehaviorDef {
    pub fn method(&self, name: &str) -> Option<&FunctionSig> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// `(target_type, behavior)` with the per-method signatures qualified as
/// `Type::method` in the owning environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplRecord {
    pub target_type_name: String,
    pub behavior_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str) {
        let parsed = type_from_text(text).unwrap_or_else(|| panic!("should parse '{text}'"));
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn canonical_text_round_trips() {
        roundtrip("I32");
        roundtrip("Str");
        roundtrip("List[I32]");
        roundtrip("Map[Str, List[U8]]");
        roundtrip("&I32");
        roundtrip("&mut List[Str]");
        roundtrip("*mut U8");
        roundtrip("[I32]");
        roundtrip("[U8: 32]");
        roundtrip("(I32, Str)");
        roundtrip("func(I32, I32) -> I32");
        roundtrip("dyn Printable");
        roundtrip("dyn mut Writer[U8]");
        roundtrip("?T");
    }

    #[test]
    fn substitution_replaces_all_parameters_at_once() {
        let generic = Type::named(
            "Map",
            vec![
                Type::named("K", vec![]),
                Arc::new(Type::Slice(Type::named("V", vec![]))),
            ],
        );
        let substituted = generic.substitute(&[
            ("K".to_string(), Type::primitive(Primitive::Str)),
            ("V".to_string(), Type::primitive(Primitive::I64)),
        ]);
        assert_eq!(substituted.to_string(), "Map[Str, [I64]]");
    }

    #[test]
    fn substitution_is_simultaneous_not_sequential() {
        // K -> V while V -> I32: the first replacement must not be re-visited
        let tuple = Arc::new(Type::Tuple(vec![
            Type::named("K", vec![]),
            Type::named("V", vec![]),
        ]));
        let substituted = tuple.substitute(&[
            ("K".to_string(), Type::named("V", vec![])),
            ("V".to_string(), Type::primitive(Primitive::I32)),
        ]);
        assert_eq!(substituted.to_string(), "(V, I32)");
    }

    #[test]
    fn structural_equality_is_deep() {
        let a = Type::named("List", vec![Type::primitive(Primitive::I32)]);
        let b = Type::named("List", vec![Type::primitive(Primitive::I32)]);
        assert_eq!(a, b);
        let c = Type::named("List", vec![Type::primitive(Primitive::I64)]);
        assert_ne!(a, c);
    }

    #[test]
    fn function_with_varargs_round_trips() {
        roundtrip("func(Str, ..) -> I32");
    }
}
