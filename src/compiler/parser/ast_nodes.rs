//! AST produced by the parser.
//!
//! The tree is owned top-down: every node has exactly one parent and shared
//! references between nodes are forbidden. Semantic information (resolved
//! types, symbols) lives in the type environment, never in the AST.

use crate::compiler::source::TextLocation;
use crate::compiler::tokenizer::tokens::NumericSuffix;

/// One parsed module: the declarations of all files contributing to it.
#[derive(Debug, Default)]
pub struct ModuleAst {
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Public,
    Protected,
}

#[derive(Debug)]
pub enum Decl {
    Function(FunctionDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Behavior(BehaviorDecl),
    Impl(ImplDecl),
    Class(ClassDecl),
    Interface(InterfaceDecl),
    Const(ConstDecl),
    TypeAlias(TypeAliasDecl),
    Use(UseDecl),
    Mod(ModDecl),
    Extern(ExternBlock),
}

impl Decl {
    pub fn location(&self) -> &TextLocation {
        match self {
            Decl::Function(decl) => &decl.location,
            Decl::Struct(decl) => &decl.location,
            Decl::Enum(decl) => &decl.location,
            Decl::Behavior(decl) => &decl.location,
            Decl::Impl(decl) => &decl.location,
            Decl::Class(decl) => &decl.location,
            Decl::Interface(decl) => &decl.location,
            Decl::Const(decl) => &decl.location,
            Decl::TypeAlias(decl) => &decl.location,
            Decl::Use(decl) => &decl.location,
            Decl::Mod(decl) => &decl.location,
            Decl::Extern(decl) => &decl.location,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhereConstraint {
    pub type_param: String,
    /// Plain behavior bounds, e.g. `T: Printable`
    pub required_behaviors: Vec<String>,
    /// Parameterized bounds, e.g. `T: From[I32]`
    pub parameterized_bounds: Vec<(String, Vec<TypeExpr>)>,
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub where_constraints: Vec<WhereConstraint>,
    pub body: Option<Block>,
    pub is_async: bool,
    pub is_lowlevel: bool,
    pub annotations: Vec<Annotation>,
    pub doc: Option<String>,
    pub location: TextLocation,
}

/// `@test`, `@expect-error T001`, `@deprecated "msg"` and friends.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub name: String,
    pub argument: Option<String>,
}

#[derive(Debug)]
pub struct Param {
    pub name: String,
    pub type_expr: TypeExpr,
    pub is_mut: bool,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct StructDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_params: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub doc: Option<String>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct FieldDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_expr: TypeExpr,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct EnumDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_params: Vec<String>,
    pub variants: Vec<VariantDecl>,
    pub doc: Option<String>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct VariantDecl {
    pub name: String,
    /// Payload types; empty for unit variants
    pub payload: Vec<TypeExpr>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct BehaviorDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_params: Vec<String>,
    pub super_behaviors: Vec<String>,
    pub associated_types: Vec<String>,
    pub methods: Vec<FunctionDecl>,
    pub doc: Option<String>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct ImplDecl {
    pub target: TypeExpr,
    /// `impl Behavior for Type` when present
    pub behavior: Option<String>,
    pub type_params: Vec<String>,
    pub where_constraints: Vec<WhereConstraint>,
    pub methods: Vec<FunctionDecl>,
    pub location: TextLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodModifier {
    None,
    Abstract,
    Virtual,
    Override,
    Final,
}

#[derive(Debug)]
pub struct ClassDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_params: Vec<String>,
    pub is_abstract: bool,
    pub is_sealed: bool,
    /// Reference semantics by default; `value class` copies as an aggregate
    pub is_value: bool,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<ClassMethod>,
    pub doc: Option<String>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct ClassMethod {
    pub modifier: MethodModifier,
    pub is_static: bool,
    pub func: FunctionDecl,
}

#[derive(Debug)]
pub struct InterfaceDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_params: Vec<String>,
    pub extends: Vec<String>,
    pub methods: Vec<FunctionDecl>,
    pub doc: Option<String>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct ConstDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_expr: Option<TypeExpr>,
    pub value: Expr,
    pub doc: Option<String>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct TypeAliasDecl {
    pub name: String,
    pub visibility: Visibility,
    pub type_params: Vec<String>,
    pub target: TypeExpr,
    pub location: TextLocation,
}

/// The imported-symbol part of a `use` declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum UseTarget {
    /// `use a::b::c` or `use a::b::c as d`
    Single { name: String, alias: Option<String> },
    /// `use a::b::{c, d as e}`
    List(Vec<(String, Option<String>)>),
    /// `use a::b::*`
    Glob,
}

#[derive(Debug)]
pub struct UseDecl {
    /// Module path segments up to the target, e.g. `["a", "b"]`
    pub module_path: Vec<String>,
    pub target: UseTarget,
    pub is_public: bool,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct ModDecl {
    pub name: String,
    pub visibility: Visibility,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct ExternBlock {
    pub abi: String,
    pub functions: Vec<ExternFunction>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub struct ExternFunction {
    pub name: String,
    /// Link name when it differs from `name`
    pub extern_name: Option<String>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub varargs: bool,
    pub location: TextLocation,
}

// ---------------------------------
//        Types as written
// ---------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// `I32`, `List[Str]`, `Map[K, V]`
    Named {
        name: String,
        type_args: Vec<TypeExpr>,
    },
    /// `&T` / `&mut T`, optional lifetime tag `&'a T`
    Reference {
        target: Box<TypeExpr>,
        mutable: bool,
        lifetime: Option<String>,
    },
    /// `*T` / `*mut T`
    Pointer { target: Box<TypeExpr>, mutable: bool },
    /// `[T]`
    Slice(Box<TypeExpr>),
    /// `[T; N]`
    Array { element: Box<TypeExpr>, size: u64 },
    /// `(A, B, C)`; `()` is Unit
    Tuple(Vec<TypeExpr>),
    /// `func(A, B) -> C`
    Function {
        params: Vec<TypeExpr>,
        return_type: Option<Box<TypeExpr>>,
    },
    /// `dyn Behavior` / `dyn mut Behavior[T]`
    DynBehavior {
        behavior: String,
        type_args: Vec<TypeExpr>,
        mutable: bool,
    },
    SelfType,
}

// ---------------------------------
//          Statements
// ---------------------------------

#[derive(Debug)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub location: TextLocation,
}

#[derive(Debug)]
pub enum Stmt {
    Let {
        pattern: Pattern,
        type_expr: Option<TypeExpr>,
        value: Expr,
        location: TextLocation,
    },
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
        location: TextLocation,
    },
    Expr(Expr),
    Return {
        value: Option<Expr>,
        location: TextLocation,
    },
    Break {
        location: TextLocation,
    },
    Continue {
        location: TextLocation,
    },
    While {
        condition: Expr,
        body: Block,
        location: TextLocation,
    },
    Loop {
        body: Block,
        location: TextLocation,
    },
    For {
        pattern: Pattern,
        iterable: Expr,
        body: Block,
        location: TextLocation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

// ---------------------------------
//          Expressions
// ---------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Ref,
    RefMut,
    Deref,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i128, Option<NumericSuffix>),
    Float(f64, Option<NumericSuffix>),
    Bool(bool),
    Char(char),
    Str(String),
    Unit,
}

#[derive(Debug)]
pub enum Expr {
    Literal(Literal, TextLocation),
    /// A plain or interpolated string; interpolation segments hold parsed
    /// sub-expressions
    InterpolatedString(Vec<InterpolatedPart>, TextLocation),
    Identifier(String, TextLocation),
    /// `a::b::c`, optionally with explicit type args: `id[I32]`
    Path {
        segments: Vec<String>,
        type_args: Vec<TypeExpr>,
        location: TextLocation,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        location: TextLocation,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        location: TextLocation,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        location: TextLocation,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        type_args: Vec<TypeExpr>,
        args: Vec<Expr>,
        location: TextLocation,
    },
    Field {
        receiver: Box<Expr>,
        field: String,
        location: TextLocation,
    },
    Index {
        receiver: Box<Expr>,
        index: Box<Expr>,
        location: TextLocation,
    },
    Tuple(Vec<Expr>, TextLocation),
    Array(Vec<Expr>, TextLocation),
    ArrayRepeat {
        value: Box<Expr>,
        count: Box<Expr>,
        location: TextLocation,
    },
    StructLiteral {
        type_name: String,
        type_args: Vec<TypeExpr>,
        fields: Vec<(String, Expr)>,
        location: TextLocation,
    },
    Block(Block),
    If {
        condition: Box<Expr>,
        then_branch: Block,
        else_branch: Option<Box<Expr>>,
        location: TextLocation,
    },
    /// Pattern match
    When {
        scrutinee: Box<Expr>,
        arms: Vec<WhenArm>,
        location: TextLocation,
    },
    Closure {
        params: Vec<Param>,
        return_type: Option<TypeExpr>,
        body: Box<Expr>,
        location: TextLocation,
    },
    /// `expr?`
    Try(Box<Expr>, TextLocation),
    Range {
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        inclusive: bool,
        location: TextLocation,
    },
    Cast {
        value: Box<Expr>,
        target: TypeExpr,
        location: TextLocation,
    },
    Await(Box<Expr>, TextLocation),
}

#[derive(Debug)]
pub enum InterpolatedPart {
    Text(String),
    Expr(Box<Expr>),
}

impl Expr {
    pub fn location(&self) -> TextLocation {
        match self {
            Expr::Literal(_, location)
            | Expr::InterpolatedString(_, location)
            | Expr::Identifier(_, location)
            | Expr::Tuple(_, location)
            | Expr::Array(_, location)
            | Expr::Try(_, location)
            | Expr::Await(_, location) => location.clone(),
            Expr::Path { location, .. }
            | Expr::Binary { location, .. }
            | Expr::Unary { location, .. }
            | Expr::Call { location, .. }
            | Expr::MethodCall { location, .. }
            | Expr::Field { location, .. }
            | Expr::Index { location, .. }
            | Expr::ArrayRepeat { location, .. }
            | Expr::StructLiteral { location, .. }
            | Expr::If { location, .. }
            | Expr::When { location, .. }
            | Expr::Closure { location, .. }
            | Expr::Range { location, .. }
            | Expr::Cast { location, .. } => location.clone(),
            Expr::Block(block) => block.location.clone(),
        }
    }
}

#[derive(Debug)]
pub struct WhenArm {
    pub pattern: Pattern,
    pub body: Expr,
    pub location: TextLocation,
}

#[derive(Debug)]
pub enum Pattern {
    Literal(Literal, TextLocation),
    Binding {
        name: String,
        mutable: bool,
        location: TextLocation,
    },
    Wildcard(TextLocation),
    Tuple(Vec<Pattern>, TextLocation),
    Struct {
        type_name: String,
        fields: Vec<(String, Pattern)>,
        location: TextLocation,
    },
    EnumVariant {
        /// May be qualified (`Option::Some`) or bare (`Some`)
        enum_name: Option<String>,
        variant: String,
        payload: Vec<Pattern>,
        location: TextLocation,
    },
}

impl Pattern {
    pub fn location(&self) -> TextLocation {
        match self {
            Pattern::Literal(_, location)
            | Pattern::Wildcard(location)
            | Pattern::Tuple(_, location) => location.clone(),
            Pattern::Binding { location, .. }
            | Pattern::Struct { location, .. }
            | Pattern::EnumVariant { location, .. } => location.clone(),
        }
    }
}
