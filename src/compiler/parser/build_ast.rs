//! Declaration and statement parsing.
//!
//! Recursive descent over the preprocessed token stream. Errors accumulate;
//! recovery happens at top-level declaration boundaries and at statement
//! boundaries inside blocks, so a single mistake doesn't hide the rest of the
//! file. Output is deterministic for a given token stream.

use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::parser::ast_nodes::*;
use crate::compiler::parser::expressions::{parse_expression, parse_pattern};
use crate::compiler::parser::TokenCursor;
use crate::compiler::source::SourceMap;
use crate::compiler::tokenizer::tokens::{FileTokens, Keyword, TokenKind};

pub struct ParseOutcome {
    pub ast: ModuleAst,
    pub errors: Vec<CompileError>,
}

pub fn parse_module(file_tokens: &FileTokens, sources: &SourceMap) -> ParseOutcome {
    let mut cursor = TokenCursor::new(&file_tokens.tokens, sources);
    let mut decls: Vec<Decl> = Vec::new();
    let mut errors: Vec<CompileError> = Vec::new();

    while !cursor.at_eof() {
        match parse_decl(&mut cursor) {
            Ok(decl) => decls.push(decl),
            Err(error) => {
                errors.push(error);
                cursor.recover_to_decl_boundary();
            }
        }
    }

    ParseOutcome {
        ast: ModuleAst { decls },
        errors,
    }
}

fn parse_decl(cursor: &mut TokenCursor) -> Result<Decl, CompileError> {
    let doc = collect_doc_comment(cursor);
    let annotations = collect_annotations(cursor)?;

    let visibility = if cursor.eat(&TokenKind::Keyword(Keyword::Pub)) {
        Visibility::Public
    } else {
        Visibility::Private
    };

    // Class modifiers may precede the `class` keyword in any order
    let mut is_abstract = false;
    let mut is_sealed = false;
    loop {
        match cursor.peek() {
            TokenKind::Keyword(Keyword::Abstract) => {
                cursor.advance();
                is_abstract = true;
            }
            TokenKind::Keyword(Keyword::Sealed) => {
                cursor.advance();
                is_sealed = true;
            }
            _ => break,
        }
    }

    let location = cursor.location();
    match cursor.peek().clone() {
        TokenKind::Keyword(Keyword::Func) => {
            let func = parse_function(cursor, visibility, false, annotations, doc)?;
            Ok(Decl::Function(func))
        }
        TokenKind::Keyword(Keyword::Async) => {
            cursor.advance();
            cursor.expect(&TokenKind::Keyword(Keyword::Func), "after 'async'")?;
            let mut func = parse_function_after_keyword(cursor, visibility, annotations, doc)?;
            func.is_async = true;
            Ok(Decl::Function(func))
        }
        TokenKind::Keyword(Keyword::Struct) => parse_struct(cursor, visibility, doc).map(Decl::Struct),
        TokenKind::Keyword(Keyword::Enum) => parse_enum(cursor, visibility, doc).map(Decl::Enum),
        TokenKind::Keyword(Keyword::Behavior) => {
            parse_behavior(cursor, visibility, doc).map(Decl::Behavior)
        }
        TokenKind::Keyword(Keyword::Impl) => parse_impl(cursor).map(Decl::Impl),
        TokenKind::Keyword(Keyword::Class) => {
            parse_class(cursor, visibility, is_abstract, is_sealed, false, doc).map(Decl::Class)
        }
        TokenKind::Identifier(word) if word == "value" && is_class_next(cursor) => {
            cursor.advance();
            parse_class(cursor, visibility, is_abstract, is_sealed, true, doc).map(Decl::Class)
        }
        TokenKind::Keyword(Keyword::Interface) => {
            parse_interface(cursor, visibility, doc).map(Decl::Interface)
        }
        TokenKind::Keyword(Keyword::Const) => parse_const(cursor, visibility, doc).map(Decl::Const),
        TokenKind::Keyword(Keyword::Type) => parse_type_alias(cursor, visibility).map(Decl::TypeAlias),
        TokenKind::Keyword(Keyword::Use) => parse_use(cursor, visibility).map(Decl::Use),
        TokenKind::Keyword(Keyword::Mod) => {
            cursor.advance();
            let name = cursor.expect_identifier("after 'mod'")?;
            Ok(Decl::Mod(ModDecl {
                name,
                visibility,
                location,
            }))
        }
        TokenKind::Keyword(Keyword::Extern) => parse_extern_block(cursor).map(Decl::Extern),
        found => Err(CompileError::new(
            format!("Expected a declaration, found {found}"),
            location.to_error_location(cursor.sources),
            ErrorCode::P003,
        )),
    }
}

fn is_class_next(cursor: &mut TokenCursor) -> bool {
    *cursor.peek_second() == TokenKind::Keyword(Keyword::Class)
}

fn collect_doc_comment(cursor: &mut TokenCursor) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    while let TokenKind::DocComment(text) = cursor.peek().clone() {
        lines.push(text);
        cursor.advance();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// `@test`, `@expect-error T001`, `@deprecated "msg"`, `@since 1.2`, `@lowlevel`
fn collect_annotations(cursor: &mut TokenCursor) -> Result<Vec<Annotation>, CompileError> {
    let mut annotations = Vec::new();
    while *cursor.peek() == TokenKind::At {
        cursor.advance();
        let mut name = cursor.expect_identifier("after '@'")?;
        // Annotation names may be hyphenated, e.g. `expect-error`
        while *cursor.peek_raw() == TokenKind::Minus {
            cursor.advance();
            name.push('-');
            name.push_str(&cursor.expect_identifier("in annotation name")?);
        }
        let argument = match cursor.peek_raw().clone() {
            TokenKind::Identifier(arg) => {
                cursor.advance();
                Some(arg)
            }
            TokenKind::StringLiteral(parts) => {
                cursor.advance();
                Some(
                    parts
                        .iter()
                        .filter_map(|part| match part {
                            crate::compiler::tokenizer::tokens::StringPart::Text(text) => {
                                Some(text.as_str())
                            }
                            _ => None,
                        })
                        .collect::<String>(),
                )
            }
            _ => None,
        };
        annotations.push(Annotation { name, argument });
    }
    Ok(annotations)
}

fn parse_function(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    is_async: bool,
    annotations: Vec<Annotation>,
    doc: Option<String>,
) -> Result<FunctionDecl, CompileError> {
    cursor.expect(&TokenKind::Keyword(Keyword::Func), "to start a function")?;
    let mut func = parse_function_after_keyword(cursor, visibility, annotations, doc)?;
    func.is_async = is_async;
    Ok(func)
}

/// Everything after the `func` keyword: name, generics, params, return type,
/// where clause, and body (absent for behavior method signatures).
fn parse_function_after_keyword(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    annotations: Vec<Annotation>,
    doc: Option<String>,
) -> Result<FunctionDecl, CompileError> {
    let location = cursor.location();
    let name = cursor.expect_identifier("as the function name")?;
    let type_params = parse_type_params(cursor)?;
    let params = parse_params(cursor)?;

    let return_type = if cursor.eat(&TokenKind::Arrow) {
        Some(parse_type_expr(cursor)?)
    } else {
        None
    };

    let where_constraints = parse_where_clause(cursor)?;
    let is_lowlevel = annotations.iter().any(|annotation| annotation.name == "lowlevel");

    let body = if *cursor.peek() == TokenKind::OpenBrace {
        Some(parse_block(cursor)?)
    } else {
        None
    };

    Ok(FunctionDecl {
        name,
        visibility,
        type_params,
        params,
        return_type,
        where_constraints,
        body,
        is_async: false,
        is_lowlevel,
        annotations,
        doc,
        location,
    })
}

/// `[T, U]` after a declaration name. Zero type parameters behaves exactly
/// like a non-generic declaration.
fn parse_type_params(cursor: &mut TokenCursor) -> Result<Vec<String>, CompileError> {
    let mut params = Vec::new();
    if !cursor.eat(&TokenKind::OpenBracket) {
        return Ok(params);
    }
    loop {
        if cursor.eat(&TokenKind::CloseBracket) {
            break;
        }
        params.push(cursor.expect_identifier("as a type parameter")?);
        if !cursor.eat(&TokenKind::Comma) {
            cursor.expect(&TokenKind::CloseBracket, "to close type parameters")?;
            break;
        }
    }
    Ok(params)
}

fn parse_params(cursor: &mut TokenCursor) -> Result<Vec<Param>, CompileError> {
    cursor.expect(&TokenKind::OpenParen, "to start the parameter list")?;
    let mut params = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseParen) {
            break;
        }
        let location = cursor.location();
        let is_mut = cursor.eat(&TokenKind::Keyword(Keyword::Mut));

        // `self`, `&self`, `&mut self` receivers become a param named "self"
        if cursor.eat(&TokenKind::Keyword(Keyword::SelfValue)) {
            params.push(Param {
                name: String::from("self"),
                type_expr: TypeExpr::SelfType,
                is_mut,
                location,
            });
        } else if *cursor.peek() == TokenKind::Amp
            && matches!(
                cursor.peek_second(),
                TokenKind::Keyword(Keyword::SelfValue) | TokenKind::Keyword(Keyword::Mut)
            )
        {
            cursor.advance();
            let mutable = cursor.eat(&TokenKind::Keyword(Keyword::Mut));
            cursor.expect(&TokenKind::Keyword(Keyword::SelfValue), "in receiver")?;
            params.push(Param {
                name: String::from("self"),
                type_expr: TypeExpr::Reference {
                    target: Box::new(TypeExpr::SelfType),
                    mutable,
                    lifetime: None,
                },
                is_mut: false,
                location,
            });
        } else {
            let name = cursor.expect_identifier("as a parameter name")?;
            cursor.expect(&TokenKind::Colon, "after the parameter name")?;
            let type_expr = parse_type_expr(cursor)?;
            params.push(Param {
                name,
                type_expr,
                is_mut,
                location,
            });
        }

        if !cursor.eat(&TokenKind::Comma) {
            cursor.expect(&TokenKind::CloseParen, "to close the parameter list")?;
            break;
        }
    }
    Ok(params)
}

/// `where T: Printable + From[I32], U: Clone`
fn parse_where_clause(cursor: &mut TokenCursor) -> Result<Vec<WhereConstraint>, CompileError> {
    let mut constraints = Vec::new();
    if !cursor.eat(&TokenKind::Keyword(Keyword::Where)) {
        return Ok(constraints);
    }

    loop {
        let type_param = cursor.expect_identifier("as a constrained type parameter")?;
        cursor.expect(&TokenKind::Colon, "after the type parameter")?;

        let mut required_behaviors = Vec::new();
        let mut parameterized_bounds = Vec::new();
        loop {
            let behavior = cursor.expect_identifier("as a behavior bound")?;
            if *cursor.peek() == TokenKind::OpenBracket {
                let args = parse_type_args(cursor)?;
                parameterized_bounds.push((behavior, args));
            } else {
                required_behaviors.push(behavior);
            }
            if !cursor.eat(&TokenKind::Plus) {
                break;
            }
        }

        constraints.push(WhereConstraint {
            type_param,
            required_behaviors,
            parameterized_bounds,
        });

        if !cursor.eat(&TokenKind::Comma) {
            break;
        }
        // Allow a trailing comma before the body
        if *cursor.peek() == TokenKind::OpenBrace {
            break;
        }
    }

    Ok(constraints)
}

fn parse_struct(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    doc: Option<String>,
) -> Result<StructDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // struct
    let name = cursor.expect_identifier("as the struct name")?;
    let type_params = parse_type_params(cursor)?;
    cursor.expect(&TokenKind::OpenBrace, "to open the struct body")?;

    let mut fields = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let field_location = cursor.location();
        let field_visibility = if cursor.eat(&TokenKind::Keyword(Keyword::Pub)) {
            Visibility::Public
        } else {
            Visibility::Private
        };
        let field_name = cursor.expect_identifier("as a field name")?;
        cursor.expect(&TokenKind::Colon, "after the field name")?;
        let type_expr = parse_type_expr(cursor)?;
        fields.push(FieldDecl {
            name: field_name,
            visibility: field_visibility,
            type_expr,
            location: field_location,
        });
        cursor.eat(&TokenKind::Comma);
    }

    Ok(StructDecl {
        name,
        visibility,
        type_params,
        fields,
        doc,
        location,
    })
}

fn parse_enum(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    doc: Option<String>,
) -> Result<EnumDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // enum
    let name = cursor.expect_identifier("as the enum name")?;
    let type_params = parse_type_params(cursor)?;
    cursor.expect(&TokenKind::OpenBrace, "to open the enum body")?;

    let mut variants = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let variant_location = cursor.location();
        let variant_name = cursor.expect_identifier("as a variant name")?;
        let mut payload = Vec::new();
        if cursor.eat(&TokenKind::OpenParen) {
            loop {
                if cursor.eat(&TokenKind::CloseParen) {
                    break;
                }
                payload.push(parse_type_expr(cursor)?);
                if !cursor.eat(&TokenKind::Comma) {
                    cursor.expect(&TokenKind::CloseParen, "to close the variant payload")?;
                    break;
                }
            }
        }
        variants.push(VariantDecl {
            name: variant_name,
            payload,
            location: variant_location,
        });
        cursor.eat(&TokenKind::Comma);
    }

    Ok(EnumDecl {
        name,
        visibility,
        type_params,
        variants,
        doc,
        location,
    })
}

fn parse_behavior(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    doc: Option<String>,
) -> Result<BehaviorDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // behavior
    let name = cursor.expect_identifier("as the behavior name")?;
    let type_params = parse_type_params(cursor)?;

    let mut super_behaviors = Vec::new();
    if cursor.eat(&TokenKind::Colon) {
        loop {
            super_behaviors.push(cursor.expect_identifier("as a super-behavior")?);
            if !cursor.eat(&TokenKind::Plus) {
                break;
            }
        }
    }

    cursor.expect(&TokenKind::OpenBrace, "to open the behavior body")?;

    let mut associated_types = Vec::new();
    let mut methods = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let doc = collect_doc_comment(cursor);
        match cursor.peek() {
            TokenKind::Keyword(Keyword::Type) => {
                cursor.advance();
                associated_types.push(cursor.expect_identifier("as an associated type name")?);
            }
            TokenKind::Keyword(Keyword::Func) => {
                cursor.advance();
                // Default bodies are allowed; signature-only methods have none
                let method =
                    parse_function_after_keyword(cursor, Visibility::Public, Vec::new(), doc)?;
                methods.push(method);
            }
            found => {
                let found = found.clone();
                let location = cursor.location();
                return Err(CompileError::new(
                    format!("Expected 'func' or 'type' in behavior body, found {found}"),
                    location.to_error_location(cursor.sources),
                    ErrorCode::P003,
                ));
            }
        }
    }

    Ok(BehaviorDecl {
        name,
        visibility,
        type_params,
        super_behaviors,
        associated_types,
        methods,
        doc,
        location,
    })
}

fn parse_impl(cursor: &mut TokenCursor) -> Result<ImplDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // impl
    let type_params = parse_type_params(cursor)?;

    // Either `impl Type` or `impl Behavior for Type`
    let first = parse_type_expr(cursor)?;
    let (behavior, target) = if *cursor.peek() == TokenKind::Keyword(Keyword::For) {
        cursor.advance();
        let target = parse_type_expr(cursor)?;
        let behavior_name = match first {
            TypeExpr::Named { name, .. } => name,
            other => {
                return Err(CompileError::new(
                    format!("Expected a behavior name before 'for', found {other:?}"),
                    location.to_error_location(cursor.sources),
                    ErrorCode::P003,
                ));
            }
        };
        (Some(behavior_name), target)
    } else {
        (None, first)
    };

    let where_constraints = parse_where_clause(cursor)?;
    cursor.expect(&TokenKind::OpenBrace, "to open the impl body")?;

    let mut methods = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let doc = collect_doc_comment(cursor);
        let annotations = collect_annotations(cursor)?;
        let visibility = if cursor.eat(&TokenKind::Keyword(Keyword::Pub)) {
            Visibility::Public
        } else {
            Visibility::Private
        };
        cursor.expect(&TokenKind::Keyword(Keyword::Func), "in impl body")?;
        methods.push(parse_function_after_keyword(
            cursor,
            visibility,
            annotations,
            doc,
        )?);
    }

    Ok(ImplDecl {
        target,
        behavior,
        type_params,
        where_constraints,
        methods,
        location,
    })
}

fn parse_class(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    is_abstract: bool,
    is_sealed: bool,
    is_value: bool,
    doc: Option<String>,
) -> Result<ClassDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // class
    let name = cursor.expect_identifier("as the class name")?;
    let type_params = parse_type_params(cursor)?;

    let mut extends = None;
    let mut implements = Vec::new();
    if cursor.eat(&TokenKind::Colon) {
        // First name is the base class; the rest are interfaces
        extends = Some(cursor.expect_identifier("as the base class")?);
        while cursor.eat(&TokenKind::Comma) {
            implements.push(cursor.expect_identifier("as an implemented interface")?);
        }
    }

    cursor.expect(&TokenKind::OpenBrace, "to open the class body")?;

    let mut fields = Vec::new();
    let mut methods = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let doc = collect_doc_comment(cursor);
        let annotations = collect_annotations(cursor)?;
        let member_location = cursor.location();
        let member_visibility = if cursor.eat(&TokenKind::Keyword(Keyword::Pub)) {
            Visibility::Public
        } else if matches!(cursor.peek(), TokenKind::Identifier(word) if word == "protected") {
            cursor.advance();
            Visibility::Protected
        } else {
            Visibility::Private
        };

        let mut modifier = MethodModifier::None;
        let mut is_static = false;
        loop {
            match cursor.peek() {
                TokenKind::Keyword(Keyword::Abstract) => {
                    cursor.advance();
                    modifier = MethodModifier::Abstract;
                }
                TokenKind::Keyword(Keyword::Virtual) => {
                    cursor.advance();
                    modifier = MethodModifier::Virtual;
                }
                TokenKind::Keyword(Keyword::Override) => {
                    cursor.advance();
                    modifier = MethodModifier::Override;
                }
                TokenKind::Keyword(Keyword::Final) => {
                    cursor.advance();
                    modifier = MethodModifier::Final;
                }
                TokenKind::Keyword(Keyword::Static) => {
                    cursor.advance();
                    is_static = true;
                }
                _ => break,
            }
        }

        if cursor.eat(&TokenKind::Keyword(Keyword::Func)) {
            let func = parse_function_after_keyword(cursor, member_visibility, annotations, doc)?;
            methods.push(ClassMethod {
                modifier,
                is_static,
                func,
            });
        } else {
            let field_name = cursor.expect_identifier("as a class member")?;
            cursor.expect(&TokenKind::Colon, "after the field name")?;
            let type_expr = parse_type_expr(cursor)?;
            fields.push(FieldDecl {
                name: field_name,
                visibility: member_visibility,
                type_expr,
                location: member_location,
            });
            cursor.eat(&TokenKind::Comma);
        }
    }

    Ok(ClassDecl {
        name,
        visibility,
        type_params,
        is_abstract,
        is_sealed,
        is_value,
        extends,
        implements,
        fields,
        methods,
        doc,
        location,
    })
}

fn parse_interface(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    doc: Option<String>,
) -> Result<InterfaceDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // interface
    let name = cursor.expect_identifier("as the interface name")?;
    let type_params = parse_type_params(cursor)?;

    let mut extends = Vec::new();
    if cursor.eat(&TokenKind::Colon) {
        loop {
            extends.push(cursor.expect_identifier("as an extended interface")?);
            if !cursor.eat(&TokenKind::Comma) {
                break;
            }
        }
    }

    cursor.expect(&TokenKind::OpenBrace, "to open the interface body")?;
    let mut methods = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let doc = collect_doc_comment(cursor);
        cursor.expect(&TokenKind::Keyword(Keyword::Func), "in interface body")?;
        methods.push(parse_function_after_keyword(
            cursor,
            Visibility::Public,
            Vec::new(),
            doc,
        )?);
    }

    Ok(InterfaceDecl {
        name,
        visibility,
        type_params,
        extends,
        methods,
        doc,
        location,
    })
}

fn parse_const(
    cursor: &mut TokenCursor,
    visibility: Visibility,
    doc: Option<String>,
) -> Result<ConstDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // const
    let name = cursor.expect_identifier("as the constant name")?;
    let type_expr = if cursor.eat(&TokenKind::Colon) {
        Some(parse_type_expr(cursor)?)
    } else {
        None
    };
    cursor.expect(&TokenKind::Eq, "after the constant name")?;
    let value = parse_expression(cursor, 0, true)?;
    Ok(ConstDecl {
        name,
        visibility,
        type_expr,
        value,
        doc,
        location,
    })
}

fn parse_type_alias(
    cursor: &mut TokenCursor,
    visibility: Visibility,
) -> Result<TypeAliasDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // type
    let name = cursor.expect_identifier("as the alias name")?;
    let type_params = parse_type_params(cursor)?;
    cursor.expect(&TokenKind::Eq, "after the alias name")?;
    let target = parse_type_expr(cursor)?;
    Ok(TypeAliasDecl {
        name,
        visibility,
        type_params,
        target,
        location,
    })
}

fn parse_use(cursor: &mut TokenCursor, visibility: Visibility) -> Result<UseDecl, CompileError> {
    let location = cursor.location();
    cursor.advance(); // use

    let mut segments = vec![cursor.expect_identifier("after 'use'")?];
    let mut target = None;

    while cursor.eat(&TokenKind::PathSep) {
        match cursor.peek().clone() {
            TokenKind::Star => {
                cursor.advance();
                target = Some(UseTarget::Glob);
                break;
            }
            TokenKind::OpenBrace => {
                cursor.advance();
                let mut list = Vec::new();
                loop {
                    if cursor.eat(&TokenKind::CloseBrace) {
                        break;
                    }
                    let name = cursor.expect_identifier("in import list")?;
                    let alias = if cursor.eat(&TokenKind::Keyword(Keyword::As)) {
                        Some(cursor.expect_identifier("after 'as'")?)
                    } else {
                        None
                    };
                    list.push((name, alias));
                    if !cursor.eat(&TokenKind::Comma) {
                        cursor.expect(&TokenKind::CloseBrace, "to close the import list")?;
                        break;
                    }
                }
                target = Some(UseTarget::List(list));
                break;
            }
            _ => segments.push(cursor.expect_identifier("in module path")?),
        }
    }

    let target = match target {
        Some(target) => target,
        None => {
            // The final segment is the imported symbol
            let name = segments.pop().ok_or_else(|| {
                CompileError::new(
                    "Empty use path",
                    location.to_error_location(cursor.sources),
                    ErrorCode::P003,
                )
            })?;
            let alias = if cursor.eat(&TokenKind::Keyword(Keyword::As)) {
                Some(cursor.expect_identifier("after 'as'")?)
            } else {
                None
            };
            UseTarget::Single { name, alias }
        }
    };

    Ok(UseDecl {
        module_path: segments,
        target,
        is_public: visibility == Visibility::Public,
        location,
    })
}

fn parse_extern_block(cursor: &mut TokenCursor) -> Result<ExternBlock, CompileError> {
    let location = cursor.location();
    cursor.advance(); // extern

    let abi = match cursor.peek().clone() {
        TokenKind::StringLiteral(parts) => {
            cursor.advance();
            parts
                .iter()
                .filter_map(|part| match part {
                    crate::compiler::tokenizer::tokens::StringPart::Text(text) => {
                        Some(text.as_str())
                    }
                    _ => None,
                })
                .collect::<String>()
        }
        _ => String::from("C"),
    };

    cursor.expect(&TokenKind::OpenBrace, "to open the extern block")?;

    let mut functions = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let annotations = collect_annotations(cursor)?;
        let func_location = cursor.location();
        cursor.expect(&TokenKind::Keyword(Keyword::Func), "in extern block")?;
        let name = cursor.expect_identifier("as the extern function name")?;
        cursor.expect(&TokenKind::OpenParen, "to start extern parameters")?;

        let mut params = Vec::new();
        let mut varargs = false;
        loop {
            if cursor.eat(&TokenKind::CloseParen) {
                break;
            }
            if cursor.eat(&TokenKind::DotDot) {
                // `..` marks C varargs in extern declarations
                varargs = true;
                cursor.expect(&TokenKind::CloseParen, "after varargs marker")?;
                break;
            }
            let param_location = cursor.location();
            let param_name = cursor.expect_identifier("as a parameter name")?;
            cursor.expect(&TokenKind::Colon, "after the parameter name")?;
            let type_expr = parse_type_expr(cursor)?;
            params.push(Param {
                name: param_name,
                type_expr,
                is_mut: false,
                location: param_location,
            });
            if !cursor.eat(&TokenKind::Comma) {
                cursor.expect(&TokenKind::CloseParen, "to close extern parameters")?;
                break;
            }
        }

        let return_type = if cursor.eat(&TokenKind::Arrow) {
            Some(parse_type_expr(cursor)?)
        } else {
            None
        };

        let extern_name = annotations
            .iter()
            .find(|annotation| annotation.name == "link_name")
            .and_then(|annotation| annotation.argument.clone());

        functions.push(ExternFunction {
            name,
            extern_name,
            params,
            return_type,
            varargs,
            location: func_location,
        });
    }

    Ok(ExternBlock {
        abi,
        functions,
        location,
    })
}

// ---------------------------------
//             Types
// ---------------------------------

pub fn parse_type_expr(cursor: &mut TokenCursor) -> Result<TypeExpr, CompileError> {
    match cursor.peek().clone() {
        TokenKind::Amp => {
            cursor.advance();
            // Optional lifetime tag: `&'a T`
            let lifetime = match cursor.peek().clone() {
                TokenKind::Lifetime(tag) => {
                    cursor.advance();
                    Some(tag)
                }
                _ => None,
            };
            let mutable = cursor.eat(&TokenKind::Keyword(Keyword::Mut));
            let target = parse_type_expr(cursor)?;
            Ok(TypeExpr::Reference {
                target: Box::new(target),
                mutable,
                lifetime,
            })
        }
        TokenKind::Star => {
            cursor.advance();
            let mutable = cursor.eat(&TokenKind::Keyword(Keyword::Mut));
            let target = parse_type_expr(cursor)?;
            Ok(TypeExpr::Pointer {
                target: Box::new(target),
                mutable,
            })
        }
        TokenKind::OpenBracket => {
            cursor.advance();
            let element = parse_type_expr(cursor)?;
            // `[T]` is a slice, `[T: N]` a sized array
            if cursor.eat(&TokenKind::Colon) {
                let location = cursor.location();
                let size = match cursor.peek().clone() {
                    TokenKind::IntLiteral(value, _) if value >= 0 => {
                        cursor.advance();
                        value as u64
                    }
                    found => {
                        return Err(CompileError::new(
                            format!("Expected an array size, found {found}"),
                            location.to_error_location(cursor.sources),
                            ErrorCode::P001,
                        ));
                    }
                };
                cursor.expect(&TokenKind::CloseBracket, "to close the array type")?;
                Ok(TypeExpr::Array {
                    element: Box::new(element),
                    size,
                })
            } else {
                cursor.expect(&TokenKind::CloseBracket, "to close the slice type")?;
                Ok(TypeExpr::Slice(Box::new(element)))
            }
        }
        TokenKind::OpenParen => {
            cursor.advance();
            let mut members = Vec::new();
            loop {
                if cursor.eat(&TokenKind::CloseParen) {
                    break;
                }
                members.push(parse_type_expr(cursor)?);
                if !cursor.eat(&TokenKind::Comma) {
                    cursor.expect(&TokenKind::CloseParen, "to close the tuple type")?;
                    break;
                }
            }
            Ok(TypeExpr::Tuple(members))
        }
        TokenKind::Keyword(Keyword::Func) => {
            cursor.advance();
            cursor.expect(&TokenKind::OpenParen, "in function type")?;
            let mut params = Vec::new();
            loop {
                if cursor.eat(&TokenKind::CloseParen) {
                    break;
                }
                params.push(parse_type_expr(cursor)?);
                if !cursor.eat(&TokenKind::Comma) {
                    cursor.expect(&TokenKind::CloseParen, "to close function type params")?;
                    break;
                }
            }
            let return_type = if cursor.eat(&TokenKind::Arrow) {
                Some(Box::new(parse_type_expr(cursor)?))
            } else {
                None
            };
            Ok(TypeExpr::Function {
                params,
                return_type,
            })
        }
        TokenKind::Keyword(Keyword::Dyn) => {
            cursor.advance();
            let mutable = cursor.eat(&TokenKind::Keyword(Keyword::Mut));
            let behavior = cursor.expect_identifier("as the behavior name after 'dyn'")?;
            let type_args = if *cursor.peek() == TokenKind::OpenBracket {
                parse_type_args(cursor)?
            } else {
                Vec::new()
            };
            Ok(TypeExpr::DynBehavior {
                behavior,
                type_args,
                mutable,
            })
        }
        TokenKind::Keyword(Keyword::SelfType) => {
            cursor.advance();
            Ok(TypeExpr::SelfType)
        }
        TokenKind::Identifier(_) => {
            let name = cursor.expect_identifier("as a type name")?;
            let type_args = if *cursor.peek() == TokenKind::OpenBracket {
                parse_type_args(cursor)?
            } else {
                Vec::new()
            };
            Ok(TypeExpr::Named { name, type_args })
        }
        found => {
            let location = cursor.location();
            Err(CompileError::new(
                format!("Expected a type, found {found}"),
                location.to_error_location(cursor.sources),
                ErrorCode::P001,
            ))
        }
    }
}

pub fn parse_type_args(cursor: &mut TokenCursor) -> Result<Vec<TypeExpr>, CompileError> {
    cursor.expect(&TokenKind::OpenBracket, "to open type arguments")?;
    let mut args = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBracket) {
            break;
        }
        args.push(parse_type_expr(cursor)?);
        if !cursor.eat(&TokenKind::Comma) {
            cursor.expect(&TokenKind::CloseBracket, "to close type arguments")?;
            break;
        }
    }
    Ok(args)
}

// ---------------------------------
//           Statements
// ---------------------------------

pub fn parse_block(cursor: &mut TokenCursor) -> Result<Block, CompileError> {
    let location = cursor.location();
    cursor.expect(&TokenKind::OpenBrace, "to open a block")?;

    let mut statements = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        if cursor.at_eof() {
            return Err(CompileError::new(
                "Unclosed block at end of file",
                location.to_error_location(cursor.sources),
                ErrorCode::P002,
            ));
        }
        statements.push(parse_statement(cursor)?);
    }

    Ok(Block {
        statements,
        location,
    })
}

pub fn parse_statement(cursor: &mut TokenCursor) -> Result<Stmt, CompileError> {
    let location = cursor.location();
    match cursor.peek().clone() {
        TokenKind::Keyword(Keyword::Let) => {
            cursor.advance();
            let pattern = parse_pattern(cursor)?;
            let type_expr = if cursor.eat(&TokenKind::Colon) {
                Some(parse_type_expr(cursor)?)
            } else {
                None
            };
            cursor.expect(&TokenKind::Eq, "in let statement")?;
            let value = parse_expression(cursor, 0, true)?;
            Ok(Stmt::Let {
                pattern,
                type_expr,
                value,
                location,
            })
        }
        TokenKind::Keyword(Keyword::Return) => {
            cursor.advance();
            let value = match cursor.peek_raw() {
                TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::CloseBrace
                | TokenKind::Eof => None,
                _ => Some(parse_expression(cursor, 0, true)?),
            };
            Ok(Stmt::Return { value, location })
        }
        TokenKind::Keyword(Keyword::Break) => {
            cursor.advance();
            Ok(Stmt::Break { location })
        }
        TokenKind::Keyword(Keyword::Continue) => {
            cursor.advance();
            Ok(Stmt::Continue { location })
        }
        TokenKind::Keyword(Keyword::While) => {
            cursor.advance();
            let condition = parse_expression(cursor, 0, false)?;
            let body = parse_block(cursor)?;
            Ok(Stmt::While {
                condition,
                body,
                location,
            })
        }
        TokenKind::Keyword(Keyword::Loop) => {
            cursor.advance();
            let body = parse_block(cursor)?;
            Ok(Stmt::Loop { body, location })
        }
        TokenKind::Keyword(Keyword::For) => {
            cursor.advance();
            let pattern = parse_pattern(cursor)?;
            cursor.expect(&TokenKind::Keyword(Keyword::In), "in for loop")?;
            let iterable = parse_expression(cursor, 0, false)?;
            let body = parse_block(cursor)?;
            Ok(Stmt::For {
                pattern,
                iterable,
                body,
                location,
            })
        }
        _ => {
            let expr = parse_expression(cursor, 0, true)?;
            // An assignment operator after a place expression makes this an
            // assignment statement
            let op = match cursor.peek_raw() {
                TokenKind::Eq => Some(AssignOp::Assign),
                TokenKind::PlusEq => Some(AssignOp::AddAssign),
                TokenKind::MinusEq => Some(AssignOp::SubAssign),
                TokenKind::StarEq => Some(AssignOp::MulAssign),
                TokenKind::SlashEq => Some(AssignOp::DivAssign),
                _ => None,
            };
            match op {
                Some(op) => {
                    cursor.advance();
                    let value = parse_expression(cursor, 0, true)?;
                    Ok(Stmt::Assign {
                        target: expr,
                        op,
                        value,
                        location,
                    })
                }
                None => Ok(Stmt::Expr(expr)),
            }
        }
    }
}
