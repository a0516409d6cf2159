//! Expression and pattern parsing.
//!
//! Precedence climbing for binary operators; method-call chains, field
//! accesses and index expressions are left-associative postfix forms.
//! `allow_struct` is false in condition position so `if x { ... }` does not
//! parse `x { ... }` as a struct literal.

use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::parser::ast_nodes::*;
use crate::compiler::parser::build_ast::{parse_block, parse_type_args, parse_type_expr};
use crate::compiler::parser::TokenCursor;
use crate::compiler::tokenizer::tokens::{Keyword, StringPart, TokenKind};

fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
    // Higher binds tighter
    match kind {
        TokenKind::OrOr => Some((BinaryOp::Or, 1)),
        TokenKind::AndAnd => Some((BinaryOp::And, 2)),
        TokenKind::EqEq => Some((BinaryOp::Eq, 3)),
        TokenKind::NotEq => Some((BinaryOp::NotEq, 3)),
        TokenKind::Lt => Some((BinaryOp::Lt, 4)),
        TokenKind::Gt => Some((BinaryOp::Gt, 4)),
        TokenKind::LtEq => Some((BinaryOp::LtEq, 4)),
        TokenKind::GtEq => Some((BinaryOp::GtEq, 4)),
        TokenKind::Pipe => Some((BinaryOp::BitOr, 5)),
        TokenKind::Caret => Some((BinaryOp::BitXor, 6)),
        TokenKind::Amp => Some((BinaryOp::BitAnd, 7)),
        TokenKind::Shl => Some((BinaryOp::Shl, 8)),
        TokenKind::Shr => Some((BinaryOp::Shr, 8)),
        TokenKind::Plus => Some((BinaryOp::Add, 9)),
        TokenKind::Minus => Some((BinaryOp::Sub, 9)),
        TokenKind::Star => Some((BinaryOp::Mul, 10)),
        TokenKind::Slash => Some((BinaryOp::Div, 10)),
        TokenKind::Percent => Some((BinaryOp::Rem, 10)),
        _ => None,
    }
}

pub fn parse_expression(
    cursor: &mut TokenCursor,
    min_precedence: u8,
    allow_struct: bool,
) -> Result<Expr, CompileError> {
    let location = cursor.location();
    let mut lhs = parse_unary(cursor, allow_struct)?;

    // Range expressions sit below all binary operators
    if min_precedence == 0 {
        if let TokenKind::DotDot | TokenKind::DotDotEq = cursor.peek_raw() {
            let inclusive = *cursor.peek_raw() == TokenKind::DotDotEq;
            cursor.advance();
            let end = match cursor.peek_raw() {
                TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::CloseBrace
                | TokenKind::CloseParen
                | TokenKind::CloseBracket
                | TokenKind::OpenBrace
                | TokenKind::Comma
                | TokenKind::Eof => None,
                _ => Some(Box::new(parse_expression(cursor, 1, allow_struct)?)),
            };
            return Ok(Expr::Range {
                start: Some(Box::new(lhs)),
                end,
                inclusive,
                location,
            });
        }
    }

    loop {
        let (op, precedence) = match binary_op(cursor.peek_raw()) {
            Some(pair) if pair.1 >= min_precedence.max(1) => pair,
            _ => break,
        };
        cursor.advance();
        let rhs = parse_expression(cursor, precedence + 1, allow_struct)?;
        lhs = Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            location: location.clone(),
        };
    }

    Ok(lhs)
}

fn parse_unary(cursor: &mut TokenCursor, allow_struct: bool) -> Result<Expr, CompileError> {
    let location = cursor.location();
    match cursor.peek().clone() {
        TokenKind::Minus => {
            cursor.advance();
            let operand = parse_unary(cursor, allow_struct)?;
            Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                location,
            })
        }
        TokenKind::Not => {
            cursor.advance();
            let operand = parse_unary(cursor, allow_struct)?;
            Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                location,
            })
        }
        TokenKind::Amp => {
            cursor.advance();
            let mutable = cursor.eat(&TokenKind::Keyword(Keyword::Mut));
            let operand = parse_unary(cursor, allow_struct)?;
            Ok(Expr::Unary {
                op: if mutable { UnaryOp::RefMut } else { UnaryOp::Ref },
                operand: Box::new(operand),
                location,
            })
        }
        TokenKind::Star => {
            cursor.advance();
            let operand = parse_unary(cursor, allow_struct)?;
            Ok(Expr::Unary {
                op: UnaryOp::Deref,
                operand: Box::new(operand),
                location,
            })
        }
        TokenKind::Keyword(Keyword::Await) => {
            cursor.advance();
            let operand = parse_unary(cursor, allow_struct)?;
            Ok(Expr::Await(Box::new(operand), location))
        }
        _ => parse_postfix(cursor, allow_struct),
    }
}

fn parse_postfix(cursor: &mut TokenCursor, allow_struct: bool) -> Result<Expr, CompileError> {
    let mut expr = parse_primary(cursor, allow_struct)?;

    loop {
        match cursor.peek_raw().clone() {
            TokenKind::Dot => {
                cursor.advance();
                let location = cursor.location();
                let name = cursor.expect_identifier("after '.'")?;
                // Explicit method type args: `x.parse[I32]()`. A bracket
                // group not followed by a call is an index on the field, so
                // the speculative parse rewinds.
                let mut type_args = Vec::new();
                if *cursor.peek_raw() == TokenKind::OpenBracket && type_args_ahead(cursor) {
                    let checkpoint = cursor.position();
                    match parse_type_args(cursor) {
                        Ok(parsed) if *cursor.peek_raw() == TokenKind::OpenParen => {
                            type_args = parsed;
                        }
                        _ => cursor.rewind(checkpoint),
                    }
                }
                if *cursor.peek_raw() == TokenKind::OpenParen {
                    let args = parse_call_args(cursor)?;
                    expr = Expr::MethodCall {
                        receiver: Box::new(expr),
                        method: name,
                        type_args,
                        args,
                        location,
                    };
                } else {
                    expr = Expr::Field {
                        receiver: Box::new(expr),
                        field: name,
                        location,
                    };
                }
            }
            TokenKind::OpenParen => {
                let location = cursor.location();
                let args = parse_call_args(cursor)?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    location,
                };
            }
            TokenKind::OpenBracket => {
                // Only a path can take explicit type arguments, and only
                // when a call or struct literal follows the bracket group;
                // everything else is an index
                let candidate = matches!(expr, Expr::Path { .. } | Expr::Identifier(..))
                    && type_args_ahead(cursor);
                let mut parsed_type_args = None;
                if candidate {
                    let checkpoint = cursor.position();
                    match parse_type_args(cursor) {
                        Ok(parsed)
                            if matches!(
                                cursor.peek_raw(),
                                TokenKind::OpenParen | TokenKind::OpenBrace
                            ) =>
                        {
                            parsed_type_args = Some(parsed);
                        }
                        _ => cursor.rewind(checkpoint),
                    }
                }
                if let Some(type_args) = parsed_type_args {
                    expr = match expr {
                        Expr::Identifier(name, location) => Expr::Path {
                            segments: vec![name],
                            type_args,
                            location,
                        },
                        Expr::Path {
                            segments, location, ..
                        } => Expr::Path {
                            segments,
                            type_args,
                            location,
                        },
                        other => other,
                    };
                } else {
                    let location = cursor.location();
                    cursor.advance();
                    let index = parse_expression(cursor, 0, true)?;
                    cursor.expect(&TokenKind::CloseBracket, "to close the index")?;
                    expr = Expr::Index {
                        receiver: Box::new(expr),
                        index: Box::new(index),
                        location,
                    };
                }
            }
            TokenKind::Question => {
                let location = cursor.location();
                cursor.advance();
                expr = Expr::Try(Box::new(expr), location);
            }
            TokenKind::Keyword(Keyword::As) => {
                let location = cursor.location();
                cursor.advance();
                let target = parse_type_expr(cursor)?;
                expr = Expr::Cast {
                    value: Box::new(expr),
                    target,
                    location,
                };
            }
            _ => return Ok(expr),
        }
    }
}

/// Lookahead for `foo[...]`: type args start with a type-ish token and the
/// bracket group is followed by `(` (a call) or `{` (a struct literal).
fn type_args_ahead(cursor: &mut TokenCursor) -> bool {
    matches!(
        cursor.peek_second(),
        TokenKind::Identifier(_)
            | TokenKind::Amp
            | TokenKind::Star
            | TokenKind::OpenBracket
            | TokenKind::Keyword(Keyword::Func | Keyword::Dyn | Keyword::SelfType)
    )
}

fn parse_call_args(cursor: &mut TokenCursor) -> Result<Vec<Expr>, CompileError> {
    cursor.expect(&TokenKind::OpenParen, "to open the argument list")?;
    let mut args = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseParen) {
            break;
        }
        args.push(parse_expression(cursor, 0, true)?);
        if !cursor.eat(&TokenKind::Comma) {
            cursor.expect(&TokenKind::CloseParen, "to close the argument list")?;
            break;
        }
    }
    Ok(args)
}

fn parse_primary(cursor: &mut TokenCursor, allow_struct: bool) -> Result<Expr, CompileError> {
    let location = cursor.location();
    match cursor.peek().clone() {
        TokenKind::IntLiteral(value, suffix) => {
            cursor.advance();
            Ok(Expr::Literal(Literal::Int(value, suffix), location))
        }
        TokenKind::FloatLiteral(value, suffix) => {
            cursor.advance();
            Ok(Expr::Literal(Literal::Float(value, suffix), location))
        }
        TokenKind::BoolLiteral(value) => {
            cursor.advance();
            Ok(Expr::Literal(Literal::Bool(value), location))
        }
        TokenKind::CharLiteral(value) => {
            cursor.advance();
            Ok(Expr::Literal(Literal::Char(value), location))
        }
        TokenKind::StringLiteral(parts) => {
            cursor.advance();
            parse_string_literal(cursor, parts, location)
        }
        TokenKind::Identifier(name) => {
            cursor.advance();
            // Qualified path `a::b::c`
            if *cursor.peek_raw() == TokenKind::PathSep {
                let mut segments = vec![name];
                while cursor.eat(&TokenKind::PathSep) {
                    segments.push(cursor.expect_identifier("in path")?);
                }
                let mut type_args = Vec::new();
                if *cursor.peek_raw() == TokenKind::OpenBracket && type_args_ahead(cursor) {
                    let checkpoint = cursor.position();
                    match parse_type_args(cursor) {
                        Ok(parsed)
                            if matches!(
                                cursor.peek_raw(),
                                TokenKind::OpenParen | TokenKind::OpenBrace
                            ) =>
                        {
                            type_args = parsed;
                        }
                        _ => cursor.rewind(checkpoint),
                    }
                }
                if allow_struct && *cursor.peek_raw() == TokenKind::OpenBrace {
                    let name = segments
                        .last()
                        .expect("path always has at least one segment")
                        .clone();
                    return parse_struct_literal(cursor, name, type_args, location);
                }
                return Ok(Expr::Path {
                    segments,
                    type_args,
                    location,
                });
            }

            // Struct literal `Point { x: 1 }`: type names are capitalized by
            // convention, which disambiguates from block-starting constructs
            if allow_struct
                && *cursor.peek_raw() == TokenKind::OpenBrace
                && name.chars().next().map(char::is_uppercase).unwrap_or(false)
            {
                return parse_struct_literal(cursor, name, Vec::new(), location);
            }

            Ok(Expr::Identifier(name, location))
        }
        TokenKind::Keyword(Keyword::SelfValue) => {
            cursor.advance();
            Ok(Expr::Identifier(String::from("self"), location))
        }
        TokenKind::Keyword(Keyword::SelfType) => {
            cursor.advance();
            if *cursor.peek_raw() == TokenKind::PathSep {
                let mut segments = vec![String::from("Self")];
                while cursor.eat(&TokenKind::PathSep) {
                    segments.push(cursor.expect_identifier("in path")?);
                }
                return Ok(Expr::Path {
                    segments,
                    type_args: Vec::new(),
                    location,
                });
            }
            Ok(Expr::Identifier(String::from("Self"), location))
        }
        TokenKind::OpenParen => {
            cursor.advance();
            if cursor.eat(&TokenKind::CloseParen) {
                return Ok(Expr::Literal(Literal::Unit, location));
            }
            let first = parse_expression(cursor, 0, true)?;
            if cursor.eat(&TokenKind::Comma) {
                let mut members = vec![first];
                loop {
                    if cursor.eat(&TokenKind::CloseParen) {
                        break;
                    }
                    members.push(parse_expression(cursor, 0, true)?);
                    if !cursor.eat(&TokenKind::Comma) {
                        cursor.expect(&TokenKind::CloseParen, "to close the tuple")?;
                        break;
                    }
                }
                Ok(Expr::Tuple(members, location))
            } else {
                cursor.expect(&TokenKind::CloseParen, "to close the group")?;
                Ok(first)
            }
        }
        TokenKind::OpenBracket => {
            cursor.advance();
            if cursor.eat(&TokenKind::CloseBracket) {
                return Ok(Expr::Array(Vec::new(), location));
            }
            let first = parse_expression(cursor, 0, true)?;
            // `[value: count]` repeats, `[a, b, c]` enumerates
            if cursor.eat(&TokenKind::Colon) {
                let count = parse_expression(cursor, 0, true)?;
                cursor.expect(&TokenKind::CloseBracket, "to close the array repeat")?;
                return Ok(Expr::ArrayRepeat {
                    value: Box::new(first),
                    count: Box::new(count),
                    location,
                });
            }
            let mut elements = vec![first];
            while cursor.eat(&TokenKind::Comma) {
                if *cursor.peek() == TokenKind::CloseBracket {
                    break;
                }
                elements.push(parse_expression(cursor, 0, true)?);
            }
            cursor.expect(&TokenKind::CloseBracket, "to close the array")?;
            Ok(Expr::Array(elements, location))
        }
        TokenKind::OpenBrace => {
            let block = parse_block(cursor)?;
            Ok(Expr::Block(block))
        }
        TokenKind::Keyword(Keyword::If) => parse_if(cursor),
        TokenKind::Keyword(Keyword::When) => parse_when(cursor),
        TokenKind::Keyword(Keyword::Try) => {
            cursor.advance();
            let operand = parse_expression(cursor, 0, allow_struct)?;
            Ok(Expr::Try(Box::new(operand), location))
        }
        TokenKind::Pipe | TokenKind::OrOr => parse_closure(cursor),
        TokenKind::DotDot | TokenKind::DotDotEq => {
            // Range with no start: `..end` / `..=end`
            let inclusive = *cursor.peek() == TokenKind::DotDotEq;
            cursor.advance();
            let end = match cursor.peek_raw() {
                TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::CloseBrace
                | TokenKind::CloseParen
                | TokenKind::CloseBracket
                | TokenKind::Eof => None,
                _ => Some(Box::new(parse_expression(cursor, 1, allow_struct)?)),
            };
            Ok(Expr::Range {
                start: None,
                end,
                inclusive,
                location,
            })
        }
        found => Err(CompileError::new(
            format!("Expected an expression, found {found}"),
            location.to_error_location(cursor.sources),
            ErrorCode::P001,
        )),
    }
}

/// Re-parses the interpolation segments captured by the lexer into
/// sub-expressions.
fn parse_string_literal(
    cursor: &mut TokenCursor,
    parts: Vec<StringPart>,
    location: crate::compiler::source::TextLocation,
) -> Result<Expr, CompileError> {
    let has_interpolation = parts
        .iter()
        .any(|part| matches!(part, StringPart::Interpolation(_)));

    if !has_interpolation {
        let text = parts
            .into_iter()
            .map(|part| match part {
                StringPart::Text(text) => text,
                StringPart::Interpolation(_) => String::new(),
            })
            .collect::<String>();
        return Ok(Expr::Literal(Literal::Str(text), location));
    }

    let mut interpolated = Vec::new();
    for part in parts {
        match part {
            StringPart::Text(text) => interpolated.push(InterpolatedPart::Text(text)),
            StringPart::Interpolation(source) => {
                use crate::compiler::tokenizer::tokenizer::tokenize;
                let lexed = tokenize(&source, location.file, cursor.sources);
                if let Some(error) = lexed.errors.into_iter().next() {
                    return Err(error);
                }
                let mut inner = TokenCursor::new(&lexed.tokens.tokens, cursor.sources);
                let expr = parse_expression(&mut inner, 0, true)?;
                interpolated.push(InterpolatedPart::Expr(Box::new(expr)));
            }
        }
    }
    Ok(Expr::InterpolatedString(interpolated, location))
}

fn parse_struct_literal(
    cursor: &mut TokenCursor,
    type_name: String,
    type_args: Vec<TypeExpr>,
    location: crate::compiler::source::TextLocation,
) -> Result<Expr, CompileError> {
    cursor.expect(&TokenKind::OpenBrace, "to open the struct literal")?;
    let mut fields = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let name = cursor.expect_identifier("as a field name")?;
        let value = if cursor.eat(&TokenKind::Colon) {
            parse_expression(cursor, 0, true)?
        } else {
            // Field shorthand: `Point { x, y }`
            Expr::Identifier(name.clone(), cursor.location())
        };
        fields.push((name, value));
        if !cursor.eat(&TokenKind::Comma) {
            cursor.expect(&TokenKind::CloseBrace, "to close the struct literal")?;
            break;
        }
    }
    Ok(Expr::StructLiteral {
        type_name,
        type_args,
        fields,
        location,
    })
}

fn parse_if(cursor: &mut TokenCursor) -> Result<Expr, CompileError> {
    let location = cursor.location();
    cursor.advance(); // if
    let condition = parse_expression(cursor, 0, false)?;
    let then_branch = parse_block(cursor)?;
    let else_branch = if cursor.eat(&TokenKind::Keyword(Keyword::Else)) {
        if *cursor.peek() == TokenKind::Keyword(Keyword::If) {
            Some(Box::new(parse_if(cursor)?))
        } else {
            Some(Box::new(Expr::Block(parse_block(cursor)?)))
        }
    } else {
        None
    };
    Ok(Expr::If {
        condition: Box::new(condition),
        then_branch,
        else_branch,
        location,
    })
}

fn parse_when(cursor: &mut TokenCursor) -> Result<Expr, CompileError> {
    let location = cursor.location();
    cursor.advance(); // when
    let scrutinee = parse_expression(cursor, 0, false)?;
    cursor.expect(&TokenKind::OpenBrace, "to open the when body")?;

    let mut arms = Vec::new();
    loop {
        if cursor.eat(&TokenKind::CloseBrace) {
            break;
        }
        let arm_location = cursor.location();
        let pattern = parse_pattern(cursor)?;
        cursor.expect(&TokenKind::FatArrow, "after the pattern")?;
        let body = parse_expression(cursor, 0, true)?;
        arms.push(WhenArm {
            pattern,
            body,
            location: arm_location,
        });
        cursor.eat(&TokenKind::Comma);
    }

    Ok(Expr::When {
        scrutinee: Box::new(scrutinee),
        arms,
        location,
    })
}

/// `|x: I32, y| x + y` - parameter types are optional and inferred when
/// absent.
fn parse_closure(cursor: &mut TokenCursor) -> Result<Expr, CompileError> {
    let location = cursor.location();
    let mut params = Vec::new();

    if cursor.eat(&TokenKind::OrOr) {
        // Zero parameters
    } else {
        cursor.expect(&TokenKind::Pipe, "to open closure parameters")?;
        loop {
            if cursor.eat(&TokenKind::Pipe) {
                break;
            }
            let param_location = cursor.location();
            let is_mut = cursor.eat(&TokenKind::Keyword(Keyword::Mut));
            let name = cursor.expect_identifier("as a closure parameter")?;
            let type_expr = if cursor.eat(&TokenKind::Colon) {
                parse_type_expr(cursor)?
            } else {
                // Placeholder resolved by inference against the call site
                TypeExpr::Named {
                    name: String::from("_"),
                    type_args: Vec::new(),
                }
            };
            params.push(Param {
                name,
                type_expr,
                is_mut,
                location: param_location,
            });
            if !cursor.eat(&TokenKind::Comma) {
                cursor.expect(&TokenKind::Pipe, "to close closure parameters")?;
                break;
            }
        }
    }

    let return_type = if cursor.eat(&TokenKind::Arrow) {
        Some(parse_type_expr(cursor)?)
    } else {
        None
    };

    let body = parse_expression(cursor, 0, true)?;
    Ok(Expr::Closure {
        params,
        return_type,
        body: Box::new(body),
        location,
    })
}

// ---------------------------------
//            Patterns
// ---------------------------------

pub fn parse_pattern(cursor: &mut TokenCursor) -> Result<Pattern, CompileError> {
    let location = cursor.location();
    match cursor.peek().clone() {
        TokenKind::Underscore => {
            cursor.advance();
            Ok(Pattern::Wildcard(location))
        }
        TokenKind::IntLiteral(value, suffix) => {
            cursor.advance();
            Ok(Pattern::Literal(Literal::Int(value, suffix), location))
        }
        TokenKind::Minus => {
            cursor.advance();
            match cursor.peek().clone() {
                TokenKind::IntLiteral(value, suffix) => {
                    cursor.advance();
                    Ok(Pattern::Literal(Literal::Int(-value, suffix), location))
                }
                TokenKind::FloatLiteral(value, suffix) => {
                    cursor.advance();
                    Ok(Pattern::Literal(Literal::Float(-value, suffix), location))
                }
                found => Err(CompileError::new(
                    format!("Expected a numeric literal after '-', found {found}"),
                    location.to_error_location(cursor.sources),
                    ErrorCode::P001,
                )),
            }
        }
        TokenKind::FloatLiteral(value, suffix) => {
            cursor.advance();
            Ok(Pattern::Literal(Literal::Float(value, suffix), location))
        }
        TokenKind::BoolLiteral(value) => {
            cursor.advance();
            Ok(Pattern::Literal(Literal::Bool(value), location))
        }
        TokenKind::CharLiteral(value) => {
            cursor.advance();
            Ok(Pattern::Literal(Literal::Char(value), location))
        }
        TokenKind::StringLiteral(parts) => {
            cursor.advance();
            let text = parts
                .into_iter()
                .filter_map(|part| match part {
                    StringPart::Text(text) => Some(text),
                    StringPart::Interpolation(_) => None,
                })
                .collect::<String>();
            Ok(Pattern::Literal(Literal::Str(text), location))
        }
        TokenKind::OpenParen => {
            cursor.advance();
            let mut members = Vec::new();
            loop {
                if cursor.eat(&TokenKind::CloseParen) {
                    break;
                }
                members.push(parse_pattern(cursor)?);
                if !cursor.eat(&TokenKind::Comma) {
                    cursor.expect(&TokenKind::CloseParen, "to close the tuple pattern")?;
                    break;
                }
            }
            Ok(Pattern::Tuple(members, location))
        }
        TokenKind::Keyword(Keyword::Mut) => {
            cursor.advance();
            let name = cursor.expect_identifier("after 'mut'")?;
            Ok(Pattern::Binding {
                name,
                mutable: true,
                location,
            })
        }
        TokenKind::Identifier(name) => {
            cursor.advance();

            // Qualified enum variant: `Option::Some(x)`
            if *cursor.peek_raw() == TokenKind::PathSep {
                cursor.advance();
                let variant = cursor.expect_identifier("as the variant name")?;
                let payload = parse_variant_payload(cursor)?;
                return Ok(Pattern::EnumVariant {
                    enum_name: Some(name),
                    variant,
                    payload,
                    location,
                });
            }

            // Struct pattern: `Point { x, y }`
            if *cursor.peek_raw() == TokenKind::OpenBrace
                && name.chars().next().map(char::is_uppercase).unwrap_or(false)
            {
                cursor.advance();
                let mut fields = Vec::new();
                loop {
                    if cursor.eat(&TokenKind::CloseBrace) {
                        break;
                    }
                    let field_name = cursor.expect_identifier("as a field name")?;
                    let pattern = if cursor.eat(&TokenKind::Colon) {
                        parse_pattern(cursor)?
                    } else {
                        Pattern::Binding {
                            name: field_name.clone(),
                            mutable: false,
                            location: cursor.location(),
                        }
                    };
                    fields.push((field_name, pattern));
                    if !cursor.eat(&TokenKind::Comma) {
                        cursor.expect(&TokenKind::CloseBrace, "to close the struct pattern")?;
                        break;
                    }
                }
                return Ok(Pattern::Struct {
                    type_name: name,
                    fields,
                    location,
                });
            }

            // Bare variant with payload: `Some(x)`. A capitalized name with
            // no payload is still a variant candidate; the checker decides
            // between variant and binding from the scrutinee type.
            if *cursor.peek_raw() == TokenKind::OpenParen {
                let payload = parse_variant_payload(cursor)?;
                return Ok(Pattern::EnumVariant {
                    enum_name: None,
                    variant: name,
                    payload,
                    location,
                });
            }
            if name.chars().next().map(char::is_uppercase).unwrap_or(false) {
                return Ok(Pattern::EnumVariant {
                    enum_name: None,
                    variant: name,
                    payload: Vec::new(),
                    location,
                });
            }

            Ok(Pattern::Binding {
                name,
                mutable: false,
                location,
            })
        }
        found => Err(CompileError::new(
            format!("Expected a pattern, found {found}"),
            location.to_error_location(cursor.sources),
            ErrorCode::P001,
        )),
    }
}

fn parse_variant_payload(cursor: &mut TokenCursor) -> Result<Vec<Pattern>, CompileError> {
    let mut payload = Vec::new();
    if !cursor.eat(&TokenKind::OpenParen) {
        return Ok(payload);
    }
    loop {
        if cursor.eat(&TokenKind::CloseParen) {
            break;
        }
        payload.push(parse_pattern(cursor)?);
        if !cursor.eat(&TokenKind::Comma) {
            cursor.expect(&TokenKind::CloseParen, "to close the variant payload")?;
            break;
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::build_ast::parse_module;
    use crate::compiler::source::SourceMap;
    use crate::compiler::tokenizer::tokenizer::tokenize;
    use std::path::PathBuf;

    fn parse(source: &str) -> ModuleAst {
        let mut sources = SourceMap::new();
        let file = sources.add(PathBuf::from("test.tml"), source.to_string());
        let lexed = tokenize(source, file, &sources);
        assert!(lexed.errors.is_empty(), "lexer errors: {:?}", lexed.errors);
        let outcome = parse_module(&lexed.tokens, &sources);
        assert!(outcome.errors.is_empty(), "parse errors: {:?}", outcome.errors);
        outcome.ast
    }

    fn parse_with_errors(source: &str) -> (ModuleAst, Vec<CompileError>) {
        let mut sources = SourceMap::new();
        let file = sources.add(PathBuf::from("test.tml"), source.to_string());
        let lexed = tokenize(source, file, &sources);
        let outcome = parse_module(&lexed.tokens, &sources);
        (outcome.ast, outcome.errors)
    }

    #[test]
    fn parses_a_generic_function() {
        let ast = parse("pub func id[T](x: T) -> T {\n    return x\n}\n");
        assert_eq!(ast.decls.len(), 1);
        let Decl::Function(func) = &ast.decls[0] else {
            panic!("expected a function");
        };
        assert_eq!(func.name, "id");
        assert_eq!(func.type_params, vec!["T".to_string()]);
        assert_eq!(func.visibility, Visibility::Public);
        assert_eq!(func.params.len(), 1);
    }

    #[test]
    fn operator_precedence_is_respected() {
        let ast = parse("func f() -> I32 {\n    return 1 + 2 * 3\n}\n");
        let Decl::Function(func) = &ast.decls[0] else {
            panic!();
        };
        let body = func.body.as_ref().expect("body");
        let Stmt::Return {
            value: Some(Expr::Binary { op, rhs, .. }),
            ..
        } = &body.statements[0]
        else {
            panic!("expected return of a binary expr");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.as_ref(),
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn method_chains_are_left_associative() {
        let ast = parse("func f(x: Str) {\n    x.trim().len()\n}\n");
        let Decl::Function(func) = &ast.decls[0] else {
            panic!();
        };
        let Stmt::Expr(Expr::MethodCall {
            method, receiver, ..
        }) = &func.body.as_ref().unwrap().statements[0]
        else {
            panic!("expected a method call");
        };
        assert_eq!(method, "len");
        assert!(matches!(receiver.as_ref(), Expr::MethodCall { method, .. } if method == "trim"));
    }

    #[test]
    fn when_arms_with_enum_patterns() {
        let ast = parse(
            "func f(x: Shape) -> I32 {\n    return when x {\n        Circle(r) => r,\n        Square(s) => s,\n        _ => 0,\n    }\n}\n",
        );
        let Decl::Function(func) = &ast.decls[0] else {
            panic!();
        };
        let Stmt::Return {
            value: Some(Expr::When { arms, .. }),
            ..
        } = &func.body.as_ref().unwrap().statements[0]
        else {
            panic!("expected when");
        };
        assert_eq!(arms.len(), 3);
        assert!(matches!(
            &arms[0].pattern,
            Pattern::EnumVariant { variant, .. } if variant == "Circle"
        ));
        assert!(matches!(&arms[2].pattern, Pattern::Wildcard(_)));
    }

    #[test]
    fn struct_literal_not_parsed_in_condition_position() {
        let ast = parse("func f(x: Bool) {\n    if x {\n        return\n    }\n}\n");
        let Decl::Function(func) = &ast.decls[0] else {
            panic!();
        };
        assert!(matches!(
            &func.body.as_ref().unwrap().statements[0],
            Stmt::Expr(Expr::If { .. })
        ));
    }

    #[test]
    fn use_declarations_cover_all_forms() {
        let ast = parse(
            "use core::io::println\nuse core::mem::alloc as allocate\nuse core::str::*\npub use core::fmt::{display, debug as dbg}\n",
        );
        assert_eq!(ast.decls.len(), 4);
        let Decl::Use(single) = &ast.decls[0] else { panic!() };
        assert_eq!(single.module_path, vec!["core", "io"]);
        assert_eq!(
            single.target,
            UseTarget::Single {
                name: "println".to_string(),
                alias: None
            }
        );
        let Decl::Use(aliased) = &ast.decls[1] else { panic!() };
        assert_eq!(
            aliased.target,
            UseTarget::Single {
                name: "alloc".to_string(),
                alias: Some("allocate".to_string())
            }
        );
        let Decl::Use(glob) = &ast.decls[2] else { panic!() };
        assert_eq!(glob.target, UseTarget::Glob);
        let Decl::Use(list) = &ast.decls[3] else { panic!() };
        assert!(list.is_public);
        assert_eq!(
            list.target,
            UseTarget::List(vec![
                ("display".to_string(), None),
                ("debug".to_string(), Some("dbg".to_string()))
            ])
        );
    }

    #[test]
    fn class_with_modifiers_and_members() {
        let ast = parse(
            "pub abstract class Shape {\n    name: Str\n    abstract func area(&self) -> F64\n    virtual func describe(&self) -> Str {\n        return \"shape\"\n    }\n}\n",
        );
        let Decl::Class(class) = &ast.decls[0] else { panic!() };
        assert!(class.is_abstract);
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.methods.len(), 2);
        assert_eq!(class.methods[0].modifier, MethodModifier::Abstract);
        assert!(class.methods[0].func.body.is_none());
        assert_eq!(class.methods[1].modifier, MethodModifier::Virtual);
    }

    #[test]
    fn impl_behavior_for_type() {
        let ast = parse(
            "impl Printable for Point {\n    func print(&self) {\n        return\n    }\n}\n",
        );
        let Decl::Impl(impl_decl) = &ast.decls[0] else { panic!() };
        assert_eq!(impl_decl.behavior.as_deref(), Some("Printable"));
        assert!(matches!(
            &impl_decl.target,
            TypeExpr::Named { name, .. } if name == "Point"
        ));
    }

    #[test]
    fn test_annotations_are_collected() {
        let ast = parse("@test\nfunc checks_math() {\n    assert(1 + 1 == 2)\n}\n");
        let Decl::Function(func) = &ast.decls[0] else { panic!() };
        assert_eq!(func.annotations.len(), 1);
        assert_eq!(func.annotations[0].name, "test");
    }

    #[test]
    fn expect_error_annotation_keeps_its_code() {
        let ast = parse("@expect-error T001\nfunc bad() {\n    return\n}\n");
        let Decl::Function(func) = &ast.decls[0] else { panic!() };
        assert_eq!(func.annotations[0].name, "expect-error");
        assert_eq!(func.annotations[0].argument.as_deref(), Some("T001"));
    }

    #[test]
    fn recovery_surfaces_later_declarations() {
        let (ast, errors) = parse_with_errors(
            "func broken( {\n}\nfunc fine() -> I32 {\n    return 1\n}\n",
        );
        assert!(!errors.is_empty());
        assert!(ast.decls.iter().any(|decl| matches!(
            decl,
            Decl::Function(func) if func.name == "fine"
        )));
    }

    #[test]
    fn closures_parse_with_and_without_types() {
        let ast = parse("func f() {\n    let add = |a: I32, b: I32| a + b\n    let zero = || 0\n}\n");
        let Decl::Function(func) = &ast.decls[0] else { panic!() };
        let statements = &func.body.as_ref().unwrap().statements;
        assert!(matches!(
            &statements[0],
            Stmt::Let { value: Expr::Closure { params, .. }, .. } if params.len() == 2
        ));
        assert!(matches!(
            &statements[1],
            Stmt::Let { value: Expr::Closure { params, .. }, .. } if params.is_empty()
        ));
    }

    #[test]
    fn explicit_type_args_on_call_paths() {
        let ast = parse("func f() {\n    id[I32](1)\n}\n");
        let Decl::Function(func) = &ast.decls[0] else { panic!() };
        let Stmt::Expr(Expr::Call { callee, .. }) = &func.body.as_ref().unwrap().statements[0]
        else {
            panic!("expected call");
        };
        assert!(matches!(
            callee.as_ref(),
            Expr::Path { type_args, .. } if type_args.len() == 1
        ));
    }

    #[test]
    fn sized_arrays_and_repeats() {
        let ast = parse("func f() {\n    let buffer: [U8: 32] = [0: 32]\n}\n");
        let Decl::Function(func) = &ast.decls[0] else { panic!() };
        let Stmt::Let {
            type_expr: Some(TypeExpr::Array { size, .. }),
            value: Expr::ArrayRepeat { .. },
            ..
        } = &func.body.as_ref().unwrap().statements[0]
        else {
            panic!("expected sized array let");
        };
        assert_eq!(*size, 32);
    }
}
