//! The TML lexer.
//!
//! Produces a [`FileTokens`] sequence in strict source order. Lexical errors
//! are collected rather than fatal: after an error the stream resumes at the
//! next whitespace so later stages can report as many problems as possible in
//! one invocation. Comments are discarded, except doc comments (`///`) which
//! become their own token kind for the doc generator.

use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::source::{FileId, SourceMap};
use crate::compiler::tokenizer::tokens::{
    FileTokens, Keyword, NumericSuffix, StringPart, Token, TokenKind, TokenStream,
};
use crate::settings;

macro_rules! return_token {
    ($kind:expr, $stream:expr $(,)?) => {
        return Ok(Token::new($kind, $stream.new_location()))
    };
}

macro_rules! lexer_error {
    ($code:ident, $msg:expr, $stream:expr, $sources:expr) => {
        CompileError::new(
            $msg,
            $stream.new_location().to_error_location($sources),
            ErrorCode::$code,
        )
    };
}

pub struct TokenizeOutcome {
    pub tokens: FileTokens,
    pub errors: Vec<CompileError>,
}

pub fn tokenize(source_code: &str, file: FileId, sources: &SourceMap) -> TokenizeOutcome {
    let initial_capacity = source_code.len() / settings::SRC_TO_TOKEN_RATIO;
    let mut tokens: Vec<Token> = Vec::with_capacity(initial_capacity);
    let mut errors: Vec<CompileError> = Vec::new();
    let mut stream = TokenStream::new(source_code, file);

    tokens.push(Token::new(TokenKind::ModuleStart, stream.new_location()));

    loop {
        match next_token(&mut stream, sources) {
            Ok(token) => {
                let done = token.kind == TokenKind::Eof;
                tokens.push(token);
                if done {
                    break;
                }
            }
            Err(error) => {
                errors.push(error);
                // Recover at the next whitespace so one bad literal doesn't
                // hide every error after it
                while let Some(ch) = stream.peek() {
                    if ch.is_whitespace() {
                        break;
                    }
                    stream.next();
                }
            }
        }
    }

    TokenizeOutcome {
        tokens: FileTokens::new(file, tokens),
        errors,
    }
}

fn next_token(stream: &mut TokenStream, sources: &SourceMap) -> Result<Token, CompileError> {
    let mut current_char = match stream.next() {
        Some(ch) => ch,
        None => return_token!(TokenKind::Eof, stream),
    };

    // Fold whitespace. Newlines are significant to directive recognition
    // only; the parser treats them as trivia.
    while current_char.is_whitespace() {
        if current_char == '\n' {
            while let Some(next_char) = stream.peek() {
                if *next_char != '\n' && next_char.is_whitespace() {
                    stream.next();
                } else {
                    break;
                }
            }
            stream.update_start_position();
            return_token!(TokenKind::Newline, stream);
        }
        current_char = match stream.next() {
            Some(ch) => ch,
            None => return_token!(TokenKind::Eof, stream),
        };
    }

    // Ignore leading whitespace in the token location
    stream.update_start_position();

    // Preprocessor directive: a `#` at the start of a lexical line. The whole
    // line is captured and interpreted before parsing.
    if current_char == '#' {
        let mut line = String::from('#');
        while let Some(ch) = stream.peek() {
            if *ch == '\n' {
                break;
            }
            line.push(*ch);
            stream.next();
        }
        return_token!(TokenKind::Directive(line), stream);
    }

    // Comments
    if current_char == '/' {
        match stream.peek() {
            Some('/') => {
                stream.next();
                if stream.peek() == Some(&'/') {
                    stream.next();
                    let mut text = String::new();
                    while let Some(ch) = stream.peek() {
                        if *ch == '\n' {
                            break;
                        }
                        text.push(*ch);
                        stream.next();
                    }
                    return_token!(TokenKind::DocComment(text.trim().to_string()), stream);
                }
                // Plain line comment: skip to end of line and re-enter
                while let Some(ch) = stream.peek() {
                    if *ch == '\n' {
                        break;
                    }
                    stream.next();
                }
                return next_token(stream, sources);
            }
            Some('*') => {
                stream.next();
                let mut depth = 1u32;
                while depth > 0 {
                    match stream.next() {
                        Some('*') if stream.peek() == Some(&'/') => {
                            stream.next();
                            depth -= 1;
                        }
                        Some('/') if stream.peek() == Some(&'*') => {
                            stream.next();
                            depth += 1;
                        }
                        Some(_) => {}
                        None => {
                            return Err(lexer_error!(
                                L003,
                                "Unterminated block comment",
                                stream,
                                sources
                            ));
                        }
                    }
                }
                return next_token(stream, sources);
            }
            Some('=') => {
                stream.next();
                return_token!(TokenKind::SlashEq, stream);
            }
            _ => return_token!(TokenKind::Slash, stream),
        }
    }

    if current_char == '"' {
        return tokenize_string(stream, sources);
    }

    if current_char == '\'' {
        return tokenize_char(stream, sources);
    }

    if current_char.is_ascii_digit() {
        return tokenize_number(current_char, stream, sources);
    }

    if current_char == '_' {
        // `_` alone is the wildcard pattern; `_name` is an identifier
        match stream.peek() {
            Some(ch) if ch.is_alphanumeric() || *ch == '_' => {}
            _ => return_token!(TokenKind::Underscore, stream),
        }
    }

    if current_char.is_alphabetic() || current_char == '_' {
        let mut word = String::from(current_char);
        while let Some(ch) = stream.peek() {
            if ch.is_alphanumeric() || *ch == '_' {
                word.push(*ch);
                stream.next();
            } else {
                break;
            }
        }

        return match word.as_str() {
            "true" => Ok(Token::new(
                TokenKind::BoolLiteral(true),
                stream.new_location(),
            )),
            "false" => Ok(Token::new(
                TokenKind::BoolLiteral(false),
                stream.new_location(),
            )),
            _ => match Keyword::parse(&word) {
                Some(keyword) => Ok(Token::new(TokenKind::Keyword(keyword), stream.new_location())),
                None => Ok(Token::new(TokenKind::Identifier(word), stream.new_location())),
            },
        };
    }

    // Operators and punctuation
    let kind = match current_char {
        '+' => match stream.peek() {
            Some('=') => {
                stream.next();
                TokenKind::PlusEq
            }
            _ => TokenKind::Plus,
        },
        '-' => match stream.peek() {
            Some('>') => {
                stream.next();
                TokenKind::Arrow
            }
            Some('=') => {
                stream.next();
                TokenKind::MinusEq
            }
            _ => TokenKind::Minus,
        },
        '*' => match stream.peek() {
            Some('=') => {
                stream.next();
                TokenKind::StarEq
            }
            _ => TokenKind::Star,
        },
        '%' => TokenKind::Percent,
        '=' => match stream.peek() {
            Some('=') => {
                stream.next();
                TokenKind::EqEq
            }
            Some('>') => {
                stream.next();
                TokenKind::FatArrow
            }
            _ => TokenKind::Eq,
        },
        '!' => match stream.peek() {
            Some('=') => {
                stream.next();
                TokenKind::NotEq
            }
            _ => TokenKind::Not,
        },
        '<' => match stream.peek() {
            Some('=') => {
                stream.next();
                TokenKind::LtEq
            }
            Some('<') => {
                stream.next();
                TokenKind::Shl
            }
            _ => TokenKind::Lt,
        },
        '>' => match stream.peek() {
            Some('=') => {
                stream.next();
                TokenKind::GtEq
            }
            // `>>` is never produced as one token so nested generics like
            // Map[Str, List[I32]] close without a splitting pass
            _ => TokenKind::Gt,
        },
        '&' => match stream.peek() {
            Some('&') => {
                stream.next();
                TokenKind::AndAnd
            }
            _ => TokenKind::Amp,
        },
        '|' => match stream.peek() {
            Some('|') => {
                stream.next();
                TokenKind::OrOr
            }
            _ => TokenKind::Pipe,
        },
        '^' => TokenKind::Caret,
        '?' => TokenKind::Question,
        '(' => TokenKind::OpenParen,
        ')' => TokenKind::CloseParen,
        '{' => TokenKind::OpenBrace,
        '}' => TokenKind::CloseBrace,
        '[' => TokenKind::OpenBracket,
        ']' => TokenKind::CloseBracket,
        ',' => TokenKind::Comma,
        '.' => match stream.peek() {
            Some('.') => {
                stream.next();
                match stream.peek() {
                    Some('=') => {
                        stream.next();
                        TokenKind::DotDotEq
                    }
                    _ => TokenKind::DotDot,
                }
            }
            _ => TokenKind::Dot,
        },
        ':' => match stream.peek() {
            Some(':') => {
                stream.next();
                TokenKind::PathSep
            }
            _ => TokenKind::Colon,
        },
        ';' => TokenKind::Semicolon,
        '@' => TokenKind::At,
        other => {
            return Err(lexer_error!(
                L003,
                format!("Unknown character '{other}'"),
                stream,
                sources
            ));
        }
    };

    return_token!(kind, stream);
}

fn tokenize_string(stream: &mut TokenStream, sources: &SourceMap) -> Result<Token, CompileError> {
    let mut parts: Vec<StringPart> = Vec::new();
    let mut text = String::new();

    loop {
        match stream.next() {
            Some('"') => break,
            Some('\\') => match stream.next() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('r') => text.push('\r'),
                Some('0') => text.push('\0'),
                Some('\\') => text.push('\\'),
                Some('"') => text.push('"'),
                Some('{') => text.push('{'),
                Some('}') => text.push('}'),
                Some(other) => {
                    return Err(lexer_error!(
                        L001,
                        format!("Unknown escape sequence '\\{other}'"),
                        stream,
                        sources
                    ));
                }
                None => {
                    return Err(lexer_error!(
                        L002,
                        "Unterminated string literal",
                        stream,
                        sources
                    ));
                }
            },
            Some('{') => {
                // Interpolation marker: the embedded expression text is
                // captured verbatim and parsed later against the AST
                if !text.is_empty() {
                    parts.push(StringPart::Text(std::mem::take(&mut text)));
                }
                let mut expr = String::new();
                let mut depth = 1u32;
                loop {
                    match stream.next() {
                        Some('{') => {
                            depth += 1;
                            expr.push('{');
                        }
                        Some('}') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            expr.push('}');
                        }
                        Some(ch) => expr.push(ch),
                        None => {
                            return Err(lexer_error!(
                                L002,
                                "Unterminated interpolation in string literal",
                                stream,
                                sources
                            ));
                        }
                    }
                }
                parts.push(StringPart::Interpolation(expr));
            }
            Some(ch) => text.push(ch),
            None => {
                return Err(lexer_error!(
                    L002,
                    "Unterminated string literal",
                    stream,
                    sources
                ));
            }
        }
    }

    if !text.is_empty() || parts.is_empty() {
        parts.push(StringPart::Text(text));
    }

    return_token!(TokenKind::StringLiteral(parts), stream);
}

fn tokenize_char(stream: &mut TokenStream, sources: &SourceMap) -> Result<Token, CompileError> {
    // `'a` followed by anything but a closing quote is a lifetime tag
    if let Some(first) = stream.peek().copied() {
        if (first.is_alphabetic() || first == '_') && stream.peek_second() != Some('\'') {
            let mut tag = String::new();
            while let Some(ch) = stream.peek() {
                if ch.is_alphanumeric() || *ch == '_' {
                    tag.push(*ch);
                    stream.next();
                } else {
                    break;
                }
            }
            return_token!(TokenKind::Lifetime(tag), stream);
        }
    }

    let value = match stream.next() {
        Some('\\') => match stream.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('\'') => '\'',
            _ => {
                return Err(lexer_error!(
                    L001,
                    "Unknown escape sequence in char literal",
                    stream,
                    sources
                ));
            }
        },
        Some(ch) => ch,
        None => {
            return Err(lexer_error!(
                L002,
                "Unterminated char literal",
                stream,
                sources
            ));
        }
    };

    match stream.next() {
        Some('\'') => return_token!(TokenKind::CharLiteral(value), stream),
        _ => Err(lexer_error!(
            L001,
            "Char literal must contain exactly one character",
            stream,
            sources
        )),
    }
}

fn tokenize_number(
    first: char,
    stream: &mut TokenStream,
    sources: &SourceMap,
) -> Result<Token, CompileError> {
    let mut digits = String::from(first);
    let mut is_float = false;

    // Hex / binary / octal
    if first == '0' {
        if let Some(prefix) = stream.peek().copied() {
            let radix = match prefix {
                'x' | 'X' => Some(16),
                'b' | 'B' => Some(2),
                'o' | 'O' => Some(8),
                _ => None,
            };
            if let Some(radix) = radix {
                stream.next();
                let mut body = String::new();
                while let Some(ch) = stream.peek() {
                    if ch.is_digit(radix) || *ch == '_' {
                        if *ch != '_' {
                            body.push(*ch);
                        }
                        stream.next();
                    } else {
                        break;
                    }
                }
                let suffix = take_suffix(stream, sources)?;
                let value = i128::from_str_radix(&body, radix).map_err(|_| {
                    lexer_error!(L001, "Malformed integer literal", stream, sources)
                })?;
                return_token!(TokenKind::IntLiteral(value, suffix), stream);
            }
        }
    }

    while let Some(ch) = stream.peek() {
        if ch.is_ascii_digit() || *ch == '_' {
            if *ch != '_' {
                digits.push(*ch);
            }
            stream.next();
        } else if *ch == '.' && !is_float {
            // Two-char lookahead: `1.5` is a float, `1..10` is a range and
            // `1.method()` is a call, both of which leave the dot unconsumed
            match stream.peek_second() {
                Some(next) if next.is_ascii_digit() => {
                    stream.next();
                    digits.push('.');
                    is_float = true;
                }
                _ => break,
            }
        } else {
            break;
        }
    }

    let suffix = take_suffix(stream, sources)?;

    if is_float || suffix.map(|sfx| sfx.is_float()).unwrap_or(false) {
        let value = digits
            .parse::<f64>()
            .map_err(|_| lexer_error!(L001, "Malformed float literal", stream, sources))?;
        return_token!(TokenKind::FloatLiteral(value, suffix), stream);
    }

    let value = digits
        .parse::<i128>()
        .map_err(|_| lexer_error!(L001, "Malformed integer literal", stream, sources))?;
    return_token!(TokenKind::IntLiteral(value, suffix), stream);
}

fn take_suffix(
    stream: &mut TokenStream,
    sources: &SourceMap,
) -> Result<Option<NumericSuffix>, CompileError> {
    let mut word = String::new();

    // Allow `42_i32` and `42i32` forms
    if stream.peek() == Some(&'_') {
        stream.next();
    }
    while let Some(ch) = stream.peek() {
        if ch.is_alphanumeric() {
            word.push(*ch);
            stream.next();
        } else {
            break;
        }
    }

    if word.is_empty() {
        return Ok(None);
    }

    match NumericSuffix::parse(&word) {
        Some(suffix) => Ok(Some(suffix)),
        None => Err(lexer_error!(
            L001,
            format!("Unknown numeric suffix '{word}'"),
            stream,
            sources
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn lex(source: &str) -> (Vec<TokenKind>, Vec<CompileError>) {
        let mut sources = SourceMap::new();
        let file = sources.add(PathBuf::from("test.tml"), source.to_string());
        let outcome = tokenize(source, file, &sources);
        let kinds = outcome
            .tokens
            .tokens
            .into_iter()
            .map(|token| token.kind)
            .filter(|kind| {
                !matches!(kind, TokenKind::ModuleStart | TokenKind::Newline)
            })
            .collect();
        (kinds, outcome.errors)
    }

    #[test]
    fn lexes_a_function_header() {
        let (kinds, errors) = lex("func main() -> I32 {\n    return 0\n}");
        assert!(errors.is_empty());
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword(Keyword::Func),
                TokenKind::Identifier("main".to_string()),
                TokenKind::OpenParen,
                TokenKind::CloseParen,
                TokenKind::Arrow,
                TokenKind::Identifier("I32".to_string()),
                TokenKind::OpenBrace,
                TokenKind::Keyword(Keyword::Return),
                TokenKind::IntLiteral(0, None),
                TokenKind::CloseBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn suffixed_literals_carry_their_width() {
        let (kinds, errors) = lex("1_i32 2i64 3.5_f32 4u8");
        assert!(errors.is_empty());
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(1, Some(NumericSuffix::I32)),
                TokenKind::IntLiteral(2, Some(NumericSuffix::I64)),
                TokenKind::FloatLiteral(3.5, Some(NumericSuffix::F32)),
                TokenKind::IntLiteral(4, Some(NumericSuffix::U8)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn interpolated_string_splits_into_parts() {
        let (kinds, errors) = lex("\"x = {x} end\"");
        assert!(errors.is_empty());
        assert_eq!(
            kinds[0],
            TokenKind::StringLiteral(vec![
                StringPart::Text("x = ".to_string()),
                StringPart::Interpolation("x".to_string()),
                StringPart::Text(" end".to_string()),
            ])
        );
    }

    #[test]
    fn doc_comments_are_preserved_plain_comments_dropped() {
        let (kinds, errors) = lex("/// Adds numbers\n// internal note\nfunc");
        assert!(errors.is_empty());
        assert_eq!(
            kinds,
            vec![
                TokenKind::DocComment("Adds numbers".to_string()),
                TokenKind::Keyword(Keyword::Func),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn bad_literal_recovers_at_whitespace() {
        let (kinds, errors) = lex("1_badsuffix func");
        assert_eq!(errors.len(), 1);
        assert!(kinds.contains(&TokenKind::Keyword(Keyword::Func)));
    }

    #[test]
    fn unterminated_string_is_an_l_error() {
        let (_, errors) = lex("\"never closed");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].code,
            crate::compiler::diagnostics::ErrorCode::L002
        );
    }

    #[test]
    fn directives_capture_the_whole_line() {
        let (kinds, errors) = lex("#if WINDOWS && X86_64\nfunc\n#endif");
        assert!(errors.is_empty());
        assert_eq!(
            kinds,
            vec![
                TokenKind::Directive("#if WINDOWS && X86_64".to_string()),
                TokenKind::Keyword(Keyword::Func),
                TokenKind::Directive("#endif".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    proptest::proptest! {
        #[test]
        fn tokenizing_arbitrary_input_never_panics(source in "\\PC{0,200}") {
            let mut sources = SourceMap::new();
            let file = sources.add(PathBuf::from("fuzz.tml"), source.clone());
            let outcome = tokenize(&source, file, &sources);
            // Eof always terminates the stream, errors or not
            proptest::prop_assert!(matches!(
                outcome.tokens.tokens.last().map(|token| &token.kind),
                Some(TokenKind::Eof)
            ));
        }

        #[test]
        fn integer_literals_roundtrip(value in 0i64..=i64::MAX) {
            let source = value.to_string();
            let mut sources = SourceMap::new();
            let file = sources.add(PathBuf::from("int.tml"), source.clone());
            let outcome = tokenize(&source, file, &sources);
            proptest::prop_assert!(outcome.errors.is_empty());
            proptest::prop_assert!(outcome.tokens.tokens.iter().any(|token| matches!(
                token.kind,
                TokenKind::IntLiteral(parsed, None) if parsed == value as i128
            )));
        }
    }

    #[test]
    fn hex_and_binary_literals() {
        let (kinds, errors) = lex("0xFF 0b1010 0o17");
        assert!(errors.is_empty());
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(255, None),
                TokenKind::IntLiteral(10, None),
                TokenKind::IntLiteral(15, None),
                TokenKind::Eof,
            ]
        );
    }
}
