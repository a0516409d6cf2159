pub mod ast_nodes;
pub mod build_ast;
pub mod expressions;

use crate::compiler::diagnostics::{CompileError, ErrorCode};
use crate::compiler::source::{SourceMap, TextLocation};
use crate::compiler::tokenizer::tokens::{Token, TokenKind};

/// Cursor over a preprocessed token list.
///
/// Newlines are trivia to the parser except where a statement boundary is
/// needed, so most lookahead goes through [`TokenCursor::peek`] which skips
/// them.
pub struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    pub sources: &'a SourceMap,
}

impl<'a> TokenCursor<'a> {
    pub fn new(tokens: &'a [Token], sources: &'a SourceMap) -> TokenCursor<'a> {
        let mut cursor = TokenCursor {
            tokens,
            pos: 0,
            sources,
        };
        if matches!(
            cursor.tokens.first().map(|token| &token.kind),
            Some(TokenKind::ModuleStart)
        ) {
            cursor.pos = 1;
        }
        cursor
    }

    fn skip_trivia(&mut self) {
        while matches!(
            self.tokens.get(self.pos).map(|token| &token.kind),
            Some(TokenKind::Newline) | Some(TokenKind::Semicolon)
        ) {
            self.pos += 1;
        }
    }

    /// Peek past newline/semicolon trivia.
    pub fn peek(&mut self) -> &TokenKind {
        self.skip_trivia();
        self.tokens
            .get(self.pos)
            .map(|token| &token.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Peek WITHOUT skipping trivia; used at statement boundaries.
    pub fn peek_raw(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|token| &token.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    pub fn peek_second(&mut self) -> &TokenKind {
        self.skip_trivia();
        let mut index = self.pos + 1;
        while matches!(
            self.tokens.get(index).map(|token| &token.kind),
            Some(TokenKind::Newline) | Some(TokenKind::Semicolon)
        ) {
            index += 1;
        }
        self.tokens
            .get(index)
            .map(|token| &token.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    pub fn advance(&mut self) -> &Token {
        self.skip_trivia();
        let token = self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens
                .last()
                .expect("token stream always ends with Eof")
        });
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    pub fn location(&mut self) -> TextLocation {
        self.skip_trivia();
        self.tokens
            .get(self.pos)
            .map(|token| token.location.clone())
            .unwrap_or_default()
    }

    /// Consume the next token if it matches.
    pub fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, kind: &TokenKind, context: &str) -> Result<(), CompileError> {
        if self.eat(kind) {
            return Ok(());
        }
        let location = self.location();
        let found = self.peek().clone();
        Err(CompileError::new(
            format!("Expected {kind} {context}, found {found}"),
            location.to_error_location(self.sources),
            ErrorCode::P001,
        ))
    }

    pub fn expect_identifier(&mut self, context: &str) -> Result<String, CompileError> {
        let location = self.location();
        match self.peek().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            found => Err(CompileError::new(
                format!("Expected an identifier {context}, found {found}"),
                location.to_error_location(self.sources),
                ErrorCode::P001,
            )),
        }
    }

    pub fn at_eof(&mut self) -> bool {
        *self.peek() == TokenKind::Eof
    }

    /// Snapshot for speculative parses (`foo[I32](..)` vs `foo[index]`).
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn rewind(&mut self, position: usize) {
        self.pos = position;
    }

    /// Error recovery: skip forward until a token that can start a top-level
    /// declaration (or Eof) so one malformed decl doesn't cascade.
    pub fn recover_to_decl_boundary(&mut self) {
        use crate::compiler::tokenizer::tokens::Keyword;
        loop {
            match self.peek() {
                TokenKind::Eof => return,
                TokenKind::Keyword(
                    Keyword::Func
                    | Keyword::Struct
                    | Keyword::Enum
                    | Keyword::Behavior
                    | Keyword::Impl
                    | Keyword::Class
                    | Keyword::Interface
                    | Keyword::Const
                    | Keyword::Type
                    | Keyword::Use
                    | Keyword::Mod
                    | Keyword::Extern
                    | Keyword::Pub,
                ) => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Error recovery inside a block: skip to the next statement boundary.
    pub fn recover_to_stmt_boundary(&mut self) {
        loop {
            match self.peek_raw() {
                TokenKind::Eof | TokenKind::CloseBrace => return,
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.pos += 1;
                    return;
                }
                _ => {
                    self.pos += 1;
                }
            }
        }
    }
}
