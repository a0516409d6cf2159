//! Conditional-compilation preprocessor.
//!
//! Runs over the token stream before parsing. Directive lines were captured
//! by the tokenizer as [`TokenKind::Directive`]; this pass interprets them,
//! drops the tokens of excluded branches, and records `PP*` diagnostics.
//!
//! Directives: `#if EXPR`, `#ifdef S`, `#ifndef S`, `#elif EXPR`, `#else`,
//! `#endif`, `#define S [value]`, `#undef S`, `#error "msg"`, `#warning "msg"`.
//!
//! Condition grammar: `SYMBOL | defined(SYMBOL) | !E | E && E | E || E | (E)`.

use crate::compiler::diagnostics::{
    CompileError, CompilerWarning, ErrorCode, ErrorLocation,
};
use crate::compiler::source::SourceMap;
use crate::compiler::tokenizer::tokens::{FileTokens, Token, TokenKind};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Windows,
    Linux,
    Macos,
    Android,
    Ios,
    Freebsd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    X86,
    Arm64,
    Arm,
    Wasm32,
    Riscv64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Debug,
    Release,
    Test,
}

/// The symbol table the condition grammar evaluates against.
#[derive(Debug, Clone)]
pub struct PreprocessorSymbols {
    defines: FxHashMap<String, String>,
}

impl PreprocessorSymbols {
    /// Symbols for the host platform plus explicit target options and user
    /// `-D` defines.
    pub fn new(os: TargetOs, arch: TargetArch, mode: BuildMode) -> PreprocessorSymbols {
        let mut symbols = PreprocessorSymbols {
            defines: FxHashMap::default(),
        };

        match os {
            TargetOs::Windows => symbols.define("WINDOWS"),
            TargetOs::Linux => {
                symbols.define("LINUX");
                symbols.define("UNIX");
                symbols.define("POSIX");
            }
            TargetOs::Macos => {
                symbols.define("MACOS");
                symbols.define("UNIX");
                symbols.define("POSIX");
            }
            TargetOs::Android => {
                symbols.define("ANDROID");
                symbols.define("LINUX");
                symbols.define("UNIX");
                symbols.define("POSIX");
            }
            TargetOs::Ios => {
                symbols.define("IOS");
                symbols.define("UNIX");
                symbols.define("POSIX");
            }
            TargetOs::Freebsd => {
                symbols.define("FREEBSD");
                symbols.define("UNIX");
                symbols.define("POSIX");
            }
        }

        match arch {
            TargetArch::X86_64 => {
                symbols.define("X86_64");
                symbols.define("PTR_64");
            }
            TargetArch::X86 => {
                symbols.define("X86");
                symbols.define("PTR_32");
            }
            TargetArch::Arm64 => {
                symbols.define("ARM64");
                symbols.define("PTR_64");
            }
            TargetArch::Arm => {
                symbols.define("ARM");
                symbols.define("PTR_32");
            }
            TargetArch::Wasm32 => {
                symbols.define("WASM32");
                symbols.define("PTR_32");
            }
            TargetArch::Riscv64 => {
                symbols.define("RISCV64");
                symbols.define("PTR_64");
            }
        }

        // Every supported target is little-endian
        symbols.define("LITTLE_ENDIAN");

        match mode {
            BuildMode::Debug => symbols.define("DEBUG"),
            BuildMode::Release => symbols.define("RELEASE"),
            BuildMode::Test => {
                symbols.define("TEST");
                symbols.define("DEBUG");
            }
        }

        symbols
    }

    pub fn host(mode: BuildMode) -> PreprocessorSymbols {
        let os = if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else if cfg!(target_os = "macos") {
            TargetOs::Macos
        } else if cfg!(target_os = "freebsd") {
            TargetOs::Freebsd
        } else {
            TargetOs::Linux
        };
        let arch = if cfg!(target_arch = "aarch64") {
            TargetArch::Arm64
        } else {
            TargetArch::X86_64
        };
        PreprocessorSymbols::new(os, arch, mode)
    }

    pub fn define(&mut self, symbol: &str) {
        self.defines.insert(symbol.to_string(), String::from("1"));
    }

    pub fn define_value(&mut self, symbol: &str, value: &str) {
        self.defines.insert(symbol.to_string(), value.to_string());
    }

    pub fn undef(&mut self, symbol: &str) {
        self.defines.remove(symbol);
    }

    pub fn is_defined(&self, symbol: &str) -> bool {
        self.defines.contains_key(symbol)
    }
}

pub struct PreprocessOutcome {
    pub tokens: FileTokens,
    pub errors: Vec<CompileError>,
    pub warnings: Vec<CompilerWarning>,
}

struct ConditionFrame {
    /// The current branch is emitting tokens
    active: bool,
    /// Some earlier branch of this conditional already ran
    taken: bool,
    /// The enclosing context was active when this frame opened
    parent_active: bool,
}

pub fn preprocess(
    file_tokens: FileTokens,
    symbols: &mut PreprocessorSymbols,
    sources: &SourceMap,
) -> PreprocessOutcome {
    let mut output: Vec<Token> = Vec::with_capacity(file_tokens.tokens.len());
    let mut errors: Vec<CompileError> = Vec::new();
    let mut warnings: Vec<CompilerWarning> = Vec::new();
    let mut stack: Vec<ConditionFrame> = Vec::new();
    let file = file_tokens.file;

    let active = |stack: &[ConditionFrame]| stack.last().map(|frame| frame.active).unwrap_or(true);

    for token in file_tokens.tokens {
        let directive = match &token.kind {
            TokenKind::Directive(line) => line.clone(),
            _ => {
                if active(&stack) {
                    output.push(token);
                }
                continue;
            }
        };

        let location = token.location.to_error_location(sources);
        let line = directive.trim_start_matches('#').trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name {
            "if" => {
                let enabled = active(&stack);
                let value = match eval_condition(rest, symbols) {
                    Ok(value) => value,
                    Err(message) => {
                        errors.push(malformed(&message, location.clone()));
                        false
                    }
                };
                stack.push(ConditionFrame {
                    active: enabled && value,
                    taken: value,
                    parent_active: enabled,
                });
            }
            "ifdef" => {
                let enabled = active(&stack);
                let value = symbols.is_defined(rest);
                stack.push(ConditionFrame {
                    active: enabled && value,
                    taken: value,
                    parent_active: enabled,
                });
            }
            "ifndef" => {
                let enabled = active(&stack);
                let value = !symbols.is_defined(rest);
                stack.push(ConditionFrame {
                    active: enabled && value,
                    taken: value,
                    parent_active: enabled,
                });
            }
            "elif" => match stack.last_mut() {
                Some(frame) => {
                    let value = match eval_condition(rest, symbols) {
                        Ok(value) => value,
                        Err(message) => {
                            errors.push(malformed(&message, location.clone()));
                            false
                        }
                    };
                    frame.active = frame.parent_active && !frame.taken && value;
                    frame.taken = frame.taken || value;
                }
                None => errors.push(unmatched("#elif without #if", location)),
            },
            "else" => match stack.last_mut() {
                Some(frame) => {
                    frame.active = frame.parent_active && !frame.taken;
                    frame.taken = true;
                }
                None => errors.push(unmatched("#else without #if", location)),
            },
            "endif" => {
                if stack.pop().is_none() {
                    errors.push(unmatched("#endif without #if", location));
                }
            }
            "define" => {
                if active(&stack) {
                    match rest.split_once(char::is_whitespace) {
                        Some((symbol, value)) => symbols.define_value(symbol, value.trim()),
                        None if !rest.is_empty() => symbols.define(rest),
                        None => errors.push(malformed("#define requires a symbol", location)),
                    }
                }
            }
            "undef" => {
                if active(&stack) {
                    if rest.is_empty() {
                        errors.push(malformed("#undef requires a symbol", location));
                    } else {
                        symbols.undef(rest);
                    }
                }
            }
            "error" => {
                if active(&stack) {
                    errors.push(CompileError::new(
                        format!("#error: {}", unquote(rest)),
                        location,
                        ErrorCode::PP002,
                    ));
                }
            }
            "warning" => {
                if active(&stack) {
                    warnings.push(CompilerWarning::new(
                        format!("#warning: {}", unquote(rest)),
                        "PP004",
                        location,
                    ));
                }
            }
            other => {
                if active(&stack) {
                    errors.push(malformed(
                        &format!("Unknown preprocessor directive '#{other}'"),
                        location,
                    ));
                }
            }
        }
    }

    if !stack.is_empty() {
        errors.push(CompileError::new(
            format!("{} unterminated conditional block(s) at end of file", stack.len()),
            ErrorLocation::default(),
            ErrorCode::PP001,
        ));
    }

    PreprocessOutcome {
        tokens: FileTokens::new(file, output),
        errors,
        warnings,
    }
}

fn malformed(message: &str, location: ErrorLocation) -> CompileError {
    CompileError::new(message, location, ErrorCode::PP003)
}

fn unmatched(message: &str, location: ErrorLocation) -> CompileError {
    CompileError::new(message, location, ErrorCode::PP001)
}

fn unquote(text: &str) -> &str {
    text.trim().trim_matches('"')
}

// ---------------------------------
//     Condition expressions
// ---------------------------------
// Recursive descent over `SYMBOL | defined(S) | !E | E && E | E || E | (E)`
// with `||` binding loosest.

struct CondParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

pub fn eval_condition(expr: &str, symbols: &PreprocessorSymbols) -> Result<bool, String> {
    let mut parser = CondParser {
        chars: expr.chars().peekable(),
    };
    let value = parser.parse_or(symbols)?;
    parser.skip_whitespace();
    if parser.chars.peek().is_some() {
        return Err(format!("Trailing input in condition '{expr}'"));
    }
    Ok(value)
}

impl<'a> CondParser<'a> {
    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some(ch) if ch.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self, symbols: &PreprocessorSymbols) -> Result<bool, String> {
        let mut value = self.parse_and(symbols)?;
        loop {
            self.skip_whitespace();
            if self.eat('|') {
                if !self.eat('|') {
                    return Err("Single '|' in condition; use '||'".to_string());
                }
                let rhs = self.parse_and(symbols)?;
                value = value || rhs;
            } else {
                return Ok(value);
            }
        }
    }

    fn parse_and(&mut self, symbols: &PreprocessorSymbols) -> Result<bool, String> {
        let mut value = self.parse_unary(symbols)?;
        loop {
            self.skip_whitespace();
            if self.eat('&') {
                if !self.eat('&') {
                    return Err("Single '&' in condition; use '&&'".to_string());
                }
                let rhs = self.parse_unary(symbols)?;
                value = value && rhs;
            } else {
                return Ok(value);
            }
        }
    }

    fn parse_unary(&mut self, symbols: &PreprocessorSymbols) -> Result<bool, String> {
        self.skip_whitespace();
        if self.eat('!') {
            return Ok(!self.parse_unary(symbols)?);
        }
        if self.eat('(') {
            let value = self.parse_or(symbols)?;
            if !self.eat(')') {
                return Err("Missing ')' in condition".to_string());
            }
            return Ok(value);
        }

        let symbol = self.parse_symbol()?;
        if symbol == "defined" {
            if !self.eat('(') {
                return Err("'defined' requires '(SYMBOL)'".to_string());
            }
            let inner = self.parse_symbol()?;
            if !self.eat(')') {
                return Err("Missing ')' after defined(SYMBOL".to_string());
            }
            return Ok(symbols.is_defined(&inner));
        }

        Ok(symbols.is_defined(&symbol))
    }

    fn parse_symbol(&mut self) -> Result<String, String> {
        self.skip_whitespace();
        let mut word = String::new();
        while let Some(ch) = self.chars.peek() {
            if ch.is_alphanumeric() || *ch == '_' {
                word.push(*ch);
                self.chars.next();
            } else {
                break;
            }
        }
        if word.is_empty() {
            return Err("Expected a symbol in condition".to_string());
        }
        Ok(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tokenizer::tokenizer::tokenize;
    use std::path::PathBuf;

    fn run(source: &str, symbols: &mut PreprocessorSymbols) -> PreprocessOutcome {
        let mut sources = SourceMap::new();
        let file = sources.add(PathBuf::from("pp.tml"), source.to_string());
        let lexed = tokenize(source, file, &sources);
        assert!(lexed.errors.is_empty(), "lexer errors: {:?}", lexed.errors);
        preprocess(lexed.tokens, symbols, &sources)
    }

    fn identifiers(outcome: &PreprocessOutcome) -> Vec<String> {
        outcome
            .tokens
            .tokens
            .iter()
            .filter_map(|token| match &token.kind {
                TokenKind::Identifier(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn excluded_branches_are_removed() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run(
            "#if WINDOWS\nwin_only\n#else\nlinux_only\n#endif\n",
            &mut symbols,
        );
        assert!(outcome.errors.is_empty());
        assert_eq!(identifiers(&outcome), vec!["linux_only".to_string()]);
    }

    #[test]
    fn elif_takes_the_first_true_branch_only() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run(
            "#if MACOS\na\n#elif LINUX\nb\n#elif UNIX\nc\n#else\nd\n#endif\n",
            &mut symbols,
        );
        assert_eq!(identifiers(&outcome), vec!["b".to_string()]);
    }

    #[test]
    fn nested_conditionals_respect_the_outer_branch() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run(
            "#if WINDOWS\n#if LINUX\nhidden\n#endif\n#endif\nvisible\n",
            &mut symbols,
        );
        assert!(outcome.errors.is_empty());
        assert_eq!(identifiers(&outcome), vec!["visible".to_string()]);
    }

    #[test]
    fn error_directive_fails_preprocessing() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run("#error \"unsupported target\"\n", &mut symbols);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].code, ErrorCode::PP002);
        assert!(outcome.errors[0].msg.contains("unsupported target"));
    }

    #[test]
    fn warning_directive_is_non_fatal() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run("#warning \"deprecated module\"\nfunc\n", &mut symbols);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn unmatched_endif_is_a_pp_error() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run("#endif\n", &mut symbols);
        assert_eq!(outcome.errors[0].code, ErrorCode::PP001);
    }

    #[test]
    fn unterminated_if_is_a_pp_error() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run("#if LINUX\n", &mut symbols);
        assert_eq!(outcome.errors[0].code, ErrorCode::PP001);
    }

    #[test]
    fn condition_grammar_handles_defined_and_grouping() {
        let symbols =
            PreprocessorSymbols::new(TargetOs::Windows, TargetArch::X86_64, BuildMode::Release);
        assert!(eval_condition("defined(WINDOWS)", &symbols).unwrap());
        assert!(eval_condition("!DEBUG && (WINDOWS || LINUX)", &symbols).unwrap());
        assert!(!eval_condition("LINUX && X86_64", &symbols).unwrap());
        assert!(eval_condition("defined(PTR_64) || PTR_32", &symbols).unwrap());
        assert!(eval_condition("WINDOWS | LINUX", &symbols).is_err());
    }

    #[test]
    fn define_and_undef_change_later_branches() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        let outcome = run(
            "#define FEATURE_X\n#if FEATURE_X\nenabled\n#endif\n#undef FEATURE_X\n#if FEATURE_X\nstill\n#endif\n",
            &mut symbols,
        );
        assert_eq!(identifiers(&outcome), vec!["enabled".to_string()]);
    }

    #[test]
    fn user_defines_with_values_are_visible() {
        let mut symbols =
            PreprocessorSymbols::new(TargetOs::Linux, TargetArch::X86_64, BuildMode::Debug);
        symbols.define_value("MAX_DEPTH", "8");
        assert!(symbols.is_defined("MAX_DEPTH"));
    }
}
