//! Unified diagnostics for every stage of the compiler.
//!
//! All stages produce [`CompileError`] values and accumulate them into
//! [`CompilerMessages`]; nothing below the CLI ever aborts the process.
//! Each error carries a taxonomy code (`L*` lexical, `P*` parse, `PP*`
//! preprocessor, `T*` type, `B*` borrow/ownership, `R*` resolver, `C*`
//! codegen), a primary location, optional notes, and structured metadata
//! used by fix-it rendering and the JSON error format.

use crate::compiler::source::CharPosition;
use colour::{e_dark_yellow_ln, e_magenta_ln, e_red_ln, e_yellow_ln};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// The final set of errors and warnings emitted from a compilation unit.
#[derive(Debug, Default)]
pub struct CompilerMessages {
    pub errors: Vec<CompileError>,
    pub warnings: Vec<CompilerWarning>,
}

impl CompilerMessages {
    pub fn new() -> Self {
        CompilerMessages {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn from_error(error: CompileError) -> Self {
        CompilerMessages {
            errors: vec![error],
            warnings: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn merge(&mut self, other: CompilerMessages) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Structured metadata keys attached to errors for richer rendering.
#[derive(Debug, Eq, Hash, PartialEq, Clone, Serialize)]
pub enum ErrorMetaDataKey {
    CompilationStage,
    VariableName,

    PrimarySuggestion,     // One-line fix or top-level idea
    AlternativeSuggestion, // Secondary alternative
    SuggestedReplacement,  // Text that could replace the offending code
    SuggestedInsertion,    // Text that could be inserted
    SuggestedLocation,     // Relative descriptor: "before token X", "after semicolon"

    ExpectedType,
    FoundType,
    MissingVariants,
    MovedVariable,
    BorrowedVariable,
    ConflictingSources,
}

/// A completely owned source location so errors can cross thread and stage
/// boundaries without dragging the source map along.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorLocation {
    pub file: PathBuf,
    pub start: CharPosition,
    pub end: CharPosition,
}

impl ErrorLocation {
    pub fn new(file: PathBuf, start: CharPosition, end: CharPosition) -> ErrorLocation {
        ErrorLocation { file, start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    // Lexical
    L001, // malformed literal
    L002, // unterminated string
    L003, // unknown character
    // Parse
    P001, // unexpected token
    P002, // missing delimiter
    P003, // malformed declaration
    // Preprocessor
    PP001, // unmatched conditional
    PP002, // #error directive
    PP003, // malformed directive
    PP004, // #warning directive (warning severity)
    // Types
    T001, // type mismatch
    T002, // unknown symbol
    T003, // constraint unsatisfied
    T004, // non-exhaustive match
    T005, // arity/type-argument mismatch
    T006, // OOP rule violation
    T007, // reserved name redefinition
    // Borrow / ownership
    B001, // use after move
    B002, // aliasing violation
    // Resolver / module loading
    R001, // module not found
    R002, // import conflict
    R003, // malformed module
    // Codegen
    C001, // unsupported construct
    C002, // unresolved monomorphization
    C003, // unknown callee
    // Config / driver
    CFG001,
    // File system
    F001,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::L001 => "L001",
            ErrorCode::L002 => "L002",
            ErrorCode::L003 => "L003",
            ErrorCode::P001 => "P001",
            ErrorCode::P002 => "P002",
            ErrorCode::P003 => "P003",
            ErrorCode::PP001 => "PP001",
            ErrorCode::PP002 => "PP002",
            ErrorCode::PP003 => "PP003",
            ErrorCode::PP004 => "PP004",
            ErrorCode::T001 => "T001",
            ErrorCode::T002 => "T002",
            ErrorCode::T003 => "T003",
            ErrorCode::T004 => "T004",
            ErrorCode::T005 => "T005",
            ErrorCode::T006 => "T006",
            ErrorCode::T007 => "T007",
            ErrorCode::B001 => "B001",
            ErrorCode::B002 => "B002",
            ErrorCode::R001 => "R001",
            ErrorCode::R002 => "R002",
            ErrorCode::R003 => "R003",
            ErrorCode::C001 => "C001",
            ErrorCode::C002 => "C002",
            ErrorCode::C003 => "C003",
            ErrorCode::CFG001 => "CFG001",
            ErrorCode::F001 => "F001",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompileError {
    pub msg: String,
    pub code: ErrorCode,

    // The primary location. Secondary context goes in `notes`.
    pub location: ErrorLocation,
    pub notes: Vec<String>,

    // Structured detail for fix-its and machine consumers
    pub metadata: HashMap<ErrorMetaDataKey, String>,
}

impl CompileError {
    pub fn new(msg: impl Into<String>, location: ErrorLocation, code: ErrorCode) -> CompileError {
        CompileError {
            msg: msg.into(),
            code,
            location,
            notes: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_file_path(mut self, file_path: PathBuf) -> Self {
        self.location.file = file_path;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_metadata(mut self, key: ErrorMetaDataKey, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompilerWarning {
    pub msg: String,
    pub code: &'static str,
    pub location: ErrorLocation,
}

impl CompilerWarning {
    pub fn new(msg: impl Into<String>, code: &'static str, location: ErrorLocation) -> Self {
        CompilerWarning {
            msg: msg.into(),
            code,
            location,
        }
    }
}

/// Builds a [`CompileError`] with optional `{ Key => value }` metadata.
#[macro_export]
macro_rules! new_compile_error {
    ($code:expr, $msg:expr, $location:expr) => {
        $crate::compiler::diagnostics::CompileError::new($msg, $location, $code)
    };
    ($code:expr, $msg:expr, $location:expr, { $($key:ident => $value:expr),+ $(,)? }) => {{
        let mut error = $crate::compiler::diagnostics::CompileError::new($msg, $location, $code);
        $(
            error.metadata.insert(
                $crate::compiler::diagnostics::ErrorMetaDataKey::$key,
                String::from($value),
            );
        )+
        error
    }};
}

#[macro_export]
macro_rules! return_syntax_error {
    ($msg:expr, $location:expr $(, { $($key:ident => $value:expr),+ $(,)? })?) => {
        return Err($crate::new_compile_error!(
            $crate::compiler::diagnostics::ErrorCode::P001,
            $msg,
            $location
            $(, { $($key => $value),+ })?
        ))
    };
}

#[macro_export]
macro_rules! return_lexer_error {
    ($msg:expr, $location:expr $(, { $($key:ident => $value:expr),+ $(,)? })?) => {
        return Err($crate::new_compile_error!(
            $crate::compiler::diagnostics::ErrorCode::L001,
            $msg,
            $location
            $(, { $($key => $value),+ })?
        ))
    };
}

#[macro_export]
macro_rules! return_type_error {
    ($msg:expr, $location:expr $(, { $($key:ident => $value:expr),+ $(,)? })?) => {
        return Err($crate::new_compile_error!(
            $crate::compiler::diagnostics::ErrorCode::T001,
            $msg,
            $location
            $(, { $($key => $value),+ })?
        ))
    };
}

#[macro_export]
macro_rules! return_rule_error {
    ($code:ident, $msg:expr, $location:expr $(, { $($key:ident => $value:expr),+ $(,)? })?) => {
        return Err($crate::new_compile_error!(
            $crate::compiler::diagnostics::ErrorCode::$code,
            $msg,
            $location
            $(, { $($key => $value),+ })?
        ))
    };
}

#[macro_export]
macro_rules! return_codegen_error {
    ($msg:expr, $location:expr $(, { $($key:ident => $value:expr),+ $(,)? })?) => {
        return Err($crate::new_compile_error!(
            $crate::compiler::diagnostics::ErrorCode::C001,
            $msg,
            $location
            $(, { $($key => $value),+ })?
        ))
    };
}

/// Renders diagnostics to stderr for a human. The JSON form used by
/// `--error-format=json` serializes the same structures with serde.
pub fn print_errors(messages: &CompilerMessages) {
    for warning in &messages.warnings {
        e_dark_yellow_ln!(
            "warning[{}]: {} ({}:{}:{})",
            warning.code,
            warning.msg,
            warning.location.file.display(),
            warning.location.start.line,
            warning.location.start.column
        );
    }

    for error in &messages.errors {
        e_red_ln!(
            "error[{}]: {} ({}:{}:{})",
            error.code,
            error.msg,
            error.location.file.display(),
            error.location.start.line,
            error.location.start.column
        );
        for note in &error.notes {
            e_magenta_ln!("  note: {}", note);
        }
        if let Some(suggestion) = error.metadata.get(&ErrorMetaDataKey::PrimarySuggestion) {
            e_yellow_ln!("  help: {}", suggestion);
        }
    }
}

/// One JSON object per diagnostic, one per line, matching `--error-format=json`.
pub fn print_errors_json(messages: &CompilerMessages) {
    for warning in &messages.warnings {
        if let Ok(line) = serde_json::to_string(warning) {
            eprintln!("{line}");
        }
    }
    for error in &messages.errors {
        if let Ok(line) = serde_json::to_string(error) {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> ErrorLocation {
        ErrorLocation::default()
    }

    #[test]
    fn metadata_builder_macro_attaches_entries() {
        fn fails() -> Result<(), CompileError> {
            return_type_error!("expected I32, found Str", here(), {
                ExpectedType => "I32",
                FoundType => "Str",
            });
        }

        let error = fails().unwrap_err();
        assert_eq!(error.code, ErrorCode::T001);
        assert_eq!(
            error.metadata.get(&ErrorMetaDataKey::ExpectedType),
            Some(&"I32".to_string())
        );
        assert_eq!(
            error.metadata.get(&ErrorMetaDataKey::FoundType),
            Some(&"Str".to_string())
        );
    }

    #[test]
    fn errors_serialize_for_json_format() {
        let error = CompileError::new("boom", here(), ErrorCode::C001).with_note("while lowering");
        let json = serde_json::to_string(&error).expect("error should serialize");
        assert!(json.contains("\"C001\""));
        assert!(json.contains("while lowering"));
    }
}
