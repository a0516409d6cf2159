//! Move and borrow rules.
//!
//! A value passed by value to a by-value parameter is consumed; later use of
//! the original binding is an error unless its type is trivially duplicable.
//! `&T` never consumes. `&mut T` forbids a second simultaneous borrow of the
//! same place within one call's argument list.

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation, ErrorMetaDataKey};
use crate::compiler::types::{Type, TypeRef};
use rustc_hash::FxHashMap;

/// Types that copy implicitly instead of moving: primitives, references,
/// raw pointers, and function values.
pub fn is_trivially_duplicable(value_type: &TypeRef) -> bool {
    match value_type.as_ref() {
        Type::Primitive(_) => true,
        Type::Reference { .. } | Type::Pointer { .. } | Type::Function { .. } => true,
        Type::Tuple(members) => members.iter().all(is_trivially_duplicable),
        Type::Array { element, .. } => is_trivially_duplicable(element),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct MoveRecord {
    pub moved_at: ErrorLocation,
}

/// Per-function move state. Scopes mirror the checker's lexical scopes; a
/// move inside a conditional branch is treated as a move on all paths, the
/// conservative choice.
#[derive(Debug, Default)]
pub struct MoveTracker {
    moved: FxHashMap<String, MoveRecord>,
}

impl MoveTracker {
    pub fn new() -> MoveTracker {
        MoveTracker::default()
    }

    /// Record that `name` was consumed at `location`.
    pub fn mark_moved(&mut self, name: &str, location: &ErrorLocation) {
        self.moved
            .entry(name.to_string())
            .or_insert_with(|| MoveRecord {
                moved_at: location.clone(),
            });
    }

    /// Reassignment makes the binding usable again.
    pub fn mark_reinitialized(&mut self, name: &str) {
        self.moved.remove(name);
    }

    /// Check a read of `name`; a use after move is a `B001`.
    pub fn check_use(&self, name: &str, location: &ErrorLocation) -> Option<CompileError> {
        let record = self.moved.get(name)?;
        Some(
            CompileError::new(
                format!("Use of moved value '{name}'"),
                location.clone(),
                ErrorCode::B001,
            )
            .with_note(format!(
                "'{name}' was moved at {}:{}",
                record.moved_at.start.line, record.moved_at.start.column
            ))
            .with_metadata(ErrorMetaDataKey::MovedVariable, name)
            .with_metadata(
                ErrorMetaDataKey::PrimarySuggestion,
                "pass a reference, or duplicate the value before moving it",
            ),
        )
    }
}

/// One call's argument list may not borrow the same place mutably twice, nor
/// mix a mutable borrow with any other borrow of that place.
pub fn check_argument_aliasing(
    borrows: &[(String, bool, ErrorLocation)],
) -> Vec<CompileError> {
    let mut errors = Vec::new();
    for (index, (name, mutable, location)) in borrows.iter().enumerate() {
        for (other_name, other_mutable, _) in &borrows[..index] {
            if name == other_name && (*mutable || *other_mutable) {
                errors.push(
                    CompileError::new(
                        format!("'{name}' is borrowed mutably while also borrowed elsewhere in the same call"),
                        location.clone(),
                        ErrorCode::B002,
                    )
                    .with_metadata(ErrorMetaDataKey::BorrowedVariable, name.clone()),
                );
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::Primitive;

    #[test]
    fn primitives_and_references_duplicate_freely() {
        assert!(is_trivially_duplicable(&Type::primitive(Primitive::I32)));
        assert!(is_trivially_duplicable(&std::sync::Arc::new(
            Type::Reference {
                target: Type::named("List", vec![Type::primitive(Primitive::I32)]),
                mutable: false,
            }
        )));
        assert!(!is_trivially_duplicable(&Type::named(
            "List",
            vec![Type::primitive(Primitive::I32)]
        )));
    }

    #[test]
    fn use_after_move_is_b001() {
        let mut tracker = MoveTracker::new();
        tracker.mark_moved("items", &ErrorLocation::default());
        let error = tracker
            .check_use("items", &ErrorLocation::default())
            .expect("use after move must error");
        assert_eq!(error.code, ErrorCode::B001);
    }

    #[test]
    fn reassignment_clears_the_move() {
        let mut tracker = MoveTracker::new();
        tracker.mark_moved("items", &ErrorLocation::default());
        tracker.mark_reinitialized("items");
        assert!(tracker.check_use("items", &ErrorLocation::default()).is_none());
    }

    #[test]
    fn double_mutable_borrow_in_one_call_is_b002() {
        let location = ErrorLocation::default();
        let errors = check_argument_aliasing(&[
            ("buffer".to_string(), true, location.clone()),
            ("buffer".to_string(), true, location.clone()),
        ]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::B002);
    }

    #[test]
    fn shared_borrows_of_the_same_place_are_fine() {
        let location = ErrorLocation::default();
        let errors = check_argument_aliasing(&[
            ("buffer".to_string(), false, location.clone()),
            ("buffer".to_string(), false, location.clone()),
        ]);
        assert!(errors.is_empty());
    }

    #[test]
    fn mixing_shared_and_mutable_is_b002() {
        let location = ErrorLocation::default();
        let errors = check_argument_aliasing(&[
            ("buffer".to_string(), false, location.clone()),
            ("buffer".to_string(), true, location.clone()),
        ]);
        assert_eq!(errors.len(), 1);
    }
}
