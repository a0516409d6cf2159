//! Source files and text locations.
//!
//! Every diagnostic and most AST nodes carry a [`TextLocation`]: the owning
//! file, byte offset, line/column, and length. Locations are created by the
//! tokenizer and immutable afterwards.

use crate::compiler::diagnostics::ErrorLocation;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 1-based line and column of a character in a source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
pub struct CharPosition {
    pub line: u32,
    pub column: u32,
}

impl CharPosition {
    pub fn start() -> CharPosition {
        CharPosition { line: 1, column: 1 }
    }
}

/// A file id into the unit's [`SourceMap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FileId(pub u32);

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TextLocation {
    pub file: FileId,
    pub byte_offset: u32,
    pub start: CharPosition,
    pub end: CharPosition,
    pub length: u32,
}

impl TextLocation {
    pub fn new(
        file: FileId,
        byte_offset: u32,
        start: CharPosition,
        end: CharPosition,
        length: u32,
    ) -> TextLocation {
        TextLocation {
            file,
            byte_offset,
            start,
            end,
            length,
        }
    }

    /// Converts to an owned [`ErrorLocation`] by resolving the file id.
    pub fn to_error_location(&self, sources: &SourceMap) -> ErrorLocation {
        ErrorLocation {
            file: sources.path_of(self.file),
            start: self.start,
            end: self.end,
        }
    }

    /// For errors raised before any file is registered.
    pub fn to_error_location_without_map(&self) -> ErrorLocation {
        ErrorLocation {
            file: PathBuf::new(),
            start: self.start,
            end: self.end,
        }
    }
}

pub struct SourceFile {
    pub path: PathBuf,
    pub source: String,
}

/// The per-unit registry of loaded source files.
#[derive(Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> SourceMap {
        SourceMap { files: Vec::new() }
    }

    pub fn add(&mut self, path: PathBuf, source: String) -> FileId {
        self.files.push(SourceFile { path, source });
        FileId((self.files.len() - 1) as u32)
    }

    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0 as usize)
    }

    pub fn path_of(&self, id: FileId) -> PathBuf {
        self.get(id)
            .map(|file| file.path.clone())
            .unwrap_or_default()
    }

    pub fn source_of(&self, id: FileId) -> &str {
        self.get(id).map(|file| file.source.as_str()).unwrap_or("")
    }

    pub fn find_by_path(&self, path: &Path) -> Option<FileId> {
        self.files
            .iter()
            .position(|file| file.path == path)
            .map(|index| FileId(index as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_map_assigns_sequential_ids() {
        let mut map = SourceMap::new();
        let a = map.add(PathBuf::from("a.tml"), "func main()".to_string());
        let b = map.add(PathBuf::from("b.tml"), String::new());
        assert_eq!(a, FileId(0));
        assert_eq!(b, FileId(1));
        assert_eq!(map.path_of(b), PathBuf::from("b.tml"));
        assert_eq!(map.source_of(a), "func main()");
        assert_eq!(map.find_by_path(Path::new("b.tml")), Some(b));
    }
}
