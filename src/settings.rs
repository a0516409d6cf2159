use std::path::PathBuf;

pub const TML_FILE_EXTENSION: &str = "tml";
pub const TEST_FILE_SUFFIX: &str = ".test.tml";
pub const ERROR_TEST_SUFFIX: &str = ".error.tml";
pub const MANIFEST_FILE_NAME: &str = "tml.toml";
pub const LOCKFILE_NAME: &str = "tml.lock";
pub const TEST_CACHE_FILE_NAME: &str = ".test-cache.json";
pub const META_CACHE_EXTENSION: &str = "tml.meta";

pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Symbol prefix used for every mangled TML function in emitted IR.
pub const MANGLE_PREFIX: &str = "tml_";

// This is a guess about how much should be initially allocated for the token vecs.
// A rough heuristic from tokenizing the core library; avoids most re-allocations.
pub const SRC_TO_TOKEN_RATIO: usize = 5;
pub const TOKEN_TO_NODE_RATIO: usize = 10;
pub const IMPORTS_CAPACITY: usize = 6;

/// Library roots searched after the current source directory when resolving
/// a module path.
pub fn library_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("lib/core"), PathBuf::from("lib/std")]
}

/// Directory layout under the project root for build output.
pub mod dirs {
    pub const BUILD: &str = "build";
    pub const DEBUG: &str = "build/debug";
    pub const RELEASE: &str = "build/release";
    pub const RUN_CACHE: &str = "build/debug/.run-cache";
    pub const TEST_CACHE: &str = "build/debug/.test-cache";
    pub const OBJECT_CACHE: &str = "build/debug/.cache";
    pub const META_CACHE: &str = "build/cache/meta";
    pub const COVERAGE: &str = "build/debug/coverage";
}

/// How long the on-disk test discovery cache stays fresh.
pub const DISCOVERY_CACHE_SECONDS: u64 = 3600;

/// Default wall-clock limit for a single test subprocess.
pub const DEFAULT_TEST_TIMEOUT_SECONDS: u64 = 60;

/// Dispatcher exit codes, part of the suite EXE interface.
pub const DISPATCH_EXIT_NO_INDEX: i32 = 98;
pub const DISPATCH_EXIT_BAD_INDEX: i32 = 99;
