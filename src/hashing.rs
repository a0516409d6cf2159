//! Content hashing primitives shared by the caches.
//!
//! CRC32C (Castagnoli) guards the binary module metadata cache, SHA-512
//! fingerprints test files and their dependencies, and the build cache key
//! combines preprocessed source bytes with the compilation options.

use sha2::{Digest, Sha512};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

const CRC32C_POLY: u32 = 0x82F6_3B78;

fn crc32c_table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = i as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ CRC32C_POLY
                } else {
                    crc >> 1
                };
            }
            *entry = crc;
        }
        table
    })
}

/// CRC32C over a byte slice.
pub fn crc32c(bytes: &[u8]) -> u32 {
    crc32c_update(0xFFFF_FFFF, bytes) ^ 0xFFFF_FFFF
}

/// Streaming form for hashing several buffers as one logical input.
/// Start from `0xFFFF_FFFF`, feed each buffer, then xor with `0xFFFF_FFFF`.
pub fn crc32c_update(mut state: u32, bytes: &[u8]) -> u32 {
    let table = crc32c_table();
    for &byte in bytes {
        state = (state >> 8) ^ table[((state ^ byte as u32) & 0xFF) as usize];
    }
    state
}

/// CRC32C of several source files concatenated in load order.
pub fn crc32c_files<P: AsRef<Path>>(paths: &[P]) -> io::Result<u32> {
    let mut state = 0xFFFF_FFFFu32;
    for path in paths {
        let bytes = fs::read(path)?;
        state = crc32c_update(state, &bytes);
    }
    Ok(state ^ 0xFFFF_FFFF)
}

/// Lowercase hex SHA-512 of a byte slice.
pub fn sha512_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Lowercase hex SHA-512 of a file's contents.
pub fn sha512_file(path: &Path) -> io::Result<String> {
    Ok(sha512_hex(&fs::read(path)?))
}

/// Deterministic fingerprint naming a build-cache entry.
///
/// Covers everything that can change the produced object: the preprocessed
/// source bytes, the compiler version, the compilation options in a canonical
/// text form, and the fingerprints of upstream dependencies.
pub fn build_fingerprint(
    preprocessed_source: &[u8],
    compiler_version: &str,
    options_key: &str,
    upstream: &[String],
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(preprocessed_source);
    hasher.update(compiler_version.as_bytes());
    hasher.update(options_key.as_bytes());
    for dep in upstream {
        hasher.update(dep.as_bytes());
    }
    let digest = hasher.finalize();
    // 32 hex chars is plenty of key space for a flat cache directory
    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32c_known_vector() {
        // RFC 3720 test vector: CRC32C of 32 zero bytes
        assert_eq!(crc32c(&[0u8; 32]), 0x8A91_36AA);
    }

    #[test]
    fn crc32c_streaming_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let (a, b) = data.split_at(13);
        let mut state = 0xFFFF_FFFFu32;
        state = crc32c_update(state, a);
        state = crc32c_update(state, b);
        assert_eq!(state ^ 0xFFFF_FFFF, crc32c(data));
    }

    #[test]
    fn sha512_hex_is_stable() {
        let hex = sha512_hex(b"abc");
        assert_eq!(hex.len(), 128);
        assert!(hex.starts_with("ddaf35a193617aba"));
    }

    #[test]
    fn fingerprint_changes_with_any_input() {
        let base = build_fingerprint(b"src", "0.4.2", "-O1", &[]);
        assert_ne!(base, build_fingerprint(b"src2", "0.4.2", "-O1", &[]));
        assert_ne!(base, build_fingerprint(b"src", "0.4.3", "-O1", &[]));
        assert_ne!(base, build_fingerprint(b"src", "0.4.2", "-O2", &[]));
        assert_ne!(
            base,
            build_fingerprint(b"src", "0.4.2", "-O1", &["dep".to_string()])
        );
        assert_eq!(base, build_fingerprint(b"src", "0.4.2", "-O1", &[]));
    }
}
