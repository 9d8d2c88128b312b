//! Case-insensitive multiplicative string hash used for process paths.

/// Initial hash state.
pub const PATH_HASH_SEED: u32 = 1_171_724_434;

/// Per-byte multiplier.
pub const PATH_HASH_MULTIPLIER: u32 = 33;

/// Hashes `bytes` with ASCII case folding.
///
/// Each byte is folded with `| 0x20` before mixing, so `A` and `a` hash the
/// same. Non-letters are folded too (`@` becomes `` ` ``), which is part of
/// the wire contract and must not be "fixed".
pub fn path_hash(bytes: &[u8]) -> u32 {
    bytes.iter().fold(PATH_HASH_SEED, |hash, &b| {
        u32::from(b | 0x20).wrapping_add(hash.wrapping_mul(PATH_HASH_MULTIPLIER))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_seed() {
        assert_eq!(path_hash(b""), PATH_HASH_SEED);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(path_hash(b"a"), 12_200_755);
        assert_eq!(path_hash(b"C:\\Windows\\explorer.exe"), 0xCE31_2553);
        assert_eq!(path_hash(b"C:\\Windows"), 0xA7DE_7B16);
        assert_eq!(path_hash(b"/usr/bin/bash"), 0xAD15_F510);
        assert_eq!(path_hash(b"/usr/bin"), 0xE947_0283);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(path_hash(b"A"), path_hash(b"a"));
        assert_eq!(
            path_hash(b"c:\\windows\\EXPLORER.EXE"),
            path_hash(b"C:\\Windows\\explorer.exe")
        );
    }
}
