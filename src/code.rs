//! Room code generation.

use rand::Rng;

/// Code length in characters.
pub const CODE_LEN: usize = 6;

/// 33-symbol alphabet. `0`, `1` and `O` are excluded so a code read aloud
/// or retyped from a screen cannot confuse 0/O or 1/I.
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";

/// Draw a uniform random room code. Uniqueness against live rooms is the
/// registry's job; this never self-checks.
pub fn generate() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Shape check for codes arriving over the wire.
pub fn is_valid(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_no_lookalikes() {
        assert_eq!(CODE_ALPHABET.len(), 33);
        for banned in [b'0', b'1', b'O'] {
            assert!(!CODE_ALPHABET.contains(&banned));
        }
    }

    #[test]
    fn generated_codes_validate() {
        for _ in 0..200 {
            let code = generate();
            assert_eq!(code.len(), CODE_LEN);
            assert!(is_valid(&code), "{code}");
        }
    }

    #[test]
    fn shape_check_rejects_bad_codes() {
        assert!(!is_valid(""));
        assert!(!is_valid("ABC"));
        assert!(!is_valid("ABCDEFG"));
        assert!(!is_valid("ABCDE0"));
        assert!(!is_valid("abcdef"));
        assert!(is_valid("AB23CD"));
    }
}
