//! Invite code generation and normalization.
//!
//! Codes are 6 characters drawn from `[A-Z0-9]`; uniqueness is enforced by
//! the store (the allocator in [`RosterService`](crate::RosterService)
//! retries on collision up to a fixed budget).

use rand::Rng;

use crate::error::EngineError;
use crate::policy::CODE_LEN;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draw a fresh candidate code.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Case-normalize user input before lookup. Anything that cannot be a code
/// resolves the same way an unknown code does.
pub fn normalize_code(input: &str) -> Result<String, EngineError> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() != CODE_LEN || !code.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
        return Err(EngineError::CodeNotFound);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_uppercase_alphanumerics() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn normalize_uppercases() {
        assert_eq!(normalize_code("x7k2qp").unwrap(), "X7K2QP");
        assert_eq!(normalize_code("  ABC123 ").unwrap(), "ABC123");
    }

    #[test]
    fn normalize_rejects_malformed_input() {
        assert!(matches!(normalize_code(""), Err(EngineError::CodeNotFound)));
        assert!(matches!(normalize_code("ABC12"), Err(EngineError::CodeNotFound)));
        assert!(matches!(normalize_code("ABC1234"), Err(EngineError::CodeNotFound)));
        assert!(matches!(normalize_code("ABC-12"), Err(EngineError::CodeNotFound)));
    }
}
