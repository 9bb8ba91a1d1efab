//! Season access gate: a shared code checked by SHA-256 digest.
//!
//! This keeps casual visitors away from the sign-in form. Real authorization is the
//! invite allowlist plus team roles.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::errors::AppError;

#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    digest: Option<[u8; 32]>,
}

impl AccessGate {
    /// A gate that lets every code through.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_code(code: &str) -> Self {
        Self {
            digest: Some(Sha256::digest(code.trim().as_bytes()).into()),
        }
    }

    /// Build from a lower- or upper-case hex SHA-256 digest.
    pub fn from_hex_digest(digest: &str) -> Result<Self, AppError> {
        let bytes = hex::decode(digest.trim())
            .map_err(|e| AppError::Validation(format!("Invalid access hash: {}", e)))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Validation("Access hash must be 32 bytes".to_string()))?;
        Ok(Self {
            digest: Some(digest),
        })
    }

    /// The configured hash wins over the configured plain code.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        match (&config.season_access_hash, &config.season_access_code) {
            (Some(hash), _) => Self::from_hex_digest(hash),
            (None, Some(code)) => Ok(Self::from_code(code)),
            (None, None) => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    /// Check a code; surrounding whitespace is ignored.
    pub fn verify(&self, code: &str) -> bool {
        let Some(expected) = &self.digest else {
            return true;
        };
        let code = code.trim();
        if code.is_empty() {
            return false;
        }
        let actual = Sha256::digest(code.as_bytes());
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_disabled_gate_accepts_everything() {
        let gate = AccessGate::disabled();
        assert!(!gate.is_enabled());
        assert!(gate.verify(""));
        assert!(gate.verify("anything"));
    }

    #[test]
    fn test_hex_digest_gate() {
        let gate = AccessGate::from_hex_digest(ABC_SHA256).unwrap();
        assert!(gate.verify("abc"));
        assert!(gate.verify("  abc\n"));
        assert!(!gate.verify("abd"));
        assert!(!gate.verify(""));
    }

    #[test]
    fn test_code_gate_matches_digest_gate() {
        let from_code = AccessGate::from_code("abc");
        assert!(from_code.verify("abc"));
        assert!(!from_code.verify("ABC"));
    }

    #[test]
    fn test_invalid_digest() {
        assert!(AccessGate::from_hex_digest("zz").is_err());
        assert!(AccessGate::from_hex_digest("abcd").is_err());
    }
}
