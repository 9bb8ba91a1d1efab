//! Signed access tokens: `base64url(payload).hex(hmac_sha256(payload))`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::constant_time_compare;
use crate::errors::AppError;
use crate::time::now_timestamp;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    issued_at: String,
    token: String,
}

/// Signs and verifies access tokens with the application secret.
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Fresh random token material to be stored server-side.
    pub fn generate_raw_token() -> String {
        format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        )
    }

    /// Wrap a raw token into its signed, client-facing form.
    pub fn sign(&self, raw_token: &str) -> Result<String, AppError> {
        let payload = TokenPayload {
            issued_at: now_timestamp(),
            token: raw_token.to_string(),
        };
        let encoded = serde_json::to_vec(&payload)?;
        let signature = self.mac_hex(&encoded)?;
        Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&encoded), signature))
    }

    /// Check the signature and return the raw token inside.
    pub fn verify(&self, token: &str) -> Result<String, AppError> {
        let invalid_format = || AppError::Unauthorized("Invalid token format".to_string());

        let (encoded, signature) = token.split_once('.').ok_or_else(invalid_format)?;
        let payload_bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| invalid_format())?;

        let expected = self.mac_hex(&payload_bytes)?;
        if !constant_time_compare(&expected, signature) {
            return Err(AppError::Unauthorized("Invalid token signature".to_string()));
        }

        let payload: TokenPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|_| AppError::Unauthorized("Invalid token payload".to_string()))?;
        if payload.token.is_empty() {
            return Err(AppError::Unauthorized(
                "Token missing inner value".to_string(),
            ));
        }
        Ok(payload.token)
    }

    fn mac_hex(&self, bytes: &[u8]) -> Result<String, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("Invalid signing key: {}", e)))?;
        mac.update(bytes);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
