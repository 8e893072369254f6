//! Encoding of sensitive variable values.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::task::VariableDataType;
use crate::{Error, Result};

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts sensitive values stored alongside deployments.
pub trait SecretCodec: Send + Sync {
    fn encode(&self, plain: &str) -> Result<String>;

    fn decode(&self, encoded: &str) -> Result<String>;

    /// Decode and convert back to the variable's declared type.
    fn decode_to_type(&self, data_type: VariableDataType, encoded: &str) -> Result<Value> {
        let plain = self.decode(encoded)?;
        data_type.parse_value(&plain)
    }
}

/// AES-256-GCM codec. Output is base64 of `nonce || ciphertext`.
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    /// Derive the 256-bit key from a passphrase with SHA-256.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl std::fmt::Debug for AesGcmCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCodec").finish_non_exhaustive()
    }
}

impl SecretCodec for AesGcmCodec {
    fn encode(&self, plain: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| Error::Internal("failed to encrypt secret".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    fn decode(&self, encoded: &str) -> Result<String> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidInput(format!("invalid base64 secret: {e}")))?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::InvalidInput("secret is too short".into()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::InvalidInput("secret could not be decrypted".into()))?;

        String::from_utf8(plain)
            .map_err(|_| Error::InvalidInput("decrypted secret is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode() {
        let codec = AesGcmCodec::from_passphrase("test-key");
        let encoded = codec.encode("s3cret").unwrap();
        assert_ne!(encoded, "s3cret");
        assert_eq!(codec.decode(&encoded).unwrap(), "s3cret");
    }

    #[test]
    fn test_wrong_key_fails() {
        let encoded = AesGcmCodec::from_passphrase("a").encode("value").unwrap();
        let err = AesGcmCodec::from_passphrase("b").decode(&encoded).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_decode_to_declared_type() {
        let codec = AesGcmCodec::from_passphrase("k");
        let port = codec.encode("8080").unwrap();
        assert_eq!(
            codec.decode_to_type(VariableDataType::Number, &port).unwrap(),
            json!(8080)
        );
        let flag = codec.encode("false").unwrap();
        assert_eq!(
            codec.decode_to_type(VariableDataType::Boolean, &flag).unwrap(),
            json!(false)
        );
    }
}
