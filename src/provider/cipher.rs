//! Opaque payload encryption seam.
//!
//! Providers receive `{"data": <ciphertext>}` and answer in kind. The cipher
//! itself is an injected dependency; the engine only cares that
//! `decrypt(encrypt(p, key, iv), key, iv) == p`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> AppResult<String>;
    fn decrypt(&self, ciphertext: &str, key: &[u8], iv: &[u8]) -> AppResult<Vec<u8>>;
}

/// SHA-256 keystream cipher, base64-armored. Stands in for the
/// provider-mandated symmetric primitive behind the `PayloadCipher` seam.
pub struct KeystreamCipher;

impl PayloadCipher for KeystreamCipher {
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> AppResult<String> {
        Ok(STANDARD.encode(xor_keystream(plaintext, key, iv)))
    }

    fn decrypt(&self, ciphertext: &str, key: &[u8], iv: &[u8]) -> AppResult<Vec<u8>> {
        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|e| AppError::External(format!("Undecodable provider payload: {}", e)))?;
        Ok(xor_keystream(&raw, key, iv))
    }
}

fn xor_keystream(data: &[u8], key: &[u8], iv: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (counter, chunk) in data.chunks(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(iv);
        hasher.update((counter as u64).to_le_bytes());
        let block = hasher.finalize();
        out.extend(chunk.iter().zip(block.iter()).map(|(b, k)| b ^ k));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_recovers_plaintext() {
        let key = [7u8; 32];
        let iv = [3u8; 16];
        let msg = br#"{"reference_id":"x","amount":"100"}"#;

        let ct = KeystreamCipher.encrypt(msg, &key, &iv).unwrap();
        assert_ne!(ct.as_bytes(), msg.as_slice());
        let pt = KeystreamCipher.decrypt(&ct, &key, &iv).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn wrong_iv_garbles_output() {
        let key = [7u8; 32];
        let ct = KeystreamCipher.encrypt(b"secret", &key, &[1u8; 16]).unwrap();
        let pt = KeystreamCipher.decrypt(&ct, &key, &[2u8; 16]).unwrap();
        assert_ne!(pt, b"secret");
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(KeystreamCipher.decrypt("not base64!!!", &[0u8; 32], &[0u8; 16]).is_err());
    }
}
