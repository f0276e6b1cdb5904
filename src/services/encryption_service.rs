use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

/// Seals and opens device secrets (shell passwords, SNMP communities)
/// before they are persisted. Stored form is hex(nonce || ciphertext).
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn from_hex_key(key_hex: &str) -> Result<Self, String> {
        let key_bytes = hex::decode(key_hex).map_err(|e| format!("Invalid hex key: {e}"))?;
        if key_bytes.len() != 32 {
            return Err("Encryption key must be 32 bytes (256 bits) long".to_string());
        }
        let cipher = Aes256Gcm::new(key_bytes.as_slice().into());
        Ok(SecretCipher { cipher })
    }

    pub fn seal(&self, plain_text: &str) -> Result<String, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain_text.as_bytes())
            .map_err(|e| format!("Encryption failed: {e}"))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    pub fn open(&self, sealed_hex: &str) -> Result<String, String> {
        let sealed = hex::decode(sealed_hex).map_err(|e| format!("Invalid hex ciphertext: {e}"))?;
        if sealed.len() < NONCE_SIZE {
            return Err("Ciphertext is too short to contain a nonce".to_string());
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plain = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("Decryption failed: {e}"))?;

        String::from_utf8(plain).map_err(|e| format!("Invalid UTF-8 sequence: {e}"))
    }
}
