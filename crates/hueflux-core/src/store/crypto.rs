// At-rest encryption for the credential store.
//
// AES-256-GCM keyed by SHA-256(domain || passphrase). File layout:
// MAGIC (4) | nonce (12) | ciphertext+tag. Any mismatch on open is a
// `DecryptionFailure`, which callers treat as an empty store.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

const MAGIC: &[u8; 4] = b"HFX1";
const NONCE_LEN: usize = 12;
const KEY_DOMAIN: &[u8] = b"hueflux/bridge-store/v1\0";

pub(crate) struct StoreCipher {
    cipher: Aes256Gcm,
}

impl StoreCipher {
    pub(crate) fn new(passphrase: &SecretString) -> Self {
        let digest = Sha256::new()
            .chain_update(KEY_DOMAIN)
            .chain_update(passphrase.expose_secret().as_bytes())
            .finalize();
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest)),
        }
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CoreError::Storage {
                message: "encryption failed".into(),
            })?;

        let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub(crate) fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CoreError> {
        let body = sealed
            .strip_prefix(MAGIC.as_slice())
            .ok_or(CoreError::DecryptionFailure)?;
        if body.len() < NONCE_LEN {
            return Err(CoreError::DecryptionFailure);
        }
        let (nonce, ciphertext) = body.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::DecryptionFailure)
    }
}
