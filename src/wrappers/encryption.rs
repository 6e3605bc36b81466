//! AES-256-GCM encryption wrapper.
//!
//! Stored form: `[version][12-byte nonce][ciphertext + 16-byte tag]`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::settings::SecuritySettings;
use crate::error::{KvError, KvResult};
use crate::wrappers::Wrapper;

const FORMAT_VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

pub struct EncryptionWrapper {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl EncryptionWrapper {
    /// Build from a secret string.
    ///
    /// A URL-safe base64 string that decodes to exactly 32 bytes is used as
    /// the key itself; any other string is hashed with SHA-256.
    pub fn from_secret(secret: &str) -> KvResult<Self> {
        if secret.is_empty() {
            return Err(KvError::configuration("encryption secret is empty"));
        }
        let key_bytes = match URL_SAFE.decode(secret.trim()) {
            Ok(raw) if raw.len() == KEY_LEN => raw,
            _ => Sha256::digest(secret.as_bytes()).to_vec(),
        };
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| KvError::configuration("invalid encryption key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Resolve the secret: the wrapper's own key, then the configured
    /// encryption key, then the fallback secret key.
    pub fn resolve(explicit: Option<&str>, security: &SecuritySettings) -> KvResult<Self> {
        let (source, secret) = [
            ("wrapper key", explicit),
            ("security.encryption_key", security.encryption_key.as_deref()),
            ("security.secret_key", security.secret_key.as_deref()),
        ]
        .into_iter()
        .find_map(|(source, value)| {
            value
                .filter(|v| !v.trim().is_empty())
                .map(|v| (source, v))
        })
        .ok_or_else(|| {
            KvError::configuration(
                "encryption wrapper needs a key: set the wrapper key, \
                 security.encryption_key or security.secret_key",
            )
        })?;
        debug!(source, "Encryption key resolved");
        Self::from_secret(secret)
    }
}

impl Wrapper for EncryptionWrapper {
    fn name(&self) -> &str {
        "encryption"
    }

    fn on_write(&self, mut bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| KvError::wrapper("encryption", "random source failed"))?;
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut bytes,
            )
            .map_err(|_| KvError::wrapper("encryption", "seal failed"))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + bytes.len());
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&bytes);
        Ok(out)
    }

    fn on_read(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        if bytes.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(KvError::wrapper("encryption", "ciphertext too short"));
        }
        if bytes[0] != FORMAT_VERSION {
            return Err(KvError::wrapper(
                "encryption",
                format!("unknown ciphertext version {}", bytes[0]),
            ));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[1..1 + NONCE_LEN]);
        let mut sealed = bytes[1 + NONCE_LEN..].to_vec();
        let plain_len = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut sealed)
            .map_err(|_| KvError::wrapper("encryption", "decryption failed"))?
            .len();
        sealed.truncate(plain_len);
        Ok(sealed)
    }
}
