//! XOR obfuscation of stored values.
//!
//! The value is rendered as JSON, XORed byte-by-byte with the repeating key
//! and base64-encoded behind the `__xor__:` prefix. This hides values from a
//! casual look at the storage backend; it is not encryption.

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use tracing::warn;

use crate::error::{CacheError, Result};
use crate::plugins::{PendingWrite, Plugin, Veto};

pub const SENTINEL: &str = "__xor__:";

#[derive(Clone)]
pub struct CipherPlugin {
    key: Vec<u8>,
}

impl CipherPlugin {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref().to_vec();
        if key.is_empty() {
            return Err(CacheError::Configuration(
                "Cipher key must not be empty".to_string(),
            ));
        }
        Ok(Self { key })
    }

    fn xor(&self, bytes: &mut [u8]) {
        for (byte, k) in bytes.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
    }

    pub fn encrypt(&self, value: &Value) -> Result<String> {
        let mut bytes = serde_json::to_vec(value)?;
        self.xor(&mut bytes);
        Ok(format!("{}{}", SENTINEL, general_purpose::STANDARD.encode(bytes)))
    }

    /// Reverses [`encrypt`](Self::encrypt). Errors if `input` is not one of ours.
    pub fn decrypt(&self, input: &str) -> Result<Value> {
        let payload = input
            .strip_prefix(SENTINEL)
            .ok_or_else(|| CacheError::Serialization("Missing cipher marker".to_string()))?;
        let mut bytes = general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| CacheError::Serialization(format!("Invalid cipher payload: {}", e)))?;
        self.xor(&mut bytes);
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn reveal(&self, key: &str, value: Value) -> Value {
        match &value {
            Value::String(s) if s.starts_with(SENTINEL) => match self.decrypt(s) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(key, error = %e, "Failed to decrypt value, returning it unchanged");
                    value
                }
            },
            _ => value,
        }
    }
}

impl std::fmt::Debug for CipherPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherPlugin")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Plugin for CipherPlugin {
    fn name(&self) -> &str {
        "cipher"
    }

    fn before_set(&self, key: &str, mut write: PendingWrite) -> std::result::Result<PendingWrite, Veto> {
        match self.encrypt(&write.value) {
            Ok(sealed) => {
                write.value = Value::String(sealed);
                Ok(write)
            }
            Err(e) => Err(Veto(format!("cannot encrypt '{}': {}", key, e))),
        }
    }

    fn after_get(&self, key: &str, value: Value) -> Value {
        self.reveal(key, value)
    }
}
