//! 凭据加密与一次性令牌
//! AES-256-GCM，每个值使用随机 96 位 nonce，存储格式为 base64(nonce || ciphertext)

use crate::error::{AppError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use std::fmt;

const NONCE_LEN: usize = 12;

/// 令牌加解密器，密钥来自进程级配置
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenCipher([REDACTED])")
    }
}

impl TokenCipher {
    pub fn new(key: &[u8; 32]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| AppError::Config("invalid encryption key length".to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &Secret<String>) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.expose_secret().as_bytes())
            .map_err(|_| AppError::Crypto("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<Secret<String>> {
        let raw = STANDARD
            .decode(sealed)
            .map_err(|_| AppError::Crypto("ciphertext is not valid base64".to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(AppError::Crypto("ciphertext too short".to_string()));
        }

        let (nonce, body) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| AppError::Crypto("decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map(Secret::new)
            .map_err(|_| AppError::Crypto("plaintext is not utf-8".to_string()))
    }
}

/// 生成 32 字节随机令牌（URL 安全 base64）
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 令牌哈希（存储用，不保存原文）
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
