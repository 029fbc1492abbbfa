//! AES-256-GCM sealing of token state cookies

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{OidcError, Result};

const NONCE_LEN: usize = 12;

fn cipher(secret: &Secret<String>) -> Result<Aes256Gcm> {
    let digest: [u8; 32] = Sha256::digest(secret.expose_secret().as_bytes()).into();
    let key = Zeroizing::new(digest);
    Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| OidcError::config(format!("Failed to create token state cipher: {}", e)))
}

/// Encrypt and encode as `base64url(nonce || ciphertext)`
pub fn seal(secret: &Secret<String>, plaintext: &str) -> Result<String> {
    let cipher = cipher(secret)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| OidcError::state_decode(format!("Token state encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Reverse of [`seal`]; any tampering or foreign input is a decode failure
pub fn open(secret: &Secret<String>, sealed: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(sealed)
        .map_err(|_| OidcError::state_decode("Token state is not valid base64url"))?;
    if bytes.len() <= NONCE_LEN {
        return Err(OidcError::state_decode("Token state is too short"));
    }

    let cipher = cipher(secret)?;
    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| OidcError::state_decode("Token state decryption failed"))?;

    String::from_utf8(plaintext)
        .map_err(|_| OidcError::state_decode("Decrypted token state is not UTF-8"))
}
