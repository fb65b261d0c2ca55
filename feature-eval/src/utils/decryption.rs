//! Decryption of encrypted feature payloads.
//!
//! Payloads have the form `base64(iv) + "." + base64(ciphertext)` and are encrypted with
//! AES-128-CBC and PKCS#7 padding. The key is supplied base64-encoded as well.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use thiserror::Error;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const PAYLOAD_DELIMITER: char = '.';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("encrypted payload is missing the iv delimiter")]
    MissingDelimiter,
    #[error("encrypted payload is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("decryption key or iv has an invalid length")]
    InvalidKeyOrIv,
    #[error("decryption failed: wrong key or corrupted payload")]
    DecryptionFailed,
    #[error("decrypted payload is not valid utf-8")]
    InvalidUtf8,
}

/// Decrypts an encrypted feature payload with a base64-encoded AES-128 key.
pub fn decrypt_payload(payload: &str, key: &str) -> Result<String, DecryptionError> {
    let (iv, cipher_text) = payload
        .split_once(PAYLOAD_DELIMITER)
        .ok_or(DecryptionError::MissingDelimiter)?;
    if cipher_text.contains(PAYLOAD_DELIMITER) {
        return Err(DecryptionError::MissingDelimiter);
    }

    let decoded_iv = decode(iv)?;
    let decoded_key = decode(key)?;
    let decoded_cipher_text = decode(cipher_text)?;

    let decryptor = Aes128CbcDec::new_from_slices(&decoded_key, &decoded_iv)
        .map_err(|_| DecryptionError::InvalidKeyOrIv)?;
    let plain_text = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(&decoded_cipher_text)
        .map_err(|_| DecryptionError::DecryptionFailed)?;

    String::from_utf8(plain_text).map_err(|_| DecryptionError::InvalidUtf8)
}

fn decode(input: &str) -> Result<Vec<u8>, DecryptionError> {
    STANDARD
        .decode(input)
        .map_err(|e| DecryptionError::InvalidBase64(e.to_string()))
}
