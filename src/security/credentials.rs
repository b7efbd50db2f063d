//! Provider-credential blobs
//!
//! Tenant-supplied vendor credentials are stored as AES-256-CBC ciphertext
//! with a random 16-byte IV prefixed to the ciphertext, then base64-encoded.
//! The key is the 64-hex-char `ENCRYPTION_KEY` from the environment.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

fn decode_key(encryption_key_hex: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = hex::decode(encryption_key_hex).context("ENCRYPTION_KEY is not valid hex")?;
    if bytes.len() != KEY_LEN {
        bail!("ENCRYPTION_KEY must be {} bytes, got {}", KEY_LEN, bytes.len());
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Encrypt a credential blob. Returns base64(IV || ciphertext).
pub fn encrypt_credential(encryption_key_hex: &str, plaintext: &str) -> Result<String> {
    let key = decode_key(encryption_key_hex)?;
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|_| anyhow::anyhow!("bad AES key/IV length"))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt a base64(IV || ciphertext) credential blob
pub fn decrypt_credential(encryption_key_hex: &str, blob: &str) -> Result<String> {
    let key = decode_key(encryption_key_hex)?;
    let bytes = BASE64.decode(blob).context("credential blob is not valid base64")?;
    if bytes.len() < IV_LEN {
        bail!("credential blob shorter than IV");
    }
    let (iv, ciphertext) = bytes.split_at(IV_LEN);

    let plaintext = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|_| anyhow::anyhow!("bad AES key/IV length"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| anyhow::anyhow!("credential blob failed to decrypt"))?;
    String::from_utf8(plaintext).context("decrypted credential is not UTF-8")
}
