// Crypto Module - Key Derivation and AES-256-CBC Transforms
// =======================================================
// This module holds the cryptographic building blocks shared by the container
// codec and the streaming engine:
//
// - Password to key derivation (a single SHA-256 digest)
// - Random IV generation
// - Incremental AES-256-CBC encryption/decryption with PKCS#7 padding
//
// The CBC transforms are incremental: callers feed arbitrary slices and the
// transform buffers the partial block internally, so chunk boundaries chosen
// by the engine never have to line up with the 16-byte block size.
//
// Note: The key is derived without salt or iteration cost. The whole scheme is
// only as strong as the passphrase, and there is no integrity tag on the
// ciphertext (see DESIGN.md).

use aes::{Aes256, Block};
use aes::cipher::{
    BlockDecrypt, BlockEncrypt,
    KeyInit,
    generic_array::GenericArray,
};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CipherError, Result};

// AES-256 needs a 32-byte key
pub const KEY_SIZE: usize = 32;
// Size of the initialization vector in bytes
pub const IV_SIZE: usize = 16;
// AES block size is always 16 bytes
pub const BLOCK_SIZE: usize = 16;

/// A 32-byte AES-256 key derived from a passphrase.
#[derive(Clone)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// Derive a key from a passphrase.
    ///
    /// The key is the SHA-256 digest of the UTF-8 passphrase. The digest is
    /// exactly `KEY_SIZE` bytes, so no truncation is needed. The same
    /// passphrase always yields the same key, which is what makes decryption
    /// possible without storing anything but the IV.
    pub fn derive(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Aes256 {
        Aes256::new(GenericArray::from_slice(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Generate a fresh random IV from the operating system RNG.
pub fn random_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Incremental AES-256-CBC encryptor with PKCS#7 padding applied in `finalize`.
pub struct CbcEncryptor {
    cipher: Aes256,
    prev: [u8; BLOCK_SIZE],
    pending: Vec<u8>,
}

impl CbcEncryptor {
    pub fn new(key: &Key, iv: &[u8; IV_SIZE]) -> Self {
        Self {
            cipher: key.cipher(),
            prev: *iv,
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    /// Encrypt every complete block available and append the ciphertext to
    /// `out`. Up to 15 trailing bytes are held back for the next call.
    pub fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < BLOCK_SIZE {
                return;
            }
            encrypt_block(&self.cipher, &mut self.prev, &self.pending, out);
            self.pending.clear();
        }

        let whole = input.len() - input.len() % BLOCK_SIZE;
        out.reserve(whole);
        for block in input[..whole].chunks_exact(BLOCK_SIZE) {
            encrypt_block(&self.cipher, &mut self.prev, block, out);
        }
        self.pending.extend_from_slice(&input[whole..]);
    }

    /// Pad the held-back bytes and emit the final block.
    ///
    /// PKCS#7 always adds between 1 and 16 bytes, so an empty stream still
    /// produces one full block of ciphertext.
    pub fn finalize(mut self, out: &mut Vec<u8>) {
        let pad = BLOCK_SIZE - self.pending.len();
        self.pending.resize(BLOCK_SIZE, pad as u8);
        encrypt_block(&self.cipher, &mut self.prev, &self.pending, out);
    }
}

/// Incremental AES-256-CBC decryptor.
///
/// The most recent plaintext block is always held back, because only once the
/// input is known to be finished can it be treated as the padded final block.
pub struct CbcDecryptor {
    cipher: Aes256,
    prev: [u8; BLOCK_SIZE],
    pending: Vec<u8>,
    held: Option<[u8; BLOCK_SIZE]>,
}

impl CbcDecryptor {
    pub fn new(key: &Key, iv: &[u8; IV_SIZE]) -> Self {
        Self {
            cipher: key.cipher(),
            prev: *iv,
            pending: Vec::with_capacity(BLOCK_SIZE),
            held: None,
        }
    }

    pub fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < BLOCK_SIZE {
                return;
            }
            let plain = decrypt_block(&self.cipher, &mut self.prev, &self.pending);
            self.pending.clear();
            if let Some(ready) = self.held.replace(plain) {
                out.extend_from_slice(&ready);
            }
        }

        let whole = input.len() - input.len() % BLOCK_SIZE;
        out.reserve(whole);
        for block in input[..whole].chunks_exact(BLOCK_SIZE) {
            let plain = decrypt_block(&self.cipher, &mut self.prev, block);
            if let Some(ready) = self.held.replace(plain) {
                out.extend_from_slice(&ready);
            }
        }
        self.pending.extend_from_slice(&input[whole..]);
    }

    /// Strip the padding from the held-back block and emit what remains.
    ///
    /// A ragged tail or a missing final block is a framing error. Invalid
    /// padding is reported as `WrongKey`, since that is what it almost always
    /// means.
    pub fn finalize(self, out: &mut Vec<u8>) -> Result<()> {
        if !self.pending.is_empty() {
            return Err(CipherError::CorruptHeader("ciphertext is not a whole number of blocks"));
        }
        let last = self
            .held
            .ok_or(CipherError::CorruptHeader("ciphertext is empty"))?;
        let data_len = unpadded_len(&last).ok_or(CipherError::WrongKey)?;
        out.extend_from_slice(&last[..data_len]);
        Ok(())
    }
}

/// One-shot encryption of a short buffer (used for the embedded file name).
pub fn encrypt_bytes(key: &Key, iv: &[u8; IV_SIZE], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + BLOCK_SIZE);
    let mut encryptor = CbcEncryptor::new(key, iv);
    encryptor.update(data, &mut out);
    encryptor.finalize(&mut out);
    out
}

/// One-shot decryption of a short buffer.
pub fn decrypt_bytes(key: &Key, iv: &[u8; IV_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut decryptor = CbcDecryptor::new(key, iv);
    decryptor.update(data, &mut out);
    decryptor.finalize(&mut out)?;
    Ok(out)
}

/// XOR with the previous ciphertext block, then encrypt.
fn encrypt_block(cipher: &Aes256, prev: &mut [u8; BLOCK_SIZE], plain: &[u8], out: &mut Vec<u8>) {
    let mut block: Block = GenericArray::clone_from_slice(plain);
    for (b, p) in block.iter_mut().zip(prev.iter()) {
        *b ^= p;
    }
    cipher.encrypt_block(&mut block);
    prev.copy_from_slice(&block);
    out.extend_from_slice(&block);
}

/// Decrypt, then XOR with the previous ciphertext block.
fn decrypt_block(cipher: &Aes256, prev: &mut [u8; BLOCK_SIZE], encrypted: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut block: Block = GenericArray::clone_from_slice(encrypted);
    cipher.decrypt_block(&mut block);
    let mut plain = [0u8; BLOCK_SIZE];
    for ((out, b), p) in plain.iter_mut().zip(block.iter()).zip(prev.iter()) {
        *out = b ^ p;
    }
    prev.copy_from_slice(encrypted);
    plain
}

/// Length of the data part of a PKCS#7-padded block, or `None` if the padding
/// is malformed.
fn unpadded_len(block: &[u8; BLOCK_SIZE]) -> Option<usize> {
    let pad = block[BLOCK_SIZE - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE {
        return None;
    }
    let data_len = BLOCK_SIZE - pad;
    block[data_len..]
        .iter()
        .all(|&b| b as usize == pad)
        .then_some(data_len)
}
