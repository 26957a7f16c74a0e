//! AES and key-derivation primitives shared by the Standard and Agile decryptors.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use cbc::Decryptor;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use subtle::ConstantTimeEq;

use crate::error::{OffcryptoError, Result};
use crate::hash::HashAlgorithm;

pub const AES_BLOCK_SIZE: usize = 16;

/// Agile block key for the `encryptedVerifierHashInput` key.
pub const VERIFIER_HASH_INPUT_BLOCK: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
/// Agile block key for the `encryptedVerifierHashValue` key.
pub const VERIFIER_HASH_VALUE_BLOCK: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
/// Agile block key for the `encryptedKeyValue` key.
pub const KEY_VALUE_BLOCK: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
/// Agile block key for the `dataIntegrity` HMAC key IV.
pub const HMAC_KEY_BLOCK: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
/// Agile block key for the `dataIntegrity` HMAC value IV.
pub const HMAC_VALUE_BLOCK: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

const DERIVE_PAD_BYTE: u8 = 0x36;

fn fit_to_len(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if len <= bytes.len() {
        bytes.truncate(len);
    } else {
        bytes.resize(len, DERIVE_PAD_BYTE);
    }
    bytes
}

/// `Hash(h || blockKey)`, truncated to `key_len` or padded with `0x36`.
pub fn derive_key(h: &[u8], block_key: &[u8], key_len: usize, hash_alg: HashAlgorithm) -> Vec<u8> {
    fit_to_len(hash_alg.digest_parts(&[h, block_key]), key_len)
}

/// `Hash(salt || blockKey)`, truncated to `iv_len` or padded with `0x36`.
pub fn derive_iv(salt: &[u8], block_key: &[u8], iv_len: usize, hash_alg: HashAlgorithm) -> Vec<u8> {
    fit_to_len(hash_alg.digest_parts(&[salt, block_key]), iv_len)
}

/// IV for `EncryptedPackage` segment `segment_index`; the block key is `LE32(segment_index)`.
pub fn segment_iv(salt: &[u8], segment_index: u32, iv_len: usize, hash_alg: HashAlgorithm) -> Vec<u8> {
    derive_iv(salt, &segment_index.to_le_bytes(), iv_len, hash_alg)
}

fn check_block_aligned(field: &'static str, len: usize) -> Result<()> {
    if len % AES_BLOCK_SIZE != 0 {
        return Err(OffcryptoError::CiphertextNotBlockAligned { field, len });
    }
    Ok(())
}

/// In-place AES-CBC decryption with no padding removal.
///
/// Callers truncate the output to the semantic length stored elsewhere in the format.
pub fn aes_cbc_decrypt_in_place(
    field: &'static str,
    key: &[u8],
    iv: &[u8],
    buf: &mut [u8],
) -> Result<()> {
    if iv.len() != AES_BLOCK_SIZE {
        return Err(OffcryptoError::InvalidEncryptionInfo {
            context: "AES-CBC IV must be 16 bytes",
        });
    }
    check_block_aligned(field, buf.len())?;
    if buf.is_empty() {
        return Ok(());
    }

    let len = buf.len();
    let bad_key = |_| OffcryptoError::InvalidKeyLength { len: key.len() };
    let unaligned = |_| OffcryptoError::CiphertextNotBlockAligned { field, len };
    match key.len() {
        16 => {
            Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(unaligned)?;
        }
        24 => {
            Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(unaligned)?;
        }
        32 => {
            Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(unaligned)?;
        }
        len => return Err(OffcryptoError::InvalidKeyLength { len }),
    }
    Ok(())
}

pub fn aes_cbc_decrypt(
    field: &'static str,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let mut out = ciphertext.to_vec();
    aes_cbc_decrypt_in_place(field, key, iv, &mut out)?;
    Ok(out)
}

/// In-place AES-ECB decryption, as used by Standard encryption.
pub fn aes_ecb_decrypt_in_place(field: &'static str, key: &[u8], buf: &mut [u8]) -> Result<()> {
    check_block_aligned(field, buf.len())?;

    fn run<C>(key: &[u8], buf: &mut [u8]) -> Result<()>
    where
        C: BlockDecrypt + KeyInit,
    {
        let cipher =
            C::new_from_slice(key).map_err(|_| OffcryptoError::InvalidKeyLength { len: key.len() })?;
        for block in buf.chunks_mut(AES_BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    match key.len() {
        16 => run::<Aes128>(key, buf),
        24 => run::<Aes192>(key, buf),
        32 => run::<Aes256>(key, buf),
        len => Err(OffcryptoError::InvalidKeyLength { len }),
    }
}

/// HMAC over `data` keyed by `key`, using the named digest.
pub fn hmac(hash_alg: HashAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    fn run<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| {
            OffcryptoError::InvalidEncryptionInfo {
                context: "invalid dataIntegrity HMAC key",
            }
        })?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    match hash_alg {
        HashAlgorithm::Md4 => run::<Hmac<md4::Md4>>(key, data),
        HashAlgorithm::Md5 => run::<Hmac<md5::Md5>>(key, data),
        HashAlgorithm::Sha1 => run::<Hmac<sha1::Sha1>>(key, data),
        HashAlgorithm::Sha256 => run::<Hmac<sha2::Sha256>>(key, data),
        HashAlgorithm::Sha384 => run::<Hmac<sha2::Sha384>>(key, data),
        HashAlgorithm::Sha512 => run::<Hmac<sha2::Sha512>>(key, data),
    }
}

/// Constant-time equality. Slices of different lengths compare unequal.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}
