//! ECMA-376 Standard encryption (CryptoAPI key derivation, AES-ECB).

use zeroize::Zeroizing;

use crate::crypto::{aes_ecb_decrypt_in_place, ct_eq};
use crate::encryption_info::StandardEncryptionInfo;
use crate::error::{OffcryptoError, Result};
use crate::hash::HashAlgorithm;
use crate::password::{iterated_hash, password_to_utf16le, IteratorPlacement};

/// Standard encryption does not store a spin count; producers always use 50 000.
pub const STANDARD_SPIN_COUNT: u32 = 50_000;

const SHA1_LEN: usize = 20;

/// Derive the AES key for `password`.
///
/// ```text
/// H      = iterated SHA-1 (salt, password, 50 000 rounds, counter first)
/// Hfinal = SHA1(H || LE32(0))
/// X1     = SHA1((0x36 * 64) XOR Hfinal)
/// X2     = SHA1((0x5C * 64) XOR Hfinal)
/// key    = (X1 || X2)[..keySize / 8]
/// ```
pub fn standard_derive_key(
    info: &StandardEncryptionInfo,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let key_len = info.key_len();
    if key_len == 0 || key_len > SHA1_LEN * 2 {
        return Err(OffcryptoError::InvalidKeyLength { len: key_len });
    }

    let sha1 = HashAlgorithm::Sha1;
    let password = password_to_utf16le(password);
    let h = iterated_hash(
        &password,
        &info.verifier.salt,
        sha1,
        STANDARD_SPIN_COUNT,
        IteratorPlacement::Prefix,
    );
    let hfinal = Zeroizing::new(sha1.digest_parts(&[&h, &0u32.to_le_bytes()]));

    let mut buf1 = Zeroizing::new([0x36u8; 64]);
    let mut buf2 = Zeroizing::new([0x5Cu8; 64]);
    for (i, b) in hfinal.iter().enumerate() {
        buf1[i] ^= b;
        buf2[i] ^= b;
    }

    let mut key = Zeroizing::new(Vec::with_capacity(SHA1_LEN * 2));
    key.extend_from_slice(&sha1.digest(&buf1[..]));
    key.extend_from_slice(&sha1.digest(&buf2[..]));
    key.truncate(key_len);
    Ok(key)
}

/// Check `key` against the stored `EncryptionVerifier`.
pub fn standard_verify_key(info: &StandardEncryptionInfo, key: &[u8]) -> Result<()> {
    let mut verifier = info.verifier.encrypted_verifier;
    aes_ecb_decrypt_in_place("encryptedVerifier", key, &mut verifier)?;
    let expected = HashAlgorithm::Sha1.digest(&verifier);

    let mut verifier_hash = info.verifier.encrypted_verifier_hash.clone();
    aes_ecb_decrypt_in_place("encryptedVerifierHash", key, &mut verifier_hash)?;
    let actual = verifier_hash
        .get(..SHA1_LEN)
        .ok_or(OffcryptoError::InvalidEncryptionInfo {
            context: "decrypted verifier hash is truncated",
        })?;

    if ct_eq(&expected, actual) {
        Ok(())
    } else {
        Err(OffcryptoError::WrongPassword)
    }
}

/// Decrypt the block-aligned package ciphertext and truncate it to `original_size`.
pub(crate) fn decrypt_standard_package(
    key: &[u8],
    ciphertext: &[u8],
    original_size: usize,
) -> Result<Vec<u8>> {
    let mut out = ciphertext.to_vec();
    aes_ecb_decrypt_in_place("EncryptedPackage", key, &mut out)?;
    out.truncate(original_size);
    Ok(out)
}
