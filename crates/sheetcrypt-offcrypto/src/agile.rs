//! ECMA-376 Agile encryption.
//!
//! Password verification decrypts `encryptedVerifierHashInput` and `encryptedVerifierHashValue`
//! with keys derived from the password, then checks `Hash(verifierHashInput) == verifierHashValue`.
//! Only then is `encryptedKeyValue` (the package key) unwrapped. The iterated password hash is
//! computed once and reused for all three blobs.

use zeroize::Zeroizing;

use crate::crypto::{
    aes_cbc_decrypt, aes_cbc_decrypt_in_place, ct_eq, derive_iv, derive_key, hmac, segment_iv,
    HMAC_KEY_BLOCK, HMAC_VALUE_BLOCK, KEY_VALUE_BLOCK, VERIFIER_HASH_INPUT_BLOCK,
    VERIFIER_HASH_VALUE_BLOCK,
};
use crate::encryption_info::{AgileDataIntegrity, AgileKeyData, AgilePasswordKeyEncryptor};
use crate::error::{OffcryptoError, Result};
use crate::hash::HashAlgorithm;
use crate::password::{iterated_hash, password_to_utf16le, IteratorPlacement};

/// `EncryptedPackage` plaintext is encrypted in independent segments of this size.
pub const SEGMENT_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyEncryptorIv {
    /// `saltValue[..blockSize]`, as published.
    SaltValue,
    /// `Hash(saltValue || blockKey)`, which some producers write instead.
    Derived,
}

struct KeyEncryptorContext<'a> {
    encryptor: &'a AgilePasswordKeyEncryptor,
    password_hash: &'a [u8],
    iv_mode: KeyEncryptorIv,
}

impl KeyEncryptorContext<'_> {
    fn decrypt_blob(
        &self,
        field: &'static str,
        block_key: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let enc = self.encryptor;
        let key = Zeroizing::new(derive_key(
            self.password_hash,
            block_key,
            enc.key_bits / 8,
            enc.hash_algorithm,
        ));
        let iv = match self.iv_mode {
            KeyEncryptorIv::SaltValue => enc
                .salt
                .get(..enc.block_size)
                .ok_or(OffcryptoError::InvalidAttribute {
                    element: "encryptedKey",
                    attr: "saltValue",
                })?
                .to_vec(),
            KeyEncryptorIv::Derived => {
                derive_iv(&enc.salt, block_key, enc.block_size, enc.hash_algorithm)
            }
        };
        Ok(Zeroizing::new(aes_cbc_decrypt(field, &key, &iv, ciphertext)?))
    }

    fn unwrap_package_key(&self, package_key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let enc = self.encryptor;

        let input = self.decrypt_blob(
            "encryptedVerifierHashInput",
            &VERIFIER_HASH_INPUT_BLOCK,
            &enc.encrypted_verifier_hash_input,
        )?;
        let input = input
            .get(..enc.salt.len())
            .ok_or(OffcryptoError::InvalidEncryptionInfo {
                context: "decrypted verifierHashInput is truncated",
            })?;

        let value = self.decrypt_blob(
            "encryptedVerifierHashValue",
            &VERIFIER_HASH_VALUE_BLOCK,
            &enc.encrypted_verifier_hash_value,
        )?;
        let value = value
            .get(..enc.hash_size)
            .ok_or(OffcryptoError::InvalidEncryptionInfo {
                context: "decrypted verifierHashValue is truncated",
            })?;

        if !ct_eq(&enc.hash_algorithm.digest(input), value) {
            return Err(OffcryptoError::WrongPassword);
        }

        let key_value = self.decrypt_blob(
            "encryptedKeyValue",
            &KEY_VALUE_BLOCK,
            &enc.encrypted_key_value,
        )?;
        let key = key_value
            .get(..package_key_len)
            .ok_or(OffcryptoError::InvalidEncryptionInfo {
                context: "decrypted keyValue is shorter than keyData.keyBits",
            })?;
        Ok(Zeroizing::new(key.to_vec()))
    }
}

/// Verify `password` and unwrap the package key.
///
/// Fails with [`OffcryptoError::WrongPassword`] when the verifier does not match; no package
/// bytes are touched before this succeeds.
pub fn agile_secret_key(
    encryptor: &AgilePasswordKeyEncryptor,
    key_data: &AgileKeyData,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let password = password_to_utf16le(password);
    let password_hash = iterated_hash(
        &password,
        &encryptor.salt,
        encryptor.hash_algorithm,
        encryptor.spin_count,
        IteratorPlacement::Prefix,
    );

    let package_key_len = key_data.key_bits / 8;
    let password_hash: &[u8] = &password_hash;
    let ctx = |iv_mode| KeyEncryptorContext {
        encryptor,
        password_hash,
        iv_mode,
    };

    match ctx(KeyEncryptorIv::SaltValue).unwrap_package_key(package_key_len) {
        Err(OffcryptoError::WrongPassword) => {
            let key = ctx(KeyEncryptorIv::Derived).unwrap_package_key(package_key_len)?;
            log::debug!("password key encryptor uses derived IVs");
            Ok(key)
        }
        other => other,
    }
}

/// Decrypt `ciphertext` (block aligned, segment ordered) and truncate to `original_size`.
pub(crate) fn decrypt_agile_segments(
    key_data: &AgileKeyData,
    package_key: &[u8],
    ciphertext: &[u8],
    original_size: usize,
) -> Result<Vec<u8>> {
    let mut out = ciphertext.to_vec();
    for (index, segment) in out.chunks_mut(SEGMENT_LEN).enumerate() {
        let index = u32::try_from(index).map_err(|_| OffcryptoError::InvalidEncryptionInfo {
            context: "EncryptedPackage segment index overflow",
        })?;
        let iv = segment_iv(
            &key_data.salt,
            index,
            key_data.block_size,
            key_data.hash_algorithm,
        );
        aes_cbc_decrypt_in_place("EncryptedPackage", package_key, &iv, segment)?;
    }
    out.truncate(original_size);
    Ok(out)
}

/// Decrypted `dataIntegrity` material.
pub(crate) struct IntegrityCheck {
    hash_algorithm: HashAlgorithm,
    hmac_key: Zeroizing<Vec<u8>>,
    hmac_value: Vec<u8>,
}

impl IntegrityCheck {
    /// Unwrap the HMAC key and expected value with the package key.
    pub(crate) fn new(
        key_data: &AgileKeyData,
        integrity: &AgileDataIntegrity,
        package_key: &[u8],
    ) -> Result<Self> {
        let hash_alg = key_data.hash_algorithm;
        let hash_size = key_data.hash_size;

        let iv = derive_iv(&key_data.salt, &HMAC_KEY_BLOCK, key_data.block_size, hash_alg);
        let raw_key = Zeroizing::new(aes_cbc_decrypt(
            "encryptedHmacKey",
            package_key,
            &iv,
            &integrity.encrypted_hmac_key,
        )?);
        // Some producers write a decrypted HMAC key shorter than hashSize.
        let key_len = hash_size.min(raw_key.len());
        if key_len == 0 {
            return Err(OffcryptoError::InvalidEncryptionInfo {
                context: "decrypted HMAC key is empty",
            });
        }

        let iv = derive_iv(&key_data.salt, &HMAC_VALUE_BLOCK, key_data.block_size, hash_alg);
        let raw_value = aes_cbc_decrypt(
            "encryptedHmacValue",
            package_key,
            &iv,
            &integrity.encrypted_hmac_value,
        )?;
        let hmac_value = raw_value
            .get(..hash_size)
            .ok_or(OffcryptoError::InvalidEncryptionInfo {
                context: "decrypted HMAC value is shorter than keyData.hashSize",
            })?
            .to_vec();

        Ok(Self {
            hash_algorithm: hash_alg,
            hmac_key: Zeroizing::new(raw_key[..key_len].to_vec()),
            hmac_value,
        })
    }

    pub(crate) fn matches(&self, data: &[u8]) -> Result<bool> {
        let actual = hmac(self.hash_algorithm, &self.hmac_key, data)?;
        Ok(ct_eq(&actual, &self.hmac_value))
    }
}
