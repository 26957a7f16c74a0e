//! Password hashing and `EncryptedPackage` decryption for ECMA-376 / MS-OFFCRYPTO.
//!
//! This crate covers:
//! - Iterated salted password hashing as used by workbook/sheet protection (`hashValue`,
//!   `saltValue`, `spinCount`)
//! - Detecting the encryption mechanism from an `EncryptionInfo` version header
//! - Parsing *Standard* (binary, version x.2) and *Agile* (XML, version 4.4) `EncryptionInfo`
//! - Decrypting the `EncryptedPackage` stream of an OLE/CFB container back to the ZIP package,
//!   including Agile `dataIntegrity` HMAC verification
//!
//! Binary RC4 and Extensible encryption are detected but not decrypted.

mod agile;
mod crypto;
mod encryption_info;
mod error;
mod hash;
mod mechanism;
mod package;
mod password;
mod standard;

pub use agile::agile_secret_key;
pub use encryption_info::{
    decode_b64_attr, parse_encryption_info, AgileDataIntegrity, AgileEncryptionInfo, AgileKeyData,
    AgilePasswordKeyEncryptor, EncryptionInfo, StandardEncryptionHeader,
    StandardEncryptionHeaderFlags, StandardEncryptionInfo, StandardEncryptionVerifier, CALG_AES_128,
    CALG_AES_192, CALG_AES_256, PASSWORD_KEY_ENCRYPTOR_URI,
};
pub use error::{ErrorKind, OffcryptoError, Result};
pub use hash::{digest, HashAlgorithm, HashAlgorithmId};
pub use mechanism::{classify, detect, EncryptionMechanism, VersionHeader};
pub use package::{
    decrypt_encrypted_package, decrypt_package, decrypt_package_with_options,
    is_encrypted_ooxml_ole, parse_encrypted_package_header, DecryptLimits, DecryptOptions,
    EncryptedPackageHeader, DEFAULT_MAX_SPIN_COUNT, ENCRYPTED_PACKAGE_STREAM,
    ENCRYPTION_INFO_STREAM,
};
pub use password::{
    derive_password_hash, iterated_hash, parse_spin_count, password_to_utf16le,
    DerivedPasswordHash, IteratorPlacement, SHEET_PROTECTION_SPIN_COUNT,
};
pub use standard::{standard_derive_key, standard_verify_key, STANDARD_SPIN_COUNT};

/// Low-level primitives shared by the Standard and Agile schemes.
pub mod primitives {
    pub use crate::crypto::{
        aes_cbc_decrypt, aes_cbc_decrypt_in_place, aes_ecb_decrypt_in_place, ct_eq, derive_iv,
        derive_key, hmac, segment_iv, AES_BLOCK_SIZE, HMAC_KEY_BLOCK, HMAC_VALUE_BLOCK,
        KEY_VALUE_BLOCK, VERIFIER_HASH_INPUT_BLOCK, VERIFIER_HASH_VALUE_BLOCK,
    };
}
