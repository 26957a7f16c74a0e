//! The `EncryptedPackage` decryption pipeline.
//!
//! An encrypted OOXML document is an OLE/CFB compound file holding two streams:
//! - `EncryptionInfo`: version header + Standard (binary) or Agile (XML) descriptor
//! - `EncryptedPackage`: `u64le` original size followed by the AES ciphertext
//!
//! Decryption yields the plain ZIP/OPC package bytes.

use std::io::{Cursor, Read, Seek};

use crate::agile::{agile_secret_key, decrypt_agile_segments, IntegrityCheck};
use crate::crypto::AES_BLOCK_SIZE;
use crate::encryption_info::{
    parse_encryption_info, read_u64_prefix, AgileEncryptionInfo, EncryptionInfo,
    StandardEncryptionInfo,
};
use crate::error::{OffcryptoError, Result};
use crate::mechanism;
use crate::standard::{decrypt_standard_package, standard_derive_key, standard_verify_key};

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

/// Default upper bound on `spinCount` accepted from a file.
pub const DEFAULT_MAX_SPIN_COUNT: u32 = 10_000_000;

/// Resource limits applied to untrusted `EncryptionInfo` / `EncryptedPackage` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptLimits {
    /// Checked before running the password KDF.
    pub max_spin_count: u32,
    /// Checked against the declared package size before allocating.
    pub max_output_size: Option<u64>,
}

impl Default for DecryptLimits {
    fn default() -> Self {
        Self {
            max_spin_count: DEFAULT_MAX_SPIN_COUNT,
            max_output_size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptOptions {
    pub limits: DecryptLimits,
    /// Verify the Agile `dataIntegrity` HMAC. Standard encryption has no HMAC.
    pub verify_integrity: bool,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            limits: DecryptLimits::default(),
            verify_integrity: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedPackageHeader {
    /// Size of the plain package in bytes.
    pub original_size: u64,
}

/// Parse the 8-byte size prefix of an `EncryptedPackage` stream.
pub fn parse_encrypted_package_header(bytes: &[u8]) -> Result<EncryptedPackageHeader> {
    if bytes.len() < 8 {
        return Err(OffcryptoError::EncryptedPackageTooShort { len: bytes.len() });
    }
    let raw = read_u64_prefix(bytes, "EncryptedPackage.originalSize")?;
    let ciphertext_len = (bytes.len() - 8) as u64;

    // Some producers write `u32 size` + `u32 reserved`; fall back to the low DWORD when the
    // full 64-bit value cannot fit the stream but the low half can.
    let lo = raw & 0xFFFF_FFFF;
    let hi = raw >> 32;
    let original_size = if lo != 0 && hi != 0 && raw > ciphertext_len && lo <= ciphertext_len {
        log::debug!("EncryptedPackage size prefix has a non-zero reserved high DWORD");
        lo
    } else {
        raw
    };
    Ok(EncryptedPackageHeader { original_size })
}

/// Returns true if `bytes` look like an OLE/CFB container holding an encrypted OOXML package.
pub fn is_encrypted_ooxml_ole(bytes: &[u8]) -> bool {
    if !bytes.starts_with(&OLE_MAGIC) {
        return false;
    }
    let Ok(ole) = cfb::CompoundFile::open(Cursor::new(bytes)) else {
        return false;
    };
    ole.is_stream(ENCRYPTION_INFO_STREAM) && ole.is_stream(ENCRYPTED_PACKAGE_STREAM)
}

fn read_stream<R: Read + Seek>(
    ole: &mut cfb::CompoundFile<R>,
    name: &'static str,
) -> Result<Vec<u8>> {
    if !ole.is_stream(name) {
        return Err(OffcryptoError::MissingStream { stream: name });
    }
    let mut stream = ole.open_stream(name).map_err(|source| OffcryptoError::Io {
        context: "opening compound file stream",
        source,
    })?;
    let mut out = Vec::new();
    stream
        .read_to_end(&mut out)
        .map_err(|source| OffcryptoError::Io {
            context: "reading compound file stream",
            source,
        })?;
    Ok(out)
}

/// Decrypt an encrypted OOXML compound file with default options.
pub fn decrypt_package(container: &[u8], password: &str) -> Result<Vec<u8>> {
    decrypt_package_with_options(container, password, &DecryptOptions::default())
}

/// Decrypt an encrypted OOXML compound file.
pub fn decrypt_package_with_options(
    container: &[u8],
    password: &str,
    options: &DecryptOptions,
) -> Result<Vec<u8>> {
    if !container.starts_with(&OLE_MAGIC) {
        return Err(OffcryptoError::MalformedContainer {
            context: "missing OLE compound file signature",
        });
    }
    let mut ole = cfb::CompoundFile::open(Cursor::new(container)).map_err(|_| {
        OffcryptoError::MalformedContainer {
            context: "unreadable OLE compound file",
        }
    })?;

    let encryption_info = read_stream(&mut ole, ENCRYPTION_INFO_STREAM)?;
    // Classify before touching the package so mechanism errors surface unchanged.
    mechanism::detect(&encryption_info)?;
    let encrypted_package = read_stream(&mut ole, ENCRYPTED_PACKAGE_STREAM)?;

    decrypt_encrypted_package(&encryption_info, &encrypted_package, password, options)
}

/// Decrypt raw `EncryptionInfo` + `EncryptedPackage` stream bytes.
pub fn decrypt_encrypted_package(
    encryption_info: &[u8],
    encrypted_package: &[u8],
    password: &str,
    options: &DecryptOptions,
) -> Result<Vec<u8>> {
    let info = parse_encryption_info(encryption_info)?;
    log::debug!(
        "decrypting EncryptedPackage ({} encryption, version {})",
        info.mechanism(),
        info.version()
    );

    let header = parse_encrypted_package_header(encrypted_package)?;
    let ciphertext = &encrypted_package[8..];
    let (original_size, ciphertext) = checked_ciphertext(header, ciphertext, &options.limits)?;

    match &info {
        EncryptionInfo::Standard(info) => {
            decrypt_standard(info, ciphertext, original_size, password)
        }
        EncryptionInfo::Agile(info) => decrypt_agile(
            info,
            encrypted_package,
            ciphertext,
            original_size,
            password,
            options,
        ),
    }
}

/// Validate the declared size against the stream and limits, and return the block-aligned
/// ciphertext prefix that covers it. Trailing slack beyond that prefix is ignored.
fn checked_ciphertext<'a>(
    header: EncryptedPackageHeader,
    ciphertext: &'a [u8],
    limits: &DecryptLimits,
) -> Result<(usize, &'a [u8])> {
    let declared = header.original_size;
    if let Some(max) = limits.max_output_size {
        if declared > max {
            return Err(OffcryptoError::OutputTooLarge { declared, max });
        }
    }

    let available = ciphertext.len() as u64;
    let needed = declared
        .checked_add(AES_BLOCK_SIZE as u64 - 1)
        .map(|v| v / AES_BLOCK_SIZE as u64 * AES_BLOCK_SIZE as u64)
        .filter(|needed| *needed <= available)
        .ok_or(OffcryptoError::EncryptedPackageSizeMismatch {
            declared,
            available,
        })?;

    // Both values are bounded by `ciphertext.len()` here.
    let needed = needed as usize;
    Ok((declared as usize, &ciphertext[..needed]))
}

fn decrypt_standard(
    info: &StandardEncryptionInfo,
    ciphertext: &[u8],
    original_size: usize,
    password: &str,
) -> Result<Vec<u8>> {
    let key = standard_derive_key(info, password)?;
    standard_verify_key(info, &key)?;
    decrypt_standard_package(&key, ciphertext, original_size)
}

fn decrypt_agile(
    info: &AgileEncryptionInfo,
    encrypted_package: &[u8],
    ciphertext: &[u8],
    original_size: usize,
    password: &str,
    options: &DecryptOptions,
) -> Result<Vec<u8>> {
    let encryptor = &info.password_key_encryptor;
    let max = options.limits.max_spin_count;
    if encryptor.spin_count > max {
        return Err(OffcryptoError::SpinCountTooLarge {
            spin_count: encryptor.spin_count,
            max,
        });
    }

    let package_key = agile_secret_key(encryptor, &info.key_data, password)?;
    let decrypt = || decrypt_agile_segments(&info.key_data, &package_key, ciphertext, original_size);

    if !options.verify_integrity {
        log::debug!("skipping dataIntegrity verification");
        return decrypt();
    }
    let Some(data_integrity) = info.data_integrity.as_ref() else {
        log::warn!("EncryptionInfo has no dataIntegrity element; package integrity is unchecked");
        return decrypt();
    };

    let check = IntegrityCheck::new(&info.key_data, data_integrity, &package_key)?;
    if check.matches(encrypted_package)? {
        return decrypt();
    }

    // Some producers HMAC the plaintext instead of the EncryptedPackage stream.
    let plaintext = decrypt().map_err(|_| OffcryptoError::IntegrityMismatch)?;
    if check.matches(&plaintext)? {
        log::warn!("dataIntegrity HMAC matches the decrypted package, not the EncryptedPackage stream");
        return Ok(plaintext);
    }
    Err(OffcryptoError::IntegrityMismatch)
}
