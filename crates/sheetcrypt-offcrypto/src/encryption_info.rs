//! `EncryptionInfo` stream parsing.
//!
//! Standard encryption stores a binary `EncryptionHeader` + `EncryptionVerifier` after the
//! version header; Agile encryption stores an XML descriptor starting at byte offset 8.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;

use crate::crypto::AES_BLOCK_SIZE;
use crate::error::{OffcryptoError, Result};
use crate::hash::{HashAlgorithm, HashAlgorithmId};
use crate::mechanism::{self, EncryptionMechanism, VersionHeader};
use crate::password::parse_spin_count;

/// `uri` of the password key encryptor in an Agile descriptor.
pub const PASSWORD_KEY_ENCRYPTOR_URI: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";

// CryptoAPI algorithm identifiers accepted for Standard encryption.
pub const CALG_AES_128: u32 = 0x0000_660E;
pub const CALG_AES_192: u32 = 0x0000_660F;
pub const CALG_AES_256: u32 = 0x0000_6610;

const STANDARD_SALT_LEN: usize = 16;
const STANDARD_VERIFIER_HASH_LEN: u32 = 20;
// SHA-1 verifier hash padded to the AES block size.
const STANDARD_ENCRYPTED_VERIFIER_HASH_LEN: usize = 32;

/// `EncryptionHeader.flags` bits.
pub struct StandardEncryptionHeaderFlags;

impl StandardEncryptionHeaderFlags {
    pub const F_CRYPTOAPI: u32 = 0x0000_0004;
    pub const F_DOCPROPS: u32 = 0x0000_0008;
    pub const F_EXTERNAL: u32 = 0x0000_0010;
    pub const F_AES: u32 = 0x0000_0020;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionHeader {
    pub flags: u32,
    pub size_extra: u32,
    pub alg_id: u32,
    pub alg_id_hash: u32,
    pub key_size_bits: u32,
    pub provider_type: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub csp_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionVerifier {
    pub salt: Vec<u8>,
    pub encrypted_verifier: [u8; 16],
    pub verifier_hash_size: u32,
    pub encrypted_verifier_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionInfo {
    pub version: VersionHeader,
    pub header: StandardEncryptionHeader,
    pub verifier: StandardEncryptionVerifier,
}

impl StandardEncryptionInfo {
    pub fn key_len(&self) -> usize {
        (self.header.key_size_bits / 8) as usize
    }
}

/// `<keyData>`: parameters for the package cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileKeyData {
    pub salt: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    pub hash_size: usize,
    pub block_size: usize,
    pub key_bits: usize,
}

/// `<dataIntegrity>`: the encrypted HMAC key and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileDataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// The password `<encryptedKey>` key encryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgilePasswordKeyEncryptor {
    pub spin_count: u32,
    pub salt: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    pub hash_size: usize,
    pub block_size: usize,
    pub key_bits: usize,
    pub encrypted_key_value: Vec<u8>,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileEncryptionInfo {
    pub version: VersionHeader,
    pub key_data: AgileKeyData,
    /// Absent in some third-party producers' output.
    pub data_integrity: Option<AgileDataIntegrity>,
    pub password_key_encryptor: AgilePasswordKeyEncryptor,
}

/// A parsed `EncryptionInfo` stream for one of the supported mechanisms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionInfo {
    Standard(StandardEncryptionInfo),
    Agile(AgileEncryptionInfo),
}

impl EncryptionInfo {
    pub fn mechanism(&self) -> EncryptionMechanism {
        match self {
            EncryptionInfo::Standard(_) => EncryptionMechanism::Standard,
            EncryptionInfo::Agile(_) => EncryptionMechanism::Agile,
        }
    }

    pub fn version(&self) -> VersionHeader {
        match self {
            EncryptionInfo::Standard(info) => info.version,
            EncryptionInfo::Agile(info) => info.version,
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(OffcryptoError::Truncated { context })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u32_le(&mut self, context: &'static str) -> Result<u32> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64_le(&mut self, context: &'static str) -> Result<u64> {
        let b = self.take(8, context)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(b);
        Ok(u64::from_le_bytes(out))
    }
}

/// Read the `u64le` original-size prefix of an `EncryptedPackage` stream.
pub(crate) fn read_u64_prefix(bytes: &[u8], context: &'static str) -> Result<u64> {
    Reader::new(bytes).read_u64_le(context)
}

/// Parse an `EncryptionInfo` stream.
///
/// The version header is classified first; unknown or unsupported mechanisms fail with the
/// corresponding mechanism error before any mechanism-specific field is read.
pub fn parse_encryption_info(bytes: &[u8]) -> Result<EncryptionInfo> {
    let mechanism = mechanism::detect(bytes)?;
    let mut r = Reader::new(bytes);
    r.take(4, "EncryptionVersionInfo")?;
    let version = VersionHeader::parse(bytes).ok_or(OffcryptoError::Truncated {
        context: "EncryptionVersionInfo",
    })?;
    let _flags = r.read_u32_le("EncryptionVersionInfo.flags")?;

    match mechanism {
        EncryptionMechanism::Agile => {
            let info = parse_agile_xml(version, r.remaining())?;
            Ok(EncryptionInfo::Agile(info))
        }
        EncryptionMechanism::Standard => {
            let info = parse_standard(version, &mut r)?;
            Ok(EncryptionInfo::Standard(info))
        }
        mechanism => Err(OffcryptoError::UnsupportedEncryptionMechanism { mechanism }),
    }
}

fn decode_csp_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

fn parse_standard(version: VersionHeader, r: &mut Reader<'_>) -> Result<StandardEncryptionInfo> {
    let header_size = r.read_u32_le("EncryptionInfo.headerSize")? as usize;
    let header_bytes = r.take(header_size, "EncryptionHeader")?;

    let mut hr = Reader::new(header_bytes);
    let header = StandardEncryptionHeader {
        flags: hr.read_u32_le("EncryptionHeader.flags")?,
        size_extra: hr.read_u32_le("EncryptionHeader.sizeExtra")?,
        alg_id: hr.read_u32_le("EncryptionHeader.algId")?,
        alg_id_hash: hr.read_u32_le("EncryptionHeader.algIdHash")?,
        key_size_bits: hr.read_u32_le("EncryptionHeader.keySize")?,
        provider_type: hr.read_u32_le("EncryptionHeader.providerType")?,
        reserved1: hr.read_u32_le("EncryptionHeader.reserved1")?,
        reserved2: hr.read_u32_le("EncryptionHeader.reserved2")?,
        csp_name: decode_csp_name(hr.remaining()),
    };
    let header = validate_standard_header(header)?;

    let salt_size = r.read_u32_le("EncryptionVerifier.saltSize")? as usize;
    if salt_size != STANDARD_SALT_LEN {
        return Err(OffcryptoError::InvalidEncryptionInfo {
            context: "EncryptionVerifier.saltSize must be 16",
        });
    }
    let salt = r.take(STANDARD_SALT_LEN, "EncryptionVerifier.salt")?.to_vec();

    let mut encrypted_verifier = [0u8; 16];
    encrypted_verifier.copy_from_slice(r.take(16, "EncryptionVerifier.encryptedVerifier")?);

    let verifier_hash_size = r.read_u32_le("EncryptionVerifier.verifierHashSize")?;
    if verifier_hash_size != STANDARD_VERIFIER_HASH_LEN {
        return Err(OffcryptoError::InvalidEncryptionInfo {
            context: "EncryptionVerifier.verifierHashSize must be 20",
        });
    }
    let encrypted_verifier_hash = r
        .take(
            STANDARD_ENCRYPTED_VERIFIER_HASH_LEN,
            "EncryptionVerifier.encryptedVerifierHash",
        )?
        .to_vec();

    Ok(StandardEncryptionInfo {
        version,
        header,
        verifier: StandardEncryptionVerifier {
            salt,
            encrypted_verifier,
            verifier_hash_size,
            encrypted_verifier_hash,
        },
    })
}

fn validate_standard_header(mut header: StandardEncryptionHeader) -> Result<StandardEncryptionHeader> {
    if header.flags & StandardEncryptionHeaderFlags::F_EXTERNAL != 0 {
        return Err(OffcryptoError::UnsupportedEncryptionMechanism {
            mechanism: EncryptionMechanism::Extensible,
        });
    }

    let expected_bits = match header.alg_id {
        CALG_AES_128 => 128,
        CALG_AES_192 => 192,
        CALG_AES_256 => 256,
        // algId 0 defers to the flags; fAES then means AES-128.
        0 if header.flags & StandardEncryptionHeaderFlags::F_AES != 0 => 128,
        other => return Err(OffcryptoError::UnsupportedAlgorithm(other)),
    };
    match header.key_size_bits {
        0 => header.key_size_bits = expected_bits,
        bits if bits == expected_bits => {}
        _ => return Err(OffcryptoError::UnsupportedAlgorithm(header.alg_id)),
    }

    if HashAlgorithm::from_cryptoapi_alg_id(header.alg_id_hash) != Some(HashAlgorithm::Sha1) {
        return Err(OffcryptoError::UnsupportedHashAlgorithmId {
            alg_id_hash: header.alg_id_hash,
        });
    }
    Ok(header)
}

// --- Agile XML ---------------------------------------------------------------------------------

fn trim_xml_payload(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, 0 | b' ' | b'\t' | b'\r' | b'\n'))
        .map_or(0, |idx| idx + 1);
    &bytes[..end]
}

struct Attrs {
    element: &'static str,
    values: Vec<(Vec<u8>, String)>,
}

impl Attrs {
    fn collect(element: &'static str, e: &BytesStart<'_>) -> Result<Self> {
        let mut values = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(|_| OffcryptoError::InvalidEncryptionInfo {
                context: "invalid XML attribute",
            })?;
            let value = std::str::from_utf8(&attr.value)
                .map_err(|_| OffcryptoError::InvalidEncryptionInfo {
                    context: "attribute value is not valid UTF-8",
                })?
                .to_string();
            values.push((attr.key.local_name().as_ref().to_vec(), value));
        }
        Ok(Self { element, values })
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k.as_slice() == name.as_bytes())
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, attr: &'static str) -> Result<&str> {
        self.get(attr).ok_or(OffcryptoError::MissingAttribute {
            element: self.element,
            attr,
        })
    }

    fn usize(&self, attr: &'static str) -> Result<usize> {
        self.required(attr)?
            .trim()
            .parse()
            .map_err(|_| OffcryptoError::InvalidAttribute {
                element: self.element,
                attr,
            })
    }

    fn base64(&self, attr: &'static str) -> Result<Vec<u8>> {
        decode_b64_attr(attr, self.required(attr)?)
    }

    fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        HashAlgorithmId::parse(self.required("hashAlgorithm")?).require()
    }

    /// Only AES in CBC mode with a 16-byte block and a standard key size is supported.
    fn check_cipher(&self) -> Result<()> {
        let algorithm = self.required("cipherAlgorithm")?;
        let chaining = self.required("cipherChaining")?;
        if !algorithm.trim().eq_ignore_ascii_case("AES")
            || !chaining.trim().eq_ignore_ascii_case("ChainingModeCBC")
        {
            return Err(OffcryptoError::UnsupportedCipher {
                cipher: format!("{}/{}", algorithm.trim(), chaining.trim()),
            });
        }
        if self.usize("blockSize")? != AES_BLOCK_SIZE {
            return Err(OffcryptoError::InvalidAttribute {
                element: self.element,
                attr: "blockSize",
            });
        }
        if !matches!(self.usize("keyBits")?, 128 | 192 | 256) {
            return Err(OffcryptoError::InvalidAttribute {
                element: self.element,
                attr: "keyBits",
            });
        }
        Ok(())
    }

    fn check_hash_size(&self, hash_algorithm: HashAlgorithm) -> Result<usize> {
        let hash_size = self.usize("hashSize")?;
        if hash_size != hash_algorithm.digest_len() {
            return Err(OffcryptoError::InvalidAttribute {
                element: self.element,
                attr: "hashSize",
            });
        }
        Ok(hash_size)
    }

    fn check_salt(&self, salt: &[u8]) -> Result<()> {
        let declared = self.usize("saltSize")?;
        if salt.is_empty() || declared != salt.len() {
            return Err(OffcryptoError::InvalidAttribute {
                element: self.element,
                attr: "saltValue",
            });
        }
        Ok(())
    }
}

/// Base64 attribute decoding that tolerates embedded whitespace and missing padding.
pub fn decode_b64_attr(attr: &'static str, value: &str) -> Result<Vec<u8>> {
    let cleaned: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|source| {
            if attr == "saltValue" {
                OffcryptoError::MalformedSaltEncoding { source }
            } else {
                OffcryptoError::InvalidBase64 { attr, source }
            }
        })
}

fn parse_key_data(e: &BytesStart<'_>) -> Result<AgileKeyData> {
    let attrs = Attrs::collect("keyData", e)?;
    attrs.check_cipher()?;
    let hash_algorithm = attrs.hash_algorithm()?;
    let salt = attrs.base64("saltValue")?;
    attrs.check_salt(&salt)?;
    Ok(AgileKeyData {
        hash_size: attrs.check_hash_size(hash_algorithm)?,
        block_size: attrs.usize("blockSize")?,
        key_bits: attrs.usize("keyBits")?,
        hash_algorithm,
        salt,
    })
}

fn parse_data_integrity(e: &BytesStart<'_>) -> Result<AgileDataIntegrity> {
    let attrs = Attrs::collect("dataIntegrity", e)?;
    Ok(AgileDataIntegrity {
        encrypted_hmac_key: attrs.base64("encryptedHmacKey")?,
        encrypted_hmac_value: attrs.base64("encryptedHmacValue")?,
    })
}

fn parse_password_encrypted_key(e: &BytesStart<'_>) -> Result<AgilePasswordKeyEncryptor> {
    let attrs = Attrs::collect("encryptedKey", e)?;
    attrs.check_cipher()?;
    let hash_algorithm = attrs.hash_algorithm()?;
    let salt = attrs.base64("saltValue")?;
    attrs.check_salt(&salt)?;
    Ok(AgilePasswordKeyEncryptor {
        spin_count: parse_spin_count(attrs.required("spinCount")?)?,
        hash_size: attrs.check_hash_size(hash_algorithm)?,
        block_size: attrs.usize("blockSize")?,
        key_bits: attrs.usize("keyBits")?,
        encrypted_key_value: attrs.base64("encryptedKeyValue")?,
        encrypted_verifier_hash_input: attrs.base64("encryptedVerifierHashInput")?,
        encrypted_verifier_hash_value: attrs.base64("encryptedVerifierHashValue")?,
        hash_algorithm,
        salt,
    })
}

#[derive(Default)]
struct AgileInfoBuilder {
    key_data: Option<AgileKeyData>,
    data_integrity: Option<AgileDataIntegrity>,
    password_key_encryptor: Option<AgilePasswordKeyEncryptor>,
    in_password_encryptor: bool,
}

impl AgileInfoBuilder {
    fn element(&mut self, e: &BytesStart<'_>, has_children: bool) -> Result<()> {
        match e.local_name().as_ref() {
            b"keyData" if self.key_data.is_none() => {
                self.key_data = Some(parse_key_data(e)?);
            }
            b"dataIntegrity" if self.data_integrity.is_none() => {
                self.data_integrity = Some(parse_data_integrity(e)?);
            }
            b"keyEncryptor" if has_children => {
                let attrs = Attrs::collect("keyEncryptor", e)?;
                self.in_password_encryptor =
                    attrs.get("uri").map(str::trim) == Some(PASSWORD_KEY_ENCRYPTOR_URI);
            }
            b"encryptedKey"
                if self.in_password_encryptor && self.password_key_encryptor.is_none() =>
            {
                self.password_key_encryptor = Some(parse_password_encrypted_key(e)?);
            }
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, local_name: &[u8]) {
        if local_name == b"keyEncryptor" {
            self.in_password_encryptor = false;
        }
    }

    fn build(self, version: VersionHeader) -> Result<AgileEncryptionInfo> {
        Ok(AgileEncryptionInfo {
            version,
            key_data: self.key_data.ok_or(OffcryptoError::InvalidEncryptionInfo {
                context: "missing <keyData> element",
            })?,
            data_integrity: self.data_integrity,
            password_key_encryptor: self.password_key_encryptor.ok_or(
                OffcryptoError::InvalidEncryptionInfo {
                    context: "missing password <encryptedKey> element",
                },
            )?,
        })
    }
}

fn parse_agile_xml(version: VersionHeader, payload: &[u8]) -> Result<AgileEncryptionInfo> {
    let xml = std::str::from_utf8(trim_xml_payload(payload)).map_err(|_| {
        OffcryptoError::InvalidEncryptionInfo {
            context: "agile EncryptionInfo XML is not valid UTF-8",
        }
    })?;

    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut builder = AgileInfoBuilder::default();
    loop {
        let event = reader
            .read_event()
            .map_err(|_| OffcryptoError::InvalidEncryptionInfo {
                context: "agile EncryptionInfo XML parse error",
            })?;
        match event {
            Event::Start(e) => builder.element(&e, true)?,
            Event::Empty(e) => builder.element(&e, false)?,
            Event::End(e) => builder.end(e.local_name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
    }

    builder.build(version)
}
