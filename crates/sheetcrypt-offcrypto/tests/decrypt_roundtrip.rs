use std::io::{Cursor, Read, Write};

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cfb::CompoundFile;
use ms_offcrypto_writer::Ecma376AgileWriter;
use rand::{rngs::StdRng, SeedableRng as _};
use sha1::{Digest as _, Sha1};
use zip::write::FileOptions;

use sheetcrypt_offcrypto::{
    decrypt_encrypted_package, decrypt_package, decrypt_package_with_options,
    is_encrypted_ooxml_ole, parse_encryption_info, standard_derive_key, DecryptLimits,
    DecryptOptions, EncryptionInfo, EncryptionMechanism, ErrorKind, OffcryptoError,
    StandardEncryptionHeader, StandardEncryptionHeaderFlags, StandardEncryptionInfo,
    StandardEncryptionVerifier, VersionHeader, CALG_AES_128,
};

const CALG_SHA1: u32 = 0x0000_8004;
const AGILE_PASSWORD: &str = "correct horse battery staple";
const STANDARD_PASSWORD: &str = "Password1234_";
const STANDARD_SALT: [u8; 16] = [
    0xe8, 0x82, 0x66, 0x49, 0x0c, 0x5b, 0xd1, 0xee, 0xbd, 0x2b, 0x43, 0x94, 0xe3, 0xf8, 0x30,
    0xef,
];
// AES-128 key for `STANDARD_PASSWORD` + `STANDARD_SALT` (msoffcrypto-tool test vector).
const STANDARD_KEY: [u8; 16] = [
    0x40, 0xb1, 0x3a, 0x71, 0xf9, 0x0b, 0x96, 0x6e, 0x37, 0x54, 0x08, 0xf2, 0xd1, 0x81, 0xa1,
    0xaa,
];

fn build_tiny_zip() -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(cursor);
    writer
        .start_file("xl/workbook.xml", FileOptions::<()>::default())
        .expect("start zip file");
    writer
        .write_all(b"<workbook/>")
        .expect("write zip contents");
    writer.finish().expect("finish zip").into_inner()
}

fn encrypt_zip_with_password_agile(plain_zip: &[u8], password: &str) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut rng = StdRng::from_seed([0u8; 32]);
    let mut agile =
        Ecma376AgileWriter::create(&mut rng, password, &mut cursor).expect("create agile");
    agile
        .write_all(plain_zip)
        .expect("write plaintext zip to agile writer");
    agile.finalize().expect("finalize agile writer");
    cursor.into_inner()
}

fn extract_stream_bytes(cfb_bytes: &[u8], stream_name: &str) -> Vec<u8> {
    let mut ole = CompoundFile::open(Cursor::new(cfb_bytes)).expect("open cfb");
    let mut stream = ole.open_stream(stream_name).expect("open stream");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).expect("read stream");
    buf
}

fn build_container(streams: &[(&str, &[u8])]) -> Vec<u8> {
    let mut ole = CompoundFile::create(Cursor::new(Vec::new())).expect("create cfb");
    for (name, bytes) in streams {
        ole.create_stream(name)
            .expect("create stream")
            .write_all(bytes)
            .expect("write stream");
    }
    ole.into_inner().into_inner()
}

fn agile_streams() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let plain_zip = build_tiny_zip();
    let encrypted_cfb = encrypt_zip_with_password_agile(&plain_zip, AGILE_PASSWORD);
    let encryption_info = extract_stream_bytes(&encrypted_cfb, "/EncryptionInfo");
    let encrypted_package = extract_stream_bytes(&encrypted_cfb, "/EncryptedPackage");
    (plain_zip, encryption_info, encrypted_package)
}

fn aes128_ecb_encrypt_in_place(key: &[u8], buf: &mut [u8]) {
    assert_eq!(key.len(), 16, "expected AES-128 key");
    assert_eq!(buf.len() % 16, 0, "ECB input must be block-aligned");
    let cipher = Aes128::new_from_slice(key).expect("valid AES-128 key");
    for block in buf.chunks_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

fn standard_info() -> StandardEncryptionInfo {
    StandardEncryptionInfo {
        version: VersionHeader { major: 3, minor: 2 },
        header: StandardEncryptionHeader {
            flags: StandardEncryptionHeaderFlags::F_CRYPTOAPI
                | StandardEncryptionHeaderFlags::F_AES,
            size_extra: 0,
            alg_id: CALG_AES_128,
            alg_id_hash: CALG_SHA1,
            key_size_bits: 128,
            provider_type: 0,
            reserved1: 0,
            reserved2: 0,
            csp_name: String::new(),
        },
        verifier: StandardEncryptionVerifier {
            salt: STANDARD_SALT.to_vec(),
            encrypted_verifier: [0u8; 16],
            verifier_hash_size: 20,
            encrypted_verifier_hash: vec![0u8; 32],
        },
    }
}

fn build_standard_encryption_info_bytes(key: &[u8]) -> Vec<u8> {
    let verifier_plain: [u8; 16] = core::array::from_fn(|i| i as u8);
    let verifier_hash: [u8; 20] = Sha1::digest(verifier_plain).into();
    let mut encrypted_verifier_hash = [0xa5u8; 32];
    encrypted_verifier_hash[..20].copy_from_slice(&verifier_hash);

    let mut encrypted_verifier = verifier_plain;
    aes128_ecb_encrypt_in_place(key, &mut encrypted_verifier);
    aes128_ecb_encrypt_in_place(key, &mut encrypted_verifier_hash);

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&3u16.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // flags

    let mut header = Vec::new();
    let header_flags =
        StandardEncryptionHeaderFlags::F_CRYPTOAPI | StandardEncryptionHeaderFlags::F_AES;
    header.extend_from_slice(&header_flags.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // sizeExtra
    header.extend_from_slice(&CALG_AES_128.to_le_bytes());
    header.extend_from_slice(&CALG_SHA1.to_le_bytes());
    header.extend_from_slice(&128u32.to_le_bytes()); // keySize
    header.extend_from_slice(&0x18u32.to_le_bytes()); // providerType
    header.extend_from_slice(&0u32.to_le_bytes()); // reserved1
    header.extend_from_slice(&0u32.to_le_bytes()); // reserved2
    for unit in "Microsoft Enhanced RSA and AES Cryptographic Provider\0".encode_utf16() {
        header.extend_from_slice(&unit.to_le_bytes());
    }

    bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&header);

    bytes.extend_from_slice(&16u32.to_le_bytes()); // saltSize
    bytes.extend_from_slice(&STANDARD_SALT);
    bytes.extend_from_slice(&encrypted_verifier);
    bytes.extend_from_slice(&20u32.to_le_bytes()); // verifierHashSize
    bytes.extend_from_slice(&encrypted_verifier_hash);
    bytes
}

fn encrypt_standard_encrypted_package_ecb(key: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(plaintext.len() as u64).to_le_bytes());

    let mut buf = plaintext.to_vec();
    let pad_len = (16 - (buf.len() % 16)) % 16;
    buf.extend(std::iter::repeat(0u8).take(pad_len));
    aes128_ecb_encrypt_in_place(key, &mut buf);
    out.extend_from_slice(&buf);
    out
}

fn standard_container(plaintext: &[u8]) -> Vec<u8> {
    let encryption_info = build_standard_encryption_info_bytes(&STANDARD_KEY);
    let encrypted_package = encrypt_standard_encrypted_package_ecb(&STANDARD_KEY, plaintext);
    build_container(&[
        ("EncryptionInfo", &encryption_info),
        ("EncryptedPackage", &encrypted_package),
    ])
}

// --- Agile -------------------------------------------------------------------------------------

#[test]
fn decrypt_agile_roundtrip_matches_plain_zip() {
    let (plain_zip, encryption_info, encrypted_package) = agile_streams();

    let parsed = parse_encryption_info(&encryption_info).expect("parse EncryptionInfo");
    assert_eq!(parsed.mechanism(), EncryptionMechanism::Agile);
    let EncryptionInfo::Agile(agile) = &parsed else {
        panic!("expected Agile EncryptionInfo, got {parsed:?}");
    };
    assert!(agile.data_integrity.is_some());

    let decrypted = decrypt_encrypted_package(
        &encryption_info,
        &encrypted_package,
        AGILE_PASSWORD,
        &DecryptOptions::default(),
    )
    .expect("decrypt agile package");
    assert_eq!(decrypted, plain_zip);

    let mut archive = zip::ZipArchive::new(Cursor::new(decrypted)).expect("open zip");
    let mut part = String::new();
    archive
        .by_name("xl/workbook.xml")
        .expect("workbook part")
        .read_to_string(&mut part)
        .expect("read part");
    assert_eq!(part, "<workbook/>");
}

#[test]
fn decrypt_agile_container_end_to_end() {
    let plain_zip = build_tiny_zip();
    let encrypted_cfb = encrypt_zip_with_password_agile(&plain_zip, AGILE_PASSWORD);
    assert!(is_encrypted_ooxml_ole(&encrypted_cfb));
    assert!(!is_encrypted_ooxml_ole(&plain_zip));

    let decrypted = decrypt_package(&encrypted_cfb, AGILE_PASSWORD).expect("decrypt container");
    assert_eq!(decrypted, plain_zip);
}

#[test]
fn decrypt_agile_wrong_password_is_wrong_password() {
    let (_, encryption_info, encrypted_package) = agile_streams();

    let err = decrypt_encrypted_package(
        &encryption_info,
        &encrypted_package,
        "not the password",
        &DecryptOptions::default(),
    )
    .expect_err("wrong password should fail");
    assert!(matches!(err, OffcryptoError::WrongPassword), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::WrongPassword);
}

#[test]
fn decrypt_agile_tampered_ciphertext_fails_integrity() {
    let (_, encryption_info, mut encrypted_package) = agile_streams();
    assert!(encrypted_package.len() > 8);
    encrypted_package[8] ^= 0x55;

    let err = decrypt_encrypted_package(
        &encryption_info,
        &encrypted_package,
        AGILE_PASSWORD,
        &DecryptOptions::default(),
    )
    .expect_err("tampered EncryptedPackage should fail integrity");
    assert_eq!(err.kind(), ErrorKind::IntegrityCheckFailed);
}

#[test]
fn decrypt_agile_tampered_size_header_fails_integrity() {
    let (_, encryption_info, mut encrypted_package) = agile_streams();
    let original_size = u64::from_le_bytes(encrypted_package[..8].try_into().unwrap());
    assert!(original_size > 0);
    encrypted_package[..8].copy_from_slice(&(original_size - 1).to_le_bytes());

    let err = decrypt_encrypted_package(
        &encryption_info,
        &encrypted_package,
        AGILE_PASSWORD,
        &DecryptOptions::default(),
    )
    .expect_err("tampered size header should fail integrity");
    assert!(matches!(err, OffcryptoError::IntegrityMismatch), "{err:?}");
}

#[test]
fn decrypt_agile_appended_ciphertext_fails_integrity() {
    let (_, encryption_info, mut encrypted_package) = agile_streams();
    encrypted_package.extend_from_slice(&[0xA5u8; 16]);

    let err = decrypt_encrypted_package(
        &encryption_info,
        &encrypted_package,
        AGILE_PASSWORD,
        &DecryptOptions::default(),
    )
    .expect_err("appended bytes should fail integrity");
    assert!(matches!(err, OffcryptoError::IntegrityMismatch), "{err:?}");
}

#[test]
fn trailing_slack_is_ignored_when_integrity_is_not_verified() {
    let (plain_zip, encryption_info, mut encrypted_package) = agile_streams();
    encrypted_package.extend_from_slice(&[0xA5u8; 16]);

    let options = DecryptOptions {
        verify_integrity: false,
        ..DecryptOptions::default()
    };
    let decrypted =
        decrypt_encrypted_package(&encryption_info, &encrypted_package, AGILE_PASSWORD, &options)
            .expect("decrypt without integrity check");
    assert_eq!(decrypted, plain_zip);
}

#[test]
fn spin_count_limit_is_enforced_before_key_derivation() {
    let (_, encryption_info, encrypted_package) = agile_streams();
    let options = DecryptOptions {
        limits: DecryptLimits {
            max_spin_count: 10,
            ..DecryptLimits::default()
        },
        ..DecryptOptions::default()
    };

    let err =
        decrypt_encrypted_package(&encryption_info, &encrypted_package, AGILE_PASSWORD, &options)
            .expect_err("spin count above limit");
    assert!(
        matches!(err, OffcryptoError::SpinCountTooLarge { max: 10, .. }),
        "{err:?}"
    );
}

#[test]
fn output_size_limit_is_enforced() {
    let (plain_zip, encryption_info, encrypted_package) = agile_streams();
    let options = DecryptOptions {
        limits: DecryptLimits {
            max_output_size: Some(plain_zip.len() as u64 - 1),
            ..DecryptLimits::default()
        },
        ..DecryptOptions::default()
    };

    let err =
        decrypt_encrypted_package(&encryption_info, &encrypted_package, AGILE_PASSWORD, &options)
            .expect_err("declared size above limit");
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
}

// --- Standard ----------------------------------------------------------------------------------

#[test]
fn standard_key_matches_known_vector() {
    let key = standard_derive_key(&standard_info(), STANDARD_PASSWORD).expect("derive key");
    assert_eq!(hex::encode(&key[..]), "40b13a71f90b966e375408f2d181a1aa");
    assert_eq!(key.as_slice(), &STANDARD_KEY);

    let other = standard_derive_key(&standard_info(), "Password1234").expect("derive key");
    assert_ne!(other.as_slice(), &STANDARD_KEY);
}

#[test]
fn decrypt_standard_roundtrip_matches_plain_zip() {
    let plain_zip = build_tiny_zip();
    let container = standard_container(&plain_zip);
    assert!(is_encrypted_ooxml_ole(&container));

    let encryption_info = extract_stream_bytes(&container, "EncryptionInfo");
    let parsed = parse_encryption_info(&encryption_info).expect("parse EncryptionInfo");
    let EncryptionInfo::Standard(standard) = &parsed else {
        panic!("expected Standard EncryptionInfo, got {parsed:?}");
    };
    assert_eq!(
        standard.header.csp_name,
        "Microsoft Enhanced RSA and AES Cryptographic Provider"
    );

    let decrypted = decrypt_package(&container, STANDARD_PASSWORD).expect("decrypt standard");
    assert_eq!(decrypted, plain_zip);
}

#[test]
fn decrypt_standard_wrong_password_is_wrong_password() {
    let container = standard_container(&build_tiny_zip());
    let err = decrypt_package(&container, "password").expect_err("wrong password");
    assert!(matches!(err, OffcryptoError::WrongPassword), "{err:?}");
}

#[test]
fn decrypt_standard_declared_size_beyond_ciphertext_is_rejected() {
    let key = STANDARD_KEY;
    let encryption_info = build_standard_encryption_info_bytes(&key);
    let mut encrypted_package = encrypt_standard_encrypted_package_ecb(&key, b"PK\x03\x04tiny");
    encrypted_package[..8].copy_from_slice(&4096u64.to_le_bytes());

    let err = decrypt_encrypted_package(
        &encryption_info,
        &encrypted_package,
        STANDARD_PASSWORD,
        &DecryptOptions::default(),
    )
    .expect_err("size mismatch");
    assert!(
        matches!(
            err,
            OffcryptoError::EncryptedPackageSizeMismatch { declared: 4096, .. }
        ),
        "{err:?}"
    );
}

// --- Mechanism errors --------------------------------------------------------------------------

fn container_with_version(major: u16, minor: u16) -> Vec<u8> {
    let mut info = major.to_le_bytes().to_vec();
    info.extend_from_slice(&minor.to_le_bytes());
    info.extend_from_slice(&0u32.to_le_bytes());
    build_container(&[("EncryptionInfo", &info)])
}

#[test]
fn unsupported_mechanisms_are_reported_before_the_package_is_read() {
    for (major, minor, expected) in [
        (1, 1, EncryptionMechanism::Binary),
        (3, 3, EncryptionMechanism::Extensible),
        (4, 3, EncryptionMechanism::Extensible),
    ] {
        let err = decrypt_package(&container_with_version(major, minor), "password")
            .expect_err("unsupported mechanism");
        match err {
            OffcryptoError::UnsupportedEncryptionMechanism { mechanism } => {
                assert_eq!(mechanism, expected, "{major}.{minor}")
            }
            other => panic!("{major}.{minor}: unexpected error {other:?}"),
        }
    }
}

#[test]
fn unknown_mechanism_is_reported() {
    let err = decrypt_package(&container_with_version(9, 9), "password").expect_err("unknown");
    assert!(matches!(err, OffcryptoError::UnknownEncryptionMechanism), "{err:?}");
}

#[test]
fn missing_streams_are_malformed_containers() {
    let container = build_container(&[("Workbook", b"not encrypted")]);
    let err = decrypt_package_with_options(&container, "password", &DecryptOptions::default())
        .expect_err("missing EncryptionInfo");
    assert!(
        matches!(err, OffcryptoError::MissingStream { stream: "EncryptionInfo" }),
        "{err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::MalformedContainer);
}
