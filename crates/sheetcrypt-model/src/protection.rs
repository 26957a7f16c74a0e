use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use sheetcrypt_offcrypto::{
    decode_b64_attr, derive_password_hash, parse_spin_count, HashAlgorithmId, OffcryptoError,
    DEFAULT_MAX_SPIN_COUNT, SHEET_PROTECTION_SPIN_COUNT,
};
use subtle::ConstantTimeEq as _;

use crate::error::ProtectionError;

/// Longest password Excel accepts for sheet/workbook protection, in UTF-16 code units.
pub const MAX_PASSWORD_LEN: usize = 255;

/// Algorithm Excel writes for new ISO protection hashes.
pub const DEFAULT_PROTECTION_ALGORITHM: &str = "SHA-512";

/// Length of freshly generated salts.
pub const PROTECTION_SALT_LEN: usize = 16;

/// Largest stored spin count [`ProtectionPassword`] will run.
pub const MAX_PROTECTION_SPIN_COUNT: u32 = DEFAULT_MAX_SPIN_COUNT;

fn check_spin_count(spin_count: u32) -> Result<u32, ProtectionError> {
    if spin_count > MAX_PROTECTION_SPIN_COUNT {
        return Err(OffcryptoError::SpinCountTooLarge {
            spin_count,
            max: MAX_PROTECTION_SPIN_COUNT,
        }
        .into());
    }
    Ok(spin_count)
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_true(v: &bool) -> bool {
    *v
}

/// A stored protection password.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtectionPassword {
    /// Legacy XOR hash (`sheetProtection password="CC3D"`).
    Legacy { hash: u16 },
    /// Iterated salted hash (`algorithmName`, `hashValue`, `saltValue`, `spinCount`).
    Iso {
        algorithm_name: String,
        hash_value: String,
        salt_value: String,
        #[serde(default = "crate::serde_defaults::default_spin_count")]
        spin_count: u32,
    },
}

impl ProtectionPassword {
    /// Rebuild an ISO password from the attribute strings found in sheet/workbook metadata.
    ///
    /// The algorithm must be one we can hash with and the spin count must be a non-negative
    /// integer no larger than [`MAX_PROTECTION_SPIN_COUNT`]; the hash and salt are kept verbatim.
    pub fn from_attributes(
        algorithm_name: &str,
        hash_value: &str,
        salt_value: &str,
        spin_count: &str,
    ) -> Result<Self, ProtectionError> {
        let algorithm = HashAlgorithmId::parse(algorithm_name).require()?;
        Ok(ProtectionPassword::Iso {
            algorithm_name: algorithm.name().to_string(),
            hash_value: hash_value.trim().to_string(),
            salt_value: salt_value.trim().to_string(),
            spin_count: check_spin_count(parse_spin_count(spin_count)?)?,
        })
    }

    /// Parse the 4-hex-digit legacy `password` attribute.
    pub fn from_legacy_hex(value: &str) -> Result<Self, ProtectionError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > 4 {
            return Err(ProtectionError::InvalidLegacyHash {
                value: value.to_string(),
            });
        }
        let hash =
            u16::from_str_radix(trimmed, 16).map_err(|_| ProtectionError::InvalidLegacyHash {
                value: value.to_string(),
            })?;
        Ok(ProtectionPassword::Legacy { hash })
    }

    /// Check `candidate` against the stored hash.
    ///
    /// Stored base64 may be unpadded or wrapped. Malformed stored metadata (bad encoding,
    /// unknown algorithm, oversized spin count) is an error, not a mismatch.
    pub fn verify(&self, candidate: &str) -> Result<bool, ProtectionError> {
        match self {
            ProtectionPassword::Legacy { hash } => Ok(verify_legacy_password(candidate, *hash)),
            ProtectionPassword::Iso {
                algorithm_name,
                hash_value,
                salt_value,
                spin_count,
            } => {
                let spin_count = check_spin_count(*spin_count)?;
                let expected = decode_b64_attr("hashValue", hash_value)?;
                let salt = STANDARD.encode(decode_b64_attr("saltValue", salt_value)?);
                let derived =
                    derive_password_hash(candidate, algorithm_name, &salt, spin_count)?;
                let actual = decode_b64_attr("hashValue", &derived.hash_value)?;
                Ok(bool::from(actual.ct_eq(&expected)))
            }
        }
    }
}

/// How new protection passwords are hashed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtectionOptions {
    /// Hash algorithm name; empty selects the legacy 16-bit hash.
    pub algorithm_name: String,
    pub spin_count: u32,
}

impl Default for ProtectionOptions {
    fn default() -> Self {
        Self {
            algorithm_name: DEFAULT_PROTECTION_ALGORITHM.to_string(),
            spin_count: SHEET_PROTECTION_SPIN_COUNT,
        }
    }
}

impl ProtectionOptions {
    pub fn legacy() -> Self {
        Self {
            algorithm_name: String::new(),
            spin_count: 0,
        }
    }
}

fn check_password_len(password: &str) -> Result<(), ProtectionError> {
    let len = password.encode_utf16().count();
    if len == 0 || len > MAX_PASSWORD_LEN {
        return Err(ProtectionError::PasswordLength { len });
    }
    Ok(())
}

/// Hash `password` for storage in protection metadata.
///
/// `salt` is only used for ISO hashes; when `None`, a random salt of
/// [`PROTECTION_SALT_LEN`] bytes is generated.
pub fn hash_protection_password(
    password: &str,
    options: &ProtectionOptions,
    salt: Option<&[u8]>,
) -> Result<ProtectionPassword, ProtectionError> {
    check_password_len(password)?;

    if options.algorithm_name.trim().is_empty() {
        return Ok(ProtectionPassword::Legacy {
            hash: hash_legacy_password(password),
        });
    }

    let algorithm = HashAlgorithmId::parse(&options.algorithm_name).require()?;
    let salt_value = match salt {
        Some(salt) => STANDARD.encode(salt),
        None => {
            let mut fresh = [0u8; PROTECTION_SALT_LEN];
            rand::rng().fill_bytes(&mut fresh);
            STANDARD.encode(fresh)
        }
    };

    let derived = derive_password_hash(
        password,
        algorithm.name(),
        &salt_value,
        options.spin_count,
    )?;
    Ok(ProtectionPassword::Iso {
        algorithm_name: algorithm.name().to_string(),
        hash_value: derived.hash_value,
        salt_value: derived.salt_value,
        spin_count: options.spin_count,
    })
}

/// Check `candidate` against an optional stored password; no stored password means the
/// protection is not password gated and any candidate is accepted.
fn check_unprotect(
    stored: Option<&ProtectionPassword>,
    candidate: Option<&str>,
) -> Result<(), ProtectionError> {
    let Some(stored) = stored else {
        return Ok(());
    };
    let candidate = candidate.ok_or(ProtectionError::PasswordMismatch)?;
    if stored.verify(candidate)? {
        Ok(())
    } else {
        Err(ProtectionError::PasswordMismatch)
    }
}

fn hash_optional(
    password: Option<&str>,
    options: &ProtectionOptions,
) -> Result<Option<ProtectionPassword>, ProtectionError> {
    password
        .map(|password| hash_protection_password(password, options, None))
        .transpose()
}

/// Excel-compatible worksheet protection state.
///
/// Models the `sheetProtection` element as a set of booleans saying which operations stay
/// allowed while protection is enabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetProtection {
    #[serde(default, skip_serializing_if = "is_false")]
    pub enabled: bool,

    /// Excel defaults this to true when protecting a sheet.
    #[serde(
        default = "crate::serde_defaults::default_true",
        skip_serializing_if = "is_true"
    )]
    pub select_locked_cells: bool,

    /// Excel defaults this to true when protecting a sheet.
    #[serde(
        default = "crate::serde_defaults::default_true",
        skip_serializing_if = "is_true"
    )]
    pub select_unlocked_cells: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub format_cells: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub format_columns: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub format_rows: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub insert_columns: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub insert_rows: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub insert_hyperlinks: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete_columns: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub delete_rows: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sort: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_filter: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pivot_tables: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub edit_objects: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub edit_scenarios: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<ProtectionPassword>,
}

impl Default for SheetProtection {
    fn default() -> Self {
        Self {
            enabled: false,
            select_locked_cells: true,
            select_unlocked_cells: true,
            format_cells: false,
            format_columns: false,
            format_rows: false,
            insert_columns: false,
            insert_rows: false,
            insert_hyperlinks: false,
            delete_columns: false,
            delete_rows: false,
            sort: false,
            auto_filter: false,
            pivot_tables: false,
            edit_objects: false,
            edit_scenarios: false,
            password: None,
        }
    }
}

impl SheetProtection {
    pub fn is_default(v: &Self) -> bool {
        v == &Self::default()
    }

    /// Enable protection, optionally gated by `password`.
    ///
    /// On error the protection state is left unchanged.
    pub fn protect(
        &mut self,
        password: Option<&str>,
        options: &ProtectionOptions,
    ) -> Result<(), ProtectionError> {
        let password = hash_optional(password, options)?;
        self.enabled = true;
        self.password = password;
        Ok(())
    }

    /// Disable protection. Fails with [`ProtectionError::PasswordMismatch`] (and stays
    /// protected) when a password is stored and `password` does not match it.
    pub fn unprotect(&mut self, password: Option<&str>) -> Result<(), ProtectionError> {
        check_unprotect(self.password.as_ref(), password)?;
        self.enabled = false;
        self.password = None;
        Ok(())
    }

    /// Whether `action` may be performed in the current state.
    pub fn allows(&self, action: SheetProtectionAction) -> bool {
        if !self.enabled {
            return true;
        }
        match action {
            SheetProtectionAction::SelectLockedCells => self.select_locked_cells,
            SheetProtectionAction::SelectUnlockedCells => self.select_unlocked_cells,
            SheetProtectionAction::FormatCells => self.format_cells,
            SheetProtectionAction::FormatColumns => self.format_columns,
            SheetProtectionAction::FormatRows => self.format_rows,
            SheetProtectionAction::InsertColumns => self.insert_columns,
            SheetProtectionAction::InsertRows => self.insert_rows,
            SheetProtectionAction::InsertHyperlinks => self.insert_hyperlinks,
            SheetProtectionAction::DeleteColumns => self.delete_columns,
            SheetProtectionAction::DeleteRows => self.delete_rows,
            SheetProtectionAction::Sort => self.sort,
            SheetProtectionAction::AutoFilter => self.auto_filter,
            SheetProtectionAction::PivotTables => self.pivot_tables,
            SheetProtectionAction::EditObjects => self.edit_objects,
            SheetProtectionAction::EditScenarios => self.edit_scenarios,
        }
    }
}

/// Excel-compatible workbook protection state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkbookProtection {
    /// Sheets cannot be added, moved, renamed or deleted.
    #[serde(default, skip_serializing_if = "is_false")]
    pub lock_structure: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub lock_windows: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<ProtectionPassword>,
}

impl WorkbookProtection {
    pub fn is_default(v: &Self) -> bool {
        v == &Self::default()
    }

    pub fn is_protected(&self) -> bool {
        self.lock_structure || self.lock_windows
    }

    /// Lock the workbook structure, optionally gated by `password`.
    pub fn protect(
        &mut self,
        password: Option<&str>,
        options: &ProtectionOptions,
    ) -> Result<(), ProtectionError> {
        let password = hash_optional(password, options)?;
        self.lock_structure = true;
        self.password = password;
        Ok(())
    }

    /// Clear both locks. A wrong password leaves the workbook protected.
    pub fn unprotect(&mut self, password: Option<&str>) -> Result<(), ProtectionError> {
        check_unprotect(self.password.as_ref(), password)?;
        self.lock_structure = false;
        self.lock_windows = false;
        self.password = None;
        Ok(())
    }
}

/// Actions gated by worksheet protection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetProtectionAction {
    SelectLockedCells,
    SelectUnlockedCells,
    FormatCells,
    FormatColumns,
    FormatRows,
    InsertColumns,
    InsertRows,
    InsertHyperlinks,
    DeleteColumns,
    DeleteRows,
    Sort,
    AutoFilter,
    PivotTables,
    EditObjects,
    EditScenarios,
}

/// Excel's legacy 16-bit protection hash. Not cryptographically meaningful.
///
/// Only the first 15 UTF-16 units take part.
#[must_use]
pub fn hash_legacy_password(password: &str) -> u16 {
    let units: Vec<u16> = password.encode_utf16().take(15).collect();
    let rotl15 = |h: u16| ((h >> 14) & 0x0001) | ((h << 1) & 0x7FFF);

    let mut hash = 0u16;
    for unit in units.iter().rev() {
        hash = rotl15(hash) ^ (unit & 0x7FFF);
    }
    rotl15(hash) ^ (units.len() as u16) ^ 0xCE4B
}

#[must_use]
pub fn verify_legacy_password(password: &str, hash: u16) -> bool {
    hash_legacy_password(password) == hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fast_options() -> ProtectionOptions {
        ProtectionOptions {
            algorithm_name: "SHA-256".to_string(),
            spin_count: 10,
        }
    }

    #[test]
    fn legacy_hash_matches_excel() {
        assert_eq!(hash_legacy_password("password"), 0x83AF);
        assert_eq!(hash_legacy_password("test"), 0xCBEB);
        assert_eq!(hash_legacy_password(""), 0xCE4B);
        assert!(verify_legacy_password("password", 0x83AF));
        assert!(!verify_legacy_password("Password", 0x83AF));
    }

    #[test]
    fn legacy_hash_ignores_characters_past_fifteen() {
        assert_eq!(
            hash_legacy_password("abcdefghijklmno"),
            hash_legacy_password("abcdefghijklmnopqrstu")
        );
    }

    #[test]
    fn legacy_hex_attribute_parses() {
        assert_eq!(
            ProtectionPassword::from_legacy_hex("83AF").unwrap(),
            ProtectionPassword::Legacy { hash: 0x83AF }
        );
        assert!(matches!(
            ProtectionPassword::from_legacy_hex("XYZ"),
            Err(ProtectionError::InvalidLegacyHash { .. })
        ));
        assert!(matches!(
            ProtectionPassword::from_legacy_hex("12345"),
            Err(ProtectionError::InvalidLegacyHash { .. })
        ));
    }

    #[test]
    fn empty_algorithm_selects_legacy_hash() {
        let hashed = hash_protection_password("password", &ProtectionOptions::legacy(), None)
            .expect("hash");
        assert_eq!(hashed, ProtectionPassword::Legacy { hash: 0x83AF });
    }

    #[test]
    fn iso_hash_round_trips_through_verify() {
        let hashed =
            hash_protection_password("s3cret", &fast_options(), Some(&[1u8; 16])).expect("hash");
        let ProtectionPassword::Iso {
            algorithm_name,
            salt_value,
            spin_count,
            ..
        } = &hashed
        else {
            panic!("expected ISO hash, got {hashed:?}");
        };
        assert_eq!(algorithm_name, "SHA-256");
        assert_eq!(salt_value, "AQEBAQEBAQEBAQEBAQEBAQ==");
        assert_eq!(*spin_count, 10);

        assert!(hashed.verify("s3cret").unwrap());
        assert!(!hashed.verify("S3cret").unwrap());
    }

    #[test]
    fn fresh_salts_differ() {
        let a = hash_protection_password("same", &fast_options(), None).unwrap();
        let b = hash_protection_password("same", &fast_options(), None).unwrap();
        assert_ne!(a, b);
        assert!(a.verify("same").unwrap());
        assert!(b.verify("same").unwrap());
    }

    #[test]
    fn password_length_is_bounded() {
        let err = hash_protection_password("", &fast_options(), None).unwrap_err();
        assert!(matches!(err, ProtectionError::PasswordLength { len: 0 }));

        let long = "x".repeat(MAX_PASSWORD_LEN + 1);
        let err = hash_protection_password(&long, &fast_options(), None).unwrap_err();
        assert!(matches!(err, ProtectionError::PasswordLength { len: 256 }));

        let max = "x".repeat(MAX_PASSWORD_LEN);
        hash_protection_password(&max, &fast_options(), None).expect("255 units is allowed");
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let options = ProtectionOptions {
            algorithm_name: "WHIRLPOOL".to_string(),
            spin_count: 1,
        };
        let err = hash_protection_password("password", &options, None).unwrap_err();
        assert!(matches!(err, ProtectionError::Hash(_)), "{err:?}");
    }

    #[test]
    fn from_attributes_validates_metadata() {
        let password =
            ProtectionPassword::from_attributes("sha512", "abc=", " c2FsdA== ", "100000").unwrap();
        assert_eq!(
            password,
            ProtectionPassword::Iso {
                algorithm_name: "SHA-512".to_string(),
                hash_value: "abc=".to_string(),
                salt_value: "c2FsdA==".to_string(),
                spin_count: 100_000,
            }
        );

        assert!(ProtectionPassword::from_attributes("SHA-1", "", "", "-1").is_err());
        assert!(ProtectionPassword::from_attributes("RIPEMD", "", "", "1").is_err());
    }

    #[test]
    fn verify_reports_malformed_salt() {
        let password = ProtectionPassword::Iso {
            algorithm_name: "SHA-1".to_string(),
            hash_value: "AAAA".to_string(),
            salt_value: "***".to_string(),
            spin_count: 1,
        };
        assert!(matches!(
            password.verify("anything"),
            Err(ProtectionError::Hash(_))
        ));
    }

    #[test]
    fn verify_tolerates_unpadded_and_wrapped_stored_hashes() {
        for stored in [
            "HWbqyd4dKKCjk1fEhk2kuQ==",
            "HWbqyd4dKKCjk1fEhk2kuQ",
            "HWbqyd4d\nKKCjk1fEhk2kuQ==",
        ] {
            let password = ProtectionPassword::from_attributes(
                "MD5",
                stored,
                "8ADyorkumWCayIukRhlVKQ",
                "100000",
            )
            .unwrap();
            assert!(password.verify("password").unwrap(), "{stored:?}");
            assert!(!password.verify("Password").unwrap(), "{stored:?}");
        }
    }

    #[test]
    fn oversized_spin_counts_are_rejected_before_hashing() {
        let too_many = (MAX_PROTECTION_SPIN_COUNT + 1).to_string();
        let err = ProtectionPassword::from_attributes("SHA-1", "AAAA", "AAAA", &too_many)
            .unwrap_err();
        assert!(
            matches!(
                err,
                ProtectionError::Hash(OffcryptoError::SpinCountTooLarge { .. })
            ),
            "{err:?}"
        );

        let stored = ProtectionPassword::Iso {
            algorithm_name: "SHA-1".to_string(),
            hash_value: "AAAA".to_string(),
            salt_value: "AAAA".to_string(),
            spin_count: u32::MAX,
        };
        let err = stored.verify("anything").unwrap_err();
        assert!(
            matches!(
                err,
                ProtectionError::Hash(OffcryptoError::SpinCountTooLarge { spin_count: u32::MAX, .. })
            ),
            "{err:?}"
        );
    }

    #[test]
    fn sheet_protect_and_unprotect() {
        let mut sheet = SheetProtection::default();
        assert!(sheet.allows(SheetProtectionAction::DeleteRows));

        sheet.protect(Some("pw"), &fast_options()).unwrap();
        assert!(sheet.enabled);
        assert!(!sheet.allows(SheetProtectionAction::DeleteRows));
        assert!(sheet.allows(SheetProtectionAction::SelectLockedCells));

        let err = sheet.unprotect(Some("wrong")).unwrap_err();
        assert!(matches!(err, ProtectionError::PasswordMismatch));
        assert!(sheet.enabled);
        assert!(sheet.password.is_some());

        let err = sheet.unprotect(None).unwrap_err();
        assert!(matches!(err, ProtectionError::PasswordMismatch));

        sheet.unprotect(Some("pw")).unwrap();
        assert!(SheetProtection::is_default(&sheet));
    }

    #[test]
    fn protect_failure_leaves_state_unchanged() {
        let mut sheet = SheetProtection::default();
        let err = sheet.protect(Some(""), &fast_options()).unwrap_err();
        assert!(matches!(err, ProtectionError::PasswordLength { .. }));
        assert!(!sheet.enabled);
    }

    #[test]
    fn workbook_protect_without_password() {
        let mut workbook = WorkbookProtection::default();
        workbook.protect(None, &fast_options()).unwrap();
        assert!(workbook.is_protected());
        workbook.unprotect(Some("anything")).unwrap();
        assert!(!workbook.is_protected());
    }
}
