//! Open and save spreadsheet packages.
//!
//! Plain `.xlsx`/`.xlsm` files are ZIP packages. Password-protected ones are wrapped in an
//! OLE compound file holding `EncryptionInfo` + `EncryptedPackage`; opening them goes through
//! [`sheetcrypt_offcrypto::decrypt_package_with_options`]. Writing encrypted packages is not
//! supported and fails with [`Error::EncryptionNotSupportedOnWrite`].

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use sheetcrypt_offcrypto::{
    decrypt_package_with_options, is_encrypted_ooxml_ole, DecryptOptions, EncryptionMechanism,
    OffcryptoError,
};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

mod package;

pub use package::{
    Package, PackageError, PackageLimits, MAX_PACKAGE_PART_BYTES, MAX_PACKAGE_TOTAL_BYTES,
};

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open workbook `{path}`: {source}")]
    OpenIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("input is neither a ZIP package nor an encrypted OOXML container")]
    UnrecognizedFormat,
    #[error("workbook is password protected; a password is required to open it")]
    PasswordRequired,
    #[error("invalid password for encrypted workbook")]
    InvalidPassword,
    #[error("unsupported encryption mechanism `{mechanism}`")]
    UnsupportedEncryption { mechanism: EncryptionMechanism },
    #[error("unknown encryption mechanism")]
    UnknownEncryption,
    #[error("failed to decrypt workbook: {0}")]
    Decrypt(#[source] OffcryptoError),
    #[error("failed to read workbook package: {0}")]
    Package(#[from] PackageError),
    #[error("saving workbooks with a password is not supported")]
    EncryptionNotSupportedOnWrite,
    #[error("failed to save workbook `{path}`: {source}")]
    SaveIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write workbook package to `{path}`: {source}")]
    SavePackage {
        path: PathBuf,
        #[source]
        source: PackageError,
    },
}

impl From<OffcryptoError> for Error {
    fn from(err: OffcryptoError) -> Self {
        match err {
            OffcryptoError::WrongPassword => Error::InvalidPassword,
            OffcryptoError::UnsupportedEncryptionMechanism { mechanism } => {
                Error::UnsupportedEncryption { mechanism }
            }
            OffcryptoError::UnknownEncryptionMechanism => Error::UnknownEncryption,
            other => Error::Decrypt(other),
        }
    }
}

/// Options for opening a workbook.
#[derive(Default)]
pub struct OpenOptions {
    pub password: Option<Zeroizing<String>>,
    pub decrypt: DecryptOptions,
    pub package_limits: PackageLimits,
}

impl std::fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOptions")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("decrypt", &self.decrypt)
            .field("package_limits", &self.package_limits)
            .finish()
    }
}

impl OpenOptions {
    pub fn with_password(password: Option<&str>) -> Self {
        Self {
            password: password.map(|p| Zeroizing::new(p.to_string())),
            ..Self::default()
        }
    }
}

/// Options for saving a workbook.
#[derive(Default)]
pub struct SaveOptions {
    /// Requesting a password makes the save fail with [`Error::EncryptionNotSupportedOnWrite`].
    pub password: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for SaveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveOptions")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A workbook opened from disk or memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workbook {
    package: Package,
    opened_encrypted: bool,
}

impl Workbook {
    pub fn from_package(package: Package) -> Self {
        Self {
            package,
            opened_encrypted: false,
        }
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn package_mut(&mut self) -> &mut Package {
        &mut self.package
    }

    pub fn into_package(self) -> Package {
        self.package
    }

    /// Whether the source was a password-protected container.
    pub fn opened_encrypted(&self) -> bool {
        self.opened_encrypted
    }
}

/// Open a workbook that is not password protected.
pub fn open_workbook(path: impl AsRef<Path>) -> Result<Workbook, Error> {
    open_workbook_with_password(path, None)
}

/// Open a workbook, decrypting it with `password` when it is an encrypted container.
pub fn open_workbook_with_password(
    path: impl AsRef<Path>,
    password: Option<&str>,
) -> Result<Workbook, Error> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| Error::OpenIo {
        path: path.to_path_buf(),
        source,
    })?;
    open_workbook_from_bytes_with_options(&bytes, &OpenOptions::with_password(password))
}

pub fn open_workbook_from_bytes(bytes: &[u8], password: Option<&str>) -> Result<Workbook, Error> {
    open_workbook_from_bytes_with_options(bytes, &OpenOptions::with_password(password))
}

pub fn open_workbook_from_bytes_with_options(
    bytes: &[u8],
    options: &OpenOptions,
) -> Result<Workbook, Error> {
    if package::looks_like_zip(bytes) {
        let package = Package::from_bytes_limited(bytes, options.package_limits)?;
        return Ok(Workbook::from_package(package));
    }

    if !bytes.starts_with(&OLE_MAGIC) {
        return Err(Error::UnrecognizedFormat);
    }
    if !is_encrypted_ooxml_ole(bytes) {
        // An OLE file without the encryption streams is a legacy `.xls` or similar.
        return Err(Error::UnrecognizedFormat);
    }

    let password = options.password.as_ref().ok_or(Error::PasswordRequired)?;
    let plain = Zeroizing::new(decrypt_package_with_options(
        bytes,
        password,
        &options.decrypt,
    )?);
    let package = Package::from_bytes_limited(&plain, options.package_limits)?;
    Ok(Workbook {
        package,
        opened_encrypted: true,
    })
}

/// Save a workbook as a plain ZIP package.
pub fn save_workbook(workbook: &Workbook, path: impl AsRef<Path>) -> Result<(), Error> {
    save_workbook_with_options(workbook, path, &SaveOptions::default())
}

/// Save a workbook.
///
/// The destination is replaced atomically; on error it is left untouched. A password request is
/// refused before the destination is touched.
pub fn save_workbook_with_options(
    workbook: &Workbook,
    path: impl AsRef<Path>,
    options: &SaveOptions,
) -> Result<(), Error> {
    let path = path.as_ref();
    if options.password.is_some() {
        log::warn!("refusing to write an encrypted workbook to `{}`", path.display());
        return Err(Error::EncryptionNotSupportedOnWrite);
    }
    if workbook.opened_encrypted {
        log::warn!(
            "workbook was opened from an encrypted container; `{}` will be written unencrypted",
            path.display()
        );
    }

    let bytes = workbook
        .package
        .write_to_bytes()
        .map_err(|source| Error::SavePackage {
            path: path.to_path_buf(),
            source,
        })?;
    atomic_write(path, &bytes).map_err(|source| Error::SaveIo {
        path: path.to_path_buf(),
        source,
    })
}

fn atomic_write(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    // `Path::parent` is `Some("")` for bare file names.
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|err| err.error)?;

    // Best effort; the file is already in place.
    let _ = File::open(dir).and_then(|d| d.sync_all());
    Ok(())
}
