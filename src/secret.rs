use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub const SECRET_FILE_NAME: &str = "secret_key";

#[derive(thiserror::Error, Debug)]
pub enum SecretKeyError {
    #[error("secret key must be at least {min} bytes, got {len}")]
    TooShort { len: usize, min: usize },
    #[error("secret key file: {0}")]
    Io(#[from] std::io::Error),
}

/// Process-wide key for CSRF tokens and session cookies.
///
/// Loaded once at startup and shared read-only. Replacing the key
/// invalidates every token and cookie signed with the previous one; the
/// [`id`](Self::id) travels inside tokens so that case is recognised
/// without running the MAC.
pub struct SecretKey {
    bytes: Vec<u8>,
    id: [u8; 4],
}

impl SecretKey {
    pub const MIN_LEN: usize = 32;

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SecretKeyError> {
        if bytes.len() < Self::MIN_LEN {
            return Err(SecretKeyError::TooShort { len: bytes.len(), min: Self::MIN_LEN });
        }
        Ok(Self::with_id(bytes))
    }

    /// Fresh key: 32 random bytes, hex encoded (the same text form the key
    /// file stores).
    pub fn generate() -> Self {
        Self::with_id(random_hex().into_bytes())
    }

    fn with_id(bytes: Vec<u8>) -> Self {
        let digest = Sha256::digest(&bytes);
        let id = [digest[0], digest[1], digest[2], digest[3]];
        Self { bytes, id }
    }

    pub fn id(&self) -> [u8; 4] {
        self.id
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Resolve the key for this deployment.
    ///
    /// Order: the `SECRET_KEY` value if given, else `secret_key` next to the
    /// database file, else a new key written to that file (mode 0600). If the
    /// file cannot be written the key is kept in memory only and sessions
    /// will not survive a restart.
    pub fn load_or_create(env_value: Option<&str>, db_path: &Path) -> Result<Self, SecretKeyError> {
        if let Some(value) = env_value.map(str::trim).filter(|v| !v.is_empty()) {
            info!("using secret key from environment");
            return Self::from_bytes(value.as_bytes().to_vec());
        }

        let path = secret_path_for(db_path);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                info!(path = %path.display(), "loaded secret key");
                return Self::from_bytes(text.trim().as_bytes().to_vec());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let key = Self::generate();
        match write_new_key_file(&path, key.expose()) {
            Ok(()) => info!(path = %path.display(), "generated new secret key"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not persist secret key; using a volatile key"),
        }
        Ok(key)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED], id={})", hex::encode(self.id))
    }
}

pub fn secret_path_for(db_path: &Path) -> PathBuf {
    match db_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(SECRET_FILE_NAME),
        _ => PathBuf::from(SECRET_FILE_NAME),
    }
}

fn random_hex() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

fn write_new_key_file(path: &Path, key: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(key)?;
    file.sync_all()
}
