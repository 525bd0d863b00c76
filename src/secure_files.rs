//! Mode-constrained filesystem writes for key material and certificates.
//!
//! Every artifact this tool produces is written through these helpers so the
//! on-disk permissions are set at creation time rather than patched up
//! afterwards.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Private keys: owner read/write only.
pub const MODE_SECRET: u32 = 0o600;
/// Certificates, CSRs and password-protected containers.
pub const MODE_SHARED: u32 = 0o640;
/// The CA certificate: owner read only.
pub const MODE_CA_CERT: u32 = 0o400;
/// Directories holding key material.
pub const MODE_DIR: u32 = 0o700;

/// Create `path` (and any missing parents) and restrict it to the owner.
pub fn create_restricted_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(MODE_DIR))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Write `bytes` to `path` with the given file mode.
///
/// An existing file is removed first: re-issuing must never inherit stale
/// content or stale permissions, and read-only files (the CA certificate)
/// cannot be opened for writing in place.
pub fn write_with_mode(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to replace existing file {}", path.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}
