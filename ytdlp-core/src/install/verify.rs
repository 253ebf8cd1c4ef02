//! Signed checksum verification for downloaded release assets.
//!
//! A release publishes a `SHA2-256SUMS` manifest (`<hex>  <asset>` per
//! line) and a detached OpenPGP signature over it. An artifact is accepted
//! only if the signature verifies under a trusted key and the artifact's
//! SHA-256 matches its manifest line.

use super::openpgp::PublicKeyRing;
use crate::error::InstallError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::{debug, info};

const ARMOR_PREFIX: &str = "-----BEGIN PGP";

/// Loads the trusted keys from armored key text or a key file path.
pub fn load_trusted_keys(source: Option<&str>) -> Result<PublicKeyRing, InstallError> {
    let source = source.map(str::trim).unwrap_or_default();
    if source.is_empty() {
        return Err(InstallError::MissingSigningKey);
    }
    if source.starts_with(ARMOR_PREFIX) {
        return PublicKeyRing::parse(source.as_bytes());
    }

    let path = Path::new(source);
    let data = std::fs::read(path).map_err(|e| InstallError::io(path, e))?;
    PublicKeyRing::parse(&data)
}

/// Finds the checksum listed for `asset`. Lines that do not have exactly
/// two fields are ignored.
pub fn find_checksum<'a>(manifest: &'a str, asset: &str) -> Option<&'a str> {
    manifest.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [sum, name] if *name == asset => Some(*sum),
            _ => None,
        }
    })
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String, InstallError> {
    let mut file = File::open(path).map_err(|e| InstallError::io(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| InstallError::io(path, e))?;
    Ok(format_sha256_hex(&hasher.finalize()))
}

fn format_sha256_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Checks `target` against a signed manifest.
///
/// `asset` is the name listed in the manifest, which differs from the
/// local file name (`yt-dlp_linux` vs `yt-dlp-<version>.tmp`).
pub fn verify_file_checksum(
    manifest_path: &Path,
    signature_path: &Path,
    target: &Path,
    asset: &str,
    keys: &PublicKeyRing,
) -> Result<(), InstallError> {
    debug!(
        manifest = %manifest_path.display(),
        signature = %signature_path.display(),
        target = %target.display(),
        asset,
        "verifying file checksum"
    );

    let manifest = std::fs::read(manifest_path).map_err(|e| InstallError::io(manifest_path, e))?;
    let signature = std::fs::read(signature_path).map_err(|e| InstallError::io(signature_path, e))?;

    keys.verify_detached(&manifest, &signature)?;

    let actual = sha256_file(target)?;
    let manifest = String::from_utf8_lossy(&manifest);
    let expected = find_checksum(&manifest, asset).ok_or_else(|| InstallError::ChecksumNotFound {
        artifact: asset.to_string(),
    })?;

    if !expected.eq_ignore_ascii_case(&actual) {
        return Err(InstallError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    info!(asset, sha256 = %actual, "checksum verified");
    Ok(())
}
