//! Pulls named executables out of downloaded release archives.
//!
//! Release archives nest their binaries under a versioned directory
//! (`ffmpeg-master-latest-linux64-gpl/bin/ffmpeg`, `bun-linux-x64/bun`), so
//! members are matched by base name and written flat into the destination.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::types::ArchiveFormat;

/// True when an archive entry path names the wanted member.
fn matches_member(entry: &str, name: &str) -> bool {
    entry == name || entry.ends_with(&format!("/{}", name)) || entry.ends_with(&format!("\\{}", name))
}

// ============================================================================
// Archive Extraction
// ============================================================================

/// Extracts `members` from the archive into `dest_dir`, each as an
/// executable file named after the member. The format is inferred from the
/// archive's file name.
///
/// # Errors
///
/// Fails on unsupported formats, unreadable archives, and when any requested
/// member is absent.
pub fn extract_members(archive_path: &Path, dest_dir: &Path, members: &[String]) -> Result<Vec<PathBuf>> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::from_name(&name)
        .with_context(|| format!("Unsupported archive format: {}", archive_path.display()))?;

    info!(
        archive = %archive_path.display(),
        dest = %dest_dir.display(),
        ?format,
        ?members,
        "extracting archive"
    );

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    let extracted = match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir, members)?,
        ArchiveFormat::TarXz => extract_tar_xz(archive_path, dest_dir, members)?,
    };

    let missing: Vec<&String> = members
        .iter()
        .filter(|m| {
            !extracted
                .iter()
                .any(|p| p.file_name() == Some(std::ffi::OsStr::new(m.as_str())))
        })
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("Archive {} does not contain {:?}", archive_path.display(), missing);
    }

    Ok(extracted)
}

// ============================================================================
// ZIP Extraction
// ============================================================================

fn extract_zip(archive_path: &Path, dest_dir: &Path, members: &[String]) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open zip: {}", archive_path.display()))?;

    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip: {}", archive_path.display()))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let entry_name = entry.name().to_string();
        if let Some(member) = members.iter().find(|m| matches_member(&entry_name, m)) {
            debug!(entry = %entry_name, member = %member, "extracting zip member");
            extracted.push(write_member(&mut entry, dest_dir, member)?);
        }
    }

    Ok(extracted)
}

// ============================================================================
// TAR.XZ Extraction
// ============================================================================

fn extract_tar_xz(archive_path: &Path, dest_dir: &Path, members: &[String]) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open tar.xz: {}", archive_path.display()))?;

    let decoder = xz2::read::XzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    let mut extracted = Vec::new();
    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_type = entry.header().entry_type();

        // Links are never followed; only regular files are candidates.
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping symlink/hardlink in tar archive");
            continue;
        }
        if !entry_type.is_file() {
            continue;
        }

        let entry_name = entry.path()?.to_string_lossy().into_owned();
        if let Some(member) = members.iter().find(|m| matches_member(&entry_name, m)) {
            debug!(entry = %entry_name, member = %member, "extracting tar member");
            extracted.push(write_member(&mut entry, dest_dir, member)?);
        }
    }

    Ok(extracted)
}

// ============================================================================
// Output
// ============================================================================

fn write_member<R: Read>(reader: &mut R, dest_dir: &Path, member: &str) -> Result<PathBuf> {
    let dest_path = dest_dir.join(member);
    let mut outfile = File::create(&dest_path)
        .with_context(|| format!("Failed to create: {}", dest_path.display()))?;
    io::copy(reader, &mut outfile)
        .with_context(|| format!("Failed to write: {}", dest_path.display()))?;
    drop(outfile);

    make_executable(&dest_path)?;
    Ok(dest_path)
}

/// Sets mode 0o755 on a file (Unix only).
///
/// On Windows, this is a no-op.
#[cfg_attr(not(unix), allow(unused_variables))]
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).with_context(|| {
            format!("Failed to set executable permission on {}", path.display())
        })?;

        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}
