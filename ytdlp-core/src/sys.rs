//! OS-specific process attributes and executable detection.

use std::fs::Metadata;
use std::io;
use std::path::Path;

/// CREATE_NO_WINDOW
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
/// CREATE_NEW_PROCESS_GROUP
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Applies platform process attributes to a child before spawning.
///
/// Unix: a separate process group keeps terminal signals (Ctrl-C) aimed at
/// the parent from reaching the child. Windows: never open a console
/// window, and optionally start a new process group.
#[cfg_attr(not(any(unix, windows)), allow(unused_variables))]
pub(crate) fn configure_process(cmd: &mut tokio::process::Command, separate_group: bool) {
    #[cfg(unix)]
    if separate_group {
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        let mut flags = CREATE_NO_WINDOW;
        if separate_group {
            flags |= CREATE_NEW_PROCESS_GROUP;
        }
        cmd.creation_flags(flags);
    }
}

/// Sends SIGKILL to every process in the group led by `pgid`.
///
/// Only valid for a child spawned with a separate process group, whose
/// group id equals its pid.
#[cfg(unix)]
pub(crate) fn kill_process_group(pgid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    if pgid <= 1 {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    // SAFETY: killpg has no memory effects; the group belongs to our child.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Process groups are not signalled outside unix; the direct child is
/// still killed by the caller.
#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pgid: u32) -> io::Result<()> {
    Ok(())
}

/// Reports whether a regular file can be executed.
///
/// Unix: any of the user, group or other execute bits. Windows: the file
/// parses as a PE image.
#[cfg_attr(not(windows), allow(unused_variables))]
pub fn is_executable(path: &Path, metadata: &Metadata) -> bool {
    if metadata.is_dir() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(windows)]
    {
        std::fs::read(path).map(|data| is_pe_image(&data)).unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        true
    }
}

/// `MZ` header whose `e_lfanew` points at a `PE\0\0` signature.
#[cfg_attr(not(windows), allow(dead_code))]
fn is_pe_image(data: &[u8]) -> bool {
    if data.len() < 0x40 || &data[..2] != b"MZ" {
        return false;
    }
    let offset = u32::from_le_bytes([data[0x3c], data[0x3d], data[0x3e], data[0x3f]]) as usize;
    data.get(offset..offset + 4) == Some(b"PE\0\0".as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pe_detection() {
        let mut image = vec![0u8; 0x80];
        image[..2].copy_from_slice(b"MZ");
        image[0x3c] = 0x40;
        image[0x40..0x44].copy_from_slice(b"PE\0\0");
        assert!(is_pe_image(&image));

        image[0x3c] = 0x7e;
        assert!(!is_pe_image(&image));
        assert!(!is_pe_image(b"#!/bin/sh\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_executable_mode_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tool");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!is_executable(&path, &std::fs::metadata(&path).unwrap()));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o601)).unwrap();
        assert!(is_executable(&path, &std::fs::metadata(&path).unwrap()));

        assert!(!is_executable(temp.path(), &std::fs::metadata(temp.path()).unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_process_group() {
        use std::os::unix::process::ExitStatusExt;

        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.args(["-c", "sleep 30 & wait"]);
        configure_process(&mut cmd, true);
        let mut child = cmd.spawn().unwrap();

        kill_process_group(child.id().unwrap()).unwrap();
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));

        assert!(kill_process_group(0).is_err());
        assert!(kill_process_group(1).is_err());
    }
}
