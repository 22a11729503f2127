// ─── Runtime shim ───
// The game passes `-XX:+UseCompactObjectHeaders`, which the bundled runtime
// rejects. On POSIX the real binary is moved to `java.real` and `java`
// becomes a small script that drops the flag before exec-ing it.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::error::{LauncherError, LauncherResult};

pub const SHIM_MARKER: &str = "# hyprism-java-shim";
pub const STRIPPED_FLAG: &str = "-XX:+UseCompactObjectHeaders";
pub const REAL_SUFFIX: &str = ".real";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimState {
    /// No binary at all.
    Missing,
    /// The original runtime binary, not wrapped yet.
    Plain,
    /// Shim in place, real binary next to it.
    Installed,
    /// Shim in place but its real binary is gone.
    Orphaned,
}

pub fn real_binary_path(binary: &Path) -> PathBuf {
    let mut name = binary.file_name().unwrap_or_default().to_os_string();
    name.push(REAL_SUFFIX);
    binary.with_file_name(name)
}

pub fn render_shim() -> String {
    format!(
        "#!/bin/sh\n\
         {SHIM_MARKER}\n\
         REAL=\"$(dirname \"$0\")/java{REAL_SUFFIX}\"\n\
         for arg do\n\
         \x20 shift\n\
         \x20 [ \"$arg\" = \"{STRIPPED_FLAG}\" ] && continue\n\
         \x20 set -- \"$@\" \"$arg\"\n\
         done\n\
         exec \"$REAL\" \"$@\"\n"
    )
}

fn is_shim(binary: &Path) -> bool {
    // The shim is a few hundred bytes, anything larger is a real binary.
    match std::fs::read(binary) {
        Ok(bytes) => bytes.len() < 4096 && String::from_utf8_lossy(&bytes).contains(SHIM_MARKER),
        Err(_) => false,
    }
}

pub fn inspect(binary: &Path) -> ShimState {
    if !binary.is_file() {
        return ShimState::Missing;
    }
    if !is_shim(binary) {
        return ShimState::Plain;
    }
    if real_binary_path(binary).is_file() {
        ShimState::Installed
    } else {
        ShimState::Orphaned
    }
}

/// The binary that actually runs Java, shimmed or not.
pub fn effective_binary(binary: &Path) -> Option<PathBuf> {
    match inspect(binary) {
        ShimState::Plain => Some(binary.to_path_buf()),
        ShimState::Installed => Some(real_binary_path(binary)),
        ShimState::Missing | ShimState::Orphaned => None,
    }
}

/// Wrap `binary` with the shim. Returns whether anything changed.
///
/// An orphaned shim is reported as an error and left alone; wrapping it
/// again would move the shim itself to `java.real`.
pub fn install_shim(binary: &Path) -> LauncherResult<bool> {
    match inspect(binary) {
        ShimState::Installed => Ok(false),
        ShimState::Missing => Err(LauncherError::Runtime(format!(
            "runtime binary missing at {}",
            binary.display()
        ))),
        ShimState::Orphaned => {
            warn!("Shim at {:?} lost its real binary", binary);
            Err(LauncherError::Runtime(format!(
                "shim at {} has no real binary",
                binary.display()
            )))
        }
        ShimState::Plain => {
            let real = real_binary_path(binary);
            std::fs::rename(binary, &real).map_err(|source| LauncherError::io(&real, source))?;
            if let Err(e) = write_shim(binary) {
                // Put the original back so the runtime keeps working.
                let _ = std::fs::rename(&real, binary);
                return Err(e);
            }
            info!("Installed runtime shim at {:?}", binary);
            Ok(true)
        }
    }
}

fn write_shim(binary: &Path) -> LauncherResult<()> {
    std::fs::write(binary, render_shim()).map_err(|source| LauncherError::io(binary, source))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(binary, std::fs::Permissions::from_mode(0o755))
            .map_err(|source| LauncherError::io(binary, source))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_binary(dir: &Path) -> PathBuf {
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let java = bin.join("java");
        std::fs::write(&java, b"\x7fELF fake runtime").unwrap();
        java
    }

    #[test]
    fn wraps_once_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let java = fake_binary(tmp.path());

        assert_eq!(inspect(&java), ShimState::Plain);
        assert!(install_shim(&java).unwrap());
        assert_eq!(inspect(&java), ShimState::Installed);
        assert_eq!(effective_binary(&java), Some(real_binary_path(&java)));

        assert!(!install_shim(&java).unwrap());
        assert_eq!(
            std::fs::read(real_binary_path(&java)).unwrap(),
            b"\x7fELF fake runtime"
        );
    }

    #[test]
    fn orphaned_shim_is_never_rewrapped() {
        let tmp = tempfile::tempdir().unwrap();
        let java = fake_binary(tmp.path());
        install_shim(&java).unwrap();
        std::fs::remove_file(real_binary_path(&java)).unwrap();

        assert_eq!(inspect(&java), ShimState::Orphaned);
        assert!(install_shim(&java).is_err());
        assert!(!real_binary_path(&java).exists());
        assert!(effective_binary(&java).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn shim_drops_unsupported_flag() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let java = bin.join("java");
        std::fs::write(&java, "#!/bin/sh\necho \"$@\"\n").unwrap();
        std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755)).unwrap();

        install_shim(&java).unwrap();
        let output = std::process::Command::new(&java)
            .args(["-Xmx2G", STRIPPED_FLAG, "-jar", "a b.jar"])
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&output.stdout).trim(),
            "-Xmx2G -jar a b.jar"
        );
    }
}
