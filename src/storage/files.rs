use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Component, Path},
};

use anyhow::{Context, Result, anyhow};
use uuid::Uuid;

#[cfg(not(unix))]
use log::warn;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// Writes (or replaces) a file readable only by the current user.
///
/// Content goes to a hidden sibling first and is renamed over `path`, so
/// readers see either the old or the new file.
pub fn write_secure_file(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    let staging = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4()
    ));
    let written = write_staging(&staging, content)
        .and_then(|()| {
            fs::rename(&staging, path)
                .with_context(|| format!("failed to replace {}", path.display()))
        });
    if written.is_err() {
        let _ = fs::remove_file(&staging);
    }
    written
}

fn write_staging(path: &Path, content: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    ensure_permissions(path)
}

fn ensure_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let desired = fs::Permissions::from_mode(0o600);
        let metadata = fs::metadata(path)?;
        let current = metadata.permissions();
        if current.mode() & 0o777 != 0o600 {
            fs::set_permissions(path, desired).with_context(|| {
                format!(
                    "failed to set restrictive permissions on {}",
                    path.display()
                )
            })?;
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(err) = fs::metadata(path) {
            warn!(
                "[store] unable to confirm permissions for {}: {}",
                path.display(),
                err
            );
        }
    }
    Ok(())
}

/// Rejects names that would escape the parent folder.
pub fn validate_folder_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("folder name cannot be empty"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(anyhow!("folder name must be a single path segment")),
    }
}

/// Replaces characters that are awkward in file names.
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '*' => '_',
            '/' | '\\' | ':' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect()
}
