use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Replace `path` with `bytes` so a dev server reading the output directory
/// never serves a half-written artifact.
///
/// The bytes are staged next to the target and renamed into place. Parent
/// directories are created as needed.
///
/// # Errors
/// Returns an error if staging or the final rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let staged = staging_path(dir, path);
    let staged_ok = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&staged)
        .and_then(|mut f| f.write_all(bytes).and_then(|()| f.sync_all()));
    if let Err(e) = staged_ok {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    let renamed = fs::rename(&staged, path);
    if renamed.is_err() && cfg!(windows) {
        // rename over an existing file fails there
        let copied = fs::copy(&staged, path).map(|_| ());
        let _ = fs::remove_file(&staged);
        return copied;
    }
    if renamed.is_err() {
        let _ = fs::remove_file(&staged);
    }
    renamed
}

fn staging_path(dir: &Path, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "artifact".into(), |n| n.to_string_lossy());
    dir.join(format!(".{name}.packwright-{}", std::process::id()))
}

/// Resolve `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above the root or prefix of an absolute path.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Remove everything inside `dir`, keeping the directory itself.
///
/// Returns the number of files removed. A missing directory is not an error.
///
/// # Errors
/// Returns an error if an entry cannot be removed.
pub fn clear_dir(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
