//! Filesystem primitives shared by staging, sync, resume and snapshots.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use walkdir::WalkDir;

/// Sibling path used for write-then-rename: `.name.<tag>.<pid>.<micros>`.
fn scratch_sibling(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    path.with_file_name(format!(".{name}.{tag}.{pid}.{ts}"))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))
}

/// Write `bytes` to a temp sibling, fsync, then rename over `path`.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = scratch_sibling(path, "tmp");
    let mut file = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("renaming into {}", path.display()));
    }
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write_bytes(path, &bytes)
}

/// Copy one file so readers of `dst` never see a half-written file.
/// Symlinked sources are dereferenced.
pub fn copy_file_atomic(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    let tmp = scratch_sibling(dst, "tmp");
    if let Err(e) = fs::copy(src, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("copying {}", src.display()));
    }
    if let Err(e) = fs::rename(&tmp, dst) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("renaming into {}", dst.display()));
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, dereferencing symlinks. Existing files
/// in `dst` are overwritten, other entries are left alone. Dangling links are
/// skipped; link cycles are an error.
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    ensure_dir(dst)?;
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.loop_ancestor().is_some() => {
                anyhow::bail!("symlink cycle under {}: {e}", src.display());
            }
            Err(e) => {
                if let Some(path) = e.path()
                    && fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
                    && fs::metadata(path).is_err()
                {
                    tracing::warn!(path = %path.display(), "skipping dangling symlink");
                    continue;
                }
                return Err(e).with_context(|| format!("walking {}", src.display()));
            }
        };
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
                fs::remove_file(&target)?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {}", entry.path().display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Replace `dst` with a copy of `src`. The copy lands in a `.partial`
/// sibling first; the previous `dst` is renamed aside to a `.retired`
/// sibling, the copy renamed in, and only then is the old tree deleted.
/// At no point is the previous content gone before the new one is in place.
pub fn replace_tree(src: &Path, dst: &Path) -> Result<usize> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    let partial = scratch_sibling(dst, "partial");
    let copied = match copy_tree(src, &partial) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_dir_all(&partial);
            return Err(e);
        }
    };

    let retired = scratch_sibling(dst, "retired");
    let had_previous = match fs::symlink_metadata(dst) {
        Ok(_) => {
            if let Err(e) = fs::rename(dst, &retired) {
                let _ = fs::remove_dir_all(&partial);
                return Err(e).with_context(|| format!("moving aside {}", dst.display()));
            }
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            let _ = fs::remove_dir_all(&partial);
            return Err(e).with_context(|| format!("inspecting {}", dst.display()));
        }
    };

    if let Err(e) = fs::rename(&partial, dst) {
        if had_previous {
            let _ = fs::rename(&retired, dst);
        }
        let _ = fs::remove_dir_all(&partial);
        return Err(e).with_context(|| format!("swapping in {}", dst.display()));
    }
    if had_previous && let Err(e) = remove_path(&retired) {
        tracing::warn!(path = %retired.display(), error = %e, "could not delete replaced tree");
    }
    Ok(copied)
}

/// Remove a file, symlink or directory tree. Missing paths are fine.
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).with_context(|| format!("removing {}", path.display()))
        }
        Ok(_) => fs::remove_file(path).with_context(|| format!("removing {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("inspecting {}", path.display())),
    }
}

/// Whether `path` is a directory with at least one entry.
pub fn is_nonempty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}

/// `chmod -R a+rX`: everyone may read, and traverse directories.
#[cfg(unix)]
pub fn relax_permissions(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if entry.path_is_symlink() {
            continue;
        }
        let meta = entry.metadata()?;
        let mode = meta.permissions().mode();
        let wanted = if meta.is_dir() || mode & 0o111 != 0 {
            mode | 0o555
        } else {
            mode | 0o444
        };
        if wanted != mode {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(wanted))
                .with_context(|| format!("chmod {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn relax_permissions(_root: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        atomic_write_bytes(&path, b"{}").unwrap();
        atomic_write_bytes(&path, b"{\"v\": 2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\": 2}");
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn copy_tree_overlays_existing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/f.txt"), "new").unwrap();
        fs::create_dir_all(dst.join("a/b")).unwrap();
        fs::write(dst.join("a/b/f.txt"), "old").unwrap();
        fs::write(dst.join("keep.txt"), "kept").unwrap();

        assert_eq!(copy_tree(&src, &dst).unwrap(), 1);
        assert_eq!(fs::read_to_string(dst.join("a/b/f.txt")).unwrap(), "new");
        assert!(dst.join("keep.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_dereferences_links() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        fs::create_dir_all(&shared).unwrap();
        fs::write(shared.join("lib.py"), "x = 1").unwrap();

        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink(&shared, src.join("vendored")).unwrap();
        std::os::unix::fs::symlink(src.join("gone"), src.join("dangling")).unwrap();

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        let copied = dst.join("vendored/lib.py");
        assert!(!fs::symlink_metadata(dst.join("vendored")).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(copied).unwrap(), "x = 1");
        assert!(!dst.join("dangling").exists());
    }

    #[test]
    fn replace_tree_swaps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("one.txt"), "1").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("stale.txt"), "old").unwrap();

        replace_tree(&src, &dst).unwrap();
        assert!(dst.join("one.txt").exists());
        assert!(!dst.join("stale.txt").exists());
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().contains("partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn replace_tree_retires_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/train.py"), "v2").unwrap();
        let dst = dir.path().join("experiment_codebase");
        fs::write(&dst, "a file where a tree belongs").unwrap();

        replace_tree(&src, &dst).unwrap();
        fs::write(src.join("nested/train.py"), "v3").unwrap();
        replace_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("nested/train.py")).unwrap(), "v3");
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "unexpected siblings: {names:?}");
    }

    #[test]
    fn replace_tree_failure_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("prev.txt"), "prev").unwrap();

        assert!(replace_tree(&dir.path().join("missing"), &dst).is_err());
        assert_eq!(fs::read_to_string(dst.join("prev.txt")).unwrap(), "prev");
    }

    #[test]
    fn nonempty_dir_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_nonempty_dir(dir.path()));
        assert!(!is_nonempty_dir(&dir.path().join("nope")));
        fs::write(dir.path().join("x"), "").unwrap();
        assert!(is_nonempty_dir(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn relax_permissions_adds_read_bits() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("secret.json");
        fs::write(&f, "{}").unwrap();
        fs::set_permissions(&f, fs::Permissions::from_mode(0o600)).unwrap();
        relax_permissions(dir.path()).unwrap();
        let mode = fs::metadata(&f).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
