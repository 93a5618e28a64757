//! Relocation of per-run trace directories handed over by the peer.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

/// Move `source` to `destination`, copying then removing when a rename is
/// not possible (e.g. across filesystems).
pub fn relocate_directory(source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(source, destination) {
        Ok(()) => {
            debug!(from = %source.display(), to = %destination.display(), "directory renamed");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, from = %source.display(), "rename failed, copying");
            copy_recursive(source, destination)?;
            fs::remove_dir_all(source)
        }
    }
}

fn copy_recursive(source: &Path, destination: &Path) -> io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocate_moves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("trace");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("nested/log.txt"), b"hit").unwrap();

        let destination = dir.path().join("out/run-1");
        relocate_directory(&source, &destination).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(destination.join("nested/log.txt")).unwrap(), b"hit");
    }

    #[test]
    fn test_copy_recursive_preserves_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("x"), b"1").unwrap();
        copy_recursive(&source, &dir.path().join("b")).unwrap();
        assert_eq!(fs::read(dir.path().join("b/x")).unwrap(), b"1");
        assert!(source.exists());
    }
}
