//! Offline maintenance run from the command line instead of serving requests.

use std::{fs, io, path::Path};

use tracing::info;

use crate::{error::StoreError, store};

/// Removes stale lock artifacts next to `db_path`. Returns how many were removed.
pub fn force_unlock(db_path: &Path) -> Result<usize, StoreError> {
    let removed = store::clear_lock_artifacts(db_path)?;
    if removed.is_empty() {
        info!(path = %db_path.display(), "no lock files found");
    }
    Ok(removed.len())
}

/// Copies every regular file of `data_dir` into `backup_dir`, then deletes them
/// from `data_dir`. Returns the number of files reset.
pub fn reset_data(data_dir: &Path, backup_dir: &Path) -> io::Result<usize> {
    if !data_dir.exists() {
        info!(path = %data_dir.display(), "data directory absent, nothing to reset");
        return Ok(0);
    }

    fs::create_dir_all(backup_dir)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), backup_dir.join(entry.file_name()))?;
            files.push(entry.path());
        }
    }
    info!(backup = %backup_dir.display(), files = files.len(), "data backed up");

    for file in &files {
        fs::remove_file(file)?;
    }
    info!(path = %data_dir.display(), "data reset");
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_backs_up_then_empties_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        let backup = root.path().join("backup");
        fs::create_dir_all(data.join("nested")).unwrap();
        fs::write(data.join("todoapp.db"), b"db").unwrap();
        fs::write(data.join("todoapp.db.lock"), b"123").unwrap();

        let reset = reset_data(&data, &backup).unwrap();

        assert_eq!(reset, 2);
        assert_eq!(fs::read(backup.join("todoapp.db")).unwrap(), b"db");
        assert!(backup.join("todoapp.db.lock").exists());
        assert!(!data.join("todoapp.db").exists());
        assert!(data.join("nested").exists());
    }

    #[test]
    fn reset_without_data_dir_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let reset = reset_data(&root.path().join("data"), &root.path().join("backup")).unwrap();
        assert_eq!(reset, 0);
        assert!(!root.path().join("backup").exists());
    }

    #[test]
    fn force_unlock_removes_both_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let db = root.path().join("todoapp.db");
        fs::write(root.path().join("todoapp.db.lock"), b"1").unwrap();
        fs::write(root.path().join("todoapp.db.lock.tmp"), b"1").unwrap();

        assert_eq!(force_unlock(&db).unwrap(), 2);
        assert_eq!(force_unlock(&db).unwrap(), 0);
    }
}
