//! Cached contact thumbnails, one file per local contact id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    dir: PathBuf,
}

impl ThumbnailStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, local_contact_id: i64) -> PathBuf {
        self.dir.join(format!("{}.img", local_contact_id))
    }

    pub fn exists(&self, local_contact_id: i64) -> bool {
        self.path_for(local_contact_id).is_file()
    }

    /// Write via a temp file and rename so readers never see a partial image.
    pub fn write(&self, local_contact_id: i64, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(local_contact_id);
        let tmp = path.with_extension("img.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Returns true if a file was removed. A missing file is not an error.
    pub fn delete(&self, local_contact_id: i64) -> io::Result<bool> {
        match fs::remove_file(self.path_for(local_contact_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove every cached thumbnail. Returns how many files were deleted.
    pub fn clear(&self) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Cleared {} thumbnail(s) from {}", removed, self.dir.display());
        }
        Ok(removed)
    }
}
