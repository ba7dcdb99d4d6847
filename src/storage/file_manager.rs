use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::prelude::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::common::{FileId, PageNo, PAGE_SIZE};
use crate::error::DbError;

/// FileManager owns the open handle of every registered heap file and moves
/// whole pages between disk and memory. Files are addressed by the FileId
/// assigned at registration; a page address is always (file id, page no).
#[derive(Debug)]
pub struct FileManager {
    next_file_id: AtomicU32,
    files: RwLock<HashMap<FileId, FileHandle>>,
}

impl FileManager {
    pub fn new() -> Self {
        Self {
            next_file_id: AtomicU32::new(1),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Opens (or creates) the backing file at `path` and returns its id.
    pub fn register(&self, path: impl AsRef<Path>) -> Result<FileId> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("could not open heap file {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("could not read size of {}", path.display()))?
            .len();
        if size % PAGE_SIZE as u64 != 0 {
            return Err(DbError::MalformedData(format!(
                "{} is {} bytes, not a multiple of the page size",
                path.display(),
                size
            ))
            .into());
        }

        let file_id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        let handle = FileHandle {
            path,
            file,
            size: AtomicU64::new(size),
        };
        self.files.write().insert(file_id, handle);
        Ok(file_id)
    }

    pub fn num_pages(&self, file_id: FileId) -> Result<PageNo> {
        self.with_file(file_id, |handle| {
            Ok((handle.size.load(Ordering::Relaxed) / PAGE_SIZE as u64) as PageNo)
        })
    }

    /// Reads one page into the buffer. Reading at or past the end of the
    /// file is an error; pages come into existence only via `write_page`.
    pub fn read_page(&self, file_id: FileId, page_no: PageNo, buffer: &mut [u8]) -> Result<()> {
        self.with_file(file_id, |handle| {
            let offset = page_no as u64 * PAGE_SIZE as u64;
            if offset >= handle.size.load(Ordering::Relaxed) {
                return Err(DbError::TupleNotFound(format!(
                    "page {} not found in {}",
                    page_no,
                    handle.path.display()
                ))
                .into());
            }
            handle.file.read_exact_at(buffer, offset).with_context(|| {
                format!("could not read page {} of {}", page_no, handle.path.display())
            })?;
            Ok(())
        })
    }

    /// Writes one page and syncs it. Writing the page just past the current
    /// end extends the file by one page.
    pub fn write_page(&self, file_id: FileId, page_no: PageNo, buffer: &[u8]) -> Result<()> {
        self.with_file(file_id, |handle| {
            let offset = page_no as u64 * PAGE_SIZE as u64;
            handle.file.write_all_at(buffer, offset).with_context(|| {
                format!(
                    "could not write page {} of {}",
                    page_no,
                    handle.path.display()
                )
            })?;
            handle.file.sync_all().with_context(|| {
                format!("could not sync {} after writing", handle.path.display())
            })?;
            handle
                .size
                .fetch_max(offset + PAGE_SIZE as u64, Ordering::Relaxed);
            Ok(())
        })
    }

    fn with_file<T>(&self, file_id: FileId, f: impl FnOnce(&FileHandle) -> Result<T>) -> Result<T> {
        let files = self.files.read();
        let handle = files.get(&file_id).ok_or_else(|| {
            DbError::NoSuchTable(format!("no heap file registered with id {}", file_id))
        })?;
        f(handle)
    }
}

#[derive(Debug)]
struct FileHandle {
    path: PathBuf,
    file: std::fs::File,
    size: AtomicU64,
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{FileManager, PAGE_SIZE};
    use crate::error::DbError;

    #[test]
    fn pages_round_trip() {
        let data_dir = tempdir().unwrap();
        let file_manager = FileManager::new();
        let file_id = file_manager
            .register(data_dir.path().join("people.dat"))
            .unwrap();

        assert_eq!(file_manager.num_pages(file_id).unwrap(), 0);

        let page: [u8; PAGE_SIZE] = rand::random();
        file_manager.write_page(file_id, 0, &page).unwrap();
        assert_eq!(file_manager.num_pages(file_id).unwrap(), 1);

        let mut read_back = [0u8; PAGE_SIZE];
        file_manager.read_page(file_id, 0, &mut read_back).unwrap();
        assert_eq!(page, read_back);
    }

    #[test]
    fn writing_past_the_end_extends_the_file() {
        let data_dir = tempdir().unwrap();
        let file_manager = FileManager::new();
        let file_id = file_manager
            .register(data_dir.path().join("people.dat"))
            .unwrap();

        let page = [7u8; PAGE_SIZE];
        file_manager.write_page(file_id, 2, &page).unwrap();
        assert_eq!(file_manager.num_pages(file_id).unwrap(), 3);
    }

    #[test]
    fn reading_a_missing_page_fails() {
        let data_dir = tempdir().unwrap();
        let file_manager = FileManager::new();
        let file_id = file_manager
            .register(data_dir.path().join("people.dat"))
            .unwrap();

        let mut buffer = [0u8; PAGE_SIZE];
        let err = file_manager.read_page(file_id, 0, &mut buffer).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::TupleNotFound(_))
        ));
    }

    #[test]
    fn reopening_an_existing_file_keeps_its_pages() {
        let data_dir = tempdir().unwrap();
        let path = data_dir.path().join("people.dat");

        let page = [3u8; PAGE_SIZE];
        {
            let file_manager = FileManager::new();
            let file_id = file_manager.register(&path).unwrap();
            file_manager.write_page(file_id, 0, &page).unwrap();
        }

        let file_manager = FileManager::new();
        let file_id = file_manager.register(&path).unwrap();
        assert_eq!(file_manager.num_pages(file_id).unwrap(), 1);
        let mut read_back = [0u8; PAGE_SIZE];
        file_manager.read_page(file_id, 0, &mut read_back).unwrap();
        assert_eq!(page, read_back);
    }
}
