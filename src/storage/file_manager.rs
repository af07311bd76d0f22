use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::PageId;
use super::error::{StorageError, StorageResult};

/// Handle to an open page file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

/// Reads and writes whole pages of a fixed size
pub struct PagedFileManager {
    /// Bytes per page for every file opened through this manager
    page_size: usize,
    open_files: HashMap<FileHandle, OpenFile>,
    path_to_handle: HashMap<PathBuf, FileHandle>,
    next_handle: usize,
    max_open_files: usize,
}

struct OpenFile {
    file: File,
    path: PathBuf,
}

impl PagedFileManager {
    /// Create a file manager for pages of `page_size` bytes
    pub fn new(page_size: usize) -> Self {
        Self::with_max_files(page_size, 16)
    }

    pub fn with_max_files(page_size: usize, max_open_files: usize) -> Self {
        Self {
            page_size,
            open_files: HashMap::new(),
            path_to_handle: HashMap::new(),
            next_handle: 0,
            max_open_files,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Create a new, empty file (parent directories included)
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> StorageResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(StorageError::FileAlreadyExists(path.display().to_string()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Open an existing file; opening the same path twice returns the same handle
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> StorageResult<FileHandle> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| StorageError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&handle) = self.path_to_handle.get(&path) {
            return Ok(handle);
        }

        if self.open_files.len() >= self.max_open_files {
            return Err(StorageError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;

        self.open_files.insert(
            handle,
            OpenFile {
                file,
                path: path.clone(),
            },
        );
        self.path_to_handle.insert(path, handle);

        Ok(handle)
    }

    pub fn close_file(&mut self, handle: FileHandle) -> StorageResult<()> {
        let entry = self
            .open_files
            .remove(&handle)
            .ok_or(StorageError::InvalidHandle(handle.0))?;

        self.path_to_handle.remove(&entry.path);
        Ok(())
    }

    /// Read one page; bytes past the end of the file read as zero
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &mut [u8],
    ) -> StorageResult<()> {
        self.check_buffer(buffer.len())?;
        let page_size = self.page_size;

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(StorageError::InvalidHandle(handle.0))?;

        entry
            .file
            .seek(SeekFrom::Start((page_id * page_size) as u64))?;

        // read() may return short counts before EOF, so keep reading
        let mut filled = 0;
        while filled < page_size {
            let n = entry.file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer[filled..].fill(0);

        Ok(())
    }

    /// Write one page, growing the file when needed
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &[u8],
    ) -> StorageResult<()> {
        self.check_buffer(buffer.len())?;
        let page_size = self.page_size;

        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(StorageError::InvalidHandle(handle.0))?;

        let offset = (page_id * page_size) as u64;
        let required_size = offset + page_size as u64;
        if entry.file.metadata()?.len() < required_size {
            entry.file.set_len(required_size)?;
        }

        entry.file.seek(SeekFrom::Start(offset))?;
        entry.file.write_all(buffer)?;
        // No sync here; flush_all() on the buffer manager syncs in one go

        Ok(())
    }

    /// Number of (possibly partial) pages in a file
    pub fn page_count(&mut self, handle: FileHandle) -> StorageResult<usize> {
        let entry = self
            .open_files
            .get_mut(&handle)
            .ok_or(StorageError::InvalidHandle(handle.0))?;

        let file_size = entry.file.metadata()?.len();
        Ok(file_size.div_ceil(self.page_size as u64) as usize)
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> StorageResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.open_files.contains_key(&handle)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    fn check_buffer(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size {
            return Err(StorageError::InvalidPageSize {
                expected: self.page_size,
                actual: len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PAGE: usize = 512;

    fn setup() -> (TempDir, PagedFileManager, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pages.mkt");
        let mut manager = PagedFileManager::new(PAGE);
        manager.create_file(&path).unwrap();
        let handle = manager.open_file(&path).unwrap();
        (temp_dir, manager, handle)
    }

    #[test]
    fn test_create_file_already_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pages.mkt");
        let mut manager = PagedFileManager::new(PAGE);

        manager.create_file(&path).unwrap();
        let result = manager.create_file(&path);
        assert!(matches!(result, Err(StorageError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_open_nonexistent_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::new(PAGE);

        let result = manager.open_file(temp_dir.path().join("missing.mkt"));
        assert!(matches!(result, Err(StorageError::FileNotFound(_))));
    }

    #[test]
    fn test_open_same_file_twice() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pages.mkt");
        let mut manager = PagedFileManager::new(PAGE);

        manager.create_file(&path).unwrap();
        let first = manager.open_file(&path).unwrap();
        let second = manager.open_file(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.open_file_count(), 1);

        manager.close_file(first).unwrap();
        assert!(!manager.is_file_open(first));
    }

    #[test]
    fn test_read_write_page() {
        let (_dir, mut manager, handle) = setup();

        let mut page = vec![0u8; PAGE];
        page[0] = 7;
        page[PAGE - 1] = 255;
        manager.write_page(handle, 3, &page).unwrap();

        let mut read_back = vec![0u8; PAGE];
        manager.read_page(handle, 3, &mut read_back).unwrap();
        assert_eq!(read_back, page);
        assert_eq!(manager.page_count(handle).unwrap(), 4);
    }

    #[test]
    fn test_read_past_end_is_zeroed() {
        let (_dir, mut manager, handle) = setup();

        let mut buffer = vec![9u8; PAGE];
        manager.read_page(handle, 40, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_must_match_page_size() {
        let (_dir, mut manager, handle) = setup();

        let mut small = vec![0u8; PAGE - 1];
        let result = manager.read_page(handle, 0, &mut small);
        assert!(matches!(result, Err(StorageError::InvalidPageSize { .. })));

        let large = vec![0u8; PAGE + 1];
        let result = manager.write_page(handle, 0, &large);
        assert!(matches!(
            result,
            Err(StorageError::InvalidPageSize {
                expected: PAGE,
                actual
            }) if actual == PAGE + 1
        ));
    }

    #[test]
    fn test_max_open_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut manager = PagedFileManager::with_max_files(PAGE, 1);

        let a = temp_dir.path().join("a.mkt");
        let b = temp_dir.path().join("b.mkt");
        manager.create_file(&a).unwrap();
        manager.create_file(&b).unwrap();

        manager.open_file(&a).unwrap();
        assert!(matches!(
            manager.open_file(&b),
            Err(StorageError::TooManyOpenFiles)
        ));
    }
}
