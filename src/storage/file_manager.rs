use std::ffi::OsStr;
use std::fs::{DirEntry, File, OpenOptions};
use std::os::unix::prelude::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Error, Result};
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use tracing::debug;

use crate::common::{FileId, PageNo, PAGE_SIZE};

/// FileManager takes care of reading and writing pages of heap files.
/// It assumes that all heap files are stored inside a single directory, the data directory,
/// where the file id is used as the filename.
pub struct FileManager {
    data_directory: PathBuf,
    file_id_to_handle: DashMap<FileId, FileHandle>,
}

impl FileManager {
    /// Creates a new FileManager.
    ///
    /// # Arguments
    /// * `data_directory` - The directory under which all heap files are stored
    ///
    pub fn new(data_directory: impl Into<PathBuf>) -> Result<Self> {
        let data_directory = data_directory.into();
        if !data_directory.is_dir() {
            return Err(Error::msg(format!(
                "Could not create file manager. {} is not a directory",
                data_directory.display()
            )));
        }

        let file_id_to_handle = DashMap::new();
        let content = data_directory.read_dir().with_context(|| {
            format!(
                "Could not read files in data directory {}",
                data_directory.display()
            )
        })?;

        for entry in content {
            let entry = entry.with_context(|| {
                format!(
                    "Could not read entry in data directory {}",
                    data_directory.display()
                )
            })?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(file_id) = to_file_id(&entry.file_name()) {
                let handle = open_file(entry, file_id)?;
                file_id_to_handle.insert(file_id, handle);
            }
        }
        debug!(
            directory = %data_directory.display(),
            files = file_id_to_handle.len(),
            "opened data directory"
        );

        Ok(Self {
            data_directory,
            file_id_to_handle,
        })
    }

    fn get_handle(&self, file_id: FileId) -> Result<Ref<FileId, FileHandle>> {
        self.file_id_to_handle
            .get(&file_id)
            .ok_or_else(|| Error::msg(format!("No data file with id {}", file_id)))
    }

    /// Returns whether a data file with the given id exists.
    pub fn contains(&self, file_id: FileId) -> bool {
        self.file_id_to_handle.contains_key(&file_id)
    }

    /// Returns how many pages have been allocated for a file.
    /// Returns an error if the file does not exist
    pub fn page_count(&self, file_id: FileId) -> Result<PageNo> {
        let handle = self.get_handle(file_id)?;
        Ok(handle.page_count())
    }

    /// Creates a new, empty data file.
    /// Returns an error if the file already exists.
    pub fn create_file(&self, file_id: FileId) -> Result<()> {
        if self.file_id_to_handle.contains_key(&file_id) {
            return Err(Error::msg(format!(
                "Data file with id {} already exists",
                file_id
            )));
        }
        let path = self.data_directory.join(file_id.to_string());
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("Failed to create data file {}", file_id))?;

        let handle = FileHandle::new(file_id, file, 0);
        self.file_id_to_handle.insert(file_id, handle);

        Ok(())
    }

    /// Deletes a data file together with its pages.
    /// Returns an error if the file does not exist.
    pub fn remove_file(&self, file_id: FileId) -> Result<()> {
        if self.file_id_to_handle.remove(&file_id).is_none() {
            return Err(Error::msg(format!("No data file with id {}", file_id)));
        }
        let path = self.data_directory.join(file_id.to_string());
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove data file {}", file_id))?;
        debug!(file_id, "removed data file");
        Ok(())
    }

    /// Allocates a new page, writes it with initial data and returns the page number of the freshly allocated page.
    pub fn allocate_new_page(&self, file_id: FileId, initial_data: &[u8]) -> Result<PageNo> {
        let handle = self.get_handle(file_id)?;
        handle.allocate_new_page(initial_data)
    }

    /// Reads the specified page of a file into the buffer.
    pub fn read_page(&self, file_id: FileId, page_no: PageNo, buffer: &mut [u8]) -> Result<()> {
        let handle = self.get_handle(file_id)?;
        let page_count = handle.page_count();
        if page_no < 0 || page_no >= page_count {
            return Err(Error::msg(format!("Attempted to read page number {page_no}, but file {file_id} has only {page_count} pages.")));
        }
        handle.read_page_at_offset(page_offset(page_no), buffer)
    }

    /// Writes data to an allocated page of a file. Returns an error if the page hasn't been allocated yet.
    pub fn write_page(&self, file_id: FileId, page_no: PageNo, buffer: &[u8]) -> Result<()> {
        let handle = self.get_handle(file_id)?;
        if page_no < 0 || page_no >= handle.page_count() {
            Err(Error::msg(format!(
                "Attempted to write page {} for file {} before it has been allocated",
                page_no, file_id
            )))
        } else {
            handle.write_page_at_offset(page_offset(page_no), buffer)
        }
    }
}

fn page_offset(page_no: PageNo) -> u64 {
    page_no as u64 * PAGE_SIZE as u64
}

struct FileHandle {
    file_id: FileId,
    file: File,
    filesize: AtomicU64,
}

impl FileHandle {
    fn new(file_id: FileId, file: File, filesize: u64) -> Self {
        Self {
            file_id,
            file,
            filesize: AtomicU64::new(filesize),
        }
    }

    fn filesize(&self) -> u64 {
        self.filesize.load(Ordering::Relaxed)
    }

    fn page_count(&self) -> PageNo {
        (self.filesize() / PAGE_SIZE as u64) as PageNo
    }

    fn allocate_new_page(&self, initial_data: &[u8]) -> Result<PageNo> {
        let offset = self.filesize.fetch_add(PAGE_SIZE as u64, Ordering::Relaxed);
        self.write_page_at_offset(offset, initial_data)?;
        Ok((offset / PAGE_SIZE as u64) as PageNo)
    }

    fn read_page_at_offset(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buffer, offset).with_context(|| {
            format!(
                "Could not read page at offset {} for file {}",
                offset, self.file_id
            )
        })
    }

    fn write_page_at_offset(&self, offset: u64, buffer: &[u8]) -> Result<()> {
        self.file.write_all_at(buffer, offset).with_context(|| {
            format!(
                "Failed to write data at offset {} for file {}",
                offset, self.file_id
            )
        })?;
        self.file.sync_all().with_context(|| {
            format!(
                "Failed to sync data when writing at offset {} for file {}",
                offset, self.file_id
            )
        })
    }
}

/// Returns the file id if the filename is a valid file id, else none.
fn to_file_id(filename: &OsStr) -> Option<FileId> {
    let filename = filename.to_str()?;
    if filename.is_empty() || !filename.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    filename.parse().ok()
}

/// Opens a data file for reading and writing and checks that it consists of whole pages.
fn open_file(entry: DirEntry, file_id: FileId) -> Result<FileHandle> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(entry.path())
        .with_context(|| format!("Could not open data file {}", file_id))?;

    let size = file
        .metadata()
        .with_context(|| format!("Could not read size of data file {}", file_id))?
        .len();

    if size == 0 {
        return Err(Error::msg(format!("Data file {} is empty.", file_id)));
    } else if size % PAGE_SIZE as u64 != 0 {
        return Err(Error::msg(format!(
            "Boundary check for data file {} failed. {} is not divisable by page size {}",
            file_id, size, PAGE_SIZE
        )));
    }

    Ok(FileHandle::new(file_id, file, size))
}
