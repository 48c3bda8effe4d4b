//! File system block store.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log;
use tempfile;

use super::{check_rows, ensure_scoped, IdGenerator, Store, StoreError, ROW_DELIMITER};

/// File system store. Every block is saved to its own file, one row per line.
///
/// Files are created in a private directory inside the root. The directory is created on the first write
/// and removed when the store is dropped.
pub struct FileStore {
    root: PathBuf,
    dir: Option<tempfile::TempDir>,
    ids: Arc<IdGenerator>,
    rw_buf_size: Option<usize>,
}

impl FileStore {
    /// Creates a store that keeps its files under `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        FileStore {
            root: root.as_ref().to_path_buf(),
            dir: None,
            ids: Arc::new(IdGenerator::new()),
            rw_buf_size: None,
        }
    }

    /// Sets the generator used to name block files.
    pub fn with_id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        return self;
    }

    /// Sets block file write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> Self {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Returns the private directory blocks are written to, if it was already created.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(|dir| dir.path())
    }

    fn init_dir(&mut self) -> Result<&Path, StoreError> {
        let dir = match self.dir.take() {
            Some(dir) => dir,
            None => {
                fs::create_dir_all(&self.root)?;
                let dir = tempfile::Builder::new().prefix("blocksort-").tempdir_in(&self.root)?;
                log::debug!("using {} as a block directory", dir.path().display());
                dir
            }
        };

        return Ok(self.dir.insert(dir).path());
    }

    fn scoped_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let dir = self.dir().ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;
        let path = PathBuf::from(key);
        ensure_scoped(dir, &path)?;

        return Ok(path);
    }
}

impl Store for FileStore {
    fn write(&mut self, rows: &[String]) -> Result<String, StoreError> {
        check_rows(rows)?;

        let file_name = format!("{}.sort", self.ids.next_id());
        let rw_buf_size = self.rw_buf_size;
        let dir = self.init_dir()?;
        let path = dir.join(&file_name);
        let tmp_path = dir.join(format!("{}.tmp", file_name));

        let key = path
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| {
                let message = format!("block path {} is not valid unicode", path.display());
                StoreError::IO(io::Error::new(io::ErrorKind::InvalidInput, message))
            })?;

        let tmp_file = fs::File::create(&tmp_path)?;
        let mut block_writer = match rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file),
            None => io::BufWriter::new(tmp_file),
        };

        for row in rows {
            block_writer.write_all(row.as_bytes())?;
            block_writer.write_all(&[ROW_DELIMITER as u8])?;
        }
        block_writer.flush()?;
        drop(block_writer);

        fs::rename(&tmp_path, &path)?;
        log::debug!("block saved to {} ({} rows)", path.display(), rows.len());

        return Ok(key);
    }

    fn read(&self, key: &str) -> Result<Vec<String>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let path = self.scoped_path(key)?;

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(StoreError::UnknownKey(key.to_string())),
            Err(err) => return Err(StoreError::IO(err)),
        };

        let rows = content.strip_suffix(ROW_DELIMITER).unwrap_or(&content);
        return Ok(rows.split(ROW_DELIMITER).map(str::to_string).collect());
    }

    fn clear(&mut self, keys: &[String]) -> Result<(), StoreError> {
        let mut first_error = None;

        for key in keys {
            let removed = self
                .scoped_path(key)
                .and_then(|path| fs::remove_file(&path).map_err(StoreError::IO));
            if let Err(err) = removed {
                log::warn!("block {} not removed: {}", key, err);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
