//! Embedded key-value block store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log;
use redb::{Database, TableDefinition};

use super::{check_rows, ensure_scoped, IdGenerator, Store, StoreError, ROW_DELIMITER};

const BLOCKS: TableDefinition<&str, &str> = TableDefinition::new("sort");

fn kv_error<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Kv(err.into())
}

struct BlockDatabase {
    path: PathBuf,
    db: Database,
}

/// Embedded key-value store backed by [`redb`].
///
/// All blocks of a run live in a single table of a database file created on the first write. Clearing the store
/// removes the whole database file, whatever keys are passed.
pub struct KvStore {
    root: PathBuf,
    dir: Option<tempfile::TempDir>,
    database: Option<BlockDatabase>,
    ids: Arc<IdGenerator>,
}

impl KvStore {
    /// Creates a store that keeps its database under `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        KvStore {
            root: root.as_ref().to_path_buf(),
            dir: None,
            database: None,
            ids: Arc::new(IdGenerator::new()),
        }
    }

    /// Sets the generator used for block keys and the database file name.
    pub fn with_id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        return self;
    }

    /// Returns the database file path, if the database was already created.
    pub fn db_path(&self) -> Option<&Path> {
        self.database.as_ref().map(|database| database.path.as_path())
    }

    fn init_database(&mut self, key: &str) -> Result<&Database, StoreError> {
        let database = match self.database.take() {
            Some(database) => database,
            None => {
                fs::create_dir_all(&self.root)?;
                let dir = tempfile::Builder::new().prefix("blocksort-").tempdir_in(&self.root)?;
                let path = dir.path().join(format!("{}.sort.db", key));
                log::debug!("creating block database {}", path.display());

                let db = Database::create(&path).map_err(kv_error)?;
                let txn = db.begin_write().map_err(kv_error)?;
                txn.open_table(BLOCKS).map_err(kv_error)?;
                txn.commit().map_err(kv_error)?;

                self.dir = Some(dir);
                BlockDatabase { path, db }
            }
        };

        return Ok(&self.database.insert(database).db);
    }
}

impl Store for KvStore {
    fn write(&mut self, rows: &[String]) -> Result<String, StoreError> {
        check_rows(rows)?;

        let key = self.ids.next_id();
        let db = self.init_database(&key)?;
        let payload = rows.join(&ROW_DELIMITER.to_string());

        let txn = db.begin_write().map_err(kv_error)?;
        {
            let mut table = txn.open_table(BLOCKS).map_err(kv_error)?;
            table.insert(key.as_str(), payload.as_str()).map_err(kv_error)?;
        }
        txn.commit().map_err(kv_error)?;
        log::debug!("block saved under key {} ({} rows)", key, rows.len());

        return Ok(key);
    }

    fn read(&self, key: &str) -> Result<Vec<String>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let database = self
            .database
            .as_ref()
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;

        let txn = database.db.begin_read().map_err(kv_error)?;
        let table = txn.open_table(BLOCKS).map_err(kv_error)?;
        let payload = table
            .get(key)
            .map_err(kv_error)?
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;

        let rows = payload.value().split(ROW_DELIMITER).map(str::to_string).collect();
        return Ok(rows);
    }

    fn clear(&mut self, keys: &[String]) -> Result<(), StoreError> {
        let BlockDatabase { path, db } = match self.database.take() {
            Some(database) => database,
            None => return Ok(()),
        };
        drop(db);

        if let Some(dir) = &self.dir {
            ensure_scoped(dir.path(), &path)?;
        }
        log::debug!("removing block database {} ({} blocks)", path.display(), keys.len());
        fs::remove_file(&path)?;

        return Ok(());
    }
}
