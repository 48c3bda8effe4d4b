//! In-memory block store.

use std::collections::HashMap;
use std::sync::Arc;

use super::{IdGenerator, Store, StoreError};

/// Store keeping blocks in a hash map. Useful when the data set is known to fit in memory but the caller still
/// wants block-wise sorting, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    blocks: HashMap<String, Vec<String>>,
    ids: Arc<IdGenerator>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Sets the generator used for block keys.
    pub fn with_id_generator(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        return self;
    }

    /// Returns the number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Store for MemoryStore {
    fn write(&mut self, rows: &[String]) -> Result<String, StoreError> {
        if rows.is_empty() {
            return Err(StoreError::EmptyRows);
        }

        let key = self.ids.next_id();
        self.blocks.insert(key.clone(), rows.to_vec());

        return Ok(key);
    }

    fn read(&self, key: &str) -> Result<Vec<String>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }

        self.blocks
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))
    }

    fn clear(&mut self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.blocks.remove(key);
        }

        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use super::MemoryStore;
    use crate::store::{Store, StoreError};

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        assert!(matches!(store.write(&[]), Err(StoreError::EmptyRows)));

        let rows = vec!["x\ny".to_string(), "z".to_string()];
        let key = store.write(&rows).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.read(&key).unwrap(), rows);

        store.clear(&[key.clone()]).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.read(&key), Err(StoreError::UnknownKey(_))));
    }
}
