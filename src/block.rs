//! Block builder.

use std::error::Error;

use log;

use crate::buffer::LimitedBuffer;
use crate::codec::Codec;
use crate::sort::SortError;
use crate::store::Store;

/// Result of the input phase.
#[derive(Debug, PartialEq)]
pub enum Blocks<T> {
    /// The whole input fit in a single block, it was sorted in memory and never persisted.
    InMemory(Vec<T>),
    /// Blocks were persisted, their keys are in the key list given to the builder.
    Stored,
}

/// Accumulates records into bounded blocks, sorts each block in memory and persists it through a [`Store`].
pub struct BlockBuilder<'a, T, S, C>
where
    S: Store,
    C: Codec<T>,
{
    store: &'a mut S,
    codec: &'a C,
    less: &'a dyn Fn(&T, &T) -> bool,
    keys: &'a mut Vec<String>,
    buffer: LimitedBuffer<T>,
    records: usize,
}

impl<'a, T, S, C> BlockBuilder<'a, T, S, C>
where
    S: Store,
    C: Codec<T>,
{
    /// Creates a block builder.
    ///
    /// # Arguments
    /// * `store` - Store the full blocks are written to
    /// * `codec` - Record codec
    /// * `less` - Comparator blocks are sorted with
    /// * `keys` - Key list every persisted block key is appended to
    /// * `block_size` - Maximum number of records in a block
    pub fn new(
        store: &'a mut S,
        codec: &'a C,
        less: &'a dyn Fn(&T, &T) -> bool,
        keys: &'a mut Vec<String>,
        block_size: usize,
    ) -> Self {
        BlockBuilder {
            store,
            codec,
            less,
            keys,
            buffer: LimitedBuffer::new(block_size),
            records: 0,
        }
    }

    /// Adds a record to the open block. The open block is flushed first if the record does not fit in it.
    pub fn push<E: Error>(&mut self, record: T) -> Result<(), SortError<E>> {
        if self.buffer.is_full() {
            self.flush()?;
        }
        self.buffer.push(record);
        self.records += 1;

        return Ok(());
    }

    /// Closes the input. The last block stays in memory if no block was persisted before.
    pub fn finish<E: Error>(mut self) -> Result<Blocks<T>, SortError<E>> {
        if self.keys.is_empty() {
            log::debug!("input fits in a single block ({} records), sorting in memory", self.records);
            return Ok(Blocks::InMemory(self.buffer.take_sorted(self.less)));
        }

        if !self.buffer.is_empty() {
            self.flush()?;
        }
        log::debug!("input split into {} blocks ({} records)", self.keys.len(), self.records);

        return Ok(Blocks::Stored);
    }

    fn flush<E: Error>(&mut self) -> Result<(), SortError<E>> {
        log::debug!("sorting block data ...");
        let block = self.buffer.take_sorted(self.less);

        let rows = block
            .iter()
            .map(|record| self.codec.encode(record))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SortError::Codec)?;

        log::debug!("saving block data");
        let key = self.store.write(&rows).map_err(SortError::StoreWrite)?;
        self.keys.push(key);

        return Ok(());
    }
}
