//! Linear k-way merger.

use std::error::Error;
use std::marker::PhantomData;

use crate::codec::Codec;
use crate::sort::SortError;
use crate::store::Store;

/// Per-block merge cursor.
struct BlockCursor<T> {
    key: String,
    /// Position of `head` inside the block.
    position: usize,
    head: Option<T>,
    exhausted: bool,
    /// Block rows kept between steps when block caching is enabled.
    rows: Option<Vec<String>>,
}

/// Linear k-way merger implementation.
/// Merges multiple sorted blocks kept in a [`Store`] into a single sorted output.
/// Every step scans the current heads of all live blocks and yields the smallest one, so the time complexity is
/// *m* \* *n* comparisons where *m* is the number of records and *n* is the number of blocks.
///
/// Ties are resolved in favour of the block that comes first in the key list. Since blocks are created in input
/// order and sorted with a stable sort, the merged output is stable as well.
pub struct LinearMerger<'a, T, E, S, C>
where
    E: Error,
    S: Store,
    C: Codec<T>,
{
    store: &'a S,
    codec: &'a C,
    less: &'a dyn Fn(&T, &T) -> bool,
    cursors: Vec<BlockCursor<T>>,
    cache: bool,
    initiated: bool,

    error_type: PhantomData<E>,
}

impl<'a, T, E, S, C> LinearMerger<'a, T, E, S, C>
where
    E: Error,
    S: Store,
    C: Codec<T>,
{
    /// Creates a merger over the blocks stored under `keys`.
    /// Block records should be sorted according to `less` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `store` - Store the blocks are read from
    /// * `codec` - Record codec
    /// * `less` - Comparator the blocks were sorted with
    /// * `keys` - Block keys
    /// * `cache` - Keep block rows in memory between steps instead of re-reading the block on every advance
    pub fn new(
        store: &'a S,
        codec: &'a C,
        less: &'a dyn Fn(&T, &T) -> bool,
        keys: &[String],
        cache: bool,
    ) -> Self {
        let cursors = keys
            .iter()
            .map(|key| BlockCursor {
                key: key.clone(),
                position: 0,
                head: None,
                exhausted: false,
                rows: None,
            })
            .collect();

        return LinearMerger {
            store,
            codec,
            less,
            cursors,
            cache,
            initiated: false,
            error_type: PhantomData,
        };
    }

    fn load_head(&mut self, idx: usize) -> Result<(), SortError<E>> {
        let cursor = &mut self.cursors[idx];

        if cursor.rows.is_none() {
            cursor.rows = Some(self.store.read(&cursor.key).map_err(SortError::StoreRead)?);
        }

        cursor.head = match cursor.rows.as_ref().and_then(|rows| rows.get(cursor.position)) {
            Some(token) => Some(self.codec.decode(token).map_err(SortError::Codec)?),
            None => None,
        };
        cursor.exhausted = cursor.head.is_none();

        if !self.cache || cursor.exhausted {
            cursor.rows = None;
        }

        return Ok(());
    }

    fn select(&self) -> Option<usize> {
        let mut best: Option<(usize, &T)> = None;

        for (idx, cursor) in self.cursors.iter().enumerate() {
            let head = match &cursor.head {
                Some(head) if !cursor.exhausted => head,
                _ => continue,
            };
            match best {
                Some((_, best_head)) if !(self.less)(head, best_head) => {}
                _ => best = Some((idx, head)),
            }
        }

        best.map(|(idx, _)| idx)
    }

    fn try_next(&mut self) -> Result<Option<T>, SortError<E>> {
        if !self.initiated {
            for idx in 0..self.cursors.len() {
                self.load_head(idx)?;
            }
            self.initiated = true;
        }

        let idx = match self.select() {
            Some(idx) => idx,
            None => return Ok(None),
        };

        let cursor = &mut self.cursors[idx];
        let record = cursor.head.take();
        cursor.position += 1;
        self.load_head(idx)?;

        return Ok(record);
    }
}

impl<'a, T, E, S, C> Iterator for LinearMerger<'a, T, E, S, C>
where
    E: Error,
    S: Store,
    C: Codec<T>,
{
    type Item = Result<T, SortError<E>>;

    /// Returns the next record of the merged output.
    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}
