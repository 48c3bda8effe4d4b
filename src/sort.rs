//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::block::{BlockBuilder, Blocks};
use crate::codec::{Codec, CodecError, RmpBase64Codec};
use crate::merger::LinearMerger;
use crate::page::{Admission, Page, Paginator};
use crate::store::{FileStore, KvStore, Store, StoreError};

/// Default maximum number of records in a block.
pub const DEFAULT_BLOCK_SIZE: usize = 100_000;

type Source<'a, T, E> = Box<dyn FnMut() -> Result<Vec<T>, E> + 'a>;
type Target<'a, T> = Box<dyn FnMut(T) -> bool + 'a>;
type Less<'a, T> = Box<dyn Fn(&T, &T) -> bool + 'a>;

/// Sorter configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    MissingSource,
    MissingTarget,
    MissingComparator,
    ZeroBlockSize,
    EmptyRoot,
    /// The sorter was already run once.
    AlreadyRun,
}

impl Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConfigError::MissingSource => write!(f, "source is not set"),
            ConfigError::MissingTarget => write!(f, "target is not set"),
            ConfigError::MissingComparator => write!(f, "comparator is not set"),
            ConfigError::ZeroBlockSize => write!(f, "block size must be positive"),
            ConfigError::EmptyRoot => write!(f, "storage root path is empty"),
            ConfigError::AlreadyRun => write!(f, "sorter can not run repeatedly"),
        }
    }
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError<E: Error> {
    /// Sorter is misconfigured or was already run.
    Config(ConfigError),
    /// Input data source error.
    Source(E),
    /// Record encoding or decoding error.
    Codec(CodecError),
    /// Block persisting error.
    StoreWrite(StoreError),
    /// Block reading error.
    StoreRead(StoreError),
    /// Block storage cleanup error.
    StoreClear(StoreError),
}

impl<E> Error for SortError<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::Config(err) => err,
            SortError::Source(err) => err,
            SortError::Codec(err) => err,
            SortError::StoreWrite(err) => err,
            SortError::StoreRead(err) => err,
            SortError::StoreClear(err) => err,
        })
    }
}

impl<E: Error> Display for SortError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(err) => write!(f, "sorter configuration error: {}", err),
            SortError::Source(err) => write!(f, "input data source error: {}", err),
            SortError::Codec(err) => write!(f, "record codec error: {}", err),
            SortError::StoreWrite(err) => write!(f, "block write failed: {}", err),
            SortError::StoreRead(err) => write!(f, "block read failed: {}", err),
            SortError::StoreClear(err) => write!(f, "block cleanup failed: {}", err),
        }
    }
}

/// Block storage backend used by [`ExternalSorter::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// One file per block, see [`FileStore`].
    File,
    /// Embedded key-value database, see [`KvStore`].
    Kv,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Kv
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
pub struct ExternalSorterBuilder<'a, T, E, C = RmpBase64Codec>
where
    E: Error,
{
    /// Input batches provider, an empty batch ends the input.
    source: Option<Source<'a, T, E>>,
    /// Sorted records receiver, returns `false` to stop the output.
    target: Option<Target<'a, T>>,
    /// Strict weak ordering of the records.
    less: Option<Less<'a, T>>,
    /// Output window.
    page: Option<Page>,
    /// Maximum number of records in a block.
    block_size: usize,
    /// Directory to be used to store blocks.
    tmp_dir: Option<PathBuf>,
    /// Block storage backend.
    backend: Backend,
    /// Block file write buffer size.
    rw_buf_size: Option<usize>,
    /// Keep block rows in memory during the merge.
    block_cache: bool,
    /// Record codec.
    codec: C,
}

impl<'a, T, E> ExternalSorterBuilder<'a, T, E>
where
    E: Error,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }
}

impl<'a, T, E, C> ExternalSorterBuilder<'a, T, E, C>
where
    E: Error,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    /// The configuration is validated when the sorter is run.
    pub fn build(self) -> ExternalSorter<'a, T, E, C> {
        ExternalSorter {
            source: self.source,
            target: self.target,
            less: self.less,
            page: self.page,
            block_size: self.block_size,
            tmp_dir: self.tmp_dir,
            backend: self.backend,
            rw_buf_size: self.rw_buf_size,
            block_cache: self.block_cache,
            codec: self.codec,
            executed: false,
        }
    }

    /// Sets the input source. The sorter keeps calling it until it returns an empty batch or an error.
    pub fn with_source<F>(mut self, source: F) -> ExternalSorterBuilder<'a, T, E, C>
    where
        F: FnMut() -> Result<Vec<T>, E> + 'a,
    {
        self.source = Some(Box::new(source));
        return self;
    }

    /// Sets the output target. It receives sorted records one by one and may return `false` to stop the output.
    pub fn with_target<F>(mut self, target: F) -> ExternalSorterBuilder<'a, T, E, C>
    where
        F: FnMut(T) -> bool + 'a,
    {
        self.target = Some(Box::new(target));
        return self;
    }

    /// Sets the ordering. `less(a, b)` must return `true` if `a` goes before `b`,
    /// for example `|a, b| a.id > b.id` sorts by id in descending order.
    pub fn with_order_by<F>(mut self, less: F) -> ExternalSorterBuilder<'a, T, E, C>
    where
        F: Fn(&T, &T) -> bool + 'a,
    {
        self.less = Some(Box::new(less));
        return self;
    }

    /// Limits the output to the first `size` records.
    pub fn with_limit(self, size: usize) -> ExternalSorterBuilder<'a, T, E, C> {
        self.with_page(Page::first(size))
    }

    /// Skips `offset` records and limits the output to the next `size` records.
    pub fn with_offset_limit(self, offset: usize, size: usize) -> ExternalSorterBuilder<'a, T, E, C> {
        self.with_page(Page::new(offset, size))
    }

    /// Sets the output window.
    pub fn with_page(mut self, page: Page) -> ExternalSorterBuilder<'a, T, E, C> {
        self.page = Some(page);
        return self;
    }

    /// Sets the maximum number of records in a block.
    pub fn with_block_size(mut self, block_size: usize) -> ExternalSorterBuilder<'a, T, E, C> {
        self.block_size = block_size;
        return self;
    }

    /// Sets directory to be used to store blocks.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<'a, T, E, C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets block storage backend.
    pub fn with_backend(mut self, backend: Backend) -> ExternalSorterBuilder<'a, T, E, C> {
        self.backend = backend;
        return self;
    }

    /// Sets block file write buffer size (file backend only).
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<'a, T, E, C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Keeps block rows in memory during the merge instead of re-reading a block each time its cursor advances.
    pub fn with_block_cache(mut self, block_cache: bool) -> ExternalSorterBuilder<'a, T, E, C> {
        self.block_cache = block_cache;
        return self;
    }

    /// Sets record codec.
    pub fn with_codec<D: Codec<T>>(self, codec: D) -> ExternalSorterBuilder<'a, T, E, D> {
        ExternalSorterBuilder {
            source: self.source,
            target: self.target,
            less: self.less,
            page: self.page,
            block_size: self.block_size,
            tmp_dir: self.tmp_dir,
            backend: self.backend,
            rw_buf_size: self.rw_buf_size,
            block_cache: self.block_cache,
            codec,
        }
    }
}

impl<'a, T, E, C> Default for ExternalSorterBuilder<'a, T, E, C>
where
    E: Error,
    C: Default,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            source: None,
            target: None,
            less: None,
            page: None,
            block_size: DEFAULT_BLOCK_SIZE,
            tmp_dir: None,
            backend: Backend::default(),
            rw_buf_size: None,
            block_cache: false,
            codec: C::default(),
        }
    }
}

/// External sorter.
///
/// Pulls records from the source, splits them into sorted blocks persisted in a [`Store`], merges the blocks and
/// pushes the sorted records to the target. A sorter runs only once.
pub struct ExternalSorter<'a, T, E, C = RmpBase64Codec>
where
    E: Error,
{
    source: Option<Source<'a, T, E>>,
    target: Option<Target<'a, T>>,
    less: Option<Less<'a, T>>,
    page: Option<Page>,
    block_size: usize,
    tmp_dir: Option<PathBuf>,
    backend: Backend,
    rw_buf_size: Option<usize>,
    block_cache: bool,
    codec: C,
    /// Set once the sorter started running.
    executed: bool,
}

impl<'a, T, E, C> ExternalSorter<'a, T, E, C>
where
    E: Error,
    C: Codec<T>,
{
    /// Sorts the source data into the target using the configured storage backend.
    /// Blocks are kept in a private directory inside the tmp dir which is removed when the run ends.
    pub fn run(&mut self) -> Result<(), SortError<E>> {
        self.validate()?;
        let root = match self.tmp_dir.as_deref() {
            Some(root) if !root.as_os_str().is_empty() => root.to_path_buf(),
            _ => return Err(SortError::Config(ConfigError::EmptyRoot)),
        };
        self.acquire()?;

        log::info!("using {} as a storage root ({:?} backend)", root.display(), self.backend);

        match self.backend {
            Backend::File => {
                let mut store = FileStore::new(&root);
                if let Some(buf_size) = self.rw_buf_size {
                    store = store.with_rw_buf_size(buf_size);
                }
                self.execute(&mut store)
            }
            Backend::Kv => {
                let mut store = KvStore::new(&root);
                self.execute(&mut store)
            }
        }
    }

    /// Sorts the source data into the target using a custom store.
    /// Every block written during the run is cleared from the store when the run ends.
    pub fn run_with_store<S: Store>(&mut self, store: &mut S) -> Result<(), SortError<E>> {
        self.validate()?;
        self.acquire()?;

        self.execute(store)
    }

    fn validate(&self) -> Result<(), SortError<E>> {
        let error = if self.source.is_none() {
            ConfigError::MissingSource
        } else if self.target.is_none() {
            ConfigError::MissingTarget
        } else if self.less.is_none() {
            ConfigError::MissingComparator
        } else if self.block_size == 0 {
            ConfigError::ZeroBlockSize
        } else {
            return Ok(());
        };

        Err(SortError::Config(error))
    }

    fn acquire(&mut self) -> Result<(), SortError<E>> {
        if self.executed {
            return Err(SortError::Config(ConfigError::AlreadyRun));
        }
        self.executed = true;

        return Ok(());
    }

    fn execute<S: Store>(&mut self, store: &mut S) -> Result<(), SortError<E>> {
        let ExternalSorter {
            source,
            target,
            less,
            page,
            block_size,
            block_cache,
            codec,
            ..
        } = self;

        let source = source
            .as_deref_mut()
            .ok_or(SortError::Config(ConfigError::MissingSource))?;
        let target = target
            .as_deref_mut()
            .ok_or(SortError::Config(ConfigError::MissingTarget))?;
        let less = less
            .as_deref()
            .ok_or(SortError::Config(ConfigError::MissingComparator))?;

        let mut keys = Vec::new();
        let builder = BlockBuilder::new(&mut *store, &*codec, less, &mut keys, *block_size);

        let result = match ingest(source, builder) {
            Ok(Blocks::InMemory(records)) => drain(records.into_iter().map(Ok), *page, target),
            Ok(Blocks::Stored) => {
                log::debug!("merging {} blocks", keys.len());
                let merger = LinearMerger::<T, E, S, C>::new(&*store, &*codec, less, &keys, *block_cache);
                drain(merger, *page, target)
            }
            Err(err) => Err(err),
        };

        log::debug!("clearing {} blocks", keys.len());
        let cleared = store.clear(&keys);

        match (result, cleared) {
            (Ok(emitted), Ok(())) => {
                log::info!("external sort done ({} records emitted)", emitted);
                Ok(())
            }
            (Ok(_), Err(err)) => Err(SortError::StoreClear(err)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(clear_err)) => {
                log::warn!("block cleanup failed after an earlier error: {}", clear_err);
                Err(err)
            }
        }
    }
}

fn ingest<T, E, S, C, F>(source: &mut F, mut builder: BlockBuilder<'_, T, S, C>) -> Result<Blocks<T>, SortError<E>>
where
    E: Error,
    S: Store,
    C: Codec<T>,
    F: FnMut() -> Result<Vec<T>, E> + ?Sized,
{
    loop {
        let rows = source().map_err(SortError::Source)?;
        if rows.is_empty() {
            break;
        }
        for row in rows {
            builder.push(row)?;
        }
    }

    builder.finish()
}

fn drain<T, E, I, F>(records: I, page: Option<Page>, target: &mut F) -> Result<usize, SortError<E>>
where
    E: Error,
    I: IntoIterator<Item = Result<T, SortError<E>>>,
    F: FnMut(T) -> bool + ?Sized,
{
    let mut paginator = Paginator::new(page);
    let mut records = records.into_iter();

    while !paginator.is_exhausted() {
        let record = match records.next() {
            Some(record) => record?,
            None => break,
        };

        match paginator.admit() {
            Admission::Skip => continue,
            Admission::Stop => break,
            Admission::Emit => {}
        }

        if !target(record) {
            log::debug!("output stopped by the target after {} records", paginator.emitted());
            break;
        }
    }

    Ok(paginator.emitted())
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::fs;
    use std::io;
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{Backend, ConfigError, ExternalSorter, ExternalSorterBuilder, SortError};
    use crate::codec::{Codec, CodecError, RmpBase64Codec};
    use crate::page::Page;
    use crate::store::{MemoryStore, Store, StoreError};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn desc(a: &i32, b: &i32) -> bool {
        a > b
    }

    fn asc(a: &i32, b: &i32) -> bool {
        a < b
    }

    fn sort_with(
        input: &[i32],
        less: fn(&i32, &i32) -> bool,
        block_size: usize,
        page: Option<Page>,
        backend: Backend,
        block_cache: bool,
        root: &Path,
    ) -> Result<Vec<i32>, SortError<io::Error>> {
        let mut batches = input.chunks(3).map(<[i32]>::to_vec);
        let mut output = Vec::new();

        let mut builder = ExternalSorterBuilder::new()
            .with_source(move || Ok(batches.next().unwrap_or_default()))
            .with_target(|item: i32| {
                output.push(item);
                true
            })
            .with_order_by(less)
            .with_block_size(block_size)
            .with_tmp_dir(root)
            .with_backend(backend)
            .with_block_cache(block_cache);
        if let Some(page) = page {
            builder = builder.with_page(page);
        }

        let mut sorter: ExternalSorter<i32, io::Error> = builder.build();
        sorter.run()?;
        drop(sorter);

        Ok(output)
    }

    /// Store recording how it is used.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: usize,
        clears: usize,
        fail_clear: bool,
    }

    impl Store for CountingStore {
        fn write(&mut self, rows: &[String]) -> Result<String, StoreError> {
            self.writes += 1;
            self.inner.write(rows)
        }

        fn read(&self, key: &str) -> Result<Vec<String>, StoreError> {
            self.inner.read(key)
        }

        fn clear(&mut self, keys: &[String]) -> Result<(), StoreError> {
            self.clears += 1;
            self.inner.clear(keys)?;
            if self.fail_clear {
                return Err(StoreError::IO(io::Error::new(io::ErrorKind::Other, "cleanup failed")));
            }
            Ok(())
        }
    }

    #[rstest]
    fn test_external_sorter(
        tmp_dir: tempfile::TempDir,
        #[values(false, true)] reversed: bool,
        #[values(Backend::File, Backend::Kv)] backend: Backend,
        #[values(false, true)] block_cache: bool,
    ) {
        let input_sorted = 0..100;

        let mut input_shuffled = Vec::from_iter(input_sorted.clone());
        input_shuffled.shuffle(&mut rand::thread_rng());

        let less: fn(&i32, &i32) -> bool = if reversed { desc } else { asc };
        let actual_result = sort_with(&input_shuffled, less, 8, None, backend, block_cache, tmp_dir.path()).unwrap();

        let expected_result = if reversed {
            Vec::from_iter(input_sorted.clone().rev())
        } else {
            Vec::from_iter(input_sorted.clone())
        };

        assert_eq!(actual_result, expected_result);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    #[case(None, vec![5, 4, 3, 2, 1])]
    #[case(Some(Page::first(2)), vec![5, 4])]
    #[case(Some(Page::new(2, 2)), vec![3, 2])]
    #[case(Some(Page::new(4, 10)), vec![1])]
    #[case(Some(Page::new(10, 2)), vec![])]
    #[case(Some(Page::first(0)), vec![])]
    fn test_external_sorter_page(
        tmp_dir: tempfile::TempDir,
        #[case] page: Option<Page>,
        #[case] expected_result: Vec<i32>,
        #[values(Backend::File, Backend::Kv)] backend: Backend,
        #[values(1, 2, 5)] block_size: usize,
    ) {
        let actual_result = sort_with(&[5, 3, 1, 4, 2], desc, block_size, page, backend, false, tmp_dir.path()).unwrap();

        assert_eq!(actual_result, expected_result);
    }

    #[rstest]
    fn test_external_sorter_parent_dir_root(
        tmp_dir: tempfile::TempDir,
        #[values(Backend::File, Backend::Kv)] backend: Backend,
    ) {
        fs::create_dir(tmp_dir.path().join("work")).unwrap();
        let root = tmp_dir.path().join("work/../scratch");

        let actual_result = sort_with(&[5, 3, 1, 4, 2], desc, 2, None, backend, false, &root).unwrap();

        assert_eq!(actual_result, vec![5, 4, 3, 2, 1]);
        assert_eq!(fs::read_dir(tmp_dir.path().join("scratch")).unwrap().count(), 0);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_external_sorter_stability(tmp_dir: tempfile::TempDir, #[case] reversed: bool) {
        let input_sorted = (0..20).flat_map(|x| (0..5).map(move |y| (x, y)));

        let mut input_shuffled = Vec::from_iter(input_sorted.clone());
        input_shuffled.shuffle(&mut rand::thread_rng());
        // sort input by the second field to check sorting stability
        input_shuffled.sort_by(|a: &(i32, i32), b: &(i32, i32)| {
            if reversed {
                a.1.cmp(&b.1).reverse()
            } else {
                a.1.cmp(&b.1)
            }
        });

        let mut batches = input_shuffled.chunks(7).map(<[(i32, i32)]>::to_vec);
        let mut actual_result = Vec::new();

        let mut sorter: ExternalSorter<(i32, i32), io::Error> = ExternalSorterBuilder::new()
            .with_source(move || Ok(batches.next().unwrap_or_default()))
            .with_target(|item| {
                actual_result.push(item);
                true
            })
            .with_order_by(move |a: &(i32, i32), b: &(i32, i32)| if reversed { a.0 > b.0 } else { a.0 < b.0 })
            .with_block_size(8)
            .with_tmp_dir(tmp_dir.path())
            .build();
        sorter.run().unwrap();
        drop(sorter);

        let expected_result = if reversed {
            Vec::from_iter(input_sorted.clone().rev())
        } else {
            Vec::from_iter(input_sorted.clone())
        };

        assert_eq!(actual_result, expected_result)
    }

    #[rstest]
    #[case(vec![], 4, 0)]
    #[case(vec![3, 1, 2], 4, 0)]
    #[case(vec![3, 1, 2, 4], 4, 0)]
    #[case(vec![3, 1, 2, 4, 0], 4, 2)]
    fn test_external_sorter_small_input(#[case] input: Vec<i32>, #[case] block_size: usize, #[case] writes: usize) {
        let mut store = CountingStore::default();
        let mut batches = vec![input.clone()].into_iter();
        let mut actual_result = Vec::new();

        let mut sorter: ExternalSorter<i32, io::Error> = ExternalSorterBuilder::new()
            .with_source(move || Ok(batches.next().unwrap_or_default()))
            .with_target(|item| {
                actual_result.push(item);
                true
            })
            .with_order_by(asc)
            .with_block_size(block_size)
            .build();
        sorter.run_with_store(&mut store).unwrap();
        drop(sorter);

        let mut expected_result = input;
        expected_result.sort();

        assert_eq!(actual_result, expected_result);
        assert_eq!(store.writes, writes);
        assert_eq!(store.clears, 1);
        assert!(store.inner.is_empty());
    }

    #[rstest]
    fn test_external_sorter_early_stop(tmp_dir: tempfile::TempDir, #[values(4, 100)] block_size: usize) {
        let mut batches = vec![Vec::from_iter(0..50)].into_iter();
        let mut actual_result = Vec::new();

        let mut sorter: ExternalSorter<i32, io::Error> = ExternalSorterBuilder::new()
            .with_source(move || Ok(batches.next().unwrap_or_default()))
            .with_target(|item| {
                actual_result.push(item);
                false
            })
            .with_order_by(desc)
            .with_block_size(block_size)
            .with_tmp_dir(tmp_dir.path())
            .build();
        sorter.run().unwrap();
        drop(sorter);

        assert_eq!(actual_result, vec![49]);
    }

    #[rstest]
    fn test_external_sorter_source_error(
        tmp_dir: tempfile::TempDir,
        #[values(Backend::File, Backend::Kv)] backend: Backend,
    ) {
        let mut calls = 0;
        let emitted = Cell::new(0);

        let mut sorter: ExternalSorter<i32, io::Error> = ExternalSorterBuilder::new()
            .with_source(|| {
                calls += 1;
                if calls > 3 {
                    Err(io::Error::new(io::ErrorKind::Other, "broken source"))
                } else {
                    Ok(vec![calls, calls + 10, calls + 20])
                }
            })
            .with_target(|_| {
                emitted.set(emitted.get() + 1);
                true
            })
            .with_order_by(asc)
            .with_block_size(2)
            .with_tmp_dir(tmp_dir.path())
            .with_backend(backend)
            .build();

        let result = sorter.run();

        assert!(matches!(result, Err(SortError::Source(_))), "result={:?}", result);
        assert_eq!(emitted.get(), 0);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_external_sorter_run_once() {
        let calls = Cell::new(0);
        let mut store = MemoryStore::new();

        let mut sorter: ExternalSorter<i32, io::Error> = ExternalSorterBuilder::new()
            .with_source(|| {
                calls.set(calls.get() + 1);
                Ok(vec![])
            })
            .with_target(|_| true)
            .with_order_by(asc)
            .build();

        sorter.run_with_store(&mut store).unwrap();
        assert_eq!(calls.get(), 1);

        let result = sorter.run_with_store(&mut store);
        assert!(matches!(result, Err(SortError::Config(ConfigError::AlreadyRun))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_external_sorter_config() {
        fn config_error(sorter: &mut ExternalSorter<i32, io::Error>) -> Option<ConfigError> {
            match sorter.run() {
                Err(SortError::Config(err)) => Some(err),
                _ => None,
            }
        }

        let mut sorter = ExternalSorterBuilder::new()
            .with_target(|_| true)
            .with_order_by(asc)
            .with_tmp_dir(Path::new("./"))
            .build();
        assert_eq!(config_error(&mut sorter), Some(ConfigError::MissingSource));

        let mut sorter = ExternalSorterBuilder::new()
            .with_source(|| Ok(vec![]))
            .with_order_by(asc)
            .with_tmp_dir(Path::new("./"))
            .build();
        assert_eq!(config_error(&mut sorter), Some(ConfigError::MissingTarget));

        let mut sorter = ExternalSorterBuilder::new()
            .with_source(|| Ok(vec![]))
            .with_target(|_| true)
            .with_tmp_dir(Path::new("./"))
            .build();
        assert_eq!(config_error(&mut sorter), Some(ConfigError::MissingComparator));

        let mut sorter = ExternalSorterBuilder::new()
            .with_source(|| Ok(vec![]))
            .with_target(|_| true)
            .with_order_by(asc)
            .with_block_size(0)
            .with_tmp_dir(Path::new("./"))
            .build();
        assert_eq!(config_error(&mut sorter), Some(ConfigError::ZeroBlockSize));

        let mut sorter = ExternalSorterBuilder::new()
            .with_source(|| Ok(vec![]))
            .with_target(|_| true)
            .with_order_by(asc)
            .build();
        assert_eq!(config_error(&mut sorter), Some(ConfigError::EmptyRoot));

        let mut sorter = ExternalSorterBuilder::new()
            .with_source(|| Ok(vec![]))
            .with_target(|_| true)
            .with_order_by(asc)
            .with_tmp_dir(Path::new(""))
            .build();
        assert_eq!(config_error(&mut sorter), Some(ConfigError::EmptyRoot));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_external_sorter_clear_error(#[case] broken_source: bool) {
        let mut store = CountingStore {
            fail_clear: true,
            ..CountingStore::default()
        };
        let mut batches = vec![vec![4, 3, 2, 1]].into_iter();

        let mut sorter: ExternalSorter<i32, io::Error> = ExternalSorterBuilder::new()
            .with_source(move || match batches.next() {
                Some(batch) => Ok(batch),
                None if broken_source => Err(io::Error::new(io::ErrorKind::Other, "broken source")),
                None => Ok(vec![]),
            })
            .with_target(|_| true)
            .with_order_by(asc)
            .with_block_size(2)
            .build();

        let result = sorter.run_with_store(&mut store);

        if broken_source {
            assert!(matches!(result, Err(SortError::Source(_))), "result={:?}", result);
        } else {
            assert!(matches!(result, Err(SortError::StoreClear(_))), "result={:?}", result);
        }
        assert_eq!(store.clears, 1);
        assert!(store.inner.is_empty());
    }

    /// Store whose reads start failing after a number of successful ones.
    struct FlakyStore {
        inner: MemoryStore,
        reads_left: Cell<usize>,
        clears: usize,
    }

    impl Store for FlakyStore {
        fn write(&mut self, rows: &[String]) -> Result<String, StoreError> {
            self.inner.write(rows)
        }

        fn read(&self, key: &str) -> Result<Vec<String>, StoreError> {
            match self.reads_left.get() {
                0 => Err(StoreError::IO(io::Error::new(io::ErrorKind::Other, "disk is gone"))),
                left => {
                    self.reads_left.set(left - 1);
                    self.inner.read(key)
                }
            }
        }

        fn clear(&mut self, keys: &[String]) -> Result<(), StoreError> {
            self.clears += 1;
            self.inner.clear(keys)
        }
    }

    #[rstest]
    #[case(0, vec![])]
    #[case(3, vec![])]
    #[case(4, vec![5])]
    fn test_external_sorter_merge_error(#[case] reads: usize, #[case] expected_result: Vec<i32>) {
        let mut store = FlakyStore {
            inner: MemoryStore::new(),
            reads_left: Cell::new(reads),
            clears: 0,
        };
        let mut batches = vec![vec![5, 3, 1, 4, 2]].into_iter();
        let mut actual_result = Vec::new();

        let mut sorter: ExternalSorter<i32, io::Error> = ExternalSorterBuilder::new()
            .with_source(move || Ok(batches.next().unwrap_or_default()))
            .with_target(|item| {
                actual_result.push(item);
                true
            })
            .with_order_by(desc)
            .with_block_size(2)
            .build();

        let result = sorter.run_with_store(&mut store);
        drop(sorter);

        assert!(matches!(result, Err(SortError::StoreRead(_))), "result={:?}", result);
        assert_eq!(actual_result, expected_result);
        assert_eq!(store.clears, 1);
        assert!(store.inner.is_empty());
    }

    struct UnluckyCodec;

    impl Codec<i32> for UnluckyCodec {
        fn encode(&self, record: &i32) -> Result<String, CodecError> {
            if *record == 13 {
                return Err(CodecError::Encode("unlucky record".into()));
            }
            RmpBase64Codec.encode(record)
        }

        fn decode(&self, token: &str) -> Result<i32, CodecError> {
            RmpBase64Codec.decode(token)
        }
    }

    #[rstest]
    #[case(vec![1, 2, 3, 4], Ok(vec![1, 2, 3, 4]))]
    #[case(vec![1, 13, 3, 4], Err(()))]
    fn test_external_sorter_custom_codec(#[case] input: Vec<i32>, #[case] expected_result: Result<Vec<i32>, ()>) {
        let mut store = MemoryStore::new();
        let mut batches = vec![input].into_iter();
        let mut actual_result = Vec::new();

        let mut sorter: ExternalSorter<i32, io::Error, UnluckyCodec> = ExternalSorterBuilder::new()
            .with_source(move || Ok(batches.next().unwrap_or_default()))
            .with_target(|item| {
                actual_result.push(item);
                true
            })
            .with_order_by(asc)
            .with_block_size(1)
            .with_codec(UnluckyCodec)
            .build();
        let result = sorter.run_with_store(&mut store);
        drop(sorter);

        match expected_result {
            Ok(expected_result) => {
                assert!(result.is_ok());
                assert_eq!(actual_result, expected_result);
            }
            Err(()) => {
                assert!(matches!(result, Err(SortError::Codec(_))));
                assert!(actual_result.is_empty());
            }
        }
        assert!(store.is_empty());
    }
}
