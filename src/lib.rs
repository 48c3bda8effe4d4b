//! `blocksort` is a rust external sort implementation with paginated streaming output.
//!
//! External sorting handles data sets that do not fit into the main memory (RAM). Sorting is achieved in two
//! passes. During the first pass records pulled from a source are split into blocks of bounded size, every block
//! is sorted in memory and persisted in a block store. During the second pass the sorted blocks are merged
//! together and the records are pushed to a target in order. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `blocksort` supports the following features:
//!
//! * **Data agnostic:**
//!   it supports all data types that implement `serde` serialization/deserialization by default,
//!   otherwise you can implement your own [`Codec`].
//! * **Pluggable storage:**
//!   blocks are kept in an embedded key-value database ([`KvStore`]) or in plain files ([`FileStore`]), any type
//!   implementing [`Store`] can be used as well.
//! * **Pagination:**
//!   the output can be limited to a window of sorted records (`LIMIT offset, size`), and the target can stop
//!   the output at any moment.
//! * **Small input fast path:**
//!   input that fits in a single block is sorted in memory without touching the storage.
//!
//! # Example
//!
//! ```no_run
//! use std::io;
//! use std::path;
//!
//! use blocksort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let mut next = 0;
//!     let mut sorter: ExternalSorter<u64, io::Error> = ExternalSorterBuilder::new()
//!         .with_source(|| {
//!             let batch = Vec::from_iter((next..1_000_000).take(10_000).map(|n| n * 7919 % 1_000_000));
//!             next += batch.len() as u64;
//!             Ok(batch)
//!         })
//!         .with_target(|n| {
//!             println!("{}", n);
//!             true
//!         })
//!         .with_order_by(|a, b| a < b)
//!         .with_offset_limit(100, 20)
//!         .with_block_size(50_000)
//!         .with_tmp_dir(path::Path::new("./"))
//!         .build();
//!
//!     sorter.run().unwrap();
//! }
//! ```

pub mod block;
pub mod buffer;
pub mod codec;
pub mod merger;
pub mod page;
pub mod sort;
pub mod store;

pub use block::{BlockBuilder, Blocks};
pub use buffer::LimitedBuffer;
pub use codec::{Codec, CodecError, RmpBase64Codec};
pub use merger::LinearMerger;
pub use page::{Admission, Page, Paginator};
pub use sort::{Backend, ConfigError, ExternalSorter, ExternalSorterBuilder, SortError};
pub use store::{FileStore, IdGenerator, KvStore, MemoryStore, Store, StoreError};
