use std::io;
use std::path;

use env_logger;
use log;
use serde;

use blocksort::{ExternalSorter, ExternalSorterBuilder};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Log {
    id: u64,
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    // 120 000 ids split into blocks of at most 50 000 records, sorted in descending order
    let mut next_id = 0;
    let mut received = 0;

    let mut sorter: ExternalSorter<Log, io::Error> = ExternalSorterBuilder::new()
        .with_source(|| {
            let batch = Vec::from_iter((next_id + 1..=120_000).take(1_000).map(|id| Log { id }));
            next_id += batch.len() as u64;
            Ok(batch)
        })
        .with_target(|entry| {
            // take the first 100 records only, like `LIMIT 100` decided by the client
            if received >= 100 {
                return false;
            }
            received += 1;
            println!("{}", entry.id);
            true
        })
        .with_order_by(|left, right| left.id > right.id)
        .with_block_size(50_000)
        .with_tmp_dir(path::Path::new("./temp"))
        .build();

    sorter.run().unwrap();
}
