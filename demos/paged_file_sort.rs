use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use blocksort::{Backend, ExternalSorter, ExternalSorterBuilder};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mut lines = io::BufReader::new(fs::File::open("input.txt").unwrap()).lines();
    let mut output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());

    // third page of 50 lines, blocks saved as plain files
    let mut sorter: ExternalSorter<String, io::Error> = ExternalSorterBuilder::new()
        .with_source(|| lines.by_ref().take(1_000).collect::<io::Result<Vec<String>>>())
        .with_target(|line| output_writer.write_all(format!("{}\n", line).as_bytes()).is_ok())
        .with_order_by(|a, b| a < b)
        .with_offset_limit(100, 50)
        .with_block_size(1_000_000)
        .with_backend(Backend::File)
        .with_rw_buf_size(64 * 1024)
        .with_tmp_dir(path::Path::new("./"))
        .build();

    sorter.run().unwrap();
    drop(sorter);

    output_writer.flush().unwrap();
}
