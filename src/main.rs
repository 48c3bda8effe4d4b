use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use blocksort::{Backend, ExternalSorter, ExternalSorterBuilder};

/// Number of input lines handed to the sorter per source call.
const SOURCE_BATCH: usize = 4096;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let order: Order = arg_parser.value_of_t_or_exit("sort");
    let backend: StoreBackend = arg_parser.value_of_t_or_exit("backend");
    let tmp_dir = arg_parser.value_of("tmp_dir").expect("value has a default");
    let block_size: usize = arg_parser.value_of_t_or_exit("block_size");
    let offset: Option<usize> = arg_parser
        .is_present("offset")
        .then(|| arg_parser.value_of_t_or_exit("offset"));
    let limit: Option<usize> = arg_parser
        .is_present("limit")
        .then(|| arg_parser.value_of_t_or_exit("limit"));
    let rw_buf_size: Option<&str> = arg_parser.value_of("rw_buf_size");

    let input = arg_parser.value_of("input").expect("value is required");
    let input_stream = match fs::File::open(input) {
        Ok(file) => io::BufReader::new(file),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output = arg_parser.value_of("output").expect("value is required");
    let mut output_stream = match fs::File::create(output) {
        Ok(file) => io::BufWriter::new(file),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let mut lines = input_stream.lines();
    let mut write_error: Option<io::Error> = None;

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_source(move || -> io::Result<Vec<String>> {
            let mut batch = Vec::with_capacity(SOURCE_BATCH);
            for line in lines.by_ref().take(SOURCE_BATCH) {
                batch.push(line?);
            }
            Ok(batch)
        })
        .with_target(|line: String| match writeln!(output_stream, "{}", line) {
            Ok(()) => true,
            Err(err) => {
                write_error = Some(err);
                false
            }
        })
        .with_order_by(move |a: &String, b: &String| match order {
            Order::Asc => a < b,
            Order::Desc => a > b,
        })
        .with_block_size(block_size)
        .with_tmp_dir(path::Path::new(tmp_dir))
        .with_backend(match backend {
            StoreBackend::File => Backend::File,
            StoreBackend::Kv => Backend::Kv,
        });

    match (offset, limit) {
        (Some(offset), Some(limit)) => sorter_builder = sorter_builder.with_offset_limit(offset, limit),
        (Some(offset), None) => sorter_builder = sorter_builder.with_offset_limit(offset, usize::MAX),
        (None, Some(limit)) => sorter_builder = sorter_builder.with_limit(limit),
        (None, None) => {}
    }

    if let Some(rw_buf_size) = rw_buf_size {
        let buf_size = rw_buf_size.parse::<ByteSize>().expect("value is pre-validated").as_u64();
        sorter_builder = sorter_builder.with_rw_buf_size(buf_size as usize);
    }

    let mut sorter: ExternalSorter<String, io::Error> = sorter_builder.build();
    let result = sorter.run();
    drop(sorter);

    if let Err(err) = result {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }

    if let Some(err) = write_error {
        log::error!("data saving error: {}", err);
        process::exit(1);
    }

    if let Err(err) = output_stream.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum StoreBackend {
    File,
    Kv,
}

impl StoreBackend {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        StoreBackend::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <StoreBackend as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("blocksort")
        .about("external block sorter")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("sort")
                .short('s')
                .long("sort")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("block_size")
                .short('b')
                .long("block-size")
                .help("maximum number of lines in a block")
                .takes_value(true)
                .default_value("100000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Block size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Block size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store blocks")
                .takes_value(true)
                .default_value("./"),
        )
        .arg(
            clap::Arg::new("backend")
                .short('k')
                .long("backend")
                .help("block storage backend")
                .takes_value(true)
                .default_value("kv")
                .possible_values(StoreBackend::possible_values()),
        )
        .arg(
            clap::Arg::new("offset")
                .long("offset")
                .help("number of sorted lines to skip")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("limit")
                .long("limit")
                .help("maximum number of sorted lines to output")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .long("rw-buf-size")
                .help("block file write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
