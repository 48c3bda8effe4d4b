use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use blocksort::{Codec, CodecError, ExternalSorter, ExternalSorterBuilder};

#[derive(Debug)]
struct CsvParseError(String);

impl Display for CsvParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "row format error: {}", self.0)
    }
}

impl Error for CsvParseError {}

#[derive(Debug, PartialEq, Eq)]
struct Person {
    name: String,
    surname: String,
    age: u8,
}

impl Person {
    fn as_csv(&self) -> String {
        format!("{},{},{}", self.name, self.surname, self.age)
    }

    fn from_str(s: &str) -> Result<Self, CsvParseError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            Err(CsvParseError("wrong columns number".to_string()))
        } else {
            Ok(Person {
                name: parts[0].to_string(),
                surname: parts[1].to_string(),
                age: parts[2]
                    .parse()
                    .map_err(|err| CsvParseError(format!("age field format error: {}", err)))?,
            })
        }
    }
}

/// Stores people as plain csv rows instead of MessagePack + base64.
#[derive(Default)]
struct CsvCodec;

impl Codec<Person> for CsvCodec {
    fn encode(&self, record: &Person) -> Result<String, CodecError> {
        Ok(record.as_csv())
    }

    fn decode(&self, token: &str) -> Result<Person, CodecError> {
        Person::from_str(token).map_err(|err| CodecError::Decode(Box::new(err)))
    }
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mut lines = io::BufReader::new(fs::File::open("input.csv").unwrap()).lines();
    let mut output_writer = io::BufWriter::new(fs::File::create("output.csv").unwrap());

    let mut sorter: ExternalSorter<Person, io::Error, CsvCodec> = ExternalSorterBuilder::new()
        .with_source(|| -> io::Result<Vec<Person>> {
            let mut batch = Vec::new();
            for line in lines.by_ref().take(10_000) {
                let person = Person::from_str(&line?).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                batch.push(person);
            }
            Ok(batch)
        })
        .with_target(|person: Person| {
            output_writer
                .write_all(format!("{}\n", person.as_csv()).as_bytes())
                .is_ok()
        })
        .with_order_by(|a: &Person, b: &Person| (&a.surname, &a.name, a.age) < (&b.surname, &b.name, b.age))
        .with_block_size(1_000_000)
        .with_tmp_dir(path::Path::new("./"))
        .with_codec(CsvCodec)
        .build();

    sorter.run().unwrap();
    drop(sorter);

    output_writer.flush().unwrap();
}
