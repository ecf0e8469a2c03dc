use std::fs;
use std::io;
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use bucket_sort::{BucketSorter, BucketSorterBuilder, JsonLinesReader, JsonLinesWriter, SortMode};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let mode = match SortMode::from_flags(arg_parser.is_present("name"), arg_parser.is_present("address")) {
        Ok(mode) => mode,
        Err(err) => {
            log::error!("invalid configuration: {}", err);
            process::exit(1);
        }
    };
    let buffer_size: usize = arg_parser.value_of_t_or_exit("buffer_size");
    let key_length: usize = arg_parser.value_of_t_or_exit("key_length");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let rw_buf_size: Option<ByteSize> = arg_parser
        .is_present("rw_buf_size")
        .then(|| arg_parser.value_of_t_or_exit("rw_buf_size"));
    let strict = arg_parser.is_present("strict");

    let mut sorter_builder = BucketSorterBuilder::new()
        .with_sort_mode(mode)
        .with_buffer_budget(buffer_size)
        .with_initial_key_length(key_length);

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(rw_buf_size) = rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size.as_u64() as usize);
    }

    let sorter: BucketSorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("invalid configuration: {}", err);
            process::exit(1);
        }
    };

    let input = arg_parser.value_of("input").expect("value is required");
    let input_stream = match fs::File::open(input) {
        Ok(file) => JsonLinesReader::new(io::BufReader::new(file)).skip_malformed(!strict),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output = arg_parser.value_of("output").expect("value is required");
    let mut output_stream = match fs::File::create(output) {
        Ok(file) => JsonLinesWriter::new(io::BufWriter::new(file)),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = sorter.sort(input_stream, &mut output_stream) {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }

    if let Err(err) = output_stream.finish() {
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

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("bucket-sort")
        .about("sorts JSON lines name/address records by one of the fields")
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
        .arg(clap::Arg::new("name").long("name").help("sort records by name"))
        .arg(clap::Arg::new("address").long("address").help("sort records by address"))
        .arg(
            clap::Arg::new("buffer_size")
                .short('b')
                .long("buffer-size")
                .help("maximum number of records sorted in memory at once")
                .takes_value(true)
                .default_value("18")
                .validator(|v| match v.parse::<usize>() {
                    Ok(size) if size > 0 => Ok(()),
                    Ok(_) => Err("buffer size must be positive".to_string()),
                    Err(err) => Err(format!("buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("key_length")
                .short('k')
                .long("key-length")
                .help("initial bucket key length")
                .takes_value(true)
                .default_value("2")
                .validator(|v| match v.parse::<usize>() {
                    Ok(length) if length > 0 => Ok(()),
                    Ok(_) => Err("key length must be positive".to_string()),
                    Err(err) => Err(format!("key length format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .long("rw-buf-size")
                .help("bucket file read/write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("strict")
                .long("strict")
                .help("fail on malformed input lines instead of skipping them"),
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
