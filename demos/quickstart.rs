use std::fs;
use std::io;
use std::path;

use env_logger;
use log;

use bucket_sort::{BucketSorter, BucketSorterBuilder, JsonLinesReader, JsonLinesWriter, SortMode};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input_reader = JsonLinesReader::new(io::BufReader::new(fs::File::open("input.jsonl").unwrap()))
        .skip_malformed(true);
    let mut output_writer = JsonLinesWriter::new(io::BufWriter::new(fs::File::create("output.jsonl").unwrap()));

    let sorter: BucketSorter = BucketSorterBuilder::new()
        .with_sort_mode(SortMode::ByAddress)
        .with_buffer_budget(50_000)
        .with_tmp_dir(path::Path::new("./"))
        .build()
        .unwrap();

    let summary = sorter.sort(input_reader, &mut output_writer).unwrap();
    output_writer.finish().unwrap();

    log::info!("{:?}", summary);
}
