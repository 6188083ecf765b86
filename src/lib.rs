pub mod cli;
pub mod coerce;
pub mod convert;
pub mod data;
pub mod error;
pub mod io_utils;
pub mod merge;
pub mod parquet_io;
pub mod resolver;
pub mod rows;
pub mod schema;
pub mod schema_cmd;
pub mod stats;
pub mod storage;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging(debug: bool) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if debug {
            builder.filter_module("csv_to_parquet", LevelFilter::Debug);
        } else if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_to_parquet", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Convert(args) => {
            init_logging(args.debug);
            convert::execute(&args)
        }
        Commands::Schema(args) => {
            init_logging(false);
            schema_cmd::execute(&args)
        }
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
