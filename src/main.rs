//Enable more cargo lint tests
#![warn(rust_2018_idioms)]
use std::time::Instant;

use bwzip::compression::compress::compress;
use bwzip::compression::decompress::decompress;
use bwzip::tools::cli::{bwopts_init, Mode};

use log::{error, info, LevelFilter};
use simplelog::{Config, TermLogger, TerminalMode};

fn main() -> Result<(), std::io::Error> {
    // Available log levels are Error, Warn, Info, Debug, Trace
    TermLogger::init(
        LevelFilter::Trace,
        Config::default(),
        TerminalMode::Stdout,
        simplelog::ColorChoice::AlwaysAnsi,
    )
    .unwrap();

    let options = bwopts_init();
    if options.files.is_empty() {
        error!("No input files given.");
        return Ok(());
    }

    let timer = Instant::now();
    let result = match options.op_mode {
        Mode::Zip => compress(&options),
        Mode::Unzip => decompress(&options),
    };
    info!("{} took {:?}", options.op_mode, timer.elapsed());

    info!("Done.\n");
    result
}
