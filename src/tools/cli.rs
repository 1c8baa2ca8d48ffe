use std::process::exit;
use std::{fmt::Display, fmt::Formatter};

/// Verbosity of user information
#[derive(Debug)]
pub enum Verbosity {
    Quiet,
    Errors,
    Warnings,
    Info,
    Debug,
    Trace,
}

/// Zip, Unzip
#[derive(Debug)]
pub enum Mode {
    Zip,
    Unzip,
}
impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
pub struct BwOpts {
    /// Maximum input block size to process during each loop, in bytes
    pub block_size: usize,
    /// Vec of names of files to read for input
    pub files: Vec<String>,
    /// Silently overwrite existing files with the same name
    pub force_overwrite: bool,
    /// Don't remove input files after processing
    pub keep_input_files: bool,
    /// Compress/Decompress
    pub op_mode: Mode,
    /// Transform chain applied to each block, names joined with '+'
    pub transform: String,
    /// Worker threads available to one block
    pub jobs: usize,
    /// Verbosity of user information
    pub verbose: Verbosity,
}

impl BwOpts {
    pub fn new() -> Self {
        Self {
            block_size: 9 * 1024 * 1024,
            files: vec![],
            force_overwrite: false,
            keep_input_files: false,
            op_mode: Mode::Zip,
            transform: "BWT".to_string(),
            jobs: 4,
            verbose: Verbosity::Errors,
        }
    }
}

impl Default for BwOpts {
    fn default() -> Self {
        Self::new()
    }
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn bwopts_init() -> BwOpts {
    let mut cli = BwOpts::new();
    {
        let descr = "bwzip, a block-sorting file compressor.";
        println!("{}  Rust version {}", descr, VERSION);
    }

    let args = std::env::args().skip(1);
    for mut arg in args {
        if arg.starts_with("--") {
            if let Some(chain) = arg.strip_prefix("--transform=") {
                cli.transform = chain.to_uppercase();
                continue;
            }
            if let Some(jobs) = arg.strip_prefix("--jobs=") {
                cli.jobs = jobs.parse().unwrap_or(1).max(1);
                continue;
            }
            match arg.as_str() {
                "--help" => help(),
                "--decompress" => cli.op_mode = Mode::Unzip,
                "--compress" => cli.op_mode = Mode::Zip,
                "--keep" => cli.keep_input_files = true,
                "--force" => cli.force_overwrite = true,
                "--quiet" => cli.verbose = Verbosity::Quiet,
                "--verbose" => cli.verbose = Verbosity::Errors,
                "--version" => version(),
                "--fast" => cli.block_size = 1024 * 1024,
                "--best" => cli.block_size = 9 * 1024 * 1024,
                other => eprintln!("Unexpected command line argument: {}", other),
            }
        } else if arg.starts_with('-') {
            arg.remove(0);
            while !arg.is_empty() {
                // Count the v's to set the verbosity, then drop them all
                if arg.starts_with('v') {
                    let vs = arg.chars().take_while(|&c| c == 'v').count();
                    cli.verbose = match vs {
                        1 => Verbosity::Errors,
                        2 => Verbosity::Warnings,
                        3 => Verbosity::Info,
                        4 => Verbosity::Debug,
                        _ => Verbosity::Trace,
                    };
                    for _ in 0..vs {
                        arg.remove(0);
                    }
                    continue;
                }
                let c = arg.remove(0);
                match c {
                    'h' => help(),
                    'd' => cli.op_mode = Mode::Unzip,
                    'z' => cli.op_mode = Mode::Zip,
                    'k' => cli.keep_input_files = true,
                    'f' => cli.force_overwrite = true,
                    'q' => cli.verbose = Verbosity::Quiet,
                    'V' => version(),
                    '1'..='9' => cli.block_size = (c as usize - '0' as usize) * 1024 * 1024,
                    _ => {
                        eprintln!("Unexpected command line argument: {}", c);
                        help()
                    }
                }
            }
        } else {
            cli.files.push(arg);
        };
    }

    // Set the log level
    match cli.verbose {
        Verbosity::Quiet => log::set_max_level(log::LevelFilter::Off),
        Verbosity::Errors => log::set_max_level(log::LevelFilter::Error),
        Verbosity::Warnings => log::set_max_level(log::LevelFilter::Warn),
        Verbosity::Info => log::set_max_level(log::LevelFilter::Info),
        Verbosity::Debug => log::set_max_level(log::LevelFilter::Debug),
        Verbosity::Trace => log::set_max_level(log::LevelFilter::Trace),
    };
    cli
}

/// Prints help information
fn help() {
    println!(
        "
   usage: bwzip [flags and input files in any order]

   -h --help           print this message
   -d --decompress     force decompression
   -z --compress       force compression
   -k --keep           keep (don't delete) input files
   -f --force          overwrite existing output files
   -q --quiet          suppress noncritical error messages
   -v --verbose        be verbose (a 2nd -v gives more)
   -V --version        display software version
   -1 .. -9            set block size to 1m .. 9m
   --fast              alias for -1
   --best              alias for -9
   --transform=CHAIN   transform chain, e.g. BWT, ROLZ, ROLZX, UTF8+BWT
   --jobs=N            worker threads available to one block

    If invoked as `bwzip', default action is to compress.

   You can combine short flags, so `-v -4' means the same as -v4 or -4v, &c.
   "
    );
    exit(0);
}

fn version() {
    println!("Version: {}, written in Rust", VERSION);
    exit(0);
}
