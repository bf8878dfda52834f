//! Command line front end: flag parsing and the enumerate/annotate loop.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{debug, error, info};

use pciscan::pci::database::{locate_ids_file, FileLineSource, IdDatabase};
use pciscan::pci::root_bridge::platform_bridges;
use pciscan::pci::FunctionScanner;
use pciscan::{logging, report, Error};

struct Options {
    verbose: bool,
    ids_path: Option<PathBuf>,
}

enum Action {
    Run(Options),
    Help,
    Version,
    Invalid(String),
}

fn usage(program: &str) {
    println!("Usage: {} [ -v | --verbose ] [ --ids <path> ]", program);
    println!("       {} [ -h | --help | -V | --version ]", program);
}

fn parse_args(args: &[String]) -> Action {
    let mut options = Options {
        verbose: false,
        ids_path: None,
    };

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "-V" | "--version" => return Action::Version,
            "-h" | "-?" | "--help" => return Action::Help,
            "-v" | "--verbose" => options.verbose = true,
            "--ids" => match args.get(index + 1) {
                Some(path) => {
                    options.ids_path = Some(PathBuf::from(path));
                    index += 1;
                }
                None => return Action::Invalid("--ids needs a path".into()),
            },
            unknown => return Action::Invalid(format!("unknown option {}", unknown)),
        }
        index += 1;
    }

    Action::Run(options)
}

fn open_database(options: &Options) -> Result<IdDatabase<FileLineSource>, Error> {
    let path = match &options.ids_path {
        Some(path) => path.clone(),
        None => locate_ids_file().ok_or_else(|| Error::DatabaseOpen {
            path: PathBuf::from("pci.ids"),
            source: io::Error::from(io::ErrorKind::NotFound),
        })?,
    };
    info!("using device database {}", path.display());
    Ok(IdDatabase::new(FileLineSource::open(&path)?))
}

fn run(options: &Options) -> Result<(), Error> {
    // Open the database up front so a missing file fails before any bus
    // is touched.
    let mut database = if options.verbose {
        Some(open_database(options)?)
    } else {
        None
    };

    let bridges = platform_bridges()?;

    for bridge in &bridges {
        for range in bridge.bus_ranges() {
            debug!("scanning buses {:#04x}..={:#04x}", range.min, range.max);
            report::print_header();

            for probed in FunctionScanner::new(bridge.access(), range) {
                let found = probed?;
                debug!(
                    "{} command={:?} status={:?}",
                    found, found.command, found.status
                );

                let mut record = report::DeviceRecord::new(&found);
                if let Some(database) = database.as_mut() {
                    record = record.annotate(database.lookup(found.vendor_id, found.device_id)?);
                }
                report::print_row(&record);
            }
        }
    }

    println!();
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("pciscan");

    let options = match parse_args(&args) {
        Action::Run(options) => options,
        Action::Help => {
            usage(program);
            return ExitCode::SUCCESS;
        }
        Action::Version => {
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Action::Invalid(reason) => {
            eprintln!("ERROR: {}", reason);
            usage(program);
            return ExitCode::FAILURE;
        }
    };

    logging::init(options.verbose);

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
