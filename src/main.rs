//! Binary entry point: opens the backing file and runs the interactive
//! shell on it.

use mufs::error;
use mufs::fs::FileSystem;
use mufs::shell::Shell;
use std::env;
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the backing file hosting the volume.
    disk_path: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            _ => res.disk_path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" mufs [options] [disk]");
    println!();
    println!("Runs an interactive shell on the file system hosted inside `disk`");
    println!("(default: disk.bin). The file is created if it does not exist.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
}

fn main() {
    let mut args = env::args_os();
    args.next();
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let disk_path = args.disk_path.unwrap_or_else(|| PathBuf::from("disk.bin"));
    let fs = FileSystem::open(&disk_path).unwrap_or_else(|e| {
        error("mufs", format_args!("{}: {e}", disk_path.display()));
    });
    Shell::new(fs).run();
}
