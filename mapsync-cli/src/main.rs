//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    mapsync_cli::init_logging();
    if let Err(err) = mapsync_cli::run() {
        eprintln!("mapsync: {err}");
        std::process::exit(1);
    }
}
