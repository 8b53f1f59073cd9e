mod cli;
mod config_file;
mod cookies;
mod logging;
mod progress;

fn main() {
    if let Err(e) = logging::init_logging() {
        eprintln!("terafetch: log file unavailable ({}), using stderr", e);
        logging::init_logging_stderr();
    }

    if let Err(err) = cli::run_from_args() {
        eprintln!("terafetch error: {:#}", err);
        std::process::exit(1);
    }
}
