//! # soto
//!
//! Captures a stereo PCM stream and renders its signal and spectrum in a
//! terminal, atop `soto-core`'s periodic thread pool.

use clap::Parser;
use log::error;

mod audio;
mod cli;
mod dsp;
mod logging;
mod runner;
mod ui;

fn main() {
    let args = cli::Cli::parse();
    let log_buffer = logging::init();

    let code = match runner::run(&args, log_buffer) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            -1
        }
    };

    std::process::exit(code)
}
