//! Command-line surface (§6 of the external-interfaces contract).
//!
//! Defaults are taken from the original getopt-based option parsing this
//! program's CLI surface is modeled on: device `hw:0,0`, rate 44100 Hz,
//! floor priority 0, buffer scale (slot count) 10, and `--run-for 0`
//! meaning "until signalled".

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "soto", author, version, about = "Capture a stereo PCM stream and render its signal and spectrum.", long_about = None)]
pub struct Cli {
    /// ALSA capture device
    #[arg(short = 'd', long = "dev", value_name = "DEVICE", default_value = "hw:0,0")]
    pub device: String,

    /// Sample rate in Hz
    #[arg(short = 'r', long = "rate", value_name = "HZ", default_value_t = 44_100)]
    pub rate: u32,

    /// Offset added to the OS real-time scheduling minimum priority
    #[arg(short = 'm', long = "minprio", value_name = "N", default_value_t = 0)]
    pub minprio: i32,

    /// Show the frequency spectrum panel
    #[arg(
        short = 'U',
        long = "show-spectrum",
        value_name = "BOOL",
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        require_equals = true
    )]
    pub show_spectrum: bool,

    /// Show the time-domain signal panel
    #[arg(
        short = 'u',
        long = "show-signal",
        value_name = "BOOL",
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        require_equals = true
    )]
    pub show_signal: bool,

    /// Sampler slot count (buffer depth as a multiple of the device period)
    #[arg(short = 's', long = "buffer-scale", value_name = "N", default_value_t = 10)]
    pub buffer_scale: usize,

    /// Run for this many seconds, then exit cleanly. 0 means run until
    /// signalled (Ctrl-C / SIGINT).
    #[arg(short = 't', long = "run-for", value_name = "SECONDS", default_value_t = 0)]
    pub run_for_seconds: u64,
}

impl Cli {
    /// `None` when `--run-for` is 0 ("until signalled").
    pub fn run_for(&self) -> Option<Duration> {
        if self.run_for_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.run_for_seconds))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let cli = Cli::parse_from(["soto"]);
        assert_eq!(cli.device, "hw:0,0");
        assert_eq!(cli.rate, 44_100);
        assert_eq!(cli.minprio, 0);
        assert!(cli.show_spectrum);
        assert!(cli.show_signal);
        assert_eq!(cli.buffer_scale, 10);
        assert_eq!(cli.run_for(), None);
    }

    #[test]
    fn show_spectrum_accepts_explicit_false() {
        let cli = Cli::parse_from(["soto", "--show-spectrum=false"]);
        assert!(!cli.show_spectrum);
    }

    #[test]
    fn run_for_nonzero_becomes_some_duration() {
        let cli = Cli::parse_from(["soto", "--run-for", "30"]);
        assert_eq!(cli.run_for(), Some(Duration::from_secs(30)));
    }
}
