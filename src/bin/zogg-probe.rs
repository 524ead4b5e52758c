//! zogg-probe - Ogg stream inspector
//!
//! A command-line tool for inspecting Ogg files: logical streams, page and
//! packet counts, Opus details, and any damage found along the way.
//!
//! # Usage
//!
//! ```bash
//! # Show human-readable output
//! zogg-probe audio.ogg
//!
//! # Show JSON output
//! zogg-probe --format json audio.ogg
//!
//! # Show compact JSON output
//! zogg-probe --format json --compact audio.ogg
//! ```

use clap::{Parser, ValueEnum};
use std::process;
use zogg::probe::FileProbe;

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output (default)
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "zogg-probe")]
#[command(about = "Inspect Ogg files and summarize their logical streams", long_about = None)]
struct Args {
    /// Ogg file to probe
    #[arg(value_name = "FILE")]
    file: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Compact JSON output (only with --format json)
    #[arg(short, long)]
    compact: bool,

    /// Show only the stream with this serial number
    #[arg(short, long)]
    serial: Option<u32>,

    /// Log demuxer warnings while reading
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    if args.verbose {
        if let Err(e) = zogg::init(zogg::Config {
            verbose: true,
            debug: false,
        }) {
            eprintln!("Error: Failed to initialize logging: {}", e);
            process::exit(1);
        }
    }

    let probe = match FileProbe::new(&args.file) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: Failed to open file '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    let report = match probe.analyze() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: Failed to analyze file '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    // Filter streams if requested
    let filtered_report = if let Some(serial) = args.serial {
        let mut filtered = report.clone();
        filtered.streams.retain(|s| s.serial == serial);
        filtered
    } else {
        report
    };

    match args.format {
        OutputFormat::Text => {
            println!("{}", filtered_report);
        }
        OutputFormat::Json => {
            let json = if args.compact {
                filtered_report.to_json_compact()
            } else {
                filtered_report.to_json()
            };

            match json {
                Ok(j) => println!("{}", j),
                Err(e) => {
                    eprintln!("Error: Failed to serialize JSON: {}", e);
                    process::exit(1);
                }
            }
        }
    }
}
