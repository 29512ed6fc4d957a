//! Command-line control of FM mode for the 1st LO synthesizer and XFFTS.
//!
//! Subcommands:
//! - `init`: configure both instruments for FM switching
//! - `start` / `stop`: arm or stop the sweep
//! - `finalize`: force both instruments back to non-FM mode
//! - `list`: print the synthesizer frequency list for a pattern
//! - `run`: init, start, wait, stop (finalizes on failure)
//! - `config`: print the effective configuration
//!
//! `--dry-run` records the commands instead of sending them and prints them
//! at the end.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fmlolc::channel::{ChannelEvent, Connector};
use fmlolc::commands::format_frequency_list;
use fmlolc::{
    compute_frequency_list_in_range, load_pattern, FmConfig, FmSequencer, FmState,
    RecordingConnector, ScpiConnector, DEFAULT_FM_RATE_HZ, DEFAULT_LO_MULTIPLY,
};
use tracing::info;

/// FM-mode LO control tool
#[derive(Parser, Debug)]
#[command(name = "fm_tool")]
#[command(about = "FM switching control for the 1st LO synthesizer and XFFTS spectrometer")]
#[command(version)]
struct Args {
    /// JSON configuration file (instrument endpoints, synthesizer range)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Record commands instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct PatternArgs {
    /// FM pattern file
    #[arg(short, long)]
    pattern: PathBuf,

    /// LO frequency at zero FM offset, in GHz
    #[arg(short, long)]
    lo_freq: f64,

    /// SG-to-LO multiplication factor
    #[arg(short = 'm', long, default_value_t = DEFAULT_LO_MULTIPLY)]
    lo_multiply: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure both instruments for FM switching
    Init {
        #[command(flatten)]
        pattern: PatternArgs,

        /// FM and spectrometer sampling rate in Hz
        #[arg(short, long, default_value_t = DEFAULT_FM_RATE_HZ)]
        fm_rate: f64,
    },

    /// Arm the synthesizer sweep (instruments must already be initialized)
    Start,

    /// Stop the sweep and revert to non-FM mode
    Stop,

    /// Revert both instruments to non-FM mode
    Finalize,

    /// Print the synthesizer frequency list without contacting instruments
    List {
        #[command(flatten)]
        pattern: PatternArgs,
    },

    /// Initialize, start, wait, then stop
    Run {
        #[command(flatten)]
        pattern: PatternArgs,

        /// FM and spectrometer sampling rate in Hz
        #[arg(short, long, default_value_t = DEFAULT_FM_RATE_HZ)]
        fm_rate: f64,

        /// How long to keep FM running, in seconds
        #[arg(short, long)]
        duration: f64,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FmConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FmConfig::default(),
    };

    let recorder = RecordingConnector::new();
    let connector: &dyn Connector = if args.dry_run {
        &recorder
    } else {
        &ScpiConnector
    };

    let result = dispatch(args.command, config, connector);

    if args.dry_run {
        print_recorded(&recorder, &result);
    }
    result
}

fn dispatch(command: Command, config: FmConfig, connector: &dyn Connector) -> Result<()> {
    match command {
        Command::Init { pattern, fm_rate } => {
            let mut seq = FmSequencer::new(config, connector);
            seq.initialize(&pattern.pattern, pattern.lo_freq, pattern.lo_multiply, fm_rate)?;
            info!("FM mode initialized");
            Ok(())
        }
        Command::Start => {
            let mut seq = FmSequencer::new(config, connector);
            // Each invocation is a fresh process; the operator vouches for `init`.
            seq.assume_state(FmState::Configured);
            seq.start_fm()?;
            info!("FM started");
            Ok(())
        }
        Command::Stop => {
            FmSequencer::new(config, connector).stop_fm()?;
            info!("FM stopped");
            Ok(())
        }
        Command::Finalize => {
            FmSequencer::new(config, connector).finalize()?;
            info!("Instruments reverted to non-FM mode");
            Ok(())
        }
        Command::List { pattern } => cmd_list(&config, &pattern),
        Command::Run {
            pattern,
            fm_rate,
            duration,
        } => cmd_run(config, connector, &pattern, fm_rate, duration),
        Command::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn cmd_list(config: &FmConfig, args: &PatternArgs) -> Result<()> {
    let pattern = load_pattern(&args.pattern)?;
    let list = compute_frequency_list_in_range(
        &pattern,
        args.lo_freq,
        args.lo_multiply,
        &config.synthesizer_range,
    )?;

    for (i, (entry, freq)) in pattern.entries().iter().zip(list.iter()).enumerate() {
        println!(
            "{i:4}  offset {:+.6} GHz  dur {:.3} s  ->  SG {freq:.9} GHz",
            entry.offset, entry.duration
        );
    }
    println!("LIST:FREQ {}", format_frequency_list(&list));
    Ok(())
}

fn cmd_run(
    config: FmConfig,
    connector: &dyn Connector,
    args: &PatternArgs,
    fm_rate: f64,
    duration: f64,
) -> Result<()> {
    let hold = Duration::try_from_secs_f64(duration)
        .with_context(|| format!("invalid duration {duration}"))?;
    let pattern = load_pattern(&args.pattern)?;

    let mut seq = FmSequencer::new(config, connector);
    seq.run_observation(&pattern, args.lo_freq, args.lo_multiply, fm_rate, || {
        info!("FM running for {:.1} s", hold.as_secs_f64());
        std::thread::sleep(hold);
        Ok(())
    })?;

    info!("FM run complete");
    Ok(())
}

fn print_recorded(recorder: &RecordingConnector, result: &Result<()>) {
    for event in recorder.events() {
        match event {
            ChannelEvent::Connect(instrument) => println!("-- open {instrument}"),
            ChannelEvent::Send(instrument, command) => println!("{instrument:>12} <- {command}"),
            ChannelEvent::Close(instrument) => println!("-- close {instrument}"),
        }
    }
    if let Err(e) = result {
        println!("-- failed: {e:#}");
    }
}
