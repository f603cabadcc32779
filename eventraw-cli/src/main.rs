//! Event-camera raw file decoder CLI.
//!
//! Decodes DAT, EVT 2.0 and EVT 3.0 recordings to CSV.

mod csv;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use csv::{CsvWriter, FieldOrder};
use eventraw_core::{
    decode_file, merge_files, DecodeSummary, ExposureEvent, FileSummary, Format, PolarityEvent,
    SensorGeometry,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Number of written events between two progress updates.
const PROGRESS_INTERVAL: u64 = 1 << 16;

/// Raw file decoder for event cameras.
///
/// Decodes legacy DAT, EVT 2.0 and EVT 3.0 recordings to CSV.
#[derive(Parser, Debug)]
#[command(name = "eventraw")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output CSV path (standard output when omitted)
    #[arg(short, long, value_name = "OUTPUT", global = true)]
    output: Option<PathBuf>,

    /// Sensor width used when the header does not provide one
    #[arg(long, global = true)]
    width: Option<u16>,

    /// Sensor height used when the header does not provide one
    #[arg(long, global = true)]
    height: Option<u16>,

    /// Skip events before this timestamp (microseconds)
    #[arg(long, value_name = "US", global = true)]
    begin: Option<u64>,

    /// Stop decoding at this timestamp (microseconds, exclusive)
    #[arg(long, value_name = "US", global = true)]
    end: Option<u64>,

    /// Field order for CSV output.
    ///
    /// Format: comma-separated field names (t, x, y, p)
    ///
    /// Examples:
    /// - "t,x,y,p" (default)
    /// - "x,y,p,t"
    #[arg(short, long, default_value = "t,x,y,p", global = true)]
    format: String,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Legacy DAT recording, optionally split into td and aps files
    Dat {
        /// Change detection file, or "none"
        #[arg(value_name = "TD")]
        td: String,

        /// Exposure measurement file, or "none"
        #[arg(long, value_name = "APS")]
        aps: Option<String>,
    },
    /// EVT 2.0 raw file
    Evt2 {
        /// Input .raw file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Shift timestamps so that the first event happens at t = 0
        #[arg(long)]
        normalize: bool,
    },
    /// EVT 3.0 raw file
    Evt3 {
        /// Input .raw file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Shift timestamps so that the first event happens at t = 0
        #[arg(long)]
        normalize: bool,
    },
}

/// Maps "none" to an absent channel.
fn channel_path(value: &str) -> Option<&Path> {
    if value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(Path::new(value))
    }
}

/// `[begin, end)` time range selected on the command line.
#[derive(Debug, Clone, Copy)]
struct TimeWindow {
    begin: u64,
    end: Option<u64>,
}

/// Writes the events that fall inside the time window.
///
/// Decoders emit non-decreasing timestamps, so the first event at or past
/// `end` stops decoding.
struct Output<W: Write> {
    writer: CsvWriter<W>,
    window: TimeWindow,
    progress: ProgressBar,
    written: u64,
    error: Option<io::Error>,
}

impl<W: Write> Output<W> {
    fn offer<F>(&mut self, t: u64, write: F) -> ControlFlow<()>
    where
        F: FnOnce(&mut CsvWriter<W>) -> io::Result<()>,
    {
        if self.window.end.is_some_and(|end| t >= end) {
            return ControlFlow::Break(());
        }
        if t < self.window.begin {
            return ControlFlow::Continue(());
        }
        if let Err(e) = write(&mut self.writer) {
            self.error = Some(e);
            return ControlFlow::Break(());
        }
        self.written += 1;
        if self.written % PROGRESS_INTERVAL == 0 {
            self.progress.set_position(self.written);
        }
        ControlFlow::Continue(())
    }

    fn polarity(&mut self, event: PolarityEvent) -> ControlFlow<()> {
        self.offer(event.t, |writer| writer.write_polarity(&event))
    }

    fn exposure(&mut self, event: ExposureEvent) -> ControlFlow<()> {
        self.offer(event.t, |writer| writer.write_exposure(&event))
    }

    /// Flushes the output and reports a write error raised inside the sink.
    fn finish(mut self) -> Result<u64> {
        if let Some(e) = self.error.take() {
            return Err(e).context("Failed to write CSV output");
        }
        self.writer.flush().context("Failed to flush CSV output")?;
        Ok(self.written)
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    // Parse field order
    let field_order = FieldOrder::from_str(&args.format)
        .context("Invalid field format. Use comma-separated: t,x,y,p")?;

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} events {msg}")
                .context("Invalid progress template")?,
        );
        pb
    };

    let destination: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    let window = TimeWindow {
        begin: args.begin.unwrap_or(0),
        end: args.end,
    };
    let mut output = Output {
        writer: CsvWriter::new(destination, field_order),
        window,
        progress: progress.clone(),
        written: 0,
        error: None,
    };

    let format = match &args.command {
        Command::Dat { .. } => Format::Dat,
        Command::Evt2 { .. } => Format::Evt2,
        Command::Evt3 { .. } => Format::Evt3,
    };
    let defaults = override_geometry(format.default_geometry(), args.width, args.height);
    debug!(?format, ?defaults, "decoding");

    let start_time = Instant::now();

    let result: FileSummary = match &args.command {
        Command::Dat { td, aps: None } => {
            let path = channel_path(td).context("At least one of td and aps is required")?;
            progress.set_message(format!("{:?}", path.file_name().unwrap_or_default()));
            output.writer.write_header(false)?;
            decode_file(path, format, defaults, false, |event| output.polarity(event))
                .context("Failed to decode DAT file")?
        }
        Command::Dat { td, aps: Some(aps) } => {
            progress.set_message("merging td and aps".to_string());
            output.writer.write_header(true)?;
            merge_files(channel_path(td), channel_path(aps), defaults, |event| {
                output.exposure(event)
            })
            .context("Failed to merge DAT files")?
        }
        Command::Evt2 { input, normalize } | Command::Evt3 { input, normalize } => {
            progress.set_message(format!("{:?}", input.file_name().unwrap_or_default()));
            output.writer.write_header(false)?;
            decode_file(input, format, defaults, *normalize, |event| {
                output.polarity(event)
            })
            .with_context(|| format!("Failed to decode {:?}", input))?
        }
    };

    let written = output.finish()?;
    let total_duration = start_time.elapsed();

    progress.finish_with_message(format!(
        "Done! Wrote {} events in {:.2}s (sensor: {}x{})",
        written,
        total_duration.as_secs_f64(),
        result.geometry.width,
        result.geometry.height
    ));

    if !args.quiet {
        print_summary(&args, &result.summary, written, total_duration.as_secs_f64());
    }

    Ok(())
}

/// Applies the command-line overrides to a format's default geometry.
fn override_geometry(
    defaults: SensorGeometry,
    width: Option<u16>,
    height: Option<u16>,
) -> SensorGeometry {
    SensorGeometry::new(
        width.unwrap_or(defaults.width),
        height.unwrap_or(defaults.height),
    )
}

fn print_summary(args: &Args, summary: &DecodeSummary, written: u64, seconds: f64) {
    let events_per_sec = summary.events as f64 / seconds;
    eprintln!();
    eprintln!("Summary:");
    eprintln!("  Command:       {:?}", args.command);
    if let Some(output) = &args.output {
        eprintln!("  Output:        {:?}", output);
    }
    eprintln!("  Decoded:       {}", summary.events);
    eprintln!("  Written:       {}", written);
    eprintln!("  Out of bounds: {}", summary.out_of_bounds);
    eprintln!("  Out of order:  {}", summary.out_of_order);
    eprintln!("  Stopped early: {}", summary.stopped);
    eprintln!("  Duration:      {:.3}s", seconds);
    eprintln!("  Throughput:    {:.0} events/s", events_per_sec);
}
