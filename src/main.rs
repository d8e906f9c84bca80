//! binscope CLI - GPU partial spectrum engine
//!
//! Command-line interface for listing devices and transforming sample files.

use binscope::{bins, reference, window, Config, Engine, Result, SpectralError};
use clap::{Parser, Subcommand};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "binscope")]
#[command(version)]
#[command(about = "GPU partial spectrum engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Frequency selection shared by the transforming commands.
#[derive(clap::Args)]
struct FreqArgs {
    /// Explicit frequencies (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    freq: Vec<f32>,

    /// Number of generated bins when no --freq is given
    #[arg(short, long)]
    bins: Option<usize>,

    /// Space generated bins linearly from 0 up to --max-freq
    #[arg(long)]
    linear: bool,

    /// Lowest log-spaced bin
    #[arg(long, default_value = "0.001")]
    min_freq: f32,

    /// Highest generated bin
    #[arg(long, default_value = "0.5")]
    max_freq: f32,

    /// Interpret frequencies as Hz at this sample rate
    #[arg(short = 'r', long)]
    sample_rate: Option<f32>,
}

#[derive(Subcommand)]
enum Commands {
    /// List compute platforms and devices
    Devices,

    /// Transform one window and print a magnitude per frequency
    Transform {
        /// Sample file (whitespace separated floats); a test tone if omitted
        input: Option<PathBuf>,

        /// Window exponent (window holds 2^L samples)
        #[arg(short = 'l', long)]
        log_window: Option<u32>,

        /// Frequency of the synthesized test tone, in cycles per sample
        #[arg(long, default_value = "0.25")]
        tone: f32,

        /// Treat the input as interleaved stereo
        #[arg(long)]
        stereo: bool,

        #[command(flatten)]
        freqs: FreqArgs,

        /// Compare against the host implementation
        #[arg(long)]
        verify: bool,
    },

    /// Slide the window over a sample file and print one row per window
    Analyze {
        /// Sample file (whitespace separated floats)
        input: PathBuf,

        /// Window exponent (window holds 2^L samples)
        #[arg(short = 'l', long)]
        log_window: Option<u32>,

        /// Samples between window starts (defaults to the window length)
        #[arg(long)]
        hop: Option<usize>,

        /// Treat the input as interleaved stereo
        #[arg(long)]
        stereo: bool,

        #[command(flatten)]
        freqs: FreqArgs,

        /// Print log-scaled bar heights with this gain instead of magnitudes
        #[arg(long)]
        bars: Option<f32>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Devices => list_devices(&config),

        Commands::Transform {
            input,
            log_window,
            tone,
            stereo,
            freqs,
            verify,
        } => transform(&config, input, log_window, tone, stereo, freqs, verify),

        Commands::Analyze {
            input,
            log_window,
            hop,
            stereo,
            freqs,
            bars,
        } => analyze(&config, input, log_window, hop, stereo, freqs, bars),
    });

    if let Err(e) = result {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn list_devices(config: &Config) -> Result<()> {
    let platforms = binscope::enumerate_platforms();
    if platforms.is_empty() {
        return Err(SpectralError::NoPlatforms);
    }

    let selected = binscope::select_device(&config.device).ok();

    for platform in &platforms {
        println!("{}", platform.name());
        for device in platform.devices() {
            let marker = match &selected {
                Some(s) if s.platform_name() == device.platform_name() && s.info() == device.info() => "*",
                _ => " ",
            };
            println!("  {} {} ({:?})", marker, device.name(), device.device_type());
        }
    }
    Ok(())
}

fn resolve_freqs(args: &FreqArgs, fallback_count: usize) -> Vec<f32> {
    let count = args.bins.unwrap_or(fallback_count);
    let freqs = if !args.freq.is_empty() {
        args.freq.clone()
    } else if args.linear {
        bins::linear_bins(count, args.max_freq)
    } else {
        bins::log_bins(count, args.min_freq, args.max_freq)
    };
    match args.sample_rate {
        Some(rate) => freqs.iter().map(|&hz| bins::hz_to_normalized(hz, rate)).collect(),
        None => freqs,
    }
}

fn read_samples(path: &Path, stereo: bool) -> Result<Vec<f32>> {
    let content = fs::read_to_string(path)?;
    let samples = content
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f32>()
                .map_err(|_| SpectralError::Config(format!("invalid sample '{}' in {}", token, path.display())))
        })
        .collect::<Result<Vec<f32>>>()?;
    Ok(if stereo {
        window::downmix_stereo(&samples)
    } else {
        samples
    })
}

/// Apply the command-line overrides and validate before any allocation.
fn command_config(config: &Config, log_window: Option<u32>, num_frequencies: usize) -> Result<Config> {
    let mut config = config.clone();
    if let Some(log_window) = log_window {
        config.engine.log_window_size = log_window;
    }
    config.engine.num_frequencies = num_frequencies;
    config.engine.validate()?;
    Ok(config)
}

fn build_engine(config: &Config) -> Result<Engine> {
    let mut engine = Engine::from_config(config)?;
    engine.init()?;
    Ok(engine)
}

fn transform(
    config: &Config,
    input: Option<PathBuf>,
    log_window: Option<u32>,
    tone: f32,
    stereo: bool,
    freq_args: FreqArgs,
    verify: bool,
) -> Result<()> {
    let freqs = resolve_freqs(&freq_args, config.engine.num_frequencies);
    let config = command_config(config, log_window, freqs.len())?;
    let size = config.engine.window_size();

    let samples = match input {
        Some(path) => {
            let mut samples = read_samples(&path, stereo)?;
            if samples.len() < size {
                return Err(SpectralError::InvalidInputSize {
                    expected: size,
                    got: samples.len(),
                });
            }
            samples.truncate(size);
            samples
        }
        None => (0..size)
            .map(|s| (std::f32::consts::TAU * tone * s as f32).cos())
            .collect(),
    };

    let mut engine = build_engine(&config)?;
    engine.write_freqs(&freqs)?;

    let start = Instant::now();
    let magnitudes = engine.transform(&samples)?;
    info!("Transformed {} samples in {:?}", size, start.elapsed());

    for (freq, magnitude) in freqs.iter().zip(&magnitudes) {
        println!("{:>12.6}\t{:.6}", freq, magnitude);
    }

    if verify {
        let expected = reference::magnitudes(&samples, &freqs);
        let max_diff = expected
            .iter()
            .zip(&magnitudes)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        println!("max |gpu - host| = {:.3e}", max_diff);
    }

    engine.release();
    Ok(())
}

fn analyze(
    config: &Config,
    input: PathBuf,
    log_window: Option<u32>,
    hop: Option<usize>,
    stereo: bool,
    freq_args: FreqArgs,
    bars: Option<f32>,
) -> Result<()> {
    let freqs = resolve_freqs(&freq_args, config.engine.num_frequencies);
    let config = command_config(config, log_window, freqs.len())?;
    let log_window = config.engine.log_window_size;
    let size = config.engine.window_size();
    let hop = hop.unwrap_or(size);

    let samples = read_samples(&input, stereo)?;
    let total = window::window_count(samples.len(), log_window, hop);
    if total == 0 {
        return Err(SpectralError::InvalidInputSize {
            expected: size,
            got: samples.len(),
        });
    }

    let mut engine = build_engine(&config)?;
    engine.write_freqs(&freqs)?;

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} windows ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    for chunk in window::windows(&samples, log_window, hop) {
        let magnitudes = engine.transform(chunk)?;
        let row = match bars {
            Some(gain) => bins::bar_heights(&magnitudes, gain),
            None => magnitudes,
        };
        let line: Vec<String> = row.iter().map(|v| format!("{:.6}", v)).collect();
        pb.suspend(|| println!("{}", line.join("\t")));
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Analyzed {} windows in {}",
        total,
        HumanDuration(start.elapsed())
    );

    engine.release();
    Ok(())
}
