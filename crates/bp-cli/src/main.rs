//! BiPo directionality CLI

use anyhow::Result;
use bp_direction::{Analysis, AnalysisConfig, EventCandidate, Topology};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod events;

#[derive(Parser)]
#[command(name = "bp-cli")]
#[command(about = "Directionality reconstruction for correlated BiPo decay pairs")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select, accumulate and estimate the decay direction
    Run {
        /// Analysis configuration (YAML, or JSON by extension). Defaults apply if omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Event file (one JSON record per line). Repeatable.
        #[arg(short, long)]
        events: Vec<PathBuf>,

        /// Text file listing event files, one per line.
        #[arg(long)]
        file_list: Option<PathBuf>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write every histogram to this JSON file.
        #[arg(long)]
        histograms: Option<PathBuf>,

        /// Threads (0 = auto). Use 1 for sequential accumulation.
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Print the live/dead segment grid, top row first
    Topology {
        /// Analysis configuration providing `excluded_segments`.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Excluded segments, overriding the configuration.
        #[arg(long, value_delimiter = ',')]
        exclude: Option<Vec<usize>>,
    },

    /// Print the effective configuration as YAML
    Config {
        /// Configuration to load and validate. Defaults apply if omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { config, events, file_list, output, histograms, threads } => cmd_run(
            config.as_deref(),
            &events,
            file_list.as_deref(),
            output.as_deref(),
            histograms.as_deref(),
            threads,
        ),
        Commands::Topology { config, exclude } => cmd_topology(config.as_deref(), exclude),
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn read_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: AnalysisConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(cfg)
}

fn write_json(output: Option<&Path>, value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    if let Some(path) = output {
        std::fs::write(path, text)?;
    } else {
        println!("{text}");
    }
    Ok(())
}

fn cmd_run(
    config: Option<&Path>,
    event_files: &[PathBuf],
    file_list: Option<&Path>,
    output: Option<&Path>,
    histograms: Option<&Path>,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    let analysis = Analysis::from_config(read_config(config)?)?;

    let mut files = event_files.to_vec();
    if let Some(list) = file_list {
        files.extend(events::read_file_list(list)?);
    }
    if files.is_empty() {
        anyhow::bail!("no event input: pass --events and/or --file-list");
    }
    let mut all: Vec<EventCandidate> = Vec::new();
    for f in &files {
        all.extend(events::read_events(f)?);
    }
    tracing::info!(files = files.len(), events = all.len(), "event input ready");

    let acc = if threads == 1 {
        analysis.accumulate(&all)?
    } else {
        analysis.accumulate_parallel(&all)?
    };
    let result = analysis.finish(acc)?;

    if let Some(path) = histograms {
        write_json(Some(path), &result.histograms)?;
        tracing::info!(path = %path.display(), "wrote histograms");
    }
    write_json(output, &result)
}

fn cmd_topology(config: Option<&Path>, exclude: Option<Vec<usize>>) -> Result<()> {
    let excluded = match exclude {
        Some(list) => list,
        None => read_config(config)?.excluded_segments,
    };
    let topology = Topology::new(&excluded)?;
    print!("{}", topology.render());
    println!("live segments: {} / {}", topology.live_count(), bp_direction::N_SEGMENTS);
    Ok(())
}

fn cmd_config(config: Option<&Path>) -> Result<()> {
    let cfg = read_config(config)?;
    cfg.validate()?;
    Topology::new(&cfg.excluded_segments)?;
    print!("{}", serde_yaml_ng::to_string(&cfg)?);
    Ok(())
}
