use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;
use unmix_core::{
    ensure_weights, registry, set_download_progress_callback, set_split_progress_callback,
    split_file, SplitOptions, SplitProgress, WeightsOptions,
};

#[derive(Parser)]
#[command(name = "unmix")]
#[command(about = "Spectrogram-masking music and speech source separation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Separate one audio file into stems
    Split {
        #[arg(short, long)]
        input: String,

        #[arg(short, long, default_value = ".")]
        output: String,

        #[arg(short, long, default_value = "umxhq")]
        preset: String,

        /// Target to extract (repeatable); all preset targets when omitted
        #[arg(short, long)]
        target: Vec<String>,

        /// Base URL of the weight store
        #[arg(long)]
        weights_url: Option<String>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Download and verify weights without separating anything
    Prepare {
        #[arg(short, long, default_value = "umxhq")]
        preset: String,

        #[arg(short, long)]
        target: Vec<String>,

        #[arg(long)]
        weights_url: Option<String>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// List available presets and targets
    List,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Split {
            input,
            output,
            preset,
            target,
            weights_url,
            quiet,
        } => handle_split(input, output, preset, target, weights_url, quiet),
        Commands::Prepare {
            preset,
            target,
            weights_url,
            quiet,
        } => handle_prepare(preset, target, weights_url, quiet),
        Commands::List => handle_list(),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn weights_options(weights_url: Option<String>) -> WeightsOptions {
    WeightsOptions {
        weights_base_url: weights_url,
        ..WeightsOptions::default()
    }
}

fn handle_split(
    input: String,
    output: String,
    preset: String,
    targets: Vec<String>,
    weights_url: Option<String>,
    quiet: bool,
) -> anyhow::Result<()> {
    if !std::path::Path::new(&input).exists() {
        anyhow::bail!("Input file not found: {input}");
    }

    if !quiet {
        setup_progress_callbacks();
        eprintln!("Input:  {input}");
        eprintln!("Output: {output}");
        eprintln!("Preset: {preset}");
        eprintln!();
    }

    let opts = SplitOptions {
        output_dir: output,
        preset,
        targets,
        weights: weights_options(weights_url),
    };

    let result = split_file(&input, opts)?;

    if !quiet {
        eprintln!();
        eprintln!("Split completed ({}):", result.preset);
        for stem in &result.stems {
            eprintln!("  {:<8} {}", stem.target, stem.path.display());
        }
    } else {
        for stem in &result.stems {
            println!("{}", stem.path.display());
        }
    }

    Ok(())
}

fn handle_prepare(
    preset: String,
    targets: Vec<String>,
    weights_url: Option<String>,
    quiet: bool,
) -> anyhow::Result<()> {
    let entry = unmix_core::resolve_preset(&preset)?;
    let targets = if targets.is_empty() {
        entry.targets.keys().cloned().collect()
    } else {
        targets
    };

    if !quiet {
        setup_progress_callbacks();
    }

    let opts = weights_options(weights_url);
    for target in &targets {
        if !quiet {
            eprintln!("Preparing {}/{target}", entry.name);
        }
        let handle = ensure_weights(&entry.name, target, &opts)?;
        if !quiet {
            eprintln!("  cached at {}", handle.local_path.display());
        }
    }

    Ok(())
}

fn handle_list() -> anyhow::Result<()> {
    let reg = registry()?;

    eprintln!("Available presets");
    for p in &reg.presets {
        let marker = if p.name == reg.default { " (default)" } else { "" };
        let config = p.model_config()?;
        eprintln!("  {}{marker}: {}", p.name, p.description);
        eprintln!(
            "    {} Hz, {} ch, n_fft {}, hop {}, max_bin {}",
            p.sample_rate, p.nb_channels, p.n_fft, p.n_hop, config.net.max_bin
        );
        eprintln!("    targets: {}", p.target_names().join(", "));
    }

    eprintln!();
    eprintln!("Use --preset <name> and --target <name> to choose a model");

    Ok(())
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1_000_000.0
}

fn setup_progress_callbacks() {
    set_download_progress_callback(|downloaded, total| {
        if total == 0 {
            eprint!("\rDownloading weights: {:.2} MB", megabytes(downloaded));
            return;
        }
        let percent = downloaded.saturating_mul(100) / total;
        eprint!(
            "\rDownloading weights: {percent:>3}% ({:.2} MB / {:.2} MB)",
            megabytes(downloaded),
            megabytes(total)
        );
        if downloaded >= total {
            eprintln!();
        }
    });

    set_split_progress_callback(|progress| match progress {
        SplitProgress::Stage("resolve_model") => eprintln!("Resolving preset"),
        SplitProgress::Stage("read_audio") => eprintln!("Reading audio file"),
        SplitProgress::Stage(other) => eprintln!("{other}"),
        SplitProgress::Target { name, done, total } => {
            eprintln!("Separating {name} ({}/{total})", done + 1);
        }
        SplitProgress::Finished => {}
    });
}
