//! taskforge - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use taskforge::util::config::{load_config, load_config_from, Config};
use taskforge::util::logger::{self, LogLevel};
use taskforge::{generate, inspect_cache, NAME, VERSION};

/// Generate every variant of a pipeline on the cooperative task scheduler
#[derive(Parser, Debug)]
#[command(name = "taskforge")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.config/taskforge/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the pipelines of one factory over define axes
    Generate {
        /// Number of values of one axis; repeat for more axes
        #[arg(long = "axis", value_name = "N", required = true)]
        axes: Vec<i32>,

        /// Worker threads per priority engine (0 steps the engines here)
        #[arg(long)]
        workers: Option<usize>,

        /// Directory for pipeline caches
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,

        /// Do not read or write a pipeline cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Validate a pipeline cache file
    InspectCache {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print version information
    Version,
}

fn load(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => load_config_from(path).with_context(|| format!("Failed to load config: {}", path.display())),
        None => load_config().context("Failed to load config"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load(&args)?;

    logger::init_with_level(if args.verbose { LogLevel::Debug } else { config.log.level });

    match args.command {
        Commands::Generate {
            axes,
            workers,
            cache_dir,
            no_cache,
        } => {
            if let Some(workers) = workers {
                config.scheduler.low_priority_workers = workers;
                config.scheduler.normal_priority_workers = workers;
                config.scheduler.high_priority_workers = workers;
            }
            if cache_dir.is_some() {
                config.cache.dir = cache_dir;
            }
            if no_cache {
                config.cache.enabled = false;
            }

            let pipelines = generate(&config, &axes).context("Failed to generate pipelines")?;
            for pipeline in &pipelines {
                let defines: Vec<String> = pipeline.defines.iter().map(|(name, value)| format!("{}={}", name, value)).collect();
                println!("{:>6}  {}", pipeline.index.to_string(), defines.join(" "));
            }
            println!("{} pipelines", pipelines.len());
        }
        Commands::InspectCache { file } => {
            let size = inspect_cache(&file).with_context(|| format!("Invalid pipeline cache: {}", file.display()))?;
            println!("{}: {} bytes", file.display(), size);
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
