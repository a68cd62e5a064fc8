use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use cribo::{config::Config, orchestrator::BundleOrchestrator};

#[derive(Debug, Parser)]
#[command(
    name = "cribo",
    about = "Python source bundler that produces a single .py file from multi-module projects"
)]
struct Args {
    /// Entry point script
    #[arg(short, long)]
    entry: PathBuf,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Additional first-party source directories (repeatable)
    #[arg(long = "src")]
    src: Vec<PathBuf>,

    /// Module names to force-classify as third-party (repeatable)
    #[arg(long = "third-party")]
    third_party: Vec<String>,

    /// Target Python version, e.g. py310
    #[arg(long)]
    target_version: Option<String>,

    /// Also write requirements.txt next to the output
    #[arg(long)]
    emit_requirements: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let mut config = Config::discover()?;
    if !args.src.is_empty() {
        config.src = args.src.clone();
    }
    for name in &args.third_party {
        config.known_third_party.insert(name.clone());
    }
    if let Some(target_version) = &args.target_version {
        config.target_version = target_version.clone();
    }

    let mut orchestrator = BundleOrchestrator::new(config);
    let bundled = orchestrator.bundle_to_string(&args.entry)?;

    match &args.output {
        Some(output) => {
            std::fs::write(output, &bundled)?;
            if args.emit_requirements {
                let requirements_path = output
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new("."))
                    .join("requirements.txt");
                std::fs::write(&requirements_path, orchestrator.requirements())?;
            }
        }
        None => {
            // The bundle is the program's product; stdout is the contract.
            #[allow(clippy::print_stdout)]
            {
                print!("{bundled}");
            }
        }
    }

    Ok(())
}
