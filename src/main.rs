// camsfolio - CAMS statement PDF to holdings JSON
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use camsfolio::pdf_extraction::EngineKind;
use camsfolio::{CamsError, ExtractorConfig, ParseRequest, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract mutual fund holdings from a CAMS statement PDF")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Statement PDF on disk
    file: Option<PathBuf>,

    /// Download the statement from this http(s) URL instead
    #[arg(long)]
    url: Option<String>,

    /// Statement password (usually PAN or date of birth)
    #[arg(short, long, env = "CAMSFOLIO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Config file (defaults to $CAMSFOLIO_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Only report schemes whose name contains this text
    #[arg(long)]
    scheme: Option<String>,

    /// Single-line JSON
    #[arg(long)]
    compact: bool,

    /// Comma-separated engine chain overriding the config, e.g. "positional,ocr"
    #[arg(long, value_delimiter = ',', global = true)]
    engines: Option<Vec<String>>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the engine chain and whether each engine can run here
    Engines,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "camsfolio=info".into()))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<ExtractorConfig> {
    let mut config = ExtractorConfig::discover(args.config.as_deref())?;
    if let Some(names) = &args.engines {
        let mut engines = Vec::with_capacity(names.len());
        for name in names {
            match EngineKind::parse(name.trim()) {
                Some(kind) => engines.push(kind),
                None => bail!("unknown engine {name:?}"),
            }
        }
        config.engines = engines;
    }
    Ok(config)
}

fn list_engines(pipeline: &Pipeline) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for (name, availability) in pipeline.router().engines() {
        match availability {
            Ok(()) => writeln!(stdout, "{name:<12} available")?,
            Err(err) => writeln!(stdout, "{name:<12} {err}")?,
        }
    }
    Ok(())
}

async fn parse(args: &Args, pipeline: &Pipeline) -> Result<()> {
    let file = match &args.file {
        Some(path) => Some(std::fs::read(path).with_context(|| format!("reading {}", path.display()))?),
        None => None,
    };
    let request = ParseRequest::new(file, args.url.clone(), args.password.clone())?;
    let mut result = pipeline.run(request).await?;
    if let Some(pattern) = &args.scheme {
        result = result.filter_by_scheme(pattern);
    }

    let json = if args.compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{json}");
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let pipeline = Pipeline::new(config).context("building extraction pipeline")?;
    match args.command {
        Some(Command::Engines) => list_engines(&pipeline),
        None => parse(&args, &pipeline).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<CamsError>() {
                Some(cams) => eprintln!("error[{}]: {err:#}", cams.reason()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
