use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use sustainable_portfolio::demo;
use sustainable_portfolio::io;
use sustainable_portfolio::report;
use sustainable_portfolio::RunConfig;
use sustainable_portfolio::Workspace;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Carbon- and risk-constrained portfolio optimization
#[derive(Parser)]
#[command(name = "sustainable-portfolio", version)]
struct Cli {
  #[command(subcommand)]
  command: Commands,

  /// Output format
  #[arg(long, default_value = "table", global = true)]
  output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
  /// Solve one allocation under the configured constraints
  Optimize(DataArgs),
  /// Sweep the configured grid of thresholds
  Sweep(DataArgs),
}

#[derive(Args)]
struct DataArgs {
  /// Returns CSV: a date column followed by one column per ticker
  #[arg(long, requires = "carbon")]
  returns: Option<PathBuf>,
  /// Carbon intensity CSV: ticker and one numeric column
  #[arg(long, requires = "returns")]
  carbon: Option<PathBuf>,
  /// Run configuration JSON
  #[arg(long)]
  config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
  Table,
  Json,
}

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("sustainable_portfolio=info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn load(args: &DataArgs) -> anyhow::Result<(Workspace, RunConfig)> {
  let (returns, carbon) = match (&args.returns, &args.carbon) {
    (Some(r), Some(c)) => (
      io::read_returns_file(r).with_context(|| format!("reading returns {}", r.display()))?,
      io::read_carbon_file(c).with_context(|| format!("reading carbon {}", c.display()))?,
    ),
    (None, None) => {
      warn!("no data files given; using the synthetic demo dataset");
      demo::demo_dataset()?
    }
    _ => bail!("--returns and --carbon must be given together"),
  };

  let config = match &args.config {
    Some(path) => RunConfig::from_json_file(path)
      .with_context(|| format!("loading config {}", path.display()))?,
    None if args.returns.is_none() => {
      info!("no config given; using the demo thresholds");
      demo::demo_config()
    }
    None => RunConfig::default(),
  };

  info!(
    assets = returns.n_assets(),
    periods = returns.n_periods(),
    "data loaded"
  );
  let workspace = Workspace::prepare(returns, &carbon, &config)?;
  Ok((workspace, config))
}

fn main() -> anyhow::Result<()> {
  init_tracing();
  let cli = Cli::parse();

  match cli.command {
    Commands::Optimize(args) => {
      let (ws, config) = load(&args)?;
      let result = ws.optimize(&config).context("optimization failed")?;
      info!(status = %result.status, "optimization finished");
      match cli.output {
        OutputFormat::Table => print!("{}", report::render_result(&result)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
      }
    }
    Commands::Sweep(args) => {
      let (ws, config) = load(&args)?;
      let table = ws.sweep(&config).context("scenario sweep failed")?;
      match cli.output {
        OutputFormat::Table => print!("{}", report::render_sweep(&table)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
      }
    }
  }

  Ok(())
}
