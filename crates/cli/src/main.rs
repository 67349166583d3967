mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// starforge - incremental asset builds for mod projects
#[derive(Parser)]
#[command(name = "starforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Project directory (default: current directory)
  #[arg(short = 'C', long, global = true, default_value = ".")]
  project: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build dirty assets
  Build {
    /// Rebuild every asset, ignoring the build state
    #[arg(short, long)]
    force: bool,

    /// Pack the build output into the archive
    #[arg(long)]
    archive: bool,

    /// Also write the distribution package
    #[arg(long)]
    package: bool,
  },

  /// Rebuild whenever the asset tree changes
  Watch {
    /// Quiet period after the first change, e.g. "500ms"
    #[arg(long, value_parser = humantime::parse_duration)]
    debounce: Option<Duration>,
  },

  /// Insert an archive into a base ROM
  Patch {
    /// ROM image to patch in place
    #[arg(long)]
    rom: PathBuf,

    #[command(flatten)]
    source: PatchSource,

    #[command(flatten)]
    start: ChainStart,
  },

  /// Build and write the distribution package
  Package {
    /// Package path (default: .starforge/build/<id>.tar.gz)
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// List the archive chain inside a ROM
  Inspect {
    /// ROM image to read
    #[arg(long)]
    rom: PathBuf,

    #[command(flatten)]
    start: ChainStart,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PatchSource {
  /// Archive file to insert
  #[arg(long)]
  archive: Option<PathBuf>,

  /// Distribution package whose archive is inserted at its own address
  #[arg(long, conflicts_with_all = ["start", "syms"])]
  package: Option<PathBuf>,
}

/// Where the archive chain starts. Defaults to the engine's usual address.
#[derive(Args)]
#[group(multiple = false)]
struct ChainStart {
  /// Chain start address, hex with 0x or decimal
  #[arg(long, value_parser = parse_start)]
  start: Option<u32>,

  /// Linker symbol file defining mapfs_ROM_START
  #[arg(long)]
  syms: Option<PathBuf>,
}

fn parse_start(value: &str) -> std::result::Result<u32, String> {
  starforge_lib::archive::symbols::parse_address(value).ok_or_else(|| format!("invalid address: {value}"))
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build { force, archive, package } => cmd::cmd_build(&cli.project, force, archive, package),
    Commands::Watch { debounce } => cmd::cmd_watch(&cli.project, debounce),
    Commands::Patch { rom, source, start } => match source {
      PatchSource {
        package: Some(package), ..
      } => cmd::cmd_patch_package(&rom, &package),
      PatchSource {
        archive: Some(archive), ..
      } => cmd::cmd_patch(&rom, &archive, start.start, start.syms.as_deref()),
      PatchSource { .. } => anyhow::bail!("either --archive or --package is required"),
    },
    Commands::Package { output } => cmd::cmd_package(&cli.project, output.as_deref()),
    Commands::Inspect { rom, start, output } => cmd::cmd_inspect(&rom, start.start, start.syms.as_deref(), output),
  }
}
