use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info};

use crate::client::SearchClient;
use crate::config::{DumpConfig, OutputTarget, RawConfig};
use crate::destination::{Destination, FileDestination, Folder, StreamDestination};
use crate::format::Format;
use crate::pipeline::{PipelineOptions, ScrollPipeline};
use crate::report::DumpReport;
use crate::utils;

#[derive(Debug, Parser)]
#[command(name = "esdump", version, about = "Dump your elastic search data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Increase logging verbosity (use -vv for trace level).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Dump every document of the given indexes.
    Dump(DumpArgs),
}

#[derive(Debug, Args)]
pub struct DumpArgs {
    /// TOML file with defaults for any of the flags below.
    #[arg(long, env = "ESDUMP_CONFIG")]
    pub config: Option<PathBuf>,
    /// Search service host [default: localhost].
    #[arg(long, env = "ESDUMP_HOST")]
    pub host: Option<String>,
    /// Search service port [default: 9200].
    #[arg(short, long, env = "ESDUMP_PORT")]
    pub port: Option<u16>,
    /// Documents per scroll page [default: 1000].
    #[arg(long = "scroll_size", visible_alias = "scroll-size", env = "ESDUMP_SCROLL_SIZE")]
    pub scroll_size: Option<usize>,
    /// How long the service keeps a scroll alive between pages [default: 10m].
    #[arg(long = "scroll_time", visible_alias = "scroll-time", env = "ESDUMP_SCROLL_TIME")]
    pub scroll_time: Option<String>,
    /// Number of pages fetched in parallel [default: 10].
    #[arg(short, long, env = "ESDUMP_CONCURRENCY")]
    pub concurrency: Option<usize>,
    /// Indexes to dump (comma separated).
    #[arg(short, long, env = "ESDUMP_INDEX")]
    pub index: Option<String>,
    /// File the data will be dumped to.
    #[arg(short, long, env = "ESDUMP_FILE", conflicts_with = "directory")]
    pub file: Option<PathBuf>,
    /// Directory the files will be dumped to, one or more files per index.
    #[arg(short, long, env = "ESDUMP_DIRECTORY")]
    pub directory: Option<PathBuf>,
    /// Prefix for the file names when --directory is used.
    #[arg(long, env = "ESDUMP_PREFIX")]
    pub prefix: Option<String>,
    /// Documents per file when --directory is used, 0 for a single file [default: 10000].
    #[arg(long, env = "ESDUMP_CHUNK")]
    pub chunk: Option<usize>,
    /// Format the documents are written in [default: raw_source].
    #[arg(long, value_enum, env = "ESDUMP_FORMAT")]
    pub format: Option<Format>,
    /// Timeout for a single request to the search service [default: 60s].
    #[arg(long, env = "ESDUMP_REQUEST_TIMEOUT")]
    pub request_timeout: Option<String>,
}

impl DumpArgs {
    fn overrides(&self) -> RawConfig {
        RawConfig {
            host: self.host.clone(),
            port: self.port,
            scroll_size: self.scroll_size,
            scroll_time: self.scroll_time.clone(),
            concurrency: self.concurrency,
            index: self.index.clone(),
            file: self.file.clone(),
            directory: self.directory.clone(),
            prefix: self.prefix.clone(),
            chunk: self.chunk,
            format: self.format,
            request_timeout: self.request_timeout.clone(),
        }
    }

    pub fn resolve(&self) -> Result<DumpConfig> {
        let base = match &self.config {
            Some(path) => RawConfig::load(path)?,
            None => RawConfig::default(),
        };
        DumpConfig::from_raw(base.merge(self.overrides())).context("invalid dump configuration")
    }
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose)?;

    match cli.command {
        Command::Dump(args) => dump(args.resolve()?),
    }
}

fn open_destination(config: &DumpConfig) -> Result<Arc<dyn Destination>> {
    let format = config.format.formatter();
    let destination: Arc<dyn Destination> = match &config.output {
        OutputTarget::Stdout => Arc::new(StreamDestination::stdout(format)),
        OutputTarget::File(path) => Arc::new(FileDestination::create(path, format)?),
        OutputTarget::Directory {
            dir,
            prefix,
            chunk_size,
        } => Arc::new(Folder::new(dir, prefix.as_str(), *chunk_size, format)?),
    };
    Ok(destination)
}

pub fn dump(config: DumpConfig) -> Result<ExitCode> {
    info!(
        host = %config.source.host,
        port = config.source.port,
        indexes = ?config.indexes,
        concurrency = config.concurrency,
        format = %config.format,
        output = ?config.output,
        "dump configured"
    );

    let client = SearchClient::connect(&config.source)?;
    let destination = open_destination(&config)?;

    let pipeline = ScrollPipeline::new(
        Arc::new(client),
        Arc::clone(&destination),
        PipelineOptions::new(config.concurrency),
    );
    utils::cancel_on_interrupt(pipeline.cancel_flag())?;

    let report = settle(destination.as_ref(), pipeline.run(&config.indexes))?;

    eprint!("{report}");

    if report.is_success() {
        info!("Done");
        Ok(ExitCode::SUCCESS)
    } else {
        for outcome in report.failures() {
            error!(
                index = %outcome.index,
                documents = outcome.documents,
                error = %outcome.error().map(ToString::to_string).unwrap_or_default(),
                "index incomplete"
            );
        }
        Ok(ExitCode::FAILURE)
    }
}

/// Closes the destination whatever the run returned, so buffered records reach their files.
fn settle(destination: &dyn Destination, run: Result<DumpReport>) -> Result<DumpReport> {
    let closed = destination
        .close()
        .context("failed to flush dump output");

    let report = run?;
    closed?;
    Ok(report)
}
