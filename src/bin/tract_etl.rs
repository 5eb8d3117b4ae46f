use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;

use census_tract_etl::cache::FsCache;
use census_tract_etl::census::CensusEtl;
use census_tract_etl::config::{ConfigLoader, ResolvedConfig};
use census_tract_etl::convert::ShapefileReader;
use census_tract_etl::error::EtlError;
use census_tract_etl::etl::{ExtractOptions, ExtractTransformLoad, run_etl};
use census_tract_etl::output::{JsonOutput, OutputMode, log_filter, progress_sink};
use census_tract_etl::source::{HttpSourceFetcher, MirrorSourceFetcher, SourceFetcher};
use census_tract_etl::writer::NationalCsvPolicy;

#[derive(Parser)]
#[command(name = "tract-etl")]
#[command(about = "Census tract boundary ETL: per-state shapefiles to tract lists and a national GeoJSON")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./tract-etl.json when present)
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Overrides `data_root` from the config
    #[arg(long, global = true)]
    data_root: Option<Utf8PathBuf>,

    /// Log pipeline progress to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run extract, transform and load")]
    Run(RunArgs),
    #[command(about = "List the source archives the pipeline would fetch")]
    Sources,
    #[command(about = "List the region codes the pipeline covers")]
    Regions,
}

#[derive(Args)]
struct RunArgs {
    /// Download sources even when they are already extracted
    #[arg(long)]
    refetch: bool,

    /// Convert regions in parallel
    #[arg(long)]
    parallel: bool,

    /// Rewrite us.csv even when it exists
    #[arg(long)]
    overwrite_national_csv: bool,

    /// Copy source archives from this directory instead of downloading
    #[arg(long)]
    mirror: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<EtlError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EtlError) -> u8 {
    match error {
        EtlError::InvalidRegionCode(_)
        | EtlError::ConfigRead(_)
        | EtlError::ConfigParse(_)
        | EtlError::UnsupportedCrs(_)
        | EtlError::MissingColumn { .. } => 2,
        EtlError::SourceUnavailable { .. }
        | EtlError::SourceHttp(_)
        | EtlError::SourceStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.verbose {
        OutputMode::Verbose
    } else {
        OutputMode::Quiet
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(output_mode))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(data_root) = cli.data_root {
        resolved.data_root = data_root;
    }

    match cli.command {
        Commands::Run(args) => run_pipeline(args, resolved, output_mode),
        Commands::Sources => {
            let etl = census_etl(&resolved);
            JsonOutput::print_sources(&etl.data_sources()).into_diagnostic()
        }
        Commands::Regions => JsonOutput::print_regions(&resolved.catalog).into_diagnostic(),
    }
}

fn run_pipeline(
    args: RunArgs,
    mut resolved: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if args.parallel {
        resolved.parallel_conversion = true;
    }
    if args.overwrite_national_csv {
        resolved.national_csv_policy = NationalCsvPolicy::Overwrite;
    }
    if args.mirror.is_some() {
        resolved.source_mirror = args.mirror;
    }
    let options = ExtractOptions {
        use_cached_sources: resolved.use_cached_sources && !args.refetch,
    };

    let fetcher: Box<dyn SourceFetcher> = match &resolved.source_mirror {
        Some(root) => Box::new(MirrorSourceFetcher::new(root.clone())),
        None => Box::new(HttpSourceFetcher::new()?),
    };

    let etl = census_etl(&resolved);
    let report = run_etl(&etl, fetcher.as_ref(), &options, progress_sink(output_mode))?;
    JsonOutput::print_report(&report).into_diagnostic()
}

fn census_etl(resolved: &ResolvedConfig) -> CensusEtl<ShapefileReader, FsCache> {
    CensusEtl::new(
        resolved.layout(),
        resolved.catalog.clone(),
        resolved.settings(),
        ShapefileReader,
        FsCache,
    )
}
