use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use esgf_fetch::app::App;
use esgf_fetch::config::{Config, ConfigLoader, ResolvedConfig};
use esgf_fetch::error::FetchError;
use esgf_fetch::nodes::{EsgfStatusClient, NodeStatusOracle};
use esgf_fetch::output::{JsonOutput, TextOutput};
use esgf_fetch::search::{EsgfSearchClient, SearchCache};
use esgf_fetch::store::Store;
use esgf_fetch::transfer::HttpTransfer;
use esgf_fetch::validate::NetcdfValidator;

#[derive(Parser)]
#[command(name = "esgf-fetch")]
#[command(about = "Download version-consistent CMIP6 datasets from the ESGF federation")]
#[command(version, author)]
struct Cli {
    /// Path to the config file (default: esgf-fetch.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search the federation and summarize the reconciled datasets")]
    Search(SearchArgs),
    #[command(about = "Search, filter reachable mirrors and download the datasets")]
    Fetch(FetchArgs),
    #[command(about = "Show which data nodes are currently up")]
    Nodes,
}

#[derive(Args)]
struct SearchArgs {
    /// Drop replicas on unreachable mirrors before summarizing
    #[arg(long)]
    filter_nodes: bool,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    dest: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    /// Skip the reachability filter (downloads will hit dead mirrors)
    #[arg(long)]
    no_filter_nodes: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(fetch) = report.downcast_ref::<FetchError>() {
            return ExitCode::from(map_exit_code(fetch));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::MissingConfig
        | FetchError::ConfigRead(_)
        | FetchError::ConfigParse(_) => 2,
        FetchError::SearchUnavailable { .. } => 2,
        FetchError::SearchHttp { .. }
        | FetchError::SearchStatus { .. }
        | FetchError::SearchResponse { .. }
        | FetchError::NodeStatusHttp(_)
        | FetchError::NodeStatusStatus(_)
        | FetchError::TransferHttp { .. }
        | FetchError::TransferStatus { .. }
        | FetchError::DownloadExhausted { .. }
        | FetchError::NoCommonKey(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match ConfigLoader::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        // `nodes` asks the federation, not the config; defaults are enough.
        Err(FetchError::MissingConfig) if matches!(&cli.command, Commands::Nodes) => {
            ConfigLoader::resolve_config(Config::default())
        }
        Err(err) => return Err(err.into()),
    };

    match cli.command {
        Commands::Search(args) => run_search(args, &config, cli.json),
        Commands::Fetch(args) => run_fetch(args, &config, cli.json),
        Commands::Nodes => run_nodes(&config, cli.json),
    }
}

fn build_app(
    config: &ResolvedConfig,
    dest_override: Option<&str>,
) -> miette::Result<App<EsgfSearchClient, EsgfStatusClient, HttpTransfer, NetcdfValidator>> {
    let destination = dest_override
        .map(Into::into)
        .unwrap_or_else(|| config.destination.clone());
    let store = Store::new(destination).into_diagnostic()?;
    store.ensure_cache_root().into_diagnostic()?;

    let search = EsgfSearchClient::new(config.index_nodes.clone(), Arc::new(SearchCache::new()))
        .into_diagnostic()?;
    let nodes = EsgfStatusClient::new(&config.node_status_url, store.node_status_cache_path())
        .into_diagnostic()?;
    let transfer = HttpTransfer::new().into_diagnostic()?;

    Ok(App::new(store, search, nodes, transfer, NetcdfValidator))
}

fn run_search(args: SearchArgs, config: &ResolvedConfig, json: bool) -> miette::Result<()> {
    let app = build_app(config, None)?;
    let mut catalog = app.search(&config.query).into_diagnostic()?;
    if args.filter_nodes {
        catalog = app.filter_reachable(&catalog).into_diagnostic()?;
    }
    if let Some((start, stop)) = config.span {
        catalog = app.filter_span(&catalog, start, stop);
    }
    let summary = catalog.summary();
    if json {
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    } else {
        TextOutput::print_summary(&summary);
    }
    Ok(())
}

fn run_fetch(args: FetchArgs, config: &ResolvedConfig, json: bool) -> miette::Result<()> {
    let app = build_app(config, args.dest.as_deref())?;
    let mut catalog = app.search(&config.query).into_diagnostic()?;
    if !args.no_filter_nodes {
        catalog = app.filter_reachable(&catalog).into_diagnostic()?;
    }
    if let Some((start, stop)) = config.span {
        catalog = app.filter_span(&catalog, start, stop);
    }
    let workers = args.workers.unwrap_or(config.max_workers);
    let outcome = app.download_all(&catalog, workers).into_diagnostic()?;
    if json {
        JsonOutput::print_download(&outcome).into_diagnostic()?;
    } else {
        TextOutput::print_download(&outcome);
    }
    Ok(())
}

fn run_nodes(config: &ResolvedConfig, json: bool) -> miette::Result<()> {
    let store = Store::new(config.destination.clone()).into_diagnostic()?;
    store.ensure_cache_root().into_diagnostic()?;
    let oracle = EsgfStatusClient::new(&config.node_status_url, store.node_status_cache_path())
        .into_diagnostic()?;
    let status = oracle.node_status().into_diagnostic()?;
    if json {
        JsonOutput::print_nodes(&status).into_diagnostic()?;
    } else {
        TextOutput::print_nodes(&status);
    }
    Ok(())
}
