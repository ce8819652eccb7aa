mod args;
mod export;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, Command};
use vulngraph_client::{ApiClient, Filter, HttpPageSource, PageSource, Resource};
use vulngraph_core::{IntegrationConfig, Pipeline, RunReport, StageId, StageOutcome};
use vulngraph_db::{SqliteJobState, default_db_path};
use vulngraph_types::{HostRecord, ScanRecord, ScanResultItem};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = load_config(&args)?;
    let db_path = args.db.clone().unwrap_or_else(default_db_path);

    match args.command {
        Command::Run {
            export,
            stages,
            keep_state,
        } => run(&config, db_path, &stages, keep_state, export).await,
        Command::Probe => probe(&config).await,
        Command::Export { path } => {
            let state = open_state(&db_path)?;
            let (entities, relationships) = export::export_graph(&state, &path).await?;
            eprintln!(
                "Wrote {entities} entities and {relationships} relationships to {}",
                path.display()
            );
            Ok(())
        }
    }
}

/// Config file first, then command-line overrides.
fn load_config(args: &Args) -> Result<IntegrationConfig> {
    let mut config = match &args.config {
        Some(path) => IntegrationConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => IntegrationConfig::default(),
    };
    if let Some(url) = &args.api_url {
        config.api_url = url.clone();
    }
    if let Some(user) = &args.username {
        config.username = user.clone();
    }
    if args.min_scanned_since.is_some() {
        config.min_scanned_since = args.min_scanned_since;
    }
    if args.max_scanned_since.is_some() {
        config.max_scanned_since = args.max_scanned_since;
    }
    if args.include_cves {
        config.include_cve_targets = true;
    }
    Ok(config)
}

fn open_state(path: &std::path::Path) -> Result<SqliteJobState> {
    SqliteJobState::open(path)
        .with_context(|| format!("failed to open job state {}", path.display()))
}

fn http_client(config: &IntegrationConfig) -> Result<ApiClient<HttpPageSource>> {
    let settings = config.http_settings().context("missing API credentials")?;
    let source = HttpPageSource::new(settings).context("failed to build HTTP client")?;
    Ok(ApiClient::new(source, config.paging()))
}

async fn run(
    config: &IntegrationConfig,
    db_path: PathBuf,
    stages: &[StageId],
    keep_state: bool,
    export: Option<PathBuf>,
) -> Result<()> {
    let client = http_client(config)?;
    let state = open_state(&db_path)?;
    if keep_state {
        info!(path = %db_path.display(), "reusing job state from the previous run");
    } else {
        state.clear().context("failed to clear job state")?;
    }

    let mut pipeline =
        Pipeline::new(config, &client, &state).context("invalid configuration")?;
    if !stages.is_empty() {
        pipeline = pipeline.with_stages(stages);
    }
    let (min, max) = config.scan_window(chrono::Utc::now());
    info!(%min, %max, "starting ingestion");

    let report = pipeline.run().await;
    print_report(&report);

    if let Some(path) = export {
        let (entities, relationships) = export::export_graph(&state, &path).await?;
        eprintln!(
            "Wrote {entities} entities and {relationships} relationships to {}",
            path.display()
        );
    }

    let failed = report.failed().count();
    if failed > 0 {
        bail!("{failed} stage(s) failed");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{:<34} {:<10} {:>6} {:>8} {:>9} {:>9} {:>7}",
        "STAGE", "STATUS", "PAGES", "RECORDS", "ENTITIES", "RELATIONS", "ERRORS"
    );
    for outcome in &report.outcomes {
        let status = match outcome {
            StageOutcome::Completed(r) if r.has_soft_errors() => "partial",
            StageOutcome::Completed(_) => "ok",
            StageOutcome::Failed { .. } => "failed",
            StageOutcome::Skipped { .. } => "skipped",
        };
        match outcome.report() {
            Some(r) => println!(
                "{:<34} {:<10} {:>6} {:>8} {:>9} {:>9} {:>7}",
                outcome.stage().as_str(),
                status,
                r.pages,
                r.records,
                r.entities_created,
                r.relationships_created,
                r.page_errors + r.missing + r.duplicates,
            ),
            None => println!("{:<34} {:<10}", outcome.stage().as_str(), status),
        }
        match outcome {
            StageOutcome::Failed { error, .. } => println!("  error: {error}"),
            StageOutcome::Skipped { blocked_by, .. } => println!("  blocked by {blocked_by}"),
            StageOutcome::Completed(r) => {
                if r.partials_consumed_earlier > 0 {
                    println!(
                        "  finding keys already consumed by an earlier run: {}",
                        r.partials_consumed_earlier
                    );
                }
                if r.partials_never_produced > 0 {
                    println!("  finding key sets never produced: {}", r.partials_never_produced);
                }
            }
        }
    }
}

/// Connectivity check: one page of each core resource.
async fn probe(config: &IntegrationConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    let client = http_client(config)?;
    let now = chrono::Utc::now();

    let ids = first_page::<u64, _>(&client, Resource::ScannedHostIds, config.window_filters(now))
        .await
        .context("scanned host id listing failed")?;
    println!("scanned host ids: {}", ids.len());

    let hosts = first_page::<HostRecord, _>(&client, Resource::Hosts, config.window_filters(now))
        .await
        .context("host listing failed")?;
    println!("hosts: {}", hosts.len());

    let scans = first_page::<ScanRecord, _>(&client, Resource::Scans, Vec::new())
        .await
        .context("scan listing failed")?;
    println!("scans: {}", scans.len());

    let Some(scan) = scans.first() else {
        warn!("no scans listed; skipping scan results");
        return Ok(());
    };
    let items = first_page::<ScanResultItem, _>(
        &client,
        Resource::ScanResults,
        vec![Filter::ScanRef(scan.reference.clone())],
    )
    .await
    .with_context(|| format!("results for {} failed", scan.reference))?;
    let findings = items
        .into_iter()
        .filter_map(ScanResultItem::into_finding)
        .count();
    println!("findings in {}: {findings}", scan.reference);
    Ok(())
}

async fn first_page<T, S>(
    client: &ApiClient<S>,
    resource: Resource,
    filters: Vec<Filter>,
) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned,
    S: PageSource,
{
    let mut pages = client.pages::<T>(resource, filters)?;
    match pages.next_page().await {
        Some(page) => Ok(page.records?),
        None => Ok(Vec::new()),
    }
}
