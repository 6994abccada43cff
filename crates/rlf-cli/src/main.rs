use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use rlf_adapters::adapter_for_source;
use rlf_core::LeadSource;
use rlf_storage::RestInserter;
use rlf_sync::{run_sync_once, PipelineConfig, SourceRegistry};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "rlf-cli")]
#[command(about = "Roofing Lead Finder command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape sources and insert leads (the default).
    Scrape(ScrapeArgs),
    /// Print row counts for every lead table.
    Status,
    /// Print the resolved fetch targets per source.
    Targets,
}

#[derive(Debug, Default, Args)]
struct ScrapeArgs {
    /// Only scrape these sources (repeatable).
    #[arg(long = "source")]
    sources: Vec<LeadSource>,
    #[arg(long)]
    workers: Option<usize>,
    /// Log rows instead of inserting them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rlf_cli=info,rlf_sync=info,rlf_storage=info,rlf_adapters=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Scrape(ScrapeArgs::default())) {
        Commands::Scrape(args) => {
            if let Some(workers) = args.workers {
                if workers == 0 {
                    bail!("--workers must be at least 1");
                }
                config.workers = workers;
            }
            config.dry_run = args.dry_run;

            let summary = run_sync_once(&config, &args.sources).await?;
            for report in &summary.reports {
                println!(
                    "{}: {}/{} targets ok ({:.1}%), {} listings, {} inserted, {:.1} listings/min",
                    report.source,
                    report.succeeded_targets,
                    report.total_targets,
                    report.success_rate(),
                    report.total_listings,
                    report.inserted,
                    report.listings_per_minute
                );
            }
            println!(
                "scrape complete: run_id={} sink={} listings={} failed_targets={} reports={}",
                summary.run_id,
                summary.sink,
                summary.total_listings(),
                summary.failed_targets(),
                summary.reports_dir.as_deref().unwrap_or("-")
            );
        }
        Commands::Status => {
            let Some(rest) = config.rest_config() else {
                bail!("SUPABASE_URL and SUPABASE_KEY are required for status");
            };
            let inserter = RestInserter::new(rest)?;
            for source in LeadSource::ALL {
                let table = source.table_name();
                match inserter.table_count(table).await? {
                    Some(count) => println!("{table}: {count}"),
                    None => println!("{table}: unavailable"),
                }
            }
        }
        Commands::Targets => {
            let registry = SourceRegistry::load(&config.workspace_root).await?;
            let enabled = registry.enabled_sources();
            for source in LeadSource::ALL {
                let adapter = adapter_for_source(source);
                let targets = registry.targets_for(adapter.as_ref());
                let state = if enabled.contains(&source) { "enabled" } else { "disabled" };
                println!("{source} ({state}, {} targets)", targets.len());
                for target in targets {
                    println!("  {}", target.url);
                }
            }
            info!(sources = enabled.len(), "targets listed");
        }
    }

    Ok(())
}
