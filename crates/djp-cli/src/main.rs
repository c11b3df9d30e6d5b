use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use djp_core::{filter_jobs, FilterCriteria};
use djp_sync::{BoardConfig, IntakeSummary, StoreBackend};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "djp-cli")]
#[command(about = "Daily Job Portal command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the web board and the auto-refresh scheduler.
    Serve,
    /// Ingest a CSV file into the configured store.
    Import {
        path: std::path::PathBuf,
        /// Recorded as the author of the imported rows; defaults to DJP_ADMIN_EMAIL.
        #[arg(long)]
        created_by: Option<String>,
    },
    /// Fetch the configured CSV source once and merge it in.
    Refresh,
    /// Print the jobs matching the given filters.
    List(ListArgs),
    /// Apply the Postgres migrations.
    Migrate,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value = "")]
    location: String,
    #[arg(long, default_value = "")]
    job_type: String,
    #[arg(long, default_value = "")]
    experience: String,
    /// One of "Last 24 hours", "Last 3 days", "Last 7 days", "Last 30 days".
    #[arg(long, default_value = "")]
    date_posted: String,
    #[arg(long, default_value = "")]
    q: String,
}

impl From<ListArgs> for FilterCriteria {
    fn from(args: ListArgs) -> Self {
        FilterCriteria {
            location: args.location,
            job_type: args.job_type,
            experience: args.experience,
            date_posted: args.date_posted,
            search: args.q,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_summary(verb: &str, summary: IntakeSummary) {
    match summary.total {
        Some(total) => println!(
            "{verb}: processed={} skipped={} total={total}",
            summary.processed, summary.skipped
        ),
        None => println!(
            "{verb}: processed={} skipped={} (nothing written)",
            summary.processed, summary.skipped
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = BoardConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if config.store == StoreBackend::Postgres {
                config.connect_postgres().await?.migrate().await?;
            }
            djp_web::serve(&config).await?;
        }
        Commands::Import { path, created_by } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let pipeline = config.intake_pipeline().await?;
            let created_by = created_by.or_else(|| config.admin_email.clone());
            let summary = pipeline.import_csv(&text, created_by.as_deref()).await?;
            print_summary("import complete", summary);
        }
        Commands::Refresh => {
            let pipeline = config.intake_pipeline().await?;
            let summary = pipeline.refresh_from_source().await?;
            print_summary("refresh complete", summary);
        }
        Commands::List(args) => {
            let store = config.open_store().await?;
            let jobs = store.load_jobs().await;
            let criteria = FilterCriteria::from(args);
            let visible = filter_jobs(&jobs, &criteria, Utc::now());
            for job in &visible {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    job.id,
                    job.date_posted.format("%Y-%m-%d"),
                    job.job_type,
                    job.title,
                    job.company,
                    job.location
                );
            }
            println!("{} of {} jobs", visible.len(), jobs.len());
        }
        Commands::Migrate => {
            let store = config.connect_postgres().await?;
            store.migrate().await?;
            info!("migrations applied");
        }
    }

    Ok(())
}
