//! Board orchestration: collection merge, admin intake cycles and auto-refresh.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use djp_core::{
    seed_jobs, split_list_field, text_or_none, IdProvider, Job, JobType, MillisIdProvider, Settings,
};
use djp_ingest::{ingest_from, ingest_report, CsvSource, RemoteCsv, SourceError};
use djp_storage::{FileJobStore, HttpClientConfig, HttpFetcher, JobStore, PgJobStore, StoreError};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as ScheduledJob, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "djp-sync";

/// Union keyed by id, incoming winning, newest first. Ties keep first-seen order.
pub fn merge_jobs(existing: Vec<Job>, incoming: Vec<Job>) -> Vec<Job> {
    let mut order = Vec::with_capacity(existing.len() + incoming.len());
    let mut by_id: HashMap<String, Job> = HashMap::with_capacity(order.capacity());
    for job in existing.into_iter().chain(incoming) {
        let id = job.id.clone();
        if by_id.insert(id.clone(), job).is_none() {
            order.push(id);
        }
    }

    let mut merged = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect::<Vec<_>>();
    merged.sort_by(|a, b| b.date_posted.cmp(&a.date_posted));
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    File,
    Postgres,
}

impl StoreBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" | "local" => Some(Self::File),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub store: StoreBackend,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub web_port: u16,
}

impl BoardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            store: non_empty("DJP_STORE")
                .and_then(|v| {
                    let parsed = StoreBackend::parse(&v);
                    if parsed.is_none() {
                        warn!(value = %v, "unknown DJP_STORE value, using file store");
                    }
                    parsed
                })
                .unwrap_or(StoreBackend::File),
            data_dir: non_empty("DJP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            database_url: non_empty("DATABASE_URL"),
            admin_email: non_empty("DJP_ADMIN_EMAIL"),
            admin_password: non_empty("DJP_ADMIN_PASSWORD"),
            user_agent: non_empty("DJP_USER_AGENT").unwrap_or_else(|| "djp-bot/0.1".to_string()),
            http_timeout_secs: non_empty("DJP_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(20),
            web_port: non_empty("DJP_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(8000),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub async fn connect_postgres(&self) -> Result<PgJobStore> {
        let url = self
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set for the postgres store")?;
        PgJobStore::connect(url)
            .await
            .context("connecting to postgres")
    }

    /// The single persistence variant selected by `DJP_STORE`.
    pub async fn open_store(&self) -> Result<Arc<dyn JobStore>> {
        let store: Arc<dyn JobStore> = match self.store {
            StoreBackend::File => Arc::new(FileJobStore::new(self.data_dir.clone())),
            StoreBackend::Postgres => Arc::new(self.connect_postgres().await?),
        };
        info!(backend = store.backend_name(), "opened job store");
        Ok(store)
    }

    pub async fn intake_pipeline(&self) -> Result<IntakePipeline> {
        let store = self.open_store().await?;
        let http = HttpFetcher::new(self.http_client_config())?;
        Ok(IntakePipeline::new(store, Arc::new(MillisIdProvider::new()), http))
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("missing or invalid fields: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },
    #[error("No valid rows found")]
    NoValidRows,
    #[error("could not read the csv source: {0}")]
    Remote(#[from] SourceError),
    #[error("job store unavailable: {0}")]
    Storage(#[from] StoreError),
    #[error("a refresh is already running")]
    RefreshInFlight,
}

/// Counts reported back to the admin after an intake action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeSummary {
    pub processed: usize,
    pub skipped: usize,
    /// Collection size after the save, `None` when nothing was written.
    pub total: Option<usize>,
}

/// Discrete fields from the manual-entry form. List fields are `|`-separated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManualJobForm {
    pub title: String,
    pub company: String,
    pub location: String,
    pub experience: String,
    pub salary: String,
    pub job_type: String,
    pub description: String,
    pub requirements: String,
    pub responsibilities: String,
    pub benefits: String,
    pub contact_email: String,
    pub contact_whatsapp: String,
    pub company_logo: String,
}

impl ManualJobForm {
    pub fn into_job(self, id: String, now: DateTime<Utc>) -> Result<Job, IntakeError> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("title", &self.title),
            ("company", &self.company),
            ("location", &self.location),
            ("experience", &self.experience),
            ("description", &self.description),
        ] {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }

        let job_type = if self.job_type.trim().is_empty() {
            Some(JobType::default())
        } else {
            JobType::parse_label(&self.job_type)
        };
        if job_type.is_none() {
            missing.push("jobType");
        }

        let Some(job_type) = job_type.filter(|_| missing.is_empty()) else {
            return Err(IntakeError::Validation { missing });
        };

        Ok(Job {
            id,
            title: self.title.trim().to_string(),
            company: self.company.trim().to_string(),
            location: self.location.trim().to_string(),
            experience: self.experience.trim().to_string(),
            salary: text_or_none(&self.salary),
            date_posted: now,
            job_type,
            description: self.description.trim().to_string(),
            requirements: split_list_field(&self.requirements),
            responsibilities: split_list_field(&self.responsibilities),
            benefits: text_or_none(&self.benefits).map(|raw| split_list_field(&raw)),
            contact_email: text_or_none(&self.contact_email),
            contact_whatsapp: text_or_none(&self.contact_whatsapp),
            company_logo: text_or_none(&self.company_logo),
        })
    }
}

/// Owns the store and runs every load, merge and save cycle one at a time.
pub struct IntakePipeline {
    store: Arc<dyn JobStore>,
    ids: Arc<dyn IdProvider>,
    http: HttpFetcher,
    write_lock: Mutex<()>,
    refresh_guard: Mutex<()>,
}

impl IntakePipeline {
    pub fn new(store: Arc<dyn JobStore>, ids: Arc<dyn IdProvider>, http: HttpFetcher) -> Self {
        Self {
            store,
            ids,
            http,
            write_lock: Mutex::new(()),
            refresh_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.store.load_jobs().await
    }

    pub async fn settings(&self) -> Settings {
        self.store.load_settings().await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<Settings, IntakeError> {
        let _guard = self.write_lock.lock().await;
        self.store.save_settings(&settings).await?;
        info!(
            source_url = settings.source_url().unwrap_or(""),
            auto_refresh_ms = settings.auto_refresh_ms.unwrap_or(0),
            "saved board settings"
        );
        Ok(settings)
    }

    /// `created_by` is the signed-in admin, recorded where the store keeps authorship.
    pub async fn import_csv(
        &self,
        text: &str,
        created_by: Option<&str>,
    ) -> Result<IntakeSummary, IntakeError> {
        let report = ingest_report(text, self.ids.as_ref());
        if report.jobs.is_empty() {
            return Err(IntakeError::NoValidRows);
        }
        let processed = report.jobs.len();
        let total = self.apply(report.jobs, created_by).await?;
        info!(processed, skipped = report.rejected, total, "imported csv");
        Ok(IntakeSummary {
            processed,
            skipped: report.rejected,
            total: Some(total),
        })
    }

    pub async fn add_manual(
        &self,
        form: ManualJobForm,
        created_by: Option<&str>,
    ) -> Result<Job, IntakeError> {
        self.add_manual_at(form, Utc::now(), created_by).await
    }

    pub async fn add_manual_at(
        &self,
        form: ManualJobForm,
        now: DateTime<Utc>,
        created_by: Option<&str>,
    ) -> Result<Job, IntakeError> {
        let job = form.into_job(self.ids.next_stamp(), now)?;
        let total = self.apply(vec![job.clone()], created_by).await?;
        info!(id = %job.id, total, "added job manually");
        Ok(job)
    }

    /// One fetch, merge and save cycle from the configured source URL.
    pub async fn refresh_from_source(&self) -> Result<IntakeSummary, IntakeError> {
        let settings = self.store.load_settings().await;
        let Some(url) = settings.source_url() else {
            debug!("no csv source configured, nothing to refresh");
            return Ok(IntakeSummary::default());
        };
        let source = RemoteCsv::new(url, self.http.clone());
        self.refresh_with(&source).await
    }

    /// Fails fast with `RefreshInFlight` while another refresh holds the guard.
    pub async fn refresh_with(&self, source: &dyn CsvSource) -> Result<IntakeSummary, IntakeError> {
        let Ok(_in_flight) = self.refresh_guard.try_lock() else {
            return Err(IntakeError::RefreshInFlight);
        };

        let report = ingest_from(source, self.ids.as_ref()).await?;
        if report.jobs.is_empty() {
            debug!(source = %source.describe(), "refresh produced no valid rows");
            return Ok(IntakeSummary {
                processed: 0,
                skipped: report.rejected,
                total: None,
            });
        }

        let processed = report.jobs.len();
        let total = self.apply(report.jobs, None).await?;
        info!(source = %source.describe(), processed, total, "refreshed from csv source");
        Ok(IntakeSummary {
            processed,
            skipped: report.rejected,
            total: Some(total),
        })
    }

    /// Scheduler entry point: skips when a refresh is already running, logs failures.
    pub async fn scheduled_refresh(&self) {
        match self.refresh_from_source().await {
            Ok(summary) => debug!(?summary, "auto-refresh tick finished"),
            Err(IntakeError::RefreshInFlight) => debug!("auto-refresh tick skipped, previous run still in flight"),
            Err(err) => warn!(error = %err, "auto-refresh failed"),
        }
    }

    /// A failed load aborts before anything is written; only a store with
    /// nothing usable in it starts from the seed collection.
    async fn apply(&self, incoming: Vec<Job>, created_by: Option<&str>) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.store.try_load_jobs().await?.unwrap_or_else(seed_jobs);
        let merged = merge_jobs(existing, incoming.clone());
        self.store.commit_merge(&merged, &incoming, created_by).await?;
        Ok(merged.len())
    }
}

/// Periodic refresh driven by `Settings::auto_refresh_interval`.
pub struct RefreshScheduler {
    sched: JobScheduler,
    pipeline: Arc<IntakePipeline>,
    active: Option<(Uuid, Duration)>,
}

impl RefreshScheduler {
    pub async fn new(pipeline: Arc<IntakePipeline>) -> Result<Self> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        Ok(Self {
            sched,
            pipeline,
            active: None,
        })
    }

    pub fn interval(&self) -> Option<Duration> {
        self.active.map(|(_, interval)| interval)
    }

    /// Replaces the repeating job to match `settings`; no interval removes it.
    pub async fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        let wanted = settings.auto_refresh_interval();
        if wanted == self.interval() {
            return Ok(());
        }

        if let Some((job_id, _)) = self.active.take() {
            self.sched
                .remove(&job_id)
                .await
                .context("removing refresh job")?;
        }

        let Some(interval) = wanted else {
            info!("auto-refresh disabled");
            return Ok(());
        };

        let pipeline = self.pipeline.clone();
        let job = ScheduledJob::new_repeated_async(interval, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                pipeline.scheduled_refresh().await;
            })
        })
        .with_context(|| format!("creating refresh job every {interval:?}"))?;
        let job_id = self.sched.add(job).await.context("adding refresh job")?;
        self.active = Some((job_id, interval));
        info!(interval_ms = interval.as_millis() as u64, "auto-refresh scheduled");
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.sched.start().await.context("starting scheduler")
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.sched.shutdown().await.context("stopping scheduler")
    }
}
