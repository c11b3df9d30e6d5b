//! Persistence adapters (JSON files or Postgres) + remote CSV fetch for DJP.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use djp_core::{seed_jobs, Job, JobType, Settings};
use reqwest::{header, StatusCode};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "djp-storage";

/// Stable file names for the two persisted values.
pub const JOBS_KEY: &str = "djp.jobs.v1.json";
pub const SETTINGS_KEY: &str = "djp.settings.v1.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Whole-value load/save contract shared by every persistence backend.
///
/// `try_load_jobs` reports failures; `Ok(None)` means nothing usable is stored
/// yet and callers should start from the seed collection. `load_jobs` is the
/// read-only view and never fails.
#[async_trait]
pub trait JobStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn try_load_jobs(&self) -> Result<Option<Vec<Job>>, StoreError>;

    async fn load_jobs(&self) -> Vec<Job> {
        match self.try_load_jobs().await {
            Ok(Some(jobs)) => jobs,
            Ok(None) => seed_jobs(),
            Err(err) => {
                warn!(backend = self.backend_name(), error = %err, "job load failed; serving seed collection");
                seed_jobs()
            }
        }
    }

    /// Replaces the stored collection with `jobs`.
    async fn save_jobs(&self, jobs: &[Job]) -> Result<(), StoreError>;

    /// Persists a merge result. `incoming` are the rows that caused it and are
    /// credited to `created_by` where the backend records authorship.
    async fn commit_merge(
        &self,
        merged: &[Job],
        _incoming: &[Job],
        _created_by: Option<&str>,
    ) -> Result<(), StoreError> {
        self.save_jobs(merged).await
    }

    async fn load_settings(&self) -> Settings;

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError>;
}

/// Local variant: two JSON documents in a data directory.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    root: PathBuf,
}

impl FileJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn read_key(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Write through a temp file + rename so readers never observe a torn value.
    async fn write_key_atomic(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;

        let target = self.path_for(key);
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        let write_result = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &target).await
        }
        .await;

        if let Err(err) = write_result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path: target,
                source: err,
            });
        }
        Ok(())
    }
}

/// Revive a persisted job array, dropping records that no longer deserialize.
/// `None` means the document as a whole is unusable.
pub fn revive_jobs(text: &str) -> Option<Vec<Job>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let items = value.as_array()?;
    let total = items.len();
    let jobs = items
        .iter()
        .filter_map(|item| serde_json::from_value::<Job>(item.clone()).ok())
        .collect::<Vec<_>>();
    if jobs.len() < total {
        debug!(dropped = total - jobs.len(), "dropped unreadable job records");
    }
    if jobs.is_empty() {
        None
    } else {
        Some(jobs)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn try_load_jobs(&self) -> Result<Option<Vec<Job>>, StoreError> {
        let Some(text) = self.read_key(JOBS_KEY).await? else {
            return Ok(None);
        };
        let jobs = revive_jobs(&text);
        if jobs.is_none() {
            warn!(root = %self.root.display(), "stored jobs unusable; starting from seed collection");
        }
        Ok(jobs)
    }

    async fn save_jobs(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(jobs).map_err(|source| StoreError::Serialize {
            what: "jobs",
            source,
        })?;
        self.write_key_atomic(JOBS_KEY, &bytes).await?;
        info!(count = jobs.len(), "saved job collection");
        Ok(())
    }

    async fn load_settings(&self) -> Settings {
        let text = match self.read_key(SETTINGS_KEY).await {
            Ok(Some(text)) => text,
            Ok(None) => return Settings::default(),
            Err(err) => {
                warn!(error = %err, "unreadable settings file; using defaults");
                return Settings::default();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|err| {
            warn!(error = %err, "stored settings unusable; using defaults");
            Settings::default()
        })
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(settings).map_err(|source| StoreError::Serialize {
            what: "settings",
            source,
        })?;
        self.write_key_atomic(SETTINGS_KEY, &bytes).await
    }
}

const INSERT_JOB_SQL: &str = r#"
    INSERT INTO jobs (
        id, title, company, location, experience, salary, date_posted, job_type,
        description, requirements, responsibilities, benefits,
        contact_email, contact_whatsapp, company_logo, created_by
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
"#;

// created_by and created_at belong to the first insert and are never rewritten.
const UPDATE_JOB_SQL: &str = r#"
    UPDATE jobs
       SET title = $2, company = $3, location = $4, experience = $5, salary = $6,
           date_posted = $7, job_type = $8, description = $9, requirements = $10,
           responsibilities = $11, benefits = $12, contact_email = $13,
           contact_whatsapp = $14, company_logo = $15
     WHERE id = $1
"#;

/// Remote variant: a relational `jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Fails with `StoreError::Database` on a constraint violation such as a duplicate id.
    pub async fn insert_one(&self, job: &Job, created_by: Option<&str>) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_job(&mut conn, job, created_by).await?;
        Ok(())
    }

    /// All-or-nothing: one failing row rolls back the whole batch.
    pub async fn insert_many(&self, jobs: &[Job], created_by: Option<&str>) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            insert_job(&mut tx, job, created_by).await?;
        }
        tx.commit().await?;
        Ok(jobs.len())
    }

    /// Rows that fail to decode are logged and skipped so one bad row cannot
    /// hide the rest of the board.
    pub async fn select_all(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, company, location, experience, salary, date_posted, job_type,
                   description, requirements, responsibilities, benefits,
                   contact_email, contact_whatsapp, company_logo
              FROM jobs
             ORDER BY date_posted DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match job_from_row(&row) {
                Ok(Some(job)) => out.push(job),
                Ok(None) => {}
                Err(err) => {
                    let id = row.try_get::<String, _>("id").unwrap_or_default();
                    warn!(%id, error = %err, "skipping undecodable job row");
                }
            }
        }
        Ok(out)
    }

    pub async fn created_by(&self, id: &str) -> Result<Option<String>, StoreError> {
        let author = sqlx::query_scalar::<_, Option<String>>("SELECT created_by FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(author.flatten())
    }
}

fn job_from_row(row: &PgRow) -> Result<Option<Job>, sqlx::Error> {
    let job_type_label: String = row.try_get("job_type")?;
    let Some(job_type) = JobType::parse_label(&job_type_label) else {
        let id: String = row.try_get("id")?;
        warn!(%id, job_type = %job_type_label, "skipping job row with unknown job type");
        return Ok(None);
    };
    let date_posted: DateTime<Utc> = row.try_get("date_posted")?;
    Ok(Some(Job {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        location: row.try_get("location")?,
        experience: row.try_get("experience")?,
        salary: row.try_get("salary")?,
        date_posted,
        job_type,
        description: row.try_get("description")?,
        requirements: row.try_get("requirements")?,
        responsibilities: row.try_get("responsibilities")?,
        benefits: row.try_get("benefits")?,
        contact_email: row.try_get("contact_email")?,
        contact_whatsapp: row.try_get("contact_whatsapp")?,
        company_logo: row.try_get("company_logo")?,
    }))
}

fn bind_job<'q>(sql: &'q str, job: &'q Job) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    sqlx::query(sql)
        .bind(&job.id)
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.location)
        .bind(&job.experience)
        .bind(job.salary.clone())
        .bind(job.date_posted)
        .bind(job.job_type.as_str())
        .bind(&job.description)
        .bind(job.requirements.clone())
        .bind(job.responsibilities.clone())
        .bind(job.benefits.clone())
        .bind(job.contact_email.clone())
        .bind(job.contact_whatsapp.clone())
        .bind(job.company_logo.clone())
}

async fn insert_job(
    conn: &mut PgConnection,
    job: &Job,
    created_by: Option<&str>,
) -> Result<(), sqlx::Error> {
    bind_job(INSERT_JOB_SQL, job)
        .bind(created_by)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Inserts the rows the table lacks and rewrites existing ones. With
/// `incoming` set, only those ids are rewritten or credited to `created_by`.
async fn write_jobs(
    conn: &mut PgConnection,
    jobs: &[Job],
    incoming: Option<&HashSet<&str>>,
    created_by: Option<&str>,
) -> Result<(), sqlx::Error> {
    let ids = jobs.iter().map(|job| job.id.clone()).collect::<Vec<_>>();
    let known: HashSet<String> =
        sqlx::query_scalar::<_, String>("SELECT id FROM jobs WHERE id = ANY($1) FOR UPDATE")
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    for job in jobs {
        let is_incoming = incoming.map_or(true, |set| set.contains(job.id.as_str()));
        if known.contains(&job.id) {
            if is_incoming {
                bind_job(UPDATE_JOB_SQL, job).execute(&mut *conn).await?;
            }
        } else {
            insert_job(conn, job, created_by.filter(|_| is_incoming)).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl JobStore for PgJobStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn try_load_jobs(&self) -> Result<Option<Vec<Job>>, StoreError> {
        let jobs = self.select_all().await?;
        Ok(if jobs.is_empty() { None } else { Some(jobs) })
    }

    async fn save_jobs(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let ids = jobs.iter().map(|job| job.id.clone()).collect::<Vec<_>>();
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM jobs WHERE id <> ALL($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        write_jobs(&mut tx, jobs, None, None).await?;
        tx.commit().await?;
        info!(count = jobs.len(), removed, "replaced job table contents");
        Ok(())
    }

    /// Never deletes: rows the merge did not see (including ones that failed
    /// to decode) stay as they are, and only incoming rows are rewritten.
    async fn commit_merge(
        &self,
        merged: &[Job],
        incoming: &[Job],
        created_by: Option<&str>,
    ) -> Result<(), StoreError> {
        let incoming_ids = incoming.iter().map(|job| job.id.as_str()).collect::<HashSet<_>>();
        let mut tx = self.pool.begin().await?;
        write_jobs(&mut tx, merged, Some(&incoming_ids), created_by).await?;
        tx.commit().await?;
        info!(count = incoming.len(), created_by = created_by.unwrap_or(""), "stored incoming jobs");
        Ok(())
    }

    async fn load_settings(&self) -> Settings {
        let row = sqlx::query("SELECT settings_json FROM board_settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(Some(row)) => row
                .try_get::<serde_json::Value, _>("settings_json")
                .ok()
                .and_then(|value| serde_json::from_value(value).ok())
                .unwrap_or_default(),
            Ok(None) => Settings::default(),
            Err(err) => {
                warn!(error = %err, "settings select failed; using defaults");
                Settings::default()
            }
        }
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let value = serde_json::to_value(settings).map_err(|source| StoreError::Serialize {
            what: "settings",
            source,
        })?;
        sqlx::query(
            r#"
            INSERT INTO board_settings (id, settings_json, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE
               SET settings_json = EXCLUDED.settings_json,
                   updated_at = NOW()
            "#,
        )
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedText {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-attempt GET client for published CSV sheets. Failures surface to the caller.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<FetchedText, FetchError> {
        let span = info_span!("csv_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .header(header::CACHE_CONTROL, "no-store")
                .send()
                .await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = resp.text().await?;
            debug!(bytes = body.len(), "fetched csv source");
            Ok(FetchedText {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn mk_job(id: &str, day: u32) -> Job {
        Job {
            id: id.to_string(),
            title: "DevOps Engineer".into(),
            company: "CloudScale Systems".into(),
            location: "Hyderabad, India".into(),
            experience: "4-7 years".into(),
            salary: Some("₹20-35 LPA".into()),
            date_posted: Utc
                .with_ymd_and_hms(2025, 10, day, 9, 30, 15)
                .single()
                .unwrap()
                + chrono::Duration::milliseconds(123),
            job_type: JobType::Contract,
            description: "Manage cloud infrastructure".into(),
            requirements: vec!["Docker".into(), "Kubernetes".into()],
            responsibilities: vec!["Automate deployments".into()],
            benefits: Some(vec!["Remote Work".into()]),
            contact_email: Some("devops@cloudscale.com".into()),
            contact_whatsapp: None,
            company_logo: None,
        }
    }

    #[tokio::test]
    async fn jobs_round_trip_through_file_store() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path());
        let jobs = vec![mk_job("a", 20), mk_job("b", 21)];

        store.save_jobs(&jobs).await.expect("save");
        let loaded = store.load_jobs().await;

        assert_eq!(loaded, jobs);
        assert_eq!(
            loaded[0].date_posted.timestamp_millis(),
            jobs[0].date_posted.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn missing_store_serves_seed_collection() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path().join("never-written"));
        assert_eq!(store.load_jobs().await, seed_jobs());
        assert_eq!(store.load_settings().await, Settings::default());
    }

    #[tokio::test]
    async fn corrupt_or_non_array_or_empty_data_falls_back_to_seed() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path());
        for raw in ["{not json", r#"{"jobs": []}"#, "[]", r#"[{"id": 1}]"#] {
            std::fs::write(store.path_for(JOBS_KEY), raw).unwrap();
            assert_eq!(store.load_jobs().await, seed_jobs(), "input {raw}");
        }
    }

    #[tokio::test]
    async fn unreadable_records_are_dropped_individually() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path());
        let good = serde_json::to_value(mk_job("ok", 22)).unwrap();
        let doc = serde_json::json!([good, {"id": "broken", "datePosted": "garbage"}]);
        std::fs::write(store.path_for(JOBS_KEY), doc.to_string()).unwrap();

        let loaded = store.load_jobs().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "ok");
    }

    #[tokio::test]
    async fn settings_round_trip_and_corrupt_settings_default() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path());
        let settings = Settings {
            csv_source_url: Some("https://example.com/pub?output=csv".into()),
            auto_refresh_ms: Some(3_600_000),
        };
        store.save_settings(&settings).await.expect("save settings");
        assert_eq!(store.load_settings().await, settings);

        std::fs::write(store.path_for(SETTINGS_KEY), "[1,2").unwrap();
        assert_eq!(store.load_settings().await, Settings::default());
    }

    #[tokio::test]
    async fn atomic_writes_leave_no_temp_files_behind() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path());
        store.save_jobs(&[mk_job("a", 20)]).await.expect("first save");
        store.save_jobs(&[mk_job("b", 21)]).await.expect("overwrite");

        let names = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![JOBS_KEY.to_string()]);
        assert_eq!(store.load_jobs().await[0].id, "b");
    }

    #[test]
    fn persisted_json_uses_camel_case_keys() {
        let text = serde_json::to_string(&[mk_job("a", 20)]).unwrap();
        assert!(text.contains("\"datePosted\":\"2025-10-20T09:30:15.123Z\""));
        assert!(text.contains("\"jobType\":\"Contract\""));
        assert!(revive_jobs(&text).is_some());
    }

    #[tokio::test]
    async fn unreadable_jobs_file_is_an_error_not_an_empty_store() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path());
        std::fs::create_dir(store.path_for(JOBS_KEY)).unwrap();

        let err = store.try_load_jobs().await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }), "got {err}");
        // The read-only view still renders something.
        assert_eq!(store.load_jobs().await, seed_jobs());
        assert!(store.path_for(JOBS_KEY).is_dir());
    }

    #[tokio::test]
    async fn missing_or_unusable_jobs_file_loads_as_none() {
        let dir = tempdir().expect("tempdir");
        let store = FileJobStore::new(dir.path());
        assert!(store.try_load_jobs().await.unwrap().is_none());

        std::fs::write(store.path_for(JOBS_KEY), "[]").unwrap();
        assert!(store.try_load_jobs().await.unwrap().is_none());
    }

    /// Isolated store in a throwaway schema; `None` when `DATABASE_URL` is unset.
    async fn scratch_pg_store() -> Option<(PgJobStore, String)> {
        use sqlx::Executor;

        let url = std::env::var("DATABASE_URL").ok()?;
        let schema = format!("djp_test_{}", Uuid::new_v4().simple());
        let admin = PgPool::connect(&url).await.expect("connect");
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .expect("create schema");
        admin.close().await;

        let search_path = format!("SET search_path TO {schema}");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .after_connect(move |conn, _meta| {
                let sql = search_path.clone();
                Box::pin(async move {
                    conn.execute(sql.as_str()).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .expect("connect scratch pool");
        let store = PgJobStore::from_pool(pool);
        store.migrate().await.expect("migrate");
        Some((store, schema))
    }

    async fn drop_scratch(store: PgJobStore, schema: String) {
        sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
            .execute(store.pool())
            .await
            .expect("drop schema");
    }

    #[tokio::test]
    async fn pg_insert_one_records_author_and_rejects_duplicates() {
        let Some((store, schema)) = scratch_pg_store().await else {
            return;
        };
        let job = mk_job("pg-1", 20);
        store.insert_one(&job, Some("admin@djp.test")).await.expect("insert");
        assert_eq!(store.select_all().await.unwrap(), vec![job.clone()]);
        assert_eq!(store.created_by("pg-1").await.unwrap().as_deref(), Some("admin@djp.test"));

        let err = store.insert_one(&job, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "got {err}");
        drop_scratch(store, schema).await;
    }

    #[tokio::test]
    async fn pg_insert_many_rolls_back_on_duplicate_id() {
        let Some((store, schema)) = scratch_pg_store().await else {
            return;
        };
        store.insert_one(&mk_job("dup", 20), None).await.expect("insert");

        let batch = vec![mk_job("fresh", 21), mk_job("dup", 22)];
        assert!(store.insert_many(&batch, Some("admin@djp.test")).await.is_err());

        let ids = store
            .select_all()
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["dup".to_string()]);
        drop_scratch(store, schema).await;
    }

    #[tokio::test]
    async fn pg_select_all_orders_newest_first_and_skips_bad_rows() {
        let Some((store, schema)) = scratch_pg_store().await else {
            return;
        };
        let written = store
            .insert_many(&[mk_job("mid", 15), mk_job("old", 10), mk_job("new", 25)], None)
            .await
            .expect("insert many");
        assert_eq!(written, 3);
        sqlx::query("UPDATE jobs SET requirements = ARRAY['Rust', NULL] WHERE id = 'mid'")
            .execute(store.pool())
            .await
            .unwrap();

        let ids = store
            .select_all()
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);
        drop_scratch(store, schema).await;
    }

    #[tokio::test]
    async fn pg_save_and_load_round_trip() {
        let Some((store, schema)) = scratch_pg_store().await else {
            return;
        };
        assert!(store.try_load_jobs().await.unwrap().is_none());
        assert_eq!(store.load_jobs().await, seed_jobs());

        let jobs = vec![mk_job("b", 21), mk_job("a", 20)];
        store.save_jobs(&jobs).await.expect("save");
        assert_eq!(store.load_jobs().await, jobs);

        store.save_jobs(&jobs[..1]).await.expect("shrink");
        assert_eq!(store.load_jobs().await, jobs[..1].to_vec());

        let settings = Settings {
            csv_source_url: Some("https://example.com/sheet.csv".into()),
            auto_refresh_ms: Some(60_000),
        };
        store.save_settings(&settings).await.expect("save settings");
        assert_eq!(store.load_settings().await, settings);
        drop_scratch(store, schema).await;
    }

    #[tokio::test]
    async fn pg_commit_merge_keeps_unseen_rows_and_authorship() {
        let Some((store, schema)) = scratch_pg_store().await else {
            return;
        };
        store
            .insert_many(&[mk_job("kept", 10), mk_job("edited", 11)], Some("first@djp.test"))
            .await
            .expect("insert many");

        let mut edited = mk_job("edited", 11);
        edited.title = "Staff DevOps Engineer".into();
        let incoming = vec![edited.clone(), mk_job("new", 12)];
        // `kept` is absent from the merge result and must survive anyway.
        store
            .commit_merge(&incoming, &incoming, Some("second@djp.test"))
            .await
            .expect("commit");

        let jobs = store.select_all().await.unwrap();
        let ids = jobs.iter().map(|job| job.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["new", "edited", "kept"]);
        assert_eq!(jobs[1].title, "Staff DevOps Engineer");
        assert_eq!(store.created_by("edited").await.unwrap().as_deref(), Some("first@djp.test"));
        assert_eq!(store.created_by("new").await.unwrap().as_deref(), Some("second@djp.test"));
        drop_scratch(store, schema).await;
    }
}
