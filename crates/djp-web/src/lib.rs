//! Axum + Askama surface for the job board: public browse pages, JSON API and admin intake.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use djp_core::{
    age_in_days, encode_component, filter_jobs, job_type_counts, text_or_none, DatePostedBucket,
    FilterCriteria, Job, JobType, Settings,
};
use djp_ingest::RECOGNIZED_HEADER;
use djp_sync::{BoardConfig, IntakeError, IntakePipeline, IntakeSummary, ManualJobForm, RefreshScheduler};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "djp-web";

pub const SESSION_COOKIE: &str = "djp_session";

/// Pluggable admin credential check.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, email: &str, password: &str) -> bool;
}

/// One configured admin account. Refuses everyone when either half is missing.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialVerifier {
    email: Option<String>,
    password_sha256: Option<String>,
}

impl StaticCredentialVerifier {
    pub fn new(email: Option<&str>, password: Option<&str>) -> Self {
        Self {
            email: email
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty()),
            password_sha256: password.filter(|p| !p.is_empty()).map(sha256_hex),
        }
    }

    pub fn from_config(config: &BoardConfig) -> Self {
        if config.admin_email.is_none() || config.admin_password.is_none() {
            warn!("DJP_ADMIN_EMAIL or DJP_ADMIN_PASSWORD unset, admin login disabled");
        }
        Self::new(config.admin_email.as_deref(), config.admin_password.as_deref())
    }
}

impl CredentialVerifier for StaticCredentialVerifier {
    fn verify(&self, email: &str, password: &str) -> bool {
        let (Some(expected_email), Some(expected_digest)) = (&self.email, &self.password_sha256)
        else {
            return false;
        };
        email.trim().to_lowercase() == *expected_email && sha256_hex(password) == *expected_digest
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub text: String,
    pub is_error: bool,
}

/// How long an admin login stays valid.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug)]
struct SessionEntry {
    email: String,
    issued_at: Instant,
    flash: Option<Flash>,
}

/// Logged-in admin sessions keyed by opaque token. Each remembers who signed in
/// and an optional pending flash message, and lapses after the store's TTL.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Also drops every expired session.
    pub async fn issue(&self, email: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.issued_at.elapsed() < self.ttl);
        sessions.insert(
            token.clone(),
            SessionEntry {
                email: email.trim().to_lowercase(),
                issued_at: Instant::now(),
                flash: None,
            },
        );
        token
    }

    /// Email of the admin behind a live token.
    pub async fn email_for(&self, token: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(token)
            .filter(|entry| entry.issued_at.elapsed() < self.ttl)
            .map(|entry| entry.email.clone())
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        self.email_for(token).await.is_some()
    }

    /// Sessions held in memory, expired ones included until the next sweep.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    pub async fn set_flash(&self, token: &str, flash: Flash) {
        if let Some(entry) = self.sessions.write().await.get_mut(token) {
            entry.flash = Some(flash);
        }
    }

    pub async fn take_flash(&self, token: &str) -> Option<Flash> {
        self.sessions
            .write()
            .await
            .get_mut(token)
            .and_then(|entry| entry.flash.take())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakePipeline>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub sessions: Arc<SessionStore>,
    pub scheduler: Option<Arc<Mutex<RefreshScheduler>>>,
}

impl AppState {
    pub fn new(intake: Arc<IntakePipeline>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            intake,
            verifier,
            sessions: Arc::new(SessionStore::default()),
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<Mutex<RefreshScheduler>>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Human label for how long ago a job was posted.
pub fn posted_ago(now: DateTime<Utc>, date: DateTime<Utc>) -> String {
    let days = age_in_days(date, now);
    match days {
        i64::MIN..=0 => "today".to_string(),
        1 => "1 day ago".to_string(),
        2..=29 => format!("{days} days ago"),
        _ => {
            let months = days / 30;
            if months == 1 {
                "1 month ago".to_string()
            } else {
                format!("{months} months ago")
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SelectOption {
    value: String,
    label: String,
    selected: bool,
}

#[derive(Debug, Clone)]
struct FacetCountRow {
    label: String,
    count: usize,
    selected: bool,
}

#[derive(Debug, Clone)]
struct JobCard {
    href: String,
    title: String,
    company: String,
    location: String,
    experience: String,
    job_type: String,
    salary: String,
    has_salary: bool,
    posted: String,
}

impl JobCard {
    fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            href: format!("/jobs/{}", encode_component(&job.id)),
            title: job.title.clone(),
            company: job.company.clone(),
            location: job.location.clone(),
            experience: job.experience.clone(),
            job_type: job.job_type.to_string(),
            salary: job.salary.clone().unwrap_or_default(),
            has_salary: job.salary.is_some(),
            posted: posted_ago(now, job.date_posted),
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    search: String,
    location: String,
    job_type_options: Vec<SelectOption>,
    experience_options: Vec<SelectOption>,
    date_options: Vec<SelectOption>,
    filters_active: bool,
    shown: usize,
    total: usize,
    facets: Vec<FacetCountRow>,
    cards: Vec<JobCard>,
}

#[derive(Template)]
#[template(path = "job_detail.html")]
struct JobDetailTemplate {
    title: String,
    company: String,
    location: String,
    experience: String,
    job_type: String,
    salary: String,
    has_salary: bool,
    posted: String,
    description: String,
    requirements: Vec<String>,
    responsibilities: Vec<String>,
    benefits: Vec<String>,
    company_logo: String,
    has_logo: bool,
    apply_href: String,
    has_apply: bool,
    share_text: String,
}

#[derive(Template)]
#[template(path = "admin_login.html")]
struct AdminLoginTemplate {
    email: String,
    error: String,
    has_error: bool,
}

#[derive(Template)]
#[template(path = "admin.html")]
struct AdminTemplate {
    total_jobs: usize,
    csv_source_url: String,
    auto_refresh_ms: String,
    csv_header: &'static str,
    job_type_labels: Vec<&'static str>,
    flash_text: String,
    flash_is_error: bool,
    has_flash: bool,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ImportForm {
    #[serde(default)]
    csv: String,
}

#[derive(Debug, Deserialize)]
struct SettingsForm {
    #[serde(default)]
    csv_source_url: String,
    #[serde(default)]
    auto_refresh_ms: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/jobs/{id}", get(job_detail_handler))
        .route("/api/jobs", get(api_jobs_handler))
        .route("/api/jobs/{id}", get(api_job_handler))
        .route("/admin", get(admin_handler))
        .route("/admin/login", get(login_page_handler).post(login_handler))
        .route("/admin/logout", post(logout_handler))
        .route("/admin/import", post(admin_import_handler))
        .route("/admin/jobs", post(admin_add_job_handler))
        .route("/admin/settings", post(admin_settings_handler))
        .route("/admin/refresh", post(admin_refresh_handler))
        .with_state(Arc::new(state))
}

/// Starts the auto-refresh scheduler from the stored settings, then serves until the listener fails.
pub async fn serve(config: &BoardConfig) -> anyhow::Result<()> {
    let intake = Arc::new(config.intake_pipeline().await?);
    let verifier = Arc::new(StaticCredentialVerifier::from_config(config));

    let mut scheduler = RefreshScheduler::new(intake.clone()).await?;
    scheduler.apply_settings(&intake.settings().await).await?;
    scheduler.start().await?;

    let state = AppState::new(intake, verifier).with_scheduler(Arc::new(Mutex::new(scheduler)));
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "serving job board");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(&BoardConfig::from_env()).await
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(criteria): Query<FilterCriteria>,
) -> Response {
    let jobs = state.intake.jobs().await;
    let now = Utc::now();
    let visible = filter_jobs(&jobs, &criteria, now);

    let facets = job_type_counts(&jobs)
        .into_iter()
        .map(|(job_type, count)| FacetCountRow {
            label: job_type.to_string(),
            count,
            selected: criteria.job_type == job_type.as_str(),
        })
        .collect::<Vec<_>>();

    let job_type_options = JobType::ALL
        .iter()
        .map(|t| select_option(t.as_str(), &criteria.job_type))
        .collect();
    let experience_options = jobs
        .iter()
        .map(|j| j.experience.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|e| select_option(e, &criteria.experience))
        .collect();
    let date_options = DatePostedBucket::ALL
        .iter()
        .map(|b| select_option(b.label(), &criteria.date_posted))
        .collect();

    render_html(IndexTemplate {
        search: criteria.search.clone(),
        location: criteria.location.clone(),
        job_type_options,
        experience_options,
        date_options,
        filters_active: criteria.is_active(),
        shown: visible.len(),
        total: jobs.len(),
        facets,
        cards: visible.iter().map(|j| JobCard::from_job(j, now)).collect(),
    })
}

fn select_option(value: &str, current: &str) -> SelectOption {
    SelectOption {
        value: value.to_string(),
        label: value.to_string(),
        selected: value == current,
    }
}

async fn job_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let Some(job) = state.intake.jobs().await.into_iter().find(|j| j.id == id) else {
        return (StatusCode::NOT_FOUND, Html("Job not found".to_string())).into_response();
    };

    let apply_href = job.apply_target().map(|t| t.href()).unwrap_or_default();
    render_html(JobDetailTemplate {
        has_salary: job.salary.is_some(),
        has_logo: job.company_logo.is_some(),
        has_apply: !apply_href.is_empty(),
        posted: posted_ago(Utc::now(), job.date_posted),
        share_text: job.share_text(),
        job_type: job.job_type.to_string(),
        apply_href,
        title: job.title,
        company: job.company,
        location: job.location,
        experience: job.experience,
        salary: job.salary.unwrap_or_default(),
        description: job.description,
        requirements: job.requirements,
        responsibilities: job.responsibilities,
        benefits: job.benefits.unwrap_or_default(),
        company_logo: job.company_logo.unwrap_or_default(),
    })
}

async fn api_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(criteria): Query<FilterCriteria>,
) -> Response {
    let jobs = state.intake.jobs().await;
    let visible = filter_jobs(&jobs, &criteria, Utc::now());
    Json(visible).into_response()
}

async fn api_job_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.intake.jobs().await.into_iter().find(|j| j.id == id) {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "job not found" })),
        )
            .into_response(),
    }
}

async fn login_page_handler() -> Response {
    render_html(AdminLoginTemplate {
        email: String::new(),
        error: String::new(),
        has_error: false,
    })
}

async fn login_handler(State(state): State<Arc<AppState>>, Form(form): Form<LoginForm>) -> Response {
    if !state.verifier.verify(&form.email, &form.password) {
        warn!("rejected admin login");
        let mut resp = render_html(AdminLoginTemplate {
            email: form.email,
            error: "Invalid email or password".to_string(),
            has_error: true,
        });
        *resp.status_mut() = StatusCode::UNAUTHORIZED;
        return resp;
    }

    let token = state.sessions.issue(&form.email).await;
    info!("admin logged in");
    with_cookie(
        Redirect::to("/admin").into_response(),
        &format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax"),
    )
}

async fn logout_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.revoke(cookie.value()).await;
    }
    with_cookie(
        Redirect::to("/admin/login").into_response(),
        &format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    )
}

fn with_cookie(mut resp: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            resp.headers_mut().append(header::SET_COOKIE, value);
            resp
        }
        Err(err) => server_error(anyhow::anyhow!(err)),
    }
}

/// Live admin session carried by the request cookie.
struct AdminSession {
    token: String,
    email: String,
}

async fn admin_session(state: &AppState, jar: &CookieJar) -> Option<AdminSession> {
    let token = jar.get(SESSION_COOKIE)?.value().to_string();
    let email = state.sessions.email_for(&token).await?;
    Some(AdminSession { token, email })
}

async fn admin_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let Some(AdminSession { token, .. }) = admin_session(&state, &jar).await else {
        return Redirect::to("/admin/login").into_response();
    };

    let flash = state.sessions.take_flash(&token).await;
    let settings = state.intake.settings().await;
    render_html(AdminTemplate {
        total_jobs: state.intake.jobs().await.len(),
        csv_source_url: settings.csv_source_url.unwrap_or_default(),
        auto_refresh_ms: settings
            .auto_refresh_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default(),
        csv_header: RECOGNIZED_HEADER,
        job_type_labels: JobType::ALL.iter().map(JobType::as_str).collect(),
        has_flash: flash.is_some(),
        flash_is_error: flash.as_ref().is_some_and(|f| f.is_error),
        flash_text: flash.map(|f| f.text).unwrap_or_default(),
    })
}

async fn admin_import_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<ImportForm>,
) -> Response {
    let Some(AdminSession { token, email }) = admin_session(&state, &jar).await else {
        return Redirect::to("/admin/login").into_response();
    };
    let flash = match state.intake.import_csv(&form.csv, Some(email.as_str())).await {
        Ok(summary) => summary_flash("Imported", summary),
        Err(err) => error_flash(err),
    };
    redirect_with_flash(&state, &token, flash).await
}

async fn admin_add_job_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<ManualJobForm>,
) -> Response {
    let Some(AdminSession { token, email }) = admin_session(&state, &jar).await else {
        return Redirect::to("/admin/login").into_response();
    };
    let flash = match state.intake.add_manual(form, Some(email.as_str())).await {
        Ok(job) => Flash {
            text: format!("Added \"{}\" at {}", job.title, job.company),
            is_error: false,
        },
        Err(err) => error_flash(err),
    };
    redirect_with_flash(&state, &token, flash).await
}

async fn admin_settings_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<SettingsForm>,
) -> Response {
    let Some(AdminSession { token, .. }) = admin_session(&state, &jar).await else {
        return Redirect::to("/admin/login").into_response();
    };

    let interval = form.auto_refresh_ms.trim();
    let auto_refresh_ms = if interval.is_empty() {
        None
    } else {
        match interval.parse::<u64>() {
            Ok(ms) => Some(ms),
            Err(_) => {
                let flash = Flash {
                    text: format!("Auto-refresh interval must be a whole number of milliseconds, got \"{interval}\""),
                    is_error: true,
                };
                return redirect_with_flash(&state, &token, flash).await;
            }
        }
    };
    let settings = Settings {
        csv_source_url: text_or_none(&form.csv_source_url),
        auto_refresh_ms,
    };

    let flash = match state.intake.update_settings(settings).await {
        Ok(saved) => match reschedule(&state, &saved).await {
            Ok(()) => Flash {
                text: "Settings saved".to_string(),
                is_error: false,
            },
            Err(err) => Flash {
                text: format!("Settings saved, but auto-refresh could not be rescheduled: {err}"),
                is_error: true,
            },
        },
        Err(err) => error_flash(err),
    };
    redirect_with_flash(&state, &token, flash).await
}

async fn reschedule(state: &AppState, settings: &Settings) -> anyhow::Result<()> {
    if let Some(scheduler) = &state.scheduler {
        scheduler.lock().await.apply_settings(settings).await?;
    }
    Ok(())
}

async fn admin_refresh_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let Some(AdminSession { token, .. }) = admin_session(&state, &jar).await else {
        return Redirect::to("/admin/login").into_response();
    };
    let flash = match state.intake.refresh_from_source().await {
        Ok(summary) if summary.total.is_none() && summary.processed == 0 && summary.skipped == 0 => Flash {
            text: "Nothing to refresh: no CSV source URL is configured or the sheet is empty".to_string(),
            is_error: false,
        },
        Ok(summary) => summary_flash("Refreshed", summary),
        Err(err) => error_flash(err),
    };
    redirect_with_flash(&state, &token, flash).await
}

fn summary_flash(verb: &str, summary: IntakeSummary) -> Flash {
    let mut text = format!("{verb} {} jobs", summary.processed);
    if summary.skipped > 0 {
        text.push_str(&format!(", {} rows skipped", summary.skipped));
    }
    if let Some(total) = summary.total {
        text.push_str(&format!(" ({total} on the board)"));
    }
    Flash {
        text,
        is_error: false,
    }
}

fn error_flash(err: IntakeError) -> Flash {
    warn!(error = %err, "admin action failed");
    Flash {
        text: err.to_string(),
        is_error: true,
    }
}

async fn redirect_with_flash(state: &AppState, token: &str, flash: Flash) -> Response {
    state.sessions.set_flash(token, flash).await;
    Redirect::to("/admin").into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
