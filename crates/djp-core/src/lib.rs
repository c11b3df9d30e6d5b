//! Core domain model, filter engine and seed data for DJP.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "djp-core";

const SEED_JOBS_JSON: &str = include_str!("../../../fixtures/seed_jobs.json");
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum JobType {
    #[default]
    #[serde(rename = "Full-time")]
    FullTime,
    Internship,
    Contract,
    #[serde(rename = "Part-time")]
    PartTime,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::FullTime,
        JobType::Internship,
        JobType::Contract,
        JobType::PartTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullTime => "Full-time",
            JobType::Internship => "Internship",
            JobType::Contract => "Contract",
            JobType::PartTime => "Part-time",
        }
    }

    /// Case-insensitive match on the display label.
    pub fn parse_label(input: &str) -> Option<Self> {
        let input = input.trim();
        Self::ALL
            .into_iter()
            .find(|job_type| job_type.as_str().eq_ignore_ascii_case(input))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single job posting. Never mutated in place: updates replace the whole record by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub experience: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(with = "date_posted_format")]
    pub date_posted: DateTime<Utc>,
    pub job_type: JobType,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benefits: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(
        default,
        rename = "contactWhatsApp",
        skip_serializing_if = "Option::is_none"
    )]
    pub contact_whatsapp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_logo: Option<String>,
}

/// How a candidate applies to a posting, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyTarget {
    Email { address: String, subject: String },
    WhatsApp { digits: String },
}

impl ApplyTarget {
    pub fn href(&self) -> String {
        match self {
            ApplyTarget::Email { address, subject } => {
                format!("mailto:{address}?subject={}", encode_component(subject))
            }
            ApplyTarget::WhatsApp { digits } => format!("https://wa.me/{digits}"),
        }
    }
}

impl Job {
    pub fn apply_target(&self) -> Option<ApplyTarget> {
        if let Some(address) = self.contact_email.as_deref().and_then(text_or_none) {
            return Some(ApplyTarget::Email {
                address,
                subject: format!("Application for {}", self.title),
            });
        }
        let digits = self
            .contact_whatsapp
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>();
        if digits.is_empty() {
            None
        } else {
            Some(ApplyTarget::WhatsApp { digits })
        }
    }

    pub fn share_text(&self) -> String {
        format!("Check out this job: {} at {}", self.title, self.company)
    }
}

/// Serialized as RFC 3339 keeping every stored sub-second digit; read back leniently.
mod date_posted_format {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date_posted(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid datePosted value {raw:?}")))
    }
}

/// Parse a posting date. Zone-less inputs are taken as UTC.
pub fn parse_date_posted(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a `|`-separated list column, trimming elements and dropping empty ones.
pub fn split_list_field(value: &str) -> Vec<String> {
    value.split('|').filter_map(text_or_none).collect()
}

/// Percent-encodes everything outside the RFC 3986 unreserved set, so the
/// result is safe as a single path segment or query value.
pub fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Relative date-posted filter buckets offered by the browse UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePostedBucket {
    Last24Hours,
    Last3Days,
    Last7Days,
    Last30Days,
}

impl DatePostedBucket {
    pub const ALL: [DatePostedBucket; 4] = [
        DatePostedBucket::Last24Hours,
        DatePostedBucket::Last3Days,
        DatePostedBucket::Last7Days,
        DatePostedBucket::Last30Days,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DatePostedBucket::Last24Hours => "Last 24 hours",
            DatePostedBucket::Last3Days => "Last 3 days",
            DatePostedBucket::Last7Days => "Last 7 days",
            DatePostedBucket::Last30Days => "Last 30 days",
        }
    }

    pub fn max_age_days(&self) -> i64 {
        match self {
            DatePostedBucket::Last24Hours => 1,
            DatePostedBucket::Last3Days => 3,
            DatePostedBucket::Last7Days => 7,
            DatePostedBucket::Last30Days => 30,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|bucket| bucket.label() == label)
    }
}

/// Whole days between `date` and `now`, floored.
pub fn age_in_days(date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - date).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

/// Conjunctive filter predicates. An empty string imposes no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub location: String,
    pub job_type: String,
    pub experience: String,
    pub date_posted: String,
    #[serde(rename = "q")]
    pub search: String,
}

impl FilterCriteria {
    pub fn is_active(&self) -> bool {
        !(self.location.is_empty()
            && self.job_type.is_empty()
            && self.experience.is_empty()
            && self.date_posted.is_empty()
            && self.search.is_empty())
    }
}

pub fn matches(job: &Job, criteria: &FilterCriteria) -> bool {
    matches_at(job, criteria, Utc::now())
}

pub fn matches_at(job: &Job, criteria: &FilterCriteria, now: DateTime<Utc>) -> bool {
    // Location stays case-sensitive; the search predicate is the case-insensitive one.
    let location_ok = criteria.location.is_empty() || job.location.contains(&criteria.location);
    let job_type_ok = criteria.job_type.is_empty() || job.job_type.as_str() == criteria.job_type;
    let experience_ok = criteria.experience.is_empty() || job.experience == criteria.experience;

    let search_ok = criteria.search.is_empty() || {
        let needle = criteria.search.to_lowercase();
        job.title.to_lowercase().contains(&needle)
            || job.company.to_lowercase().contains(&needle)
            || job.description.to_lowercase().contains(&needle)
    };

    let date_ok = criteria.date_posted.is_empty()
        || match DatePostedBucket::from_label(&criteria.date_posted) {
            Some(bucket) => age_in_days(job.date_posted, now) <= bucket.max_age_days(),
            None => true,
        };

    location_ok && job_type_ok && experience_ok && search_ok && date_ok
}

/// Full scan over the collection, preserving its order.
pub fn filter_jobs<'a>(jobs: &'a [Job], criteria: &FilterCriteria, now: DateTime<Utc>) -> Vec<&'a Job> {
    jobs.iter()
        .filter(|job| matches_at(job, criteria, now))
        .collect()
}

pub fn job_type_counts(jobs: &[Job]) -> BTreeMap<JobType, usize> {
    let mut counts = BTreeMap::new();
    for job in jobs {
        *counts.entry(job.job_type).or_default() += 1;
    }
    counts
}

/// Board configuration persisted alongside the job collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_refresh_ms: Option<u64>,
}

impl Settings {
    pub fn source_url(&self) -> Option<&str> {
        self.csv_source_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// `None` (auto-refresh off) when unset or zero.
    pub fn auto_refresh_interval(&self) -> Option<Duration> {
        self.auto_refresh_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// The built-in collection served when nothing has been saved yet.
pub fn seed_jobs() -> Vec<Job> {
    serde_json::from_str(SEED_JOBS_JSON).unwrap_or_default()
}

/// Source of fresh identifier stamps.
pub trait IdProvider: Send + Sync {
    /// Returns a stamp no earlier call on this provider has returned.
    fn next_stamp(&self) -> String;
}

/// Wall-clock milliseconds, bumped forward when two calls land in the same millisecond.
#[derive(Debug, Default)]
pub struct MillisIdProvider {
    last: AtomicI64,
}

impl MillisIdProvider {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }
}

impl IdProvider for MillisIdProvider {
    fn next_stamp(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 27, 12, 0, 0).single().unwrap()
    }

    fn mk_job(id: &str, job_type: JobType, location: &str, date_posted: DateTime<Utc>) -> Job {
        Job {
            id: id.to_string(),
            title: "Backend Developer".into(),
            company: "DataFlow Technologies".into(),
            location: location.to_string(),
            experience: "2-5 years".into(),
            salary: None,
            date_posted,
            job_type,
            description: "Build scalable APIs".into(),
            requirements: vec![],
            responsibilities: vec![],
            benefits: None,
            contact_email: None,
            contact_whatsapp: None,
            company_logo: None,
        }
    }

    #[test]
    fn empty_criteria_matches_every_seed_job() {
        let jobs = seed_jobs();
        assert_eq!(jobs.len(), 6);
        assert!(jobs
            .iter()
            .all(|job| matches_at(job, &FilterCriteria::default(), now())));
    }

    #[test]
    fn predicates_are_conjunctive() {
        let job = mk_job("1", JobType::FullTime, "Chennai, India", now());
        let criteria = FilterCriteria {
            location: "Chennai".into(),
            job_type: "Internship".into(),
            ..Default::default()
        };
        assert!(!matches_at(&job, &criteria, now()));

        let criteria = FilterCriteria {
            location: "Chennai".into(),
            job_type: "Full-time".into(),
            ..Default::default()
        };
        assert!(matches_at(&job, &criteria, now()));
    }

    #[test]
    fn location_filter_is_case_sensitive_substring() {
        let job = mk_job("1", JobType::FullTime, "Bangalore, India", now());
        let exact = FilterCriteria {
            location: "Bangalore".into(),
            ..Default::default()
        };
        let lower = FilterCriteria {
            location: "bangalore".into(),
            ..Default::default()
        };
        assert!(matches_at(&job, &exact, now()));
        assert!(!matches_at(&job, &lower, now()));
    }

    #[test]
    fn search_is_case_insensitive_across_title_company_description() {
        let job = mk_job("1", JobType::FullTime, "Pune", now());
        for q in ["backend", "DATAFLOW", "scalable apis"] {
            let criteria = FilterCriteria {
                search: q.into(),
                ..Default::default()
            };
            assert!(matches_at(&job, &criteria, now()), "{q} should match");
        }
        let miss = FilterCriteria {
            search: "designer".into(),
            ..Default::default()
        };
        assert!(!matches_at(&job, &miss, now()));
    }

    #[test]
    fn date_bucket_boundary_is_whole_days_floored() {
        let one_day = mk_job("1", JobType::FullTime, "Delhi", now() - ChronoDuration::days(1));
        let two_days = mk_job("2", JobType::FullTime, "Delhi", now() - ChronoDuration::days(2));
        let criteria = FilterCriteria {
            date_posted: "Last 24 hours".into(),
            ..Default::default()
        };
        assert!(matches_at(&one_day, &criteria, now()));
        assert!(!matches_at(&two_days, &criteria, now()));

        let almost_two = mk_job(
            "3",
            JobType::FullTime,
            "Delhi",
            now() - ChronoDuration::hours(47),
        );
        assert!(matches_at(&almost_two, &criteria, now()));
    }

    #[test]
    fn unknown_date_bucket_fails_open() {
        let old = mk_job("1", JobType::FullTime, "Delhi", now() - ChronoDuration::days(400));
        let criteria = FilterCriteria {
            date_posted: "Last decade".into(),
            ..Default::default()
        };
        assert!(matches_at(&old, &criteria, now()));
        assert!(!matches_at(
            &old,
            &FilterCriteria {
                date_posted: "Last 30 days".into(),
                ..Default::default()
            },
            now()
        ));
    }

    #[test]
    fn job_serializes_with_camel_case_keys_and_omits_absent_optionals() {
        let mut job = mk_job("42", JobType::PartTime, "Remote", now());
        job.contact_whatsapp = Some("+91-98765".into());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["jobType"], "Part-time");
        assert_eq!(value["contactWhatsApp"], "+91-98765");
        assert_eq!(value["datePosted"], "2025-10-27T12:00:00Z");
        assert!(value.get("salary").is_none());
        assert!(value.get("benefits").is_none());
    }

    #[test]
    fn date_parser_accepts_common_shapes_and_rejects_garbage() {
        let midnight = Utc.with_ymd_and_hms(2025, 10, 26, 0, 0, 0).single().unwrap();
        assert_eq!(parse_date_posted("2025-10-26"), Some(midnight));
        assert_eq!(parse_date_posted("2025-10-26T00:00:00.000Z"), Some(midnight));
        assert_eq!(parse_date_posted("2025-10-26 00:00"), Some(midnight));
        assert_eq!(parse_date_posted("not-a-date"), None);
        assert_eq!(parse_date_posted("2025-13-40"), None);
        assert_eq!(parse_date_posted("   "), None);
    }

    #[test]
    fn apply_target_prefers_email_then_whatsapp_digits() {
        let mut job = mk_job("1", JobType::FullTime, "Pune", now());
        assert_eq!(job.apply_target(), None);

        job.contact_whatsapp = Some("+91-9876543215".into());
        assert_eq!(
            job.apply_target().map(|t| t.href()),
            Some("https://wa.me/919876543215".to_string())
        );

        job.contact_email = Some("backend@dataflow.com".into());
        assert_eq!(
            job.apply_target().map(|t| t.href()),
            Some("mailto:backend@dataflow.com?subject=Application%20for%20Backend%20Developer".to_string())
        );
    }

    #[test]
    fn encode_component_escapes_path_and_query_delimiters() {
        assert_eq!(encode_component("csv-101_a.b~c"), "csv-101_a.b~c");
        assert_eq!(encode_component("a/b?c#d e"), "a%2Fb%3Fc%23d%20e");
        assert_eq!(encode_component("café"), "caf%C3%A9");
    }

    #[test]
    fn settings_interval_treats_zero_as_disabled() {
        let mut settings = Settings::default();
        assert_eq!(settings.auto_refresh_interval(), None);
        settings.auto_refresh_ms = Some(0);
        assert_eq!(settings.auto_refresh_interval(), None);
        settings.auto_refresh_ms = Some(3_600_000);
        assert_eq!(settings.auto_refresh_interval(), Some(Duration::from_secs(3600)));
        settings.csv_source_url = Some("  ".into());
        assert_eq!(settings.source_url(), None);
    }

    #[test]
    fn millis_id_provider_never_repeats() {
        let ids = MillisIdProvider::default();
        let a = ids.next_stamp();
        let b = ids.next_stamp();
        let c = ids.next_stamp();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(b.parse::<i64>().unwrap() > a.parse::<i64>().unwrap());
    }

    #[test]
    fn list_fields_split_on_pipe_and_drop_blanks() {
        assert_eq!(
            split_list_field(" React | TypeScript || "),
            vec!["React".to_string(), "TypeScript".to_string()]
        );
        assert!(split_list_field("").is_empty());
    }
}
