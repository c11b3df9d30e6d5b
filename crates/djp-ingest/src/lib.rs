//! CSV ingestion: header mapping, row validation and CSV source adapters.

use async_trait::async_trait;
use csv::StringRecord;
use djp_core::{
    parse_date_posted, split_list_field, text_or_none, IdProvider, Job, JobType, MillisIdProvider,
};
use djp_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "djp-ingest";

/// Header line listing every recognized column, in the documented order.
pub const RECOGNIZED_HEADER: &str = "id,title,company,location,experience,salary,datePosted,jobType,description,requirements,responsibilities,benefits,contactEmail,contactWhatsApp,companyLogo";

static INGEST_IDS: MillisIdProvider = MillisIdProvider::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsvColumn {
    Id,
    Title,
    Company,
    Location,
    Experience,
    Salary,
    DatePosted,
    JobType,
    Description,
    Requirements,
    Responsibilities,
    Benefits,
    ContactEmail,
    ContactWhatsApp,
    CompanyLogo,
}

impl CsvColumn {
    pub const ALL: [CsvColumn; 15] = [
        CsvColumn::Id,
        CsvColumn::Title,
        CsvColumn::Company,
        CsvColumn::Location,
        CsvColumn::Experience,
        CsvColumn::Salary,
        CsvColumn::DatePosted,
        CsvColumn::JobType,
        CsvColumn::Description,
        CsvColumn::Requirements,
        CsvColumn::Responsibilities,
        CsvColumn::Benefits,
        CsvColumn::ContactEmail,
        CsvColumn::ContactWhatsApp,
        CsvColumn::CompanyLogo,
    ];

    pub fn header_name(&self) -> &'static str {
        match self {
            CsvColumn::Id => "id",
            CsvColumn::Title => "title",
            CsvColumn::Company => "company",
            CsvColumn::Location => "location",
            CsvColumn::Experience => "experience",
            CsvColumn::Salary => "salary",
            CsvColumn::DatePosted => "datePosted",
            CsvColumn::JobType => "jobType",
            CsvColumn::Description => "description",
            CsvColumn::Requirements => "requirements",
            CsvColumn::Responsibilities => "responsibilities",
            CsvColumn::Benefits => "benefits",
            CsvColumn::ContactEmail => "contactEmail",
            CsvColumn::ContactWhatsApp => "contactWhatsApp",
            CsvColumn::CompanyLogo => "companyLogo",
        }
    }

    /// Exact name, ignoring ASCII case and surrounding whitespace.
    pub fn from_header(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|column| column.header_name().eq_ignore_ascii_case(name))
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Column positions resolved from the header row. First occurrence wins.
#[derive(Debug, Clone, Default)]
struct HeaderMap {
    positions: [Option<usize>; CsvColumn::ALL.len()],
}

impl HeaderMap {
    fn from_record(record: &StringRecord) -> Self {
        let mut map = Self::default();
        for (index, name) in record.iter().enumerate() {
            if let Some(column) = CsvColumn::from_header(name) {
                map.positions[column.slot()].get_or_insert(index);
            }
        }
        map
    }

    /// Trimmed cell value, or `""` when the column or the cell is missing.
    fn value<'r>(&self, record: &'r StringRecord, column: CsvColumn) -> &'r str {
        self.positions[column.slot()]
            .and_then(|index| record.get(index))
            .map(str::trim)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub jobs: Vec<Job>,
    /// Data rows that were skipped as malformed.
    pub rejected: usize,
}

/// Parse CSV text into jobs in source order. Malformed rows are skipped, never reported as errors.
pub fn ingest_csv(text: &str) -> Vec<Job> {
    ingest_report(text, &INGEST_IDS).jobs
}

/// Each physical line is one record, so quoted fields cannot span lines and a
/// malformed line costs only its own row.
pub fn ingest_report(text: &str, ids: &dyn IdProvider) -> IngestReport {
    let mut header: Option<HeaderMap> = None;
    let mut stamp: Option<String> = None;
    let mut report = IngestReport::default();
    let mut data_row = 0usize;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_line(line);
        if record
            .as_ref()
            .is_some_and(|record| record.iter().all(|field| field.trim().is_empty()))
        {
            continue;
        }
        if header.is_none() {
            header = record.as_ref().map(HeaderMap::from_record);
            continue;
        }
        let Some(columns) = header.as_ref() else {
            continue;
        };

        data_row += 1;
        let job = record.and_then(|record| {
            build_job(columns, &record, data_row, || {
                stamp.get_or_insert_with(|| ids.next_stamp()).clone()
            })
        });
        match job {
            Some(job) => report.jobs.push(job),
            None => report.rejected += 1,
        }
    }

    if report.rejected > 0 {
        debug!(
            accepted = report.jobs.len(),
            rejected = report.rejected,
            "skipped malformed csv rows"
        );
    }
    report
}

/// `None` for a line with an unterminated quoted field or that the reader refuses.
fn parse_line(line: &str) -> Option<StringRecord> {
    if line.matches('"').count() % 2 != 0 {
        debug!(line, "unterminated quoted field");
        return None;
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(_) => Some(record),
        Err(err) => {
            debug!(error = %err, "unreadable csv record");
            None
        }
    }
}

fn build_job(
    columns: &HeaderMap,
    record: &StringRecord,
    data_row: usize,
    mut stamp: impl FnMut() -> String,
) -> Option<Job> {
    let get = |column| columns.value(record, column);

    let title = get(CsvColumn::Title);
    let company = get(CsvColumn::Company);
    let location = get(CsvColumn::Location);
    let experience = get(CsvColumn::Experience);
    let date_raw = get(CsvColumn::DatePosted);
    let job_type_raw = get(CsvColumn::JobType);
    let description = get(CsvColumn::Description);

    if [title, company, location, experience, date_raw, job_type_raw, description]
        .iter()
        .any(|value| value.is_empty())
    {
        return None;
    }
    let date_posted = parse_date_posted(date_raw)?;
    let job_type = JobType::parse_label(job_type_raw)?;

    let id = text_or_none(get(CsvColumn::Id)).unwrap_or_else(|| format!("{}-{data_row}", stamp()));

    Some(Job {
        id,
        title: title.to_string(),
        company: company.to_string(),
        location: location.to_string(),
        experience: experience.to_string(),
        salary: text_or_none(get(CsvColumn::Salary)),
        date_posted,
        job_type,
        description: description.to_string(),
        requirements: split_list_field(get(CsvColumn::Requirements)),
        responsibilities: split_list_field(get(CsvColumn::Responsibilities)),
        benefits: text_or_none(get(CsvColumn::Benefits)).map(|raw| split_list_field(&raw)),
        contact_email: text_or_none(get(CsvColumn::ContactEmail)),
        contact_whatsapp: text_or_none(get(CsvColumn::ContactWhatsApp)),
        company_logo: text_or_none(get(CsvColumn::CompanyLogo)),
    })
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Where CSV text comes from: pasted/uploaded text or a published sheet URL.
#[async_trait]
pub trait CsvSource: Send + Sync {
    fn describe(&self) -> String;

    async fn read_text(&self) -> Result<String, SourceError>;
}

#[derive(Debug, Clone)]
pub struct InlineCsv {
    label: String,
    text: String,
}

impl InlineCsv {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
impl CsvSource for InlineCsv {
    fn describe(&self) -> String {
        format!("inline:{}", self.label)
    }

    async fn read_text(&self) -> Result<String, SourceError> {
        Ok(self.text.clone())
    }
}

#[derive(Debug, Clone)]
pub struct RemoteCsv {
    url: String,
    http: HttpFetcher,
}

impl RemoteCsv {
    pub fn new(url: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CsvSource for RemoteCsv {
    fn describe(&self) -> String {
        format!("remote:{}", self.url)
    }

    async fn read_text(&self) -> Result<String, SourceError> {
        Ok(self.http.fetch_text(&self.url).await?.body)
    }
}

pub async fn ingest_from(
    source: &dyn CsvSource,
    ids: &dyn IdProvider,
) -> Result<IngestReport, SourceError> {
    let text = source.read_text().await?;
    let report = ingest_report(&text, ids);
    debug!(
        source = %source.describe(),
        accepted = report.jobs.len(),
        "ingested csv source"
    );
    Ok(report)
}
