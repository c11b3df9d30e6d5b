use std::path::PathBuf;

use djp_core::{JobType, MillisIdProvider};
use djp_ingest::{ingest_report, RECOGNIZED_HEADER};

fn fixture_text() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample_jobs.csv");
    std::fs::read_to_string(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

#[test]
fn sample_fixture_keeps_valid_rows_in_order() {
    let text = fixture_text();
    assert!(text.starts_with(RECOGNIZED_HEADER));

    let report = ingest_report(&text, &MillisIdProvider::new());
    let ids = report.jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["101", "102", "104"]);
    assert_eq!(report.rejected, 1);

    let frontend = &report.jobs[0];
    assert_eq!(frontend.job_type, JobType::FullTime);
    assert_eq!(frontend.requirements, vec!["React", "TS"]);
    assert_eq!(
        frontend.benefits.as_deref(),
        Some(&["Health Insurance".to_string(), "Remote".to_string()][..])
    );
    assert_eq!(frontend.company_logo, None);

    let intern = &report.jobs[1];
    assert_eq!(intern.job_type, JobType::Internship);
    assert_eq!(intern.salary, None);
    assert_eq!(intern.benefits, None);
    assert!(intern.contact_email.is_none());
    assert!(intern.contact_whatsapp.is_some());

    let qa = &report.jobs[2];
    assert_eq!(qa.title, "QA Engineer, Mobile");
    assert_eq!(qa.salary.as_deref(), Some("₹8,00,000"));
    assert_eq!(qa.job_type, JobType::PartTime);
    assert_eq!(qa.contact_email.as_deref(), Some("qa@testwise.io"));
}
