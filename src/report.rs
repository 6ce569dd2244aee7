//! CSV test reports.
//!
//! One row per scenario under the header `TestName,StartTime,RunTime,Result,Note`
//! and a closing `Test Suite` row. Start times are local `HHMMSS`, run times are
//! milliseconds, and the suite run time is the sum of the scenario run times.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::{info, instrument};

use crate::error::ReportError;
use crate::scenario::SuiteResult;

pub const REPORT_HEADER: &str = "TestName,StartTime,RunTime,Result,Note";

const CLOCK_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour][minute][second]");

fn clock(at: OffsetDateTime) -> Result<String, ReportError> {
    Ok(at.format(CLOCK_FORMAT)?)
}

/// Quotes a field that would otherwise split the row.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders the whole report.
///
/// # Errors
///
/// Returns [`ReportError::Timestamp`] if a start time cannot be formatted.
pub fn render_csv(suite: &SuiteResult) -> Result<String, ReportError> {
    let mut csv = String::new();
    let mut total_ms = 0_u128;
    let _ = writeln!(csv, "{REPORT_HEADER}");
    for result in suite.results() {
        let run_ms = result.run_time().as_millis();
        total_ms += run_ms;
        let _ = writeln!(
            csv,
            "{},{},{run_ms},{},{}",
            csv_field(result.name()),
            clock(result.started_at())?,
            result.verdict(),
            csv_field(result.note()),
        );
    }
    let _ = writeln!(
        csv,
        "Test Suite,{},{total_ms},{},",
        clock(suite.started_at())?,
        suite.verdict()
    );
    Ok(csv)
}

/// File name of the report: `report_file` prefixed with the suite's local
/// start time.
///
/// # Errors
///
/// Returns [`ReportError::Timestamp`] if the start time cannot be formatted.
pub fn report_file_name(suite: &SuiteResult, report_file: &str) -> Result<String, ReportError> {
    Ok(format!("{}_{report_file}", clock(suite.started_at())?))
}

/// Writes the report into `directory` and returns its path.
///
/// # Errors
///
/// Returns [`ReportError`] if the file cannot be written.
#[instrument(skip(suite), level = "info", fields(directory = %directory.display()))]
pub fn write_report(
    suite: &SuiteResult,
    directory: &Path,
    report_file: &str,
) -> Result<PathBuf, ReportError> {
    let path = directory.join(report_file_name(suite, report_file)?);
    let csv = render_csv(suite)?;
    fs::write(&path, csv).map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "wrote test report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;
    use crate::scenario::{ScenarioResult, Verdict};

    fn suite() -> SuiteResult {
        SuiteResult::new(
            vec![
                ScenarioResult::new(
                    "Beacon Payload",
                    Verdict::Pass,
                    "",
                    datetime!(2024-03-01 09:15:02 UTC),
                    Duration::from_millis(4_210),
                ),
                ScenarioResult::new(
                    "LockUnlock Test",
                    Verdict::Fail,
                    "unlock: expected 00, got 0a, timed out",
                    datetime!(2024-03-01 09:15:06 UTC),
                    Duration::from_millis(12_001),
                ),
            ],
            datetime!(2024-03-01 09:15:01 UTC),
            Duration::from_millis(16_500),
        )
    }

    #[test]
    fn renders_rows_and_suite_line() {
        let csv = render_csv(&suite()).expect("report renders");
        assert_snapshot!(csv.trim_end(), @r#"
        TestName,StartTime,RunTime,Result,Note
        Beacon Payload,091502,4210,PASS,
        LockUnlock Test,091506,12001,FAIL,"unlock: expected 00, got 0a, timed out"
        Test Suite,091501,16211,FAIL,
        "#);
    }

    #[test]
    fn quotes_embedded_quotes() {
        assert_eq!(r#""say ""hi"", then""#, csv_field(r#"say "hi", then"#));
        assert_eq!("plain", csv_field("plain"));
    }

    #[test]
    fn file_name_carries_the_start_time() {
        assert_eq!(
            "091501_test_report.csv",
            report_file_name(&suite(), "test_report.csv").expect("name formats")
        );
    }

    #[test]
    fn writes_into_the_directory() {
        let directory = tempfile::tempdir().expect("temp dir");

        let path = write_report(&suite(), directory.path(), "bench.csv").expect("report written");

        assert_eq!(directory.path().join("091501_bench.csv"), path);
        let written = fs::read_to_string(&path).expect("report readable");
        assert!(written.starts_with(REPORT_HEADER));
        assert!(written.trim_end().ends_with("Test Suite,091501,16211,FAIL,"));
    }

    #[test]
    fn unwritable_directory_is_a_write_error() {
        let error = write_report(&suite(), Path::new("/nonexistent/reports"), "bench.csv")
            .expect_err("missing directory");
        assert_matches!(error, ReportError::Write { .. });
    }
}
