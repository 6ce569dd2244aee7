use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Style as TableStyle};

use super::painter::Painter;
use crate::scenario::ScenarioResult;

const RESULT_HEADERS: [&str; 4] = ["scenario", "result", "run time", "note"];
const RUN_TIME_COLUMN: usize = 2;

/// Rounded console table. Duration columns can be right-aligned.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    right_aligned: Vec<usize>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
            right_aligned: Vec::new(),
        }
    }

    /// Two columns of field names (muted) and values.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let records = rows
            .into_iter()
            .map(|(field, value)| vec![painter.muted(field), value])
            .collect();
        Self::grid(["field", "value"], records)
    }

    /// One row per scenario: coloured verdict, run time to the millisecond,
    /// and the note. A passing scenario's note is a warning worth
    /// highlighting; a failing one's is plain.
    pub(crate) fn results(painter: &Painter, results: &[ScenarioResult]) -> Self {
        let rows = results
            .iter()
            .map(|result| {
                let note = if result.passed() {
                    painter.warning(result.note())
                } else {
                    result.note().to_string()
                };
                vec![
                    result.name().to_string(),
                    painter.verdict(result.verdict()),
                    format_run_time(result.run_time()),
                    note,
                ]
            })
            .collect();
        Self::grid(RESULT_HEADERS, rows).right_align(RUN_TIME_COLUMN)
    }

    #[must_use]
    pub(crate) fn right_align(mut self, column: usize) -> Self {
        self.right_aligned.push(column);
        self
    }
}

/// Whole milliseconds in humantime form, e.g. `4s 210ms`.
pub(crate) fn format_run_time(duration: Duration) -> String {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    humantime::format_duration(Duration::from_millis(millis)).to_string()
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(TableStyle::rounded());
        for column in &self.right_aligned {
            table.modify(Columns::one(*column), Alignment::right());
        }
        write!(f, "{table}")
    }
}
