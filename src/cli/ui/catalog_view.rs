use std::fmt::{self, Display, Formatter};

use crate::config::TestList;
use crate::scenario::ScenarioId;

use super::painter::Painter;
use super::table::Table;

/// Renders the built-in scenarios and, when present, the test list groups.
pub(crate) struct CatalogView<'a> {
    test_list: Option<&'a TestList>,
    painter: &'a Painter,
}

impl<'a> CatalogView<'a> {
    pub(crate) fn new(test_list: Option<&'a TestList>, painter: &'a Painter) -> Self {
        Self { test_list, painter }
    }
}

impl Display for CatalogView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rows = ScenarioId::all()
            .into_iter()
            .map(|id| {
                vec![
                    self.painter.value(id.to_string()),
                    id.title().to_string(),
                    if id.uses_setup_board() { "yes" } else { "no" }.to_string(),
                    self.painter.muted(id.description()),
                ]
            })
            .collect();
        let scenarios = Table::grid(["name", "report name", "setup board", "checks"], rows);

        write!(f, "{}", self.painter.heading("Scenarios:"))?;
        write!(f, "\n{scenarios}")?;

        let Some(test_list) = self.test_list else {
            return Ok(());
        };
        let rows = test_list
            .groups()
            .map(|(group, tests)| vec![self.painter.value(group), tests.join(", ")])
            .collect();
        let groups = Table::grid(["group", "scenarios"], rows);
        write!(f, "\n\n{}", self.painter.heading("Test list:"))?;
        write!(f, "\n{groups}")
    }
}
