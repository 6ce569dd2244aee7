use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::config::TestList;
use crate::error::ConfigError;
use crate::terminal::TerminalClient;

use super::ui::{CatalogView, Painter};

/// Executes the `list` command. A missing test list only hides the groups.
#[instrument(skip(out, terminal_client), level = "info", fields(test_list = %test_list.display()))]
pub(crate) fn run<W>(test_list: &Path, out: &mut W, terminal_client: &dyn TerminalClient) -> Result<()>
where
    W: io::Write,
{
    let test_list = match TestList::load(test_list) {
        Ok(list) => Some(list),
        Err(ConfigError::Read { path, source }) if source.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no test list, listing the catalog only");
            None
        }
        Err(error) => return Err(error.into()),
    };
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    writeln!(out, "{}", CatalogView::new(test_list.as_ref(), &painter))?;
    Ok(())
}
