use std::fmt::{self, Display, Formatter};

use crate::store::ConnectionHistoryEntry;
use crate::utils::format_rfc3339;

use super::painter::Painter;
use super::table::Table;

/// Renders connection history, most recent first.
pub(crate) struct HistoryView<'a> {
    entries: &'a [ConnectionHistoryEntry],
    painter: &'a Painter,
}

impl<'a> HistoryView<'a> {
    pub(crate) fn new(entries: &'a [ConnectionHistoryEntry], painter: &'a Painter) -> Self {
        Self { entries, painter }
    }
}

impl Display for HistoryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "{}", self.painter.muted("No connection history."));
        }

        let rows = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                vec![
                    self.painter.muted((index + 1).to_string()),
                    self.painter.value(entry.address()),
                    entry.display_name().to_string(),
                    format_rfc3339(entry.last_connected()),
                ]
            })
            .collect();
        let table = Table::grid(["#", "address", "name", "last_connected"], rows);

        write!(f, "{}", self.painter.heading("Recent connections:"))?;
        write!(f, "\n{table}")
    }
}
