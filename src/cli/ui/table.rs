use std::fmt::{self, Display, Formatter};

use tabled::{builder::Builder, settings::Style as TableStyle};

use super::painter::Painter;

/// A rounded table that renders via `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Two-column field/value table with muted field names.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let records = rows
            .into_iter()
            .map(|(field, value)| vec![painter.muted(field), value])
            .collect();
        Self::grid(["field", "value"], records)
    }
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
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn grid_table_renders_with_headers_and_rows() {
        let table = Table::grid(
            ["address", "name"],
            vec![
                vec!["AA:BB".into(), "Widget".into()],
                vec!["CC:DD".into(), "Gadget".into()],
            ],
        );
        assert_snapshot!(table.to_string(), @r"
        ╭─────────┬────────╮
        │ address │ name   │
        ├─────────┼────────┤
        │ AA:BB   │ Widget │
        │ CC:DD   │ Gadget │
        ╰─────────┴────────╯
        ");
    }

    #[test]
    fn key_value_table_uses_field_and_value_headers() {
        let table = Table::key_value(&Painter::new(false), vec![("state", "connected".into())]);
        assert_snapshot!(table.to_string(), @r"
        ╭───────┬───────────╮
        │ field │ value     │
        ├───────┼───────────┤
        │ state │ connected │
        ╰───────┴───────────╯
        ");
    }
}
