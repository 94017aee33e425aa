use super::extractor::extract;
use super::formatter::ValueFormatter;
use super::types::ExportColumn;
use super::value::ExportValue;

/// Projects records onto an ordered column specification.
pub struct RowProjector<'a> {
    columns: &'a [ExportColumn],
    formatter: &'a ValueFormatter,
}

impl<'a> RowProjector<'a> {
    pub fn new(columns: &'a [ExportColumn], formatter: &'a ValueFormatter) -> Self {
        Self { columns, formatter }
    }

    pub fn header(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.header().to_string()).collect()
    }

    /// One cell per column, whatever the record looks like.
    pub fn row(&self, record: &ExportValue) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| self.formatter.format(&extract(record, &c.path), &c.column_type))
            .collect()
    }
}
