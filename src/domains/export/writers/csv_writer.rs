use std::io::Write;

use crate::domains::export::writer::{ExportWriter, WriterError};

/// UTF-8 BOM so spreadsheet applications detect the encoding.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Comma separated text with `"` enclosure and `\n` line endings.
pub struct CsvExportWriter<W: Write> {
    inner: csv::Writer<W>,
}

impl<W: Write> CsvExportWriter<W> {
    pub fn new(mut out: W) -> Result<Self, WriterError> {
        out.write_all(UTF8_BOM)?;
        let inner = csv::WriterBuilder::new()
            .delimiter(b',')
            .quote(b'"')
            .double_quote(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(out);
        Ok(Self { inner })
    }
}

impl<W: Write> ExportWriter for CsvExportWriter<W> {
    fn write_header(&mut self, header: &[String]) -> Result<(), WriterError> {
        self.inner.write_record(header)?;
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), WriterError> {
        self.inner.write_record(row)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), WriterError> {
        self.inner.flush()?;
        Ok(())
    }
}
