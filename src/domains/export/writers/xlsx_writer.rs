use std::io::{Seek, Write};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::domains::export::writer::{ExportWriter, WriterError};

const SHEET_NAME: &str = "Export";
const SHEET_PATH: &str = "xl/worksheets/sheet1.xml";
const HEADER_STYLE: u8 = 1;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

const SHEET_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#;

const SHEET_CLOSE: &str = "</sheetData></worksheet>";

/// Single-sheet workbook. Every cell is an inline string; the header goes in
/// row 1 and data starts at row 2. Rows are streamed straight into the
/// deflated sheet entry.
pub struct XlsxExportWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    next_row: u32,
}

impl<W: Write + Seek> XlsxExportWriter<W> {
    pub fn new(out: W) -> Result<Self, WriterError> {
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(out);

        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            SHEET_NAME
        );

        for (name, body) in [
            ("[Content_Types].xml", CONTENT_TYPES),
            ("_rels/.rels", ROOT_RELS),
            ("xl/workbook.xml", workbook.as_str()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/styles.xml", STYLES),
        ] {
            zip.start_file(name, options)?;
            zip.write_all(body.as_bytes())?;
        }

        zip.start_file(SHEET_PATH, options)?;
        zip.write_all(SHEET_OPEN.as_bytes())?;

        Ok(Self { zip, next_row: 1 })
    }

    fn write_cells(&mut self, cells: &[String], style: Option<u8>) -> Result<(), WriterError> {
        let row = self.next_row;
        let mut xml = format!(r#"<row r="{}">"#, row);
        for (index, value) in cells.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let style_attr = style.map(|s| format!(r#" s="{}""#, s)).unwrap_or_default();
            xml.push_str(&format!(
                r#"<c r="{}{}"{} t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_name(index),
                row,
                style_attr,
                escape_xml(value)
            ));
        }
        xml.push_str("</row>");
        self.zip.write_all(xml.as_bytes())?;
        self.next_row += 1;
        Ok(())
    }
}

impl<W: Write + Seek> ExportWriter for XlsxExportWriter<W> {
    fn write_header(&mut self, header: &[String]) -> Result<(), WriterError> {
        self.write_cells(header, Some(HEADER_STYLE))
    }

    fn write_row(&mut self, row: &[String]) -> Result<(), WriterError> {
        self.write_cells(row, None)
    }

    fn finish(mut self: Box<Self>) -> Result<(), WriterError> {
        self.zip.write_all(SHEET_CLOSE.as_bytes())?;
        let mut out = self.zip.finish()?;
        out.flush()?;
        Ok(())
    }
}

/// Spreadsheet column letters for a zero-based index: A..Z, AA, AB, ...
pub fn column_name(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Escapes markup characters and drops control characters XML 1.0 forbids.
fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(ch),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn workbook_bytes(header: &[&str], rows: &[Vec<&str>]) -> Vec<u8> {
        let to_owned = |cells: &[&str]| cells.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        let mut writer = XlsxExportWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.write_header(&to_owned(header)).unwrap();
        for row in rows {
            writer.write_row(&to_owned(row.as_slice())).unwrap();
        }
        writer.zip.write_all(SHEET_CLOSE.as_bytes()).unwrap();
        writer.zip.finish().unwrap().into_inner()
    }

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn column_names_roll_over() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_xml("a<b & \"c\"\u{1}"), "a&lt;b &amp; &quot;c&quot;");
    }

    #[test]
    fn workbook_contains_required_parts() {
        let bytes = workbook_bytes(&["ID"], &[vec!["1"]]);
        let archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/styles.xml",
            SHEET_PATH,
        ] {
            assert!(names.contains(&part), "missing {part}");
        }
        assert!(read_entry(&bytes, "xl/workbook.xml").contains(r#"<sheet name="Export""#));
    }

    #[test]
    fn header_in_first_row_data_from_second() {
        let bytes = workbook_bytes(&["ID", "Name"], &[vec!["1", "Ada & Co"], vec!["2", ""]]);
        let sheet = read_entry(&bytes, SHEET_PATH);

        assert!(sheet.contains(r#"<row r="1"><c r="A1" s="1" t="inlineStr"><is><t xml:space="preserve">ID</t></is></c>"#));
        assert!(sheet.contains(r#"<c r="B2" t="inlineStr"><is><t xml:space="preserve">Ada &amp; Co</t></is></c>"#));
        assert!(sheet.contains(r#"<row r="3"><c r="A3" t="inlineStr"><is><t xml:space="preserve">2</t></is></c></row>"#));
        assert!(sheet.ends_with(SHEET_CLOSE));
    }

    #[test]
    fn write_export_produces_readable_workbook() {
        let dir = tempfile::TempDir::new().unwrap();
        let destination = dir.path().join("report.xlsx");
        let stats = crate::domains::export::writer::write_export(
            &destination,
            &["ID".to_string()],
            vec![vec!["1".to_string()], vec!["2".to_string()]],
        )
        .unwrap();

        assert_eq!(stats.rows_written, 2);
        let bytes = std::fs::read(&destination).unwrap();
        let sheet = read_entry(&bytes, SHEET_PATH);
        assert!(sheet.contains(r#"<c r="A3" t="inlineStr">"#));
    }
}
