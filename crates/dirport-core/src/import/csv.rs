use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::CoreError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Field delimiter for delimited text.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Delimiter {
    #[default]
    #[strum(to_string = "comma", serialize = ",")]
    Comma,
    #[strum(to_string = "semicolon", serialize = ";")]
    Semicolon,
    #[strum(to_string = "tab", serialize = "\t", serialize = "\\t")]
    Tab,
}

impl Delimiter {
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Semicolon => b';',
            Delimiter::Tab => b'\t',
        }
    }
}

/// One data record keyed by header name, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based position: the header is row 1, the first data row is row 2.
    pub index: usize,
    pub values: Vec<(String, String)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }
}

/// Header plus data rows of a delimited text document.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

/// Decode bytes, tolerating a UTF-8 or UTF-16 byte-order mark. Invalid
/// sequences are replaced rather than rejected.
pub fn decode_text(data: &[u8]) -> String {
    if let Some(rest) = data.strip_prefix(UTF8_BOM) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = data.strip_prefix(UTF16_LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = data.strip_prefix(UTF16_BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    String::from_utf8_lossy(data).into_owned()
}

fn decode_utf16(data: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Remove lines whose first non-space character is `#`.
///
/// Lines that continue a quoted field are kept whatever they start with.
fn strip_comments(text: &str) -> String {
    let mut kept = Vec::new();
    let mut in_quotes = false;
    for line in text.lines() {
        if !in_quotes && line.trim_start().starts_with('#') {
            continue;
        }
        // Escaped quotes are doubled, so parity tracks whether a field is open.
        if line.matches('"').count() % 2 == 1 {
            in_quotes = !in_quotes;
        }
        kept.push(line);
    }
    kept.join("\n")
}

/// Parse delimited text into a header and rows.
///
/// Short rows yield missing keys and long rows are truncated to the header
/// width; neither is an error.
pub fn read_csv(data: &[u8], delimiter: Delimiter) -> Result<CsvTable, CoreError> {
    let text = strip_comments(&decode_text(data));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter.as_byte())
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Ok(CsvTable::default());
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let values = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(Row {
            index: i + 2,
            values,
        });
    }

    debug!(
        "read_csv: {} columns, {} rows, delimiter={}",
        headers.len(),
        rows.len(),
        delimiter
    );

    Ok(CsvTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_basic() {
        let table = read_csv(b"uid,cn,sn\njdoe,John Doe,Doe\n", Delimiter::Comma).unwrap();
        assert_eq!(table.headers, vec!["uid", "cn", "sn"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].index, 2);
        assert_eq!(table.rows[0].get("cn"), Some("John Doe"));
    }

    #[test]
    fn test_comment_lines_removed() {
        let data = b"# exported list\nuid,cn\n  # indented comment\njdoe,John\nasmith,Alice\n";
        let table = read_csv(data, Delimiter::Comma).unwrap();
        assert_eq!(table.headers, vec!["uid", "cn"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].index, 3);
        assert_eq!(table.rows[1].get("uid"), Some("asmith"));
    }

    #[test]
    fn test_comment_marker_inside_quoted_field() {
        let data = b"uid,description\njdoe,\"first\n# second\"\n\"#42\",x\n";
        let table = read_csv(data, Delimiter::Comma).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("description"), Some("first\n# second"));
        assert_eq!(table.rows[1].get("uid"), Some("#42"));
    }

    #[test]
    fn test_utf8_bom() {
        let mut data = UTF8_BOM.to_vec();
        data.extend_from_slice(b"uid,cn\njdoe,John\n");
        let table = read_csv(&data, Delimiter::Comma).unwrap();
        assert_eq!(table.headers[0], "uid");
    }

    #[test]
    fn test_utf16_le_bom() {
        let mut data = UTF16_LE_BOM.to_vec();
        for unit in "uid\nj\u{f6}rg\n".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        let table = read_csv(&data, Delimiter::Comma).unwrap();
        assert_eq!(table.rows[0].get("uid"), Some("j\u{f6}rg"));
    }

    #[test]
    fn test_semicolon_and_tab() {
        let table = read_csv(b"uid;cn\njdoe;John\n", Delimiter::Semicolon).unwrap();
        assert_eq!(table.rows[0].get("cn"), Some("John"));
        let table = read_csv(b"uid\tcn\njdoe\tJohn\n", Delimiter::Tab).unwrap();
        assert_eq!(table.rows[0].get("cn"), Some("John"));
    }

    #[test]
    fn test_ragged_rows() {
        let table = read_csv(b"uid,cn,sn\njdoe\nasmith,Alice,Smith,extra\n", Delimiter::Comma)
            .unwrap();
        assert_eq!(table.rows[0].values.len(), 1);
        assert_eq!(table.rows[0].get("sn"), None);
        assert_eq!(table.rows[1].values.len(), 3);
        assert_eq!(table.rows[1].get("sn"), Some("Smith"));
    }

    #[test]
    fn test_empty_input() {
        let table = read_csv(b"", Delimiter::Comma).unwrap();
        assert!(table.headers.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_delimiter_parse() {
        assert_eq!("comma".parse::<Delimiter>().unwrap(), Delimiter::Comma);
        assert_eq!(";".parse::<Delimiter>().unwrap(), Delimiter::Semicolon);
        assert_eq!("TAB".parse::<Delimiter>().unwrap(), Delimiter::Tab);
        assert!("pipe".parse::<Delimiter>().is_err());
        assert_eq!(Delimiter::Tab.to_string(), "tab");
    }
}
