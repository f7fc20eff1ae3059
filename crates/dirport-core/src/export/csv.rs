use std::io::Write;

use crate::entry::LdapEntry;
use crate::error::CoreError;
use crate::import::csv::Delimiter;
use crate::merge::MULTI_VALUE_SEPARATOR;

/// Write entries as delimited text with one column per field.
///
/// Multi-valued attributes are joined with "; ". Records with a field starting
/// with `#` are fully quoted so the reader never takes them for comments.
/// Returns the number of rows written.
pub fn write_csv<W: Write>(
    writer: W,
    entries: &[LdapEntry],
    fields: &[String],
    delimiter: Delimiter,
) -> Result<usize, CoreError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter.as_byte())
        .from_writer(writer);

    write_row(&mut csv_writer, fields, delimiter)?;

    for entry in entries {
        let record: Vec<String> = fields
            .iter()
            .map(|field| {
                if field.eq_ignore_ascii_case("dn") {
                    return entry.dn.clone();
                }
                entry
                    .values(field)
                    .map(|vals| vals.join(MULTI_VALUE_SEPARATOR))
                    .unwrap_or_default()
            })
            .collect();
        write_row(&mut csv_writer, &record, delimiter)?;
    }

    csv_writer
        .flush()
        .map_err(|e| CoreError::ExportError(format!("CSV flush failed: {}", e)))?;

    Ok(entries.len())
}

fn write_error(e: impl std::fmt::Display) -> CoreError {
    CoreError::ExportError(format!("CSV write failed: {}", e))
}

fn looks_like_comment(value: &str) -> bool {
    value.trim_start().starts_with('#')
}

fn write_row<W: Write>(
    csv_writer: &mut csv::Writer<W>,
    record: &[String],
    delimiter: Delimiter,
) -> Result<(), CoreError> {
    if !record.iter().any(|v| looks_like_comment(v)) {
        return csv_writer.write_record(record).map_err(write_error);
    }

    let mut quoted = csv::WriterBuilder::new()
        .delimiter(delimiter.as_byte())
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    quoted.write_record(record).map_err(write_error)?;
    let bytes = quoted.into_inner().map_err(write_error)?;

    csv_writer.flush().map_err(write_error)?;
    csv_writer.get_mut().write_all(&bytes).map_err(write_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_write_csv() {
        let entries = vec![
            LdapEntry::new(
                "uid=alice,ou=users,dc=example".to_string(),
                BTreeMap::from([
                    ("uid".to_string(), vec!["alice".to_string()]),
                    ("mail".to_string(), vec!["alice@example.com".to_string()]),
                ]),
            ),
            LdapEntry::new(
                "uid=bob,ou=users,dc=example".to_string(),
                BTreeMap::from([("uid".to_string(), vec!["bob".to_string()])]),
            ),
        ];

        let mut buf = Vec::new();
        let count = write_csv(&mut buf, &entries, &fields(&["uid", "mail"]), Delimiter::Comma)
            .unwrap();
        assert_eq!(count, 2);

        let output = String::from_utf8(buf).unwrap();
        assert_eq!(output, "uid,mail\nalice,alice@example.com\nbob,\n");
    }

    #[test]
    fn test_multi_valued_and_dn_column() {
        let entries = vec![LdapEntry::new(
            "cn=admins,ou=groups,dc=example".to_string(),
            BTreeMap::from([(
                "member".to_string(),
                vec!["uid=a,dc=example".to_string(), "uid=b,dc=example".to_string()],
            )]),
        )];

        let mut buf = Vec::new();
        write_csv(&mut buf, &entries, &fields(&["dn", "member"]), Delimiter::Semicolon).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.starts_with("dn;member\n"));
        assert!(output.contains("\"uid=a,dc=example; uid=b,dc=example\""));
    }

    #[test]
    fn test_header_only_when_empty() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[], &fields(&["uid"]), Delimiter::Comma).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "uid\n");
    }

    #[test]
    fn test_hash_prefixed_values_are_quoted() {
        let entries = vec![LdapEntry::new(
            "uid=n42,ou=users,dc=example".to_string(),
            BTreeMap::from([
                ("uid".to_string(), vec!["#42".to_string()]),
                ("cn".to_string(), vec!["Room".to_string()]),
            ]),
        )];

        let mut buf = Vec::new();
        write_csv(&mut buf, &entries, &fields(&["uid", "cn"]), Delimiter::Comma).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "uid,cn\n\"#42\",\"Room\"\n");
    }

    #[test]
    fn test_round_trip_through_reader() {
        let entries = vec![
            LdapEntry::new(
                "uid=a,dc=example".to_string(),
                BTreeMap::from([
                    ("uid".to_string(), vec!["  # not a comment".to_string()]),
                    ("description".to_string(), vec!["line one\n# line two".to_string()]),
                ]),
            ),
            LdapEntry::new(
                "uid=b,dc=example".to_string(),
                BTreeMap::from([
                    ("uid".to_string(), vec!["b".to_string()]),
                    ("description".to_string(), vec!["say \"hi\"".to_string()]),
                ]),
            ),
        ];

        let mut buf = Vec::new();
        write_csv(&mut buf, &entries, &fields(&["uid", "description"]), Delimiter::Tab).unwrap();
        let table = crate::import::csv::read_csv(&buf, Delimiter::Tab).unwrap();

        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("uid"), Some("  # not a comment"));
        assert_eq!(table.rows[0].get("description"), Some("line one\n# line two"));
        assert_eq!(table.rows[1].get("description"), Some("say \"hi\""));
    }
}
