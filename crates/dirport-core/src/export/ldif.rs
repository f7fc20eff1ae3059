use std::io::Write;
use std::path::Path;

use base64::Engine;

use crate::entry::LdapEntry;
use crate::error::CoreError;

/// Default maximum line length. 0 disables wrapping.
pub const DEFAULT_WRAP: usize = 76;

/// Export entries to an LDIF file (RFC 2849).
pub fn export(entries: &[LdapEntry], path: &Path, wrap: usize) -> Result<usize, CoreError> {
    let file = std::fs::File::create(path)
        .map_err(|e| CoreError::ExportError(format!("Failed to create file: {}", e)))?;
    let mut writer = std::io::BufWriter::new(file);

    write_ldif(&mut writer, entries, wrap)
}

/// Render entries as LDIF text.
pub fn to_string(entries: &[LdapEntry], wrap: usize) -> String {
    let mut out = String::new();
    for entry in entries {
        push_entry(&mut out, entry, wrap);
    }
    out
}

/// Write entries in LDIF format to any writer. Each entry is followed by a blank line.
pub fn write_ldif<W: Write>(
    writer: &mut W,
    entries: &[LdapEntry],
    wrap: usize,
) -> Result<usize, CoreError> {
    let mut buf = String::new();
    for entry in entries {
        buf.clear();
        push_entry(&mut buf, entry, wrap);
        writer
            .write_all(buf.as_bytes())
            .map_err(|e| CoreError::ExportError(format!("Write failed: {}", e)))?;
    }

    writer
        .flush()
        .map_err(|e| CoreError::ExportError(format!("Flush failed: {}", e)))?;

    Ok(entries.len())
}

fn push_entry(out: &mut String, entry: &LdapEntry, wrap: usize) {
    push_line(out, &format_line("dn", &entry.dn), wrap);
    for (attr, values) in &entry.attributes {
        for value in values {
            push_line(out, &format_line(attr, value), wrap);
        }
    }
    out.push('\n');
}

/// `attr: value`, or `attr:: base64` when the value is not LDIF-safe.
pub fn format_line(attr: &str, value: &str) -> String {
    if needs_base64(value) {
        format!("{}:: {}", attr, base64_encode(value))
    } else {
        format!("{}: {}", attr, value)
    }
}

/// Check if a value needs base64 encoding for LDIF.
pub fn needs_base64(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.starts_with([' ', ':', '<']) || s.ends_with(' ') {
        return true;
    }
    s.bytes()
        .any(|b| b > 127 || b == b'\n' || b == b'\r' || b == b'\0')
}

/// Append `line` folded to `wrap` characters, plus a newline.
///
/// The first physical line keeps `wrap` characters; every continuation line
/// is a single space followed by `wrap - 1` characters. A width of 1 cannot
/// carry any continuation text and is treated as 2.
fn push_line(out: &mut String, line: &str, wrap: usize) {
    let chars: Vec<char> = line.chars().collect();
    if wrap == 0 || chars.len() <= wrap {
        out.push_str(line);
        out.push('\n');
        return;
    }

    let wrap = wrap.max(2);
    out.extend(&chars[..wrap]);
    out.push('\n');
    for chunk in chars[wrap..].chunks(wrap - 1) {
        out.push(' ');
        out.extend(chunk);
        out.push('\n');
    }
}

fn base64_encode(s: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(s.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> LdapEntry {
        LdapEntry::new(
            dn.to_string(),
            attrs
                .iter()
                .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn test_export_ldif() {
        let entries = vec![
            entry(
                "cn=Alice,ou=Users,dc=example,dc=com",
                &[("cn", &["Alice"]), ("objectClass", &["top", "person"])],
            ),
            entry("cn=Bob,ou=Users,dc=example,dc=com", &[("cn", &["Bob"])]),
        ];

        let mut buf = Vec::new();
        let count = write_ldif(&mut buf, &entries, DEFAULT_WRAP).unwrap();
        assert_eq!(count, 2);

        let output = String::from_utf8(buf).unwrap();
        assert_eq!(
            output,
            "dn: cn=Alice,ou=Users,dc=example,dc=com\ncn: Alice\nobjectClass: top\nobjectClass: person\n\n\
             dn: cn=Bob,ou=Users,dc=example,dc=com\ncn: Bob\n\n"
        );
    }

    #[test]
    fn test_base64_rules() {
        assert!(!needs_base64("hello"));
        assert!(!needs_base64(""));
        assert!(!needs_base64("a: b"));
        assert!(needs_base64(" leading space"));
        assert!(needs_base64(":colon"));
        assert!(needs_base64("<angle"));
        assert!(needs_base64("trailing "));
        assert!(needs_base64("two\nlines"));
        assert!(needs_base64("J\u{f6}rg"));
    }

    #[test]
    fn test_base64_line() {
        assert_eq!(format_line("cn", "J\u{f6}rg"), "cn:: SsO2cmc=");
        assert_eq!(format_line("cn", "plain"), "cn: plain");
    }

    #[test]
    fn test_wrap_one_continuation() {
        // 4 + 35 = 39 characters: 20 on the first line, 19 on one continuation.
        let value = "x".repeat(35);
        let text = to_string(&[entry("cn=x", &[("cn", &[value.as_str()])])], 20);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1].chars().count(), 20);
        assert_eq!(lines[2], format!(" {}", "x".repeat(19)));
        assert_eq!(lines[3], "");
        assert_eq!(text.lines().filter(|l| l.starts_with(' ')).count(), 1);
    }

    #[test]
    fn test_wrap_long_value_unfolds() {
        let value = "abcdefghij".repeat(4);
        let text = to_string(&[entry("cn=x", &[("description", &[value.as_str()])])], 20);
        for line in text.lines() {
            assert!(line.chars().count() <= 20);
        }
        let reparsed = crate::import::ldif::parse_ldif(&text);
        assert_eq!(reparsed[0].first_value("description"), Some(value.as_str()));
    }

    #[test]
    fn test_wrap_disabled() {
        let value = "y".repeat(200);
        let text = to_string(&[entry("cn=x", &[("cn", &[value.as_str()])])], 0);
        assert!(text.lines().all(|l| !l.starts_with(' ')));
    }

    #[test]
    fn test_wrap_width_one() {
        let text = to_string(&[entry("cn=x", &[("cn", &["abc"])])], 1);
        let reparsed = crate::import::ldif::parse_ldif(&text);
        assert_eq!(reparsed[0].first_value("cn"), Some("abc"));
    }

    #[test]
    fn test_roundtrip_unwrapped() {
        let entries = vec![
            entry(
                "cn=J\u{f6}rg,dc=test",
                &[
                    ("cn", &["J\u{f6}rg"]),
                    ("description", &[" padded ", ":colon", "line\nbreak", ""]),
                    ("objectClass", &["top", "person"]),
                ],
            ),
            entry("cn=plain,dc=test", &[("cn", &["plain"])]),
        ];
        let text = to_string(&entries, 0);
        assert_eq!(crate::import::ldif::parse_ldif(&text), entries);
    }
}
