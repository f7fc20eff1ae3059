//! RFC 4515 search filters: parsing and in-memory evaluation.
//!
//! ```text
//! filter     = "(" filtercomp ")"
//! filtercomp = and / or / not / item
//! and        = "&" filterlist
//! or         = "|" filterlist
//! not        = "!" filter
//! filterlist = 1*filter
//! item       = attr filtertype value
//! filtertype = "=" / "~=" / ">=" / "<="
//! ```

use crate::entry::LdapEntry;

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
    /// `attr=a*b*c`, pieces between wildcards (first/last may be empty).
    Substring(String, Vec<String>),
    Approx(String, String),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
}

impl Filter {
    pub fn parse(filter: &str) -> Result<Filter, String> {
        let filter = filter.trim();
        if filter.is_empty() {
            return Err("Filter cannot be empty".to_string());
        }

        let bytes = filter.as_bytes();
        let (parsed, end) = parse_filter(bytes, 0)?;
        if end != bytes.len() {
            Err(format!(
                "Unexpected characters after filter at position {}",
                end + 1
            ))
        } else {
            Ok(parsed)
        }
    }

    /// Evaluate against an entry. String comparisons ignore case.
    pub fn matches(&self, entry: &LdapEntry) -> bool {
        match self {
            Filter::And(list) => list.iter().all(|f| f.matches(entry)),
            Filter::Or(list) => list.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || entry.values(attr).is_some()
            }
            Filter::Equal(attr, value) | Filter::Approx(attr, value) => {
                any_value(entry, attr, |v| v.to_lowercase() == value.to_lowercase())
            }
            Filter::Substring(attr, pieces) => {
                any_value(entry, attr, |v| substring_match(&v.to_lowercase(), pieces))
            }
            Filter::GreaterOrEqual(attr, value) => {
                any_value(entry, attr, |v| v.to_lowercase() >= value.to_lowercase())
            }
            Filter::LessOrEqual(attr, value) => {
                any_value(entry, attr, |v| v.to_lowercase() <= value.to_lowercase())
            }
        }
    }
}

/// Validate that a string is a valid LDAP search filter.
pub fn validate_filter(filter: &str) -> Result<(), String> {
    Filter::parse(filter).map(|_| ())
}

fn any_value(entry: &LdapEntry, attr: &str, pred: impl Fn(&str) -> bool) -> bool {
    entry
        .values(attr)
        .is_some_and(|vals| vals.iter().any(|v| pred(v)))
}

fn substring_match(value: &str, pieces: &[String]) -> bool {
    let pieces: Vec<String> = pieces.iter().map(|p| p.to_lowercase()).collect();
    let (first, rest) = match pieces.split_first() {
        Some(split) => split,
        None => return true,
    };
    if !value.starts_with(first.as_str()) {
        return false;
    }
    let mut remaining = &value[first.len()..];
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for piece in middle {
        match remaining.find(piece.as_str()) {
            Some(pos) => remaining = &remaining[pos + piece.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

/// Parse a single filter: "(" filtercomp ")"
/// Returns the filter and the position after the closing ')'.
fn parse_filter(input: &[u8], pos: usize) -> Result<(Filter, usize), String> {
    if pos >= input.len() || input[pos] != b'(' {
        return Err(format!("Expected '(' at position {}", pos + 1));
    }

    let inner = pos + 1;
    if inner >= input.len() {
        return Err(format!(
            "Unexpected end of filter after '(' at position {}",
            pos + 1
        ));
    }

    let (filter, end) = match input[inner] {
        b'&' => {
            let (list, end) = parse_filter_list(input, inner + 1, '&')?;
            (Filter::And(list), end)
        }
        b'|' => {
            let (list, end) = parse_filter_list(input, inner + 1, '|')?;
            (Filter::Or(list), end)
        }
        b'!' => {
            let (f, end) = parse_filter(input, inner + 1)?;
            (Filter::Not(Box::new(f)), end)
        }
        _ => parse_item(input, inner)?,
    };

    if end >= input.len() || input[end] != b')' {
        return Err(format!("Expected ')' at position {}", end + 1));
    }
    Ok((filter, end + 1))
}

/// Parse a filterlist: 1*filter
fn parse_filter_list(input: &[u8], pos: usize, op: char) -> Result<(Vec<Filter>, usize), String> {
    let mut cur = pos;
    let mut list = Vec::new();
    while cur < input.len() && input[cur] == b'(' {
        let (f, end) = parse_filter(input, cur)?;
        list.push(f);
        cur = end;
    }
    if list.is_empty() {
        return Err(format!(
            "Empty filter list in '{}' operator at position {}",
            op,
            pos + 1
        ));
    }
    Ok((list, cur))
}

/// Parse a simple filter item: attr filtertype value
/// Returns position after the value (just before the closing ')').
fn parse_item(input: &[u8], pos: usize) -> Result<(Filter, usize), String> {
    const OPERATOR_ERR: &str = "Expected comparison operator (=, ~=, >=, <=) after attribute name";

    let mut cur = pos;
    while cur < input.len()
        && (input[cur].is_ascii_alphanumeric()
            || input[cur] == b'-'
            || input[cur] == b'.'
            || input[cur] == b';')
    {
        cur += 1;
    }

    if cur == pos {
        return Err(format!(
            "Expected attribute name after '(' at position {}",
            pos
        ));
    }
    let attr = String::from_utf8_lossy(&input[pos..cur]).into_owned();

    if cur >= input.len() {
        return Err(OPERATOR_ERR.to_string());
    }

    let op = match (input[cur], input.get(cur + 1).copied()) {
        (b'~', Some(b'=')) | (b'>', Some(b'=')) | (b'<', Some(b'=')) => {
            cur += 2;
            input[cur - 2]
        }
        (b'=', _) => {
            cur += 1;
            b'='
        }
        _ => return Err(OPERATOR_ERR.to_string()),
    };

    // Value: everything up to the unescaped ')'. '*' stays a wildcard.
    let mut pieces: Vec<Vec<u8>> = vec![Vec::new()];
    while cur < input.len() && input[cur] != b')' {
        match input[cur] {
            b'\\' if cur + 2 < input.len() => {
                let hex = std::str::from_utf8(&input[cur + 1..cur + 3]).unwrap_or("");
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|_| format!("Invalid escape sequence at position {}", cur + 1))?;
                if let Some(last) = pieces.last_mut() {
                    last.push(byte);
                }
                cur += 3;
            }
            b'*' if op == b'=' => {
                pieces.push(Vec::new());
                cur += 1;
            }
            b => {
                if let Some(last) = pieces.last_mut() {
                    last.push(b);
                }
                cur += 1;
            }
        }
    }

    let mut pieces: Vec<String> = pieces
        .into_iter()
        .map(|p| String::from_utf8_lossy(&p).into_owned())
        .collect();

    let filter = match op {
        b'~' => Filter::Approx(attr, pieces.remove(0)),
        b'>' => Filter::GreaterOrEqual(attr, pieces.remove(0)),
        b'<' => Filter::LessOrEqual(attr, pieces.remove(0)),
        _ if pieces.len() == 1 => Filter::Equal(attr, pieces.remove(0)),
        _ if pieces.len() == 2 && pieces.iter().all(|p| p.is_empty()) => Filter::Present(attr),
        _ => Filter::Substring(attr, pieces),
    };

    Ok((filter, cur))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn alice() -> LdapEntry {
        LdapEntry::new(
            "uid=alice,ou=users,dc=example".to_string(),
            BTreeMap::from([
                ("uid".to_string(), vec!["alice".to_string()]),
                ("cn".to_string(), vec!["Alice Smith".to_string()]),
                (
                    "objectClass".to_string(),
                    vec!["top".to_string(), "inetOrgPerson".to_string()],
                ),
                ("employeeNumber".to_string(), vec!["0042".to_string()]),
            ]),
        )
    }

    #[test]
    fn test_valid_filters() {
        assert!(validate_filter("(objectClass=*)").is_ok());
        assert!(validate_filter("(&(cn=admin)(objectClass=person))").is_ok());
        assert!(validate_filter("(|(cn=a)(cn=b))").is_ok());
        assert!(validate_filter("(!(cn=admin))").is_ok());
        assert!(validate_filter("  (cn=test)  ").is_ok());
        assert!(validate_filter("(cn;lang-en=test)").is_ok());
        assert!(validate_filter("(cn=test\\29value)").is_ok());
    }

    #[test]
    fn test_invalid_filters() {
        assert!(validate_filter("").is_err());
        assert!(validate_filter("((cn=admin)").is_err());
        assert!(validate_filter("(cn=admin))").is_err());
    }

    #[test]
    fn test_error_messages() {
        assert!(validate_filter("cn=admin").unwrap_err().contains("Expected '('"));
        assert!(validate_filter("(cn=admin").unwrap_err().contains("Expected ')'"));
        assert!(validate_filter("(cn)").unwrap_err().contains("comparison operator"));
        assert!(validate_filter("(=value)").unwrap_err().contains("Expected attribute name"));
        assert!(validate_filter("(&)").unwrap_err().contains("Empty filter list"));
        assert!(validate_filter("(cn=test)garbage")
            .unwrap_err()
            .contains("Unexpected characters"));
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!(
            Filter::parse("(objectClass=*)").unwrap(),
            Filter::Present("objectClass".to_string())
        );
        assert_eq!(
            Filter::parse("(cn=a\\2ab)").unwrap(),
            Filter::Equal("cn".to_string(), "a*b".to_string())
        );
        assert_eq!(
            Filter::parse("(cn=Al*Sm*)").unwrap(),
            Filter::Substring(
                "cn".to_string(),
                vec!["Al".to_string(), "Sm".to_string(), String::new()]
            )
        );
    }

    #[test]
    fn test_matches() {
        let entry = alice();
        let check = |f: &str| Filter::parse(f).unwrap().matches(&entry);
        assert!(check("(objectClass=inetorgperson)"));
        assert!(check("(&(objectClass=inetOrgPerson)(uid=ALICE))"));
        assert!(!check("(&(objectClass=inetOrgPerson)(uid=bob))"));
        assert!(check("(|(uid=bob)(uid=alice))"));
        assert!(check("(!(uid=bob))"));
        assert!(check("(cn=*)"));
        assert!(!check("(mail=*)"));
        assert!(check("(cn=ali*)"));
        assert!(check("(cn=*smith)"));
        assert!(check("(cn=a*e*h)"));
        assert!(!check("(cn=*jones*)"));
        assert!(check("(employeeNumber>=0040)"));
        assert!(!check("(employeeNumber<=0041)"));
    }
}
