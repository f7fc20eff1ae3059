/// Get the parent DN (everything after the first unescaped comma).
pub fn parent_dn(dn: &str) -> Option<&str> {
    split_rdn(dn).1
}

/// Get the RDN (first component before the first unescaped comma).
pub fn rdn(dn: &str) -> &str {
    split_rdn(dn).0
}

/// Get the value part of the RDN (after '='), still escaped.
pub fn rdn_value(dn: &str) -> &str {
    let r = rdn(dn);
    r.find('=').map(|i| &r[i + 1..]).unwrap_or(r)
}

fn split_rdn(dn: &str) -> (&str, Option<&str>) {
    let mut escaped = false;
    for (i, ch) in dn.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => return (&dn[..i], Some(&dn[i + 1..])),
            _ => escaped = false,
        }
    }
    (dn, None)
}

/// Escape an attribute value for use inside an RDN (RFC 4514).
pub fn escape_value(value: &str) -> String {
    let count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);

    for (i, ch) in value.chars().enumerate() {
        let is_first = i == 0;
        let is_last = i + 1 == count;
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

/// Build `attr=value,parent`, escaping the value. An empty parent yields a bare RDN.
pub fn compose(attr: &str, value: &str, parent: &str) -> String {
    if parent.is_empty() {
        format!("{}={}", attr, escape_value(value))
    } else {
        format!("{}={},{}", attr, escape_value(value), parent)
    }
}

/// Case-insensitive DN comparison key.
pub fn normalize(dn: &str) -> String {
    dn.trim().to_lowercase()
}
