//! Header tables.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tinker_kernel::{Table, Value};

use crate::error::{HttpError, Result};

/// Build request headers from a script table.
///
/// Entries whose key or value is not a string are skipped.  A `User-Agent`
/// header is added when the table does not set one.
pub fn from_table(table: Option<&Table>, user_agent: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (key, value) in table.into_iter().flat_map(Table::iter) {
        let (Some(key), Some(value)) = (key.as_str(), value.as_bytes()) else {
            continue;
        };
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| HttpError::InvalidHeader {
            reason: format!("Invalid header name '{key}'"),
        })?;
        let value = HeaderValue::from_bytes(value).map_err(|_| HttpError::InvalidHeader {
            reason: format!("Invalid value for header '{key}'"),
        })?;
        headers.append(name, value);
    }

    if !headers.contains_key(USER_AGENT) {
        let agent = HeaderValue::from_str(user_agent).map_err(|_| HttpError::InvalidHeader {
            reason: "Invalid user agent".into(),
        })?;
        headers.insert(USER_AGENT, agent);
    }
    Ok(headers)
}

/// Response headers as a script table.  Repeated headers are joined with
/// `", "`; values that are not valid text are lossily decoded.
pub fn to_table(headers: &HeaderMap) -> Table {
    let mut table = Table::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        table.insert(canonical_name(name.as_str()), joined);
    }
    table
}

/// `content-type` becomes `Content-Type`.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_string_entries_are_skipped() {
        let mut table = Table::new();
        table.insert("X-Ok", "yes");
        table.insert("X-Number", 5_i64);
        table.insert(1_i64, "positional");
        table.insert("X-Flag", true);

        let headers = from_table(Some(&table), "agent/1").unwrap();
        assert_eq!(headers.get("x-ok").unwrap(), "yes");
        assert!(headers.get("x-number").is_none());
        assert!(headers.get("x-flag").is_none());
        assert_eq!(headers.get(USER_AGENT).unwrap(), "agent/1");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn binary_strings_are_header_values() {
        let mut table = Table::new();
        table.insert("X-Token", Value::Bytes(b"abc".to_vec()));
        table.insert(Value::Bytes(b"X-Raw".to_vec()), Value::Bytes(vec![b'a', 0xe9]));

        let headers = from_table(Some(&table), "agent/1").unwrap();
        assert_eq!(headers.get("x-token").unwrap(), "abc");
        assert_eq!(headers.get("x-raw").unwrap().as_bytes(), [b'a', 0xe9]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn user_agent_is_kept_case_insensitively() {
        let mut table = Table::new();
        table.insert("user-AGENT", "mine");
        let headers = from_table(Some(&table), "agent/1").unwrap();
        assert_eq!(headers.get_all(USER_AGENT).iter().count(), 1);
        assert_eq!(headers.get(USER_AGENT).unwrap(), "mine");
    }

    #[test]
    fn invalid_header_is_an_error() {
        let mut table = Table::new();
        table.insert("Bad Name", "x");
        assert_eq!(
            from_table(Some(&table), "agent/1").unwrap_err().to_string(),
            "Invalid header name 'Bad Name'"
        );

        let mut table = Table::new();
        table.insert("X-Bad", "line\nbreak");
        assert!(from_table(Some(&table), "agent/1").is_err());
    }

    #[test]
    fn response_headers_are_canonicalised() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let table = to_table(&headers);
        assert_eq!(table.get_str("Content-Type"), Some(&Value::from("text/plain")));
        assert_eq!(table.get_str("Set-Cookie"), Some(&Value::from("a=1, b=2")));
    }
}
