//! Ordered headers

use hyper::header::ToStrError;
use hyper::HeaderMap;
use smallvec::SmallVec;

/// The signed-header view of a request: lowercase names in ascending
/// order, values in canonical form.
///
/// Canonical form means leading and trailing whitespace stripped and
/// inner whitespace runs collapsed to a single space, except inside
/// quoted strings; duplicate header values are joined with `,` in
/// arrival order.
#[derive(Debug)]
pub struct OrderedHeaders {
    /// Ascending headers (header names are lowercase)
    headers: SmallVec<[(String, String); 16]>,
}

impl OrderedHeaders {
    /// Constructs `OrderedHeaders` from slice
    ///
    /// + header names must be lowercase
    /// + header values must be canonical
    #[cfg(test)]
    pub fn from_slice_unchecked(slice: &[(&str, &str)]) -> Self {
        let mut headers: SmallVec<[(String, String); 16]> = SmallVec::new();
        for &(name, value) in slice {
            headers.push((name.to_owned(), value.to_owned()));
        }
        headers.sort_unstable();
        Self { headers }
    }

    /// Builds the signed-header view from a header map.
    ///
    /// Only headers accepted by `is_signed` are kept.
    ///
    /// # Errors
    /// Returns an error if a selected header value is not valid UTF-8.
    pub fn from_header_map(
        map: &HeaderMap,
        is_signed: impl Fn(&str) -> bool,
    ) -> Result<Self, ToStrError> {
        let mut headers: SmallVec<[(String, String); 16]> = SmallVec::with_capacity(map.len());

        for name in map.keys() {
            // `HeaderName` is lowercase by construction
            if !is_signed(name.as_str()) {
                continue;
            }
            let mut value = String::new();
            for (i, v) in map.get_all(name).iter().enumerate() {
                if i > 0 {
                    value.push(',');
                }
                value.push_str(&canonical_value(v.to_str()?));
            }
            headers.push((name.as_str().to_owned(), value));
        }
        headers.sort_unstable();

        Ok(Self { headers })
    }

    /// The `;`-joined list of signed header names.
    pub fn signed_header_names(&self) -> String {
        let mut ans = String::new();
        for (i, &(ref name, _)) in self.headers.iter().enumerate() {
            if i > 0 {
                ans.push(';');
            }
            ans.push_str(name);
        }
        ans
    }

    /// Gets header value by name. Time `O(logn)`
    pub fn get(&self, name: &str) -> Option<&str> {
        let headers = self.headers.as_slice();
        match headers.binary_search_by_key(&name, |&(ref n, _)| n.as_str()) {
            Ok(idx) => headers.get(idx).map(|&(_, ref v)| v.as_str()),
            Err(_) => None,
        }
    }
}

impl AsRef<[(String, String)]> for OrderedHeaders {
    fn as_ref(&self) -> &[(String, String)] {
        self.headers.as_ref()
    }
}

/// Trims a header value into its canonical signing form.
///
/// Whitespace runs collapse to a single space, except inside a quoted
/// string, where bytes are preserved verbatim.
fn canonical_value(value: &str) -> String {
    let trimmed = value.trim();
    let mut ans = String::with_capacity(trimmed.len());
    let mut in_quotes = false;
    let mut pending_space = false;

    for c in trimmed.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        if !in_quotes && c.is_ascii_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            ans.push(' ');
            pending_space = false;
        }
        ans.push(c);
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::header::{HeaderName, HeaderValue};

    #[test]
    fn canonical_values() {
        assert_eq!(canonical_value("  a   b  "), "a b");
        assert_eq!(canonical_value("plain"), "plain");
        assert_eq!(canonical_value("\"quoted   inner\"  tail"), "\"quoted   inner\" tail");
        assert_eq!(canonical_value(""), "");
        assert_eq!(canonical_value("a\t\tb"), "a b");
    }

    #[test]
    fn duplicates_join_in_order() {
        let mut map = HeaderMap::new();
        let name = HeaderName::from_static("x-amz-meta-tag");
        let _ = map.append(name.clone(), HeaderValue::from_static("one"));
        let _ = map.append(name, HeaderValue::from_static("  two "));

        let headers = OrderedHeaders::from_header_map(&map, |_| true).unwrap();
        assert_eq!(headers.get("x-amz-meta-tag"), Some("one,two"));
    }

    #[test]
    fn selection_and_sorting() {
        let mut map = HeaderMap::new();
        let _ = map.insert("x-amz-date", HeaderValue::from_static("20230730T133730Z"));
        let _ = map.insert("host", HeaderValue::from_static("s3.amazonaws.com"));
        let _ = map.insert("authorization", HeaderValue::from_static("secret"));

        let headers =
            OrderedHeaders::from_header_map(&map, |name| name != "authorization").unwrap();
        assert_eq!(headers.signed_header_names(), "host;x-amz-date");
        assert!(headers.get("authorization").is_none());

        // empty values sign the empty string
        let mut map = HeaderMap::new();
        let _ = map.insert("x-amz-acl", HeaderValue::from_static(""));
        let headers = OrderedHeaders::from_header_map(&map, |_| true).unwrap();
        assert_eq!(headers.get("x-amz-acl"), Some(""));
    }
}
