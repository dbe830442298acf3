//! time format

use chrono::{DateTime, Utc};

/// Parses an HTTP `Date` header (RFC 2822) into a UTC timestamp.
///
/// Used by the clock-skew recovery path: a `RequestTimeTooSkewed`
/// rejection carries the server's clock in this header.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s).ok().map(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Timelike;

    #[test]
    fn http_date() {
        let t = parse_http_date("Fri, 24 May 2013 00:00:00 GMT").unwrap();
        assert_eq!(t.to_rfc3339(), "2013-05-24T00:00:00+00:00");

        let t = parse_http_date("Sun, 30 Jul 2023 13:47:30 +0000").unwrap();
        assert_eq!(t.minute(), 47);

        assert!(parse_http_date("20130524T000000Z").is_none());
        assert!(parse_http_date("").is_none());
    }
}
