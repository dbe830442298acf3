//! minimal xml reading and writing helpers
//!
//! The reader side extracts named elements from S3 response bodies
//! (`UploadId`, `ETag`, `Error/Code`, ...). The writer side is a small
//! extension trait over `xml::writer::EventWriter` used to build the
//! multipart completion body.

use std::io;

use quick_xml::events::Event;
use quick_xml::Reader;
use xml::writer::{events::XmlEvent, EventWriter, Result};

/// Returns the local name of the document's root element.
pub fn root_name(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => {
                return String::from_utf8(e.local_name().as_ref().to_vec()).ok()
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
        buf.clear();
    }
}

/// Returns the text content of the first element named `name`.
pub fn find_element(bytes: &[u8], name: &str) -> Option<String> {
    find_elements_impl(bytes, name, true).into_iter().next()
}

/// Returns the text content of every element named `name`, in document order.
pub fn find_elements(bytes: &[u8], name: &str) -> Vec<String> {
    find_elements_impl(bytes, name, false)
}

/// shared walk for `find_element` / `find_elements`
fn find_elements_impl(bytes: &[u8], name: &str, first_only: bool) -> Vec<String> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut ans = Vec::new();

    // depth > 0 means we are inside a matching element
    let mut depth: usize = 0;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if depth > 0 {
                    depth = depth.saturating_add(1);
                } else if e.local_name().as_ref() == name.as_bytes() {
                    depth = 1;
                    text.clear();
                }
            }
            Ok(Event::Empty(ref e)) => {
                if depth == 0 && e.local_name().as_ref() == name.as_bytes() {
                    ans.push(String::new());
                    if first_only {
                        return ans;
                    }
                }
            }
            Ok(Event::Text(ref t)) => {
                if depth > 0 {
                    if let Ok(s) = t.unescape() {
                        text.push_str(&s);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if depth > 0 {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        ans.push(std::mem::take(&mut text));
                        if first_only {
                            return ans;
                        }
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return ans,
            Ok(_) => {}
        }
        buf.clear();
    }
}

/// Parses an S3 `<Error>` document into `(code, message)`.
///
/// Returns `None` when the document's root is not `Error`, so callers
/// can detect an error payload before reading a success element.
pub fn parse_error_response(bytes: &[u8]) -> Option<(String, Option<String>)> {
    if root_name(bytes)? != "Error" {
        return None;
    }
    let code = find_element(bytes, "Code")?;
    let message = find_element(bytes, "Message");
    Some((code, message))
}

/// helper trait for writing xml
pub trait XmlWriterExt {
    /// write xml stack
    fn stack(&mut self, name: &str, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()>;

    /// write xml stack with an `xmlns` attribute
    fn stack_ns(
        &mut self,
        name: &str,
        ns: &str,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()>;

    /// write xml element
    fn element(&mut self, name: &str, data: &str) -> Result<()>;

    /// write xml by an iterator
    fn iter_element<T>(
        &mut self,
        iter: impl Iterator<Item = T>,
        f: impl FnMut(&mut Self, T) -> Result<()>,
    ) -> Result<()>;
}

impl<W: io::Write> XmlWriterExt for EventWriter<W> {
    fn stack(&mut self, name: &str, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.write(XmlEvent::start_element(name))?;
        f(self)?;
        self.write(XmlEvent::end_element())
    }

    fn stack_ns(
        &mut self,
        name: &str,
        ns: &str,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.write(XmlEvent::start_element(name).default_ns(ns))?;
        f(self)?;
        self.write(XmlEvent::end_element())
    }

    fn element(&mut self, name: &str, data: &str) -> Result<()> {
        self.write(XmlEvent::start_element(name))?;
        self.write(XmlEvent::characters(data))?;
        self.write(XmlEvent::end_element())
    }

    fn iter_element<T>(
        &mut self,
        iter: impl Iterator<Item = T>,
        mut f: impl FnMut(&mut Self, T) -> Result<()>,
    ) -> Result<()> {
        for data in iter {
            f(self, data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIATE: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>example-bucket</Bucket>
  <Key>example-object</Key>
  <UploadId>VXBsb2FkIElEIGZvciA2aWWpbmcncyBteS1tb3ZpZS5tMnRzIHVwbG9hZA</UploadId>
</InitiateMultipartUploadResult>"#;

    const ERROR: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>NoSuchUpload</Code>
  <Message>The specified upload does not exist.</Message>
  <RequestId>656c76696e6727732072657175657374</RequestId>
</Error>"#;

    const LIST: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult>
  <Buckets>
    <Bucket><Name>alpha</Name></Bucket>
    <Bucket><Name>beta</Name></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;

    #[test]
    fn upload_id() {
        assert_eq!(root_name(INITIATE).unwrap(), "InitiateMultipartUploadResult");
        assert_eq!(
            find_element(INITIATE, "UploadId").unwrap(),
            "VXBsb2FkIElEIGZvciA2aWWpbmcncyBteS1tb3ZpZS5tMnRzIHVwbG9hZA"
        );
        assert!(find_element(INITIATE, "ETag").is_none());
    }

    #[test]
    fn error_document() {
        let (code, message) = parse_error_response(ERROR).unwrap();
        assert_eq!(code, "NoSuchUpload");
        assert_eq!(message.as_deref(), Some("The specified upload does not exist."));

        assert!(parse_error_response(INITIATE).is_none());
        assert!(parse_error_response(b"not xml at all").is_none());
    }

    #[test]
    fn bucket_names() {
        assert_eq!(find_elements(LIST, "Name"), ["alpha", "beta"]);
        assert!(find_elements(LIST, "Owner").is_empty());
    }

    #[test]
    fn escaped_text() {
        let xml = b"<Result><ETag>&quot;abc&amp;def&quot;</ETag></Result>";
        assert_eq!(find_element(xml, "ETag").unwrap(), "\"abc&def\"");
    }

    #[test]
    fn write_stack() {
        let mut body = Vec::new();
        {
            let mut w = EventWriter::new(&mut body);
            w.stack_ns("CompleteMultipartUpload", "http://s3.amazonaws.com/doc/2006-03-01/", |w| {
                w.stack("Part", |w| {
                    w.element("PartNumber", "1")?;
                    w.element("ETag", "\"etag-1\"")
                })
            })
            .unwrap();
        }
        let txt = String::from_utf8(body).unwrap();
        assert!(txt.contains("<PartNumber>1</PartNumber>"));
        assert!(txt.contains("xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\""));
    }
}
