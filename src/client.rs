//! thin object/bucket surface over the signing middleware
//!
//! This is the interaction contract with the signer, not a full SDK:
//! enough of the S3 REST shape to exercise every signed verb, including
//! the multipart protocol.

use crate::errors::{error_from_response, S3Error, S3Result};
use crate::multipart::MultipartUpload;
use crate::service::SigningClient;
use crate::signature_v4::encode_key;
use crate::utils::xml::find_elements;
use crate::{Body, Request, Response};

use std::sync::Arc;

use bytes::Bytes;
use hyper::header::{ETAG, RANGE};
use hyper::http::response::Parts;
use hyper::{HeaderMap, Method, Uri};
use tracing::debug;

/// S3 client over a shared signing middleware.
#[derive(Debug, Clone)]
pub struct S3Client {
    /// shared middleware
    inner: Arc<SigningClient>,
}

impl S3Client {
    /// Wraps a signing middleware as a client.
    #[must_use]
    pub fn new(inner: Arc<SigningClient>) -> Self {
        Self { inner }
    }

    /// the service root url
    fn service_url(&self) -> String {
        let config = self.inner.config();
        match config.endpoint {
            Some(ref ep) => ep.trim_end_matches('/').to_owned(),
            None => format!("https://s3.{}.amazonaws.com", config.region),
        }
    }

    /// Lists the caller's buckets by name.
    pub async fn list_buckets(&self) -> S3Result<Vec<String>> {
        let url = format!("{}/", self.service_url());
        let resp = self.request(Method::GET, &url, Body::empty()).await?;
        let (_, bytes) = expect_success(resp).await?;
        let names = find_elements(&bytes, "Name");
        debug!(count = names.len(), "listed buckets");
        Ok(names)
    }

    /// A handle on a bucket.
    ///
    /// # Errors
    /// Returns [`S3Error::InvalidConfig`] for an invalid bucket name.
    pub fn bucket(&self, name: &str) -> S3Result<Bucket> {
        validate_bucket_name(name)?;
        let config = self.inner.config();
        let base_url = match config.endpoint {
            Some(ref ep) => format!("{}/{name}", ep.trim_end_matches('/')),
            None => format!("https://{name}.s3.{}.amazonaws.com", config.region),
        };
        Ok(Bucket {
            client: Arc::clone(&self.inner),
            name: name.to_owned(),
            base_url,
        })
    }

    /// send through the middleware
    async fn request(&self, method: Method, url: &str, body: Body) -> S3Result<Response> {
        send(&self.inner, method, url, body).await
    }
}

/// A handle on a bucket.
#[derive(Debug, Clone)]
pub struct Bucket {
    /// shared middleware
    client: Arc<SigningClient>,
    /// bucket name
    name: String,
    /// bucket base url, virtual-hosted unless an endpoint override is set
    base_url: String,
}

impl Bucket {
    /// bucket name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle on an object in this bucket.
    #[must_use]
    pub fn object(&self, key: &str) -> Object {
        Object {
            client: Arc::clone(&self.client),
            url: format!("{}/{}", self.base_url, encode_key(key)),
            key: key.to_owned(),
        }
    }
}

/// A handle on an object.
#[derive(Debug, Clone)]
pub struct Object {
    /// shared middleware
    client: Arc<SigningClient>,
    /// object url, key percent-encoded
    url: String,
    /// object key
    key: String,
}

impl Object {
    /// object key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fetches the object's metadata headers.
    pub async fn head(&self) -> S3Result<HeaderMap> {
        let resp = send(&self.client, Method::HEAD, &self.url, Body::empty()).await?;
        let (parts, _) = expect_success(resp).await?;
        Ok(parts.headers)
    }

    /// Reads the object, optionally restricted to an inclusive byte range.
    pub async fn get(&self, range: Option<(u64, u64)>) -> S3Result<Bytes> {
        let mut req = build_request(Method::GET, &self.url, Body::empty())?;
        if let Some((first, last)) = range {
            let value = format!("bytes={first}-{last}");
            let _ = req.headers_mut().insert(
                RANGE,
                value
                    .parse()
                    .map_err(|_| S3Error::Signing("invalid range header".to_owned()))?,
            );
        }
        let resp = self.client.send(req).await?;
        let (_, bytes) = expect_success(resp).await?;
        Ok(bytes)
    }

    /// Writes the object in one request, returning its `ETag`.
    pub async fn put(&self, data: impl Into<Bytes>) -> S3Result<Option<String>> {
        let resp = send(&self.client, Method::PUT, &self.url, Body::from(data.into())).await?;
        let (parts, _) = expect_success(resp).await?;
        Ok(parts
            .headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned))
    }

    /// Starts a multipart upload sink for this object.
    pub async fn start_multipart(&self) -> S3Result<MultipartUpload> {
        MultipartUpload::initiate(
            Arc::clone(&self.client),
            self.url.clone(),
            &self.client.config().multipart,
        )
        .await
    }
}

/// Checks a bucket name against the S3 naming rules we rely on.
fn validate_bucket_name(name: &str) -> S3Result<()> {
    let bytes = name.as_bytes();
    let ok = (3..=63).contains(&bytes.len())
        && bytes
            .iter()
            .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric);
    if ok {
        Ok(())
    } else {
        Err(S3Error::InvalidConfig(format!("invalid bucket name: {name}")))
    }
}

/// build an unsigned request
fn build_request(method: Method, url: &str, body: Body) -> S3Result<Request> {
    let uri: Uri = url
        .parse()
        .map_err(|e| S3Error::Signing(format!("invalid url {url}: {e}")))?;
    let mut req = Request::new(body);
    *req.method_mut() = method;
    *req.uri_mut() = uri;
    Ok(req)
}

/// send a request through the middleware
async fn send(client: &SigningClient, method: Method, url: &str, body: Body) -> S3Result<Response> {
    let req = build_request(method, url, body)?;
    client.send(req).await
}

/// Drains a response, mapping non-2xx statuses to typed errors.
async fn expect_success(resp: Response) -> S3Result<(Parts, Bytes)> {
    let (parts, body) = resp.into_parts();
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|e| S3Error::Transport(e.into()))?;
    if parts.status.is_success() {
        Ok((parts, bytes))
    } else {
        Err(error_from_response(parts.status, &bytes))
    }
}
