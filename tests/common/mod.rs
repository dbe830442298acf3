//! shared test utilities: a recording mock transport and fixed clock

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use hyper::header::ETAG;
use hyper::{Body, HeaderMap, Method, StatusCode, Uri};
use s3_proxy::{
    Clock, Credentials, HttpClient, ProxyConfig, SigningClient, StaticCredentialsProvider,
};

/// the AWS example access key
pub const ACCESS_KEY: &str = "AKIDEXAMPLE";

/// the AWS example secret key
pub const SECRET_KEY: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

/// the fixed test instant: 2023-07-30T13:37:30Z
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 7, 30, 13, 37, 30).unwrap()
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// One request as the downstream transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    /// header value as `&str`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// raw query string
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }
}

/// What the mock sends back.
pub enum MockReply {
    /// respond immediately
    Ready(hyper::Response<Body>),
    /// never respond; the caller is expected to cancel
    Hang,
}

/// a plain status reply
pub fn reply_status(status: u16) -> MockReply {
    let mut resp = hyper::Response::new(Body::empty());
    *resp.status_mut() = StatusCode::from_u16(status).unwrap();
    MockReply::Ready(resp)
}

/// an xml body reply
pub fn reply_xml(status: u16, body: &str) -> MockReply {
    let mut resp = hyper::Response::new(Body::from(body.to_owned()));
    *resp.status_mut() = StatusCode::from_u16(status).unwrap();
    MockReply::Ready(resp)
}

/// a 200 reply carrying an `ETag` header
pub fn reply_etag(etag: &str) -> MockReply {
    let mut resp = hyper::Response::new(Body::empty());
    let _ = resp.headers_mut().insert(ETAG, etag.parse().unwrap());
    MockReply::Ready(resp)
}

type Handler = Box<dyn Fn(&RecordedRequest, usize) -> MockReply + Send + Sync>;

/// A downstream transport that records every request and replies from a
/// scripted handler. The handler's second argument is the number of
/// requests seen before this one.
pub struct MockTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    handler: Handler,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&RecordedRequest, usize) -> MockReply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    /// everything recorded so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for MockTransport {
    async fn send(
        &self,
        req: hyper::Request<Body>,
    ) -> Result<hyper::Response<Body>, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let (parts, body) = req.into_parts();
        let bytes = hyper::body::to_bytes(body).await?;
        let recorded = RecordedRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: bytes,
        };
        let index = {
            let mut guard = self.requests.lock().unwrap();
            guard.push(recorded.clone());
            guard.len() - 1
        };
        match (self.handler)(&recorded, index) {
            MockReply::Ready(resp) => Ok(resp),
            MockReply::Hang => {
                futures::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }
}

/// Builds a middleware over the mock with the example credentials and
/// the fixed clock.
pub fn signing_client(
    transport: Arc<MockTransport>,
    config: ProxyConfig,
    session_token: Option<String>,
) -> Arc<SigningClient> {
    let creds = Credentials::new(ACCESS_KEY, SECRET_KEY, session_token).unwrap();
    Arc::new(
        SigningClient::with_clock(
            transport,
            Arc::new(StaticCredentialsProvider::new(creds)),
            config,
            Arc::new(FixedClock(fixed_time())),
        )
        .unwrap(),
    )
}
