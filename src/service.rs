//! SigV4 signing middleware
//!
//! [`SigningClient`] wraps a downstream [`HttpClient`] and signs every
//! request flowing through it: fetch credentials, stamp the `x-amz-*`
//! and `amz-sdk-*` headers, canonicalise, sign, forward. It implements
//! [`HttpClient`] itself, so it stacks as an in-process proxy in front
//! of any transport.

use crate::credentials::{Credentials, CredentialsProvider};
use crate::data_structures::{OrderedHeaders, OrderedQs};
use crate::errors::{S3Error, S3Result};
use crate::headers::{
    offset_by, AmzDate, AMZ_SDK_INVOCATION_ID, AMZ_SDK_REQUEST, X_AMZ_CONTENT_SHA_256, X_AMZ_DATE,
    X_AMZ_SECURITY_TOKEN,
};
use crate::multipart::MultipartConfig;
use crate::signature_v4::{
    canonical_uri, create_authorization_header, create_canonical_request, create_string_to_sign,
    is_signed_header, sign_with_key, Payload,
};
use crate::signing_key::SigningKeyCache;
use crate::utils::time::parse_http_date;
use crate::{Body, BoxStdError, Request, Response};

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::body::HttpBody;
use hyper::header::{HeaderValue, AUTHORIZATION, DATE, HOST};
use hyper::{HeaderMap, Method, StatusCode, Uri};
use tracing::debug;
use uuid::Uuid;

/// default threshold below which a known-length body is hashed
const DEFAULT_HASH_BODY_THRESHOLD: u64 = 256 * 1024;

/// Narrow capability over an HTTP transport.
///
/// The middleware only needs "send a request, get a response"; hyper
/// clients, further middleware layers, and test transports all fit.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and resolves with its response.
    async fn send(&self, req: Request) -> Result<Response, BoxStdError>;
}

#[async_trait]
impl<C> HttpClient for hyper::Client<C>
where
    C: hyper::client::connect::Connect + Clone + Send + Sync + 'static,
{
    async fn send(&self, req: Request) -> Result<Response, BoxStdError> {
        Ok(self.request(req).await?)
    }
}

/// Injectable time source.
pub trait Clock: Send + Sync {
    /// current UTC time
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-middleware configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// AWS region
    pub region: String,
    /// service label (`s3`, ...)
    pub service: String,
    /// endpoint override, e.g. `http://127.0.0.1:9000`; virtual-hosted
    /// AWS addressing is used when absent
    pub endpoint: Option<String>,
    /// byte threshold below which a known-length body is hashed instead
    /// of signed as `UNSIGNED-PAYLOAD`
    pub hash_body_threshold: u64,
    /// multipart upload tuning
    pub multipart: MultipartConfig,
}

impl ProxyConfig {
    /// Configuration with defaults for `region`, targeting S3.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: "s3".to_owned(),
            endpoint: None,
            hash_body_threshold: DEFAULT_HASH_BODY_THRESHOLD,
            multipart: MultipartConfig::default(),
        }
    }

    /// Checks configuration bounds.
    fn validate(&self) -> S3Result<()> {
        if self.region.is_empty() {
            return Err(S3Error::InvalidConfig("region must not be empty".to_owned()));
        }
        if self.service.is_empty() {
            return Err(S3Error::InvalidConfig("service must not be empty".to_owned()));
        }
        self.multipart.validate()
    }
}

/// The SigV4 signing middleware.
///
/// Safe for concurrent requests; the signing-key cache is the only
/// shared mutable state and is serialised internally. Dropping the
/// future returned by [`send`](Self::send) cancels the request at
/// whichever suspension point it reached.
pub struct SigningClient {
    /// downstream transport
    inner: Arc<dyn HttpClient>,
    /// credentials capability, called anew per request
    credentials: Arc<dyn CredentialsProvider>,
    /// injectable clock
    clock: Arc<dyn Clock>,
    /// instance configuration
    config: ProxyConfig,
    /// signing key cache
    keys: Mutex<SigningKeyCache>,
}

impl Debug for SigningClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SigningClient {
    /// Constructs the middleware over a downstream transport, using the
    /// system clock.
    pub fn new(
        inner: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialsProvider>,
        config: ProxyConfig,
    ) -> S3Result<Self> {
        Self::with_clock(inner, credentials, config, Arc::new(SystemClock))
    }

    /// Constructs the middleware with an injected clock.
    pub fn with_clock(
        inner: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialsProvider>,
        config: ProxyConfig,
        clock: Arc<dyn Clock>,
    ) -> S3Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            credentials,
            clock,
            config,
            keys: Mutex::new(SigningKeyCache::new()),
        })
    }

    /// instance configuration
    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Signs and forwards a request.
    ///
    /// Two rejections are recovered locally, once each and only when
    /// the body is replayable: `RequestTimeTooSkewed` (re-signed with
    /// the server clock offset) and `TokenRefreshRequired` (credentials
    /// re-fetched). Every other response passes through unchanged.
    pub async fn send(&self, req: Request) -> S3Result<Response> {
        /// a request body is either buffered (hashable, replayable) or streamed
        enum BodyKind {
            /// known-length body held in memory
            Buffered(Bytes),
            /// unknown-length or large body, forwarded as-is
            Streaming(Body),
        }

        let (parts, body) = req.into_parts();

        // content hash policy: known-zero and known-small bodies are
        // buffered (making retries possible), the rest is unsigned
        let kind = match body.size_hint().exact() {
            Some(0) => BodyKind::Buffered(Bytes::new()),
            Some(n) if n <= self.config.hash_body_threshold => BodyKind::Buffered(
                hyper::body::to_bytes(body)
                    .await
                    .map_err(|e| S3Error::Transport(e.into()))?,
            ),
            _ => BodyKind::Streaming(body),
        };

        let caller_set_attempt = parts.headers.contains_key(&*AMZ_SDK_REQUEST);

        match kind {
            BodyKind::Buffered(bytes) => {
                self.send_replayable(&parts.method, &parts.uri, &parts.headers, bytes, caller_set_attempt)
                    .await
            }
            BodyKind::Streaming(body) => {
                // streaming body: single shot, signed as UNSIGNED-PAYLOAD
                let creds = self.credentials.credentials().await?;
                let now = self.clock.now_utc();
                let headers = self.sign_headers(
                    &parts.method,
                    &parts.uri,
                    &parts.headers,
                    &creds,
                    &now,
                    Payload::Unsigned,
                    1,
                    caller_set_attempt,
                )?;
                let req = build_request(&parts.method, &parts.uri, headers, body);
                self.forward(req).await
            }
        }
    }

    /// replayable-body path with the two local recoveries
    async fn send_replayable(
        &self,
        method: &Method,
        uri: &Uri,
        original_headers: &HeaderMap,
        bytes: Bytes,
        caller_set_attempt: bool,
    ) -> S3Result<Response> {
        let mut skew_offset: i64 = 0;
        let mut skew_retried = false;
        let mut token_refreshed = false;
        let mut attempt: u32 = 1;

        loop {
            let creds = self.credentials.credentials().await?;
            let now = offset_by(&self.clock.now_utc(), skew_offset);
            let payload = if bytes.is_empty() {
                Payload::Empty
            } else {
                Payload::SingleChunk(bytes.as_ref())
            };
            let headers = self.sign_headers(
                method,
                uri,
                original_headers,
                &creds,
                &now,
                payload,
                attempt,
                caller_set_attempt,
            )?;

            let req = build_request(method, uri, headers, Body::from(bytes.clone()));
            let resp = self.forward(req).await?;

            if resp.status() != StatusCode::FORBIDDEN && resp.status() != StatusCode::UNAUTHORIZED
            {
                return Ok(resp);
            }

            // peek the rejection to decide whether it is recoverable
            let (parts, body) = resp.into_parts();
            let body_bytes = hyper::body::to_bytes(body)
                .await
                .map_err(|e| S3Error::Transport(e.into()))?;
            let code = crate::utils::xml::parse_error_response(&body_bytes)
                .map(|(code, _)| code)
                .unwrap_or_default();

            if code == "RequestTimeTooSkewed" && !skew_retried {
                if let Some(server_now) = parts
                    .headers
                    .get(DATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_http_date)
                {
                    skew_offset = server_now.timestamp() - self.clock.now_utc().timestamp();
                    skew_retried = true;
                    attempt += 1;
                    debug!(skew_offset, "retrying with server clock offset");
                    continue;
                }
            }

            if code == "TokenRefreshRequired" && !token_refreshed {
                token_refreshed = true;
                attempt += 1;
                debug!("refreshing credentials and retrying");
                continue;
            }

            return Ok(Response::from_parts(parts, Body::from(body_bytes)));
        }
    }

    /// forward downstream
    async fn forward(&self, req: Request) -> S3Result<Response> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let resp = self
            .inner
            .send(req)
            .await
            .map_err(S3Error::Transport)?;
        debug!(%method, %uri, status = %resp.status(), "forwarded signed request");
        Ok(resp)
    }

    /// Stamps the signing headers and installs `Authorization`.
    ///
    /// Stamping happens-before signing; the returned map is complete
    /// and is never mutated after the signature is computed.
    #[allow(clippy::too_many_arguments)]
    fn sign_headers(
        &self,
        method: &Method,
        uri: &Uri,
        original: &HeaderMap,
        creds: &Credentials,
        now: &DateTime<Utc>,
        payload: Payload<'_>,
        attempt: u32,
        caller_set_attempt: bool,
    ) -> S3Result<HeaderMap> {
        let date = AmzDate::from_datetime(now);
        let mut headers = original.clone();

        if !headers.contains_key(HOST) {
            let authority = uri
                .authority()
                .ok_or_else(|| S3Error::Signing("request URL has no authority".to_owned()))?;
            let host = authority.as_str().to_ascii_lowercase();
            let _ = headers.insert(HOST, header_value(&host)?);
        }

        let _ = headers.insert(&*X_AMZ_DATE, header_value(&date.to_iso8601())?);
        let _ = headers.insert(
            &*X_AMZ_CONTENT_SHA_256,
            header_value(&payload.content_sha256())?,
        );
        let _ = headers.insert(
            &*AMZ_SDK_INVOCATION_ID,
            header_value(&Uuid::new_v4().as_hyphenated().to_string())?,
        );
        if !caller_set_attempt {
            let _ = headers.insert(&*AMZ_SDK_REQUEST, header_value(&format!("attempt={attempt}"))?);
        }
        match creds.session_token() {
            Some(token) => {
                let _ = headers.insert(&*X_AMZ_SECURITY_TOKEN, header_value(token)?);
            }
            None => {
                let _ = headers.remove(&*X_AMZ_SECURITY_TOKEN);
            }
        }

        let uri_path = canonical_uri(uri.path());
        let query = OrderedQs::from_query(uri.query().unwrap_or(""))
            .map_err(|e| S3Error::Signing(format!("malformed query string: {e}")))?;
        let ordered = OrderedHeaders::from_header_map(&headers, is_signed_header)
            .map_err(|e| S3Error::Signing(format!("non-ascii header value: {e}")))?;

        let canonical_request =
            create_canonical_request(method, &uri_path, query.as_ref(), &ordered, payload);
        let string_to_sign = create_string_to_sign(
            &canonical_request,
            &date,
            &self.config.region,
            &self.config.service,
        );

        let key = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(
                creds.secret_key(),
                &date.to_date(),
                &self.config.region,
                &self.config.service,
            );
        let signature = sign_with_key(key.as_bytes(), &string_to_sign);

        let auth = create_authorization_header(
            creds.access_key(),
            &date,
            &self.config.region,
            &self.config.service,
            &ordered.signed_header_names(),
            &signature,
        );
        let _ = headers.insert(AUTHORIZATION, header_value(&auth)?);

        Ok(headers)
    }
}

#[async_trait]
impl HttpClient for SigningClient {
    async fn send(&self, req: Request) -> Result<Response, BoxStdError> {
        Ok(SigningClient::send(self, req).await?)
    }
}

/// header value from string
fn header_value(s: &str) -> S3Result<HeaderValue> {
    HeaderValue::from_str(s).map_err(|e| S3Error::Signing(format!("invalid header value: {e}")))
}

/// assemble an outgoing request
fn build_request(method: &Method, uri: &Uri, headers: HeaderMap, body: Body) -> Request {
    let mut req = Request::new(body);
    *req.method_mut() = method.clone();
    *req.uri_mut() = uri.clone();
    *req.headers_mut() = headers;
    req
}
