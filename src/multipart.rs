//! multipart upload engine
//!
//! See <https://docs.aws.amazon.com/AmazonS3/latest/API/API_CreateMultipartUpload.html>
//!
//! [`MultipartUpload`] is a buffered byte sink. Writes fill a
//! fixed-size buffer; each time the buffer fills, a part upload is
//! dispatched as a background task through the signing middleware while
//! the writer keeps accepting bytes. `close` flushes the tail, waits
//! for every part, and commits the upload with the completion XML.

use crate::errors::{error_from_response, error_from_response_code, S3Error, S3Result};
use crate::service::SigningClient;
use crate::utils::xml::{find_element, parse_error_response, XmlWriterExt};
use crate::{Body, Request, Response};

use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{FuturesUnordered, StreamExt};
use hyper::header::ETAG;
use hyper::{Method, StatusCode, Uri};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use xml::writer::EventWriter;

/// minimum part size accepted by S3
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// default part size
const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// default number of concurrent part uploads
const DEFAULT_PART_CONCURRENCY: usize = 4;

/// hard cap on part numbers
const MAX_PARTS: u32 = 10_000;

/// S3 xml namespace
const S3_XML_NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Multipart upload tuning.
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// part buffer size in bytes; every part except the last has
    /// exactly this size
    pub part_size: usize,
    /// max number of in-flight part uploads
    pub part_concurrency: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
        }
    }
}

impl MultipartConfig {
    /// Checks configuration bounds.
    pub(crate) fn validate(&self) -> S3Result<()> {
        if self.part_size < MIN_PART_SIZE {
            return Err(S3Error::InvalidConfig(format!(
                "part_size must be at least {MIN_PART_SIZE} bytes"
            )));
        }
        if self.part_concurrency == 0 {
            return Err(S3Error::InvalidConfig(
                "part_concurrency must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Upload lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// accepting writes
    Open,
    /// close in progress: draining parts
    Finishing,
    /// close in progress: completion request in flight
    Committing,
    /// committed; the final `ETag` is known
    Completed,
    /// aborted; when `uncertain` the completion request was already in
    /// flight and the object may exist server-side
    Aborted {
        /// commit outcome unknown
        uncertain: bool,
    },
}

/// one uploaded part
#[derive(Debug)]
struct Part {
    /// 1-based part number
    part_number: u32,
    /// server-returned entity tag, quotes included
    etag: String,
}

/// state shared with part tasks
#[derive(Debug, Default)]
struct SharedState {
    /// first part failure, latched
    first_error: Mutex<Option<S3Error>>,
}

impl SharedState {
    /// latch the first failure
    fn latch(&self, err: S3Error) {
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// take the latched failure
    fn take(&self) -> Option<S3Error> {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// has a part failed?
    fn is_poisoned(&self) -> bool {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// A streaming multipart upload.
///
/// Single-writer: `write` and `close` take `&mut self`. The handle
/// outlives all part tasks; dropping it in a non-terminal state issues
/// a best-effort abort.
#[derive(Debug)]
pub struct MultipartUpload {
    /// shared signing middleware
    client: Arc<SigningClient>,
    /// object url without query, e.g. `https://bucket.s3.region.amazonaws.com/key`
    object_url: String,
    /// server-assigned upload id
    upload_id: String,
    /// part buffer size
    part_size: usize,
    /// active buffer
    buf: Vec<u8>,
    /// next part number, strictly monotone from 1
    next_part_number: u32,
    /// in-flight part gate
    semaphore: Arc<Semaphore>,
    /// outstanding part tasks
    tasks: Vec<JoinHandle<Option<Part>>>,
    /// first-failure latch shared with part tasks
    shared: Arc<SharedState>,
    /// lifecycle state
    state: UploadState,
    /// final object etag, set on completion
    completed_etag: Option<String>,
}

impl MultipartUpload {
    /// Starts a multipart upload for the object at `object_url`.
    pub(crate) async fn initiate(
        client: Arc<SigningClient>,
        object_url: String,
        config: &MultipartConfig,
    ) -> S3Result<Self> {
        config.validate()?;

        let url = format!("{object_url}?uploads");
        let resp = send(&client, Method::POST, &url, Body::empty()).await?;
        let (status, bytes) = drain(resp).await?;
        if !status.is_success() {
            return Err(error_from_response(status, &bytes));
        }
        if let Some((code, message)) = parse_error_response(&bytes) {
            return Err(error_from_response_code(status, code, message));
        }
        let upload_id = find_element(&bytes, "UploadId")
            .ok_or_else(|| S3Error::Protocol("missing InitiateMultipartUploadResult/UploadId".to_owned()))?;

        debug!(upload_id = %upload_id, "multipart upload initiated");

        Ok(Self {
            client,
            object_url,
            upload_id,
            part_size: config.part_size,
            buf: Vec::with_capacity(config.part_size),
            next_part_number: 1,
            semaphore: Arc::new(Semaphore::new(config.part_concurrency)),
            tasks: Vec::new(),
            shared: Arc::new(SharedState::default()),
            state: UploadState::Open,
            completed_etag: None,
        })
    }

    /// server-assigned upload id
    #[must_use]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// current lifecycle state
    #[must_use]
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Appends bytes to the upload.
    ///
    /// Returns once the bytes are buffered; full buffers are dispatched
    /// as concurrent part uploads. Suspends when the in-flight part
    /// limit is reached. A prior part failure aborts the upload here
    /// and surfaces its error.
    pub async fn write(&mut self, mut bytes: &[u8]) -> S3Result<()> {
        if self.state != UploadState::Open {
            return Err(S3Error::Protocol("write after close".to_owned()));
        }
        if self.shared.is_poisoned() {
            return Err(self.abort_with_latched(false).await);
        }

        while !bytes.is_empty() {
            let remaining = self.part_size.saturating_sub(self.buf.len());
            let take = remaining.min(bytes.len());
            self.buf.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            if self.buf.len() == self.part_size {
                self.dispatch_part().await?;
            }
        }
        Ok(())
    }

    /// Flushes, waits for every part, and commits the upload.
    ///
    /// On success the state is `Completed` and the object's `ETag` is
    /// returned; repeated calls return it again. On any failure the
    /// upload is aborted (best-effort `DELETE`) and the original error
    /// is propagated.
    pub async fn close(&mut self) -> S3Result<String> {
        match self.state {
            UploadState::Open => {}
            UploadState::Completed => {
                return Ok(self.completed_etag.clone().unwrap_or_default());
            }
            UploadState::Aborted { uncertain } => {
                return Err(S3Error::multipart(
                    S3Error::Protocol("upload is aborted".to_owned()),
                    None,
                    uncertain,
                ));
            }
            UploadState::Finishing | UploadState::Committing => {
                // a previous close was cancelled mid-flight
                let uncertain = self.state == UploadState::Committing;
                return Err(self.abort_with(
                    S3Error::Protocol("close was cancelled".to_owned()),
                    uncertain,
                ).await);
            }
        }
        self.state = UploadState::Finishing;

        // the tail may be short, or even empty for a zero-byte object
        if !self.buf.is_empty() || self.next_part_number == 1 {
            if let Err(e) = self.dispatch_part().await {
                return Err(self.abort_with(e, false).await);
            }
        }

        // await parts in completion order so the first failure cancels
        // everything still outstanding
        let mut pending: FuturesUnordered<JoinHandle<Option<Part>>> =
            mem::take(&mut self.tasks).into_iter().collect();
        let mut parts: Vec<Part> = Vec::with_capacity(pending.len());
        let mut failed = false;
        while let Some(ans) = pending.next().await {
            match ans {
                Ok(Some(part)) => parts.push(part),
                Ok(None) => {
                    failed = true;
                    break;
                }
                Err(e) => {
                    self.shared
                        .latch(S3Error::Signing(format!("part task failed: {e}")));
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            for handle in pending {
                handle.abort();
            }
            return Err(self.abort_with_latched(false).await);
        }

        parts.sort_by_key(|p| p.part_number);
        self.commit(&parts).await
    }

    /// Aborts the upload: cancels outstanding part tasks and issues a
    /// best-effort `AbortMultipartUpload`.
    ///
    /// Aborting an upload whose completion request was in flight marks
    /// the outcome uncertain: the object may exist server-side. A
    /// terminal upload is left untouched.
    pub async fn abort(&mut self) {
        let uncertain = match self.state {
            UploadState::Completed | UploadState::Aborted { .. } => return,
            UploadState::Committing => true,
            _ => false,
        };
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
        if let Err(e) = self.send_abort().await {
            warn!(upload_id = %self.upload_id, error = %e, "abort request failed");
        }
        self.state = UploadState::Aborted { uncertain };
    }

    /// Dispatches the buffered bytes as the next part.
    async fn dispatch_part(&mut self) -> S3Result<()> {
        if self.shared.is_poisoned() {
            return Err(self.abort_with_latched(false).await);
        }
        if self.next_part_number > MAX_PARTS {
            let err = S3Error::Protocol(format!("upload exceeds {MAX_PARTS} parts"));
            return Err(self.abort_with(err, false).await);
        }

        let part_number = self.next_part_number;
        self.next_part_number += 1;
        let data = mem::replace(&mut self.buf, Vec::with_capacity(self.part_size));

        // gate: at most `part_concurrency` parts in flight
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| S3Error::Signing("part gate closed".to_owned()))?;

        let client = Arc::clone(&self.client);
        let shared = Arc::clone(&self.shared);
        let url = format!(
            "{}?partNumber={}&uploadId={}",
            self.object_url, part_number, self.upload_id
        );

        debug!(part_number, size = data.len(), "dispatching part upload");

        let handle = tokio::spawn(async move {
            let ans = upload_part(&client, &url, part_number, data).await;
            drop(permit);
            match ans {
                Ok(part) => Some(part),
                Err(e) => {
                    shared.latch(e);
                    None
                }
            }
        });
        self.tasks.push(handle);
        Ok(())
    }

    /// Sends the completion request and parses the final `ETag`.
    async fn commit(&mut self, parts: &[Part]) -> S3Result<String> {
        self.state = UploadState::Committing;

        let body = completion_xml(parts)?;
        let url = format!("{}?uploadId={}", self.object_url, self.upload_id);

        debug!(upload_id = %self.upload_id, parts = parts.len(), "committing multipart upload");

        let resp = match send(&self.client, Method::POST, &url, Body::from(body)).await {
            Ok(resp) => resp,
            // the request may have reached the server: outcome unknown
            Err(e) => return Err(self.abort_with(e, true).await),
        };
        let (status, bytes) = match drain(resp).await {
            Ok(ans) => ans,
            Err(e) => return Err(self.abort_with(e, true).await),
        };
        if !status.is_success() {
            let err = error_from_response(status, &bytes);
            return Err(self.abort_with(err, false).await);
        }
        // a 200 can still carry an error document
        if let Some((code, message)) = parse_error_response(&bytes) {
            let err = error_from_response_code(status, code, message);
            return Err(self.abort_with(err, false).await);
        }
        let Some(etag) = find_element(&bytes, "ETag") else {
            let err = S3Error::Protocol("missing CompleteMultipartUploadResult/ETag".to_owned());
            return Err(self.abort_with(err, true).await);
        };

        self.state = UploadState::Completed;
        self.completed_etag = Some(etag.clone());
        Ok(etag)
    }

    /// Aborts with the latched part failure as the primary cause.
    async fn abort_with_latched(&mut self, uncertain: bool) -> S3Error {
        let primary = self
            .shared
            .take()
            .unwrap_or_else(|| S3Error::Protocol("part upload failed".to_owned()));
        self.abort_with(primary, uncertain).await
    }

    /// Cancels outstanding tasks, sends a best-effort abort, and builds
    /// the multipart error preserving the primary cause.
    async fn abort_with(&mut self, primary: S3Error, uncertain: bool) -> S3Error {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
        let abort_error = self.send_abort().await.err();
        self.state = UploadState::Aborted { uncertain };
        S3Error::multipart(primary, abort_error, uncertain)
    }

    /// `DELETE ?uploadId=U`
    async fn send_abort(&self) -> S3Result<()> {
        let url = format!("{}?uploadId={}", self.object_url, self.upload_id);
        let resp = send(&self.client, Method::DELETE, &url, Body::empty()).await?;
        let (status, bytes) = drain(resp).await?;
        if status.is_success() {
            debug!(upload_id = %self.upload_id, "multipart upload aborted");
            Ok(())
        } else {
            Err(error_from_response(status, &bytes))
        }
    }
}

impl Drop for MultipartUpload {
    fn drop(&mut self) {
        if matches!(
            self.state,
            UploadState::Completed | UploadState::Aborted { .. }
        ) {
            return;
        }
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
        let uncertain = self.state == UploadState::Committing;
        self.state = UploadState::Aborted { uncertain };

        let client = Arc::clone(&self.client);
        let url = format!("{}?uploadId={}", self.object_url, self.upload_id);
        let upload_id = self.upload_id.clone();
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            drop(rt.spawn(async move {
                let ans = async {
                    let resp = send(&client, Method::DELETE, &url, Body::empty()).await?;
                    let (status, bytes) = drain(resp).await?;
                    if status.is_success() {
                        Ok(())
                    } else {
                        Err(error_from_response(status, &bytes))
                    }
                }
                .await;
                if let Err(e) = ans {
                    warn!(upload_id = %upload_id, error = %e, "abort on drop failed");
                }
            }));
        } else {
            warn!(upload_id = %upload_id, "upload dropped outside a runtime; abort skipped");
        }
    }
}

/// Uploads one part and extracts its `ETag` response header.
async fn upload_part(
    client: &SigningClient,
    url: &str,
    part_number: u32,
    data: Vec<u8>,
) -> S3Result<Part> {
    let resp = send(client, Method::PUT, url, Body::from(data)).await?;
    let (parts, body) = resp.into_parts();
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|e| S3Error::Transport(e.into()))?;
    if !parts.status.is_success() {
        return Err(error_from_response(parts.status, &bytes));
    }
    let etag = parts
        .headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::Protocol(format!("part {part_number}: missing ETag header")))?;

    debug!(part_number, etag = %etag, "part uploaded");

    Ok(Part {
        part_number,
        etag: etag.to_owned(),
    })
}

/// Builds the completion XML body, parts in ascending order.
fn completion_xml(parts: &[Part]) -> S3Result<Vec<u8>> {
    let mut body = Vec::with_capacity(4096);
    {
        let mut w = EventWriter::new(&mut body);
        w.stack_ns("CompleteMultipartUpload", S3_XML_NS, |w| {
            w.iter_element(parts.iter(), |w, part| {
                w.stack("Part", |w| {
                    w.element("PartNumber", &part.part_number.to_string())?;
                    w.element("ETag", &part.etag)
                })
            })
        })
        .map_err(|e| S3Error::Signing(format!("completion body: {e}")))?;
    }
    Ok(body)
}

/// send a request through the middleware
async fn send(client: &SigningClient, method: Method, url: &str, body: Body) -> S3Result<Response> {
    let uri: Uri = url
        .parse()
        .map_err(|e| S3Error::Signing(format!("invalid url {url}: {e}")))?;
    let mut req = Request::new(body);
    *req.method_mut() = method;
    *req.uri_mut() = uri;
    client.send(req).await
}

/// drain a response body
async fn drain(resp: Response) -> S3Result<(StatusCode, bytes::Bytes)> {
    let (parts, body) = resp.into_parts();
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|e| S3Error::Transport(e.into()))?;
    Ok((parts.status, bytes))
}
