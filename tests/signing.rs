//! middleware-level signing tests against a recording mock transport

mod common;

use common::{
    fixed_time, reply_status, reply_xml, signing_client, MockReply, MockTransport, ACCESS_KEY,
    SECRET_KEY,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hyper::header::DATE;
use hyper::{Body, Method, Request, StatusCode};
use s3_proxy::data_structures::OrderedHeaders;
use s3_proxy::headers::{AmzDate, AuthorizationV4};
use s3_proxy::signature::{
    calculate_signature, canonical_uri, create_canonical_request, create_string_to_sign,
    is_signed_header, Payload, EMPTY_STRING_SHA256_HASH, UNSIGNED_PAYLOAD,
};
use s3_proxy::{Credentials, CredentialsProvider, ProxyConfig, S3Result, SigningClient};

fn get_request(url: &str) -> Request<Body> {
    let mut req = Request::new(Body::empty());
    *req.uri_mut() = url.parse().unwrap();
    req
}

fn put_request(url: &str, body: &'static [u8]) -> Request<Body> {
    let mut req = Request::new(Body::from(body));
    *req.method_mut() = Method::PUT;
    *req.uri_mut() = url.parse().unwrap();
    req
}

#[tokio::test]
async fn get_with_empty_body() -> Result<()> {
    let transport = MockTransport::new(|_, _| reply_status(200));
    let client = signing_client(Arc::clone(&transport), ProxyConfig::new("us-east-1"), None);

    let resp = client
        .send(get_request("https://s3.eu-west-1.amazonaws.com/"))
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = &transport.requests()[0];
    assert_eq!(req.header("host"), Some("s3.eu-west-1.amazonaws.com"));
    assert_eq!(req.header("x-amz-date"), Some("20230730T133730Z"));
    assert_eq!(req.header("x-amz-content-sha256"), Some(EMPTY_STRING_SHA256_HASH));
    assert_eq!(req.header("amz-sdk-request"), Some("attempt=1"));
    assert!(req.header("x-amz-security-token").is_none());

    let invocation_id = req.header("amz-sdk-invocation-id").unwrap();
    assert_eq!(invocation_id.len(), 36);
    assert!(invocation_id
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() || c == '-'));

    // the signature must equal an independent recomputation from the
    // headers actually sent
    let auth = req.header("authorization").unwrap();
    let auth = AuthorizationV4::from_header_str(auth).unwrap();
    assert_eq!(auth.algorithm, "AWS4-HMAC-SHA256");
    assert_eq!(auth.credential.access_key_id, ACCESS_KEY);
    assert_eq!(auth.credential.date, "20230730");
    assert_eq!(auth.credential.aws_region, "us-east-1");
    assert_eq!(auth.credential.aws_service, "s3");
    assert_eq!(
        auth.signed_headers,
        [
            "amz-sdk-invocation-id",
            "amz-sdk-request",
            "host",
            "x-amz-content-sha256",
            "x-amz-date"
        ]
    );
    for name in &auth.signed_headers {
        assert!(req.headers.contains_key(*name));
    }

    let date = AmzDate::from_header_str(req.header("x-amz-date").unwrap()).unwrap();
    let ordered = OrderedHeaders::from_header_map(&req.headers, is_signed_header)?;
    let qs: &[(String, String)] = &[];
    let canonical = create_canonical_request(
        &req.method,
        &canonical_uri(req.uri.path()),
        qs,
        &ordered,
        Payload::Empty,
    );
    let string_to_sign = create_string_to_sign(&canonical, &date, "us-east-1", "s3");
    assert_eq!(
        string_to_sign.lines().nth(2),
        Some("20230730/us-east-1/s3/aws4_request")
    );
    let expected = calculate_signature(&string_to_sign, SECRET_KEY, &date, "us-east-1", "s3");
    assert_eq!(auth.signature, expected);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_get_distinct_invocation_ids() -> Result<()> {
    let transport = MockTransport::new(|_, _| reply_status(200));
    let client = signing_client(Arc::clone(&transport), ProxyConfig::new("us-east-1"), None);

    let (a, b) = futures::join!(
        client.send(get_request("https://s3.us-east-1.amazonaws.com/")),
        client.send(get_request("https://s3.us-east-1.amazonaws.com/"))
    );
    assert!(a.is_ok() && b.is_ok());

    let requests = transport.requests();
    let id0 = requests[0].header("amz-sdk-invocation-id").unwrap();
    let id1 = requests[1].header("amz-sdk-invocation-id").unwrap();
    assert_ne!(id0, id1);

    // same second, same credentials, but distinct request ids are
    // signed, so the authorization values differ too
    assert_eq!(
        requests[0].header("x-amz-date"),
        requests[1].header("x-amz-date")
    );
    assert_ne!(
        requests[0].header("authorization"),
        requests[1].header("authorization")
    );
    Ok(())
}

#[tokio::test]
async fn session_token_is_stamped_and_signed() -> Result<()> {
    let transport = MockTransport::new(|_, _| reply_status(200));
    let client = signing_client(
        Arc::clone(&transport),
        ProxyConfig::new("us-east-1"),
        Some("FQoGZXIvYXdzEXAMPLETOKEN".to_owned()),
    );

    let _ = client
        .send(get_request("https://s3.us-east-1.amazonaws.com/"))
        .await?;

    let req = &transport.requests()[0];
    assert_eq!(
        req.header("x-amz-security-token"),
        Some("FQoGZXIvYXdzEXAMPLETOKEN")
    );
    let auth = AuthorizationV4::from_header_str(req.header("authorization").unwrap()).unwrap();
    assert!(auth.signed_headers.contains(&"x-amz-security-token"));
    Ok(())
}

#[tokio::test]
async fn content_hash_policy() -> Result<()> {
    let transport = MockTransport::new(|_, _| reply_status(200));

    // known-small body: hashed and re-presented
    let client = signing_client(Arc::clone(&transport), ProxyConfig::new("us-east-1"), None);
    let _ = client
        .send(put_request(
            "https://examplebucket.s3.us-east-1.amazonaws.com/test.txt",
            b"Welcome to Amazon S3.",
        ))
        .await?;
    let req = &transport.requests()[0];
    // the published sha256 of this body from the SigV4 example suite
    assert_eq!(
        req.header("x-amz-content-sha256"),
        Some("44ce7dd67c959e0d3524ffac1771dfbba87d2b6b4b4e99e42034a8b803f8b072")
    );
    assert_eq!(&req.body[..], b"Welcome to Amazon S3.");

    // above the threshold: unsigned payload
    let transport = MockTransport::new(|_, _| reply_status(200));
    let mut config = ProxyConfig::new("us-east-1");
    config.hash_body_threshold = 8;
    let client = signing_client(Arc::clone(&transport), config, None);
    let _ = client
        .send(put_request(
            "https://examplebucket.s3.us-east-1.amazonaws.com/big",
            b"this body is larger than eight bytes",
        ))
        .await?;
    let req = &transport.requests()[0];
    assert_eq!(req.header("x-amz-content-sha256"), Some(UNSIGNED_PAYLOAD));
    Ok(())
}

#[tokio::test]
async fn clock_skew_is_recovered_once() -> Result<()> {
    let transport = MockTransport::new(|_, index| {
        if index == 0 {
            let body = "<Error><Code>RequestTimeTooSkewed</Code>\
                        <Message>The difference between the request time and the current time is too large.</Message></Error>";
            let mut resp = hyper::Response::new(Body::from(body));
            *resp.status_mut() = StatusCode::FORBIDDEN;
            let _ = resp
                .headers_mut()
                .insert(DATE, "Sun, 30 Jul 2023 14:37:30 +0000".parse().unwrap());
            MockReply::Ready(resp)
        } else {
            reply_status(200)
        }
    });
    let client = signing_client(Arc::clone(&transport), ProxyConfig::new("us-east-1"), None);

    let resp = client
        .send(get_request("https://s3.us-east-1.amazonaws.com/"))
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("x-amz-date"), Some("20230730T133730Z"));
    // the retry is signed one hour ahead, matching the server clock
    assert_eq!(requests[1].header("x-amz-date"), Some("20230730T143730Z"));
    assert_eq!(requests[1].header("amz-sdk-request"), Some("attempt=2"));
    Ok(())
}

#[tokio::test]
async fn token_refresh_refetches_credentials() -> Result<()> {
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialsProvider for CountingProvider {
        async fn credentials(&self) -> S3Result<Credentials> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Credentials::new(ACCESS_KEY, SECRET_KEY, Some("token".to_owned()))
        }
    }

    let transport = MockTransport::new(|_, index| {
        if index == 0 {
            reply_xml(
                403,
                "<Error><Code>TokenRefreshRequired</Code><Message>refresh</Message></Error>",
            )
        } else {
            reply_status(200)
        }
    });

    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let client = SigningClient::with_clock(
        Arc::clone(&transport) as Arc<dyn s3_proxy::HttpClient>,
        Arc::clone(&provider) as Arc<dyn CredentialsProvider>,
        ProxyConfig::new("us-east-1"),
        Arc::new(common::FixedClock(fixed_time())),
    )?;

    let resp = client
        .send(get_request("https://s3.us-east-1.amazonaws.com/"))
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        transport.requests()[1].header("amz-sdk-request"),
        Some("attempt=2")
    );
    Ok(())
}

#[tokio::test]
async fn unrecoverable_rejection_passes_through() -> Result<()> {
    let transport = MockTransport::new(|_, _| {
        reply_xml(
            403,
            "<Error><Code>SignatureDoesNotMatch</Code><Message>nope</Message></Error>",
        )
    });
    let client = signing_client(Arc::clone(&transport), ProxyConfig::new("us-east-1"), None);

    let resp = client
        .send(get_request("https://s3.us-east-1.amazonaws.com/"))
        .await?;
    // the middleware does not consume the rejection, the caller does
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(transport.requests().len(), 1);
    Ok(())
}
