//! S3 client and in-process SigV4 signing proxy
//!
//! The two load-bearing pieces are [`SigningClient`], an HTTP middleware
//! that canonicalises and signs every outbound request with AWS
//! Signature Version 4 before forwarding it to a downstream transport,
//! and [`MultipartUpload`], a buffered byte sink that streams
//! unknown-length writes through the S3 multipart upload protocol.

#![forbid(unsafe_code)]
#![deny(
    // The following are allowed by default lints according to
    // https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
    anonymous_parameters,
    bare_trait_objects,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::all,
    clippy::pedantic
)]
#![allow(
    clippy::module_name_repetitions, // Allowed by default
    clippy::missing_errors_doc // error semantics live on the error type
)]
#![cfg_attr(test, allow(
    clippy::panic, // Panic when fatal failures occur
    clippy::unwrap_used, // Tests need `unwrap`
    clippy::indexing_slicing, // Fail fast
))]

pub(crate) mod utils;

mod client;
mod credentials;
mod errors;
mod multipart;
mod service;
mod signature_v4;
mod signing_key;

pub use self::client::{Bucket, Object, S3Client};
pub use self::credentials::{
    ChainCredentialsProvider, Credentials, CredentialsProvider, EnvCredentialsProvider,
    StaticCredentialsProvider,
};
pub use self::errors::{S3Error, S3Result};
pub use self::multipart::{MultipartConfig, MultipartUpload, UploadState};
pub use self::service::{Clock, HttpClient, ProxyConfig, SigningClient, SystemClock};

pub mod headers;

/// SigV4 primitives: canonical request, string to sign, signature
pub mod signature {
    pub use crate::signature_v4::{
        calculate_signature, canonical_uri, create_authorization_header,
        create_canonical_request, create_string_to_sign, is_signed_header, Payload,
        EMPTY_STRING_SHA256_HASH, UNSIGNED_PAYLOAD,
    };
    pub use crate::signing_key::{SigningKey, SigningKeyCache};
}

pub mod data_structures;

pub(crate) use hyper::Body;

/// Request type
pub(crate) type Request = hyper::Request<Body>;

/// Response type
pub(crate) type Response = hyper::Response<Body>;

/// `Box<dyn std::error::Error + Send + Sync + 'static>`
pub(crate) type BoxStdError = Box<dyn std::error::Error + Send + Sync + 'static>;
