//! Request headers stamped or signed by the middleware

mod amz_date;
mod authorization_v4;

pub use self::amz_date::AmzDate;
pub(crate) use self::amz_date::offset_by;
pub use self::authorization_v4::{AuthorizationV4, CredentialV4};

use hyper::header::HeaderName;
use once_cell::sync::Lazy;

macro_rules! declare_header_name{
    {$($(#[$docs:meta])* $n:ident: $s:expr;)+} => {
        $(
            $(#[$docs])*
            pub static $n: Lazy<HeaderName> = Lazy::new(||HeaderName::from_static($s));
        )+

        #[test]
        fn check_headers(){
            $(
                assert_eq!($n.as_str(), $s);
            )+
        }
    }
}

declare_header_name! {
    /// x-amz-date
    X_AMZ_DATE: "x-amz-date";

    /// x-amz-content-sha256
    X_AMZ_CONTENT_SHA_256: "x-amz-content-sha256";

    /// x-amz-security-token
    X_AMZ_SECURITY_TOKEN: "x-amz-security-token";

    /// amz-sdk-invocation-id
    AMZ_SDK_INVOCATION_ID: "amz-sdk-invocation-id";

    /// amz-sdk-request
    AMZ_SDK_REQUEST: "amz-sdk-request";
}
