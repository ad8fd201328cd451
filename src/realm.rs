//! Credentials and the HTTP surface of an NTLM authentication target.


use std::env;
use std::fmt;

use http::header::{self, HeaderName, HeaderValue};
use http::StatusCode;


/// The environment variable consulted for the default NTLM domain.
pub const NTLM_DOMAIN_ENV_VAR: &str = "HTTP_AUTH_NTLM_DOMAIN";

/// The workstation name announced when none is configured.
pub const DEFAULT_NTLM_HOST: &str = "localhost";


/// Whether the credentials are meant for the origin server or for a proxy in between.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AuthTarget {
    Server,
    Proxy,
}
impl AuthTarget {
    /// The status code with which the target demands authentication.
    pub fn challenge_status(&self) -> StatusCode {
        match self {
            Self::Server => StatusCode::UNAUTHORIZED,
            Self::Proxy => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        }
    }

    /// The response header carrying the target's challenges.
    pub fn challenge_header(&self) -> HeaderName {
        match self {
            Self::Server => header::WWW_AUTHENTICATE,
            Self::Proxy => header::PROXY_AUTHENTICATE,
        }
    }

    /// The request header carrying the client's credentials.
    pub fn authorization_header(&self) -> HeaderName {
        match self {
            Self::Server => header::AUTHORIZATION,
            Self::Proxy => header::PROXY_AUTHORIZATION,
        }
    }
}


/// The credentials used to authenticate against one target.
///
/// A realm is never modified once built and is meant to be shared (typically behind an `Arc`)
/// between all requests authenticating against the same target.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Realm {
    pub principal: String,
    pub password: String,
    pub ntlm_domain: String,
    pub ntlm_host: String,
    pub use_preemptive_auth: bool,
}
impl Realm {
    /// Creates a realm for the given user name and password.
    ///
    /// The NTLM domain is taken from the `HTTP_AUTH_NTLM_DOMAIN` environment variable if it is set
    /// and empty otherwise; the NTLM host defaults to `localhost`.
    pub fn new(principal: &str, password: &str) -> Self {
        Self {
            principal: principal.to_owned(),
            password: password.to_owned(),
            ntlm_domain: env::var(NTLM_DOMAIN_ENV_VAR).unwrap_or_default(),
            ntlm_host: DEFAULT_NTLM_HOST.to_owned(),
            use_preemptive_auth: false,
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.ntlm_domain = domain.to_owned();
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.ntlm_host = host.to_owned();
        self
    }

    /// Whether to send the negotiate message with the first request instead of waiting for a
    /// challenge.
    pub fn with_preemptive_auth(mut self, preemptive: bool) -> Self {
        self.use_preemptive_auth = preemptive;
        self
    }
}
impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("principal", &self.principal)
            .field("password", &"<redacted>")
            .field("ntlm_domain", &self.ntlm_domain)
            .field("ntlm_host", &self.ntlm_host)
            .field("use_preemptive_auth", &self.use_preemptive_auth)
            .finish()
    }
}


/// Returns the first header value whose scheme is `prefix`, compared ASCII case-insensitively.
///
/// The prefix must be followed by a space or the end of the value, so `NTLMv2` does not match
/// `NTLM`. Values that are not valid visible ASCII are skipped.
pub fn header_with_prefix<'a, I>(values: I, prefix: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a HeaderValue>,
{
    values.into_iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| {
            let bytes = value.as_bytes();
            bytes.len() >= prefix.len()
                && bytes[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
                && matches!(bytes.get(prefix.len()), None | Some(b' '))
        })
}
