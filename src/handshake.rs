//! The per-request NTLM challenge state machine.
//!
//! An HTTP client feeds every response of a request into [`NtlmHandshake::on_response`]. While the
//! handshake is in progress, the challenge responses are swallowed and the client is told to replay
//! the request with a new authorization header; once the server accepts (or finally rejects) the
//! credentials, the response is delivered to the application.
//!
//! ```plain
//! NotStarted ──401/407 "NTLM"──► Type1Sent ──401/407 "NTLM <type2>"──► Type2Received ──► Type3Sent
//!                                                                                          │
//!                              Complete ◄──────────────── any other status ────────────────┤
//!                              Failed   ◄──────────────── 401/407 again ───────────────────┘
//! ```
//!
//! NTLM authenticates a connection, not a request: the Type 3 message has to travel on the same
//! connection that received the Type 2 challenge.


use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use http::header::{HeaderName, HeaderValue};
use tracing::{debug, info, warn};

use crate::engine::NtlmEngine;
use crate::error::{DecodeError, EncodeError, NtlmError};
use crate::realm::{AuthTarget, Realm, header_with_prefix};


/// The name of the authentication scheme in challenge and authorization headers.
pub const NTLM_SCHEME: &str = "NTLM";


/// The progress of one NTLM handshake.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AuthChallengeState {
    NotStarted,
    Type1Sent,
    Type2Received,
    Type3Sent,
    Complete,
    Failed,
}


/// Identifies a physical connection of the HTTP client.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(pub u64);

/// What the HTTP client knows about the connection a response arrived on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,

    /// Whether the connection may carry another request after this response.
    pub keep_alive: bool,

    /// Whether the request or the response uses chunked transfer encoding.
    pub chunked: bool,
}
impl ConnectionInfo {
    pub fn new(id: ConnectionId, keep_alive: bool, chunked: bool) -> Self {
        Self {
            id,
            keep_alive,
            chunked,
        }
    }

    /// A persistent connection without chunked bodies.
    pub fn keep_alive(id: ConnectionId) -> Self {
        Self::new(id, true, false)
    }
}


/// Where a request should be replayed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReplayConnection {
    /// Read and discard the rest of the challenge response, then send the request on the same
    /// connection.
    DrainAndReuse(ConnectionId),

    /// Close the connection and send the request on a new one.
    NewConnection,
}

/// Instructions for replaying a request with new credentials.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Replay {
    pub header_name: HeaderName,
    pub header_value: HeaderValue,
    pub connection: ReplayConnection,
}

/// What the HTTP client should do with a response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthAction {
    /// Hand the response to the application.
    Deliver,

    /// Swallow the response and replay the request.
    Replay(Replay),
}


enum Challenge<'a> {
    /// The bare scheme name, asking for a negotiate message.
    Bare,

    /// A Base64-encoded challenge message.
    Token(&'a str),
}

fn parse_challenge(header: &str) -> Option<Challenge<'_>> {
    let header = header.trim();
    let scheme_len = NTLM_SCHEME.len();
    if header.len() < scheme_len || !header.is_char_boundary(scheme_len) {
        return None;
    }
    let (scheme, rest) = header.split_at(scheme_len);
    if !scheme.eq_ignore_ascii_case(NTLM_SCHEME) {
        return None;
    }
    if rest.is_empty() {
        return Some(Challenge::Bare);
    }
    if !rest.starts_with(' ') {
        // some other scheme starting with "NTLM"
        return None;
    }
    match rest.trim() {
        "" => Some(Challenge::Bare),
        token => Some(Challenge::Token(token)),
    }
}


/// Computes the authorization header value answering an NTLM challenge header value.
///
/// A bare `NTLM` challenge is answered with a negotiate message, `NTLM <type2>` with an
/// authenticate message. Both are returned as `NTLM <base64>`.
pub fn ntlm_authorization(engine: &NtlmEngine, realm: &Realm, challenge_header: &str) -> Result<String, NtlmError> {
    let token = match parse_challenge(challenge_header) {
        Some(Challenge::Bare) => engine.create_type1_message(&realm.ntlm_domain, &realm.ntlm_host),
        Some(Challenge::Token(type2)) => engine.create_type3_message(
            &realm.principal,
            &realm.password,
            &realm.ntlm_domain,
            &realm.ntlm_host,
            type2,
        )?,
        None => return Err(DecodeError::NotNtlmChallenge { header: challenge_header.to_owned() }.into()),
    };
    Ok(format!("{} {}", NTLM_SCHEME, token))
}

fn to_header_value(authorization: &str) -> Result<HeaderValue, NtlmError> {
    let mut value = HeaderValue::from_str(authorization)
        .or(Err(EncodeError::InvalidHeaderValue))?;
    value.set_sensitive(true);
    Ok(value)
}


/// Drives the NTLM handshake of one request against a server or proxy.
#[derive(Debug)]
pub struct NtlmHandshake {
    target: AuthTarget,
    realm: Arc<Realm>,
    engine: NtlmEngine,
    state: AuthChallengeState,
    connection: Option<ConnectionId>,
    failure: Option<NtlmError>,
}
impl NtlmHandshake {
    pub fn new(target: AuthTarget, realm: Arc<Realm>, engine: NtlmEngine) -> Self {
        Self {
            target,
            realm,
            engine,
            state: AuthChallengeState::NotStarted,
            connection: None,
            failure: None,
        }
    }

    pub fn state(&self) -> AuthChallengeState {
        self.state
    }

    pub fn target(&self) -> AuthTarget {
        self.target
    }

    /// Why the handshake failed, if it did.
    pub fn failure(&self) -> Option<&NtlmError> {
        self.failure.as_ref()
    }

    /// The header to attach to the first request, if the realm asks for preemptive authentication.
    ///
    /// Sends the negotiate message right away so that the server can answer with a challenge
    /// message instead of a bare `NTLM`.
    pub fn preemptive_header(&mut self) -> Result<Option<(HeaderName, HeaderValue)>, NtlmError> {
        if !self.realm.use_preemptive_auth || self.state != AuthChallengeState::NotStarted {
            return Ok(None);
        }
        let authorization = ntlm_authorization(&self.engine, &self.realm, NTLM_SCHEME)?;
        let value = to_header_value(&authorization)?;
        self.transition(AuthChallengeState::Type1Sent);
        Ok(Some((self.target.authorization_header(), value)))
    }

    /// Processes the status and headers of a response that arrived on `connection`.
    ///
    /// Returns an error only if the challenge could not be answered; the handshake is then
    /// [`AuthChallengeState::Failed`] and the response should be treated as an authentication
    /// failure.
    pub fn on_response(&mut self, status: StatusCode, headers: &HeaderMap, connection: &ConnectionInfo) -> Result<AuthAction, NtlmError> {
        if status != self.target.challenge_status() {
            match self.state {
                AuthChallengeState::Type1Sent|AuthChallengeState::Type2Received|AuthChallengeState::Type3Sent => {
                    self.transition(AuthChallengeState::Complete);
                },
                _ => {},
            }
            return Ok(AuthAction::Deliver);
        }

        match self.state {
            AuthChallengeState::Complete|AuthChallengeState::Failed => return Ok(AuthAction::Deliver),
            AuthChallengeState::Type3Sent => {
                warn!(status = status.as_u16(), principal = %self.realm.principal, "NTLM credentials rejected");
                self.fail(NtlmError::Rejected { status: status.as_u16() });
                return Ok(AuthAction::Deliver);
            },
            _ => {},
        }

        let challenge_header = self.target.challenge_header();
        let header = match header_with_prefix(headers.get_all(&challenge_header), NTLM_SCHEME) {
            Some(h) => h,
            None => {
                info!(header = %challenge_header, "cannot handle challenge: no NTLM scheme offered");
                return Ok(self.reject(status));
            },
        };

        match parse_challenge(header) {
            None => {
                info!(header, "cannot handle challenge: unrecognized NTLM header");
                Ok(self.reject(status))
            },
            Some(Challenge::Bare) => {
                if self.state != AuthChallengeState::NotStarted {
                    return Ok(self.reject(status));
                }
                let header_value = to_header_value(&ntlm_authorization(&self.engine, &self.realm, header)?)?;
                self.transition(AuthChallengeState::Type1Sent);
                Ok(self.replay(header_value, connection))
            },
            Some(Challenge::Token(_)) => {
                if let Some(previous) = self.connection {
                    if previous != connection.id {
                        debug!(?previous, current = ?connection.id, "NTLM challenge arrived on another connection");
                    }
                }
                self.transition(AuthChallengeState::Type2Received);
                match ntlm_authorization(&self.engine, &self.realm, header).and_then(|a| to_header_value(&a)) {
                    Ok(header_value) => {
                        self.transition(AuthChallengeState::Type3Sent);
                        Ok(self.replay(header_value, connection))
                    },
                    Err(e) => {
                        warn!(error = %e, "cannot answer NTLM challenge");
                        self.fail(e.clone());
                        Err(e)
                    },
                }
            },
        }
    }

    /// Prepares the handshake for the next request on the same connection.
    ///
    /// During a proxy tunnel (`CONNECT`) handshake the state is retained, as the proxy
    /// authenticates the tunnel connection as a whole.
    pub fn reset_for_next_request(&mut self, tunnel_in_progress: bool) {
        if tunnel_in_progress {
            debug!(state = ?self.state, "keeping NTLM state for proxy tunnel");
            return;
        }
        self.transition(AuthChallengeState::NotStarted);
        self.connection = None;
        self.failure = None;
    }

    fn transition(&mut self, new_state: AuthChallengeState) {
        if self.state != new_state {
            debug!(auth_target = ?self.target, from = ?self.state, to = ?new_state, "NTLM handshake state change");
            self.state = new_state;
        }
    }

    fn fail(&mut self, error: NtlmError) {
        self.transition(AuthChallengeState::Failed);
        self.failure = Some(error);
    }

    /// Delivers a challenge that cannot be answered, failing the handshake if it already began.
    fn reject(&mut self, status: StatusCode) -> AuthAction {
        if self.state != AuthChallengeState::NotStarted {
            warn!(status = status.as_u16(), state = ?self.state, "NTLM negotiate message rejected");
            self.fail(NtlmError::Rejected { status: status.as_u16() });
        }
        AuthAction::Deliver
    }

    fn replay(&mut self, header_value: HeaderValue, connection: &ConnectionInfo) -> AuthAction {
        let replay_connection = if connection.keep_alive && !connection.chunked {
            self.connection = Some(connection.id);
            ReplayConnection::DrainAndReuse(connection.id)
        } else {
            if self.state == AuthChallengeState::Type3Sent {
                warn!(connection = ?connection.id, "replaying NTLM authenticate message on a new connection; the server may not accept it");
            }
            self.connection = None;
            ReplayConnection::NewConnection
        };
        AuthAction::Replay(Replay {
            header_name: self.target.authorization_header(),
            header_value,
            connection: replay_connection,
        })
    }
}


#[cfg(test)]
mod tests {
    use http::header;
    use super::*;

    const SRV_NONCE_TYPE2: &str = "TlRMTVNTUAACAAAAAAAAACgAAAABggAAU3J2Tm9uY2UAAAAAAAAAAA==";

    fn zaphod() -> Realm {
        Realm::new("Zaphod", "Beeblebrox")
            .with_domain("Ursa-Minor")
            .with_host("LightCity")
    }

    fn challenge(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn challenge_parsing() {
        assert!(matches!(parse_challenge("NTLM"), Some(Challenge::Bare)));
        assert!(matches!(parse_challenge(" ntlm  "), Some(Challenge::Bare)));
        assert!(matches!(parse_challenge("NTLM abc=="), Some(Challenge::Token("abc=="))));
        assert!(parse_challenge("NTLMv2 abc").is_none());
        assert!(parse_challenge("Negotiate abc").is_none());
        assert!(parse_challenge("NTL").is_none());
    }

    #[test]
    fn authorization_for_bare_challenge() {
        let value = ntlm_authorization(&NtlmEngine::new(), &zaphod(), "NTLM").unwrap();
        assert_eq!(value, "NTLM TlRMTVNTUAABAAAAkYII4gAAAAAoAAAAAAAAACgAAAAFASgKAAAADw==");
    }

    #[test]
    fn authorization_for_type2() {
        let value = ntlm_authorization(&NtlmEngine::new(), &zaphod(), &format!("NTLM {}", SRV_NONCE_TYPE2)).unwrap();
        assert!(value.starts_with("NTLM TlRMTVNTUAADAAAAGAAYAEgAAAAYABgAYAAAABQAFAB4AAAA"));
    }

    #[test]
    fn authorization_for_foreign_scheme() {
        let err = ntlm_authorization(&NtlmEngine::new(), &zaphod(), "Basic realm=\"x\"").unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn other_status_is_delivered() {
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        let action = handshake.on_response(StatusCode::OK, &HeaderMap::new(), &ConnectionInfo::keep_alive(ConnectionId(1)))
            .unwrap();
        assert_eq!(action, AuthAction::Deliver);
        assert_eq!(handshake.state(), AuthChallengeState::NotStarted);
    }

    #[test]
    fn challenge_without_ntlm_is_delivered() {
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        let action = handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("Basic realm=\"x\""), &ConnectionInfo::keep_alive(ConnectionId(1)))
            .unwrap();
        assert_eq!(action, AuthAction::Deliver);
        assert_eq!(handshake.state(), AuthChallengeState::NotStarted);
    }

    #[test]
    fn foreign_challenge_after_negotiate_fails() {
        let connection = ConnectionInfo::keep_alive(ConnectionId(1));
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("NTLM"), &connection)
            .unwrap();
        assert_eq!(handshake.state(), AuthChallengeState::Type1Sent);

        let action = handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("Basic realm=\"x\""), &connection)
            .unwrap();
        assert_eq!(action, AuthAction::Deliver);
        assert_eq!(handshake.state(), AuthChallengeState::Failed);
        assert_eq!(handshake.failure(), Some(&NtlmError::Rejected { status: 401 }));
    }

    #[test]
    fn longer_scheme_after_negotiate_fails() {
        let connection = ConnectionInfo::keep_alive(ConnectionId(1));
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("NTLM"), &connection)
            .unwrap();

        let action = handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("NTLMv2 abc"), &connection)
            .unwrap();
        assert_eq!(action, AuthAction::Deliver);
        assert_eq!(handshake.state(), AuthChallengeState::Failed);
        assert_eq!(handshake.failure(), Some(&NtlmError::Rejected { status: 401 }));
    }

    #[test]
    fn proxy_challenge_on_server_target_is_ignored() {
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        assert_eq!(handshake.target(), AuthTarget::Server);
        let action = handshake.on_response(StatusCode::PROXY_AUTHENTICATION_REQUIRED, &challenge("NTLM"), &ConnectionInfo::keep_alive(ConnectionId(1)))
            .unwrap();
        assert_eq!(action, AuthAction::Deliver);
        assert_eq!(handshake.state(), AuthChallengeState::NotStarted);
    }

    #[test]
    fn chunked_response_replays_on_new_connection() {
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        let action = handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("NTLM"), &ConnectionInfo::new(ConnectionId(1), true, true))
            .unwrap();
        match action {
            AuthAction::Replay(replay) => assert_eq!(replay.connection, ReplayConnection::NewConnection),
            AuthAction::Deliver => panic!("bare challenge must be replayed"),
        }
    }

    #[test]
    fn header_value_is_sensitive() {
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        let action = handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("NTLM"), &ConnectionInfo::keep_alive(ConnectionId(1)))
            .unwrap();
        match action {
            AuthAction::Replay(replay) => assert!(replay.header_value.is_sensitive()),
            AuthAction::Deliver => panic!("bare challenge must be replayed"),
        }
    }

    #[test]
    fn reset_starts_over() {
        let mut handshake = NtlmHandshake::new(AuthTarget::Server, Arc::new(zaphod()), NtlmEngine::new());
        handshake.on_response(StatusCode::UNAUTHORIZED, &challenge("NTLM"), &ConnectionInfo::keep_alive(ConnectionId(1)))
            .unwrap();
        assert_eq!(handshake.state(), AuthChallengeState::Type1Sent);

        handshake.reset_for_next_request(true);
        assert_eq!(handshake.state(), AuthChallengeState::Type1Sent);

        handshake.reset_for_next_request(false);
        assert_eq!(handshake.state(), AuthChallengeState::NotStarted);
        assert!(handshake.failure().is_none());
    }
}
