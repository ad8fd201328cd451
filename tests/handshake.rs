use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http::header;
use ntlmhttp::{
    AuthAction, AuthChallengeState, AuthTarget, ConnectionId, ConnectionInfo, NtlmEngine, NtlmError,
    NtlmHandshake, Realm, ReplayConnection,
};


const TYPE1: &str = "NTLM TlRMTVNTUAABAAAAkYII4gAAAAAoAAAAAAAAACgAAAAFASgKAAAADw==";
const TYPE2: &str = "NTLM TlRMTVNTUAACAAAAAAAAACgAAAABggAAU3J2Tm9uY2UAAAAAAAAAAA==";
const TYPE3: &str = concat!(
    "NTLM TlRMTVNTUAADAAAAGAAYAEgAAAAYABgAYAAAABQAFAB4AAAADAAMAIwAAAASABIAmAAAAAAAAACqAAAAAbIAAgUBKAoAAAAP",
    "rYfKbe/jRoW5xDxHeoxC1gBmfWiS5+iX4OAN4xBKG/IFPwfH3agtPEia6YnhsADTVQBSAFMAQQAtAE0ASQBOAE8AUgBaAGEA",
    "cABoAG8AZABMAGkAZwBoAHQAQwBpAHQAeQA=",
);


/// A server that only lets the expected NTLM handshake through.
struct FakeServer {
    target: AuthTarget,
    type2: &'static str,
    requests: usize,
}
impl FakeServer {
    fn new(target: AuthTarget) -> Self {
        Self {
            target,
            type2: TYPE2,
            requests: 0,
        }
    }

    fn handle(&mut self, request_headers: &HeaderMap) -> (StatusCode, HeaderMap) {
        self.requests += 1;

        let authorization = request_headers.get(self.target.authorization_header())
            .and_then(|v| v.to_str().ok());
        let mut headers = HeaderMap::new();
        let challenge = match authorization {
            None => "NTLM",
            Some(TYPE1) => self.type2,
            Some(TYPE3) => return (StatusCode::OK, headers),
            Some(_) => "NTLM",
        };
        headers.insert(self.target.challenge_header(), HeaderValue::from_static(challenge));
        (self.target.challenge_status(), headers)
    }
}


struct Outcome {
    delivered: StatusCode,
    replays: usize,
}

/// Sends one request through the handshake like an HTTP client would.
fn send(server: &mut FakeServer, handshake: &mut NtlmHandshake) -> Result<Outcome, NtlmError> {
    let connection = ConnectionInfo::keep_alive(ConnectionId(7));
    let mut request_headers = HeaderMap::new();
    if let Some((name, value)) = handshake.preemptive_header()? {
        request_headers.insert(name, value);
    }

    let mut replays = 0;
    loop {
        let (status, headers) = server.handle(&request_headers);
        match handshake.on_response(status, &headers, &connection)? {
            AuthAction::Deliver => return Ok(Outcome { delivered: status, replays }),
            AuthAction::Replay(replay) => {
                assert_eq!(replay.connection, ReplayConnection::DrainAndReuse(ConnectionId(7)));
                replays += 1;
                assert!(replays <= 2, "handshake does not terminate");
                request_headers.insert(replay.header_name, replay.header_value);
            },
        }
    }
}

fn zaphod(password: &str) -> Arc<Realm> {
    Arc::new(
        Realm::new("Zaphod", password)
            .with_domain("Ursa-Minor")
            .with_host("LightCity")
    )
}

fn authorization(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers.get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_owned())
}


#[test]
fn server_handshake_delivers_single_response() {
    let mut server = FakeServer::new(AuthTarget::Server);
    let mut handshake = NtlmHandshake::new(AuthTarget::Server, zaphod("Beeblebrox"), NtlmEngine::new());

    let outcome = send(&mut server, &mut handshake).unwrap();
    assert_eq!(outcome.delivered, StatusCode::OK);
    assert_eq!(outcome.replays, 2);
    assert_eq!(server.requests, 3);
    assert_eq!(handshake.state(), AuthChallengeState::Complete);
    assert!(handshake.failure().is_none());
}

#[test]
fn proxy_handshake_keeps_tunnel_state() {
    let mut server = FakeServer::new(AuthTarget::Proxy);
    let mut handshake = NtlmHandshake::new(AuthTarget::Proxy, zaphod("Beeblebrox"), NtlmEngine::new());

    let outcome = send(&mut server, &mut handshake).unwrap();
    assert_eq!(outcome.delivered, StatusCode::OK);
    assert_eq!(outcome.replays, 2);
    assert_eq!(handshake.state(), AuthChallengeState::Complete);

    handshake.reset_for_next_request(true);
    assert_eq!(handshake.state(), AuthChallengeState::Complete);

    handshake.reset_for_next_request(false);
    assert_eq!(handshake.state(), AuthChallengeState::NotStarted);
}

#[test]
fn wrong_password_surfaces_final_challenge() {
    let mut server = FakeServer::new(AuthTarget::Server);
    let mut handshake = NtlmHandshake::new(AuthTarget::Server, zaphod("Trillian"), NtlmEngine::new());

    let outcome = send(&mut server, &mut handshake).unwrap();
    assert_eq!(outcome.delivered, StatusCode::UNAUTHORIZED);
    assert_eq!(outcome.replays, 2);
    assert_eq!(handshake.state(), AuthChallengeState::Failed);
    assert_eq!(handshake.failure(), Some(&NtlmError::Rejected { status: 401 }));
}

#[test]
fn foreign_scheme_after_negotiate_fails_handshake() {
    let mut server = FakeServer::new(AuthTarget::Server);
    server.type2 = "Basic realm=\"x\"";
    let mut handshake = NtlmHandshake::new(AuthTarget::Server, zaphod("Beeblebrox"), NtlmEngine::new());

    let outcome = send(&mut server, &mut handshake).unwrap();
    assert_eq!(outcome.delivered, StatusCode::UNAUTHORIZED);
    assert_eq!(outcome.replays, 1);
    assert_eq!(handshake.state(), AuthChallengeState::Failed);
    assert_eq!(handshake.failure(), Some(&NtlmError::Rejected { status: 401 }));
}

#[test]
fn preemptive_handshake_skips_bare_challenge() {
    let realm = Arc::new(
        Realm::new("Zaphod", "Beeblebrox")
            .with_domain("Ursa-Minor")
            .with_host("LightCity")
            .with_preemptive_auth(true)
    );
    let mut server = FakeServer::new(AuthTarget::Server);
    let mut handshake = NtlmHandshake::new(AuthTarget::Server, realm, NtlmEngine::new());

    let outcome = send(&mut server, &mut handshake).unwrap();
    assert_eq!(outcome.delivered, StatusCode::OK);
    assert_eq!(outcome.replays, 1);
    assert_eq!(server.requests, 2);
}

#[test]
fn preemptive_header_is_type1() {
    let realm = Arc::new(Realm::new("Zaphod", "Beeblebrox").with_preemptive_auth(true));
    let mut handshake = NtlmHandshake::new(AuthTarget::Proxy, realm, NtlmEngine::new());

    let (name, value) = handshake.preemptive_header().unwrap().unwrap();
    assert_eq!(name, header::PROXY_AUTHORIZATION);
    assert_eq!(value.to_str().unwrap(), TYPE1);
    assert_eq!(handshake.state(), AuthChallengeState::Type1Sent);

    // only once per request
    assert!(handshake.preemptive_header().unwrap().is_none());
}

#[test]
fn malformed_challenge_fails_handshake() {
    let mut server = FakeServer::new(AuthTarget::Server);
    server.type2 = "NTLM TlRMTVNTUAACAAAA";
    let mut handshake = NtlmHandshake::new(AuthTarget::Server, zaphod("Beeblebrox"), NtlmEngine::new());

    let err = send(&mut server, &mut handshake).err().unwrap();
    assert!(err.is_decode());
    assert_eq!(handshake.state(), AuthChallengeState::Failed);
    assert_eq!(server.requests, 2);
}

#[test]
fn replayed_requests_carry_handshake_messages() {
    let mut server = FakeServer::new(AuthTarget::Server);
    let mut handshake = NtlmHandshake::new(AuthTarget::Server, zaphod("Beeblebrox"), NtlmEngine::new());
    let connection = ConnectionInfo::keep_alive(ConnectionId(1));

    let (status, headers) = server.handle(&HeaderMap::new());
    let mut request = HeaderMap::new();
    match handshake.on_response(status, &headers, &connection).unwrap() {
        AuthAction::Replay(replay) => { request.insert(replay.header_name, replay.header_value); },
        AuthAction::Deliver => panic!("bare challenge delivered"),
    }
    assert_eq!(authorization(&request, header::AUTHORIZATION).as_deref(), Some(TYPE1));

    let (status, headers) = server.handle(&request);
    match handshake.on_response(status, &headers, &connection).unwrap() {
        AuthAction::Replay(replay) => { request.insert(replay.header_name, replay.header_value); },
        AuthAction::Deliver => panic!("type 2 challenge delivered"),
    }
    assert_eq!(authorization(&request, header::AUTHORIZATION).as_deref(), Some(TYPE3));
    assert_eq!(handshake.state(), AuthChallengeState::Type3Sent);
}
