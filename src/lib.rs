//! NTLM challenge-response authentication for HTTP clients.
//!
//! The crate contains the pieces an HTTP client needs to authenticate against servers and proxies
//! that speak NTLM over `WWW-Authenticate`/`Proxy-Authenticate`: the legacy hash and cipher
//! primitives, the Type 1/2/3 message codec, an engine that turns a server challenge into an
//! authorization header, and a per-request state machine that hides the challenge round-trip from
//! the application.
//!
//! Sample usage:
//! ```
//! use std::sync::Arc;
//!
//! use http::{HeaderMap, HeaderValue, StatusCode};
//! use ntlmhttp::{AuthAction, AuthTarget, ConnectionId, ConnectionInfo, NtlmEngine, NtlmHandshake, Realm};
//!
//! let realm = Arc::new(
//!     Realm::new("Zaphod", "Beeblebrox")
//!         .with_domain("Ursa-Minor")
//!         .with_host("LightCity")
//! );
//! let mut handshake = NtlmHandshake::new(AuthTarget::Server, realm, NtlmEngine::new());
//! let connection = ConnectionInfo::keep_alive(ConnectionId(1));
//!
//! // the server answers the first request with a bare NTLM challenge
//! let mut headers = HeaderMap::new();
//! headers.insert(http::header::WWW_AUTHENTICATE, HeaderValue::from_static("NTLM"));
//! let action = handshake.on_response(StatusCode::UNAUTHORIZED, &headers, &connection)
//!     .expect("bare challenge is always accepted");
//!
//! match action {
//!     AuthAction::Replay(replay) => {
//!         assert_eq!(replay.header_name, http::header::AUTHORIZATION);
//!         assert!(replay.header_value.to_str().unwrap().starts_with("NTLM TlRMTVNTUAAB"));
//!     },
//!     AuthAction::Deliver => panic!("the challenge must not reach the application"),
//! }
//! ```


pub mod cipher_gen;
pub mod crypto;
mod encoding;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod message;
pub mod random;
pub mod realm;


use bitflags::bitflags;

pub use crate::engine::NtlmEngine;
pub use crate::error::{CryptoError, DecodeError, EncodeError, NtlmError};
pub use crate::handshake::{
    AuthAction, AuthChallengeState, ConnectionId, ConnectionInfo, NtlmHandshake, Replay,
    ReplayConnection, ntlm_authorization,
};
pub use crate::message::{Type1Message, Type2Message, Type3Message};
pub use crate::random::{OsRandom, RandomSource, SharedRng};
pub use crate::realm::{AuthTarget, Realm};


/// The magic value at the start of every NTLMSSP data packet.
pub const NTLMSSP_MAGIC: [u8; 8] = *b"NTLMSSP\0";


bitflags! {
    /// NTLM operation flags.
    #[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct Flags: u32 {
        const NEGOTIATE_UNICODE = 0x0000_0001;
        const NEGOTIATE_OEM = 0x0000_0002;
        const REQUEST_TARGET = 0x0000_0004;
        const UNKNOWN_8 = 0x0000_0008;
        const NEGOTIATE_SIGN = 0x0000_0010;
        const NEGOTIATE_SEAL = 0x0000_0020;
        const NEGOTIATE_DATAGRAM = 0x0000_0040;
        const NEGOTIATE_LANMAN_KEY = 0x0000_0080;
        const NEGOTIATE_NETWARE = 0x0000_0100;
        const NEGOTIATE_NTLM = 0x0000_0200;
        const UNKNOWN_400 = 0x0000_0400;
        const NEGOTIATE_ANONYMOUS = 0x0000_0800;
        const NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;
        const NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;
        const NEGOTIATE_LOCAL_CALL = 0x0000_4000;
        const NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const TARGET_TYPE_SHARE = 0x0004_0000;
        const NEGOTIATE_NTLM2_KEY = 0x0008_0000;
        const REQUEST_INIT_RESPONSE = 0x0010_0000;
        const REQUEST_ACCEPT_RESPONSE = 0x0020_0000;
        const REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;
        const NEGOTIATE_TARGET_INFO = 0x0080_0000;
        const UNKNOWN_1000000 = 0x0100_0000;
        const NEGOTIATE_VERSION = 0x0200_0000;
        const UNKNOWN_4000000 = 0x0400_0000;
        const UNKNOWN_8000000 = 0x0800_0000;
        const UNKNOWN_10000000 = 0x1000_0000;
        const NEGOTIATE_128BIT = 0x2000_0000;
        const NEGOTIATE_KEY_EXCHANGE = 0x4000_0000;
        const NEGOTIATE_56BIT = 0x8000_0000;
    }
}
