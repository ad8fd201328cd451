//! Errors produced while negotiating NTLM authentication.
//!
//! Primitive failures are folded into [`NtlmError`] so that the HTTP layer can tell a malformed
//! challenge apart from a broken cryptographic environment or a server that rejected the
//! credentials.


use std::fmt;


/// An error that may occur while decoding an NTLM message received from the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// The header value is not valid Base64.
    Base64 { error: base64::DecodeError },

    /// The message is shorter than its fixed-size part.
    ShortMessage { expected_min_len: usize, obtained_len: usize },

    /// The magic value does not match the expected one.
    MagicMismatch { expected: [u8; 8], obtained: Vec<u8> },

    /// The message type field holds a different type than expected.
    UnexpectedMessageType { expected: u32, obtained: u32 },

    /// The server did not agree to Unicode encoding.
    MissingUnicodeFlag { flags: u32 },

    /// A security buffer points outside of the message.
    FieldOutOfRange { offset: usize, length: usize, message_len: usize },

    /// The challenge header does not belong to the NTLM scheme.
    NotNtlmChallenge { header: String },
}
impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base64 { error }
                => write!(f, "NTLM message is not valid Base64: {}", error),
            Self::ShortMessage { expected_min_len, obtained_len }
                => write!(f, "NTLM message too short (expected at least {} bytes, obtained {})", expected_min_len, obtained_len),
            Self::MagicMismatch { expected, obtained }
                => write!(f, "mismatched magic (expected {:?}, obtained {:?})", expected, obtained),
            Self::UnexpectedMessageType { expected, obtained }
                => write!(f, "NTLM type {} message expected, obtained type {}", expected, obtained),
            Self::MissingUnicodeFlag { flags }
                => write!(f, "NTLM type 2 message has flags that make no sense: 0x{:08X}", flags),
            Self::FieldOutOfRange { offset, length, message_len }
                => write!(f, "data item at offset {} with length {} exceeds message length {}", offset, length, message_len),
            Self::NotNtlmChallenge { header }
                => write!(f, "not an NTLM challenge: {:?}", header),
        }
    }
}
impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Base64 { error } => Some(error),
            _ => None,
        }
    }
}

/// An error that may occur while writing an NTLM message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EncodeError {
    /// A field is too long to be described by a security buffer.
    FieldTooLong { field: &'static str, length: usize },

    /// The encoded message cannot be placed into an HTTP header.
    InvalidHeaderValue,
}
impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldTooLong { field, length }
                => write!(f, "{} is too long for an NTLM message ({} bytes)", field, length),
            Self::InvalidHeaderValue
                => write!(f, "NTLM message cannot be stored in an HTTP header"),
        }
    }
}
impl std::error::Error for EncodeError {
}

/// An error raised by one of the cryptographic primitives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CryptoError {
    /// The primitive refused the key material.
    InvalidKeyLength { algorithm: &'static str, length: usize },
}
impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyLength { algorithm, length }
                => write!(f, "{} rejected a key of {} bytes", algorithm, length),
        }
    }
}
impl std::error::Error for CryptoError {
}

/// The engine-level NTLM error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NtlmError {
    /// The server's challenge is malformed; NTLM cannot proceed for this request.
    Decode(DecodeError),

    /// A message could not be written.
    Encode(EncodeError),

    /// A hash or cipher could not be computed.
    Crypto(CryptoError),

    /// No cryptographically secure random bytes could be obtained.
    RandomUnavailable { reason: String },

    /// The server answered the authenticate message with another challenge status.
    Rejected { status: u16 },
}
impl NtlmError {
    /// Whether the error stems from a malformed message sent by the server.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Whether the error indicates a broken environment rather than a bad exchange.
    ///
    /// Such errors are configuration problems and retrying with another scheme will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RandomUnavailable { .. })
    }
}
impl fmt::Display for NtlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e)
                => write!(f, "NTLM message decoding error: {}", e),
            Self::Encode(e)
                => write!(f, "NTLM message encoding error: {}", e),
            Self::Crypto(e)
                => write!(f, "NTLM cryptographic error: {}", e),
            Self::RandomUnavailable { reason }
                => write!(f, "random generator not available: {}", reason),
            Self::Rejected { status }
                => write!(f, "NTLM credentials rejected (status {})", status),
        }
    }
}
impl std::error::Error for NtlmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Crypto(e) => Some(e),
            _ => None,
        }
    }
}
impl From<DecodeError> for NtlmError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}
impl From<EncodeError> for NtlmError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}
impl From<CryptoError> for NtlmError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}
