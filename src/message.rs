//! Encoding and decoding of the three NTLM handshake messages.
//!
//! Every message starts with the `NTLMSSP\0` magic and a 32-bit little-endian message type.
//! Variable-length fields are described by security buffers in a fixed-size header and stored in a
//! payload that follows it. On the wire, messages travel Base64-encoded in HTTP headers.


use base64::prelude::{BASE64_STANDARD, Engine};

use crate::{Flags, NTLMSSP_MAGIC};
use crate::encoding::{strip_dot_suffix, utf16le, utf16le_lossy};
use crate::error::{DecodeError, EncodeError};


pub const TYPE1_MESSAGE: u32 = 0x0000_0001;
pub const TYPE2_MESSAGE: u32 = 0x0000_0002;
pub const TYPE3_MESSAGE: u32 = 0x0000_0003;

/// The negotiation flags every Type 1 message offers.
pub const TYPE1_FLAGS: Flags = Flags::NEGOTIATE_LANMAN_KEY
    .union(Flags::NEGOTIATE_NTLM)
    .union(Flags::NEGOTIATE_NTLM2_KEY)
    .union(Flags::NEGOTIATE_VERSION)
    .union(Flags::NEGOTIATE_ALWAYS_SIGN)
    .union(Flags::NEGOTIATE_SIGN)
    .union(Flags::NEGOTIATE_128BIT)
    .union(Flags::NEGOTIATE_56BIT)
    .union(Flags::NEGOTIATE_KEY_EXCHANGE)
    .union(Flags::NEGOTIATE_UNICODE);

/// The Type 2 flags a Type 3 message echoes back to the server.
pub const TYPE3_ECHOED_FLAGS: Flags = Flags::NEGOTIATE_LANMAN_KEY
    .union(Flags::NEGOTIATE_NTLM)
    .union(Flags::NEGOTIATE_NTLM2_KEY)
    .union(Flags::NEGOTIATE_ALWAYS_SIGN)
    .union(Flags::NEGOTIATE_SEAL)
    .union(Flags::NEGOTIATE_SIGN)
    .union(Flags::NEGOTIATE_128BIT)
    .union(Flags::NEGOTIATE_56BIT)
    .union(Flags::NEGOTIATE_KEY_EXCHANGE)
    .union(Flags::NEGOTIATE_TARGET_INFO)
    .union(Flags::NEGOTIATE_UNICODE)
    .union(Flags::REQUEST_TARGET);

/// The flags a Type 3 message always sets.
pub const TYPE3_REQUIRED_FLAGS: Flags = Flags::NEGOTIATE_WORKSTATION_SUPPLIED
    .union(Flags::NEGOTIATE_DOMAIN_SUPPLIED)
    .union(Flags::NEGOTIATE_VERSION);

const TYPE1_LENGTH: u32
    = 8 // magic
    + 4 // message type
    + 4 // flags
    + 8 // domain secbuffer
    + 8 // host secbuffer
    + 8 // version
    ;

const TYPE2_MIN_LENGTH: usize
    = 8 // magic
    + 4 // message type
    + 8 // target name secbuffer
    + 4 // flags
    + 8 // challenge
    ;

const TYPE3_HEADER_LENGTH: u32
    = 8 // magic
    + 4 // message type
    + 8 // LM response secbuffer
    + 8 // NTLM response secbuffer
    + 8 // domain name secbuffer
    + 8 // user name secbuffer
    + 8 // host name secbuffer
    + 8 // session key secbuffer
    + 4 // flags
    + 8 // version
    ;


/// A structure representing the version of an operating system as well as the NTLM revision used.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OsVersion {
    pub major_version: u8,
    pub minor_version: u8,
    pub build_number: u16,
    pub reserved: [u8; 3],
    pub ntlm_revision: u8,
}
impl OsVersion {
    /// The version announced by this client: Windows XP (5.1, build 2600), NTLM revision 15.
    pub const CLIENT: Self = Self {
        major_version: 5,
        minor_version: 1,
        build_number: 2600,
        reserved: [0, 0, 0],
        ntlm_revision: 0x0F,
    };

    /// Serializes the OS version structure into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let build = self.build_number.to_le_bytes();
        [
            self.major_version,
            self.minor_version,
            build[0],
            build[1],
            self.reserved[0],
            self.reserved[1],
            self.reserved[2],
            self.ntlm_revision,
        ]
    }
}
impl Default for OsVersion {
    fn default() -> Self {
        Self::CLIENT
    }
}


/// An NTLM security buffer, pointing to data contained later in the message.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SecurityBuffer {
    pub length: u16,
    pub capacity: u16,
    pub offset: u32,
}
impl SecurityBuffer {
    /// Generates a security buffer for the given slice of bytes, located at `offset`.
    ///
    /// The length and capacity are both set to the length of the slice.
    pub fn for_slice(field: &'static str, slice: &[u8], offset: u32) -> Result<Self, EncodeError> {
        let length: u16 = slice.len()
            .try_into()
            .or(Err(EncodeError::FieldTooLong { field, length: slice.len() }))?;
        Ok(Self {
            length,
            capacity: length,
            offset,
        })
    }

    /// Reads the security buffer stored at `position` within `message`.
    pub fn read(message: &[u8], position: usize) -> Result<Self, DecodeError> {
        let length = read_u16(message, position)?;
        let capacity = read_u16(message, position + 2)?;
        let offset = read_u32(message, position + 4)?;
        Ok(Self {
            length,
            capacity,
            offset,
        })
    }

    /// Serializes the security buffer into bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut ret = [0u8; 8];
        ret[0..2].copy_from_slice(&self.length.to_le_bytes());
        ret[2..4].copy_from_slice(&self.capacity.to_le_bytes());
        ret[4..8].copy_from_slice(&self.offset.to_le_bytes());
        ret
    }

    /// Extracts the data the security buffer points to from the whole message.
    ///
    /// The range must lie within the message even if the buffer is empty.
    pub fn apply_to_message<'a>(&self, message: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        let start = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let length = usize::from(self.length);
        let out_of_range = DecodeError::FieldOutOfRange { offset: start, length, message_len: message.len() };

        let end = start.checked_add(length)
            .ok_or_else(|| out_of_range.clone())?;
        if end > message.len() {
            return Err(out_of_range);
        }
        Ok(&message[start..end])
    }
}


fn read_u16(message: &[u8], position: usize) -> Result<u16, DecodeError> {
    let bytes = message.get(position..position + 2)
        .ok_or(DecodeError::ShortMessage { expected_min_len: position + 2, obtained_len: message.len() })?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(message: &[u8], position: usize) -> Result<u32, DecodeError> {
    let bytes = message.get(position..position + 4)
        .ok_or(DecodeError::ShortMessage { expected_min_len: position + 4, obtained_len: message.len() })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Validates the magic and returns the message type of an NTLM message.
pub fn peek_message_type(message: &[u8]) -> Result<u32, DecodeError> {
    if message.len() < 12 {
        return Err(DecodeError::ShortMessage { expected_min_len: 12, obtained_len: message.len() });
    }
    if message[0..8] != NTLMSSP_MAGIC {
        return Err(DecodeError::MagicMismatch { expected: NTLMSSP_MAGIC, obtained: Vec::from(&message[0..8]) });
    }
    read_u32(message, 8)
}


/// Writes a message front to back.
struct MessageWriter {
    bytes: Vec<u8>,
}
impl MessageWriter {
    /// Starts a message of the given type; `capacity` is the expected total length.
    fn new(message_type: u32, capacity: usize) -> Self {
        let mut bytes = Vec::with_capacity(capacity);
        bytes.extend_from_slice(&NTLMSSP_MAGIC);
        bytes.extend_from_slice(&message_type.to_le_bytes());
        Self {
            bytes,
        }
    }

    fn add_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn add_bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    fn add_sec_buffer(&mut self, sec_buffer: &SecurityBuffer) {
        self.add_bytes(&sec_buffer.to_bytes());
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Appends a security buffer to the header of a message and its data to the payload.
///
/// `sec_buffer_offset` tracks the next free offset in the message at which data of a security
/// buffer can be placed; the payload is expected to be appended right after the header.
fn append_sec_buffer(writer: &mut MessageWriter, payload: &mut Vec<u8>, sec_buffer_offset: &mut u32, field: &'static str, data: &[u8]) -> Result<(), EncodeError> {
    let sb = SecurityBuffer::for_slice(field, data, *sec_buffer_offset)?;
    writer.add_sec_buffer(&sb);
    payload.extend_from_slice(data);
    *sec_buffer_offset += u32::from(sb.length);
    Ok(())
}


/// The negotiate message, sent by the client to start the handshake.
///
/// The domain and host are accepted but never transmitted; their security buffers are always empty
/// and point at the end of the message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Type1Message {
    pub domain: String,
    pub host: String,
    pub flags: Flags,
    pub os_version: OsVersion,
}
impl Type1Message {
    pub fn new(domain: &str, host: &str) -> Self {
        Self {
            domain: strip_dot_suffix(domain).to_owned(),
            host: strip_dot_suffix(host).to_owned(),
            flags: TYPE1_FLAGS,
            os_version: OsVersion::CLIENT,
        }
    }

    /// Serializes the message into bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let empty = SecurityBuffer {
            length: 0,
            capacity: 0,
            offset: TYPE1_LENGTH,
        };

        let mut writer = MessageWriter::new(TYPE1_MESSAGE, TYPE1_LENGTH as usize);
        writer.add_u32(self.flags.bits());
        writer.add_sec_buffer(&empty); // domain
        writer.add_sec_buffer(&empty); // host
        writer.add_bytes(&self.os_version.to_bytes());
        writer.into_bytes()
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.to_bytes())
    }
}


/// The challenge message, sent by the server in response to a [`Type1Message`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Type2Message {
    pub challenge: [u8; 8],
    pub flags: Flags,

    /// The authentication target; `None` if the server sent none.
    pub target: Option<String>,

    /// The raw AV pairs describing the target; `None` if the server sent none.
    pub target_info: Option<Vec<u8>>,

    message_length: usize,
}
impl Type2Message {
    /// Decodes a challenge message from its Base64 representation as found in an HTTP header.
    pub fn from_base64(encoded: &str) -> Result<Self, DecodeError> {
        let bytes = BASE64_STANDARD.decode(encoded.trim())
            .map_err(|error| DecodeError::Base64 { error })?;
        Self::from_bytes(&bytes)
    }

    /// Decodes a challenge message.
    ///
    /// The optional fields are read depending on the length of the message, not on the flags
    /// announcing them, as servers do not set those reliably.
    pub fn from_bytes(message: &[u8]) -> Result<Self, DecodeError> {
        let message_type = peek_message_type(message)?;
        if message_type != TYPE2_MESSAGE {
            return Err(DecodeError::UnexpectedMessageType { expected: TYPE2_MESSAGE, obtained: message_type });
        }
        if message.len() < TYPE2_MIN_LENGTH {
            return Err(DecodeError::ShortMessage { expected_min_len: TYPE2_MIN_LENGTH, obtained_len: message.len() });
        }

        let mut challenge = [0u8; 8];
        challenge.copy_from_slice(&message[24..32]);

        let flags_u32 = read_u32(message, 20)?;
        let flags = Flags::from_bits_retain(flags_u32);
        if !flags.contains(Flags::NEGOTIATE_UNICODE) {
            return Err(DecodeError::MissingUnicodeFlag { flags: flags_u32 });
        }

        let target_bytes = SecurityBuffer::read(message, 12)?
            .apply_to_message(message)?;
        let target = if target_bytes.is_empty() {
            None
        } else {
            Some(utf16le_lossy(target_bytes))
        };

        let target_info = if message.len() >= 48 {
            let target_info_bytes = SecurityBuffer::read(message, 40)?
                .apply_to_message(message)?;
            if target_info_bytes.is_empty() {
                None
            } else {
                Some(Vec::from(target_info_bytes))
            }
        } else {
            None
        };

        Ok(Self {
            challenge,
            flags,
            target,
            target_info,
            message_length: message.len(),
        })
    }

    /// The length in bytes of the decoded message.
    pub fn message_length(&self) -> usize {
        self.message_length
    }
}


/// The authenticate message, the client's answer to a [`Type2Message`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Type3Message {
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub user: String,
    pub host: String,

    /// The encrypted session key; only present when explicit key exchange was negotiated.
    pub session_key: Option<Vec<u8>>,

    pub flags: Flags,
    pub os_version: OsVersion,
}
impl Type3Message {
    /// Assembles an authenticate message, normalizing the names as servers expect them.
    ///
    /// Domain and host are cut off at the first dot and the domain is uppercased.
    pub fn new(
        domain: &str,
        host: &str,
        user: &str,
        lm_response: Vec<u8>,
        nt_response: Vec<u8>,
        type2_flags: Flags,
        session_key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            lm_response,
            nt_response,
            domain: strip_dot_suffix(domain).to_uppercase(),
            user: user.to_owned(),
            host: strip_dot_suffix(host).to_owned(),
            session_key,
            flags: Self::flags_for(type2_flags),
            os_version: OsVersion::CLIENT,
        }
    }

    /// Derives the flags of the authenticate message from those of the challenge.
    pub fn flags_for(type2_flags: Flags) -> Flags {
        (type2_flags & TYPE3_ECHOED_FLAGS) | TYPE3_REQUIRED_FLAGS
    }

    /// Serializes the message into bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let domain_bytes = utf16le(&self.domain);
        let user_bytes = utf16le(&self.user);
        let host_bytes = utf16le(&self.host);
        let session_key: &[u8] = self.session_key.as_deref().unwrap_or(&[]);

        let payload_length = self.lm_response.len()
            + self.nt_response.len()
            + domain_bytes.len()
            + user_bytes.len()
            + host_bytes.len()
            + session_key.len();

        let mut sec_buffer_offset = TYPE3_HEADER_LENGTH;
        let mut writer = MessageWriter::new(TYPE3_MESSAGE, TYPE3_HEADER_LENGTH as usize + payload_length);
        let mut payload = Vec::with_capacity(payload_length);

        append_sec_buffer(&mut writer, &mut payload, &mut sec_buffer_offset, "LM response", &self.lm_response)?;
        append_sec_buffer(&mut writer, &mut payload, &mut sec_buffer_offset, "NTLM response", &self.nt_response)?;
        append_sec_buffer(&mut writer, &mut payload, &mut sec_buffer_offset, "domain", &domain_bytes)?;
        append_sec_buffer(&mut writer, &mut payload, &mut sec_buffer_offset, "user", &user_bytes)?;
        append_sec_buffer(&mut writer, &mut payload, &mut sec_buffer_offset, "host", &host_bytes)?;
        append_sec_buffer(&mut writer, &mut payload, &mut sec_buffer_offset, "session key", session_key)?;
        writer.add_u32(self.flags.bits());
        writer.add_bytes(&self.os_version.to_bytes());
        writer.add_bytes(&payload);
        Ok(writer.into_bytes())
    }

    pub fn to_base64(&self) -> Result<String, EncodeError> {
        Ok(BASE64_STANDARD.encode(self.to_bytes()?))
    }
}
