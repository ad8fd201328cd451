//! HMAC-MD5 (RFC 2104), as used by NTLMv2.


use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::CryptoError;


/// An incremental HMAC-MD5 computation.
///
/// Several NTLMv2 values are MACs over concatenations (for example the server challenge followed by
/// the client blob); these are fed piece by piece through [`HmacMd5::update`].
#[derive(Clone)]
pub struct HmacMd5 {
    mac: Hmac<Md5>,
}
impl HmacMd5 {
    /// Prepares an HMAC-MD5 computation keyed with `key`.
    ///
    /// Keys longer than the MD5 block size are hashed first.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let mac = <Hmac<Md5> as Mac>::new_from_slice(key)
            .or(Err(CryptoError::InvalidKeyLength { algorithm: "HMAC-MD5", length: key.len() }))?;
        Ok(Self {
            mac,
        })
    }

    /// Feeds more of the message into the computation.
    pub fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    /// Returns the 16-byte MAC.
    pub fn finalize(self) -> [u8; 16] {
        let mut ret = [0u8; 16];
        ret.copy_from_slice(self.mac.finalize().into_bytes().as_slice());
        ret
    }
}

/// Computes HMAC-MD5 with the given key over the concatenation of `parts`.
pub fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], CryptoError> {
    let mut hmac_md5 = HmacMd5::new(key)?;
    for part in parts {
        hmac_md5.update(part);
    }
    Ok(hmac_md5.finalize())
}
