//! The legacy primitives NTLM is built from.
//!
//! MD4 is implemented here since it only survives in NTLM; HMAC-MD5, DES and RC4 are thin wrappers
//! around the RustCrypto implementations that report failures as [`CryptoError`].


pub mod desl;
pub mod hmac_md5;
pub mod md4;


use cipher::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::error::CryptoError;

pub use crate::crypto::desl::{des_long, expand_des_key};
pub use crate::crypto::hmac_md5::{HmacMd5, hmac_md5};
pub use crate::crypto::md4::Md4;


/// Encrypts `data` using RC4 with a 128-bit `key`.
///
/// Used to transport the secondary key when explicit key exchange has been negotiated.
pub fn rc4_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut cipher = Rc4::<U16>::new_from_slice(key)
        .or(Err(CryptoError::InvalidKeyLength { algorithm: "RC4", length: key.len() }))?;
    let mut ret = Vec::from(data);
    cipher.apply_keystream(&mut ret);
    Ok(ret)
}
