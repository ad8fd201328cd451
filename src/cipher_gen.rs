//! Derivation of every hash, response and session key an Authenticate message may need.
//!
//! [`CipherGen`] computes each value on first use and caches it, so that for example the random
//! client challenge baked into the NTLMv2 blob is the same one used for the LMv2 response. A
//! generator lives for the construction of a single Type 3 message and must not be shared between
//! handshakes.


use std::fmt;

use chrono::Utc;
use digest::Digest;
use md5::Md5;

use crate::crypto::{Md4, des_long, hmac_md5};
use crate::crypto::desl::des_encrypt_block;
use crate::encoding::{to_ascii_lossy, utf16le};
use crate::error::NtlmError;
#[cfg(test)]
use crate::error::CryptoError;
use crate::random::RandomSource;


/// The plaintext encrypted with the password halves to obtain the LM hash.
const LM_MAGIC: [u8; 8] = *b"KGS!@#$%";

/// Milliseconds between 1601-01-01 (the Windows epoch) and 1970-01-01.
const WINDOWS_EPOCH_OFFSET_MILLIS: i64 = 11_644_473_600_000;


/// Obtains the current NTLM timestamp: tenths of a microsecond since 1601-01-01T00:00:00Z.
pub fn get_ntlm_time() -> i64 {
    (Utc::now().timestamp_millis() + WINDOWS_EPOCH_OFFSET_MILLIS) * 10_000
}


/// Derives the LanManager hash from a password.
///
/// ```plain
///            ┌────────────┐  ┌───────────────┐  ┌─────────────┐
/// password ──┤ convert to ├──┤ encode using  ├──┤ truncate or ├──┐
///            │ uppercase  │  │   US-ASCII    │  │ pad to 14 B │  │
///            └────────────┘  └───────────────┘  └─────────────┘  │
///           ┌────────────────────────────────────────────────────┘
///           │┌───────┐
///           └┤ split │           "KGS!@#$%"
///            └─┬───┬─┘               │ input
///         0..7 │   │ 7..14    key ┌──┴──┐ output
///              │   └──────────────┤ DES ├────────────┐
///              │                  └─────┘            │ 8..16
///              │                                  ┌──┴───┐
///              │                 "KGS!@#$%"       │ join ├──── hash
///              │                     │ input      └──┬───┘
///              │              key ┌──┴──┐ output     │ 0..8
///              └──────────────────┤ DES ├────────────┘
///                                 └─────┘
/// ```
pub fn lm_hash(password: &str) -> Result<[u8; 16], NtlmError> {
    let oem_password = to_ascii_lossy(&password.to_uppercase());
    let length = oem_password.len().min(14);
    let mut key_bytes = [0u8; 14];
    key_bytes[..length].copy_from_slice(&oem_password[..length]);

    let mut low_key = [0u8; 7];
    let mut high_key = [0u8; 7];
    low_key.copy_from_slice(&key_bytes[0..7]);
    high_key.copy_from_slice(&key_bytes[7..14]);

    let mut ret = [0u8; 16];
    ret[0..8].copy_from_slice(&des_encrypt_block(&low_key, LM_MAGIC)?);
    ret[8..16].copy_from_slice(&des_encrypt_block(&high_key, LM_MAGIC)?);
    Ok(ret)
}

/// Derives the NTLM hash: MD4 over the UTF-16LE encoded password.
pub fn ntlm_hash(password: &str) -> [u8; 16] {
    Md4::digest(&utf16le(password))
}

/// Derives the NTLMv2 hash.
///
/// HMAC-MD5 keyed with the NTLM hash over the uppercased user name followed by the target name
/// in its original case, both UTF-16LE encoded.
pub fn ntlmv2_hash(target: &str, user: &str, password: &str) -> Result<[u8; 16], NtlmError> {
    let key = ntlm_hash(password);
    let upper_user = utf16le(&user.to_uppercase());
    let target_bytes = utf16le(target);
    Ok(hmac_md5(&key, &[upper_user.as_slice(), target_bytes.as_slice()])?)
}

/// Calculates the 24-byte LM or NTLM response of a 16-byte hash to a challenge.
pub fn lm_response(hash: &[u8; 16], challenge: &[u8; 8]) -> Result<[u8; 24], NtlmError> {
    Ok(des_long(hash, challenge)?)
}

/// Calculates an LMv2 or NTLMv2 response: the HMAC of challenge and client data, followed by the
/// client data.
pub fn lmv2_response(hash: &[u8; 16], challenge: &[u8; 8], client_data: &[u8]) -> Result<Vec<u8>, NtlmError> {
    let mac = hmac_md5(hash, &[challenge.as_slice(), client_data])?;
    let mut ret = Vec::with_capacity(mac.len() + client_data.len());
    ret.extend_from_slice(&mac);
    ret.extend_from_slice(client_data);
    Ok(ret)
}

/// Calculates the NTLM2 session response.
///
/// The first 8 bytes of MD5 over server and client challenge replace the server challenge in the
/// classic NTLM response.
pub fn ntlm2_session_response(ntlm_hash: &[u8; 16], challenge: &[u8; 8], client_challenge: &[u8; 8]) -> Result<[u8; 24], NtlmError> {
    let mut md5 = <Md5 as Digest>::new();
    md5.update(challenge);
    md5.update(client_challenge);
    let digest = md5.finalize();

    let mut session_hash = [0u8; 8];
    session_hash.copy_from_slice(&digest.as_slice()[0..8]);
    lm_response(ntlm_hash, &session_hash)
}

/// Assembles the NTLMv2 client blob.
pub fn create_blob(client_challenge: &[u8; 8], target_information: &[u8], timestamp: &[u8; 8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(4 + 4 + 8 + 8 + 4 + target_information.len() + 4);
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]); // blob signature
    blob.extend_from_slice(&[0x00; 4]); // reserved
    blob.extend_from_slice(timestamp);
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0x00; 4]);
    blob.extend_from_slice(target_information);
    blob.extend_from_slice(&[0x00; 4]);
    blob
}

/// Derives the LanManager session key from the LM hash and the LM response.
///
/// The first half of the LM hash, padded with `0xBD` to 14 bytes, keys two DES encryptions of the
/// first 8 bytes of the LM response.
pub fn lan_manager_session_key(lm_hash: &[u8; 16], lm_response: &[u8; 24]) -> Result<[u8; 16], NtlmError> {
    let mut key_bytes = [0xBDu8; 14];
    key_bytes[..8].copy_from_slice(&lm_hash[..8]);

    let mut low_key = [0u8; 7];
    let mut high_key = [0u8; 7];
    low_key.copy_from_slice(&key_bytes[0..7]);
    high_key.copy_from_slice(&key_bytes[7..14]);

    let mut truncated_response = [0u8; 8];
    truncated_response.copy_from_slice(&lm_response[..8]);

    let mut ret = [0u8; 16];
    ret[0..8].copy_from_slice(&des_encrypt_block(&low_key, truncated_response)?);
    ret[8..16].copy_from_slice(&des_encrypt_block(&high_key, truncated_response)?);
    Ok(ret)
}


/// Lazily computes and caches everything a single Authenticate message may need.
///
/// Each accessor computes its value at most once; later calls return the cached bytes.
pub struct CipherGen<'a> {
    target: &'a str,
    user: &'a str,
    password: &'a str,
    challenge: [u8; 8],
    target_information: &'a [u8],
    random: &'a dyn RandomSource,

    // may be injected
    client_challenge: Option<[u8; 8]>,
    secondary_key: Option<[u8; 16]>,
    timestamp: Option<[u8; 8]>,

    lm_hash: Option<[u8; 16]>,
    lm_response: Option<[u8; 24]>,
    ntlm_hash: Option<[u8; 16]>,
    ntlm_response: Option<[u8; 24]>,
    ntlmv2_hash: Option<[u8; 16]>,
    lmv2_response: Option<Vec<u8>>,
    ntlmv2_blob: Option<Vec<u8>>,
    ntlmv2_response: Option<Vec<u8>>,
    ntlm2_session_response: Option<[u8; 24]>,
    lm2_session_response: Option<[u8; 24]>,
    lm_user_session_key: Option<[u8; 16]>,
    ntlm_user_session_key: Option<[u8; 16]>,
    ntlmv2_user_session_key: Option<[u8; 16]>,
    ntlm2_session_response_user_session_key: Option<[u8; 16]>,
    lan_manager_session_key: Option<[u8; 16]>,

    #[cfg(test)]
    nt_failure: Option<CryptoError>,
}
impl<'a> fmt::Debug for CipherGen<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherGen")
            .field("target", &self.target)
            .field("user", &self.user)
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}
impl<'a> CipherGen<'a> {
    pub fn new(
        target: &'a str,
        user: &'a str,
        password: &'a str,
        challenge: [u8; 8],
        target_information: &'a [u8],
        random: &'a dyn RandomSource,
    ) -> Self {
        Self {
            target,
            user,
            password,
            challenge,
            target_information,
            random,
            client_challenge: None,
            secondary_key: None,
            timestamp: None,
            lm_hash: None,
            lm_response: None,
            ntlm_hash: None,
            ntlm_response: None,
            ntlmv2_hash: None,
            lmv2_response: None,
            ntlmv2_blob: None,
            ntlmv2_response: None,
            ntlm2_session_response: None,
            lm2_session_response: None,
            lm_user_session_key: None,
            ntlm_user_session_key: None,
            ntlmv2_user_session_key: None,
            ntlm2_session_response_user_session_key: None,
            lan_manager_session_key: None,
            #[cfg(test)]
            nt_failure: None,
        }
    }

    /// Fixes the values that are otherwise random or time-dependent.
    pub fn with_fixed_inputs(mut self, client_challenge: [u8; 8], secondary_key: [u8; 16], timestamp: [u8; 8]) -> Self {
        self.client_challenge = Some(client_challenge);
        self.secondary_key = Some(secondary_key);
        self.timestamp = Some(timestamp);
        self
    }

    /// Makes every NT-family response fail with `error`.
    #[cfg(test)]
    pub(crate) fn with_nt_failure(mut self, error: CryptoError) -> Self {
        self.nt_failure = Some(error);
        self
    }

    #[cfg(test)]
    fn check_nt_family(&self) -> Result<(), NtlmError> {
        match &self.nt_failure {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn check_nt_family(&self) -> Result<(), NtlmError> {
        Ok(())
    }

    pub fn client_challenge(&mut self) -> Result<[u8; 8], NtlmError> {
        if let Some(cc) = self.client_challenge {
            return Ok(cc);
        }
        let mut cc = [0u8; 8];
        self.random.fill(&mut cc)?;
        Ok(*self.client_challenge.insert(cc))
    }

    pub fn secondary_key(&mut self) -> Result<[u8; 16], NtlmError> {
        if let Some(key) = self.secondary_key {
            return Ok(key);
        }
        let mut key = [0u8; 16];
        self.random.fill(&mut key)?;
        Ok(*self.secondary_key.insert(key))
    }

    /// The current time as little-endian NTLM timestamp.
    pub fn timestamp(&mut self) -> [u8; 8] {
        *self.timestamp.get_or_insert_with(|| get_ntlm_time().to_le_bytes())
    }

    pub fn lm_hash(&mut self) -> Result<[u8; 16], NtlmError> {
        if let Some(hash) = self.lm_hash {
            return Ok(hash);
        }
        let hash = lm_hash(self.password)?;
        Ok(*self.lm_hash.insert(hash))
    }

    pub fn lm_response(&mut self) -> Result<[u8; 24], NtlmError> {
        if let Some(response) = self.lm_response {
            return Ok(response);
        }
        let hash = self.lm_hash()?;
        let response = lm_response(&hash, &self.challenge)?;
        Ok(*self.lm_response.insert(response))
    }

    pub fn ntlm_hash(&mut self) -> [u8; 16] {
        let password = self.password;
        *self.ntlm_hash.get_or_insert_with(|| ntlm_hash(password))
    }

    pub fn ntlm_response(&mut self) -> Result<[u8; 24], NtlmError> {
        if let Some(response) = self.ntlm_response {
            return Ok(response);
        }
        self.check_nt_family()?;
        let hash = self.ntlm_hash();
        let response = lm_response(&hash, &self.challenge)?;
        Ok(*self.ntlm_response.insert(response))
    }

    pub fn ntlmv2_hash(&mut self) -> Result<[u8; 16], NtlmError> {
        if let Some(hash) = self.ntlmv2_hash {
            return Ok(hash);
        }
        let hash = ntlmv2_hash(self.target, self.user, self.password)?;
        Ok(*self.ntlmv2_hash.insert(hash))
    }

    pub fn ntlmv2_blob(&mut self) -> Result<Vec<u8>, NtlmError> {
        if let Some(blob) = &self.ntlmv2_blob {
            return Ok(blob.clone());
        }
        let client_challenge = self.client_challenge()?;
        let timestamp = self.timestamp();
        let blob = create_blob(&client_challenge, self.target_information, &timestamp);
        Ok(self.ntlmv2_blob.insert(blob).clone())
    }

    pub fn ntlmv2_response(&mut self) -> Result<Vec<u8>, NtlmError> {
        if let Some(response) = &self.ntlmv2_response {
            return Ok(response.clone());
        }
        self.check_nt_family()?;
        let hash = self.ntlmv2_hash()?;
        let blob = self.ntlmv2_blob()?;
        let response = lmv2_response(&hash, &self.challenge, &blob)?;
        Ok(self.ntlmv2_response.insert(response).clone())
    }

    pub fn lmv2_response(&mut self) -> Result<Vec<u8>, NtlmError> {
        if let Some(response) = &self.lmv2_response {
            return Ok(response.clone());
        }
        let hash = self.ntlmv2_hash()?;
        let client_challenge = self.client_challenge()?;
        let response = lmv2_response(&hash, &self.challenge, &client_challenge)?;
        Ok(self.lmv2_response.insert(response).clone())
    }

    pub fn ntlm2_session_response(&mut self) -> Result<[u8; 24], NtlmError> {
        if let Some(response) = self.ntlm2_session_response {
            return Ok(response);
        }
        self.check_nt_family()?;
        let hash = self.ntlm_hash();
        let client_challenge = self.client_challenge()?;
        let response = ntlm2_session_response(&hash, &self.challenge, &client_challenge)?;
        Ok(*self.ntlm2_session_response.insert(response))
    }

    /// The LM slot of an NTLM2 session response: the client challenge padded with zeroes.
    pub fn lm2_session_response(&mut self) -> Result<[u8; 24], NtlmError> {
        if let Some(response) = self.lm2_session_response {
            return Ok(response);
        }
        let mut response = [0u8; 24];
        response[..8].copy_from_slice(&self.client_challenge()?);
        Ok(*self.lm2_session_response.insert(response))
    }

    pub fn lm_user_session_key(&mut self) -> Result<[u8; 16], NtlmError> {
        if let Some(key) = self.lm_user_session_key {
            return Ok(key);
        }
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.lm_hash()?[..8]);
        Ok(*self.lm_user_session_key.insert(key))
    }

    pub fn ntlm_user_session_key(&mut self) -> [u8; 16] {
        if let Some(key) = self.ntlm_user_session_key {
            return key;
        }
        let key = Md4::digest(&self.ntlm_hash());
        *self.ntlm_user_session_key.insert(key)
    }

    pub fn ntlmv2_user_session_key(&mut self) -> Result<[u8; 16], NtlmError> {
        if let Some(key) = self.ntlmv2_user_session_key {
            return Ok(key);
        }
        let ntlmv2_hash = self.ntlmv2_hash()?;
        let blob = self.ntlmv2_blob()?;
        let partial = hmac_md5(&ntlmv2_hash, &[self.challenge.as_slice(), blob.as_slice()])?;
        let key = hmac_md5(&ntlmv2_hash, &[partial.as_slice()])?;
        Ok(*self.ntlmv2_user_session_key.insert(key))
    }

    pub fn ntlm2_session_response_user_session_key(&mut self) -> Result<[u8; 16], NtlmError> {
        if let Some(key) = self.ntlm2_session_response_user_session_key {
            return Ok(key);
        }
        let user_session_key = self.ntlm_user_session_key();
        let nonce = self.lm2_session_response()?;
        let key = hmac_md5(&user_session_key, &[self.challenge.as_slice(), nonce.as_slice()])?;
        Ok(*self.ntlm2_session_response_user_session_key.insert(key))
    }

    pub fn lan_manager_session_key(&mut self) -> Result<[u8; 16], NtlmError> {
        if let Some(key) = self.lan_manager_session_key {
            return Ok(key);
        }
        let hash = self.lm_hash()?;
        let response = self.lm_response()?;
        let key = lan_manager_session_key(&hash, &response)?;
        Ok(*self.lan_manager_session_key.insert(key))
    }
}
