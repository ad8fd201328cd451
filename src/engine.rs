//! The NTLM engine: turns credentials and a server challenge into handshake messages.


use std::sync::Arc;

use tracing::{debug, warn};

use crate::Flags;
use crate::cipher_gen::CipherGen;
use crate::crypto::rc4_encrypt;
use crate::error::NtlmError;
use crate::message::{Type1Message, Type2Message, Type3Message};
use crate::random::{OsRandom, RandomSource};


/// The responses and key chosen for an authenticate message.
struct Responses {
    lm_response: Vec<u8>,
    nt_response: Vec<u8>,
    user_session_key: [u8; 16],
}


/// Produces NTLM negotiate and authenticate messages.
///
/// The engine itself holds no per-handshake state and may be shared between concurrent handshakes;
/// every call to [`NtlmEngine::create_type3_message`] uses a fresh [`CipherGen`].
#[derive(Clone, Debug)]
pub struct NtlmEngine {
    random: Arc<dyn RandomSource>,
}
impl NtlmEngine {
    /// Creates an engine drawing its random values from the operating system.
    pub fn new() -> Self {
        Self::with_random_source(Arc::new(OsRandom))
    }

    /// Creates an engine drawing its random values from the given source.
    pub fn with_random_source(random: Arc<dyn RandomSource>) -> Self {
        Self {
            random,
        }
    }

    /// Creates the Base64-encoded negotiate message.
    pub fn create_type1_message(&self, domain: &str, host: &str) -> String {
        Type1Message::new(domain, host).to_base64()
    }

    /// Creates the Base64-encoded authenticate message answering the Base64-encoded challenge
    /// `type2`.
    pub fn create_type3_message(&self, user: &str, password: &str, domain: &str, host: &str, type2: &str) -> Result<String, NtlmError> {
        let challenge = Type2Message::from_base64(type2)?;
        let message = self.authenticate(user, password, domain, host, &challenge)?;
        Ok(message.to_base64()?)
    }

    /// Builds the authenticate message answering a decoded challenge.
    pub fn authenticate(&self, user: &str, password: &str, domain: &str, host: &str, challenge: &Type2Message) -> Result<Type3Message, NtlmError> {
        let mut gen = CipherGen::new(
            challenge.target.as_deref().unwrap_or(""),
            user,
            password,
            challenge.challenge,
            challenge.target_info.as_deref().unwrap_or(&[]),
            self.random.as_ref(),
        );
        build_type3(&mut gen, challenge, domain, host, user)
    }
}
impl Default for NtlmEngine {
    fn default() -> Self {
        Self::new()
    }
}


fn build_type3(gen: &mut CipherGen<'_>, challenge: &Type2Message, domain: &str, host: &str, user: &str) -> Result<Type3Message, NtlmError> {
    let flags = challenge.flags;
    let responses = match select_responses(gen, challenge) {
        Ok(r) => r,
        Err(NtlmError::Crypto(error)) => {
            warn!(%error, "NTLM response derivation failed; falling back to LM response only");
            lm_only_responses(gen, flags)?
        },
        Err(other) => return Err(other),
    };

    let session_key = if flags.contains(Flags::NEGOTIATE_KEY_EXCHANGE) {
        let secondary_key = gen.secondary_key()?;
        Some(rc4_encrypt(&responses.user_session_key, &secondary_key)?)
    } else {
        None
    };

    Ok(Type3Message::new(
        domain,
        host,
        user,
        responses.lm_response,
        responses.nt_response,
        flags,
        session_key,
    ))
}

/// Picks the strongest response family the server allows.
fn select_responses(gen: &mut CipherGen<'_>, challenge: &Type2Message) -> Result<Responses, NtlmError> {
    let flags = challenge.flags;
    let lan_manager_key = flags.contains(Flags::NEGOTIATE_LANMAN_KEY);

    if flags.contains(Flags::NEGOTIATE_TARGET_INFO) && challenge.target_info.is_some() && challenge.target.is_some() {
        debug!("responding with NTLMv2");
        let nt_response = gen.ntlmv2_response()?;
        let lm_response = gen.lmv2_response()?;
        let user_session_key = if lan_manager_key {
            gen.lan_manager_session_key()?
        } else {
            gen.ntlmv2_user_session_key()?
        };
        Ok(Responses { lm_response, nt_response, user_session_key })
    } else if flags.contains(Flags::NEGOTIATE_NTLM2_KEY) {
        debug!("responding with NTLM2 session response");
        let nt_response = gen.ntlm2_session_response()?.to_vec();
        let lm_response = gen.lm2_session_response()?.to_vec();
        let user_session_key = if lan_manager_key {
            gen.lan_manager_session_key()?
        } else {
            gen.ntlm2_session_response_user_session_key()?
        };
        Ok(Responses { lm_response, nt_response, user_session_key })
    } else {
        debug!("responding with NTLMv1");
        let nt_response = gen.ntlm_response()?.to_vec();
        let lm_response = gen.lm_response()?.to_vec();
        let user_session_key = if lan_manager_key {
            gen.lan_manager_session_key()?
        } else {
            gen.ntlm_user_session_key()
        };
        Ok(Responses { lm_response, nt_response, user_session_key })
    }
}

/// The degraded answer when the NTLM family cannot be computed: an LM response and no NT response.
fn lm_only_responses(gen: &mut CipherGen<'_>, flags: Flags) -> Result<Responses, NtlmError> {
    let lm_response = gen.lm_response()?.to_vec();
    let user_session_key = if flags.contains(Flags::NEGOTIATE_LANMAN_KEY) {
        gen.lan_manager_session_key()?
    } else {
        gen.lm_user_session_key()?
    };
    Ok(Responses {
        lm_response,
        nt_response: Vec::new(),
        user_session_key,
    })
}
