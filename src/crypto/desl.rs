//! DES as used by LanManager and NTLMv1.
//!
//! Both hash a password into 16 bytes and then use that hash as three 56-bit DES keys. Each 7-byte
//! fragment is stretched into an 8-byte DES key by spreading its bits over the upper seven bits of
//! every byte and setting the lowest bit to odd parity.


use cipher::{BlockEncrypt, KeyInit};
use cipher::generic_array::GenericArray;
use des::Des;

use crate::error::CryptoError;


/// Stretches a 56-bit key fragment into a 64-bit DES key with odd parity in every byte.
pub fn expand_des_key(key: &[u8; 7]) -> [u8; 8] {
    let mut material = [0u8; 8];
    material[0] = key[0];
    for i in 1..7 {
        material[i] = (key[i - 1] << (8 - i)) | (key[i] >> i);
    }
    material[7] = key[6] << 1;

    for b in material.iter_mut() {
        *b = with_odd_parity(*b);
    }
    material
}

/// Replaces the lowest bit of `b` so that the byte has an odd number of set bits.
fn with_odd_parity(b: u8) -> u8 {
    let upper = b & 0xFE;
    if upper.count_ones() % 2 == 0 {
        upper | 0x01
    } else {
        upper
    }
}

/// Encrypts a single 8-byte block with DES in ECB mode, keyed from a 7-byte fragment.
pub fn des_encrypt_block(key: &[u8; 7], block: [u8; 8]) -> Result<[u8; 8], CryptoError> {
    let key_material = expand_des_key(key);
    let des = Des::new_from_slice(&key_material)
        .or(Err(CryptoError::InvalidKeyLength { algorithm: "DES", length: key_material.len() }))?;

    let mut buf = GenericArray::from(block);
    des.encrypt_block(&mut buf);
    Ok(buf.into())
}

/// Performs the NTLMv1 DES encryption to calculate the response value to the challenge.
///
/// The 16-byte hash is zero-padded to 21 bytes and split into three 7-byte keys; each of them
/// encrypts the challenge and the three ciphertexts are concatenated.
pub fn des_long(hash: &[u8; 16], challenge: &[u8; 8]) -> Result<[u8; 24], CryptoError> {
    let mut key_bytes = [0u8; 21];
    key_bytes[..16].copy_from_slice(hash);

    let mut ret = [0u8; 24];
    for (key, out) in key_bytes.chunks_exact(7).zip(ret.chunks_exact_mut(8)) {
        let mut key7 = [0u8; 7];
        key7.copy_from_slice(key);
        out.copy_from_slice(&des_encrypt_block(&key7, *challenge)?);
    }
    Ok(ret)
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;
    use super::*;

    #[test]
    fn expand_known_keys() {
        assert_eq!(expand_des_key(&[0x00; 7]), hex!("0101010101010101"));
        assert_eq!(expand_des_key(&[0xFF; 7]), hex!("fefefefefefefefe"));
        // first half of the uppercased, padded "SecREt01"
        assert_eq!(expand_des_key(&hex!("53454352455430")), hex!("52a2516b252a5161"));
    }

    #[test]
    fn lm_response_davenport() {
        // LM hash of "SecREt01" against challenge 0x0123456789abcdef
        let lm_hash = hex!("ff3750bcc2b22412c2265b23734e0dac");
        let challenge = hex!("0123456789abcdef");
        assert_eq!(
            des_long(&lm_hash, &challenge).unwrap(),
            hex!("c337cd5cbd44fc9782a667af6d427c6de67c20c2d3e77c56"),
        );
    }

    proptest! {
        #[test]
        fn expanded_keys_have_odd_parity(key in any::<[u8; 7]>()) {
            for b in expand_des_key(&key) {
                prop_assert_eq!(b.count_ones() % 2, 1);
            }
        }

        #[test]
        fn des_long_is_deterministic(hash in any::<[u8; 16]>(), challenge in any::<[u8; 8]>()) {
            let first = des_long(&hash, &challenge).unwrap();
            let second = des_long(&hash, &challenge).unwrap();
            prop_assert_eq!(first.len(), 24);
            prop_assert_eq!(first, second);
        }
    }
}
