//! USM (User-based Security Model) authentication, RFC 3414.
//!
//! Encryption is out of scope; only the authentication half of USM — key
//! derivation, localization, and HMAC finalization — is implemented.

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use md5::Md5;
use once_cell::sync::Lazy;
use sha1::Sha1;

use crate::error::{Result, UsmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthProtocol {
    HmacMd5,
    HmacSha1,
}

impl AuthProtocol {
    fn digest_password(self, password: &[u8]) -> Vec<u8> {
        match self {
            AuthProtocol::HmacMd5 => digest_password::<Md5>(password),
            AuthProtocol::HmacSha1 => digest_password::<Sha1>(password),
        }
    }

    fn localize(self, key: &[u8], engine_id: &[u8]) -> Vec<u8> {
        match self {
            AuthProtocol::HmacMd5 => localize::<Md5>(key, engine_id),
            AuthProtocol::HmacSha1 => localize::<Sha1>(key, engine_id),
        }
    }

    fn mac(self, key: &[u8], message: &[u8]) -> Vec<u8> {
        match self {
            AuthProtocol::HmacMd5 => hmac_digest::<Md5>(key, message),
            AuthProtocol::HmacSha1 => hmac_digest::<Sha1>(key, message),
        }
    }
}

/// Cycles the password through 1,048,576 bytes fed into the digest
/// (RFC 3414 Algorithm A.2.1), finalizing to a 16/20-octet intermediate
/// key.
fn digest_password<D: digest::Digest + Clone>(password: &[u8]) -> Vec<u8> {
    const TOTAL: usize = 1_048_576;
    if password.is_empty() {
        // A zero-length password yields a defined, if useless, key rather
        // than dividing by zero below.
        return D::digest([]).to_vec();
    }
    let mut hasher = D::new();
    let mut produced = 0usize;
    let mut cursor = 0usize;
    let mut chunk = [0u8; 64];
    while produced < TOTAL {
        let take = TOTAL.saturating_sub(produced).min(64);
        for i in 0..take {
            chunk[i] = password[cursor % password.len()];
            cursor += 1;
        }
        hasher.update(&chunk[..take]);
        produced += take;
    }
    hasher.finalize().to_vec()
}

/// `localized = Digest(intermediate ‖ engineID ‖ intermediate)` (RFC 3414
/// Algorithm A.2.2).
fn localize<D: digest::Digest>(intermediate: &[u8], engine_id: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(intermediate);
    hasher.update(engine_id);
    hasher.update(intermediate);
    hasher.finalize().to_vec()
}

fn hmac_digest<D>(key: &[u8], message: &[u8]) -> Vec<u8>
where
    D: digest::Digest + digest::core_api::BlockSizeUser + Clone + digest::OutputSizeUser,
    Hmac<D>: Mac,
{
    let mut mac = <Hmac<D> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    password: String,
    engine_id: Vec<u8>,
    protocol: AuthProtocol,
}

static LOCALIZED_KEY_CACHE: Lazy<DashMap<CacheKey, Vec<u8>>> = Lazy::new(DashMap::new);

/// Computes (and caches) the localized authentication key for
/// `(password, engineID)`; repeated session creation is O(1) after the
/// first derivation.
pub fn localized_key(protocol: AuthProtocol, password: &str, engine_id: &[u8]) -> Vec<u8> {
    let cache_key = CacheKey {
        password: password.to_string(),
        engine_id: engine_id.to_vec(),
        protocol,
    };
    if let Some(existing) = LOCALIZED_KEY_CACHE.get(&cache_key) {
        return existing.clone();
    }
    let intermediate = protocol.digest_password(password.as_bytes());
    let localized = protocol.localize(&intermediate, engine_id);
    LOCALIZED_KEY_CACHE.insert(cache_key, localized.clone());
    localized
}

/// The authentication-parameters field is 12 octets regardless of the
/// underlying digest's native width (RFC 3414 §6.3.1).
pub const AUTH_PARAMETERS_LEN: usize = 12;

/// Finalizes an authenticated outbound message in place: `message` must
/// already carry a zero-filled 12-octet placeholder at
/// `auth_params_offset`; this computes the keyed digest over the whole
/// message with that placeholder present and writes the leading 12
/// octets back.
pub fn finalize_auth(
    protocol: AuthProtocol,
    key: &[u8],
    message: &mut [u8],
    auth_params_offset: usize,
) -> Result<()> {
    if message.len() < auth_params_offset + AUTH_PARAMETERS_LEN {
        return Err(crate::error::Error::ber("message too short for auth-parameters field"));
    }
    let digest = protocol.mac(key, message);
    message[auth_params_offset..auth_params_offset + AUTH_PARAMETERS_LEN]
        .copy_from_slice(&digest[..AUTH_PARAMETERS_LEN]);
    Ok(())
}

/// Verifies an inbound message's authentication-parameters field by
/// recomputing the digest with that field zeroed, per RFC 3414 §6.3.2.
pub fn verify_auth(
    protocol: AuthProtocol,
    key: &[u8],
    message: &[u8],
    auth_params_offset: usize,
    claimed: &[u8],
) -> Result<()> {
    if claimed.len() != AUTH_PARAMETERS_LEN {
        return Err(UsmError::WrongDigest.into());
    }
    let mut scratch = message.to_vec();
    if scratch.len() < auth_params_offset + AUTH_PARAMETERS_LEN {
        return Err(UsmError::WrongDigest.into());
    }
    scratch[auth_params_offset..auth_params_offset + AUTH_PARAMETERS_LEN].fill(0);
    let digest = protocol.mac(key, &scratch);
    if &digest[..AUTH_PARAMETERS_LEN] == claimed {
        Ok(())
    } else {
        Err(UsmError::WrongDigest.into())
    }
}

impl From<UsmError> for crate::error::Error {
    fn from(e: UsmError) -> Self {
        crate::error::Error::Usm(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_derivation_is_pure_function_of_password_and_engine_id() {
        let engine_id = [0x80, 0x00, 0x00, 0x00, 0x01];
        let k1 = localized_key(AuthProtocol::HmacMd5, "maplesyrup", &engine_id);
        let k2 = localized_key(AuthProtocol::HmacMd5, "maplesyrup", &engine_id);
        assert_eq!(k1, k2);
        let k3 = localized_key(AuthProtocol::HmacMd5, "othersecret", &engine_id);
        assert_ne!(k1, k3);
    }

    #[test]
    fn auth_finalize_then_verify_roundtrip() {
        let key = localized_key(AuthProtocol::HmacMd5, "maplesyrup", b"\x80\x00\x00\x00\x01");
        let mut message = vec![0u8; 40];
        message[10..22].fill(0);
        finalize_auth(AuthProtocol::HmacMd5, &key, &mut message, 10).unwrap();
        let claimed = message[10..22].to_vec();
        assert!(verify_auth(AuthProtocol::HmacMd5, &key, &message, 10, &claimed).is_ok());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let key = localized_key(AuthProtocol::HmacMd5, "maplesyrup", b"\x80\x00\x00\x00\x01");
        let mut message = vec![0u8; 40];
        finalize_auth(AuthProtocol::HmacMd5, &key, &mut message, 10).unwrap();
        let claimed = message[10..22].to_vec();
        message[30] ^= 0xFF;
        assert!(verify_auth(AuthProtocol::HmacMd5, &key, &message, 10, &claimed).is_err());
    }
}
