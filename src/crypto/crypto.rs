// SPDX-License-Identifier: GPL-2.0-or-later

//! Pure cryptographic primitives used by the core: symmetric encryption of
//! camera passwords at rest, and signing/verifying bearer tokens. Neither
//! function touches the network or the store — authentication itself is an
//! external-gateway concern (spec §9 open question); this crate only gives
//! the gateway something to call.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::{time::UnixNano, Duration, EncryptionKey, Principal};
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN},
    hmac,
    rand::{SecureRandom, SystemRandom},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("generate nonce: {0}")]
    GenerateNonce(ring::error::Unspecified),

    #[error("bad key")]
    BadKey,

    #[error("seal: {0}")]
    Seal(ring::error::Unspecified),
}

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("ciphertext too short")]
    TooShort,

    #[error("bad key")]
    BadKey,

    #[error("open: authentication failed")]
    Open(ring::error::Unspecified),

    #[error("decrypted bytes are not valid utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),
}

fn aead_key(key: &EncryptionKey) -> Result<LessSafeKey, ()> {
    let unbound = UnboundKey::new(&AES_256_GCM, key.as_ref()).map_err(|_| ())?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypts `plaintext` (e.g. a camera password) with `key`, returning
/// `nonce || ciphertext || tag`. Each call uses a fresh random nonce.
pub fn encrypt(key: &EncryptionKey, plaintext: &str) -> Result<Vec<u8>, EncryptError> {
    let key = aead_key(key).map_err(|()| EncryptError::BadKey)?;

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(EncryptError::GenerateNonce)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(EncryptError::Seal)?;

    let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Inverse of [`encrypt`].
pub fn decrypt(key: &EncryptionKey, ciphertext: &[u8]) -> Result<String, DecryptError> {
    if ciphertext.len() < NONCE_LEN {
        return Err(DecryptError::TooShort);
    }
    let key = aead_key(key).map_err(|()| DecryptError::BadKey)?;

    let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| DecryptError::TooShort)?;

    let mut in_out = sealed.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(DecryptError::Open)?;

    Ok(std::str::from_utf8(plaintext)?.to_owned())
}

const TOKEN_SEPARATOR: char = '.';

#[derive(Debug, Error)]
pub enum VerifyTokenError {
    #[error("malformed token")]
    Malformed,

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// Issues a bearer token binding `principal` for `ttl`, HMAC-signed with
/// `key`. Format: `base64url(principal|expiryNanos).base64url(tag)`.
#[must_use]
pub fn issue_token(key: &EncryptionKey, principal: &Principal, ttl: Duration) -> String {
    let expiry = UnixNano::now().add_duration(ttl).unwrap_or(UnixNano::MAX);
    let payload = format!("{}|{}", principal.as_str(), *expiry);
    let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);

    let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, key.as_ref());
    let tag = hmac::sign(&hmac_key, payload_b64.as_bytes());
    let tag_b64 = URL_SAFE_NO_PAD.encode(tag.as_ref());

    format!("{payload_b64}{TOKEN_SEPARATOR}{tag_b64}")
}

/// Verifies a token issued by [`issue_token`], returning its principal if
/// the signature is valid and the token has not expired.
pub fn verify_token(key: &EncryptionKey, token: &str) -> Result<Principal, VerifyTokenError> {
    let (payload_b64, tag_b64) = token
        .split_once(TOKEN_SEPARATOR)
        .ok_or(VerifyTokenError::Malformed)?;

    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|_| VerifyTokenError::Malformed)?;

    let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, key.as_ref());
    hmac::verify(&hmac_key, payload_b64.as_bytes(), &tag).map_err(|_| VerifyTokenError::BadSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| VerifyTokenError::Malformed)?;
    let payload = String::from_utf8(payload).map_err(|_| VerifyTokenError::Malformed)?;
    let (principal, expiry) = payload.split_once('|').ok_or(VerifyTokenError::Malformed)?;
    let expiry: i64 = expiry.parse().map_err(|_| VerifyTokenError::Malformed)?;

    if UnixNano::now().after(UnixNano::from(expiry)) {
        return Err(VerifyTokenError::Expired);
    }

    Ok(Principal::new(principal))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_key() -> EncryptionKey {
        EncryptionKey::try_from("11".repeat(32).as_str()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let ciphertext = encrypt(&key, "hunter2").unwrap();
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), "hunter2");
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let key = test_key();
        let other_key = EncryptionKey::try_from("22".repeat(32).as_str()).unwrap();
        let ciphertext = encrypt(&key, "hunter2").unwrap();
        assert!(decrypt(&other_key, &ciphertext).is_err());
    }

    #[test]
    fn test_encrypt_is_nondeterministic() {
        let key = test_key();
        let a = encrypt(&key, "hunter2").unwrap();
        let b = encrypt(&key, "hunter2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_issue_verify_token_roundtrip() {
        let key = test_key();
        let principal = Principal::new("alice");
        let token = issue_token(&key, &principal, Duration::from_hours(1));
        assert_eq!(verify_token(&key, &token).unwrap(), principal);
    }

    #[test]
    fn test_verify_token_expired() {
        let key = test_key();
        let principal = Principal::new("alice");
        let token = issue_token(&key, &principal, Duration::from_secs(-1));
        assert!(matches!(
            verify_token(&key, &token),
            Err(VerifyTokenError::Expired)
        ));
    }

    #[test]
    fn test_verify_token_bad_signature() {
        let key = test_key();
        let other_key = EncryptionKey::try_from("22".repeat(32).as_str()).unwrap();
        let token = issue_token(&key, &Principal::new("alice"), Duration::from_hours(1));
        assert!(matches!(
            verify_token(&other_key, &token),
            Err(VerifyTokenError::BadSignature)
        ));
    }

    #[test]
    fn test_verify_token_malformed() {
        let key = test_key();
        assert!(matches!(
            verify_token(&key, "not-a-token"),
            Err(VerifyTokenError::Malformed)
        ));
    }
}
