//! Byte-level transforms of the Classbox licensing exchange.
//!
//! The platform hides its CDN grant and its content key behind a fixed-key
//! AES layer plus XOR/Base64/hex round trips. Everything here is pure; the
//! network flow lives in [crate::license].

use std::sync::LazyLock;

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::error::{ClassboxError, ClassboxResult};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Key and IV the platform web player ships for the policy layer.
pub const POLICY_KEY: &[u8; 16] = b"638f2a5d41c09b7e";
pub const POLICY_IV: &[u8; 16] = b"0f1e2d3c4b5a6978";

static BASE64: LazyLock<GeneralPurpose> = LazyLock::new(|| {
    GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
    )
});

/// Decrypt one value of the policy triple.
///
/// The ciphertext is Base64 over AES-128-CBC under [POLICY_KEY]. Padding is
/// removed the way the platform client does it: read the last byte and drop
/// that many bytes from the tail, without checking the padding bytes.
pub fn decrypt_policy_value(value: &str) -> ClassboxResult<String> {
    let cipher = BASE64.decode(value)?;
    if cipher.is_empty() || cipher.len() % 16 != 0 {
        return Err(ClassboxError::PolicyCipherLength(cipher.len()));
    }

    let decryptor = Aes128CbcDec::new(POLICY_KEY.into(), POLICY_IV.into());
    let plain = decryptor.decrypt_padded_vec_mut::<NoPadding>(&cipher)?;
    let plain = trim_tail_padding(&plain);
    Ok(String::from_utf8(plain.to_vec())?)
}

fn trim_tail_padding(data: &[u8]) -> &[u8] {
    match data.last() {
        Some(&pad) if (pad as usize) <= data.len() => &data[..data.len() - pad as usize],
        _ => data,
    }
}

/// XOR `data` against `key` repeated to length. The transform is its own
/// inverse.
pub fn xor_cycle(data: &[u8], key: &[u8]) -> Vec<u8> {
    debug_assert!(!key.is_empty());
    data.iter()
        .zip(key.iter().cycle())
        .map(|(byte, key_byte)| byte ^ key_byte)
        .collect()
}

/// Insert the ASCII digit `0` before the string and after every character
/// pair: `74ab` becomes `0740ab0`.
pub fn interleave_zeros(hex: &str) -> String {
    let mut out = String::with_capacity(1 + hex.len() + hex.len() / 2);
    out.push('0');
    for (i, c) in hex.chars().enumerate() {
        out.push(c);
        if i % 2 == 1 {
            out.push('0');
        }
    }
    out
}

/// Inverse of [interleave_zeros] for even-length input.
pub fn strip_interleaved_zeros(encoded: &str) -> String {
    encoded
        .chars()
        .skip(1)
        .enumerate()
        .filter(|(i, _)| i % 3 != 2)
        .map(|(_, c)| c)
        .collect()
}

/// Derive the obfuscated `key` parameter of the OTP endpoint from the
/// manifest KID and the session token.
///
/// KID bytes are XORed with the token, Base64 encoded, hex encoded and
/// interleaved, yielding a plain `[0-9a-f]` string that travels safely in a
/// query parameter.
pub fn encode_otp_key(kid: &str, token: &str) -> String {
    let xored = xor_cycle(kid.as_bytes(), token.as_bytes());
    let encoded = BASE64.encode(xored);
    interleave_zeros(&hex::encode(encoded))
}

/// Recover the content key from an OTP payload: Base64 decode, then XOR
/// with the session token.
pub fn decode_otp(otp: &str, token: &str) -> ClassboxResult<String> {
    let raw = BASE64.decode(otp)?;
    let key = xor_cycle(&raw, token.as_bytes());
    Ok(String::from_utf8(key)?)
}
