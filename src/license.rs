//! Unlock-key and transfer-token issuer/verifier.
//!
//! Both schemes are deterministic HMAC-SHA256 constructions over a fixed
//! application secret. They are stateless: replay protection for transfer
//! tokens lives in the store's per-user used-key set
//! ([`crate::store::Store::redeem_transfer_key`]), which callers must hit
//! before crediting.
//!
//! Formats:
//! - unlock key: `XXXX-XXXX-XXXX` (12 uppercase hex chars, grouped)
//! - transfer token: `TR-<base64url-no-pad payload>-<12-hex-char tag>`,
//!   payload `v1|from|to|seconds|issuedAtEpoch`

use crate::errors::{PetError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

// Embedded in the distributed binary, so only obfuscation, not secrecy.
const SECRET: &[u8] = b"Pixel_Pet_2026_Super_Secret_Salt_Key_#9981";

const TRANSFER_PREFIX: &str = "TR-";
const TRANSFER_VERSION: &str = "v1";
/// Tag length in hex characters for both schemes.
const TAG_HEX_LEN: usize = 12;

/// A verified transfer token, parsed back into its claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferGrant {
    pub from: String,
    pub to: String,
    pub seconds: u64,
    pub issued_at: i64,
    /// The exact token string, for the store's used-key bookkeeping.
    pub raw: String,
}

fn mac_bytes(data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(SECRET).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Constant-time check of a hex tag (any case) against the leading bytes of
/// a digest. The candidate is hex-decoded rather than case-folded, so no
/// case transform sits on the comparison path.
fn tag_matches(candidate: &str, digest: &[u8; 32]) -> bool {
    if candidate.len() != TAG_HEX_LEN {
        return false;
    }
    match hex::decode(candidate) {
        Ok(raw) => raw.as_slice().ct_eq(&digest[..TAG_HEX_LEN / 2]).unwrap_u8() == 1,
        Err(_) => false,
    }
}

/// Derive the unlock key for one (user, pet) pair: the first 12 uppercase
/// hex characters of HMAC(secret, `username|petId`), grouped 4-4-4.
/// Deterministic, so an administrator can issue keys offline.
pub fn generate_unlock_key(username: &str, pet_id: &str) -> String {
    let data = format!("{}|{}", username.trim(), pet_id.trim());
    let digest = hex::encode_upper(mac_bytes(data.as_bytes()));
    let raw = &digest[..TAG_HEX_LEN];
    format!("{}-{}-{}", &raw[..4], &raw[4..8], &raw[8..])
}

/// Check a user-supplied unlock key. Input is normalized (trimmed,
/// upper-cased, hyphens stripped) and compared against the freshly
/// regenerated key in constant time.
pub fn verify_unlock_key(username: &str, pet_id: &str, candidate: &str) -> bool {
    let cleaned: String = candidate
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.is_empty() {
        return false;
    }
    let expected: String = generate_unlock_key(username, pet_id)
        .chars()
        .filter(|c| *c != '-')
        .collect();
    cleaned.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1
}

/// Issue a signed transfer token moving `seconds` of run time from one
/// account to another. The caller is responsible for debiting the sender
/// before handing the token out.
pub fn generate_transfer_key(from: &str, to: &str, seconds: u64) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}",
        TRANSFER_VERSION,
        from.trim(),
        to.trim(),
        seconds,
        Utc::now().timestamp()
    );
    let encoded = URL_SAFE_NO_PAD.encode(payload.as_bytes());
    let digest = hex::encode_upper(mac_bytes(encoded.as_bytes()));
    format!("{}{}-{}", TRANSFER_PREFIX, encoded, &digest[..TAG_HEX_LEN])
}

/// Verify a transfer token and parse its claims.
///
/// Fails closed on: missing prefix, bad framing, tag mismatch, version
/// mismatch, recipient or sender not exactly matching the expected
/// accounts, or non-positive seconds. The verifier does not consult the
/// used-key set; single-use semantics belong to the store.
pub fn verify_transfer_key(
    expected_to: &str,
    expected_from: &str,
    token: &str,
) -> Result<TransferGrant> {
    let token = token.trim();
    if token.is_empty() || expected_to.trim().is_empty() || expected_from.trim().is_empty() {
        return Err(PetError::Validation("malformed transfer key".into()));
    }
    let rest = token
        .strip_prefix(TRANSFER_PREFIX)
        .ok_or_else(|| PetError::Validation("malformed transfer key".into()))?;
    // The tag sits after the last hyphen; the base64url payload may itself
    // contain hyphens.
    let (encoded, tag) = rest
        .rsplit_once('-')
        .ok_or_else(|| PetError::Validation("malformed transfer key".into()))?;
    if encoded.is_empty() {
        return Err(PetError::Validation("malformed transfer key".into()));
    }

    let digest = mac_bytes(encoded.as_bytes());
    if !tag_matches(tag, &digest) {
        return Err(PetError::Integrity);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|_| PetError::Validation("malformed transfer key".into()))?;
    let payload =
        String::from_utf8(payload).map_err(|_| PetError::Validation("malformed transfer key".into()))?;

    let parts: Vec<&str> = payload.split('|').collect();
    if parts.len() != 5 || parts[0] != TRANSFER_VERSION {
        return Err(PetError::Validation("unsupported transfer key".into()));
    }
    let (from, to) = (parts[1], parts[2]);
    let seconds: u64 = parts[3]
        .parse()
        .map_err(|_| PetError::Validation("malformed transfer key".into()))?;
    let issued_at: i64 = parts[4]
        .parse()
        .map_err(|_| PetError::Validation("malformed transfer key".into()))?;

    if to != expected_to.trim() {
        return Err(PetError::Validation("transfer key is for another recipient".into()));
    }
    if from != expected_from.trim() {
        return Err(PetError::Validation("transfer key is from another sender".into()));
    }
    if seconds == 0 {
        return Err(PetError::Validation("transfer key carries no time".into()));
    }

    Ok(TransferGrant {
        from: from.to_string(),
        to: to.to_string(),
        seconds,
        issued_at,
        raw: token.to_string(),
    })
}
