//! Encrypted backup export/import for a single user record.
//!
//! The artifact is one self-contained text string:
//!
//! ```text
//! base64url(16-byte IV ‖ ciphertext) + "|" + hex(HMAC-SHA256 tag, uppercase)
//! ```
//!
//! The cipher is a private-key obfuscation scheme with a hard-coded
//! application secret, not a vetted construction: the session key is a
//! digest of secret ‖ IV ‖ salt, and the key stream is produced by
//! re-hashing that key with an incrementing block counter, 32 bytes at a
//! time, XORed over the plaintext. Integrity rests entirely on the HMAC
//! tag; confidentiality is weak by design since the secret ships inside the
//! application. Do not swap in a different cryptosystem without treating it
//! as a format break.
//!
//! Import fails closed: any framing, tag, or deserialization problem yields
//! an error and never partial data.

use crate::errors::{PetError, Result};
use crate::store::types::UserRecord;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SECRET: &[u8] = b"PixelPet_Secret_Key_For_Obfuscation";
const SALT: &[u8] = b"PixelPet_Backup_Salt_v1";
const IV_LEN: usize = 16;

/// The unit of export: the record plus the username it belongs to, which
/// the store keeps as the map key rather than inside the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPayload {
    pub username: String,
    #[serde(flatten)]
    pub record: UserRecord,
}

/// Session key for one artifact: SHA-256(secret ‖ IV ‖ salt).
fn derive_key(iv: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SECRET);
    hasher.update(iv);
    hasher.update(SALT);
    hasher.finalize().into()
}

/// XOR stream cipher. The key stream block is refreshed every 32 bytes as
/// SHA-256(previous block ‖ decimal block counter). Symmetric: applying it
/// twice restores the input.
fn xor_stream(data: &mut [u8], key: &[u8; 32]) {
    let mut block: [u8; 32] = *key;
    let mut block_idx: u64 = 0;
    for (i, byte) in data.iter_mut().enumerate() {
        if i % 32 == 0 {
            let mut hasher = Sha256::new();
            hasher.update(block);
            hasher.update(block_idx.to_string().as_bytes());
            block = hasher.finalize().into();
            block_idx += 1;
        }
        *byte ^= block[i % 32];
    }
}

/// HMAC-SHA256 over IV ‖ ciphertext, keyed with the fixed salt.
fn integrity_tag(payload: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(SALT).expect("hmac accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().into()
}

/// Serialize, encrypt, and sign one user record into a transport string.
pub fn export_backup(username: &str, record: &UserRecord) -> Result<String> {
    let payload = BackupPayload {
        username: username.to_string(),
        record: record.clone(),
    };
    let mut body = serde_json::to_vec(&payload)?;

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = derive_key(&iv);
    xor_stream(&mut body, &key);

    let mut framed = Vec::with_capacity(IV_LEN + body.len());
    framed.extend_from_slice(&iv);
    framed.extend_from_slice(&body);

    let tag = integrity_tag(&framed);
    Ok(format!(
        "{}|{}",
        URL_SAFE.encode(&framed),
        hex::encode_upper(tag)
    ))
}

/// Verify and decrypt a backup artifact back into its payload.
///
/// The tag is hex-decoded and compared against the recomputed digest bytes
/// in constant time; no case transform touches the comparison path.
pub fn import_backup(content: &str) -> Result<BackupPayload> {
    let trimmed = content.trim();
    let mut parts = trimmed.split('|');
    let (encoded, tag_hex) = match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => (a, b),
        _ => return Err(PetError::Validation("malformed backup artifact".into())),
    };

    let framed = URL_SAFE
        .decode(encoded.as_bytes())
        .map_err(|_| PetError::Validation("malformed backup artifact".into()))?;
    if framed.len() < IV_LEN {
        return Err(PetError::Validation("malformed backup artifact".into()));
    }

    let supplied = hex::decode(tag_hex).map_err(|_| PetError::Integrity)?;
    let expected = integrity_tag(&framed);
    if supplied.as_slice().ct_eq(&expected[..]).unwrap_u8() != 1 {
        return Err(PetError::Integrity);
    }

    let (iv, ciphertext) = framed.split_at(IV_LEN);
    let key = derive_key(iv);
    let mut body = ciphertext.to_vec();
    xor_stream(&mut body, &key);

    serde_json::from_slice(&body)
        .map_err(|_| PetError::Validation("backup payload did not deserialize".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    fn sample_record() -> UserRecord {
        let mut record = UserRecord::new("digest".into(), "q?".into(), "a!".into());
        record.total_run_time = 3600;
        record.inventory.insert("Carrot".into(), 2);
        record.used_transfer_keys.insert("TR-abc-DEF123".into());
        record.settings.insert("warm_greetings".into(), json!(true));
        record
    }

    #[test]
    fn export_import_round_trips() {
        let record = sample_record();
        let artifact = export_backup("alice", &record).unwrap();
        let back = import_backup(&artifact).unwrap();
        assert_eq!(back.username, "alice");
        assert_eq!(back.record, record);
    }

    #[test]
    fn artifact_has_the_documented_shape() {
        let artifact = export_backup("alice", &sample_record()).unwrap();
        let (payload, tag) = artifact.split_once('|').unwrap();
        assert!(tag.len() == 64);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert!(URL_SAFE.decode(payload).unwrap().len() > IV_LEN);
    }

    #[test]
    fn fresh_ivs_give_distinct_artifacts() {
        let record = sample_record();
        let a = export_backup("alice", &record).unwrap();
        let b = export_backup("alice", &record).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn any_single_byte_flip_is_rejected() {
        let artifact = export_backup("alice", &sample_record()).unwrap();
        let sep = artifact.find('|').unwrap();
        for i in 0..artifact.len() {
            let mut bytes = artifact.clone().into_bytes();
            // Stay within each segment's alphabet so the failure exercised
            // is the integrity check, not just decoding.
            bytes[i] = if i < sep {
                if bytes[i] == b'A' { b'B' } else { b'A' }
            } else if i == sep {
                b'!'
            } else if bytes[i] == b'0' {
                b'1'
            } else {
                b'0'
            };
            let tampered = String::from_utf8(bytes).unwrap();
            if tampered == artifact {
                continue;
            }
            assert!(
                import_backup(&tampered).is_err(),
                "tampered byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn tag_mismatch_reports_integrity_kind() {
        let artifact = export_backup("alice", &sample_record()).unwrap();
        let (payload, _) = artifact.split_once('|').unwrap();
        let forged = format!("{}|{}", payload, "0".repeat(64));
        assert_eq!(import_backup(&forged).unwrap_err().kind(), ErrorKind::Integrity);
    }

    #[test]
    fn framing_problems_fail_closed() {
        assert!(import_backup("").is_err());
        assert!(import_backup("no-separator").is_err());
        assert!(import_backup("a|b|c").is_err());
        assert!(import_backup("%%%|ABCD").is_err());
        // Valid base64 but shorter than one IV.
        let short = format!("{}|{}", URL_SAFE.encode(b"tiny"), "0".repeat(64));
        assert!(import_backup(&short).is_err());
    }
}
