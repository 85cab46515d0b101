//! API-key format and verification.
//!
//! New-format keys are `sk-{machineId}-{keyId}-{crc8}` where `crc8` is the
//! first 8 hex chars of `HMAC-SHA256(secret, machineId + keyId)`; machine
//! and key ids are dash-free. Legacy keys are `sk-{random8}` and can only be
//! validated against a machine named by the request path.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    Machine { machine_id: String, key_id: String },
    Legacy,
}

pub fn format_key(secret: &str, machine_id: &str, key_id: &str) -> String {
    format!(
        "sk-{machine_id}-{key_id}-{}",
        checksum(secret, machine_id, key_id)
    )
}

/// `None` means structurally invalid or checksum mismatch.
pub fn parse_key(secret: &str, key: &str) -> Option<ParsedKey> {
    let rest = key.strip_prefix("sk-")?;
    if rest.is_empty() {
        return None;
    }
    let parts: Vec<&str> = rest.split('-').collect();
    match parts.as_slice() {
        [machine_id, key_id, crc] => {
            if machine_id.is_empty() || key_id.is_empty() {
                return None;
            }
            if !constant_time_eq(crc, &checksum(secret, machine_id, key_id)) {
                return None;
            }
            Some(ParsedKey::Machine {
                machine_id: (*machine_id).to_string(),
                key_id: (*key_id).to_string(),
            })
        }
        [_single] => Some(ParsedKey::Legacy),
        _ => None,
    }
}

fn checksum(secret: &str, machine_id: &str, key_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(machine_id.as_bytes());
    mac.update(key_id.as_bytes());
    let digest = mac.finalize().into_bytes();
    hex::encode(&digest[..4])
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn format_then_parse_round_trips() {
        let key = format_key(SECRET, "m1abc", "k9");
        let parsed = parse_key(SECRET, &key).unwrap();
        assert_eq!(
            parsed,
            ParsedKey::Machine {
                machine_id: "m1abc".to_string(),
                key_id: "k9".to_string()
            }
        );
    }

    #[test]
    fn any_tampered_character_is_rejected() {
        let key = format_key(SECRET, "machine7", "key3");
        for i in 3..key.len() {
            let mut bytes = key.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(bytes).unwrap();
            if tampered == key {
                continue;
            }
            assert_eq!(parse_key(SECRET, &tampered), None, "index {i} accepted");
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let key = format_key(SECRET, "m", "k");
        assert_eq!(parse_key("other-secret", &key), None);
    }

    #[test]
    fn legacy_keys_parse_without_machine() {
        assert_eq!(parse_key(SECRET, "sk-a1b2c3d4"), Some(ParsedKey::Legacy));
        assert_eq!(parse_key(SECRET, "not-a-key"), None);
        assert_eq!(parse_key(SECRET, "sk-"), None);
    }
}
