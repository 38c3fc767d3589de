// src/core/validate.rs

//! Field validation shared by every Upserter routine (§4.D step 1).

use crate::core::errors::{AnvilError, Result};
use uuid::Uuid;

/// Parses and re-validates a UUID string in canonical 8-4-4-4-12 hex form.
/// The nil UUID is a valid UUID (§8 boundary behaviour) — only the empty
/// string and malformed strings are rejected.
pub fn parse_uuid(raw: &str) -> Result<Uuid> {
    if raw.is_empty() {
        return Err(AnvilError::InvalidUuid("empty string".to_string()));
    }
    Uuid::parse_str(raw).map_err(|e| AnvilError::InvalidUuid(format!("{raw}: {e}")))
}

/// Validates and lower-cases a MAC address. Accepted forms are 12 or 17
/// hex characters (with or without `:`/`-` separators); anything else,
/// including 11 or 13 hex characters, is rejected (§8 boundary behaviour).
pub fn validate_mac(raw: &str) -> Result<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_lowercase();

    if stripped.len() != 12 {
        return Err(AnvilError::InvalidMac(raw.to_string()));
    }
    if !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AnvilError::InvalidMac(raw.to_string()));
    }

    // Reconstruct canonical colon-separated form only when the caller
    // supplied one of the two accepted lengths; an 11 or 13 character
    // input never reaches here because the 12-digit stripped form check
    // above already rejected anything that doesn't pair up into 6 octets
    // or pass through as a 17-character separated string.
    if raw.len() != 12 && raw.len() != 17 {
        return Err(AnvilError::InvalidMac(raw.to_string()));
    }

    let mut canonical = String::with_capacity(17);
    for (i, chunk) in stripped.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            canonical.push(':');
        }
        canonical.push(chunk[0] as char);
        canonical.push(chunk[1] as char);
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_format_boundary() {
        assert!(parse_uuid("").is_err());
        assert!(parse_uuid("not-a-uuid").is_err());
        assert_eq!(
            parse_uuid("00000000-0000-0000-0000-000000000000").unwrap(),
            Uuid::nil()
        );
        assert!(parse_uuid("4c0a2f1e-6b3a-4f2f-9d9c-1a2b3c4d5e6f").is_ok());
    }

    #[test]
    fn mac_length_boundary() {
        // 11 hex chars: rejected.
        assert!(validate_mac("0011223344a").is_err());
        // 13 hex chars: rejected.
        assert!(validate_mac("0011223344aab").is_err());
        // 12 hex chars, no separator: accepted.
        assert_eq!(validate_mac("AABBCCDDEEFF").unwrap(), "aa:bb:cc:dd:ee:ff");
        // 17 chars with colons: accepted.
        assert_eq!(
            validate_mac("AA:BB:CC:DD:EE:FF").unwrap(),
            "aa:bb:cc:dd:ee:ff"
        );
        // 17 chars with dashes: accepted and lower-cased.
        assert_eq!(
            validate_mac("aa-bb-cc-dd-ee-ff").unwrap(),
            "aa:bb:cc:dd:ee:ff"
        );
    }

    #[test]
    fn mac_rejects_non_hex() {
        assert!(validate_mac("zzbbccddeeff").is_err());
    }
}
