// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use sha2::{Digest, Sha256};

use crate::pbgc_core::{AGENT_BUNDLE_ID, AGENT_VERSION};

/// Raw platform identifiers as read from the hardware. These never leave
/// the process; everything derived from them goes through the hash below.
#[derive(Clone, Debug)]
pub struct HardwareInfo {
    pub hardware_uuid: String,
    pub serial_number: String,
}

/// Telemetry fields derived at startup. Raw serial and hardware UUID never
/// appear here; the device id is the only identity field and is one-way.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsPayload {
    pub device_id: String,
    pub bundle_path: String,
    pub profile_config_digest: Option<String>,
    pub json_config_digest: Option<String>,
    pub agent_version: String,
}

/// Fixed right-padding per serial length. Apple serials run 10-20 chars;
/// each length gets its own literal so the 8-4-4-4-12 layout always lands
/// exactly. Anything outside the table is flagged by the caller, not padded
/// by guesswork.
fn pad_suffix(len: usize) -> Option<&'static str> {
    match len {
        10 => Some("00-0000-0000-000000000000"),
        11 => Some("0-0000-0000-000000000000"),
        12 => Some("-0000-0000-000000000000"),
        13 => Some("000-0000-000000000000"),
        14 => Some("00-0000-000000000000"),
        15 => Some("0-0000-000000000000"),
        16 => Some("-0000-000000000000"),
        17 => Some("000-000000000000"),
        18 => Some("00-000000000000"),
        19 => Some("0-000000000000"),
        20 => Some("-000000000000"),
        _ => None,
    }
}

/// Spread the serial across UUID field positions: hyphens before source
/// indices 8, 12 and 16, then the per-length suffix. Returns None for
/// lengths the table does not cover.
pub fn pseudo_serial_uuid(serial: &str) -> Option<String> {
    let chars: Vec<char> = serial.chars().collect();
    let suffix = pad_suffix(chars.len())?;

    let mut out = String::with_capacity(36);
    for (index, ch) in chars.iter().enumerate() {
        if index == 8 || index == 12 || index == 16 {
            out.push('-');
        }
        out.push(*ch);
    }
    out.push_str(suffix);
    Some(out)
}

fn format_uuid_upper(bytes: &[u8]) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        hex::encode_upper(&bytes[0..4]),
        hex::encode_upper(&bytes[4..6]),
        hex::encode_upper(&bytes[6..8]),
        hex::encode_upper(&bytes[8..10]),
        hex::encode_upper(&bytes[10..16]),
    )
}

/// One-way device identity: SHA-256 over the agent namespace, the hardware
/// UUID and the pseudo-serial UUID; the first 16 digest bytes rendered as a
/// canonical uppercase UUID. Deterministic per device, not invertible.
pub fn derive_device_identity(hardware_uuid: &str, serial: &str) -> Option<String> {
    let pseudo = match pseudo_serial_uuid(serial) {
        Some(p) => p,
        None => {
            log::info!(
                "METRICS: serial length {} outside supported range, identity skipped",
                serial.chars().count()
            );
            return None;
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(AGENT_BUNDLE_ID.as_bytes());
    hasher.update(b":");
    hasher.update(hardware_uuid.as_bytes());
    hasher.update(pseudo.as_bytes());
    let digest = hasher.finalize();
    Some(format_uuid_upper(&digest[..16]))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Assemble the telemetry payload, or nothing when the serial fails the
/// plausibility gate (virtualized and test hosts report overlong serials).
pub fn build_metrics(
    hardware_uuid: &str,
    serial: &str,
    bundle_path: &str,
    profile_config: &[u8],
    json_config: &[u8],
) -> Option<MetricsPayload> {
    let device_id = derive_device_identity(hardware_uuid, serial)?;

    let payload = MetricsPayload {
        device_id,
        bundle_path: bundle_path.to_string(),
        profile_config_digest: if profile_config.is_empty() {
            None
        } else {
            Some(sha256_hex(profile_config))
        },
        json_config_digest: if json_config.is_empty() {
            None
        } else {
            Some(sha256_hex(json_config))
        },
        agent_version: AGENT_VERSION.to_string(),
    };
    log::debug!(
        "METRICS: device_id={} version={} bundle_path={}",
        payload.device_id,
        payload.agent_version,
        payload.bundle_path
    );
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pseudo_uuid_layout_all_supported_lengths() {
        for len in 10..=20usize {
            let serial: String = "ABCDEFGHJKLMNPQRSTUV".chars().take(len).collect();
            let uuid = pseudo_serial_uuid(&serial).unwrap();
            assert_eq!(uuid.len(), 36, "length {} gave {:?}", len, uuid);
            let groups: Vec<&str> = uuid.split('-').collect();
            let group_lens: Vec<usize> = groups.iter().map(|g| g.len()).collect();
            assert_eq!(group_lens, vec![8, 4, 4, 4, 12], "length {} gave {:?}", len, uuid);
        }
    }

    #[test]
    fn test_pseudo_uuid_exact_padding() {
        assert_eq!(
            pseudo_serial_uuid("C02ABCD123").unwrap(),
            "C02ABCD1-2300-0000-0000-000000000000"
        );
        assert_eq!(
            pseudo_serial_uuid("C02ABCD1234").unwrap(),
            "C02ABCD1-2340-0000-0000-000000000000"
        );
        assert_eq!(
            pseudo_serial_uuid("C02ABCD12345QRSTUVWX").unwrap(),
            "C02ABCD1-2345-QRST-UVWX-000000000000"
        );
    }

    #[test]
    fn test_pseudo_uuid_flags_unsupported_lengths() {
        assert_eq!(pseudo_serial_uuid("SHORT"), None);
        assert_eq!(pseudo_serial_uuid("C02ABCD12"), None); // 9
        assert_eq!(pseudo_serial_uuid("C02ABCD12345QRSTUVWXY"), None); // 21
        assert_eq!(pseudo_serial_uuid(""), None);
    }

    #[test]
    fn test_device_identity_eleven_char_serial() {
        let hw = "11111111-2222-3333-4444-555555555555";
        let serial = "C02ABCD1234";
        let id = derive_device_identity(hw, serial).unwrap();
        assert_eq!(id.len(), 36);
        // Canonical layout, uppercase hex only.
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(groups.iter().map(|g| g.len()).collect::<Vec<_>>(), vec![8, 4, 4, 4, 12]);
        assert!(id
            .chars()
            .all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_uppercase()));
        // Stable across calls, opaque with respect to both inputs.
        assert_eq!(derive_device_identity(hw, serial).unwrap(), id);
        assert!(!id.contains(serial));
        assert!(!id.contains(hw));
    }

    #[test]
    fn test_device_identity_varies_with_inputs() {
        let hw = "11111111-2222-3333-4444-555555555555";
        let a = derive_device_identity(hw, "C02ABCD1234").unwrap();
        let b = derive_device_identity(hw, "C02ABCD1235").unwrap();
        let c = derive_device_identity("66666666-7777-8888-9999-000000000000", "C02ABCD1234").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_metrics_gate_on_implausible_serial() {
        let hw = "11111111-2222-3333-4444-555555555555";
        assert!(build_metrics(hw, "C02ABCD12345QRSTUVWXY", "/tmp/pb", b"", b"").is_none());
        assert!(build_metrics(hw, "TINY", "/tmp/pb", b"", b"").is_none());
    }

    #[test]
    fn test_metrics_digests_follow_sources() {
        let hw = "11111111-2222-3333-4444-555555555555";
        let payload = build_metrics(hw, "C02ABCD1234", "/Applications/PatchBoard.app", b"{}", b"").unwrap();
        assert_eq!(payload.profile_config_digest, Some(sha256_hex(b"{}")));
        assert_eq!(payload.json_config_digest, None);
        assert_eq!(payload.agent_version, AGENT_VERSION);
    }
}
