//! Runtime scan configuration.
//!
//! Every key is read once at stage start; `sanitized` applies the breadth
//! mask and depth clamp so the stages never have to re-validate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::ParseIntError;

/// Hard cap on descent depth regardless of configuration.
pub const MAX_SCAN_DEPTH: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Minimum chain length for dynamic list detection
    pub min_chain_length: usize,
    /// Tightened minimum for the static pass, where ghost bridging makes
    /// short chains unreliable
    pub static_min_chain_length: usize,
    /// Ghost budget per chain in the static pass (the dynamic pass always
    /// runs with 0)
    pub max_ghost_nodes: usize,
    /// Upper bound of the forward-scan offset space; accepts hex strings
    /// ("0xFFC") or integers, masked to 4-byte alignment
    #[serde(with = "hex_u32")]
    pub max_breadth: u32,
    /// Descent depth budget, clamped to 1..=20
    pub max_depth: usize,
    /// Discard leftover same-value nodes after static detection instead of
    /// promoting them to base-pointer candidates
    pub skip_sticky_pointers: bool,
    /// Stop the scan after the first base pointer that produced a finding
    pub early_out_base_pointer: bool,
    /// Stop the scan after the first base pointer that reached a target
    pub early_out_target: bool,
    /// Range indices the scan is allowed to start from
    pub enabled_ranges: BTreeSet<usize>,
    /// Base-pointer count in range 0 above which ingest emits a slow-scan
    /// warning
    pub warn_base_pointer_threshold: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_chain_length: 5,
            static_min_chain_length: 15,
            max_ghost_nodes: 10,
            max_breadth: 0xFFC,
            max_depth: 12,
            skip_sticky_pointers: true,
            early_out_base_pointer: false,
            early_out_target: false,
            enabled_ranges: BTreeSet::from([0]),
            warn_base_pointer_threshold: 50_000,
        }
    }
}

impl ScanConfig {
    /// Apply the alignment mask and depth clamp
    pub fn sanitized(mut self) -> Self {
        self.max_breadth &= !3;
        self.max_depth = self.max_depth.clamp(1, MAX_SCAN_DEPTH);
        self
    }
}

/// Parse a hex address/offset with or without a `0x` prefix
pub fn parse_hex(text: &str) -> std::result::Result<u32, ParseIntError> {
    let trimmed = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(trimmed, 16)
}

mod hex_u32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{:X}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Text(text) => super::parse_hex(&text).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.min_chain_length, 5);
        assert_eq!(config.static_min_chain_length, 15);
        assert_eq!(config.max_breadth, 0xFFC);
        assert_eq!(config.max_depth, 12);
        assert!(config.skip_sticky_pointers);
        assert!(config.enabled_ranges.contains(&0));
    }

    #[test]
    fn test_sanitized_masks_breadth_and_clamps_depth() {
        let config = ScanConfig {
            max_breadth: 0xFFF,
            max_depth: 99,
            ..ScanConfig::default()
        }
        .sanitized();
        assert_eq!(config.max_breadth, 0xFFC);
        assert_eq!(config.max_depth, MAX_SCAN_DEPTH);

        let config = ScanConfig {
            max_depth: 0,
            ..ScanConfig::default()
        }
        .sanitized();
        assert_eq!(config.max_depth, 1);
    }

    #[test]
    fn test_breadth_accepts_hex_string_and_integer() {
        let config: ScanConfig = serde_json::from_str(r#"{"max_breadth": "0xFFC"}"#).unwrap();
        assert_eq!(config.max_breadth, 0xFFC);

        let config: ScanConfig = serde_json::from_str(r#"{"max_breadth": 128}"#).unwrap();
        assert_eq!(config.max_breadth, 128);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x80000100").unwrap(), 0x8000_0100);
        assert_eq!(parse_hex("FFC").unwrap(), 0xFFC);
        assert!(parse_hex("0xZZ").is_err());
    }
}
