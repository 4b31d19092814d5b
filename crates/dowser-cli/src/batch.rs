//! Snapshot CSV loading.
//!
//! One row per captured pointer: `address,value`, both hex with or
//! without a `0x` prefix. Rows that fail alignment or range validation
//! are dropped silently (they never reach the analysis core); only
//! malformed files are errors.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use dowser_core::config::parse_hex;
use dowser_core::SystemDescriptor;

pub struct LoadedBatch {
    pub addresses: Vec<u32>,
    pub values: Vec<u32>,
    pub skipped: usize,
}

pub fn load_batch_csv(path: &Path, system: &SystemDescriptor) -> Result<LoadedBatch> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    parse_batch(&content, system).with_context(|| format!("parsing {}", path.display()))
}

fn parse_batch(content: &str, system: &SystemDescriptor) -> Result<LoadedBatch> {
    let mut batch = LoadedBatch {
        addresses: Vec::new(),
        values: Vec::new(),
        skipped: 0,
    };

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // A header row is tolerated on the first line only
        if number == 0 && line.to_ascii_lowercase().starts_with("address") {
            continue;
        }

        let Some((address_text, value_text)) = line.split_once(',') else {
            bail!("line {}: expected 'address,value'", number + 1);
        };
        let address = parse_hex(address_text.trim())
            .with_context(|| format!("line {}: bad address", number + 1))?;
        let value = parse_hex(value_text.trim())
            .with_context(|| format!("line {}: bad value", number + 1))?;

        if address % 4 != 0 || !system.contains(address) || !system.accepts_value(value) {
            batch.skipped += 1;
            continue;
        }
        batch.addresses.push(address);
        batch.values.push(value);
    }

    Ok(batch)
}

/// Parse a comma-separated hex target list (`0x80200004,0x80200044`)
pub fn parse_targets(text: &str) -> Result<Vec<u32>> {
    text.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| parse_hex(token).with_context(|| format!("bad target address '{}'", token)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gamecube() -> &'static SystemDescriptor {
        SystemDescriptor::lookup("gamecube").unwrap()
    }

    #[test]
    fn test_parse_rows_with_and_without_prefix() {
        let batch = parse_batch(
            "address,value\n0x80000100,0x80000104\n80000104,80000108\n",
            gamecube(),
        )
        .unwrap();
        assert_eq!(batch.addresses, vec![0x8000_0100, 0x8000_0104]);
        assert_eq!(batch.values, vec![0x8000_0104, 0x8000_0108]);
        assert_eq!(batch.skipped, 0);
    }

    #[test]
    fn test_invalid_rows_are_dropped_silently() {
        // Unaligned value, out-of-range value, out-of-range address
        let batch = parse_batch(
            "0x80000100,0x80000102\n0x80000104,0x70000000\n0x70000000,0x80000104\n0x80000108,0x80000200\n",
            gamecube(),
        )
        .unwrap();
        assert_eq!(batch.addresses, vec![0x8000_0108]);
        assert_eq!(batch.skipped, 3);
    }

    #[test]
    fn test_dual_region_selector_is_enforced() {
        let wii = SystemDescriptor::lookup("wii").unwrap();
        let batch = parse_batch(
            "0x80000100,0x90000104\n0x80000104,0x9F000000\n",
            wii,
        )
        .unwrap();
        assert_eq!(batch.addresses, vec![0x8000_0100]);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(parse_batch("0x80000100\n", gamecube()).is_err());
        assert!(parse_batch("0x80000100,zz\n", gamecube()).is_err());
    }

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets("0x80200004, 0x80200044").unwrap();
        assert_eq!(targets, vec![0x8020_0004, 0x8020_0044]);
        assert!(parse_targets("nope").is_err());
    }
}
